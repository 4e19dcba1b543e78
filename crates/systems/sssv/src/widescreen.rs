//! Widescreen support
//!
//! The renderer's expand mode widens the game's 320x240 viewport on its own.
//! What the game still needs is a wider perspective aspect (so the extra
//! columns show real geometry rather than stretched pixels), its widescreen
//! flag set, and centered viewport alignment at the start of each display
//! list.

use recomp_core::logging::{log, LogCategory, LogLevel};
use recomp_core::{ConsoleMemory, RecompContext};
use serde::{Deserialize, Serialize};

use crate::gbi::{self, GfxCommand, Origin};
use crate::rewrite::DisplayListCursor;

pub const BASE_WIDTH: f32 = 320.0;
pub const BASE_HEIGHT: f32 = 240.0;
pub const BASE_ASPECT: f32 = BASE_WIDTH / BASE_HEIGHT;

/// Game-side widescreen flag
pub const WIDESCREEN_FLAG: u32 = 0x8020_540C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectMode {
    #[default]
    Original,
    Expand,
}

/// Aspect to render at for a window, never narrower than 4:3
pub fn target_aspect(window_w: i32, window_h: i32) -> f32 {
    if window_w <= 0 || window_h <= 0 {
        return BASE_ASPECT;
    }
    (window_w as f32 / window_h as f32).max(BASE_ASPECT)
}

/// Aspect the game's perspective setup should use instead of `original`
///
/// Values outside `[0.1, 10]` are not a normal camera and pass through.
pub fn perspective_aspect(original: f32, mode: AspectMode, window_w: i32, window_h: i32) -> f32 {
    if mode == AspectMode::Original {
        return original;
    }
    if !original.is_finite() || !(0.1..=10.0).contains(&original) {
        return original;
    }
    target_aspect(window_w, window_h).max(original)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidescreenState {
    pub enabled: bool,
    pub target_width: i16,
    pub aspect_ratio: f32,
    window: (i32, i32),
    announced: bool,
}

impl WidescreenState {
    pub fn new() -> Self {
        Self {
            enabled: false,
            target_width: BASE_WIDTH as i16,
            aspect_ratio: BASE_ASPECT,
            window: (0, 0),
            announced: false,
        }
    }

    pub fn update(&mut self, mode: AspectMode, window_w: i32, window_h: i32) {
        if mode != AspectMode::Expand {
            self.enabled = false;
            self.aspect_ratio = BASE_ASPECT;
            self.target_width = BASE_WIDTH as i16;
            return;
        }

        let aspect = target_aspect(window_w, window_h);
        let width = (BASE_HEIGHT * aspect).round() as i16;
        if self.window != (window_w, window_h) {
            log(LogCategory::Hooks, LogLevel::Info, || {
                format!(
                    "window={}x{} => aspect={:.3} => target_width={}",
                    window_w, window_h, aspect, width
                )
            });
            self.window = (window_w, window_h);
        }
        self.enabled = true;
        self.aspect_ratio = aspect;
        self.target_width = width;
    }

    /// Refresh the state and raise the game's widescreen flag when expanding
    ///
    /// The game's screen width is left alone; the renderer does the expansion.
    pub fn force_widescreen_state<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        mode: AspectMode,
        window_w: i32,
        window_h: i32,
    ) {
        self.update(mode, window_w, window_h);
        if !self.enabled {
            return;
        }
        mem.write_u32(WIDESCREEN_FLAG, 1);
        if !self.announced {
            log(LogCategory::Hooks, LogLevel::Info, || {
                format!(
                    "widescreen enabled: aspect {:.3} (width would be {})",
                    self.aspect_ratio, self.target_width
                )
            });
            self.announced = true;
        }
    }

    /// Commands opening every display list
    pub fn display_list_prologue(&self) -> Vec<GfxCommand> {
        let mut cmds = Vec::with_capacity(5);
        cmds.extend_from_slice(&gbi::enable());
        cmds.push(gbi::set_rdram_extended(true));
        if self.enabled {
            cmds.extend_from_slice(&gbi::set_viewport_align(Origin::Center, 0, 0));
        }
        cmds
    }

    /// Write the prologue at the display list cursor held in `a0`
    ///
    /// Returns the advanced cursor, or None when the cursor is null, out of
    /// range or too close to the end of RDRAM.
    pub fn enable_extended_gbi<M: ConsoleMemory + ?Sized>(
        &self,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<u32> {
        let cursor = DisplayListCursor::acquire(mem, ctx.a0())?;
        let cmds = self.display_list_prologue();
        if !cursor.fits(mem, cmds.len() as u32 * gbi::COMMAND_BYTES) {
            return None;
        }
        Some(cursor.append(mem, &cmds))
    }
}

impl Default for WidescreenState {
    fn default() -> Self {
        Self::new()
    }
}
