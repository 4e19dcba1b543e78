//! Billboard ortho-quad rewrite
//!
//! The game draws sprites with texture rectangles computed from a world
//! position and the current view-projection matrix. Rectangles carry no
//! transform, so the renderer cannot interpolate them between game ticks.
//! [`RewriteEngine::rewrite`] reproduces the game's projection math, then
//! emits the same rectangle as a textured quad under an orthographic
//! projection, tagged with a stable group ID so the renderer can interpolate
//! it.
//!
//! # Gates
//!
//! Each call walks a fixed sequence of checks. The first one that fails ends
//! the call with a [`RewriteOutcome`] and leaves the display list untouched:
//!
//! ```text
//! args -> screen -> dl state (frame reset) -> pool precheck -> VP cache fill
//!      -> camera depth -> clip w -> fov -> sprite scale -> rectangle
//!      -> allocation -> identity/cache -> vertices -> dl pointer
//!      -> dl capacity -> emission
//! ```

use recomp_core::graphics::{fixed16_16_to_float, identity, orthographic, row_major, Mat4};
use recomp_core::logging::{log, LogCategory, LogLevel};
use recomp_core::memory::{virtual_to_physical, RDRAM_SIZE_BYTES};
use recomp_core::{ConsoleMemory, RecompContext};
use serde::{Deserialize, Serialize};

use crate::alloc::{
    ScratchAllocator, SharedMatrices, DEFAULT_POOL_BASE, DEFAULT_POOL_SLOTS, DEFAULT_SLOT_BYTES,
};
use crate::cache::{compute_identity, quantize, IdentityCache, QuadCorners};
use crate::gbi::{self, Aspect, Edit, GfxCommand, GroupComponents, Interpolation, Order};

/// Game memory locations read by the rewrite
pub mod addr {
    /// Pointer to the display list state; changes once per frame
    pub const DL_STATE_PTR: u32 = 0x8020_4278;
    pub const SCREEN_WIDTH: u32 = 0x8020_3FD0;
    pub const SCREEN_HEIGHT: u32 = 0x8020_3FD2;
    pub const LEVEL_CONFIG: u32 = 0x803F_2D50;

    /// Offset of the vertical FOV (f32) inside the level config
    pub const LEVEL_FOV_Y: u32 = 0xE0;
    /// Offset of the prim depth bias (i16) inside the level config
    pub const LEVEL_PRIM_DEPTH_BIAS: u32 = 0x42;
    /// Offset of the row-major view-projection f32[16] inside the DL state
    pub const DL_STATE_VIEW_PROJ: u32 = 0x38A10;
}

/// Stack argument offsets of the sprite draw calls
pub mod stack {
    use recomp_core::context::STACK_ARG_BASE;

    pub const HALF_W: u32 = STACK_ARG_BASE;
    pub const HALF_H: u32 = STACK_ARG_BASE + 0x4;
    pub const SCALE: u32 = STACK_ARG_BASE + 0x8;
    pub const SCALE_Y: u32 = STACK_ARG_BASE + 0xC;
    pub const WRAP: u32 = STACK_ARG_BASE + 0x10;
    pub const OFFSET_CLAMP: u32 = STACK_ARG_BASE + 0x14;
}

pub const MATRIX_BYTES: u32 = 64;
pub const VERTEX_BYTES: u32 = 24;
pub const QUAD_VERTEX_BYTES: u32 = VERTEX_BYTES * 4;

/// Records written per billboard
pub const EMITTED_COMMANDS: u32 = 34;
pub const EMITTED_BYTES: u32 = EMITTED_COMMANDS * gbi::COMMAND_BYTES;

/// Per-call-site tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillboardConfig {
    pub hash_salt: u32,
    pub scale_clamp_min: f32,
    pub scale_clamp_max: f32,
    /// Read an independent Y scale from `sp+0x1C`
    pub dual_scale: bool,
    /// Nonzero replaces half-height for geometry; texture coordinates keep the raw value
    pub geom_half_h: i16,
    pub y_top_mul: f32,
    /// When positive, the bottom edge sits this far below center instead of one offset below
    pub y_bottom_fixed: f32,
    /// Wrap the horizontal center into `[0, screen_w * 4)`
    pub screen_wrap: bool,
    /// When positive, offsets are clamped to twice this value
    pub offset_clamp: i16,
    pub hash_includes_scale: bool,
    pub hash_coord_shift: u32,
}

impl Default for BillboardConfig {
    fn default() -> Self {
        Self {
            hash_salt: 0x73F1_7C00,
            scale_clamp_min: 0.0,
            scale_clamp_max: 16383.0,
            dual_scale: false,
            geom_half_h: 0,
            y_top_mul: 1.0,
            y_bottom_fixed: 0.0,
            screen_wrap: false,
            offset_clamp: 0,
            hash_includes_scale: true,
            hash_coord_shift: 0,
        }
    }
}

/// Engine tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSettings {
    pub pool_base: u32,
    pub pool_slots: u32,
    pub slot_bytes: u32,
    /// Camera-space depth must be at or below this to draw
    pub behind_camera_z: f32,
    pub recency_window: u64,
    pub stats_interval_frames: u64,
    pub cache_max_entries: usize,
}

impl Default for RewriteSettings {
    fn default() -> Self {
        Self {
            pool_base: DEFAULT_POOL_BASE,
            pool_slots: DEFAULT_POOL_SLOTS,
            slot_bytes: DEFAULT_SLOT_BYTES,
            behind_camera_z: -3.0,
            recency_window: IdentityCache::DEFAULT_RECENCY_WINDOW,
            stats_interval_frames: 150,
            cache_max_entries: IdentityCache::DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewriteOutcome {
    Emitted,
    InvalidArgs,
    InvalidScreen,
    MissingDisplayListState,
    BehindCamera,
    InvalidClipWidth,
    InvalidFov,
    InvalidSpriteScale,
    Offscreen,
    AllocFail,
    DisplayListPointerFail,
    DisplayListCapacityFail,
}

impl RewriteOutcome {
    pub const COUNT: usize = 12;

    pub const ALL: [RewriteOutcome; Self::COUNT] = [
        RewriteOutcome::Emitted,
        RewriteOutcome::InvalidArgs,
        RewriteOutcome::InvalidScreen,
        RewriteOutcome::MissingDisplayListState,
        RewriteOutcome::BehindCamera,
        RewriteOutcome::InvalidClipWidth,
        RewriteOutcome::InvalidFov,
        RewriteOutcome::InvalidSpriteScale,
        RewriteOutcome::Offscreen,
        RewriteOutcome::AllocFail,
        RewriteOutcome::DisplayListPointerFail,
        RewriteOutcome::DisplayListCapacityFail,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_emitted(self) -> bool {
        self == RewriteOutcome::Emitted
    }

    pub fn name(self) -> &'static str {
        match self {
            RewriteOutcome::Emitted => "emitted",
            RewriteOutcome::InvalidArgs => "invalid_args",
            RewriteOutcome::InvalidScreen => "invalid_screen",
            RewriteOutcome::MissingDisplayListState => "missing_dl_state",
            RewriteOutcome::BehindCamera => "behind_camera",
            RewriteOutcome::InvalidClipWidth => "invalid_clip_w",
            RewriteOutcome::InvalidFov => "invalid_fov",
            RewriteOutcome::InvalidSpriteScale => "invalid_sprite_scale",
            RewriteOutcome::Offscreen => "offscreen",
            RewriteOutcome::AllocFail => "alloc_fail",
            RewriteOutcome::DisplayListPointerFail => "gfx_ptr_fail",
            RewriteOutcome::DisplayListCapacityFail => "gfx_capacity_fail",
        }
    }
}

impl std::fmt::Display for RewriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Intermediate values of one rewrite, filled as far as the gates got
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RewriteTrace {
    pub world_x: i32,
    pub world_y: i32,
    pub world_z: i32,
    pub half_w: i16,
    pub half_h: i16,
    pub scale: i32,
    pub screen_w: i16,
    pub screen_h: i16,
    pub cam_z: f32,
    pub clip_w: f32,
    pub sprite_scale: f32,
    pub xl: f32,
    pub yl: f32,
    pub xh: f32,
    pub yh: f32,
    pub group_id: u32,
}

/// Sprite draw arguments as passed by the game
#[derive(Debug, Clone, Copy)]
struct SpriteArgs {
    world: [i32; 3],
    half_w: i16,
    half_h: i16,
    scale: i32,
    scale_y: i32,
}

impl SpriteArgs {
    fn read<M: ConsoleMemory + ?Sized>(mem: &M, ctx: &RecompContext, dual_scale: bool) -> Self {
        let scale = mem.read_i32(ctx.stack_slot(stack::SCALE));
        Self {
            world: [ctx.a1() as i32, ctx.a2() as i32, ctx.a3() as i32],
            // Halfword arguments arrive sign-extended in full stack words
            half_w: mem.read_u32(ctx.stack_slot(stack::HALF_W)) as i16,
            half_h: mem.read_u32(ctx.stack_slot(stack::HALF_H)) as i16,
            scale,
            scale_y: if dual_scale {
                mem.read_i32(ctx.stack_slot(stack::SCALE_Y))
            } else {
                scale
            },
        }
    }

    fn is_valid(&self, dual_scale: bool) -> bool {
        self.half_w > 0 && self.half_h > 0 && self.scale > 0 && (!dual_scale || self.scale_y > 0)
    }
}

/// std::clamp semantics: NaN passes through unchanged
#[inline]
fn clamp_scale(value: f32, min: f32, max: f32) -> f32 {
    if value < min {
        min
    } else if max < value {
        max
    } else {
        value
    }
}

#[inline]
fn clamp_i16(value: f32) -> i16 {
    (value.round() as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Depth the game's rectangle path would have used for the same sprite
pub fn prim_depth(clip_w: f32, bias: i16) -> u16 {
    let raw = (clip_w * 1023.0 * 32.0 + 32736.0).round() as i32;
    (raw.wrapping_sub(bias as i32) & 0xFFFF) as u16
}

fn write_matrix<M: ConsoleMemory + ?Sized>(mem: &mut M, addr: u32, m: &Mat4) {
    for (i, v) in m.iter().enumerate() {
        mem.write_f32(addr + i as u32 * 4, *v);
    }
}

/// One extended vertex: current position, previous position for
/// interpolation, texture coordinate, opaque white
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadVertex {
    pub x: i16,
    pub y: i16,
    pub s: i16,
    pub t: i16,
    pub prev_x: i16,
    pub prev_y: i16,
}

impl QuadVertex {
    pub fn write<M: ConsoleMemory + ?Sized>(&self, mem: &mut M, addr: u32) {
        mem.write_u16(addr, self.x as u16);
        mem.write_u16(addr + 2, self.y as u16);
        mem.write_u16(addr + 4, 0); // z
        mem.write_u16(addr + 6, 0); // flag
        mem.write_u16(addr + 8, self.s as u16);
        mem.write_u16(addr + 10, self.t as u16);
        mem.write_u32(addr + 12, 0xFFFF_FFFF); // rgba
        mem.write_u16(addr + 16, self.prev_x as u16);
        mem.write_u16(addr + 18, self.prev_y as u16);
        mem.write_u16(addr + 20, 0); // prev z
        mem.write_u16(addr + 22, 0);
    }

    pub fn read<M: ConsoleMemory + ?Sized>(mem: &M, addr: u32) -> Self {
        Self {
            x: mem.read_i16(addr),
            y: mem.read_i16(addr + 2),
            s: mem.read_i16(addr + 8),
            t: mem.read_i16(addr + 10),
            prev_x: mem.read_i16(addr + 16),
            prev_y: mem.read_i16(addr + 18),
        }
    }
}

/// Texture coordinate extents in 10.5 fixed point, aligned to texel centers
pub fn texture_extents(half_w: i16, half_h: i16) -> (i16, i16) {
    let extent = |half: i16| ((half as i32 - 1).max(0) << 6).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    (extent(half_w), extent(half_h))
}

/// Build the full billboard command sequence
pub fn billboard_commands(
    prim_depth: u16,
    proj_addr: u32,
    view_addr: u32,
    verts_addr: u32,
    group_id: u32,
) -> Vec<GfxCommand> {
    let mut cmds = Vec::with_capacity(EMITTED_COMMANDS as usize);
    cmds.push(gbi::set_prim_depth(prim_depth, 0));
    cmds.extend_from_slice(&gbi::enable());
    cmds.push(gbi::set_rdram_extended(true));
    cmds.extend_from_slice(&gbi::push_other_mode());
    cmds.push(gbi::texture_perspective_on());
    cmds.push(gbi::push_projection_matrix());
    // Standard stacks drive clipping, so they need the ortho too
    cmds.extend_from_slice(&gbi::matrix_float(
        proj_addr,
        gbi::matrix_float_params(true, true, false),
    ));
    cmds.extend_from_slice(&gbi::matrix_float(
        view_addr,
        gbi::matrix_float_params(false, true, true),
    ));
    cmds.extend_from_slice(&gbi::set_proj_matrix_float(proj_addr));
    cmds.extend_from_slice(&gbi::set_view_matrix_float(view_addr));
    cmds.extend_from_slice(&gbi::matrix_group(
        group_id,
        Interpolation::Simple,
        true,
        false,
        GroupComponents::VERTICES_ONLY,
        Order::Linear,
        Edit::None,
        Aspect::Auto,
    ));
    cmds.extend_from_slice(&gbi::vertex(verts_addr, 4, 0));
    // Both windings, so culling mode never hides the quad
    cmds.push(gbi::tri2([0, 1, 3], [0, 3, 2]));
    cmds.push(gbi::tri2([0, 3, 1], [0, 2, 3]));
    cmds.push(gbi::pop_modelview());
    cmds.push(gbi::pop_matrix_group(0));
    cmds.push(gbi::pop_projection_matrix());
    // Later 3D geometry uses the extended matrices; restore them to identity
    cmds.extend_from_slice(&gbi::set_proj_matrix_float(view_addr));
    cmds.extend_from_slice(&gbi::set_view_matrix_float(view_addr));
    // Other-mode pop does not cover extended addressing
    cmds.push(gbi::set_rdram_extended(false));
    cmds.extend_from_slice(&gbi::pop_other_mode());
    cmds
}

/// Validated display list cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayListCursor {
    pub slot: u32,
    pub gdl: u32,
    pub capacity_bytes: u32,
}

impl DisplayListCursor {
    /// Resolve the cursor stored at `slot`; None for null or out-of-range pointers
    pub fn acquire<M: ConsoleMemory + ?Sized>(mem: &M, slot: u32) -> Option<Self> {
        let gdl = mem.read_u32(slot);
        if gdl == 0 {
            return None;
        }
        let phys = virtual_to_physical(gdl);
        if phys >= RDRAM_SIZE_BYTES {
            return None;
        }
        Some(Self {
            slot,
            gdl,
            capacity_bytes: RDRAM_SIZE_BYTES - phys,
        })
    }

    pub fn fits<M: ConsoleMemory + ?Sized>(&self, mem: &M, bytes: u32) -> bool {
        self.capacity_bytes >= bytes && mem.is_mapped(self.gdl, bytes)
    }

    /// Write `cmds` at the cursor and store the advanced pointer back
    pub fn append<M: ConsoleMemory + ?Sized>(&self, mem: &mut M, cmds: &[GfxCommand]) -> u32 {
        let mut addr = self.gdl;
        for cmd in cmds {
            mem.write_u32(addr, cmd.w0);
            mem.write_u32(addr + 4, cmd.w1);
            addr += gbi::COMMAND_BYTES;
        }
        mem.write_u32(self.slot, addr);
        addr
    }
}

pub struct RewriteEngine {
    settings: RewriteSettings,
    alloc: ScratchAllocator,
    cache: IdentityCache,
    frame_count: u64,
}

impl RewriteEngine {
    pub fn new(settings: RewriteSettings) -> Self {
        Self {
            alloc: ScratchAllocator::new(settings.pool_base, settings.pool_slots, settings.slot_bytes),
            cache: IdentityCache::new(settings.recency_window, settings.cache_max_entries),
            settings,
            frame_count: 0,
        }
    }

    pub fn settings(&self) -> &RewriteSettings {
        &self.settings
    }

    pub fn allocator(&self) -> &ScratchAllocator {
        &self.alloc
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Frames seen so far, counted on frame token changes
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Rewrite one sprite draw into an interpolated quad
    ///
    /// Never panics and never partially emits: on any outcome other than
    /// [`RewriteOutcome::Emitted`] the display list and its cursor are
    /// unchanged.
    pub fn rewrite<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
        cfg: &BillboardConfig,
    ) -> (RewriteOutcome, RewriteTrace) {
        let mut trace = RewriteTrace::default();
        let outcome = self.run_gates(mem, ctx, cfg, &mut trace);
        if !outcome.is_emitted() {
            log(LogCategory::Rewrite, LogLevel::Trace, || {
                format!(
                    "{} at xyz=({},{},{}) hw={} hh={} s={} z={:.3}",
                    outcome,
                    trace.world_x,
                    trace.world_y,
                    trace.world_z,
                    trace.half_w,
                    trace.half_h,
                    trace.scale,
                    trace.cam_z
                )
            });
        }
        (outcome, trace)
    }

    fn run_gates<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
        cfg: &BillboardConfig,
        trace: &mut RewriteTrace,
    ) -> RewriteOutcome {
        let args = SpriteArgs::read(mem, ctx, cfg.dual_scale);
        let [world_x, world_y, world_z] = args.world;
        trace.world_x = world_x;
        trace.world_y = world_y;
        trace.world_z = world_z;
        trace.half_w = args.half_w;
        trace.half_h = args.half_h;
        trace.scale = args.scale;

        if !args.is_valid(cfg.dual_scale) {
            return RewriteOutcome::InvalidArgs;
        }

        let screen_w = mem.read_i16(addr::SCREEN_WIDTH);
        let screen_h = mem.read_i16(addr::SCREEN_HEIGHT);
        trace.screen_w = screen_w;
        trace.screen_h = screen_h;
        if screen_w <= 0 || screen_h <= 0 {
            return RewriteOutcome::InvalidScreen;
        }
        let sw = screen_w as f32;
        let sh = screen_h as f32;

        let dl_state = mem.read_u32(addr::DL_STATE_PTR);
        if dl_state == 0 {
            return RewriteOutcome::MissingDisplayListState;
        }
        if self.alloc.detect_new_frame(dl_state) {
            self.frame_count += 1;
        }

        let shared = self.alloc.matrices_for(screen_w, screen_h);
        let needed_bytes = match shared {
            Some(_) => QUAD_VERTEX_BYTES,
            None => 2 * MATRIX_BYTES + QUAD_VERTEX_BYTES,
        };
        if !self.alloc.can_allocate(needed_bytes) {
            return RewriteOutcome::AllocFail;
        }

        let vp = match self.alloc.view_projection() {
            Some(m) => *m,
            None => {
                let base = dl_state.wrapping_add(addr::DL_STATE_VIEW_PROJ);
                let mut m = [0.0f32; 16];
                for (i, v) in m.iter_mut().enumerate() {
                    *v = mem.read_f32(base.wrapping_add(i as u32 * 4));
                }
                self.alloc.cache_view_projection(m);
                m
            }
        };
        let m = |r: usize, c: usize| row_major(&vp, r, c);

        let x = fixed16_16_to_float(world_x);
        let y = fixed16_16_to_float(world_y);
        let z = fixed16_16_to_float(world_z);

        let cam_z = m(2, 3) + m(2, 2) * z + m(2, 1) * y + m(2, 0) * x;
        trace.cam_z = cam_z;
        // Written so NaN fails too
        if !(cam_z <= self.settings.behind_camera_z) {
            return RewriteOutcome::BehindCamera;
        }

        let clip_w = (m(3, 2) * cam_z + m(3, 3)) / -cam_z;
        trace.clip_w = clip_w;
        if !(clip_w > 0.0) {
            return RewriteOutcome::InvalidClipWidth;
        }

        let proj_x = m(0, 3) + m(0, 2) * z + m(0, 1) * y + m(0, 0) * x;
        let proj_y = m(1, 3) + m(1, 2) * z + m(1, 1) * y + m(1, 0) * x;

        // Screen space is 4x scaled
        let center_x = m(3, 0) * proj_x / cam_z + sw * 2.0;
        let center_y = m(3, 1) * proj_y / cam_z + sh * 2.0;

        let fov_y = mem.read_f32(addr::LEVEL_CONFIG + addr::LEVEL_FOV_Y);
        if !fov_y.is_finite() || fov_y.abs() < 0.0001 {
            return RewriteOutcome::InvalidFov;
        }

        let scaled_x = args.scale as f32 * 33.0 / fov_y;
        let scaled_y = args.scale_y as f32 * 33.0 / fov_y;
        let sprite_scale_x =
            clamp_scale(scaled_x * 32.0 / -cam_z, cfg.scale_clamp_min, cfg.scale_clamp_max);
        let sprite_scale_y =
            clamp_scale(scaled_y * 32.0 / -cam_z, cfg.scale_clamp_min, cfg.scale_clamp_max);
        trace.sprite_scale = sprite_scale_x;
        if !(sprite_scale_x > 0.0) || !(sprite_scale_y > 0.0) {
            return RewriteOutcome::InvalidSpriteScale;
        }

        let geom_half_h = if cfg.geom_half_h != 0 {
            cfg.geom_half_h
        } else {
            args.half_h
        };
        let mut x_offset = args.half_w as f32 * sprite_scale_x / 128.0;
        let mut y_offset = geom_half_h as f32 * sprite_scale_y / 128.0;
        if cfg.offset_clamp > 0 {
            let limit = cfg.offset_clamp as f32 * 2.0;
            x_offset = x_offset.min(limit);
            y_offset = y_offset.min(limit);
        }

        let screen_max_x = sw * 4.0;
        let screen_max_y = sh * 4.0;
        let center_x = if cfg.screen_wrap {
            center_x.rem_euclid(screen_max_x)
        } else {
            center_x
        };

        let xl = center_x - x_offset;
        let yl = center_y - y_offset * cfg.y_top_mul;
        let xh = center_x + x_offset;
        let yh = if cfg.y_bottom_fixed > 0.0 {
            center_y + cfg.y_bottom_fixed
        } else {
            center_y + y_offset
        };
        trace.xl = xl;
        trace.yl = yl;
        trace.xh = xh;
        trace.yh = yh;

        let visible = xl < xh
            && yl < yh
            && xl < screen_max_x
            && yl < screen_max_y
            && xh > 0.0
            && yh > 0.0;
        if !visible {
            return RewriteOutcome::Offscreen;
        }

        let (proj_addr, view_addr, verts_addr) = match shared {
            Some(shared) => match self.reserve(mem, QUAD_VERTEX_BYTES) {
                Some(verts) => (shared.proj_addr, shared.view_addr, verts),
                None => return RewriteOutcome::AllocFail,
            },
            None => {
                let Some(base) = self.reserve(mem, 2 * MATRIX_BYTES + QUAD_VERTEX_BYTES) else {
                    return RewriteOutcome::AllocFail;
                };
                let proj_addr = base;
                let view_addr = base + MATRIX_BYTES;
                write_matrix(
                    mem,
                    proj_addr,
                    &orthographic(-sw * 2.0, sw * 2.0, sh * 2.0, -sh * 2.0, -1.0, 1.0),
                );
                write_matrix(mem, view_addr, &identity());
                self.alloc.cache_matrices(SharedMatrices {
                    proj_addr,
                    view_addr,
                    screen_w,
                    screen_h,
                });
                log(LogCategory::Alloc, LogLevel::Debug, || {
                    format!(
                        "shared matrices at {:08X}/{:08X} for {}x{}",
                        proj_addr, view_addr, screen_w, screen_h
                    )
                });
                (proj_addr, view_addr, view_addr + MATRIX_BYTES)
            }
        };

        // Ortho origin is the screen center
        let current = QuadCorners::from_rect(
            clamp_i16(xl - sw * 2.0),
            clamp_i16(yl - sh * 2.0),
            clamp_i16(xh - sw * 2.0),
            clamp_i16(yh - sh * 2.0),
        );

        let shift = cfg.hash_coord_shift;
        let signature = [
            quantize(world_x, shift),
            quantize(world_y, shift),
            quantize(world_z, shift),
        ];
        let hash_scale = if cfg.hash_includes_scale { args.scale } else { 0 };
        let group_id = compute_identity(
            signature[0],
            signature[1],
            signature[2],
            args.half_w,
            args.half_h,
            hash_scale,
            cfg.hash_salt,
        );
        trace.group_id = group_id;
        let previous = self.cache.lookup_and_update(group_id, current, signature);

        let (s_max, t_max) = texture_extents(args.half_w, args.half_h);
        let tex = [(0, 0), (s_max, 0), (0, t_max), (s_max, t_max)];
        for (i, (s, t)) in tex.into_iter().enumerate() {
            QuadVertex {
                x: current.x[i],
                y: current.y[i],
                s,
                t,
                prev_x: previous.x[i],
                prev_y: previous.y[i],
            }
            .write(mem, verts_addr + i as u32 * VERTEX_BYTES);
        }

        let bias = mem.read_i16(addr::LEVEL_CONFIG + addr::LEVEL_PRIM_DEPTH_BIAS);
        let depth = prim_depth(clip_w, bias);

        let Some(cursor) = DisplayListCursor::acquire(mem, ctx.a0()) else {
            return RewriteOutcome::DisplayListPointerFail;
        };
        if !cursor.fits(mem, EMITTED_BYTES) {
            return RewriteOutcome::DisplayListCapacityFail;
        }

        let cmds = billboard_commands(depth, proj_addr, view_addr, verts_addr, group_id);
        debug_assert_eq!(cmds.len(), EMITTED_COMMANDS as usize);
        let end = cursor.append(mem, &cmds);
        log(LogCategory::DisplayList, LogLevel::Trace, || {
            format!(
                "billboard {:08X} at {:08X}..{:08X} depth={:04X}",
                group_id, cursor.gdl, end, depth
            )
        });

        RewriteOutcome::Emitted
    }

    /// Allocate from the pool only if the range is backed by the image
    fn reserve<M: ConsoleMemory + ?Sized>(&mut self, mem: &M, bytes: u32) -> Option<u32> {
        let next = self.alloc.next_address();
        if !next.is_some_and(|addr| mem.is_mapped(addr, bytes)) {
            log(LogCategory::Alloc, LogLevel::Warn, || {
                format!("scratch pool cursor {:08X?} is outside the memory image", next)
            });
            return None;
        }
        match self.alloc.allocate(bytes) {
            Ok(addr) => Some(addr),
            Err(err) => {
                log(LogCategory::Alloc, LogLevel::Debug, || err.to_string());
                None
            }
        }
    }
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::new(RewriteSettings::default())
    }
}
