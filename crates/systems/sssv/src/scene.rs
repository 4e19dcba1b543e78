//! Synthetic game state for driving hooks without the game
//!
//! Lays out just enough of the game's memory for the billboard path: screen
//! size, level config, two alternating display list state buffers (the frame
//! token), the view-projection matrix, a display list buffer with its cursor
//! slot, and a stack frame holding the draw arguments.

use recomp_core::context::reg;
use recomp_core::graphics::{identity, Mat4};
use recomp_core::{ConsoleMemory, RecompContext};

use crate::gbi::{GfxCommand, COMMAND_BYTES};
use crate::rewrite::{addr, stack};

/// Display list state buffers, swapped every frame
pub const DL_STATE_A: u32 = 0x8030_0000;
pub const DL_STATE_B: u32 = 0x8034_0000;
/// Slot holding the display list cursor (passed in `a0`)
pub const GFX_SLOT: u32 = 0x801D_9EB8;
pub const DL_BUFFER: u32 = 0x8010_0000;
pub const DL_BUFFER_BYTES: u32 = 0x0004_0000;
pub const STACK_POINTER: u32 = 0x801F_0000;

/// One sprite draw call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneSprite {
    /// World position in 16.16
    pub world: [i32; 3],
    pub half_w: i16,
    pub half_h: i16,
    pub scale: i32,
    pub scale_y: i32,
    pub wrap: bool,
    pub offset_clamp: i16,
}

impl SceneSprite {
    pub fn new(world: [i32; 3], half: i16, scale: i32) -> Self {
        Self {
            world,
            half_w: half,
            half_h: half,
            scale,
            scale_y: scale,
            wrap: false,
            offset_clamp: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    pub screen_w: i16,
    pub screen_h: i16,
    pub fov_y: f32,
    pub prim_depth_bias: i16,
    /// Row-major, as the game stores it
    pub view_proj: Mat4,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            screen_w: 320,
            screen_h: 240,
            fov_y: 60.0,
            prim_depth_bias: 0,
            view_proj: identity(),
        }
    }
}

impl Scene {
    /// Write the per-level state
    pub fn install<M: ConsoleMemory + ?Sized>(&self, mem: &mut M) {
        mem.write_u16(addr::SCREEN_WIDTH, self.screen_w as u16);
        mem.write_u16(addr::SCREEN_HEIGHT, self.screen_h as u16);
        mem.write_f32(addr::LEVEL_CONFIG + addr::LEVEL_FOV_Y, self.fov_y);
        mem.write_u16(
            addr::LEVEL_CONFIG + addr::LEVEL_PRIM_DEPTH_BIAS,
            self.prim_depth_bias as u16,
        );
    }

    /// Start frame `frame`: swap the DL state buffer and rewind the display list
    ///
    /// Returns the new frame token.
    pub fn begin_frame<M: ConsoleMemory + ?Sized>(&self, mem: &mut M, frame: u64) -> u32 {
        let dl_state = if frame % 2 == 0 { DL_STATE_A } else { DL_STATE_B };
        mem.write_u32(addr::DL_STATE_PTR, dl_state);
        let vp_base = dl_state + addr::DL_STATE_VIEW_PROJ;
        for (i, v) in self.view_proj.iter().enumerate() {
            mem.write_f32(vp_base + i as u32 * 4, *v);
        }
        mem.write_u32(GFX_SLOT, DL_BUFFER);
        dl_state
    }

    /// Write a sprite's stack arguments and build the hook's register state
    pub fn sprite_context<M: ConsoleMemory + ?Sized>(
        &self,
        mem: &mut M,
        sprite: &SceneSprite,
    ) -> RecompContext {
        let mut ctx = RecompContext::new();
        ctx.gpr[reg::A0] = GFX_SLOT;
        ctx.gpr[reg::A1] = sprite.world[0] as u32;
        ctx.gpr[reg::A2] = sprite.world[1] as u32;
        ctx.gpr[reg::A3] = sprite.world[2] as u32;
        ctx.gpr[reg::SP] = STACK_POINTER;

        mem.write_u32(STACK_POINTER + stack::HALF_W, sprite.half_w as i32 as u32);
        mem.write_u32(STACK_POINTER + stack::HALF_H, sprite.half_h as i32 as u32);
        mem.write_u32(STACK_POINTER + stack::SCALE, sprite.scale as u32);
        mem.write_u32(STACK_POINTER + stack::SCALE_Y, sprite.scale_y as u32);
        mem.write_u32(STACK_POINTER + stack::WRAP, sprite.wrap as u32);
        mem.write_u32(STACK_POINTER + stack::OFFSET_CLAMP, sprite.offset_clamp as i32 as u32);
        ctx
    }
}

/// Commands written to the display list buffer so far this frame
pub fn emitted_commands<M: ConsoleMemory + ?Sized>(mem: &M) -> Vec<GfxCommand> {
    let end = mem.read_u32(GFX_SLOT);
    let count = end.saturating_sub(DL_BUFFER).min(DL_BUFFER_BYTES) / COMMAND_BYTES;
    (0..count)
        .map(|i| {
            let a = DL_BUFFER + i * COMMAND_BYTES;
            GfxCommand::new(mem.read_u32(a), mem.read_u32(a + 4))
        })
        .collect()
}

/// Sprites spaced along a line in front of the camera
pub fn sprite_row(count: usize) -> Vec<SceneSprite> {
    (0..count)
        .map(|i| {
            let x = (i as i32 % 9 - 4) * 0x0001_0000;
            let z = -(8 + (i as i32 % 24)) * 0x0001_0000;
            SceneSprite::new([x, 0, z], 16 + (i % 3) as i16 * 8, 8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recomp_core::Rdram;

    #[test]
    fn test_frames_alternate_tokens() {
        let mut mem = Rdram::extended();
        let scene = Scene::default();
        scene.install(&mut mem);
        assert_eq!(scene.begin_frame(&mut mem, 0), DL_STATE_A);
        assert_eq!(scene.begin_frame(&mut mem, 1), DL_STATE_B);
        assert_eq!(mem.read_u32(addr::DL_STATE_PTR), DL_STATE_B);
        assert_eq!(mem.read_f32(DL_STATE_B + addr::DL_STATE_VIEW_PROJ), 1.0);
        assert_eq!(mem.read_i16(addr::SCREEN_WIDTH), 320);
    }

    #[test]
    fn test_sprite_context_registers() {
        let mut mem = Rdram::extended();
        let sprite = SceneSprite::new([0, 0, -655360], 32, 8);
        let ctx = Scene::default().sprite_context(&mut mem, &sprite);
        assert_eq!(ctx.a0(), GFX_SLOT);
        assert_eq!(ctx.a3() as i32, -655360);
        assert_eq!(mem.read_u32(ctx.stack_slot(stack::HALF_W)), 32);
        assert_eq!(emitted_commands(&mem).len(), 0);
    }

    #[test]
    fn test_sprite_row_stays_in_front() {
        for sprite in sprite_row(50) {
            assert!(sprite.world[2] <= -8 * 0x0001_0000);
        }
    }
}
