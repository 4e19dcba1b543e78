//! Register state handed to hooks by recompiled code
//!
//! Hooks run in the middle of a recompiled function, so they see the MIPS
//! o32 calling convention: the first four arguments in `a0`-`a3` (r4-r7),
//! further arguments on the stack at `sp + 0x10` and up, and single-precision
//! float arguments in `f12`.

use serde::{Deserialize, Serialize};

/// General purpose register indices used by hooks
pub mod reg {
    pub const A0: usize = 4;
    pub const A1: usize = 5;
    pub const A2: usize = 6;
    pub const A3: usize = 7;
    pub const SP: usize = 29;
}

/// Offset of the first stack-passed argument
pub const STACK_ARG_BASE: u32 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecompContext {
    /// Lower 32 bits of each general purpose register
    pub gpr: [u32; 32],
    /// First float argument register
    pub f12: f32,
}

impl RecompContext {
    pub fn new() -> Self {
        Self {
            gpr: [0; 32],
            f12: 0.0,
        }
    }

    pub fn a0(&self) -> u32 {
        self.gpr[reg::A0]
    }

    pub fn a1(&self) -> u32 {
        self.gpr[reg::A1]
    }

    pub fn a2(&self) -> u32 {
        self.gpr[reg::A2]
    }

    pub fn a3(&self) -> u32 {
        self.gpr[reg::A3]
    }

    pub fn sp(&self) -> u32 {
        self.gpr[reg::SP]
    }

    /// Address of the stack argument slot at `offset` from `sp`
    pub fn stack_slot(&self, offset: u32) -> u32 {
        self.sp().wrapping_add(offset)
    }
}

impl Default for RecompContext {
    fn default() -> Self {
        Self::new()
    }
}
