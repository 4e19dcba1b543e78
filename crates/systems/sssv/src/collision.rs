//! Trophy hitbox guard
//!
//! One trophy's hitbox size byte gets overwritten during level load, which
//! makes it impossible to collect. The guard runs from the trophy update and
//! puts the byte back.

use recomp_core::logging::{log, LogCategory, LogLevel};
use recomp_core::ConsoleMemory;

pub const TROPHY_HITBOX_SIZE: u32 = 0x803A_D3F3;
pub const TROPHY_HITBOX_VALUE: u8 = 0x15;

/// Restore the hitbox size; returns true if it had to be patched
pub fn trophy_collision_guard<M: ConsoleMemory + ?Sized>(mem: &mut M) -> bool {
    let current = mem.read_u8(TROPHY_HITBOX_SIZE);
    if current == TROPHY_HITBOX_VALUE {
        return false;
    }
    mem.write_u8(TROPHY_HITBOX_SIZE, TROPHY_HITBOX_VALUE);
    log(LogCategory::Hooks, LogLevel::Debug, || {
        format!("trophy hitbox size {:#04X} -> {:#04X}", current, TROPHY_HITBOX_VALUE)
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use recomp_core::Rdram;

    #[test]
    fn test_guard_patches_once() {
        let mut mem = Rdram::new(0x0040_0000);
        mem.write_u8(TROPHY_HITBOX_SIZE - 1, 0xAA);
        mem.write_u8(TROPHY_HITBOX_SIZE + 1, 0xBB);

        assert!(trophy_collision_guard(&mut mem));
        assert_eq!(mem.read_u8(TROPHY_HITBOX_SIZE), TROPHY_HITBOX_VALUE);
        assert!(!trophy_collision_guard(&mut mem));

        // Neighbors untouched
        assert_eq!(mem.read_u8(TROPHY_HITBOX_SIZE - 1), 0xAA);
        assert_eq!(mem.read_u8(TROPHY_HITBOX_SIZE + 1), 0xBB);
    }
}
