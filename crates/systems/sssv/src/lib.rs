//! Runtime patches for the statically recompiled Space Station Silicon Valley.
//!
//! The centerpiece rewrites sprite draws ("billboards") from texture
//! rectangles into interpolated quads so the renderer can smooth them at
//! frame rates above the game's tick rate:
//!
//! - [`gbi`]: display list command builders
//! - [`alloc`]: frame-scoped scratch pool in extended RDRAM
//! - [`cache`]: sprite identity hashing and previous-quad cache
//! - [`stats`]: per-call-site counters and periodic reports
//! - [`rewrite`]: the rewrite engine itself
//! - [`hooks`]: per-call-site adapters and [`BillboardRewriter`]
//! - [`controls`]: user toggles, persisted as JSON
//! - [`scene`]: synthetic game state for headless runs and tests
//!
//! Smaller independent patches:
//!
//! - [`widescreen`]: perspective aspect, widescreen flag, display list prologue
//! - [`collision`]: trophy hitbox guard
//! - [`vi_scale`]: drop unsupported VI scale requests

pub mod alloc;
pub mod cache;
pub mod collision;
pub mod controls;
pub mod gbi;
pub mod hooks;
pub mod rewrite;
pub mod scene;
pub mod stats;
pub mod vi_scale;
pub mod widescreen;

use recomp_core::memory::RDRAM_SIZE_BYTES;
use recomp_core::{MemoryError, Rdram};
use thiserror::Error;

use crate::alloc::{AllocError, ScratchAllocator};

pub use controls::{BillboardControls, SiteControls};
pub use hooks::{BillboardRewriter, CallSite};
pub use rewrite::{BillboardConfig, RewriteEngine, RewriteOutcome, RewriteSettings, RewriteTrace};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Memory image error: {0}")]
    Memory(#[from] MemoryError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid controls file: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Invalid scratch pool: {0}")]
    Pool(#[from] AllocError),
}

/// Check that `mem` covers base RDRAM and the whole scratch pool
pub fn check_image(mem: &Rdram, settings: &RewriteSettings) -> Result<(), PatchError> {
    mem.require(recomp_core::memory::KSEG0_BASE, RDRAM_SIZE_BYTES)?;
    let pool = ScratchAllocator::new(settings.pool_base, settings.pool_slots, settings.slot_bytes);
    mem.require(settings.pool_base, pool.validate()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_image() {
        let settings = RewriteSettings::default();
        assert!(check_image(&Rdram::extended(), &settings).is_ok());

        let err = check_image(&Rdram::new(RDRAM_SIZE_BYTES as usize), &settings).unwrap_err();
        assert!(matches!(
            err,
            PatchError::Memory(MemoryError::ImageTooSmall { .. })
        ));
    }

    #[test]
    fn test_check_image_rejects_overflowing_pool() {
        let settings = RewriteSettings {
            slot_bytes: 0x10_0000,
            ..RewriteSettings::default()
        };
        let err = check_image(&Rdram::extended(), &settings).unwrap_err();
        assert!(matches!(
            err,
            PatchError::Pool(AllocError::Overflow {
                slots: 8192,
                slot_bytes: 0x10_0000,
                ..
            })
        ));
    }
}
