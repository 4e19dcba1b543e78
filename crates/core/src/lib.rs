//! Core primitives shared by recompiled-game patches.
//!
//! - [`memory`]: typed, bounds-checked access to the console memory image
//! - [`context`]: register state handed to hooks by recompiled code
//! - [`graphics`]: fixed-point and matrix math
//! - [`logging`]: centralized, rate-limited logging

pub mod context;
pub mod graphics;
pub mod logging;
pub mod memory;

pub use context::RecompContext;
pub use memory::{ConsoleMemory, MemoryError, Rdram};
