//! Graphics math shared by patches
//!
//! Kept separate from any one patch so the same conventions (16.16 world
//! coordinates, row-major game matrices, column-convention renderer matrices)
//! are used everywhere.

pub mod matrix;

pub use matrix::{fixed16_16_to_float, identity, orthographic, row_major, Mat4};
