//! Fixed-point and 4x4 matrix helpers
//!
//! Matrices are 16 `f32`s. [`orthographic`] produces the OpenGL column
//! convention (translation in elements 12..15), which is what the renderer's
//! float-matrix commands expect. Game-side view-projection matrices read from
//! RDRAM are row-major and are indexed with [`row_major`].

/// 4x4 matrix stored as 16 floats
pub type Mat4 = [f32; 16];

/// Convert a signed 16.16 fixed-point value to float
#[inline]
pub fn fixed16_16_to_float(raw: i32) -> f32 {
    raw as f32 / 65536.0
}

pub fn identity() -> Mat4 {
    [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ]
}

/// Build an orthographic projection
///
/// Maps `(left, bottom, -near)` to `(-1, -1, -1)` and `(right, top, -far)` to
/// `(1, 1, 1)`. Degenerate ranges yield `inf`/`NaN` elements; callers reject
/// those inputs before getting here.
pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let mut m = identity();

    let inv_rl = 1.0 / (right - left);
    let inv_tb = 1.0 / (top - bottom);
    let inv_fn = 1.0 / (far - near);

    m[0] = 2.0 * inv_rl;
    m[5] = 2.0 * inv_tb;
    m[10] = -2.0 * inv_fn;
    m[12] = -(right + left) * inv_rl;
    m[13] = -(top + bottom) * inv_tb;
    m[14] = -(far + near) * inv_fn;
    m
}

/// Element at `(row, col)` of a row-major matrix
#[inline]
pub fn row_major(m: &Mat4, row: usize, col: usize) -> f32 {
    m[row * 4 + col]
}
