//! VI scale guard
//!
//! The game calls `osViSetXScale`/`osViSetYScale` with values other than 1.0
//! on some screens. The video backend only supports unit scale, so those
//! calls are dropped with a one-time warning per axis.

use recomp_core::logging::{log, LogCategory, LogLevel};
use recomp_core::RecompContext;

const SCALE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViAxis {
    X,
    Y,
}

#[derive(Debug, Default)]
pub struct ViScaleGuard {
    warned_x: bool,
    warned_y: bool,
}

impl ViScaleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scale to forward to the video backend, or None to drop the call
    ///
    /// The requested scale is the first float argument (`f12`).
    pub fn filter(&mut self, axis: ViAxis, ctx: &RecompContext) -> Option<f32> {
        let scale = ctx.f12;
        if (scale - 1.0).abs() <= SCALE_EPSILON {
            return Some(scale);
        }

        let warned = match axis {
            ViAxis::X => &mut self.warned_x,
            ViAxis::Y => &mut self.warned_y,
        };
        if !*warned {
            *warned = true;
            log(LogCategory::Hooks, LogLevel::Warn, || {
                format!("ignoring osViSet{:?}Scale({})", axis, scale)
            });
        }
        None
    }

    pub fn warned(&self, axis: ViAxis) -> bool {
        match axis {
            ViAxis::X => self.warned_x,
            ViAxis::Y => self.warned_y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(scale: f32) -> RecompContext {
        RecompContext {
            f12: scale,
            ..RecompContext::new()
        }
    }

    #[test]
    fn test_unit_scale_passes() {
        let mut guard = ViScaleGuard::new();
        assert_eq!(guard.filter(ViAxis::X, &ctx_with(1.0)), Some(1.0));
        assert_eq!(guard.filter(ViAxis::Y, &ctx_with(1.0 + 5e-7)), Some(1.0 + 5e-7));
        assert!(!guard.warned(ViAxis::X));
    }

    #[test]
    fn test_other_scales_dropped_and_warned_per_axis() {
        let mut guard = ViScaleGuard::new();
        assert_eq!(guard.filter(ViAxis::X, &ctx_with(0.5)), None);
        assert!(guard.warned(ViAxis::X));
        assert!(!guard.warned(ViAxis::Y));
        assert_eq!(guard.filter(ViAxis::X, &ctx_with(2.0)), None);
        assert_eq!(guard.filter(ViAxis::Y, &ctx_with(0.0)), None);
        assert!(guard.warned(ViAxis::Y));
    }
}
