//! Call-site hooks
//!
//! Each hook is invoked by the recompiled game at the start of one sprite
//! draw function. It supplies that site's tuning to the rewrite engine and,
//! when the quad was emitted, zeroes the original draw's scale arguments so
//! the game skips its own texture rectangle.
//!
//! | Site   | Draws        | Tuning                                         |
//! |--------|--------------|------------------------------------------------|
//! | 6C5E44 | stars        | scale clamp [4, 15], fixed bottom edge         |
//! | 73F17C | energy items | defaults                                       |
//! | 73F800 | flowers      | unscaled hash, 2^18 grid, tall-plant geometry  |
//! | 740094 | collectibles | dual scale, unscaled hash                      |
//! | 740820 | trees        | dual scale, screen wrap, offset clamp          |
//! | 6FA3A4 | FOV masks    | observed only                                  |

use recomp_core::logging::{log, report, LogCategory, LogLevel};
use recomp_core::{ConsoleMemory, RecompContext};
use serde::Serialize;

use crate::controls::{BillboardControls, SiteControls};
use crate::rewrite::{
    stack, BillboardConfig, RewriteEngine, RewriteOutcome, RewriteSettings, RewriteTrace,
};
use crate::stats::{FlushContext, SiteStats, StatsSnapshot};

/// Energy-item trace cadence when nothing fails
const TRACE_EVERY_N_CALLS: u64 = 64;

/// Value written over the FOV-mask size argument to hide it
const FOV_MASK_HIDDEN_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallSite {
    Stars,
    EnergyItems,
    Flowers,
    Collectibles,
    Trees,
    FovMasks,
}

impl CallSite {
    pub const ALL: [CallSite; 6] = [
        CallSite::Stars,
        CallSite::EnergyItems,
        CallSite::Flowers,
        CallSite::Collectibles,
        CallSite::Trees,
        CallSite::FovMasks,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            CallSite::Stars => "6C5E44(stars)",
            CallSite::EnergyItems => "73F17C(energy-items)",
            CallSite::Flowers => "73F800(flowers)",
            CallSite::Collectibles => "740094(collectibles)",
            CallSite::Trees => "740820(trees)",
            CallSite::FovMasks => "6FA3A4(fov-masks)",
        }
    }

    /// Stack arguments zeroed to cancel the original draw
    fn scale_slots(self) -> &'static [u32] {
        match self {
            CallSite::Collectibles | CallSite::Trees => &[stack::SCALE, stack::SCALE_Y],
            _ => &[stack::SCALE],
        }
    }

    /// Tuning for this site, read from the draw's own arguments where needed
    pub fn config<M: ConsoleMemory + ?Sized>(self, mem: &M, ctx: &RecompContext) -> BillboardConfig {
        let base = BillboardConfig::default();
        match self {
            CallSite::Stars => BillboardConfig {
                hash_salt: 0x6C5E_4400,
                scale_clamp_min: 4.0,
                scale_clamp_max: 15.0,
                y_bottom_fixed: 2.0,
                ..base
            },
            CallSite::EnergyItems | CallSite::FovMasks => base,
            CallSite::Flowers => {
                // Pulsing scale and position must not change the identity
                let mut cfg = BillboardConfig {
                    hash_salt: 0x73F8_0000,
                    hash_includes_scale: false,
                    hash_coord_shift: 18,
                    ..base
                };
                let raw_half_h = mem.read_u32(ctx.stack_slot(stack::HALF_H)) as i16;
                if raw_half_h > 32 {
                    cfg.geom_half_h = raw_half_h - 32;
                    cfg.y_top_mul = 3.0;
                }
                cfg
            }
            CallSite::Collectibles => BillboardConfig {
                hash_salt: 0x7400_9400,
                dual_scale: true,
                hash_includes_scale: false,
                ..base
            },
            CallSite::Trees => BillboardConfig {
                hash_salt: 0x7408_2000,
                dual_scale: true,
                screen_wrap: mem.read_u32(ctx.stack_slot(stack::WRAP)) as u8 != 0,
                offset_clamp: mem.read_u32(ctx.stack_slot(stack::OFFSET_CLAMP)) as i16,
                ..base
            },
        }
    }
}

/// Owns every piece of billboard state: engine, per-site stats, controls
pub struct BillboardRewriter {
    engine: RewriteEngine,
    stats: [SiteStats; 6],
    controls: BillboardControls,
    energy_trace_calls: u64,
}

impl BillboardRewriter {
    pub fn new(settings: RewriteSettings, controls: BillboardControls) -> Self {
        Self {
            engine: RewriteEngine::new(settings),
            stats: CallSite::ALL.map(|site| SiteStats::new(site.label())),
            controls,
            energy_trace_calls: 0,
        }
    }

    pub fn engine(&self) -> &RewriteEngine {
        &self.engine
    }

    pub fn controls(&self) -> &BillboardControls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut BillboardControls {
        &mut self.controls
    }

    pub fn stats(&self, site: CallSite) -> &SiteStats {
        &self.stats[site.index()]
    }

    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        self.stats.iter().map(SiteStats::snapshot).collect()
    }

    fn site_controls(&self, site: CallSite) -> SiteControls {
        match site {
            CallSite::Stars => self.controls.stars,
            CallSite::EnergyItems => self.controls.energy_items,
            CallSite::Flowers => self.controls.flowers,
            CallSite::Collectibles => self.controls.collectibles,
            CallSite::Trees => self.controls.trees,
            CallSite::FovMasks => SiteControls {
                disable_render: self.controls.disable_fov_masks,
                rewrite: false,
                suppress_original: false,
            },
        }
    }

    fn flush_context(&self) -> FlushContext {
        let alloc = self.engine.allocator();
        FlushContext {
            frame: self.engine.frame_count(),
            interval_frames: self.engine.settings().stats_interval_frames,
            debug: self.controls.debug_logging,
            pool_used: alloc.used_slots(),
            pool_capacity: alloc.capacity_slots(),
        }
    }

    /// Shared hook flow; None when the site is disabled or not rewriting
    fn run_site<M: ConsoleMemory + ?Sized>(
        &mut self,
        site: CallSite,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<(RewriteOutcome, RewriteTrace)> {
        let controls = self.site_controls(site);
        if controls.disable_render {
            zero_slots(mem, ctx, site.scale_slots());
            return None;
        }
        if !controls.rewrite {
            let flush = self.flush_context();
            self.stats[site.index()].record_skip(&flush);
            return None;
        }

        let cfg = site.config(mem, ctx);
        let (outcome, trace) = self.engine.rewrite(mem, ctx, &cfg);
        let suppressed = outcome.is_emitted() && controls.suppress_original;

        let flush = self.flush_context();
        self.stats[site.index()].record(outcome, suppressed, Some(&trace), &flush);

        if suppressed {
            zero_slots(mem, ctx, site.scale_slots());
        }
        log(LogCategory::Hooks, LogLevel::Trace, || {
            format!("{} -> {} suppress={}", site.label(), outcome, suppressed)
        });
        Some((outcome, trace))
    }

    /// 6C5E44: twinkling stars
    pub fn hook_stars<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<RewriteOutcome> {
        self.run_site(CallSite::Stars, mem, ctx).map(|(o, _)| o)
    }

    /// 73F17C: energy items, with a verbose trace when debug logging is on
    pub fn hook_energy_items<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<RewriteOutcome> {
        let (outcome, trace) = self.run_site(CallSite::EnergyItems, mem, ctx)?;
        if self.controls.debug_logging {
            self.energy_trace_calls += 1;
            if !outcome.is_emitted() || self.energy_trace_calls % TRACE_EVERY_N_CALLS == 0 {
                let n = self.energy_trace_calls;
                let suppress = self.controls.energy_items.suppress_original;
                report(LogCategory::Rewrite, || format_energy_trace(n, outcome, &trace, suppress));
            }
        }
        Some(outcome)
    }

    /// 73F800: flowers and power cells
    pub fn hook_flowers<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<RewriteOutcome> {
        self.run_site(CallSite::Flowers, mem, ctx).map(|(o, _)| o)
    }

    /// 740094: collectibles with independent X/Y scale
    pub fn hook_collectibles<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<RewriteOutcome> {
        self.run_site(CallSite::Collectibles, mem, ctx).map(|(o, _)| o)
    }

    /// 740820: tree tops, optionally wrapping across the screen
    pub fn hook_trees<M: ConsoleMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<RewriteOutcome> {
        self.run_site(CallSite::Trees, mem, ctx).map(|(o, _)| o)
    }

    /// 6FA3A4: count FOV-mask draws; hide them when disabled
    pub fn hook_fov_masks<M: ConsoleMemory + ?Sized>(&mut self, mem: &mut M, ctx: &RecompContext) {
        let flush = self.flush_context();
        let stats = &mut self.stats[CallSite::FovMasks.index()];
        stats.record_call(&flush);
        if !self.controls.disable_fov_masks {
            return;
        }
        stats.record_suppress();
        mem.write_u32(ctx.stack_slot(stack::HALF_W), FOV_MASK_HIDDEN_SIZE);
    }

    /// Dispatch by site
    pub fn hook<M: ConsoleMemory + ?Sized>(
        &mut self,
        site: CallSite,
        mem: &mut M,
        ctx: &RecompContext,
    ) -> Option<RewriteOutcome> {
        match site {
            CallSite::Stars => self.hook_stars(mem, ctx),
            CallSite::EnergyItems => self.hook_energy_items(mem, ctx),
            CallSite::Flowers => self.hook_flowers(mem, ctx),
            CallSite::Collectibles => self.hook_collectibles(mem, ctx),
            CallSite::Trees => self.hook_trees(mem, ctx),
            CallSite::FovMasks => {
                self.hook_fov_masks(mem, ctx);
                None
            }
        }
    }
}

impl Default for BillboardRewriter {
    fn default() -> Self {
        Self::new(RewriteSettings::default(), BillboardControls::default())
    }
}

fn zero_slots<M: ConsoleMemory + ?Sized>(mem: &mut M, ctx: &RecompContext, slots: &[u32]) {
    for &offset in slots {
        mem.write_u32(ctx.stack_slot(offset), 0);
    }
}

fn format_energy_trace(n: u64, outcome: RewriteOutcome, t: &RewriteTrace, suppress: bool) -> String {
    format!(
        "[73F17C-ORTHO] n={} {} scale={} hw={} hh={} scr={}x{} z={:.3} cw={:.3} s={:.3} \
         rect=({:.1},{:.1})-({:.1},{:.1}) grp={:08X} suppress={}",
        n,
        outcome,
        t.scale,
        t.half_w,
        t.half_h,
        t.screen_w,
        t.screen_h,
        t.cam_z,
        t.clip_w,
        t.sprite_scale,
        t.xl,
        t.yl,
        t.xh,
        t.yh,
        t.group_id,
        suppress as u8
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use recomp_core::context::reg;
    use recomp_core::Rdram;

    const SP: u32 = 0x8030_0000;

    fn sprite_ctx(mem: &mut Rdram, half_w: u32, half_h: u32, scale: u32) -> RecompContext {
        let mut ctx = RecompContext::new();
        ctx.gpr[reg::SP] = SP;
        mem.write_u32(SP + stack::HALF_W, half_w);
        mem.write_u32(SP + stack::HALF_H, half_h);
        mem.write_u32(SP + stack::SCALE, scale);
        mem.write_u32(SP + stack::SCALE_Y, scale);
        ctx
    }

    #[test]
    fn test_site_configs() {
        let mut mem = Rdram::new(0x0040_0000);
        let ctx = sprite_ctx(&mut mem, 16, 48, 8);
        mem.write_u32(SP + stack::WRAP, 0x0000_0101);
        mem.write_u32(SP + stack::OFFSET_CLAMP, 0xFFFF_0028);

        let stars = CallSite::Stars.config(&mem, &ctx);
        assert_eq!((stars.scale_clamp_min, stars.scale_clamp_max), (4.0, 15.0));
        assert_eq!(stars.y_bottom_fixed, 2.0);

        let flowers = CallSite::Flowers.config(&mem, &ctx);
        assert_eq!(flowers.geom_half_h, 16);
        assert_eq!(flowers.y_top_mul, 3.0);
        assert_eq!(flowers.hash_coord_shift, 18);
        assert!(!flowers.hash_includes_scale);

        let trees = CallSite::Trees.config(&mem, &ctx);
        assert!(trees.dual_scale);
        assert!(trees.screen_wrap);
        assert_eq!(trees.offset_clamp, 0x28);

        assert_eq!(CallSite::EnergyItems.config(&mem, &ctx), BillboardConfig::default());
    }

    #[test]
    fn test_short_flowers_keep_geometry() {
        let mut mem = Rdram::new(0x0040_0000);
        let ctx = sprite_ctx(&mut mem, 16, 32, 8);
        let flowers = CallSite::Flowers.config(&mem, &ctx);
        assert_eq!(flowers.geom_half_h, 0);
        assert_eq!(flowers.y_top_mul, 1.0);
    }

    #[test]
    fn test_disabled_site_zeroes_scales() {
        let mut mem = Rdram::new(0x0040_0000);
        let ctx = sprite_ctx(&mut mem, 16, 16, 8);
        let mut rewriter = BillboardRewriter::default();
        rewriter.controls_mut().trees.disable_render = true;

        assert_eq!(rewriter.hook_trees(&mut mem, &ctx), None);
        assert_eq!(mem.read_u32(SP + stack::SCALE), 0);
        assert_eq!(mem.read_u32(SP + stack::SCALE_Y), 0);
        assert_eq!(rewriter.stats(CallSite::Trees).totals().calls, 0);
    }

    #[test]
    fn test_rewrite_off_records_skip() {
        let mut mem = Rdram::new(0x0040_0000);
        let ctx = sprite_ctx(&mut mem, 16, 16, 8);
        let mut rewriter = BillboardRewriter::default();
        rewriter.controls_mut().stars.rewrite = false;

        assert_eq!(rewriter.hook_stars(&mut mem, &ctx), None);
        assert_eq!(mem.read_u32(SP + stack::SCALE), 8);
        assert_eq!(rewriter.stats(CallSite::Stars).totals().skips, 1);
    }

    #[test]
    fn test_failed_rewrite_keeps_original() {
        // No screen size in memory: the rewrite fails, the original draw stays
        let mut mem = Rdram::new(0x0040_0000);
        let ctx = sprite_ctx(&mut mem, 16, 16, 8);
        let mut rewriter = BillboardRewriter::new(RewriteSettings::default(), BillboardControls::release());

        assert_eq!(
            rewriter.hook_collectibles(&mut mem, &ctx),
            Some(RewriteOutcome::InvalidScreen)
        );
        assert_eq!(mem.read_u32(SP + stack::SCALE), 8);
        assert_eq!(mem.read_u32(SP + stack::SCALE_Y), 8);
        let totals = rewriter.stats(CallSite::Collectibles).totals();
        assert_eq!(totals.calls, 1);
        assert_eq!(totals.failures[RewriteOutcome::InvalidScreen.index()], 1);
    }

    #[test]
    fn test_fov_masks() {
        let mut mem = Rdram::new(0x0040_0000);
        let ctx = sprite_ctx(&mut mem, 16, 16, 8);
        let mut rewriter = BillboardRewriter::default();

        rewriter.hook_fov_masks(&mut mem, &ctx);
        assert_eq!(mem.read_u32(SP + stack::HALF_W), 16);

        rewriter.controls_mut().disable_fov_masks = true;
        assert_eq!(rewriter.hook(CallSite::FovMasks, &mut mem, &ctx), None);
        assert_eq!(mem.read_u32(SP + stack::HALF_W), 100);

        let totals = rewriter.stats(CallSite::FovMasks).totals();
        assert_eq!(totals.calls, 2);
        assert_eq!(totals.suppresses, 1);
    }

    #[test]
    fn test_energy_trace_format() {
        let trace = RewriteTrace {
            scale: 8,
            half_w: 32,
            half_h: 32,
            screen_w: 320,
            screen_h: 240,
            cam_z: -10.0,
            clip_w: 0.1,
            sprite_scale: 14.08,
            xl: 636.48,
            yl: 476.48,
            xh: 643.52,
            yh: 483.52,
            group_id: 0xABCD_0123,
            ..Default::default()
        };
        assert_eq!(
            format_energy_trace(64, RewriteOutcome::Emitted, &trace, true),
            "[73F17C-ORTHO] n=64 emitted scale=8 hw=32 hh=32 scr=320x240 z=-10.000 cw=0.100 \
             s=14.080 rect=(636.5,476.5)-(643.5,483.5) grp=ABCD0123 suppress=1"
        );
    }
}
