//! Per-call-site rewrite counters
//!
//! Counters accumulate over an interval of frames. When the interval elapses
//! they are reported (only if billboard debug logging is on) and reset, so
//! turning logging on mid-session shows a clean interval. Running totals are
//! kept separately for snapshots.

use std::collections::BTreeMap;

use recomp_core::logging::{report, LogCategory};
use serde::Serialize;

use crate::rewrite::{RewriteOutcome, RewriteTrace};

/// Everything a flush needs to know about the surrounding engine
#[derive(Debug, Clone, Copy)]
pub struct FlushContext {
    pub frame: u64,
    pub interval_frames: u64,
    pub debug: bool,
    pub pool_used: u32,
    pub pool_capacity: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub calls: u64,
    pub emits: u64,
    pub suppresses: u64,
    pub skips: u64,
    #[serde(skip)]
    pub failures: [u64; RewriteOutcome::COUNT],
}

impl Counters {
    pub fn total_failures(&self) -> u64 {
        self.failures.iter().sum()
    }

    fn record(&mut self, outcome: RewriteOutcome, suppressed: bool) {
        self.calls += 1;
        if outcome.is_emitted() {
            self.emits += 1;
            if suppressed {
                self.suppresses += 1;
            }
        } else {
            self.failures[outcome.index()] += 1;
        }
    }
}

/// Trace values kept from the first emitted draw of an interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceSample {
    pub world: [i32; 3],
    pub scale: i32,
    pub cam_z: f32,
    pub group_id: u32,
}

impl From<&RewriteTrace> for TraceSample {
    fn from(t: &RewriteTrace) -> Self {
        Self {
            world: [t.world_x, t.world_y, t.world_z],
            scale: t.scale,
            cam_z: t.cam_z,
            group_id: t.group_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteStats {
    label: &'static str,
    interval: Counters,
    totals: Counters,
    sample: Option<TraceSample>,
    /// Most recent emitted draw over the whole run; survives flushes
    latest_sample: Option<TraceSample>,
    last_log_frame: u64,
    reports: u64,
}

impl SiteStats {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            interval: Counters::default(),
            totals: Counters::default(),
            sample: None,
            latest_sample: None,
            last_log_frame: 0,
            reports: 0,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn interval(&self) -> &Counters {
        &self.interval
    }

    pub fn totals(&self) -> &Counters {
        &self.totals
    }

    pub fn sample(&self) -> Option<&TraceSample> {
        self.sample.as_ref()
    }

    /// Number of report lines written so far
    pub fn reports(&self) -> u64 {
        self.reports
    }

    pub fn record(
        &mut self,
        outcome: RewriteOutcome,
        suppressed: bool,
        trace: Option<&RewriteTrace>,
        flush: &FlushContext,
    ) {
        self.interval.record(outcome, suppressed);
        self.totals.record(outcome, suppressed);
        if outcome.is_emitted() {
            if let Some(t) = trace {
                let sample = TraceSample::from(t);
                self.sample.get_or_insert(sample);
                self.latest_sample = Some(sample);
            }
        }
        self.maybe_flush(flush);
    }

    pub fn record_skip(&mut self, flush: &FlushContext) {
        self.interval.skips += 1;
        self.totals.skips += 1;
        self.maybe_flush(flush);
    }

    /// Count a call without an outcome (observation-only sites)
    pub fn record_call(&mut self, flush: &FlushContext) {
        self.interval.calls += 1;
        self.totals.calls += 1;
        self.maybe_flush(flush);
    }

    /// Count a suppression without an outcome
    pub fn record_suppress(&mut self) {
        self.interval.suppresses += 1;
        self.totals.suppresses += 1;
    }

    /// Report and reset the interval if it has elapsed
    ///
    /// Returns the report line when one was written.
    pub fn maybe_flush(&mut self, flush: &FlushContext) -> Option<String> {
        if flush.frame.saturating_sub(self.last_log_frame) < flush.interval_frames {
            return None;
        }
        self.last_log_frame = flush.frame;
        if self.interval.calls == 0 && self.interval.skips == 0 {
            return None;
        }

        let line = if flush.debug {
            let line = self.format_report(flush.pool_used, flush.pool_capacity);
            report(LogCategory::Stats, || line.clone());
            self.reports += 1;
            Some(line)
        } else {
            None
        };

        self.interval = Counters::default();
        self.sample = None;
        line
    }

    pub fn format_report(&self, pool_used: u32, pool_capacity: u32) -> String {
        let c = &self.interval;
        let fails = c.total_failures();
        let mut line = format!(
            "[BILLBOARD {}] calls={} emit={} suppress={} skip={} fail={}",
            self.label, c.calls, c.emits, c.suppresses, c.skips, fails
        );
        if fails > 0 {
            let reasons: Vec<String> = RewriteOutcome::ALL
                .iter()
                .filter(|o| c.failures[o.index()] > 0)
                .map(|o| format!("{}={}", o.name(), c.failures[o.index()]))
                .collect();
            line.push_str(&format!(" ({})", reasons.join(",")));
        }
        if let Some(s) = &self.sample {
            line.push_str(&format!(
                " [sample: xyz=({},{},{}) s={} z={:.2} grp={:08X}]",
                s.world[0], s.world[1], s.world[2], s.scale, s.cam_z, s.group_id
            ));
        }
        line.push_str(&format!(" pool={}/{}", pool_used, pool_capacity));
        line
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            label: self.label,
            totals: self.totals,
            failures: failure_map(&self.totals),
            sample: self.latest_sample,
        }
    }
}

fn failure_map(c: &Counters) -> BTreeMap<&'static str, u64> {
    RewriteOutcome::ALL
        .iter()
        .filter(|o| c.failures[o.index()] > 0)
        .map(|o| (o.name(), c.failures[o.index()]))
        .collect()
}

/// Serializable view of one site's running totals
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub label: &'static str,
    #[serde(flatten)]
    pub totals: Counters,
    pub failures: BTreeMap<&'static str, u64>,
    /// Latest emitted draw, not reset with the interval
    pub sample: Option<TraceSample>,
}
