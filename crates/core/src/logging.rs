//! Centralized logging for patch code.
//!
//! Patches run inside the game's graphics-generation pass, many times per
//! frame, so logging must cost nothing when disabled and must never flood the
//! console when enabled.
//!
//! # Architecture
//!
//! - **LogConfig**: global configuration held in atomics
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: one channel per patch concern (rewrite, allocator, cache, ...)
//! - **log()**: level-filtered, rate-limited output with lazy message construction
//! - **report()**: rate-limited output for reports whose owner already decided to print
//!
//! File output, when configured, is handed to a background writer thread so
//! the render thread never blocks on disk I/O.
//!
//! # Usage
//!
//! ```rust
//! use recomp_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Alloc, LogLevel::Debug, || {
//!     format!("pool exhausted at slot {}", 8192)
//! });
//! ```

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, SendError, Sender};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const CATEGORY_COUNT: usize = 6;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for the different patch concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Billboard rewrite gates and emission
    Rewrite,
    /// Scratch pool allocation and frame resets
    Alloc,
    /// Interpolation identity cache
    Cache,
    /// Display list cursor handling
    DisplayList,
    /// Per-call-site hooks and small memory patches
    Hooks,
    /// Periodic statistics reports
    Stats,
}

impl LogCategory {
    pub const ALL: [LogCategory; CATEGORY_COUNT] = [
        LogCategory::Rewrite,
        LogCategory::Alloc,
        LogCategory::Cache,
        LogCategory::DisplayList,
        LogCategory::Hooks,
        LogCategory::Stats,
    ];

    fn index(self) -> usize {
        match self {
            LogCategory::Rewrite => 0,
            LogCategory::Alloc => 1,
            LogCategory::Cache => 2,
            LogCategory::DisplayList => 3,
            LogCategory::Hooks => 4,
            LogCategory::Stats => 5,
        }
    }

    /// Parse a category name as used on the command line
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rewrite" => Some(LogCategory::Rewrite),
            "alloc" | "allocator" => Some(LogCategory::Alloc),
            "cache" => Some(LogCategory::Cache),
            "dl" | "displaylist" | "display_list" => Some(LogCategory::DisplayList),
            "hooks" | "hook" => Some(LogCategory::Hooks),
            "stats" => Some(LogCategory::Stats),
            _ => None,
        }
    }
}

const RATE_WINDOW: Duration = Duration::from_secs(1);
const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// A panicking writer must not take logging down with it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recent output of one category
#[derive(Default)]
struct Window {
    stamps: VecDeque<Instant>,
    dropped: usize,
    last_drop_report: Option<Instant>,
}

impl Window {
    fn expire(&mut self, now: Instant) {
        while self
            .stamps
            .front()
            .is_some_and(|&t| now.duration_since(t) > RATE_WINDOW)
        {
            self.stamps.pop_front();
        }
    }

    /// Hand out the pending drop count when a summary is due
    fn take_dropped(&mut self, now: Instant, force: bool) -> Option<usize> {
        let due = force
            || self
                .last_drop_report
                .map_or(true, |last| now.duration_since(last) >= DROP_REPORT_INTERVAL);
        if self.dropped == 0 || !due {
            return None;
        }
        self.last_drop_report = Some(now);
        Some(std::mem::take(&mut self.dropped))
    }
}

/// Rate limiter verdict for one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Admission {
    allowed: bool,
    /// Lines dropped since the last summary, when one should be written now
    dropped: Option<usize>,
}

/// Sliding one-second window per category
struct RateLimiter {
    per_second: AtomicUsize,
    windows: Mutex<[Window; CATEGORY_COUNT]>,
}

impl RateLimiter {
    fn new(per_second: usize) -> Self {
        Self {
            per_second: AtomicUsize::new(per_second),
            windows: Mutex::new(Default::default()),
        }
    }

    fn admit(&self, category: LogCategory) -> Admission {
        let now = Instant::now();
        let mut windows = lock(&self.windows);
        let window = &mut windows[category.index()];
        window.expire(now);

        if window.stamps.len() < self.per_second.load(Ordering::Relaxed) {
            window.stamps.push_back(now);
            return Admission {
                allowed: true,
                dropped: window.take_dropped(now, true),
            };
        }
        window.dropped += 1;
        Admission {
            allowed: false,
            dropped: window.take_dropped(now, false),
        }
    }
}

/// Where lines go
enum Sink {
    Stderr,
    /// Background writer thread owning the file
    File(Sender<String>),
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    /// Per-category override; Off defers to the global level
    category_levels: [AtomicU8; CATEGORY_COUNT],
    sink: Mutex<Sink>,
    limiter: RateLimiter,
}

impl LogConfig {
    /// Everything off, 60 lines per second per category
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            sink: Mutex::new(Sink::Stderr),
            limiter: RateLimiter::new(60),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let limit = match self.level(category) {
            LogLevel::Off => self.global_level(),
            category_level => category_level,
        };
        level <= limit
    }

    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    pub fn set_rate_limit(&self, per_second: usize) {
        self.limiter.per_second.store(per_second, Ordering::Relaxed);
    }

    pub fn rate_limit(&self) -> usize {
        self.limiter.per_second.load(Ordering::Relaxed)
    }

    /// Append output to `path` from a background thread
    ///
    /// The render thread never waits on disk. Replaces any previous file.
    pub fn set_log_file(&self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();
        thread::Builder::new()
            .name("patch-log-writer".to_string())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                for line in receiver {
                    let _ = writeln!(out, "{}", line);
                    let _ = out.flush();
                }
            })?;
        *lock(&self.sink) = Sink::File(sender);
        Ok(())
    }

    /// Back to stderr; the writer thread drains and exits
    pub fn clear_log_file(&self) {
        *lock(&self.sink) = Sink::Stderr;
    }

    fn write_line(&self, line: String) {
        let line = match &*lock(&self.sink) {
            Sink::File(sender) => match sender.send(line) {
                Ok(()) => return,
                Err(SendError(line)) => line,
            },
            Sink::Stderr => line,
        };
        eprintln!("{}", line);
    }

    fn emit<F>(&self, category: LogCategory, message_fn: F)
    where
        F: FnOnce() -> String,
    {
        let admission = self.limiter.admit(category);
        if let Some(count) = admission.dropped {
            self.write_line(format!(
                "[{:?}] rate limit hit, {} line(s) dropped",
                category, count
            ));
        }
        if admission.allowed {
            self.write_line(message_fn());
        }
    }
}

/// Log a message with the given category and level
///
/// The closure only runs when the category/level is enabled and the rate
/// limiter lets the line through.
///
/// ```rust
/// use recomp_core::logging::{log, LogCategory, LogLevel};
///
/// log(LogCategory::Rewrite, LogLevel::Trace, || {
///     format!("gate failed: {}", "behind_camera")
/// });
/// ```
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        config.emit(category, message_fn);
    }
}

/// Write a line regardless of configured levels
///
/// For output its owner already gated (e.g. a user-facing debug toggle).
/// Still rate limited per category.
pub fn report<F>(category: LogCategory, message_fn: F)
where
    F: FnOnce() -> String,
{
    LogConfig::global().emit(category, message_fn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("3"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("loud"), None);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(LogCategory::from_str("rewrite"), Some(LogCategory::Rewrite));
        assert_eq!(LogCategory::from_str("DL"), Some(LogCategory::DisplayList));
        assert_eq!(LogCategory::from_str("allocator"), Some(LogCategory::Alloc));
        assert_eq!(LogCategory::from_str("gpu"), None);
    }

    #[test]
    fn test_category_indices_are_distinct() {
        let mut seen = [false; CATEGORY_COUNT];
        for category in LogCategory::ALL {
            assert!(!seen[category.index()]);
            seen[category.index()] = true;
        }
    }

    #[test]
    fn test_category_level_overrides_global() {
        let config = LogConfig::new();
        config.set_level(LogCategory::Rewrite, LogLevel::Info);
        assert!(config.should_log(LogCategory::Rewrite, LogLevel::Info));
        assert!(!config.should_log(LogCategory::Rewrite, LogLevel::Debug));
        assert!(!config.should_log(LogCategory::Cache, LogLevel::Error));

        config.set_global_level(LogLevel::Error);
        config.set_level(LogCategory::Alloc, LogLevel::Trace);
        assert!(config.should_log(LogCategory::Alloc, LogLevel::Trace));
        assert!(!config.should_log(LogCategory::Stats, LogLevel::Warn));
        assert!(config.should_log(LogCategory::Stats, LogLevel::Error));
        assert!(!config.should_log(LogCategory::Stats, LogLevel::Off));
    }

    #[test]
    fn test_reset() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        config.set_level(LogCategory::Cache, LogLevel::Debug);
        config.set_rate_limit(5);

        config.reset();

        assert_eq!(config.global_level(), LogLevel::Off);
        assert_eq!(config.level(LogCategory::Cache), LogLevel::Off);
        assert_eq!(config.rate_limit(), 5);
    }

    #[test]
    fn test_rate_limit_is_per_category() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.admit(LogCategory::Stats).allowed);
        }
        assert!(!limiter.admit(LogCategory::Stats).allowed);
        assert!(limiter.admit(LogCategory::Rewrite).allowed);
    }

    #[test]
    fn test_drop_summary_once_window_slides() {
        let limiter = RateLimiter::new(2);
        for _ in 0..2 {
            limiter.admit(LogCategory::Cache);
        }
        // First drop is summarized immediately, later ones accumulate
        assert_eq!(
            limiter.admit(LogCategory::Cache),
            Admission { allowed: false, dropped: Some(1) }
        );
        for _ in 0..4 {
            assert_eq!(
                limiter.admit(LogCategory::Cache),
                Admission { allowed: false, dropped: None }
            );
        }

        std::thread::sleep(Duration::from_millis(1100));

        assert_eq!(
            limiter.admit(LogCategory::Cache),
            Admission { allowed: true, dropped: Some(4) }
        );
    }

    #[test]
    fn test_file_sink_falls_back_after_clear() {
        let config = LogConfig::new();
        let path = std::env::temp_dir().join("recomp_core_log_sink_test.log");
        config.set_log_file(&path).unwrap();
        assert!(matches!(*lock(&config.sink), Sink::File(_)));
        config.write_line("to file".to_string());
        config.clear_log_file();
        assert!(matches!(*lock(&config.sink), Sink::Stderr));
        let _ = std::fs::remove_file(&path);
    }
}
