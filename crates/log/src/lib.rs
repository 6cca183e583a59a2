//! Leveled logging for the ledger crates.
//!
//! Records go to stderr as text or JSON lines. A bounded in-memory ring can
//! capture records for inspection, and individual module targets can be given
//! their own level (e.g. `ccx_chainstate::upgrade=debug`).

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Accepts level names and the numeric 0..=4 levels used by `--log-level`
    /// style settings (0 = error).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" | "0" => Some(Self::Error),
            "warn" | "warning" | "1" => Some(Self::Warn),
            "info" | "2" => Some(Self::Info),
            "debug" | "3" => Some(Self::Debug),
            "trace" | "4" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

static TARGET_OVERRIDES_SET: AtomicBool = AtomicBool::new(false);
static TARGET_OVERRIDES: OnceLock<RwLock<Vec<(String, Level)>>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

pub fn max_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Overrides the level for every target starting with `prefix`. The longest
/// matching prefix wins.
pub fn set_target_level(prefix: &str, level: Level) {
    let overrides = TARGET_OVERRIDES.get_or_init(|| RwLock::new(Vec::new()));
    let Ok(mut guard) = overrides.write() else {
        return;
    };
    match guard.iter_mut().find(|(existing, _)| existing == prefix) {
        Some(entry) => entry.1 = level,
        None => guard.push((prefix.to_string(), level)),
    }
    guard.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    TARGET_OVERRIDES_SET.store(true, Ordering::Relaxed);
}

pub fn clear_target_levels() {
    if let Some(overrides) = TARGET_OVERRIDES.get() {
        if let Ok(mut guard) = overrides.write() {
            guard.clear();
        }
    }
    TARGET_OVERRIDES_SET.store(false, Ordering::Relaxed);
}

/// Parses `target=level` pairs separated by commas, as accepted by the
/// `logtargets` config key.
pub fn parse_target_levels(raw: &str) -> Result<Vec<(String, Level)>, String> {
    let mut out = Vec::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (target, level) = item
            .split_once('=')
            .ok_or_else(|| format!("missing '=' in log target '{item}'"))?;
        let level = Level::parse(level)
            .ok_or_else(|| format!("invalid level '{}' for target '{}'", level.trim(), target))?;
        out.push((target.trim().to_string(), level));
    }
    Ok(out)
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        disable_capture();
        return;
    }
    CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_capture() {
    CAPTURE_ENABLED.store(false, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    let Some(buf) = CAPTURE.get() else {
        return;
    };
    if let Ok(mut guard) = buf.lock() {
        guard.clear();
    }
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(buf) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buf.lock() else {
        return Vec::new();
    };
    let start = guard.len().saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

pub fn enabled(level: Level, target: &str) -> bool {
    if TARGET_OVERRIDES_SET.load(Ordering::Relaxed) {
        if let Some(overrides) = TARGET_OVERRIDES.get() {
            if let Ok(guard) = overrides.read() {
                if let Some((_, target_level)) =
                    guard.iter().find(|(prefix, _)| target.starts_with(prefix.as_str()))
                {
                    return level <= *target_level;
                }
            }
        }
    }
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level, target) {
        return;
    }

    let capture = CAPTURE_ENABLED.load(Ordering::Relaxed);
    let format = match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => Format::Json,
        _ => Format::Text,
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let msg = args.to_string();

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        match format {
            Format::Text => {
                if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                    let _ = write!(out, "{} ", format_timestamp(now));
                }
                let _ = writeln!(out, "{:<5} [{}] {}", level.as_str(), target, msg);
            }
            Format::Json => {
                let record = json!({
                    "ts_ms": ts_ms,
                    "level": level.as_str(),
                    "target": target,
                    "file": file,
                    "line": line,
                    "msg": msg,
                });
                let _ = writeln!(out, "{record}");
            }
        }
    }

    if capture {
        push_capture(CapturedLog {
            ts_ms,
            level,
            target,
            file,
            line,
            msg,
        });
    }
}

fn push_capture(record: CapturedLog) {
    let Some(buf) = CAPTURE.get() else {
        return;
    };
    let Ok(mut guard) = buf.lock() else {
        return;
    };
    let cap = CAPTURE_CAPACITY.load(Ordering::Relaxed);
    if cap == 0 {
        return;
    }
    guard.push_back(record);
    while guard.len() > cap {
        let _ = guard.pop_front();
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level, module_path!()) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

fn format_timestamp(since_epoch: Duration) -> String {
    const SECS_PER_DAY: u64 = 86_400;
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days((secs / SECS_PER_DAY) as i64);
    let secs_of_day = secs % SECS_PER_DAY;
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}.{:03}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60,
        since_epoch.subsec_millis()
    )
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i32 + era as i32 * 400 + i32::from(month <= 2);
    (year, month, day)
}
