//! Time utilities for homegate
//!
//! Everything time-dependent in the policy engine reads time through the
//! [`Clock`] trait so rollover and expiry can be driven deterministically in
//! tests with [`ManualClock`].
//!
//! # Mock Time for Development
//!
//! In debug builds, the `HOMEGATE_MOCK_TIME` environment variable shifts the
//! [`SystemClock`] to a chosen starting point. Mock time keeps advancing at the
//! real rate, which makes it handy for watching a day or month rollover.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-01-31 23:58:00`)

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "HOMEGATE_MOCK_TIME";

/// Format accepted by `HOMEGATE_MOCK_TIME`
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // Wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            match parse_mock_time(&raw) {
                Some(mock_dt) => {
                    let offset = mock_dt.signed_duration_since(chrono::Local::now());
                    tracing::info!(
                        mock_time = %raw,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                None => {
                    tracing::warn!(
                        mock_time = %raw,
                        expected_format = MOCK_TIME_FORMAT,
                        "Invalid mock time, using system time"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Parse a `HOMEGATE_MOCK_TIME` value into a local timestamp
pub fn parse_mock_time(value: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value, MOCK_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current local time, respecting mock time in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Source of wall-clock time for the policy engine.
///
/// "Today" and "this month" are always derived in local time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current local wall-clock time
    fn now(&self) -> DateTime<Local>;

    /// Current calendar day
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Current calendar month
    fn current_month(&self) -> MonthKey {
        MonthKey::from_date(self.today())
    }
}

/// Production clock backed by [`now()`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        now()
    }
}

/// Hand-driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Start at a local date and time; panics on nonexistent local times
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        let start = Local
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .expect("unambiguous local time");
        Self::new(start)
    }

    pub fn set(&self, to: DateTime<Local>) {
        *self.lock() = to;
    }

    /// Move the clock by a signed amount (negative values simulate rollback)
    pub fn advance(&self, by: chrono::Duration) {
        let mut current = self.lock();
        *current += by;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(chrono::Duration::minutes(minutes));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Local>> {
        // A poisoned clock only means a test panicked mid-update; the value is still usable
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.lock()
    }
}

/// Whole minutes from `start` to `end`, floored and clamped at zero.
///
/// Returns `(minutes, skewed)` where `skewed` is true when `end` precedes
/// `start`, i.e. the clock moved backward.
pub fn whole_minutes_between(start: DateTime<Local>, end: DateTime<Local>) -> (u32, bool) {
    let elapsed = end.signed_duration_since(start);
    if elapsed < chrono::Duration::zero() {
        return (0, true);
    }
    (u32::try_from(elapsed.num_minutes()).unwrap_or(u32::MAX), false)
}

/// Calendar month identifier, displayed and persisted as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("Expected YYYY-MM, got '{}'", s))?;
        let year: i32 = year.parse().map_err(|_| format!("Invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month in '{}'", s))?;
        Self::new(year, month).ok_or_else(|| format!("Month out of range in '{}'", s))
    }
}

impl TryFrom<String> for MonthKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

/// Format a calendar day as `YYYY-MM-DD`
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Format a DateTime for display with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Human-readable minutes, e.g. `1h 5m`
pub fn format_minutes(minutes: u32) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    if hours > 0 {
        format!("{}h {}m", hours, rest)
    } else {
        format!("{}m", rest)
    }
}
