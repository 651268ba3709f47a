//! Timezone-aware wall clock and timestamped console printing.
//!
//! Every console line written by this crate goes through a [`Clock`], which
//! carries its timezone explicitly instead of relying on a process-wide default.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "Europe/Amsterdam";

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("unknown timezone: {name}")]
    UnknownTimezone { name: String },
}

/// Source of "now". Swapped out in tests for a manually advanced clock.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct Clock {
    tz: Tz,
    source: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").field("tz", &self.tz).finish()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::with_source(chrono_tz::Europe::Amsterdam, Arc::new(SystemTimeSource))
    }
}

impl Clock {
    /// Build a clock for the named IANA timezone, reading the system time.
    pub fn new(timezone: &str) -> Result<Self, ClockError> {
        let tz = parse_timezone(timezone)?;
        Ok(Self::with_source(tz, Arc::new(SystemTimeSource)))
    }

    pub fn with_source(tz: Tz, source: Arc<dyn TimeSource>) -> Self {
        Self { tz, source }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Current instant in UTC.
    pub fn now_utc(&self) -> DateTime<Utc> {
        self.source.now()
    }

    /// Current instant in the configured timezone.
    pub fn now(&self) -> DateTime<Tz> {
        self.source.now().with_timezone(&self.tz)
    }

    /// `HH:MM:SS.mmm` in the configured timezone, milliseconds truncated.
    pub fn stamp(&self) -> String {
        format_stamp(&self.now())
    }

    /// Join `args` with single spaces and prefix `[HH:MM:SS.mmm]`.
    pub fn line(&self, args: &[&dyn Display]) -> String {
        format!("[{}] {}", self.stamp(), join_args(args))
    }

    /// Write a timestamped line to stdout.
    pub fn print(&self, args: &[&dyn Display]) {
        println!("{}", self.line(args));
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ClockError> {
    name.parse::<Tz>().map_err(|_| ClockError::UnknownTimezone {
        name: name.to_string(),
    })
}

pub fn format_stamp(at: &DateTime<Tz>) -> String {
    at.format("%H:%M:%S%.3f").to_string()
}

pub fn join_args(args: &[&dyn Display]) -> String {
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print a timestamped line: `tprint!(clock, "Imported", count, "rows")`.
#[macro_export]
macro_rules! tprint {
    ($clock:expr, $($arg:expr),+ $(,)?) => {
        $clock.print(&[$(&$arg as &dyn ::std::fmt::Display),+])
    };
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Manually advanced time source for deterministic tests.
    pub struct ManualTime {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualTime {
        pub fn at(now: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(now),
            })
        }

        pub fn advance_millis(&self, millis: i64) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::milliseconds(millis);
        }
    }

    impl TimeSource for ManualTime {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }
}
