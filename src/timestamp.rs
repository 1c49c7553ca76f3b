//! Line timestamps
//!
//! Received lines can be prefixed with a timestamp. The modes form a ring
//! that `ctrl-t T` steps through.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::error::ConfigError;

/// Timestamp display mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampMode {
    #[default]
    Off,
    /// Wall clock, `HH:MM:SS.mmm`
    Hour24,
    /// Time since the mode was entered
    Hour24Start,
    /// Time since the previous timestamp
    Hour24Delta,
    /// Wall clock with date, `YYYY-MM-DDTHH:MM:SS.mmm`
    Iso8601,
}

impl TimestampMode {
    /// The next mode in the ring, wrapping back to `Off`
    pub fn next(self) -> Self {
        match self {
            TimestampMode::Off => TimestampMode::Hour24,
            TimestampMode::Hour24 => TimestampMode::Hour24Start,
            TimestampMode::Hour24Start => TimestampMode::Hour24Delta,
            TimestampMode::Hour24Delta => TimestampMode::Iso8601,
            TimestampMode::Iso8601 => TimestampMode::Off,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != TimestampMode::Off
    }
}

impl FromStr for TimestampMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "off" => Ok(TimestampMode::Off),
            "24hour" => Ok(TimestampMode::Hour24),
            "24hour-start" => Ok(TimestampMode::Hour24Start),
            "24hour-delta" => Ok(TimestampMode::Hour24Delta),
            "iso8601" => Ok(TimestampMode::Iso8601),
            other => Err(ConfigError::InvalidTimestamp(other.to_string())),
        }
    }
}

impl fmt::Display for TimestampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimestampMode::Off => "none",
            TimestampMode::Hour24 => "24hour",
            TimestampMode::Hour24Start => "24hour-start",
            TimestampMode::Hour24Delta => "24hour-delta",
            TimestampMode::Iso8601 => "iso8601",
        })
    }
}

/// Format a wall-clock time as `HH:MM:SS.mmm`
pub fn wall_clock(now: &DateTime<Local>) -> String {
    now.format("%H:%M:%S%.3f").to_string()
}

/// Format an elapsed time as `HH:MM:SS.mmm`
pub fn elapsed(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let ms = total_ms % 1000;
    let secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        ms
    )
}

/// Reference points for the relative modes
#[derive(Debug, Clone)]
pub struct Clock {
    start: Instant,
    last: Option<Instant>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last: None,
        }
    }

    /// Restart the relative reference points
    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.last = None;
    }

    /// Render the timestamp text for `mode`, or `None` when timestamps are off
    pub fn render(&mut self, mode: TimestampMode) -> Option<String> {
        self.render_at(mode, Instant::now(), Local::now())
    }

    fn render_at(
        &mut self,
        mode: TimestampMode,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Option<String> {
        let text = match mode {
            TimestampMode::Off => return None,
            TimestampMode::Hour24 => wall_clock(&wall),
            TimestampMode::Hour24Start => elapsed(now.saturating_duration_since(self.start)),
            TimestampMode::Hour24Delta => {
                let since = self.last.unwrap_or(now);
                elapsed(now.saturating_duration_since(since))
            },
            TimestampMode::Iso8601 => wall.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        };
        self.last = Some(now);
        Some(text)
    }
}
