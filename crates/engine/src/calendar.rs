//! Calendar clock and the year-less date labels used across the engine.
//!
//! A date label looks like `Пн 01.01`: a weekday abbreviation, a space, then
//! `DD.MM`. It is stored verbatim and only turned into an absolute date when it
//! is evaluated, always through [`DateLabel::resolve`].

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use std::fmt;
use std::sync::Mutex;

use crate::error::{EngineError, Result};

/// Weekday abbreviations, Monday first (matches `Weekday::num_days_from_monday`).
pub const WEEKDAYS: [&str; 7] = ["Пн", "Вт", "Ср", "Чт", "Пт", "Сб", "Вс"];

/// Storage format for created/confirmed/cancelled timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Month distance beyond which a label is taken to belong to a neighbouring year.
const ROLLOVER_MONTHS: i32 = 6;

// ── Clock ──

/// Source of "now" in the provider's local wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Wall clock shifted by a fixed UTC offset (no DST, no zone database).
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| {
            tracing::warn!("UTC offset {}h out of range, using UTC", utc_offset_hours);
            Utc.fix()
        });
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Convenience constructor: `ManualClock::at("2026-03-01 12:00:00")`.
    ///
    /// # Panics
    /// If `timestamp` is not in [`TIMESTAMP_FORMAT`].
    pub fn at(timestamp: &str) -> Self {
        Self::new(parse_timestamp(timestamp).expect("valid timestamp literal"))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }
}

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

// ── Date labels ──

/// A year-less calendar date in the canonical `Пн 01.01` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateLabel {
    weekday: usize,
    day: u32,
    month: u32,
}

impl DateLabel {
    /// Parses the canonical form. Anything else is `InvalidDateFormat`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || EngineError::InvalidDateFormat(raw.to_string());

        let (weekday, day_month) = raw.split_once(' ').ok_or_else(invalid)?;
        let weekday = WEEKDAYS
            .iter()
            .position(|w| *w == weekday)
            .ok_or_else(invalid)?;

        let (day, month) = day_month.split_once('.').ok_or_else(invalid)?;
        let is_two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
        if !is_two_digits(day) || !is_two_digits(month) {
            return Err(invalid());
        }
        let day: u32 = day.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;

        // 2000 is a leap year, so 29.02 is accepted here and checked on resolve.
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            return Err(invalid());
        }

        Ok(Self {
            weekday,
            day,
            month,
        })
    }

    /// Label for an absolute date, as offered to clients in the date picker.
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            weekday: date.weekday().num_days_from_monday() as usize,
            day: date.day(),
            month: date.month(),
        }
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Resolves the label against `today` with the nearest-year rule.
    ///
    /// The current year is assumed. A label whose month trails the current
    /// month by more than six months belongs to next year; one that leads it
    /// by more than six belongs to last year. Exactly six stays in the current
    /// year, a known edge of the heuristic.
    pub fn resolve(&self, today: NaiveDate) -> Result<NaiveDate> {
        let current = today.month() as i32;
        let month = self.month as i32;

        let year = if current - month > ROLLOVER_MONTHS {
            today.year() + 1
        } else if month - current > ROLLOVER_MONTHS {
            today.year() - 1
        } else {
            today.year()
        };

        // 29.02 in a non-leap year has no absolute date.
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .ok_or_else(|| EngineError::InvalidDateFormat(self.to_string()))
    }

    /// Like [`resolve`](Self::resolve), but the weekday must be the one of the
    /// resolved date. Labels coming from front ends go through here, so one
    /// calendar day has exactly one spelling in storage.
    pub fn resolve_strict(&self, today: NaiveDate) -> Result<NaiveDate> {
        let date = self.resolve(today)?;
        if date.weekday().num_days_from_monday() as usize != self.weekday {
            return Err(EngineError::InvalidDateFormat(self.to_string()));
        }
        Ok(date)
    }

    /// Resolved start of the slot `time` on this date.
    pub fn resolve_at(&self, time: NaiveTime, today: NaiveDate) -> Result<NaiveDateTime> {
        Ok(self.resolve(today)?.and_time(time))
    }
}

impl fmt::Display for DateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}.{:02}",
            WEEKDAYS[self.weekday], self.day, self.month
        )
    }
}

// ── Time labels ──

/// Parses a slot start time in strict `HH:MM` form.
pub fn parse_time_label(raw: &str) -> Result<NaiveTime> {
    if raw.len() != 5 || raw.as_bytes()[2] != b':' {
        return Err(EngineError::InvalidTimeFormat(raw.to_string()));
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| EngineError::InvalidTimeFormat(raw.to_string()))
}
