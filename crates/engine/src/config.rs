use std::str::FromStr;

use crate::calendar::parse_time_label;
use crate::error::{EngineError, Result};

/// Fixed list of service start times, in the order they are offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRoster {
    times: Vec<String>,
}

impl SlotRoster {
    /// Validates and keeps `times` in the given order, dropping duplicates.
    pub fn new<I, S>(times: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roster: Vec<String> = Vec::new();
        for time in times {
            let time = time.into();
            parse_time_label(&time)?;
            if !roster.contains(&time) {
                roster.push(time);
            }
        }
        if roster.is_empty() {
            return Err(EngineError::InvalidRequest("slot roster is empty".into()));
        }
        Ok(Self { times: roster })
    }

    pub fn contains(&self, time_label: &str) -> bool {
        self.times.iter().any(|t| t == time_label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.times.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl Default for SlotRoster {
    /// Hourly slots 09:00 through 20:00.
    fn default() -> Self {
        Self {
            times: (9..=20).map(|h| format!("{:02}:00", h)).collect(),
        }
    }
}

impl FromStr for SlotRoster {
    type Err = EngineError;

    /// Comma-separated `HH:MM` list.
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.split(',').map(str::trim).filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub roster: SlotRoster,
    /// How long a hold may stay unpaid.
    pub payment_window: chrono::Duration,
    pub sweep_interval: std::time::Duration,
    pub booking_horizon_days: u32,
    pub utc_offset_hours: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roster: SlotRoster::default(),
            payment_window: chrono::Duration::minutes(10),
            sweep_interval: std::time::Duration::from_secs(60),
            booking_horizon_days: 30,
            utc_offset_hours: 3,
        }
    }
}

impl EngineConfig {
    /// Reads engine settings from the environment. Missing values use the
    /// defaults; invalid ones are reported and replaced by the default too.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let roster = match lookup("SLOT_ROSTER") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("Invalid SLOT_ROSTER ({}), using default roster", e);
                defaults.roster.clone()
            }),
            None => defaults.roster.clone(),
        };

        let payment_window_minutes: i64 = parse_or(&lookup, "PAYMENT_WINDOW_MINUTES", 10, |m| *m > 0);
        let sweep_interval_secs: u64 = parse_or(&lookup, "SWEEP_INTERVAL_SECS", 60, |s| *s > 0);

        Self {
            roster,
            payment_window: chrono::Duration::minutes(payment_window_minutes),
            sweep_interval: std::time::Duration::from_secs(sweep_interval_secs),
            booking_horizon_days: parse_or(&lookup, "BOOKING_HORIZON_DAYS", defaults.booking_horizon_days, |d| *d > 0),
            utc_offset_hours: parse_or(&lookup, "UTC_OFFSET_HOURS", defaults.utc_offset_hours, |h| (-12..=14).contains(h)),
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!("Invalid {}={:?}, using {}", key, raw, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_roster() {
        let roster = SlotRoster::default();
        assert_eq!(roster.len(), 12);
        assert_eq!(roster.iter().next(), Some("09:00"));
        assert_eq!(roster.iter().last(), Some("20:00"));
        assert!(roster.contains("14:00"));
        assert!(!roster.contains("14:30"));
    }

    #[test]
    fn test_roster_from_str() {
        let roster: SlotRoster = "10:00, 12:30,10:00".parse().unwrap();
        assert_eq!(roster.iter().collect::<Vec<_>>(), vec!["10:00", "12:30"]);
        assert!("10:00,noon".parse::<SlotRoster>().is_err());
        assert!("".parse::<SlotRoster>().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = config(&[]);
        assert_eq!(config.payment_window, chrono::Duration::minutes(10));
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(60));
        assert_eq!(config.booking_horizon_days, 30);
        assert_eq!(config.utc_offset_hours, 3);
        assert_eq!(config.roster, SlotRoster::default());
    }

    #[test]
    fn test_config_overrides() {
        let config = config(&[
            ("PAYMENT_WINDOW_MINUTES", "15"),
            ("SWEEP_INTERVAL_SECS", "30"),
            ("SLOT_ROSTER", "11:00,12:00"),
            ("UTC_OFFSET_HOURS", "-5"),
        ]);
        assert_eq!(config.payment_window, chrono::Duration::minutes(15));
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(30));
        assert_eq!(config.roster.len(), 2);
        assert_eq!(config.utc_offset_hours, -5);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            ("PAYMENT_WINDOW_MINUTES", "0"),
            ("BOOKING_HORIZON_DAYS", "many"),
            ("SLOT_ROSTER", "25:00"),
            ("UTC_OFFSET_HOURS", "40"),
        ]);
        assert_eq!(config.payment_window, chrono::Duration::minutes(10));
        assert_eq!(config.booking_horizon_days, 30);
        assert_eq!(config.roster, SlotRoster::default());
        assert_eq!(config.utc_offset_hours, 3);
    }
}
