//! Weekly bonus-hours schedule attached to a venue.
//!
//! The schedule is stored as JSON on the venue row and parsed on every mint,
//! so edits take effect immediately. Evaluation is a pure function of the
//! venue-local time.

use std::str::FromStr;

use bigdecimal::{BigDecimal, One};
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

/// Multiplier of a window that does not set its own.
pub const DEFAULT_BONUS_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusSchedule {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub windows: Vec<BonusWindow>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusWindow {
    /// Days of week the window starts on, 0 = Sunday .. 6 = Saturday.
    pub days: Vec<u32>,
    #[serde(deserialize_with = "hh_mm")]
    pub start: NaiveTime,
    #[serde(deserialize_with = "hh_mm")]
    pub end: NaiveTime,
    #[serde(default)]
    pub multiplier: Option<f64>,
}

fn hh_mm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveMultiplier {
    pub multiplier: BigDecimal,
    pub is_bonus: bool,
}

impl ActiveMultiplier {
    pub fn none() -> Self {
        Self {
            multiplier: BigDecimal::one(),
            is_bonus: false,
        }
    }
}

impl BonusWindow {
    fn starts_on(&self, day: Weekday) -> bool {
        self.days.contains(&day.num_days_from_sunday())
    }

    fn covers(&self, local: NaiveDateTime) -> bool {
        let time = local.time();
        let today = local.weekday();
        if self.start == self.end {
            // whole day
            self.starts_on(today)
        } else if self.start < self.end {
            self.starts_on(today) && time >= self.start && time < self.end
        } else {
            // wraps past midnight into the following day
            (self.starts_on(today) && time >= self.start) || (self.starts_on(today.pred()) && time < self.end)
        }
    }

    fn multiplier(&self) -> f64 {
        self.multiplier.unwrap_or(DEFAULT_BONUS_MULTIPLIER)
    }
}

impl BonusSchedule {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Highest multiplier among the windows covering `local`, or 1.0.
    pub fn active_multiplier(&self, local: NaiveDateTime) -> ActiveMultiplier {
        if !self.enabled {
            return ActiveMultiplier::none();
        }
        self.windows
            .iter()
            .filter(|window| window.covers(local))
            .map(BonusWindow::multiplier)
            .filter(|m| m.is_finite() && *m > 0.0)
            .fold(None, |best: Option<f64>, m| Some(best.map_or(m, |b| b.max(m))))
            .and_then(decimal_from_f64)
            .map(|multiplier| ActiveMultiplier {
                is_bonus: multiplier > BigDecimal::one(),
                multiplier,
            })
            .unwrap_or_else(ActiveMultiplier::none)
    }
}

/// Converts through the shortest decimal representation so `1.1` stays `1.1`.
fn decimal_from_f64(value: f64) -> Option<BigDecimal> {
    BigDecimal::from_str(&value.to_string()).ok()
}

/// Shifts a UTC timestamp into venue-local wall-clock time.
pub fn venue_local_time(now_utc: NaiveDateTime, utc_offset_minutes: i32) -> NaiveDateTime {
    now_utc + Duration::minutes(i64::from(utc_offset_minutes))
}
