use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::weekday_format::format_days;

/// Longest accepted `EveryXDays` interval (ten years).
pub const MAX_INTERVAL_DAYS: u32 = 3650;

/// How a delivered task spawns its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepeatRule {
    Daily,
    EveryXDays { interval: u32 },
    /// Next listed weekday, same time of day.
    Weekly { days: Vec<Weekday> },
}

impl RepeatRule {
    /// Storage tag, see the `repeat_type` column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            RepeatRule::Daily => "daily",
            RepeatRule::EveryXDays { .. } => "every_x_days",
            RepeatRule::Weekly { .. } => "weekly",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            RepeatRule::Daily => Ok(()),
            RepeatRule::EveryXDays { interval } if *interval == 0 => {
                Err("Repeat interval must be at least one day".to_string())
            }
            RepeatRule::EveryXDays { interval } if *interval > MAX_INTERVAL_DAYS => Err(format!(
                "Repeat interval cannot exceed {} days",
                MAX_INTERVAL_DAYS
            )),
            RepeatRule::EveryXDays { .. } => Ok(()),
            RepeatRule::Weekly { days } if days.is_empty() => {
                Err("At least one day must be specified for a weekly repeat".to_string())
            }
            RepeatRule::Weekly { .. } => Ok(()),
        }
    }

    /// The occurrence following `fire_at`. `None` for a rule that cannot advance,
    /// including one whose next occurrence falls outside the representable range.
    pub fn next_after(&self, fire_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RepeatRule::Daily => add_days(fire_at, 1),
            RepeatRule::EveryXDays { interval } => {
                if *interval == 0 {
                    return None;
                }
                add_days(fire_at, *interval as i64)
            }
            RepeatRule::Weekly { days } => (1..=7)
                .filter_map(|i| add_days(fire_at, i))
                .find(|candidate| days.contains(&candidate.weekday())),
        }
    }
}

fn add_days(at: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    at.checked_add_signed(Duration::try_days(days)?)
}

impl fmt::Display for RepeatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatRule::Daily => write!(f, "daily"),
            RepeatRule::EveryXDays { interval: 1 } => write!(f, "every day"),
            RepeatRule::EveryXDays { interval } => write!(f, "every {} days", interval),
            RepeatRule::Weekly { days } => write!(f, "weekly on {}", format_days(days)),
        }
    }
}
