use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::domain::value_objects::RepeatRule;
use crate::domain::value_objects::weekday_format::{WeekdayFormat, format_days};

/// Parses `daily`, `every N days` / `every:N`, or `weekly mon,fri` / `mon,fri`.
///
/// Weekdays are taken as written; use [`weekly_in_utc`] to anchor them to a fire time.
pub fn parse_repeat(input: &str) -> Result<RepeatRule, String> {
    let input = input.trim().to_lowercase();

    if input == "daily" || input == "every day" {
        return Ok(RepeatRule::Daily);
    }

    if let Some(rest) = input
        .strip_prefix("every:")
        .or_else(|| input.strip_prefix("every "))
    {
        let amount = rest.trim().trim_end_matches("days").trim_end_matches("day").trim();
        let interval: u32 = amount
            .parse()
            .map_err(|_| format!("Invalid interval in '{}'. Use: every 3 days", input))?;
        let rule = RepeatRule::EveryXDays { interval };
        rule.validate()?;
        return Ok(rule);
    }

    let days_str = input.strip_prefix("weekly").unwrap_or(&input).trim();
    let mut days = Vec::new();
    for day in days_str.split(',') {
        let weekday = Weekday::parse_en(day).ok_or_else(|| format!("Invalid weekday: {}", day.trim()))?;
        if !days.contains(&weekday) {
            days.push(weekday);
        }
    }
    days.sort_by_key(|d| d.num_days_from_monday());

    let rule = RepeatRule::Weekly { days };
    rule.validate()?;
    Ok(rule)
}

/// Weekly rules advance on UTC weekdays. When the local day of `fire_at` differs
/// from its UTC day, shift the listed days so the alarm still rings on the local ones.
pub fn weekly_in_utc(rule: RepeatRule, fire_at: DateTime<Utc>, tz: &Tz) -> RepeatRule {
    match rule {
        RepeatRule::Weekly { days } => {
            let shift = day_shift(fire_at, tz);
            RepeatRule::Weekly {
                days: days.into_iter().map(|d| shift_weekday(d, -shift)).collect(),
            }
        }
        other => other,
    }
}

/// Human description of a rule with weekdays shown in the display zone.
pub fn describe_repeat(rule: &RepeatRule, fire_at: DateTime<Utc>, tz: &Tz) -> String {
    match rule {
        RepeatRule::Weekly { days } => {
            let shift = day_shift(fire_at, tz);
            let local: Vec<Weekday> = days.iter().map(|d| shift_weekday(*d, shift)).collect();
            format!("weekly on {}", format_days(&local))
        }
        other => other.to_string(),
    }
}

/// Local weekday minus UTC weekday of the same instant: -1, 0 or 1.
fn day_shift(fire_at: DateTime<Utc>, tz: &Tz) -> i64 {
    let local = fire_at.with_timezone(tz).date_naive();
    (local - fire_at.date_naive()).num_days()
}

fn shift_weekday(day: Weekday, by: i64) -> Weekday {
    match by.signum() {
        1 => day.succ(),
        -1 => day.pred(),
        _ => day,
    }
}
