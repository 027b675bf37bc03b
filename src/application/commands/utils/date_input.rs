use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parses a user-supplied time in the display zone:
/// `YYYY-MM-DD HH:MM`, `HH:MM` (next occurrence) or a relative `+30m` / `+2h` / `+1d` / `+45s`.
pub fn parse_when(input: &str, tz: &Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let input = input.trim();

    if let Some(relative) = input.strip_prefix('+') {
        let offset = parse_relative(relative)?;
        return now
            .checked_add_signed(offset)
            .ok_or_else(|| format!("'+{}' is too far in the future", relative.trim()));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return to_utc(tz, naive);
        }
    }

    if let Ok(time) = NaiveTime::parse_from_str(input, "%H:%M") {
        let today: NaiveDate = now.with_timezone(tz).date_naive();
        let candidate = to_utc(tz, today.and_time(time))?;
        if candidate > now {
            return Ok(candidate);
        }
        let tomorrow = today
            .succ_opt()
            .ok_or_else(|| format!("No day after {}", today))?;
        return to_utc(tz, tomorrow.and_time(time));
    }

    Err(format!(
        "Invalid time '{}'. Use YYYY-MM-DD HH:MM, HH:MM or +30m",
        input
    ))
}

fn parse_relative(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("Missing unit in '+{}'. Use s, m, h or d", input))?;
    let (amount, unit) = input.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("Invalid amount in '+{}'", input))?;

    let offset = match unit.trim() {
        "s" => Duration::try_seconds(amount),
        "m" | "min" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        other => return Err(format!("Unknown unit '{}'. Use s, m, h or d", other)),
    };
    offset.ok_or_else(|| format!("'+{}' is too far in the future", input))
}

fn to_utc(tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>, String> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(datetime) => Ok(datetime.with_timezone(&Utc)),
        // Repeated hour at a DST change: take the first one.
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(format!("{} does not exist in {}", naive, tz.name())),
    }
}

pub fn format_local(datetime: DateTime<Utc>, tz: &Tz) -> String {
    datetime.with_timezone(tz).format("%a %Y-%m-%d %H:%M").to_string()
}
