use chrono::{DateTime, Duration, Utc};

/// "2h 16m", "5d 2h", "due now"...
pub fn format_time_remaining(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if target <= now {
        return "due now".to_string();
    }
    format!("in {}", format_duration(target - now))
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.num_seconds();
    let days = total_seconds / 86400;
    let hours = (total_seconds % 86400) / 3600;
    let minutes = (total_seconds % 3600) / 60;

    match (days, hours, minutes) {
        (0, 0, 0) => "less than a minute".to_string(),
        (0, 0, mins) => format!("{}m", mins),
        (0, hrs, 0) => format!("{}h", hrs),
        (0, hrs, mins) => format!("{}h {}m", hrs, mins),
        (days, 0, _) => format!("{}d", days),
        (days, hrs, _) => format!("{}d {}h", days, hrs),
    }
}
