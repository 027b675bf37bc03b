use chrono::Weekday;

pub trait WeekdayFormat {
    fn to_short_en(&self) -> &'static str;
    fn parse_en(s: &str) -> Option<Weekday>;
}

impl WeekdayFormat for Weekday {
    fn to_short_en(&self) -> &'static str {
        match self {
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
            Weekday::Sun => "Sun",
        }
    }

    /// Accepts full and three-letter English names, case-insensitive.
    fn parse_en(s: &str) -> Option<Weekday> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => Some(Weekday::Mon),
            "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
            "wednesday" | "wed" => Some(Weekday::Wed),
            "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
            "friday" | "fri" => Some(Weekday::Fri),
            "saturday" | "sat" => Some(Weekday::Sat),
            "sunday" | "sun" => Some(Weekday::Sun),
            _ => None,
        }
    }
}

/// "Mon,Wed,Fri" in Monday-first order.
pub fn format_days(days: &[Weekday]) -> String {
    let mut sorted = days.to_vec();
    sorted.sort_by_key(|d| d.num_days_from_monday());
    sorted.dedup();
    sorted
        .iter()
        .map(|d| d.to_short_en())
        .collect::<Vec<_>>()
        .join(",")
}
