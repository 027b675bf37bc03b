pub mod delivery_guarantee;
pub mod repeat_rule;
pub mod weekday_format;

pub use delivery_guarantee::DeliveryGuarantee;
pub use repeat_rule::RepeatRule;
pub use weekday_format::WeekdayFormat;
