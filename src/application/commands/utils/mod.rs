pub mod date_input;
pub mod repeat_parser;
pub mod time_remaining;

pub use date_input::{format_local, parse_when};
pub use repeat_parser::{describe_repeat, parse_repeat};
pub use time_remaining::format_time_remaining;
