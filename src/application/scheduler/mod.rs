pub mod next_due;

pub use next_due::{Plan, Scheduler};
