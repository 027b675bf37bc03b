//! Persistent background task scheduler.
//!
//! Tasks live in a SQLite store; a single supervised execution host sleeps until the
//! earliest one is due, alerts, and commits the delivery. UI processes only write to the
//! store and send best-effort wake hints over a loopback channel.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod utils;
