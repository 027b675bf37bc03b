pub mod app_config;

pub use app_config::{AlertConfig, AppConfig, HostConfig, SnoozeConfig};
