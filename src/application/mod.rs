pub mod commands;
pub mod host;
pub mod retry;
pub mod scheduler;
pub mod services;
