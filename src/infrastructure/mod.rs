pub mod alerts;
pub mod config;
pub mod coordination;
pub mod database;
pub mod platform;
pub mod repositories;
