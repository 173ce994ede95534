pub mod api;
pub mod bots;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod gateways;
pub mod health;
pub mod jobs;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod tracking;
pub mod workers;
