pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod types;

pub use app::{router, AppState};
pub use config::AppConfig;

#[cfg(test)]
pub mod testing;
