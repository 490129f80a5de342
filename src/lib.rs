// src/lib.rs
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod money;
pub mod oracle;
pub mod views;

pub use api::{routes, AppState};
pub use db::Database;
pub use error::AppError;
