//! tablite library
//!
//! Connection registry, schema introspection, query execution and a
//! multi-stage text-to-SQL agent for SQLite, PostgreSQL and MySQL.

pub mod agent;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod output;
pub mod storage;

pub use app::AppContext;
pub use config::Config;
pub use error::{AppError, AppResult};
