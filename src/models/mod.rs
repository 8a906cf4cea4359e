//! Data models for tablite.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod generation;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{Backend, Connection, ConnectionId, database_name, mask_url};
pub use generation::{GenerationStatus, GenerationStep, StepTracker};
pub use query::{
    DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_CAP, QueryOutcome, QueryParam, Row, SavedQuery,
    StatementKind,
};
pub use schema::{ColumnStructure, TableDescription, TableSchema, TableStructure};
