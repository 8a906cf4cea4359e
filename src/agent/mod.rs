//! Text-to-SQL agent.
//!
//! - [`pipeline`]: sequential stage executor
//! - [`tables`]: relevant-table selection
//! - [`stages`]: schema prompt, generation and formatting stages
//! - [`text2sql`]: the full question-to-SQL run with step tracking
//! - [`prompt`]: templates and placeholder substitution
//! - [`retry`]: bounded retries with explicit outcomes
//! - [`sql`]: code-block extraction, formatting and syntax checks

pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod sql;
pub mod stages;
pub mod tables;
pub mod text2sql;

pub use pipeline::{Agent, AgentRun, Stage, StageContext, StageOutput};
pub use retry::{RetryFailure, RetryPolicy};
pub use tables::RelevantTableSelector;
pub use text2sql::{Generation, Text2Sql, Text2SqlOptions};
