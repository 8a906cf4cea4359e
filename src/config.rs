//! Configuration handling for tablite.
//!
//! Every option can be given on the command line or through a `TABLITE_*`
//! environment variable. Values are mapped into the plain option structs
//! used by the library so nothing below this module depends on clap.

use crate::agent::Text2SqlOptions;
use crate::agent::retry::DEFAULT_RETRIES;
use crate::agent::stages::DEFAULT_TOP_K;
use crate::agent::tables::{DEFAULT_FALLBACK_TABLES, DEFAULT_TABLE_THRESHOLD};
use crate::db::schema::DEFAULT_SAMPLE_ROWS;
use crate::db::{PoolSettings, QueryExecutor};
use crate::llm::{Credentials, ProviderKind};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_CAP};
use crate::output::OutputFormat;
use crate::storage::default_store_path;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for tablite.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tablite",
    about = "Browse SQL databases and turn questions into SQL",
    version,
    author
)]
pub struct Config {
    /// Settings file (connections, model, API keys, saved queries)
    #[arg(long, global = true, value_name = "PATH", env = "TABLITE_STORE")]
    pub store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "TABLITE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, global = true, env = "TABLITE_JSON_LOGS")]
    pub json_logs: bool,

    /// Rows appended as LIMIT to reads that have none
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_ROW_CAP,
        env = "TABLITE_ROW_CAP"
    )]
    pub row_cap: u32,

    /// Query timeout in seconds
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS as u64,
        env = "TABLITE_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Table count from which the model narrows the candidate tables
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_TABLE_THRESHOLD,
        env = "TABLITE_TABLE_THRESHOLD"
    )]
    pub table_threshold: usize,

    /// Tables kept when the model never returns a selection
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_FALLBACK_TABLES,
        env = "TABLITE_FALLBACK_TABLES"
    )]
    pub fallback_tables: usize,

    /// Model calls per stage before giving up
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_RETRIES,
        env = "TABLITE_RETRIES"
    )]
    pub retries: u32,

    /// Row limit the model is asked to respect
    #[arg(long, global = true, default_value_t = DEFAULT_TOP_K, env = "TABLITE_TOP_K")]
    pub top_k: u32,

    /// Sample rows per table in the generation prompt
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_SAMPLE_ROWS,
        env = "TABLITE_SAMPLE_ROWS"
    )]
    pub sample_rows: usize,

    /// Model to use instead of the stored default
    #[arg(long, global = true, env = "TABLITE_MODEL")]
    pub model: Option<String>,

    #[arg(long, global = true, hide_env_values = true, env = "TABLITE_GOOGLE_API_KEY")]
    pub google_api_key: Option<String>,

    #[arg(long, global = true, hide_env_values = true, env = "TABLITE_DEEPSEEK_API_KEY")]
    pub deepseek_api_key: Option<String>,

    #[arg(
        long,
        global = true,
        hide_env_values = true,
        env = "TABLITE_OPENROUTER_API_KEY"
    )]
    pub openrouter_api_key: Option<String>,

    /// Print the generated SQL as it streams in
    #[arg(long, global = true, env = "TABLITE_STREAM")]
    pub stream: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Open a database and remember it
    Connect {
        url: String,
        #[arg(long)]
        alias: Option<String>,
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },
    /// List remembered connections
    Connections,
    /// List the tables of a connection
    Tables {
        /// Connection id, alias or URL
        conn: String,
    },
    /// Show columns, primary keys and DDL of a table
    Describe { conn: String, table: String },
    /// Run a SQL statement
    Query {
        conn: String,
        sql: String,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Turn a question into SQL
    Ask {
        conn: String,
        question: String,
        /// Execute the generated statement
        #[arg(long)]
        run: bool,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Save a query for a connection
    Save {
        conn: String,
        title: String,
        sql: String,
    },
    /// List saved queries of a connection
    Saved { conn: String },
    /// List known models and their providers
    Models,
    /// Select the default model
    SetModel { model: String },
    /// Store an API key (an empty key removes it)
    SetKey {
        #[arg(value_enum)]
        provider: ProviderKind,
        key: String,
    },
}

impl Config {
    pub fn store_path(&self) -> PathBuf {
        self.store.clone().unwrap_or_else(default_store_path)
    }

    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::with_defaults(self.query_timeout, self.row_cap)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings::default()
    }

    pub fn text2sql_options(&self) -> Text2SqlOptions {
        Text2SqlOptions {
            table_threshold: self.table_threshold,
            fallback_tables: self.fallback_tables,
            retries: self.retries,
            top_k: self.top_k,
            sample_rows: self.sample_rows,
            stream: self.stream,
        }
    }

    /// Keys given on the command line or in the environment.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            google: self.google_api_key.clone(),
            deepseek: self.deepseek_api_key.clone(),
            openrouter: self.openrouter_api_key.clone(),
        }
    }
}
