//! Natural-language question to formatted SQL.
//!
//! Steps published while a question is answered:
//!
//! | step | description |
//! |---|---|
//! | Engine Priming | `Initialize <model>` |
//! | Semantic Table Indexing | `Selecting relevant tables` |
//! | Metadata Topology Parsing | `Querying schemas` |
//! | Context Aware | `Generate sql from model output` |
//! | Syntax Validation | `Formatting generated sql` |

use crate::agent::pipeline::{Agent, AgentRun, Hook};
use crate::agent::retry::{DEFAULT_RETRIES, RetryPolicy};
use crate::agent::stages::{DEFAULT_TOP_K, FormatSqlStage, GenerateSqlStage, SchemaPromptStage};
use crate::agent::tables::{
    DEFAULT_FALLBACK_TABLES, DEFAULT_TABLE_THRESHOLD, RelevantTableSelector, parse_table_list,
};
use crate::db::cursor::Cursor;
use crate::db::executor::CancellationToken;
use crate::db::schema::{DEFAULT_SAMPLE_ROWS, SchemaInspector};
use crate::error::{AppError, AppResult};
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{GenerationStep, StepTracker};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

type FragmentCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Tunables of one text-to-SQL run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Text2SqlOptions {
    pub table_threshold: usize,
    pub fallback_tables: usize,
    pub retries: u32,
    pub top_k: u32,
    pub sample_rows: usize,
    pub stream: bool,
}

impl Default for Text2SqlOptions {
    fn default() -> Self {
        Self {
            table_threshold: DEFAULT_TABLE_THRESHOLD,
            fallback_tables: DEFAULT_FALLBACK_TABLES,
            retries: DEFAULT_RETRIES,
            top_k: DEFAULT_TOP_K,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            stream: false,
        }
    }
}

/// A finished generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub sql: String,
    pub tables: Vec<String>,
    /// Parser complaint about `sql`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub steps: Vec<GenerationStep>,
}

/// Answers questions against one connection with one model.
pub struct Text2Sql {
    model: Arc<dyn ChatModel>,
    cursor: Arc<dyn Cursor>,
    options: Text2SqlOptions,
    tracker: StepTracker,
    cancel: CancellationToken,
    includes: Option<Vec<String>>,
    on_fragment: Option<FragmentCallback>,
}

impl Text2Sql {
    pub fn new(model: Arc<dyn ChatModel>, cursor: Arc<dyn Cursor>) -> Self {
        Self {
            model,
            cursor,
            options: Text2SqlOptions::default(),
            tracker: StepTracker::new(),
            cancel: CancellationToken::new(),
            includes: None,
            on_fragment: None,
        }
    }

    pub fn with_options(mut self, options: Text2SqlOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tracker(mut self, tracker: StepTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Restrict the candidate tables instead of listing the database.
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.includes = Some(tables);
        self
    }

    /// Receive generation fragments as they stream in.
    pub fn on_fragment(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fragment = Some(Arc::new(callback));
        self
    }

    pub fn steps(&self) -> Vec<GenerationStep> {
        self.tracker.snapshot()
    }

    fn step_hook(&self, title: &'static str, description: &'static str) -> Option<Hook> {
        let tracker = self.tracker.clone();
        Some(Box::new(move || {
            tracker.next_step(title, Some(description.to_string()))
        }))
    }

    fn build_agent(&self, tables: Vec<String>, format: FormatSqlStage) -> Agent {
        let policy = RetryPolicy::new(self.options.retries);
        let selector = RelevantTableSelector::new(tables)
            .with_threshold(self.options.table_threshold)
            .with_fallback(self.options.fallback_tables)
            .with_policy(policy);
        let schema = SchemaPromptStage::new(Arc::clone(&self.cursor))
            .with_sample_rows(self.options.sample_rows)
            .with_top_k(self.options.top_k);
        let generate = GenerateSqlStage::new(policy).streaming(self.options.stream);

        let agent = Agent::new(Arc::clone(&self.model))
            .next_with(
                selector,
                self.step_hook("Semantic Table Indexing", "Selecting relevant tables"),
                None,
            )
            .next_with(
                schema,
                self.step_hook("Metadata Topology Parsing", "Querying schemas"),
                None,
            )
            .next_with(
                generate,
                self.step_hook("Context Aware", "Generate sql from model output"),
                None,
            )
            .next_with(
                format,
                self.step_hook("Syntax Validation", "Formatting generated sql"),
                None,
            );

        match &self.on_fragment {
            Some(callback) => {
                let callback = Arc::clone(callback);
                agent.on_fragment(move |f| callback(f))
            }
            None => agent,
        }
    }

    async fn candidate_tables(&self) -> AppResult<Vec<String>> {
        match &self.includes {
            Some(tables) => Ok(tables.clone()),
            None => SchemaInspector::list_tables(self.cursor.as_ref()).await,
        }
    }

    /// Turn `question` into a formatted SQL statement.
    ///
    /// Any failure marks the last step as failed.
    pub async fn generate(&self, question: &str) -> AppResult<Generation> {
        self.tracker.reset();
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::invalid_input("Question must not be empty"));
        }

        let result = self.run(question).await;
        match &result {
            Ok(generation) => {
                self.tracker.succeed();
                info!(
                    tables = generation.tables.len(),
                    sql_len = generation.sql.len(),
                    has_warning = generation.warning.is_some(),
                    "Generated SQL"
                );
            }
            Err(e) => {
                self.tracker.fail();
                warn!(error = %e, "Generation failed");
            }
        }
        result.map(|mut generation| {
            generation.steps = self.tracker.snapshot();
            generation
        })
    }

    async fn run(&self, question: &str) -> AppResult<Generation> {
        self.tracker.next_step(
            "Engine Priming",
            Some(format!("Initialize {}", self.model.model())),
        );
        let tables = self.candidate_tables().await?;
        if tables.is_empty() {
            return Err(AppError::pipeline(
                "Engine Priming",
                "the database has no tables",
            ));
        }

        let format = FormatSqlStage::new(
            RetryPolicy::new(self.options.retries),
            self.cursor.backend().ok(),
        );
        let warning = format.warning_slot();
        let agent = self.build_agent(tables, format);

        let run = agent
            .execute(vec![ChatMessage::user(question)], &self.cancel)
            .await?;
        let selected = run
            .messages()
            .get(1)
            .map(|m| parse_table_list(&m.content))
            .unwrap_or_default();
        if let AgentRun::Halted { stage, reason, .. } = &run {
            return Err(AppError::pipeline(stage.clone(), reason.clone()));
        }
        let sql = run.into_text().await?;

        let warning = warning.lock().ok().and_then(|w| w.clone());
        Ok(Generation {
            sql,
            tables: selected,
            warning,
            steps: Vec::new(),
        })
    }
}

impl std::fmt::Debug for Text2Sql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Text2Sql")
            .field("model", &self.model.model())
            .field("url", &crate::models::mask_url(self.cursor.url()))
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
