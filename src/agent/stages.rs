//! Schema-prompt, generation and formatting stages.

use crate::agent::pipeline::{Stage, StageContext, StageOutput};
use crate::agent::prompt::{SQL_VALIDATE_PROMPT, render_template, sql_prompt};
use crate::agent::retry::{RetryPolicy, retry};
use crate::agent::sql::{check_syntax, extract_sql, format_sql};
use crate::agent::tables::parse_table_list;
use crate::db::cursor::Cursor;
use crate::db::schema::{DEFAULT_SAMPLE_ROWS, SchemaInspector};
use crate::error::{AppError, AppResult};
use crate::llm::{ChatMessage, ChatRequest};
use crate::models::Backend;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Default row limit the model is asked to respect.
pub const DEFAULT_TOP_K: u32 = 5;

// =============================================================================
// Schema prompt
// =============================================================================

/// Builds the generation prompt from the selected tables' DDL and samples.
pub struct SchemaPromptStage {
    cursor: Arc<dyn Cursor>,
    sample_rows: usize,
    top_k: u32,
}

impl SchemaPromptStage {
    pub fn new(cursor: Arc<dyn Cursor>) -> Self {
        Self {
            cursor,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Schema blocks of `tables`, joined by blank lines. Tables whose
    /// introspection fails are left out.
    pub async fn table_info(&self, tables: &[String]) -> String {
        let cursor = self.cursor.as_ref();
        let blocks = join_all(
            tables
                .iter()
                .map(|t| SchemaInspector::table_prompt(cursor, t, self.sample_rows)),
        )
        .await;

        tables
            .iter()
            .zip(blocks)
            .filter_map(|(table, block)| match block {
                Ok(block) if !block.trim().is_empty() => Some(block),
                Ok(_) => None,
                Err(e) => {
                    warn!(table = %table, error = %e, "Skipping table in prompt");
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl Stage for SchemaPromptStage {
    fn name(&self) -> &str {
        "schema prompt"
    }

    async fn run(&self, ctx: StageContext<'_>) -> AppResult<StageOutput> {
        let tables = parse_table_list(ctx.last());
        let table_info = self.table_info(&tables).await;
        if table_info.is_empty() {
            return Ok(StageOutput::Halt(
                "no schema information for the selected tables".to_string(),
            ));
        }

        let backend = self.cursor.backend().ok();
        let dialect = backend.map(|b| b.dialect_name()).unwrap_or("SQL");
        let prompt = render_template(
            sql_prompt(backend),
            [
                ("tableInfo", table_info),
                ("input", ctx.question().to_string()),
                ("topK", self.top_k.to_string()),
                ("dialect", dialect.to_string()),
            ],
        );
        debug!(tables = tables.len(), prompt_len = prompt.len(), "Assembled prompt");
        Ok(StageOutput::Text(prompt))
    }
}

// =============================================================================
// Generation
// =============================================================================

/// Sends the assembled prompt to the model.
pub struct GenerateSqlStage {
    policy: RetryPolicy,
    stream: bool,
}

impl GenerateSqlStage {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stream: false,
        }
    }

    /// Answer with a token stream instead of a single completion.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[async_trait]
impl Stage for GenerateSqlStage {
    fn name(&self) -> &str {
        "generate sql"
    }

    async fn run(&self, ctx: StageContext<'_>) -> AppResult<StageOutput> {
        let prompt = ctx.last();
        if prompt.trim().is_empty() {
            return Ok(StageOutput::Halt("empty prompt".to_string()));
        }
        let request = ChatRequest::new(ctx.model.model(), vec![ChatMessage::user(prompt)]);

        if self.stream {
            if ctx.cancel.is_cancelled() {
                return Err(AppError::cancelled(self.name()));
            }
            let stream = ctx.model.stream(request).await?;
            return Ok(StageOutput::Stream(stream));
        }

        let model = ctx.model;
        let sql = retry(self.name(), self.policy, ctx.cancel, |attempt| {
            let request = request.clone();
            async move {
                let completion = model.complete(request).await?;
                let sql = extract_sql(&completion.content);
                if sql.is_empty() {
                    debug!(attempt, "Empty generation");
                    return Err(AppError::empty_response("generate sql"));
                }
                Ok(sql)
            }
        })
        .await
        .map_err(|f| f.into_error(self.name()))?;
        Ok(StageOutput::Text(sql))
    }
}

// =============================================================================
// Format and validation
// =============================================================================

/// Asks the model to double-check the query, then formats it.
///
/// A syntax error reported by the parser is recorded in the warning slot
/// and never fails the stage.
pub struct FormatSqlStage {
    policy: RetryPolicy,
    backend: Option<Backend>,
    warning: Arc<Mutex<Option<String>>>,
}

impl FormatSqlStage {
    pub fn new(policy: RetryPolicy, backend: Option<Backend>) -> Self {
        Self {
            policy,
            backend,
            warning: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared slot receiving the syntax warning of the last run.
    pub fn warning_slot(&self) -> Arc<Mutex<Option<String>>> {
        Arc::clone(&self.warning)
    }

    fn record_syntax(&self, sql: &str) {
        let warning = check_syntax(sql, self.backend).err();
        if let Some(w) = &warning {
            warn!(warning = %w, "Generated SQL did not parse");
        }
        if let Ok(mut slot) = self.warning.lock() {
            *slot = warning;
        }
    }
}

#[async_trait]
impl Stage for FormatSqlStage {
    fn name(&self) -> &str {
        "format sql"
    }

    async fn run(&self, ctx: StageContext<'_>) -> AppResult<StageOutput> {
        let generated = extract_sql(ctx.last());
        if generated.is_empty() {
            return Err(AppError::pipeline(
                self.name(),
                "unexpected end of input while parsing the model answer",
            ));
        }

        let prompt = render_template(SQL_VALIDATE_PROMPT, [("notFormattedQuery", &generated)]);
        let request = ChatRequest::new(ctx.model.model(), vec![ChatMessage::user(prompt)]);
        let model = ctx.model;
        let checked = retry(self.name(), self.policy, ctx.cancel, |_| {
            let request = request.clone();
            async move {
                let completion = model.complete(request).await?;
                let formatted = format_sql(&extract_sql(&completion.content));
                if formatted.is_empty() {
                    return Err(AppError::empty_response("format sql"));
                }
                Ok(formatted)
            }
        })
        .await;

        let sql = match checked {
            Ok(sql) => sql,
            Err(failure) if failure.is_soft_exhaustion() => {
                info!("No double-checked query from the model, formatting the generated one");
                format_sql(&generated)
            }
            Err(failure) => return Err(failure.into_error(self.name())),
        };

        self.record_syntax(&sql);
        Ok(StageOutput::Text(sql))
    }
}
