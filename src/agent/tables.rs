//! Relevant-table selection.
//!
//! Small schemas are passed through untouched. Larger ones are narrowed by a
//! forced tool call whose argument schema enumerates the known table names,
//! so the model can only pick tables that exist. When no attempt yields a
//! selection, the first `fallback` tables are used in their original order.

use crate::agent::pipeline::{Stage, StageContext, StageOutput};
use crate::agent::prompt::{RELEVANT_TABLES_PROMPT, render_template};
use crate::agent::retry::{RetryPolicy, retry};
use crate::db::executor::CancellationToken;
use crate::error::{AppError, AppResult};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ToolChoice, ToolDefinition};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// Table count from which the model is asked to narrow the list.
pub const DEFAULT_TABLE_THRESHOLD: usize = 25;

/// Tables kept when the model never returns a selection.
pub const DEFAULT_FALLBACK_TABLES: usize = 25;

const TOOL_NAME: &str = "Table";
const STAGE: &str = "relevant tables";

#[derive(Debug, Deserialize)]
struct ToolArguments {
    #[serde(default)]
    rows: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelevantTableSelector {
    tables: Vec<String>,
    threshold: usize,
    fallback: usize,
    policy: RetryPolicy,
}

impl RelevantTableSelector {
    pub fn new(tables: Vec<String>) -> Self {
        Self {
            tables,
            threshold: DEFAULT_TABLE_THRESHOLD,
            fallback: DEFAULT_FALLBACK_TABLES,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, fallback: usize) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// True when the table count reaches the threshold.
    pub fn needs_model(&self) -> bool {
        self.tables.len() >= self.threshold
    }

    /// First `fallback` tables, order preserved.
    pub fn fallback_tables(&self) -> Vec<String> {
        self.tables.iter().take(self.fallback).cloned().collect()
    }

    /// The `Table` tool, constrained to the known table names.
    pub fn tool(&self) -> ToolDefinition {
        ToolDefinition::function(
            TOOL_NAME,
            "Get relevant tables from a given list",
            json!({
                "type": "object",
                "properties": {
                    "rows": {
                        "type": "array",
                        "description": "Name list of table in SQL database",
                        "items": {
                            "type": "string",
                            "enum": self.tables,
                        },
                    },
                },
                "required": ["rows"],
            }),
        )
    }

    fn request(&self, model: &str, question: &str) -> ChatRequest {
        let prompt = render_template(
            RELEVANT_TABLES_PROMPT,
            [("tableNames", self.tables.join("\n"))],
        );
        ChatRequest::new(
            model,
            vec![ChatMessage::user(prompt), ChatMessage::user(question)],
        )
        .with_tool(self.tool(), ToolChoice::Required)
    }

    /// Known tables named by the first tool call, in the model's order.
    fn parse_selection(&self, arguments: &str) -> Vec<String> {
        let args: ToolArguments = serde_json::from_str(arguments).unwrap_or(ToolArguments {
            rows: Vec::new(),
        });
        let mut selected: Vec<String> = Vec::new();
        for row in args.rows {
            if self.tables.contains(&row) && !selected.contains(&row) {
                selected.push(row);
            }
        }
        selected
    }

    /// Tables relevant to `question`.
    ///
    /// Model call failures other than an answer without a usable tool call
    /// are returned as errors.
    pub async fn select(
        &self,
        question: &str,
        model: &dyn ChatModel,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<String>> {
        if !self.needs_model() {
            debug!(
                tables = self.tables.len(),
                threshold = self.threshold,
                "Below threshold, using every table"
            );
            return Ok(self.tables.clone());
        }

        let request = self.request(model.model(), question);
        let outcome = retry(STAGE, self.policy, cancel, |attempt| {
            let request = request.clone();
            async move {
                let completion = model.complete(request).await?;
                let Some(call) = completion.tool_calls.first() else {
                    debug!(attempt, "Answer without a tool call");
                    return Err(AppError::empty_response(STAGE));
                };
                let selected = self.parse_selection(&call.arguments);
                if selected.is_empty() {
                    debug!(attempt, arguments = %call.arguments, "Tool call selected nothing");
                    return Err(AppError::empty_response(STAGE));
                }
                Ok(selected)
            }
        })
        .await;

        match outcome {
            Ok(selected) => {
                info!(selected = selected.len(), of = self.tables.len(), "Selected relevant tables");
                Ok(selected)
            }
            Err(failure) if failure.is_soft_exhaustion() => {
                let fallback = self.fallback_tables();
                warn!(
                    fallback = fallback.len(),
                    "No table selection from the model, using the first tables"
                );
                Ok(fallback)
            }
            Err(failure) => Err(failure.into_error(STAGE)),
        }
    }
}

#[async_trait]
impl Stage for RelevantTableSelector {
    fn name(&self) -> &str {
        STAGE
    }

    async fn run(&self, ctx: StageContext<'_>) -> AppResult<StageOutput> {
        let tables = self.select(ctx.question(), ctx.model, ctx.cancel).await?;
        Ok(StageOutput::Text(serde_json::to_string(&tables)?))
    }
}

/// Parse the table list message produced by [`RelevantTableSelector`].
pub fn parse_table_list(message: &str) -> Vec<String> {
    serde_json::from_str(message).unwrap_or_else(|_| {
        message
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletion, TokenStream, ToolCall};
    use std::sync::Mutex;

    /// Replays canned completions and records requests.
    struct Scripted {
        answers: Mutex<Vec<AppResult<ChatCompletion>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(answers: Vec<AppResult<ChatCompletion>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ChatRequest) -> AppResult<ChatCompletion> {
            self.requests.lock().unwrap().push(request);
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                Ok(ChatCompletion::default())
            } else {
                answers.remove(0)
            }
        }

        async fn stream(&self, _request: ChatRequest) -> AppResult<TokenStream> {
            Err(AppError::internal("not streaming"))
        }
    }

    fn tables(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("t{:02}", i)).collect()
    }

    fn tool_answer(arguments: &str) -> AppResult<ChatCompletion> {
        Ok(ChatCompletion {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: TOOL_NAME.to_string(),
                arguments: arguments.to_string(),
            }],
        })
    }

    #[tokio::test]
    async fn test_small_schema_skips_model() {
        let model = Scripted::new(vec![]);
        let selector = RelevantTableSelector::new(tables(3));
        let selected = selector
            .select("how many users?", &model, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, tables(3));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_after_retries_without_tool_call() {
        let model = Scripted::new(vec![]);
        let selector = RelevantTableSelector::new(tables(30));
        let selected = selector
            .select("anything", &model, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, tables(25));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_selection_filters_unknown_names() {
        let model = Scripted::new(vec![
            Ok(ChatCompletion::text("I think t01")),
            tool_answer(r#"{"rows":["t05","ghost","t01","t05"]}"#),
        ]);
        let selector = RelevantTableSelector::new(tables(30));
        let selected = selector
            .select("q", &model, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, ["t05", "t01"]);
        assert_eq!(model.calls(), 2);

        let request = &model.requests.lock().unwrap()[0];
        assert_eq!(request.tool_choice, Some(ToolChoice::Required));
        assert_eq!(request.messages[1].content, "q");
        assert!(request.messages[0].content.contains("t29"));
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let model = Scripted::new(vec![Err(AppError::model(Some(401), "invalid key"))]);
        let selector = RelevantTableSelector::new(tables(30));
        let err = selector
            .select("q", &model, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let model = Scripted::new(vec![tool_answer(r#"{"rows":["t02"]}"#)]);
        let selector = RelevantTableSelector::new(tables(6)).with_threshold(5);
        assert!(selector.needs_model());
        let selected = selector
            .select("q", &model, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, ["t02"]);
    }

    #[test]
    fn test_tool_schema_enumerates_tables() {
        let tool = RelevantTableSelector::new(tables(2)).tool();
        assert_eq!(tool.function.name, "Table");
        assert_eq!(
            tool.function.parameters["properties"]["rows"]["items"]["enum"],
            json!(["t00", "t01"])
        );
    }

    #[test]
    fn test_parse_table_list() {
        assert_eq!(parse_table_list(r#"["a","b"]"#), ["a", "b"]);
        assert_eq!(parse_table_list("a\n\nb\n"), ["a", "b"]);
    }
}
