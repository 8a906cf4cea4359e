//! End-to-end text-to-SQL runs over a real SQLite database with a scripted
//! model.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tablite::agent::Text2SqlOptions;
use tablite::db::{QueryExecutor, SqlxOpener};
use tablite::llm::{ChatCompletion, ChatModel, ChatRequest, TokenStream, ToolCall};
use tablite::models::GenerationStatus;
use tablite::storage::MemoryStore;
use tablite::{AppContext, AppError, AppResult};
use tempfile::NamedTempFile;

const STEP_TITLES: [&str; 5] = [
    "Engine Priming",
    "Semantic Table Indexing",
    "Metadata Topology Parsing",
    "Context Aware",
    "Syntax Validation",
];

/// Answers by request shape: tool requests get `selection`, double-check
/// prompts get `validated`, everything else gets `generated`.
struct ScriptedModel {
    selection: Vec<String>,
    generated: String,
    validated: Option<String>,
    generation_error: Option<AppError>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    fn new(generated: &str) -> Self {
        Self {
            selection: Vec::new(),
            generated: generated.to_string(),
            validated: Some(generated.to_string()),
            generation_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn generation_prompts(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.tools.is_empty())
            .map(|r| r.messages[0].content.clone())
            .filter(|p| p.starts_with("You are a SQLite expert"))
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest) -> AppResult<ChatCompletion> {
        self.requests.lock().unwrap().push(request.clone());

        if !request.tools.is_empty() {
            return Ok(ChatCompletion {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_0".to_string(),
                    name: "Table".to_string(),
                    arguments: serde_json::json!({ "rows": self.selection }).to_string(),
                }],
            });
        }
        let prompt = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
        if prompt.contains("Double check the query above") {
            return Ok(ChatCompletion::text(self.validated.clone().unwrap_or_default()));
        }
        match &self.generation_error {
            Some(e) => Err(e.clone()),
            None => Ok(ChatCompletion::text(self.generated.clone())),
        }
    }

    async fn stream(&self, request: ChatRequest) -> AppResult<TokenStream> {
        self.requests.lock().unwrap().push(request);
        let chars: Vec<char> = self.generated.chars().collect();
        let fragments: Vec<String> = chars.chunks(6).map(|c| c.iter().collect()).collect();
        Ok(TokenStream::from_fragments(fragments))
    }
}

async fn setup(tables: &[&str]) -> (AppContext, String, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", file.path().display());
    let ctx = AppContext::open(
        Arc::new(MemoryStore::new()),
        Arc::new(SqlxOpener::default()),
        QueryExecutor::new(),
    )
    .await
    .unwrap();

    let cursor = ctx.cursor(&url).await.unwrap();
    for table in tables {
        cursor
            .execute(&format!(
                "CREATE TABLE {} (id INTEGER PRIMARY KEY, name TEXT, active INTEGER)",
                table
            ))
            .await
            .unwrap();
        cursor
            .execute(&format!(
                "INSERT INTO {} (id, name, active) VALUES (1, '{}-one', 1), (2, '{}-two', 0)",
                table, table, table
            ))
            .await
            .unwrap();
    }
    (ctx, url, file)
}

#[tokio::test]
async fn test_small_schema_generates_formatted_sql() {
    let (ctx, url, _file) = setup(&["users", "orders", "products"]).await;
    let model = Arc::new(ScriptedModel::new(
        "Sure:\n```sql\nselect name from users where active = 1 limit 5\n```",
    ));

    let generation = ctx
        .text2sql(&url, model.clone())
        .await
        .unwrap()
        .generate("  who is active?  ")
        .await
        .unwrap();

    assert!(generation.sql.starts_with("SELECT"));
    assert!(generation.sql.contains("FROM"));
    assert!(generation.sql.contains("users"));
    assert!(!generation.sql.contains("select"));
    assert!(!generation.sql.contains("```"));
    assert_eq!(generation.warning, None);
    assert_eq!(generation.tables, ["orders", "products", "users"]);

    let titles: Vec<&str> = generation.steps.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, STEP_TITLES);
    assert!(generation
        .steps
        .iter()
        .all(|s| s.status == GenerationStatus::Succeeded));
    assert_eq!(
        generation.steps[0].description.as_deref(),
        Some("Initialize scripted")
    );

    // no selection call below the threshold: one generation, one double-check
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.tools.is_empty()));

    let prompt = &model.generation_prompts()[0];
    assert!(prompt.contains("CREATE TABLE users"));
    assert!(prompt.contains("3 rows from products table:"));
    assert!(prompt.contains("Question: who is active?"));
    assert!(prompt.contains("at most 5 results"));
    ctx.close().await;
}

#[tokio::test]
async fn test_large_schema_uses_selected_tables_only() {
    let (ctx, url, _file) = setup(&["users", "orders", "products"]).await;
    let ctx = ctx.with_options(Text2SqlOptions {
        table_threshold: 2,
        ..Default::default()
    });
    let mut model = ScriptedModel::new("```sql\nselect name from users\n```");
    model.selection = vec!["users".to_string(), "ghosts".to_string()];
    let model = Arc::new(model);

    let generation = ctx
        .text2sql(&url, model.clone())
        .await
        .unwrap()
        .generate("list users")
        .await
        .unwrap();
    assert_eq!(generation.tables, ["users"]);

    let prompt = &model.generation_prompts()[0];
    assert!(prompt.contains("CREATE TABLE users"));
    assert!(!prompt.contains("CREATE TABLE orders"));
    ctx.close().await;
}

#[tokio::test]
async fn test_model_failure_marks_step_failed() {
    let (ctx, url, _file) = setup(&["users"]).await;
    let mut model = ScriptedModel::new("unused");
    model.generation_error = Some(AppError::model(Some(401), "invalid api key"));
    let model = Arc::new(model);

    let text2sql = ctx.text2sql(&url, model.clone()).await.unwrap();
    let err = text2sql.generate("anything").await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    let steps = text2sql.steps();
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[3].title, "Context Aware");
    assert_eq!(steps[3].status, GenerationStatus::Failed);
    assert!(steps[..3].iter().all(|s| s.status == GenerationStatus::Succeeded));
    // hard errors are not retried
    assert_eq!(model.requests().len(), 1);
    ctx.close().await;
}

#[tokio::test]
async fn test_empty_double_check_falls_back_to_local_format() {
    let (ctx, url, _file) = setup(&["users"]).await;
    let mut model = ScriptedModel::new("```sql\nselect id from users\n```");
    model.validated = None;
    let model = Arc::new(model);

    let generation = ctx
        .text2sql(&url, model.clone())
        .await
        .unwrap()
        .generate("ids")
        .await
        .unwrap();
    assert!(generation.sql.starts_with("SELECT"));
    // one generation plus three double-check attempts
    assert_eq!(model.requests().len(), 4);
    ctx.close().await;
}

#[tokio::test]
async fn test_unparseable_sql_is_a_warning() {
    let (ctx, url, _file) = setup(&["users"]).await;
    let model = Arc::new(ScriptedModel::new("```sql\nSELEC name FROM users\n```"));

    let generation = ctx
        .text2sql(&url, model)
        .await
        .unwrap()
        .generate("names")
        .await
        .unwrap();
    assert!(generation.warning.is_some());
    assert_eq!(
        generation.steps.last().map(|s| s.status),
        Some(GenerationStatus::Succeeded)
    );
    ctx.close().await;
}

#[tokio::test]
async fn test_streaming_generation_reports_fragments() {
    let (ctx, url, _file) = setup(&["users"]).await;
    let ctx = ctx.with_options(Text2SqlOptions {
        stream: true,
        ..Default::default()
    });
    let model = Arc::new(ScriptedModel::new("```sql\nselect name from users\n```"));
    let fragments = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = fragments.clone();

    let generation = ctx
        .text2sql(&url, model)
        .await
        .unwrap()
        .on_fragment(move |f| sink.lock().unwrap().push(f.to_string()))
        .generate("names")
        .await
        .unwrap();

    let streamed = fragments.lock().unwrap().concat();
    assert_eq!(streamed, "```sql\nselect name from users\n```");
    assert!(generation.sql.starts_with("SELECT"));
    ctx.close().await;
}

#[tokio::test]
async fn test_invalid_inputs() {
    let (ctx, url, _file) = setup(&[]).await;
    let model = Arc::new(ScriptedModel::new("unused"));
    let text2sql = ctx.text2sql(&url, model.clone()).await.unwrap();

    let err = text2sql.generate("   ").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { .. }));
    assert!(text2sql.steps().is_empty());

    let err = text2sql.generate("anything").await.unwrap_err();
    assert!(matches!(err, AppError::Pipeline { .. }));
    let steps = text2sql.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, GenerationStatus::Failed);
    assert!(model.requests().is_empty());
    ctx.close().await;
}
