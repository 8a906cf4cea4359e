//! tablite - main entry point.
//!
//! Results are written to stdout, logs to stderr.

use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tablite::config::{Command, Config};
use tablite::db::{CancellationToken, SchemaInspector, SqlxOpener};
use tablite::llm::models;
use tablite::models::{GenerationStatus, GenerationStep, StepTracker, mask_url};
use tablite::output::render_outcome;
use tablite::storage::JsonFileStore;
use tablite::{AppContext, AppError, AppResult};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Token cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn log_steps(steps: &[GenerationStep]) {
    if let Some(step) = steps.last() {
        match step.status {
            GenerationStatus::Failed => warn!(step = %step.title, "Step failed"),
            GenerationStatus::Running => info!(
                step = %step.title,
                description = step.description.as_deref().unwrap_or(""),
                "Step started"
            ),
            _ => debug!(step = %step.title, status = ?step.status, "Step updated"),
        }
    }
}

async fn run(config: &Config, ctx: &AppContext) -> AppResult<()> {
    match &config.command {
        Command::Connect { url, alias, tags } => {
            let id = ctx.connect(url, alias.clone(), tags.clone()).await?;
            println!("{}", id);
        }
        Command::Connections => {
            for connection in ctx.connections().await {
                println!(
                    "{}\t{}\t{}\t{}",
                    connection.id(),
                    connection.display_name(),
                    mask_url(&connection.url),
                    connection.tags.join(",")
                );
            }
        }
        Command::Tables { conn } => {
            let cursor = ctx.cursor(conn).await?;
            for table in SchemaInspector::list_tables(cursor.as_ref()).await? {
                println!("{}", table);
            }
        }
        Command::Describe { conn, table } => {
            let cursor = ctx.cursor(conn).await?;
            let description = SchemaInspector::describe_table(cursor.as_ref(), table).await?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Command::Query { conn, sql, format } => {
            let outcome = ctx.run_query(conn, sql, &cancel_on_interrupt()).await?;
            print!("{}", render_outcome(&outcome, *format));
        }
        Command::Ask {
            conn,
            question,
            run,
            format,
        } => {
            let cancel = cancel_on_interrupt();
            let tracker = StepTracker::new().with_observer(log_steps);
            let generation = if config.stream {
                let model = tablite::llm::open_model(
                    &ctx.selected_model().await?,
                    &ctx.credentials().await?,
                )?;
                ctx.text2sql(conn, model)
                    .await?
                    .with_tracker(tracker)
                    .with_cancellation(cancel.clone())
                    .on_fragment(|fragment| {
                        let mut stderr = std::io::stderr();
                        let _ = write!(stderr, "{}", fragment);
                        let _ = stderr.flush();
                    })
                    .generate(question)
                    .await?
            } else {
                ctx.ask(conn, question, tracker, cancel.clone()).await?
            };

            if let Some(warning) = &generation.warning {
                warn!(warning = %warning, "Generated SQL may not be valid");
            }
            println!("{}", generation.sql);

            if *run {
                let outcome = ctx.run_query(conn, &generation.sql, &cancel).await?;
                print!("{}", render_outcome(&outcome, *format));
            }
        }
        Command::Save { conn, title, sql } => {
            ctx.save_query(conn, title, sql).await?;
        }
        Command::Saved { conn } => {
            for query in ctx.saved_queries(conn).await? {
                println!("-- {}\n{}\n", query.title, query.sql());
            }
        }
        Command::Models => {
            let selected = ctx.selected_model().await?;
            for (model, provider) in models() {
                let marker = if model == selected { "*" } else { " " };
                println!("{} {}\t{}", marker, model, provider);
            }
        }
        Command::SetModel { model } => ctx.set_model(model).await?,
        Command::SetKey { provider, key } => ctx.set_api_key(*provider, key).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    let store_path = config.store_path();
    debug!(path = %store_path.display(), "Using settings file");

    let ctx = AppContext::open(
        Arc::new(JsonFileStore::new(store_path)),
        Arc::new(SqlxOpener::new(config.pool_settings())),
        config.executor(),
    )
    .await?
    .with_options(config.text2sql_options())
    .with_model(config.model.clone())
    .with_credentials(config.credentials());

    let result = run(&config, &ctx).await;
    ctx.close().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        report(&e);
        std::process::exit(1);
    }
    Ok(())
}

fn report(e: &AppError) {
    eprintln!("Error: {}", e);
    if let Some(suggestion) = e.suggestion() {
        eprintln!("Hint: {}", suggestion);
    }
}
