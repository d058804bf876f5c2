//! prism-rag command line
//!
//! Thin operator surface over the library: run pipeline stages, inspect and
//! cancel tasks, and ask questions against an indexed project.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use prism_rag::config::PipelineConfig;
use prism_rag::processing::Orchestrator;
use prism_rag::providers::http::{
    HttpEmbeddingProvider, HttpExtractionService, HttpIndexSink, HttpRetrievalService,
};
use prism_rag::retrieval::QueryPlanner;
use prism_rag::storage::PipelineDb;
use prism_rag::types::{QueryOutcome, QueryRequest, Stage};

#[derive(Parser)]
#[command(name = "prism-rag", about = "Document knowledge-base pipeline", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "prism-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an uploaded file with a project
    Register {
        project: String,
        filename: String,
        /// File size in bytes
        #[arg(long, default_value_t = 0)]
        size: u64,
    },
    /// Run one pipeline stage for a project
    RunStage {
        project: String,
        /// extraction | deduplication | chunking | embedding | indexing
        #[arg(value_parser = parse_stage)]
        stage: Stage,
        /// Bypass already-processed skip checks for this invocation
        #[arg(long)]
        force: bool,
        /// Block until the task finishes, showing progress
        #[arg(long)]
        wait: bool,
    },
    /// Show a task's status and progress
    Task { task_id: Uuid },
    /// Request cancellation of a running task
    Cancel { task_id: Uuid },
    /// Ask a question against a project's knowledge base
    Query { project: String, question: String },
    /// Show store counts and recent tasks for a project
    Status { project: String },
}

fn parse_stage(raw: &str) -> std::result::Result<Stage, String> {
    Stage::parse(raw).ok_or_else(|| format!("unknown stage '{}'", raw))
}

fn load_config(path: &PathBuf) -> Result<PipelineConfig> {
    if path.exists() {
        PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        tracing::info!("config file {} not found, using defaults", path.display());
        Ok(PipelineConfig::default())
    }
}

fn build_orchestrator(config: &PipelineConfig) -> Result<Orchestrator> {
    let db = Arc::new(PipelineDb::new(&config.storage.database_path)?);
    let extraction = Arc::new(HttpExtractionService::new(&config.services));
    let embedding = Arc::new(HttpEmbeddingProvider::new(
        &config.services,
        config.embedding.dimensions,
    ));
    let index = Arc::new(HttpIndexSink::new(&config.services));
    Ok(Orchestrator::new(
        config.clone(),
        db,
        extraction,
        embedding,
        index,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prism_rag=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Register {
            project,
            filename,
            size,
        } => {
            let orchestrator = build_orchestrator(&config)?;
            let record =
                orchestrator.register_document(&project, &filename, size, chrono::Utc::now())?;
            println!("registered {} as {}", record.filename, record.id);
        }
        Command::RunStage {
            project,
            stage,
            force,
            wait,
        } => {
            let orchestrator = build_orchestrator(&config)?;
            let task_id = orchestrator.run_stage(&project, stage, force).await?;
            println!("{}", task_id);
            if wait {
                watch_task(&orchestrator, task_id).await?;
            }
        }
        Command::Task { task_id } => {
            let orchestrator = build_orchestrator(&config)?;
            match orchestrator.get_task(task_id)? {
                Some(task) => {
                    println!(
                        "{} {} {:?} {:.0}% ({}/{} processed, {} skipped, {} failed)",
                        task.id,
                        task.stage,
                        task.status,
                        task.progress.percent_complete(),
                        task.progress.items_processed,
                        task.progress.items_total,
                        task.progress.items_skipped,
                        task.progress.items_failed,
                    );
                    for error in &task.errors {
                        println!("  error [{}] {}: {}", error.stage, error.item, error.message);
                    }
                }
                None => bail!("task {} not found", task_id),
            }
        }
        Command::Cancel { task_id } => {
            let orchestrator = build_orchestrator(&config)?;
            orchestrator.cancel_task(task_id)?;
            println!("cancellation requested for {}", task_id);
        }
        Command::Query { project, question } => {
            let db = Arc::new(PipelineDb::new(&config.storage.database_path)?);
            let retrieval = Arc::new(HttpRetrievalService::new(&config.services));
            let planner = QueryPlanner::new(db, retrieval, config.retrieval.clone());

            let response = planner.query(&QueryRequest::new(&project, &question)).await?;
            println!("{}", response.answer);
            if !response.citations.is_empty() {
                println!("\nSources:");
                for (i, citation) in response.citations.iter().enumerate() {
                    println!("  {}. {}", i + 1, citation.format_inline());
                }
            }
            if response.outcome == QueryOutcome::ExplicitlyExcluded {
                println!("\n(The source material explicitly excludes this.)");
            }
            println!("\nAttempts:");
            for attempt in &response.activity {
                println!(
                    "  {}. {:?}: \"{}\" -> {} passages",
                    attempt.attempt, attempt.form, attempt.query, attempt.passages_returned
                );
            }
        }
        Command::Status { project } => {
            let db = Arc::new(PipelineDb::new(&config.storage.database_path)?);
            let documents = db.list_documents(&project)?;
            let canonical = db.list_canonical_documents(&project)?.len();
            println!(
                "{}: {} documents ({} canonical), {} chunks, {} embeddings",
                project,
                documents.len(),
                canonical,
                db.count_chunks(&project)?,
                db.count_embeddings(&project)?,
            );
            for task in db.list_tasks(&project)?.into_iter().take(10) {
                println!(
                    "  {} {} {:?} ({}/{})",
                    task.id,
                    task.stage,
                    task.status,
                    task.progress.items_processed,
                    task.progress.items_total
                );
            }
        }
    }

    Ok(())
}

/// Poll a task to completion with a progress bar
async fn watch_task(orchestrator: &Orchestrator, task_id: Uuid) -> Result<()> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len}")
            .expect("valid template"),
    );

    loop {
        let Some(task) = orchestrator.get_task(task_id)? else {
            bail!("task {} disappeared", task_id);
        };
        bar.set_length(task.progress.items_total as u64);
        bar.set_position(
            (task.progress.items_processed + task.progress.items_skipped
                + task.progress.items_failed) as u64,
        );
        bar.set_message(format!("{} {:?}", task.stage, task.status));

        if task.status.is_terminal() {
            bar.finish_with_message(format!("{} {:?}", task.stage, task.status));
            if !task.errors.is_empty() {
                println!("{} item(s) failed:", task.errors.len());
                for error in &task.errors {
                    println!("  [{}] {}: {}", error.stage, error.item, error.message);
                }
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}
