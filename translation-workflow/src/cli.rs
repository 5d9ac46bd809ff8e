//! Command-line interface for inspecting and exercising the protocol offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use translation_workflow_sdk::{
    Book, ChapterContent, ChunkBoundaries, DocumentStore, Phase, Task, TaskType,
};

use crate::config::ProtocolConfig;
use crate::registry::InMemoryTaskRegistry;
use crate::store::SqliteDocumentStore;
use crate::stream::{drive_stream, StreamChunk, StreamValidator, StreamValidatorConfig};
use crate::tools::{calculate_allowed_batch_size, create_protocol_tool_server, ToolContext};

/// Phase-checked translation workflow tools
///
/// Replays recorded model streams through the streaming validator, submits
/// translation batches against a local library database and inspects
/// paragraph translation history.
#[derive(Parser, Debug, Clone)]
#[command(name = "translation-workflow")]
#[command(about = "Phase-checked translation workflow tools")]
#[command(version)]
pub struct Args {
    /// Path to a YAML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database path (overrides config and environment)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the library database schema
    Init,

    /// Import a book and its chapter contents from a JSON file
    Import {
        /// `{"book": {...}, "chapters": [...]}`
        #[arg(value_name = "BOOK_JSON")]
        path: PathBuf,
    },

    /// Replay a recorded stream (one `{"text", "done"}` object per line)
    CheckStream {
        #[arg(long)]
        task_type: String,

        /// Phase the task was in when the stream started (absent if omitted)
        #[arg(long)]
        phase: Option<String>,

        #[arg(value_name = "CHUNKS_JSONL")]
        path: PathBuf,
    },

    /// Run add_translation_batch against the database for a working-phase task
    Submit {
        #[arg(long)]
        book: String,

        #[arg(long, default_value = "translation")]
        task_type: String,

        /// AI model id recorded on every new version
        #[arg(long)]
        model: String,

        /// Restrict the task to one chapter
        #[arg(long)]
        chapter: Option<String>,

        /// JSON array of the paragraph ids this chunk may touch
        #[arg(long, value_name = "PATH")]
        boundaries: Option<PathBuf>,

        /// `{"paragraphs": [...]}` or a bare array of entries
        #[arg(value_name = "BATCH_JSON")]
        path: PathBuf,
    },

    /// Print the capacity decision for the next batch
    BatchSize {
        /// Paragraphs in the current chunk
        #[arg(long)]
        total: Option<usize>,

        /// Paragraphs already submitted
        #[arg(long)]
        submitted: Option<usize>,
    },

    /// Print every translation version of a paragraph
    History {
        #[arg(long)]
        chapter: String,

        #[arg(long)]
        paragraph: String,
    },
}

/// File format read by `import`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookImport {
    pub book: Book,
    #[serde(default)]
    pub chapters: Vec<ChapterContent>,
}

pub async fn run(args: Args, mut config: ProtocolConfig) -> Result<()> {
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }

    match args.command {
        Command::Init => {
            open_store(&config)?;
            println!("Initialized {}", config.database_path.display());
            Ok(())
        }
        Command::Import { path } => import(&config, &path).await,
        Command::CheckStream {
            task_type,
            phase,
            path,
        } => check_stream(&task_type, phase.as_deref(), &path).await,
        Command::Submit {
            book,
            task_type,
            model,
            chapter,
            boundaries,
            path,
        } => {
            let request = SubmitRequest {
                book,
                task_type,
                model,
                chapter,
                boundaries,
                path,
            };
            submit(&config, request).await
        }
        Command::BatchSize { total, submitted } => {
            let allowance = calculate_allowed_batch_size(&config.batch_limits(), total, submitted);
            println!("{}", serde_json::to_string_pretty(&allowance)?);
            Ok(())
        }
        Command::History { chapter, paragraph } => history(&config, &chapter, &paragraph).await,
    }
}

fn open_store(config: &ProtocolConfig) -> Result<SqliteDocumentStore> {
    let store = SqliteDocumentStore::open(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    store.initialize_schema().context("Failed to initialize schema")?;
    Ok(store)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn import(config: &ProtocolConfig, path: &Path) -> Result<()> {
    let import: BookImport = read_json(path)?;
    let store = open_store(config)?;

    store.save_book(&import.book).await?;
    for content in &import.chapters {
        store
            .save_chapter_content(content)
            .await
            .with_context(|| format!("Failed to save chapter {}", content.chapter_id))?;
    }

    tracing::info!(
        book_id = %import.book.id,
        chapters = import.chapters.len(),
        "book imported"
    );
    println!(
        "Imported book {} ({} chapters with content)",
        import.book.id,
        import.chapters.len()
    );
    Ok(())
}

async fn check_stream(task_type: &str, phase: Option<&str>, path: &Path) -> Result<()> {
    let phase = match phase {
        Some(name) => Some(
            Phase::parse(name)
                .with_context(|| format!("Unknown phase '{}'; expected one of: {}", name, Phase::names()))?,
        ),
        None => None,
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let chunks = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str::<StreamChunk>(line)
                .map_err(|e| format!("line {}: {}", number + 1, e))
        })
        .collect::<Vec<_>>();

    let mut validator =
        StreamValidator::new(StreamValidatorConfig::new("check-stream", task_type, phase))?;
    let summary = drive_stream(futures::stream::iter(chunks), &mut validator).await?;

    println!(
        "Stream accepted: {} chunks, final phase {}",
        summary.chunks,
        translation_workflow_sdk::PhaseDisplay(summary.final_phase)
    );
    Ok(())
}

struct SubmitRequest {
    book: String,
    task_type: String,
    model: String,
    chapter: Option<String>,
    boundaries: Option<PathBuf>,
    path: PathBuf,
}

async fn submit(config: &ProtocolConfig, request: SubmitRequest) -> Result<()> {
    if TaskType::parse(&request.task_type).is_none() {
        tracing::warn!(task_type = %request.task_type, "unknown task type; the tool will reject it");
    }

    let params: Value = match read_json::<Value>(&request.path)? {
        Value::Array(entries) => serde_json::json!({ "paragraphs": entries }),
        other => other,
    };

    let mut task = Task::new("cli-submit", request.task_type)
        .with_book(request.book)
        .with_phase(Phase::Working);
    if let Some(chapter) = request.chapter {
        task = task.with_chapter_target(chapter);
    }
    let registry = InMemoryTaskRegistry::new();
    registry.insert(task);

    let store = open_store(config)?;
    let mut context = ToolContext::new("cli-submit")
        .with_registry(Arc::new(registry))
        .with_store(Arc::new(store))
        .with_model(request.model)
        .with_limits(config.batch_limits());
    if let Some(path) = &request.boundaries {
        let ids: Vec<String> = read_json(path)?;
        context = context.with_boundaries(ChunkBoundaries::from_ordered(ids));
    }

    let server = create_protocol_tool_server(context);
    let result = server.call("add_translation_batch", params).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.get("success") != Some(&Value::Bool(true)) {
        bail!("batch rejected");
    }
    Ok(())
}

async fn history(config: &ProtocolConfig, chapter_id: &str, paragraph_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let content = store
        .load_chapter_content(chapter_id)
        .await?
        .with_context(|| format!("Chapter not found: {}", chapter_id))?;
    let paragraph = content
        .paragraphs
        .iter()
        .find(|p| p.id == paragraph_id)
        .with_context(|| format!("Paragraph {} not found in chapter {}", paragraph_id, chapter_id))?;

    println!("{}", paragraph.text);
    for version in store.translation_history(paragraph_id)? {
        let marker = if paragraph.selected_translation_id.as_deref() == Some(version.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {} [{}] {}",
            marker,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            version.ai_model_id,
            version.translation
        );
    }
    Ok(())
}
