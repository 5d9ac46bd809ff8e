//! Shared vocabulary for the translation workflow protocol.
//!
//! - [`types`]: tasks, phases, documents and chunk boundaries
//! - [`transitions`]: the per-task-type phase tables every validation path consults
//! - collaborator traits ([`TaskRegistry`], [`DocumentStore`]) the protocol reads and writes through
//! - activity events ([`ActionEvent`]) and structured protocol logs ([`ProtocolLog`])

pub mod transitions;
pub mod types;

pub use transitions::{standard_tables, Edge, TableError, TransitionTable, TransitionTables};
pub use types::{
    Book, ChapterContent, ChapterRef, ChunkBoundaries, Paragraph, Phase, PhaseDisplay, TargetType,
    Task, TaskType, TaskUpdate, Translation, Volume,
};

// Re-export async trait for convenience
pub use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Collaborator errors
// ============================================================================

/// Failure reported by a task registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl StoreError {
    pub fn backend(err: impl fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Holds the active tasks. The protocol reads tasks through `find` and only
/// ever changes them through `update`.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Snapshot of a task, if it exists.
    fn find(&self, task_id: &str) -> Option<Task>;

    /// Apply a partial update to an existing task.
    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<(), RegistryError>;

    /// Append model reasoning text to the task's thinking log.
    async fn append_thinking(&self, task_id: &str, text: &str);

    /// Append model output text to the task's output log.
    async fn append_output(&self, task_id: &str, text: &str);
}

/// Persistent book/chapter/paragraph storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_book(&self, book_id: &str) -> Result<Option<Book>, StoreError>;

    async fn load_chapter_content(
        &self,
        chapter_id: &str,
    ) -> Result<Option<ChapterContent>, StoreError>;

    async fn save_book(&self, book: &Book) -> Result<(), StoreError>;

    async fn save_chapter_content(&self, content: &ChapterContent) -> Result<(), StoreError>;

    /// Save several chapters as one unit.
    ///
    /// The default writes each chapter in turn. When a write fails, chapters
    /// already written are put back to the content they had before the call
    /// and the original error is returned. Stores with transactions should
    /// override this with a single transaction.
    async fn save_chapter_contents(&self, contents: &[ChapterContent]) -> Result<(), StoreError> {
        let mut written: Vec<Option<ChapterContent>> = Vec::with_capacity(contents.len());
        for content in contents {
            let previous = self.load_chapter_content(&content.chapter_id).await?;
            if let Err(err) = self.save_chapter_content(content).await {
                for previous in written.iter().rev().flatten() {
                    if let Err(restore_err) = self.save_chapter_content(previous).await {
                        tracing::warn!(
                            chapter_id = %previous.chapter_id,
                            error = %restore_err,
                            "failed to restore chapter after partial save"
                        );
                    }
                }
                return Err(err);
            }
            written.push(previous);
        }
        Ok(())
    }
}

// ============================================================================
// Activity events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEntity {
    Task,
    Paragraph,
}

/// Record handed to the `on_action` side channel after a successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub entity: ActionEntity,
    pub data: serde_json::Value,
}

/// Synchronous activity-feed callback.
pub type ActionSink = Arc<dyn Fn(&ActionEvent) + Send + Sync>;

// ============================================================================
// Structured protocol logs
// ============================================================================

/// Tracing target used by [`ProtocolLog::emit`].
pub const PROTOCOL_EVENT_TARGET: &str = "translation_workflow::events";

/// Structured events describing protocol decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolLog {
    /// Registry phase changed through the status tool
    PhaseChanged {
        task_id: String,
        from: Option<Phase>,
        to: Phase,
    },
    /// Streaming validator accepted a phase signal
    StreamPhaseAdvanced {
        task_id: String,
        from: Option<Phase>,
        to: Phase,
    },
    /// Streaming validator rejected the stream
    StreamViolation { task_id: String, error: String },
    /// A translation batch was committed
    BatchCommitted {
        task_id: String,
        task_type: TaskType,
        processed: usize,
        remaining: Option<usize>,
    },
    /// A tool call was rejected
    ToolRejected {
        tool: String,
        task_id: Option<String>,
        error: String,
    },
}

impl ProtocolLog {
    /// Emit this event as JSON on the protocol event target
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(target: PROTOCOL_EVENT_TARGET, event = %json),
            Err(e) => tracing::warn!(error = %e, "failed to serialize protocol event"),
        }
    }
}
