//! Model-callable protocol tools
//!
//! - **status**: `update_task_status`, phase changes checked against the transition tables
//! - **batch**: `add_translation_batch`, capacity negotiation and versioned commits
//!
//! Tool calls never fail past their own boundary: every rejection becomes a
//! `{"success": false, "error": ...}` object the model can read and retry from.

pub mod batch;
pub mod status;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use translation_workflow_sdk::{
    async_trait, ActionEvent, ActionSink, ChunkBoundaries, DocumentStore, Phase, PhaseDisplay,
    ProtocolLog, StoreError, TaskRegistry, TaskType,
};

pub use batch::{
    add_translation_batch, calculate_allowed_batch_size, AddTranslationBatchTool, BatchAllowance,
    BatchCommitted, BatchLimits,
};
pub use status::{update_task_status, StatusUpdated, UpdateTaskStatusTool};

// ============================================================================
// Errors
// ============================================================================

/// Broad class of a tool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing registry, task id, book id, store or model id
    Configuration,
    /// Unknown task, book, chapter or paragraph
    NotFound,
    /// Illegal transition or wrong phase for the operation
    PhaseViolation,
    /// Malformed, oversized, duplicated or out-of-range input
    Shape,
    /// The registry or document store failed
    Persistence,
}

fn join(ids: &[String]) -> String {
    ids.join(", ")
}

fn positions(positions: &[usize]) -> String {
    positions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A rejected tool call
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("task registry is not available")]
    MissingRegistry,

    #[error("task id is missing")]
    MissingTaskId,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid status '{status}'; expected one of: {expected}")]
    InvalidStatus { status: String, expected: String },

    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error(
        "forbidden phase transition for {task_type} task: {} → {to}",
        PhaseDisplay(*.from)
    )]
    ForbiddenTransition {
        task_type: TaskType,
        from: Option<Phase>,
        to: Phase,
    },

    #[error("failed to update task {task_id}: {message}")]
    UpdateFailed { task_id: String, message: String },

    #[error(
        "translation batches can only be submitted in the working phase (current phase: {})",
        PhaseDisplay(*.0)
    )]
    NotWorking(Option<Phase>),

    #[error("task has no book id")]
    MissingBookId,

    #[error("task type '{0}' cannot submit translation batches; expected one of: translation, polish, proofreading")]
    BatchNotSupported(String),

    #[error("paragraphs must be a non-empty array")]
    EmptyBatch,

    #[error("batch contains {size} paragraphs but the limit is {limit}; split it into batches of at most {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("entries at positions {} use the deprecated index field without paragraph_id; every entry must carry paragraph_id", positions(.0))]
    IndexOnlyEntries(Vec<usize>),

    #[error("entry at position {0} has a missing or empty paragraph_id")]
    InvalidParagraphId(usize),

    #[error("paragraph {0} has missing or empty translated_text")]
    MissingTranslatedText(String),

    #[error("duplicate paragraph_id values: {}", join(.0))]
    DuplicateParagraphIds(Vec<String>),

    #[error("paragraph ids outside the current chunk: {}", join(.0))]
    OutOfRange(Vec<String>),

    #[error("AI model id is missing")]
    MissingModelId,

    #[error("document store is not available")]
    MissingStore,

    #[error("book not found: {0}")]
    BookNotFound(String),

    #[error("book {0} has no chapters")]
    NoChapters(String),

    #[error("chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("paragraphs not found: {}", join(.0))]
    ParagraphsNotFound(Vec<String>),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("failed to save translations: {0}")]
    Store(#[from] StoreError),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::MissingRegistry
            | ToolError::MissingTaskId
            | ToolError::MissingBookId
            | ToolError::MissingModelId
            | ToolError::MissingStore => ErrorKind::Configuration,

            ToolError::TaskNotFound(_)
            | ToolError::BookNotFound(_)
            | ToolError::NoChapters(_)
            | ToolError::ChapterNotFound(_)
            | ToolError::ParagraphsNotFound(_)
            | ToolError::UnknownTaskType(_)
            | ToolError::UnknownTool(_) => ErrorKind::NotFound,

            ToolError::ForbiddenTransition { .. }
            | ToolError::NotWorking(_)
            | ToolError::BatchNotSupported(_) => ErrorKind::PhaseViolation,

            ToolError::InvalidStatus { .. }
            | ToolError::EmptyBatch
            | ToolError::BatchTooLarge { .. }
            | ToolError::IndexOnlyEntries(_)
            | ToolError::InvalidParagraphId(_)
            | ToolError::MissingTranslatedText(_)
            | ToolError::DuplicateParagraphIds(_)
            | ToolError::OutOfRange(_) => ErrorKind::Shape,

            ToolError::UpdateFailed { .. } | ToolError::Store(_) => ErrorKind::Persistence,
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Paragraph ids committed so far in one task attempt, in commit order.
///
/// Clones share the same list, so every batch call of an attempt sees the
/// ids earlier calls committed.
#[derive(Debug, Clone, Default)]
pub struct SubmissionProgress {
    inner: Arc<Mutex<ProgressInner>>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl SubmissionProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn submitted_count(&self) -> usize {
        self.lock().order.len()
    }

    pub fn processed_ids(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    pub fn contains(&self, paragraph_id: &str) -> bool {
        self.lock().seen.contains(paragraph_id)
    }

    /// Record committed ids; re-submitted ids are counted once
    pub fn record<'a>(&self, ids: impl IntoIterator<Item = &'a String>) {
        let mut inner = self.lock();
        for id in ids {
            if inner.seen.insert(id.clone()) {
                inner.order.push(id.clone());
            }
        }
    }
}

/// Everything a tool call needs from the surrounding task attempt
#[derive(Clone, Default)]
pub struct ToolContext {
    pub task_id: Option<String>,
    pub registry: Option<Arc<dyn TaskRegistry>>,
    pub store: Option<Arc<dyn DocumentStore>>,
    pub ai_model_id: Option<String>,
    pub chunk_boundaries: Option<ChunkBoundaries>,
    pub progress: SubmissionProgress,
    pub limits: BatchLimits,
    pub on_action: Option<ActionSink>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("task_id", &self.task_id)
            .field("has_registry", &self.registry.is_some())
            .field("has_store", &self.store.is_some())
            .field("ai_model_id", &self.ai_model_id)
            .field("chunk_boundaries", &self.chunk_boundaries)
            .field("progress", &self.progress)
            .field("limits", &self.limits)
            .finish()
    }
}

impl ToolContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_model(mut self, ai_model_id: impl Into<String>) -> Self {
        self.ai_model_id = Some(ai_model_id.into());
        self
    }

    pub fn with_boundaries(mut self, boundaries: ChunkBoundaries) -> Self {
        self.chunk_boundaries = Some(boundaries);
        self
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_progress(mut self, progress: SubmissionProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn on_action(mut self, sink: ActionSink) -> Self {
        self.on_action = Some(sink);
        self
    }

    pub(crate) fn registry(&self) -> Result<&Arc<dyn TaskRegistry>, ToolError> {
        self.registry.as_ref().ok_or(ToolError::MissingRegistry)
    }

    pub(crate) fn task_id(&self) -> Result<&str, ToolError> {
        match self.task_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ToolError::MissingTaskId),
        }
    }

    pub(crate) fn notify(&self, event: ActionEvent) {
        if let Some(sink) = &self.on_action {
            sink(&event);
        }
    }
}

// ============================================================================
// Tool server
// ============================================================================

/// A tool the model can call by name
#[async_trait]
pub trait ProtocolTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the call parameters
    fn input_schema(&self) -> Value;

    /// Run the tool; the result always carries a `success` flag
    async fn call(&self, params: Value) -> Value;
}

/// Name, description and schema as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Registry of callable tools
pub struct ToolServer {
    name: String,
    version: String,
    tools: BTreeMap<String, Arc<dyn ProtocolTool>>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: BTreeMap::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tool(mut self, tool: impl ProtocolTool + 'static) -> Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_version(&self) -> &str {
        &self.version
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Dispatch a call by tool name
    pub async fn call(&self, tool_name: &str, params: Value) -> Value {
        match self.tools.get(tool_name) {
            Some(tool) => {
                debug!(server = %self.name, tool = tool_name, "dispatching tool call");
                tool.call(params).await
            }
            None => failure(tool_name, None, &ToolError::UnknownTool(tool_name.to_string())),
        }
    }
}

/// Build the server exposing both protocol tools for one task attempt
pub fn create_protocol_tool_server(context: ToolContext) -> ToolServer {
    let context = Arc::new(context);
    ToolServer::new("translation_workflow")
        .version(env!("CARGO_PKG_VERSION"))
        .tool(UpdateTaskStatusTool::new(Arc::clone(&context)))
        .tool(AddTranslationBatchTool::new(context))
}

// ============================================================================
// Result mapping
// ============================================================================

/// Serialize a successful result, forcing `success: true`
pub(crate) fn success<T: Serialize>(result: &T) -> Value {
    match serde_json::to_value(result) {
        Ok(Value::Object(mut map)) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(other) => json!({ "success": true, "result": other }),
        Err(e) => json!({ "success": false, "error": format!("failed to serialize result: {e}") }),
    }
}

/// Log a rejection and turn it into the model-facing failure object
pub(crate) fn failure(tool: &str, task_id: Option<&str>, error: &ToolError) -> Value {
    warn!(tool, task_id = ?task_id, kind = ?error.kind(), error = %error, "tool call rejected");
    ProtocolLog::ToolRejected {
        tool: tool.to_string(),
        task_id: task_id.map(str::to_string),
        error: error.to_string(),
    }
    .emit();
    json!({ "success": false, "error": error.to_string() })
}
