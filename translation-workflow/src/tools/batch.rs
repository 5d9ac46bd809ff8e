//! `add_translation_batch`: commit model translations as new paragraph versions

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use translation_workflow_sdk::{
    async_trait, ActionEntity, ActionEvent, ActionType, ChapterContent, Phase, ProtocolLog,
    TaskType, Translation,
};

use super::{failure, success, ProtocolTool, ToolContext, ToolError};

pub const TOOL_NAME: &str = "add_translation_batch";

/// Batch capacity settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Normal number of paragraphs per batch
    pub max_batch: usize,
    /// Multiplier for the tolerated overshoot above `max_batch`
    pub tolerance_factor: f64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch: 10,
            tolerance_factor: 1.1,
        }
    }
}

impl BatchLimits {
    /// `ceil(max_batch × tolerance_factor)`, rounded to six decimals first so
    /// that `10 × 1.1` is 11 and not 12
    pub fn tolerated_max(&self) -> usize {
        let product = self.max_batch as f64 * self.tolerance_factor;
        let product = (product * 1e6).round() / 1e6;
        (product.ceil() as usize).max(self.max_batch)
    }

    pub fn double_max(&self) -> usize {
        self.max_batch * 2
    }
}

/// How many paragraphs the next batch may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchAllowance {
    pub hard_max: usize,
    pub double_mode: bool,
}

/// Decide the capacity of the next batch.
///
/// Once what is left of the chunk fits in two normal batches, one oversized
/// final batch of up to `2 × max_batch` is allowed. Otherwise the cap is the
/// tolerated maximum.
pub fn calculate_allowed_batch_size(
    limits: &BatchLimits,
    chunk_total: Option<usize>,
    submitted_count: Option<usize>,
) -> BatchAllowance {
    let normal = BatchAllowance {
        hard_max: limits.tolerated_max(),
        double_mode: false,
    };

    let total = match chunk_total {
        Some(total) if total > 0 => total,
        _ => return normal,
    };
    let remaining = total.saturating_sub(submitted_count.unwrap_or(0));
    if remaining > limits.double_max() {
        return normal;
    }

    BatchAllowance {
        hard_max: limits.double_max(),
        double_mode: true,
    }
}

/// Successful batch commit, as returned to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchCommitted {
    pub task_type: TaskType,
    pub processed_count: usize,
    pub processed_paragraph_ids: Vec<String>,
    /// Only computed when chunk boundaries are known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_paragraph_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BatchEntry {
    paragraph_id: String,
    translated_text: String,
}

fn field<'a>(entry: &'a Value, key: &str) -> Option<&'a Value> {
    entry.get(key).filter(|value| !value.is_null())
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Shape checks over the raw entries, in protocol order
fn parse_entries(entries: &[Value]) -> Result<Vec<BatchEntry>, ToolError> {
    let index_only: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| field(entry, "paragraph_id").is_none() && field(entry, "index").is_some())
        .map(|(position, _)| position)
        .collect();
    if !index_only.is_empty() {
        return Err(ToolError::IndexOnlyEntries(index_only));
    }

    let ids = entries
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            non_empty_str(field(entry, "paragraph_id"))
                .map(str::to_string)
                .ok_or(ToolError::InvalidParagraphId(position))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let parsed = entries
        .iter()
        .zip(ids)
        .map(|(entry, paragraph_id)| match field(entry, "translated_text").and_then(Value::as_str) {
            Some(text) if !text.trim().is_empty() => Ok(BatchEntry {
                paragraph_id,
                translated_text: text.to_string(),
            }),
            _ => Err(ToolError::MissingTranslatedText(paragraph_id)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    for entry in &parsed {
        if !seen.insert(entry.paragraph_id.as_str()) && !duplicates.contains(&entry.paragraph_id) {
            duplicates.push(entry.paragraph_id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ToolError::DuplicateParagraphIds(duplicates));
    }

    Ok(parsed)
}

/// Validate a batch and commit it as new translation versions.
///
/// Every check runs before anything is written; the first failure wins.
pub async fn add_translation_batch(
    ctx: &ToolContext,
    params: &Value,
) -> Result<BatchCommitted, ToolError> {
    let registry = ctx.registry()?;
    let task_id = ctx.task_id()?;
    let task = registry
        .find(task_id)
        .ok_or_else(|| ToolError::TaskNotFound(task_id.to_string()))?;

    if task.workflow_phase != Some(Phase::Working) {
        return Err(ToolError::NotWorking(task.workflow_phase));
    }

    let book_id = match task.book_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(ToolError::MissingBookId),
    };

    let task_type = task
        .kind()
        .filter(|kind| kind.accepts_translation_batches())
        .ok_or_else(|| ToolError::BatchNotSupported(task.task_type.clone()))?;

    let raw_entries = match params.get("paragraphs").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => entries,
        _ => return Err(ToolError::EmptyBatch),
    };

    let chunk_total = ctx.chunk_boundaries.as_ref().map(|b| b.len());
    let allowance = calculate_allowed_batch_size(
        &ctx.limits,
        chunk_total,
        Some(ctx.progress.submitted_count()),
    );
    if raw_entries.len() > allowance.hard_max {
        return Err(ToolError::BatchTooLarge {
            size: raw_entries.len(),
            limit: allowance.hard_max,
        });
    }
    // Tolerance band over the normal cap, in either mode
    let in_band = raw_entries.len() > ctx.limits.max_batch
        && raw_entries.len() <= ctx.limits.tolerated_max();
    let warning = in_band.then(|| {
        format!(
            "batch of {} paragraphs exceeds the recommended size of {}; keep later batches at {} or fewer",
            raw_entries.len(),
            ctx.limits.max_batch,
            ctx.limits.max_batch
        )
    });

    let entries = parse_entries(raw_entries)?;

    if let Some(boundaries) = &ctx.chunk_boundaries {
        let outside: Vec<String> = entries
            .iter()
            .filter(|entry| !boundaries.allows(&entry.paragraph_id))
            .map(|entry| entry.paragraph_id.clone())
            .collect();
        if !outside.is_empty() {
            return Err(ToolError::OutOfRange(outside));
        }
    }

    let model_id = match ctx.ai_model_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(ToolError::MissingModelId),
    };

    let store = ctx.store.as_ref().ok_or(ToolError::MissingStore)?;
    let book = store
        .load_book(&book_id)
        .await?
        .ok_or_else(|| ToolError::BookNotFound(book_id.clone()))?;

    let chapter_ids: Vec<String> = match task.target_chapter() {
        Some(chapter_id) => vec![chapter_id.to_string()],
        None => book.chapters().map(|chapter| chapter.id.clone()).collect(),
    };
    if book.chapters().next().is_none() {
        return Err(ToolError::NoChapters(book_id));
    }

    let mut contents: Vec<ChapterContent> = Vec::with_capacity(chapter_ids.len());
    for chapter_id in &chapter_ids {
        match store.load_chapter_content(chapter_id).await? {
            Some(content) => contents.push(content),
            None if task.target_chapter().is_some() => {
                return Err(ToolError::ChapterNotFound(chapter_id.clone()))
            }
            None => debug!(chapter_id = %chapter_id, "chapter has no stored content"),
        }
    }

    let mut location: HashMap<&str, usize> = HashMap::new();
    let mut missing = Vec::new();
    for entry in &entries {
        match contents.iter().position(|c| c.contains(&entry.paragraph_id)) {
            Some(index) => {
                location.insert(entry.paragraph_id.as_str(), index);
            }
            None => missing.push(entry.paragraph_id.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ToolError::ParagraphsNotFound(missing));
    }

    let mut touched = vec![false; contents.len()];
    for entry in &entries {
        let Some(&index) = location.get(entry.paragraph_id.as_str()) else {
            continue;
        };
        if let Some(paragraph) = contents[index].paragraph_mut(&entry.paragraph_id) {
            paragraph.push_translation(Translation::new(&entry.translated_text, &model_id));
            touched[index] = true;
        }
    }
    let changed: Vec<ChapterContent> = contents
        .into_iter()
        .zip(touched)
        .filter_map(|(content, touched)| touched.then_some(content))
        .collect();
    store.save_chapter_contents(&changed).await?;

    let processed: Vec<String> = entries.iter().map(|e| e.paragraph_id.clone()).collect();
    ctx.progress.record(&processed);

    let remaining = ctx.chunk_boundaries.as_ref().map(|boundaries| {
        boundaries
            .ordered_paragraph_ids
            .iter()
            .filter(|id| !ctx.progress.contains(id))
            .cloned()
            .collect::<Vec<_>>()
    });

    if let Some(warning) = &warning {
        warn!(task_id, warning = %warning, "oversized batch accepted");
    }
    info!(
        task_id,
        task_type = %task_type,
        processed = processed.len(),
        remaining = ?remaining.as_ref().map(Vec::len),
        "translation batch committed"
    );
    ProtocolLog::BatchCommitted {
        task_id: task_id.to_string(),
        task_type,
        processed: processed.len(),
        remaining: remaining.as_ref().map(Vec::len),
    }
    .emit();

    ctx.notify(ActionEvent {
        action_type: ActionType::Update,
        entity: ActionEntity::Paragraph,
        data: json!({
            "task_id": task_id,
            "paragraph_ids": processed,
            "ai_model_id": model_id,
        }),
    });

    Ok(BatchCommitted {
        task_type,
        processed_count: processed.len(),
        processed_paragraph_ids: processed,
        remaining_count: remaining.as_ref().map(Vec::len),
        remaining_paragraph_ids: remaining,
        warning,
    })
}

/// [`add_translation_batch`] exposed as a callable tool
pub struct AddTranslationBatchTool {
    context: Arc<ToolContext>,
}

impl AddTranslationBatchTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ProtocolTool for AddTranslationBatchTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Submit translated paragraphs for the current task. Only allowed in the working phase. \
         Every entry needs paragraph_id and translated_text; each becomes a new selected version."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paragraphs": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "paragraph_id": {"type": "string"},
                            "translated_text": {"type": "string"}
                        },
                        "required": ["paragraph_id", "translated_text"]
                    }
                }
            },
            "required": ["paragraphs"]
        })
    }

    async fn call(&self, params: Value) -> Value {
        match add_translation_batch(&self.context, &params).await {
            Ok(committed) => success(&committed),
            Err(e) => failure(TOOL_NAME, self.context.task_id.as_deref(), &e),
        }
    }
}
