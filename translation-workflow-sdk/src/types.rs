//! Data types shared by the protocol, its collaborators and the CLI.
//!
//! Tasks and phases describe where a model-driven job is in its lifecycle.
//! Books, chapters and paragraphs are the document entities a batch
//! submission mutates. Everything here is plain serde data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Phases and task types
// ============================================================================

/// A named workflow phase.
///
/// The pre-creation state is not a phase; a task that has never transitioned
/// carries `None` as its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Working,
    Review,
    End,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Planning, Phase::Working, Phase::Review, Phase::End];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Working => "working",
            Phase::Review => "review",
            Phase::End => "end",
        }
    }

    /// Parse a phase name, ignoring ASCII case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Phase> {
        let value = value.trim();
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(value))
    }

    /// Comma separated list of every phase name, for error messages.
    pub fn names() -> String {
        Phase::ALL
            .iter()
            .map(|phase| phase.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display helper for an optional phase, rendering the pre-creation state as `absent`.
pub struct PhaseDisplay(pub Option<Phase>);

impl fmt::Display for PhaseDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(phase) => f.write_str(phase.as_str()),
            None => f.write_str("absent"),
        }
    }
}

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Translation,
    Polish,
    Proofreading,
    ChapterSummary,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Translation,
        TaskType::Polish,
        TaskType::Proofreading,
        TaskType::ChapterSummary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Translation => "translation",
            TaskType::Polish => "polish",
            TaskType::Proofreading => "proofreading",
            TaskType::ChapterSummary => "chapter_summary",
        }
    }

    pub fn parse(value: &str) -> Option<TaskType> {
        let value = value.trim();
        TaskType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }

    /// Task types allowed to commit paragraph text through a batch submission.
    pub fn accepts_translation_batches(self) -> bool {
        matches!(
            self,
            TaskType::Translation | TaskType::Polish | TaskType::Proofreading
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// What a task operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Book,
    Volume,
    Chapter,
}

/// An active AI task as held by the task registry.
///
/// `task_type` is kept as the raw string the scheduler supplied; whether the
/// transition tables know it is a question the protocol answers, not the
/// registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: String,

    /// `None` until the first transition.
    #[serde(default)]
    pub workflow_phase: Option<Phase>,

    #[serde(default)]
    pub book_id: Option<String>,

    #[serde(default)]
    pub target_id: Option<String>,

    #[serde(default)]
    pub target_type: Option<TargetType>,

    /// Mirrors `workflow_phase` once the task reaches `end`.
    #[serde(default)]
    pub mirror_status: Option<Phase>,
}

impl Task {
    /// A freshly scheduled task in the pre-creation state.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            workflow_phase: None,
            book_id: None,
            target_id: None,
            target_type: None,
            mirror_status: None,
        }
    }

    pub fn with_book(mut self, book_id: impl Into<String>) -> Self {
        self.book_id = Some(book_id.into());
        self
    }

    pub fn with_chapter_target(mut self, chapter_id: impl Into<String>) -> Self {
        self.target_id = Some(chapter_id.into());
        self.target_type = Some(TargetType::Chapter);
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.workflow_phase = Some(phase);
        self
    }

    pub fn kind(&self) -> Option<TaskType> {
        TaskType::parse(&self.task_type)
    }

    /// Chapter id when the task is scoped to a single chapter.
    pub fn target_chapter(&self) -> Option<&str> {
        match (self.target_type, self.target_id.as_deref()) {
            (Some(TargetType::Chapter), Some(id)) if !id.trim().is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Partial update applied by the registry; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_phase: Option<Phase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_status: Option<Phase>,
}

impl TaskUpdate {
    pub fn apply(&self, task: &mut Task) {
        if let Some(phase) = self.workflow_phase {
            task.workflow_phase = Some(phase);
        }
        if let Some(status) = self.mirror_status {
            task.mirror_status = Some(status);
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Book metadata with its volume/chapter outline. Chapter text lives in
/// [`ChapterContent`] and is loaded separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Book {
    pub fn chapters(&self) -> impl Iterator<Item = &ChapterRef> {
        self.volumes.iter().flat_map(|volume| volume.chapters.iter())
    }

    pub fn has_chapter(&self, chapter_id: &str) -> bool {
        self.chapters().any(|chapter| chapter.id == chapter_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub chapters: Vec<ChapterRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub id: String,
    pub title: String,
}

/// Paragraphs of one chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub chapter_id: String,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

impl ChapterContent {
    pub fn paragraph_mut(&mut self, paragraph_id: &str) -> Option<&mut Paragraph> {
        self.paragraphs.iter_mut().find(|p| p.id == paragraph_id)
    }

    pub fn contains(&self, paragraph_id: &str) -> bool {
        self.paragraphs.iter().any(|p| p.id == paragraph_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: String,
    pub text: String,
    /// Every translation ever committed, oldest first.
    #[serde(default)]
    pub translations: Vec<Translation>,
    #[serde(default)]
    pub selected_translation_id: Option<String>,
}

impl Paragraph {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            translations: Vec::new(),
            selected_translation_id: None,
        }
    }

    pub fn selected_translation(&self) -> Option<&Translation> {
        let selected = self.selected_translation_id.as_deref()?;
        self.translations.iter().find(|t| t.id == selected)
    }

    /// Append a new version and select it. Existing versions are never touched.
    pub fn push_translation(&mut self, translation: Translation) {
        self.selected_translation_id = Some(translation.id.clone());
        self.translations.push(translation);
    }
}

/// One historical candidate translation of a paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub id: String,
    pub translation: String,
    pub ai_model_id: String,
    pub created_at: DateTime<Utc>,
}

impl Translation {
    pub fn new(translation: impl Into<String>, ai_model_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            translation: translation.into(),
            ai_model_id: ai_model_id.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Chunk boundaries
// ============================================================================

/// Paragraph ids a translation sub-range may touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkBoundaries {
    pub allowed_paragraph_ids: HashSet<String>,
    pub ordered_paragraph_ids: Vec<String>,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

impl ChunkBoundaries {
    /// Build boundaries from the ordered ids of a sub-range.
    pub fn from_ordered<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered_paragraph_ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        Self {
            allowed_paragraph_ids: ordered_paragraph_ids.iter().cloned().collect(),
            first_id: ordered_paragraph_ids.first().cloned(),
            last_id: ordered_paragraph_ids.last().cloned(),
            ordered_paragraph_ids,
        }
    }

    pub fn allows(&self, paragraph_id: &str) -> bool {
        self.allowed_paragraph_ids.contains(paragraph_id)
    }

    pub fn len(&self) -> usize {
        self.ordered_paragraph_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_paragraph_ids.is_empty()
    }
}
