//! Tests for add_translation_batch

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use translation_workflow::store::InMemoryDocumentStore;
use translation_workflow::tools::{
    add_translation_batch, create_protocol_tool_server, ErrorKind, SubmissionProgress, ToolError,
};
use translation_workflow_sdk::{
    async_trait, ActionEntity, Book, ChapterContent, ChunkBoundaries, DocumentStore, Phase,
    StoreError, Task, TaskRegistry, TaskUpdate, Translation,
};

use super::common::*;

#[tokio::test]
async fn test_commit_appends_and_selects_new_version() {
    let fixture = Fixture::new(working_task("translation")).await;

    let result = add_translation_batch(&fixture.context(), &batch(&["para1", "para2"]))
        .await
        .unwrap();
    assert_eq!(result.processed_count, 2);
    assert_eq!(result.processed_paragraph_ids, vec!["para1", "para2"]);
    assert_eq!(result.remaining_count, None);
    assert_eq!(result.warning, None);

    let paragraph = fixture.paragraph(CHAPTER_ONE, "para1").await;
    assert_eq!(paragraph.translations.len(), 1);
    let selected = paragraph.selected_translation().unwrap();
    assert_eq!(selected.translation, "translated para1");
    assert_eq!(selected.ai_model_id, MODEL_ID);
}

#[tokio::test]
async fn test_history_is_append_only_for_every_batch_type() {
    for task_type in ["translation", "polish", "proofreading"] {
        let fixture = Fixture::new(working_task(task_type)).await;

        let mut chapter = fixture.store.chapter(CHAPTER_ONE).await.unwrap();
        let existing = Translation::new("first draft", "older-model");
        chapter
            .paragraph_mut("para3")
            .unwrap()
            .push_translation(existing.clone());
        fixture.store.insert_chapter(chapter).await;

        let result = add_translation_batch(&fixture.context(), &batch(&["para3"]))
            .await
            .unwrap();
        assert_eq!(result.task_type.as_str(), task_type);

        let paragraph = fixture.paragraph(CHAPTER_ONE, "para3").await;
        assert_eq!(paragraph.translations.len(), 2, "{task_type}");
        assert_eq!(paragraph.translations[0], existing);
        let newest = &paragraph.translations[1];
        assert_eq!(paragraph.selected_translation_id.as_deref(), Some(newest.id.as_str()));
        assert_ne!(newest.id, existing.id);
    }
}

#[tokio::test]
async fn test_requires_working_phase() {
    for phase in [Phase::Planning, Phase::Review, Phase::End] {
        let fixture = Fixture::new(working_task("translation").with_phase(phase)).await;
        let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains(phase.as_str()));
        assert_eq!(err.kind(), ErrorKind::PhaseViolation);
    }

    let fixture = Fixture::new(Task::new(TASK_ID, "translation").with_book(BOOK_ID)).await;
    let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("absent"));
}

#[tokio::test]
async fn test_registry_phase_is_authoritative() {
    let fixture = Fixture::new(working_task("translation")).await;
    fixture
        .registry
        .update(
            TASK_ID,
            TaskUpdate {
                workflow_phase: Some(Phase::Review),
                mirror_status: None,
            },
        )
        .await
        .unwrap();

    let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NotWorking(Some(Phase::Review))));
}

#[tokio::test]
async fn test_configuration_checks_come_first() {
    let fixture = Fixture::new(working_task("translation")).await;

    let mut ctx = fixture.context();
    ctx.registry = None;
    let err = add_translation_batch(&ctx, &json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::MissingRegistry));

    let mut ctx = fixture.context();
    ctx.task_id = Some("  ".to_string());
    let err = add_translation_batch(&ctx, &json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::MissingTaskId));

    let fixture = Fixture::new(Task::new(TASK_ID, "translation").with_phase(Phase::Working)).await;
    let err = add_translation_batch(&fixture.context(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::MissingBookId));
}

#[tokio::test]
async fn test_summary_tasks_cannot_submit() {
    let fixture = Fixture::new(working_task("chapter_summary")).await;
    let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("chapter_summary"));
    assert!(err.to_string().contains("translation, polish, proofreading"));
}

#[tokio::test]
async fn test_empty_or_missing_paragraphs() {
    let fixture = Fixture::new(working_task("translation")).await;
    for params in [json!({}), json!({"paragraphs": []}), json!({"paragraphs": "para1"})] {
        let err = add_translation_batch(&fixture.context(), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::EmptyBatch), "{params}");
    }
}

#[tokio::test]
async fn test_oversized_batch_reports_limit() {
    let fixture = Fixture::new(working_task("translation")).await;
    let err = add_translation_batch(&fixture.context(), &range_batch(1, 12))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("12"), "{message}");
    assert!(message.contains("limit is 11"), "{message}");
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[tokio::test]
async fn test_tolerance_band_warns_but_commits() {
    let fixture = Fixture::new(working_task("translation")).await;
    let result = add_translation_batch(&fixture.context(), &range_batch(1, 11))
        .await
        .unwrap();
    assert_eq!(result.processed_count, 11);
    let warning = result.warning.unwrap();
    assert!(warning.contains("11"));
    assert!(warning.contains("10"));
}

#[tokio::test]
async fn test_tolerance_band_still_requires_model() {
    let fixture = Fixture::new(working_task("translation")).await;
    let mut ctx = fixture.context();
    ctx.ai_model_id = None;

    let err = add_translation_batch(&ctx, &range_batch(1, 11))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::MissingModelId));
    assert!(fixture.paragraph(CHAPTER_ONE, "para1").await.translations.is_empty());
}

#[tokio::test]
async fn test_double_mode_final_batch() {
    let fixture = Fixture::new(working_task("translation")).await;
    let ids: Vec<String> = (1..=20).map(|n| format!("para{n}")).collect();
    let ctx = fixture
        .context()
        .with_boundaries(ChunkBoundaries::from_ordered(ids));

    let result = add_translation_batch(&ctx, &range_batch(1, 20)).await.unwrap();
    assert_eq!(result.processed_count, 20);
    assert_eq!(result.warning, None);
    assert_eq!(result.remaining_count, Some(0));
    assert_eq!(result.remaining_paragraph_ids, Some(Vec::new()));
}

#[tokio::test]
async fn test_no_double_mode_one_over_boundary() {
    let fixture = Fixture::new(working_task("translation")).await;
    let ids: Vec<String> = (1..=21).map(|n| format!("para{n}")).collect();
    let ctx = fixture
        .context()
        .with_boundaries(ChunkBoundaries::from_ordered(ids));

    let err = add_translation_batch(&ctx, &range_batch(1, 20)).await.unwrap_err();
    assert!(matches!(err, ToolError::BatchTooLarge { size: 20, limit: 11 }));
}

#[tokio::test]
async fn test_progress_unlocks_double_mode_and_tracks_remaining() {
    let fixture = Fixture::new(working_task("translation")).await;
    let ids: Vec<String> = (1..=25).map(|n| format!("para{n}")).collect();
    let progress = SubmissionProgress::new();
    let ctx = fixture
        .context()
        .with_boundaries(ChunkBoundaries::from_ordered(ids))
        .with_progress(progress.clone());

    let first = add_translation_batch(&ctx, &range_batch(1, 5)).await.unwrap();
    assert_eq!(first.remaining_count, Some(20));
    assert_eq!(
        first.remaining_paragraph_ids.as_ref().unwrap().first().map(String::as_str),
        Some("para6")
    );

    let second = add_translation_batch(&ctx, &range_batch(6, 25)).await.unwrap();
    assert_eq!(second.processed_count, 20);
    assert_eq!(second.remaining_count, Some(0));
    assert_eq!(progress.submitted_count(), 25);
}

#[tokio::test]
async fn test_index_only_entry_rejects_whole_batch() {
    let fixture = Fixture::new(working_task("translation")).await;
    let params = json!({"paragraphs": [
        {"paragraph_id": "para1", "translated_text": "one"},
        {"paragraph_id": "para2", "translated_text": "two"},
        {"index": 3, "translated_text": "three"},
    ]});

    let err = add_translation_batch(&fixture.context(), &params)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("paragraph_id"));
    assert!(matches!(err, ToolError::IndexOnlyEntries(ref p) if p == &vec![2]));
    assert!(fixture.paragraph(CHAPTER_ONE, "para1").await.translations.is_empty());
}

#[tokio::test]
async fn test_paragraph_id_wins_over_index() {
    let fixture = Fixture::new(working_task("translation")).await;
    let params = json!({"paragraphs": [
        {"paragraph_id": "para4", "index": 0, "translated_text": "four"},
    ]});
    let result = add_translation_batch(&fixture.context(), &params)
        .await
        .unwrap();
    assert_eq!(result.processed_paragraph_ids, vec!["para4"]);
    assert!(fixture.paragraph(CHAPTER_ONE, "para1").await.translations.is_empty());
}

#[tokio::test]
async fn test_duplicates_reject_whole_batch() {
    let fixture = Fixture::new(working_task("translation")).await;
    let err = add_translation_batch(
        &fixture.context(),
        &batch(&["para1", "para2", "para3", "para2", "para4", "para3"]),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "duplicate paragraph_id values: para2, para3");
    assert!(fixture.paragraph(CHAPTER_ONE, "para1").await.translations.is_empty());
}

#[tokio::test]
async fn test_out_of_range_names_offending_id() {
    let fixture = Fixture::new(working_task("translation")).await;
    let ctx = fixture
        .context()
        .with_boundaries(ChunkBoundaries::from_ordered(["para1", "para2"]));

    let result = create_protocol_tool_server(ctx)
        .call("add_translation_batch", batch(&["para1", "para-outside"]))
        .await;
    let error = error_of(&result);
    assert!(error.contains("para-outside"), "{error}");
    assert!(!error.contains("para1"), "{error}");
    assert!(fixture
        .paragraph(CHAPTER_TWO, "para-outside")
        .await
        .translations
        .is_empty());
}

#[tokio::test]
async fn test_missing_text_names_paragraph() {
    let fixture = Fixture::new(working_task("translation")).await;
    let params = json!({"paragraphs": [
        {"paragraph_id": "para1", "translated_text": "one"},
        {"paragraph_id": "para2"},
    ]});
    let err = add_translation_batch(&fixture.context(), &params)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("para2"));
}

#[tokio::test]
async fn test_unknown_book() {
    let fixture = Fixture::new(working_task("translation").with_book("book-404")).await;
    let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("book-404"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_target_chapter_is_loaded_alone() {
    let fixture = Fixture::new(working_task("translation").with_chapter_target(CHAPTER_TWO)).await;
    add_translation_batch(&fixture.context(), &batch(&["para-last"]))
        .await
        .unwrap();
    assert_eq!(fixture.store.chapter_loads(), 1);

    let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ParagraphsNotFound(ref ids) if ids == &vec!["para1".to_string()]));
}

#[tokio::test]
async fn test_missing_target_chapter() {
    let fixture =
        Fixture::new(working_task("translation").with_chapter_target("chapter-404")).await;
    let err = add_translation_batch(&fixture.context(), &batch(&["para1"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("chapter-404"));
}

#[tokio::test]
async fn test_whole_book_search_spans_chapters() {
    let fixture = Fixture::new(working_task("proofreading")).await;
    let result = add_translation_batch(&fixture.context(), &batch(&["para30", "para-last"]))
        .await
        .unwrap();
    assert_eq!(result.processed_count, 2);
    assert_eq!(fixture.paragraph(CHAPTER_TWO, "para-last").await.translations.len(), 1);
    assert_eq!(fixture.paragraph(CHAPTER_ONE, "para30").await.translations.len(), 1);
}

#[tokio::test]
async fn test_every_missing_paragraph_is_reported() {
    let fixture = Fixture::new(working_task("translation")).await;
    let err = add_translation_batch(&fixture.context(), &batch(&["para1", "ghost-a", "ghost-b"]))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "paragraphs not found: ghost-a, ghost-b");
    assert!(fixture.paragraph(CHAPTER_ONE, "para1").await.translations.is_empty());
}

#[tokio::test]
async fn test_store_failure_becomes_structured_error() {
    let fixture = Fixture::new(working_task("translation")).await;
    fixture.store.fail_saves(true);

    let result = create_protocol_tool_server(fixture.context())
        .call("add_translation_batch", batch(&["para1"]))
        .await;
    assert!(error_of(&result).contains("simulated write failure"));
    assert!(fixture.events().is_empty());
}

#[tokio::test]
async fn test_success_json_and_activity_event() {
    let fixture = Fixture::new(working_task("polish")).await;
    let ctx = fixture
        .context()
        .with_boundaries(ChunkBoundaries::from_ordered(["para1", "para2", "para3"]));

    let result = create_protocol_tool_server(ctx)
        .call("add_translation_batch", batch(&["para2"]))
        .await;
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["task_type"], json!("polish"));
    assert_eq!(result["processed_count"], json!(1));
    assert_eq!(result["processed_paragraph_ids"], json!(["para2"]));
    assert_eq!(result["remaining_count"], json!(2));
    assert_eq!(result["remaining_paragraph_ids"], json!(["para1", "para3"]));
    assert!(result.get("warning").is_none());

    let events = fixture.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, ActionEntity::Paragraph);
    assert_eq!(events[0].data["paragraph_ids"], json!(["para2"]));
}

/// Store whose chapter writes fail once, on the given call
struct FailOnceStore {
    inner: InMemoryDocumentStore,
    saves: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl DocumentStore for FailOnceStore {
    async fn load_book(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        self.inner.load_book(book_id).await
    }

    async fn load_chapter_content(
        &self,
        chapter_id: &str,
    ) -> Result<Option<ChapterContent>, StoreError> {
        self.inner.load_chapter_content(chapter_id).await
    }

    async fn save_book(&self, book: &Book) -> Result<(), StoreError> {
        self.inner.save_book(book).await
    }

    async fn save_chapter_content(&self, content: &ChapterContent) -> Result<(), StoreError> {
        let call = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::backend("disk full"));
        }
        self.inner.save_chapter_content(content).await
    }
}

#[tokio::test]
async fn test_failed_multi_chapter_commit_leaves_no_versions() {
    let fixture = Fixture::new(working_task("translation")).await;
    let store = Arc::new(FailOnceStore {
        inner: fixture.store.clone(),
        saves: AtomicUsize::new(0),
        fail_on: 2,
    });
    let progress = SubmissionProgress::new();
    let ctx = fixture
        .context()
        .with_store(store)
        .with_progress(progress.clone());

    let err = add_translation_batch(&ctx, &batch(&["para30", "para-last"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("disk full"));
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(fixture.paragraph(CHAPTER_ONE, "para30").await.translations.is_empty());
    assert!(fixture.paragraph(CHAPTER_TWO, "para-last").await.translations.is_empty());
    assert_eq!(progress.submitted_count(), 0);

    let retry = add_translation_batch(&ctx, &batch(&["para30", "para-last"]))
        .await
        .unwrap();
    assert_eq!(retry.processed_count, 2);
    assert_eq!(fixture.paragraph(CHAPTER_ONE, "para30").await.translations.len(), 1);
    assert_eq!(fixture.paragraph(CHAPTER_TWO, "para-last").await.translations.len(), 1);
}

#[tokio::test]
async fn test_double_mode_band_batch_carries_warning() {
    let fixture = Fixture::new(working_task("translation")).await;
    let ids: Vec<String> = (1..=20).map(|n| format!("para{n}")).collect();
    let ctx = fixture
        .context()
        .with_boundaries(ChunkBoundaries::from_ordered(ids));

    let result = add_translation_batch(&ctx, &range_batch(1, 11)).await.unwrap();
    assert_eq!(result.processed_count, 11);
    assert!(result.warning.unwrap().contains("11"));
}
