//! Common fixtures for protocol tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use translation_workflow::registry::InMemoryTaskRegistry;
use translation_workflow::store::InMemoryDocumentStore;
use translation_workflow::tools::ToolContext;
use translation_workflow_sdk::{
    ActionEvent, Book, ChapterContent, ChapterRef, Paragraph, Phase, Task, Volume,
};

pub const BOOK_ID: &str = "book-1";
pub const CHAPTER_ONE: &str = "chapter-1";
pub const CHAPTER_TWO: &str = "chapter-2";
pub const MODEL_ID: &str = "model-x";
pub const TASK_ID: &str = "task-1";

/// Paragraph ids of chapter one: `para1` .. `para30`
pub fn chapter_one_ids() -> Vec<String> {
    (1..=30).map(|n| format!("para{n}")).collect()
}

pub fn sample_book() -> Book {
    Book {
        id: BOOK_ID.to_string(),
        title: "The Old Man and the Sea".to_string(),
        volumes: vec![Volume {
            id: "volume-1".to_string(),
            title: "Volume 1".to_string(),
            chapters: vec![
                ChapterRef {
                    id: CHAPTER_ONE.to_string(),
                    title: "Chapter 1".to_string(),
                },
                ChapterRef {
                    id: CHAPTER_TWO.to_string(),
                    title: "Chapter 2".to_string(),
                },
            ],
        }],
    }
}

pub fn chapter_one() -> ChapterContent {
    ChapterContent {
        chapter_id: CHAPTER_ONE.to_string(),
        paragraphs: chapter_one_ids()
            .into_iter()
            .map(|id| {
                let text = format!("Original text of {id}");
                Paragraph::new(id, text)
            })
            .collect(),
    }
}

pub fn chapter_two() -> ChapterContent {
    ChapterContent {
        chapter_id: CHAPTER_TWO.to_string(),
        paragraphs: vec![
            Paragraph::new("para-outside", "A paragraph in another chapter"),
            Paragraph::new("para-last", "The last paragraph"),
        ],
    }
}

/// A working-phase task on the sample book
pub fn working_task(task_type: &str) -> Task {
    Task::new(TASK_ID, task_type)
        .with_book(BOOK_ID)
        .with_phase(Phase::Working)
}

/// Registry, store and an activity log wired together
pub struct Fixture {
    pub registry: InMemoryTaskRegistry,
    pub store: InMemoryDocumentStore,
    pub events: Arc<Mutex<Vec<ActionEvent>>>,
}

impl Fixture {
    pub async fn new(task: Task) -> Self {
        let registry = InMemoryTaskRegistry::new();
        registry.insert(task);

        let store = InMemoryDocumentStore::new();
        store.insert_book(sample_book()).await;
        store.insert_chapter(chapter_one()).await;
        store.insert_chapter(chapter_two()).await;

        Self {
            registry,
            store,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tool context with registry, store, model id and activity sink
    pub fn context(&self) -> ToolContext {
        let events = Arc::clone(&self.events);
        ToolContext::new(TASK_ID)
            .with_registry(Arc::new(self.registry.clone()))
            .with_store(Arc::new(self.store.clone()))
            .with_model(MODEL_ID)
            .on_action(Arc::new(move |event: &ActionEvent| {
                events.lock().unwrap().push(event.clone());
            }))
    }

    pub fn events(&self) -> Vec<ActionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub async fn paragraph(&self, chapter_id: &str, paragraph_id: &str) -> Paragraph {
        self.store
            .chapter(chapter_id)
            .await
            .unwrap()
            .paragraphs
            .into_iter()
            .find(|p| p.id == paragraph_id)
            .unwrap()
    }
}

/// `{"paragraphs": [...]}` with one translated entry per id
pub fn batch(ids: &[&str]) -> Value {
    let entries: Vec<Value> = ids
        .iter()
        .map(|id| json!({"paragraph_id": id, "translated_text": format!("translated {id}")}))
        .collect();
    json!({ "paragraphs": entries })
}

/// Batch over `para{from}` ..= `para{to}`
pub fn range_batch(from: usize, to: usize) -> Value {
    let ids: Vec<String> = (from..=to).map(|n| format!("para{n}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    batch(&refs)
}

pub fn error_of(result: &Value) -> String {
    assert_eq!(result["success"], json!(false), "expected failure: {result}");
    result["error"].as_str().unwrap_or_default().to_string()
}
