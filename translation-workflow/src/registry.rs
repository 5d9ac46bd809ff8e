//! In-memory task registry
//!
//! Holds active tasks plus their append-only thinking/output logs. Clones
//! share the same underlying maps, so one registry can be handed to the
//! tools, the stream recorder and the scheduler at the same time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use translation_workflow_sdk::{async_trait, RegistryError, Task, TaskRegistry, TaskUpdate};

#[derive(Debug, Default)]
struct Entry {
    task: Option<Task>,
    thinking: Vec<String>,
    output: Vec<String>,
}

/// Process-local registry of active tasks
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any task with the same id
    pub fn insert(&self, task: Task) {
        let id = task.id.clone();
        write_lock(&self.entries).entry(id).or_default().task = Some(task);
    }

    /// Ids of every registered task
    pub fn task_ids(&self) -> Vec<String> {
        read_lock(&self.entries)
            .iter()
            .filter(|(_, entry)| entry.task.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn thinking_log(&self, task_id: &str) -> Vec<String> {
        read_lock(&self.entries)
            .get(task_id)
            .map(|entry| entry.thinking.clone())
            .unwrap_or_default()
    }

    pub fn output_log(&self, task_id: &str) -> Vec<String> {
        read_lock(&self.entries)
            .get(task_id)
            .map(|entry| entry.output.clone())
            .unwrap_or_default()
    }
}

// Poisoning is ignored: every write is a single insert or push.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    fn find(&self, task_id: &str) -> Option<Task> {
        read_lock(&self.entries)
            .get(task_id)
            .and_then(|entry| entry.task.clone())
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<(), RegistryError> {
        let mut entries = write_lock(&self.entries);
        let task = entries
            .get_mut(task_id)
            .and_then(|entry| entry.task.as_mut())
            .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
        update.apply(task);
        Ok(())
    }

    async fn append_thinking(&self, task_id: &str, text: &str) {
        let mut entries = write_lock(&self.entries);
        entries
            .entry(task_id.to_string())
            .or_default()
            .thinking
            .push(text.to_string());
    }

    async fn append_output(&self, task_id: &str, text: &str) {
        let mut entries = write_lock(&self.entries);
        entries
            .entry(task_id.to_string())
            .or_default()
            .output
            .push(text.to_string());
    }
}
