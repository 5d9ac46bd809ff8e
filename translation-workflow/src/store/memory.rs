//! In-memory document store, used by tests and dry runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use translation_workflow_sdk::{async_trait, Book, ChapterContent, DocumentStore, StoreError};

#[derive(Debug, Default)]
struct Documents {
    books: HashMap<String, Book>,
    chapters: HashMap<String, ChapterContent>,
}

/// Document store backed by process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<Documents>>,
    fail_saves: Arc<AtomicBool>,
    chapter_loads: Arc<std::sync::atomic::AtomicUsize>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail with a backend error
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of `load_chapter_content` calls served so far
    pub fn chapter_loads(&self) -> usize {
        self.chapter_loads.load(Ordering::SeqCst)
    }

    pub async fn insert_book(&self, book: Book) {
        self.documents.write().await.books.insert(book.id.clone(), book);
    }

    pub async fn insert_chapter(&self, content: ChapterContent) {
        self.documents
            .write()
            .await
            .chapters
            .insert(content.chapter_id.clone(), content);
    }

    /// Current copy of a chapter without counting it as a protocol load
    pub async fn chapter(&self, chapter_id: &str) -> Option<ChapterContent> {
        self.documents.read().await.chapters.get(chapter_id).cloned()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::backend("simulated write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load_book(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        Ok(self.documents.read().await.books.get(book_id).cloned())
    }

    async fn load_chapter_content(
        &self,
        chapter_id: &str,
    ) -> Result<Option<ChapterContent>, StoreError> {
        self.chapter_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.read().await.chapters.get(chapter_id).cloned())
    }

    async fn save_book(&self, book: &Book) -> Result<(), StoreError> {
        self.check_writable()?;
        self.insert_book(book.clone()).await;
        Ok(())
    }

    async fn save_chapter_content(&self, content: &ChapterContent) -> Result<(), StoreError> {
        self.check_writable()?;
        self.insert_chapter(content.clone()).await;
        Ok(())
    }

    async fn save_chapter_contents(&self, contents: &[ChapterContent]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut documents = self.documents.write().await;
        for content in contents {
            documents
                .chapters
                .insert(content.chapter_id.clone(), content.clone());
        }
        Ok(())
    }
}
