//! SQLite document store
//!
//! Persists books, their volume/chapter outline, chapter paragraphs and the
//! full translation history of every paragraph.
//!
//! # Database Schema
//!
//! 1. **books** - book id and title
//! 2. **volumes** - ordered volumes of a book
//! 3. **chapters** - ordered chapters of a volume
//! 4. **paragraphs** - ordered paragraphs of a chapter plus the selected translation id
//! 5. **translations** - append-only translation versions per paragraph
//! 6. **schema_version** - schema version for migrations
//!
//! Translation rows are only ever inserted. Saving a chapter never updates or
//! deletes a version of a paragraph the chapter still contains, so history
//! stays append-only even when a stale copy of the chapter is written back.
//! A paragraph left out of the saved chapter is deleted together with its
//! versions.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use translation_workflow::store::SqliteDocumentStore;
//! use translation_workflow_sdk::DocumentStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = SqliteDocumentStore::open("library.db")?;
//! store.initialize_schema()?;
//!
//! if let Some(content) = store.load_chapter_content("chapter-1").await? {
//!     println!("{} paragraphs", content.paragraphs.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use translation_workflow_sdk::{
    async_trait, Book, ChapterContent, ChapterRef, DocumentStore, Paragraph, StoreError,
    Translation, Volume,
};

const SCHEMA_VERSION: i32 = 1;

/// Document store wrapper around a single SQLite connection
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Open (or create) a database file at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
            }
        }

        let conn = Connection::open(path).map_err(StoreError::backend)?;

        // WAL for concurrent readers while a batch commits
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::backend)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::backend)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for tests and dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize database schema with all tables and indexes
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS volumes (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                title TEXT NOT NULL,
                position INTEGER NOT NULL,

                FOREIGN KEY(book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS chapters (
                id TEXT PRIMARY KEY,
                volume_id TEXT NOT NULL,
                title TEXT NOT NULL,
                position INTEGER NOT NULL,

                FOREIGN KEY(volume_id) REFERENCES volumes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS paragraphs (
                id TEXT PRIMARY KEY,
                chapter_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                selected_translation_id TEXT,

                FOREIGN KEY(chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS translations (
                id TEXT PRIMARY KEY,
                paragraph_id TEXT NOT NULL,
                translation TEXT NOT NULL,
                ai_model_id TEXT NOT NULL,
                created_at TEXT NOT NULL,

                FOREIGN KEY(paragraph_id) REFERENCES paragraphs(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_volumes_book ON volumes(book_id, position);
            CREATE INDEX IF NOT EXISTS idx_chapters_volume ON chapters(volume_id, position);
            CREATE INDEX IF NOT EXISTS idx_paragraphs_chapter ON paragraphs(chapter_id, position);
            CREATE INDEX IF NOT EXISTS idx_translations_paragraph ON translations(paragraph_id);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .map_err(StoreError::backend)?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(StoreError::backend)?;

        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        self.conn()
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(StoreError::backend)
    }

    /// Every translation version of a paragraph, oldest first
    pub fn translation_history(&self, paragraph_id: &str) -> Result<Vec<Translation>, StoreError> {
        let conn = self.conn();
        read_translations(&conn, paragraph_id)
    }

    fn write_book(&self, book: &Book) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::backend)?;

        tx.execute(
            r#"
            INSERT INTO books (id, title) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title
            "#,
            params![book.id, book.title],
        )
        .map_err(StoreError::backend)?;

        // Volumes and chapters dropped from the outline take their content with them
        let volume_ids: Vec<&str> = book.volumes.iter().map(|v| v.id.as_str()).collect();
        delete_missing(&tx, "volumes", "book_id", &book.id, &volume_ids)?;

        for (position, volume) in book.volumes.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO volumes (id, book_id, title, position) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    book_id = excluded.book_id,
                    title = excluded.title,
                    position = excluded.position
                "#,
                params![volume.id, book.id, volume.title, position],
            )
            .map_err(StoreError::backend)?;

            let chapter_ids: Vec<&str> = volume.chapters.iter().map(|c| c.id.as_str()).collect();
            delete_missing(&tx, "chapters", "volume_id", &volume.id, &chapter_ids)?;

            for (position, chapter) in volume.chapters.iter().enumerate() {
                tx.execute(
                    r#"
                    INSERT INTO chapters (id, volume_id, title, position) VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        volume_id = excluded.volume_id,
                        title = excluded.title,
                        position = excluded.position
                    "#,
                    params![chapter.id, volume.id, chapter.title, position],
                )
                .map_err(StoreError::backend)?;
            }
        }

        tx.commit().map_err(StoreError::backend)
    }

    fn read_book(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        let conn = self.conn();

        let title: Option<String> = conn
            .query_row(
                "SELECT title FROM books WHERE id = ?1",
                params![book_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)?;
        let Some(title) = title else {
            return Ok(None);
        };

        let mut volume_stmt = conn
            .prepare("SELECT id, title FROM volumes WHERE book_id = ?1 ORDER BY position ASC")
            .map_err(StoreError::backend)?;
        let volume_rows = volume_stmt
            .query_map(params![book_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;

        let mut chapter_stmt = conn
            .prepare("SELECT id, title FROM chapters WHERE volume_id = ?1 ORDER BY position ASC")
            .map_err(StoreError::backend)?;

        let mut volumes = Vec::with_capacity(volume_rows.len());
        for (id, title) in volume_rows {
            let chapters = chapter_stmt
                .query_map(params![id], |row| {
                    Ok(ChapterRef {
                        id: row.get(0)?,
                        title: row.get(1)?,
                    })
                })
                .map_err(StoreError::backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::backend)?;
            volumes.push(Volume { id, title, chapters });
        }

        Ok(Some(Book {
            id: book_id.to_string(),
            title,
            volumes,
        }))
    }

    /// Write chapters in one transaction; nothing is kept if any write fails
    fn write_chapters(&self, contents: &[ChapterContent]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::backend)?;
        for content in contents {
            write_chapter_in(&tx, content)?;
        }
        tx.commit().map_err(StoreError::backend)
    }

    fn read_chapter(&self, chapter_id: &str) -> Result<Option<ChapterContent>, StoreError> {
        let conn = self.conn();

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM chapters WHERE id = ?1)",
                params![chapter_id],
                |row| row.get(0),
            )
            .map_err(StoreError::backend)?;
        if !exists {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, text, selected_translation_id
                FROM paragraphs
                WHERE chapter_id = ?1
                ORDER BY position ASC
                "#,
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params![chapter_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;

        let mut paragraphs = Vec::with_capacity(rows.len());
        for (id, text, selected_translation_id) in rows {
            let translations = read_translations(&conn, &id)?;
            paragraphs.push(Paragraph {
                id,
                text,
                translations,
                selected_translation_id,
            });
        }

        Ok(Some(ChapterContent {
            chapter_id: chapter_id.to_string(),
            paragraphs,
        }))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load_book(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        self.read_book(book_id)
    }

    async fn load_chapter_content(
        &self,
        chapter_id: &str,
    ) -> Result<Option<ChapterContent>, StoreError> {
        self.read_chapter(chapter_id)
    }

    async fn save_book(&self, book: &Book) -> Result<(), StoreError> {
        self.write_book(book)
    }

    async fn save_chapter_content(&self, content: &ChapterContent) -> Result<(), StoreError> {
        self.write_chapters(std::slice::from_ref(content))
    }

    async fn save_chapter_contents(&self, contents: &[ChapterContent]) -> Result<(), StoreError> {
        self.write_chapters(contents)
    }
}

// Helper functions for mapping between database and Rust types

/// Replace a chapter's paragraphs and insert any new translation versions
fn write_chapter_in(tx: &Transaction, content: &ChapterContent) -> Result<(), StoreError> {
    let chapter_exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM chapters WHERE id = ?1)",
            params![content.chapter_id],
            |row| row.get(0),
        )
        .map_err(StoreError::backend)?;
    if !chapter_exists {
        return Err(StoreError::NotFound {
            entity: "chapter",
            id: content.chapter_id.clone(),
        });
    }

    let paragraph_ids: Vec<&str> = content.paragraphs.iter().map(|p| p.id.as_str()).collect();
    delete_missing(tx, "paragraphs", "chapter_id", &content.chapter_id, &paragraph_ids)?;

    for (position, paragraph) in content.paragraphs.iter().enumerate() {
        tx.execute(
            r#"
            INSERT INTO paragraphs (id, chapter_id, position, text, selected_translation_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                chapter_id = excluded.chapter_id,
                position = excluded.position,
                text = excluded.text,
                selected_translation_id = excluded.selected_translation_id
            "#,
            params![
                paragraph.id,
                content.chapter_id,
                position,
                paragraph.text,
                paragraph.selected_translation_id,
            ],
        )
        .map_err(StoreError::backend)?;

        for translation in &paragraph.translations {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO translations
                    (id, paragraph_id, translation, ai_model_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    translation.id,
                    paragraph.id,
                    translation.translation,
                    translation.ai_model_id,
                    translation.created_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::backend)?;
        }
    }

    Ok(())
}

/// Delete child rows of `parent_id` whose ids are not in `keep`
fn delete_missing(
    conn: &Connection,
    table: &str,
    parent_column: &str,
    parent_id: &str,
    keep: &[&str],
) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare(&format!("SELECT id FROM {table} WHERE {parent_column} = ?1"))
        .map_err(StoreError::backend)?;
    let existing = stmt
        .query_map(params![parent_id], |row| row.get::<_, String>(0))
        .map_err(StoreError::backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::backend)?;

    for id in existing.iter().filter(|id| !keep.contains(&id.as_str())) {
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
            .map_err(StoreError::backend)?;
    }
    Ok(())
}

fn read_translations(conn: &Connection, paragraph_id: &str) -> Result<Vec<Translation>, StoreError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT id, translation, ai_model_id, created_at
            FROM translations
            WHERE paragraph_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .map_err(StoreError::backend)?;

    let translations = stmt
        .query_map(params![paragraph_id], map_translation_row)
        .map_err(StoreError::backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::backend)?;
    Ok(translations)
}

/// Map a database row to Translation
fn map_translation_row(row: &Row) -> rusqlite::Result<Translation> {
    let created_at_str: String = row.get(3)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(Translation {
        id: row.get(0)?,
        translation: row.get(1)?,
        ai_model_id: row.get(2)?,
        created_at,
    })
}
