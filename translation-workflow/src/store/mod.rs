//! Document store implementations
//!
//! - **memory**: process-local store for tests and dry runs
//! - **sqlite**: persistent store with append-only translation history

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
