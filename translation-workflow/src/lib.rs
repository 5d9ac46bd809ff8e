// Protocol configuration
pub mod config;

// In-memory task registry
pub mod registry;

// Document stores (memory, SQLite)
pub mod store;

// Streaming phase/content validation
pub mod stream;

// update_task_status and add_translation_batch
pub mod tools;

// Command-line interface
pub mod cli;

pub use translation_workflow_sdk as sdk;
