//! Streaming phase/content validation
//!
//! - **scanner**: pure tolerant scan of a growing buffer for phase and content signals
//! - **validator**: per-attempt state machine that judges each signal against the transition tables
//! - **consumer**: drives a chunk stream through a validator and records text to the registry

pub mod consumer;
pub mod scanner;
pub mod validator;

pub use consumer::{drive_stream, spawn_stream_recorder, ConsumeError, StreamRecord, StreamSummary};
pub use scanner::{scan, Scan, Signal};
pub use validator::{
    create_stream_validator, StreamChunk, StreamState, StreamValidator, StreamValidatorConfig,
    StreamViolation,
};
