//! Stream consumption: feeding chunks through a validator and recording text

use std::sync::Arc;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use translation_workflow_sdk::{Phase, TaskRegistry};

use super::validator::{StreamChunk, StreamValidator, StreamViolation};

/// Text headed for one of the registry's logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    Thinking(String),
    Output(String),
}

/// Forward records to the registry in arrival order.
///
/// The recorder ends once every sender is dropped.
pub fn spawn_stream_recorder(
    task_id: String,
    registry: Arc<dyn TaskRegistry>,
    mut receiver: UnboundedReceiver<StreamRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = receiver.recv().await {
            match record {
                StreamRecord::Thinking(text) => registry.append_thinking(&task_id, &text).await,
                StreamRecord::Output(text) => registry.append_output(&task_id, &text).await,
            }
        }
        debug!(task_id = %task_id, "stream recorder finished");
    })
}

/// Why consumption stopped early
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Violation(#[from] StreamViolation),

    #[error("stream transport failed: {0}")]
    Transport(String),

    #[error("stream cancelled")]
    Cancelled,
}

/// What a fully validated stream produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: usize,
    pub text: String,
    pub final_phase: Option<Phase>,
}

/// Consume `stream` through `validator` until it ends or is rejected.
///
/// A violation cancels the validator's abort token before it is returned,
/// so whoever owns the model request sees the cancellation. A stream that
/// ends without a `done` chunk is still treated as complete.
pub async fn drive_stream<S, E>(
    stream: S,
    validator: &mut StreamValidator,
) -> Result<StreamSummary, ConsumeError>
where
    S: Stream<Item = Result<StreamChunk, E>>,
    E: std::fmt::Display,
{
    let abort = validator.abort_handle();
    let mut stream = Box::pin(stream);
    let mut summary = StreamSummary {
        chunks: 0,
        text: String::new(),
        final_phase: validator.current_phase(),
    };

    loop {
        let next = tokio::select! {
            _ = abort.cancelled() => return Err(ConsumeError::Cancelled),
            next = stream.next() => next,
        };
        let Some(item) = next else {
            break;
        };

        let chunk = item.map_err(|e| ConsumeError::Transport(e.to_string()))?;
        summary.chunks += 1;

        if let Err(violation) = validator.on_chunk(&chunk) {
            warn!(error = %violation, "aborting model stream");
            abort.cancel();
            return Err(violation.into());
        }

        summary.text.push_str(&chunk.text);
        if chunk.done {
            break;
        }
    }

    summary.final_phase = validator.current_phase();
    debug!(
        chunks = summary.chunks,
        chars = summary.text.len(),
        "stream consumed"
    );
    Ok(summary)
}
