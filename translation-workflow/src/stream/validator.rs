//! Per-chunk phase/content gate for streamed model output
//!
//! One [`StreamValidator`] is built per task attempt. Every chunk is appended
//! to the pending buffer, the buffer is scanned for phase and content
//! signals, and each signal is checked against the same transition table the
//! status tool uses. The validator advances only its own copy of the phase;
//! the registry stays the system of record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use translation_workflow_sdk::{
    standard_tables, Phase, PhaseDisplay, ProtocolLog, Task, TaskRegistry, TaskType,
    TransitionTable,
};

use super::consumer::{spawn_stream_recorder, StreamRecord};
use super::scanner::{scan, Signal};

/// One piece of streamed model output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }

    pub fn last(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: true,
        }
    }
}

/// A stream that must not be consumed any further
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamViolation {
    #[error(
        "forbidden phase transition {} → {requested} for {task_type} task {task_id}",
        PhaseDisplay(*.current)
    )]
    ForbiddenTransition {
        task_id: String,
        task_type: TaskType,
        current: Option<Phase>,
        requested: Phase,
    },

    #[error("phase/content mismatch: task {task_id} emitted content while in the planning phase")]
    ContentDuringPlanning { task_id: String },

    #[error("unknown task type '{task_type}' for task {task_id}")]
    UnknownTaskType { task_id: String, task_type: String },

    #[error("stream for task {task_id} already finished")]
    StreamFinished { task_id: String },
}

/// Mutable per-stream state
#[derive(Debug, Clone)]
pub struct StreamState {
    pub current_phase: Option<Phase>,
    pub task_type: TaskType,
    pub pending_buffer: String,
}

/// Everything a validator needs for one task attempt
#[derive(Clone)]
pub struct StreamValidatorConfig {
    pub task_id: String,
    pub task_type: String,
    pub current_phase: Option<Phase>,
    /// Receives thinking/output text; recording never blocks validation
    pub registry: Option<Arc<dyn TaskRegistry>>,
    /// Cancels the underlying model request
    pub abort: CancellationToken,
}

impl StreamValidatorConfig {
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        current_phase: Option<Phase>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            current_phase,
            registry: None,
            abort: CancellationToken::new(),
        }
    }

    /// Snapshot the task's phase as the stream's starting phase
    pub fn for_task(task: &Task) -> Self {
        Self::new(task.id.clone(), task.task_type.clone(), task.workflow_phase)
    }

    pub fn with_registry(mut self, registry: Arc<dyn TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }
}

/// Incremental validator for one stream
pub struct StreamValidator {
    task_id: String,
    table: &'static TransitionTable,
    state: StreamState,
    recorder: Option<UnboundedSender<StreamRecord>>,
    abort: CancellationToken,
    violation: Option<StreamViolation>,
    finished: bool,
}

impl std::fmt::Debug for StreamValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamValidator")
            .field("task_id", &self.task_id)
            .field("state", &self.state)
            .field("violation", &self.violation)
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamValidator {
    /// Build a validator. Fails when the task type has no transition table.
    ///
    /// With a registry configured and a tokio runtime available, a recorder
    /// task is spawned that forwards accepted text to the registry logs.
    pub fn new(config: StreamValidatorConfig) -> Result<Self, StreamViolation> {
        let unknown = || StreamViolation::UnknownTaskType {
            task_id: config.task_id.clone(),
            task_type: config.task_type.clone(),
        };
        let task_type = TaskType::parse(&config.task_type).ok_or_else(unknown)?;
        let table = standard_tables().table(task_type).ok_or_else(unknown)?;

        let recorder = match (&config.registry, tokio::runtime::Handle::try_current()) {
            (Some(registry), Ok(_)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                spawn_stream_recorder(config.task_id.clone(), Arc::clone(registry), rx);
                Some(tx)
            }
            (Some(_), Err(_)) => {
                warn!(task_id = %config.task_id, "no tokio runtime; stream text will not be recorded");
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            task_id: config.task_id,
            table,
            state: StreamState {
                current_phase: config.current_phase,
                task_type,
                pending_buffer: String::new(),
            },
            recorder,
            abort: config.abort,
            violation: None,
            finished: false,
        })
    }

    /// Use an existing channel for recording instead of spawning a recorder
    pub fn with_recorder(mut self, recorder: UnboundedSender<StreamRecord>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.state.current_phase
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Validate one chunk.
    ///
    /// Once a violation has been reported every later call returns it again.
    /// Chunks arriving after the attempt was cancelled are ignored.
    pub fn on_chunk(&mut self, chunk: &StreamChunk) -> Result<(), StreamViolation> {
        if let Some(violation) = &self.violation {
            return Err(violation.clone());
        }
        if self.finished {
            return Err(StreamViolation::StreamFinished {
                task_id: self.task_id.clone(),
            });
        }
        if self.abort.is_cancelled() {
            debug!(task_id = %self.task_id, "stream cancelled; chunk ignored");
            return Ok(());
        }

        self.state.pending_buffer.push_str(&chunk.text);

        loop {
            let result = scan(&self.state.pending_buffer);
            self.state.pending_buffer.drain(..result.consumed);
            let Some(signal) = result.signal else {
                break;
            };
            if let Err(violation) = self.apply(signal) {
                return Err(self.fail(violation));
            }
        }

        self.record(&chunk.text);

        if chunk.done {
            self.finished = true;
            self.state.pending_buffer.clear();
            debug!(
                task_id = %self.task_id,
                phase = %PhaseDisplay(self.state.current_phase),
                "stream validated"
            );
        }

        Ok(())
    }

    /// Wrap the validator in a chunk callback
    pub fn into_callback(mut self) -> impl FnMut(StreamChunk) -> Result<(), StreamViolation> {
        move |chunk| self.on_chunk(&chunk)
    }

    fn apply(&mut self, signal: Signal) -> Result<(), StreamViolation> {
        let current = self.state.current_phase;
        match signal {
            Signal::Phase(requested) => {
                // Re-announcing the current phase is not a transition
                if current == Some(requested) {
                    return Ok(());
                }
                if !self.table.allows(current, requested) {
                    return Err(StreamViolation::ForbiddenTransition {
                        task_id: self.task_id.clone(),
                        task_type: self.state.task_type,
                        current,
                        requested,
                    });
                }
                self.state.current_phase = Some(requested);
                debug!(
                    task_id = %self.task_id,
                    from = %PhaseDisplay(current),
                    to = %requested,
                    "stream phase advanced"
                );
                ProtocolLog::StreamPhaseAdvanced {
                    task_id: self.task_id.clone(),
                    from: current,
                    to: requested,
                }
                .emit();
                Ok(())
            }
            Signal::Content => {
                if current == Some(Phase::Planning) {
                    return Err(StreamViolation::ContentDuringPlanning {
                        task_id: self.task_id.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    fn fail(&mut self, violation: StreamViolation) -> StreamViolation {
        warn!(task_id = %self.task_id, error = %violation, "stream rejected");
        ProtocolLog::StreamViolation {
            task_id: self.task_id.clone(),
            error: violation.to_string(),
        }
        .emit();
        self.violation = Some(violation.clone());
        violation
    }

    fn record(&self, text: &str) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let record = match self.state.current_phase {
            None | Some(Phase::Planning) => StreamRecord::Thinking(text.to_string()),
            Some(_) => StreamRecord::Output(text.to_string()),
        };
        // A closed recorder only loses log lines
        let _ = recorder.send(record);
    }
}

/// Build a chunk callback for one task attempt
pub fn create_stream_validator(
    config: StreamValidatorConfig,
) -> Result<impl FnMut(StreamChunk) -> Result<(), StreamViolation>, StreamViolation> {
    Ok(StreamValidator::new(config)?.into_callback())
}
