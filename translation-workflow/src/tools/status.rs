//! `update_task_status`: move a task along its transition table

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use translation_workflow_sdk::{
    async_trait, standard_tables, ActionEntity, ActionEvent, ActionType, Phase, ProtocolLog,
    TaskType, TaskUpdate,
};

use super::{failure, success, ProtocolTool, ToolContext, ToolError};

pub const TOOL_NAME: &str = "update_task_status";

/// Label used in activity events for a task that has no phase yet
const INITIAL_LABEL: &str = "初始";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusInput {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl StatusInput {
    /// Read tool parameters without rejecting them.
    ///
    /// A non-string `status` is kept as its JSON text and rejected later by
    /// the phase check, after the registry and task checks have run.
    pub fn from_params(params: &Value) -> Self {
        let field = |key: &str| {
            params
                .get(key)
                .filter(|value| !value.is_null())
                .map(|value| match value.as_str() {
                    Some(text) => text.to_string(),
                    None => value.to_string(),
                })
        };
        Self {
            status: field("status"),
            reason: field("reason"),
        }
    }
}

/// Successful status change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdated {
    pub message: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Phase>,
    pub current: Phase,
}

/// Validate and apply a phase change.
///
/// Checks run in a fixed order and the first failure is returned: registry,
/// task id, task lookup, requested phase, task type, then the edge itself.
pub async fn update_task_status(
    ctx: &ToolContext,
    input: StatusInput,
) -> Result<StatusUpdated, ToolError> {
    let registry = ctx.registry()?;
    let task_id = ctx.task_id()?;
    let task = registry
        .find(task_id)
        .ok_or_else(|| ToolError::TaskNotFound(task_id.to_string()))?;

    let raw_status = input.status.unwrap_or_default();
    let requested = Phase::parse(raw_status.trim()).ok_or_else(|| ToolError::InvalidStatus {
        status: raw_status.clone(),
        expected: Phase::names(),
    })?;

    let task_type = TaskType::parse(&task.task_type)
        .ok_or_else(|| ToolError::UnknownTaskType(task.task_type.clone()))?;
    let table = standard_tables()
        .table(task_type)
        .ok_or_else(|| ToolError::UnknownTaskType(task.task_type.clone()))?;

    let current = task.workflow_phase;
    if !table.allows(current, requested) {
        return Err(ToolError::ForbiddenTransition {
            task_type,
            from: current,
            to: requested,
        });
    }

    let update = TaskUpdate {
        workflow_phase: Some(requested),
        mirror_status: (requested == Phase::End).then_some(Phase::End),
    };
    registry
        .update(task_id, update)
        .await
        .map_err(|e| ToolError::UpdateFailed {
            task_id: task_id.to_string(),
            message: e.to_string(),
        })?;

    let label = format!(
        "{} → {}",
        current.map(Phase::as_str).unwrap_or(INITIAL_LABEL),
        requested
    );
    info!(task_id, transition = %label, reason = ?input.reason, "task phase changed");
    ProtocolLog::PhaseChanged {
        task_id: task_id.to_string(),
        from: current,
        to: requested,
    }
    .emit();

    ctx.notify(ActionEvent {
        action_type: ActionType::Update,
        entity: ActionEntity::Task,
        data: json!({ "id": task_id, "label": label }),
    });

    Ok(StatusUpdated {
        message: format!("Task {task_id} status updated: {label}"),
        task_id: task_id.to_string(),
        previous: current,
        current: requested,
    })
}

/// [`update_task_status`] exposed as a callable tool
pub struct UpdateTaskStatusTool {
    context: Arc<ToolContext>,
}

impl UpdateTaskStatusTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ProtocolTool for UpdateTaskStatusTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Move the current task to another workflow phase (planning, working, review, end). \
         Only transitions allowed for the task's type are accepted."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": Phase::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>()
                },
                "reason": {"type": "string"}
            },
            "required": ["status"]
        })
    }

    async fn call(&self, params: Value) -> Value {
        let task_id = self.context.task_id.as_deref();
        let input = StatusInput::from_params(&params);
        match update_task_status(&self.context, input).await {
            Ok(updated) => success(&updated),
            Err(e) => failure(TOOL_NAME, task_id, &e),
        }
    }
}
