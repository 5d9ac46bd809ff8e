//! Tests for update_task_status

use std::sync::Arc;

use serde_json::json;
use translation_workflow::registry::InMemoryTaskRegistry;
use translation_workflow::tools::{
    create_protocol_tool_server, update_task_status, ErrorKind, ToolContext, ToolError,
};
use translation_workflow::tools::status::StatusInput;
use translation_workflow_sdk::{standard_tables, Phase, Task, TaskRegistry, TaskType};

use super::common::*;

fn request(status: &str) -> StatusInput {
    StatusInput {
        status: Some(status.to_string()),
        reason: None,
    }
}

fn registry_with(task: Task) -> InMemoryTaskRegistry {
    let registry = InMemoryTaskRegistry::new();
    registry.insert(task);
    registry
}

#[tokio::test]
async fn test_planning_to_review_then_working_then_review() {
    let registry = registry_with(Task::new(TASK_ID, "translation").with_phase(Phase::Planning));
    let server =
        create_protocol_tool_server(ToolContext::new(TASK_ID).with_registry(Arc::new(registry.clone())));

    let result = server
        .call("update_task_status", json!({"status": "review"}))
        .await;
    let error = error_of(&result);
    assert!(error.contains("planning → review"), "{error}");

    let result = server
        .call("update_task_status", json!({"status": "working"}))
        .await;
    assert_eq!(result["success"], json!(true));

    let result = server
        .call("update_task_status", json!({"status": "review"}))
        .await;
    assert_eq!(result["success"], json!(true));
    assert_eq!(
        registry.find(TASK_ID).unwrap().workflow_phase,
        Some(Phase::Review)
    );
}

#[tokio::test]
async fn test_illegal_repeat_fails_identically() {
    let registry = registry_with(Task::new(TASK_ID, "polish").with_phase(Phase::Working));
    let ctx = ToolContext::new(TASK_ID).with_registry(Arc::new(registry.clone()));

    let first = update_task_status(&ctx, request("review")).await.unwrap_err();
    let second = update_task_status(&ctx, request("review")).await.unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.kind(), ErrorKind::PhaseViolation);
    assert_eq!(
        registry.find(TASK_ID).unwrap().workflow_phase,
        Some(Phase::Working)
    );
}

#[tokio::test]
async fn test_tool_agrees_with_table_for_every_edge() {
    let origins: Vec<Option<Phase>> = std::iter::once(None)
        .chain(Phase::ALL.into_iter().map(Some))
        .collect();

    for task_type in TaskType::ALL {
        let table = standard_tables().table(task_type).unwrap();
        for &from in &origins {
            for to in Phase::ALL {
                let mut task = Task::new(TASK_ID, task_type.as_str());
                task.workflow_phase = from;
                let registry = registry_with(task);
                let ctx = ToolContext::new(TASK_ID).with_registry(Arc::new(registry.clone()));

                let result = update_task_status(&ctx, request(to.as_str())).await;
                assert_eq!(
                    result.is_ok(),
                    table.allows(from, to),
                    "{task_type}: {from:?} → {to}"
                );
                let expected = if result.is_ok() { Some(to) } else { from };
                assert_eq!(registry.find(TASK_ID).unwrap().workflow_phase, expected);
            }
        }
    }
}

#[tokio::test]
async fn test_end_is_terminal_for_every_type() {
    for task_type in TaskType::ALL {
        let registry = registry_with(Task::new(TASK_ID, task_type.as_str()).with_phase(Phase::End));
        let ctx = ToolContext::new(TASK_ID).with_registry(Arc::new(registry));
        for to in Phase::ALL {
            let err = update_task_status(&ctx, request(to.as_str())).await.unwrap_err();
            assert!(matches!(err, ToolError::ForbiddenTransition { .. }));
        }
    }
}

#[tokio::test]
async fn test_full_translation_walk_with_review_cycles() {
    let registry = registry_with(Task::new(TASK_ID, "translation"));
    let ctx = ToolContext::new(TASK_ID).with_registry(Arc::new(registry.clone()));

    for status in [
        "planning", "working", "review", "working", "review", "working", "review", "end",
    ] {
        update_task_status(&ctx, request(status)).await.unwrap();
    }

    let task = registry.find(TASK_ID).unwrap();
    assert_eq!(task.workflow_phase, Some(Phase::End));
    assert_eq!(task.mirror_status, Some(Phase::End));
}

#[tokio::test]
async fn test_short_types_skip_review() {
    for task_type in ["polish", "proofreading", "chapter_summary"] {
        let registry = registry_with(Task::new(TASK_ID, task_type));
        let ctx = ToolContext::new(TASK_ID).with_registry(Arc::new(registry.clone()));

        update_task_status(&ctx, request("planning")).await.unwrap();
        update_task_status(&ctx, request("working")).await.unwrap();
        let err = update_task_status(&ctx, request("review")).await.unwrap_err();
        assert!(err.to_string().contains("working → review"));
        update_task_status(&ctx, request("end")).await.unwrap();
    }
}

#[tokio::test]
async fn test_unrecognized_status_lists_phases() {
    let registry = registry_with(Task::new(TASK_ID, "translation"));
    let ctx = ToolContext::new(TASK_ID).with_registry(Arc::new(registry));

    for status in ["", "   ", "absent", "done"] {
        let err = update_task_status(&ctx, request(status)).await.unwrap_err();
        assert!(err.to_string().contains("planning, working, review, end"));
        assert_eq!(err.kind(), ErrorKind::Shape);
    }
}

#[tokio::test]
async fn test_missing_task_reports_id() {
    let registry = InMemoryTaskRegistry::new();
    let server = create_protocol_tool_server(
        ToolContext::new("ghost").with_registry(Arc::new(registry)),
    );
    let result = server
        .call("update_task_status", json!({"status": "planning"}))
        .await;
    assert!(error_of(&result).contains("ghost"));
}

#[tokio::test]
async fn test_activity_event_on_success_only() {
    let fixture = Fixture::new(Task::new(TASK_ID, "translation")).await;
    let ctx = fixture.context();

    update_task_status(&ctx, request("working")).await.unwrap_err();
    assert!(fixture.events().is_empty());

    update_task_status(&ctx, request("planning")).await.unwrap();
    let events = fixture.events();
    assert_eq!(events.len(), 1);
    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["type"], json!("update"));
    assert_eq!(value["entity"], json!("task"));
    assert_eq!(value["data"]["id"], json!(TASK_ID));
    assert_eq!(value["data"]["label"], json!("初始 → planning"));
}
