use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::record::{FlowRow, FlowStatus, TaskRow, TaskStatus};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFlowRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub name: String,
    pub ordering: i32,
    pub status: TaskStatus,
    pub args: Value,
    pub output: Value,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<TaskRow> for TaskSnapshot {
    fn from(row: TaskRow) -> Self {
        TaskSnapshot {
            id: row.id,
            name: row.name,
            ordering: row.ordering,
            status: row.status,
            args: row.args,
            output: row.output,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowSnapshot {
    pub id: Uuid,
    pub name: String,
    pub args: Value,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: FlowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub tasks: Vec<TaskSnapshot>,
}

impl FlowSnapshot {
    pub fn from_row_and_tasks(flow: FlowRow, tasks: Vec<TaskRow>) -> Self {
        let status = flow_status(&tasks);
        let output = final_output(&tasks);

        FlowSnapshot {
            id: flow.id,
            name: flow.name,
            args: flow.args,
            priority: flow.priority,
            webhook_url: flow.webhook_url,
            created_at: flow.created_at,
            status,
            output,
            tasks: tasks.into_iter().map(TaskSnapshot::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowListEntry {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub status: FlowStatus,
}

impl FlowListEntry {
    pub fn from_row_and_tasks(flow: &FlowRow, tasks: &[TaskRow]) -> Self {
        FlowListEntry {
            id: flow.id,
            name: flow.name.clone(),
            priority: flow.priority,
            created_at: flow.created_at,
            status: flow_status(tasks),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFlowsQuery {
    pub name: Option<String>,
    /// Comma-separated list of flow ids.
    pub ids: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct FlowListResponse {
    pub count: usize,
    pub flows: Vec<FlowListEntry>,
}

/// The flow status is derived, never stored: FAILURE beats PENDING beats BLOCKED,
/// and only an empty-of-those-three task list is SUCCESS.
pub fn flow_status(tasks: &[TaskRow]) -> FlowStatus {
    if tasks.iter().any(|t| t.status == TaskStatus::Failure) {
        return FlowStatus::Failure;
    }

    if tasks.iter().any(|t| t.status == TaskStatus::Pending) {
        return FlowStatus::Pending;
    }

    if tasks.iter().any(|t| t.status == TaskStatus::Blocked) {
        return FlowStatus::Blocked;
    }

    FlowStatus::Success
}

/// The flattened union of all prior tasks' JSON output objects, later tasks
/// shadowing earlier ones on key collision, plus `flow_id`.
pub fn flatten_prior_outputs(flow_id: Uuid, prior_tasks: &[TaskRow]) -> Value {
    let mut merged = serde_json::Map::new();

    for task in prior_tasks {
        if let Value::Object(map) = &task.output {
            merged.extend(map.clone());
        }
    }

    merged.insert("flow_id".to_owned(), Value::String(flow_id.to_string()));

    Value::Object(merged)
}

/// The last task's output by ordering, regardless of its status.
pub fn final_output(tasks: &[TaskRow]) -> Option<Value> {
    tasks.iter().max_by_key(|t| t.ordering).map(|t| t.output.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(ordering: i32, status: TaskStatus, output: Value) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            name: "t".to_owned(),
            ordering,
            status,
            args: serde_json::json!({}),
            output,
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_prefers_failure_over_everything() {
        let tasks = vec![
            task(0, TaskStatus::Success, serde_json::json!({})),
            task(1, TaskStatus::Failure, serde_json::json!({})),
            task(2, TaskStatus::Pending, serde_json::json!({})),
        ];

        assert_eq!(flow_status(&tasks), FlowStatus::Failure);
    }

    #[test]
    fn status_prefers_pending_over_blocked() {
        let tasks = vec![
            task(0, TaskStatus::Pending, serde_json::json!({})),
            task(1, TaskStatus::Blocked, serde_json::json!({})),
        ];

        assert_eq!(flow_status(&tasks), FlowStatus::Pending);
    }

    #[test]
    fn status_is_success_when_all_terminal_success() {
        let tasks = vec![
            task(0, TaskStatus::Success, serde_json::json!({})),
            task(1, TaskStatus::Success, serde_json::json!({})),
        ];

        assert_eq!(flow_status(&tasks), FlowStatus::Success);
    }

    #[test]
    fn flattened_outputs_let_later_tasks_shadow_earlier_ones() {
        let flow_id = Uuid::new_v4();
        let tasks = vec![
            task(0, TaskStatus::Success, serde_json::json!({"a": 1, "b": 1})),
            task(1, TaskStatus::Success, serde_json::json!({"b": 2})),
        ];

        let merged = flatten_prior_outputs(flow_id, &tasks);

        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
        assert_eq!(merged["flow_id"], flow_id.to_string());
    }

    #[test]
    fn final_output_ignores_status() {
        let tasks = vec![
            task(0, TaskStatus::Success, serde_json::json!({"x": 1})),
            task(1, TaskStatus::Pending, serde_json::json!({"y": 2})),
        ];

        assert_eq!(final_output(&tasks), Some(serde_json::json!({"y": 2})));
    }
}
