use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(sqlx::Type, Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failure => write!(f, "failure"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Derived, never stored. See [`crate::server::model::flow_status`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    Success,
    Failure,
    Blocked,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlowStatus::Pending => write!(f, "pending"),
            FlowStatus::Success => write!(f, "success"),
            FlowStatus::Failure => write!(f, "failure"),
            FlowStatus::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct FlowRow {
    pub id: Uuid,
    pub name: String,
    pub args: serde_json::Value,
    pub priority: i32,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub name: String,
    pub ordering: i32,
    pub status: TaskStatus,
    pub args: serde_json::Value,
    pub output: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
