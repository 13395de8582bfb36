pub mod flows;
pub mod registry;
pub mod tasks;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown template {0}")]
    UnknownTemplate(String),
    #[error("invalid args: {0}")]
    InvalidArgs(#[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0}")]
    Domain(String),
    #[error("internal server error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// One task to be inserted into a flow, in order, by [`FlowTemplate::produce`].
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub args: Value,
}

/// Context handed to a running task: the flattened union of all prior tasks' output
/// in this flow plus `flow_id`. Never persisted.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub flow_id: uuid::Uuid,
    pub outputs: Value,
}

pub trait FlowTemplate: Send + Sync {
    fn name(&self) -> &str;
    fn validate_args(&self, args: &Value) -> Result<(), TemplateError>;
    fn produce(&self, args: &Value) -> Result<Vec<TaskSpec>, TemplateError>;
}

#[async_trait]
pub trait TaskTemplate: Send + Sync {
    fn name(&self) -> &str;
    fn validate_args(&self, args: &Value) -> Result<(), TemplateError>;
    async fn run(&self, args: Value, context: &TaskContext) -> Result<Option<Value>, TaskError>;
}

const _: () = {
    fn _assert_flow_template_object_safe(_: &dyn FlowTemplate) {}
    fn _assert_task_template_object_safe(_: &dyn TaskTemplate) {}
};
