use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{TaskContext, TaskError, TaskTemplate, TemplateError};

fn parse_args<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, TemplateError> {
    serde_json::from_value(args.clone()).map_err(TemplateError::InvalidArgs)
}

fn parse_args_owned<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, TaskError> {
    serde_json::from_value(args).map_err(|error| TaskError::Domain(error.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleTaskArgs {
    wait_time: u64,
    #[serde(default)]
    unique_id: i64,
}

#[derive(Debug, Serialize)]
struct ExampleTaskOutput {
    dummy_id: i64,
    dummy_slept: u64,
}

/// Sleeps `wait_time` milliseconds, then reports how long it actually slept.
pub struct ExampleTask;

#[async_trait]
impl TaskTemplate for ExampleTask {
    fn name(&self) -> &str {
        "example"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleTaskArgs>(args).map(|_| ())
    }

    async fn run(&self, args: Value, _context: &TaskContext) -> Result<Option<Value>, TaskError> {
        let args: ExampleTaskArgs = parse_args_owned(args)?;

        let started = Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(args.wait_time)).await;
        let dummy_slept = started.elapsed().as_millis() as u64;

        let output = ExampleTaskOutput {
            dummy_id: args.unique_id,
            dummy_slept,
        };

        Ok(Some(
            serde_json::to_value(output).map_err(|error| TaskError::Domain(error.to_string()))?,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleBlockedTaskArgs {
    #[serde(default)]
    webhook_request_body: Option<Value>,
}

/// Returns `None` (BLOCKED) until a webhook overwrites `webhook_request_body`.
pub struct ExampleBlockedTask;

#[async_trait]
impl TaskTemplate for ExampleBlockedTask {
    fn name(&self) -> &str {
        "example_blocked"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleBlockedTaskArgs>(args).map(|_| ())
    }

    async fn run(&self, args: Value, _context: &TaskContext) -> Result<Option<Value>, TaskError> {
        let args: ExampleBlockedTaskArgs = parse_args_owned(args)?;

        match args.webhook_request_body {
            None => Ok(None),
            Some(body) => Ok(Some(json!({"unblocked_due_to": body}))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleFailureTaskArgs {}

/// Always fails, for exercising the cascading-failure invariant.
pub struct ExampleFailureTask;

#[async_trait]
impl TaskTemplate for ExampleFailureTask {
    fn name(&self) -> &str {
        "example_failure"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleFailureTaskArgs>(args).map(|_| ())
    }

    async fn run(&self, args: Value, _context: &TaskContext) -> Result<Option<Value>, TaskError> {
        parse_args_owned::<ExampleFailureTaskArgs>(args)?;

        Err(TaskError::Domain("failed on purpose".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context() -> TaskContext {
        TaskContext {
            flow_id: Uuid::new_v4(),
            outputs: json!({}),
        }
    }

    #[tokio::test]
    async fn example_task_reports_elapsed_time() {
        let output = ExampleTask
            .run(json!({"wait_time": 5, "unique_id": 7}), &context())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output["dummy_id"], 7);
        assert!(output["dummy_slept"].as_u64().unwrap() >= 5);
    }

    #[tokio::test]
    async fn example_blocked_task_blocks_without_webhook_body() {
        let output = ExampleBlockedTask
            .run(json!({}), &context())
            .await
            .unwrap();

        assert!(output.is_none());
    }

    #[tokio::test]
    async fn example_blocked_task_unblocks_with_webhook_body() {
        let output = ExampleBlockedTask
            .run(json!({"webhook_request_body": {"ok": true}}), &context())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output["unblocked_due_to"]["ok"], true);
    }

    #[tokio::test]
    async fn example_failure_task_always_fails() {
        let result = ExampleFailureTask.run(json!({}), &context()).await;

        match result {
            Err(TaskError::Domain(message)) => assert_eq!(message, "failed on purpose"),
            _ => panic!("expected domain failure"),
        }
    }
}
