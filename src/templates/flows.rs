use serde::Deserialize;
use serde_json::{json, Value};

use super::{FlowTemplate, TaskSpec, TemplateError};

fn parse_args<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, TemplateError> {
    serde_json::from_value(args.clone()).map_err(TemplateError::InvalidArgs)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleFlowArgs {
    wait_time: u64,
}

/// Splits `wait_time` (milliseconds) across two `example` tasks, one third and two
/// thirds of the way through.
pub struct ExampleFlow;

impl FlowTemplate for ExampleFlow {
    fn name(&self) -> &str {
        "example"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleFlowArgs>(args).map(|_| ())
    }

    fn produce(&self, args: &Value) -> Result<Vec<TaskSpec>, TemplateError> {
        let args: ExampleFlowArgs = parse_args(args)?;
        let step = args.wait_time / 3;

        Ok(vec![
            TaskSpec {
                name: "example".to_owned(),
                args: json!({"wait_time": step, "unique_id": 0}),
            },
            TaskSpec {
                name: "example".to_owned(),
                args: json!({"wait_time": step * 2, "unique_id": 1}),
            },
        ])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleBlockedFlowArgs {}

/// A single task that stays `BLOCKED` until a webhook unblocks it.
pub struct ExampleBlockedFlow;

impl FlowTemplate for ExampleBlockedFlow {
    fn name(&self) -> &str {
        "example_blocked"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleBlockedFlowArgs>(args).map(|_| ())
    }

    fn produce(&self, args: &Value) -> Result<Vec<TaskSpec>, TemplateError> {
        parse_args::<ExampleBlockedFlowArgs>(args)?;

        Ok(vec![TaskSpec {
            name: "example_blocked".to_owned(),
            args: json!({}),
        }])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleFailureFlowArgs {}

/// A task that always fails, followed by one that would otherwise succeed, to
/// exercise the cascading-failure invariant.
pub struct ExampleFailureFlow;

impl FlowTemplate for ExampleFailureFlow {
    fn name(&self) -> &str {
        "example_failure"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleFailureFlowArgs>(args).map(|_| ())
    }

    fn produce(&self, args: &Value) -> Result<Vec<TaskSpec>, TemplateError> {
        parse_args::<ExampleFailureFlowArgs>(args)?;

        Ok(vec![
            TaskSpec {
                name: "example_failure".to_owned(),
                args: json!({}),
            },
            TaskSpec {
                name: "example".to_owned(),
                args: json!({"wait_time": 0, "unique_id": 1}),
            },
        ])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExampleLargeFlowArgs {
    num_of_tasks: u32,
    wait_time: u64,
}

/// `num_of_tasks` copies of the `example` task, each waiting an equal share of
/// `wait_time`. Useful for exercising ordering at larger flow sizes.
pub struct ExampleLargeFlow;

impl FlowTemplate for ExampleLargeFlow {
    fn name(&self) -> &str {
        "example_large"
    }

    fn validate_args(&self, args: &Value) -> Result<(), TemplateError> {
        parse_args::<ExampleLargeFlowArgs>(args).map(|_| ())
    }

    fn produce(&self, args: &Value) -> Result<Vec<TaskSpec>, TemplateError> {
        let args: ExampleLargeFlowArgs = parse_args(args)?;

        if args.num_of_tasks == 0 {
            return Ok(vec![]);
        }

        let delay = args.wait_time / args.num_of_tasks as u64;

        Ok((0..args.num_of_tasks)
            .map(|unique_id| TaskSpec {
                name: "example".to_owned(),
                args: json!({"wait_time": delay, "unique_id": unique_id}),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_flow_splits_wait_time_in_thirds() {
        let tasks = ExampleFlow
            .produce(&json!({"wait_time": 30}))
            .expect("produce should succeed");

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].args["wait_time"], 10);
        assert_eq!(tasks[1].args["wait_time"], 20);
    }

    #[test]
    fn example_flow_rejects_unknown_fields() {
        let result = ExampleFlow.validate_args(&json!({"wait_time": 30, "extra": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn example_large_flow_splits_evenly() {
        let tasks = ExampleLargeFlow
            .produce(&json!({"num_of_tasks": 4, "wait_time": 100}))
            .expect("produce should succeed");

        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| t.args["wait_time"] == 25));
    }

    #[test]
    fn example_failure_flow_orders_failure_task_first() {
        let tasks = ExampleFailureFlow.produce(&json!({})).unwrap();

        assert_eq!(tasks[0].name, "example_failure");
        assert_eq!(tasks[1].name, "example");
    }
}
