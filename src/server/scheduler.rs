use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::{Pool, Postgres};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::templates::registry::TemplateRegistry;
use crate::templates::{TaskContext, TaskError, TemplateError};

use super::advancer;
use super::model::{
    flatten_prior_outputs, flow_status, CreateFlowRequest, FlowListEntry, FlowListResponse,
    FlowSnapshot, ListFlowsQuery,
};
use super::pool::check_rows_updated;
use super::record::{FlowRow, FlowStatus, TaskRow, TaskStatus};

fn parse_comma_separated_ids(raw: &str) -> Result<Vec<Uuid>, SchedulerError> {
    raw.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim()
                .parse::<Uuid>()
                .map_err(|_| SchedulerError::InvalidQuery(format!("invalid flow id: {part}")))
        })
        .collect()
}

const CLAIM_ELIGIBLE_FLOW: &str = "
    SELECT * FROM flows f
    WHERE EXISTS (SELECT 1 FROM tasks t WHERE t.flow_id = f.id AND t.status = 'pending')
      AND NOT EXISTS (SELECT 1 FROM tasks t WHERE t.flow_id = f.id AND t.status = 'blocked')
    ORDER BY f.priority DESC, f.created_at ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
";

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("flow does not exist")]
    FlowDoesNotExist,
    #[error("unknown flow template: {0}")]
    UnknownTemplate(String),
    #[error("invalid flow args: {0}")]
    InvalidArgs(#[source] TemplateError),
    #[error("invalid webhook url: {0}")]
    InvalidWebhookUrl(#[source] url::ParseError),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("database query error: {0}")]
    DatabaseQuery(#[source] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum UnblockError {
    #[error("flow does not exist")]
    FlowDoesNotExist,
    #[error("flow already unblocked")]
    AlreadyUnblocked,
    #[error("database query error: {0}")]
    DatabaseQuery(#[source] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("flow does not exist")]
    FlowDoesNotExist,
    #[error("flow has no failed tasks to retry")]
    NoFailedTasks,
    #[error("database query error: {0}")]
    DatabaseQuery(#[source] sqlx::Error),
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event")]
pub enum SchedulerEvent {
    FlowCreated {
        flow_id: Uuid,
    },
    TaskStatusUpdate {
        flow_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    },
}

fn db_err(error: sqlx::Error) -> SchedulerError {
    tracing::error!(%error, "database query error");
    SchedulerError::DatabaseQuery(error)
}

/// Outcome of advancing exactly one task in one claimed flow, used by the tick loop
/// to decide whether to notify a webhook. The webhook body is the full flow snapshot,
/// matching what a client polling `GET /flows/{id}` would see.
pub struct TickOutcome {
    pub flow_id: Uuid,
    pub webhook: Option<(FlowSnapshot, String)>,
}

#[derive(Clone)]
pub struct Scheduler {
    pool: Pool<Postgres>,
    registry: Arc<TemplateRegistry>,
    tx: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(pool: Pool<Postgres>, registry: Arc<TemplateRegistry>) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { pool, registry, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    async fn fetch_tasks(&self, flow_id: Uuid) -> Result<Vec<TaskRow>, SchedulerError> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE flow_id = $1 ORDER BY ordering")
            .bind(flow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    #[tracing::instrument(skip(self))]
    pub async fn healthcheck(&self) -> Result<(), sqlx::Error> {
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn create_flow(
        &self,
        request: CreateFlowRequest,
    ) -> Result<FlowSnapshot, SchedulerError> {
        let template = self
            .registry
            .get_flow(&request.name)
            .ok_or_else(|| SchedulerError::UnknownTemplate(request.name.clone()))?;

        template
            .validate_args(&request.args)
            .map_err(SchedulerError::InvalidArgs)?;

        if let Some(webhook_url) = &request.webhook_url {
            url::Url::parse(webhook_url).map_err(SchedulerError::InvalidWebhookUrl)?;
        }

        let task_specs = template
            .produce(&request.args)
            .map_err(SchedulerError::InvalidArgs)?;

        let flow_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO flows (id, name, args, priority, webhook_url) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(flow_id)
        .bind(&request.name)
        .bind(&request.args)
        .bind(request.priority)
        .bind(&request.webhook_url)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (ordering, spec) in task_specs.into_iter().enumerate() {
            sqlx::query(
                "INSERT INTO tasks (id, flow_id, name, ordering, status, args) \
                 VALUES ($1, $2, $3, $4, 'pending', $5)",
            )
            .bind(Uuid::new_v4())
            .bind(flow_id)
            .bind(spec.name)
            .bind(ordering as i32)
            .bind(spec.args)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        let _ = self.tx.send(SchedulerEvent::FlowCreated { flow_id });

        self.get_flow(flow_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_flow(&self, flow_id: Uuid) -> Result<FlowSnapshot, SchedulerError> {
        let flow = sqlx::query_as::<_, FlowRow>("SELECT * FROM flows WHERE id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(SchedulerError::FlowDoesNotExist)?;

        let tasks = self.fetch_tasks(flow_id).await?;

        Ok(FlowSnapshot::from_row_and_tasks(flow, tasks))
    }

    #[tracing::instrument(skip(self, filter))]
    pub async fn list_flows(
        &self,
        filter: ListFlowsQuery,
    ) -> Result<FlowListResponse, SchedulerError> {
        let ids = filter
            .ids
            .as_deref()
            .map(parse_comma_separated_ids)
            .transpose()?;

        let mut builder = sqlx::QueryBuilder::<Postgres>::new("SELECT * FROM flows WHERE 1 = 1");

        if let Some(name) = &filter.name {
            builder.push(" AND name = ").push_bind(name);
        }

        if let Some(ids) = &ids {
            builder.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
        }

        if let Some(created_from) = &filter.created_from {
            builder.push(" AND created_at >= ").push_bind(*created_from);
        }

        if let Some(created_to) = &filter.created_to {
            builder.push(" AND created_at <= ").push_bind(*created_to);
        }

        if let Some(priority) = filter.priority {
            builder.push(" AND priority = ").push_bind(priority);
        }

        builder.push(" ORDER BY created_at DESC");

        let flows = builder
            .build_query_as::<FlowRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut entries = Vec::with_capacity(flows.len());

        for flow in flows {
            let tasks = self.fetch_tasks(flow.id).await?;
            entries.push(FlowListEntry::from_row_and_tasks(&flow, &tasks));
        }

        Ok(FlowListResponse {
            count: entries.len(),
            flows: entries,
        })
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn unblock_task(
        &self,
        flow_id: Uuid,
        payload: Value,
    ) -> Result<FlowSnapshot, UnblockError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            tracing::error!(%e, "database query error");
            UnblockError::DatabaseQuery(e)
        })?;

        let blocked_task = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE flow_id = $1 AND status = 'blocked' \
             ORDER BY ordering LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .bind(flow_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(%e, "database query error");
            UnblockError::DatabaseQuery(e)
        })?;

        let Some(task) = blocked_task else {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM flows WHERE id = $1)")
                .bind(flow_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    tracing::error!(%e, "database query error");
                    UnblockError::DatabaseQuery(e)
                })?;

            return Err(if exists {
                UnblockError::AlreadyUnblocked
            } else {
                UnblockError::FlowDoesNotExist
            });
        };

        let args = json!({"webhook_request_body": payload});

        let rows_updated = sqlx::query(
            "UPDATE tasks SET args = $1, status = 'pending', updated_at = now() WHERE id = $2",
        )
        .bind(args)
        .bind(task.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(%e, "database query error");
            UnblockError::DatabaseQuery(e)
        })?
        .rows_affected();

        check_rows_updated(rows_updated, UnblockError::FlowDoesNotExist)?;

        tx.commit().await.map_err(|e| {
            tracing::error!(%e, "database query error");
            UnblockError::DatabaseQuery(e)
        })?;

        let _ = self.tx.send(SchedulerEvent::TaskStatusUpdate {
            flow_id,
            task_id: task.id,
            status: TaskStatus::Pending,
        });

        self.get_flow(flow_id).await.map_err(|error| match error {
            SchedulerError::FlowDoesNotExist => UnblockError::FlowDoesNotExist,
            SchedulerError::DatabaseQuery(e) => UnblockError::DatabaseQuery(e),
            other => UnblockError::DatabaseQuery(sqlx::Error::Protocol(other.to_string())),
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn retry_failed_tasks(&self, flow_id: Uuid) -> Result<FlowSnapshot, RetryError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            tracing::error!(%e, "database query error");
            RetryError::DatabaseQuery(e)
        })?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM flows WHERE id = $1)")
            .bind(flow_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(%e, "database query error");
                RetryError::DatabaseQuery(e)
            })?;

        if !exists {
            return Err(RetryError::FlowDoesNotExist);
        }

        let rows_updated = sqlx::query(
            "UPDATE tasks SET status = 'pending', output = '{}', started_at = NULL, \
             finished_at = NULL, updated_at = now() WHERE flow_id = $1 AND status = 'failure'",
        )
        .bind(flow_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(%e, "database query error");
            RetryError::DatabaseQuery(e)
        })?
        .rows_affected();

        check_rows_updated(rows_updated, RetryError::NoFailedTasks)?;

        tx.commit().await.map_err(|e| {
            tracing::error!(%e, "database query error");
            RetryError::DatabaseQuery(e)
        })?;

        self.get_flow(flow_id).await.map_err(|error| match error {
            SchedulerError::FlowDoesNotExist => RetryError::FlowDoesNotExist,
            SchedulerError::DatabaseQuery(e) => RetryError::DatabaseQuery(e),
            other => RetryError::DatabaseQuery(sqlx::Error::Protocol(other.to_string())),
        })
    }

    /// Claims one eligible flow under `FOR UPDATE SKIP LOCKED` and advances it by
    /// exactly one task, holding the row lock for the duration of that task's
    /// execution so no other replica can claim the same flow concurrently.
    #[tracing::instrument(skip(self))]
    pub async fn advance_one_eligible_flow(&self) -> Result<Option<TickOutcome>, SchedulerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let flow = sqlx::query_as::<_, FlowRow>(CLAIM_ELIGIBLE_FLOW)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let Some(flow) = flow else {
            tx.commit().await.map_err(db_err)?;
            return Ok(None);
        };

        let tasks = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE flow_id = $1 ORDER BY ordering",
        )
        .bind(flow.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(next) = advancer::find_next_task(&tasks).cloned() else {
            tx.commit().await.map_err(db_err)?;
            return Ok(None);
        };

        let prior_outputs: Vec<TaskRow> = tasks
            .iter()
            .filter(|t| t.ordering < next.ordering)
            .cloned()
            .collect();

        let context = TaskContext {
            flow_id: flow.id,
            outputs: flatten_prior_outputs(flow.id, &prior_outputs),
        };

        sqlx::query(
            "UPDATE tasks SET started_at = now(), updated_at = now(), finished_at = NULL \
             WHERE id = $1",
        )
        .bind(next.id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let run_result = match self.registry.get_task(&next.name) {
            Some(task_template) => task_template.run(next.args.clone(), &context).await,
            None => Err(TaskError::Domain(format!(
                "unknown task template: {}",
                next.name
            ))),
        };

        let (status, output) = match run_result {
            Ok(Some(value)) => (TaskStatus::Success, value),
            Ok(None) => (TaskStatus::Blocked, json!({})),
            Err(TaskError::Domain(message)) => (TaskStatus::Failure, json!({"error": message})),
            Err(TaskError::Internal(error)) => {
                tracing::error!(%error, task_id = %next.id, "task failed internally");
                (TaskStatus::Failure, json!({"error": "internal server error"}))
            }
        };

        if status.is_terminal() {
            sqlx::query(
                "UPDATE tasks SET status = $1, output = $2, updated_at = now(), finished_at = now() \
                 WHERE id = $3",
            )
            .bind(status)
            .bind(&output)
            .bind(next.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        } else {
            sqlx::query("UPDATE tasks SET status = $1, output = $2, updated_at = now() WHERE id = $3")
                .bind(status)
                .bind(&output)
                .bind(next.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        if status == TaskStatus::Failure {
            let downstream: Vec<TaskRow> = tasks
                .iter()
                .filter(|t| t.ordering > next.ordering)
                .cloned()
                .collect();

            for task_id in advancer::cascade_failure_targets(&downstream) {
                sqlx::query("UPDATE tasks SET status = 'failure' WHERE id = $1")
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;

        let _ = self.tx.send(SchedulerEvent::TaskStatusUpdate {
            flow_id: flow.id,
            task_id: next.id,
            status,
        });

        let all_tasks = self.fetch_tasks(flow.id).await?;
        let webhook = if flow_status(&all_tasks) == FlowStatus::Success {
            flow.webhook_url.clone().map(|url| {
                let snapshot = FlowSnapshot::from_row_and_tasks(flow.clone(), all_tasks);
                (snapshot, url)
            })
        } else {
            None
        };

        Ok(Some(TickOutcome {
            flow_id: flow.id,
            webhook,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::pool::get_test_pool;
    use serde_json::json;
    use serial_test::serial;

    async fn test_scheduler() -> Scheduler {
        let pool = get_test_pool(&["tasks", "flows"]).await;
        Scheduler::new(pool, Arc::new(crate::templates::registry::default_registry()))
    }

    #[tokio::test]
    #[serial]
    async fn create_and_fetch_flow_round_trips() {
        let scheduler = test_scheduler().await;

        let snapshot = scheduler
            .create_flow(CreateFlowRequest {
                name: "example".to_owned(),
                args: json!({"wait_time": 0}),
                priority: 0,
                webhook_url: None,
            })
            .await
            .unwrap();

        assert_eq!(snapshot.tasks.len(), 2);
        assert_eq!(snapshot.status, FlowStatus::Pending);
    }

    #[tokio::test]
    #[serial]
    async fn create_flow_rejects_unknown_template() {
        let scheduler = test_scheduler().await;

        let result = scheduler
            .create_flow(CreateFlowRequest {
                name: "does_not_exist".to_owned(),
                args: json!({}),
                priority: 0,
                webhook_url: None,
            })
            .await;

        assert!(matches!(result, Err(SchedulerError::UnknownTemplate(_))));
    }

    #[tokio::test]
    #[serial]
    async fn advancing_runs_tasks_to_completion_and_reports_webhook() {
        let scheduler = test_scheduler().await;

        let flow_id = scheduler
            .create_flow(CreateFlowRequest {
                name: "example".to_owned(),
                args: json!({"wait_time": 0}),
                priority: 0,
                webhook_url: Some("https://example.invalid/hook".to_owned()),
            })
            .await
            .unwrap()
            .id;

        let first = scheduler.advance_one_eligible_flow().await.unwrap().unwrap();
        assert_eq!(first.flow_id, flow_id);
        assert!(first.webhook.is_none());

        let second = scheduler.advance_one_eligible_flow().await.unwrap().unwrap();
        assert!(second.webhook.is_some());

        let snapshot = scheduler.get_flow(flow_id).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Success);
    }

    #[tokio::test]
    #[serial]
    async fn failure_cascades_to_downstream_pending_tasks() {
        let scheduler = test_scheduler().await;

        let flow_id = scheduler
            .create_flow(CreateFlowRequest {
                name: "example_failure".to_owned(),
                args: json!({}),
                priority: 0,
                webhook_url: None,
            })
            .await
            .unwrap()
            .id;

        scheduler.advance_one_eligible_flow().await.unwrap();

        let snapshot = scheduler.get_flow(flow_id).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Failure);
        assert!(snapshot.tasks.iter().all(|t| t.status == TaskStatus::Failure));
    }

    #[tokio::test]
    #[serial]
    async fn blocked_flow_is_never_claimed_until_unblocked() {
        let scheduler = test_scheduler().await;

        let flow_id = scheduler
            .create_flow(CreateFlowRequest {
                name: "example_blocked".to_owned(),
                args: json!({}),
                priority: 0,
                webhook_url: None,
            })
            .await
            .unwrap()
            .id;

        scheduler.advance_one_eligible_flow().await.unwrap();
        assert!(scheduler.advance_one_eligible_flow().await.unwrap().is_none());

        scheduler
            .unblock_task(flow_id, json!({"ok": true}))
            .await
            .unwrap();

        scheduler.advance_one_eligible_flow().await.unwrap();

        let snapshot = scheduler.get_flow(flow_id).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Success);
    }

    #[tokio::test]
    #[serial]
    async fn retry_failed_tasks_resets_failures_to_pending() {
        let scheduler = test_scheduler().await;

        let flow_id = scheduler
            .create_flow(CreateFlowRequest {
                name: "example_failure".to_owned(),
                args: json!({}),
                priority: 0,
                webhook_url: None,
            })
            .await
            .unwrap()
            .id;

        scheduler.advance_one_eligible_flow().await.unwrap();

        scheduler.retry_failed_tasks(flow_id).await.unwrap();

        let snapshot = scheduler.get_flow(flow_id).await.unwrap();
        assert!(snapshot.tasks.iter().any(|t| t.status == TaskStatus::Pending));

        let retry_again = scheduler.retry_failed_tasks(Uuid::new_v4()).await;
        assert!(matches!(retry_again, Err(RetryError::FlowDoesNotExist)));
    }

    #[tokio::test]
    #[serial]
    async fn list_flows_filters_by_ids_and_reports_count() {
        let scheduler = test_scheduler().await;

        let a = scheduler
            .create_flow(CreateFlowRequest {
                name: "example".to_owned(),
                args: json!({"wait_time": 0}),
                priority: 0,
                webhook_url: None,
            })
            .await
            .unwrap()
            .id;

        scheduler
            .create_flow(CreateFlowRequest {
                name: "example".to_owned(),
                args: json!({"wait_time": 0}),
                priority: 0,
                webhook_url: None,
            })
            .await
            .unwrap();

        let response = scheduler
            .list_flows(ListFlowsQuery {
                ids: Some(a.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.count, 1);
        assert_eq!(response.flows[0].id, a);
    }

    #[tokio::test]
    #[serial]
    async fn list_flows_rejects_malformed_ids() {
        let scheduler = test_scheduler().await;

        let result = scheduler
            .list_flows(ListFlowsQuery {
                ids: Some("not-a-uuid".to_owned()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(SchedulerError::InvalidQuery(_))));
    }

    #[tokio::test]
    #[serial]
    async fn healthcheck_succeeds_against_live_pool() {
        let scheduler = test_scheduler().await;
        scheduler.healthcheck().await.unwrap();
    }
}
