use std::time::Duration;

use crate::server::model::FlowSnapshot;
use crate::server::scheduler::Scheduler;

#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    num_of_retries: u32,
    pause_between_retries: Duration,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration, num_of_retries: u32, pause_between_retries: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client config should always be valid");

        Self {
            client,
            num_of_retries,
            pause_between_retries,
        }
    }

    /// Reports a completed flow to its webhook URL with the full flow snapshot as
    /// the body, retrying only on timeout, up to `num_of_retries` attempts, pausing
    /// `pause_between_retries` between attempts. Any other error aborts immediately
    /// without retry.
    #[tracing::instrument(skip(self, snapshot), fields(flow_id = %snapshot.id))]
    pub async fn notify(&self, snapshot: &FlowSnapshot, webhook_url: &str) {
        let flow_id = snapshot.id;

        for attempt in 0..self.num_of_retries {
            let result = self.client.post(webhook_url).json(snapshot).send().await;

            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(%flow_id, attempt, "webhook delivered");
                    return;
                }
                Ok(response) => {
                    tracing::warn!(%flow_id, attempt, status = %response.status(), "webhook rejected, not retrying");
                    return;
                }
                Err(error) if error.is_timeout() => {
                    tracing::warn!(%flow_id, attempt, "webhook timed out");

                    if attempt + 1 < self.num_of_retries {
                        tokio::time::sleep(self.pause_between_retries).await;
                    }
                }
                Err(error) => {
                    tracing::warn!(%flow_id, %error, "webhook failed, not retrying");
                    return;
                }
            }
        }

        tracing::warn!(%flow_id, "webhook exhausted all retries");
    }
}

pub fn spawn_webhook_task(notifier: WebhookNotifier, snapshot: FlowSnapshot, webhook_url: String) {
    tokio::spawn(async move {
        notifier.notify(&snapshot, &webhook_url).await;
    });
}

/// Advances one eligible flow by one task, firing its webhook if that completed it.
/// Returns `true` if a flow was found to advance, so the tick loop can keep
/// draining eligible work before it sleeps again.
pub async fn tick_once(scheduler: &Scheduler, webhooks: &WebhookNotifier) -> bool {
    match scheduler.advance_one_eligible_flow().await {
        Ok(Some(outcome)) => {
            if let Some((snapshot, webhook_url)) = outcome.webhook {
                spawn_webhook_task(webhooks.clone(), snapshot, webhook_url);
            }
            true
        }
        Ok(None) => false,
        Err(error) => {
            tracing::error!(%error, "tick failed, will retry on next timer");
            false
        }
    }
}
