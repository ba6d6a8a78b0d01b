use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::error::{AttemptOutcome, FailureReason};
use crate::registry::SubscriptionRegistry;
use crate::types::{now_ms, ContentType, SubscriptionId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Response bodies are captured for audit, bounded to this many bytes.
const MAX_RESPONSE_CAPTURE: usize = 4 * 1024;

/// A unit of work consumed by workers: one delivery attempt for one
/// subscription.
///
/// The body is the exact bytes encoded at dispatch time; retries
/// carry the same `Task` back through the queue, so the receiver sees
/// byte-identical payloads on every attempt.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub subscription_id: SubscriptionId,
    pub content_type: ContentType,
    pub body: Vec<u8>,
    /// 1-based attempt ordinal within the delivery sequence.
    pub attempt: u32,
}

/// Result of a single executed attempt, reported to the scheduler.
#[derive(Debug)]
pub(crate) struct AttemptReport {
    pub task: Task,
    pub outcome: AttemptOutcome,
    /// Completion time, used for attempt records and the
    /// subscription's last-attempt timestamp.
    pub completed_at: u64,
}

/// Shared, read-only context for all workers.
pub(crate) struct WorkerContext {
    /// Global in-flight concurrency limiter.
    pub global_semaphore: Semaphore,

    /// Consulted before every send; a deleted subscription cancels
    /// the task without producing a record.
    pub registry: Arc<SubscriptionRegistry>,

    /// Reports from workers to the scheduler.
    pub report_tx: mpsc::Sender<AttemptReport>,

    /// Bound on each HTTP send.
    pub request_timeout: Duration,

    pub http_client: reqwest::Client,
}

/// Main worker loop.
///
/// Each worker pulls tasks from the shared ready queue, performs the
/// HTTP send under the global concurrency cap, and reports the
/// classified outcome. Workers exit when the queue closes.
pub(crate) async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Task>>>, ctx: Arc<WorkerContext>) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(task) = task else { break };

        if let Some(report) = process_task(task, &ctx).await {
            let _ = ctx.report_tx.send(report).await;
        }
    }
}

/// Execute a single delivery attempt.
///
/// Returns `None` when the subscription no longer exists: the task is
/// a cancelled retry (or a queued first attempt that lost the race
/// with a delete) and must leave no attempt record.
async fn process_task(task: Task, ctx: &WorkerContext) -> Option<AttemptReport> {
    let Some(subscription) = ctx.registry.get(&task.subscription_id).await else {
        tracing::debug!(subscription = %task.subscription_id, "subscription gone, dropping task");
        metric_inc("webhook.delivery.cancelled");
        return None;
    };

    let permit = match ctx.global_semaphore.acquire().await {
        Ok(p) => p,
        Err(_) => return None,
    };

    let outcome = deliver(
        &ctx.http_client,
        &subscription.target_url,
        task.content_type,
        &task.body,
        ctx.request_timeout,
    )
    .await;

    // Release before reporting so a slow scheduler never holds up
    // other sends.
    drop(permit);

    match &outcome {
        AttemptOutcome::Delivered { status, .. } => {
            tracing::debug!(
                subscription = %task.subscription_id,
                attempt = task.attempt,
                status,
                "delivered"
            );
            metric_inc("webhook.delivery.success");
        }
        AttemptOutcome::Failed { reason, status, .. } => {
            tracing::debug!(
                subscription = %task.subscription_id,
                attempt = task.attempt,
                ?status,
                %reason,
                "delivery failed"
            );
            metric_inc("webhook.delivery.failure");
        }
    }

    Some(AttemptReport {
        task,
        outcome,
        completed_at: now_ms(),
    })
}

/// POST the payload and classify the response.
///
/// 2xx is success; timeouts, connection failures, 408, 429 and 5xx
/// are retryable; every other status is a definitive rejection.
async fn deliver(
    client: &reqwest::Client,
    url: &str,
    content_type: ContentType,
    body: &[u8],
    timeout: Duration,
) -> AttemptOutcome {
    let response = client
        .post(url)
        .header("Content-Type", content_type.mime())
        .body(body.to_vec())
        .timeout(timeout)
        .send()
        .await;

    match response {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let response_content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = truncate_capture(resp.text().await.unwrap_or_default());

            if (200..300).contains(&status) {
                AttemptOutcome::Delivered {
                    status,
                    body,
                    content_type: response_content_type,
                }
            } else {
                let reason = if retryable_status(status) {
                    FailureReason::RemoteError
                } else {
                    FailureReason::Rejected
                };
                AttemptOutcome::Failed {
                    reason,
                    status: Some(status),
                    body,
                    content_type: response_content_type,
                }
            }
        }
        Err(err) => {
            let reason = if err.is_timeout() {
                FailureReason::Timeout
            } else {
                FailureReason::Network
            };
            AttemptOutcome::Failed {
                reason,
                status: None,
                body: truncate_capture(err.to_string()),
                content_type: None,
            }
        }
    }
}

fn retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

fn truncate_capture(mut text: String) -> String {
    if text.len() > MAX_RESPONSE_CAPTURE {
        let mut end = MAX_RESPONSE_CAPTURE;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
