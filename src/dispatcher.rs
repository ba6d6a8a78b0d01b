use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::catalog::EventCatalog;
use crate::codec;
use crate::error::{AttemptOutcome, DispatchError};
use crate::recorder::{AttemptLog, InMemoryAttemptLog};
use crate::registry::SubscriptionRegistry;
use crate::types::{now_ms, AttemptId, DeliveryAttempt};
use crate::worker::{worker_loop, AttemptReport, Task, WorkerContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Tunables for the delivery engine.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of delivery workers.
    pub worker_count: usize,

    /// Capacity of the ready queue feeding the workers.
    pub queue_size: usize,

    /// Global cap on concurrent HTTP sends.
    pub max_in_flight: usize,

    /// Attempts per logical delivery sequence, including the first.
    pub max_attempts: u32,

    /// Bound on each HTTP send.
    pub request_timeout: Duration,

    /// Base of the exponential backoff between retries.
    pub retry_base_ms: u64,

    /// Cap on the backoff delay, before jitter.
    pub retry_max_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            worker_count,
            queue_size: 1_000,
            max_in_flight: 100,
            max_attempts: 5,
            request_timeout: Duration::from_secs(5),
            retry_base_ms: 100,
            retry_max_ms: 30_000,
        }
    }
}

/// The orchestration core.
///
/// On [`dispatch`](Dispatcher::dispatch) the engine resolves matching
/// subscriptions, encodes each payload once, and hands every
/// subscription its own delivery sequence: workers perform the HTTP
/// send, a scheduler task records each outcome through the
/// [`AttemptLog`] and re-enqueues retryable failures with exponential
/// backoff. Sequences are independent; one subscription's failure
/// never affects a sibling.
///
/// Within a sequence attempts are strictly ordered: a retry is only
/// scheduled after the previous attempt's record is written.
pub struct Dispatcher {
    catalog: EventCatalog,
    registry: Arc<SubscriptionRegistry>,
    log: Arc<dyn AttemptLog>,
    ready_tx: Option<mpsc::Sender<Task>>,
    is_running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    worker_handles: Vec<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
    attempt_seq: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Engine with an in-memory attempt log.
    pub fn new(
        catalog: EventCatalog,
        registry: Arc<SubscriptionRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self::with_attempt_log(catalog, registry, Arc::new(InMemoryAttemptLog::new()), config)
    }

    /// Engine writing attempts through the given log backend.
    pub fn with_attempt_log(
        catalog: EventCatalog,
        registry: Arc<SubscriptionRegistry>,
        log: Arc<dyn AttemptLog>,
        config: DispatcherConfig,
    ) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(config.queue_size.max(1));
        let (report_tx, report_rx) = mpsc::channel(config.queue_size.max(1));
        let shared_ready_rx = Arc::new(Mutex::new(ready_rx));

        let ctx = Arc::new(WorkerContext {
            global_semaphore: Semaphore::new(config.max_in_flight.max(1)),
            registry: registry.clone(),
            report_tx,
            request_timeout: config.request_timeout,
            http_client: reqwest::Client::new(),
        });

        let mut worker_handles = Vec::with_capacity(config.worker_count.max(1));
        for _ in 0..config.worker_count.max(1) {
            worker_handles.push(tokio::spawn(worker_loop(shared_ready_rx.clone(), ctx.clone())));
        }

        let is_running = Arc::new(AtomicBool::new(true));
        let shutdown_notify = Arc::new(Notify::new());
        let attempt_seq = Arc::new(AtomicU64::new(0));

        let scheduler_handle = tokio::spawn(scheduler_loop(
            ready_tx.clone(),
            report_rx,
            registry.clone(),
            log.clone(),
            config.clone(),
            attempt_seq.clone(),
            is_running.clone(),
            shutdown_notify.clone(),
        ));

        Self {
            catalog,
            registry,
            log,
            ready_tx: Some(ready_tx),
            is_running,
            shutdown_notify,
            worker_handles,
            scheduler_handle: Some(scheduler_handle),
            attempt_seq,
        }
    }

    /// Fire an event: start one delivery sequence per matching
    /// subscription.
    ///
    /// Per-subscription failures are converted into attempt records,
    /// never surfaced here; the only errors are an event name outside
    /// the catalog and dispatch after shutdown.
    pub async fn dispatch(
        &self,
        event: &str,
        data: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(DispatchError::Shutdown);
        }
        if !self.catalog.contains(event) {
            return Err(DispatchError::UnknownEvent {
                event: event.to_string(),
            });
        }
        let Some(ready_tx) = &self.ready_tx else {
            return Err(DispatchError::Shutdown);
        };

        let matching = self.registry.find_matching(event).await;
        tracing::info!(event, subscriptions = matching.len(), "dispatching event");

        for subscription in matching {
            match codec::encode(subscription.content_type, data) {
                Ok(body) => {
                    let task = Task {
                        subscription_id: subscription.id,
                        content_type: subscription.content_type,
                        body,
                        attempt: 1,
                    };
                    if ready_tx.send(task).await.is_err() {
                        return Err(DispatchError::Shutdown);
                    }
                    metric_inc("webhook.dispatch.enqueued");
                }
                Err(err) => {
                    // Deterministic failure: retrying cannot help, so the
                    // sequence is one terminal attempt that never hit the wire.
                    let completed_at = now_ms();
                    let attempt = DeliveryAttempt {
                        id: AttemptId(self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1),
                        subscription: subscription.id,
                        payload: serde_json::to_vec(data).unwrap_or_default(),
                        attempt_number: 1,
                        success: false,
                        response_status: None,
                        response_message: err.to_string(),
                        response_content_type: None,
                        created_at: completed_at,
                    };
                    self.log.record(&attempt).await;
                    self.registry
                        .touch_last_attempt(&subscription.id, completed_at)
                        .await;
                    tracing::warn!(
                        subscription = %subscription.id,
                        event,
                        error = %err,
                        "payload encoding failed"
                    );
                    metric_inc("webhook.dispatch.encoding_failed");
                }
            }
        }

        Ok(())
    }

    /// The log this engine writes attempts through.
    pub fn attempt_log(&self) -> Arc<dyn AttemptLog> {
        self.log.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop accepting work, drop scheduled retries, and wait for
    /// in-flight sends to finish and be recorded.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.ready_tx.take();
        self.shutdown_notify.notify_waiters();

        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// A retry waiting for its backoff to elapse.
#[derive(Debug)]
struct TimedTask {
    ready_at: Instant,
    task: Task,
}

impl Eq for TimedTask {}

impl PartialEq for TimedTask {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at.eq(&other.ready_at)
    }
}

impl Ord for TimedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other.ready_at.cmp(&self.ready_at)
    }
}

impl PartialOrd for TimedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Scheduler task: records worker reports and feeds due retries back
/// into the ready queue.
#[allow(clippy::too_many_arguments)]
async fn scheduler_loop(
    ready_tx: mpsc::Sender<Task>,
    mut report_rx: mpsc::Receiver<AttemptReport>,
    registry: Arc<SubscriptionRegistry>,
    log: Arc<dyn AttemptLog>,
    config: DispatcherConfig,
    attempt_seq: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut delay_heap: BinaryHeap<TimedTask> = BinaryHeap::new();

    loop {
        if !is_running.load(Ordering::SeqCst) {
            // Scheduled retries die with the engine; executed attempts
            // already reported are still drained and recorded below.
            ready_tx = None;
            delay_heap.clear();
        }

        // Move due retries into the ready queue, dropping any whose
        // subscription was deleted while the retry was pending.
        let now = Instant::now();
        while delay_heap.peek().map_or(false, |t| t.ready_at <= now) {
            let Some(timed) = delay_heap.pop() else { break };
            if !registry.contains(&timed.task.subscription_id).await {
                tracing::debug!(
                    subscription = %timed.task.subscription_id,
                    "retry cancelled, subscription deleted"
                );
                metric_inc("webhook.retry.cancelled");
                continue;
            }
            if let Some(tx) = &ready_tx {
                if tx.send(timed.task).await.is_err() {
                    ready_tx = None;
                }
            }
        }

        let handled = match delay_heap.peek().map(|t| t.ready_at) {
            Some(next_ready) => {
                tokio::select! {
                    maybe = report_rx.recv() => Some(maybe),
                    _ = sleep_until(next_ready) => None,
                    _ = shutdown_notify.notified() => None,
                }
            }
            None => {
                tokio::select! {
                    maybe = report_rx.recv() => Some(maybe),
                    _ = shutdown_notify.notified() => None,
                }
            }
        };

        match handled {
            // Channel closed: every worker has exited, nothing more
            // can be reported.
            Some(None) => break,
            Some(Some(report)) => {
                if let Some(timed) =
                    handle_report(report, &registry, &log, &config, &attempt_seq).await
                {
                    delay_heap.push(timed);
                }
            }
            None => {}
        }
    }
}

/// Record one attempt and decide whether the sequence continues.
async fn handle_report(
    report: AttemptReport,
    registry: &Arc<SubscriptionRegistry>,
    log: &Arc<dyn AttemptLog>,
    config: &DispatcherConfig,
    attempt_seq: &Arc<AtomicU64>,
) -> Option<TimedTask> {
    let task = report.task;
    let retryable = report.outcome.is_retryable();

    let (success, response_status, response_message, response_content_type) = match report.outcome {
        AttemptOutcome::Delivered { status, body, content_type } => {
            (true, Some(status), body, content_type)
        }
        AttemptOutcome::Failed { status, body, content_type, .. } => {
            (false, status, body, content_type)
        }
    };

    let attempt = DeliveryAttempt {
        id: AttemptId(attempt_seq.fetch_add(1, Ordering::SeqCst) + 1),
        subscription: task.subscription_id,
        payload: task.body.clone(),
        attempt_number: task.attempt,
        success,
        response_status,
        response_message,
        response_content_type,
        created_at: report.completed_at,
    };

    // Record first, then schedule: attempt N+1 must never exist
    // before attempt N is on the log.
    log.record(&attempt).await;
    registry
        .touch_last_attempt(&task.subscription_id, report.completed_at)
        .await;

    if success {
        return None;
    }

    if !retryable {
        metric_inc("webhook.delivery.terminal");
        return None;
    }

    if task.attempt >= config.max_attempts {
        tracing::info!(
            subscription = %task.subscription_id,
            attempts = task.attempt,
            "delivery sequence exhausted"
        );
        metric_inc("webhook.delivery.exhausted");
        return None;
    }

    let delay = retry_delay(task.attempt, config.retry_base_ms, config.retry_max_ms);
    let ready_at = Instant::now() + delay + jitter_for(delay);
    metric_inc("webhook.retry.scheduled");

    Some(TimedTask {
        ready_at,
        task: Task {
            attempt: task.attempt + 1,
            ..task
        },
    })
}

/// Backoff after a failed attempt `n`: `base * 2^(n-1)`, capped.
fn retry_delay(failed_attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let base = base_ms.max(1);
    let max = max_ms.max(base);
    let pow = 2u64.saturating_pow(failed_attempt.saturating_sub(1));
    Duration::from_millis(base.saturating_mul(pow).min(max))
}

/// Jitter drawn uniformly from `[0, delay/10]`, so a receiver outage
/// does not produce synchronized retry waves across subscriptions.
fn jitter_for(delay: Duration) -> Duration {
    let ceiling = (delay.as_millis() as u64) / 10;
    if ceiling == 0 {
        return Duration::from_millis(0);
    }
    Duration::from_millis(fastrand::u64(0..=ceiling))
}
