//! Integration tests for the worker loop: retry bounds, classification,
//! dead-lettering, cancellation and pool supervision.
//!
//! The clock is paused, so backoff and throttle sleeps resolve instantly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workq::config::QueueSettings;
use workq::dead_letter::{DeadLetterSink, MemoryDeadLetterSink};
use workq::engine::{Disposition, Step, Worker, WorkerPool};
use workq::error::{Error, Result};
use workq::handler::{Handler, HandlerRegistry};
use workq::model::dead_letter::{DeadLetterCommand, DeadLetterReason};
use workq::model::{ErrorKind, Outcome};
use workq::queue::{MemoryTransport, Queue, QueuePayload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChargeCard {
    order_id: u32,
}

impl QueuePayload for ChargeCard {
    const TYPE_NAME: &'static str = "payments.ChargeCard";
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok,
    Transient,
    Persistent,
    /// Never return; only cancellation ends the call.
    Hang,
}

/// Replies from a script, then repeats `fallback`. Counts calls and records
/// the order IDs it saw.
struct ScriptedHandler {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<u32>>>,
    /// Cancel this token when the given order ID is handled.
    cancel_on: Option<(u32, CancellationToken)>,
}

impl ScriptedHandler {
    fn new(script: &[Reply], fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            cancel_on: None,
        }
    }

    fn always(reply: Reply) -> Self {
        Self::new(&[], reply)
    }

    fn cancel_on(mut self, order_id: u32, token: CancellationToken) -> Self {
        self.cancel_on = Some((order_id, token));
        self
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    type Request = ChargeCard;
    type Response = serde_json::Value;

    async fn handle(
        &self,
        request: &ChargeCard,
        _cancel: &CancellationToken,
    ) -> Outcome<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.order_id);
        if let Some((order_id, token)) = &self.cancel_on {
            if *order_id == request.order_id {
                token.cancel();
            }
        }

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match reply {
            Reply::Ok => Outcome::success(json!({"charged": request.order_id})),
            Reply::Transient => Outcome::transient("card processor timed out"),
            Reply::Persistent => Outcome::persistent("card declined"),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Sink whose writes always fail.
struct BrokenSink;

#[async_trait]
impl DeadLetterSink for BrokenSink {
    async fn record_failure(&self, _command: DeadLetterCommand) -> Result<()> {
        Err(Error::Other("dead-letter store offline".to_string()))
    }
}

fn settings(max_retry_attempts: u32) -> QueueSettings {
    QueueSettings {
        max_retry_attempts,
        maximum_delay_in_sec: 10,
        ..QueueSettings::default()
    }
}

struct Harness {
    transport: MemoryTransport,
    queue: Queue,
    sink: MemoryDeadLetterSink,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<u32>>>,
}

impl Harness {
    fn new(handler: Option<ScriptedHandler>, max_retry_attempts: u32) -> (Self, Worker) {
        let transport = MemoryTransport::new();
        let queue = Queue::new(Arc::new(transport.clone()), "the_queue");
        let sink = MemoryDeadLetterSink::new();

        let mut registry = HandlerRegistry::empty();
        let (calls, seen) = match handler {
            Some(handler) => {
                let counters = (Arc::clone(&handler.calls), Arc::clone(&handler.seen));
                registry.register(handler).unwrap();
                counters
            }
            None => Default::default(),
        };

        let worker = Worker::new(
            ChargeCard::TYPE_NAME,
            queue.clone(),
            Arc::new(registry),
            Arc::new(sink.clone()),
            settings(max_retry_attempts),
        );

        let harness = Self {
            transport,
            queue,
            sink,
            calls,
            seen,
        };
        (harness, worker)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Retry bounds
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn always_transient_runs_k_plus_one_attempts_then_dead_letters_once() {
    for k in [0u32, 1, 3, 5] {
        let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Transient)), k);
        let receipt = h.queue.enqueue(&ChargeCard { order_id: 7 }).await.unwrap();

        let step = worker.poll_once().await.unwrap();

        assert_eq!(
            step,
            Step::Processed {
                correlation_id: receipt.correlation_id,
                disposition: Disposition::DeadLettered {
                    reason: DeadLetterReason::Exhausted,
                    retry_count: k,
                },
            }
        );
        assert_eq!(h.calls(), k as usize + 1, "attempts for k = {k}");

        let records = h.sink.records().await;
        assert_eq!(records.len(), 1, "dead letters for k = {k}");
        assert_eq!(records[0].retry_count, k);
        assert_eq!(records[0].reason, DeadLetterReason::Exhausted);
    }
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_is_not_retried() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Persistent)), 5);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    let step = worker.poll_once().await.unwrap();

    assert!(matches!(
        step,
        Step::Processed {
            disposition: Disposition::DeadLettered {
                reason: DeadLetterReason::Persistent,
                retry_count: 0,
            },
            ..
        }
    ));
    assert_eq!(h.calls(), 1);
    assert_eq!(h.sink.records().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn success_stops_retrying_without_dead_letter() {
    let handler = ScriptedHandler::new(&[Reply::Transient, Reply::Ok], Reply::Transient);
    let (h, worker) = Harness::new(Some(handler), 5);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    let step = worker.poll_once().await.unwrap();

    assert!(matches!(
        step,
        Step::Processed {
            disposition: Disposition::Succeeded { retry_count: 1 },
            ..
        }
    ));
    assert_eq!(h.calls(), 2);
    assert!(h.sink.records().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_has_zero_retries() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Ok)), 3);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    let step = worker.poll_once().await.unwrap();

    assert!(matches!(
        step,
        Step::Processed {
            disposition: Disposition::Succeeded { retry_count: 0 },
            ..
        }
    ));
    assert_eq!(h.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_after_transients_dead_letters_with_retries_so_far() {
    // MaxRetryAttempts = 3: the fourth invocation is the last allowed retry,
    // and its persistent classification is what gets recorded.
    let handler = ScriptedHandler::new(
        &[
            Reply::Transient,
            Reply::Transient,
            Reply::Transient,
            Reply::Persistent,
        ],
        Reply::Ok,
    );
    let (h, worker) = Harness::new(Some(handler), 3);
    h.queue.enqueue(&ChargeCard { order_id: 9 }).await.unwrap();

    let step = worker.poll_once().await.unwrap();

    assert!(matches!(
        step,
        Step::Processed {
            disposition: Disposition::DeadLettered {
                reason: DeadLetterReason::Persistent,
                retry_count: 3,
            },
            ..
        }
    ));
    assert_eq!(h.calls(), 4);

    let records = h.sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].retry_count, 3);
}

#[tokio::test(start_paused = true)]
async fn retry_backoff_waits_between_attempts() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Transient)), 2);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    let started = tokio::time::Instant::now();
    worker.poll_once().await.unwrap();
    let waited = started.elapsed();

    // 2s + 4s of backoff, plus at most 1s of jitter per retry.
    assert!(waited >= Duration::from_secs(6), "waited {waited:?}");
    assert!(waited <= Duration::from_secs(8), "waited {waited:?}");
}

// ---------------------------------------------------------------------------
// Dead-letter contents
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dead_letter_carries_request_error_and_correlation_id() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Persistent)), 0);
    let receipt = h.queue.enqueue(&ChargeCard { order_id: 31 }).await.unwrap();

    worker.poll_once().await.unwrap();

    let records = h.sink.records().await;
    let record = &records[0];
    assert_eq!(record.request_id, receipt.correlation_id);
    assert_eq!(record.queue, ChargeCard::TYPE_NAME);
    assert_eq!(record.request, json!({"order_id": 31}));
    assert_eq!(record.error_detail["kind"], "persistent");
    assert_eq!(record.error_detail["message"], "card declined");
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_dead_lettered_without_calling_handler() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Ok)), 4);
    h.queue
        .enqueue_as(ChargeCard::TYPE_NAME, &json!({"order": "not-a-number"}))
        .await
        .unwrap();

    let step = worker.poll_once().await.unwrap();

    assert!(matches!(
        step,
        Step::Processed {
            disposition: Disposition::DeadLettered {
                reason: DeadLetterReason::Persistent,
                retry_count: 0,
            },
            ..
        }
    ));
    assert_eq!(h.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn dead_letter_write_failure_propagates() {
    let transport = MemoryTransport::new();
    let queue = Queue::new(Arc::new(transport), "the_queue");
    let mut registry = HandlerRegistry::empty();
    registry
        .register(ScriptedHandler::always(Reply::Persistent))
        .unwrap();
    let worker = Worker::new(
        ChargeCard::TYPE_NAME,
        queue.clone(),
        Arc::new(registry),
        Arc::new(BrokenSink),
        settings(0),
    );
    queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    assert!(worker.poll_once().await.is_err());
}

// ---------------------------------------------------------------------------
// Loop gates
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_queue_is_idle_not_failure() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Ok)), 3);

    assert_eq!(worker.poll_once().await.unwrap(), Step::Idle);
    assert_eq!(h.calls(), 0);
    assert!(h.sink.records().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_handler_leaves_work_queued() {
    let (h, worker) = Harness::new(None, 3);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    assert_eq!(worker.poll_once().await.unwrap(), Step::Unroutable);
    assert_eq!(h.queue.length_of(ChargeCard::TYPE_NAME).await.unwrap(), 1);
    assert!(h.sink.records().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transport_outage_skips_dequeue() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Ok)), 3);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();
    h.transport.set_available(false);

    assert_eq!(worker.poll_once().await.unwrap(), Step::Unavailable);
    assert_eq!(h.calls(), 0);

    h.transport.set_available(true);
    assert_eq!(h.queue.length_of(ChargeCard::TYPE_NAME).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_requeues_envelope_at_head() {
    let token = CancellationToken::new();
    let handler = ScriptedHandler::always(Reply::Transient).cancel_on(5, token.clone());
    let (h, worker) = Harness::new(Some(handler), 3);
    let worker = worker.with_cancellation(token);
    let receipt = h.queue.enqueue(&ChargeCard { order_id: 5 }).await.unwrap();
    h.queue.enqueue(&ChargeCard { order_id: 6 }).await.unwrap();

    let step = worker.poll_once().await.unwrap();

    assert!(matches!(
        step,
        Step::Processed {
            disposition: Disposition::Requeued { retry_count: 1 },
            ..
        }
    ));
    assert_eq!(h.calls(), 1, "no attempt may start after cancellation");
    assert!(h.sink.records().await.is_empty());

    let back = h.queue.dequeue::<ChargeCard>().await.unwrap().unwrap();
    assert_eq!(back.correlation_id, receipt.correlation_id);
    assert_eq!(back.payload.order_id, 5);
    let next = h.queue.dequeue::<ChargeCard>().await.unwrap().unwrap();
    assert_eq!(next.payload.order_id, 6);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_handler_call_keeps_fifo_order() {
    let token = CancellationToken::new();
    let handler = ScriptedHandler::always(Reply::Hang).cancel_on(1, token.clone());
    let (h, worker) = Harness::new(Some(handler), 3);
    let worker = worker.with_cancellation(token);
    let first = h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();
    h.queue.enqueue(&ChargeCard { order_id: 2 }).await.unwrap();

    let step = worker.poll_once().await.unwrap();

    assert_eq!(
        step,
        Step::Processed {
            correlation_id: first.correlation_id,
            disposition: Disposition::Requeued { retry_count: 0 },
        }
    );
    let order: Vec<u32> = h
        .transport
        .snapshot("the_queue:payments.ChargeCard")
        .await
        .iter()
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw).unwrap())
        .map(|wire| wire["payload"]["order_id"].as_u64().unwrap() as u32)
        .collect();
    assert_eq!(order, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_worker_dequeues_nothing() {
    let (h, worker) = Harness::new(Some(ScriptedHandler::always(Reply::Ok)), 3);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();
    h.queue.enqueue(&ChargeCard { order_id: 2 }).await.unwrap();
    worker.shutdown();

    assert_eq!(worker.poll_once().await.unwrap(), Step::Stopped);
    assert_eq!(h.calls(), 0);

    let first = h.queue.dequeue::<ChargeCard>().await.unwrap().unwrap();
    let second = h.queue.dequeue::<ChargeCard>().await.unwrap().unwrap();
    assert_eq!(first.payload.order_id, 1);
    assert_eq!(second.payload.order_id, 2);
}

#[tokio::test(start_paused = true)]
async fn run_processes_in_fifo_order_until_cancelled() {
    let token = CancellationToken::new();
    let handler = ScriptedHandler::always(Reply::Ok).cancel_on(4, token.clone());
    let (h, worker) = Harness::new(Some(handler), 0);
    let worker = worker.with_cancellation(token);
    for order_id in 0..5 {
        h.queue.enqueue(&ChargeCard { order_id }).await.unwrap();
    }

    worker.run().await.unwrap();

    assert_eq!(*h.seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(h.queue.length_of(ChargeCard::TYPE_NAME).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_recovers_after_transport_outage() {
    let token = CancellationToken::new();
    let handler = ScriptedHandler::always(Reply::Ok).cancel_on(1, token.clone());
    let (h, worker) = Harness::new(Some(handler), 0);
    let worker = worker.with_cancellation(token);
    h.transport.set_available(false);

    let running = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_secs(7)).await;
    h.transport.set_available(true);
    h.queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    running.await.unwrap().unwrap();
    assert_eq!(h.calls(), 1);
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn outcome_classification_accessors() {
    assert_eq!(Outcome::success(1).error_kind(), None);
    assert_eq!(
        Outcome::<()>::transient("timeout").error_kind(),
        Some(ErrorKind::Transient)
    );
    assert_eq!(
        Outcome::<()>::persistent("bad input").error_kind(),
        Some(ErrorKind::Persistent)
    );

    let default = Outcome::<()>::default();
    assert!(default.is_success);
    assert_eq!(default.retry_count, 0);

    let unexplained = Outcome::<()> {
        is_success: false,
        ..Outcome::default()
    };
    assert_eq!(unexplained.error_kind(), Some(ErrorKind::Transient));
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

fn pool_with(registry: HandlerRegistry, sink: Arc<dyn DeadLetterSink>) -> (Queue, WorkerPool) {
    let queue = Queue::new(Arc::new(MemoryTransport::new()), "the_queue");
    let pool = WorkerPool::new(queue.clone(), Arc::new(registry), sink, settings(0));
    (queue, pool)
}

#[tokio::test(start_paused = true)]
async fn pool_rejects_queue_types_without_handler() {
    let (_, pool) = pool_with(
        HandlerRegistry::empty(),
        Arc::new(MemoryDeadLetterSink::new()),
    );

    let result = pool.run(&[ChargeCard::TYPE_NAME.to_string()]).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn pool_runs_deferred_types_until_shutdown() {
    let mut registry = HandlerRegistry::empty();
    registry.register(ScriptedHandler::always(Reply::Ok)).unwrap();
    registry.defer("reports.Nightly");
    let (_, pool) = pool_with(registry, Arc::new(MemoryDeadLetterSink::new()));

    let stopper = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        stopper.shutdown();
    });

    pool.run(&[
        ChargeCard::TYPE_NAME.to_string(),
        "reports.Nightly".to_string(),
    ])
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn pool_shuts_down_when_a_worker_fails() {
    let mut registry = HandlerRegistry::empty();
    registry
        .register(ScriptedHandler::always(Reply::Persistent))
        .unwrap();
    registry.defer("reports.Nightly");
    let (queue, pool) = pool_with(registry, Arc::new(BrokenSink));
    queue.enqueue(&ChargeCard { order_id: 1 }).await.unwrap();

    let result = pool
        .run(&[
            ChargeCard::TYPE_NAME.to_string(),
            "reports.Nightly".to_string(),
        ])
        .await;

    assert!(matches!(result, Err(Error::Other(_))));
    assert!(pool.cancellation_token().is_cancelled());
}
