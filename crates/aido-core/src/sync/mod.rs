//! Sync coordinator
//!
//! Drains the operation queue against an [`OperationExecutor`] when online.
//! A pass snapshots the queue, splits it into per-resource lanes and runs the
//! lanes concurrently; operations inside a lane run in enqueue order. Each
//! outcome is applied to the queue as soon as it arrives. Lane tasks belong
//! to the pass: dropping a pass aborts the calls it still has in flight.

use std::collections::{HashMap, HashSet};
use std::future::{self, Future};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::auth::AuthToken;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::executor::{ExecutionOutcome, OperationExecutor};
use crate::models::{Fields, PendingConflict, QueuedOperation, ResourceId, ResourceType, MAX_RETRIES};
use crate::queue::{OperationQueue, QueueStore};
use crate::state::SyncState;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Aggregate result of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Executed successfully and removed
    pub succeeded: usize,
    /// Failed and left queued with a bumped retry count
    pub retried: usize,
    /// Failed for the last time and removed
    pub dropped: usize,
    /// Hit a version conflict and parked for resolution
    pub conflicted: usize,
    /// Not attempted because an earlier operation on the same resource did not succeed
    pub deferred: usize,
}

impl SyncSummary {
    /// Total operations the pass looked at.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.retried + self.dropped + self.conflicted + self.deferred
    }

    /// Whether everything attempted succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.retried == 0 && self.dropped == 0 && self.conflicted == 0 && self.deferred == 0
    }
}

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    EmptyQueue,
    AlreadyRunning,
}

/// Result of asking for a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    Completed(SyncSummary),
    Skipped(SkipReason),
}

/// Outcome notifications published while a pass runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Succeeded {
        operation: QueuedOperation,
    },
    Retrying {
        operation: QueuedOperation,
        retry_count: u32,
        reason: String,
    },
    /// Needs an explicit resolution before the operation can run again
    Conflict {
        operation: QueuedOperation,
        server_state: Fields,
    },
    /// Exhausted its retries; the local change was not synced
    Dropped {
        operation: QueuedOperation,
        reason: String,
    },
    PassCompleted(SyncSummary),
}

type LaneKey = (ResourceType, ResourceId);

enum LaneReport {
    Outcome(QueuedOperation, ExecutionOutcome),
    Deferred(usize),
}

/// Clears the in-flight flag when a pass ends, even on early return.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the queue; cloning shares the guard, queue and event channel.
pub struct SyncCoordinator<S: QueueStore, E: OperationExecutor> {
    queue: OperationQueue<S>,
    executor: Arc<E>,
    connectivity: ConnectivityMonitor,
    in_flight: Arc<AtomicBool>,
    last_pass_clean: Arc<AtomicBool>,
    events: broadcast::Sender<SyncEvent>,
    max_retries: u32,
}

impl<S: QueueStore, E: OperationExecutor> Clone for SyncCoordinator<S, E> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            executor: Arc::clone(&self.executor),
            connectivity: self.connectivity.clone(),
            in_flight: Arc::clone(&self.in_flight),
            last_pass_clean: Arc::clone(&self.last_pass_clean),
            events: self.events.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<S: QueueStore, E: OperationExecutor> SyncCoordinator<S, E> {
    pub fn new(queue: OperationQueue<S>, executor: E, connectivity: ConnectivityMonitor) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            executor: Arc::new(executor),
            connectivity,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_pass_clean: Arc::new(AtomicBool::new(true)),
            events,
            max_retries: MAX_RETRIES,
        }
    }

    /// Override the retry bound (at least 1).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    #[must_use]
    pub const fn queue(&self) -> &OperationQueue<S> {
        &self.queue
    }

    #[must_use]
    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current indicator state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        SyncState::derive(
            self.connectivity.is_online(),
            self.is_syncing(),
            self.last_pass_clean.load(Ordering::Acquire),
        )
    }

    /// Run one sync pass if the preconditions hold.
    ///
    /// Returns [`Error::NotAuthenticated`] without touching the queue when
    /// there is work to do but no token.
    pub async fn sync(&self, token: Option<&AuthToken>) -> Result<PassResult> {
        if !self.connectivity.is_online() {
            return Ok(PassResult::Skipped(SkipReason::Offline));
        }
        if self.queue.is_empty().await {
            return Ok(PassResult::Skipped(SkipReason::EmptyQueue));
        }
        let token = token.ok_or(Error::NotAuthenticated)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync pass already running");
            return Ok(PassResult::Skipped(SkipReason::AlreadyRunning));
        }
        let _guard = PassGuard(&self.in_flight);

        let summary = self.run_pass(token).await;
        self.last_pass_clean
            .store(summary.is_clean(), Ordering::Release);
        let _ = self.events.send(SyncEvent::PassCompleted(summary));
        tracing::info!(
            "Sync pass finished: {} succeeded, {} retried, {} dropped, {} conflicted, {} deferred",
            summary.succeeded,
            summary.retried,
            summary.dropped,
            summary.conflicted,
            summary.deferred
        );
        Ok(PassResult::Completed(summary))
    }

    async fn run_pass(&self, token: &AuthToken) -> SyncSummary {
        let mut summary = SyncSummary::default();

        let parked = self
            .queue
            .conflicts()
            .await
            .iter()
            .filter_map(lane_key)
            .collect::<HashSet<_>>();

        let mut lanes = Vec::new();
        for lane in build_lanes(self.queue.ready().await) {
            let blocked = lane
                .first()
                .and_then(lane_key)
                .is_some_and(|key| parked.contains(&key));
            if blocked {
                summary.deferred += lane.len();
            } else {
                lanes.push(lane);
            }
        }

        let (reports, mut incoming) = mpsc::unbounded_channel();
        let mut lane_tasks = JoinSet::new();
        for lane in lanes {
            let executor = Arc::clone(&self.executor);
            let token = token.clone();
            let reports = reports.clone();
            lane_tasks.spawn(async move {
                let mut remaining = lane.len();
                for operation in lane {
                    let outcome = executor.execute(&operation, &token).await;
                    remaining -= 1;
                    let stop = outcome != ExecutionOutcome::Success;
                    if reports.send(LaneReport::Outcome(operation, outcome)).is_err() {
                        return;
                    }
                    if stop {
                        if remaining > 0 {
                            let _ = reports.send(LaneReport::Deferred(remaining));
                        }
                        return;
                    }
                }
            });
        }
        drop(reports);

        while let Some(report) = incoming.recv().await {
            match report {
                LaneReport::Outcome(operation, outcome) => {
                    self.apply_outcome(operation, outcome, &mut summary).await;
                }
                LaneReport::Deferred(count) => summary.deferred += count,
            }
        }
        while let Some(joined) = lane_tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!("Sync lane task failed: {}", error);
            }
        }

        summary
    }

    async fn apply_outcome(
        &self,
        operation: QueuedOperation,
        outcome: ExecutionOutcome,
        summary: &mut SyncSummary,
    ) {
        match outcome {
            ExecutionOutcome::Success => {
                self.queue.dequeue(&operation.id).await;
                tracing::debug!("Synced {} ({})", operation.describe(), operation.id);
                summary.succeeded += 1;
                let _ = self.events.send(SyncEvent::Succeeded { operation });
            }
            ExecutionOutcome::Conflict { server_state } => {
                let server_state = server_state.unwrap_or_default();
                let conflict = PendingConflict {
                    server_state: server_state.clone(),
                    detected_at: Utc::now(),
                };
                if !self.queue.mark_conflict(&operation.id, conflict).await {
                    return;
                }
                tracing::warn!(
                    "Version conflict on {} ({}); waiting for resolution",
                    operation.describe(),
                    operation.id
                );
                summary.conflicted += 1;
                let _ = self.events.send(SyncEvent::Conflict {
                    operation,
                    server_state,
                });
            }
            ExecutionOutcome::Failure { reason } => {
                let Some(retry_count) = self.queue.bump_retry(&operation.id).await else {
                    return;
                };

                if retry_count >= self.max_retries {
                    let Some(dropped) = self.queue.dequeue(&operation.id).await else {
                        return;
                    };
                    tracing::warn!(
                        "Dropped {} ({}) after {} failed attempts: {}",
                        dropped.describe(),
                        dropped.id,
                        retry_count,
                        reason
                    );
                    self.queue.record_dropped(dropped.clone(), reason.clone()).await;
                    summary.dropped += 1;
                    let _ = self.events.send(SyncEvent::Dropped {
                        operation: dropped,
                        reason,
                    });
                } else {
                    tracing::warn!(
                        "Failed {} ({}), attempt {}/{}: {}",
                        operation.describe(),
                        operation.id,
                        retry_count,
                        self.max_retries,
                        reason
                    );
                    summary.retried += 1;
                    let operation = QueuedOperation {
                        retry_count,
                        ..operation
                    };
                    let _ = self.events.send(SyncEvent::Retrying {
                        operation,
                        retry_count,
                        reason,
                    });
                }
            }
        }
    }
}

fn lane_key(operation: &QueuedOperation) -> Option<LaneKey> {
    operation
        .resource_id()
        .map(|id| (operation.resource_type, id.clone()))
}

/// Group operations by resource, keeping enqueue order within and across lanes.
///
/// Creates have no server id yet and always get a lane of their own.
fn build_lanes(operations: Vec<QueuedOperation>) -> Vec<Vec<QueuedOperation>> {
    let mut lanes: Vec<Vec<QueuedOperation>> = Vec::new();
    let mut index_by_key: HashMap<LaneKey, usize> = HashMap::new();

    for operation in operations {
        match lane_key(&operation) {
            Some(key) => {
                if let Some(&index) = index_by_key.get(&key) {
                    lanes[index].push(operation);
                } else {
                    index_by_key.insert(key, lanes.len());
                    lanes.push(vec![operation]);
                }
            }
            None => lanes.push(vec![operation]),
        }
    }

    lanes
}

/// Background driver: runs a pass on every transition to online and on a timer.
pub struct AutoSync<S: QueueStore, E: OperationExecutor> {
    coordinator: SyncCoordinator<S, E>,
    token: AuthToken,
    interval: Duration,
}

impl<S: QueueStore, E: OperationExecutor> AutoSync<S, E> {
    #[must_use]
    pub const fn new(coordinator: SyncCoordinator<S, E>, token: AuthToken, interval: Duration) -> Self {
        Self {
            coordinator,
            token,
            interval,
        }
    }

    /// Drive sync passes until the connectivity source goes away.
    pub async fn run(self) {
        self.run_until(future::pending()).await;
    }

    /// Drive sync passes until `shutdown` completes.
    ///
    /// `shutdown` is only observed between passes, so a running pass always
    /// finishes applying its outcomes before this returns.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let mut online = self.coordinator.connectivity().subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *online.borrow_and_update() {
                        self.trigger("connectivity restored").await;
                    }
                }
                _ = ticker.tick() => {
                    self.trigger("timer").await;
                }
            }
        }
    }

    async fn trigger(&self, cause: &str) {
        match self.coordinator.sync(Some(&self.token)).await {
            Ok(PassResult::Completed(summary)) => {
                tracing::debug!("Sync pass triggered by {cause}: {} operation(s)", summary.total());
            }
            Ok(PassResult::Skipped(reason)) => {
                tracing::debug!("Sync pass triggered by {cause} skipped: {reason:?}");
            }
            Err(error) => tracing::warn!("Sync pass triggered by {cause} failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mutation, OperationId};
    use crate::queue::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    /// In-process executor answering from a per-operation script.
    #[derive(Default)]
    struct ScriptedExecutor {
        scripts: Mutex<HashMap<OperationId, VecDeque<ExecutionOutcome>>>,
        fallback: Option<ExecutionOutcome>,
        delay: Option<Duration>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedExecutor {
        fn always(outcome: ExecutionOutcome) -> Self {
            Self {
                fallback: Some(outcome),
                ..Self::default()
            }
        }

        fn script(self, id: OperationId, outcomes: Vec<ExecutionOutcome>) -> Self {
            self.scripts.lock().unwrap().insert(id, outcomes.into());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    impl OperationExecutor for ScriptedExecutor {
        async fn execute(&self, operation: &QueuedOperation, _token: &AuthToken) -> ExecutionOutcome {
            self.log
                .lock()
                .unwrap()
                .push(format!("start {}", operation.describe()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&operation.id)
                .and_then(VecDeque::pop_front);
            self.log
                .lock()
                .unwrap()
                .push(format!("end {}", operation.describe()));
            scripted
                .or_else(|| self.fallback.clone())
                .unwrap_or(ExecutionOutcome::Success)
        }
    }

    fn failure() -> ExecutionOutcome {
        ExecutionOutcome::Failure {
            reason: "HTTP 500".to_string(),
        }
    }

    fn token() -> AuthToken {
        AuthToken::new("token").unwrap()
    }

    async fn setup(
        executor: ScriptedExecutor,
        online: bool,
    ) -> (
        OperationQueue<MemoryStore>,
        SyncCoordinator<MemoryStore, ScriptedExecutor>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let queue = OperationQueue::load(MemoryStore::new()).await.unwrap();
        let log = Arc::clone(&executor.log);
        let coordinator =
            SyncCoordinator::new(queue.clone(), executor, ConnectivityMonitor::new(online));
        (queue, coordinator, log)
    }

    async fn completed(coordinator: &SyncCoordinator<MemoryStore, ScriptedExecutor>) -> SyncSummary {
        match coordinator.sync(Some(&token())).await.unwrap() {
            PassResult::Completed(summary) => summary,
            PassResult::Skipped(reason) => panic!("pass skipped: {reason:?}"),
        }
    }

    fn update(id: i64, value: Value) -> Mutation {
        Mutation::Update {
            id: ResourceId::from(id),
            updates: fields(value),
        }
    }

    #[tokio::test]
    async fn offline_create_syncs_once_online() {
        let (queue, coordinator, _log) =
            setup(ScriptedExecutor::always(ExecutionOutcome::Success), false).await;
        queue
            .enqueue(
                ResourceType::Task,
                Mutation::Create {
                    fields: fields(json!({"title": "A"})),
                },
            )
            .await;
        assert_eq!(queue.len().await, 1);

        assert_eq!(
            coordinator.sync(Some(&token())).await.unwrap(),
            PassResult::Skipped(SkipReason::Offline)
        );
        assert_eq!(coordinator.state(), SyncState::Offline);

        coordinator.connectivity().set_online(true);
        let summary = completed(&coordinator).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(queue.len().await, 0);
        assert_eq!(coordinator.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn empty_queue_is_skipped() {
        let (_queue, coordinator, _log) = setup(ScriptedExecutor::default(), true).await;
        assert_eq!(
            coordinator.sync(None).await.unwrap(),
            PassResult::Skipped(SkipReason::EmptyQueue)
        );
    }

    #[tokio::test]
    async fn missing_token_leaves_queue_untouched() {
        let (queue, coordinator, log) = setup(ScriptedExecutor::always(failure()), true).await;
        let id = queue.enqueue(ResourceType::Task, update(5, json!({"title": "x"}))).await;

        assert!(matches!(
            coordinator.sync(None).await,
            Err(Error::NotAuthenticated)
        ));
        assert_eq!(queue.get(&id).await.unwrap().retry_count, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_operation_is_dropped_on_final_attempt() {
        let (queue, coordinator, _log) = setup(ScriptedExecutor::always(failure()), true).await;
        let mut events = coordinator.subscribe();
        let id = queue.enqueue(ResourceType::Task, update(5, json!({"title": "x"}))).await;

        for attempt in 1..MAX_RETRIES {
            let summary = completed(&coordinator).await;
            assert_eq!(summary.retried, 1);
            assert_eq!(queue.get(&id).await.unwrap().retry_count, attempt);
        }

        let summary = completed(&coordinator).await;
        assert_eq!(summary.dropped, 1);
        assert!(queue.is_empty().await);

        let dropped = loop {
            match events.recv().await.unwrap() {
                SyncEvent::Dropped { operation, reason } => break (operation, reason),
                _ => continue,
            }
        };
        assert_eq!(dropped.0.id, id);
        assert_eq!(dropped.0.retry_count, MAX_RETRIES);
        assert_eq!(dropped.1, "HTTP 500");

        let history = queue.dropped().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation.retry_count, MAX_RETRIES);
        assert_eq!(coordinator.state(), SyncState::Error);
    }

    #[tokio::test]
    async fn conflict_stays_queued_without_retry_bump() {
        let (queue, coordinator, log) = setup(
            ScriptedExecutor::always(ExecutionOutcome::Conflict {
                server_state: Some(fields(json!({"status": "in_progress", "title": "X"}))),
            }),
            true,
        )
        .await;
        let mut events = coordinator.subscribe();
        let id = queue.enqueue(ResourceType::Task, update(5, json!({"status": "done"}))).await;

        let summary = completed(&coordinator).await;
        assert_eq!(summary.conflicted, 1);
        assert_eq!(queue.len().await, 1);

        let parked = queue.get(&id).await.unwrap();
        assert_eq!(parked.retry_count, 0);
        assert_eq!(
            parked.conflict.unwrap().server_state,
            fields(json!({"status": "in_progress", "title": "X"}))
        );

        match events.recv().await.unwrap() {
            SyncEvent::Conflict {
                operation,
                server_state,
            } => {
                assert_eq!(operation.id, id);
                assert_eq!(server_state["status"], json!("in_progress"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Parked operations are not re-run by later passes.
        let attempts = log.lock().unwrap().len();
        let summary = completed(&coordinator).await;
        assert_eq!(summary.total(), 0);
        assert_eq!(log.lock().unwrap().len(), attempts);
        assert_eq!(queue.get(&id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_operation() {
        let queue = OperationQueue::load(MemoryStore::new()).await.unwrap();
        let bad = queue.enqueue(ResourceType::Task, update(1, json!({"title": "a"}))).await;
        let good = queue.enqueue(ResourceType::Task, update(2, json!({"title": "b"}))).await;
        let executor = ScriptedExecutor::default().script(bad, vec![failure()]);
        let coordinator = SyncCoordinator::new(queue.clone(), executor, ConnectivityMonitor::new(true));

        let summary = completed(&coordinator).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.retried, 1);
        assert!(queue.get(&good).await.is_none());
        assert_eq!(queue.get(&bad).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn same_resource_runs_in_enqueue_order() {
        let (queue, coordinator, log) = setup(
            ScriptedExecutor::default().with_delay(Duration::from_millis(20)),
            true,
        )
        .await;
        queue.enqueue(ResourceType::Task, update(5, json!({"title": "x"}))).await;
        queue
            .enqueue(
                ResourceType::Task,
                Mutation::Delete {
                    id: ResourceId::from(5),
                },
            )
            .await;

        let summary = completed(&coordinator).await;
        assert_eq!(summary.succeeded, 2);

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "start update task 5".to_string(),
                "end update task 5".to_string(),
                "start delete task 5".to_string(),
                "end delete task 5".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn independent_resources_run_concurrently() {
        let (queue, coordinator, log) = setup(
            ScriptedExecutor::default().with_delay(Duration::from_millis(50)),
            true,
        )
        .await;
        queue.enqueue(ResourceType::Task, update(1, json!({"title": "a"}))).await;
        queue.enqueue(ResourceType::Tag, update(1, json!({"name": "b"}))).await;

        completed(&coordinator).await;

        let log = log.lock().unwrap().clone();
        assert!(log[0].starts_with("start"));
        assert!(log[1].starts_with("start"));
    }

    #[tokio::test]
    async fn failure_defers_rest_of_lane() {
        let queue = OperationQueue::load(MemoryStore::new()).await.unwrap();
        let first = queue.enqueue(ResourceType::Task, update(5, json!({"title": "x"}))).await;
        let second = queue
            .enqueue(
                ResourceType::Task,
                Mutation::Delete {
                    id: ResourceId::from(5),
                },
            )
            .await;
        let executor = ScriptedExecutor::default().script(first, vec![failure()]);
        let log = Arc::clone(&executor.log);
        let coordinator = SyncCoordinator::new(queue.clone(), executor, ConnectivityMonitor::new(true));

        let summary = completed(&coordinator).await;

        assert_eq!(summary.retried, 1);
        assert_eq!(summary.deferred, 1);
        assert_eq!(queue.get(&second).await.unwrap().retry_count, 0);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn parked_conflict_blocks_later_operations_on_same_resource() {
        let queue = OperationQueue::load(MemoryStore::new()).await.unwrap();
        let first = queue.enqueue(ResourceType::Task, update(5, json!({"title": "x"}))).await;
        let executor = ScriptedExecutor::default().script(
            first,
            vec![ExecutionOutcome::Conflict { server_state: None }],
        );
        let coordinator = SyncCoordinator::new(queue.clone(), executor, ConnectivityMonitor::new(true));
        completed(&coordinator).await;

        queue.enqueue(ResourceType::Task, update(5, json!({"status": "done"}))).await;
        queue.enqueue(ResourceType::Task, update(6, json!({"status": "done"}))).await;
        let summary = completed(&coordinator).await;

        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn overlapping_passes_are_rejected() {
        let (queue, coordinator, _log) = setup(
            ScriptedExecutor::default().with_delay(Duration::from_millis(100)),
            true,
        )
        .await;
        queue.enqueue(ResourceType::Task, update(1, json!({"title": "a"}))).await;
        let token = token();

        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(coordinator.is_syncing());
            assert_eq!(coordinator.state(), SyncState::Syncing);
            coordinator.sync(Some(&token)).await.unwrap()
        };
        let (first, second) = tokio::join!(coordinator.sync(Some(&token)), second);

        assert!(matches!(first.unwrap(), PassResult::Completed(_)));
        assert_eq!(second, PassResult::Skipped(SkipReason::AlreadyRunning));
        assert!(!coordinator.is_syncing());
    }

    #[tokio::test]
    async fn dropping_a_pass_cancels_its_in_flight_calls() {
        let (queue, coordinator, log) = setup(
            ScriptedExecutor::default().with_delay(Duration::from_millis(200)),
            true,
        )
        .await;
        let id = queue
            .enqueue(
                ResourceType::Task,
                Mutation::Create {
                    fields: fields(json!({"title": "A"})),
                },
            )
            .await;
        let token = token();

        let interrupted =
            tokio::time::timeout(Duration::from_millis(30), coordinator.sync(Some(&token))).await;
        assert!(interrupted.is_err());
        assert!(!coordinator.is_syncing());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*log.lock().unwrap(), vec!["start create task".to_string()]);
        assert!(queue.get(&id).await.is_some());

        let summary = completed(&coordinator).await;
        assert_eq!(summary.succeeded, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn auto_sync_shutdown_lets_the_running_pass_finish() {
        let (queue, coordinator, log) = setup(
            ScriptedExecutor::default().with_delay(Duration::from_millis(100)),
            true,
        )
        .await;
        queue.enqueue(ResourceType::Task, update(1, json!({"title": "a"}))).await;

        let driver = AutoSync::new(coordinator.clone(), token(), Duration::from_secs(3600));
        driver
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert!(queue.is_empty().await);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start update task 1".to_string(), "end update task 1".to_string()]
        );
    }

    #[tokio::test]
    async fn auto_sync_runs_when_connectivity_returns() {
        let (queue, coordinator, _log) = setup(ScriptedExecutor::default(), false).await;
        queue.enqueue(ResourceType::Task, update(1, json!({"title": "a"}))).await;
        let mut events = coordinator.subscribe();

        let driver = AutoSync::new(coordinator.clone(), token(), Duration::from_secs(3600));
        let flip = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.connectivity().set_online(true);
            loop {
                if let SyncEvent::PassCompleted(summary) = events.recv().await.unwrap() {
                    break summary;
                }
            }
        };

        let summary = tokio::select! {
            () = driver.run() => panic!("driver stopped"),
            summary = flip => summary,
        };

        assert_eq!(summary.succeeded, 1);
        assert!(queue.is_empty().await);
    }

    #[test]
    fn lanes_group_by_resource_and_isolate_creates() {
        let create = || {
            QueuedOperation::new(
                ResourceType::Task,
                Mutation::Create {
                    fields: Fields::new(),
                },
            )
        };
        let operations = vec![
            QueuedOperation::new(ResourceType::Task, update(1, json!({}))),
            create(),
            QueuedOperation::new(ResourceType::Tag, update(1, json!({}))),
            QueuedOperation::new(ResourceType::Task, update(1, json!({}))),
            create(),
        ];

        let sizes = build_lanes(operations)
            .iter()
            .map(Vec::len)
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 1, 1, 1]);
    }
}
