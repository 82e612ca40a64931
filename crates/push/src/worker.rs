use std::{
    collections::BTreeMap,
    hash::{
        DefaultHasher,
        Hash,
        Hasher,
    },
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use registry_types::{
    DataCenter,
    Datum,
    FetchSeq,
    PushVersion,
    Subscriber,
    SubscriberId,
};
use tokio::{
    sync::{
        mpsc,
        Notify,
    },
    task::JoinHandle,
    time::{
        Instant,
        MissedTickBehavior,
    },
};

use crate::{
    api::{
        ClientNodeService,
        PushDataGenerator,
        TransportError,
    },
    config::SessionServerConfig,
    metrics,
    state::{
        InflightRegistry,
        OfferOutcome,
        PendingBuffer,
    },
    task::{
        PushTask,
        PushingKey,
    },
};

/// The watchdog also wakes on demand for `no_delay` tasks, so the periodic
/// tick only bounds how stale a debounce deadline can go unnoticed.
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);

/// Entry point of the push core. Owns the pending buffer, the in-flight
/// registry, the watchdog, and the keyed dispatcher pool; producers feed it
/// through [`PushProcessor::fire_push`].
///
/// Must be constructed inside a tokio runtime: the watchdog, the dispatcher
/// workers, and each push's callback continuation are spawned tasks.
pub struct PushProcessor {
    ctx: Arc<PushContext>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PushProcessor {
    pub fn new(
        config: SessionServerConfig,
        generator: Arc<dyn PushDataGenerator>,
        client_node: Arc<dyn ClientNodeService>,
    ) -> Self {
        let pool_size = config.push_task_executor_pool_size().max(1);
        let queue_size = config.push_task_executor_queue_size().max(1);

        let mut queues = Vec::with_capacity(pool_size);
        let mut receivers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let (tx, rx) = mpsc::channel(queue_size);
            queues.push(tx);
            receivers.push(rx);
        }

        let ctx = Arc::new(PushContext {
            config,
            generator,
            client_node,
            pending: PendingBuffer::new(),
            inflight: InflightRegistry::new(),
            wakeup: Notify::new(),
            dispatch_queues: queues,
        });

        let mut handles = vec![tokio::spawn(ctx.clone().watchdog_loop())];
        for rx in receivers {
            handles.push(tokio::spawn(ctx.clone().dispatch_loop(rx)));
        }
        Self {
            ctx,
            handles: Mutex::new(handles),
        }
    }

    /// Accept one push intent. Fire-and-forget: malformed intents and
    /// coalescing conflicts are logged and counted, never surfaced to the
    /// producer. Returns whether the intent now occupies its pending slot.
    pub fn fire_push(
        &self,
        no_delay: bool,
        push_version: PushVersion,
        data_center: DataCenter,
        addr: SocketAddr,
        subscriber_map: BTreeMap<SubscriberId, Arc<Subscriber>>,
        datum_map: BTreeMap<DataCenter, Datum>,
        fetch_seq_start: FetchSeq,
        fetch_seq_end: FetchSeq,
    ) -> bool {
        let expire_at = Instant::now() + self.ctx.config.push_data_task_debouncing();
        let task = match PushTask::new(
            no_delay,
            push_version,
            data_center,
            addr,
            subscriber_map,
            datum_map,
            fetch_seq_start,
            fetch_seq_end,
            expire_at,
        ) {
            Ok(task) => Arc::new(task),
            Err(e) => {
                tracing::warn!(error = ?e, "rejecting malformed push intent");
                metrics::log_fired("invalid");
                return false;
            },
        };
        self.ctx.fire_push_task(task)
    }

    pub fn config(&self) -> &SessionServerConfig {
        &self.ctx.config
    }

    pub fn pending_len(&self) -> usize {
        self.ctx.pending.len()
    }

    pub fn inflight_len(&self) -> usize {
        self.ctx.inflight.len()
    }

    /// Stop the watchdog and dispatcher workers. Callback continuations
    /// already handed to the transport run to completion on the runtime.
    pub fn shutdown(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for PushProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PushContext {
    config: SessionServerConfig,
    generator: Arc<dyn PushDataGenerator>,
    client_node: Arc<dyn ClientNodeService>,
    pending: PendingBuffer,
    inflight: InflightRegistry,
    wakeup: Notify,
    dispatch_queues: Vec<mpsc::Sender<Arc<PushTask>>>,
}

impl PushContext {
    fn fire_push_task(&self, task: Arc<PushTask>) -> bool {
        match self.pending.offer(task.clone()) {
            OfferOutcome::Fresh => {
                metrics::log_fired("fresh");
            },
            OfferOutcome::Replaced => {
                tracing::debug!(
                    trace_id = %task.trace_id,
                    "replaced older pending task for the same destination"
                );
                metrics::log_fired("replaced");
            },
            OfferOutcome::Conflict => {
                tracing::info!(
                    trace_id = %task.trace_id,
                    fetch_seq_start = task.fetch_seq_start,
                    fetch_seq_end = task.fetch_seq_end,
                    "pending task conflicts with one that is not older, dropping"
                );
                metrics::log_fired("conflict");
                return false;
            },
        }
        if task.no_delay {
            self.wakeup.notify_one();
        }
        true
    }

    /// Single cooperative worker draining the pending buffer. Wake-up
    /// signals between iterations coalesce into one extra iteration.
    async fn watchdog_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = self.wakeup.notified() => {},
            }
            if self.config.is_stop_push() {
                continue;
            }
            for task in self.pending.drain_ready(Instant::now()) {
                self.submit(task);
            }
        }
    }

    /// Hand a ready task to the worker owning its pushing key. A full or
    /// closed queue drops the task; the next intent for its pending key
    /// recreates the work.
    fn submit(&self, task: Arc<PushTask>) {
        let mut hasher = DefaultHasher::new();
        task.pushing_key_of().hash(&mut hasher);
        let slot = hasher.finish() as usize % self.dispatch_queues.len();
        if let Err(e) = self.dispatch_queues[slot].try_send(task) {
            let task = match &e {
                mpsc::error::TrySendError::Full(task) => task,
                mpsc::error::TrySendError::Closed(task) => task,
            };
            tracing::error!(
                trace_id = %task.trace_id,
                slot,
                "dispatcher rejected push task, dropping"
            );
            metrics::log_submit_rejected();
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Arc<PushTask>>) {
        while let Some(task) = rx.recv().await {
            self.clone().run_task(task);
        }
    }

    fn run_task(self: Arc<Self>, task: Arc<PushTask>) {
        if self.config.is_stop_push() {
            return;
        }
        let pushing_key = task.pushing_key_of();
        if !self.check_pushing(&task, &pushing_key) {
            return;
        }
        if let Err(e) = self.clone().dispatch(&task, &pushing_key) {
            self.inflight.remove_task(&pushing_key, &task);
            tracing::error!(
                trace_id = %task.trace_id,
                error = ?e,
                "failed dispatching push task, dropping"
            );
            metrics::log_failed("dispatch");
        }
    }

    /// Decide whether `task` may go out now, given what is in flight for its
    /// pushing key.
    fn check_pushing(&self, task: &Arc<PushTask>, pushing_key: &PushingKey) -> bool {
        let Some(prev) = self.inflight.get(pushing_key) else {
            // Nothing in flight. The snapshot may still be stale if another
            // path already delivered a newer one to a subscriber.
            for subscriber in task.subscriber_map.values() {
                if !subscriber.check_version(&task.data_center, task.fetch_seq_start) {
                    tracing::warn!(
                        trace_id = %task.trace_id,
                        subscriber = %subscriber.id(),
                        fetch_seq_start = task.fetch_seq_start,
                        "subscriber already acknowledged a newer snapshot, skipping push"
                    );
                    metrics::log_skipped("stale_version");
                    return false;
                }
            }
            return true;
        };
        if !task.after_than(&prev) {
            tracing::info!(
                trace_id = %task.trace_id,
                prev_trace_id = %prev.trace_id,
                "task is not newer than the in-flight push, skipping"
            );
            metrics::log_skipped("not_after");
            return false;
        }
        let pushed_at = prev.pushed_at().unwrap_or(prev.created_at);
        let span = Instant::now().duration_since(pushed_at);
        if span > 2 * self.config.client_node_exchange_timeout() {
            tracing::warn!(
                prev_trace_id = %prev.trace_id,
                ?span,
                "callback never arrived, evicting stuck push"
            );
            metrics::log_stuck_evicted();
            self.inflight.remove(pushing_key);
            true
        } else {
            // The prior push is still inside its callback window; come back
            // once it resolves.
            self.retry(task.clone(), "waiting");
            false
        }
    }

    fn dispatch(self: Arc<Self>, task: &Arc<PushTask>, pushing_key: &PushingKey) -> anyhow::Result<()> {
        let merged =
            self.generator
                .merge_datum(&task.subscriber, &task.data_center, &task.datum_map)?;
        let payload =
            self.generator
                .create_push_data(merged, &task.subscriber_map, task.push_version)?;
        task.mark_pushed(Instant::now());
        self.inflight.insert(pushing_key.clone(), task.clone());
        metrics::log_dispatched();
        tracing::debug!(
            trace_id = %task.trace_id,
            addr = %task.subscriber.source_address(),
            push_version = task.push_version,
            "handing push to transport"
        );

        let ctx = self;
        let task = task.clone();
        let pushing_key = pushing_key.clone();
        tokio::spawn(async move {
            let addr = task.subscriber.source_address();
            match ctx.client_node.push(payload, addr).await {
                Ok(()) => ctx.on_push_success(pushing_key, task),
                Err(e) => ctx.on_push_failure(pushing_key, task, e),
            }
        });
        Ok(())
    }

    fn on_push_success(&self, pushing_key: PushingKey, task: Arc<PushTask>) {
        let entry_versions = task
            .datum_map
            .get(&task.data_center)
            .map(Datum::entry_versions)
            .unwrap_or_default();
        for subscriber in task.subscriber_map.values() {
            let advanced = subscriber.check_and_update_version(
                &task.data_center,
                task.push_version,
                &entry_versions,
                task.fetch_seq_start,
                task.fetch_seq_end,
            );
            if !advanced {
                // Another delivery already moved the subscriber past this
                // snapshot; the push itself still counts.
                tracing::warn!(
                    trace_id = %task.trace_id,
                    subscriber = %subscriber.id(),
                    "push acknowledged but subscriber version did not advance"
                );
                metrics::log_version_not_advanced();
            }
        }
        self.inflight.remove_task(&pushing_key, &task);
        metrics::log_success();
        tracing::debug!(trace_id = %task.trace_id, "push acknowledged");
    }

    fn on_push_failure(&self, pushing_key: PushingKey, task: Arc<PushTask>, err: TransportError) {
        self.inflight.remove_task(&pushing_key, &task);
        match err {
            TransportError::InvokeTimeout => {
                tracing::error!(
                    trace_id = %task.trace_id,
                    addr = %task.subscriber.source_address(),
                    "push timed out waiting for the client callback"
                );
                metrics::log_failed("timeout");
                self.retry(task, "callback_err");
            },
            TransportError::Invoke {
                connected: true,
                cause,
            } => {
                tracing::error!(
                    trace_id = %task.trace_id,
                    error = ?cause,
                    "push failed with the channel still connected"
                );
                metrics::log_failed("connected");
                self.retry(task, "callback_err");
            },
            TransportError::Invoke {
                connected: false,
                cause,
            } => {
                // A dead channel means the client is gone; a later intent
                // re-establishes state if it reconnects.
                tracing::warn!(
                    trace_id = %task.trace_id,
                    error = ?cause,
                    "push failed with the channel disconnected, dropping"
                );
                metrics::log_failed("disconnected");
            },
        }
    }

    fn retry(&self, task: Arc<PushTask>, reason: &'static str) {
        let retries = task.next_retry();
        if retries > self.config.push_task_retry_times() {
            tracing::info!(
                trace_id = %task.trace_id,
                retries,
                "retry budget spent, dropping push task"
            );
            metrics::log_retry_exhausted();
            return;
        }
        let backoff = self.retry_backoff(retries);
        task.set_expire_at(Instant::now() + backoff);
        tracing::debug!(
            trace_id = %task.trace_id,
            reason,
            retries,
            ?backoff,
            "requeueing push task"
        );
        metrics::log_retry(reason);
        self.fire_push_task(task);
    }

    /// Linear back-off: the first retry waits the initial delay, each later
    /// one adds the increment.
    fn retry_backoff(&self, retries: u32) -> Duration {
        self.config.push_data_task_retry_first_delay()
            + self.config.push_data_task_retry_increment_delay() * retries.saturating_sub(1)
    }
}
