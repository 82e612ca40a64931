use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    net::SocketAddr,
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
    },
};

use parking_lot::Mutex;
use registry_types::{
    AssembleType,
    ClientVersion,
    DataCenter,
    DataInfoId,
    Datum,
    FetchSeq,
    PushVersion,
    Scope,
    Subscriber,
    SubscriberId,
    TraceId,
};
use tokio::time::Instant;

/// Coalescing identity of a push intent. Two intents with the same pending
/// key are the same conversation; only the freshest survives in the pending
/// buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub data_center: DataCenter,
    pub addr: SocketAddr,
    pub subscriber_ids: BTreeSet<SubscriberId>,
}

/// In-flight identity of a push. The dispatcher serializes on this key and
/// the in-flight registry holds at most one task per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PushingKey {
    pub data_info_id: DataInfoId,
    pub addr: SocketAddr,
    pub scope: Scope,
    pub assemble_type: AssembleType,
    pub client_version: ClientVersion,
}

/// One push intent: deliver the `datum_map` snapshot for `data_center` to the
/// subscribers in `subscriber_map` at `addr`.
///
/// The payload fields are fixed at construction. Three fields move afterward
/// and are written from other threads, so they live in cells:
///
/// - `expire_at`: pulled earlier when a replacement inherits an older debounce
///   deadline, pushed later when a retry backs off.
/// - `pushed_at`: stamped when the task is handed to the transport.
/// - `retry_count`: bumped on every retry, across requeues of the same task.
pub struct PushTask {
    pub trace_id: TraceId,
    pub created_at: Instant,
    pub no_delay: bool,
    pub fetch_seq_start: FetchSeq,
    pub fetch_seq_end: FetchSeq,
    pub data_center: DataCenter,
    pub push_version: PushVersion,
    pub datum_map: BTreeMap<DataCenter, Datum>,
    pub addr: SocketAddr,
    pub subscriber_map: BTreeMap<SubscriberId, Arc<Subscriber>>,
    /// Representative for keying; every subscriber in `subscriber_map` shares
    /// its (data_info_id, scope, assemble_type, client_version) tuple.
    pub subscriber: Arc<Subscriber>,

    expire_at: Mutex<Instant>,
    pushed_at: Mutex<Option<Instant>>,
    retry_count: AtomicU32,
}

impl PushTask {
    pub fn new(
        no_delay: bool,
        push_version: PushVersion,
        data_center: DataCenter,
        addr: SocketAddr,
        subscriber_map: BTreeMap<SubscriberId, Arc<Subscriber>>,
        datum_map: BTreeMap<DataCenter, Datum>,
        fetch_seq_start: FetchSeq,
        fetch_seq_end: FetchSeq,
        expire_at: Instant,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            fetch_seq_start <= fetch_seq_end,
            "fetch sequence range inverted: [{fetch_seq_start}, {fetch_seq_end}]",
        );
        let Some(representative) = subscriber_map.values().next().cloned() else {
            anyhow::bail!("push intent carries no subscribers");
        };
        for subscriber in subscriber_map.values() {
            anyhow::ensure!(
                subscriber.data_info_id() == representative.data_info_id()
                    && subscriber.scope() == representative.scope()
                    && subscriber.assemble_type() == representative.assemble_type()
                    && subscriber.client_version() == representative.client_version(),
                "subscriber {} disagrees with {} on the pushing identity tuple",
                subscriber.id(),
                representative.id(),
            );
        }
        Ok(Self {
            trace_id: TraceId::new(),
            created_at: Instant::now(),
            no_delay,
            fetch_seq_start,
            fetch_seq_end,
            data_center,
            push_version,
            datum_map,
            addr,
            subscriber_map,
            subscriber: representative,
            expire_at: Mutex::new(expire_at),
            pushed_at: Mutex::new(None),
            retry_count: AtomicU32::new(0),
        })
    }

    pub fn pending_key_of(&self) -> PendingKey {
        PendingKey {
            data_center: self.data_center.clone(),
            addr: self.addr,
            subscriber_ids: self.subscriber_map.keys().cloned().collect(),
        }
    }

    pub fn pushing_key_of(&self) -> PushingKey {
        PushingKey {
            data_info_id: self.subscriber.data_info_id().clone(),
            addr: self.addr,
            scope: self.subscriber.scope(),
            assemble_type: self.subscriber.assemble_type(),
            client_version: self.subscriber.client_version(),
        }
    }

    /// Freshness order: `self` strictly supersedes `other` iff its fetch
    /// range starts at or past the end of `other`'s. Overlapping ranges are
    /// not comparable and count as a conflict at the call sites.
    pub fn after_than(&self, other: &PushTask) -> bool {
        self.fetch_seq_start >= other.fetch_seq_end
    }

    pub fn expire_at(&self) -> Instant {
        *self.expire_at.lock()
    }

    pub fn set_expire_at(&self, deadline: Instant) {
        *self.expire_at.lock() = deadline;
    }

    pub fn pushed_at(&self) -> Option<Instant> {
        *self.pushed_at.lock()
    }

    pub fn mark_pushed(&self, now: Instant) {
        *self.pushed_at.lock() = Some(now);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    /// Bump the retry counter, returning the new count.
    pub fn next_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl std::fmt::Debug for PushTask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PushTask")
            .field("trace_id", &self.trace_id)
            .field("data_center", &self.data_center)
            .field("addr", &self.addr)
            .field("data_info_id", self.subscriber.data_info_id())
            .field("push_version", &self.push_version)
            .field(
                "fetch_seq",
                &(self.fetch_seq_start..=self.fetch_seq_end),
            )
            .field("no_delay", &self.no_delay)
            .field("retry_count", &self.retry_count())
            .finish()
    }
}
