use std::{
    collections::{
        BTreeMap,
        VecDeque,
    },
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use maplit::btreemap;
use parking_lot::Mutex;
use proptest::prelude::*;
use registry_types::{
    AssembleType,
    ClientVersion,
    DataCenter,
    DataEntry,
    DataInfoId,
    Datum,
    Scope,
    Subscriber,
    SubscriberId,
};
use tokio::time::Instant;

use crate::{
    api::{
        ClientNodeService,
        PushDataGenerator,
        TransportError,
    },
    config::SessionServerConfig,
    state::PendingBuffer,
    task::PushTask,
    worker::PushProcessor,
};

/// Encodes `data_info_id|push_version|datum_version` so tests can tell which
/// snapshot a recorded push carried.
struct TestDataGenerator;

impl PushDataGenerator for TestDataGenerator {
    fn merge_datum(
        &self,
        subscriber: &Subscriber,
        data_center: &DataCenter,
        datum_map: &BTreeMap<DataCenter, Datum>,
    ) -> anyhow::Result<Datum> {
        Ok(datum_map.get(data_center).cloned().unwrap_or_else(|| {
            Datum::new(subscriber.data_info_id().clone(), data_center.clone(), 0)
        }))
    }

    fn create_push_data(
        &self,
        merged: Datum,
        _subscriber_map: &BTreeMap<SubscriberId, Arc<Subscriber>>,
        push_version: u64,
    ) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(format!(
            "{}|{}|{}",
            merged.data_info_id, push_version, merged.version
        )))
    }
}

#[derive(Clone, Copy)]
enum PushOutcome {
    Succeed,
    Timeout,
    FailConnected,
    FailDisconnected,
    /// Never resolve; the callback simply does not arrive.
    Hang,
}

#[derive(Default)]
struct TestClientNode {
    outcomes: Mutex<VecDeque<PushOutcome>>,
    pushes: Mutex<Vec<(Bytes, SocketAddr, Instant)>>,
}

impl TestClientNode {
    fn script(&self, outcomes: &[PushOutcome]) {
        self.outcomes.lock().extend(outcomes.iter().copied());
    }

    fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    fn payloads(&self) -> Vec<String> {
        self.pushes
            .lock()
            .iter()
            .map(|(payload, ..)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

#[async_trait]
impl ClientNodeService for TestClientNode {
    async fn push(&self, payload: Bytes, addr: SocketAddr) -> Result<(), TransportError> {
        self.pushes.lock().push((payload, addr, Instant::now()));
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(PushOutcome::Succeed);
        match outcome {
            PushOutcome::Succeed => Ok(()),
            PushOutcome::Timeout => Err(TransportError::InvokeTimeout),
            PushOutcome::FailConnected => Err(TransportError::Invoke {
                connected: true,
                cause: anyhow::anyhow!("client rejected the push"),
            }),
            PushOutcome::FailDisconnected => Err(TransportError::Invoke {
                connected: false,
                cause: anyhow::anyhow!("connection reset"),
            }),
            PushOutcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            },
        }
    }
}

struct PushTest {
    processor: PushProcessor,
    client: Arc<TestClientNode>,
}

/// Seed timings from the scenario table: debounce 100ms, retry 50ms + 50ms
/// up to 2 retries, exchange timeout 500ms.
fn push_test() -> PushTest {
    let config = SessionServerConfig::from_env();
    config.set_push_data_task_debouncing_millis(100);
    config.set_push_data_task_retry_first_delay_millis(50);
    config.set_push_data_task_retry_increment_delay_millis(50);
    config.set_push_task_retry_times(2);
    config.set_client_node_exchange_timeout_millis(500);

    let client = Arc::new(TestClientNode::default());
    let processor = PushProcessor::new(config, Arc::new(TestDataGenerator), client.clone());
    PushTest { processor, client }
}

fn subscriber(id: &str, data_info_id: &str, source: &str) -> Arc<Subscriber> {
    Arc::new(Subscriber::new(
        SubscriberId::from(id),
        DataInfoId::from(data_info_id),
        Scope::DataCenter,
        AssembleType::Sub,
        ClientVersion::V2,
        source.parse().unwrap(),
    ))
}

fn datum(data_info_id: &str, data_center: &str, version: u64) -> Datum {
    let mut datum = Datum::new(
        DataInfoId::from(data_info_id),
        DataCenter::from(data_center),
        version,
    );
    datum.entries.insert(
        "z1".to_owned(),
        DataEntry {
            version,
            payload: Bytes::from_static(b"entry"),
        },
    );
    datum
}

fn fire(
    test: &PushTest,
    no_delay: bool,
    push_version: u64,
    data_center: &str,
    subscribers: &[Arc<Subscriber>],
    snapshot: Datum,
    seq: (u64, u64),
) -> bool {
    let subscriber_map = subscribers
        .iter()
        .map(|s| (s.id().clone(), s.clone()))
        .collect();
    test.processor.fire_push(
        no_delay,
        push_version,
        DataCenter::from(data_center),
        "10.0.0.9:7700".parse().unwrap(),
        subscriber_map,
        btreemap! { DataCenter::from(data_center) => snapshot },
        seq.0,
        seq.1,
    )
}

#[tokio::test(start_paused = true)]
async fn single_push_success() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let dc = DataCenter::from("A");

    assert!(fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    assert_eq!(test.processor.pending_len(), 1);
    assert_eq!(test.client.push_count(), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.processor.pending_len(), 0);
    assert_eq!(test.processor.inflight_len(), 0);
    assert_eq!(s1.acked_push_version(&dc), Some(1));
    assert_eq!(s1.acked_fetch_seq(&dc), Some((10, 10)));

    // Nothing further fires without a new intent.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(test.client.push_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_to_one_push() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");

    for seq in [10u64, 11, 12] {
        assert!(fire(
            &test,
            false,
            1,
            "A",
            &[s1.clone()],
            datum("svc.orders", "A", seq),
            (seq, seq),
        ));
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    assert_eq!(test.processor.pending_len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.client.payloads(), vec!["svc.orders|1|12".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn overlapping_range_conflicts_and_first_wins() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");

    assert!(fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    // [9, 11] is not strictly after [10, 10]; rejected.
    assert!(!fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 9), (9, 11)));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.client.payloads(), vec!["svc.orders|1|10".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn no_delay_replacement_preempts_debounce() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");

    assert!(fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    assert!(fire(&test, true, 1, "A", &[s1.clone()], datum("svc.orders", "A", 11), (11, 11)));

    // Far less than the 100ms debounce window: the wake-up signal, not the
    // periodic tick, must deliver this one.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.client.payloads(), vec!["svc.orders|1|11".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_then_succeeds() {
    let test = push_test();
    test.client.script(&[PushOutcome::FailConnected]);
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let dc = DataCenter::from("A");

    assert!(fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(s1.acked_push_version(&dc), None);

    // First retry fires after the 50ms back-off (plus watchdog slack).
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(test.client.push_count(), 2);
    assert_eq!(s1.acked_push_version(&dc), Some(1));
    assert_eq!(test.processor.inflight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_bounds_attempts() {
    let test = push_test();
    test.client.script(&[
        PushOutcome::FailConnected,
        PushOutcome::Timeout,
        PushOutcome::FailConnected,
    ]);
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let dc = DataCenter::from("A");

    assert!(fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));

    // Initial attempt plus push_task_retry_times = 2 retries, then the task
    // is dropped for good.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(test.client.push_count(), 3);
    assert_eq!(s1.acked_push_version(&dc), None);
    assert_eq!(test.processor.pending_len(), 0);
    assert_eq!(test.processor.inflight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnected_channel_does_not_retry() {
    let test = push_test();
    test.client.script(&[PushOutcome::FailDisconnected]);
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");

    assert!(fire(&test, false, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.processor.pending_len(), 0);
    assert_eq!(test.processor.inflight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn waiting_on_inflight_consumes_retry_budget() {
    let test = push_test();
    test.client.script(&[PushOutcome::Hang]);
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");

    assert!(fire(&test, true, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.processor.inflight_len(), 1);

    // Well inside the 1000ms stuck threshold: the newer task keeps getting
    // parked behind the hung push until its budget runs out.
    assert!(fire(&test, true, 1, "A", &[s1.clone()], datum("svc.orders", "A", 11), (11, 11)));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.processor.inflight_len(), 1);
    assert_eq!(test.processor.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn stuck_push_is_evicted_after_threshold() {
    let test = push_test();
    test.client.script(&[PushOutcome::Hang]);
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let dc = DataCenter::from("A");

    assert!(fire(&test, true, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(test.processor.inflight_len(), 1);

    // 1100ms later the span exceeds 2 x 500ms: the hung push is forced out
    // and the newer snapshot goes through.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(fire(&test, true, 2, "A", &[s1.clone()], datum("svc.orders", "A", 11), (11, 11)));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(test.client.push_count(), 2);
    assert_eq!(test.processor.inflight_len(), 0);
    assert_eq!(s1.acked_push_version(&dc), Some(2));
}

#[tokio::test(start_paused = true)]
async fn stop_push_switch_halts_dispatch() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let dc = DataCenter::from("A");
    test.processor.config().set_stop_push(true);

    assert!(fire(&test, true, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(test.client.push_count(), 0);
    assert_eq!(test.processor.pending_len(), 1);

    // Flipping the switch back releases the buffered work.
    test.processor.config().set_stop_push(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(s1.acked_push_version(&dc), Some(1));
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_is_skipped_without_dispatch() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let dc = DataCenter::from("A");

    assert!(fire(&test, true, 2, "A", &[s1.clone()], datum("svc.orders", "A", 20), (20, 22)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(s1.acked_push_version(&dc), Some(2));
    assert_eq!(test.client.push_count(), 1);

    // A snapshot from before the acknowledged window never reaches the
    // transport: check_version catches it at dispatch time. It passes the
    // pending buffer since that one is keyed by conversation, not version.
    assert!(fire(&test, true, 1, "A", &[s1.clone()], datum("svc.orders", "A", 10), (10, 10)));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(test.client.push_count(), 1);
    assert_eq!(s1.acked_push_version(&dc), Some(2));
}

#[tokio::test(start_paused = true)]
async fn distinct_pushing_keys_run_independently() {
    let test = push_test();
    let s1 = subscriber("s1", "svc.orders", "10.0.0.9:7700");
    let s2 = subscriber("s2", "svc.inventory", "10.0.0.9:7700");
    test.client.script(&[PushOutcome::Hang]);

    assert!(fire(&test, true, 1, "A", &[s1], datum("svc.orders", "A", 10), (10, 10)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(test.processor.inflight_len(), 1);

    // A hung push on svc.orders does not hold up svc.inventory.
    assert!(fire(&test, true, 1, "A", &[s2.clone()], datum("svc.inventory", "A", 10), (10, 10)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(test.client.push_count(), 2);
    assert_eq!(s2.acked_push_version(&DataCenter::from("A")), Some(1));
}

fn seq_range() -> impl Strategy<Value = (u64, u64)> {
    (0u64..50).prop_flat_map(|start| (Just(start), start..50))
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, failure_persistence: None, ..ProptestConfig::default() })]

    /// Coalescing freshness: after any offer sequence for one pending key,
    /// the surviving entry is the running after_than winner, and it keeps the
    /// first accepted task's debounce deadline.
    #[test]
    fn coalescing_keeps_freshest_and_first_deadline(ranges in prop::collection::vec(seq_range(), 1..20)) {
        let sub = subscriber("s1", "svc.orders", "10.0.0.9:7700");
        let buffer = PendingBuffer::new();
        let base = Instant::now();

        let mut winner: Option<(u64, u64)> = None;
        for (i, (start, end)) in ranges.iter().copied().enumerate() {
            let task = Arc::new(
                PushTask::new(
                    false,
                    1,
                    DataCenter::from("A"),
                    "10.0.0.9:7700".parse().unwrap(),
                    btreemap! { sub.id().clone() => sub.clone() },
                    BTreeMap::new(),
                    start,
                    end,
                    base + Duration::from_millis(i as u64),
                )
                .unwrap(),
            );
            buffer.offer(task);
            winner = match winner {
                None => Some((start, end)),
                Some((_, prev_end)) if start >= prev_end => Some((start, end)),
                keep => keep,
            };
        }

        let (expected_start, expected_end) = winner.unwrap();
        let key = crate::task::PendingKey {
            data_center: DataCenter::from("A"),
            addr: "10.0.0.9:7700".parse().unwrap(),
            subscriber_ids: [sub.id().clone()].into_iter().collect(),
        };
        let pending = buffer.get(&key).unwrap();
        prop_assert_eq!(pending.fetch_seq_start, expected_start);
        prop_assert_eq!(pending.fetch_seq_end, expected_end);
        // Deadline inherited from the very first offer.
        prop_assert_eq!(pending.expire_at(), base);
    }
}
