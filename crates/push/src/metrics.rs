use std::sync::LazyLock;

use prometheus::{
    IntCounter,
    IntCounterVec,
    Opts,
    Registry,
};

/// Registry holding every collector of the push core, for the process'
/// scrape endpoint to gather.
pub static PUSH_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("statically valid counter spec");
    PUSH_METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter registered twice");
    counter
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("statically valid counter spec");
    PUSH_METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter registered twice");
    counter
}

static PUSH_FIRED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter_vec(
        "push_fired_total",
        "Push intents offered to the pending buffer, by outcome",
        &["outcome"],
    )
});

pub fn log_fired(outcome: &'static str) {
    PUSH_FIRED_TOTAL.with_label_values(&[outcome]).inc();
}

static PUSH_DISPATCHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_counter(
        "push_dispatched_total",
        "Payloads handed to the client transport",
    )
});

pub fn log_dispatched() {
    PUSH_DISPATCHED_TOTAL.inc();
}

static PUSH_SUBMIT_REJECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_counter(
        "push_submit_rejected_total",
        "Ready tasks dropped because a dispatcher queue was full or closed",
    )
});

pub fn log_submit_rejected() {
    PUSH_SUBMIT_REJECTED_TOTAL.inc();
}

static PUSH_SKIPPED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter_vec(
        "push_skipped_total",
        "Tasks dropped by the pre-dispatch freshness check, by reason",
        &["reason"],
    )
});

pub fn log_skipped(reason: &'static str) {
    PUSH_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
}

static PUSH_STUCK_EVICTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_counter(
        "push_stuck_evicted_total",
        "In-flight pushes force-removed after exceeding the callback window",
    )
});

pub fn log_stuck_evicted() {
    PUSH_STUCK_EVICTED_TOTAL.inc();
}

static PUSH_SUCCESS_TOTAL: LazyLock<IntCounter> =
    LazyLock::new(|| register_counter("push_success_total", "Pushes acknowledged by the client"));

pub fn log_success() {
    PUSH_SUCCESS_TOTAL.inc();
}

static PUSH_FAILED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter_vec("push_failed_total", "Pushes that failed, by kind", &["kind"])
});

pub fn log_failed(kind: &'static str) {
    PUSH_FAILED_TOTAL.with_label_values(&[kind]).inc();
}

static PUSH_RETRY_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_counter_vec(
        "push_retry_total",
        "Tasks requeued for retry, by reason",
        &["reason"],
    )
});

pub fn log_retry(reason: &'static str) {
    PUSH_RETRY_TOTAL.with_label_values(&[reason]).inc();
}

static PUSH_RETRY_EXHAUSTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_counter(
        "push_retry_exhausted_total",
        "Tasks dropped after spending their retry budget",
    )
});

pub fn log_retry_exhausted() {
    PUSH_RETRY_EXHAUSTED_TOTAL.inc();
}

static PUSH_VERSION_NOT_ADVANCED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_counter(
        "push_version_not_advanced_total",
        "Successful pushes whose subscriber version was already past the snapshot",
    )
});

pub fn log_version_not_advanced() {
    PUSH_VERSION_NOT_ADVANCED_TOTAL.inc();
}
