//! Prometheus counters for reconciliation outcomes.
//!
//! Carried forward as ambient engineering even though nothing above
//! mentions metrics: every operator in this lineage exposes them, and
//! this crate keeps the same static-counter convention.

use std::sync::LazyLock;

use prometheus::{opts, register_counter_vec, register_int_counter, CounterVec, IntCounter};

pub static RECONCILIATION_SUCCESS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "kube_reconcile_core_reconciliation_success_total",
        "Number of reconciliations that completed without error"
    )
    .expect("metrics 'kube_reconcile_core_reconciliation_success_total' to not be already initialized")
});

pub static RECONCILIATION_FAILED: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        opts!(
            "kube_reconcile_core_reconciliation_failed_total",
            "Number of reconciliations that failed, by error kind"
        ),
        &["kind"]
    )
    .expect("metrics 'kube_reconcile_core_reconciliation_failed_total' to not be already initialized")
});

pub static EVENTS_COALESCED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "kube_reconcile_core_events_coalesced_total",
        "Number of events superseded by a newer event for the same identity before dispatch"
    )
    .expect("metrics 'kube_reconcile_core_events_coalesced_total' to not be already initialized")
});

pub static RETRIES_EXHAUSTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "kube_reconcile_core_retries_exhausted_total",
        "Number of events dropped after exhausting their retry policy"
    )
    .expect("metrics 'kube_reconcile_core_retries_exhausted_total' to not be already initialized")
});
