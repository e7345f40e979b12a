//! Prometheus counters for push delivery and trigger handling.
//!
//! All metrics live in the global default registry and are exposed by
//! `GET /metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};

static PUSH_MESSAGES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!("notifyd_push_messages_total", "Push messages by delivery outcome"),
        &["outcome"]
    )
    .expect("failed to register notifyd_push_messages_total")
});

static PUSH_BATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!("notifyd_push_batches_total", "Multicast batches by call result"),
        &["result"]
    )
    .expect("failed to register notifyd_push_batches_total")
});

static TOKENS_RETIRED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(opts!(
        "notifyd_tokens_retired_total",
        "Device tokens cleared from user records"
    ))
    .expect("failed to register notifyd_tokens_retired_total")
});

static TRIGGERS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!("notifyd_triggers_total", "Trigger invocations by outcome"),
        &["trigger", "outcome"]
    )
    .expect("failed to register notifyd_triggers_total")
});

/// Force registration so every series shows up on the first scrape.
pub fn init() {
    Lazy::force(&PUSH_MESSAGES);
    Lazy::force(&PUSH_BATCHES);
    Lazy::force(&TOKENS_RETIRED);
    Lazy::force(&TRIGGERS);
}

pub fn record_batch(delivered: usize, failed: usize, transport_ok: bool) {
    let result = if transport_ok { "ok" } else { "transport_error" };
    PUSH_BATCHES.with_label_values(&[result]).inc();
    if delivered > 0 {
        PUSH_MESSAGES
            .with_label_values(&["delivered"])
            .inc_by(delivered as f64);
    }
    if failed > 0 {
        PUSH_MESSAGES
            .with_label_values(&["failed"])
            .inc_by(failed as f64);
    }
}

pub fn record_direct_send(ok: bool) {
    let outcome = if ok { "delivered" } else { "failed" };
    PUSH_MESSAGES.with_label_values(&[outcome]).inc();
}

pub fn record_retired(count: usize) {
    if count > 0 {
        TOKENS_RETIRED.inc_by(count as f64);
    }
}

pub fn record_trigger(trigger: &str, outcome: &str) {
    TRIGGERS.with_label_values(&[trigger, outcome]).inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
