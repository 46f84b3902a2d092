// Process-global gateway metrics.
//
// Counters only; no exporter wiring here. The lifecycle controller
// records per-event outcomes, the delivery paths count dropped sends.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

pub struct GatewayMetrics {
    event_count: Mutex<HashMap<String, u64>>,
    event_errors: Mutex<HashMap<String, u64>>,
    event_duration_sum_ms: Mutex<HashMap<String, u64>>,
    delivery_failures: AtomicU64,
    open_connections: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<GatewayMetrics>> = OnceLock::new();

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self {
            event_count: Mutex::new(HashMap::new()),
            event_errors: Mutex::new(HashMap::new()),
            event_duration_sum_ms: Mutex::new(HashMap::new()),
            delivery_failures: AtomicU64::new(0),
            open_connections: AtomicU64::new(0),
        }
    }
}

fn global() -> &'static Arc<GatewayMetrics> {
    GLOBAL_METRICS.get_or_init(|| Arc::new(GatewayMetrics::default()))
}

/// Record one handled inbound event.
pub fn record_event(event: &str, is_error: bool, duration_ms: u64) {
    let metrics = global();
    add_map(&metrics.event_count, event, 1);
    add_map(&metrics.event_duration_sum_ms, event, duration_ms);
    if is_error {
        add_map(&metrics.event_errors, event, 1);
    }
}

/// Count a dropped send to a closed/gone connection.
pub fn increment_delivery_failures() {
    global().delivery_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn set_open_connections(count: usize) {
    global().open_connections.store(count as u64, Ordering::Relaxed);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub event_count: HashMap<String, u64>,
    pub event_errors: HashMap<String, u64>,
    pub event_duration_sum_ms: HashMap<String, u64>,
    pub delivery_failures: u64,
    pub open_connections: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    let metrics = global();
    MetricsSnapshot {
        event_count: lock_map(&metrics.event_count),
        event_errors: lock_map(&metrics.event_errors),
        event_duration_sum_ms: lock_map(&metrics.event_duration_sum_ms),
        delivery_failures: metrics.delivery_failures.load(Ordering::Relaxed),
        open_connections: metrics.open_connections.load(Ordering::Relaxed),
    }
}

fn add_map(map: &Mutex<HashMap<String, u64>>, key: &str, by: u64) {
    if let Ok(mut guard) = map.lock() {
        *guard.entry(key.to_string()).or_insert(0) += by;
    }
}

fn lock_map(map: &Mutex<HashMap<String, u64>>) -> HashMap<String, u64> {
    map.lock().map(|guard| guard.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_event_accumulates_counts_and_errors() {
        record_event("sendMessage", false, 12);
        record_event("sendMessage", true, 3);

        let snap = snapshot();
        assert!(snap.event_count["sendMessage"] >= 2);
        assert!(snap.event_errors["sendMessage"] >= 1);
        assert!(snap.event_duration_sum_ms["sendMessage"] >= 15);
    }

    #[test]
    fn delivery_failures_accumulate() {
        let before = snapshot().delivery_failures;
        increment_delivery_failures();
        assert!(snapshot().delivery_failures > before);
    }
}
