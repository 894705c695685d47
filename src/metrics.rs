// Prometheus metrics for docgate
//
// - Rate limit decisions per category (counter)
// - Rejections per category (counter)
// - Store operation latencies (histogram)
// - Live subscriptions (gauge)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use crate::rate_limit::Category;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref RATE_LIMIT_CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("docgate_rate_limit_checks_total", "Rate limit decisions by category and outcome"),
        &["category", "outcome"]
    ).expect("Failed to create rate limit checks metric");

    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("docgate_rate_limited_total", "Requests rejected by the rate limiter"),
        &["category"]
    ).expect("Failed to create rate limited metric");

    pub static ref OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("docgate_operation_duration_seconds", "Duration of store operations"),
        &["operation"]
    ).expect("Failed to create operation duration metric");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "docgate_active_subscriptions",
        "Number of live snapshot subscriptions"
    ).expect("Failed to create active subscriptions metric");
}

/// Initialize metrics registry - call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RATE_LIMIT_CHECKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMITED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_SUBSCRIPTIONS.clone()))?;
    Ok(())
}

/// Count one limiter decision
pub fn record_check(category: Category, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "rejected" };
    RATE_LIMIT_CHECKS_TOTAL
        .with_label_values(&[category.as_str(), outcome])
        .inc();
    if !allowed {
        RATE_LIMITED_TOTAL
            .with_label_values(&[category.as_str()])
            .inc();
    }
}

/// Observe how long a store operation took
pub fn observe_duration(operation: &str, seconds: f64) {
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(seconds);
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
