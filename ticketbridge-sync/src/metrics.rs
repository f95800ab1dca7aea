//! Contractual metric names and recording helpers.
//!
//! Dashboards key on these exact names; renaming any of them is a breaking
//! change. The two dead-letter gauges must not share a name: a single shared
//! name collides on registration.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const WEBHOOK_ERRORS_TOTAL: &str = "webhook_errors_total";
pub const API_CALLS_TOTAL: &str = "api_calls_total";
pub const API_CALL_DURATION_SECONDS: &str = "api_call_duration_seconds";
pub const RATE_LIMIT_HITS_TOTAL: &str = "rate_limit_hits_total";
pub const DEADLETTER_QUEUE_SIZE_BASIC: &str = "deadletter_queue_size_basic";
pub const DEADLETTER_QUEUE_SIZE_BY_PROVIDER: &str = "deadletter_queue_size_by_provider";
pub const SYNC_EVENTS_TOTAL: &str = "sync_events_total";
pub const MAPPER_WARNINGS_TOTAL: &str = "mapper_warnings_total";

/// Describe every contractual metric once at startup.
pub fn init() {
    assert_ne!(
        DEADLETTER_QUEUE_SIZE_BASIC, DEADLETTER_QUEUE_SIZE_BY_PROVIDER,
        "the two dead-letter gauges must not share a name"
    );

    describe_counter!(HTTP_REQUESTS_TOTAL, "Inbound HTTP requests by path, method, status");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "Inbound HTTP request latency");
    describe_counter!(WEBHOOK_ERRORS_TOTAL, "Webhook rejections by provider and error kind");
    describe_counter!(API_CALLS_TOTAL, "Outbound API calls by provider, operation, status");
    describe_histogram!(API_CALL_DURATION_SECONDS, "Outbound API call latency");
    describe_counter!(RATE_LIMIT_HITS_TOTAL, "Inbound requests rejected by the rate limit");
    describe_gauge!(DEADLETTER_QUEUE_SIZE_BASIC, "Unarchived dead-letter entries");
    describe_gauge!(
        DEADLETTER_QUEUE_SIZE_BY_PROVIDER,
        "Unarchived dead-letter entries per provider"
    );
    describe_counter!(SYNC_EVENTS_TOTAL, "Sync pipeline results by direction and outcome");
    describe_counter!(MAPPER_WARNINGS_TOTAL, "Field mapper fallbacks by kind");
}

pub fn webhook_error(provider: &str, kind: &str) {
    let labels = [("provider", provider.to_string()), ("kind", kind.to_string())];
    counter!(WEBHOOK_ERRORS_TOTAL, &labels).increment(1);
}

pub fn rate_limit_hit(path: &str) {
    let labels = [("path", path.to_string())];
    counter!(RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

pub fn sync_event(direction: &str, outcome: &str) {
    let labels = [
        ("direction", direction.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(SYNC_EVENTS_TOTAL, &labels).increment(1);
}

pub fn api_call(provider: &str, op: &str, status: &str, duration_secs: f64) {
    let call_labels = [
        ("provider", provider.to_string()),
        ("op", op.to_string()),
        ("status", status.to_string()),
    ];
    counter!(API_CALLS_TOTAL, &call_labels).increment(1);

    let duration_labels = [
        ("provider", provider.to_string()),
        ("op", op.to_string()),
    ];
    histogram!(API_CALL_DURATION_SECONDS, &duration_labels).record(duration_secs);
}

pub fn mapper_warning(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(MAPPER_WARNINGS_TOTAL, &labels).increment(1);
}

pub fn set_deadletter_gauges(total: i64, by_provider: &[(String, i64)]) {
    gauge!(DEADLETTER_QUEUE_SIZE_BASIC).set(total as f64);
    for (provider, count) in by_provider {
        let labels = [("provider", provider.clone())];
        gauge!(DEADLETTER_QUEUE_SIZE_BY_PROVIDER, &labels).set(*count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadletter_gauge_names_are_distinct() {
        assert_ne!(DEADLETTER_QUEUE_SIZE_BASIC, DEADLETTER_QUEUE_SIZE_BY_PROVIDER);
    }
}
