use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

fn register_counter_vec(name: &str, help: &str) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), &["topic"])
        .unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    counter
}

static RECORDS_RECEIVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "cdc_records_received_total",
        "Total CDC records received from Kafka",
    )
});

static DECODE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "cdc_decode_failures_total",
        "CDC records dropped because the payload could not be decoded",
    )
});

static UNKNOWN_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "cdc_unknown_operations_total",
        "CDC records with an unrecognized operation marker",
    )
});

static HANDLER_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "cdc_handler_failures_total",
        "CDC records whose handler returned an error or panicked",
    )
});

static TOMBSTONES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "cdc_tombstones_total",
        "CDC tombstone records (empty value) skipped",
    )
});

static CONSUMER_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cdc_consumer_errors_total",
        "Total Kafka consumer errors encountered while receiving",
    )
    .unwrap_or_else(|e| panic!("failed to create cdc_consumer_errors_total: {e}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register cdc_consumer_errors_total: {e}"));
    counter
});

pub fn record_received(topic: &str) {
    RECORDS_RECEIVED_TOTAL.with_label_values(&[topic]).inc();
}

pub fn record_decode_failure(topic: &str) {
    DECODE_FAILURES_TOTAL.with_label_values(&[topic]).inc();
}

pub fn record_unknown_operation(topic: &str) {
    UNKNOWN_OPERATIONS_TOTAL.with_label_values(&[topic]).inc();
}

pub fn record_handler_failure(topic: &str) {
    HANDLER_FAILURES_TOTAL.with_label_values(&[topic]).inc();
}

pub fn record_tombstone(topic: &str) {
    TOMBSTONES_TOTAL.with_label_values(&[topic]).inc();
}

pub fn record_consumer_error() {
    CONSUMER_ERRORS_TOTAL.inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
