use actix_web::{web, HttpResponse, Responder};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::health::{HealthReporter, HealthStatus};
use crate::metrics;

#[derive(Debug, Serialize)]
struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    timestamp: String,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    timestamp: String,
    kafka: String,
}

/// Service banner
pub async fn home() -> impl Responder {
    HttpResponse::Ok().json(ServiceInfo {
        service: "Kafka CDC Consumer",
        status: "running",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        description: "Consumer for Debezium CDC events",
    })
}

/// Liveness with broker connectivity.
///
/// Always 200: a degraded broker is reported in the body, not the status code.
pub async fn health(reporter: web::Data<HealthReporter>) -> impl Responder {
    let report = reporter.report().await;

    HttpResponse::Ok().json(HealthResponse {
        status: report.status,
        timestamp: report
            .checked_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        kafka: report.broker.to_string(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(home))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}
