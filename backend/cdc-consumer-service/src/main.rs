use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use cdc_consumer_service::cdc::SubscriptionManager;
use cdc_consumer_service::health::{HealthReporter, KafkaMetadataProbe};
use cdc_consumer_service::{build_router, http, Config};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting cdc-consumer-service");

    let config = Config::from_env().context("Failed to load configuration")?;
    let router = build_router(&config.topics).context("Failed to build topic router")?;

    info!(
        customer_topic = %config.topics.customers,
        order_topic = %config.topics.orders,
        http_port = config.http_port,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (reporter, streams) = match &config.kafka {
        Some(kafka) => {
            info!(
                brokers = %kafka.brokers,
                group_id = %kafka.group_id,
                auto_offset_reset = %kafka.auto_offset_reset,
                "Kafka consumer configured"
            );

            let streams = SubscriptionManager::new(kafka.clone(), router)
                .start(shutdown_rx)
                .context("Failed to start CDC subscriptions")?;

            let probe = KafkaMetadataProbe::new(
                kafka.brokers.clone(),
                config.topics.customers.clone(),
                config.health_probe_timeout,
            );
            (
                HealthReporter::new(Arc::new(probe), config.health_probe_timeout),
                streams,
            )
        }
        None => {
            warn!("KAFKA_BROKERS not set - CDC consumption disabled");
            (HealthReporter::not_configured(), Vec::new())
        }
    };

    let reporter = web::Data::new(reporter);

    info!("Starting HTTP server on 0.0.0.0:{}", config.http_port);

    // Stops on SIGINT/SIGTERM after draining in-flight requests
    HttpServer::new(move || {
        App::new()
            .app_data(reporter.clone())
            .wrap(middleware::Logger::default())
            .configure(http::configure)
    })
    .bind(("0.0.0.0", config.http_port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")?;

    info!("HTTP server stopped, shutting down CDC streams");
    let _ = shutdown_tx.send(true);

    for handle in streams {
        if let Err(e) = handle.await {
            error!("CDC stream task failed: {}", e);
        }
    }

    info!("cdc-consumer-service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,cdc_consumer_service=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
