//! CDC consumer service
//!
//! Consumes Debezium change events for customers and orders from Kafka and
//! hands each one to the business handler registered for its operation.
//!
//! - `cdc`: decoding, classification, dispatch and the Kafka streams
//! - `handlers`: default per-entity business hooks
//! - `health` / `http`: broker connectivity and the HTTP surface

pub mod cdc;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod http;
pub mod metrics;

pub use config::Config;
pub use error::{CdcError, Result};

use cdc::TopicRouter;

/// Router with the default customer and order handlers bound to the
/// configured topics.
pub fn build_router(topics: &config::TopicConfig) -> Result<TopicRouter> {
    Ok(TopicRouter::builder()
        .route(topics.customers.clone(), handlers::customer_dispatcher()?)?
        .route(topics.orders.clone(), handlers::order_dispatcher()?)?
        .build())
}
