//! Change-data-capture pipeline: decode → classify → dispatch, fed by one
//! Kafka stream per topic.

pub mod classifier;
pub mod decoder;
pub mod dispatcher;
pub mod models;
pub mod router;
pub mod subscription;

pub use classifier::{classify, classify_marker};
pub use decoder::decode;
pub use dispatcher::{DispatchOutcome, EntityDispatcher, Handler};
pub use models::{
    Customer, DeliveryContext, Entity, Envelope, FieldMap, InboundRecord, OperationKind, Order,
};
pub use router::{RecordOutcome, RecordPipeline, TopicRouter, TopicRouterBuilder};
pub use subscription::{
    process_detached, process_message, ErrorSeverity, ReceiveBackoff, SubscriptionManager,
};
