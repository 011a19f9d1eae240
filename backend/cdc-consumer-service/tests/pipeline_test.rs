//! End-to-end record handling through the topic router, without a broker.

use cdc_consumer_service::build_router;
use cdc_consumer_service::cdc::{
    process_detached, Customer, DispatchOutcome, EntityDispatcher, InboundRecord, OperationKind,
    Order, RecordOutcome, TopicRouter,
};
use cdc_consumer_service::config::TopicConfig;
use rdkafka::message::{OwnedMessage, Timestamp};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const CUSTOMERS: &str = "mariadb01.appdb.customers";
const ORDERS: &str = "mariadb01.appdb.orders";

type Seen = Arc<Mutex<Vec<String>>>;

fn recording_router(seen: Seen, failing_offset: Option<i64>) -> TopicRouter {
    let mut customers = EntityDispatcher::<Customer>::new();
    for kind in OperationKind::HANDLED {
        let seen = seen.clone();
        customers
            .register_handler(kind, move |env, ctx| {
                let customer = env.entity();
                seen.lock().unwrap().push(format!(
                    "customer {} id={:?} first={:?} @{}",
                    kind, customer.id, customer.first_name, ctx.offset
                ));
                if Some(ctx.offset) == failing_offset {
                    anyhow::bail!("customer store unavailable");
                }
                Ok(())
            })
            .expect("register customer handler");
    }

    let order_seen = seen;
    let orders = EntityDispatcher::<Order>::new()
        .on(OperationKind::Update, move |env, _| {
            let order = env.entity();
            order_seen.lock().unwrap().push(format!(
                "order update {:?} amount={:?}",
                order.order_number, order.total_amount
            ));
            Ok(())
        })
        .expect("register order handler");

    TopicRouter::builder()
        .route(CUSTOMERS, customers)
        .and_then(|b| b.route(ORDERS, orders))
        .expect("routes")
        .build()
}

fn record<'a>(topic: &'a str, offset: i64, payload: &'a str) -> InboundRecord<'a> {
    InboundRecord::new(topic, 0, offset, Some(payload.as_bytes()))
}

#[test]
fn test_create_reaches_create_handler_once() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), None);

    let outcome = router.process(&record(CUSTOMERS, 7, r#"{"id":1,"first_name":"Ann","__op":"c"}"#));

    assert_eq!(outcome, RecordOutcome::Dispatched(DispatchOutcome::Handled));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![r#"customer Create id=Some(1) first=Some("Ann") @7"#.to_string()]
    );
}

#[test]
fn test_records_handled_in_offset_order() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), None);

    for (offset, op) in [(10, "c"), (11, "u"), (12, "d")] {
        let payload = format!(r#"{{"id":3,"__op":"{}"}}"#, op);
        router.process(&record(CUSTOMERS, offset, &payload));
    }

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "customer Create id=Some(3) first=None @10".to_string(),
            "customer Update id=Some(3) first=None @11".to_string(),
            "customer Delete id=Some(3) first=None @12".to_string(),
        ]
    );
}

#[test]
fn test_failing_handler_does_not_block_next_record() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), Some(20));

    let first = router.process(&record(CUSTOMERS, 20, r#"{"id":1,"__op":"u"}"#));
    let second = router.process(&record(CUSTOMERS, 21, r#"{"id":2,"__op":"u"}"#));

    assert_eq!(first, RecordOutcome::Dispatched(DispatchOutcome::HandlerFailed));
    assert_eq!(second, RecordOutcome::Dispatched(DispatchOutcome::Handled));
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn test_unknown_operation_runs_no_handler() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), None);

    let outcome = router.process(&record(CUSTOMERS, 1, r#"{"id":5,"__op":"x"}"#));
    let missing = router.process(&record(CUSTOMERS, 2, r#"{"id":5}"#));

    assert_eq!(outcome, RecordOutcome::Dispatched(DispatchOutcome::Unrecognized));
    assert_eq!(missing, RecordOutcome::Dispatched(DispatchOutcome::Unrecognized));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_malformed_payload_then_processing_continues() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), None);

    assert_eq!(
        router.process(&record(CUSTOMERS, 30, "{not json")),
        RecordOutcome::DecodeFailed
    );
    assert_eq!(
        router.process(&record(CUSTOMERS, 31, "[1,2,3]")),
        RecordOutcome::DecodeFailed
    );
    assert_eq!(
        router.process(&record(CUSTOMERS, 32, r#"{"id":9,"__op":"r"}"#)),
        RecordOutcome::Dispatched(DispatchOutcome::Handled)
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["customer Snapshot id=Some(9) first=None @32".to_string()]
    );
}

#[test]
fn test_order_update_keeps_exact_amount() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), None);

    let outcome = router.process(&record(
        ORDERS,
        4,
        r#"{"id":2,"order_number":"ORD-2","total_amount":"19.99","status":"PAID","__op":"u","__table":"orders"}"#,
    ));

    assert_eq!(outcome, RecordOutcome::Dispatched(DispatchOutcome::Handled));
    let expected = Decimal::from_str("19.99").unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![format!("order update Some(\"ORD-2\") amount=Some({:?})", expected)]
    );
}

#[test]
fn test_order_event_without_handler_is_still_handled() {
    let router = recording_router(Arc::new(Mutex::new(Vec::new())), None);

    assert_eq!(
        router.process(&record(ORDERS, 5, r#"{"id":2,"__op":"c"}"#)),
        RecordOutcome::Dispatched(DispatchOutcome::Handled)
    );
}

#[test]
fn test_schema_wrapped_payload() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = recording_router(seen.clone(), None);

    let payload = r#"{"schema":{"type":"struct"},"payload":{"id":4,"first_name":"Bo","__op":"c"}}"#;
    router.process(&record(CUSTOMERS, 40, payload));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![r#"customer Create id=Some(4) first=Some("Bo") @40"#.to_string()]
    );
}

#[test]
fn test_default_router_handles_all_operations() {
    let router = build_router(&TopicConfig {
        customers: CUSTOMERS.to_string(),
        orders: ORDERS.to_string(),
    })
    .expect("default router");

    assert_eq!(router.topics(), vec![CUSTOMERS.to_string(), ORDERS.to_string()]);
    for op in ["r", "c", "u", "d"] {
        let payload = format!(r#"{{"id":1,"order_number":"ORD-1","__op":"{}"}}"#, op);
        assert_eq!(
            router.process(&record(ORDERS, 0, &payload)),
            RecordOutcome::Dispatched(DispatchOutcome::Handled)
        );
    }
    assert_eq!(
        router.process(&InboundRecord::new(CUSTOMERS, 0, 1, None)),
        RecordOutcome::Tombstone
    );
}

fn owned(topic: &str, offset: i64, payload: &str) -> OwnedMessage {
    OwnedMessage::new(
        Some(payload.as_bytes().to_vec()),
        None,
        topic.to_string(),
        Timestamp::NotAvailable,
        0,
        offset,
        None,
    )
}

// Same single-threaded runtime flavor the service binary runs its streams on.
#[actix_web::test]
async fn test_slow_handler_does_not_delay_other_topic() {
    const SLOW_HANDLER: Duration = Duration::from_millis(800);

    let customers = EntityDispatcher::<Customer>::new()
        .on(OperationKind::Create, |_, _| {
            std::thread::sleep(SLOW_HANDLER);
            Ok(())
        })
        .expect("register customer handler");
    let orders = EntityDispatcher::<Order>::new()
        .on(OperationKind::Create, |_, _| Ok(()))
        .expect("register order handler");
    let router = TopicRouter::builder()
        .route(CUSTOMERS, customers)
        .and_then(|b| b.route(ORDERS, orders))
        .expect("routes")
        .build();

    let customer_stream = {
        let router = router.clone();
        tokio::spawn(async move {
            process_detached(&router, owned(CUSTOMERS, 1, r#"{"id":1,"__op":"c"}"#)).await
        })
    };

    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let order_outcome =
        process_detached(&router, owned(ORDERS, 1, r#"{"id":2,"__op":"c"}"#)).await;
    let order_elapsed = started.elapsed();

    assert_eq!(
        order_outcome,
        Some(RecordOutcome::Dispatched(DispatchOutcome::Handled))
    );
    assert!(
        order_elapsed < Duration::from_millis(400),
        "order record finished after {:?}",
        order_elapsed
    );

    let customer_outcome = customer_stream.await.expect("customer stream task");
    assert_eq!(
        customer_outcome,
        Some(RecordOutcome::Dispatched(DispatchOutcome::Handled))
    );
    assert!(started.elapsed() >= SLOW_HANDLER - Duration::from_millis(100));
}
