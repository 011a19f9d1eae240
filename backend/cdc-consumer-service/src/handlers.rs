//! Business-logic hooks for captured customer and order changes.
//!
//! These are the service's default handlers: they only log. Real side effects
//! (cache sync, search indexing, notifications) replace the bodies below and
//! must tolerate the same record being delivered more than once.

use tracing::debug;

use crate::cdc::{Customer, DeliveryContext, EntityDispatcher, Envelope, OperationKind, Order};
use crate::error::Result;

pub fn customer_dispatcher() -> Result<EntityDispatcher<Customer>> {
    EntityDispatcher::new()
        .on(OperationKind::Snapshot, on_customer_snapshot)?
        .on(OperationKind::Create, on_customer_created)?
        .on(OperationKind::Update, on_customer_updated)?
        .on(OperationKind::Delete, on_customer_deleted)
}

pub fn order_dispatcher() -> Result<EntityDispatcher<Order>> {
    EntityDispatcher::new()
        .on(OperationKind::Snapshot, on_order_snapshot)?
        .on(OperationKind::Create, on_order_created)?
        .on(OperationKind::Update, on_order_updated)?
        .on(OperationKind::Delete, on_order_deleted)
}

fn on_customer_snapshot(event: &Envelope<Customer>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    debug!("Processing customer snapshot for ID: {:?}", event.entity().id);
    Ok(())
}

fn on_customer_created(event: &Envelope<Customer>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    let customer = event.entity();
    debug!(
        "Processing new customer: {} {}",
        customer.first_name.as_deref().unwrap_or_default(),
        customer.last_name.as_deref().unwrap_or_default()
    );
    Ok(())
}

fn on_customer_updated(event: &Envelope<Customer>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    debug!("Processing customer update for ID: {:?}", event.entity().id);
    Ok(())
}

fn on_customer_deleted(event: &Envelope<Customer>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    debug!("Processing customer deletion for ID: {:?}", event.entity().id);
    Ok(())
}

fn on_order_snapshot(event: &Envelope<Order>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    debug!(
        "Processing order snapshot for order: {:?}",
        event.entity().order_number
    );
    Ok(())
}

fn on_order_created(event: &Envelope<Order>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    let order = event.entity();
    debug!(
        "Processing new order: {:?} for customer: {:?}",
        order.order_number, order.customer_id
    );
    Ok(())
}

fn on_order_updated(event: &Envelope<Order>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    let order = event.entity();
    debug!(
        "Processing order update: {:?} - Status: {:?}",
        order.order_number, order.status
    );
    Ok(())
}

fn on_order_deleted(event: &Envelope<Order>, _ctx: &DeliveryContext) -> anyhow::Result<()> {
    debug!(
        "Processing order deletion: {:?}",
        event.entity().order_number
    );
    Ok(())
}
