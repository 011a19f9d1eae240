use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Operation kinds emitted by the capture tool.
///
/// `Unknown` covers every marker outside `c/u/d/r`, including a missing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    /// Initial snapshot read (r)
    Snapshot,
    /// Row inserted (c)
    Create,
    /// Row updated (u)
    Update,
    /// Row deleted (d)
    Delete,
    Unknown,
}

impl OperationKind {
    /// Kinds that can carry a domain handler.
    pub const HANDLED: [OperationKind; 4] = [
        OperationKind::Snapshot,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    /// Past-tense verb used in per-event log lines ("Customer created").
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Create => "created",
            Self::Update => "updated",
            Self::Delete => "deleted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Snapshot => "Snapshot",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Topic/partition/offset of the record an envelope came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl DeliveryContext {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for DeliveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic={}, partition={}, offset={}",
            self.topic, self.partition, self.offset
        )
    }
}

/// A raw record as handed over by the broker client.
///
/// `payload` is `None` for tombstones.
#[derive(Debug, Clone, Copy)]
pub struct InboundRecord<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<&'a [u8]>,
}

impl<'a> InboundRecord<'a> {
    pub fn new(topic: &'a str, partition: i32, offset: i64, payload: Option<&'a [u8]>) -> Self {
        Self {
            topic,
            partition,
            offset,
            payload,
        }
    }

    pub fn context(&self) -> DeliveryContext {
        DeliveryContext::new(self.topic, self.partition, self.offset)
    }
}

/// Domain attributes of one captured row.
///
/// Implementations pick their recognized keys out of the flat field map and
/// leave everything else alone.
pub trait Entity: fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Name used in log lines and metrics ("Customer", "Order").
    const ENTITY_TYPE: &'static str;

    fn from_fields(fields: &FieldMap<'_>) -> Self;
}

/// Read-only view over the decoded JSON object used for field projection.
pub struct FieldMap<'a> {
    inner: &'a Map<String, Value>,
}

impl<'a> FieldMap<'a> {
    pub fn new(inner: &'a Map<String, Value>) -> Self {
        Self { inner }
    }

    /// Project a field, treating a missing key, `null` or a value of the wrong
    /// type as absent.
    pub fn get<T>(&self, field: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.inner
            .get(field)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like [`FieldMap::get`] for integers, also accepting integer-valued strings.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        match self.inner.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// [`FieldMap::get_i64`] narrowed to `i32`; out-of-range values are absent.
    pub fn get_i32(&self, field: &str) -> Option<i32> {
        self.get_i64(field).and_then(|v| i32::try_from(v).ok())
    }
}

/// Decoded CDC event for entity `E`.
///
/// Built once per record by the decoder and only ever handed out by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<E> {
    entity: E,
    operation: Option<String>,
    event_time_millis: Option<i64>,
    source_database: Option<String>,
    source_table: Option<String>,
}

impl<E> Envelope<E> {
    pub fn new(
        entity: E,
        operation: Option<String>,
        event_time_millis: Option<i64>,
        source_database: Option<String>,
        source_table: Option<String>,
    ) -> Self {
        Self {
            entity,
            operation,
            event_time_millis,
            source_database,
            source_table,
        }
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Raw operation marker as sent by the capture tool.
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn event_time_millis(&self) -> Option<i64> {
        self.event_time_millis
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time_millis
            .and_then(DateTime::from_timestamp_millis)
    }

    pub fn source_database(&self) -> Option<&str> {
        self.source_database.as_deref()
    }

    pub fn source_table(&self) -> Option<&str> {
        self.source_table.as_deref()
    }

    pub fn is_create(&self) -> bool {
        self.operation() == Some("c")
    }

    pub fn is_update(&self) -> bool {
        self.operation() == Some("u")
    }

    pub fn is_delete(&self) -> bool {
        self.operation() == Some("d")
    }

    pub fn is_snapshot(&self) -> bool {
        self.operation() == Some("r")
    }
}

impl<E: fmt::Display> fmt::Display for Envelope<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} op='{}' timestamp={}",
            self.entity,
            self.operation().unwrap_or("null"),
            self.event_time()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "null".to_string())
        )
    }
}

fn display_opt<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string())
}

/// Row of the `customers` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Customer {
    pub id: Option<i32>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Entity for Customer {
    const ENTITY_TYPE: &'static str = "Customer";

    fn from_fields(fields: &FieldMap<'_>) -> Self {
        Self {
            id: fields.get_i32("id"),
            first_name: fields.get("first_name"),
            last_name: fields.get("last_name"),
            email: fields.get("email"),
            phone: fields.get("phone"),
            address: fields.get("address"),
            created_at: fields.get("created_at"),
            updated_at: fields.get("updated_at"),
        }
    }
}

impl fmt::Display for Customer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Customer{{id={}, name='{} {}', email='{}'}}",
            display_opt(&self.id),
            display_opt(&self.first_name),
            display_opt(&self.last_name),
            display_opt(&self.email)
        )
    }
}

/// Row of the `orders` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Order {
    pub id: Option<i32>,
    pub customer_id: Option<i32>,
    pub order_number: Option<String>,
    pub total_amount: Option<Decimal>,
    pub status: Option<String>,
    pub order_date: Option<String>,
    pub updated_at: Option<String>,
}

impl Entity for Order {
    const ENTITY_TYPE: &'static str = "Order";

    fn from_fields(fields: &FieldMap<'_>) -> Self {
        Self {
            id: fields.get_i32("id"),
            customer_id: fields.get_i32("customer_id"),
            order_number: fields.get("order_number"),
            total_amount: fields.get("total_amount"),
            status: fields.get("status"),
            order_date: fields.get("order_date"),
            updated_at: fields.get("updated_at"),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order{{id={}, orderNumber='{}', customerId={}, amount={}, status='{}'}}",
            display_opt(&self.id),
            display_opt(&self.order_number),
            display_opt(&self.customer_id),
            display_opt(&self.total_amount),
            display_opt(&self.status)
        )
    }
}
