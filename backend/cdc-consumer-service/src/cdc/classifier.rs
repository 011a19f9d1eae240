use super::models::{Envelope, OperationKind};

/// Map an operation marker to its kind. Total: anything unrecognized,
/// including an absent or empty marker, is `Unknown`.
pub fn classify_marker(marker: Option<&str>) -> OperationKind {
    match marker {
        Some("r") => OperationKind::Snapshot,
        Some("c") => OperationKind::Create,
        Some("u") => OperationKind::Update,
        Some("d") => OperationKind::Delete,
        _ => OperationKind::Unknown,
    }
}

pub fn classify<E>(envelope: &Envelope<E>) -> OperationKind {
    classify_marker(envelope.operation())
}
