use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Error envelope returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional machine-readable detail (failed ingest stage, legal transitions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Ingestion step that failed after the order header was already committed.
/// Customer resolution precedes the header, so its failure is a clean abort,
/// never a partial one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    LineItems,
    Inventory,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestStage::LineItems => write!(f, "line_items"),
            IngestStage::Inventory => write!(f, "inventory"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The requested status change is not in the transition table for the
    /// order's kind. The order is left untouched; `legal` tells the caller
    /// which targets it may offer instead.
    #[error("Cannot transition order from '{from}' to '{to}'")]
    IllegalTransition {
        from: OrderStatus,
        to: OrderStatus,
        legal: Vec<OrderStatus>,
    },

    /// The order header was committed but a later ingestion step failed.
    /// The order exists in a valid, payable state; callers retry the named
    /// stage, never the whole submission.
    #[error("Order {order_id} was created but the {stage} step failed: {detail}")]
    PartialIngestFailure {
        order_id: Uuid,
        stage: IngestStage,
        detail: String,
    },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::IllegalTransition { .. } | Self::ConcurrentModification(_) => {
                StatusCode::CONFLICT
            }
            // The order is durable; the caller is told which step to retry.
            Self::PartialIngestFailure { .. } => StatusCode::MULTI_STATUS,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message suitable for HTTP responses. Internal failures stay generic so
    /// implementation details do not leak to storefront clients.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::EventError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }

    fn response_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::IllegalTransition { legal, .. } => Some(serde_json::json!({
                "legal_transitions": legal,
            })),
            Self::PartialIngestFailure {
                order_id, stage, ..
            } => Some(serde_json::json!({
                "order_id": order_id,
                "failed_stage": stage,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_maps_to_conflict_with_legal_targets() {
        let err = ServiceError::IllegalTransition {
            from: OrderStatus::Preparing,
            to: OrderStatus::Delivered,
            legal: vec![OrderStatus::OutForDelivery, OrderStatus::Cancelled],
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let details = err.response_details().expect("details expected");
        assert_eq!(details["legal_transitions"][0], "out_for_delivery");
    }

    #[test]
    fn partial_ingest_failure_names_the_failed_stage() {
        let order_id = Uuid::new_v4();
        let err = ServiceError::PartialIngestFailure {
            order_id,
            stage: IngestStage::Inventory,
            detail: "version conflict".into(),
        };
        assert_eq!(err.status_code(), StatusCode::MULTI_STATUS);
        let details = err.response_details().expect("details expected");
        assert_eq!(details["failed_stage"], "inventory");
        assert_eq!(details["order_id"], serde_json::json!(order_id));
    }

    #[test]
    fn database_errors_do_not_leak_detail() {
        let err = ServiceError::DatabaseError(sea_orm::DbErr::Custom("secret dsn".into()));
        assert_eq!(err.response_message(), "Database error");
    }
}
