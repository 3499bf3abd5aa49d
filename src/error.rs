//! Crate error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::domain::aggregates::{CartError, CategoryError, OrderError, ProductError};
use crate::domain::value_objects::{MoneyError, SkuError};

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock { sku: String, requested: u64, available: u32 },

    #[error("Missing or invalid X-Tenant-Id header")]
    MissingTenant,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Storage backend does not support transactions")]
    TransactionsUnsupported,

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CommerceError>;

impl CommerceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Validation(_) => "validation_failed",
            Self::Conflict(_) => "conflict",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::MissingTenant => "missing_tenant",
            Self::Unauthorized => "unauthorized",
            Self::TransactionsUnsupported | Self::Storage(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) | Self::MissingTenant => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) | Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TransactionsUnsupported | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": self.kind(), "message": message }))).into_response()
    }
}

impl From<sqlx::Error> for CommerceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CommerceError::NotFound("Record"),
            sqlx::Error::Database(db) if db.is_unique_violation() => CommerceError::Conflict(db.message().to_string()),
            other => CommerceError::Storage(other.to_string()),
        }
    }
}

impl From<SkuError> for CommerceError {
    fn from(e: SkuError) -> Self { CommerceError::InvalidInput(e.to_string()) }
}

impl From<MoneyError> for CommerceError {
    fn from(e: MoneyError) -> Self { CommerceError::InvalidInput(e.to_string()) }
}

impl From<ProductError> for CommerceError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::InsufficientStock { sku, requested, available } => CommerceError::InsufficientStock { sku: sku.to_string(), requested, available },
            ProductError::VariantNotFound(_) => CommerceError::NotFound("Variant"),
            ProductError::InvalidApproval { .. } => CommerceError::Conflict(e.to_string()),
            other => CommerceError::InvalidInput(other.to_string()),
        }
    }
}

impl From<CategoryError> for CommerceError {
    fn from(e: CategoryError) -> Self {
        match e {
            CategoryError::HasChildren => CommerceError::Conflict(e.to_string()),
            other => CommerceError::InvalidInput(other.to_string()),
        }
    }
}

impl From<CartError> for CommerceError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound => CommerceError::NotFound("Cart item"),
            other => CommerceError::InvalidInput(other.to_string()),
        }
    }
}

impl From<OrderError> for CommerceError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoItems | OrderError::InvalidRefundAmount | OrderError::PartialRestock => CommerceError::InvalidInput(e.to_string()),
            OrderError::NotPaid | OrderError::InvalidTransition { .. } | OrderError::CurrencyMismatch { .. } => CommerceError::Conflict(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Sku;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CommerceError::NotFound("Product").status(), StatusCode::NOT_FOUND);
        assert_eq!(CommerceError::MissingTenant.status(), StatusCode::BAD_REQUEST);
        let stock: CommerceError = ProductError::InsufficientStock { sku: Sku::new("A").unwrap(), requested: 2, available: 1 }.into();
        assert_eq!(stock.status(), StatusCode::CONFLICT);
        assert_eq!(stock.kind(), "insufficient_stock");
        let order: CommerceError = OrderError::NoItems.into();
        assert_eq!(order.status(), StatusCode::BAD_REQUEST);
        let overflow: CommerceError = ProductError::StockOverflow(Sku::new("A").unwrap()).into();
        assert_eq!(overflow.status(), StatusCode::BAD_REQUEST);
        let currency: CommerceError = OrderError::CurrencyMismatch { expected: "EUR".into(), got: "USD".into() }.into();
        assert_eq!(currency.status(), StatusCode::CONFLICT);
    }
}
