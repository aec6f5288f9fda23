use crate::domain::order::OrderStatus;
use crate::domain::{OrderId, ProductId};
use thiserror::Error;

/// Broad families of failures, used to decide who gets told and whether a
/// caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any mutation; the caller may retry with corrected input.
    Validation,
    /// Not enough stock; the caller may retry with a smaller quantity.
    Capacity,
    /// Provider-facing noise. Logged and discarded, providers retry.
    Protocol,
    /// Ordering bug or a lost race. Surfaced to operators.
    Consistency,
    /// Storage or transport failure outside the order logic.
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },
    #[error("No price available for product {product_id}")]
    PriceUnavailable { product_id: ProductId },
    #[error("Unknown product {product_id}")]
    UnknownProduct { product_id: ProductId },
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),
    #[error("Order {order_id} does not belong to the requesting user")]
    NotOrderOwner { order_id: OrderId },
    #[error("Order {order_id} already has a payment in progress")]
    PaymentInProgress { order_id: OrderId },
    #[error("Payment attempt {attempt_id} for order {order_id} expired before the provider answered")]
    AttemptExpired { order_id: OrderId, attempt_id: u64 },
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Malformed callback: {0}")]
    MalformedCallback(String),
    #[error("Untrusted callback: {0}")]
    UntrustedCallback(String),
    #[error("Unknown payment reference {0}")]
    UnknownPaymentReference(String),
    #[error("Callback handling exceeded its time bound")]
    CallbackTimeout,
    #[error("Invalid transition for order {order_id}: {event} not allowed from {from}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        event: String,
    },
    #[error("Transition conflict for order {order_id}: {detail}")]
    TransitionConflict { order_id: OrderId, detail: String },
    #[error("No outstanding reservation of {requested} for product {product_id} on order {order_id}")]
    NoSuchReservation {
        product_id: ProductId,
        order_id: OrderId,
        requested: u32,
    },
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl OrderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrderError::EmptyCart
            | OrderError::InvalidQuantity { .. }
            | OrderError::PriceUnavailable { .. }
            | OrderError::UnknownProduct { .. }
            | OrderError::OrderNotFound(_)
            | OrderError::NotOrderOwner { .. }
            | OrderError::PaymentInProgress { .. }
            | OrderError::InvalidCommand(_)
            | OrderError::InvalidConfig(_) => ErrorCategory::Validation,
            OrderError::InsufficientStock { .. } => ErrorCategory::Capacity,
            OrderError::MalformedCallback(_)
            | OrderError::UntrustedCallback(_)
            | OrderError::UnknownPaymentReference(_)
            | OrderError::CallbackTimeout => ErrorCategory::Protocol,
            OrderError::InvalidTransition { .. }
            | OrderError::TransitionConflict { .. }
            | OrderError::NoSuchReservation { .. }
            | OrderError::AttemptExpired { .. } => ErrorCategory::Consistency,
            OrderError::ProviderUnavailable(_)
            | OrderError::Csv(_)
            | OrderError::Io(_)
            | OrderError::Internal(_) => ErrorCategory::Infrastructure,
            #[cfg(feature = "storage-rocksdb")]
            OrderError::Storage(_) => ErrorCategory::Infrastructure,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        OrderError::Internal(message.into().into())
    }
}

impl From<serde_json::Error> for OrderError {
    fn from(err: serde_json::Error) -> Self {
        OrderError::Internal(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, OrderError>;
