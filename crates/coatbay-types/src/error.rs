//! Error taxonomy for the settlement engine
//!
//! Four families, mirroring how callers must react: validation and
//! authorization errors are rejected synchronously and never retried;
//! state conflicts mean another actor already made the transition;
//! gateway errors may be retried with the same idempotency key; a
//! reconciliation error means an external effect exists without a matching
//! local record and must reach an operator.

use thiserror::Error;

/// Result type for Coatbay operations
pub type Result<T> = std::result::Result<T, CoatbayError>;

#[derive(Debug, Clone, Error)]
pub enum CoatbayError {
    // ========================================================================
    // Validation
    // ========================================================================
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Offer would expire immediately (delivery date too close)")]
    WouldExpireImmediately,

    // ========================================================================
    // Authorization
    // ========================================================================
    #[error("Forbidden: {reason}")]
    Forbidden { reason: &'static str },

    #[error("Supplier may not accept their own offer")]
    SelfDealing,

    // ========================================================================
    // Entity state
    // ========================================================================
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Offer {offer_id} does not belong to request {request_id}")]
    WrongRequest { offer_id: String, request_id: String },

    #[error("Offer {offer_id} is not active")]
    NotActive { offer_id: String },

    #[error("Offer {offer_id} expired at {expired_at}")]
    Expired { offer_id: String, expired_at: String },

    #[error("Offer reservation was superseded on the parent job")]
    ReservationLost,

    #[error("Seller {seller} has no payout-enabled connected account")]
    SellerNotOnboarded { seller: String },

    #[error("Computed payout for hold {hold_id} is zero after fees")]
    PayoutZero { hold_id: String },

    #[error("Nothing left to refund on hold {hold_id}")]
    NothingToRefund { hold_id: String },

    // ========================================================================
    // Conflict / state race
    // ========================================================================
    #[error("State conflict on {entity} {id}: {detail}")]
    StateConflict {
        entity: &'static str,
        id: String,
        detail: String,
    },

    // ========================================================================
    // External collaborators
    // ========================================================================
    #[error("Payment gateway error: {message}")]
    Gateway { message: String, transient: bool },

    #[error("Ledger store error: {message}")]
    Ledger { message: String },

    /// External transfer exists but the guarded local update matched no row.
    /// The fund movement is never rolled back; this must reach an operator.
    #[error("Reconciliation required for hold {hold_id}: external ref {external_ref}")]
    Reconciliation {
        hold_id: String,
        external_ref: String,
    },
}

impl CoatbayError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    pub fn gateway_transient(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether a caller may retry (with the same idempotency key).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Gateway { transient: true, .. } | Self::Ledger { .. }
        )
    }

    /// Machine-readable code for API responses and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::WouldExpireImmediately => "WOULD_EXPIRE_IMMEDIATELY",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::SelfDealing => "SELF_DEALING",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::WrongRequest { .. } => "WRONG_REQUEST",
            Self::NotActive { .. } => "NOT_ACTIVE",
            Self::Expired { .. } => "EXPIRED",
            Self::ReservationLost => "RESERVATION_LOST",
            Self::SellerNotOnboarded { .. } => "SELLER_NOT_ONBOARDED",
            Self::PayoutZero { .. } => "PAYOUT_ZERO",
            Self::NothingToRefund { .. } => "NOTHING_TO_REFUND",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::Gateway { .. } => "GATEWAY_ERROR",
            Self::Ledger { .. } => "LEDGER_ERROR",
            Self::Reconciliation { .. } => "RECONCILIATION_REQUIRED",
        }
    }
}
