//! HTTP error mapping
//!
//! Every handler propagates `CoatbayError`; this module decides the status
//! code. The families matter more than the variants: validation → 422,
//! authorization → 403, state races → 409, upstream gateway trouble → 502,
//! reconciliation → 500 after a loud log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use coatbay_types::CoatbayError;

pub type ApiResult<T> = Result<T, ApiError>;

pub struct ApiError(pub CoatbayError);

impl From<CoatbayError> for ApiError {
    fn from(err: CoatbayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoatbayError::NotFound { .. } => StatusCode::NOT_FOUND,

            CoatbayError::Forbidden { .. } | CoatbayError::SelfDealing => StatusCode::FORBIDDEN,

            CoatbayError::InvalidAmount { .. }
            | CoatbayError::AmountOverflow
            | CoatbayError::CurrencyMismatch { .. }
            | CoatbayError::WouldExpireImmediately => StatusCode::UNPROCESSABLE_ENTITY,

            CoatbayError::WrongRequest { .. }
            | CoatbayError::NotActive { .. }
            | CoatbayError::Expired { .. }
            | CoatbayError::ReservationLost
            | CoatbayError::SellerNotOnboarded { .. }
            | CoatbayError::PayoutZero { .. }
            | CoatbayError::NothingToRefund { .. }
            | CoatbayError::StateConflict { .. } => StatusCode::CONFLICT,

            CoatbayError::Gateway { .. } => StatusCode::BAD_GATEWAY,

            CoatbayError::Ledger { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            CoatbayError::Reconciliation { hold_id, external_ref } => {
                error!(hold = %hold_id, external_ref = %external_ref,
                    "reconciliation required; surfacing 500 to caller");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(serde_json::json!({
            "error": self.0.error_code(),
            "message": self.0.to_string(),
            "retriable": self.0.is_retriable(),
        }));
        (status, body).into_response()
    }
}
