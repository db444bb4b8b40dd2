// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Response envelope and error mapping.

use crate::command::{Outcome, OutcomeStatus};
use crate::error::{ErrorKind, LedgerError};
use crate::journal::JournalEntry;
use axum::extract::rejection::JsonRejection;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, warn};

// === Response DTOs ===

/// Wraps every successful payload with the time the service spent on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedResponse<T> {
    /// Nanoseconds.
    pub service_time_elapsed: u64,
    pub payload: T,
}

impl<T> TimedResponse<T> {
    pub fn since(started: Instant, payload: T) -> Self {
        Self {
            service_time_elapsed: u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX),
            payload,
        }
    }
}

/// Payload of every write endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub status: OutcomeStatus,
    pub transactions: Vec<JournalEntry>,
}

impl From<Outcome> for WriteResponse {
    fn from(outcome: Outcome) -> Self {
        Self {
            status: outcome.status,
            transactions: outcome.entries,
        }
    }
}

/// Payload of `GET /Transaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub transactions: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Error Handling ===

/// Wrapper for converting [`LedgerError`] into HTTP responses.
#[derive(Debug)]
pub struct AppError(pub LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError(LedgerError::invalid("request body", rejection.body_text()))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::StoreFailure => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.0 {
            LedgerError::MissingField(_) => "MISSING_FIELD",
            LedgerError::InvalidField { .. } => "INVALID_FIELD",
            LedgerError::MissingHeader(_) => "MISSING_HEADER",
            LedgerError::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            LedgerError::ReservationFinalized(_) => "RESERVATION_FINALIZED",
            LedgerError::Store(_) => "STORE_FAILURE",
            LedgerError::LockTimeout(_) => "LOCK_TIMEOUT",
            LedgerError::Overflow(_) => "AMOUNT_OVERFLOW",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        if status.is_server_error() {
            error!(%status, code, error = %self.0, "request failed");
        } else {
            warn!(%status, code, error = %self.0, "request refused");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TransactionId;
    use uuid::Uuid;

    #[test]
    fn kinds_map_to_status_codes() {
        let id = TransactionId(Uuid::nil());
        let cases = [
            (LedgerError::MissingHeader("ait-id"), StatusCode::BAD_REQUEST),
            (LedgerError::ReservationNotFound(id), StatusCode::NOT_FOUND),
            (LedgerError::ReservationFinalized(id), StatusCode::CONFLICT),
            (
                LedgerError::LockTimeout("balance row a".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                LedgerError::Internal("3 rows".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError(err).status(), status);
        }
    }

    #[test]
    fn error_response_carries_code() {
        let response = AppError(LedgerError::UnsupportedVersion("2_0".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn envelope_serializes_payload() {
        let body = serde_json::to_value(TimedResponse {
            service_time_elapsed: 42,
            payload: SearchResponse {
                transactions: vec![],
            },
        })
        .unwrap();
        assert_eq!(body["service_time_elapsed"], 42);
        assert_eq!(body["payload"]["transactions"], serde_json::json!([]));
    }
}
