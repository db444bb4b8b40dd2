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

//! JSON-over-HTTP request surface.
//!
//! ## Endpoints
//!
//! - `POST /Transaction` - Record a transaction (optionally balance-checked)
//! - `POST /Reservation` - Reserve funds
//! - `POST /CommitReservation` - Finalize a reservation at its final amount
//! - `POST /CancelReservation` - Release a reservation
//! - `POST /TransferAndTransact` - Credit a transfer and spend it atomically
//! - `GET /Transaction` - Look up by `transaction_id` or `reservation_id`
//!   (JSON body)
//! - `GET /health` - Liveness
//!
//! Every ledger endpoint requires the [`headers`] and the configured
//! `accept-version`.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8080/Transaction \
//!   -H "Content-Type: application/json" \
//!   -H "ait-id: 78234" -H "business-taxonomy-id: payments" \
//!   -H "correlation-id: 5f0c" -H "accept-version: 1_0" \
//!   -d '{"request_id": "7d1f6f0e-55a4-4b8c-9f57-5d1b7c2c1a10", "account_id": "acct-1",
//!        "transaction_amount": 500, "transaction_metadata": "{\"memo\":\"payroll\"}"}'
//! ```

pub mod headers;
pub mod request;
pub mod response;

use crate::config::ServiceConfig;
use crate::engine::Engine;
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;
use axum::extract::rejection::JsonRejection;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use headers::RequestHeaders;
use request::{
    CancelReservationRequest, CommitReservationRequest, TransactionRequest,
    TransactionSearchRequest, TransferAndTransactRequest,
};
use response::{AppError, SearchResponse, TimedResponse, WriteResponse};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span, info};

// === Application State ===

/// Shared application state: the engine and the immutable service settings.
pub struct AppState<S> {
    pub engine: Arc<Engine<S>>,
    pub service: Arc<ServiceConfig>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            service: Arc::clone(&self.service),
        }
    }
}

type WriteReply = (StatusCode, Json<TimedResponse<WriteResponse>>);
type ApiResult<T> = std::result::Result<T, AppError>;

// === Router ===

pub fn router<S>(engine: Arc<Engine<S>>, service: ServiceConfig) -> Router
where
    S: LedgerStore + 'static,
{
    let state = AppState {
        engine,
        service: Arc::new(service),
    };

    Router::new()
        .route(
            "/Transaction",
            post(post_transaction::<S>).get(get_transaction::<S>),
        )
        .route("/Reservation", post(post_reservation::<S>))
        .route("/CommitReservation", post(post_commit_reservation::<S>))
        .route("/CancelReservation", post(post_cancel_reservation::<S>))
        .route("/TransferAndTransact", post(post_transfer_and_transact::<S>))
        .route("/health", get(health))
        .with_state(state)
}

// === Handlers ===

/// POST /Transaction
async fn post_transaction<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    headers: RequestHeaders,
    body: std::result::Result<Json<TransactionRequest>, JsonRejection>,
) -> ApiResult<WriteReply> {
    let started = Instant::now();
    let span = headers.span("POST/Transaction");
    async move {
        let Json(request) = body?;
        let command = request.validate()?;
        headers.require_version(&state.service.accept_version)?;

        let outcome = run_engine(&state, move |engine| engine.create_transaction(command)).await?;
        Ok::<_, AppError>(created(started, outcome.into()))
    }
    .instrument(span)
    .await
}

/// POST /Reservation
async fn post_reservation<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    headers: RequestHeaders,
    body: std::result::Result<Json<TransactionRequest>, JsonRejection>,
) -> ApiResult<WriteReply> {
    let started = Instant::now();
    let span = headers.span("POST/Reservation");
    async move {
        let Json(request) = body?;
        let command = request.validate()?;
        headers.require_version(&state.service.accept_version)?;

        let outcome = run_engine(&state, move |engine| engine.create_reservation(command)).await?;
        Ok::<_, AppError>(created(started, outcome.into()))
    }
    .instrument(span)
    .await
}

/// POST /CommitReservation
async fn post_commit_reservation<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    headers: RequestHeaders,
    body: std::result::Result<Json<CommitReservationRequest>, JsonRejection>,
) -> ApiResult<WriteReply> {
    let started = Instant::now();
    let span = headers.span("POST/CommitReservation");
    async move {
        let Json(request) = body?;
        let command = request.validate()?;
        headers.require_version(&state.service.accept_version)?;

        let outcome = run_engine(&state, move |engine| engine.commit_reservation(command)).await?;
        Ok::<_, AppError>(created(started, outcome.into()))
    }
    .instrument(span)
    .await
}

/// POST /CancelReservation
async fn post_cancel_reservation<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    headers: RequestHeaders,
    body: std::result::Result<Json<CancelReservationRequest>, JsonRejection>,
) -> ApiResult<WriteReply> {
    let started = Instant::now();
    let span = headers.span("POST/CancelReservation");
    async move {
        let Json(request) = body?;
        let command = request.validate()?;
        headers.require_version(&state.service.accept_version)?;

        let outcome = run_engine(&state, move |engine| engine.cancel_reservation(command)).await?;
        Ok::<_, AppError>(created(started, outcome.into()))
    }
    .instrument(span)
    .await
}

/// POST /TransferAndTransact
async fn post_transfer_and_transact<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    headers: RequestHeaders,
    body: std::result::Result<Json<TransferAndTransactRequest>, JsonRejection>,
) -> ApiResult<WriteReply> {
    let started = Instant::now();
    let span = headers.span("POST/TransferAndTransact");
    async move {
        let Json(request) = body?;
        let command = request.validate()?;
        headers.require_version(&state.service.accept_version)?;

        let outcome =
            run_engine(&state, move |engine| engine.transfer_and_transact(command)).await?;
        Ok::<_, AppError>(created(started, outcome.into()))
    }
    .instrument(span)
    .await
}

/// GET /Transaction - the lookup ids travel in a JSON body.
async fn get_transaction<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    headers: RequestHeaders,
    body: std::result::Result<Json<TransactionSearchRequest>, JsonRejection>,
) -> ApiResult<Json<TimedResponse<SearchResponse>>> {
    let started = Instant::now();
    let span = headers.span("GET/Transaction");
    async move {
        let Json(request) = body?;
        let query = request.validate()?;
        headers.require_version(&state.service.accept_version)?;

        let transactions = run_engine(&state, move |engine| engine.find(query)).await?;
        info!(found = transactions.len(), "search complete");
        Ok::<_, AppError>(Json(TimedResponse::since(
            started,
            SearchResponse { transactions },
        )))
    }
    .instrument(span)
    .await
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn created(started: Instant, payload: WriteResponse) -> WriteReply {
    (
        StatusCode::CREATED,
        Json(TimedResponse::since(started, payload)),
    )
}

/// Runs an engine call on the blocking pool; the engine waits on row locks.
async fn run_engine<S, T, F>(state: &AppState<S>, work: F) -> ApiResult<T>
where
    S: LedgerStore + 'static,
    T: Send + 'static,
    F: FnOnce(&Engine<S>) -> Result<T> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    let span = Span::current();
    let joined = tokio::task::spawn_blocking(move || span.in_scope(|| work(&engine))).await;
    let result = joined.map_err(|err| LedgerError::Internal(format!("engine task failed: {err}")))?;
    Ok(result?)
}
