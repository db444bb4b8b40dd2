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

//! Request bodies and their validation into engine commands.
//!
//! Every field is optional at the serde level so that a missing field is
//! reported by name instead of as a generic deserialization failure.

use crate::base::{AccountId, DebitCardId, RequestId, TransactionId};
use crate::command::{
    CancelReservation, CommitReservation, CreateTransaction, FindQuery, TransferAndTransact,
    TransferReservation,
};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /Transaction` and `POST /Reservation`, and the
/// `transaction_request` part of `POST /TransferAndTransact`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub request_id: Option<Uuid>,
    pub account_id: Option<String>,
    pub debit_card_id: Option<String>,
    pub transaction_amount: Option<i64>,
    pub transaction_metadata: Option<String>,
    #[serde(default)]
    pub authorize_against_balance: bool,
}

impl TransactionRequest {
    pub fn validate(self) -> Result<CreateTransaction> {
        let request_id = required_request_id(self.request_id)?;
        let account_id = account_id(self.account_id)?;
        let transaction_metadata = metadata(self.transaction_metadata)?;
        let transaction_amount = nonzero_amount(self.transaction_amount)?;

        Ok(CreateTransaction {
            request_id,
            account_id,
            debit_card_id: debit_card_id(self.debit_card_id),
            transaction_amount,
            transaction_metadata,
            authorize_against_balance: self.authorize_against_balance,
        })
    }
}

/// Body of `POST /CommitReservation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitReservationRequest {
    pub request_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub transaction_amount: Option<i64>,
    pub transaction_metadata: Option<String>,
    pub account_id: Option<String>,
}

impl CommitReservationRequest {
    pub fn validate(self) -> Result<CommitReservation> {
        let request_id = required_request_id(self.request_id)?;
        let reservation_id = required_reservation_id(self.reservation_id)?;
        let transaction_metadata = metadata(self.transaction_metadata)?;
        let transaction_amount = nonzero_amount(self.transaction_amount)?;

        Ok(CommitReservation {
            request_id,
            reservation_id,
            transaction_amount,
            transaction_metadata,
            account_id: optional_account_id(self.account_id)?,
        })
    }
}

/// Body of `POST /CancelReservation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelReservationRequest {
    pub request_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub transaction_metadata: Option<String>,
    pub account_id: Option<String>,
}

impl CancelReservationRequest {
    pub fn validate(self) -> Result<CancelReservation> {
        let request_id = required_request_id(self.request_id)?;
        let reservation_id = required_reservation_id(self.reservation_id)?;
        let transaction_metadata = metadata(self.transaction_metadata)?;

        Ok(CancelReservation {
            request_id,
            reservation_id,
            transaction_metadata,
            account_id: optional_account_id(self.account_id)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferReservationRequest {
    pub transaction_id: Option<Uuid>,
    pub transaction_amount: Option<i64>,
    pub transaction_metadata: Option<String>,
}

/// Body of `POST /TransferAndTransact`. The request id of the nested
/// transaction request is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferAndTransactRequest {
    pub request_id: Option<Uuid>,
    pub transfer_reservation: Option<TransferReservationRequest>,
    pub transaction_request: Option<TransactionRequest>,
}

impl TransferAndTransactRequest {
    pub fn validate(self) -> Result<TransferAndTransact> {
        let request_id = required_request_id(self.request_id)?;
        let transaction = self
            .transaction_request
            .ok_or(LedgerError::MissingField("transaction_request"))?;
        let transfer = self
            .transfer_reservation
            .ok_or(LedgerError::MissingField("transfer_reservation"))?;

        let transfer_id = transfer
            .transaction_id
            .ok_or(LedgerError::MissingField("transfer_reservation.transaction_id"))?;
        let transfer_amount = negative_amount(
            transfer.transaction_amount,
            "transfer_reservation.transaction_amount",
        )?;
        let account_id = account_id(transaction.account_id)?;
        let transaction_metadata = metadata(transaction.transaction_metadata)?;
        let transaction_amount = negative_amount(
            transaction.transaction_amount,
            "transaction_request.transaction_amount",
        )?;

        Ok(TransferAndTransact {
            request_id,
            transfer_reservation: TransferReservation {
                transaction_id: TransactionId(transfer_id),
                transaction_amount: transfer_amount,
                transaction_metadata: transfer.transaction_metadata.unwrap_or_default(),
            },
            account_id,
            debit_card_id: debit_card_id(transaction.debit_card_id),
            transaction_amount,
            transaction_metadata,
        })
    }
}

/// Body of `GET /Transaction`: exactly one of the two ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSearchRequest {
    pub transaction_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
}

impl TransactionSearchRequest {
    pub fn validate(self) -> Result<FindQuery> {
        match (self.transaction_id, self.reservation_id) {
            (Some(id), None) => Ok(FindQuery::Transaction(TransactionId(id))),
            (None, Some(id)) => Ok(FindQuery::Reservation(TransactionId(id))),
            _ => Err(LedgerError::invalid(
                "transaction_id",
                "exactly one of transaction_id or reservation_id is required",
            )),
        }
    }
}

fn required_request_id(request_id: Option<Uuid>) -> Result<RequestId> {
    request_id
        .map(RequestId)
        .ok_or(LedgerError::MissingField("request_id"))
}

fn required_reservation_id(reservation_id: Option<Uuid>) -> Result<TransactionId> {
    reservation_id
        .map(TransactionId)
        .ok_or(LedgerError::MissingField("reservation_id"))
}

/// Single-character ids and metadata are treated as placeholders and refused.
fn longer_than_one(value: Option<String>, field: &'static str) -> Result<String> {
    match value {
        None => Err(LedgerError::MissingField(field)),
        Some(value) if value.chars().count() <= 1 => Err(LedgerError::invalid(
            field,
            "must be longer than one character",
        )),
        Some(value) => Ok(value),
    }
}

fn account_id(value: Option<String>) -> Result<AccountId> {
    longer_than_one(value, "account_id").map(AccountId)
}

fn optional_account_id(value: Option<String>) -> Result<Option<AccountId>> {
    value.map(|id| account_id(Some(id))).transpose()
}

fn metadata(value: Option<String>) -> Result<String> {
    longer_than_one(value, "transaction_metadata")
}

fn debit_card_id(value: Option<String>) -> Option<DebitCardId> {
    value.filter(|id| !id.is_empty()).map(DebitCardId)
}

fn nonzero_amount(amount: Option<i64>) -> Result<i64> {
    match amount {
        None => Err(LedgerError::MissingField("transaction_amount")),
        Some(0) => Err(LedgerError::invalid("transaction_amount", "must not be zero")),
        Some(amount) => Ok(amount),
    }
}

fn negative_amount(amount: Option<i64>, field: &'static str) -> Result<i64> {
    match amount {
        None => Err(LedgerError::MissingField(field)),
        Some(amount) if amount >= 0 => Err(LedgerError::invalid(field, "must be less than zero")),
        Some(amount) => Ok(amount),
    }
}
