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

//! Engine inputs and outputs.
//!
//! Commands are already validated; the request surface builds them.

use crate::base::{AccountId, DebitCardId, RequestId, TransactionId};
use crate::journal::JournalEntry;
use serde::{Deserialize, Serialize};

/// Input of both create-transaction and create-reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransaction {
    pub request_id: RequestId,
    pub account_id: AccountId,
    pub debit_card_id: Option<DebitCardId>,
    /// Nonzero, signed.
    pub transaction_amount: i64,
    pub transaction_metadata: String,
    /// When false a debit larger than the balance overdraws the account
    /// without complaint.
    pub authorize_against_balance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReservation {
    pub request_id: RequestId,
    pub reservation_id: TransactionId,
    /// The final amount of the reservation, not the correction.
    pub transaction_amount: i64,
    pub transaction_metadata: String,
    /// Only used for the idempotency lookup; the reservation decides the
    /// account that is charged.
    pub account_id: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReservation {
    pub request_id: RequestId,
    pub reservation_id: TransactionId,
    pub transaction_metadata: String,
    pub account_id: Option<AccountId>,
}

/// The reservation on the paying side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReservation {
    pub transaction_id: TransactionId,
    /// Strictly negative.
    pub transaction_amount: i64,
    pub transaction_metadata: String,
}

/// Credit the transferred funds and spend them, atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAndTransact {
    pub request_id: RequestId,
    pub transfer_reservation: TransferReservation,
    pub account_id: AccountId,
    pub debit_card_id: Option<DebitCardId>,
    /// Strictly negative.
    pub transaction_amount: i64,
    pub transaction_metadata: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindQuery {
    Transaction(TransactionId),
    Reservation(TransactionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    InsufficientFunds,
}

/// Result of a write: the status and the entries it produced (or replayed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub entries: Vec<JournalEntry>,
}

impl Outcome {
    pub fn success(entries: Vec<JournalEntry>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            entries,
        }
    }

    pub fn insufficient_funds(entry: JournalEntry) -> Self {
        Self {
            status: OutcomeStatus::InsufficientFunds,
            entries: vec![entry],
        }
    }

    /// The first entry; every outcome carries at least one.
    pub fn entry(&self) -> Option<&JournalEntry> {
        self.entries.first()
    }
}
