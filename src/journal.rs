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

//! Journal entries.
//!
//! A reservation moves through a small state machine whose states are
//! recorded as journal entries, never as mutations:
//!
//! ```text
//!                       commit ──► RESERVATION_COMMIT
//! (none) ──► RESERVATION ──┤
//!                       cancel ──► RESERVATION_CANCEL
//! ```
//!
//! Either finalizer is terminal.

use crate::base::{AccountId, DebitCardId, RequestId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionTypeCode {
    Normal,
    Rejected,
    Reservation,
    ReservationCommit,
    ReservationCancel,
}

impl TransactionTypeCode {
    /// True for the entry types that close a reservation.
    pub fn is_finalizer(&self) -> bool {
        matches!(self, Self::ReservationCommit | Self::ReservationCancel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Rejected => "REJECTED",
            Self::Reservation => "RESERVATION",
            Self::ReservationCommit => "RESERVATION_COMMIT",
            Self::ReservationCancel => "RESERVATION_CANCEL",
        }
    }
}

impl fmt::Display for TransactionTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry the engine wants appended. The store assigns the id and the
/// insertion timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub request_id: RequestId,
    pub account_id: AccountId,
    pub debit_card_id: Option<DebitCardId>,
    pub transaction_amount: i64,
    pub transaction_type: TransactionTypeCode,
    pub running_balance: i64,
    pub reservation_id: Option<TransactionId>,
    pub transaction_metadata: String,
}

impl NewJournalEntry {
    pub(crate) fn into_entry(
        self,
        transaction_id: TransactionId,
        inserted_at: DateTime<Utc>,
    ) -> JournalEntry {
        JournalEntry {
            transaction_id,
            request_id: self.request_id,
            account_id: self.account_id,
            debit_card_id: self.debit_card_id,
            transaction_amount: self.transaction_amount,
            transaction_type: self.transaction_type,
            running_balance: self.running_balance,
            reservation_id: self.reservation_id,
            transaction_metadata: self.transaction_metadata,
            inserted_at,
        }
    }
}

/// One immutable row of the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub transaction_id: TransactionId,
    pub request_id: RequestId,
    pub account_id: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit_card_id: Option<DebitCardId>,
    pub transaction_amount: i64,
    pub transaction_type: TransactionTypeCode,
    /// Account balance immediately after this entry.
    pub running_balance: i64,
    /// Set only on commit and cancel entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<TransactionId>,
    pub transaction_metadata: String,
    pub inserted_at: DateTime<Utc>,
}

/// The parts of a `RESERVATION` entry a finalizer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub reservation_id: TransactionId,
    pub request_id: RequestId,
    pub account_id: AccountId,
    pub debit_card_id: Option<DebitCardId>,
    pub transaction_amount: i64,
}

impl From<&JournalEntry> for Reservation {
    fn from(entry: &JournalEntry) -> Self {
        Self {
            reservation_id: entry.transaction_id,
            request_id: entry.request_id,
            account_id: entry.account_id.clone(),
            debit_card_id: entry.debit_card_id.clone(),
            transaction_amount: entry.transaction_amount,
        }
    }
}
