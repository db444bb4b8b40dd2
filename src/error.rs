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

//! Error types for ledger operations.
//!
//! Insufficient funds is deliberately absent: a rejected debit is a committed
//! `REJECTED` journal entry, not an error.

use crate::base::TransactionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The client supplied bad input.
    Validation,
    /// A referenced reservation or transaction does not exist.
    NotFound,
    /// A reservation was already committed or cancelled.
    Conflict,
    /// The backing store failed; the request may be retried.
    StoreFailure,
    /// A ledger invariant was violated.
    Internal,
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A required body field is absent
    #[error("missing {0}")]
    MissingField(&'static str),

    /// A body field is present but unacceptable
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A required header is absent
    #[error("missing header variable {0}")]
    MissingHeader(&'static str),

    /// The accept-version header does not match the operation's version
    #[error("invalid version {0}")]
    UnsupportedVersion(String),

    /// No journal entry has the given transaction id
    #[error("transaction_id ({0}) not found")]
    TransactionNotFound(TransactionId),

    /// No `RESERVATION` entry has the given id
    #[error("reservation_id ({0}) not found")]
    ReservationNotFound(TransactionId),

    /// A commit or cancel entry already references the reservation
    #[error("reservation_id ({0}) has already been finalized")]
    ReservationFinalized(TransactionId),

    /// The backing store failed
    #[error("store failure: {0}")]
    Store(String),

    /// A row lock could not be acquired in time
    #[error("timed out waiting for the lock on {0}")]
    LockTimeout(String),

    /// Checked arithmetic on an amount or balance overflowed
    #[error("amount overflow while computing {0}")]
    Overflow(&'static str),

    /// An invariant of the store or engine was violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField(_)
            | Self::InvalidField { .. }
            | Self::MissingHeader(_)
            | Self::UnsupportedVersion(_) => ErrorKind::Validation,
            Self::TransactionNotFound(_) | Self::ReservationNotFound(_) => ErrorKind::NotFound,
            Self::ReservationFinalized(_) => ErrorKind::Conflict,
            Self::Store(_) | Self::LockTimeout(_) => ErrorKind::StoreFailure,
            Self::Overflow(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only store failures are worth retrying; the idempotency key makes the
    /// retry safe.
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::StoreFailure
    }
}
