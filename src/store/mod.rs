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

//! Store adapter.
//!
//! The engine reaches the backing store only through these two traits. A
//! [`LedgerStore`] hands out [`StoreTransaction`]s; every operation of one
//! engine call runs inside a single store transaction so its row locks and
//! writes commit, or vanish, together.
//!
//! Locks taken by a transaction are held until it commits or is dropped.
//! Dropping a transaction without calling [`StoreTransaction::commit`]
//! aborts it.

pub mod memory;

pub use memory::MemoryStore;

use crate::base::{AccountId, RequestId, TransactionId};
use crate::error::Result;
use crate::journal::{JournalEntry, NewJournalEntry, Reservation};

/// A backing store able to open transactions.
pub trait LedgerStore: Send + Sync {
    type Transaction: StoreTransaction;

    fn begin(&self) -> Result<Self::Transaction>;
}

/// The capability set the engine needs from one store transaction.
pub trait StoreTransaction {
    /// Returns the account's running balance and holds an exclusive lock on
    /// its balance row. A missing row reads as `0`; the next
    /// [`upsert_balance`](Self::upsert_balance) materializes it.
    fn lock_balance(&mut self, account_id: &AccountId) -> Result<i64>;

    /// Inserts or updates the single balance row of the account.
    fn upsert_balance(&mut self, account_id: &AccountId, balance: i64) -> Result<()>;

    /// Appends an entry, returning it with its generated transaction id and
    /// insertion timestamp.
    fn append(&mut self, entry: NewJournalEntry) -> Result<JournalEntry>;

    /// Locks and returns the `RESERVATION` entry with the given id.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ReservationNotFound`](crate::LedgerError::ReservationNotFound)
    /// when no such entry exists.
    fn find_reservation(&mut self, reservation_id: TransactionId) -> Result<Reservation>;

    /// Fails with
    /// [`LedgerError::ReservationFinalized`](crate::LedgerError::ReservationFinalized)
    /// when a commit or cancel entry already references the reservation.
    fn verify_reservation_open(&mut self, reservation_id: TransactionId) -> Result<()>;

    fn find_transaction(&mut self, transaction_id: TransactionId) -> Result<JournalEntry>;

    /// The reservation entry plus every entry sharing its idempotency key
    /// and every finalizer referencing it, in insertion order.
    fn find_related(&mut self, reservation_id: TransactionId) -> Result<Vec<JournalEntry>>;

    /// Entries previously written under the idempotency key, in insertion
    /// order. Empty when the request is new.
    fn lookup_idempotent(
        &mut self,
        request_id: RequestId,
        account_id: &AccountId,
    ) -> Result<Vec<JournalEntry>>;

    /// Publishes every write and releases every lock.
    fn commit(self) -> Result<()>;

    /// Discards every write and releases every lock.
    fn rollback(self);
}
