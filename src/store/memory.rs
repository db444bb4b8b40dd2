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

//! In-process store with row-level locking.
//!
//! Balance rows and reservation rows each sit behind their own
//! [`parking_lot::Mutex`], looked up through a [`DashMap`]. A
//! [`MemoryTransaction`] keeps the guards of every row it locked, buffers its
//! writes, and publishes them under the journal write lock on commit. Other
//! transactions never observe a partial write.
//!
//! # Example
//!
//! ```
//! use account_ledger::store::{LedgerStore, MemoryStore, StoreTransaction};
//! use account_ledger::AccountId;
//!
//! let store = MemoryStore::new();
//! let account = AccountId::new("acct-1");
//!
//! let mut tx = store.begin().unwrap();
//! assert_eq!(tx.lock_balance(&account).unwrap(), 0);
//! tx.upsert_balance(&account, 250).unwrap();
//! tx.commit().unwrap();
//!
//! assert_eq!(store.balance(&account), Some(250));
//! ```

use crate::base::{AccountId, RequestId, TransactionId};
use crate::error::{LedgerError, Result};
use crate::journal::{JournalEntry, NewJournalEntry, Reservation, TransactionTypeCode};
use crate::store::{LedgerStore, StoreTransaction};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// `None` until the first upsert materializes the row.
type BalanceRow = Arc<Mutex<Option<i64>>>;
type BalanceGuard = ArcMutexGuard<RawMutex, Option<i64>>;
type ReservationGuard = ArcMutexGuard<RawMutex, ()>;

/// Committed journal rows plus the indexes the store queries by.
#[derive(Debug, Default)]
struct Journal {
    /// Rows in commit order.
    entries: Vec<JournalEntry>,
    by_transaction: HashMap<TransactionId, usize>,
    by_request: HashMap<(RequestId, AccountId), Vec<usize>>,
    /// Commit and cancel rows keyed by the reservation they close.
    finalizers: HashMap<TransactionId, Vec<usize>>,
    last_inserted: HashMap<AccountId, DateTime<Utc>>,
}

impl Journal {
    fn get(&self, transaction_id: &TransactionId) -> Option<&JournalEntry> {
        self.by_transaction
            .get(transaction_id)
            .map(|&position| &self.entries[position])
    }

    fn positions_for_key(&self, request_id: RequestId, account_id: &AccountId) -> &[usize] {
        self.by_request
            .get(&(request_id, account_id.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn finalizer_positions(&self, reservation_id: &TransactionId) -> &[usize] {
        self.finalizers
            .get(reservation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn push(&mut self, entry: JournalEntry) {
        let position = self.entries.len();
        self.by_transaction.insert(entry.transaction_id, position);
        self.by_request
            .entry((entry.request_id, entry.account_id.clone()))
            .or_default()
            .push(position);
        if entry.transaction_type.is_finalizer() {
            if let Some(reservation_id) = entry.reservation_id {
                self.finalizers.entry(reservation_id).or_default().push(position);
            }
        }
        self.last_inserted
            .insert(entry.account_id.clone(), entry.inserted_at);
        self.entries.push(entry);
    }
}

#[derive(Debug)]
struct Shared {
    balances: DashMap<AccountId, BalanceRow>,
    reservations: DashMap<TransactionId, Arc<Mutex<()>>>,
    journal: RwLock<Journal>,
    lock_timeout: Duration,
}

/// Thread-safe in-memory ledger store. Cloning shares the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates an empty store with the default lock timeout.
    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates an empty store whose row locks give up after `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                balances: DashMap::new(),
                reservations: DashMap::new(),
                journal: RwLock::new(Journal::default()),
                lock_timeout,
            }),
        }
    }

    /// Committed balance of an account, `None` if the row was never written.
    ///
    /// Blocks while another transaction holds the row.
    pub fn balance(&self, account_id: &AccountId) -> Option<i64> {
        let row = self.shared.balances.get(account_id)?.value().clone();
        let balance = *row.lock();
        balance
    }

    /// Committed entries of one account, in insertion order.
    pub fn journal_for(&self, account_id: &AccountId) -> Vec<JournalEntry> {
        self.shared
            .journal
            .read()
            .entries
            .iter()
            .filter(|entry| &entry.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Number of committed entries across all accounts.
    pub fn journal_len(&self) -> usize {
        self.shared.journal.read().entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            balance_locks: HashMap::new(),
            reservation_locks: HashMap::new(),
            pending_balances: HashMap::new(),
            pending_entries: Vec::new(),
        })
    }
}

/// One open transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    balance_locks: HashMap<AccountId, BalanceGuard>,
    reservation_locks: HashMap<TransactionId, ReservationGuard>,
    pending_balances: HashMap<AccountId, i64>,
    /// Appended but not yet published, in append order.
    pending_entries: Vec<JournalEntry>,
}

impl MemoryTransaction {
    fn acquire_balance_row(&mut self, account_id: &AccountId) -> Result<()> {
        if self.balance_locks.contains_key(account_id) {
            return Ok(());
        }
        // Clone the row handle out so the map shard is not held while waiting.
        let row = self
            .shared
            .balances
            .entry(account_id.clone())
            .or_default()
            .value()
            .clone();
        let guard = row
            .try_lock_arc_for(self.shared.lock_timeout)
            .ok_or_else(|| LedgerError::LockTimeout(format!("balance row {account_id}")))?;
        trace!(account = %account_id, "balance row locked");
        self.balance_locks.insert(account_id.clone(), guard);
        Ok(())
    }

    fn acquire_reservation_row(&mut self, reservation_id: TransactionId) -> Result<()> {
        if self.reservation_locks.contains_key(&reservation_id) {
            return Ok(());
        }
        let row = self
            .shared
            .reservations
            .entry(reservation_id)
            .or_default()
            .value()
            .clone();
        let guard = row
            .try_lock_arc_for(self.shared.lock_timeout)
            .ok_or_else(|| LedgerError::LockTimeout(format!("reservation row {reservation_id}")))?;
        trace!(reservation = %reservation_id, "reservation row locked");
        self.reservation_locks.insert(reservation_id, guard);
        Ok(())
    }

    /// An entry as this transaction sees it: its own appends, then committed rows.
    fn visible(&self, transaction_id: &TransactionId) -> Option<JournalEntry> {
        self.pending_entries
            .iter()
            .find(|entry| &entry.transaction_id == transaction_id)
            .cloned()
            .or_else(|| self.shared.journal.read().get(transaction_id).cloned())
    }

    fn next_inserted_at(&self, account_id: &AccountId) -> DateTime<Utc> {
        let now = Utc::now();
        let pending_last = self
            .pending_entries
            .iter()
            .rev()
            .find(|entry| &entry.account_id == account_id)
            .map(|entry| entry.inserted_at);
        let committed_last = self
            .shared
            .journal
            .read()
            .last_inserted
            .get(account_id)
            .copied();
        [Some(now), pending_last, committed_last]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(now)
    }
}

impl StoreTransaction for MemoryTransaction {
    fn lock_balance(&mut self, account_id: &AccountId) -> Result<i64> {
        self.acquire_balance_row(account_id)?;
        if let Some(balance) = self.pending_balances.get(account_id) {
            return Ok(*balance);
        }
        let committed = self
            .balance_locks
            .get(account_id)
            .and_then(|guard| **guard);
        debug!(account = %account_id, balance = ?committed, "balance read for update");
        Ok(committed.unwrap_or(0))
    }

    fn upsert_balance(&mut self, account_id: &AccountId, balance: i64) -> Result<()> {
        self.acquire_balance_row(account_id)?;
        self.pending_balances.insert(account_id.clone(), balance);
        debug!(account = %account_id, balance, "balance upserted");
        Ok(())
    }

    fn append(&mut self, entry: NewJournalEntry) -> Result<JournalEntry> {
        let transaction_id = TransactionId::new_random();
        if self.visible(&transaction_id).is_some() {
            return Err(LedgerError::Internal(format!(
                "generated transaction_id {transaction_id} is not unique"
            )));
        }
        let inserted_at = self.next_inserted_at(&entry.account_id);
        let entry = entry.into_entry(transaction_id, inserted_at);
        debug!(
            transaction = %entry.transaction_id,
            account = %entry.account_id,
            kind = %entry.transaction_type,
            amount = entry.transaction_amount,
            running_balance = entry.running_balance,
            "journal entry appended"
        );
        self.pending_entries.push(entry.clone());
        Ok(entry)
    }

    fn find_reservation(&mut self, reservation_id: TransactionId) -> Result<Reservation> {
        let is_reservation = |entry: &JournalEntry| {
            entry.transaction_type == TransactionTypeCode::Reservation
        };
        // Rows are immutable, so existence can be checked before locking.
        if !self.visible(&reservation_id).is_some_and(|entry| is_reservation(&entry)) {
            return Err(LedgerError::ReservationNotFound(reservation_id));
        }
        self.acquire_reservation_row(reservation_id)?;
        self.visible(&reservation_id)
            .filter(is_reservation)
            .map(|entry| Reservation::from(&entry))
            .ok_or(LedgerError::ReservationNotFound(reservation_id))
    }

    fn verify_reservation_open(&mut self, reservation_id: TransactionId) -> Result<()> {
        let committed = self
            .shared
            .journal
            .read()
            .finalizer_positions(&reservation_id)
            .len();
        let pending = self
            .pending_entries
            .iter()
            .filter(|entry| {
                entry.transaction_type.is_finalizer()
                    && entry.reservation_id == Some(reservation_id)
            })
            .count();
        if committed + pending > 0 {
            return Err(LedgerError::ReservationFinalized(reservation_id));
        }
        Ok(())
    }

    fn find_transaction(&mut self, transaction_id: TransactionId) -> Result<JournalEntry> {
        self.visible(&transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))
    }

    fn find_related(&mut self, reservation_id: TransactionId) -> Result<Vec<JournalEntry>> {
        let origin = self
            .visible(&reservation_id)
            .filter(|entry| entry.transaction_type == TransactionTypeCode::Reservation)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        let mut related: Vec<JournalEntry> = {
            let journal = self.shared.journal.read();
            let positions: BTreeSet<usize> = journal
                .positions_for_key(origin.request_id, &origin.account_id)
                .iter()
                .chain(journal.finalizer_positions(&reservation_id))
                .copied()
                .collect();
            positions
                .into_iter()
                .map(|position| journal.entries[position].clone())
                .collect()
        };
        related.extend(
            self.pending_entries
                .iter()
                .filter(|entry| {
                    (entry.request_id == origin.request_id
                        && entry.account_id == origin.account_id)
                        || entry.reservation_id == Some(reservation_id)
                })
                .cloned(),
        );
        related.sort_by_key(|entry| entry.inserted_at);
        Ok(related)
    }

    fn lookup_idempotent(
        &mut self,
        request_id: RequestId,
        account_id: &AccountId,
    ) -> Result<Vec<JournalEntry>> {
        let mut entries: Vec<JournalEntry> = {
            let journal = self.shared.journal.read();
            journal
                .positions_for_key(request_id, account_id)
                .iter()
                .map(|&position| journal.entries[position].clone())
                .collect()
        };
        entries.extend(
            self.pending_entries
                .iter()
                .filter(|entry| entry.request_id == request_id && &entry.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|entry| entry.inserted_at);
        trace!(request = %request_id, account = %account_id, found = entries.len(), "idempotency lookup");
        Ok(entries)
    }

    fn commit(mut self) -> Result<()> {
        if let Some(account_id) = self
            .pending_balances
            .keys()
            .find(|account_id| !self.balance_locks.contains_key(*account_id))
        {
            return Err(LedgerError::Internal(format!(
                "balance of {account_id} written without holding its row lock"
            )));
        }

        let entries = std::mem::take(&mut self.pending_entries);
        let balances = std::mem::take(&mut self.pending_balances);
        let published = entries.len();
        {
            let mut journal = self.shared.journal.write();
            if let Some(duplicate) = entries
                .iter()
                .find(|entry| journal.get(&entry.transaction_id).is_some())
            {
                return Err(LedgerError::Internal(format!(
                    "transaction_id {} already present in the journal",
                    duplicate.transaction_id
                )));
            }
            for entry in entries {
                journal.push(entry);
            }
        }
        for (account_id, balance) in balances {
            if let Some(guard) = self.balance_locks.get_mut(&account_id) {
                **guard = Some(balance);
            }
        }
        debug!(entries = published, "store transaction committed");
        // Row locks are released when `self` drops here.
        Ok(())
    }

    fn rollback(self) {
        debug!(
            discarded = self.pending_entries.len(),
            "store transaction rolled back"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(request_id: RequestId, account: &str, amount: i64, balance: i64) -> NewJournalEntry {
        NewJournalEntry {
            request_id,
            account_id: AccountId::new(account),
            debit_card_id: None,
            transaction_amount: amount,
            transaction_type: TransactionTypeCode::Normal,
            running_balance: balance,
            reservation_id: None,
            transaction_metadata: "{}".to_string(),
        }
    }

    #[test]
    fn missing_balance_row_reads_as_zero_and_is_not_materialized() {
        let store = MemoryStore::new();
        let account = AccountId::new("acct-1");

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.lock_balance(&account).unwrap(), 0);
        tx.commit().unwrap();

        assert_eq!(store.balance(&account), None);
    }

    #[test]
    fn transaction_sees_its_own_writes() {
        let store = MemoryStore::new();
        let account = AccountId::new("acct-1");
        let request = RequestId::new_random();

        let mut tx = store.begin().unwrap();
        tx.lock_balance(&account).unwrap();
        tx.upsert_balance(&account, 40).unwrap();
        let entry = tx.append(draft(request, "acct-1", 40, 40)).unwrap();

        assert_eq!(tx.lock_balance(&account).unwrap(), 40);
        assert_eq!(tx.find_transaction(entry.transaction_id).unwrap(), entry);
        assert_eq!(tx.lookup_idempotent(request, &account).unwrap(), vec![entry]);
        // Not yet visible to anyone else.
        assert_eq!(store.journal_len(), 0);
        tx.commit().unwrap();
        assert_eq!(store.journal_len(), 1);
        assert_eq!(store.balance(&account), Some(40));
    }

    #[test]
    fn rollback_discards_entries_and_balances() {
        let store = MemoryStore::new();
        let account = AccountId::new("acct-1");

        let mut tx = store.begin().unwrap();
        tx.lock_balance(&account).unwrap();
        tx.upsert_balance(&account, 10).unwrap();
        tx.append(draft(RequestId::new_random(), "acct-1", 10, 10))
            .unwrap();
        tx.rollback();

        assert_eq!(store.journal_len(), 0);
        assert_eq!(store.balance(&account), None);
    }

    #[test]
    fn dropping_a_transaction_aborts_it() {
        let store = MemoryStore::new();
        let account = AccountId::new("acct-1");
        {
            let mut tx = store.begin().unwrap();
            tx.upsert_balance(&account, 10).unwrap();
            tx.append(draft(RequestId::new_random(), "acct-1", 10, 10))
                .unwrap();
        }
        assert_eq!(store.journal_len(), 0);
        // The row lock was released with the transaction.
        let mut tx = store.begin().unwrap();
        assert_eq!(tx.lock_balance(&account).unwrap(), 0);
    }

    #[test]
    fn relocking_a_held_row_is_a_no_op() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = AccountId::new("acct-1");

        let mut tx = store.begin().unwrap();
        tx.lock_balance(&account).unwrap();
        assert_eq!(tx.lock_balance(&account).unwrap(), 0);
        tx.upsert_balance(&account, 5).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn contended_row_times_out_as_retriable_store_failure() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(20));
        let account = AccountId::new("acct-1");

        let mut holder = store.begin().unwrap();
        holder.lock_balance(&account).unwrap();

        let mut waiter = store.begin().unwrap();
        let err = waiter.lock_balance(&account).unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout(_)));
        assert!(err.is_retriable());
    }

    #[test]
    fn find_reservation_rejects_other_entry_types() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let entry = tx
            .append(draft(RequestId::new_random(), "acct-1", 10, 10))
            .unwrap();

        let err = tx.find_reservation(entry.transaction_id).unwrap_err();
        assert_eq!(err, LedgerError::ReservationNotFound(entry.transaction_id));
    }

    #[test]
    fn verify_open_sees_pending_finalizer() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut reservation = draft(RequestId::new_random(), "acct-1", -10, -10);
        reservation.transaction_type = TransactionTypeCode::Reservation;
        let reservation = tx.append(reservation).unwrap();

        tx.find_reservation(reservation.transaction_id).unwrap();
        tx.verify_reservation_open(reservation.transaction_id).unwrap();

        let mut cancel = draft(RequestId::new_random(), "acct-1", 10, 0);
        cancel.transaction_type = TransactionTypeCode::ReservationCancel;
        cancel.reservation_id = Some(reservation.transaction_id);
        tx.append(cancel).unwrap();

        assert_eq!(
            tx.verify_reservation_open(reservation.transaction_id),
            Err(LedgerError::ReservationFinalized(reservation.transaction_id))
        );
    }

    #[test]
    fn idempotent_lookup_returns_entries_in_insertion_order() {
        let store = MemoryStore::new();
        let request = RequestId::new_random();
        let account = AccountId::new("acct-1");

        let mut tx = store.begin().unwrap();
        let first = tx.append(draft(request, "acct-1", 100, 100)).unwrap();
        let second = tx.append(draft(request, "acct-1", -40, 60)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let found = tx.lookup_idempotent(request, &account).unwrap();
        assert_eq!(found, vec![first.clone(), second.clone()]);
        assert!(first.inserted_at <= second.inserted_at);
        assert!(
            tx.lookup_idempotent(request, &AccountId::new("acct-2"))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn find_related_collects_reservation_and_finalizer() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut reservation = draft(RequestId::new_random(), "acct-1", -10, -10);
        reservation.transaction_type = TransactionTypeCode::Reservation;
        let reservation = tx.append(reservation).unwrap();
        tx.append(draft(RequestId::new_random(), "acct-1", 3, -7))
            .unwrap();
        let mut commit = draft(RequestId::new_random(), "acct-1", 0, -7);
        commit.transaction_type = TransactionTypeCode::ReservationCommit;
        commit.reservation_id = Some(reservation.transaction_id);
        let commit = tx.append(commit).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let related = tx.find_related(reservation.transaction_id).unwrap();
        assert_eq!(related, vec![reservation, commit]);
    }
}
