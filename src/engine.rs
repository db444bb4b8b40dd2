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

//! Ledger engine.
//!
//! The [`Engine`] turns validated commands into journal entries and balance
//! updates. Each call runs inside exactly one store transaction: on success
//! every entry and the new balance commit together, on any error nothing
//! becomes visible.
//!
//! # Operations
//!
//! - **Create transaction**: append a `NORMAL` entry and move the balance, or
//!   append a `REJECTED` entry when an authorized debit exceeds the balance.
//! - **Create reservation**: same, with a `RESERVATION` entry. The balance
//!   moves immediately.
//! - **Commit reservation**: append the correction between the final amount
//!   and the reserved amount.
//! - **Cancel reservation**: append the reversal of the reserved amount.
//! - **Transfer and transact**: credit a transfer and spend from it in one
//!   step, as two `NORMAL` entries sharing a request id.
//!
//! # Concurrency
//!
//! The engine holds no mutable state of its own. Requests on the same
//! account serialize on the account's balance row lock; commit and cancel of
//! the same reservation serialize on the reservation row lock, which is
//! always taken before the balance row.

use crate::base::{AccountId, RequestId};
use crate::command::{
    CancelReservation, CommitReservation, CreateTransaction, FindQuery, Outcome,
    TransferAndTransact,
};
use crate::error::{ErrorKind, LedgerError, Result};
use crate::journal::{JournalEntry, NewJournalEntry, TransactionTypeCode};
use crate::store::{LedgerStore, StoreTransaction};
use tracing::{debug, error, info, instrument, warn};

/// Journal and balance engine over a [`LedgerStore`].
///
/// # Invariants
///
/// - The journal is append-only.
/// - An account's running balance equals the sum of its entry amounts at
///   every commit point.
/// - A reservation has at most one finalizing entry (commit or cancel).
/// - A (request id, account id) pair produces entries at most once.
#[derive(Debug, Clone)]
pub struct Engine<S> {
    store: S,
}

impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Engine { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records an unconditional transaction, or a balance-checked one when
    /// `authorize_against_balance` is set.
    ///
    /// Without the flag a debit may overdraw the account; guarding against
    /// that is then the caller's job.
    #[instrument(
        skip_all,
        fields(request = %command.request_id, account = %command.account_id)
    )]
    pub fn create_transaction(&self, command: CreateTransaction) -> Result<Outcome> {
        self.create(command, TransactionTypeCode::Normal)
    }

    /// Reserves funds. Identical to [`create_transaction`](Self::create_transaction)
    /// except the accepted entry is a `RESERVATION` awaiting commit or cancel.
    #[instrument(
        skip_all,
        fields(request = %command.request_id, account = %command.account_id)
    )]
    pub fn create_reservation(&self, command: CreateTransaction) -> Result<Outcome> {
        self.create(command, TransactionTypeCode::Reservation)
    }

    /// Finalizes a reservation at `transaction_amount`, booking only the
    /// difference to the reserved amount.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ReservationNotFound`] - No such reservation.
    /// - [`LedgerError::ReservationFinalized`] - Already committed or cancelled.
    #[instrument(
        skip_all,
        fields(request = %command.request_id, reservation = %command.reservation_id)
    )]
    pub fn commit_reservation(&self, command: CommitReservation) -> Result<Outcome> {
        self.in_transaction(|tx| {
            if let Some(outcome) =
                replay_finalizer(tx, command.request_id, command.account_id.as_ref())?
            {
                return Ok(outcome);
            }

            let reservation = tx.find_reservation(command.reservation_id)?;
            // Same key under the reservation row lock, against the account
            // the reservation actually belongs to.
            if let Some(outcome) =
                replay_finalizer(tx, command.request_id, Some(&reservation.account_id))?
            {
                return Ok(outcome);
            }
            tx.verify_reservation_open(command.reservation_id)?;

            let balance = tx.lock_balance(&reservation.account_id)?;
            let correction = command
                .transaction_amount
                .checked_sub(reservation.transaction_amount)
                .ok_or(LedgerError::Overflow("commit correction"))?;

            let running_balance = if correction == 0 {
                balance
            } else {
                let running_balance = balance
                    .checked_add(correction)
                    .ok_or(LedgerError::Overflow("running balance"))?;
                tx.upsert_balance(&reservation.account_id, running_balance)?;
                running_balance
            };
            debug!(
                balance,
                reserved = reservation.transaction_amount,
                correction,
                running_balance,
                "committing reservation"
            );

            let entry = tx.append(NewJournalEntry {
                request_id: command.request_id,
                account_id: reservation.account_id,
                debit_card_id: reservation.debit_card_id,
                transaction_amount: correction,
                transaction_type: TransactionTypeCode::ReservationCommit,
                running_balance,
                reservation_id: Some(command.reservation_id),
                transaction_metadata: command.transaction_metadata,
            })?;
            info!(transaction = %entry.transaction_id, "reservation committed");
            Ok(Outcome::success(vec![entry]))
        })
    }

    /// Releases a reservation, returning the reserved amount to the balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ReservationNotFound`] - No such reservation.
    /// - [`LedgerError::ReservationFinalized`] - Already committed or cancelled.
    #[instrument(
        skip_all,
        fields(request = %command.request_id, reservation = %command.reservation_id)
    )]
    pub fn cancel_reservation(&self, command: CancelReservation) -> Result<Outcome> {
        self.in_transaction(|tx| {
            if let Some(outcome) =
                replay_finalizer(tx, command.request_id, command.account_id.as_ref())?
            {
                return Ok(outcome);
            }

            let reservation = tx.find_reservation(command.reservation_id)?;
            if let Some(outcome) =
                replay_finalizer(tx, command.request_id, Some(&reservation.account_id))?
            {
                return Ok(outcome);
            }
            tx.verify_reservation_open(command.reservation_id)?;

            let balance = tx.lock_balance(&reservation.account_id)?;
            let reversal = reservation
                .transaction_amount
                .checked_neg()
                .ok_or(LedgerError::Overflow("cancel reversal"))?;
            let running_balance = balance
                .checked_add(reversal)
                .ok_or(LedgerError::Overflow("running balance"))?;
            debug!(balance, reversal, running_balance, "cancelling reservation");

            tx.upsert_balance(&reservation.account_id, running_balance)?;
            let entry = tx.append(NewJournalEntry {
                request_id: command.request_id,
                account_id: reservation.account_id,
                debit_card_id: reservation.debit_card_id,
                transaction_amount: reversal,
                transaction_type: TransactionTypeCode::ReservationCancel,
                running_balance,
                reservation_id: Some(command.reservation_id),
                transaction_metadata: command.transaction_metadata,
            })?;
            info!(transaction = %entry.transaction_id, "reservation cancelled");
            Ok(Outcome::success(vec![entry]))
        })
    }

    /// Credits the transfer out of `transfer_reservation` and debits the
    /// transaction against it, as two `NORMAL` entries committed together.
    ///
    /// Neither leg is checked against the balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Internal`] when the request id already holds anything
    /// other than exactly two entries for the account.
    #[instrument(
        skip_all,
        fields(request = %command.request_id, account = %command.account_id)
    )]
    pub fn transfer_and_transact(&self, command: TransferAndTransact) -> Result<Outcome> {
        self.in_transaction(|tx| {
            if let Some(outcome) = replay_pair(tx, command.request_id, &command.account_id)? {
                return Ok(outcome);
            }
            let mut balance = tx.lock_balance(&command.account_id)?;
            if let Some(outcome) = replay_pair(tx, command.request_id, &command.account_id)? {
                return Ok(outcome);
            }

            let transfer_amount = 0i64
                .checked_sub(command.transfer_reservation.transaction_amount)
                .ok_or(LedgerError::Overflow("transfer amount"))?;
            let transfer_balance = balance
                .checked_add(transfer_amount)
                .ok_or(LedgerError::Overflow("running balance"))?;
            debug!(balance, transfer_amount, transfer_balance, "transfer leg");
            balance = transfer_balance;
            let transfer = tx.append(NewJournalEntry {
                request_id: command.request_id,
                account_id: command.account_id.clone(),
                debit_card_id: None,
                transaction_amount: transfer_amount,
                transaction_type: TransactionTypeCode::Normal,
                running_balance: balance,
                reservation_id: None,
                transaction_metadata: command.transfer_reservation.transaction_metadata,
            })?;

            let transact_balance = balance
                .checked_add(command.transaction_amount)
                .ok_or(LedgerError::Overflow("running balance"))?;
            debug!(
                balance,
                amount = command.transaction_amount,
                transact_balance,
                "transact leg"
            );
            balance = transact_balance;
            let transact = tx.append(NewJournalEntry {
                request_id: command.request_id,
                account_id: command.account_id.clone(),
                debit_card_id: command.debit_card_id,
                transaction_amount: command.transaction_amount,
                transaction_type: TransactionTypeCode::Normal,
                running_balance: balance,
                reservation_id: None,
                transaction_metadata: command.transaction_metadata,
            })?;

            tx.upsert_balance(&command.account_id, balance)?;
            info!(
                transfer = %transfer.transaction_id,
                transact = %transact.transaction_id,
                running_balance = balance,
                "transfer and transact recorded"
            );
            Ok(Outcome::success(vec![transfer, transact]))
        })
    }

    /// Read-only lookup by transaction id or by reservation id.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] - Unknown transaction id.
    /// - [`LedgerError::ReservationNotFound`] - The id is not a reservation.
    #[instrument(skip(self))]
    pub fn find(&self, query: FindQuery) -> Result<Vec<JournalEntry>> {
        let mut tx = self.store.begin()?;
        let found = match query {
            FindQuery::Transaction(transaction_id) => {
                tx.find_transaction(transaction_id).map(|entry| vec![entry])
            }
            FindQuery::Reservation(reservation_id) => tx.find_related(reservation_id),
        };
        tx.rollback();
        found
    }

    fn create(
        &self,
        command: CreateTransaction,
        accepted_type: TransactionTypeCode,
    ) -> Result<Outcome> {
        self.in_transaction(|tx| {
            if let Some(outcome) = replay_create(tx, command.request_id, &command.account_id)? {
                return Ok(outcome);
            }
            let balance = tx.lock_balance(&command.account_id)?;
            // A duplicate may have committed while this call waited on the row.
            if let Some(outcome) = replay_create(tx, command.request_id, &command.account_id)? {
                return Ok(outcome);
            }

            let mut entry = NewJournalEntry {
                request_id: command.request_id,
                account_id: command.account_id,
                debit_card_id: command.debit_card_id,
                transaction_amount: command.transaction_amount,
                transaction_type: accepted_type,
                running_balance: balance,
                reservation_id: None,
                transaction_metadata: command.transaction_metadata,
            };

            if command.authorize_against_balance
                && overdraws(balance, command.transaction_amount)
            {
                entry.transaction_type = TransactionTypeCode::Rejected;
                let entry = tx.append(entry)?;
                warn!(
                    balance,
                    amount = entry.transaction_amount,
                    transaction = %entry.transaction_id,
                    "insufficient funds"
                );
                return Ok(Outcome::insufficient_funds(entry));
            }

            let running_balance = balance
                .checked_add(command.transaction_amount)
                .ok_or(LedgerError::Overflow("running balance"))?;
            debug!(
                balance,
                amount = command.transaction_amount,
                running_balance,
                "approved"
            );
            tx.upsert_balance(&entry.account_id, running_balance)?;
            entry.running_balance = running_balance;
            let entry = tx.append(entry)?;
            info!(
                transaction = %entry.transaction_id,
                kind = %entry.transaction_type,
                "entry recorded"
            );
            Ok(Outcome::success(vec![entry]))
        })
    }

    /// Runs `work` in one store transaction: commit on `Ok`, roll back on `Err`.
    fn in_transaction<T>(
        &self,
        work: impl FnOnce(&mut S::Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.store.begin()?;
        match work(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if err.kind() == ErrorKind::Internal {
                    error!(error = %err, "aborting store transaction");
                } else {
                    debug!(error = %err, "aborting store transaction");
                }
                tx.rollback();
                Err(err)
            }
        }
    }
}

/// True when `amount` is a debit larger than `balance`.
fn overdraws(balance: i64, amount: i64) -> bool {
    amount < 0 && i128::from(balance) < i128::from(amount).abs()
}

fn first_previous<T: StoreTransaction>(
    tx: &mut T,
    request_id: RequestId,
    account_id: &AccountId,
) -> Result<Option<JournalEntry>> {
    Ok(tx.lookup_idempotent(request_id, account_id)?.into_iter().next())
}

fn replay_create<T: StoreTransaction>(
    tx: &mut T,
    request_id: RequestId,
    account_id: &AccountId,
) -> Result<Option<Outcome>> {
    Ok(first_previous(tx, request_id, account_id)?.map(|entry| {
        debug!(transaction = %entry.transaction_id, "replaying previous result");
        if entry.transaction_type == TransactionTypeCode::Rejected {
            Outcome::insufficient_funds(entry)
        } else {
            Outcome::success(vec![entry])
        }
    }))
}

fn replay_finalizer<T: StoreTransaction>(
    tx: &mut T,
    request_id: RequestId,
    account_id: Option<&AccountId>,
) -> Result<Option<Outcome>> {
    let Some(account_id) = account_id else {
        return Ok(None);
    };
    Ok(first_previous(tx, request_id, account_id)?.map(|entry| {
        debug!(transaction = %entry.transaction_id, "replaying previous result");
        Outcome::success(vec![entry])
    }))
}

fn replay_pair<T: StoreTransaction>(
    tx: &mut T,
    request_id: RequestId,
    account_id: &AccountId,
) -> Result<Option<Outcome>> {
    let previous = tx.lookup_idempotent(request_id, account_id)?;
    match previous.len() {
        0 => Ok(None),
        2 => {
            debug!("replaying previous transfer and transact");
            Ok(Some(Outcome::success(previous)))
        }
        found => {
            error!(found, "partial transfer and transact found for request");
            Err(LedgerError::Internal(format!(
                "expected 2 transactions and found {found} for request_id {request_id}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::overdraws;

    #[test]
    fn credits_never_overdraw() {
        assert!(!overdraws(0, 1));
        assert!(!overdraws(-500, 1));
    }

    #[test]
    fn debit_equal_to_balance_is_allowed() {
        assert!(!overdraws(1_000, -1_000));
        assert!(overdraws(1_000, -1_001));
    }

    #[test]
    fn extreme_amounts_do_not_overflow_the_check() {
        assert!(overdraws(i64::MAX, i64::MIN));
        assert!(overdraws(i64::MIN, -1));
    }
}
