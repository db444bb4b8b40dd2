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

//! Property-based tests for the ledger engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! valid commands.

use account_ledger::{
    AccountId, CancelReservation, CommitReservation, CreateTransaction, Engine, FindQuery,
    MemoryStore, Outcome, OutcomeStatus, RequestId, TransactionId, TransactionTypeCode,
    TransferAndTransact, TransferReservation,
};
use proptest::prelude::*;
use std::collections::HashMap;

const ACCOUNTS: [&str; 3] = ["acct-a", "acct-b", "acct-c"];

// =============================================================================
// Arbitrary Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Transaction {
        account: usize,
        amount: i64,
        authorize: bool,
    },
    Reservation {
        account: usize,
        amount: i64,
    },
    Commit {
        reservation: usize,
        amount: i64,
    },
    Cancel {
        reservation: usize,
    },
    Transfer {
        account: usize,
        transfer: i64,
        amount: i64,
    },
}

/// Nonzero amount small enough that no sequence can overflow.
fn arb_amount() -> impl Strategy<Value = i64> {
    prop_oneof![-100_000i64..=-1, 1i64..=100_000]
}

fn arb_debit() -> impl Strategy<Value = i64> {
    -100_000i64..=-1
}

fn arb_op() -> impl Strategy<Value = Op> {
    let account = 0..ACCOUNTS.len();
    prop_oneof![
        (account.clone(), arb_amount(), any::<bool>()).prop_map(|(account, amount, authorize)| {
            Op::Transaction {
                account,
                amount,
                authorize,
            }
        }),
        (account.clone(), arb_amount())
            .prop_map(|(account, amount)| Op::Reservation { account, amount }),
        (any::<usize>(), arb_amount())
            .prop_map(|(reservation, amount)| Op::Commit { reservation, amount }),
        any::<usize>().prop_map(|reservation| Op::Cancel { reservation }),
        (account, arb_debit(), arb_debit()).prop_map(|(account, transfer, amount)| {
            Op::Transfer {
                account,
                transfer,
                amount,
            }
        }),
    ]
}

fn create(account: usize, amount: i64, authorize: bool) -> CreateTransaction {
    CreateTransaction {
        request_id: RequestId::new_random(),
        account_id: AccountId::new(ACCOUNTS[account]),
        debit_card_id: None,
        transaction_amount: amount,
        transaction_metadata: "{}".to_string(),
        authorize_against_balance: authorize,
    }
}

/// Applies `ops`, returning the ids of every accepted reservation.
fn apply(engine: &Engine<MemoryStore>, ops: &[Op]) -> Vec<TransactionId> {
    let mut reservations: Vec<TransactionId> = Vec::new();
    for op in ops {
        match op.clone() {
            Op::Transaction {
                account,
                amount,
                authorize,
            } => {
                engine
                    .create_transaction(create(account, amount, authorize))
                    .unwrap();
            }
            Op::Reservation { account, amount } => {
                let outcome = engine
                    .create_reservation(create(account, amount, true))
                    .unwrap();
                if outcome.status == OutcomeStatus::Success {
                    reservations.push(outcome.entries[0].transaction_id);
                }
            }
            Op::Commit {
                reservation,
                amount,
            } if !reservations.is_empty() => {
                let reservation_id = reservations[reservation % reservations.len()];
                // Finalized reservations are expected to conflict.
                let _ = engine.commit_reservation(CommitReservation {
                    request_id: RequestId::new_random(),
                    reservation_id,
                    transaction_amount: amount,
                    transaction_metadata: "{}".to_string(),
                    account_id: None,
                });
            }
            Op::Cancel { reservation } if !reservations.is_empty() => {
                let reservation_id = reservations[reservation % reservations.len()];
                let _ = engine.cancel_reservation(CancelReservation {
                    request_id: RequestId::new_random(),
                    reservation_id,
                    transaction_metadata: "{}".to_string(),
                    account_id: None,
                });
            }
            Op::Transfer {
                account,
                transfer,
                amount,
            } => {
                engine
                    .transfer_and_transact(TransferAndTransact {
                        request_id: RequestId::new_random(),
                        transfer_reservation: TransferReservation {
                            transaction_id: TransactionId::new_random(),
                            transaction_amount: transfer,
                            transaction_metadata: "{}".to_string(),
                        },
                        account_id: AccountId::new(ACCOUNTS[account]),
                        debit_card_id: None,
                        transaction_amount: amount,
                        transaction_metadata: "{}".to_string(),
                    })
                    .unwrap();
            }
            Op::Commit { .. } | Op::Cancel { .. } => {}
        }
    }
    reservations
}

// =============================================================================
// Balance Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The stored balance equals the sum of the applied journal amounts, and
    /// every entry's running balance equals the sum up to and including it.
    #[test]
    fn balance_equals_journal_sum(ops in prop::collection::vec(arb_op(), 1..40)) {
        let engine = Engine::new(MemoryStore::new());
        apply(&engine, &ops);

        for name in ACCOUNTS {
            let account = AccountId::new(name);
            let mut sum = 0i64;
            for entry in engine.store().journal_for(&account) {
                if entry.transaction_type != TransactionTypeCode::Rejected {
                    sum += entry.transaction_amount;
                }
                prop_assert_eq!(entry.running_balance, sum);
            }
            prop_assert_eq!(engine.store().balance(&account).unwrap_or(0), sum);
        }
    }

    /// Authorized debits never take a balance below zero on their own.
    #[test]
    fn authorized_debits_never_overdraw(
        credits in prop::collection::vec(1i64..=10_000, 0..5),
        debits in prop::collection::vec(arb_debit(), 1..10),
    ) {
        let engine = Engine::new(MemoryStore::new());
        for amount in credits {
            engine.create_transaction(create(0, amount, false)).unwrap();
        }
        for amount in debits {
            let before = engine.store().balance(&AccountId::new(ACCOUNTS[0])).unwrap_or(0);
            let outcome = engine.create_transaction(create(0, amount, true)).unwrap();
            let after = engine.store().balance(&AccountId::new(ACCOUNTS[0])).unwrap_or(0);
            match outcome.status {
                OutcomeStatus::Success => prop_assert!(after >= 0),
                OutcomeStatus::InsufficientFunds => {
                    prop_assert!(before + amount < 0);
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}

// =============================================================================
// Reservation Lifecycle Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// No reservation ever has more than one commit or cancel entry.
    #[test]
    fn at_most_one_finalizer_per_reservation(ops in prop::collection::vec(arb_op(), 1..60)) {
        let engine = Engine::new(MemoryStore::new());
        let reservations = apply(&engine, &ops);

        let mut finalizers: HashMap<TransactionId, usize> = HashMap::new();
        for name in ACCOUNTS {
            for entry in engine.store().journal_for(&AccountId::new(name)) {
                if entry.transaction_type.is_finalizer() {
                    if let Some(reservation_id) = entry.reservation_id {
                        *finalizers.entry(reservation_id).or_default() += 1;
                    }
                }
            }
        }
        for reservation_id in reservations {
            prop_assert!(finalizers.get(&reservation_id).copied().unwrap_or(0) <= 1);
        }
    }

    /// Find by reservation id lists the reservation first and at most one finalizer.
    #[test]
    fn find_reservation_lists_reservation_and_finalizer(ops in prop::collection::vec(arb_op(), 1..40)) {
        let engine = Engine::new(MemoryStore::new());
        let reservations = apply(&engine, &ops);

        for reservation_id in reservations {
            let related = engine.find(FindQuery::Reservation(reservation_id)).unwrap();
            prop_assert!(!related.is_empty() && related.len() <= 2);
            prop_assert_eq!(related[0].transaction_id, reservation_id);
            prop_assert_eq!(related[0].transaction_type, TransactionTypeCode::Reservation);
            if let Some(finalizer) = related.get(1) {
                prop_assert!(finalizer.transaction_type.is_finalizer());
                prop_assert_eq!(finalizer.reservation_id, Some(reservation_id));
            }
        }
    }
}

// =============================================================================
// Idempotency and Round-Trip Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Repeating a create with the same request id changes nothing.
    #[test]
    fn repeated_create_is_indistinguishable(
        seed in prop::collection::vec(arb_amount(), 0..5),
        amount in arb_amount(),
        authorize in any::<bool>(),
        reservation in any::<bool>(),
    ) {
        let engine = Engine::new(MemoryStore::new());
        for credit in seed {
            engine.create_transaction(create(1, credit, false)).unwrap();
        }
        let command = create(1, amount, authorize);
        let run = |command: CreateTransaction| -> Outcome {
            if reservation {
                engine.create_reservation(command).unwrap()
            } else {
                engine.create_transaction(command).unwrap()
            }
        };

        let first = run(command.clone());
        let rows = engine.store().journal_len();
        let balance = engine.store().balance(&command.account_id);
        let second = run(command.clone());

        prop_assert_eq!(first, second);
        prop_assert_eq!(engine.store().journal_len(), rows);
        prop_assert_eq!(engine.store().balance(&command.account_id), balance);
    }

    /// Every accepted entry reads back bit-for-bit by its transaction id.
    #[test]
    fn accepted_entries_read_back_unchanged(ops in prop::collection::vec(arb_op(), 1..30)) {
        let engine = Engine::new(MemoryStore::new());
        apply(&engine, &ops);

        for name in ACCOUNTS {
            for entry in engine.store().journal_for(&AccountId::new(name)) {
                let found = engine.find(FindQuery::Transaction(entry.transaction_id)).unwrap();
                prop_assert_eq!(found, vec![entry]);
            }
        }
    }
}
