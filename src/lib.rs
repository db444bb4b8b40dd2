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

//! # Account Ledger
//!
//! An append-only journal of signed money movements per account, with a
//! running balance kept alongside it. Besides plain transactions the ledger
//! supports two-phase reservations (reserve, then commit or cancel) and an
//! atomic transfer-and-transact pair.
//!
//! ## Core Components
//!
//! - [`Engine`]: Turns validated commands into journal entries and balance
//!   updates, one store transaction per call
//! - [`store::LedgerStore`]: The storage seam; [`MemoryStore`] implements it
//!   with per-row locks
//! - [`JournalEntry`]: One immutable ledger row
//! - [`LedgerError`]: Error types, classified by [`ErrorKind`]
//! - [`api`]: The JSON-over-HTTP request surface
//!
//! ## Example
//!
//! ```
//! use account_ledger::{
//!     AccountId, CreateTransaction, Engine, MemoryStore, OutcomeStatus, RequestId,
//! };
//!
//! let engine = Engine::new(MemoryStore::new());
//! let account = AccountId::new("acct-1");
//!
//! let outcome = engine
//!     .create_transaction(CreateTransaction {
//!         request_id: RequestId::new_random(),
//!         account_id: account.clone(),
//!         debit_card_id: None,
//!         transaction_amount: 500,
//!         transaction_metadata: "payroll".into(),
//!         authorize_against_balance: false,
//!     })
//!     .unwrap();
//!
//! assert_eq!(outcome.status, OutcomeStatus::Success);
//! assert_eq!(engine.store().balance(&account), Some(500));
//! ```
//!
//! ## Thread Safety
//!
//! [`Engine`] holds no mutable state; share it behind an `Arc`. Calls on the
//! same account serialize on the store's balance row lock, calls on
//! different accounts run in parallel.

pub mod api;
mod base;
pub mod command;
pub mod config;
mod engine;
pub mod error;
pub mod journal;
pub mod store;

pub use base::{AccountId, DebitCardId, RequestId, TransactionId};
pub use command::{
    CancelReservation, CommitReservation, CreateTransaction, FindQuery, Outcome, OutcomeStatus,
    TransferAndTransact, TransferReservation,
};
pub use config::Config;
pub use engine::Engine;
pub use error::{ErrorKind, LedgerError, Result};
pub use journal::{JournalEntry, TransactionTypeCode};
pub use store::MemoryStore;
