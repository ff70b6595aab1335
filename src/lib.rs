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

//! # Muffi Ledger
//!
//! Credit ledger for couples. Partners earn credits, spend them booking
//! services from each other, and see them adjusted by ratings and
//! grievances. Every change is an append-only ledger entry; a balance is the
//! fold of those entries and is never stored.
//!
//! ## Core Components
//!
//! - [`Engine`]: owns accounts, documents and the journal; all operations
//! - [`Account`]: one user's profile and ledger under a single lock
//! - [`Balance`] / [`LedgerSummary`]: derived totals
//! - [`Transaction`] / [`TransactionKind`]: ledger entries
//! - [`LedgerError`]: failures, each with a stable [`ErrorKind`]
//!
//! ## Example
//!
//! ```
//! use muffi_ledger::{Engine, NewUser};
//!
//! let engine = Engine::new();
//! let signup = |name: &str| NewUser {
//!     name: name.into(),
//!     email: format!("{name}@example.com"),
//!     access_key: "muffin42".into(),
//! };
//!
//! let ada = engine.register_user(signup("ada")).unwrap().user.profile.id;
//! // Same key: the second signup links both accounts.
//! let bob = engine.register_user(signup("bob")).unwrap();
//! assert_eq!(bob.user.profile.partner_id, Some(ada));
//!
//! // 20 welcome credits + 25 link bonus each
//! assert_eq!(engine.balance(ada).unwrap(), 45);
//! engine.transfer_to_partner(ada, 15, "coffee").unwrap();
//! assert_eq!(engine.balance(bob.user.profile.id).unwrap(), 60);
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Send + Sync` and meant to be shared behind an `Arc`.
//! Operations on unrelated accounts run in parallel; see [`engine`] for the
//! lock order.

pub mod account;
pub mod appointment;
mod balance;
mod base;
pub mod config;
pub mod engine;
pub mod error;
pub mod grievance;
pub mod http;
mod journal;
pub mod partnership;
pub mod service;
mod transaction;

pub use account::{Account, AccountView, HistoryQuery, Page, SortOrder, UserProfile};
pub use appointment::{
    Appointment, AppointmentStatus, Booking, BookingRequest, Cancellation, CustomBookingRequest,
    RatingOutcome, final_credits,
};
pub use balance::{Balance, LedgerSummary};
pub use base::{AccessKey, AppointmentId, Credits, GrievanceId, ServiceId, TransactionId, UserId};
pub use config::{ConfigError, LedgerConfig, ServerConfig};
pub use engine::{Engine, TransferReceipt};
pub use error::{ErrorKind, LedgerError};
pub use grievance::{
    Grievance, GrievanceRevision, GrievanceStatus, GrievanceUpdate, NewGrievance, Severity,
    credit_impact,
};
pub use journal::TransactionJournal;
pub use partnership::{LinkOutcome, NewUser, Registration, UnlinkOutcome};
pub use service::{AdHocService, NewService, Service, ServiceRecord};
pub use transaction::{NewTransaction, RelatedType, Transaction, TransactionKind};
