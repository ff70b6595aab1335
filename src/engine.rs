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

//! Credit ledger engine.
//!
//! The [`Engine`] owns every account, the global journal and the documents
//! whose state changes post ledger entries (appointments, grievances). This
//! module holds the balance queries and the transaction issuer; the
//! partnership, booking and grievance flows extend `Engine` from their own
//! modules.
//!
//! # Issuing
//!
//! - **Earn** (`earned`, `refund`, `bonus`): unconditional.
//! - **Spend** (`spent`, `deducted`): admitted only if the balance covers the
//!   amount. The check and the append run under the account lock, so two
//!   concurrent spends can never both pass against the same balance.
//! - **Transfer**: a `spent` leg and an `earned` leg posted under both account
//!   locks. Both post or neither does.
//!
//! # Thread Safety
//!
//! Documents live in [`DashMap`]s as `Arc<Mutex<_>>`. A map guard is never held
//! while a document is locked. Locks are taken in this order:
//! access key, then appointment or grievance, then accounts by ascending
//! [`UserId`].

use crate::account::{Account, AccountData, AccountView, HistoryQuery, Page};
use crate::appointment::Appointment;
use crate::balance::LedgerSummary;
use crate::base::{
    AccessKey, AppointmentId, Credits, GrievanceId, ServiceId, TransactionId, UserId,
};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::grievance::Grievance;
use crate::journal::TransactionJournal;
use crate::service::ServiceRecord;
use crate::transaction::{NewTransaction, RelatedType, Transaction, TransactionKind};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of a transfer: both posted legs and the balances right after.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub debit: Transaction,
    pub credit: Transaction,
    pub sender_balance: Credits,
    pub receiver_balance: Credits,
}

/// Ledger engine managing accounts and the documents that move credits.
///
/// # Invariants
///
/// - A balance is always the fold of its account's entries and never negative.
/// - At most two accounts share an access key; partner links are symmetric.
/// - Each composite write posts all of its entries or none of them.
pub struct Engine {
    pub(crate) config: LedgerConfig,
    pub(crate) accounts: DashMap<UserId, Arc<Account>>,
    pub(crate) emails: DashMap<String, UserId>,
    /// Holders of each access key.
    pub(crate) access_keys: DashMap<AccessKey, Vec<UserId>>,
    pub(crate) key_locks: DashMap<AccessKey, Arc<Mutex<()>>>,
    pub(crate) services: DashMap<ServiceId, ServiceRecord>,
    pub(crate) appointments: DashMap<AppointmentId, Arc<Mutex<Appointment>>>,
    pub(crate) grievances: DashMap<GrievanceId, Arc<Mutex<Grievance>>>,
    journal: TransactionJournal,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Engine {
            config,
            accounts: DashMap::new(),
            emails: DashMap::new(),
            access_keys: DashMap::new(),
            key_locks: DashMap::new(),
            services: DashMap::new(),
            appointments: DashMap::new(),
            grievances: DashMap::new(),
            journal: TransactionJournal::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Looks up a journaled entry by id.
    pub fn transaction(&self, id: &TransactionId) -> Result<Arc<Transaction>, LedgerError> {
        self.journal
            .get(id)
            .ok_or(LedgerError::TransactionNotFound(*id))
    }

    /// Number of entries posted across all accounts.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub(crate) fn account(&self, user: UserId) -> Result<Arc<Account>, LedgerError> {
        self.accounts
            .get(&user)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UserNotFound(user))
    }

    /// Journals an entry and appends it to a locked account. A failure at
    /// either step leaves both untouched.
    pub(crate) fn post_locked(
        &self,
        data: &mut AccountData,
        new: NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        let transaction = data.admit(new, Utc::now())?;
        self.journal.record(transaction.clone())?;
        data.commit(transaction.clone());
        log_posted(&transaction);
        Ok(transaction)
    }

    /// Posts one entry on each of two locked accounts, both or neither.
    pub(crate) fn post_pair_locked(
        &self,
        first: (&mut AccountData, NewTransaction),
        second: (&mut AccountData, NewTransaction),
    ) -> Result<(Transaction, Transaction), LedgerError> {
        let (first_data, first_new) = first;
        let (second_data, second_new) = second;
        let now = Utc::now();
        let first_tx = first_data.admit(first_new, now)?;
        let second_tx = second_data.admit(second_new, now)?;
        self.journal.record_all([first_tx.clone(), second_tx.clone()])?;
        first_data.commit(first_tx.clone());
        second_data.commit(second_tx.clone());
        log_posted(&first_tx);
        log_posted(&second_tx);
        Ok((first_tx, second_tx))
    }

    /// Posts a penalty capped at the current balance. See
    /// [`AccountData::admit_capped`].
    pub(crate) fn post_capped_locked(
        &self,
        data: &mut AccountData,
        new: NewTransaction,
    ) -> Result<Option<Transaction>, LedgerError> {
        let requested = new.amount;
        let Some(transaction) = data.admit_capped(new, Utc::now())? else {
            warn!(user = %data.id(), requested, "penalty skipped, balance is empty");
            return Ok(None);
        };
        self.journal.record(transaction.clone())?;
        data.commit(transaction.clone());
        info!(
            user = %transaction.user_id,
            tx = %transaction.id,
            kind = %transaction.kind,
            amount = transaction.amount,
            requested,
            "posted capped ledger entry"
        );
        Ok(Some(transaction))
    }

    // === Balance Calculator ===

    /// Current balance of `user`, folded from every committed entry.
    pub fn balance(&self, user: UserId) -> Result<Credits, LedgerError> {
        Ok(self.account(user)?.balance().net())
    }

    pub fn summary(&self, user: UserId) -> Result<LedgerSummary, LedgerError> {
        Ok(self.account(user)?.lock().summary())
    }

    /// One page of the user's entries. Missing paging values fall back to
    /// the configured defaults; `limit` is capped.
    pub fn history(
        &self,
        user: UserId,
        query: HistoryQuery,
    ) -> Result<Page<Transaction>, LedgerError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(self.config.history_default_limit)
            .clamp(1, self.config.history_max_limit.max(1));
        Ok(self.account(user)?.lock().history(page, limit, query.sort))
    }

    pub fn account_view(&self, user: UserId) -> Result<AccountView, LedgerError> {
        Ok(self.account(user)?.view())
    }

    // === Transaction Issuer ===

    /// Posts any fully specified entry. Spending kinds must be covered by
    /// the balance.
    #[instrument(skip(self, new), fields(user = %new.user_id, kind = %new.kind))]
    pub fn create_transaction(&self, new: NewTransaction) -> Result<Transaction, LedgerError> {
        let account = self.account(new.user_id)?;
        let mut data = account.lock();
        self.post_locked(&mut data, new)
    }

    /// Posts an `earned` entry of `|amount|`.
    pub fn add_credits(
        &self,
        user: UserId,
        amount: Credits,
        reason: &str,
        related_id: Option<String>,
        related_type: Option<RelatedType>,
    ) -> Result<Transaction, LedgerError> {
        self.create_transaction(
            NewTransaction::new(user, TransactionKind::Earned, amount, reason)
                .maybe_related(related_id, related_type),
        )
    }

    /// Posts a `spent` entry of `|amount|`, or fails with
    /// [`LedgerError::InsufficientFunds`] leaving the balance untouched.
    pub fn spend_credits(
        &self,
        user: UserId,
        amount: Credits,
        reason: &str,
        related_id: Option<String>,
        related_type: Option<RelatedType>,
    ) -> Result<Transaction, LedgerError> {
        self.create_transaction(
            NewTransaction::new(user, TransactionKind::Spent, amount, reason)
                .maybe_related(related_id, related_type),
        )
    }

    /// Posts a `refund` entry of `|amount|`.
    pub fn refund(
        &self,
        user: UserId,
        amount: Credits,
        reason: &str,
        related_id: Option<String>,
        related_type: Option<RelatedType>,
    ) -> Result<Transaction, LedgerError> {
        self.create_transaction(
            NewTransaction::new(user, TransactionKind::Refund, amount, reason)
                .maybe_related(related_id, related_type),
        )
    }

    /// Moves `|amount|` credits from `from` to `to`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::SelfTransfer`] - sender and receiver are the same.
    /// - [`LedgerError::UserNotFound`] - either account is missing.
    /// - [`LedgerError::InsufficientFunds`] - the sender cannot cover it.
    #[instrument(skip(self, reason))]
    pub fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Credits,
        reason: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }
        let debit = NewTransaction::new(from, TransactionKind::Spent, amount, reason)
            .related(to, RelatedType::Transfer);
        let credit = NewTransaction::new(to, TransactionKind::Earned, amount, reason)
            .related(from, RelatedType::Transfer);
        debit.validate()?;
        credit.validate()?;

        let sender = self.account(from)?;
        let receiver = self.account(to)?;
        let (mut sender_data, mut receiver_data) =
            lock_pair((from, sender.as_ref()), (to, receiver.as_ref()));

        let (debit, credit) =
            self.post_pair_locked((&mut *sender_data, debit), (&mut *receiver_data, credit))?;

        Ok(TransferReceipt {
            debit,
            credit,
            sender_balance: sender_data.balance().net(),
            receiver_balance: receiver_data.balance().net(),
        })
    }

    /// Transfers to the caller's linked partner.
    pub fn transfer_to_partner(
        &self,
        user: UserId,
        amount: Credits,
        reason: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        let partner = self
            .account(user)?
            .profile()
            .partner_id
            .ok_or(LedgerError::NotLinked)?;
        self.transfer(user, partner, amount, reason)
    }
}

fn log_posted(transaction: &Transaction) {
    info!(
        user = %transaction.user_id,
        tx = %transaction.id,
        kind = %transaction.kind,
        amount = transaction.amount,
        "posted ledger entry"
    );
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks two distinct accounts in ascending id order and returns the guards
/// in argument order.
pub(crate) fn lock_pair<'a>(
    first: (UserId, &'a Account),
    second: (UserId, &'a Account),
) -> (MutexGuard<'a, AccountData>, MutexGuard<'a, AccountData>) {
    debug_assert_ne!(first.0, second.0, "lock_pair needs two accounts");
    if first.0 < second.0 {
        let a = first.1.lock();
        let b = second.1.lock();
        (a, b)
    } else {
        let b = second.1.lock();
        let a = first.1.lock();
        (a, b)
    }
}
