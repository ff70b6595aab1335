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

//! User accounts and their ledgers.
//!
//! Each [`Account`] owns the user's profile and the user's append-only list of
//! ledger entries behind one mutex. Holding that mutex is what makes the
//! "check balance, then append" step atomic for a user.
//!
//! # Example
//!
//! ```
//! use muffi_ledger::{AccessKey, Account, UserProfile};
//!
//! let profile = UserProfile::new("Ada", "ada@example.com", AccessKey::parse("muffin42").unwrap());
//! let account = Account::new(profile);
//! assert_eq!(account.balance().net(), 0);
//! ```

use crate::balance::{Balance, LedgerSummary};
use crate::base::{AccessKey, Credits, UserId};
use crate::error::LedgerError;
use crate::transaction::{NewTransaction, Transaction};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Identity and pairing state of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub access_key: AccessKey,
    pub partner_id: Option<UserId>,
    pub relationship_start_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, email: impl Into<String>, access_key: AccessKey) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: email.into(),
            access_key,
            partner_id: None,
            relationship_start_date: None,
            created_at: Utc::now(),
        }
    }
}

/// Read model of an account; `credits` is derived from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub credits: Credits,
    pub version: u64,
}

/// Ordering of a history page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(alias = "newest", alias = "desc", alias = "-createdAt")]
    Newest,
    #[serde(alias = "oldest", alias = "asc", alias = "createdAt")]
    Oldest,
}

/// Paging request for a user's ledger history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug)]
pub(crate) struct AccountData {
    pub(crate) profile: UserProfile,
    /// Entries in commit order. Never rewritten.
    transactions: Vec<Transaction>,
    /// Bumped on every write.
    version: u64,
}

impl AccountData {
    fn new(profile: UserProfile) -> Self {
        Self {
            profile,
            transactions: Vec::new(),
            version: 0,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance().net() >= 0,
            "Invariant violated: balance went negative for {}: {}",
            self.profile.id,
            self.balance().net()
        );
        debug_assert!(
            self.transactions.iter().all(|tx| tx.amount > 0),
            "Invariant violated: non-positive ledger amount for {}",
            self.profile.id
        );
    }

    pub(crate) fn id(&self) -> UserId {
        self.profile.id
    }

    pub(crate) fn balance(&self) -> Balance {
        Balance::from_transactions(&self.transactions)
    }

    pub(crate) fn partner_id(&self) -> Option<UserId> {
        self.profile.partner_id
    }

    /// Appends an entry. Spending kinds are admitted only while the balance
    /// covers them.
    pub(crate) fn post(
        &mut self,
        new: NewTransaction,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self.admit(new, now)?;
        self.commit(transaction.clone());
        Ok(transaction)
    }

    /// Checks an entry against the ledger and builds it without appending.
    ///
    /// Earning kinds are rejected with [`LedgerError::InvalidAmount`] when
    /// the earned total would no longer fit in [`Credits`].
    pub(crate) fn admit(
        &self,
        new: NewTransaction,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        new.validate()?;
        if new.user_id != self.profile.id {
            return Err(LedgerError::Internal(format!(
                "entry for {} posted to account {}",
                new.user_id, self.profile.id
            )));
        }
        let balance = self.balance();
        if new.kind.is_spending() {
            let net = balance.net();
            if net < new.amount {
                debug!(user = %self.profile.id, balance = net, required = new.amount, "rejecting spend");
                return Err(LedgerError::InsufficientFunds {
                    balance: net,
                    required: new.amount,
                });
            }
        } else if balance.earned.checked_add(new.amount).is_none() {
            debug!(user = %self.profile.id, amount = new.amount, "rejecting overflowing credit");
            return Err(LedgerError::InvalidAmount);
        }
        Ok(new.into_transaction(now))
    }

    /// Appends an entry returned by [`AccountData::admit`] on this account.
    pub(crate) fn commit(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
        self.version += 1;
        self.assert_invariants();
    }

    /// Builds a spending entry reduced to what the balance covers.
    ///
    /// Returns `None` when nothing is left to take. The requested amount is
    /// recorded in the entry's metadata when the cap applies.
    pub(crate) fn admit_capped(
        &self,
        mut new: NewTransaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, LedgerError> {
        new.validate()?;
        let available = self.balance().net().max(0);
        if new.kind.is_spending() && new.amount > available {
            let requested = new.amount;
            new.amount = available;
            let mut metadata = match new.metadata.take() {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            metadata.insert("requestedAmount".into(), json!(requested));
            metadata.insert("capped".into(), json!(true));
            new.metadata = serde_json::Value::Object(metadata);
        }
        if new.amount == 0 {
            return Ok(None);
        }
        self.admit(new, now).map(Some)
    }

    pub(crate) fn link_to(&mut self, partner: UserId, since: DateTime<Utc>) {
        self.profile.partner_id = Some(partner);
        self.profile.relationship_start_date = Some(since);
        self.version += 1;
    }

    pub(crate) fn unlink(&mut self) {
        self.profile.partner_id = None;
        self.profile.relationship_start_date = None;
        self.version += 1;
    }

    pub(crate) fn set_access_key(&mut self, key: AccessKey) {
        self.profile.access_key = key;
        self.version += 1;
    }

    pub(crate) fn view(&self) -> AccountView {
        AccountView {
            profile: self.profile.clone(),
            credits: self.balance().net(),
            version: self.version,
        }
    }

    pub(crate) fn summary(&self) -> LedgerSummary {
        LedgerSummary::from_transactions(&self.transactions)
    }

    /// `page` is 1-based; `limit` must already be clamped by the caller.
    pub(crate) fn history(&self, page: usize, limit: usize, sort: SortOrder) -> Page<Transaction> {
        let skip = page.saturating_sub(1).saturating_mul(limit);
        let items: Vec<Transaction> = match sort {
            SortOrder::Newest => self
                .transactions
                .iter()
                .rev()
                .skip(skip)
                .take(limit)
                .cloned()
                .collect(),
            SortOrder::Oldest => self
                .transactions
                .iter()
                .skip(skip)
                .take(limit)
                .cloned()
                .collect(),
        };
        Page {
            items,
            total: self.transactions.len(),
            page,
            limit,
        }
    }
}

/// A user account with its ledger.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(profile)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }

    pub fn id(&self) -> UserId {
        self.inner.lock().id()
    }

    /// Snapshot of the derived balance.
    pub fn balance(&self) -> Balance {
        self.inner.lock().balance()
    }

    pub fn profile(&self) -> UserProfile {
        self.inner.lock().profile.clone()
    }

    pub fn view(&self) -> AccountView {
        self.inner.lock().view()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Copy of every entry in commit order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().transactions.clone()
    }

    /// Posts one entry, checking the balance for spending kinds.
    pub fn post(&self, new: NewTransaction) -> Result<Transaction, LedgerError> {
        self.inner.lock().post(new, Utc::now())
    }
}
