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

//! Balance derivation.
//!
//! Balances are never stored. They are folded from the ledger:
//! `sum(earning amounts) - sum(spending amounts)`. The fold only adds, so the
//! result does not depend on the order entries are visited in.
//!
//! ```
//! use muffi_ledger::{Balance, TransactionKind};
//!
//! let balance = Balance::from_entries([
//!     (TransactionKind::Bonus, 20),
//!     (TransactionKind::Spent, 8),
//!     (TransactionKind::Refund, 8),
//! ]);
//! assert_eq!(balance.net(), 20);
//! ```

use crate::base::Credits;
use crate::transaction::{Transaction, TransactionKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Earned and spent totals over some set of ledger entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub earned: Credits,
    pub spent: Credits,
}

impl Balance {
    pub const ZERO: Balance = Balance {
        earned: 0,
        spent: 0,
    };

    /// Adds one entry. Totals saturate at the bounds of [`Credits`].
    pub fn record(&mut self, kind: TransactionKind, amount: Credits) {
        if kind.is_earning() {
            self.earned = self.earned.saturating_add(amount);
        } else {
            self.spent = self.spent.saturating_add(amount);
        }
    }

    pub fn net(&self) -> Credits {
        self.earned.saturating_sub(self.spent)
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (TransactionKind, Credits)>,
    {
        entries
            .into_iter()
            .fold(Self::ZERO, |mut balance, (kind, amount)| {
                balance.record(kind, amount);
                balance
            })
    }

    pub fn from_transactions<'a, I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        Self::from_entries(transactions.into_iter().map(|tx| (tx.kind, tx.amount)))
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, other: Self) {
        self.earned = self.earned.saturating_add(other.earned);
        self.spent = self.spent.saturating_add(other.spent);
    }
}

/// Per-kind breakdown of a user's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub balance: Credits,
    pub total_earned: Credits,
    pub total_spent: Credits,
    pub transaction_count: usize,
    pub by_kind: BTreeMap<TransactionKind, Credits>,
}

impl LedgerSummary {
    pub fn from_transactions<'a, I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut totals = Balance::ZERO;
        let mut by_kind = BTreeMap::new();
        let mut transaction_count = 0;
        for tx in transactions {
            totals.record(tx.kind, tx.amount);
            let total = by_kind.entry(tx.kind).or_insert(0);
            *total = Credits::saturating_add(*total, tx.amount);
            transaction_count += 1;
        }
        Self {
            balance: totals.net(),
            total_earned: totals.earned,
            total_spent: totals.spent,
            transaction_count,
            by_kind,
        }
    }
}
