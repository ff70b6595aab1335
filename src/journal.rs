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

//! Global ledger journal.
//!
//! Every posted entry, whatever account it belongs to, is recorded here once
//! in commit order. The journal answers lookups by transaction id.

use crate::base::TransactionId;
use crate::error::LedgerError;
use crate::transaction::Transaction;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// A thread-safe journal with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) lookup with a [`SegQueue`] preserving
/// insertion order.
#[derive(Debug, Default)]
pub struct TransactionJournal {
    transactions: DashMap<TransactionId, Arc<Transaction>>,
    order: SegQueue<TransactionId>,
}

impl TransactionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a posted entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateTransaction`] if the id is already
    /// journaled.
    pub fn record(&self, transaction: Transaction) -> Result<(), LedgerError> {
        self.record_all([transaction])
    }

    /// Records the entries of one composite write. Either every entry is
    /// journaled or none is.
    pub fn record_all<I>(&self, transactions: I) -> Result<(), LedgerError>
    where
        I: IntoIterator<Item = Transaction>,
    {
        let mut recorded = Vec::new();
        let mut duplicate = false;
        for transaction in transactions {
            let id = transaction.id;
            let inserted = match self.transactions.entry(id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(transaction));
                    true
                }
            };
            if !inserted {
                duplicate = true;
                break;
            }
            recorded.push(id);
        }

        if duplicate {
            for id in &recorded {
                self.transactions.remove(id);
            }
            return Err(LedgerError::DuplicateTransaction);
        }
        for id in recorded {
            self.order.push(id);
        }
        Ok(())
    }

    pub fn get(&self, id: &TransactionId) -> Option<Arc<Transaction>> {
        self.transactions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
