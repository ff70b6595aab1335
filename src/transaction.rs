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

//! Ledger entries.
//!
//! A [`Transaction`] is immutable once posted. The stored amount is always a
//! positive magnitude; the [`TransactionKind`] decides whether it adds to or
//! subtracts from the owner's balance.

use crate::base::{Credits, TransactionId, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earned,
    Spent,
    Deducted,
    Refund,
    Bonus,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 5] = [
        Self::Earned,
        Self::Spent,
        Self::Deducted,
        Self::Refund,
        Self::Bonus,
    ];

    /// `true` for kinds that add to the balance.
    pub fn is_earning(self) -> bool {
        matches!(self, Self::Earned | Self::Refund | Self::Bonus)
    }

    pub fn is_spending(self) -> bool {
        !self.is_earning()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Spent => "spent",
            Self::Deducted => "deducted",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earned" => Ok(Self::Earned),
            "spent" => Ok(Self::Spent),
            "deducted" => Ok(Self::Deducted),
            "refund" => Ok(Self::Refund),
            "bonus" => Ok(Self::Bonus),
            other => Err(LedgerError::invalid_input(
                "type",
                format!("unknown transaction type '{other}'"),
            )),
        }
    }
}

/// What kind of document caused a ledger entry.
///
/// This is a non-owning back-reference: removing the document never touches
/// the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelatedType {
    Appointment,
    Grievance,
    Service,
    LoveNote,
    Memory,
    Bonus,
    Transfer,
    Manual,
}

impl RelatedType {
    /// Maps a caller supplied model name onto the set accepted from outside
    /// (`service`, `grievance`, `bonus`, `transfer`, `manual`).
    ///
    /// Anything else, including the internal-only types, becomes `Manual`.
    pub fn normalize(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "service" | "services" => Self::Service,
            "grievance" | "grievances" => Self::Grievance,
            "bonus" => Self::Bonus,
            "transfer" => Self::Transfer,
            _ => Self::Manual,
        }
    }
}

/// A posted ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Credits,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_type: Option<RelatedType>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount with the sign implied by the kind.
    pub fn signed_amount(&self) -> Credits {
        if self.kind.is_earning() {
            self.amount
        } else {
            -self.amount
        }
    }
}

/// A fully specified entry waiting to be posted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub amount: Credits,
    pub kind: TransactionKind,
    pub reason: String,
    pub related_id: Option<String>,
    pub related_type: Option<RelatedType>,
    pub metadata: Value,
}

impl NewTransaction {
    /// The amount is stored as its magnitude.
    pub fn new(
        user_id: UserId,
        kind: TransactionKind,
        amount: Credits,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount: amount.saturating_abs(),
            kind,
            reason: reason.into(),
            related_id: None,
            related_type: None,
            metadata: Value::Null,
        }
    }

    pub fn related(mut self, id: impl ToString, related_type: RelatedType) -> Self {
        self.related_id = Some(id.to_string());
        self.related_type = Some(related_type);
        self
    }

    /// Attaches an optional back-reference, as received from a caller.
    pub fn maybe_related(
        mut self,
        id: Option<String>,
        related_type: Option<RelatedType>,
    ) -> Self {
        self.related_id = id.filter(|id| !id.trim().is_empty());
        self.related_type = related_type;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Checks the fields that do not depend on the ledger state.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if self.reason.trim().is_empty() {
            return Err(LedgerError::EmptyReason);
        }
        Ok(())
    }

    pub(crate) fn into_transaction(self, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            user_id: self.user_id,
            amount: self.amount,
            kind: self.kind,
            reason: self.reason.trim().to_string(),
            related_id: self.related_id,
            related_type: self.related_type,
            metadata: self.metadata,
            created_at,
        }
    }
}
