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

//! Core identifier types for users, ledger entries and the documents that
//! reference them.

use crate::error::LedgerError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Credit amounts are whole numbers.
pub type Credits = i64;

/// Rounds to whole credits, halves away from zero.
pub(crate) fn round_credits(value: Decimal) -> Result<Credits, LedgerError> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| LedgerError::Internal(format!("{value} does not fit in credits")))
}

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

document_id!(
    /// Unique identifier for a user account.
    ///
    /// The ordering is used as the lock order whenever two accounts are
    /// mutated together.
    UserId
);

document_id!(
    /// Unique identifier for a ledger entry.
    TransactionId
);

document_id!(
    /// Unique identifier for an appointment (a booked service).
    AppointmentId
);

document_id!(
    /// Unique identifier for a persisted service offering.
    ServiceId
);

document_id!(
    /// Unique identifier for a grievance.
    GrievanceId
);

/// Shared pairing key. Two accounts holding the same key become partners.
///
/// The ordering is the lock order when two keys are locked together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AccessKey(String);

impl AccessKey {
    pub const MIN_LEN: usize = 6;

    /// Validates a raw key against the default minimum length.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        Self::parse_with_min(raw, Self::MIN_LEN)
    }

    /// Validates a raw key; surrounding whitespace is not significant.
    pub fn parse_with_min(raw: &str, min_len: usize) -> Result<Self, LedgerError> {
        let key = raw.trim();
        if key.chars().count() < min_len {
            return Err(LedgerError::InvalidAccessKey { min_len });
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
