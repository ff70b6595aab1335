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

//! Error types for ledger operations.
//!
//! Every [`LedgerError`] belongs to exactly one [`ErrorKind`]; callers branch on
//! the kind and surface [`LedgerError::code`] as a stable identifier.

use crate::base::{AppointmentId, Credits, GrievanceId, ServiceId, TransactionId, UserId};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Coarse failure classes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Validation,
    InsufficientFunds,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Validation => "validation",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No account with this id
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// No ledger entry with this id
    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("appointment {0} not found")]
    AppointmentNotFound(AppointmentId),

    #[error("service {0} not found")]
    ServiceNotFound(ServiceId),

    #[error("grievance {0} not found")]
    GrievanceNotFound(GrievanceId),

    /// Nobody else holds the access key, or every holder is already linked
    #[error("no account available to link with this access key")]
    NoPartnerCandidate,

    /// Caller is neither the creator nor the partner on the document
    #[error("not allowed to act on this {0}")]
    Unauthorized(&'static str),

    /// Amount is zero or not representable
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Ledger entries must say why they exist
    #[error("reason must not be empty")]
    EmptyReason,

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("access key must be at least {min_len} characters")]
    InvalidAccessKey { min_len: usize },

    #[error("invalid {field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error("cannot transfer credits to the same account")]
    SelfTransfer,

    /// Spending would drive the balance below zero
    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientFunds { balance: Credits, required: Credits },

    #[error("account already has a partner")]
    AlreadyLinked,

    #[error("account has no partner")]
    NotLinked,

    /// The candidate partner was linked by a concurrent request
    #[error("partner is no longer available")]
    PartnerUnavailable,

    /// Two accounts already share this access key
    #[error("access key is already used by two accounts")]
    AccessKeyInUse,

    #[error("email is already registered")]
    EmailTaken,

    #[error("appointment has already been rated")]
    AlreadyRated,

    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("grievance is resolved and can no longer be revised")]
    GrievanceClosed,

    /// Ledger entry id collision
    #[error("duplicate transaction ID")]
    DuplicateTransaction,

    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::AppointmentNotFound(_)
            | Self::ServiceNotFound(_)
            | Self::GrievanceNotFound(_)
            | Self::NoPartnerCandidate => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidAmount
            | Self::EmptyReason
            | Self::InvalidRating(_)
            | Self::InvalidAccessKey { .. }
            | Self::InvalidInput { .. }
            | Self::SelfTransfer => ErrorKind::Validation,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::AlreadyLinked
            | Self::NotLinked
            | Self::PartnerUnavailable
            | Self::AccessKeyInUse
            | Self::EmailTaken
            | Self::AlreadyRated
            | Self::InvalidTransition { .. }
            | Self::GrievanceClosed
            | Self::DuplicateTransaction => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::AppointmentNotFound(_) => "APPOINTMENT_NOT_FOUND",
            Self::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Self::GrievanceNotFound(_) => "GRIEVANCE_NOT_FOUND",
            Self::NoPartnerCandidate => "NO_PARTNER_CANDIDATE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::EmptyReason => "EMPTY_REASON",
            Self::InvalidRating(_) => "INVALID_RATING",
            Self::InvalidAccessKey { .. } => "INVALID_ACCESS_KEY",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::SelfTransfer => "SELF_TRANSFER",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AlreadyLinked => "ALREADY_LINKED",
            Self::NotLinked => "NOT_LINKED",
            Self::PartnerUnavailable => "PARTNER_UNAVAILABLE",
            Self::AccessKeyInUse => "ACCESS_KEY_IN_USE",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::AlreadyRated => "ALREADY_RATED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::GrievanceClosed => "GRIEVANCE_CLOSED",
            Self::DuplicateTransaction => "DUPLICATE_TRANSACTION",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub(crate) fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                balance: 10,
                required: 16
            }
            .to_string(),
            "insufficient credits: balance 10, required 16"
        );
        assert_eq!(
            LedgerError::InvalidRating(7).to_string(),
            "rating must be between 1 and 5, got 7"
        );
        assert_eq!(
            LedgerError::InvalidTransition {
                entity: "appointment",
                from: "completed",
                to: "cancelled",
            }
            .to_string(),
            "cannot move appointment from completed to cancelled"
        );
        assert_eq!(
            LedgerError::AccessKeyInUse.to_string(),
            "access key is already used by two accounts"
        );
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(LedgerError::NoPartnerCandidate.kind(), ErrorKind::NotFound);
        assert_eq!(
            LedgerError::Unauthorized("appointment").kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(LedgerError::InvalidRating(0).kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::InsufficientFunds {
                balance: 0,
                required: 1
            }
            .kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(LedgerError::AlreadyRated.kind(), ErrorKind::Conflict);
        assert_eq!(LedgerError::AccessKeyInUse.kind(), ErrorKind::Conflict);
        assert_eq!(
            LedgerError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::AlreadyLinked.code(), "ALREADY_LINKED");
        assert_eq!(LedgerError::EmptyReason.code(), "EMPTY_REASON");
        assert_eq!(ErrorKind::InsufficientFunds.to_string(), "insufficient_funds");
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::InsufficientFunds {
            balance: 3,
            required: 4,
        };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
