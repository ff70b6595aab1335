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

//! Grievances one partner files against the other.
//!
//! A grievance carries a credit impact derived from its rating and severity.
//! The impact reaches the ledger exactly once, when the grievance is
//! resolved.

use crate::base::{Credits, GrievanceId, TransactionId, UserId, round_credits};
use crate::engine::Engine;
use crate::error::LedgerError;
use crate::transaction::{NewTransaction, RelatedType, Transaction, TransactionKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    fn multiplier(self) -> Decimal {
        match self {
            Self::Low => dec!(0.5),
            Self::Medium => dec!(1.0),
            Self::High => dec!(2.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrievanceStatus {
    Pending,
    Acknowledged,
    Resolved,
}

impl GrievanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

/// Credits the grievance moves when resolved. Rating 1 is the worst.
pub fn credit_impact(rating: u8, severity: Severity) -> Result<Credits, LedgerError> {
    let base = match rating {
        1 => dec!(-20),
        2 => dec!(-10),
        3 => dec!(0),
        4 => dec!(5),
        5 => dec!(10),
        _ => return Err(LedgerError::InvalidRating(rating.into())),
    };
    round_credits(base * severity.multiplier())
}

fn parse_rating(rating: i64) -> Result<u8, LedgerError> {
    u8::try_from(rating)
        .ok()
        .filter(|r| (1..=5).contains(r))
        .ok_or(LedgerError::InvalidRating(rating))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grievance {
    pub id: GrievanceId,
    pub filed_by: UserId,
    /// The filer's partner when the grievance was filed.
    pub against: UserId,
    pub title: String,
    pub description: String,
    pub rating: u8,
    pub severity: Severity,
    pub credit_impact: Credits,
    pub status: GrievanceStatus,
    /// Entry posted on resolution, if any.
    pub impact_transaction: Option<TransactionId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Grievance {
    pub fn is_participant(&self, user: UserId) -> bool {
        self.filed_by == user || self.against == user
    }

    fn recompute_impact(&mut self) -> Result<(), LedgerError> {
        self.credit_impact = credit_impact(self.rating, self.severity)?;
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGrievance {
    pub title: String,
    pub description: String,
    pub rating: i64,
    #[serde(default)]
    pub severity: Severity,
}

/// Fields a filer may change while the grievance is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrievanceRevision {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrievanceUpdate {
    pub grievance: Grievance,
    /// Posted by this update; `None` unless it resolved the grievance with a
    /// non-zero impact.
    pub impact: Option<Transaction>,
}

fn required(field: &'static str, value: &str) -> Result<String, LedgerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LedgerError::invalid_input(field, "must not be empty"));
    }
    Ok(value.to_string())
}

impl Engine {
    fn grievance_doc(&self, id: GrievanceId) -> Result<Arc<Mutex<Grievance>>, LedgerError> {
        self.grievances
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::GrievanceNotFound(id))
    }

    /// Files a grievance against the filer's partner. Nothing is posted
    /// until it is resolved.
    #[instrument(skip(self, request))]
    pub fn file_grievance(
        &self,
        filer: UserId,
        request: NewGrievance,
    ) -> Result<Grievance, LedgerError> {
        let title = required("title", &request.title)?;
        let description = required("description", &request.description)?;
        let rating = parse_rating(request.rating)?;
        let against = self.require_partner(filer)?;

        let now = Utc::now();
        let mut grievance = Grievance {
            id: GrievanceId::new(),
            filed_by: filer,
            against,
            title,
            description,
            rating,
            severity: request.severity,
            credit_impact: 0,
            status: GrievanceStatus::Pending,
            impact_transaction: None,
            version: 0,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        grievance.recompute_impact()?;
        self.grievances
            .insert(grievance.id, Arc::new(Mutex::new(grievance.clone())));
        info!(grievance = %grievance.id, impact = grievance.credit_impact, "filed grievance");
        Ok(grievance)
    }

    pub fn grievance(&self, user: UserId, id: GrievanceId) -> Result<Grievance, LedgerError> {
        let doc = self.grievance_doc(id)?;
        let grievance = doc.lock();
        if !grievance.is_participant(user) {
            return Err(LedgerError::Unauthorized("grievance"));
        }
        Ok(grievance.clone())
    }

    /// Grievances filed by or against `user`, newest first.
    pub fn grievances_for(&self, user: UserId) -> Vec<Grievance> {
        let docs: Vec<_> = self
            .grievances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut grievances: Vec<Grievance> = docs
            .iter()
            .filter_map(|doc| {
                let grievance = doc.lock();
                grievance.is_participant(user).then(|| grievance.clone())
            })
            .collect();
        grievances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        grievances
    }

    /// Edits an open grievance. The impact follows the new rating and
    /// severity.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] - only the filer may revise.
    /// - [`LedgerError::GrievanceClosed`] - already resolved.
    #[instrument(skip(self, revision))]
    pub fn revise_grievance(
        &self,
        filer: UserId,
        id: GrievanceId,
        revision: GrievanceRevision,
    ) -> Result<Grievance, LedgerError> {
        let doc = self.grievance_doc(id)?;
        let mut grievance = doc.lock();
        if grievance.filed_by != filer {
            return Err(LedgerError::Unauthorized("grievance"));
        }
        if grievance.status == GrievanceStatus::Resolved {
            return Err(LedgerError::GrievanceClosed);
        }

        let mut revised = grievance.clone();
        if let Some(title) = revision.title {
            revised.title = required("title", &title)?;
        }
        if let Some(description) = revision.description {
            revised.description = required("description", &description)?;
        }
        if let Some(rating) = revision.rating {
            revised.rating = parse_rating(rating)?;
        }
        if let Some(severity) = revision.severity {
            revised.severity = severity;
        }
        revised.recompute_impact()?;
        revised.touch();
        *grievance = revised;
        Ok(grievance.clone())
    }

    /// Moves a grievance between `pending`, `acknowledged` and `resolved`.
    ///
    /// Entering `resolved` posts the impact to the `against` account:
    /// `earned` when positive, a `deducted` entry capped at the balance when
    /// negative. Resolving twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] - caller is not a participant.
    /// - [`LedgerError::InvalidTransition`] - leaving `resolved`.
    #[instrument(skip(self))]
    pub fn update_grievance_status(
        &self,
        user: UserId,
        id: GrievanceId,
        status: GrievanceStatus,
    ) -> Result<GrievanceUpdate, LedgerError> {
        let doc = self.grievance_doc(id)?;
        let mut grievance = doc.lock();
        if !grievance.is_participant(user) {
            return Err(LedgerError::Unauthorized("grievance"));
        }
        if grievance.status == status {
            debug!(grievance = %id, status = status.as_str(), "status unchanged");
            return Ok(GrievanceUpdate {
                grievance: grievance.clone(),
                impact: None,
            });
        }
        if grievance.status == GrievanceStatus::Resolved {
            return Err(LedgerError::InvalidTransition {
                entity: "grievance",
                from: grievance.status.as_str(),
                to: status.as_str(),
            });
        }

        let mut impact = None;
        if status == GrievanceStatus::Resolved && grievance.credit_impact != 0 {
            let against = grievance.against;
            let kind = if grievance.credit_impact > 0 {
                TransactionKind::Earned
            } else {
                TransactionKind::Deducted
            };
            let entry = NewTransaction::new(
                against,
                kind,
                grievance.credit_impact,
                format!("Grievance resolved: {}", grievance.title),
            )
            .related(id, RelatedType::Grievance)
            .metadata(json!({
                "rating": grievance.rating,
                "severity": grievance.severity,
                "creditImpact": grievance.credit_impact,
            }));

            let account = self.account(against)?;
            let mut data = account.lock();
            impact = if kind.is_spending() {
                self.post_capped_locked(&mut data, entry)?
            } else {
                Some(self.post_locked(&mut data, entry)?)
            };
        }

        grievance.status = status;
        if status == GrievanceStatus::Resolved {
            grievance.resolved_at = Some(Utc::now());
            grievance.impact_transaction = impact.as_ref().map(|tx| tx.id);
        }
        grievance.touch();
        info!(grievance = %id, status = status.as_str(), "grievance status changed");

        Ok(GrievanceUpdate {
            grievance: grievance.clone(),
            impact,
        })
    }
}
