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

//! Appointments and the ledger entries their lifecycle posts.
//!
//! ```text
//!  book ──► Pending ──accept──► Confirmed ──complete──► Completed ──rate──► (adjustment)
//!  (spent)     │                    │
//!              └──decline/cancel────┴──► Cancelled (refund)
//! ```
//!
//! Every transition runs under the appointment lock, and the entry it posts
//! is written under the affected account lock in the same critical section.

use crate::base::{AppointmentId, Credits, ServiceId, UserId, round_credits};
use crate::engine::Engine;
use crate::error::LedgerError;
use crate::service::{NewService, Service};
use crate::transaction::{NewTransaction, RelatedType, Transaction, TransactionKind};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    fn can_move_to(self, next: Self) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending | Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub service: Service,
    /// Pays for the appointment.
    pub requester: UserId,
    /// The requester's partner at booking time.
    pub provider: UserId,
    pub scheduled_for: DateTime<Utc>,
    pub moodboard_id: Option<String>,
    pub credit_cost: Credits,
    pub status: AppointmentStatus,
    pub rating: Option<u8>,
    pub feedback: Option<String>,
    pub final_credits: Option<Credits>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_participant(&self, user: UserId) -> bool {
        self.requester == user || self.provider == user
    }

    fn check_transition(&self, next: AppointmentStatus) -> Result<(), LedgerError> {
        if self.status.can_move_to(next) {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                entity: "appointment",
                from: self.status.as_str(),
                to: next.as_str(),
            })
        }
    }

    fn set_status(&mut self, next: AppointmentStatus) {
        self.status = next;
        self.touch();
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// When and where a booking takes place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`, 24h clock
    pub time: String,
    #[serde(default)]
    pub moodboard_id: Option<String>,
}

impl BookingRequest {
    pub fn scheduled_for(&self) -> Result<DateTime<Utc>, LedgerError> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| LedgerError::invalid_input("date", "expected YYYY-MM-DD"))?;
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|_| LedgerError::invalid_input("time", "expected HH:MM"))?;
        Ok(date.and_time(time).and_utc())
    }
}

/// Books a service described inline rather than a published one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomBookingRequest {
    #[serde(flatten)]
    pub service: NewService,
    #[serde(flatten)]
    pub booking: BookingRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub appointment: Appointment,
    pub payment: Transaction,
    pub balance: Credits,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub appointment: Appointment,
    pub refund: Transaction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingOutcome {
    pub appointment: Appointment,
    /// `None` when the rating leaves the price unchanged or the provider
    /// has nothing left to deduct.
    pub adjustment: Option<Transaction>,
}

fn rating_multiplier(rating: u8) -> Decimal {
    match rating {
        1 => dec!(0.5),
        2 => dec!(0.75),
        3 => dec!(1.0),
        4 => dec!(1.25),
        5 => dec!(1.5),
        _ => dec!(1.0),
    }
}

/// What a completed appointment is worth after the requester's rating.
pub fn final_credits(credit_cost: Credits, rating: u8) -> Result<Credits, LedgerError> {
    round_credits(Decimal::from(credit_cost) * rating_multiplier(rating))
}

impl Engine {
    fn appointment_doc(&self, id: AppointmentId) -> Result<Arc<Mutex<Appointment>>, LedgerError> {
        self.appointments
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::AppointmentNotFound(id))
    }

    /// Books a service published by the requester's partner and charges its
    /// cost to the requester.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotLinked`] - the requester has no partner.
    /// - [`LedgerError::Unauthorized`] - the service belongs to someone else.
    /// - [`LedgerError::InsufficientFunds`] - nothing is booked or charged.
    #[instrument(skip(self, request))]
    pub fn book_service(
        &self,
        requester: UserId,
        service_id: ServiceId,
        request: BookingRequest,
    ) -> Result<Booking, LedgerError> {
        let record = self.service(service_id)?;
        let provider = self.require_partner(requester)?;
        if record.owner != provider {
            return Err(LedgerError::Unauthorized("service"));
        }
        self.book(requester, provider, Service::Persisted(record), request)
    }

    /// Books an ad-hoc service with the requester's partner.
    #[instrument(skip(self, request))]
    pub fn book_custom(
        &self,
        requester: UserId,
        request: CustomBookingRequest,
    ) -> Result<Booking, LedgerError> {
        let service = Service::AdHoc(request.service.validate()?);
        let provider = self.require_partner(requester)?;
        self.book(requester, provider, service, request.booking)
    }

    fn book(
        &self,
        requester: UserId,
        provider: UserId,
        service: Service,
        request: BookingRequest,
    ) -> Result<Booking, LedgerError> {
        let scheduled_for = request.scheduled_for()?;
        let id = AppointmentId::new();
        let related_type = match service {
            Service::Persisted(_) => RelatedType::Service,
            Service::AdHoc(_) => RelatedType::Appointment,
        };
        let charge = NewTransaction::new(
            requester,
            TransactionKind::Spent,
            service.credit_cost(),
            format!("Booked: {}", service.title()),
        )
        .related(id, related_type)
        .metadata(json!({ "serviceId": service.service_id(), "provider": provider }));

        let account = self.account(requester)?;
        let mut data = account.lock();
        if data.partner_id() != Some(provider) {
            return Err(LedgerError::NotLinked);
        }
        let payment = self.post_locked(&mut data, charge)?;

        let now = Utc::now();
        let appointment = Appointment {
            id,
            credit_cost: service.credit_cost(),
            service,
            requester,
            provider,
            scheduled_for,
            moodboard_id: request.moodboard_id.filter(|m| !m.trim().is_empty()),
            status: AppointmentStatus::Pending,
            rating: None,
            feedback: None,
            final_credits: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.appointments
            .insert(id, Arc::new(Mutex::new(appointment.clone())));
        info!(appointment = %id, requester = %requester, provider = %provider, "booked appointment");

        Ok(Booking {
            appointment,
            payment,
            balance: data.balance().net(),
        })
    }

    /// An appointment, visible to its two participants only.
    pub fn appointment(&self, user: UserId, id: AppointmentId) -> Result<Appointment, LedgerError> {
        let doc = self.appointment_doc(id)?;
        let appointment = doc.lock();
        if !appointment.is_participant(user) {
            return Err(LedgerError::Unauthorized("appointment"));
        }
        Ok(appointment.clone())
    }

    /// Appointments `user` takes part in, soonest first.
    pub fn appointments_for(&self, user: UserId) -> Vec<Appointment> {
        let docs: Vec<_> = self
            .appointments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut appointments: Vec<Appointment> = docs
            .iter()
            .filter_map(|doc| {
                let appointment = doc.lock();
                appointment.is_participant(user).then(|| appointment.clone())
            })
            .collect();
        appointments.sort_by_key(|a| a.scheduled_for);
        appointments
    }

    /// Provider confirms a pending appointment.
    #[instrument(skip(self))]
    pub fn accept(&self, provider: UserId, id: AppointmentId) -> Result<Appointment, LedgerError> {
        let doc = self.appointment_doc(id)?;
        let mut appointment = doc.lock();
        if appointment.provider != provider {
            return Err(LedgerError::Unauthorized("appointment"));
        }
        appointment.check_transition(AppointmentStatus::Confirmed)?;
        appointment.set_status(AppointmentStatus::Confirmed);
        info!(appointment = %id, "appointment confirmed");
        Ok(appointment.clone())
    }

    /// Provider turns the appointment down; the requester gets the full
    /// cost back.
    #[instrument(skip(self))]
    pub fn decline(&self, provider: UserId, id: AppointmentId) -> Result<Cancellation, LedgerError> {
        let doc = self.appointment_doc(id)?;
        let mut appointment = doc.lock();
        if appointment.provider != provider {
            return Err(LedgerError::Unauthorized("appointment"));
        }
        let refund = self.cancel_locked(&mut appointment, provider, "Appointment declined")?;
        Ok(Cancellation {
            appointment: appointment.clone(),
            refund,
        })
    }

    /// Either participant calls the appointment off; the requester gets the
    /// full cost back.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidTransition`] once the appointment is completed
    /// or already cancelled. No refund is posted in that case.
    #[instrument(skip(self))]
    pub fn cancel(&self, user: UserId, id: AppointmentId) -> Result<Cancellation, LedgerError> {
        let doc = self.appointment_doc(id)?;
        let mut appointment = doc.lock();
        if !appointment.is_participant(user) {
            return Err(LedgerError::Unauthorized("appointment"));
        }
        let refund = self.cancel_locked(&mut appointment, user, "Appointment cancelled")?;
        Ok(Cancellation {
            appointment: appointment.clone(),
            refund,
        })
    }

    fn cancel_locked(
        &self,
        appointment: &mut Appointment,
        by: UserId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        appointment.check_transition(AppointmentStatus::Cancelled)?;

        let requester = appointment.requester;
        let account = self.account(requester)?;
        let mut data = account.lock();
        let refund = self.post_locked(
            &mut data,
            NewTransaction::new(
                requester,
                TransactionKind::Refund,
                appointment.credit_cost,
                format!("{reason}: {}", appointment.service.title()),
            )
            .related(appointment.id, RelatedType::Appointment)
            .metadata(json!({ "cancelledBy": by })),
        )?;
        appointment.set_status(AppointmentStatus::Cancelled);
        info!(appointment = %appointment.id, refund = refund.amount, "appointment cancelled");
        Ok(refund)
    }

    /// Either participant marks a confirmed appointment as done.
    #[instrument(skip(self))]
    pub fn complete(&self, user: UserId, id: AppointmentId) -> Result<Appointment, LedgerError> {
        let doc = self.appointment_doc(id)?;
        let mut appointment = doc.lock();
        if !appointment.is_participant(user) {
            return Err(LedgerError::Unauthorized("appointment"));
        }
        appointment.check_transition(AppointmentStatus::Completed)?;
        appointment.set_status(AppointmentStatus::Completed);
        Ok(appointment.clone())
    }

    /// Requester rates a completed appointment. The difference between the
    /// rated value and the price goes to the provider: `earned` when
    /// positive, a `deducted` entry capped at the provider's balance when
    /// negative.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRating`] - outside 1..=5.
    /// - [`LedgerError::AlreadyRated`] - ratings are final.
    /// - [`LedgerError::InvalidTransition`] - not completed yet.
    #[instrument(skip(self, feedback))]
    pub fn rate(
        &self,
        requester: UserId,
        id: AppointmentId,
        rating: i64,
        feedback: Option<String>,
    ) -> Result<RatingOutcome, LedgerError> {
        let score = u8::try_from(rating)
            .ok()
            .filter(|r| (1..=5).contains(r))
            .ok_or(LedgerError::InvalidRating(rating))?;

        let doc = self.appointment_doc(id)?;
        let mut appointment = doc.lock();
        if appointment.requester != requester {
            return Err(LedgerError::Unauthorized("appointment"));
        }
        if appointment.rating.is_some() {
            return Err(LedgerError::AlreadyRated);
        }
        if appointment.status != AppointmentStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                entity: "appointment",
                from: appointment.status.as_str(),
                to: "rated",
            });
        }

        let cost = appointment.credit_cost;
        let worth = final_credits(cost, score)?;
        let delta = worth - cost;
        let provider = appointment.provider;
        let reason = format!("Rated {score}/5: {}", appointment.service.title());
        let entry = |kind| {
            NewTransaction::new(provider, kind, delta.abs(), reason.clone())
            .related(id, RelatedType::Appointment)
            .metadata(json!({ "rating": score, "finalCredits": worth, "creditCost": cost }))
        };

        let adjustment = match delta.cmp(&0) {
            Ordering::Equal => None,
            Ordering::Greater => {
                let account = self.account(provider)?;
                let mut data = account.lock();
                Some(self.post_locked(&mut data, entry(TransactionKind::Earned))?)
            }
            Ordering::Less => {
                let account = self.account(provider)?;
                let mut data = account.lock();
                self.post_capped_locked(&mut data, entry(TransactionKind::Deducted))?
            }
        };

        appointment.rating = Some(score);
        appointment.feedback = feedback.map(|f| f.trim().to_string()).filter(|f| !f.is_empty());
        appointment.final_credits = Some(worth);
        appointment.touch();
        info!(appointment = %id, rating = score, delta, "appointment rated");

        Ok(RatingOutcome {
            appointment: appointment.clone(),
            adjustment,
        })
    }
}
