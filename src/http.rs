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

//! JSON API over the [`Engine`].
//!
//! Callers identify themselves with an `X-User-Id` header carrying their
//! user id. Every route except signup requires it.
//!
//! ```bash
//! # Sign up twice with the same key to get a linked couple
//! curl -X POST http://localhost:3000/auth/signup \
//!   -H "Content-Type: application/json" \
//!   -d '{"name": "Ada", "email": "ada@example.com", "accessKey": "muffin42"}'
//!
//! # Balance
//! curl http://localhost:3000/credits/balance -H "X-User-Id: <id>"
//!
//! # Book an ad-hoc appointment with your partner
//! curl -X POST http://localhost:3000/appointments \
//!   -H "X-User-Id: <id>" -H "Content-Type: application/json" \
//!   -d '{"title": "Dinner", "creditCost": 30, "date": "2025-02-14", "time": "19:30"}'
//! ```

use crate::account::{AccountView, HistoryQuery, Page};
use crate::appointment::{
    Appointment, Booking, BookingRequest, Cancellation, CustomBookingRequest, RatingOutcome,
};
use crate::balance::LedgerSummary;
use crate::base::{AppointmentId, Credits, GrievanceId, ServiceId, UserId};
use crate::engine::{Engine, TransferReceipt};
use crate::error::{ErrorKind, LedgerError};
use crate::grievance::{
    Grievance, GrievanceRevision, GrievanceStatus, GrievanceUpdate, NewGrievance,
};
use crate::partnership::{LinkOutcome, NewUser, Registration, UnlinkOutcome};
use crate::service::{NewService, ServiceRecord};
use crate::transaction::{RelatedType, Transaction};
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

pub const USER_HEADER: &str = "x-user-id";

// === Request/Response DTOs ===

/// Body of the manual credit routes (`add`, `spend`, `refund`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub amount: Credits,
    pub description: String,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub related_model: Option<String>,
}

impl CreditRequest {
    fn amount(&self) -> Result<Credits, LedgerError> {
        if self.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(self.amount)
    }

    fn related_type(&self) -> Option<RelatedType> {
        self.related_model.as_deref().map(RelatedType::normalize)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub amount: Credits,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub access_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rating: i64,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: GrievanceStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user: AccountView,
    pub partner: Option<AccountView>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Credits,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub transaction: Transaction,
    pub balance: Credits,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub kind: ErrorKind,
}

// === Application State ===

/// Shared application state containing the ledger engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

// === Error Handling ===

pub enum AppError {
    Ledger(LedgerError),
    /// Identity header missing or malformed.
    Unauthenticated(&'static str),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Validation | ErrorKind::InsufficientFunds => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Ledger(err) => {
                let kind = err.kind();
                if kind == ErrorKind::Internal {
                    error!(error = %err, "request failed");
                } else {
                    debug!(error = %err, code = err.code(), "request rejected");
                }
                (
                    status_for(kind),
                    ErrorResponse {
                        error: err.to_string(),
                        code: err.code().to_string(),
                        kind,
                    },
                )
            }
            AppError::Unauthenticated(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: message.to_string(),
                    code: "UNAUTHENTICATED".to_string(),
                    kind: ErrorKind::Unauthorized,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;
type Created<T> = Result<(StatusCode, Json<T>), AppError>;

/// Caller identity taken from the `X-User-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or(AppError::Unauthenticated("missing X-User-Id header"))?;
        raw.to_str()
            .ok()
            .and_then(|value| value.parse::<UserId>().ok())
            .map(AuthUser)
            .ok_or(AppError::Unauthenticated("malformed X-User-Id header"))
    }
}

// === Handlers: auth ===

/// POST /auth/signup
async fn signup(
    State(state): State<AppState>,
    Json(request): Json<NewUser>,
) -> Created<Registration> {
    let registration = state.engine.register_user(request)?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// GET /auth/me
async fn me(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<ProfileResponse> {
    Ok(Json(ProfileResponse {
        user: state.engine.account_view(user)?,
        partner: state.engine.partner_of(user)?,
    }))
}

/// POST /auth/link-partner
async fn link_partner(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<LinkRequest>,
) -> ApiResult<LinkOutcome> {
    Ok(Json(state.engine.link_by_access_key(user, &request.access_key)?))
}

/// POST /auth/unlink-partner
async fn unlink_partner(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<UnlinkOutcome> {
    Ok(Json(state.engine.unlink(user)?))
}

// === Handlers: credits ===

/// GET /credits/balance
async fn balance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<BalanceResponse> {
    Ok(Json(BalanceResponse {
        balance: state.engine.balance(user)?,
    }))
}

/// GET /credits/summary
async fn summary(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<LedgerSummary> {
    Ok(Json(state.engine.summary(user)?))
}

/// GET /credits/history?page&limit&sort
async fn history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Page<Transaction>> {
    Ok(Json(state.engine.history(user, query)?))
}

fn entry_response(engine: &Engine, transaction: Transaction) -> Created<EntryResponse> {
    let balance = engine.balance(transaction.user_id)?;
    Ok((
        StatusCode::CREATED,
        Json(EntryResponse {
            transaction,
            balance,
        }),
    ))
}

/// POST /credits/add
async fn add_credits(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreditRequest>,
) -> Created<EntryResponse> {
    let related_type = request.related_type();
    let tx = state.engine.add_credits(
        user,
        request.amount()?,
        &request.description,
        request.related_id,
        related_type,
    )?;
    entry_response(&state.engine, tx)
}

/// POST /credits/spend
async fn spend_credits(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreditRequest>,
) -> Created<EntryResponse> {
    let related_type = request.related_type();
    let tx = state.engine.spend_credits(
        user,
        request.amount()?,
        &request.description,
        request.related_id,
        related_type,
    )?;
    entry_response(&state.engine, tx)
}

/// POST /credits/refund
async fn refund_credits(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreditRequest>,
) -> Created<EntryResponse> {
    let related_type = request.related_type();
    let tx = state.engine.refund(
        user,
        request.amount()?,
        &request.description,
        request.related_id,
        related_type,
    )?;
    entry_response(&state.engine, tx)
}

/// POST /credits/transfer
async fn transfer(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<TransferRequest>,
) -> Created<TransferReceipt> {
    if request.amount <= 0 {
        return Err(LedgerError::InvalidAmount.into());
    }
    let reason = request
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or("Transfer to partner");
    let receipt = state.engine.transfer_to_partner(user, request.amount, reason)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

// === Handlers: services and appointments ===

/// POST /services
async fn create_service(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewService>,
) -> Created<ServiceRecord> {
    let record = state.engine.create_service(user, request)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /services - what the caller can book from their partner.
async fn partner_services(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Vec<ServiceRecord>> {
    let partner = state.engine.require_partner(user)?;
    Ok(Json(state.engine.services_offered_by(partner)))
}

/// POST /services/{id}/book
async fn book_service(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ServiceId>,
    Json(request): Json<BookingRequest>,
) -> Created<Booking> {
    let booking = state.engine.book_service(user, id, request)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// POST /appointments
async fn book_custom(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CustomBookingRequest>,
) -> Created<Booking> {
    let booking = state.engine.book_custom(user, request)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /appointments
async fn list_appointments(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<Vec<Appointment>> {
    Json(state.engine.appointments_for(user))
}

/// GET /appointments/{id}
async fn get_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<AppointmentId>,
) -> ApiResult<Appointment> {
    Ok(Json(state.engine.appointment(user, id)?))
}

async fn accept_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<AppointmentId>,
) -> ApiResult<Appointment> {
    Ok(Json(state.engine.accept(user, id)?))
}

async fn decline_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<AppointmentId>,
) -> ApiResult<Cancellation> {
    Ok(Json(state.engine.decline(user, id)?))
}

async fn cancel_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<AppointmentId>,
) -> ApiResult<Cancellation> {
    Ok(Json(state.engine.cancel(user, id)?))
}

async fn complete_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<AppointmentId>,
) -> ApiResult<Appointment> {
    Ok(Json(state.engine.complete(user, id)?))
}

async fn rate_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<AppointmentId>,
    Json(request): Json<RatingRequest>,
) -> ApiResult<RatingOutcome> {
    Ok(Json(state.engine.rate(user, id, request.rating, request.feedback)?))
}

// === Handlers: grievances ===

/// POST /grievances
async fn file_grievance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewGrievance>,
) -> Created<Grievance> {
    let grievance = state.engine.file_grievance(user, request)?;
    Ok((StatusCode::CREATED, Json(grievance)))
}

/// GET /grievances
async fn list_grievances(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<Vec<Grievance>> {
    Json(state.engine.grievances_for(user))
}

async fn get_grievance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<GrievanceId>,
) -> ApiResult<Grievance> {
    Ok(Json(state.engine.grievance(user, id)?))
}

/// PUT /grievances/{id}
async fn revise_grievance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<GrievanceId>,
    Json(revision): Json<GrievanceRevision>,
) -> ApiResult<Grievance> {
    Ok(Json(state.engine.revise_grievance(user, id, revision)?))
}

/// PUT /grievances/{id}/status
async fn grievance_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<GrievanceId>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<GrievanceUpdate> {
    Ok(Json(state.engine.update_grievance_status(user, id, request.status)?))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/me", get(me))
        .route("/auth/link-partner", post(link_partner))
        .route("/auth/unlink-partner", post(unlink_partner))
        .route("/credits/balance", get(balance))
        .route("/credits/summary", get(summary))
        .route("/credits/history", get(history))
        .route("/credits/add", post(add_credits))
        .route("/credits/spend", post(spend_credits))
        .route("/credits/refund", post(refund_credits))
        .route("/credits/transfer", post(transfer))
        .route("/services", post(create_service).get(partner_services))
        .route("/services/{id}/book", post(book_service))
        .route("/appointments", post(book_custom).get(list_appointments))
        .route("/appointments/{id}", get(get_appointment))
        .route("/appointments/{id}/accept", put(accept_appointment))
        .route("/appointments/{id}/decline", put(decline_appointment))
        .route("/appointments/{id}/cancel", put(cancel_appointment))
        .route("/appointments/{id}/complete", put(complete_appointment))
        .route("/appointments/{id}/rate", put(rate_appointment))
        .route("/grievances", post(file_grievance).get(list_grievances))
        .route("/grievances/{id}", get(get_grievance).put(revise_grievance))
        .route("/grievances/{id}/status", put(grievance_status))
        .with_state(state)
}
