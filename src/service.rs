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

//! Bookable services.
//!
//! A booking either points at a [`ServiceRecord`] its owner published, or
//! carries an [`AdHocService`] described inline by the requester. [`Service`]
//! keeps the two apart explicitly.

use crate::base::{Credits, ServiceId, UserId};
use crate::engine::Engine;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A service published by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub owner: UserId,
    pub title: String,
    pub description: Option<String>,
    pub credit_cost: Credits,
    pub created_at: DateTime<Utc>,
}

/// A one-off service described at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdHocService {
    pub title: String,
    pub description: Option<String>,
    pub credit_cost: Credits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Service {
    Persisted(ServiceRecord),
    AdHoc(AdHocService),
}

impl Service {
    pub fn title(&self) -> &str {
        match self {
            Self::Persisted(record) => &record.title,
            Self::AdHoc(service) => &service.title,
        }
    }

    pub fn credit_cost(&self) -> Credits {
        match self {
            Self::Persisted(record) => record.credit_cost,
            Self::AdHoc(service) => service.credit_cost,
        }
    }

    pub fn service_id(&self) -> Option<ServiceId> {
        match self {
            Self::Persisted(record) => Some(record.id),
            Self::AdHoc(_) => None,
        }
    }
}

/// Fields shared by published and ad-hoc services.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewService {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub credit_cost: Credits,
}

impl NewService {
    pub(crate) fn validate(self) -> Result<AdHocService, LedgerError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(LedgerError::invalid_input("title", "must not be empty"));
        }
        if self.credit_cost <= 0 {
            return Err(LedgerError::invalid_input("creditCost", "must be positive"));
        }
        Ok(AdHocService {
            title: title.to_string(),
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            credit_cost: self.credit_cost,
        })
    }
}

impl Engine {
    /// Publishes a service the owner's partner can book.
    pub fn create_service(
        &self,
        owner: UserId,
        request: NewService,
    ) -> Result<ServiceRecord, LedgerError> {
        self.account(owner)?;
        let fields = request.validate()?;
        let record = ServiceRecord {
            id: ServiceId::new(),
            owner,
            title: fields.title,
            description: fields.description,
            credit_cost: fields.credit_cost,
            created_at: Utc::now(),
        };
        self.services.insert(record.id, record.clone());
        info!(service = %record.id, owner = %owner, cost = record.credit_cost, "published service");
        Ok(record)
    }

    pub fn service(&self, id: ServiceId) -> Result<ServiceRecord, LedgerError> {
        self.services
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::ServiceNotFound(id))
    }

    /// Services published by `owner`, oldest first.
    pub fn services_offered_by(&self, owner: UserId) -> Vec<ServiceRecord> {
        let mut services: Vec<ServiceRecord> = self
            .services
            .iter()
            .filter(|entry| entry.value().owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by_key(|service| service.created_at);
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partnership::NewUser;

    fn owner(engine: &Engine) -> UserId {
        engine
            .register_user(NewUser {
                name: "ada".into(),
                email: "ada@example.com".into(),
                access_key: "muffin42".into(),
            })
            .unwrap()
            .user
            .profile
            .id
    }

    fn request(title: &str, cost: Credits) -> NewService {
        NewService {
            title: title.into(),
            description: Some("  ".into()),
            credit_cost: cost,
        }
    }

    #[test]
    fn published_service_can_be_fetched() {
        let engine = Engine::new();
        let ada = owner(&engine);
        let record = engine.create_service(ada, request(" Back rub ", 30)).unwrap();
        assert_eq!(record.title, "Back rub");
        assert_eq!(record.description, None);
        assert_eq!(engine.service(record.id).unwrap(), record);
        assert_eq!(engine.services_offered_by(ada), vec![record]);
    }

    #[test]
    fn invalid_services_are_rejected() {
        let engine = Engine::new();
        let ada = owner(&engine);
        assert!(matches!(
            engine.create_service(ada, request("", 30)),
            Err(LedgerError::InvalidInput { field: "title", .. })
        ));
        assert!(matches!(
            engine.create_service(ada, request("Dinner", 0)),
            Err(LedgerError::InvalidInput {
                field: "creditCost",
                ..
            })
        ));
        let ghost = UserId::new();
        assert_eq!(
            engine.create_service(ghost, request("Dinner", 5)),
            Err(LedgerError::UserNotFound(ghost))
        );
    }

    #[test]
    fn service_variants_serialize_with_source_tag() {
        let ad_hoc = Service::AdHoc(request("Picnic", 12).validate().unwrap());
        let json = serde_json::to_value(&ad_hoc).unwrap();
        assert_eq!(json["source"], "ad_hoc");
        assert_eq!(json["creditCost"], 12);
        assert_eq!(ad_hoc.service_id(), None);
        assert_eq!(ad_hoc.credit_cost(), 12);
    }
}
