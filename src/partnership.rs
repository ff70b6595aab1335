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

//! Account creation and partner linking.
//!
//! Two accounts become partners by sharing an access key. Everything that
//! reads or changes the holders of a key runs under that key's lock, which
//! keeps the "at most two holders" and "at most one partner" rules intact
//! when signups and link requests race.
//!
//! ```text
//!  signup(key) ──► 0 holders ──► account created, waits for partner
//!              ──► 1 unlinked holder ──► account created and linked (+bonus each)
//!              ──► 2 holders ──► AccessKeyInUse
//! ```

use crate::account::{Account, AccountView, UserProfile};
use crate::base::{AccessKey, UserId};
use crate::engine::{Engine, lock_pair};
use crate::error::LedgerError;
use crate::transaction::{NewTransaction, RelatedType, Transaction, TransactionKind};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Signup request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub access_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user: AccountView,
    /// Set when the signup linked the new account immediately.
    pub partner: Option<AccountView>,
    pub bonuses: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOutcome {
    pub user: AccountView,
    pub partner: AccountView,
    pub bonuses: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkOutcome {
    pub user: AccountView,
    pub former_partner: UserId,
}

impl Engine {
    fn key_lock(&self, key: &AccessKey) -> Arc<Mutex<()>> {
        Arc::clone(self.key_locks.entry(key.clone()).or_default().value())
    }

    fn key_holders(&self, key: &AccessKey) -> Vec<UserId> {
        self.access_keys
            .get(key)
            .map(|holders| holders.value().clone())
            .unwrap_or_default()
    }

    fn is_unlinked(&self, user: UserId) -> bool {
        self.account(user)
            .is_ok_and(|account| account.profile().partner_id.is_none())
    }

    fn parse_access_key(&self, raw: &str) -> Result<AccessKey, LedgerError> {
        AccessKey::parse_with_min(raw, self.config.min_access_key_len)
    }

    /// Creates an account, posts the signup bonus and links it to a waiting
    /// account holding the same key, if there is one.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidInput`] / [`LedgerError::InvalidAccessKey`] - bad fields.
    /// - [`LedgerError::AccessKeyInUse`] - two accounts already hold the key.
    /// - [`LedgerError::EmailTaken`] - email already registered.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub fn register_user(&self, request: NewUser) -> Result<Registration, LedgerError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(LedgerError::invalid_input("name", "must not be empty"));
        }
        let email = request.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(LedgerError::invalid_input("email", "must be an email address"));
        }
        let key = self.parse_access_key(&request.access_key)?;

        let lock = self.key_lock(&key);
        let _key_guard = lock.lock();

        let holders = self.key_holders(&key);
        if holders.len() >= 2 {
            return Err(LedgerError::AccessKeyInUse);
        }
        let waiting = holders
            .iter()
            .copied()
            .find(|holder| self.is_unlinked(*holder));

        let profile = UserProfile::new(name, email.clone(), key.clone());
        let user_id = profile.id;
        match self.emails.entry(email) {
            Entry::Occupied(_) => return Err(LedgerError::EmailTaken),
            Entry::Vacant(slot) => {
                slot.insert(user_id);
            }
        }
        self.accounts.insert(user_id, Arc::new(Account::new(profile)));
        self.access_keys.entry(key.clone()).or_default().push(user_id);
        info!(user = %user_id, "registered account");

        let mut bonuses = Vec::new();
        if self.config.signup_credits > 0 {
            let account = self.account(user_id)?;
            let mut data = account.lock();
            bonuses.push(self.post_locked(
                &mut data,
                NewTransaction::new(
                    user_id,
                    TransactionKind::Bonus,
                    self.config.signup_credits,
                    "Welcome credits",
                )
                .related(user_id, RelatedType::Bonus),
            )?);
        }

        // A holder linked through another key in the meantime simply leaves
        // the new account waiting.
        let linked = waiting.map(|holder| self.link_pair_locked(user_id, holder, None));
        let partner = match linked {
            Some(Ok(outcome)) => {
                bonuses.extend(outcome.bonuses);
                Some(outcome.partner)
            }
            Some(Err(LedgerError::PartnerUnavailable)) | None => None,
            Some(Err(err)) => return Err(err),
        };

        Ok(Registration {
            user: self.account_view(user_id)?,
            partner,
            bonuses,
        })
    }

    /// Links `user` with the other unlinked holder of `access_key` and posts
    /// the link bonus to both.
    ///
    /// The caller adopts the key, so afterwards both partners hold it.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AlreadyLinked`] - the caller has a partner.
    /// - [`LedgerError::NoPartnerCandidate`] - nobody else is waiting on the key.
    /// - [`LedgerError::AccessKeyInUse`] - two other accounts hold the key.
    /// - [`LedgerError::PartnerUnavailable`] - the candidate was linked meanwhile.
    #[instrument(skip(self, access_key))]
    pub fn link_by_access_key(
        &self,
        user: UserId,
        access_key: &str,
    ) -> Result<LinkOutcome, LedgerError> {
        let key = self.parse_access_key(access_key)?;
        let account = self.account(user)?;
        let current = account.profile();
        if current.partner_id.is_some() {
            return Err(LedgerError::AlreadyLinked);
        }

        // Moving onto the shared key touches the holders of both keys.
        let key_lock = self.key_lock(&key);
        let old_lock = (current.access_key != key).then(|| self.key_lock(&current.access_key));
        let _key_guards = match &old_lock {
            None => (key_lock.lock(), None),
            Some(old) if current.access_key < key => {
                let old_guard = old.lock();
                (key_lock.lock(), Some(old_guard))
            }
            Some(old) => {
                let new_guard = key_lock.lock();
                (new_guard, Some(old.lock()))
            }
        };
        if account.profile().access_key != current.access_key {
            // Linked through another key while we waited.
            return Err(LedgerError::AlreadyLinked);
        }

        let others: Vec<UserId> = self
            .key_holders(&key)
            .into_iter()
            .filter(|holder| *holder != user)
            .collect();
        if others.len() >= 2 {
            return Err(LedgerError::AccessKeyInUse);
        }
        let candidate = others
            .iter()
            .copied()
            .find(|holder| self.is_unlinked(*holder))
            .ok_or(LedgerError::NoPartnerCandidate)?;

        let adopt = (current.access_key != key).then_some(&key);
        let outcome = self.link_pair_locked(user, candidate, adopt)?;

        if adopt.is_some() {
            self.move_key_holder(user, &current.access_key, &key);
        }
        Ok(outcome)
    }

    /// Links two accounts under their locks. `adopt_key` is written to
    /// `user`'s profile in the same critical section.
    fn link_pair_locked(
        &self,
        user: UserId,
        partner: UserId,
        adopt_key: Option<&AccessKey>,
    ) -> Result<LinkOutcome, LedgerError> {
        let user_account = self.account(user)?;
        let partner_account = self.account(partner)?;
        let (mut user_data, mut partner_data) =
            lock_pair((user, user_account.as_ref()), (partner, partner_account.as_ref()));

        if user_data.partner_id().is_some() {
            return Err(LedgerError::AlreadyLinked);
        }
        if partner_data.partner_id().is_some() {
            return Err(LedgerError::PartnerUnavailable);
        }

        let mut bonuses = Vec::new();
        if self.config.link_bonus > 0 {
            let bonus = |owner: UserId, other: UserId| {
                NewTransaction::new(
                    owner,
                    TransactionKind::Bonus,
                    self.config.link_bonus,
                    "Partner linked bonus",
                )
                .related(other, RelatedType::Bonus)
            };
            let (user_bonus, partner_bonus) = self.post_pair_locked(
                (&mut *user_data, bonus(user, partner)),
                (&mut *partner_data, bonus(partner, user)),
            )?;
            bonuses.extend([user_bonus, partner_bonus]);
        }

        let since = Utc::now();
        user_data.link_to(partner, since);
        partner_data.link_to(user, since);
        if let Some(key) = adopt_key {
            user_data.set_access_key(key.clone());
        }
        info!(user = %user, partner = %partner, "linked partners");

        Ok(LinkOutcome {
            user: user_data.view(),
            partner: partner_data.view(),
            bonuses,
        })
    }

    fn move_key_holder(&self, user: UserId, from: &AccessKey, to: &AccessKey) {
        if let Some(mut holders) = self.access_keys.get_mut(from) {
            holders.retain(|holder| *holder != user);
        }
        self.access_keys.remove_if(from, |_, holders| holders.is_empty());
        self.access_keys.entry(to.clone()).or_default().push(user);
    }

    /// Dissolves the caller's partnership on both sides. Bonuses already
    /// posted stay on the ledger.
    #[instrument(skip(self))]
    pub fn unlink(&self, user: UserId) -> Result<UnlinkOutcome, LedgerError> {
        let account = self.account(user)?;
        let partner = account.profile().partner_id.ok_or(LedgerError::NotLinked)?;
        let partner_account = self.account(partner)?;

        let (mut user_data, mut partner_data) =
            lock_pair((user, account.as_ref()), (partner, partner_account.as_ref()));
        if user_data.partner_id() != Some(partner) {
            return Err(LedgerError::NotLinked);
        }
        user_data.unlink();
        if partner_data.partner_id() == Some(user) {
            partner_data.unlink();
        }
        info!(user = %user, partner = %partner, "unlinked partners");

        Ok(UnlinkOutcome {
            user: user_data.view(),
            former_partner: partner,
        })
    }

    /// The caller's partner, if linked.
    pub fn partner_of(&self, user: UserId) -> Result<Option<AccountView>, LedgerError> {
        match self.account(user)?.profile().partner_id {
            Some(partner) => self.account_view(partner).map(Some),
            None => Ok(None),
        }
    }

    /// Partner id or [`LedgerError::NotLinked`].
    pub(crate) fn require_partner(&self, user: UserId) -> Result<UserId, LedgerError> {
        self.account(user)?
            .profile()
            .partner_id
            .ok_or(LedgerError::NotLinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;

    fn signup(engine: &Engine, name: &str, key: &str) -> Result<Registration, LedgerError> {
        engine.register_user(NewUser {
            name: name.into(),
            email: format!("{name}@example.com"),
            access_key: key.into(),
        })
    }

    #[test]
    fn signup_validates_fields() {
        let engine = Engine::new();
        assert!(matches!(
            signup(&engine, " ", "muffin42"),
            Err(LedgerError::InvalidInput { field: "name", .. })
        ));
        assert_eq!(
            signup(&engine, "ada", "abc").unwrap_err(),
            LedgerError::InvalidAccessKey { min_len: 6 }
        );
        let bad_email = engine.register_user(NewUser {
            name: "ada".into(),
            email: "nope".into(),
            access_key: "muffin42".into(),
        });
        assert!(matches!(
            bad_email,
            Err(LedgerError::InvalidInput { field: "email", .. })
        ));
        assert_eq!(engine.account_count(), 0);
    }

    #[test]
    fn signup_posts_welcome_bonus() {
        let engine = Engine::new();
        let registration = signup(&engine, "ada", "muffin42").unwrap();
        assert_eq!(registration.user.credits, 20);
        assert_eq!(registration.bonuses.len(), 1);
        assert_eq!(registration.bonuses[0].kind, TransactionKind::Bonus);
        assert!(registration.partner.is_none());
    }

    #[test]
    fn second_signup_on_key_links_both() {
        let engine = Engine::new();
        let ada = signup(&engine, "ada", "muffin42").unwrap().user.profile.id;
        let bob = signup(&engine, "bob", "muffin42").unwrap();

        let partner = bob.partner.expect("linked at signup");
        assert_eq!(partner.profile.id, ada);
        assert_eq!(bob.user.profile.partner_id, Some(ada));
        assert_eq!(bob.user.credits, 20 + 25);
        assert_eq!(engine.balance(ada).unwrap(), 20 + 25);
        assert!(bob.user.profile.relationship_start_date.is_some());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let engine = Engine::new();
        signup(&engine, "ada", "muffin42").unwrap();
        let again = engine.register_user(NewUser {
            name: "Ada Again".into(),
            email: " ADA@example.com ".into(),
            access_key: "other-key".into(),
        });
        assert_eq!(again.unwrap_err(), LedgerError::EmailTaken);
        assert_eq!(engine.account_count(), 1);
    }

    #[test]
    fn link_moves_caller_onto_shared_key() {
        let engine = Engine::with_config(LedgerConfig {
            signup_credits: 0,
            ..LedgerConfig::default()
        });
        let ada = signup(&engine, "ada", "ada-key-1").unwrap().user.profile.id;
        let bob = signup(&engine, "bob", "bob-key-1").unwrap().user.profile.id;

        let outcome = engine.link_by_access_key(bob, "ada-key-1").unwrap();
        assert_eq!(outcome.user.profile.access_key.as_str(), "ada-key-1");
        assert_eq!(outcome.bonuses.len(), 2);
        assert_eq!(engine.balance(bob).unwrap(), 25);

        // Bob's old key is free again.
        let carol = signup(&engine, "carol", "bob-key-1").unwrap();
        assert!(carol.partner.is_none());
        // The shared key is full.
        assert_eq!(
            signup(&engine, "dave", "ada-key-1").unwrap_err(),
            LedgerError::AccessKeyInUse
        );
        assert_eq!(engine.partner_of(ada).unwrap().unwrap().profile.id, bob);
    }

    #[test]
    fn unlink_clears_both_sides_and_keeps_bonuses() {
        let engine = Engine::new();
        let ada = signup(&engine, "ada", "muffin42").unwrap().user.profile.id;
        let bob = signup(&engine, "bob", "muffin42").unwrap().user.profile.id;

        let outcome = engine.unlink(ada).unwrap();
        assert_eq!(outcome.former_partner, bob);
        assert!(outcome.user.profile.partner_id.is_none());
        assert!(engine.partner_of(bob).unwrap().is_none());
        assert!(
            engine
                .account_view(bob)
                .unwrap()
                .profile
                .relationship_start_date
                .is_none()
        );
        assert_eq!(engine.balance(bob).unwrap(), 45);
        assert_eq!(engine.unlink(ada).unwrap_err(), LedgerError::NotLinked);
    }

    #[test]
    fn relinking_after_unlink_pays_bonus_again() {
        let engine = Engine::with_config(LedgerConfig {
            signup_credits: 0,
            ..LedgerConfig::default()
        });
        let ada = signup(&engine, "ada", "muffin42").unwrap().user.profile.id;
        let bob = signup(&engine, "bob", "muffin42").unwrap().user.profile.id;
        engine.unlink(bob).unwrap();

        let outcome = engine.link_by_access_key(ada, "muffin42").unwrap();
        assert_eq!(outcome.partner.profile.id, bob);
        assert_eq!(engine.balance(ada).unwrap(), 50);
    }

    #[test]
    fn link_without_candidate_is_not_found() {
        let engine = Engine::new();
        let ada = signup(&engine, "ada", "muffin42").unwrap().user.profile.id;
        assert_eq!(
            engine.link_by_access_key(ada, "muffin42").unwrap_err(),
            LedgerError::NoPartnerCandidate
        );
        assert_eq!(
            engine.link_by_access_key(ada, "nobody-here").unwrap_err(),
            LedgerError::NoPartnerCandidate
        );
    }

    #[test]
    fn linked_caller_cannot_link_again() {
        let engine = Engine::new();
        let ada = signup(&engine, "ada", "muffin42").unwrap().user.profile.id;
        signup(&engine, "bob", "muffin42").unwrap();
        signup(&engine, "carol", "carol-key").unwrap();
        assert_eq!(
            engine.link_by_access_key(ada, "carol-key").unwrap_err(),
            LedgerError::AlreadyLinked
        );
    }
}
