//! In-memory account storage.
//!
//! Backed by a [`DashMap`]; each operation holds the shard lock for the
//! account's key, which gives the same compare-and-commit guarantees as the
//! PostgreSQL backend. Used by tests and by the CLI when no database is
//! configured.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use super::account::{Account, AccountState, AccountStorage, AttributeSnapshot};
use crate::{AuthError, AuthResult};

/// Account storage held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryAccountStorage {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns `true` if no accounts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn advance(
        &self,
        account: &Account,
        expected: AccountState,
        apply: impl FnOnce(&mut Account),
    ) -> AuthResult<Account> {
        let mut stored = self
            .accounts
            .get_mut(&account.persistent_id)
            .ok_or_else(|| not_found(&account.persistent_id))?;

        if stored.state != expected {
            return Err(AuthError::stale_state(expected, stored.state));
        }

        apply(&mut stored);
        stored.updated_at = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }
}

fn not_found(persistent_id: &str) -> AuthError {
    AuthError::storage(format!("account {persistent_id} not found"))
}

#[async_trait]
impl AccountStorage for InMemoryAccountStorage {
    async fn find_by_persistent_id(&self, persistent_id: &str) -> AuthResult<Option<Account>> {
        Ok(self.accounts.get(persistent_id).map(|a| a.clone()))
    }

    async fn create(
        &self,
        persistent_id: &str,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        match self.accounts.entry(persistent_id.to_string()) {
            Entry::Occupied(_) => Err(AuthError::already_exists(persistent_id)),
            Entry::Vacant(slot) => {
                let account = Account::new(
                    persistent_id,
                    display_name,
                    email,
                    raw_attributes.clone(),
                );
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }

    async fn refresh_identity(
        &self,
        account: &Account,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        let mut stored = self
            .accounts
            .get_mut(&account.persistent_id)
            .ok_or_else(|| not_found(&account.persistent_id))?;

        stored.display_name = display_name.to_string();
        stored.email = email.to_string();
        stored.raw_attributes = raw_attributes.clone();
        stored.updated_at = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }

    async fn advance_to_registered(
        &self,
        account: &Account,
        credential_secret: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Account> {
        self.advance(account, AccountState::New, |stored| {
            stored.state = AccountState::Registered;
            stored.credential_secret = Some(credential_secret.to_string());
            stored.terms_accepted_at = Some(now);
        })
    }

    async fn advance_to_created(&self, account: &Account) -> AuthResult<Account> {
        self.advance(account, AccountState::Registered, |stored| {
            stored.state = AccountState::Created;
        })
    }
}
