//! Arc-owning storage adapter for the provisioning state machine.
//!
//! Wraps the lifetime-based [`AccountStorage`] and owns an `Arc<PgPool>`,
//! so it can be handed out as `Arc<dyn shibgate_auth::AccountStorage>`.

use std::sync::Arc;

use async_trait::async_trait;
use shibgate_auth::storage::AccountStorage as AccountStorageTrait;
use shibgate_auth::{Account, AttributeSnapshot, AuthResult};
use time::OffsetDateTime;

use crate::PgPool;
use crate::account::AccountStorage;

/// Arc-owning PostgreSQL account storage adapter.
#[derive(Clone)]
pub struct ArcAccountStorage {
    pool: Arc<PgPool>,
}

impl ArcAccountStorage {
    /// Create a new Arc-owning account storage.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStorageTrait for ArcAccountStorage {
    async fn find_by_persistent_id(&self, persistent_id: &str) -> AuthResult<Option<Account>> {
        let storage = AccountStorage::new(&self.pool);
        Ok(storage.find_by_persistent_id(persistent_id).await?)
    }

    async fn create(
        &self,
        persistent_id: &str,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        let storage = AccountStorage::new(&self.pool);
        Ok(storage
            .create(persistent_id, display_name, email, raw_attributes)
            .await?)
    }

    async fn refresh_identity(
        &self,
        account: &Account,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        let storage = AccountStorage::new(&self.pool);
        Ok(storage
            .refresh_identity(&account.persistent_id, display_name, email, raw_attributes)
            .await?)
    }

    async fn advance_to_registered(
        &self,
        account: &Account,
        credential_secret: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Account> {
        let storage = AccountStorage::new(&self.pool);
        Ok(storage
            .advance_to_registered(&account.persistent_id, credential_secret, now)
            .await?)
    }

    async fn advance_to_created(&self, account: &Account) -> AuthResult<Account> {
        let storage = AccountStorage::new(&self.pool);
        Ok(storage.advance_to_created(&account.persistent_id).await?)
    }
}
