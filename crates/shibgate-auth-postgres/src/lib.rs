//! PostgreSQL storage backend for shibgate
//!
//! Persists local accounts in a single `shibgate_account` table keyed by
//! persistent id. State transitions are conditional `UPDATE`s on the current
//! state, so concurrent requests for the same account settle in the database.
//!
//! # Example
//!
//! ```ignore
//! use shibgate_auth_postgres::PostgresStorage;
//!
//! let storage = PostgresStorage::connect(&config.storage).await?;
//! storage.ensure_schema().await?;
//!
//! let accounts: Arc<dyn shibgate_auth::AccountStorage> = Arc::new(storage.account_storage());
//! ```

pub mod account;
pub mod storage_adapters;

use std::sync::Arc;

use shibgate_auth::config::StorageConfig;
use shibgate_auth::{AccountState, AuthError};
use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use account::{AccountRow, AccountStorage};
pub use storage_adapters::ArcAccountStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during account storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested account was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Account already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A guarded transition found a different state.
    #[error("Stale state: expected {expected}, found {actual}")]
    StaleState {
        /// State required by the transition.
        expected: AccountState,
        /// State found in the row.
        actual: AccountState,
    },

    /// A stored row could not be interpreted.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// No database URL was configured.
    #[error("storage.postgres_url is not set")]
    NotConfigured,
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidRow` error.
    #[must_use]
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow(message.into())
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(persistent_id) => AuthError::already_exists(persistent_id),
            StorageError::StaleState { expected, actual } => {
                AuthError::stale_state(expected, actual)
            }
            StorageError::NotConfigured => {
                AuthError::configuration("storage.postgres_url is not set")
            }
            other => AuthError::storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL Storage
// =============================================================================

/// PostgreSQL storage backend for account records.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting with the configured pool settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL is configured or the connection fails.
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;

        let url = config
            .postgres_url
            .as_deref()
            .ok_or(StorageError::NotConfigured)?;

        let pool = PoolOptions::<Postgres>::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout)
            .connect(url)
            .await?;

        tracing::info!(pool_size = config.pool_size, "Connected to PostgreSQL");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Creates the account table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        self.accounts().ensure_schema().await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get account storage operations.
    #[must_use]
    pub fn accounts(&self) -> AccountStorage<'_> {
        AccountStorage::new(&self.pool)
    }

    /// Get an owning adapter usable as `Arc<dyn shibgate_auth::AccountStorage>`.
    #[must_use]
    pub fn account_storage(&self) -> ArcAccountStorage {
        ArcAccountStorage::new(Arc::clone(&self.pool))
    }
}
