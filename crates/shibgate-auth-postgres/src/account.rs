//! Account storage for PostgreSQL.
//!
//! One row per persistent id. `state` is stored as `new`, `registered` or
//! `created`; transitions only succeed when the row still holds the expected
//! state, and check constraints keep the credential and terms timestamp in
//! step with it.

use shibgate_auth::{Account, AccountState, AttributeSnapshot};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;

use crate::{PgPool, StorageError, StorageResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS shibgate_account (
    persistent_id     TEXT PRIMARY KEY,
    display_name      TEXT NOT NULL,
    email             TEXT NOT NULL,
    credential_secret TEXT,
    state             TEXT NOT NULL DEFAULT 'new'
                      CHECK (state IN ('new', 'registered', 'created')),
    terms_accepted_at TIMESTAMPTZ,
    raw_attributes    JSONB NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK ((state = 'new') = (credential_secret IS NULL)),
    CHECK ((state = 'new') = (terms_accepted_at IS NULL))
)
"#;

const COLUMNS: &str = "persistent_id, display_name, email, credential_secret, state, \
                       terms_accepted_at, raw_attributes, created_at, updated_at";

type RowTuple = (
    String,
    String,
    String,
    Option<String>,
    String,
    Option<OffsetDateTime>,
    serde_json::Value,
    OffsetDateTime,
    OffsetDateTime,
);

// =============================================================================
// Row Type
// =============================================================================

/// Raw database row for an account.
#[derive(Debug, Clone)]
pub struct AccountRow {
    /// Primary key.
    pub persistent_id: String,
    /// Display name.
    pub display_name: String,
    /// Email.
    pub email: String,
    /// Credential, null while `new`.
    pub credential_secret: Option<String>,
    /// State string.
    pub state: String,
    /// Terms acceptance time, null while `new`.
    pub terms_accepted_at: Option<OffsetDateTime>,
    /// Versioned attribute snapshot.
    pub raw_attributes: serde_json::Value,
    /// Creation time.
    pub created_at: OffsetDateTime,
    /// Last update time.
    pub updated_at: OffsetDateTime,
}

impl AccountRow {
    fn from_tuple(row: RowTuple) -> Self {
        Self {
            persistent_id: row.0,
            display_name: row.1,
            email: row.2,
            credential_secret: row.3,
            state: row.4,
            terms_accepted_at: row.5,
            raw_attributes: row.6,
            created_at: row.7,
            updated_at: row.8,
        }
    }

    /// Converts the row into a domain account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` for an unknown state or attribute layout.
    pub fn into_account(self) -> StorageResult<Account> {
        let state = parse_state(&self.state)?;
        let raw_attributes = AttributeSnapshot::from_value(self.raw_attributes)
            .map_err(|e| StorageError::invalid_row(format!("{}: {e}", self.persistent_id)))?;

        Ok(Account {
            persistent_id: self.persistent_id,
            display_name: self.display_name,
            email: self.email,
            credential_secret: self.credential_secret,
            state,
            terms_accepted_at: self.terms_accepted_at,
            raw_attributes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_state(value: &str) -> StorageResult<AccountState> {
    value
        .parse::<AccountState>()
        .map_err(|e| StorageError::invalid_row(e.to_string()))
}

// =============================================================================
// Account Storage
// =============================================================================

/// Account storage operations.
pub struct AccountStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> AccountStorage<'a> {
    /// Create a new account storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create the table if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        query(SCHEMA).execute(self.pool).await?;
        Ok(())
    }

    /// Find an account by persistent id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is invalid.
    pub async fn find_by_persistent_id(
        &self,
        persistent_id: &str,
    ) -> StorageResult<Option<Account>> {
        let row: Option<RowTuple> = query_as(&format!(
            "SELECT {COLUMNS} FROM shibgate_account WHERE persistent_id = $1"
        ))
        .bind(persistent_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| AccountRow::from_tuple(r).into_account())
            .transpose()
    }

    /// Insert a `new` account.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the persistent id already exists.
    pub async fn create(
        &self,
        persistent_id: &str,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> StorageResult<Account> {
        let row: Option<RowTuple> = query_as(&format!(
            r#"
            INSERT INTO shibgate_account (persistent_id, display_name, email, state, raw_attributes)
            VALUES ($1, $2, $3, 'new', $4)
            ON CONFLICT (persistent_id) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(persistent_id)
        .bind(display_name)
        .bind(email)
        .bind(raw_attributes.to_value())
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some(row) => AccountRow::from_tuple(row).into_account(),
            None => Err(StorageError::conflict(persistent_id)),
        }
    }

    /// Overwrite name, email and attributes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row is gone.
    pub async fn refresh_identity(
        &self,
        persistent_id: &str,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> StorageResult<Account> {
        let row: Option<RowTuple> = query_as(&format!(
            r#"
            UPDATE shibgate_account
            SET display_name = $2, email = $3, raw_attributes = $4, updated_at = NOW()
            WHERE persistent_id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(persistent_id)
        .bind(display_name)
        .bind(email)
        .bind(raw_attributes.to_value())
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some(row) => AccountRow::from_tuple(row).into_account(),
            None => Err(StorageError::not_found(persistent_id)),
        }
    }

    /// Move `new` to `registered`.
    ///
    /// # Errors
    ///
    /// Returns `StaleState` if the row is no longer `new`.
    pub async fn advance_to_registered(
        &self,
        persistent_id: &str,
        credential_secret: &str,
        now: OffsetDateTime,
    ) -> StorageResult<Account> {
        let row: Option<RowTuple> = query_as(&format!(
            r#"
            UPDATE shibgate_account
            SET state = 'registered', credential_secret = $2, terms_accepted_at = $3,
                updated_at = NOW()
            WHERE persistent_id = $1 AND state = 'new'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(persistent_id)
        .bind(credential_secret)
        .bind(now)
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some(row) => AccountRow::from_tuple(row).into_account(),
            None => Err(self.stale(persistent_id, AccountState::New).await),
        }
    }

    /// Move `registered` to `created`.
    ///
    /// # Errors
    ///
    /// Returns `StaleState` if the row is no longer `registered`.
    pub async fn advance_to_created(&self, persistent_id: &str) -> StorageResult<Account> {
        let row: Option<RowTuple> = query_as(&format!(
            r#"
            UPDATE shibgate_account
            SET state = 'created', updated_at = NOW()
            WHERE persistent_id = $1 AND state = 'registered'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(persistent_id)
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some(row) => AccountRow::from_tuple(row).into_account(),
            None => Err(self.stale(persistent_id, AccountState::Registered).await),
        }
    }

    /// Explains why a guarded update matched no row.
    async fn stale(&self, persistent_id: &str, expected: AccountState) -> StorageError {
        let current: Result<Option<String>, _> =
            query_scalar("SELECT state FROM shibgate_account WHERE persistent_id = $1")
                .bind(persistent_id)
                .fetch_optional(self.pool)
                .await;

        match current {
            Ok(Some(actual)) => match parse_state(&actual) {
                Ok(actual) => StorageError::StaleState { expected, actual },
                Err(e) => e,
            },
            Ok(None) => StorageError::not_found(persistent_id),
            Err(e) => StorageError::Database(e),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: &str) -> AccountRow {
        let now = OffsetDateTime::now_utc();
        AccountRow {
            persistent_id: "42".to_string(),
            display_name: "Jo".to_string(),
            email: "a@x.com".to_string(),
            credential_secret: (state != "new").then(|| "cafe".to_string()),
            state: state.to_string(),
            terms_accepted_at: (state != "new").then_some(now),
            raw_attributes: serde_json::json!({
                "version": 1,
                "attributes": {"id": "42", "mail": "a@x.com"}
            }),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_into_account() {
        let account = row("registered").into_account().unwrap();
        assert_eq!(account.state, AccountState::Registered);
        assert_eq!(account.credential_secret.as_deref(), Some("cafe"));
        assert_eq!(
            account.raw_attributes.attributes.get("mail").map(String::as_str),
            Some("a@x.com")
        );
        assert!(account.is_consistent());
    }

    #[test]
    fn test_unknown_state_is_invalid_row() {
        let err = row("deleted").into_account().unwrap_err();
        assert!(matches!(err, StorageError::InvalidRow(_)));
        assert!(err.to_string().contains("deleted"));
    }

    #[test]
    fn test_unversioned_attributes_rejected() {
        let mut r = row("new");
        r.raw_attributes = serde_json::json!({"mail": "a@x.com"});
        let err = r.into_account().unwrap_err();
        assert!(matches!(err, StorageError::InvalidRow(_)));
    }

    #[test]
    fn test_schema_covers_every_state() {
        for state in [
            AccountState::New,
            AccountState::Registered,
            AccountState::Created,
        ] {
            assert!(SCHEMA.contains(&format!("'{}'", state.as_str())));
        }
    }
}
