//! Account record and storage trait.
//!
//! An [`Account`] is the local record of a federated user, keyed by the
//! persistent id the identity provider assigns. Its `state` only ever moves
//! forward, and backends enforce that with a compare-and-commit on the
//! current state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::federation::CanonicalIdentity;

// =============================================================================
// Account State
// =============================================================================

/// Lifecycle state of a local account.
///
/// Ordered: `New < Registered < Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountState {
    /// Seen at least once, terms not accepted.
    New,
    /// Terms accepted and credential issued; external provisioning pending.
    Registered,
    /// Directory account, home directory and mount all exist.
    Created,
}

impl AccountState {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Registered => "registered",
            Self::Created => "created",
        }
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized persisted state string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown account state: '{0}'")]
pub struct UnknownAccountState(pub String);

impl FromStr for AccountState {
    type Err = UnknownAccountState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "registered" => Ok(Self::Registered),
            "created" => Ok(Self::Created),
            other => Err(UnknownAccountState(other.to_string())),
        }
    }
}

// =============================================================================
// Attribute Snapshot
// =============================================================================

/// Last canonical identity received for an account, in versioned form.
///
/// Serialized as `{"version": 1, "attributes": {...}}` so the layout can
/// change without guessing at old rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    /// Layout version.
    pub version: u32,
    /// Canonical attribute name to value.
    pub attributes: BTreeMap<String, String>,
}

impl AttributeSnapshot {
    /// Current layout version.
    pub const VERSION: u32 = 1;

    /// Captures the attributes of an identity.
    #[must_use]
    pub fn from_identity(identity: &CanonicalIdentity) -> Self {
        Self {
            version: Self::VERSION,
            attributes: identity.attributes().clone(),
        }
    }

    /// Serializes to a JSON value for storage.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "version": self.version,
            "attributes": self.attributes,
        })
    }

    /// Parses a stored JSON value, rejecting layouts newer than this build.
    ///
    /// # Errors
    ///
    /// Returns an error message if the value is malformed or has an
    /// unsupported version.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let snapshot: Self = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if snapshot.version != Self::VERSION {
            return Err(format!(
                "unsupported attribute snapshot version {}",
                snapshot.version
            ));
        }
        Ok(snapshot)
    }
}

// =============================================================================
// Account
// =============================================================================

/// A locally provisioned account.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    /// External persistent id; unique and immutable.
    pub persistent_id: String,
    /// Display name from the last visit.
    pub display_name: String,
    /// Lower-cased email from the last visit.
    pub email: String,
    /// Credential shared with the directory and storage mount.
    /// Set exactly when `state != New`.
    pub credential_secret: Option<String>,
    /// Lifecycle state.
    pub state: AccountState,
    /// When the user accepted the terms. Set exactly when `state != New`.
    pub terms_accepted_at: Option<OffsetDateTime>,
    /// Last canonical identity received.
    pub raw_attributes: AttributeSnapshot,
    /// Row creation time.
    pub created_at: OffsetDateTime,
    /// Last modification time.
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Creates a fresh `New` account.
    #[must_use]
    pub fn new(
        persistent_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
        raw_attributes: AttributeSnapshot,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            persistent_id: persistent_id.into(),
            display_name: display_name.into(),
            email: email.into(),
            credential_secret: None,
            state: AccountState::New,
            terms_accepted_at: None,
            raw_attributes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` when the credential and terms timestamp agree with `state`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let registered = self.state != AccountState::New;
        self.credential_secret.is_some() == registered
            && self.terms_accepted_at.is_some() == registered
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("persistent_id", &self.persistent_id)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field(
                "credential_secret",
                &self.credential_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("state", &self.state)
            .field("terms_accepted_at", &self.terms_accepted_at)
            .field("raw_attributes", &self.raw_attributes)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

// =============================================================================
// Account Storage Trait
// =============================================================================

/// Persistence of local accounts.
///
/// Every mutation commits atomically. State transitions are guarded by the
/// expected current state; a mismatch yields [`AuthError::StaleState`] and
/// leaves the record untouched.
///
/// [`AuthError::StaleState`]: crate::AuthError::StaleState
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Find an account by persistent id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_persistent_id(&self, persistent_id: &str) -> AuthResult<Option<Account>>;

    /// Create a `New` account.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if an account with this persistent id exists.
    /// Never overwrites.
    async fn create(
        &self,
        persistent_id: &str,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> AuthResult<Account>;

    /// Overwrite display name, email and attributes without touching state.
    ///
    /// Returns the account as stored after the update.
    ///
    /// # Errors
    ///
    /// Returns an error if the account vanished or the storage operation fails.
    async fn refresh_identity(
        &self,
        account: &Account,
        display_name: &str,
        email: &str,
        raw_attributes: &AttributeSnapshot,
    ) -> AuthResult<Account>;

    /// Move `New` to `Registered`, storing the credential and terms time.
    ///
    /// # Errors
    ///
    /// Returns `StaleState` if the stored state is no longer `New`.
    async fn advance_to_registered(
        &self,
        account: &Account,
        credential_secret: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Account>;

    /// Move `Registered` to `Created`.
    ///
    /// # Errors
    ///
    /// Returns `StaleState` if the stored state is no longer `Registered`.
    async fn advance_to_created(&self, account: &Account) -> AuthResult<Account>;
}
