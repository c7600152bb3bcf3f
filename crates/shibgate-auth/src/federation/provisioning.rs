//! Account provisioning state machine.
//!
//! Each visit drives the local account as far along
//! `New -> Registered -> Created` as it can:
//!
//! 1. Look up the account, creating it as `New` on first sight.
//! 2. Refresh display name, email and attributes.
//! 3. `New` with consent: issue a credential and move to `Registered`.
//! 4. `Registered`: create the directory account, home directory and storage
//!    mount, then move to `Created`. A failure leaves the account
//!    `Registered`; the next visit repeats the whole sequence.
//! 5. `Created`: check that the directory account still exists.
//!
//! Concurrent visits for the same persistent id are settled by the store's
//! compare-and-commit. Losing a race (`AlreadyExists`, `StaleState`) means
//! another request already did the work, so the record is re-read and the
//! visit continues from the authoritative state.
//!
//! # Example
//!
//! ```ignore
//! let machine = ProvisioningStateMachine::new(accounts, directory, home);
//! let outcome = machine.visit(&identity, true).await?;
//! if let Some(err) = &outcome.error {
//!     eprintln!("{}", err.user_message());
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::identity::CanonicalIdentity;
use super::mapping::{AttributeMapper, RawAttributes, parse_and_validate};
use crate::directory::DirectoryService;
use crate::home::HomeProvisioningService;
use crate::secret::{CredentialGenerator, RandomCredentialGenerator};
use crate::storage::{Account, AccountState, AccountStorage, AttributeSnapshot};
use crate::{AuthError, AuthResult};

/// Result of one visit.
///
/// `error` carries a failure the caller should show while the account itself
/// is still usable (external provisioning pending, or an inconsistency
/// needing an operator).
#[derive(Debug)]
pub struct VisitOutcome {
    /// The account as persisted after the visit.
    pub account: Account,
    /// Surfaced, non-fatal error.
    pub error: Option<AuthError>,
}

impl VisitOutcome {
    fn ok(account: Account) -> Self {
        Self {
            account,
            error: None,
        }
    }

    fn failed(account: Account, error: AuthError) -> Self {
        Self {
            account,
            error: Some(error),
        }
    }

    /// State after the visit.
    #[must_use]
    pub fn state(&self) -> AccountState {
        self.account.state
    }

    /// Returns `true` if the account is fully provisioned and verified.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.account.state == AccountState::Created
    }
}

/// Polling view of an account, serialized as `{"state": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    /// Current state, or `None` if the account has never been seen.
    pub state: Option<AccountState>,
}

/// Orchestrates account storage, the directory and home provisioning.
pub struct ProvisioningStateMachine {
    accounts: Arc<dyn AccountStorage>,
    directory: Arc<dyn DirectoryService>,
    home: Arc<dyn HomeProvisioningService>,
    credentials: Arc<dyn CredentialGenerator>,
}

impl ProvisioningStateMachine {
    /// Creates a state machine with the default credential generator.
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStorage>,
        directory: Arc<dyn DirectoryService>,
        home: Arc<dyn HomeProvisioningService>,
    ) -> Self {
        Self {
            accounts,
            directory,
            home,
            credentials: Arc::new(RandomCredentialGenerator::default()),
        }
    }

    /// Replaces the credential generator.
    #[must_use]
    pub fn with_credential_generator(mut self, credentials: Arc<dyn CredentialGenerator>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Maps raw attributes with `mapper`, validates them, then runs a visit.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` if required attributes are missing,
    /// otherwise as [`visit`](Self::visit).
    pub async fn handle_assertion(
        &self,
        mapper: &dyn AttributeMapper,
        raw: &RawAttributes,
        consent: bool,
    ) -> AuthResult<VisitOutcome> {
        let identity = parse_and_validate(mapper, raw)?;
        self.visit(&identity, consent).await
    }

    /// Runs one visit for `identity`.
    ///
    /// External provisioning failures and inconsistencies are returned in
    /// [`VisitOutcome::error`] together with the account.
    ///
    /// Missing-field messages name the canonical attribute (`'mail'`). Use
    /// [`handle_assertion`](Self::handle_assertion) when the messages are shown
    /// to users, so they name the raw attribute the identity provider sends.
    ///
    /// # Errors
    ///
    /// Returns an error if required attributes are missing or account storage
    /// fails.
    #[tracing::instrument(skip(self, identity), fields(persistent_id = tracing::field::Empty))]
    pub async fn visit(
        &self,
        identity: &CanonicalIdentity,
        consent: bool,
    ) -> AuthResult<VisitOutcome> {
        let (Some(persistent_id), Some(email), Some(display_name)) =
            (identity.persistent_id(), identity.mail(), identity.fullname())
        else {
            let errors = identity
                .missing_required()
                .into_iter()
                .map(|name| format!("Required field '{name}' can't be found."))
                .collect();
            return Err(AuthError::validation(errors));
        };
        tracing::Span::current().record("persistent_id", persistent_id);

        let snapshot = AttributeSnapshot::from_identity(identity);

        let account = self
            .find_or_create(persistent_id, display_name, email, &snapshot)
            .await?;
        let mut account = self
            .accounts
            .refresh_identity(&account, display_name, email, &snapshot)
            .await?;

        if account.state == AccountState::New {
            if !consent {
                tracing::debug!("Terms not accepted, account stays new");
                return Ok(VisitOutcome::ok(account));
            }
            account = self.register(account).await?;
        }

        if account.state == AccountState::Registered {
            match self.provision(&account).await {
                Ok(created) => account = created,
                Err(err) if err.is_external_error() => {
                    tracing::warn!(
                        error = %err,
                        category = %err.category(),
                        "Provisioning failed, account stays registered"
                    );
                    return Ok(VisitOutcome::failed(account, err));
                }
                Err(err) => return Err(err),
            }
        }

        if account.state == AccountState::Created
            && let Err(err) = self.verify(&account).await
        {
            return Ok(VisitOutcome::failed(account, err));
        }

        Ok(VisitOutcome::ok(account))
    }

    /// Returns the polling status for a persistent id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn status(&self, persistent_id: &str) -> AuthResult<AccountStatus> {
        let state = self
            .accounts
            .find_by_persistent_id(persistent_id)
            .await?
            .map(|a| a.state);
        Ok(AccountStatus { state })
    }

    async fn find_or_create(
        &self,
        persistent_id: &str,
        display_name: &str,
        email: &str,
        snapshot: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        if let Some(account) = self.accounts.find_by_persistent_id(persistent_id).await? {
            return Ok(account);
        }

        match self
            .accounts
            .create(persistent_id, display_name, email, snapshot)
            .await
        {
            Ok(account) => {
                tracing::info!(email = %email, "Account created");
                Ok(account)
            }
            Err(AuthError::AlreadyExists { .. }) => {
                tracing::debug!("Account created concurrently, re-reading");
                self.reload(persistent_id).await
            }
            Err(err) => Err(err),
        }
    }

    async fn register(&self, account: Account) -> AuthResult<Account> {
        let secret = self.credentials.generate();

        match self
            .accounts
            .advance_to_registered(&account, &secret, OffsetDateTime::now_utc())
            .await
        {
            Ok(registered) => {
                tracing::info!(state = %registered.state, "Terms accepted, account registered");
                Ok(registered)
            }
            Err(err @ AuthError::StaleState { .. }) => {
                tracing::debug!(error = %err, "Registration raced, continuing with stored state");
                self.reload(&account.persistent_id).await
            }
            Err(err) => Err(err),
        }
    }

    async fn provision(&self, account: &Account) -> AuthResult<Account> {
        let secret = account.credential_secret.as_deref().ok_or_else(|| {
            AuthError::inconsistent_state(format!(
                "account {} is registered without a credential",
                account.persistent_id
            ))
        })?;

        self.directory
            .create_account(&account.email, &account.display_name, secret)
            .await?;
        self.home.create_home_directory(&account.email).await?;
        self.home
            .create_storage_mount(&account.email, secret)
            .await?;

        match self.accounts.advance_to_created(account).await {
            Ok(created) => {
                tracing::info!(
                    state = %created.state,
                    email = %created.email,
                    "Account provisioned"
                );
                Ok(created)
            }
            Err(err @ AuthError::StaleState { .. }) => {
                tracing::debug!(error = %err, "Provisioning raced, continuing with stored state");
                self.reload(&account.persistent_id).await
            }
            Err(err) => Err(err),
        }
    }

    async fn verify(&self, account: &Account) -> AuthResult<()> {
        match self.directory.exists(&account.email).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                let err = AuthError::inconsistent_state(format!(
                    "account {} is created but has no directory entry for {}",
                    account.persistent_id, account.email
                ));
                tracing::error!(error = %err, "Directory entry missing for created account");
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Could not verify directory account");
                Err(err)
            }
        }
    }

    async fn reload(&self, persistent_id: &str) -> AuthResult<Account> {
        self.accounts
            .find_by_persistent_id(persistent_id)
            .await?
            .ok_or_else(|| AuthError::internal(format!("account {persistent_id} vanished")))
    }
}
