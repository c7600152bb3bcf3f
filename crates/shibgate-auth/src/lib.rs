//! # shibgate-auth
//!
//! Turns a federated sign-on assertion into a locally provisioned account.
//!
//! This crate provides:
//! - Attribute mapping for Shibboleth and AAF Rapid Connect
//! - The account provisioning state machine
//! - Account storage traits and an in-memory store
//! - A POSIX directory service over LDAP
//! - A home directory and storage mount provisioning client
//!
//! ## Overview
//!
//! A visit maps raw attributes to a [`CanonicalIdentity`], then hands it to
//! the [`ProvisioningStateMachine`] together with the user's consent. The
//! state machine persists the account, drives directory and home
//! provisioning, and returns the resulting state plus any error to show.
//!
//! ## Modules
//!
//! - [`config`] - Configuration sections for every component
//! - [`federation`] - Attribute mapping and the provisioning state machine
//! - [`storage`] - Account record and storage trait
//! - [`directory`] - Directory service and LDAP backend
//! - [`home`] - Home directory and storage mount provisioning
//! - [`redirect`] - Post-provisioning redirect target
//! - [`secret`] - Credential generation

pub mod config;
pub mod directory;
pub mod error;
pub mod federation;
pub mod home;
pub mod redirect;
pub mod secret;
pub mod storage;

pub use config::{ConfigError, ShibgateConfig};
pub use directory::{
    DirectoryBackend, DirectoryError, DirectoryService, LdapBackend, PosixDirectory,
};
pub use error::{AuthError, ErrorCategory};
pub use federation::{
    AccountStatus, AttributeMapper, AttributeProtocol, CanonicalIdentity,
    ProvisioningStateMachine, RawAttributes, VisitOutcome,
};
pub use home::{HomeError, HomeProvisioningService, HttpHomeProvisioner, NoopHomeProvisioner};
pub use redirect::RedirectResolver;
pub use secret::{CredentialGenerator, RandomCredentialGenerator};
pub use storage::{Account, AccountState, AccountStorage, AttributeSnapshot, InMemoryAccountStorage};

/// Type alias for provisioning results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::error::AuthError;
    pub use crate::federation::{
        AttributeMapper, AttributeProtocol, CanonicalIdentity, ProvisioningStateMachine,
        VisitOutcome,
    };
    pub use crate::storage::{Account, AccountState, AccountStorage};
}
