//! Home directory and storage mount provisioning.
//!
//! Both operations run only after the directory account exists and must be
//! safe to repeat: a failed visit retries the whole sequence.

pub mod agent;

use async_trait::async_trait;

use crate::{AuthError, AuthResult};

pub use agent::HttpHomeProvisioner;

/// Errors raised by a home provisioning backend.
#[derive(Debug, thiserror::Error)]
pub enum HomeError {
    /// The agent could not be reached or timed out.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Target URL.
        url: String,
        /// Client diagnostic.
        message: String,
    },

    /// The agent answered with an unexpected status.
    #[error("{operation} for {identifier} returned {status}: {body}")]
    Rejected {
        /// What was attempted.
        operation: &'static str,
        /// Account identifier.
        identifier: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The agent URL could not be built.
    #[error("invalid agent url: {0}")]
    InvalidUrl(String),
}

impl From<HomeError> for AuthError {
    fn from(err: HomeError) -> Self {
        AuthError::provisioning(err.to_string())
    }
}

/// Per-user resources provisioned after the directory account.
#[async_trait]
pub trait HomeProvisioningService: Send + Sync {
    /// Ensures the home directory for `identifier` exists.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Provisioning` with the diagnostic.
    async fn create_home_directory(&self, identifier: &str) -> AuthResult<()>;

    /// Ensures the storage mount for `identifier` exists, using `secret`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Provisioning` with the diagnostic.
    async fn create_storage_mount(&self, identifier: &str, secret: &str) -> AuthResult<()>;
}

/// Provisioner that does nothing, for deployments without home storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHomeProvisioner;

#[async_trait]
impl HomeProvisioningService for NoopHomeProvisioner {
    async fn create_home_directory(&self, identifier: &str) -> AuthResult<()> {
        tracing::debug!(identifier = %identifier, "Home provisioning disabled");
        Ok(())
    }

    async fn create_storage_mount(&self, _identifier: &str, _secret: &str) -> AuthResult<()> {
        Ok(())
    }
}
