//! Provisioning error types.
//!
//! This module defines every error that can leave the provisioning core.
//! Internal races (`AlreadyExists`, `StaleState`) are produced by storage
//! backends and absorbed by the state machine; the rest reach the caller.

use std::fmt;

use crate::storage::AccountState;

/// Errors that can occur while mapping an assertion or provisioning an account.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// One or more required canonical attributes are missing.
    ///
    /// `errors` holds one user-facing message per missing field, sorted.
    #[error("Validation failed: {}", errors.join(" "))]
    Validation {
        /// Sorted, human-readable messages.
        errors: Vec<String>,
    },

    /// An account with this persistent id was created concurrently.
    #[error("Account already exists: {persistent_id}")]
    AlreadyExists {
        /// The persistent id that collided.
        persistent_id: String,
    },

    /// The persisted state no longer matches the expected one at commit time.
    #[error("Stale account state: expected {expected}, found {actual}")]
    StaleState {
        /// The state the transition required.
        expected: AccountState,
        /// The state found in storage.
        actual: AccountState,
    },

    /// The external directory call failed.
    #[error("Directory error: {message}")]
    Directory {
        /// Diagnostic from the directory client.
        message: String,
    },

    /// Home directory or storage mount provisioning failed.
    #[error("Provisioning error: {message}")]
    Provisioning {
        /// Diagnostic from the provisioning client.
        message: String,
    },

    /// A CREATED account has no matching directory entry.
    #[error("Inconsistent account state: {message}")]
    InconsistentState {
        /// Description of the inconsistency.
        message: String,
    },

    /// An error occurred while storing or retrieving account data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Validation` error from unsorted messages.
    ///
    /// The messages are sorted so the rendered list is reproducible.
    #[must_use]
    pub fn validation(mut errors: Vec<String>) -> Self {
        errors.sort();
        Self::Validation { errors }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(persistent_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            persistent_id: persistent_id.into(),
        }
    }

    /// Creates a new `StaleState` error.
    #[must_use]
    pub fn stale_state(expected: AccountState, actual: AccountState) -> Self {
        Self::StaleState { expected, actual }
    }

    /// Creates a new `Directory` error.
    #[must_use]
    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory {
            message: message.into(),
        }
    }

    /// Creates a new `Provisioning` error.
    #[must_use]
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }

    /// Creates a new `InconsistentState` error.
    #[must_use]
    pub fn inconsistent_state(message: impl Into<String>) -> Self {
        Self::InconsistentState {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for concurrency races the state machine absorbs.
    #[must_use]
    pub fn is_race(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. } | Self::StaleState { .. })
    }

    /// Returns `true` if an external service call failed.
    ///
    /// These are retried by the next visit.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(self, Self::Directory { .. } | Self::Provisioning { .. })
    }

    /// Returns `true` if this needs operator attention rather than a retry.
    #[must_use]
    pub fn is_operator_fault(&self) -> bool {
        matches!(
            self,
            Self::InconsistentState { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns the missing-field messages for a validation error.
    #[must_use]
    pub fn validation_messages(&self) -> Option<&[String]> {
        match self {
            Self::Validation { errors } => Some(errors),
            _ => None,
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::AlreadyExists { .. } => ErrorCategory::Concurrency,
            Self::StaleState { .. } => ErrorCategory::Concurrency,
            Self::Directory { .. } => ErrorCategory::External,
            Self::Provisioning { .. } => ErrorCategory::External,
            Self::InconsistentState { .. } => ErrorCategory::Consistency,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the message shown to the end user.
    ///
    /// External failures share one generic retry message; diagnostics stay in
    /// the logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { errors } => errors.join("\n"),
            Self::Directory { .. } | Self::Provisioning { .. } => {
                "Account provisioning failed and will be retried on your next sign-in.".to_string()
            }
            Self::InconsistentState { .. } => {
                "Incomplete user creation error".to_string()
            }
            _ => "An internal error has occurred and has been logged.".to_string(),
        }
    }
}

/// Categories of provisioning errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed assertion attributes.
    Validation,
    /// Concurrent request races.
    Concurrency,
    /// Directory or home provisioning service failures.
    External,
    /// Local and external records disagree.
    Consistency,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Concurrency => write!(f, "concurrency"),
            Self::External => write!(f, "external"),
            Self::Consistency => write!(f, "consistency"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
