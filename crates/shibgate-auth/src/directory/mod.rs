//! External account directory.
//!
//! [`DirectoryService`] is what the provisioning state machine talks to.
//! [`PosixDirectory`] implements it on top of a thin [`DirectoryBackend`]
//! that only knows how to search and add entries, keeping the
//! exists-before-create rule and uid allocation out of the wire client.

pub mod ldap;

use async_trait::async_trait;

use crate::config::DirectoryConfig;
use crate::{AuthError, AuthResult};

pub use ldap::{LdapBackend, account_filter};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by a directory backend.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Could not reach the directory server.
    #[error("connection to {url} failed: {message}")]
    Connection {
        /// Server URL.
        url: String,
        /// Client diagnostic.
        message: String,
    },

    /// The administrative bind was rejected.
    #[error("bind as '{bind_dn}' failed (rc={rc}): {message}")]
    Bind {
        /// DN used for the bind.
        bind_dn: String,
        /// LDAP result code.
        rc: u32,
        /// Server diagnostic.
        message: String,
    },

    /// A search or add failed.
    #[error("{operation} failed: {message}")]
    Operation {
        /// What was attempted.
        operation: String,
        /// Client or server diagnostic.
        message: String,
    },

    /// An entry carried a malformed attribute.
    #[error("malformed {attribute} on {dn}: '{value}'")]
    Malformed {
        /// Entry DN.
        dn: String,
        /// Attribute name.
        attribute: String,
        /// Offending value.
        value: String,
    },
}

impl DirectoryError {
    /// Creates an `Operation` error.
    #[must_use]
    pub fn operation(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        AuthError::directory(err.to_string())
    }
}

// =============================================================================
// POSIX Entry
// =============================================================================

/// Object classes of every created entry.
pub const POSIX_OBJECT_CLASSES: [&str; 4] = ["top", "account", "posixAccount", "shadowAccount"];

/// A POSIX account entry ready to be added to the directory.
#[derive(Clone, PartialEq, Eq)]
pub struct PosixAccount {
    /// Distinguished name, `uid=<mail>,<base>` with the mail RFC 4514 escaped.
    pub dn: String,
    /// Login name (the account's email).
    pub uid: String,
    /// Display name, used for `cn`, `description` and `gecos`.
    pub display_name: String,
    /// Allocated uid number.
    pub uid_number: u32,
    /// Configured group id.
    pub gid_number: u32,
    /// Home directory path.
    pub home_directory: String,
    /// Login shell.
    pub login_shell: String,
    /// Initial password.
    pub user_password: String,
}

impl PosixAccount {
    /// Builds the entry for `identifier` from directory configuration.
    #[must_use]
    pub fn build(
        config: &DirectoryConfig,
        identifier: &str,
        display_name: &str,
        secret: &str,
        uid_number: u32,
    ) -> Self {
        Self {
            dn: format!("uid={},{}", ldap3::dn_escape(identifier), config.user_base_dn),
            uid: identifier.to_string(),
            display_name: display_name.to_string(),
            uid_number,
            gid_number: config.gid_number,
            home_directory: format!(
                "{}/{identifier}",
                config.home_prefix.trim_end_matches('/')
            ),
            login_shell: config.login_shell.clone(),
            user_password: secret.to_string(),
        }
    }

    /// Attribute list in the shape LDAP add operations take.
    #[must_use]
    pub fn attributes(&self) -> Vec<(&'static str, Vec<String>)> {
        vec![
            (
                "objectClass",
                POSIX_OBJECT_CLASSES.iter().map(|c| c.to_string()).collect(),
            ),
            ("cn", vec![self.display_name.clone()]),
            ("uid", vec![self.uid.clone()]),
            ("uidNumber", vec![self.uid_number.to_string()]),
            ("gidNumber", vec![self.gid_number.to_string()]),
            ("homeDirectory", vec![self.home_directory.clone()]),
            ("loginShell", vec![self.login_shell.clone()]),
            ("description", vec![self.display_name.clone()]),
            ("gecos", vec![self.display_name.clone()]),
            ("userPassword", vec![self.user_password.clone()]),
        ]
    }
}

impl std::fmt::Debug for PosixAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosixAccount")
            .field("dn", &self.dn)
            .field("uid_number", &self.uid_number)
            .field("gid_number", &self.gid_number)
            .field("home_directory", &self.home_directory)
            .field("user_password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Directory operations used by the provisioning state machine.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Returns `true` if a POSIX account with this login exists.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Directory` if the lookup fails.
    async fn exists(&self, identifier: &str) -> AuthResult<bool>;

    /// Returns the lowest unassigned uid number at or above the floor.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Directory` if assigned ids cannot be listed.
    async fn allocate_next_uid(&self) -> AuthResult<u32>;

    /// Creates the account unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Directory` with the diagnostic. Never retried here.
    async fn create_account(
        &self,
        identifier: &str,
        display_name: &str,
        secret: &str,
    ) -> AuthResult<()>;
}

/// Raw directory access.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Returns `true` if a POSIX entry with this `uid` exists.
    async fn find_account(&self, uid: &str) -> Result<bool, DirectoryError>;

    /// Lists every assigned `uidNumber`.
    async fn assigned_uid_numbers(&self) -> Result<Vec<u32>, DirectoryError>;

    /// Adds an entry. An entry already present counts as success.
    async fn add_account(&self, account: &PosixAccount) -> Result<(), DirectoryError>;
}

/// Returns the first value at or above `floor` not present in `assigned`.
#[must_use]
pub fn next_free_uid(assigned: impl IntoIterator<Item = u32>, floor: u32) -> u32 {
    let mut ids: Vec<u32> = assigned.into_iter().filter(|id| *id >= floor).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut candidate = floor;
    for id in ids {
        if id != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

// =============================================================================
// POSIX Directory
// =============================================================================

/// [`DirectoryService`] creating POSIX accounts through a backend.
pub struct PosixDirectory<B> {
    backend: B,
    config: DirectoryConfig,
}

impl<B: DirectoryBackend> PosixDirectory<B> {
    /// Creates a directory service over `backend`.
    #[must_use]
    pub fn new(backend: B, config: DirectoryConfig) -> Self {
        Self { backend, config }
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl PosixDirectory<LdapBackend> {
    /// Creates a directory service backed by LDAP.
    #[must_use]
    pub fn ldap(config: DirectoryConfig) -> Self {
        Self::new(LdapBackend::new(config.clone()), config)
    }
}

#[async_trait]
impl<B: DirectoryBackend> DirectoryService for PosixDirectory<B> {
    #[tracing::instrument(skip(self))]
    async fn exists(&self, identifier: &str) -> AuthResult<bool> {
        Ok(self.backend.find_account(identifier).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn allocate_next_uid(&self) -> AuthResult<u32> {
        let assigned = self.backend.assigned_uid_numbers().await?;
        let uid = next_free_uid(assigned, self.config.uid_floor);
        tracing::debug!(uid_number = uid, "Allocated uid number");
        Ok(uid)
    }

    #[tracing::instrument(skip(self, secret))]
    async fn create_account(
        &self,
        identifier: &str,
        display_name: &str,
        secret: &str,
    ) -> AuthResult<()> {
        if self.exists(identifier).await? {
            tracing::warn!(identifier = %identifier, "Directory account already exists");
            return Ok(());
        }

        let uid_number = self.allocate_next_uid().await?;
        let entry = PosixAccount::build(&self.config, identifier, display_name, secret, uid_number);
        self.backend.add_account(&entry).await?;

        tracing::info!(
            dn = %entry.dn,
            uid_number = entry.uid_number,
            "Directory account created"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockBackend {
        entries: Mutex<Vec<PosixAccount>>,
        extra_uids: Vec<u32>,
        adds: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl DirectoryBackend for MockBackend {
        async fn find_account(&self, uid: &str) -> Result<bool, DirectoryError> {
            if self.fail {
                return Err(DirectoryError::operation("search", "server down"));
            }
            Ok(self.entries.lock().unwrap().iter().any(|e| e.uid == uid))
        }

        async fn assigned_uid_numbers(&self) -> Result<Vec<u32>, DirectoryError> {
            let mut ids: Vec<u32> = self
                .entries
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.uid_number)
                .collect();
            ids.extend(&self.extra_uids);
            Ok(ids)
        }

        async fn add_account(&self, account: &PosixAccount) -> Result<(), DirectoryError> {
            *self.adds.lock().unwrap() += 1;
            self.entries.lock().unwrap().push(account.clone());
            Ok(())
        }
    }

    #[test]
    fn test_next_free_uid() {
        assert_eq!(next_free_uid([2000, 2001, 2003], 2000), 2002);
        assert_eq!(next_free_uid([], 2000), 2000);
        assert_eq!(next_free_uid(2000..=2050, 2000), 2051);
    }

    #[test]
    fn test_next_free_uid_ignores_below_floor_and_duplicates() {
        assert_eq!(next_free_uid([0, 100, 1999], 2000), 2000);
        assert_eq!(next_free_uid([2001, 2000, 2000, 2001], 2000), 2002);
        assert_eq!(next_free_uid([2001, 2002], 2000), 2000);
    }

    #[test]
    fn test_posix_entry_layout() {
        let config = DirectoryConfig {
            user_base_dn: "ou=People,dc=x".to_string(),
            gid_number: 500,
            home_prefix: "/home/".to_string(),
            ..DirectoryConfig::default()
        };
        let entry = PosixAccount::build(&config, "a@x.com", "Jo", "s3cret", 2002);

        assert_eq!(entry.dn, "uid=a@x.com,ou=People,dc=x");
        assert_eq!(entry.home_directory, "/home/a@x.com");

        let attrs = entry.attributes();
        let get = |name: &str| attrs.iter().find(|(n, _)| *n == name).unwrap().1.clone();
        assert_eq!(get("objectClass").len(), 4);
        assert_eq!(get("uidNumber"), vec!["2002"]);
        assert_eq!(get("gidNumber"), vec!["500"]);
        assert_eq!(get("gecos"), vec!["Jo"]);
        assert_eq!(get("loginShell"), vec!["/bin/bash"]);
        assert!(!format!("{entry:?}").contains("s3cret"));
    }

    #[test]
    fn test_dn_escapes_special_characters() {
        let config = DirectoryConfig {
            user_base_dn: "ou=People,dc=x".to_string(),
            ..DirectoryConfig::default()
        };
        let dn = |mail: &str| PosixAccount::build(&config, mail, "Jo", "s", 2000).dn;

        assert_eq!(dn("jo+tag@x.com"), "uid=jo\\2btag@x.com,ou=People,dc=x");
        assert_eq!(dn("a,b=c@x.com"), "uid=a\\2cb\\3dc@x.com,ou=People,dc=x");
        assert_eq!(dn("#a@x.com"), "uid=\\23a@x.com,ou=People,dc=x");
        assert_eq!(dn("a#b@x.com"), "uid=a#b@x.com,ou=People,dc=x");

        let entry = PosixAccount::build(&config, "jo+tag@x.com", "Jo", "s", 2000);
        assert_eq!(entry.uid, "jo+tag@x.com");
        assert_eq!(entry.home_directory, "/home/jo+tag@x.com");
    }

    #[tokio::test]
    async fn test_create_account_is_idempotent() {
        let directory = PosixDirectory::new(MockBackend::default(), DirectoryConfig::default());

        directory.create_account("a@x.com", "Jo", "s").await.unwrap();
        directory.create_account("a@x.com", "Jo", "s").await.unwrap();

        assert_eq!(*directory.backend().adds.lock().unwrap(), 1);
        assert!(directory.exists("a@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_account_allocates_next_uid() {
        let backend = MockBackend {
            extra_uids: vec![2000, 2001, 2003],
            ..MockBackend::default()
        };
        let directory = PosixDirectory::new(backend, DirectoryConfig::default());

        directory.create_account("b@x.com", "Bo", "s").await.unwrap();
        let entries = directory.backend().entries.lock().unwrap();
        assert_eq!(entries[0].uid_number, 2002);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_as_directory_error() {
        let backend = MockBackend {
            fail: true,
            ..MockBackend::default()
        };
        let directory = PosixDirectory::new(backend, DirectoryConfig::default());

        let err = directory.create_account("a@x.com", "Jo", "s").await.unwrap_err();
        assert!(matches!(err, AuthError::Directory { .. }));
        assert!(err.to_string().contains("server down"));
        assert_eq!(*directory.backend().adds.lock().unwrap(), 0);
    }
}
