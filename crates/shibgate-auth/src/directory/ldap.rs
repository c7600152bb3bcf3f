//! LDAP directory backend.
//!
//! Opens one connection per operation and unbinds afterwards; provisioning
//! touches the directory a handful of times per account, so pooling is not
//! worth the stale-connection handling.

use std::collections::HashSet;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, ldap_escape};

use super::{DirectoryBackend, DirectoryError, PosixAccount};
use crate::config::DirectoryConfig;

const LDAP_SUCCESS: u32 = 0;
const LDAP_INVALID_CREDENTIALS: u32 = 49;
const LDAP_ALREADY_EXISTS: u32 = 68;

/// Search filter matching a POSIX account by login.
#[must_use]
pub fn account_filter(uid: &str) -> String {
    format!("(&(uid={})(objectClass=posixAccount))", ldap_escape(uid))
}

/// Search filter matching every POSIX account with a uid number.
pub const UID_NUMBER_FILTER: &str = "(&(uidNumber=*)(objectClass=posixAccount))";

/// Directory backend speaking LDAP via `ldap3`.
#[derive(Debug, Clone)]
pub struct LdapBackend {
    config: DirectoryConfig,
}

impl LdapBackend {
    /// Creates a backend; no connection is made until the first operation.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        let url = &self.config.url;
        tracing::debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.timeout)
            .set_starttls(self.config.starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| DirectoryError::Connection {
                url: url.clone(),
                message: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!(error = %e, "LDAP connection driver error");
            }
        });

        let result = ldap
            .with_timeout(self.config.timeout)
            .simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .map_err(|e| DirectoryError::Connection {
                url: url.clone(),
                message: e.to_string(),
            })?;

        if result.rc != LDAP_SUCCESS {
            let message = if result.rc == LDAP_INVALID_CREDENTIALS {
                "invalid credentials".to_string()
            } else {
                result.text
            };
            return Err(DirectoryError::Bind {
                bind_dn: self.config.bind_dn.clone(),
                rc: result.rc,
                message,
            });
        }

        Ok(ldap)
    }

    async fn search(
        &self,
        ldap: &mut Ldap,
        filter: &str,
        attrs: Vec<&str>,
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        let (entries, _) = ldap
            .with_timeout(self.config.timeout)
            .search(&self.config.user_base_dn, Scope::Subtree, filter, attrs)
            .await
            .map_err(|e| DirectoryError::operation("search", e))?
            .success()
            .map_err(|e| DirectoryError::operation("search", e))?;

        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    async fn close(ldap: &mut Ldap) {
        if let Err(e) = ldap.unbind().await {
            tracing::warn!(error = %e, "Error during LDAP unbind");
        }
    }
}

#[async_trait]
impl DirectoryBackend for LdapBackend {
    #[tracing::instrument(skip(self))]
    async fn find_account(&self, uid: &str) -> Result<bool, DirectoryError> {
        let mut ldap = self.connect().await?;
        let result = self.search(&mut ldap, &account_filter(uid), vec!["uid"]).await;
        Self::close(&mut ldap).await;

        let entries = result?;
        if entries.len() > 1 {
            tracing::warn!(
                uid = %uid,
                count = entries.len(),
                "Multiple directory entries for login"
            );
        }
        Ok(!entries.is_empty())
    }

    #[tracing::instrument(skip(self))]
    async fn assigned_uid_numbers(&self) -> Result<Vec<u32>, DirectoryError> {
        let mut ldap = self.connect().await?;
        let result = self
            .search(&mut ldap, UID_NUMBER_FILTER, vec!["uidNumber"])
            .await;
        Self::close(&mut ldap).await;

        let mut ids = Vec::new();
        for entry in result? {
            for value in entry.attrs.get("uidNumber").into_iter().flatten() {
                let id = value.parse::<u32>().map_err(|_| DirectoryError::Malformed {
                    dn: entry.dn.clone(),
                    attribute: "uidNumber".to_string(),
                    value: value.clone(),
                })?;
                ids.push(id);
            }
        }
        Ok(ids)
    }

    #[tracing::instrument(skip(self, account), fields(dn = %account.dn))]
    async fn add_account(&self, account: &PosixAccount) -> Result<(), DirectoryError> {
        let attributes = account.attributes();
        let entry: Vec<(&str, HashSet<&str>)> = attributes
            .iter()
            .map(|(name, values)| (*name, values.iter().map(String::as_str).collect()))
            .collect();

        let mut ldap = self.connect().await?;
        let result = ldap
            .with_timeout(self.config.timeout)
            .add(&account.dn, entry)
            .await
            .map_err(|e| DirectoryError::operation("add", e));
        Self::close(&mut ldap).await;

        let result = result?;
        match result.rc {
            LDAP_SUCCESS => Ok(()),
            LDAP_ALREADY_EXISTS => {
                tracing::debug!(dn = %account.dn, "Entry created concurrently");
                Ok(())
            }
            rc => Err(DirectoryError::operation(
                "add",
                format!("rc={rc}: {}", result.text),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_filter() {
        assert_eq!(
            account_filter("a@x.com"),
            "(&(uid=a@x.com)(objectClass=posixAccount))"
        );
        assert_eq!(
            account_filter("*"),
            "(&(uid=\\2a)(objectClass=posixAccount))"
        );
        assert_eq!(
            account_filter("a)(uid=*"),
            "(&(uid=a\\29\\28uid=\\2a)(objectClass=posixAccount))"
        );
        assert_eq!(
            account_filter("back\\slash\0"),
            "(&(uid=back\\5cslash\\00)(objectClass=posixAccount))"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = DirectoryConfig {
            url: "ldap://127.0.0.1:1".to_string(),
            timeout: std::time::Duration::from_millis(500),
            ..DirectoryConfig::default()
        };
        let backend = LdapBackend::new(config);

        let err = backend.find_account("a@x.com").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Connection { .. }));
    }
}
