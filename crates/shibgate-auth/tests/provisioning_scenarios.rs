//! End-to-end provisioning scenarios against in-process collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shibgate_auth::config::DirectoryConfig;
use shibgate_auth::directory::{DirectoryBackend, DirectoryError, PosixAccount, PosixDirectory};
use shibgate_auth::home::HomeProvisioningService;
use shibgate_auth::prelude::*;
use shibgate_auth::storage::{AttributeSnapshot, InMemoryAccountStorage};
use shibgate_auth::CredentialGenerator;
use time::OffsetDateTime;

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Default)]
struct RecordingBackend {
    entries: Mutex<Vec<PosixAccount>>,
    calls: Mutex<Vec<&'static str>>,
    down: AtomicBool,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, call: &'static str) -> Result<(), DirectoryError> {
        self.calls.lock().unwrap().push(call);
        if self.down.load(Ordering::SeqCst) {
            return Err(DirectoryError::Connection {
                url: "ldap://test".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryBackend for RecordingBackend {
    async fn find_account(&self, uid: &str) -> Result<bool, DirectoryError> {
        self.check("find")?;
        Ok(self.entries.lock().unwrap().iter().any(|e| e.uid == uid))
    }

    async fn assigned_uid_numbers(&self) -> Result<Vec<u32>, DirectoryError> {
        self.check("uids")?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.uid_number)
            .collect())
    }

    async fn add_account(&self, account: &PosixAccount) -> Result<(), DirectoryError> {
        self.check("add")?;
        self.entries.lock().unwrap().push(account.clone());
        Ok(())
    }
}

/// Shares one backend between the directory service and the test body.
struct SharedBackend(Arc<RecordingBackend>);

#[async_trait]
impl DirectoryBackend for SharedBackend {
    async fn find_account(&self, uid: &str) -> Result<bool, DirectoryError> {
        self.0.find_account(uid).await
    }

    async fn assigned_uid_numbers(&self) -> Result<Vec<u32>, DirectoryError> {
        self.0.assigned_uid_numbers().await
    }

    async fn add_account(&self, account: &PosixAccount) -> Result<(), DirectoryError> {
        self.0.add_account(account).await
    }
}

#[derive(Default)]
struct RecordingHome {
    homes: Mutex<Vec<String>>,
    mounts: Mutex<Vec<(String, String)>>,
    down: AtomicBool,
}

#[async_trait]
impl HomeProvisioningService for RecordingHome {
    async fn create_home_directory(&self, identifier: &str) -> AuthResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AuthError::provisioning("agent unavailable"));
        }
        let mut homes = self.homes.lock().unwrap();
        if !homes.iter().any(|h| h == identifier) {
            homes.push(identifier.to_string());
        }
        Ok(())
    }

    async fn create_storage_mount(&self, identifier: &str, secret: &str) -> AuthResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AuthError::provisioning("agent unavailable"));
        }
        self.mounts
            .lock()
            .unwrap()
            .push((identifier.to_string(), secret.to_string()));
        Ok(())
    }
}

struct CountingCredentials(AtomicUsize);

impl CredentialGenerator for CountingCredentials {
    fn generate(&self) -> String {
        let n = self.0.fetch_add(1, Ordering::SeqCst);
        format!("secret-{n}")
    }
}

struct Harness {
    store: Arc<InMemoryAccountStorage>,
    backend: Arc<RecordingBackend>,
    home: Arc<RecordingHome>,
    machine: ProvisioningStateMachine,
}

fn harness() -> Harness {
    harness_with_store(Arc::new(InMemoryAccountStorage::new()), None)
}

fn harness_with_store(
    store: Arc<InMemoryAccountStorage>,
    accounts: Option<Arc<dyn AccountStorage>>,
) -> Harness {
    let backend = Arc::new(RecordingBackend::default());
    let home = Arc::new(RecordingHome::default());
    let directory = PosixDirectory::new(SharedBackend(backend.clone()), DirectoryConfig::default());

    let machine = ProvisioningStateMachine::new(
        accounts.unwrap_or_else(|| store.clone() as Arc<dyn AccountStorage>),
        Arc::new(directory),
        home.clone(),
    )
    .with_credential_generator(Arc::new(CountingCredentials(AtomicUsize::new(0))));

    Harness {
        store,
        backend,
        home,
        machine,
    }
}

fn jo() -> CanonicalIdentity {
    CanonicalIdentity::new()
        .with("id", "42")
        .with("mail", "A@X.com")
        .with("fullname", "Jo")
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_no_consent_stays_new() {
    let h = harness();

    let outcome = h.machine.visit(&jo(), false).await.unwrap();

    assert_eq!(outcome.state(), AccountState::New);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.account.email, "a@x.com");
    assert!(outcome.account.credential_secret.is_none());
    assert!(outcome.account.terms_accepted_at.is_none());
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn scenario_b_directory_failure_stays_registered() {
    let h = harness();
    h.machine.visit(&jo(), false).await.unwrap();
    h.backend.down.store(true, Ordering::SeqCst);

    let outcome = h.machine.visit(&jo(), true).await.unwrap();

    assert_eq!(outcome.state(), AccountState::Registered);
    assert!(outcome.account.terms_accepted_at.is_some());
    assert_eq!(outcome.account.credential_secret.as_deref(), Some("secret-0"));
    assert!(matches!(outcome.error, Some(AuthError::Directory { .. })));
    assert!(h.home.homes.lock().unwrap().is_empty());

    let stored = h.store.find_by_persistent_id("42").await.unwrap().unwrap();
    assert_eq!(stored.state, AccountState::Registered);
}

#[tokio::test]
async fn scenario_c_retry_reaches_created() {
    let h = harness();
    h.backend.down.store(true, Ordering::SeqCst);
    h.machine.visit(&jo(), true).await.unwrap();

    h.backend.down.store(false, Ordering::SeqCst);
    h.backend.calls.lock().unwrap().clear();

    let outcome = h.machine.visit(&jo(), false).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.state(), AccountState::Created);
    // exists, uid allocation, add, then post-creation verification
    assert_eq!(h.backend.calls(), vec!["find", "uids", "add", "find"]);
    assert_eq!(*h.home.homes.lock().unwrap(), vec!["a@x.com".to_string()]);
    assert_eq!(
        *h.home.mounts.lock().unwrap(),
        vec![("a@x.com".to_string(), "secret-0".to_string())]
    );
}

#[tokio::test]
async fn home_failure_retries_without_duplicate_directory_entry() {
    let h = harness();
    h.home.down.store(true, Ordering::SeqCst);

    let outcome = h.machine.visit(&jo(), true).await.unwrap();
    assert_eq!(outcome.state(), AccountState::Registered);
    assert!(matches!(outcome.error, Some(AuthError::Provisioning { .. })));

    h.home.down.store(false, Ordering::SeqCst);
    let outcome = h.machine.visit(&jo(), true).await.unwrap();
    assert!(outcome.is_complete());

    assert_eq!(h.backend.entries.lock().unwrap().len(), 1);
    assert_eq!(h.backend.calls().iter().filter(|c| **c == "add").count(), 1);
}

#[tokio::test]
async fn identity_refreshed_every_visit() {
    let h = harness();
    h.machine.visit(&jo(), false).await.unwrap();

    let renamed = jo()
        .with("fullname", "Joanne")
        .with("mail", "Jo@Y.org")
        .with("location", "Hobart");
    let outcome = h.machine.visit(&renamed, false).await.unwrap();

    assert_eq!(outcome.account.display_name, "Joanne");
    assert_eq!(outcome.account.email, "jo@y.org");
    assert_eq!(
        outcome.account.raw_attributes.attributes.get("location").map(String::as_str),
        Some("Hobart")
    );
    assert_eq!(outcome.account.raw_attributes.version, AttributeSnapshot::VERSION);
}

#[tokio::test]
async fn created_without_directory_entry_is_not_healed() {
    let h = harness();
    h.machine.visit(&jo(), true).await.unwrap();
    h.backend.entries.lock().unwrap().clear();

    let outcome = h.machine.visit(&jo(), true).await.unwrap();

    assert_eq!(outcome.state(), AccountState::Created);
    let err = outcome.error.unwrap();
    assert!(matches!(err, AuthError::InconsistentState { .. }));
    assert!(err.is_operator_fault());
    assert!(h.backend.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn state_never_regresses() {
    let h = harness();
    let steps = [
        (false, false),
        (true, true),
        (false, true),
        (true, false),
        (false, false),
        (true, true),
    ];

    let mut last = AccountState::New;
    for (consent, directory_down) in steps {
        h.backend.down.store(directory_down, Ordering::SeqCst);
        let outcome = h.machine.visit(&jo(), consent).await.unwrap();
        assert!(outcome.state() >= last, "{:?} after {:?}", outcome.state(), last);
        assert!(outcome.account.is_consistent());
        last = outcome.state();
    }
    assert_eq!(last, AccountState::Created);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Store that lets a competing request win every state transition first.
struct RacingStore {
    inner: Arc<InMemoryAccountStorage>,
    registrations: AtomicUsize,
}

#[async_trait]
impl AccountStorage for RacingStore {
    async fn find_by_persistent_id(&self, id: &str) -> AuthResult<Option<Account>> {
        self.inner.find_by_persistent_id(id).await
    }

    async fn create(
        &self,
        id: &str,
        display_name: &str,
        email: &str,
        raw: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        // The competitor creates first.
        self.inner.create(id, display_name, email, raw).await?;
        self.inner.create(id, display_name, email, raw).await
    }

    async fn refresh_identity(
        &self,
        account: &Account,
        display_name: &str,
        email: &str,
        raw: &AttributeSnapshot,
    ) -> AuthResult<Account> {
        self.inner
            .refresh_identity(account, display_name, email, raw)
            .await
    }

    async fn advance_to_registered(
        &self,
        account: &Account,
        secret: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Account> {
        self.inner
            .advance_to_registered(account, "competitor", now)
            .await?;
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let result = self.inner.advance_to_registered(account, secret, now).await;
        if result.is_ok() {
            self.registrations.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn advance_to_created(&self, account: &Account) -> AuthResult<Account> {
        self.inner.advance_to_created(account).await?;
        self.inner.advance_to_created(account).await
    }
}

#[tokio::test]
async fn losing_every_race_converges() {
    let store = Arc::new(InMemoryAccountStorage::new());
    let racing = Arc::new(RacingStore {
        inner: store.clone(),
        registrations: AtomicUsize::new(0),
    });
    let h = harness_with_store(store.clone(), Some(racing.clone()));

    let outcome = h.machine.visit(&jo(), true).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(racing.registrations.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcome.account.credential_secret.as_deref(),
        Some("competitor")
    );
    // provisioning used the persisted credential, not the discarded one
    assert_eq!(
        *h.home.mounts.lock().unwrap(),
        vec![("a@x.com".to_string(), "competitor".to_string())]
    );
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_consent_visits_persist_one_credential() {
    let h = Arc::new(harness());
    h.backend.down.store(true, Ordering::SeqCst);

    let a = tokio::spawn({
        let h = h.clone();
        async move { h.machine.visit(&jo(), true).await }
    });
    let b = tokio::spawn({
        let h = h.clone();
        async move { h.machine.visit(&jo(), true).await }
    });

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.state(), AccountState::Registered);
    assert_eq!(b.state(), AccountState::Registered);
    assert_eq!(a.account.credential_secret, b.account.credential_secret);

    let stored = h.store.find_by_persistent_id("42").await.unwrap().unwrap();
    assert_eq!(stored.credential_secret, a.account.credential_secret);
    assert_eq!(h.store.len(), 1);
}
