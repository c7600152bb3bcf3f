pub mod check_config;
pub mod next_uid;
pub mod status;
pub mod visit;

use std::sync::Arc;

use anyhow::{Context, Result};
use shibgate_auth::{
    AccountStorage, HomeProvisioningService, HttpHomeProvisioner, InMemoryAccountStorage,
    NoopHomeProvisioner, PosixDirectory, ProvisioningStateMachine, RandomCredentialGenerator,
    ShibgateConfig,
};
use shibgate_auth_postgres::PostgresStorage;

use crate::output::print_warning;

/// Opens account storage: PostgreSQL when configured, in-memory otherwise.
pub async fn open_storage(cfg: &ShibgateConfig) -> Result<Arc<dyn AccountStorage>> {
    if cfg.storage.postgres_url.is_none() {
        print_warning("storage.postgres_url is not set, account records are kept in memory");
        let store: Arc<dyn AccountStorage> = Arc::new(InMemoryAccountStorage::new());
        return Ok(store);
    }

    let storage = PostgresStorage::connect(&cfg.storage)
        .await
        .context("Failed to connect to PostgreSQL")?;
    storage
        .ensure_schema()
        .await
        .context("Failed to create account schema")?;
    let store: Arc<dyn AccountStorage> = Arc::new(storage.account_storage());
    Ok(store)
}

/// Wires the provisioning state machine from configuration.
pub async fn build_state_machine(cfg: &ShibgateConfig) -> Result<ProvisioningStateMachine> {
    let accounts = open_storage(cfg).await?;
    let directory = Arc::new(PosixDirectory::ldap(cfg.directory.clone()));

    let home: Arc<dyn HomeProvisioningService> = if cfg.home.enabled {
        Arc::new(HttpHomeProvisioner::new(&cfg.home).context("Failed to build home agent client")?)
    } else {
        Arc::new(NoopHomeProvisioner)
    };

    let credentials = Arc::new(RandomCredentialGenerator::new(cfg.account.credential_bytes));

    Ok(ProvisioningStateMachine::new(accounts, directory, home)
        .with_credential_generator(credentials))
}
