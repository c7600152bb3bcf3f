use anyhow::{Context, Result};
use shibgate_auth::{DirectoryService, PosixDirectory, ShibgateConfig};

pub async fn run(cfg: &ShibgateConfig) -> Result<()> {
    let directory = PosixDirectory::ldap(cfg.directory.clone());
    let uid = directory
        .allocate_next_uid()
        .await
        .context("Failed to read assigned uid numbers")?;
    println!("{uid}");
    Ok(())
}
