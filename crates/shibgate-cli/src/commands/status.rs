use anyhow::Result;
use shibgate_auth::ShibgateConfig;

use crate::cli::StatusArgs;

pub async fn run(cfg: &ShibgateConfig, args: &StatusArgs) -> Result<()> {
    let machine = super::build_state_machine(cfg).await?;
    let status = machine.status(&args.persistent_id).await?;
    println!("{}", serde_json::to_string(&status)?);
    Ok(())
}
