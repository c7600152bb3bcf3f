use anyhow::Result;
use shibgate_auth::ShibgateConfig;

use crate::output::{print_field, print_success};

/// Prints a summary of the already-validated configuration. Secrets are never shown.
pub fn run(cfg: &ShibgateConfig) -> Result<()> {
    print_success("Configuration is valid");
    print_field("Protocol", cfg.federation.protocol);
    print_field("Directory", &cfg.directory.url);
    print_field("User base DN", &cfg.directory.user_base_dn);
    print_field("Uid floor", cfg.directory.uid_floor);
    if cfg.home.enabled {
        print_field("Home agent", &cfg.home.agent_url);
    } else {
        print_field("Home agent", "(disabled)");
    }
    print_field("Redirect", &cfg.redirect.default_target);
    if !cfg.redirect.allowed_hosts.is_empty() {
        print_field("Allowed hosts", cfg.redirect.allowed_hosts.join(", "));
    }
    print_field(
        "Storage",
        if cfg.storage.postgres_url.is_some() {
            "postgres"
        } else {
            "memory"
        },
    );
    Ok(())
}
