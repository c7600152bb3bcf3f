use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use shibgate_auth::federation::flatten_claims;
use shibgate_auth::{AttributeProtocol, RawAttributes, RedirectResolver, ShibgateConfig};

use crate::cli::VisitArgs;
use crate::output::{print_error, print_field, print_success};

/// Claim under which AAF Rapid Connect nests the user's attributes.
pub const AAF_ATTRIBUTES_CLAIM: &str = "https://aaf.edu.au/attributes";

pub async fn run(cfg: &ShibgateConfig, args: &VisitArgs) -> Result<()> {
    let protocol: AttributeProtocol = args
        .protocol
        .map(Into::into)
        .unwrap_or(cfg.federation.protocol);
    let raw = read_attributes(&args.attributes)?;

    let machine = super::build_state_machine(cfg).await?;
    let outcome = match machine.handle_assertion(&protocol, &raw, args.consent).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(messages) = err.validation_messages() {
                for message in messages {
                    print_error(message);
                }
                anyhow::bail!("{} required attribute(s) missing", messages.len());
            }
            return Err(err.into());
        }
    };

    print_field("Account", &outcome.account.persistent_id);
    print_field("State", outcome.state());

    if let Some(err) = &outcome.error {
        print_error(&err.user_message());
        eprintln!("  {}", err.to_string().dimmed());
        return Ok(());
    }

    if outcome.is_complete() {
        let resolver = RedirectResolver::new(cfg.redirect.clone());
        print_success("Account provisioned");
        print_field("Redirect", resolver.resolve(args.return_path.as_deref()));
    }

    Ok(())
}

/// Reads a JSON attribute file into raw attributes.
///
/// A decoded Rapid Connect token is accepted as-is; its attribute claim is
/// unwrapped.
pub fn read_attributes(path: &Path) -> Result<RawAttributes> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as JSON", path.display()))?;
    Ok(claims_to_attributes(&value))
}

fn claims_to_attributes(value: &serde_json::Value) -> RawAttributes {
    match value.get(AAF_ATTRIBUTES_CLAIM) {
        Some(nested) => flatten_claims(nested),
        None => flatten_claims(value),
    }
}
