use std::path::Path;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use shibgate_auth::ShibgateConfig;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "shibgate.toml";

/// Loads configuration from an optional TOML file plus `SHIBGATE__*` env vars.
///
/// Env vars use `__` as the section separator, e.g.
/// `SHIBGATE__DIRECTORY__BIND_PASSWORD`.
pub fn load_config(path: Option<&Path>) -> Result<ShibgateConfig> {
    let mut builder = Config::builder();

    match path {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            builder = builder.add_source(File::from(path));
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                builder = builder.add_source(File::from(default));
            }
        }
    }

    let cfg: ShibgateConfig = builder
        .add_source(
            Environment::with_prefix("SHIBGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[federation]
protocol = "rapid-connect"

[directory]
url = "ldaps://ldap.example.org"
user_base_dn = "ou=People,dc=example,dc=org"
uid_floor = 5000

[redirect]
default_target = "https://portal.example.org/"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.directory.url, "ldaps://ldap.example.org");
        assert_eq!(cfg.directory.uid_floor, 5000);
        assert_eq!(cfg.redirect.default_target, "https://portal.example.org/");
        assert_eq!(
            cfg.federation.protocol,
            shibgate_auth::AttributeProtocol::RapidConnect
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[directory]
url = "http://not-ldap.example.org"
"#
        )
        .unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }
}
