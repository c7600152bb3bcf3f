//! Post-provisioning redirect target.

use url::Url;

use crate::config::RedirectConfig;

/// Picks the destination: a non-empty override verbatim, otherwise the default.
#[must_use]
pub fn resolve(default_target: &str, override_value: &str) -> String {
    if override_value.is_empty() {
        default_target.to_string()
    } else {
        override_value.to_string()
    }
}

/// Resolves return paths against configured policy.
///
/// With an empty `allowed_hosts` list every override is accepted as-is.
/// Otherwise an override is used only when it parses as an absolute URL
/// whose host is listed; anything else falls back to the default target.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    config: RedirectConfig,
}

impl RedirectResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(config: RedirectConfig) -> Self {
        Self { config }
    }

    /// The default target.
    #[must_use]
    pub fn default_target(&self) -> &str {
        &self.config.default_target
    }

    /// Resolves an optional return-path query value.
    #[must_use]
    pub fn resolve(&self, override_value: Option<&str>) -> String {
        let candidate = override_value.unwrap_or_default();
        if candidate.is_empty() || self.is_allowed(candidate) {
            return resolve(&self.config.default_target, candidate);
        }

        tracing::warn!(
            return_path = %candidate,
            "Return path host not in allowed list, using default"
        );
        self.config.default_target.clone()
    }

    fn is_allowed(&self, candidate: &str) -> bool {
        if self.config.allowed_hosts.is_empty() {
            return true;
        }

        Url::parse(candidate)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| {
                self.config
                    .allowed_hosts
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(&host))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("https://portal/", ""), "https://portal/");
        assert_eq!(
            resolve("https://portal/", "https://other/x"),
            "https://other/x"
        );
    }

    #[test]
    fn test_permissive_by_default() {
        let resolver = RedirectResolver::new(RedirectConfig {
            default_target: "https://portal/".to_string(),
            allowed_hosts: Vec::new(),
        });

        assert_eq!(resolver.resolve(None), "https://portal/");
        assert_eq!(resolver.resolve(Some("")), "https://portal/");
        assert_eq!(
            resolver.resolve(Some("https://evil.example/x")),
            "https://evil.example/x"
        );
        assert_eq!(resolver.resolve(Some("/relative")), "/relative");
    }

    #[test]
    fn test_allowed_hosts() {
        let resolver = RedirectResolver::new(RedirectConfig {
            default_target: "https://portal/".to_string(),
            allowed_hosts: vec!["Docs.Example.org".to_string()],
        });

        assert_eq!(
            resolver.resolve(Some("https://docs.example.org/guide")),
            "https://docs.example.org/guide"
        );
        assert_eq!(
            resolver.resolve(Some("https://evil.example/x")),
            "https://portal/"
        );
        assert_eq!(resolver.resolve(Some("/relative")), "https://portal/");
        assert_eq!(resolver.resolve(None), "https://portal/");
    }
}
