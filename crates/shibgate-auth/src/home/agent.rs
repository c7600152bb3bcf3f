//! HTTP client for the home provisioning agent.
//!
//! The agent runs on the storage host and exposes two resources per user:
//!
//! - `GET|PUT {base}/homes/{identifier}` for the home directory
//! - `GET|PUT {base}/mounts/{identifier}` for the storage mount; the PUT body
//!   is `{"secret": "..."}`
//!
//! `GET` returns 200 when the resource exists and 404 when it does not. Each
//! operation checks first and only creates what is missing.

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use super::{HomeError, HomeProvisioningService};
use crate::AuthResult;
use crate::config::HomeConfig;

const MAX_ERROR_BODY: usize = 512;

/// [`HomeProvisioningService`] backed by the provisioning agent's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpHomeProvisioner {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpHomeProvisioner {
    /// Creates a client for the agent at `config.agent_url`.
    ///
    /// # Errors
    ///
    /// Returns `HomeError` if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(config: &HomeConfig) -> Result<Self, HomeError> {
        let base_url =
            Url::parse(&config.agent_url).map_err(|e| HomeError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(HomeError::InvalidUrl(config.agent_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HomeError::Transport {
                url: config.agent_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn resource_url(&self, collection: &str, identifier: &str) -> Result<Url, HomeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| HomeError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(collection)
            .push(identifier);
        Ok(url)
    }

    async fn resource_exists(
        &self,
        url: &Url,
        operation: &'static str,
        identifier: &str,
    ) -> Result<bool, HomeError> {
        let response = self
            .http_client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(rejected(operation, identifier, status, response).await),
        }
    }

    async fn ensure(
        &self,
        collection: &str,
        operation: &'static str,
        identifier: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), HomeError> {
        let url = self.resource_url(collection, identifier)?;

        if self.resource_exists(&url, operation, identifier).await? {
            tracing::debug!(identifier = %identifier, operation, "Already provisioned");
            return Ok(());
        }

        let mut request = self.http_client.put(url.as_str());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| transport(&url, e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            tracing::info!(identifier = %identifier, operation, "Provisioned");
            Ok(())
        } else {
            Err(rejected(operation, identifier, status, response).await)
        }
    }
}

fn transport(url: &Url, err: reqwest::Error) -> HomeError {
    tracing::warn!(url = %url, error = %err, "Provisioning agent request failed");
    HomeError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

async fn rejected(
    operation: &'static str,
    identifier: &str,
    status: StatusCode,
    response: reqwest::Response,
) -> HomeError {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    HomeError::Rejected {
        operation,
        identifier: identifier.to_string(),
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl HomeProvisioningService for HttpHomeProvisioner {
    #[tracing::instrument(skip(self))]
    async fn create_home_directory(&self, identifier: &str) -> AuthResult<()> {
        Ok(self.ensure("homes", "create home", identifier, None).await?)
    }

    #[tracing::instrument(skip(self, secret))]
    async fn create_storage_mount(&self, identifier: &str, secret: &str) -> AuthResult<()> {
        let body = serde_json::json!({ "secret": secret });
        Ok(self
            .ensure("mounts", "create mount", identifier, Some(body))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provisioner(server: &MockServer) -> HttpHomeProvisioner {
        let config = HomeConfig {
            enabled: true,
            agent_url: server.uri(),
            timeout: Duration::from_secs(2),
        };
        HttpHomeProvisioner::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_home() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/homes/a@x.com"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/homes/a@x.com"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        provisioner(&server)
            .create_home_directory("a@x.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_existing_home_is_not_recreated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/homes/a@x.com"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        provisioner(&server)
            .create_home_directory("a@x.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mount_sends_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mounts/a@x.com"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/mounts/a@x.com"))
            .and(body_json(serde_json::json!({"secret": "s3cret"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        provisioner(&server)
            .create_storage_mount("a@x.com", "s3cret")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creation_conflict_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        provisioner(&server)
            .create_home_directory("a@x.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_agent_failure_is_provisioning_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let err = provisioner(&server)
            .create_home_directory("a@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::AuthError::Provisioning { .. }));
        assert!(err.to_string().contains("quota exceeded"));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_provisioning_error() {
        let config = HomeConfig {
            enabled: true,
            agent_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(500),
        };
        let err = HttpHomeProvisioner::new(&config)
            .unwrap()
            .create_home_directory("a@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::AuthError::Provisioning { .. }));
    }

    #[test]
    fn test_invalid_agent_url() {
        let config = HomeConfig {
            agent_url: "not a url".to_string(),
            ..HomeConfig::default()
        };
        assert!(matches!(
            HttpHomeProvisioner::new(&config),
            Err(HomeError::InvalidUrl(_))
        ));
    }
}
