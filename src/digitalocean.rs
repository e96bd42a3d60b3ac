//! DigitalOcean container registry API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::registry::{
    CreateRegistry, ProviderError, Region, Registry, RegistryProvider, SubscriptionTier,
};

/// Host serving every DigitalOcean container registry.
pub const SERVER_URL: &str = "registry.digitalocean.com";

#[derive(Error, Debug)]
pub enum Error {
    #[error("API token not found in environment variable {0}")]
    MissingToken(String),

    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("API responded with code {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Deserialize(#[from] serde_json::Error),
}

#[derive(Deserialize, Debug)]
struct RegistryEnvelope {
    registry: ApiRegistry,
}

#[derive(Deserialize, Debug)]
struct ApiRegistry {
    name: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl ApiRegistry {
    fn into_registry(self, subscription_tier: Option<SubscriptionTier>) -> Registry {
        Registry {
            name: self.name,
            server_url: SERVER_URL.to_string(),
            region: self.region,
            subscription_tier,
            created_at: self.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
struct CreateRegistryRequest<'a> {
    name: &'a str,
    subscription_tier_slug: SubscriptionTier,
    region: Region,
}

pub struct Client {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl Client {
    pub fn new(api_url: &str, token: String, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, api_url, token))
    }

    pub fn with_http(http: reqwest::Client, api_url: &str, token: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Create a client with the API token read from the environment variable `token_env`.
    pub fn from_env(api_url: &str, token_env: &str, timeout: Duration) -> Result<Self, Error> {
        let token = std::env::var(token_env)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::MissingToken(token_env.to_string()))?;
        Self::new(api_url, token, timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Read the body of a response, turning non-success codes into [Error::Api].
    async fn body(resp: reqwest::Response) -> Result<Vec<u8>, Error> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(Error::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            })
        }
    }

    async fn fetch_registry(&self, name: &str) -> Result<Option<Registry>, Error> {
        debug!("GET {}", self.url("/v2/registry"));
        let resp = self
            .http
            .get(self.url("/v2/registry"))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: RegistryEnvelope = serde_json::from_slice(&Self::body(resp).await?)?;
        if envelope.registry.name != name {
            debug!(
                "Account registry is {}, not {}",
                envelope.registry.name, name
            );
            return Ok(None);
        }
        Ok(Some(envelope.registry.into_registry(None)))
    }

    async fn post_registry(&self, request: &CreateRegistry) -> Result<Registry, Error> {
        debug!("POST {}", self.url("/v2/registry"));
        let resp = self
            .http
            .post(self.url("/v2/registry"))
            .bearer_auth(&self.token)
            .json(&CreateRegistryRequest {
                name: &request.name,
                subscription_tier_slug: request.subscription_tier,
                region: request.region,
            })
            .send()
            .await?;

        let envelope: RegistryEnvelope = serde_json::from_slice(&Self::body(resp).await?)?;
        Ok(envelope.registry.into_registry(Some(request.subscription_tier)))
    }

    async fn fetch_docker_credentials(&self, write: bool, expiry_seconds: Option<u64>) -> Result<String, Error> {
        let mut query = vec![("read_write", write.to_string())];
        if let Some(expiry_seconds) = expiry_seconds {
            query.push(("expiry_seconds", expiry_seconds.to_string()));
        }

        debug!("GET {}", self.url("/v2/registry/docker-credentials"));
        let resp = self
            .http
            .get(self.url("/v2/registry/docker-credentials"))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;

        let body = Self::body(resp).await?;
        Ok(String::from_utf8_lossy(&body).to_string())
    }
}

#[async_trait]
impl RegistryProvider for Client {
    async fn create_registry(&self, request: &CreateRegistry) -> Result<Registry, ProviderError> {
        Ok(self.post_registry(request).await?)
    }

    async fn get_registry(&self, name: &str) -> Result<Option<Registry>, ProviderError> {
        Ok(self.fetch_registry(name).await?)
    }

    /// Credentials are account wide; `name` is only used for logging.
    async fn docker_credentials(
        &self,
        name: &str,
        write: bool,
        expiry_seconds: Option<u64>,
    ) -> Result<String, ProviderError> {
        debug!("Requesting docker credentials for registry {name} (write: {write})");
        Ok(self.fetch_docker_credentials(write, expiry_seconds).await?)
    }
}
