//! Registry write credentials.
//!
//! The provider hands out credentials as a docker `config.json` document.
//! The image builder needs them as a plain server/username/password triple.

use base64::Engine;
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use thiserror::Error;

use crate::registry::{ProviderError, Registry, RegistryProvider};

#[derive(Error, Debug)]
pub enum Error {
    #[error("request credentials for registry {registry}: {err}")]
    Provider { err: ProviderError, registry: String },

    #[error("credentials are not a docker config document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credentials contain no registry servers")]
    NoServers,

    #[error("credentials contain more than one registry server: {}", .0.join(", "))]
    AmbiguousServers(Vec<String>),

    #[error("auth for {server} is not valid base64: {err}")]
    Base64 {
        err: base64::DecodeError,
        server: String,
    },

    #[error("auth for {server} is not valid UTF-8")]
    Utf8 { server: String },
}

/// Opaque credentials document, scoped to one registry.
#[derive(Clone)]
pub struct RegistryCredentials {
    registry_name: String,
    payload: String,
}

impl RegistryCredentials {
    pub fn new(registry_name: &str, payload: String) -> Self {
        Self {
            registry_name: registry_name.to_string(),
            payload,
        }
    }

    pub fn registry_name(&self) -> &str {
        &self.registry_name
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl Debug for RegistryCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("registry_name", &self.registry_name)
            .field("payload", &"<redacted>")
            .finish()
    }
}

/// Credentials in the shape `docker login` expects.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedAuth {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl Debug for DecodedAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedAuth")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize, Debug)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Deserialize, Debug)]
struct AuthEntry {
    /// Base64 encoded `username:password`.
    auth: String,
}

/// Request a credentials grant that allows pushing to `registry`.
pub async fn derive_write_credentials(
    provider: &dyn RegistryProvider,
    registry: &Registry,
    expiry_seconds: Option<u64>,
) -> Result<RegistryCredentials, Error> {
    debug!("Requesting read-write credentials for registry {}", registry.name);
    let payload = provider
        .docker_credentials(&registry.name, true, expiry_seconds)
        .await
        .map_err(|err| Error::Provider {
            err,
            registry: registry.name.clone(),
        })?;
    Ok(RegistryCredentials::new(&registry.name, payload))
}

/// Extract server, username and password from a credentials document.
///
/// A write grant covers exactly one registry server, so any other number of
/// entries is rejected instead of picking one of them.
///
/// The password is set to the username. Registry grants encode the API token
/// as both halves of `username:password`, and only the first half is read.
/// A value without `:` is taken whole as the username.
pub fn decode(credentials: &RegistryCredentials) -> Result<DecodedAuth, Error> {
    let config: DockerConfig = serde_json::from_str(credentials.payload())?;

    if config.auths.len() > 1 {
        return Err(Error::AmbiguousServers(config.auths.into_keys().collect()));
    }
    let (server, entry) = config.auths.into_iter().next().ok_or(Error::NoServers)?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(entry.auth.trim())
        .map_err(|err| Error::Base64 {
            err,
            server: server.clone(),
        })?;
    let decoded = String::from_utf8(decoded).map_err(|_| Error::Utf8 {
        server: server.clone(),
    })?;

    let username = match decoded.split_once(':') {
        Some((username, _)) => username.to_string(),
        None => decoded,
    };
    let password = username.clone();

    debug!("Decoded credentials for {server} as user {username}");
    Ok(DecodedAuth {
        server,
        username,
        password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{registry, FakeProvider};

    fn creds(payload: &str) -> RegistryCredentials {
        RegistryCredentials::new("x", payload.to_string())
    }

    #[test]
    fn decode_single_server() {
        let auth = decode(&creds(
            r#"{"auths":{"registry.example.com":{"auth":"dXNlcjp1c2Vy"}}}"#,
        ))
        .unwrap();
        assert_eq!(
            auth,
            DecodedAuth {
                server: "registry.example.com".into(),
                username: "user".into(),
                password: "user".into(),
            }
        );
    }

    #[test]
    fn decode_reuses_username_as_password() {
        // "user:secret"
        let auth = decode(&creds(
            r#"{"auths":{"registry.example.com":{"auth":"dXNlcjpzZWNyZXQ="}}}"#,
        ))
        .unwrap();
        assert_eq!(auth.username, "user");
        assert_eq!(auth.password, "user");
    }

    #[test]
    fn decode_is_deterministic() {
        let payload = creds(r#"{"auths":{"registry.digitalocean.com":{"auth":"ZG8tdG9rZW46ZG8tdG9rZW4="}}}"#);
        assert_eq!(decode(&payload).unwrap(), decode(&payload).unwrap());
    }

    #[test]
    fn decode_rejects_missing_or_empty_auths() {
        assert!(matches!(decode(&creds(r#"{"auths":{}}"#)), Err(Error::NoServers)));
        assert!(matches!(decode(&creds(r#"{}"#)), Err(Error::NoServers)));
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        assert!(matches!(decode(&creds("")), Err(Error::Json(_))));
        assert!(matches!(decode(&creds("not json")), Err(Error::Json(_))));
        assert!(matches!(
            decode(&creds(r#"{"auths":{"registry.example.com":{}}}"#)),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            decode(&creds(r#"{"auths":{"registry.example.com":{"auth":"!!!"}}}"#)),
            Err(Error::Base64 { .. })
        ));
        assert!(matches!(
            decode(&creds(r#"{"auths":{"registry.example.com":{"auth":"//4="}}}"#)),
            Err(Error::Utf8 { .. })
        ));
    }

    #[test]
    fn decode_without_separator_uses_whole_value() {
        // "token"
        let auth = decode(&creds(r#"{"auths":{"registry.example.com":{"auth":"dG9rZW4="}}}"#)).unwrap();
        assert_eq!(auth.username, "token");
        assert_eq!(auth.password, "token");
    }

    #[test]
    fn decode_rejects_multiple_servers() {
        let err = decode(&creds(
            r#"{"auths":{"b.example.com":{"auth":"dXNlcjp1c2Vy"},"a.example.com":{"auth":"dXNlcjp1c2Vy"}}}"#,
        ))
        .unwrap_err();
        match err {
            Error::AmbiguousServers(servers) => assert_eq!(servers, vec!["a.example.com", "b.example.com"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let auth = DecodedAuth {
            server: "registry.example.com".into(),
            username: "user".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
        assert!(!format!("{:?}", creds("secret-payload")).contains("secret-payload"));
    }

    #[tokio::test]
    async fn derive_requests_write_grant_for_registry() {
        let provider = FakeProvider::with_registry("abc123");
        let credentials = derive_write_credentials(&provider, &registry("abc123"), Some(600))
            .await
            .unwrap();

        assert_eq!(credentials.registry_name(), "abc123");
        assert_eq!(provider.credential_requests(), vec![("abc123".to_string(), true, Some(600))]);
        assert_eq!(decode(&credentials).unwrap().server, "registry.digitalocean.com");
    }
}
