//! In-memory fakes for the external systems.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::auth::DecodedAuth;
use crate::digitalocean::SERVER_URL;
use crate::docker::{self, BuildRequest, ImageBuilder};
use crate::registry::{CreateRegistry, ProviderError, Registry, RegistryProvider};
use crate::state::{self, StackReference, StateStore};

/// `do-token:do-token`
const DEFAULT_CREDENTIALS: &str =
    r#"{"auths":{"registry.digitalocean.com":{"auth":"ZG8tdG9rZW46ZG8tdG9rZW4="}}}"#;

pub fn registry(name: &str) -> Registry {
    Registry {
        name: name.to_string(),
        server_url: SERVER_URL.to_string(),
        region: None,
        subscription_tier: None,
        created_at: None,
    }
}

pub fn decoded_auth() -> DecodedAuth {
    DecodedAuth {
        server: SERVER_URL.to_string(),
        username: "do-token".into(),
        password: "do-token".into(),
    }
}

pub struct FakeProvider {
    registries: Mutex<Vec<Registry>>,
    created: Mutex<Vec<CreateRegistry>>,
    credential_requests: Mutex<Vec<(String, bool, Option<u64>)>>,
    credentials: String,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            registries: Mutex::new(vec![]),
            created: Mutex::new(vec![]),
            credential_requests: Mutex::new(vec![]),
            credentials: DEFAULT_CREDENTIALS.to_string(),
        }
    }
}

impl FakeProvider {
    pub fn with_registry(name: &str) -> Self {
        let provider = Self::default();
        provider.registries.lock().unwrap().push(registry(name));
        provider
    }

    pub fn with_credentials(mut self, payload: &str) -> Self {
        self.credentials = payload.to_string();
        self
    }

    pub fn created(&self) -> Vec<CreateRegistry> {
        self.created.lock().unwrap().clone()
    }

    pub fn credential_requests(&self) -> Vec<(String, bool, Option<u64>)> {
        self.credential_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryProvider for FakeProvider {
    async fn create_registry(&self, request: &CreateRegistry) -> Result<Registry, ProviderError> {
        self.created.lock().unwrap().push(request.clone());
        let registry = Registry {
            region: Some(request.region.slug().to_string()),
            subscription_tier: Some(request.subscription_tier),
            ..registry(&request.name)
        };
        self.registries.lock().unwrap().push(registry.clone());
        Ok(registry)
    }

    async fn get_registry(&self, name: &str) -> Result<Option<Registry>, ProviderError> {
        Ok(self
            .registries
            .lock()
            .unwrap()
            .iter()
            .find(|registry| registry.name == name)
            .cloned())
    }

    async fn docker_credentials(
        &self,
        name: &str,
        write: bool,
        expiry_seconds: Option<u64>,
    ) -> Result<String, ProviderError> {
        self.credential_requests
            .lock()
            .unwrap()
            .push((name.to_string(), write, expiry_seconds));
        Ok(self.credentials.clone())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    stacks: Mutex<HashMap<StackReference, BTreeMap<String, String>>>,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    /// Seed an output without counting it as a write.
    pub fn insert(&self, stack: &StackReference, key: &str, value: &str) {
        self.stacks
            .lock()
            .unwrap()
            .entry(stack.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, stack: &StackReference, key: &str) -> Option<String> {
        self.stacks
            .lock()
            .unwrap()
            .get(stack)
            .and_then(|outputs| outputs.get(key).cloned())
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_output(&self, stack: &StackReference, key: &str) -> Result<Option<String>, state::Error> {
        Ok(self.get(stack, key))
    }

    async fn set_output(&self, stack: &StackReference, key: &str, value: &str) -> Result<(), state::Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(stack, key, value);
        Ok(())
    }

    async fn outputs(&self, stack: &StackReference) -> Result<BTreeMap<String, String>, state::Error> {
        Ok(self.stacks.lock().unwrap().get(stack).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingBuilder {
    requests: Mutex<Vec<BuildRequest>>,
    fail: bool,
}

impl RecordingBuilder {
    /// Every push is rejected as if the registry refused the credentials.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for RecordingBuilder {
    async fn build_and_push(&self, request: &BuildRequest) -> Result<String, docker::Error> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(docker::Error::Push(ExitStatus::from_raw(1 << 8)));
        }
        Ok(request.image_name.clone())
    }
}
