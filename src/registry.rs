use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::environment::Environment;
use crate::state::{self, StackReference, StateStore};

/// Stack output under which the primary environment publishes its registry.
pub const REGISTRY_ID_OUTPUT: &str = "containerRegistryId";

/// Errors returned by a [RegistryProvider] implementation.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("stack {stack} has no output '{key}'")]
    OutputNotFound { stack: String, key: String },

    #[error("container registry '{0}' does not exist")]
    RegistryNotFound(String),

    #[error("registry provider: {0}")]
    Provider(ProviderError),

    #[error("stack state: {0}")]
    State(#[from] state::Error),
}

/// Regions that can host a container registry.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Nyc3,
    Sfo3,
    Ams3,
    Sgp1,
    #[default]
    Fra1,
    Syd1,
}

impl Region {
    pub fn slug(&self) -> &'static str {
        match self {
            Region::Nyc3 => "nyc3",
            Region::Sfo3 => "sfo3",
            Region::Ams3 => "ams3",
            Region::Sgp1 => "sgp1",
            Region::Fra1 => "fra1",
            Region::Syd1 => "syd1",
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Starter,
    Basic,
    #[default]
    Professional,
}

impl SubscriptionTier {
    pub fn slug(&self) -> &'static str {
        match self {
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Professional => "professional",
        }
    }
}

impl Display for SubscriptionTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// A container registry, either provisioned by this program or looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    /// Stable identifier; registries are addressed by name.
    pub name: String,
    /// Hostname of the registry service, e.g. `registry.digitalocean.com`.
    pub server_url: String,
    /// Region slug as reported by the provider, which may be newer than [Region].
    pub region: Option<String>,
    /// Only known for registries created during this run.
    pub subscription_tier: Option<SubscriptionTier>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Registry {
    /// Prefix for all image names in this registry, e.g. `registry.digitalocean.com/x`.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.server_url, self.name)
    }
}

/// Parameters for provisioning a new registry.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRegistry {
    pub name: String,
    pub region: Region,
    pub subscription_tier: SubscriptionTier,
}

/// Cloud provider operations needed to provision and access a registry.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    async fn create_registry(&self, request: &CreateRegistry) -> Result<Registry, ProviderError>;

    /// Look up a registry by name. `Ok(None)` if the provider does not know it.
    async fn get_registry(&self, name: &str) -> Result<Option<Registry>, ProviderError>;

    /// Issue a docker credentials document for the named registry.
    async fn docker_credentials(
        &self,
        name: &str,
        write: bool,
        expiry_seconds: Option<u64>,
    ) -> Result<String, ProviderError>;
}

/// How a registry came to be used in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Provisioned during this run.
    Created,
    /// Already provisioned by an earlier run of the primary environment.
    Adopted,
    /// Read-only reference to the primary environment's registry.
    Referenced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRegistry {
    pub registry: Registry,
    pub origin: Origin,
}

/// Project coordinates used to build stack references.
#[derive(Debug, Clone)]
pub struct Project {
    pub organization: String,
    pub name: String,
}

impl Project {
    pub fn stack(&self, environment: Environment) -> StackReference {
        StackReference::new(&self.organization, &self.name, environment)
    }
}

/// Decides, per environment, whether the registry is provisioned or referenced.
pub struct Resolver<'a> {
    provider: &'a dyn RegistryProvider,
    state: &'a dyn StateStore,
    project: Project,
    registry_name: String,
    subscription_tier: SubscriptionTier,
}

impl<'a> Resolver<'a> {
    pub fn new(
        provider: &'a dyn RegistryProvider,
        state: &'a dyn StateStore,
        project: Project,
        registry_name: &str,
        subscription_tier: SubscriptionTier,
    ) -> Self {
        Self {
            provider,
            state,
            project,
            registry_name: registry_name.to_string(),
            subscription_tier,
        }
    }

    pub async fn resolve(&self, environment: Environment, region: Region) -> Result<ResolvedRegistry, Error> {
        if environment.is_primary() {
            self.provision(region).await
        } else {
            info!("Environment {environment} uses the registry of {}", Environment::PRIMARY);
            Ok(ResolvedRegistry {
                registry: self.lookup().await?,
                origin: Origin::Referenced,
            })
        }
    }

    /// Find the primary environment's registry without provisioning anything.
    pub async fn lookup(&self) -> Result<Registry, Error> {
        let stack = self.project.stack(Environment::PRIMARY);
        let id = self
            .state
            .get_output(&stack, REGISTRY_ID_OUTPUT)
            .await?
            .ok_or_else(|| Error::OutputNotFound {
                stack: stack.to_string(),
                key: REGISTRY_ID_OUTPUT.to_string(),
            })?;
        debug!("Stack {stack} references registry {id}");

        self.provider
            .get_registry(&id)
            .await
            .map_err(Error::Provider)?
            .ok_or(Error::RegistryNotFound(id))
    }

    async fn provision(&self, region: Region) -> Result<ResolvedRegistry, Error> {
        let stack = self.project.stack(Environment::PRIMARY);

        if let Some(id) = self.state.get_output(&stack, REGISTRY_ID_OUTPUT).await? {
            match self.provider.get_registry(&id).await.map_err(Error::Provider)? {
                Some(registry) => {
                    info!("Registry {id} already provisioned by stack {stack}");
                    return Ok(ResolvedRegistry {
                        registry,
                        origin: Origin::Adopted,
                    });
                }
                None => warn!("Registry {id} recorded by stack {stack} no longer exists"),
            }
        }

        let request = CreateRegistry {
            name: self.registry_name.clone(),
            region,
            subscription_tier: self.subscription_tier,
        };
        info!(
            "Creating registry {} in {} with subscription tier {}",
            request.name, request.region, request.subscription_tier
        );
        let registry = self
            .provider
            .create_registry(&request)
            .await
            .map_err(Error::Provider)?;

        self.state
            .set_output(&stack, REGISTRY_ID_OUTPUT, &registry.name)
            .await?;

        Ok(ResolvedRegistry {
            registry,
            origin: Origin::Created,
        })
    }
}
