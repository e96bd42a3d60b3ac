//! Resolve → Derive credentials → Decode → Build and push.
//!
//! Each step awaits the previous one and the first error ends the run.
//! Nothing is retried here; retries belong to the external systems.

use log::info;

use crate::auth::{self, DecodedAuth};
use crate::docker::ImageBuilder;
use crate::environment::Environment;
use crate::image::{self, BuildSpec, PushedImage};
use crate::registry::{
    Project, Region, Registry, RegistryProvider, ResolvedRegistry, Resolver, SubscriptionTier,
    REGISTRY_ID_OUTPUT,
};
use crate::state::{StackReference, StateStore};
use crate::Error;

/// Stack output holding the last pushed image.
pub const IMAGE_NAME_OUTPUT: &str = "imageName";

/// Registry parameters shared by all environments.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub name: String,
    pub region: Region,
    pub subscription_tier: SubscriptionTier,
    pub expiry_seconds: Option<u64>,
}

pub struct Pipeline<'a> {
    provider: &'a dyn RegistryProvider,
    state: &'a dyn StateStore,
    builder: &'a dyn ImageBuilder,
    project: Project,
    registry: RegistrySettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        provider: &'a dyn RegistryProvider,
        state: &'a dyn StateStore,
        builder: &'a dyn ImageBuilder,
        project: Project,
        registry: RegistrySettings,
    ) -> Self {
        Self {
            provider,
            state,
            builder,
            project,
            registry,
        }
    }

    fn resolver(&self) -> Resolver<'a> {
        Resolver::new(
            self.provider,
            self.state,
            self.project.clone(),
            &self.registry.name,
            self.registry.subscription_tier,
        )
    }

    pub fn stack(&self, environment: Environment) -> StackReference {
        self.project.stack(environment)
    }

    pub async fn resolve_registry(&self, environment: Environment) -> Result<ResolvedRegistry, Error> {
        let resolved = self.resolver().resolve(environment, self.registry.region).await?;
        info!(
            "Registry {} ({:?}) at {}",
            resolved.registry.name,
            resolved.origin,
            resolved.registry.endpoint()
        );
        Ok(resolved)
    }

    /// Look up the registry without provisioning it.
    pub async fn lookup_registry(&self) -> Result<Registry, Error> {
        Ok(self.resolver().lookup().await?)
    }

    pub async fn credentials(&self, registry: &Registry) -> Result<DecodedAuth, Error> {
        let credentials =
            auth::derive_write_credentials(self.provider, registry, self.registry.expiry_seconds)
                .await?;
        Ok(auth::decode(&credentials)?)
    }

    /// Run the whole chain for `environment` and record the stack outputs.
    pub async fn run(&self, environment: Environment, spec: &BuildSpec) -> Result<PushedImage, Error> {
        info!("Running pipeline for environment {environment}");

        let resolved = self.resolve_registry(environment).await?;
        let auth = self.credentials(&resolved.registry).await?;
        let pushed = image::build_and_push(self.builder, spec, &resolved.registry, &auth).await?;

        let stack = self.stack(environment);
        self.state
            .set_output(&stack, REGISTRY_ID_OUTPUT, &resolved.registry.name)
            .await?;
        self.state
            .set_output(&stack, IMAGE_NAME_OUTPUT, &pushed.0)
            .await?;

        info!("Pushed {pushed}");
        Ok(pushed)
    }
}
