use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::image::{self, BuildSpec};
use crate::registry::{Project, Region, SubscriptionTier};

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: String },

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A crib.toml file.
#[derive(Deserialize, Debug)]
pub struct File {
    pub description: Option<String>,
    pub stack: Stack,
    pub registry: Registry,
    pub digitalocean: DigitalOcean,
    pub image: Image,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).expect("built-in default.toml must be valid")
    }
}

impl File {
    /// Parse `user_config` on top of the built-in defaults.
    /// Tables are merged key by key; any other value in the user config wins.
    pub fn from_str_with_defaults(user_config: &str) -> Result<Self, Error> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let user: toml::Table = toml::from_str(user_config)?;
        merge(&mut merged, user);
        Ok(toml::Value::Table(merged).try_into()?)
    }

    pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.to_string(),
        })?;
        Self::from_str_with_defaults(&content)
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(overlay_table) = value {
            if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                merge(base_table, overlay_table);
                continue;
            }
            base.insert(key, toml::Value::Table(overlay_table));
        } else {
            base.insert(key, value);
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Stack {
    pub organization: String,
    pub project: String,
    /// Directory holding the persisted outputs of every stack.
    pub state_dir: PathBuf,
}

impl Stack {
    pub fn to_project(&self) -> Project {
        Project {
            organization: self.organization.clone(),
            name: self.project.clone(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Registry {
    pub name: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub subscription_tier: SubscriptionTier,
    /// Lifetime of issued credentials; the provider default applies if unset.
    pub expiry_seconds: Option<u64>,
}

#[serde_inline_default]
#[derive(Deserialize, Debug)]
pub struct DigitalOcean {
    pub api_url: String,
    #[serde_inline_default("DIGITALOCEAN_TOKEN".to_string())]
    pub token_env: String,
    #[serde_inline_default(30)]
    pub timeout_seconds: u64,
}

impl DigitalOcean {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug)]
pub struct Image {
    /// Relative to the working directory.
    pub context: PathBuf,
    pub kind: String,
    pub name: String,
    pub variant: Option<String>,
    #[serde_inline_default("docker".to_string())]
    pub docker_cli: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl Image {
    pub fn build_spec(&self, working_dir: &Path) -> Result<BuildSpec, image::Error> {
        Ok(BuildSpec {
            context: image::resolve_context(working_dir, &self.context)?,
            kind: self.kind.clone(),
            name: self.name.clone(),
            variant: self.variant.clone(),
            args: self.args.clone(),
        })
    }
}
