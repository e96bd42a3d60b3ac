//! Persisted stack outputs.
//!
//! Every environment (stack) publishes a small set of named outputs once its
//! run has completed. Other environments read them through a [StackReference],
//! which is how a non-primary environment learns which registry to push to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::environment::Environment;

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    Read { err: std::io::Error, path: PathBuf },

    #[error("write {path}: {err}")]
    Write { err: std::io::Error, path: PathBuf },

    #[error("deserialize {path}: {err}")]
    Deserialize {
        err: serde_json::Error,
        path: PathBuf,
    },

    #[error("serialize stack state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fully qualified name of a stack: `<organization>/<project>/<stack>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackReference {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackReference {
    pub fn new(organization: &str, project: &str, environment: Environment) -> Self {
        Self {
            organization: organization.to_string(),
            project: project.to_string(),
            stack: environment.name().to_string(),
        }
    }
}

impl Display for StackReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.project, self.stack)
    }
}

/// Read and write access to stack outputs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns `None` if either the stack or the key does not exist.
    async fn get_output(&self, stack: &StackReference, key: &str) -> Result<Option<String>, Error>;

    async fn set_output(&self, stack: &StackReference, key: &str, value: &str) -> Result<(), Error>;

    async fn outputs(&self, stack: &StackReference) -> Result<BTreeMap<String, String>, Error>;
}

/// On-disk representation of one stack.
#[derive(Serialize, Deserialize, Debug, Default)]
struct StackState {
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Keeps one JSON document per stack below a root directory,
/// at `<root>/<organization>/<project>/<stack>.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, stack: &StackReference) -> PathBuf {
        self.root
            .join(&stack.organization)
            .join(&stack.project)
            .join(format!("{}.json", stack.stack))
    }

    async fn load(&self, path: &Path) -> Result<StackState, Error> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stack state at {}", path.display());
                return Ok(StackState::default());
            }
            Err(err) => {
                return Err(Error::Read {
                    err,
                    path: path.to_path_buf(),
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|err| Error::Deserialize {
            err,
            path: path.to_path_buf(),
        })
    }

    async fn save(&self, path: &Path, state: &StackState) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::Write {
                    err,
                    path: parent.to_path_buf(),
                })?;
        }
        let data = serde_json::to_vec_pretty(state)?;

        // Readers see either the previous document or the new one, never a partial write.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|err| Error::Write {
                err,
                path: tmp.clone(),
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|err| Error::Write {
                err,
                path: path.to_path_buf(),
            })
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_output(&self, stack: &StackReference, key: &str) -> Result<Option<String>, Error> {
        let state = self.load(&self.path(stack)).await?;
        Ok(state.outputs.get(key).cloned())
    }

    async fn set_output(&self, stack: &StackReference, key: &str, value: &str) -> Result<(), Error> {
        let path = self.path(stack);
        let mut state = self.load(&path).await?;
        debug!("Setting output {key} of stack {stack}");
        state.outputs.insert(key.to_string(), value.to_string());
        state.updated_at = Some(Utc::now());
        self.save(&path, &state).await
    }

    async fn outputs(&self, stack: &StackReference) -> Result<BTreeMap<String, String>, Error> {
        Ok(self.load(&self.path(stack)).await?.outputs)
    }
}
