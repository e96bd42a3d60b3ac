use log::info;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::auth::DecodedAuth;
use crate::docker::{self, BuildRequest, ImageBuilder};
use crate::registry::Registry;

#[derive(Error, Debug)]
pub enum Error {
    #[error("build context {path}: {err}")]
    ContextNotFound { err: std::io::Error, path: PathBuf },

    #[error("dockerfile {0} not found in build context")]
    DockerfileNotFound(PathBuf),

    #[error(transparent)]
    Docker(#[from] docker::Error),
}

/// What to build, independent of the registry it is pushed to.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSpec {
    /// Absolute path of the build context.
    pub context: PathBuf,
    /// Top level directory holding the dockerfiles, e.g. `project`.
    pub kind: String,
    /// Logical image name, e.g. `project-1`.
    pub name: String,
    /// Selects an alternative dockerfile and image name, e.g. `worker`.
    pub variant: Option<String>,
    pub args: BTreeMap<String, String>,
}

impl BuildSpec {
    /// `<name>` or `<name>-<variant>`.
    pub fn local_image_name(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}-{}", self.name, variant),
            None => self.name.clone(),
        }
    }

    pub fn image_name(&self, registry: &Registry) -> String {
        format!("{}/{}", registry.endpoint(), self.local_image_name())
    }

    /// `<kind>/docker/production[/<variant>]/Dockerfile`, relative to the context.
    pub fn dockerfile(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}/docker/production/{}/Dockerfile", self.kind, variant),
            None => format!("{}/docker/production/Dockerfile", self.kind),
        }
    }
}

/// Resolve `context` against `working_dir` to an absolute path with all symlinks resolved.
pub fn resolve_context(working_dir: &Path, context: &Path) -> Result<PathBuf, Error> {
    let path = working_dir.join(context);
    std::fs::canonicalize(&path).map_err(|err| Error::ContextNotFound { err, path })
}

/// Image reference in a remote registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedImage(pub String);

impl Display for PushedImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the image described by `spec` and push it to `registry`.
pub async fn build_and_push(
    builder: &dyn ImageBuilder,
    spec: &BuildSpec,
    registry: &Registry,
    auth: &DecodedAuth,
) -> Result<PushedImage, Error> {
    let image_name = spec.image_name(registry);
    let dockerfile = PathBuf::from(spec.dockerfile());

    if !spec.context.is_dir() {
        return Err(Error::ContextNotFound {
            err: std::io::ErrorKind::NotFound.into(),
            path: spec.context.clone(),
        });
    }
    if !spec.context.join(&dockerfile).is_file() {
        return Err(Error::DockerfileNotFound(dockerfile));
    }

    info!("Building and pushing {image_name}");
    let request = BuildRequest {
        image_name,
        context: spec.context.clone(),
        dockerfile,
        args: spec.args.clone(),
        registry: auth.clone(),
    };
    let pushed = builder.build_and_push(&request).await?;
    Ok(PushedImage(pushed))
}
