use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::auth::DecodedAuth;

#[derive(Error, Debug)]
pub enum Error {
    #[error("docker build failed with exit code {0}")]
    Build(ExitStatus),

    #[error("docker login failed with exit code {0}")]
    Login(ExitStatus),

    #[error("docker logout failed with exit code {0}")]
    Logout(ExitStatus),

    #[error("docker push failed with exit code {0}")]
    Push(ExitStatus),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Everything needed to build an image and push it to a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    /// Fully qualified target image name.
    pub image_name: String,
    pub context: PathBuf,
    /// Relative to `context`.
    pub dockerfile: PathBuf,
    pub args: BTreeMap<String, String>,
    pub registry: DecodedAuth,
}

/// Builds an image and pushes it, returning the pushed image name.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build_and_push(&self, request: &BuildRequest) -> Result<String, Error>;
}

/// [ImageBuilder] backed by the docker command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        command
    }

    pub fn build_command(&self, request: &BuildRequest) -> Command {
        let mut command = self.command();
        command
            .arg("build")
            .arg("--file")
            .arg(request.context.join(&request.dockerfile))
            .arg("--tag")
            .arg(&request.image_name);
        for (key, value) in &request.args {
            command.arg("--build-arg").arg(format!("{key}={value}"));
        }
        command.arg(&request.context);
        command
    }

    pub async fn login(&self, auth: &DecodedAuth) -> Result<(), Error> {
        debug!("Logging in to Docker registry {} as {}", auth.server, auth.username);
        let mut child = self
            .command()
            .arg("login")
            .arg(&auth.server)
            .arg("--username")
            .arg(&auth.username)
            .arg("--password-stdin")
            .stdin(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(auth.password.as_bytes()).await?;
        }
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Login(status))
        }
    }

    pub async fn logout(&self, server: &str) -> Result<(), Error> {
        debug!("Logging out of Docker registry {}", server);
        let status = self.command().arg("logout").arg(server).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Logout(status))
        }
    }

    pub async fn build(&self, request: &BuildRequest) -> Result<(), Error> {
        debug!(
            "Building image {} from {} with {}",
            request.image_name,
            request.context.display(),
            request.dockerfile.display()
        );
        let status = self.build_command(request).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Build(status))
        }
    }

    pub async fn push(&self, image_name: &str) -> Result<(), Error> {
        debug!("Pushing image {}", image_name);
        let status = self.command().arg("push").arg(image_name).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Push(status))
        }
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build_and_push(&self, request: &BuildRequest) -> Result<String, Error> {
        self.login(&request.registry).await?;

        let pushed = match self.build(request).await {
            Ok(()) => self.push(&request.image_name).await,
            Err(err) => Err(err),
        };
        // Log out even if the build failed, but report the build error first.
        let logout = self.logout(&request.registry.server).await;
        pushed?;
        logout?;

        Ok(request.image_name.clone())
    }
}
