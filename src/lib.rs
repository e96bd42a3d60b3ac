//! crib: provision a container registry and push an image into it.
//!
//! One run walks a fixed chain:
//!
//! 1. resolve the registry for the selected environment ([registry]),
//! 2. derive write credentials and decode them ([auth]),
//! 3. build the image and push it ([image], [docker]).
//!
//! [pipeline] ties the steps together.

use thiserror::Error;

pub mod auth;
pub mod config;
pub mod digitalocean;
pub mod docker;
pub mod environment;
pub mod image;
pub mod pipeline;
pub mod registry;
pub mod state;

#[cfg(test)]
mod testing;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] config::Error),

    #[error("resolve registry: {0}")]
    Registry(#[from] registry::Error),

    #[error("credentials: {0}")]
    Credentials(#[from] auth::Error),

    #[error("build image: {0}")]
    Image(#[from] image::Error),

    #[error("digitalocean: {0}")]
    DigitalOcean(#[from] digitalocean::Error),

    #[error("stack state: {0}")]
    State(#[from] state::Error),

    #[error("filesystem error: {0}")]
    FilesystemError(#[from] std::io::Error),
}
