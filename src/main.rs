//! crib: container registry image build
use clap::{Parser, Subcommand};
use crib::config;
use crib::digitalocean;
use crib::docker::DockerCli;
use crib::environment::Environment;
use crib::pipeline::{Pipeline, RegistrySettings};
use crib::state::{FileStateStore, StateStore};
use crib::Error;
use log::{debug, error, info};

/// Provision a container registry and push your image into it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Environment to run for, e.g. `staging` or `production`.
    #[arg(long, env = "CRIB_STACK")]
    stack: Environment,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve the registry, build the image and push it.
    Up,
    /// Resolve the registry for this environment, creating it if this is the primary environment.
    Registry,
    /// Show the server and username of the registry write credentials.
    Credentials,
    /// Print the image name and dockerfile path without building anything.
    Names {
        /// Override the image variant from the configuration file.
        #[arg(long)]
        variant: Option<String>,
    },
    /// Print the persisted outputs of this environment.
    Outputs,
}

/// Read configuration file from disk and merge it with the
/// `default.toml` [built-in config](../default.toml).
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists in the
/// working directory. If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "crib.toml";

    let config_file = match &args.config {
        None => {
            if std::fs::metadata(DEFAULT_CONFIG_FILE)
                .map(|metadata| metadata.is_file())
                .unwrap_or(false)
            {
                Some(DEFAULT_CONFIG_FILE.to_string())
            } else {
                None
            }
        }
        Some(c) => Some(c.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        debug!("Reading configuration from {config_file}");
        config::File::default_with_user_config_file(&config_file)?
    } else {
        config::File::default()
    })
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

async fn run() -> Result<(), Error> {
    env_logger::init();

    let args = Cli::parse();
    let cfg = read_config(&args)?;
    let working_dir = std::env::current_dir()?;

    info!("crib {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", args.stack);

    let project = cfg.stack.to_project();
    let state = FileStateStore::new(working_dir.join(&cfg.stack.state_dir));

    if let Commands::Outputs = args.command {
        for (key, value) in state.outputs(&project.stack(args.stack)).await? {
            println!("{key} = {value}");
        }
        return Ok(());
    }

    let provider = digitalocean::Client::from_env(
        &cfg.digitalocean.api_url,
        &cfg.digitalocean.token_env,
        cfg.digitalocean.timeout(),
    )?;
    let builder = DockerCli::new(&cfg.image.docker_cli);
    let pipeline = Pipeline::new(
        &provider,
        &state,
        &builder,
        project,
        RegistrySettings {
            name: cfg.registry.name.clone(),
            region: cfg.registry.region,
            subscription_tier: cfg.registry.subscription_tier,
            expiry_seconds: cfg.registry.expiry_seconds,
        },
    );

    match args.command {
        Commands::Up => {
            let spec = cfg.image.build_spec(&working_dir)?;
            let pushed = pipeline.run(args.stack, &spec).await?;
            println!("{pushed}");
        }
        Commands::Registry => {
            let resolved = pipeline.resolve_registry(args.stack).await?;
            println!("{}\t{}", resolved.registry.name, resolved.registry.endpoint());
        }
        Commands::Credentials => {
            let registry = pipeline.lookup_registry().await?;
            let auth = pipeline.credentials(&registry).await?;
            println!("server: {}", auth.server);
            println!("username: {}", auth.username);
        }
        Commands::Names { variant } => {
            let registry = pipeline.lookup_registry().await?;
            let mut spec = cfg.image.build_spec(&working_dir)?;
            if variant.is_some() {
                spec.variant = variant;
            }
            println!("image: {}", spec.image_name(&registry));
            println!("dockerfile: {}", spec.dockerfile());
        }
        Commands::Outputs => unreachable!("handled before the provider is created"),
    }
    Ok(())
}
