//! Operator CLI for the Hanzo bank bridge
//!
//! Provisions application keys and records bank public keys:
//!
//! ```text
//! hanzo-bridge app init acme
//! hanzo-bridge app import acme --rsa-private ... --rsa-public ... --ed25519-private ... --ed25519-public ...
//! hanzo-bridge app show acme
//! hanzo-bridge bank import firstbank --rsa-public ... --ed25519-public ...
//! hanzo-bridge bank fetch firstbank --relay-url https://relay.example/banks/firstbank
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hanzo_bridge::{
    ApplicationKeyFiles, BridgeConfig, FileKeyRegistry, FsKeyStore, HttpRelayTransport,
    KeyProvisioningService, KeyRegistry, Slug,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hanzo-bridge")]
#[command(about = "Key provisioning for the Hanzo bank bridge")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "HANZO_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_root` from the configuration
    #[arg(long, env = "HANZO_BRIDGE_DATA_ROOT")]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Application key management
    App {
        #[command(subcommand)]
        command: AppCommand,
    },
    /// Bank public key management
    Bank {
        #[command(subcommand)]
        command: BankCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AppCommand {
    /// Generate keys for an application unless it already has some
    Init { slug: Slug },
    /// Store existing key files as a new key version
    Import {
        slug: Slug,
        #[arg(long)]
        rsa_private: PathBuf,
        #[arg(long)]
        rsa_public: PathBuf,
        #[arg(long)]
        ed25519_private: PathBuf,
        #[arg(long)]
        ed25519_public: PathBuf,
    },
    /// Print the current key version and public keys
    Show { slug: Slug },
    /// List registered applications
    List,
}

#[derive(Subcommand, Debug)]
enum BankCommand {
    /// Store bank public key files
    Import {
        slug: Slug,
        #[arg(long)]
        rsa_public: PathBuf,
        #[arg(long)]
        ed25519_public: PathBuf,
    },
    /// Download bank public keys from the relay
    Fetch {
        slug: Slug,
        /// Defaults to the configured or recorded relay URL
        #[arg(long)]
        relay_url: Option<String>,
    },
    /// List registered banks
    List,
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(data_root) = &args.data_root {
        config.data_root = data_root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(data_root = %config.data_root.display(), "using data root");

    let store = FsKeyStore::new(&config.data_root, config.validator());
    let registry = Arc::new(FileKeyRegistry::new(&config.data_root));
    let transport = Arc::new(HttpRelayTransport::new(config.request_timeout())?);
    let service = KeyProvisioningService::new(&config, store, registry.clone(), transport);

    match args.command {
        Command::App { command } => match command {
            AppCommand::Init { slug } => {
                print_json(&service.provision_application(&slug).await?)?;
            }
            AppCommand::Import {
                slug,
                rsa_private,
                rsa_public,
                ed25519_private,
                ed25519_public,
            } => {
                let files = ApplicationKeyFiles {
                    rsa_private,
                    rsa_public,
                    ed25519_private,
                    ed25519_public,
                };
                print_json(&service.import_application_keys(&slug, &files).await?)?;
            }
            AppCommand::Show { slug } => {
                print_json(&service.application_public_keys(&slug).await?)?;
            }
            AppCommand::List => {
                print_json(&registry.registered_applications().await?)?;
            }
        },
        Command::Bank { command } => match command {
            BankCommand::Import {
                slug,
                rsa_public,
                ed25519_public,
            } => {
                print_json(
                    &service
                        .import_bank_keys(&slug, &rsa_public, &ed25519_public)
                        .await?,
                )?;
            }
            BankCommand::Fetch { slug, relay_url } => {
                let relay_url = match relay_url.or_else(|| config.relay_url.clone()) {
                    Some(url) => url,
                    None => registry
                        .relay_url()
                        .await?
                        .ok_or_else(|| anyhow!("no relay URL given, configured or recorded"))?,
                };
                let record = service.fetch_bank_keys(&slug, &relay_url).await?;
                registry.set_relay_url(Some(relay_url)).await?;
                print_json(&record)?;
            }
            BankCommand::List => {
                print_json(&registry.registered_banks().await?)?;
            }
        },
    }

    Ok(())
}
