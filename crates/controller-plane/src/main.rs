//! Controller Plane Binary
//!
//! Provisions and inspects bindings in the configured database.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use controller_core::RealmDescriptor;
use controller_plane::{Binding, BindingRegistry, PlaneConfig, SqliteStore};

#[derive(Parser)]
#[command(name = "controller-plane")]
#[command(about = "Provision and inspect controller bindings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a binding and print its setup secret
    New {
        /// Binding id (random UUID when omitted)
        id: Option<String>,

        /// Endpoint the realm posts its binding document to
        bind_endpoint: Option<String>,
    },

    /// Print a binding without its secret
    Show {
        id: String,
    },

    /// Clear a binding's realm
    Unbind {
        id: String,
    },

    /// Delete a binding
    Delete {
        id: String,
    },

    /// List binding ids
    List,
}

/// What `show` prints; never includes the setup secret
#[derive(Serialize)]
struct BindingView<'a> {
    id: &'a str,
    bound: bool,
    status: &'a str,
    bind_endpoint: &'a str,
    thumbprint: Option<String>,
    realm: Option<&'a RealmDescriptor>,
    admin_roles: &'a [String],
    mandates: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Binding> for BindingView<'a> {
    fn from(binding: &'a Binding) -> Self {
        Self {
            id: binding.id(),
            bound: binding.is_bound(),
            status: binding.status(),
            bind_endpoint: binding.bind_endpoint(),
            thumbprint: binding.public_key().map(|k| k.thumbprint()),
            realm: binding.realm(),
            admin_roles: binding.admin_roles(),
            mandates: binding.mandates().len(),
            created_at: binding.created_at(),
            updated_at: binding.updated_at(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PlaneConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &PlaneConfig, command: Commands) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(SqliteStore::new(&config.database_url).await?);
    let registry = BindingRegistry::new(store.clone());

    info!(database = %config.database_url, "Controller plane ready");

    match command {
        Commands::New { id, bind_endpoint } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut binding = registry.create(&id).await?;

            if let Some(endpoint) = bind_endpoint {
                binding.set_bind_endpoint(endpoint).await?;
            }
            match &config.kek {
                Some(kek) => binding.generate_key(store.as_ref(), kek).await?,
                None => info!(id = %id, "No KEK configured, skipping key generation"),
            }

            println!("id: {}", binding.id());
            println!("secret: {}", binding.secret());
            if let Some(key) = binding.public_key() {
                println!("thumbprint: {}", key.thumbprint());
            }
        }
        Commands::Show { id } => {
            let binding = registry.get(&id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&BindingView::from(&binding))?
            );
        }
        Commands::Unbind { id } => {
            registry.get(&id).await?.unbind().await?;
            println!("unbound {}", id);
        }
        Commands::Delete { id } => {
            registry.delete(&id).await?;
            println!("deleted {}", id);
        }
        Commands::List => {
            for id in registry.list().await? {
                println!("{}", id);
            }
        }
    }

    Ok(())
}
