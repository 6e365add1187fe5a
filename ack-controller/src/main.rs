//! ack-controller: reconciles declared resources against their providers.
//!
//! Loads controller settings, registers every supported kind, and drives the
//! objects of a manifest to convergence. With `--once` it exits after every
//! object settled and prints the persisted objects; otherwise it keeps
//! resyncing until interrupted.

use std::time::Duration;

use ack_runtime::{AdoptionPolicy, ControllerConfig, DeletionPolicy};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod agent;
mod kinds;

use agent::{ControllerHost, Manifest};
use kinds::Scope;

/// Resource reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "ack-controller", version, about)]
struct Args {
    /// Manifest with declared objects (JSON)
    #[arg(long, env = "ACK_MANIFEST")]
    manifest: String,

    /// Controller settings file (JSON)
    #[arg(long, env = "ACK_CONFIG")]
    config: Option<String>,

    /// Controller identity written into ownership tags (defaults to hostname)
    #[arg(long, env = "ACK_CONTROLLER_ID")]
    controller_id: Option<String>,

    /// Workers per resource kind
    #[arg(long)]
    workers: Option<usize>,

    /// Default account for objects without an account annotation
    #[arg(long, env = "ACK_ACCOUNT_ID", default_value = "000000000000")]
    account_id: String,

    /// Default region for objects without a region annotation
    #[arg(long, env = "ACK_REGION", default_value = "us-east-1")]
    region: String,

    /// Adopt pre-existing remote resources instead of reporting a conflict
    #[arg(long)]
    adopt: bool,

    /// Keep remote resources when their objects are deleted
    #[arg(long)]
    retain: bool,

    /// Exit once every object has settled
    #[arg(long)]
    once: bool,

    /// Give up waiting in --once mode after this many seconds
    #[arg(long, default_value = "60")]
    timeout: u64,
}

fn load_config(args: &Args) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path))?,
        None => ControllerConfig {
            controller_id: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "ack-controller".to_string()),
            ..Default::default()
        },
    };

    if let Some(id) = &args.controller_id {
        config.controller_id = id.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.adopt {
        config.adoption = AdoptionPolicy::Adopt;
    }
    if args.retain {
        config.deletion_policy = DeletionPolicy::Retain;
    }
    config.validate().context("Invalid controller configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ack_controller=info,ack_runtime=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let manifest = Manifest::from_file(&args.manifest)?;

    info!("Starting ack-controller: {}", config.controller_id);
    info!(
        "Manifest {}: {} objects, {} existing resources",
        args.manifest,
        manifest.objects.len(),
        manifest.existing.len()
    );

    let host = ControllerHost::new(
        &config,
        Scope {
            account_id: args.account_id.clone(),
            region: args.region.clone(),
        },
    );
    host.seed(&manifest.existing)?;

    if args.once {
        let settled = host
            .run_once(manifest.objects, Duration::from_secs(args.timeout))
            .await?;
        for entry in settled {
            let state = entry
                .state
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|| "Unknown".to_string());
            println!("{} {}: {}", entry.group_kind, entry.object_ref, state);
            if let Some(object) = entry.persisted {
                println!("{}", serde_json::to_string_pretty(&object)?);
            }
        }
        return Ok(());
    }

    host.run(manifest.objects, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    })
    .await;

    Ok(())
}
