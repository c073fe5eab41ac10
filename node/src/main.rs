// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Cipherpost Node
//!
//! Entry point for the `cipherpost-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and serves the envelope API.
//!
//! The binary supports these subcommands:
//!
//! - `run`     — start the server
//! - `keygen`  — generate a private key file
//! - `pubkey`  — print the public identifier of a key file
//! - `enroll`  — register a key file with a running server
//! - `call`    — send one request to a running server
//! - `version` — print build version information

mod api;
mod cli;
mod handlers;
mod logging;
mod metrics;
mod remote;
mod store;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use cipherpost_protocol::{PrivateKey, ProtocolConfig};

use cli::{CipherpostCli, Commands};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CipherpostCli::parse();

    match cli.command {
        Commands::Run(args) => {
            logging::init_logging(&cli.log_level, cli.log_format);
            run_node(args).await
        }
        Commands::Keygen(args) => {
            logging::init_logging(&cli.log_level, cli.log_format);
            keygen(args)
        }
        Commands::Pubkey(args) => pubkey(args),
        Commands::Enroll(args) => {
            logging::init_logging(&cli.log_level, cli.log_format);
            remote::enroll(args).await
        }
        Commands::Call(args) => {
            logging::init_logging(&cli.log_level, cli.log_format);
            remote::call(args).await
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the API server and the metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        max_clock_skew_secs = args.max_clock_skew_secs,
        "starting cipherpost-node"
    );

    let config =
        ProtocolConfig::default().with_max_clock_skew(Duration::from_secs(args.max_clock_skew_secs));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);

    // --- Application state ---
    let app_state = api::AppState::new(config, Arc::clone(&node_metrics))
        .context("failed to build handler registry")?;
    tracing::info!(
        handlers = ?app_state.dispatcher.registry().names(),
        "handlers registered"
    );

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = api::create_metrics_router(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("cipherpost-node stopped");
    Ok(())
}

/// Generates a private key, writes it with owner-only permissions, and
/// prints the public identifier on stdout.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            args.output.display()
        );
    }

    let config = ProtocolConfig::default();
    let key = PrivateKey::generate();
    let text = key
        .serialize_with(args.passphrase.as_deref(), &config.kdf)
        .context("failed to serialize private key")?;
    write_private(&args.output, &text)
        .with_context(|| format!("failed to write key to {}", args.output.display()))?;

    let public = key.public();
    tracing::info!(
        fingerprint = %public.fingerprint(),
        protected = args.passphrase.is_some(),
        path = %args.output.display(),
        "private key generated"
    );
    println!("{}", public);
    Ok(())
}

/// Reads a key file and prints its public identifier.
fn pubkey(args: cli::PubkeyArgs) -> Result<()> {
    let key = remote::load_key(&args.key, args.passphrase.as_deref())?;
    println!("{}", key.public());
    Ok(())
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.write_all(b"\n")?;

    // `mode` only applies on creation; tighten a pre-existing file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("cipherpost-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol        {}", cipherpost_protocol::config::PROTOCOL_VERSION);
    println!(
        "primitives      {} / {}",
        cipherpost_protocol::config::KEY_AGREEMENT_ALGORITHM,
        cipherpost_protocol::config::SYMMETRIC_ALGORITHM
    );
    println!("rustc           {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that signal is simply never delivered.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
