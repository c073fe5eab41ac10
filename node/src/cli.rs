//! # CLI Interface
//!
//! Defines the command-line argument structure for `cipherpost-node` using
//! `clap` derive. Server side: `run`. Keys: `keygen`, `pubkey`. Against a
//! running server: `enroll`, `call`. And `version`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use cipherpost_protocol::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

use crate::logging::LogFormat;

/// Cipherpost envelope server.
///
/// Accepts encrypted, authenticated envelopes from enrolled clients,
/// dispatches them to registered handlers, and answers with sealed replies.
#[derive(Parser, Debug)]
#[command(
    name = "cipherpost-node",
    about = "Cipherpost envelope server",
    version,
    propagate_version = true
)]
pub struct CipherpostCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "CIPHERPOST_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "CIPHERPOST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server.
    Run(RunArgs),
    /// Generate a private key and print its public identifier.
    Keygen(KeygenArgs),
    /// Print the public identifier of an existing key file.
    Pubkey(PubkeyArgs),
    /// Enroll a key with a running server and print the server key for it.
    Enroll(EnrollArgs),
    /// Send one request to a running server and print the reply payload.
    Call(CallArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address to bind both listeners on.
    #[arg(long, env = "CIPHERPOST_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port for the envelope API.
    #[arg(long, env = "CIPHERPOST_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CIPHERPOST_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Accepted difference between an envelope's timestamp and the server
    /// clock, in seconds.
    #[arg(long, env = "CIPHERPOST_MAX_CLOCK_SKEW", default_value_t = 300)]
    pub max_clock_skew_secs: u64,
}

/// Arguments for the `keygen` subcommand.
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Where to write the key. Created with mode 0600.
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Protect the key with this passphrase.
    #[arg(long, env = "CIPHERPOST_KEY_PASSPHRASE")]
    pub passphrase: Option<String>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `pubkey` subcommand.
#[derive(Parser, Debug)]
pub struct PubkeyArgs {
    /// Key file written by `keygen`.
    pub key: PathBuf,

    /// Passphrase for a protected key.
    #[arg(long, env = "CIPHERPOST_KEY_PASSPHRASE")]
    pub passphrase: Option<String>,
}

/// Connection and identity shared by `enroll` and `call`.
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// Base URL of the server's envelope API.
    #[arg(long, env = "CIPHERPOST_SERVER", default_value = "http://127.0.0.1:4780")]
    pub server: String,

    /// Key file written by `keygen`.
    #[arg(long, short = 'k', env = "CIPHERPOST_KEY")]
    pub key: PathBuf,

    /// Passphrase for a protected key.
    #[arg(long, env = "CIPHERPOST_KEY_PASSPHRASE")]
    pub passphrase: Option<String>,

    /// Whole-request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

/// Arguments for the `enroll` subcommand.
#[derive(Parser, Debug)]
pub struct EnrollArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
}

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Server key printed by `enroll`.
    #[arg(long, env = "CIPHERPOST_SERVER_KEY")]
    pub server_key: String,

    /// Operation name, e.g. `email.create`.
    pub name: String,

    /// Request payload as JSON.
    #[arg(default_value = "null")]
    pub payload: String,
}
