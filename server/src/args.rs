//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Runs the adapter/critic chat-completions gateway.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the `served_models.toml` configuration file.
    #[arg(long, short = 'c', env = "GATEWAY_CONFIG")]
    pub config: PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "GATEWAY_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Log filter, e.g. `info` or `gateway=debug,server=debug`.
    #[arg(long, env = "GATEWAY_LOG", default_value = "info")]
    pub log_filter: String,
}
