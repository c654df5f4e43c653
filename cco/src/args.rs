use std::path::PathBuf;

use clap::Parser;

/// Claude-compatible LLM proxy.
#[derive(Debug, Parser)]
#[command(name = "cco", version, about)]
pub(crate) struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CCO_CONFIG_PATH", default_value = "cco.toml")]
    pub config: PathBuf,

    /// Override the configured listen host.
    #[arg(long, env = "CCO_HOST")]
    pub host: Option<String>,

    /// Override the configured listen port.
    #[arg(long, env = "CCO_PORT")]
    pub port: Option<u16>,

    /// Log filter, e.g. "info" or "llm=debug,server=debug".
    #[arg(long, env = "CCO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
