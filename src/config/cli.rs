use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::domain::ChangeKind;

/// Command-line arguments for the evictor binary.
#[derive(Debug, Parser)]
#[command(
    name = "evictor",
    version,
    about = "Cache invalidation for published content"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EVICTOR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Accept change notifications over HTTP.
    Serve(Box<ServeArgs>),
    /// Invalidate the caches for one piece of content and exit.
    Purge(Box<PurgeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub overrides: DispatchOverrides,

    /// Identifier of the changed content.
    #[arg(long = "content-id", value_name = "ID")]
    pub content_id: String,

    /// Canonical public URL of the changed content.
    #[arg(long = "content-url", value_name = "URL")]
    pub content_url: String,

    /// What happened to the content (saved|deleted).
    #[arg(long, value_name = "ACTION", default_value = "saved", value_parser = parse_action)]
    pub action: ChangeKind,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub dispatch: DispatchOverrides,

    /// Override the webhook listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the webhook listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Require this bearer token on webhook calls.
    #[arg(long = "webhook-token", env = "EVICTOR_WEBHOOK_TOKEN", value_name = "TOKEN")]
    pub webhook_token: Option<String>,
}

/// Overrides shared by every command that dispatches invalidations.
#[derive(Debug, Args, Default, Clone)]
pub struct DispatchOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the site homepage URL.
    #[arg(long = "homepage-url", value_name = "URL")]
    pub homepage_url: Option<String>,

    /// Override the maximum attempts per target and backend.
    #[arg(long = "retry-max-attempts", value_name = "COUNT")]
    pub retry_max_attempts: Option<u32>,

    /// Override the per-call backend timeout.
    #[arg(long = "call-timeout-ms", value_name = "MS")]
    pub call_timeout_ms: Option<u64>,

    /// Enable or disable the HTTP edge purger.
    #[arg(
        long = "edge-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub edge_enabled: Option<bool>,

    /// Send purge requests to this endpoint instead of the content URL.
    #[arg(long = "edge-purge-endpoint", value_name = "URL")]
    pub edge_purge_endpoint: Option<String>,

    /// Enable or disable the key-value deleter.
    #[arg(
        long = "kv-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub kv_enabled: Option<bool>,

    /// Override the key-value server host.
    #[arg(long = "kv-host", value_name = "HOST")]
    pub kv_host: Option<String>,

    /// Override the key-value server port.
    #[arg(long = "kv-port", value_name = "PORT")]
    pub kv_port: Option<u16>,
}

fn parse_action(value: &str) -> Result<ChangeKind, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "saved" | "save" | "updated" => Ok(ChangeKind::Saved),
        "deleted" | "delete" => Ok(ChangeKind::Deleted),
        other => Err(format!("unknown action `{other}`, expected saved or deleted")),
    }
}
