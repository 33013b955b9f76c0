//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::invalidation::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_BASE_MS, DEFAULT_RETRY_BACKOFF_MAX_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS, DerivedUrlRule, ensure_web_url,
};

pub use cli::{CliArgs, Command, DispatchOverrides, PurgeArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "evictor";
const ENV_PREFIX: &str = "EVICTOR";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8085;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_PURGE_METHOD: &str = "PURGE";
const DEFAULT_KV_HOST: &str = "127.0.0.1";
const DEFAULT_KV_PORT: u16 = 6379;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub dispatch: DispatchSettings,
    pub edge: EdgeSettings,
    pub kv: KvSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub webhook_token: Option<String>,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub homepage_url: Url,
    /// The homepage exactly as configured, used as its cache key.
    pub homepage_key: String,
    pub derived_urls: Vec<DerivedUrlRule>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub retry_max_attempts: NonZeroU32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub call_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub enabled: bool,
    pub method: String,
    pub purge_endpoint: Option<Url>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KvSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: u32,
    pub password: Option<String>,
    pub key_prefix: String,
}

impl KvSettings {
    /// Connection URL, either configured verbatim or built from host, port and database.
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_ref() {
            return url.clone();
        }

        let base = format!("redis://{}:{}/{}", self.host, self.port, self.database);
        match self.password.as_deref() {
            Some(password) => match Url::parse(&base) {
                Ok(mut url) => {
                    if url.set_password(Some(password)).is_ok() {
                        url.to_string()
                    } else {
                        base
                    }
                }
                Err(_) => base,
            },
            None => base,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("site.derived_urls")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) => raw.apply_dispatch_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    dispatch: RawDispatchSettings,
    edge: RawEdgeSettings,
    kv: RawKvSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(token) = overrides.webhook_token.as_ref() {
            self.server.webhook_token = Some(token.clone());
        }

        self.apply_dispatch_overrides(&overrides.dispatch);
    }

    fn apply_dispatch_overrides(&mut self, overrides: &DispatchOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.homepage_url.as_ref() {
            self.site.homepage_url = Some(url.clone());
        }
        if let Some(attempts) = overrides.retry_max_attempts {
            self.dispatch.retry_max_attempts = Some(attempts);
        }
        if let Some(timeout) = overrides.call_timeout_ms {
            self.dispatch.call_timeout_ms = Some(timeout);
        }
        if let Some(enabled) = overrides.edge_enabled {
            self.edge.enabled = Some(enabled);
        }
        if let Some(endpoint) = overrides.edge_purge_endpoint.as_ref() {
            self.edge.purge_endpoint = Some(endpoint.clone());
        }
        if let Some(enabled) = overrides.kv_enabled {
            self.kv.enabled = Some(enabled);
        }
        if let Some(host) = overrides.kv_host.as_ref() {
            self.kv.host = Some(host.clone());
        }
        if let Some(port) = overrides.kv_port {
            self.kv.port = Some(port);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            dispatch,
            edge,
            kv,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let site = build_site_settings(site)?;
        let dispatch = build_dispatch_settings(dispatch)?;
        let edge = build_edge_settings(edge, dispatch.call_timeout)?;
        let kv = build_kv_settings(kv)?;

        if !edge.enabled && !kv.enabled {
            return Err(LoadError::invalid(
                "edge.enabled",
                "at least one of edge or kv must be enabled",
            ));
        }

        Ok(Self {
            server,
            logging,
            site,
            dispatch,
            edge,
            kv,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        webhook_token: non_empty(server.webhook_token),
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let raw_homepage = non_empty(site.homepage_url)
        .ok_or_else(|| LoadError::invalid("site.homepage_url", "must be set"))?;
    let homepage_url = Url::parse(&raw_homepage)
        .map_err(|err| LoadError::invalid("site.homepage_url", format!("invalid url: {err}")))?;
    ensure_web_url(&homepage_url).map_err(|reason| LoadError::invalid("site.homepage_url", reason))?;

    let derived_urls = site
        .derived_urls
        .into_iter()
        .filter(|template| !template.trim().is_empty())
        .map(|template| {
            DerivedUrlRule::parse(template.trim())
                .map_err(|reason| LoadError::invalid("site.derived_urls", reason))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SiteSettings {
        homepage_url,
        homepage_key: raw_homepage,
        derived_urls,
    })
}

fn build_dispatch_settings(dispatch: RawDispatchSettings) -> Result<DispatchSettings, LoadError> {
    let retry_max_attempts = non_zero_u32(
        dispatch
            .retry_max_attempts
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS)
            .into(),
        "dispatch.retry_max_attempts",
    )?;

    let base_ms = dispatch
        .retry_backoff_base_ms
        .unwrap_or(DEFAULT_RETRY_BACKOFF_BASE_MS);
    let max_ms = dispatch
        .retry_backoff_max_ms
        .unwrap_or(DEFAULT_RETRY_BACKOFF_MAX_MS);
    if max_ms < base_ms {
        return Err(LoadError::invalid(
            "dispatch.retry_backoff_max_ms",
            "must not be smaller than retry_backoff_base_ms",
        ));
    }

    let call_timeout_ms = dispatch.call_timeout_ms.unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
    if call_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "dispatch.call_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(DispatchSettings {
        retry_max_attempts,
        retry_backoff_base: Duration::from_millis(base_ms),
        retry_backoff_max: Duration::from_millis(max_ms),
        call_timeout: Duration::from_millis(call_timeout_ms),
    })
}

fn build_edge_settings(
    edge: RawEdgeSettings,
    call_timeout: Duration,
) -> Result<EdgeSettings, LoadError> {
    let method = non_empty(edge.method).unwrap_or_else(|| DEFAULT_PURGE_METHOD.to_string());
    if !method.bytes().all(is_token_byte) {
        return Err(LoadError::invalid(
            "edge.method",
            format!("`{method}` is not a valid HTTP method"),
        ));
    }

    let purge_endpoint = match non_empty(edge.purge_endpoint) {
        Some(raw) => {
            let mut url = Url::parse(&raw).map_err(|err| {
                LoadError::invalid("edge.purge_endpoint", format!("invalid url: {err}"))
            })?;
            ensure_web_url(&url)
                .map_err(|reason| LoadError::invalid("edge.purge_endpoint", reason))?;
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            Some(url)
        }
        None => None,
    };

    let request_timeout = match edge.request_timeout_ms {
        Some(0) => {
            return Err(LoadError::invalid(
                "edge.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        Some(ms) => Duration::from_millis(ms),
        None => call_timeout,
    };

    Ok(EdgeSettings {
        enabled: edge.enabled.unwrap_or(true),
        method,
        purge_endpoint,
        request_timeout,
    })
}

fn build_kv_settings(kv: RawKvSettings) -> Result<KvSettings, LoadError> {
    let port = kv.port.unwrap_or(DEFAULT_KV_PORT);
    if port == 0 {
        return Err(LoadError::invalid("kv.port", "port must be greater than zero"));
    }

    Ok(KvSettings {
        enabled: kv.enabled.unwrap_or(true),
        url: non_empty(kv.url),
        host: non_empty(kv.host).unwrap_or_else(|| DEFAULT_KV_HOST.to_string()),
        port,
        database: kv.database.unwrap_or(0),
        password: non_empty(kv.password),
        key_prefix: kv.key_prefix.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    webhook_token: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    homepage_url: Option<String>,
    derived_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDispatchSettings {
    retry_max_attempts: Option<u32>,
    retry_backoff_base_ms: Option<u64>,
    retry_backoff_max_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEdgeSettings {
    enabled: Option<bool>,
    method: Option<String>,
    purge_endpoint: Option<String>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawKvSettings {
    enabled: Option<bool>,
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<u32>,
    password: Option<String>,
    key_prefix: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
