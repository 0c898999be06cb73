//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::comments::{Role, Viewer};
use crate::realtime::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_INTERVAL, DEFAULT_WS_PATH, websocket_url,
};

mod cli;

pub use cli::{
    AdIntensityArgs, CliArgs, Command, CommentsArgs, CommentsCommand, DeleteArgs, EditArgs,
    GlobalOverrides, PostArgs, SectionsArgs, ThreadArgs, WatchArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mangasync";
const ENV_PREFIX: &str = "MANGASYNC";
const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DEFAULT_AD_INTENSITY_REFETCH_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub realtime: RealtimeSettings,
    pub logging: LoggingSettings,
    pub http: HttpSettings,
    pub ad_intensity: AdIntensitySettings,
    pub viewer: Option<Viewer>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub origin: Url,
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub url: Url,
    pub reconnect: bool,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
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
pub struct HttpSettings {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AdIntensitySettings {
    pub refetch_interval: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    match cli.command.as_ref() {
        Some(Command::Watch(args)) => raw.apply_watch_overrides(args),
        Some(Command::AdIntensity(args)) => raw.apply_ad_intensity_overrides(args),
        Some(Command::Comments(_)) | Some(Command::Sections(_)) | None => {}
    }

    Settings::from_raw(raw)
}

/// Parse the process arguments and load settings for them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    realtime: RawRealtimeSettings,
    logging: RawLoggingSettings,
    http: RawHttpSettings,
    ad_intensity: RawAdIntensitySettings,
    viewer: RawViewerSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(origin) = overrides.origin.as_ref() {
            self.server.origin = Some(origin.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.http_timeout_seconds {
            self.http.timeout_secs = Some(seconds);
        }
        if let Some(user_id) = overrides.user_id.as_ref() {
            self.viewer.user_id = Some(user_id.clone());
        }
        if let Some(username) = overrides.username.as_ref() {
            self.viewer.username = Some(username.clone());
        }
        if let Some(role) = overrides.role.as_ref() {
            self.viewer.role = Some(role.clone());
        }
    }

    fn apply_watch_overrides(&mut self, overrides: &WatchArgs) {
        if let Some(reconnect) = overrides.reconnect {
            self.realtime.reconnect = Some(reconnect);
        }
        if let Some(millis) = overrides.reconnect_interval_ms {
            self.realtime.reconnect_interval_ms = Some(millis);
        }
        if let Some(millis) = overrides.heartbeat_interval_ms {
            self.realtime.heartbeat_interval_ms = Some(millis);
        }
        if let Some(path) = overrides.ws_path.as_ref() {
            self.realtime.ws_path = Some(path.clone());
        }
    }

    fn apply_ad_intensity_overrides(&mut self, overrides: &AdIntensityArgs) {
        if let Some(seconds) = overrides.refetch_interval_seconds {
            self.ad_intensity.refetch_interval_secs = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            realtime,
            logging,
            http,
            ad_intensity,
            viewer,
        } = raw;

        let server = build_server_settings(server)?;
        let realtime = build_realtime_settings(realtime, &server.origin)?;
        let logging = build_logging_settings(logging)?;
        let http = build_http_settings(http)?;
        let ad_intensity = build_ad_intensity_settings(ad_intensity)?;
        let viewer = build_viewer(viewer)?;

        Ok(Self {
            server,
            realtime,
            logging,
            http,
            ad_intensity,
            viewer,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let raw = server
        .origin
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());

    let origin = Url::parse(&raw)
        .map_err(|err| LoadError::invalid("server.origin", format!("failed to parse: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "server.origin",
            "scheme must be http or https",
        ));
    }
    if origin.host_str().is_none() {
        return Err(LoadError::invalid("server.origin", "origin must include a host"));
    }

    Ok(ServerSettings { origin })
}

fn build_realtime_settings(
    realtime: RawRealtimeSettings,
    origin: &Url,
) -> Result<RealtimeSettings, LoadError> {
    let path = realtime
        .ws_path
        .unwrap_or_else(|| DEFAULT_WS_PATH.to_string());
    let url = websocket_url(origin.as_str(), &path)
        .map_err(|err| LoadError::invalid("realtime.ws_path", err.to_string()))?;

    let reconnect_interval = positive_millis(
        realtime.reconnect_interval_ms,
        DEFAULT_RECONNECT_INTERVAL,
        "realtime.reconnect_interval_ms",
    )?;
    let heartbeat_interval = positive_millis(
        realtime.heartbeat_interval_ms,
        DEFAULT_HEARTBEAT_INTERVAL,
        "realtime.heartbeat_interval_ms",
    )?;

    Ok(RealtimeSettings {
        url,
        reconnect: realtime.reconnect.unwrap_or(true),
        reconnect_interval,
        heartbeat_interval,
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

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let seconds = http.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    if seconds == 0 {
        return Err(LoadError::invalid(
            "http.timeout_secs",
            "must be greater than zero",
        ));
    }
    Ok(HttpSettings {
        timeout: Duration::from_secs(seconds),
    })
}

fn build_ad_intensity_settings(
    ad_intensity: RawAdIntensitySettings,
) -> Result<AdIntensitySettings, LoadError> {
    let seconds = ad_intensity
        .refetch_interval_secs
        .unwrap_or(DEFAULT_AD_INTENSITY_REFETCH_SECS);
    if seconds == 0 {
        return Err(LoadError::invalid(
            "ad_intensity.refetch_interval_secs",
            "must be greater than zero",
        ));
    }
    Ok(AdIntensitySettings {
        refetch_interval: Duration::from_secs(seconds),
    })
}

/// A viewer is configured only when a user id is present.
fn build_viewer(viewer: RawViewerSettings) -> Result<Option<Viewer>, LoadError> {
    let Some(user_id) = viewer
        .user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let role = match viewer.role {
        Some(role) => Role::from_str(&role)
            .map_err(|err| LoadError::invalid("viewer.role", err.to_string()))?,
        None => Role::default(),
    };
    let username = viewer.username.filter(|name| !name.trim().is_empty());

    Ok(Some(Viewer::new(user_id, username, role)))
}

fn positive_millis(
    value: Option<u64>,
    default: Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(millis) => Ok(Duration::from_millis(millis)),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRealtimeSettings {
    reconnect: Option<bool>,
    reconnect_interval_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    ws_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdIntensitySettings {
    refetch_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawViewerSettings {
    user_id: Option<String>,
    username: Option<String>,
    role: Option<String>,
}

#[cfg(test)]
mod tests;
