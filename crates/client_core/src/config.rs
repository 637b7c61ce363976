use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8001";
const DEFAULT_WS_PATH: &str = "/ws";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: Url,
    pub ws_path: String,
    pub request_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub event_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            ws_path: DEFAULT_WS_PATH.into(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reconnect_initial_delay: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// `DEFAULT_SERVER_URL` is a fixed literal that always parses; a config test
/// pins it so an edit to the constant fails there first.
fn default_server_url() -> Url {
    parse_server_url(DEFAULT_SERVER_URL).expect("DEFAULT_SERVER_URL is a valid http url")
}

#[derive(Debug, Default, Deserialize)]
pub struct FileSettings {
    pub server_url: Option<String>,
    pub ws_path: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub reconnect_initial_delay_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
    pub event_buffer: Option<usize>,
}

impl ClientSettings {
    pub fn with_server_url(server_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            server_url: parse_server_url(server_url)?,
            ..Self::default()
        })
    }

    /// Live channel endpoint: the server URL with its scheme swapped to
    /// `ws`/`wss` and `ws_path` appended to any base path.
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ConfigError::ServerUrl {
                    value: self.server_url.to_string(),
                    reason: format!("unsupported scheme {other}"),
                })
            }
        };
        url.set_scheme(scheme).map_err(|()| ConfigError::ServerUrl {
            value: self.server_url.to_string(),
            reason: "cannot switch scheme to websocket".into(),
        })?;
        let base = url.path().trim_end_matches('/').to_string();
        let suffix = self.ws_path.trim_start_matches('/');
        url.set_path(&format!("{base}/{suffix}"));
        Ok(url)
    }

    /// `base` + `path`, keeping any path prefix the server URL carries.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn apply_file(&mut self, file: FileSettings) -> Result<(), ConfigError> {
        if let Some(v) = file.server_url {
            self.server_url = parse_server_url(&v)?;
        }
        if let Some(v) = file.ws_path {
            self.ws_path = v;
        }
        if let Some(v) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.reconnect_initial_delay_ms {
            self.reconnect_initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.reconnect_max_delay_ms {
            self.reconnect_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.event_buffer {
            self.event_buffer = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env("TRAFFIC_SERVER_URL") {
            self.server_url = parse_server_url(&v)?;
        }
        if let Some(v) = env("APP__SERVER_URL") {
            self.server_url = parse_server_url(&v)?;
        }
        if let Some(v) = env("APP__WS_PATH") {
            self.ws_path = v;
        }
        if let Some(v) = env("APP__REQUEST_TIMEOUT_MS") {
            self.request_timeout = Duration::from_millis(parse_number("APP__REQUEST_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = env("APP__RECONNECT_INITIAL_DELAY_MS") {
            self.reconnect_initial_delay =
                Duration::from_millis(parse_number("APP__RECONNECT_INITIAL_DELAY_MS", &v)?);
        }
        if let Some(v) = env("APP__RECONNECT_MAX_DELAY_MS") {
            self.reconnect_max_delay =
                Duration::from_millis(parse_number("APP__RECONNECT_MAX_DELAY_MS", &v)?);
        }
        Ok(())
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_buffer".into(),
                value: "0".into(),
            });
        }
        if self.reconnect_initial_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "reconnect_initial_delay_ms".into(),
                value: "0".into(),
            });
        }
        if self.reconnect_max_delay < self.reconnect_initial_delay {
            self.reconnect_max_delay = self.reconnect_initial_delay;
        }
        self.websocket_url()?;
        Ok(self)
    }
}

/// Defaults, then the TOML file, then `TRAFFIC_SERVER_URL` / `APP__*`
/// environment overrides. An explicit `path` must exist; the implicit
/// `dashboard.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> Result<ClientSettings, ConfigError> {
    let file = match path {
        Some(path) => Some(read_file_settings(path)?),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Some(read_file_settings(Path::new(DEFAULT_CONFIG_FILE))?)
        }
        None => None,
    };
    settings_from_sources(file, |key| std::env::var(key).ok())
}

pub fn settings_from_sources(
    file: Option<FileSettings>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let mut settings = ClientSettings::default();
    if let Some(file) = file {
        settings.apply_file(file)?;
    }
    settings.apply_env(env)?;
    settings.validate()
}

fn read_file_settings(path: &Path) -> Result<FileSettings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|err| ConfigError::ServerUrl {
        value: raw.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ServerUrl {
            value: raw.to_string(),
            reason: "server_url must start with http:// or https://".into(),
        });
    }
    Ok(url)
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
