use std::fmt;

use thiserror::Error;

/// Failure talking to the traffic service over REST.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotRead {
    Intersections,
    EmergencyVehicles,
    TrafficStatus,
}

impl fmt::Display for SnapshotRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Intersections => "intersections",
            Self::EmergencyVehicles => "emergency-vehicles",
            Self::TrafficStatus => "traffic-status",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub read: SnapshotRead,
    pub error: BackendError,
}

/// One or more of the snapshot reads failed. Never carries partial data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("snapshot load failed: {}", describe_failures(.failures))]
pub struct LoadFailure {
    pub failures: Vec<ReadFailure>,
}

impl LoadFailure {
    pub fn failed_reads(&self) -> Vec<SnapshotRead> {
        self.failures.iter().map(|failure| failure.read).collect()
    }
}

fn describe_failures(failures: &[ReadFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.read, failure.error))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to connect live channel {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("live channel transport failure: {0}")]
    Transport(String),
    #[error("live channel protocol failure: {0}")]
    Protocol(String),
}

/// Command was rejected before anything was sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid request: {reason}")]
pub struct InvalidRequest {
    pub reason: String,
}

impl InvalidRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Command reached the network and did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandFailure {
    #[error("backend rejected command with {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("command transport failure: {0}")]
    Network(String),
    #[error("command response undecodable: {0}")]
    Decode(String),
}

impl From<BackendError> for CommandFailure {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, detail } => Self::Rejected { status, detail },
            BackendError::Network(reason) => Self::Network(reason),
            BackendError::Decode(reason) => Self::Decode(reason),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequest),
    #[error(transparent)]
    Failed(#[from] CommandFailure),
}

impl DispatchError {
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid server_url {value:?}: {reason}")]
    ServerUrl { value: String, reason: String },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
