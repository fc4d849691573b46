use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::services::scoring::WeightTable;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) remote: RemoteSettings,
    pub(super) session: SessionSettings,
    pub(super) submit: SubmitSettings,
    pub(super) storage: StorageSettings,
    pub(super) exam: ExamSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct RemoteSettings {
    pub(crate) api_url: String,
    pub(crate) ws_url: String,
    pub(crate) push_enabled: bool,
    pub(crate) request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) tick: Duration,
    pub(crate) urgent_threshold: Duration,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SubmitSettings {
    pub(crate) max_retries: u32,
    pub(crate) backoff_base: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct StorageSettings {
    pub(crate) data_dir: PathBuf,
    pub(crate) content_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub(crate) struct ExamSettings {
    pub(crate) level: Option<crate::schemas::exam::ExamLevel>,
    pub(crate) b1_weights: WeightTable,
    pub(crate) b2_weights: WeightTable,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid url for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("invalid weight table for {field}: {reason}")]
    InvalidWeights { field: &'static str, reason: String },
    #[error("{0} must use a secure scheme when strict config is enabled")]
    InsecureUrl(&'static str),
}
