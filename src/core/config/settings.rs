use std::path::PathBuf;
use std::time::Duration;

use super::parsing::{
    derive_ws_url, env_optional, env_or_default, parse_bool, parse_environment, parse_http_url,
    parse_level, parse_socket_addr, parse_u32, parse_u64, parse_weights, parse_ws_url,
};
use super::types::{
    ConfigError, ExamSettings, RemoteSettings, RuntimeSettings, SessionSettings, Settings,
    StorageSettings, SubmitSettings, TelemetrySettings,
};
use crate::schemas::exam::ExamLevel;
use crate::services::scoring::WeightTable;

const DEFAULT_API_URL: &str = "https://wavy-server.onrender.com";
const DEFAULT_B1_WEIGHTS: &str = "1-5:5,6-10:2.5,11-:1.5";
const DEFAULT_B2_WEIGHTS: &str = "1-:1";
const MAX_POLL_INTERVAL_SECONDS: u64 = 30;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("WAVY_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("WAVY_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let api_url =
            parse_http_url("WAVY_API_URL", env_or_default("WAVY_API_URL", DEFAULT_API_URL))?;
        let ws_url = match env_optional("WAVY_WS_URL") {
            Some(value) => parse_ws_url("WAVY_WS_URL", value)?,
            None => derive_ws_url(&api_url),
        };
        let push_enabled =
            env_optional("WAVY_PUSH_ENABLED").map(|value| parse_bool(&value)).unwrap_or(true);
        let request_timeout_seconds = parse_u64(
            "WAVY_REQUEST_TIMEOUT_SECONDS",
            env_or_default("WAVY_REQUEST_TIMEOUT_SECONDS", "15"),
        )?;

        let poll_interval_seconds = parse_u64(
            "WAVY_POLL_INTERVAL_SECONDS",
            env_or_default("WAVY_POLL_INTERVAL_SECONDS", "10"),
        )?;
        let tick_millis =
            parse_u64("WAVY_TICK_MILLIS", env_or_default("WAVY_TICK_MILLIS", "1000"))?;
        let urgent_threshold_seconds = parse_u64(
            "WAVY_URGENT_THRESHOLD_SECONDS",
            env_or_default("WAVY_URGENT_THRESHOLD_SECONDS", "300"),
        )?;

        let max_retries =
            parse_u32("WAVY_SUBMIT_MAX_RETRIES", env_or_default("WAVY_SUBMIT_MAX_RETRIES", "3"))?;
        let backoff_millis = parse_u64(
            "WAVY_SUBMIT_BACKOFF_MILLIS",
            env_or_default("WAVY_SUBMIT_BACKOFF_MILLIS", "1000"),
        )?;

        let data_dir = PathBuf::from(env_or_default("WAVY_DATA_DIR", ".wavy"));
        let content_dir = PathBuf::from(env_or_default("WAVY_CONTENT_DIR", "data"));

        let level = parse_level(env_optional("WAVY_EXAM_LEVEL"))?;
        let b1_weights = parse_weights(
            "WAVY_B1_WEIGHTS",
            env_or_default("WAVY_B1_WEIGHTS", DEFAULT_B1_WEIGHTS),
        )?;
        let b2_weights = parse_weights(
            "WAVY_B2_WEIGHTS",
            env_or_default("WAVY_B2_WEIGHTS", DEFAULT_B2_WEIGHTS),
        )?;

        let log_level = env_or_default("WAVY_LOG_LEVEL", "info");
        let json = env_optional("WAVY_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let metrics_addr =
            parse_socket_addr("WAVY_METRICS_ADDR", env_optional("WAVY_METRICS_ADDR"))?;

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            remote: RemoteSettings {
                api_url,
                ws_url,
                push_enabled,
                request_timeout: Duration::from_secs(request_timeout_seconds),
            },
            session: SessionSettings {
                poll_interval: Duration::from_secs(poll_interval_seconds),
                tick: Duration::from_millis(tick_millis),
                urgent_threshold: Duration::from_secs(urgent_threshold_seconds),
            },
            submit: SubmitSettings {
                max_retries,
                backoff_base: Duration::from_millis(backoff_millis),
            },
            storage: StorageSettings { data_dir, content_dir },
            exam: ExamSettings { level, b1_weights, b2_weights },
            telemetry: TelemetrySettings { log_level, json, metrics_addr },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn remote(&self) -> &RemoteSettings {
        &self.remote
    }

    pub(crate) fn session(&self) -> &SessionSettings {
        &self.session
    }

    pub(crate) fn submit(&self) -> SubmitSettings {
        self.submit
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let poll_seconds = self.session.poll_interval.as_secs();
        if poll_seconds == 0 || poll_seconds > MAX_POLL_INTERVAL_SECONDS {
            return Err(ConfigError::InvalidValue {
                field: "WAVY_POLL_INTERVAL_SECONDS",
                value: poll_seconds.to_string(),
            });
        }

        if self.session.tick.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "WAVY_TICK_MILLIS",
                value: String::from("0"),
            });
        }

        if self.remote.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "WAVY_REQUEST_TIMEOUT_SECONDS",
                value: String::from("0"),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if !self.remote.api_url.starts_with("https://") {
            return Err(ConfigError::InsecureUrl("WAVY_API_URL"));
        }

        if self.remote.push_enabled && !self.remote.ws_url.starts_with("wss://") {
            return Err(ConfigError::InsecureUrl("WAVY_WS_URL"));
        }

        Ok(())
    }
}

impl ExamSettings {
    pub(crate) fn weights_for(&self, level: ExamLevel) -> &WeightTable {
        match level {
            ExamLevel::B1 => &self.b1_weights,
            ExamLevel::B2 => &self.b2_weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn load_uses_defaults() {
        let _guard = test_support::env_lock().await;
        test_support::clear_wavy_env();

        let settings = Settings::load().expect("settings");

        assert_eq!(settings.remote().api_url, DEFAULT_API_URL);
        assert_eq!(settings.remote().ws_url, "wss://wavy-server.onrender.com");
        assert!(settings.remote().push_enabled);
        assert_eq!(settings.session().poll_interval, Duration::from_secs(10));
        assert_eq!(settings.session().tick, Duration::from_secs(1));
        assert_eq!(settings.submit().max_retries, 3);
        assert_eq!(settings.exam().level, None);
        assert_eq!(settings.exam().weights_for(ExamLevel::B1).weight_for("6"), 2.5);
        assert_eq!(settings.exam().weights_for(ExamLevel::B2).weight_for("40"), 1.0);
        assert!(settings.telemetry().metrics_addr.is_none());
    }

    #[tokio::test]
    async fn load_rejects_out_of_range_poll_interval() {
        let _guard = test_support::env_lock().await;
        test_support::clear_wavy_env();
        std::env::set_var("WAVY_POLL_INTERVAL_SECONDS", "45");

        let err = Settings::load().expect_err("poll interval must be bounded");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "WAVY_POLL_INTERVAL_SECONDS", .. }
        ));

        std::env::remove_var("WAVY_POLL_INTERVAL_SECONDS");
    }

    #[tokio::test]
    async fn strict_config_requires_tls() {
        let _guard = test_support::env_lock().await;
        test_support::clear_wavy_env();
        std::env::set_var("WAVY_STRICT_CONFIG", "1");
        std::env::set_var("WAVY_API_URL", "http://127.0.0.1:4000");

        let err = Settings::load().expect_err("plain http rejected");
        assert!(matches!(err, ConfigError::InsecureUrl("WAVY_API_URL")));

        test_support::clear_wavy_env();
    }

    #[tokio::test]
    async fn load_reads_overrides() {
        let _guard = test_support::env_lock().await;
        test_support::clear_wavy_env();
        std::env::set_var("WAVY_API_URL", "http://127.0.0.1:4000/");
        std::env::set_var("WAVY_EXAM_LEVEL", "b2");
        std::env::set_var("WAVY_B2_WEIGHTS", "1-10:2,11-:1");
        std::env::set_var("WAVY_PUSH_ENABLED", "0");

        let settings = Settings::load().expect("settings");

        assert_eq!(settings.remote().api_url, "http://127.0.0.1:4000");
        assert_eq!(settings.remote().ws_url, "ws://127.0.0.1:4000");
        assert!(!settings.remote().push_enabled);
        assert_eq!(settings.exam().level, Some(ExamLevel::B2));
        assert_eq!(settings.exam().weights_for(ExamLevel::B2).weight_for("3"), 2.0);

        test_support::clear_wavy_env();
    }
}
