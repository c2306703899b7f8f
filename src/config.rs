//! # Configuration
//!
//! ## Responsibility
//! Build the immutable [`BridgeConfig`] once at startup from an optional TOML
//! file (table `[totalip]`) overlaid by `TOTALIP_*` environment variables,
//! and validate every field before the listener starts.
//!
//! ## Guarantees
//! - Environment values win over file values.
//! - Required fields that are absent, empty or zero yield a [`ConfigError`];
//!   nothing past this module ever sees a half-valid configuration.
//!
//! ## NOT Responsible For
//! - Reloading. The config is read once and never mutated.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveTime;
use reqwest::Url;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::gate::WorkingHours;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "TOTALIP_";

/// Relative path of the ingestion endpoint under the API base address.
pub const PUBLISH_PATH: &str = "api/totalip/socket";

pub const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 5 * 60;
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 5;
pub const DEFAULT_CONDUIT_CAPACITY: usize = 1024;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 15;

// ---------------------------------------------------------------------------
// Raw (unvalidated) layer
// ---------------------------------------------------------------------------

/// Every setting as it appears in the file, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub socket_server_host: Option<String>,
    pub socket_server_port: Option<i64>,
    pub publishing_api_key: Option<String>,
    pub publishing_api_base_address: Option<String>,
    pub socket_server_receive_timeout: Option<u64>,
    pub working_hours_start: Option<String>,
    pub working_hours_end: Option<String>,
    pub enforce_working_hours: Option<bool>,
    pub max_concurrent_deliveries: Option<usize>,
    pub conduit_capacity: Option<usize>,
    pub shutdown_grace: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    totalip: RawConfig,
}

impl RawConfig {
    /// Parse the `[totalip]` table of a TOML document.
    pub fn from_toml(text: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str::<ConfigFile>(text)
            .map(|f| f.totalip)
            .map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })
    }

    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&text, &display)
    }

    /// Overlay values found through `lookup`, keyed by the full variable name
    /// (e.g. `TOTALIP_SOCKET_SERVER_HOST`).
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(v) = var("SOCKET_SERVER_HOST") {
            self.socket_server_host = Some(v);
        }
        if let Some(v) = var("SOCKET_SERVER_PORT") {
            self.socket_server_port = Some(parse_env("socket_server_port", &v)?);
        }
        if let Some(v) = var("PUBLISHING_API_KEY") {
            self.publishing_api_key = Some(v);
        }
        if let Some(v) = var("PUBLISHING_API_BASE_ADDRESS") {
            self.publishing_api_base_address = Some(v);
        }
        if let Some(v) = var("SOCKET_SERVER_RECEIVE_TIMEOUT") {
            self.socket_server_receive_timeout =
                Some(parse_env("socket_server_receive_timeout", &v)?);
        }
        if let Some(v) = var("WORKING_HOURS_START") {
            self.working_hours_start = Some(v);
        }
        if let Some(v) = var("WORKING_HOURS_END") {
            self.working_hours_end = Some(v);
        }
        if let Some(v) = var("ENFORCE_WORKING_HOURS") {
            self.enforce_working_hours = Some(parse_env("enforce_working_hours", &v)?);
        }
        if let Some(v) = var("MAX_CONCURRENT_DELIVERIES") {
            self.max_concurrent_deliveries = Some(parse_env("max_concurrent_deliveries", &v)?);
        }
        if let Some(v) = var("CONDUIT_CAPACITY") {
            self.conduit_capacity = Some(parse_env("conduit_capacity", &v)?);
        }
        if let Some(v) = var("SHUTDOWN_GRACE") {
            self.shutdown_grace = Some(parse_env("shutdown_grace", &v)?);
        }
        Ok(self)
    }
}

fn parse_env<T>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        field,
        detail: format!("{value:?}: {e}"),
    })
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|e| ConfigError::Invalid {
            field,
            detail: format!("{value:?}: {e}"),
        })
}

fn required_string(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn non_zero<T: PartialEq + Default>(field: &'static str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        Err(ConfigError::Invalid {
            field,
            detail: "must be greater than zero".into(),
        })
    } else {
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Validated, immutable process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub socket_server_host: String,
    pub socket_server_port: u16,
    /// Maximum silence tolerated between two reads.
    pub receive_timeout: Duration,
    pub publishing_api_base_address: Url,
    pub publishing_api_key: String,
    pub working_hours: WorkingHours,
    /// When `false` the listener reconnects immediately after every cycle.
    pub enforce_working_hours: bool,
    pub max_concurrent_deliveries: usize,
    pub conduit_capacity: usize,
    pub shutdown_grace: Duration,
}

impl BridgeConfig {
    /// Load from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(p) => RawConfig::from_file(p)?,
            None => RawConfig::default(),
        };
        let raw = raw.overlay_env(|key| std::env::var(key).ok())?;
        Self::from_raw(raw)
    }

    /// Validate a raw config.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let socket_server_host = required_string("socket_server_host", raw.socket_server_host)?;

        let port = raw
            .socket_server_port
            .ok_or(ConfigError::Missing("socket_server_port"))?;
        let socket_server_port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigError::Invalid {
                field: "socket_server_port",
                detail: format!("{port} is not a valid TCP port"),
            })?;

        let publishing_api_key = required_string("publishing_api_key", raw.publishing_api_key)?;

        let base = required_string(
            "publishing_api_base_address",
            raw.publishing_api_base_address,
        )?;
        let publishing_api_base_address = Url::parse(&base).map_err(|e| ConfigError::Invalid {
            field: "publishing_api_base_address",
            detail: format!("{base:?}: {e}"),
        })?;
        if !matches!(publishing_api_base_address.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "publishing_api_base_address",
                detail: format!("{base:?}: scheme must be http or https"),
            });
        }

        let receive_timeout = Duration::from_secs(non_zero(
            "socket_server_receive_timeout",
            raw.socket_server_receive_timeout
                .unwrap_or(DEFAULT_RECEIVE_TIMEOUT_SECS),
        )?);

        let defaults = WorkingHours::default();
        let start = match raw.working_hours_start.as_deref() {
            Some(v) => parse_time_of_day("working_hours_start", v)?,
            None => defaults.start,
        };
        let end = match raw.working_hours_end.as_deref() {
            Some(v) => parse_time_of_day("working_hours_end", v)?,
            None => defaults.end,
        };

        let max_concurrent_deliveries = non_zero(
            "max_concurrent_deliveries",
            raw.max_concurrent_deliveries
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DELIVERIES),
        )?;
        let conduit_capacity = non_zero(
            "conduit_capacity",
            raw.conduit_capacity.unwrap_or(DEFAULT_CONDUIT_CAPACITY),
        )?;

        Ok(Self {
            socket_server_host,
            socket_server_port,
            receive_timeout,
            publishing_api_base_address,
            publishing_api_key,
            working_hours: WorkingHours::new(start, end),
            enforce_working_hours: raw.enforce_working_hours.unwrap_or(true),
            max_concurrent_deliveries,
            conduit_capacity,
            shutdown_grace: Duration::from_secs(
                raw.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
        })
    }

    /// Full URL events are POSTed to.
    pub fn publish_url(&self) -> String {
        format!(
            "{}/{PUBLISH_PATH}",
            self.publishing_api_base_address.as_str().trim_end_matches('/')
        )
    }

    /// Human-readable summary with the API key masked.
    pub fn redacted_summary(&self) -> String {
        format!(
            "socket server     {}:{}\n\
             receive timeout   {}s\n\
             publish url       {}\n\
             api key           {}\n\
             working hours     {}{}\n\
             max concurrency   {}\n\
             conduit capacity  {}\n\
             shutdown grace    {}s",
            self.socket_server_host,
            self.socket_server_port,
            self.receive_timeout.as_secs(),
            self.publish_url(),
            mask(&self.publishing_api_key),
            self.working_hours,
            if self.enforce_working_hours { "" } else { " (not enforced)" },
            self.max_concurrent_deliveries,
            self.conduit_capacity,
            self.shutdown_grace.as_secs(),
        )
    }
}

fn mask(secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{tail}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal() -> RawConfig {
        RawConfig {
            socket_server_host: Some("feed.example.com".into()),
            socket_server_port: Some(9100),
            publishing_api_key: Some("secret-key-123456".into()),
            publishing_api_base_address: Some("https://api.example.com".into()),
            ..Default::default()
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let cfg = BridgeConfig::from_raw(minimal()).unwrap();
        assert_eq!(cfg.receive_timeout, Duration::from_secs(300));
        assert_eq!(cfg.working_hours, WorkingHours::default());
        assert!(cfg.enforce_working_hours);
        assert_eq!(cfg.max_concurrent_deliveries, 5);
        assert_eq!(cfg.conduit_capacity, 1024);
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(15));
    }

    #[test]
    fn missing_host_is_fatal() {
        let raw = RawConfig {
            socket_server_host: None,
            ..minimal()
        };
        let err = BridgeConfig::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("socket_server_host")));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let raw = RawConfig {
            publishing_api_key: Some("   ".into()),
            ..minimal()
        };
        let err = BridgeConfig::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("publishing_api_key")));
    }

    #[test]
    fn zero_port_is_rejected() {
        let raw = RawConfig {
            socket_server_port: Some(0),
            ..minimal()
        };
        let err = BridgeConfig::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "socket_server_port", .. }));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let raw = RawConfig {
            socket_server_port: Some(70_000),
            ..minimal()
        };
        assert!(BridgeConfig::from_raw(raw).is_err());
    }

    #[test]
    fn relative_base_address_is_rejected() {
        let raw = RawConfig {
            publishing_api_base_address: Some("/api".into()),
            ..minimal()
        };
        let err = BridgeConfig::from_raw(raw).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "publishing_api_base_address", .. }
        ));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let raw = RawConfig {
            publishing_api_base_address: Some("ftp://api.example.com".into()),
            ..minimal()
        };
        assert!(BridgeConfig::from_raw(raw).is_err());
    }

    #[test]
    fn zero_receive_timeout_is_rejected() {
        let raw = RawConfig {
            socket_server_receive_timeout: Some(0),
            ..minimal()
        };
        assert!(BridgeConfig::from_raw(raw).is_err());
    }

    #[test]
    fn publish_url_joins_without_double_slash() {
        for base in ["https://api.example.com", "https://api.example.com/"] {
            let raw = RawConfig {
                publishing_api_base_address: Some(base.into()),
                ..minimal()
            };
            let cfg = BridgeConfig::from_raw(raw).unwrap();
            assert_eq!(cfg.publish_url(), "https://api.example.com/api/totalip/socket");
        }
    }

    #[test]
    fn working_hours_parse_with_and_without_seconds() {
        let raw = RawConfig {
            working_hours_start: Some("07:30".into()),
            working_hours_end: Some("18:45:30".into()),
            ..minimal()
        };
        let cfg = BridgeConfig::from_raw(raw).unwrap();
        assert_eq!(cfg.working_hours.start, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(cfg.working_hours.end, NaiveTime::from_hms_opt(18, 45, 30).unwrap());
    }

    #[test]
    fn bad_time_of_day_is_rejected() {
        let raw = RawConfig {
            working_hours_end: Some("25:00".into()),
            ..minimal()
        };
        let err = BridgeConfig::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "working_hours_end", .. }));
    }

    #[test]
    fn toml_table_is_parsed() {
        let text = r#"
            [totalip]
            socket_server_host = "10.0.0.5"
            socket_server_port = 7000
            publishing_api_key = "k"
            publishing_api_base_address = "http://localhost:5000"
            socket_server_receive_timeout = 60
            enforce_working_hours = false
        "#;
        let raw = RawConfig::from_toml(text, "inline").unwrap();
        let cfg = BridgeConfig::from_raw(raw).unwrap();
        assert_eq!(cfg.socket_server_host, "10.0.0.5");
        assert_eq!(cfg.socket_server_port, 7000);
        assert_eq!(cfg.receive_timeout, Duration::from_secs(60));
        assert!(!cfg.enforce_working_hours);
    }

    #[test]
    fn unknown_toml_key_is_a_parse_error() {
        let text = "[totalip]\nsocket_host = \"x\"\n";
        assert!(matches!(
            RawConfig::from_toml(text, "inline"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let raw = minimal()
            .overlay_env(env(&[
                ("TOTALIP_SOCKET_SERVER_HOST", "override.local"),
                ("TOTALIP_SOCKET_SERVER_PORT", "9200"),
                ("TOTALIP_MAX_CONCURRENT_DELIVERIES", "1"),
            ]))
            .unwrap();
        let cfg = BridgeConfig::from_raw(raw).unwrap();
        assert_eq!(cfg.socket_server_host, "override.local");
        assert_eq!(cfg.socket_server_port, 9200);
        assert_eq!(cfg.max_concurrent_deliveries, 1);
    }

    #[test]
    fn unparsable_env_value_is_invalid() {
        let err = minimal()
            .overlay_env(env(&[("TOTALIP_SOCKET_SERVER_PORT", "nine")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "socket_server_port", .. }));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "[totalip]\nsocket_server_host = \"h\"\nsocket_server_port = 1\n\
             publishing_api_key = \"k\"\npublishing_api_base_address = \"http://a\"\n",
        )
        .unwrap();
        let raw = RawConfig::from_file(&path).unwrap();
        assert_eq!(raw.socket_server_host.as_deref(), Some("h"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = RawConfig::from_file(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn summary_masks_api_key() {
        let cfg = BridgeConfig::from_raw(minimal()).unwrap();
        let summary = cfg.redacted_summary();
        assert!(!summary.contains("secret-key-123456"), "{summary}");
        assert!(summary.contains("****3456"), "{summary}");
        assert!(summary.contains("feed.example.com:9100"));
    }
}
