//! Daemon configuration, read from the environment (and `.env` via dotenvy).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tutor_core::executor::ExecutorConfig;

pub const DEFAULT_PORT: u16 = 7421;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5-coder:7b";
const DEFAULT_TRACK: &str = "practice";
const DEFAULT_SANDBOX_IDLE_SECS: u64 = 30 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("no platform data directory found; set TUTOR_DATA_DIR")]
    NoDataDir,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Selects the Postgres backend when set
    pub database_url: Option<String>,
    pub exercises_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub default_track: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub default_provider: Option<String>,
    pub executor: ExecutorConfig,
    pub sandbox_root: PathBuf,
    pub sandbox_idle: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = match get("TUTOR_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join("tutor"))
                .ok_or(ConfigError::NoDataDir)?,
        };

        let defaults = ExecutorConfig::default();
        let exec_timeout = parse_or("TUTOR_EXEC_TIMEOUT_SECS", get("TUTOR_EXEC_TIMEOUT_SECS"), 30u64)?;
        if exec_timeout == 0 {
            return Err(ConfigError::Invalid {
                var: "TUTOR_EXEC_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            bind: parse_or("TUTOR_BIND", get("TUTOR_BIND"), IpAddr::V4(Ipv4Addr::LOCALHOST))?,
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
            database_url: get("DATABASE_URL"),
            exercises_dir: get("TUTOR_EXERCISES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("exercises")),
            specs_dir: get("TUTOR_SPECS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("specs")),
            sandbox_root: get("TUTOR_SANDBOX_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("sandboxes")),
            default_track: get("TUTOR_DEFAULT_TRACK").unwrap_or_else(|| DEFAULT_TRACK.to_string()),
            ollama_url: get("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            ollama_model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            default_provider: get("TUTOR_DEFAULT_PROVIDER"),
            executor: ExecutorConfig {
                format_check: get("TUTOR_FORMAT_CMD").unwrap_or(defaults.format_check),
                format_fix: get("TUTOR_FORMAT_FIX_CMD").unwrap_or(defaults.format_fix),
                build: get("TUTOR_BUILD_CMD").unwrap_or(defaults.build),
                test: get("TUTOR_TEST_CMD").unwrap_or(defaults.test),
                timeout: Duration::from_secs(exec_timeout),
            },
            sandbox_idle: Duration::from_secs(parse_or(
                "TUTOR_SANDBOX_IDLE_SECS",
                get("TUTOR_SANDBOX_IDLE_SECS"),
                DEFAULT_SANDBOX_IDLE_SECS,
            )?),
            data_dir,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_hang_off_the_data_dir() {
        let config = config_from(&[("TUTOR_DATA_DIR", "/var/lib/tutor")]).expect("config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.exercises_dir, PathBuf::from("/var/lib/tutor/exercises"));
        assert_eq!(config.specs_dir, PathBuf::from("/var/lib/tutor/specs"));
        assert_eq!(config.sandbox_root, PathBuf::from("/var/lib/tutor/sandboxes"));
        assert_eq!(config.default_track, "practice");
        assert_eq!(config.ollama_url, DEFAULT_OLLAMA_URL);
        assert!(config.database_url.is_none());
        assert!(config.default_provider.is_none());
        assert_eq!(config.executor.timeout, Duration::from_secs(30));
        assert_eq!(config.sandbox_idle, Duration::from_secs(DEFAULT_SANDBOX_IDLE_SECS));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("TUTOR_DATA_DIR", "/data"),
            ("PORT", "9000"),
            ("TUTOR_BIND", "0.0.0.0"),
            ("DATABASE_URL", "postgres://tutor@localhost/tutor"),
            ("TUTOR_SPECS_DIR", "/work/specs"),
            ("TUTOR_DEFAULT_TRACK", "guided"),
            ("TUTOR_DEFAULT_PROVIDER", "ollama"),
            ("TUTOR_BUILD_CMD", "cargo build"),
            ("TUTOR_EXEC_TIMEOUT_SECS", "5"),
            ("TUTOR_SANDBOX_IDLE_SECS", "60"),
        ])
        .expect("config");
        assert_eq!(config.listen_addr(), "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.database_url.as_deref(), Some("postgres://tutor@localhost/tutor"));
        assert_eq!(config.specs_dir, PathBuf::from("/work/specs"));
        assert_eq!(config.exercises_dir, PathBuf::from("/data/exercises"));
        assert_eq!(config.default_track, "guided");
        assert_eq!(config.default_provider.as_deref(), Some("ollama"));
        assert_eq!(config.executor.build, "cargo build");
        assert_eq!(config.executor.test, ExecutorConfig::default().test);
        assert_eq!(config.executor.timeout, Duration::from_secs(5));
        assert_eq!(config.sandbox_idle, Duration::from_secs(60));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("TUTOR_DATA_DIR", "/data"), ("PORT", "  "), ("DATABASE_URL", "")])
            .expect("config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = config_from(&[("TUTOR_DATA_DIR", "/data"), ("PORT", "seventy")])
            .expect_err("bad port");
        assert!(matches!(err, ConfigError::Invalid { var: "PORT", .. }));

        let err = config_from(&[("TUTOR_DATA_DIR", "/data"), ("TUTOR_EXEC_TIMEOUT_SECS", "0")])
            .expect_err("zero timeout");
        assert!(matches!(err, ConfigError::Invalid { var: "TUTOR_EXEC_TIMEOUT_SECS", .. }));
    }
}
