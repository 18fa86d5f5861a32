use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "redis_addr_default")]
    pub redis_addr: String,
    #[serde(default = "ttl_secs_default")]
    pub ttl_secs: u64,
    #[serde(default = "request_timeout_secs_default")]
    pub request_timeout_secs: u64,
    #[serde(default = "log_level_default")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_addr: redis_addr_default(),
            ttl_secs: ttl_secs_default(),
            request_timeout_secs: request_timeout_secs_default(),
            log_level: log_level_default(),
        }
    }
}

impl Config {
    fn get_config_dir() -> anyhow::Result<path::PathBuf> {
        let config_dir = if let Ok(xdg_path) = env::var("XDG_CONFIG_HOME") {
            path::PathBuf::from(&xdg_path)
        } else {
            let home = env::var("HOME").with_context(|| "neither XDG_CONFIG_HOME nor HOME is set")?;
            path::Path::new(&home).join(".config")
        };

        Ok(config_dir.join("web_cache"))
    }

    /// Load the config from `$WEB_CACHE_CFG_PATH`, or from `web_cache/config.toml` under the
    /// user config directory.
    pub fn from_path() -> anyhow::Result<Self> {
        let file_path = if let Ok(cfg_path) = env::var("WEB_CACHE_CFG_PATH") {
            path::PathBuf::from(cfg_path)
        } else {
            Self::get_config_dir()
                .with_context(|| "fail to locate config directory")?
                .join("config.toml")
        };

        if !file_path.exists() {
            anyhow::bail!("Config file not found in {file_path:?}");
        }
        let content = fs::read_to_string(file_path).with_context(|| "fail to read config file")?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).with_context(|| "fail to parse config from toml")
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Filter built from `log_level`, which takes either a bare level or full directives like
    /// `web_cache=debug,warn`. The caller installs it with its own subscriber.
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        EnvFilter::try_new(&self.log_level)
            .with_context(|| format!("invalid log level `{}`", self.log_level))
    }
}

fn redis_addr_default() -> String {
    "redis://localhost:6379".to_string()
}

fn ttl_secs_default() -> u64 {
    10
}

fn request_timeout_secs_default() -> u64 {
    30
}

fn log_level_default() -> String {
    "INFO".to_string()
}

#[test]
fn validate_file_correctness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let config = r#"
        redis_addr = "redis://cache.internal:6380"
        ttl_secs = 60
        request_timeout_secs = 5
        log_level = "DEBUG"
    "#;
    fs::write(&path, config).unwrap();

    // the only test touching this variable
    env::set_var("WEB_CACHE_CFG_PATH", &path);
    let config = Config::from_path().unwrap();
    env::remove_var("WEB_CACHE_CFG_PATH");

    assert_eq!(config.redis_addr, "redis://cache.internal:6380");
    assert_eq!(config.ttl(), Duration::from_secs(60));
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.log_level, "DEBUG");
}

#[test]
fn validate_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.redis_addr, "redis://localhost:6379");
    assert_eq!(config.ttl(), Duration::from_secs(10));
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.log_level, "INFO");

    let partial = Config::from_toml("ttl_secs = 3").unwrap();
    assert_eq!(partial.ttl_secs, 3);
    assert_eq!(partial.redis_addr, Config::default().redis_addr);
}

#[test]
fn log_level_builds_filter() {
    assert!(Config::default().env_filter().is_ok());

    let config = Config::from_toml(r#"log_level = "web_cache=debug,warn""#).unwrap();
    assert!(config.env_filter().is_ok());

    let config = Config::from_toml(r#"log_level = "web_cache=notalevel""#).unwrap();
    let err = config.env_filter().unwrap_err();
    assert!(err.to_string().contains("web_cache=notalevel"));
}

#[test]
fn reject_malformed_config() {
    assert!(Config::from_toml("ttl_secs = \"ten\"").is_err());
}
