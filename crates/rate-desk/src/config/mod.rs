use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the pricing service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub ingestion: IngestionSettings,
    pub model: ModelConfig,
    pub downloader: DownloaderConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        );

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            ingestion: IngestionSettings::load()?,
            model: ModelConfig::load(),
            downloader: DownloaderConfig::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Log line encoding; JSON suits shipped environments, text suits a
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Worker-pool and deadline dials for the ingestion coordinator.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub worker_concurrency: usize,
    pub ai_timeout_secs: u64,
    pub deterministic_timeout_secs: u64,
    pub transcript_char_limit: usize,
}

impl IngestionSettings {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            worker_concurrency: parse_env("INGEST_WORKERS", 2)?,
            ai_timeout_secs: parse_env("AI_TIMEOUT_SECS", 120)?,
            deterministic_timeout_secs: parse_env("DETERMINISTIC_TIMEOUT_SECS", 30)?,
            transcript_char_limit: parse_env("TRANSCRIPT_CHAR_LIMIT", 100_000)?,
        })
    }
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            ai_timeout_secs: 120,
            deterministic_timeout_secs: 30,
            transcript_char_limit: 100_000,
        }
    }
}

/// Connection details for the completion endpoint backing the AI extractor.
/// Extraction falls back to deterministic parsers when no key is configured.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
}

impl ModelConfig {
    fn load() -> Self {
        Self {
            api_key: env::var("LLM_API_KEY").ok().filter(|key| !key.is_empty()),
            endpoint: env::var("LLM_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }

    pub fn configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Poll cadence and lender source map for the rate-sheet downloader.
///
/// `RATE_SHEET_URLS` is a comma-separated `lender-id=url` map, e.g.
/// `summit=https://summit.example.com/rates.pdf,coastal=https://coastal.example.com/llpa.csv`.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub download_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub sources: Vec<(String, String)>,
}

impl DownloaderConfig {
    fn load() -> Result<Self, ConfigError> {
        let raw = env::var("RATE_SHEET_URLS").unwrap_or_default();
        let mut sources = Vec::new();
        for entry in raw.split(',').filter(|entry| !entry.trim().is_empty()) {
            let (lender, url) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidSourceEntry {
                    entry: entry.to_string(),
                })?;
            sources.push((lender.trim().to_string(), url.trim().to_string()));
        }

        Ok(Self {
            download_timeout_secs: parse_env("DOWNLOAD_TIMEOUT_SECS", 30)?,
            poll_interval_secs: parse_env("RATE_SHEET_POLL_SECS", 900)?,
            sources,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
    InvalidSourceEntry { entry: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative number")
            }
            ConfigError::InvalidSourceEntry { entry } => {
                write!(f, "RATE_SHEET_URLS entry '{entry}' must look like lender-id=url")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "LLM_API_KEY",
            "INGEST_WORKERS",
            "RATE_SHEET_URLS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_format, LogFormat::Text);
        assert_eq!(config.ingestion.worker_concurrency, 2);
        assert_eq!(config.ingestion.ai_timeout_secs, 120);
        assert!(!config.model.configured());
        assert!(config.downloader.sources.is_empty());
    }

    #[test]
    fn log_format_recognizes_json() {
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("fancy"), LogFormat::Text);
    }

    #[test]
    fn parses_source_map() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var(
            "RATE_SHEET_URLS",
            "summit=https://summit.example.com/rates.csv, coastal=https://coastal.example.com/llpa.csv",
        );
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.downloader.sources.len(), 2);
        assert_eq!(config.downloader.sources[0].0, "summit");
        assert_eq!(
            config.downloader.sources[1].1,
            "https://coastal.example.com/llpa.csv"
        );
        env::remove_var("RATE_SHEET_URLS");
    }

    #[test]
    fn rejects_malformed_source_entry() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RATE_SHEET_URLS", "no-equals-sign");
        let error = AppConfig::load().expect_err("entry must be rejected");
        assert!(matches!(error, ConfigError::InvalidSourceEntry { .. }));
        env::remove_var("RATE_SHEET_URLS");
    }
}
