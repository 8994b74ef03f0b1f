//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use voxline_voice::{RecognizerConfig, SynthesisConfig};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Streaming speech recognizer.
    #[serde(default)]
    pub recognizer: RecognizerConfig,

    /// Text-to-speech service and prefetch tuning.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxline_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recognizer
            .validate()
            .and_then(|()| self.synthesis.validate())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXLINE_HOST` overrides `server.host`
/// - `VOXLINE_PORT` overrides `server.port`
/// - `VOXLINE_LOG_LEVEL` overrides `logging.level`
/// - `VOXLINE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VOXLINE_RECOGNIZER_URL` overrides `recognizer.url`
/// - `VOXLINE_RECOGNIZER_API_KEY` overrides `recognizer.api_key`
/// - `VOXLINE_SYNTHESIS_API_KEY` overrides `synthesis.api_key`
/// - `VOXLINE_SYNTHESIS_VOICE_ID` overrides `synthesis.voice_id`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the resulting configuration fails validation.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Applies `VOXLINE_*` overrides read through `lookup`.
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("VOXLINE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("VOXLINE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("VOXLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("VOXLINE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = lookup("VOXLINE_RECOGNIZER_URL") {
        config.recognizer.url = url;
    }
    if let Some(key) = lookup("VOXLINE_RECOGNIZER_API_KEY") {
        config.recognizer.api_key = key;
    }
    if let Some(key) = lookup("VOXLINE_SYNTHESIS_API_KEY") {
        config.synthesis.api_key = key;
    }
    if let Some(voice) = lookup("VOXLINE_SYNTHESIS_VOICE_ID") {
        config.synthesis.voice_id = voice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Some("/nonexistent/voxline.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.recognizer.language, "et-EE");
        assert_eq!(config.synthesis.max_concurrency, 3);
    }

    #[test]
    fn file_sections_are_parsed() {
        let file = write_config(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9100

            [logging]
            level = "debug"
            json = true

            [recognizer]
            url = "wss://stt.example/listen"
            language = "en-US"
            queue_capacity = 8

            [synthesis]
            voice_id = "voice-x"
            max_concurrency = 5
            "#,
        );

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert!(config.logging.json);
        assert_eq!(config.recognizer.url, "wss://stt.example/listen");
        assert_eq!(config.recognizer.language, "en-US");
        assert_eq!(config.recognizer.queue_capacity, 8);
        assert_eq!(config.synthesis.voice_id, "voice-x");
        assert_eq!(config.synthesis.max_concurrency, 5);
        // Unset fields keep their defaults.
        assert_eq!(config.synthesis.frame_bytes, 8192);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let file = write_config("[server\nport = ");
        let result = load_config(file.path().to_str());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let file = write_config("[synthesis]\nmax_concurrency = 0\n");
        let result = load_config(file.path().to_str());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = Config::default();
        config.recognizer.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VOXLINE_PORT", "7000"),
            ("VOXLINE_LOG_JSON", "1"),
            ("VOXLINE_RECOGNIZER_URL", "ws://localhost:9000/listen"),
            ("VOXLINE_SYNTHESIS_API_KEY", "xi-secret"),
            ("VOXLINE_SYNTHESIS_VOICE_ID", "voice-env"),
        ]);
        let mut config = Config::default();

        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 7000);
        assert!(config.logging.json);
        assert_eq!(config.recognizer.url, "ws://localhost:9000/listen");
        assert_eq!(config.synthesis.api_key, "xi-secret");
        assert_eq!(config.synthesis.voice_id, "voice-env");
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "VOXLINE_PORT" => Some("not-a-port".to_string()),
            "VOXLINE_HOST" => Some("nowhere".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.recognizer.api_key = "rk-secret".to_string();
        config.synthesis.api_key = "xi-secret".to_string();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("rk-secret"));
        assert!(!rendered.contains("xi-secret"));
    }
}
