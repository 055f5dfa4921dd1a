/// Agent configuration
///
/// Read from YAML or TOML, then layered with environment and command-line
/// overrides, then validated once as a whole.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::mqtt::{parse_broker, qos_from};
use crate::utils::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CONFIG_PATH, DEFAULT_FREQUENCY_SECONDS, DEFAULT_LOG_LEVEL,
    DEFAULT_MQTT_BROKER, DEFAULT_MQTT_CLIENT_ID, DEFAULT_MQTT_QOS, DEFAULT_MQTT_TOPIC,
    DEFAULT_PROVIDER_TIMEOUT, DEFAULT_PUBLISH_TIMEOUT, DEFAULT_REST_ADDRESS, ENV_CONFIG,
    ENV_FREQUENCY_SECONDS, ENV_LOG_LEVEL, ENV_MQTT_PASSWORD, ENV_PUBLISH_URL, ENV_REST_ADDRESS,
    MAX_FREQUENCY_SECONDS, MIN_FREQUENCY_SECONDS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collection period in seconds
    pub frequency_seconds: u64,
    pub provider_timeout_seconds: u64,
    pub rest: RestConfig,
    pub publish: PublishConfig,
    pub mqtt: MqttConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub address: String,
    pub enabled: bool,
    /// Send permissive CORS headers
    pub cors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_seconds: u64,
    pub headers: BTreeMap<String, String>,
}

/// MQTT push sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    /// `tcp://host:port`, `mqtt://host:port` or `host:port`
    pub broker: String,
    pub client_id: String,
    pub topic: String,
    pub username: String,
    pub password: String,
    pub qos: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            frequency_seconds: DEFAULT_FREQUENCY_SECONDS,
            provider_timeout_seconds: DEFAULT_PROVIDER_TIMEOUT.as_secs(),
            rest: RestConfig::default(),
            publish: PublishConfig::default(),
            mqtt: MqttConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_REST_ADDRESS.to_string(),
            enabled: true,
            cors: false,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout_seconds: DEFAULT_PUBLISH_TIMEOUT.as_secs(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: DEFAULT_MQTT_BROKER.to_string(),
            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
            topic: DEFAULT_MQTT_TOPIC.to_string(),
            username: String::new(),
            password: String::new(),
            qos: DEFAULT_MQTT_QOS,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Overrides taken from the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub interval: Option<Duration>,
    pub address: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl AgentConfig {
    /// Find the config file to use, if any
    ///
    /// Explicit path, then `EDGEBEAT_CONFIG`, then `configs/config.yaml`, then
    /// the per-user config directory.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(ENV_CONFIG) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let local = PathBuf::from(DEFAULT_CONFIG_PATH);
        if local.exists() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Load configuration from a YAML or TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let config = if contents.trim().is_empty() {
            Self::default()
        } else if is_toml {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?
        };

        Ok(config)
    }

    /// Resolve, read, override from the environment and validate
    pub fn load(explicit: Option<&Path>, cli: &CliOverrides) -> Result<(Self, Option<PathBuf>)> {
        let path = Self::resolve_path(explicit);
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli)?;
        config.ensure_valid()?;

        Ok((config, path))
    }

    /// Apply `EDGEBEAT_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = non_empty(ENV_FREQUENCY_SECONDS) {
            self.frequency_seconds = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got {:?}", ENV_FREQUENCY_SECONDS, raw))?;
        }
        if let Some(address) = non_empty(ENV_REST_ADDRESS) {
            self.rest.address = address.trim().to_string();
        }
        if let Some(url) = non_empty(ENV_PUBLISH_URL) {
            self.publish.url = url.trim().to_string();
            self.publish.enabled = true;
        }
        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log.level = level.trim().to_string();
        }
        // kept out of config files
        if let Some(password) = non_empty(ENV_MQTT_PASSWORD) {
            self.mqtt.password = password;
        }

        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) -> Result<()> {
        if let Some(interval) = cli.interval {
            if interval.subsec_nanos() != 0 {
                bail!(
                    "--interval must be a whole number of seconds, got {}",
                    humantime::format_duration(interval)
                );
            }
            self.frequency_seconds = interval.as_secs();
        }
        if let Some(address) = &cli.address {
            self.rest.address = address.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log.level = level.clone();
        }
        if cli.json_logs {
            self.log.format = LogFormat::Json;
        }

        Ok(())
    }

    /// Validate configuration, returning every problem found
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(MIN_FREQUENCY_SECONDS..=MAX_FREQUENCY_SECONDS).contains(&self.frequency_seconds) {
            errors.push(format!(
                "frequency_seconds must be within {}..={}, got {}",
                MIN_FREQUENCY_SECONDS, MAX_FREQUENCY_SECONDS, self.frequency_seconds
            ));
        }

        if self.provider_timeout_seconds == 0 {
            errors.push("provider_timeout_seconds must be at least 1".to_string());
        }

        if self.rest.enabled {
            if let Err(err) = self.rest_address() {
                errors.push(err.to_string());
            }
        }

        if self.publish.enabled {
            if self.publish.url.trim().is_empty() {
                errors.push("publish.url is required when publishing is enabled".to_string());
            } else if !self.publish.url.starts_with("http://") && !self.publish.url.starts_with("https://") {
                errors.push(format!("publish.url must be an http(s) URL, got {}", self.publish.url));
            }
            if self.publish.timeout_seconds == 0 {
                errors.push("publish.timeout_seconds must be at least 1".to_string());
            }
        }

        if self.mqtt.enabled {
            if let Err(err) = parse_broker(&self.mqtt.broker) {
                errors.push(format!("mqtt.broker: {}", err));
            }
            if self.mqtt.client_id.trim().is_empty() {
                errors.push("mqtt.client_id is required when mqtt is enabled".to_string());
            }
            let topic = self.mqtt.topic.trim();
            if topic.is_empty() {
                errors.push("mqtt.topic is required when mqtt is enabled".to_string());
            } else if topic.contains(|c| c == '+' || c == '#') {
                errors.push(format!("mqtt.topic must not contain wildcards, got {}", topic));
            }
            if let Err(err) = qos_from(self.mqtt.qos) {
                errors.push(format!("mqtt.qos: {}", err));
            }
        }

        errors
    }

    /// Copy safe to print, with secrets masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.mqtt.password.is_empty() {
            config.mqtt.password = "********".to_string();
        }
        config
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if !errors.is_empty() {
            bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.frequency_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish.timeout_seconds)
    }

    /// Listen address for the HTTP read path; empty means the default
    pub fn rest_address(&self) -> Result<SocketAddr> {
        let address = match self.rest.address.trim() {
            "" => DEFAULT_REST_ADDRESS,
            address => address,
        };
        address
            .parse()
            .with_context(|| format!("rest.address is not a valid socket address: {}", address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_config(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_yaml_config() {
        let file = temp_config(
            ".yaml",
            "frequency_seconds: 30\nrest:\n  address: 127.0.0.1:9100\npublish:\n  enabled: true\n  url: http://collector.local/ingest\n  headers:\n    X-Site: plant-7\n",
        );

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.rest.address, "127.0.0.1:9100");
        assert!(config.rest.enabled);
        assert!(config.publish.enabled);
        assert_eq!(config.publish.headers.get("X-Site").map(String::as_str), Some("plant-7"));
        assert_eq!(config.provider_timeout_seconds, 10);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_toml_config() {
        let file = temp_config(
            ".toml",
            "frequency_seconds = 15\n\n[log]\nlevel = \"debug\"\nformat = \"json\"\n",
        );

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.frequency_seconds, 15);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.rest.address, DEFAULT_REST_ADDRESS);
    }

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let file = temp_config(".yml", "");
        assert_eq!(AgentConfig::from_file(file.path()).unwrap(), AgentConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = temp_config(".yaml", "frequency_seconds: [oops\n");
        assert!(AgentConfig::from_file(file.path()).is_err());
        assert!(AgentConfig::from_file("/nonexistent/edgebeat.yaml").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env(&[
                (ENV_FREQUENCY_SECONDS, "5"),
                (ENV_REST_ADDRESS, "127.0.0.1:9000"),
                (ENV_PUBLISH_URL, "https://collector.local/ingest"),
                (ENV_LOG_LEVEL, ""),
            ]))
            .unwrap();

        assert_eq!(config.frequency_seconds, 5);
        assert_eq!(config.rest.address, "127.0.0.1:9000");
        assert!(config.publish.enabled);
        assert_eq!(config.log.level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_non_numeric_frequency_override_is_an_error() {
        let mut config = AgentConfig::default();
        assert!(config.apply_env(env(&[(ENV_FREQUENCY_SECONDS, "fast")])).is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = AgentConfig::default();
        config
            .apply_cli(&CliOverrides {
                interval: Some(Duration::from_secs(90)),
                address: Some("[::1]:8181".to_string()),
                log_level: Some("warn".to_string()),
                json_logs: true,
            })
            .unwrap();

        assert_eq!(config.frequency_seconds, 90);
        assert_eq!(config.rest_address().unwrap().port(), 8181);
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_sub_second_cli_interval_is_rejected() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_cli(&CliOverrides {
                interval: Some(Duration::from_millis(1500)),
                ..Default::default()
            })
            .unwrap_err();

        assert!(err.to_string().contains("whole number of seconds"));
        assert_eq!(config.frequency_seconds, DEFAULT_FREQUENCY_SECONDS);
    }

    #[test]
    fn test_mqtt_section() {
        let file = temp_config(
            ".yaml",
            "mqtt:\n  enabled: true\n  broker: tcp://broker.plant.local:8883\n  client_id: edge-42\n  topic: plant/7/metrics\n  username: edge\n  qos: 2\n",
        );

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.broker, "tcp://broker.plant.local:8883");
        assert_eq!(config.mqtt.client_id, "edge-42");
        assert_eq!(config.mqtt.topic, "plant/7/metrics");
        assert_eq!(config.mqtt.username, "edge");
        assert_eq!(config.mqtt.qos, 2);
        assert!(config.validate().is_empty());

        let defaults = AgentConfig::default().mqtt;
        assert!(!defaults.enabled);
        assert_eq!(defaults.qos, 1);
        assert_eq!(defaults.topic, "edgebeat/metrics");
    }

    #[test]
    fn test_mqtt_validation() {
        let mut config = AgentConfig::default();
        config.mqtt.enabled = true;
        assert!(config.validate().is_empty());

        config.mqtt.broker = "ws://broker:80".to_string();
        config.mqtt.topic = "plant/#".to_string();
        config.mqtt.qos = 3;
        let errors = config.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("mqtt.broker"));
        assert!(errors[1].contains("wildcards"));
        assert!(errors[2].starts_with("mqtt.qos"));

        // a disabled sink is not checked
        config.mqtt.enabled = false;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_mqtt_password_from_env_is_redacted() {
        let mut config = AgentConfig::default();
        config.apply_env(env(&[(ENV_MQTT_PASSWORD, "s3cret")])).unwrap();
        assert_eq!(config.mqtt.password, "s3cret");

        let printable = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!printable.contains("s3cret"));
        assert_eq!(config.redacted().mqtt.password, "********");
    }

    #[test]
    fn test_validation() {
        let mut config = AgentConfig::default();
        assert!(config.ensure_valid().is_ok());

        config.frequency_seconds = 0;
        config.publish.enabled = true;
        config.rest.address = "not-an-address".to_string();
        let errors = config.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("frequency_seconds"));

        config.frequency_seconds = MAX_FREQUENCY_SECONDS + 1;
        assert!(config.ensure_valid().is_err());

        // a disabled REST server does not need a usable address
        let mut quiet = AgentConfig::default();
        quiet.rest.enabled = false;
        quiet.rest.address = "nowhere".to_string();
        assert!(quiet.validate().is_empty());
    }

    #[test]
    fn test_empty_rest_address_falls_back_to_default() {
        let mut config = AgentConfig::default();
        config.rest.address = "  ".to_string();
        assert_eq!(config.rest_address().unwrap().port(), 8080);
    }

    #[test]
    fn test_explicit_path_wins() {
        let file = temp_config(".yaml", "frequency_seconds: 20\n");
        assert_eq!(AgentConfig::resolve_path(Some(file.path())), Some(file.path().to_path_buf()));
    }
}
