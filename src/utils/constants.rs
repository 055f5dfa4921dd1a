/// Agent defaults and limits

use std::time::Duration;

/// Collection cycle period when none is configured
pub const DEFAULT_FREQUENCY_SECONDS: u64 = 60;

/// Accepted range for the collection period, in seconds
pub const MIN_FREQUENCY_SECONDS: u64 = 1;
pub const MAX_FREQUENCY_SECONDS: u64 = 180;

/// Upper bound for one provider call
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for one publish call
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_REST_ADDRESS: &str = "0.0.0.0:8080";

/// MQTT push defaults
pub const DEFAULT_MQTT_BROKER: &str = "tcp://localhost:1883";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_CLIENT_ID: &str = "edgebeat";
pub const DEFAULT_MQTT_TOPIC: &str = "edgebeat/metrics";
pub const DEFAULT_MQTT_QOS: u8 = 1;
pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Broker reconnection back-off, doubled after each failure
pub const MQTT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const MQTT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default paths
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";
pub const CONFIG_DIR_NAME: &str = "edgebeat";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Environment overrides
pub const ENV_CONFIG: &str = "EDGEBEAT_CONFIG";
pub const ENV_FREQUENCY_SECONDS: &str = "EDGEBEAT_FREQUENCY_SECONDS";
pub const ENV_REST_ADDRESS: &str = "EDGEBEAT_REST_ADDRESS";
pub const ENV_PUBLISH_URL: &str = "EDGEBEAT_PUBLISH_URL";
pub const ENV_LOG_LEVEL: &str = "EDGEBEAT_LOG_LEVEL";
pub const ENV_MQTT_PASSWORD: &str = "EDGEBEAT_MQTT_PASSWORD";
