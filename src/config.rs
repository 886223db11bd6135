use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::NodeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub mqtt_config: MqttConfig,
    pub classifier_config: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub input_topic: String,
    pub output_topic: String,
    pub status_topic: String,
}

/// Shape of the result payload. A closed set: anything else is rejected when
/// the configuration is parsed, never during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Best,
    All,
}

impl FromStr for OutputMode {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, NodeError> {
        match s {
            "best" => Ok(OutputMode::Best),
            "all" => Ok(OutputMode::All),
            other => Err(NodeError::Config(format!(
                "unknown output mode: {}",
                other
            ))),
        }
    }
}

/// Classifier settings, supplied once at node construction and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Only "online" is supported; anything else is rejected at load time.
    pub mode: String,
    /// Base URL; `model.json` / `metadata.json` are appended verbatim.
    pub model_url: String,
    pub active_threshold: bool,
    /// Minimum probability as a percentage (0-100).
    pub threshold: f32,
    pub active_max_results: bool,
    pub max_results: usize,
    pub output: OutputMode,
    pub pass_through: bool,
}

impl ClassifierConfig {
    /// Setup-time validation. Mode and URL are deliberately left to the model
    /// loader, which reports them through the status indicator.
    pub fn validate(&self) -> Result<(), NodeError> {
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(NodeError::Config(format!(
                "threshold must be within 0-100, got {}",
                self.threshold
            )));
        }
        if self.active_max_results && self.max_results == 0 {
            return Err(NodeError::Config(
                "max results must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env_or("API_HOST", "0.0.0.0");
        let api_port = env_parse("API_PORT", 8080);

        // MQTT Configuration
        let mqtt_config = MqttConfig {
            enabled: env_parse("MQTT_ENABLED", true),
            broker_host: env_or("MQTT_BROKER_HOST", "localhost"),
            broker_port: env_parse("MQTT_BROKER_PORT", 1883),
            client_id: env_or(
                "MQTT_CLIENT_ID",
                &format!("classifier-node-{}", uuid::Uuid::new_v4()),
            ),
            input_topic: env_or("MQTT_INPUT_TOPIC", "classifier/input"),
            output_topic: env_or("MQTT_OUTPUT_TOPIC", "classifier/output"),
            status_topic: env_or("MQTT_STATUS_TOPIC", "classifier/status"),
        };

        // Classifier Configuration
        let output = env_or("OUTPUT_MODE", "best")
            .parse::<OutputMode>()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let classifier_config = ClassifierConfig {
            mode: env_or("MODEL_MODE", "online"),
            model_url: env_or("MODEL_URL", ""),
            active_threshold: env_parse("ACTIVE_THRESHOLD", false),
            threshold: env_parse("THRESHOLD", 50.0),
            active_max_results: env_parse("ACTIVE_MAX_RESULTS", false),
            max_results: env_parse("MAX_RESULTS", 10),
            output,
            pass_through: env_parse("PASS_THROUGH", false),
        };
        classifier_config
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(Self {
            api_host,
            api_port,
            mqtt_config,
            classifier_config,
        })
    }
}
