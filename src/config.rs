use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::ingest::is_stub_source;

const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:11434/api/generate";
const DEFAULT_CLASSIFIER_MODEL: &str = "llava";
const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_CLIENT_ID: &str = "vicinity_gate";
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_FRAME_BYTES: u32 = 32 * 1024 * 1024;

/// Port carrying the frame source identifier.
pub const FRAME_SOURCE_PORT: &str = "frame_source";
/// Port carrying the classifier response timeout in milliseconds.
pub const RESPONSE_TIMEOUT_PORT: &str = "response_timeout";

#[derive(Debug, Deserialize, Default)]
struct VicinityConfigFile {
    frame_source: Option<String>,
    response_timeout_ms: Option<u64>,
    tick_interval_ms: Option<u64>,
    classifier: Option<ClassifierConfigFile>,
    broker: Option<BrokerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    endpoint: Option<String>,
    model: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BrokerConfigFile {
    addr: Option<String>,
    client_id: Option<String>,
    allow_remote: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    max_frame_bytes: Option<u32>,
}

// ----------------------------------------------------------------------------
// Condition ports
// ----------------------------------------------------------------------------

/// The two options a condition is constructed with. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionPorts {
    pub frame_source: String,
    pub response_timeout: Duration,
}

impl ConditionPorts {
    pub fn new(frame_source: impl Into<String>, response_timeout: Duration) -> Result<Self> {
        let ports = Self {
            frame_source: frame_source.into(),
            response_timeout,
        };
        ports.validate()?;
        Ok(ports)
    }

    /// Build from host-supplied named options. Both ports are required.
    pub fn from_ports(ports: &HashMap<String, String>) -> Result<Self> {
        let frame_source = ports
            .get(FRAME_SOURCE_PORT)
            .ok_or_else(|| anyhow!("missing required port '{}'", FRAME_SOURCE_PORT))?;
        let timeout = ports
            .get(RESPONSE_TIMEOUT_PORT)
            .ok_or_else(|| anyhow!("missing required port '{}'", RESPONSE_TIMEOUT_PORT))?;
        Self::new(frame_source.trim(), parse_timeout_ms(timeout)?)
    }

    /// Port names and descriptions, for hosts that list them.
    pub fn provided_ports() -> &'static [(&'static str, &'static str)] {
        &[
            (FRAME_SOURCE_PORT, "Image topic which is subscribed to"),
            (
                RESPONSE_TIMEOUT_PORT,
                "Milliseconds to wait for the classifier verdict",
            ),
        ]
    }

    /// Both ports present and the timeout non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.frame_source.trim().is_empty() {
            return Err(anyhow!("{} is required", FRAME_SOURCE_PORT));
        }
        if self.response_timeout.is_zero() {
            return Err(anyhow!("{} must be greater than zero", RESPONSE_TIMEOUT_PORT));
        }
        Ok(())
    }
}

/// Parse a millisecond duration such as `"200"` or `"200ms"`.
pub fn parse_timeout_ms(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix("ms").unwrap_or(trimmed).trim();
    let millis: u64 = digits.parse().map_err(|_| {
        anyhow!(
            "{} must be an integer number of milliseconds, got '{}'",
            RESPONSE_TIMEOUT_PORT,
            raw
        )
    })?;
    Ok(Duration::from_millis(millis))
}

// ----------------------------------------------------------------------------
// Full configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// `http(s)://...` or `stub://clear|blocked|silent`.
    pub endpoint: String,
    pub model: String,
    /// Overrides the built-in question when set.
    pub prompt: Option<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CLASSIFIER_URL.to_string(),
            model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            prompt: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub addr: String,
    pub client_id: String,
    pub allow_remote: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Largest MQTT packet accepted from the broker; one image message each.
    pub max_frame_bytes: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BROKER_ADDR.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            allow_remote: false,
            username: None,
            password: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VicinityConfig {
    pub frame_source: String,
    pub response_timeout: Duration,
    pub tick_interval: Duration,
    pub classifier: ClassifierSettings,
    pub broker: BrokerSettings,
}

impl VicinityConfig {
    /// Load from the JSON file named by `VICINITY_CONFIG` (if set), then
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VICINITY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let cfg = Self::read(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// File and environment layers without validation, for callers that
    /// apply further overrides first.
    pub fn read(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => VicinityConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn ports(&self) -> ConditionPorts {
        ConditionPorts {
            frame_source: self.frame_source.clone(),
            response_timeout: self.response_timeout,
        }
    }

    fn from_file(file: VicinityConfigFile) -> Self {
        let classifier = file.classifier.unwrap_or_default();
        let broker = file.broker.unwrap_or_default();
        let defaults = BrokerSettings::default();
        Self {
            frame_source: file.frame_source.unwrap_or_default(),
            response_timeout: Duration::from_millis(file.response_timeout_ms.unwrap_or(0)),
            tick_interval: Duration::from_millis(
                file.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
            classifier: ClassifierSettings {
                endpoint: classifier
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
                model: classifier
                    .model
                    .unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string()),
                prompt: classifier.prompt,
            },
            broker: BrokerSettings {
                addr: broker.addr.unwrap_or(defaults.addr),
                client_id: broker.client_id.unwrap_or(defaults.client_id),
                allow_remote: broker.allow_remote.unwrap_or(defaults.allow_remote),
                username: broker.username,
                password: broker.password,
                max_frame_bytes: broker.max_frame_bytes.unwrap_or(defaults.max_frame_bytes),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_empty_env("VICINITY_FRAME_SOURCE") {
            self.frame_source = source;
        }
        if let Some(timeout) = non_empty_env("VICINITY_RESPONSE_TIMEOUT_MS") {
            self.response_timeout = parse_timeout_ms(&timeout)
                .map_err(|e| anyhow!("VICINITY_RESPONSE_TIMEOUT_MS: {}", e))?;
        }
        if let Some(url) = non_empty_env("VICINITY_CLASSIFIER_URL") {
            self.classifier.endpoint = url;
        }
        if let Some(model) = non_empty_env("VICINITY_CLASSIFIER_MODEL") {
            self.classifier.model = model;
        }
        if let Some(addr) = non_empty_env("VICINITY_MQTT_BROKER") {
            self.broker.addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.ports().validate()?;
        if self.tick_interval.is_zero() {
            return Err(anyhow!("tick_interval must be greater than zero"));
        }
        let endpoint = self.classifier.endpoint.as_str();
        if !(endpoint.starts_with("http://")
            || endpoint.starts_with("https://")
            || endpoint.starts_with("stub://"))
        {
            return Err(anyhow!(
                "classifier endpoint must be http(s):// or stub://, got '{}'",
                endpoint
            ));
        }
        if !is_stub_source(&self.frame_source) {
            if self.broker.addr.trim().is_empty() {
                return Err(anyhow!("broker address is required for MQTT frame sources"));
            }
            if self.broker.max_frame_bytes == 0 {
                return Err(anyhow!("broker.max_frame_bytes must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<VicinityConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ports_parse_both_options() {
        let parsed = ConditionPorts::from_ports(&ports(&[
            ("frame_source", "/camera/depth/image_raw"),
            ("response_timeout", "250"),
        ]))
        .unwrap();
        assert_eq!(parsed.frame_source, "/camera/depth/image_raw");
        assert_eq!(parsed.response_timeout, Duration::from_millis(250));
    }

    #[test]
    fn ports_accept_ms_suffix() {
        assert_eq!(parse_timeout_ms("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_timeout_ms(" 15 ").unwrap(), Duration::from_millis(15));
    }

    #[test]
    fn ports_require_both_options() {
        let err = ConditionPorts::from_ports(&ports(&[("frame_source", "cam")])).unwrap_err();
        assert!(err.to_string().contains("response_timeout"));

        let err = ConditionPorts::from_ports(&ports(&[("response_timeout", "100")])).unwrap_err();
        assert!(err.to_string().contains("frame_source"));
    }

    #[test]
    fn ports_reject_bad_timeouts() {
        assert!(ConditionPorts::from_ports(&ports(&[
            ("frame_source", "cam"),
            ("response_timeout", "soon"),
        ]))
        .is_err());
        assert!(ConditionPorts::from_ports(&ports(&[
            ("frame_source", "cam"),
            ("response_timeout", "0"),
        ]))
        .is_err());
    }

    #[test]
    fn provided_ports_lists_both() {
        let names: Vec<&str> = ConditionPorts::provided_ports()
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names, vec![FRAME_SOURCE_PORT, RESPONSE_TIMEOUT_PORT]);
    }

    #[test]
    fn file_defaults_fill_optional_sections() {
        let file: VicinityConfigFile =
            serde_json::from_str(r#"{"frame_source": "stub://cam", "response_timeout_ms": 300}"#)
                .unwrap();
        let cfg = VicinityConfig::from_file(file);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.classifier.endpoint, DEFAULT_CLASSIFIER_URL);
        assert_eq!(cfg.broker.addr, DEFAULT_BROKER_ADDR);
        assert_eq!(cfg.tick_interval, Duration::from_millis(DEFAULT_TICK_INTERVAL_MS));
        assert_eq!(cfg.broker.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn max_frame_bytes_is_configurable() {
        let file: VicinityConfigFile = serde_json::from_str(
            r#"{"frame_source": "camera/depth", "response_timeout_ms": 300,
                "broker": {"max_frame_bytes": 4194304}}"#,
        )
        .unwrap();
        let cfg = VicinityConfig::from_file(file);
        assert_eq!(cfg.broker.max_frame_bytes, 4 * 1024 * 1024);
        assert!(cfg.validate().is_ok());

        let mut zero = cfg.clone();
        zero.broker.max_frame_bytes = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_classifier_scheme() {
        let file: VicinityConfigFile = serde_json::from_str(
            r#"{"frame_source": "cam", "response_timeout_ms": 300,
                "classifier": {"endpoint": "grpc://model"}}"#,
        )
        .unwrap();
        assert!(VicinityConfig::from_file(file).validate().is_err());
    }
}
