//! Logger configuration types.
//!
//! A configuration is a declarative description of one pipeline's stages.
//! The supervision core only cares about the display name and whether the
//! config declares any reading or writing stage; the stage bodies are handed
//! verbatim to the listener process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative description of one logger's pipeline.
///
/// Compared by deep structural equality; a push replaces a logger's config
/// wholesale, never patches it in place. Keys the core doesn't interpret
/// (e.g. host restrictions) are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transforms: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writers: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl LoggerConfig {
    /// Display name used in log lines and status records.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }
}

/// Is this configuration runnable, or does it just have a name and no
/// readers or writers? Only runnable configs get a live process.
pub fn runnable(config: Option<&LoggerConfig>) -> bool {
    config.is_some_and(|c| c.readers.is_some() || c.writers.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn null_config_is_not_runnable() {
        assert!(!runnable(None));
    }

    #[test]
    fn empty_config_is_not_runnable() {
        assert!(!runnable(Some(&LoggerConfig::default())));
    }

    #[test]
    fn name_and_transforms_alone_are_not_runnable() {
        let config = LoggerConfig {
            name: Some("gyro->net".into()),
            transforms: Some(json!({"class": "PrefixTransform"})),
            ..Default::default()
        };
        assert!(!runnable(Some(&config)));
    }

    #[test]
    fn readers_make_a_config_runnable() {
        let config = LoggerConfig {
            readers: Some(json!({"class": "SerialReader", "kwargs": {"port": "/dev/ttyr0"}})),
            ..Default::default()
        };
        assert!(runnable(Some(&config)));
    }

    #[test]
    fn writers_make_a_config_runnable() {
        let config = LoggerConfig {
            writers: Some(json!([{"class": "UdpWriter"}])),
            ..Default::default()
        };
        assert!(runnable(Some(&config)));
    }

    #[test]
    fn unknown_keys_are_kept_and_compared() {
        let doc = json!({
            "name": "knud->net",
            "host_id": "knud.host",
            "readers": {"class": "SerialReader"},
        });
        let a: LoggerConfig = serde_json::from_value(doc.clone()).unwrap();
        let b: LoggerConfig = serde_json::from_value(doc).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.extra["host_id"], json!("knud.host"));

        let c = LoggerConfig {
            extra: serde_json::Map::new(),
            ..a.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn display_name_falls_back_for_unnamed_configs() {
        assert_eq!(LoggerConfig::default().display_name(), "unknown");
    }
}
