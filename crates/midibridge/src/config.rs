use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::session::{DEFAULT_CLIENT_NAME, DEFAULT_PORT_NAME};

/// Persisted bridge settings stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name registered with the native MIDI subsystem.
    pub client_name: String,
    /// Name of the input port.
    pub port_name: String,
    /// Poll interval for backends without native topology notifications.
    pub hotplug_poll_ms: u64,
    /// Name of the device opened most recently.
    pub last_device: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.into(),
            port_name: DEFAULT_PORT_NAME.into(),
            hotplug_poll_ms: 1000,
            last_device: None,
        }
    }
}

impl BridgeConfig {
    pub fn hotplug_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms.max(10))
    }
}

/// Default settings file location.
pub fn settings_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir()?;
    base.push("MidiBridge");
    base.push("bridge.json");
    Some(base)
}

/// Load settings from the default location. Returns defaults if loading fails.
pub fn load() -> BridgeConfig {
    let Some(path) = settings_path() else {
        return BridgeConfig::default();
    };
    match load_from(&path) {
        Ok(config) => config,
        Err(err) => {
            tracing::debug!(?err, "using default midi bridge settings");
            BridgeConfig::default()
        }
    }
}

/// Save settings to the default location.
pub fn save(config: &BridgeConfig) {
    let Some(path) = settings_path() else {
        return;
    };
    if let Err(err) = save_to(&path, config) {
        tracing::warn!(?err, "failed to write midi bridge settings");
    }
}

/// Load settings from an explicit path.
pub fn load_from(path: &Path) -> anyhow::Result<BridgeConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid settings file", path.display()))
}

/// Save settings to an explicit path, creating parent directories.
pub fn save_to(path: &Path, config: &BridgeConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_and_loads_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.json");
        let config = BridgeConfig {
            last_device: Some("Keystation 49".into()),
            hotplug_poll_ms: 250,
            ..BridgeConfig::default()
        };
        save_to(&path, &config).unwrap();
        assert_eq!(load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        fs::write(&path, r#"{ "client_name": "stage-rig" }"#).unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.client_name, "stage-rig");
        assert_eq!(config.port_name, DEFAULT_PORT_NAME);
        assert_eq!(config.last_device, None);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let config = BridgeConfig {
            hotplug_poll_ms: 0,
            ..BridgeConfig::default()
        };
        assert_eq!(config.hotplug_poll_interval(), Duration::from_millis(10));
    }
}
