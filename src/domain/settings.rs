use crate::domain::models::PeerDescriptor;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default)]
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: LogRotation::default(),
        }
    }
}

/// How the serial link reaches the selected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// RFCOMM TTY bound by the OS, e.g. `/dev/rfcomm0`
    DeviceFile,
    /// Local socket served by a receiver simulator
    LocalSocket,
    /// Native RFCOMM socket (Windows)
    Rfcomm,
}

impl Default for TransportKind {
    fn default() -> Self {
        if cfg!(windows) {
            Self::Rfcomm
        } else {
            Self::DeviceFile
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpeedSourceSettings {
    /// NMEA 0183 stream from a GNSS receiver
    Nmea { path: String },
    /// Programmatically fed speed, for bench testing
    Simulated {
        #[serde(default)]
        mph: f64,
    },
}

impl Default for SpeedSourceSettings {
    fn default() -> Self {
        Self::Nmea {
            path: default_nmea_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Link Settings
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub known_peers: Vec<PeerDescriptor>,
    #[serde(default)]
    pub last_selected_peer: Option<String>,
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    // Telemetry Settings
    #[serde(default)]
    pub speed_source: SpeedSourceSettings,
    #[serde(default = "default_granted_capabilities")]
    pub granted_capabilities: Vec<String>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            transport: TransportKind::default(),
            known_peers: Vec::new(),
            last_selected_peer: None,
            keep_alive: default_true(),
            speed_source: SpeedSourceSettings::default(),
            granted_capabilities: default_granted_capabilities(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "spp_speed_relay".to_string()
}
fn default_nmea_path() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_granted_capabilities() -> Vec<String> {
    vec!["location".to_string()]
}
fn default_tick_interval_ms() -> u64 {
    100
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({:#})", e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("SppSpeedRelay");
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)
            .with_context(|| format!("Failed to write {}", self.settings_path.display()))?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Remember the picker's choice for the next run.
    pub fn remember_selection(&mut self, peer: Option<&PeerDescriptor>) -> anyhow::Result<()> {
        let id = peer.map(|p| p.id.clone());
        if self.settings.last_selected_peer != id {
            self.settings.last_selected_peer = id;
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "spp_speed_relay_settings_{}_{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir.join("settings.json")
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = temp_settings_path("missing");
        let _ = fs::remove_file(&path);
        let service = SettingsService::load(path);
        assert_eq!(service.get().tick_interval_ms, 100);
        assert_eq!(service.get().granted_capabilities, vec!["location"]);
        assert!(service.get().known_peers.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_settings_path("partial");
        fs::write(
            &path,
            r#"{
                "transport": "local_socket",
                "known_peers": [{ "id": "/tmp/vss.sock", "name": "bench" }],
                "speed_source": { "kind": "simulated", "mph": 12.5 }
            }"#,
        )
        .unwrap();

        let service = SettingsService::load(path);
        let settings = service.get();
        assert_eq!(settings.transport, TransportKind::LocalSocket);
        assert_eq!(settings.known_peers[0].display_name(), "bench");
        assert_eq!(
            settings.speed_source,
            SpeedSourceSettings::Simulated { mph: 12.5 }
        );
        assert_eq!(settings.log_settings.rotation, LogRotation::Daily);
        assert!(settings.keep_alive);
    }

    #[test]
    fn remembered_selection_survives_reload() {
        let path = temp_settings_path("selection");
        let _ = fs::remove_file(&path);
        let mut service = SettingsService::load(path.clone());
        let peer = PeerDescriptor::new("/dev/rfcomm0", "Dash");
        service.remember_selection(Some(&peer)).unwrap();

        let reloaded = SettingsService::load(path);
        assert_eq!(
            reloaded.get().last_selected_peer.as_deref(),
            Some("/dev/rfcomm0")
        );
    }
}
