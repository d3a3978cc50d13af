use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
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
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Ios,
    Android,
}

/// Target platform, used to pick the concrete permissions for a capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_os")]
    pub os: Os,
    /// Android API level; ignored on iOS
    #[serde(default = "default_api_level")]
    pub api_level: u32,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            os: default_os(),
            api_level: default_api_level(),
        }
    }
}

/// Options handed to the native geolocation provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSettings {
    #[serde(default = "default_true")]
    pub enable_high_accuracy: bool,
    #[serde(default = "default_location_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_maximum_age_ms")]
    pub maximum_age_ms: u64,
    #[serde(default)]
    pub distance_filter_m: f64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_fastest_interval_ms")]
    pub fastest_interval_ms: u64,
    #[serde(default = "default_false")]
    pub use_significant_changes: bool,
    #[serde(default = "default_true")]
    pub show_location_dialog: bool,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: default_location_timeout_ms(),
            maximum_age_ms: default_maximum_age_ms(),
            distance_filter_m: 0.0,
            interval_ms: default_interval_ms(),
            fastest_interval_ms: default_fastest_interval_ms(),
            use_significant_changes: false,
            show_location_dialog: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Name of the in-page client object on `window`
    #[serde(default = "default_global_name")]
    pub global_name: String,
    /// How long the in-page client waits for a response before rejecting
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
    #[serde(default = "default_web_url")]
    pub web_url: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            global_name: default_global_name(),
            client_timeout_ms: default_client_timeout_ms(),
            web_url: default_web_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub location: LocationSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
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
    "native_bridge_shell".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_os() -> Os {
    Os::Android
}
fn default_api_level() -> u32 {
    33
}
fn default_location_timeout_ms() -> u64 {
    30_000
}
fn default_maximum_age_ms() -> u64 {
    1_000
}
fn default_interval_ms() -> u64 {
    5_000
}
fn default_fastest_interval_ms() -> u64 {
    1_000
}
fn default_global_name() -> String {
    "__nativebridge".to_string()
}
fn default_client_timeout_ms() -> u64 {
    30_000
}
fn default_web_url() -> String {
    "https://onub2b.com".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable
    pub fn load_from(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir().context("Could not determine config directory")?;
        path.push("NativeBridgeShell");
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

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
