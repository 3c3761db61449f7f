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
    #[serde(default = "default_true")]
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
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
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
    "obex_push".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Inquiry and service search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Short or full UUIDs a service record must carry.
    #[serde(default = "default_search_uuids")]
    pub search_uuids: Vec<String>,
    #[serde(default = "default_attribute_ids")]
    pub attribute_ids: Vec<u16>,
    /// Upper bound on each blocking search; unset waits forever.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_false")]
    pub strict: bool,
    #[serde(default = "default_max_inquiry_attempts")]
    pub max_inquiry_attempts: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            search_uuids: default_search_uuids(),
            attribute_ids: default_attribute_ids(),
            timeout_ms: None,
            strict: false,
            max_inquiry_attempts: default_max_inquiry_attempts(),
        }
    }
}

fn default_search_uuids() -> Vec<String> {
    vec!["0003".to_string()]
}
fn default_attribute_ids() -> Vec<u16> {
    vec![0x0003]
}
fn default_max_inquiry_attempts() -> u32 {
    5
}

/// The object pushed once an endpoint is chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    #[serde(default = "default_object_name")]
    pub object_name: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    /// Sent as ISO-8859-1.
    #[serde(default = "default_payload_text")]
    pub payload_text: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            object_name: default_object_name(),
            media_type: default_media_type(),
            payload_text: default_payload_text(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_object_name() -> String {
    "Hello.txt".to_string()
}
fn default_media_type() -> String {
    "text".to_string()
}
fn default_payload_text() -> String {
    "Hello!".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// JSON scenario replayed by the simulated radio; the built-in demo
    /// scenario when unset.
    #[serde(default)]
    pub scenario_path: Option<String>,
    #[serde(default = "default_event_delay_ms")]
    pub event_delay_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            scenario_path: None,
            event_delay_ms: default_event_delay_ms(),
        }
    }
}

fn default_event_delay_ms() -> u64 {
    150
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub push: PushSettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from `settings_path`, falling back to defaults if it is missing
    /// or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ObexPush");
        fs::create_dir_all(&path)?;
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
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
