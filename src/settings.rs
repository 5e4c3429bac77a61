use std::path::PathBuf;

use crate::io::ExportFormat;
use crate::ops::ai::{DEFAULT_ENDPOINT, DEFAULT_IMAGE_MODEL, DEFAULT_MODEL};

const SETTINGS_FILE: &str = "lumina_settings.cfg";

/// User preferences persisted between sessions. The AI API key is never
/// stored here; it comes from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    pub ai_endpoint: String,
    pub ai_model: String,
    pub ai_image_model: String,
    pub ai_timeout_secs: u64,
    pub default_export_format: ExportFormat,
    /// 1..=100
    pub jpeg_quality: u8,
    /// Draw a checkerboard behind transparent canvas areas.
    pub checkerboard: bool,
    pub last_open_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ai_endpoint: DEFAULT_ENDPOINT.to_string(),
            ai_model: DEFAULT_MODEL.to_string(),
            ai_image_model: DEFAULT_IMAGE_MODEL.to_string(),
            ai_timeout_secs: 120,
            default_export_format: ExportFormat::Png,
            jpeg_quality: 90,
            checkerboard: true,
            last_open_dir: None,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/lumina/lumina_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Lumina\lumina_settings.cfg
    /// On macOS:   ~/Library/Application Support/Lumina/lumina_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        let dir = config_dir()?;
        let _ = std::fs::create_dir_all(&dir);
        Some(dir.join(SETTINGS_FILE))
    }

    pub fn to_config_string(&self) -> String {
        let last_dir = self
            .last_open_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "ai_endpoint={}\n\
             ai_model={}\n\
             ai_image_model={}\n\
             ai_timeout_secs={}\n\
             default_export_format={}\n\
             jpeg_quality={}\n\
             checkerboard={}\n\
             last_open_dir={}\n",
            self.ai_endpoint,
            self.ai_model,
            self.ai_image_model,
            self.ai_timeout_secs,
            self.default_export_format.extension(),
            self.jpeg_quality,
            self.checkerboard,
            last_dir,
        )
    }

    /// Parses `key=value` lines. Unknown keys and malformed values fall back
    /// to defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "ai_endpoint" if !val.is_empty() => s.ai_endpoint = val.to_string(),
                "ai_model" if !val.is_empty() => s.ai_model = val.to_string(),
                "ai_image_model" if !val.is_empty() => s.ai_image_model = val.to_string(),
                "ai_timeout_secs" => {
                    s.ai_timeout_secs = val.parse().ok().filter(|&t| t > 0).unwrap_or(120);
                }
                "default_export_format" => {
                    s.default_export_format = ExportFormat::from_extension(val).unwrap_or_default();
                }
                "jpeg_quality" => {
                    s.jpeg_quality = val.parse::<u8>().map(|q| q.clamp(1, 100)).unwrap_or(90);
                }
                "checkerboard" => s.checkerboard = val != "false",
                "last_open_dir" if !val.is_empty() => s.last_open_dir = Some(PathBuf::from(val)),
                _ => {}
            }
        }
        s
    }

    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = std::fs::write(&path, self.to_config_string()) {
            tracing::warn!(path = %path.display(), error = %e, "could not save settings");
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::from_config_str(&content)
    }
}

/// Per-user config directory for Lumina.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
        Some(PathBuf::from(appdata).join("Lumina"))
    }
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join("Library").join("Application Support").join("Lumina"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var("XDG_CONFIG_HOME").map(PathBuf::from).or_else(|_| {
            std::env::var("HOME").map(|home| PathBuf::from(home).join(".config"))
        });
        base.ok().map(|b| b.join("lumina"))
    }
}
