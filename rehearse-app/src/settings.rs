//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use rehearse_core::{setup::DEFAULT_LIVE_MODEL, setup::DEFAULT_VOICE, Language, SessionConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COACH_MODEL: &str = "gemini-2.5-flash";

const KNOWN_VOICES: [&str; 5] = ["Kore", "Puck", "Charon", "Fenrir", "Aoede"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub language: Language,
    pub live_model: String,
    pub coach_model: String,
    pub voice: String,
    pub preferred_input_device: Option<String>,
    pub history_enabled: bool,
    pub retention_days: usize,
    pub request_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            language: Language::En,
            live_model: DEFAULT_LIVE_MODEL.into(),
            coach_model: DEFAULT_COACH_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            preferred_input_device: None,
            history_enabled: true,
            retention_days: 90,
            request_timeout_secs: 90,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_key = trimmed(self.api_key.take());
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.live_model = normalize_model(&self.live_model, DEFAULT_LIVE_MODEL);
        self.coach_model = normalize_model(&self.coach_model, DEFAULT_COACH_MODEL);
        self.voice = normalize_voice(&self.voice);
        self.retention_days = self.retention_days.clamp(1, 3650);
        self.request_timeout_secs = self.request_timeout_secs.clamp(10, 600);
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("REHEARSE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(lang) = lookup("REHEARSE_LANGUAGE").and_then(|raw| raw.parse().ok()) {
            self.language = lang;
        }
        if let Some(model) = lookup("REHEARSE_LIVE_MODEL") {
            self.live_model = model;
        }
        if let Some(model) = lookup("REHEARSE_COACH_MODEL") {
            self.coach_model = model;
        }
        if let Some(voice) = lookup("REHEARSE_VOICE") {
            self.voice = voice;
        }
        if let Some(device) = lookup("REHEARSE_INPUT_DEVICE") {
            self.preferred_input_device = Some(device);
        }
        if let Some(enabled) = lookup("REHEARSE_HISTORY") {
            self.history_enabled = !matches!(enabled.trim(), "0" | "false" | "off");
        }
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            preferred_input_device: self.preferred_input_device.clone(),
            model: self.live_model.clone(),
            voice: self.voice.clone(),
            ..SessionConfig::default()
        }
    }
}

fn trimmed(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_model(raw: &str, fallback: &str) -> String {
    let model = raw.trim().trim_start_matches("models/");
    if model.is_empty() {
        fallback.into()
    } else {
        model.into()
    }
}

/// Voice names are case-insensitive on input; unknown names fall back to the default.
pub fn normalize_voice(raw: &str) -> String {
    KNOWN_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(raw.trim()))
        .map(|v| (*v).to_string())
        .unwrap_or_else(|| DEFAULT_VOICE.into())
}

pub fn app_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Rehearse")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("rehearse")
    }
}

pub fn default_settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"language":"zh","voice":"puck","retentionDays":0,"apiKey":"   ","liveModel":"models/custom-live"}"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.language, Language::Zh);
        assert_eq!(settings.voice, "Puck");
        assert_eq!(settings.retention_days, 1);
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.live_model, "custom-live");
        assert_eq!(settings.coach_model, DEFAULT_COACH_MODEL);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            api_key: Some("k-123".into()),
            language: Language::Fr,
            history_enabled: false,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "from-gemini"),
            ("REHEARSE_LANGUAGE", "FR"),
            ("REHEARSE_VOICE", "nonsense"),
            ("REHEARSE_HISTORY", "off"),
        ]
        .into_iter()
        .collect();
        let mut settings = AppSettings::default();
        settings.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.api_key.as_deref(), Some("from-gemini"));
        assert_eq!(settings.language, Language::Fr);
        assert_eq!(settings.voice, DEFAULT_VOICE);
        assert!(!settings.history_enabled);
    }

    #[test]
    fn session_config_carries_live_options() {
        let settings = AppSettings {
            preferred_input_device: Some("USB Headset".into()),
            voice: "Aoede".into(),
            ..AppSettings::default()
        };
        let config = settings.session_config();
        assert_eq!(config.voice, "Aoede");
        assert_eq!(config.preferred_input_device.as_deref(), Some("USB Headset"));
        assert_eq!(config.capture_sample_rate, 16_000);
    }
}
