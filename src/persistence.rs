use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::state::Settings;

const APP_DIR: &str = "Lexitale";
const SETTINGS_FILE: &str = "settings.json";
const VOCABULARY_FILE: &str = "vocabulary.json";

pub fn settings_path() -> Result<PathBuf> {
    let config = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config.join(APP_DIR).join(SETTINGS_FILE))
}

pub fn default_vocabulary_path() -> Result<PathBuf> {
    let data = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data.join(APP_DIR).join(VOCABULARY_FILE))
}

/// Load settings from `path`, falling back to defaults on any problem.
pub fn load_settings(path: &Path) -> Settings {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No stored settings found. Using defaults.");
            return Settings::default();
        }
        Err(e) => {
            tracing::warn!("Failed to read settings file {}: {}. Using defaults.", path.display(), e);
            return Settings::default();
        }
    };

    match serde_json::from_str::<Settings>(&contents) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to deserialize stored settings: {}. Using defaults.", e);
            Settings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &Settings) {
    if let Err(e) = write_settings(path, settings) {
        tracing::error!("Failed to save settings to {}: {:#}", path.display(), e);
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Environment values win over the stored file. `lookup` is `std::env::var`
/// outside of tests.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("LEXITALE_API_KEY").or_else(|| non_empty("GEMINI_API_KEY")) {
        settings.generation.api_key = Some(key);
    }
    if let Some(model) = non_empty("LEXITALE_MODEL") {
        tracing::info!("Using model {} from environment", model);
        settings.generation.model = model;
    }
}

pub fn load_with_env(path: &Path) -> Settings {
    let mut settings = load_settings(path);
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings
}
