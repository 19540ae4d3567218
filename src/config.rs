//! Process-level settings, TOML-backed under the platform data directory.
//!
//! Seed data for users/channels/keys/presets lives in the database, not here;
//! this module owns only bind address, timeouts and outbound proxy settings.

use dirs::data_dir;
use std::{fs, path::PathBuf};

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub data_dir: Option<PathBuf>,
    pub proxy: Option<ProxyConfig>,
    pub request_timeout_connect_secs: u64,
    pub request_timeout_secs: u64,
    pub stream_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            data_dir: None,
            proxy: None,
            request_timeout_connect_secs: 10,
            request_timeout_secs: 60,
            stream_timeout_secs: 120,
        }
    }
}

/// Outbound proxy configuration for upstream HTTP calls.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bypass: Option<Vec<String>>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy_type: "system".to_string(),
            url: None,
            username: None,
            password: None,
            bypass: None,
        }
    }
}

fn base_dir() -> PathBuf {
    let mut p = data_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("gapi-gateway");
    fs::create_dir_all(&p).ok();
    p
}

fn settings_path() -> PathBuf {
    let mut p = base_dir();
    p.push("settings.toml");
    p
}

pub fn data_directory(settings: &Settings) -> PathBuf {
    settings.data_dir.clone().unwrap_or_else(base_dir)
}

pub fn load() -> Settings {
    let p = settings_path();
    if !p.exists() {
        let cfg = Settings::default();
        let _ = save(&cfg);
        return cfg;
    }
    let s = fs::read_to_string(&p).unwrap_or_default();
    match toml::from_str(&s) {
        Ok(cfg) => cfg,
        Err(e) => {
            crate::logger::error("config", &format!("Failed to parse config, using default: {}", e));
            Settings::default()
        }
    }
}

pub fn save(cfg: &Settings) -> Result<(), String> {
    let p = settings_path();
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create config directory: {}", e))?;
    }
    let s = toml::to_string_pretty(cfg).map_err(|e| format!("serialize config: {}", e))?;
    fs::write(&p, &s).map_err(|e| format!("write config file to {:?}: {}", p, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_round_trip_toml() {
        let cfg = Settings::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: Settings = toml::from_str(&s).unwrap();
        assert_eq!(back.bind_addr, cfg.bind_addr);
        assert_eq!(back.request_timeout_secs, cfg.request_timeout_secs);
    }
}
