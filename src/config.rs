// Firewall Reconciler - Configuration
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Settings stored in a local JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::firewall::{detect_mode, Mode, FIREWALL_CMD, FIREWALL_OFFLINE_CMD};

/// Which firewall tool to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModePreference {
    /// Ask D-Bus whether firewalld is running.
    #[default]
    Auto,
    Running,
    Offline,
}

impl ModePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Running => "running",
            Self::Offline => "offline",
        }
    }
}

/// Persisted settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub mode: ModePreference,
    /// Edit the permanent configuration instead of the runtime one.
    #[serde(default = "default_true")]
    pub permanent: bool,
    /// Per command timeout; 0 disables it.
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_firewall_cmd")]
    pub firewall_cmd: String,
    #[serde(default = "default_offline_cmd")]
    pub offline_cmd: String,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

fn default_true() -> bool { true }
fn default_timeout() -> u64 { 30 }
fn default_firewall_cmd() -> String { FIREWALL_CMD.to_string() }
fn default_offline_cmd() -> String { FIREWALL_OFFLINE_CMD.to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            mode: ModePreference::default(),
            permanent: default_true(),
            command_timeout_secs: default_timeout(),
            firewall_cmd: default_firewall_cmd(),
            offline_cmd: default_offline_cmd(),
            log_level: default_log_level(),
            profile_dir: None,
        }
    }
}

impl AppSettings {
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Resolve the mode, probing the system bus when set to auto.
    pub fn resolve_mode(&self) -> Mode {
        match self.mode {
            ModePreference::Running => Mode::Running,
            ModePreference::Offline => Mode::Offline,
            ModePreference::Auto => {
                detect_mode(self.command_timeout().unwrap_or(Duration::from_secs(5)))
            }
        }
    }

    /// Program to run in `mode`.
    pub fn program(&self, mode: Mode) -> &str {
        match mode {
            Mode::Running => &self.firewall_cmd,
            Mode::Offline => &self.offline_cmd,
        }
    }
}

/// Settings manager that persists to a JSON file.
#[derive(Debug)]
pub struct Settings {
    settings: AppSettings,
    path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    /// Load the settings from the user configuration directory.
    pub fn new() -> Self {
        let path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("firewall-reconciler")
            .join("settings.json");
        Self::load(path)
    }

    /// Load from `path`, falling back to defaults when it is missing or broken.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to parse settings: {}", e);
                        AppSettings::default()
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings: {}", e);
                    AppSettings::default()
                }
            }
        } else {
            AppSettings::default()
        };

        Self { settings, path }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(&self.settings).context("Failed to serialize settings")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to save settings to {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &AppSettings {
        &self.settings
    }

    /// Set one value by its JSON key, e.g. `mode` or `command_timeout_secs`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&self.settings).context("Failed to serialize settings")?;
        let Some(object) = json.as_object_mut() else {
            anyhow::bail!("Settings are not an object");
        };
        if !object.contains_key(key) && key != "profile_dir" {
            anyhow::bail!("Unknown setting '{}'", key);
        }

        let parsed = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        object.insert(key.to_string(), parsed);

        self.settings = serde_json::from_value(json)
            .with_context(|| format!("Invalid value '{}' for {}", value, key))?;
        Ok(())
    }

    /// Directory holding saved profiles.
    pub fn profile_dir(&self) -> Option<&Path> {
        self.settings.profile_dir.as_deref()
    }
}
