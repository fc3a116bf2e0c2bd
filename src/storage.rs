// Firewall Reconciler - Storage
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Profiles: the desired firewall state saved as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::firewall::{DEFAULT_LOG_DENIED, DEFAULT_ZONE};

const PROFILE_EXTENSION: &str = "json";

/// Desired state of one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<bool>,
    /// Relation members keyed by relation name, e.g. `services`.
    #[serde(flatten)]
    pub relations: BTreeMap<String, Vec<String>>,
}

/// Desired state of the whole firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub created_at: DateTime<Local>,
    #[serde(default = "default_zone")]
    pub default_zone: String,
    #[serde(default = "default_log_denied")]
    pub log_denied_packets: String,
    #[serde(default)]
    pub zones: Vec<ZoneProfile>,
}

fn default_zone() -> String {
    DEFAULT_ZONE.to_string()
}

fn default_log_denied() -> String {
    DEFAULT_LOG_DENIED.to_string()
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            created_at: Local::now(),
            default_zone: default_zone(),
            log_denied_packets: default_log_denied(),
            zones: Vec::new(),
        }
    }
}

impl Profile {
    pub fn zone(&self, name: &str) -> Option<&ZoneProfile> {
        self.zones.iter().find(|zone| zone.name == name)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profile {}", path.display()))
    }

    /// Write the profile readable by the owner only.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize profile")?;
        let mut file = fs::File::create(path)
            .with_context(|| format!("Failed to create profile {}", path.display()))?;
        #[cfg(unix)]
        {
            if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
                warn!("Failed to set file permissions: {}", e);
            }
        }
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write profile {}", path.display()))?;
        debug!("Saved profile to {}", path.display());
        Ok(())
    }
}

/// Named profiles in a directory, one `<name>.json` file each.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    /// Store under the user configuration directory.
    pub fn new() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("firewall-reconciler")
            .join("profiles");
        Self { dir }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            bail!("Invalid profile name '{}'", name);
        }
        Ok(self.dir.join(format!("{}.{}", name, PROFILE_EXTENSION)))
    }

    pub fn save(&self, name: &str, profile: &Profile) -> Result<PathBuf> {
        let path = self.path(name)?;
        profile.to_file(&path)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Profile> {
        Profile::from_file(&self.path(name)?)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    /// Names of the stored profiles, sorted.
    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No profiles in {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(PROFILE_EXTENSION))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        let mut relations = BTreeMap::new();
        relations.insert("services".to_string(), vec!["ssh".to_string()]);
        relations.insert("ports".to_string(), vec!["8080/tcp".to_string()]);
        Profile {
            default_zone: "home".to_string(),
            zones: vec![ZoneProfile {
                name: "home".to_string(),
                target: Some("default".to_string()),
                masquerade: Some(false),
                relations,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::with_dir(dir.path().join("profiles"));
        let profile = sample();

        let path = store.save("laptop", &profile).unwrap();
        assert!(path.ends_with("laptop.json"));
        assert_eq!(store.load("laptop").unwrap(), profile);
        assert_eq!(store.list(), vec!["laptop"]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(store.remove("laptop").unwrap());
        assert!(!store.remove("laptop").unwrap());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_relations_are_flattened() {
        let json = serde_json::to_value(sample()).unwrap();
        let zone = &json["zones"][0];
        assert_eq!(zone["services"], serde_json::json!(["ssh"]));
        assert!(zone.get("short").is_none());
        assert!(zone.get("relations").is_none());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let profile: Profile =
            serde_json::from_str(r#"{"created_at": "2026-01-02T03:04:05+00:00"}"#).unwrap();
        assert_eq!(profile.default_zone, "public");
        assert_eq!(profile.log_denied_packets, "off");
        assert!(profile.zones.is_empty());
        assert!(profile.zone("public").is_none());
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let store = ProfileStore::with_dir("/tmp");
        assert!(store.path("../etc/passwd").is_err());
        assert!(store.path("").is_err());
        assert!(store.path(".hidden").is_err());
        assert!(store.path("home-2").is_ok());
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::with_dir(dir.path().join("absent"));
        assert_eq!(store.dir(), dir.path().join("absent"));
        assert!(store.list().is_empty());
        assert!(store.load("nothing").is_err());
    }
}
