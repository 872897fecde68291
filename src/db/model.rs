//! Backup document shapes used by `repo::backup` / `repo::restore`.
//!
//! Field names follow the JSON the web settings page exchanges.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsBackup {
    pub timestamp: String,
    pub settings: BackupSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    #[serde(default)]
    pub gemini_key: String,
    #[serde(default)]
    pub sites: Option<Vec<BackupSite>>,
}

/// A site as carried in a backup. Ids are reassigned on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}
