//! Settings and site registry storage.
//!
//! This module is split into two submodules:
//! - `model`: backup document shapes returned and accepted by the repository.
//! - `repo`: SQL-only functions plus the [`SettingsStore`] handle.
//!
//! Callers outside the storage layer read through the [`SiteRegistry`] trait,
//! which [`SettingsStore`] implements.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{BackupSettings, BackupSite, SettingsBackup};

use crate::model::Site;
use anyhow::Result;
use async_trait::async_trait;

/// Read-only view of the credentials a batch needs.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// The stored AI key; empty when unset.
    async fn gemini_key(&self) -> Result<String>;

    async fn sites(&self) -> Result<Vec<Site>>;
}
