use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::ImageAsset;

/// Public URL prefix under which stored images are served.
pub const IMAGES_ROUTE: &str = "/images";

/// Writes generated featured images to a local directory.
#[derive(Debug)]
pub struct ImageStore {
    dir: PathBuf,
    counter: AtomicU64,
}

/// Location of a stored image: on disk and as served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub file_name: String,
    pub public_ref: String,
}

impl ImageStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `image` as `featured-image-<millis>-<n>.<ext>`.
    pub async fn save(&self, image: &ImageAsset) -> Result<StoredImage> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create image dir: {}", self.dir.display()))?;

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "featured-image-{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            n,
            image.extension()
        );
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &image.bytes)
            .await
            .with_context(|| format!("failed to write image: {}", path.display()))?;

        Ok(StoredImage {
            public_ref: format!("{}/{}", IMAGES_ROUTE, file_name),
            path,
            file_name,
        })
    }
}
