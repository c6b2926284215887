//! On-disk copies of the remote API index documents.
//!
//! `<cache>/api/formula.json` and `<cache>/api/cask.json` hold the bulk
//! documents. They count as fresh for 24 hours; stale copies are still served
//! to offline readers, only [`crate::api::BrewApi`] refetches them.

use crate::definition::PackageKind;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours

#[derive(Debug, Clone)]
pub struct ApiCache {
    dir: PathBuf,
}

impl ApiCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: PackageKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.as_str()))
    }

    /// Check if a cached index is still fresh (less than TTL old)
    pub fn is_fresh(&self, kind: PackageKind) -> bool {
        let Ok(metadata) = std::fs::metadata(self.path(kind)) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };

        match SystemTime::now().duration_since(modified) {
            Ok(age) => age < CACHE_TTL,
            Err(_) => false,
        }
    }

    /// Cached documents regardless of age, or None if missing.
    pub fn read(&self, kind: PackageKind) -> Result<Option<Vec<serde_json::Value>>> {
        let path = self.path(kind);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Cached documents if fresh.
    pub fn read_fresh(&self, kind: PackageKind) -> Option<Vec<serde_json::Value>> {
        if !self.is_fresh(kind) {
            return None;
        }
        self.read(kind).ok().flatten()
    }

    pub fn store(&self, kind: PackageKind, documents: &[serde_json::Value]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string(documents)?;
        // Write then rename so readers never see a partial index
        let tmp = self.dir.join(format!(".{}.json.tmp", kind.as_str()));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.path(kind))?;

        Ok(())
    }

    /// Remove all cached index documents
    pub fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(&path)?;
            }
        }

        Ok(())
    }
}
