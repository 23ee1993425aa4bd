//! Where the scheduler gets its resource view from.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use fnsched_model::ResourceViewInfo;
use tracing::debug;

/// Latest resource-view snapshot, fetched before a consumer round that
/// follows a resource update.
pub trait ResourceViewSource: Send + Sync {
    fn latest(&self) -> Result<ResourceViewInfo>;
}

/// Parse a TOML resource-view snapshot.
pub fn parse_snapshot(raw: &str) -> Result<ResourceViewInfo> {
    toml::from_str(raw).context("invalid resource view snapshot")
}

pub fn load_snapshot(path: &Path) -> Result<ResourceViewInfo> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read resource view {}", path.display()))?;
    parse_snapshot(&raw).with_context(|| format!("in {}", path.display()))
}

/// A snapshot held in memory and replaced by its owner.
#[derive(Debug, Default)]
pub struct StaticResourceView {
    view: RwLock<ResourceViewInfo>,
}

impl StaticResourceView {
    pub fn new(view: ResourceViewInfo) -> Self {
        Self {
            view: RwLock::new(view),
        }
    }

    pub fn replace(&self, view: ResourceViewInfo) {
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = view;
    }
}

impl ResourceViewSource for StaticResourceView {
    fn latest(&self) -> Result<ResourceViewInfo> {
        Ok(self.view.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// A snapshot file, re-read on every fetch.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResourceViewSource for TomlFileSource {
    fn latest(&self) -> Result<ResourceViewInfo> {
        let view = load_snapshot(&self.path)?;
        debug!(
            path = %self.path.display(),
            fragments = view.resource_unit.fragments.len(),
            "Loaded resource view"
        );
        Ok(view)
    }
}
