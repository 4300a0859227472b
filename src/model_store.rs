use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use parking_lot::RwLock;
use tracing::info;

use crate::modeler::{ARTIFACT_VERSION, ZoneModelSet};

pub fn save_model_set(path: &Path, set: &ZoneModelSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(set).context("serialize zone models")?;
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
    Ok(())
}

pub fn load_model_set(path: &Path) -> Result<ZoneModelSet> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut set: ZoneModelSet =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    if set.version != ARTIFACT_VERSION {
        return Err(anyhow!(
            "zone model artifact version {} (expected {ARTIFACT_VERSION})",
            set.version
        ));
    }
    set.grid.validate()?;
    set.referees = set.referees.reindexed();
    Ok(set)
}

/// Holds the current model set. Readers take an `Arc` snapshot and never
/// observe a partially replaced set; a refit swaps the whole pointer.
#[derive(Debug, Default)]
pub struct ModelStore {
    current: RwLock<Option<Arc<ZoneModelSet>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(set: ZoneModelSet) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(set))),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<ZoneModelSet>> {
        self.current.read().clone()
    }

    /// Installs `set` and returns the one it replaced.
    pub fn replace(&self, set: ZoneModelSet) -> Option<Arc<ZoneModelSet>> {
        let next = Arc::new(set);
        info!(
            generated_at = %next.generated_at,
            zones = next.models.len(),
            "zone model set swapped in"
        );
        self.current.write().replace(next)
    }

    pub fn load_from(&self, path: &Path) -> Result<()> {
        let set = load_model_set(path)?;
        self.replace(set);
        Ok(())
    }
}
