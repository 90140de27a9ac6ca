use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::execution::PendingOrder;
use crate::models::{Position, Timeframe};
use crate::Result;

/// Durable engine state: the active position and any unresolved order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub symbol: String,
    pub position: Option<Position>,
    pub pending: Option<PendingOrder>,
    /// Newest oscillator point per timeframe that has already voted
    #[serde(default)]
    pub last_voted: BTreeMap<Timeframe, DateTime<Utc>>,
    pub saved_at: Option<DateTime<Utc>>,
}

/// JSON file store for `PersistedState`
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write leaves the previous state readable.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state, or None when no state file exists yet
    pub async fn load(&self) -> Result<Option<PersistedState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No state file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_slice(&bytes)?;
        tracing::info!(
            "Loaded state from {} (position: {}, pending order: {})",
            self.path.display(),
            state.position.is_some(),
            state.pending.is_some()
        );
        Ok(Some(state))
    }

    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut state = state.clone();
        state.saved_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(&state)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    /// Remove the state file if present
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
