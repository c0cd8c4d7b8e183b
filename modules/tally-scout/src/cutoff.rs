//! Per-category high-water marks.
//!
//! Stored as a flat JSON object of category key to id string. Before a run
//! touches anything, the current state is snapshotted to a sibling
//! `<stem>BAK.txt`. Marks only move forward.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use tally_common::{TallyError, TweetId};

use crate::files::write_atomic;

pub const MENTIONS_KEY: &str = "id_of_last_mention";
pub const TARGET_POSTS_KEY: &str = "id_of_last_tweet";

#[derive(Debug)]
pub struct CutoffTracker {
    path: PathBuf,
    cutoffs: BTreeMap<String, TweetId>,
}

impl CutoffTracker {
    /// Load the cutoff file. A missing file means no category has been
    /// fetched yet; anything unparseable is [`TallyError::CutoffFileMalformed`].
    pub fn load(path: &Path) -> Result<Self> {
        let malformed = |reason: String| TallyError::CutoffFileMalformed {
            path: path.display().to_string(),
            reason,
        };

        let mut cutoffs = BTreeMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read cutoffs {}", path.display()))?;
            let doc: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;
            for (key, value) in doc {
                let raw_id = match &value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) if n.is_u64() => n.to_string(),
                    other => return Err(malformed(format!("{key}: expected an id, got {other}")).into()),
                };
                let id = TweetId::parse(&raw_id).map_err(|e| malformed(format!("{key}: {e}")))?;
                cutoffs.insert(key, id);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            cutoffs,
        })
    }

    /// Path of the snapshot written by [`snapshot`](Self::snapshot).
    pub fn backup_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cutoffs".to_string());
        self.path.with_file_name(format!("{stem}BAK.txt"))
    }

    /// Copy the loaded state aside before the run mutates anything.
    pub fn snapshot(&self) -> Result<PathBuf> {
        let backup = self.backup_path();
        write_atomic(&backup, &self.to_json()?)?;
        Ok(backup)
    }

    pub fn get(&self, key: &str) -> Option<&TweetId> {
        self.cutoffs.get(key)
    }

    /// Raise the mark for `key` to `candidate` if it is larger. Returns
    /// whether the mark moved.
    pub fn advance(&mut self, key: &str, candidate: &TweetId) -> bool {
        let next = match self.cutoffs.get(key) {
            Some(current) => TweetId::max_of(current, candidate),
            None => candidate.clone(),
        };
        if self.cutoffs.get(key) == Some(&next) {
            return false;
        }
        info!(key, cutoff = %next, "Cutoff advanced");
        self.cutoffs.insert(key.to_string(), next);
        true
    }

    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, &self.to_json()?)
    }

    fn to_json(&self) -> Result<Vec<u8>> {
        let doc: BTreeMap<&str, &str> = self
            .cutoffs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        Ok(serde_json::to_vec_pretty(&doc)?)
    }
}
