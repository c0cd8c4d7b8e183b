//! On-disk memo of raw API payloads.
//!
//! Two namespaces, `posts` and `authors`, each keyed by id. A post entry with
//! no blob is a tombstone: the id was looked up and the platform reported it
//! gone. Lookups against the memo never hit the network; the fetcher records
//! into it as pages arrive and `refresh` rewrites entries in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tally_common::TweetId;
use x_client::{Tweet, User};

use crate::files::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoEntry {
    pub fetched_at: DateTime<Utc>,
    /// `None` marks a post the platform no longer returns.
    pub blob: Option<serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoFile {
    #[serde(default)]
    posts: BTreeMap<String, MemoEntry>,
    #[serde(default)]
    authors: BTreeMap<String, MemoEntry>,
}

/// Result of a memo lookup that found an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoHit<T> {
    Found(T),
    Gone,
}

pub struct MemoStore {
    path: Option<PathBuf>,
    data: MemoFile,
    dirty: bool,
}

impl MemoStore {
    /// Load the memo at `path`. A missing file is an empty memo.
    pub fn load(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read memo {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse memo {}", path.display()))?
        } else {
            MemoFile::default()
        };
        info!(
            path = %path.display(),
            posts = data.posts.len(),
            authors = data.authors.len(),
            "Memo loaded"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            data,
            dirty: false,
        })
    }

    /// A memo that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: MemoFile::default(),
            dirty: false,
        }
    }

    /// Persist if anything changed since the last load or save.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&self.data)?;
        write_atomic(path, &json)?;
        self.dirty = false;
        Ok(())
    }

    pub fn post(&self, id: &TweetId) -> Option<MemoHit<Tweet>> {
        lookup(&self.data.posts, id.as_str())
    }

    pub fn author(&self, id: &str) -> Option<User> {
        match lookup(&self.data.authors, id)? {
            MemoHit::Found(user) => Some(user),
            MemoHit::Gone => None,
        }
    }

    pub fn record_post(&mut self, post: &Tweet) {
        if let Ok(blob) = serde_json::to_value(post) {
            self.insert_post(post.id.clone(), Some(blob));
        }
    }

    pub fn record_posts(&mut self, posts: &[Tweet]) {
        for post in posts {
            self.record_post(post);
        }
    }

    pub fn record_authors(&mut self, authors: &[User]) {
        let now = Utc::now();
        for author in authors {
            if let Ok(blob) = serde_json::to_value(author) {
                self.data.authors.insert(
                    author.id.clone(),
                    MemoEntry {
                        fetched_at: now,
                        blob: Some(blob),
                    },
                );
                self.dirty = true;
            }
        }
    }

    /// Mark a post as gone.
    pub fn tombstone_post(&mut self, id: &TweetId) {
        self.insert_post(id.as_str().to_string(), None);
    }

    /// Every post id the memo knows about, tombstones included.
    pub fn post_ids(&self) -> Vec<TweetId> {
        self.data
            .posts
            .keys()
            .filter_map(|k| TweetId::parse(k).ok())
            .collect()
    }

    pub fn post_count(&self) -> usize {
        self.data.posts.len()
    }

    fn insert_post(&mut self, id: String, blob: Option<serde_json::Value>) {
        self.data.posts.insert(
            id,
            MemoEntry {
                fetched_at: Utc::now(),
                blob,
            },
        );
        self.dirty = true;
    }
}

fn lookup<T: DeserializeOwned>(ns: &BTreeMap<String, MemoEntry>, id: &str) -> Option<MemoHit<T>> {
    let entry = ns.get(id)?;
    let Some(blob) = &entry.blob else {
        return Some(MemoHit::Gone);
    };
    match serde_json::from_value(blob.clone()) {
        Ok(value) => Some(MemoHit::Found(value)),
        Err(e) => {
            warn!(id, error = %e, "Unreadable memo entry, treating as a miss");
            None
        }
    }
}
