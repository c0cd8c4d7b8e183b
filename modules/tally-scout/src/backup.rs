//! Write-once archive of raw fetched pages, named by the date span they cover.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use x_client::Tweet;

pub struct PageArchive {
    dir: PathBuf,
}

impl PageArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `posts` as `"<earliest> - <latest> unfiltered <label>.json"`.
    /// Existing files are never overwritten; a numeric suffix is added instead.
    pub fn write_page(&self, label: &str, posts: &[Tweet]) -> Result<Option<PathBuf>> {
        if posts.is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create backup dir {}", self.dir.display()))?;

        let json = serde_json::to_vec_pretty(posts)?;
        let base = format!("{} unfiltered {}", date_span(posts), label);

        let mut n = 0u32;
        loop {
            let name = match n {
                0 => format!("{base}.json"),
                n => format!("{base} ({n}).json"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&json)
                        .with_context(|| format!("Failed to write backup {}", path.display()))?;
                    debug!(path = %path.display(), posts = posts.len(), "Page archived");
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create backup {}", path.display()))
                }
            }
        }
    }
}

fn date_span(posts: &[Tweet]) -> String {
    let dates: Vec<_> = posts
        .iter()
        .filter_map(|p| p.created_at)
        .map(|ts| ts.format("%Y-%m-%d").to_string())
        .collect();
    match (dates.iter().min(), dates.iter().max()) {
        (Some(lo), Some(hi)) => format!("{lo} - {hi}"),
        _ => "undated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, day: u32) -> Tweet {
        Tweet {
            id: id.to_string(),
            text: "gm".to_string(),
            author_id: None,
            created_at: Some(Utc.with_ymd_and_hms(2023, 2, day, 12, 0, 0).unwrap()),
            conversation_id: None,
            in_reply_to_user_id: None,
            referenced_tweets: None,
            entities: None,
            public_metrics: None,
            note_tweet: None,
        }
    }

    #[test]
    fn names_by_date_span() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PageArchive::new(dir.path());
        let path = archive
            .write_page("mentions", &[post("2", 14), post("1", 3)])
            .unwrap()
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "2023-02-03 - 2023-02-14 unfiltered mentions.json"
        );
    }

    #[test]
    fn never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PageArchive::new(dir.path());
        let first = archive.write_page("mentions", &[post("1", 3)]).unwrap().unwrap();
        let second = archive.write_page("mentions", &[post("2", 3)]).unwrap().unwrap();
        assert_ne!(first, second);
        assert!(second.to_str().unwrap().ends_with("unfiltered mentions (1).json"));
        let kept: Vec<Tweet> =
            serde_json::from_str(&std::fs::read_to_string(first).unwrap()).unwrap();
        assert_eq!(kept[0].id, "1");
    }

    #[test]
    fn empty_page_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = PageArchive::new(dir.path().join("backups"));
        assert!(archive.write_page("mentions", &[]).unwrap().is_none());
        assert!(!dir.path().join("backups").exists());
    }
}
