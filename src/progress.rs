//! Per-entry crawl progress, persisted as a small JSON side file.
//!
//! The file maps each journal slug to the ids of entries that were fully
//! processed and durably stored. It is flushed after every single mutation,
//! not batched, so a crash loses at most the one entry that was in flight.
//!
//! Progress is advisory, the archive is the truth: at the start of every
//! run [`CrawlProgress::reconcile`] drops any id marked complete that the
//! archive does not actually contain (a prior crash may have recorded
//! progress without data), which makes the orchestrator re-fetch it rather
//! than silently lose it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProgressFile {
    #[serde(default)]
    completed_entries: BTreeMap<String, BTreeSet<String>>,
}

/// Tracks which entries are done, per journal slug.
#[derive(Debug)]
pub struct CrawlProgress {
    path: PathBuf,
    completed: BTreeMap<String, BTreeSet<String>>,
}

impl CrawlProgress {
    /// Load progress from `path`. A missing file means a fresh start; an
    /// unreadable file is treated the same way (the worst case is
    /// re-fetching work, never losing it).
    pub async fn load(path: impl Into<PathBuf>) -> CrawlProgress {
        let path = path.into();
        let completed = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<ProgressFile>(&text) {
                Ok(file) => file.completed_entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Progress file unreadable; starting fresh");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        debug!(path = %path.display(), journals = completed.len(), "Loaded crawl progress");
        CrawlProgress { path, completed }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_complete(&self, slug: &str, entry_id: &str) -> bool {
        self.completed
            .get(slug)
            .is_some_and(|ids| ids.contains(entry_id))
    }

    /// Record an entry as done and flush the file immediately.
    pub async fn mark_complete(
        &mut self,
        slug: &str,
        entry_id: &str,
    ) -> Result<(), std::io::Error> {
        self.completed
            .entry(slug.to_string())
            .or_default()
            .insert(entry_id.to_string());
        self.flush().await
    }

    /// Drop completed ids that `archived_ids` does not contain, so stale
    /// progress never suppresses a re-fetch. Returns how many ids were
    /// dropped; flushes if anything changed.
    pub async fn reconcile(
        &mut self,
        slug: &str,
        archived_ids: &HashSet<String>,
    ) -> Result<usize, std::io::Error> {
        let Some(ids) = self.completed.get_mut(slug) else {
            return Ok(0);
        };
        let before = ids.len();
        ids.retain(|id| archived_ids.contains(id));
        let dropped = before - ids.len();
        if ids.is_empty() {
            self.completed.remove(slug);
        }
        if dropped > 0 {
            info!(
                slug,
                dropped, "Progress marked entries the archive lacks; they will be re-fetched"
            );
            self.flush().await?;
        }
        Ok(dropped)
    }

    /// Atomic write, same temp-then-rename discipline as the archive store.
    async fn flush(&self) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = ProgressFile {
            completed_entries: self.completed.clone(),
        };
        let payload = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).await?;
        fs::rename(&tmp, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let progress = CrawlProgress::load(dir.path().join("progress.json")).await;
        assert!(!progress.is_complete("j", "a1"));
    }

    #[tokio::test]
    async fn test_mark_complete_flushes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut progress = CrawlProgress::load(&path).await;
        progress.mark_complete("journal-a", "a1").await.unwrap();
        assert!(path.exists());

        // A brand-new load sees the mutation: nothing was held in memory only.
        let reloaded = CrawlProgress::load(&path).await;
        assert!(reloaded.is_complete("journal-a", "a1"));
        assert!(!reloaded.is_complete("journal-a", "a2"));
        assert!(!reloaded.is_complete("journal-b", "a1"));
    }

    #[tokio::test]
    async fn test_reconcile_drops_ids_missing_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut progress = CrawlProgress::load(&path).await;
        progress.mark_complete("j", "present").await.unwrap();
        progress.mark_complete("j", "ghost").await.unwrap();

        let archived: HashSet<String> = HashSet::from(["present".to_string()]);
        let dropped = progress.reconcile("j", &archived).await.unwrap();
        assert_eq!(dropped, 1);
        assert!(progress.is_complete("j", "present"));
        assert!(!progress.is_complete("j", "ghost"));

        // The drop is durable.
        let reloaded = CrawlProgress::load(&path).await;
        assert!(!reloaded.is_complete("j", "ghost"));
    }

    #[tokio::test]
    async fn test_reconcile_unknown_slug_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut progress = CrawlProgress::load(dir.path().join("progress.json")).await;
        let dropped = progress.reconcile("nobody", &HashSet::new()).await.unwrap();
        assert_eq!(dropped, 0);
    }

    #[tokio::test]
    async fn test_corrupt_progress_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{broken").unwrap();

        let progress = CrawlProgress::load(&path).await;
        assert!(!progress.is_complete("j", "a1"));
    }
}
