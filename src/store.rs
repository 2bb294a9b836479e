//! Durable, crash-safe, merge-aware persistence of journal archives.
//!
//! One JSON file per journal slug. Persisting is never destructive: records
//! merge field-by-field with the existing archive, where the existing value
//! wins unless it is empty. Writes go through a temp file in the same
//! directory followed by a rename, so a crash mid-write leaves the previous
//! archive intact byte-for-byte.
//!
//! # Merge law
//!
//! For `title`, `link`, `authors`, `published_at`, `abstract_original`,
//! `abstract_language`, and `abstract_zh`: keep the existing value, unless
//! it is empty/absent, in which case the incoming value fills it.
//!
//! Translation status has its own priority: a prior `success` is never
//! replaced; an incoming `success` beats any non-success; between two
//! `failed` results the newer one (with its error message) wins; otherwise
//! the existing status stays.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

use crate::models::{
    ArticleRecord, JournalArchive, JournalMetadata, JournalSource, TranslationRecord,
    TranslationStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive io failure for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The archive exists but cannot be decoded. Fatal for the journal;
    /// never silently overwritten.
    #[error("archive corrupt at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Counts reported by one `persist` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageResult {
    pub added: usize,
    pub updated: usize,
}

/// Manages per-journal JSON archives under one output directory.
#[derive(Debug, Clone)]
pub struct JournalStore {
    output_dir: PathBuf,
}

impl JournalStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        JournalStore {
            output_dir: output_dir.into(),
        }
    }

    fn path_for(&self, journal: &JournalSource) -> PathBuf {
        self.output_dir.join(format!("{}.json", journal.slug))
    }

    /// Guarantee the journal's archive file exists, writing an empty one if
    /// needed, so downstream tooling never distinguishes "no file" from
    /// "zero entries yet".
    #[instrument(level = "debug", skip_all, fields(journal = %journal.slug))]
    pub async fn ensure_archive(&self, journal: &JournalSource) -> Result<(), StoreError> {
        let path = self.path_for(journal);
        if path.exists() {
            return Ok(());
        }
        let archive = JournalArchive {
            journal: metadata_for(journal),
            entries: Vec::new(),
        };
        self.write_archive(&path, &archive).await?;
        info!(path = %path.display(), "Created empty archive");
        Ok(())
    }

    /// Load the journal's archive, or an empty in-memory one if the file
    /// does not exist yet. An unreadable or undecodable file is an error.
    pub async fn load_archive(&self, journal: &JournalSource) -> Result<JournalArchive, StoreError> {
        let path = self.path_for(journal);
        if !path.exists() {
            return Ok(JournalArchive {
                journal: metadata_for(journal),
                entries: Vec::new(),
            });
        }
        let text = fs::read_to_string(&path).await.map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| {
            error!(path = %path.display(), error = %source, "Failed to decode archive");
            StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            }
        })
    }

    /// Merge `records` into the journal's archive and write it back
    /// atomically. Returns how many records were newly added and how many
    /// existing records actually changed.
    #[instrument(level = "info", skip_all, fields(journal = %journal.slug, incoming = records.len()))]
    pub async fn persist(
        &self,
        journal: &JournalSource,
        records: &[ArticleRecord],
    ) -> Result<StorageResult, StoreError> {
        let mut archive = self.load_archive(journal).await?;
        let mut by_id: BTreeMap<String, ArticleRecord> = archive
            .entries
            .drain(..)
            .map(|entry| (entry.id.clone(), entry))
            .collect();

        let mut result = StorageResult::default();
        for record in records {
            match by_id.get(&record.id) {
                None => {
                    by_id.insert(record.id.clone(), record.clone());
                    result.added += 1;
                }
                Some(existing) => {
                    let merged = merge_records(existing, record);
                    if &merged != existing {
                        by_id.insert(record.id.clone(), merged);
                        result.updated += 1;
                    }
                }
            }
        }

        let mut entries: Vec<ArticleRecord> = by_id.into_values().collect();
        entries.sort_by_key(|entry| entry.sort_key());
        archive.entries = entries;
        archive.journal = metadata_for(journal);

        let path = self.path_for(journal);
        self.write_archive(&path, &archive).await?;
        debug!(added = result.added, updated = result.updated, "Persisted archive");
        Ok(result)
    }

    /// Serialize to a sibling temp file, then rename over the target.
    async fn write_archive(&self, path: &Path, archive: &JournalArchive) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(archive).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, payload).await.map_err(|source| StoreError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        fs::rename(&tmp_path, path).await.map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn metadata_for(journal: &JournalSource) -> JournalMetadata {
    JournalMetadata {
        name: journal.name.clone(),
        rss_url: journal.rss_url.clone(),
        notes: journal.notes.clone(),
        last_run_at: Utc::now(),
    }
}

/// Field-by-field merge: existing wins unless empty.
fn merge_records(existing: &ArticleRecord, incoming: &ArticleRecord) -> ArticleRecord {
    let mut merged = existing.clone();
    if merged.title.is_empty() {
        merged.title = incoming.title.clone();
    }
    if merged.link.is_empty() {
        merged.link = incoming.link.clone();
    }
    if merged.authors.is_empty() {
        merged.authors = incoming.authors.clone();
    }
    if merged.published_at.is_none() {
        merged.published_at = incoming.published_at;
    }
    merged.abstract_original = prefer_existing(&existing.abstract_original, &incoming.abstract_original);
    merged.abstract_language = prefer_existing(&existing.abstract_language, &incoming.abstract_language);
    merged.abstract_zh = prefer_existing(&existing.abstract_zh, &incoming.abstract_zh);
    merged.translation = prefer_translation(&existing.translation, &incoming.translation);
    merged
}

fn prefer_existing(existing: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match existing {
        Some(value) if !value.is_empty() => Some(value.clone()),
        _ => incoming.clone().filter(|v| !v.is_empty()),
    }
}

/// Translation priority law. See the module docs.
fn prefer_translation(old: &TranslationRecord, new: &TranslationRecord) -> TranslationRecord {
    if old.status == TranslationStatus::Success {
        return old.clone();
    }
    if new.status == TranslationStatus::Success {
        return new.clone();
    }
    if old.status == TranslationStatus::Failed && new.status == TranslationStatus::Failed {
        // Keep the newer failure reason.
        return new.clone();
    }
    old.clone()
}
