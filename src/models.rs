//! Data models for journals, feed entries, and harvested article records.
//!
//! This module defines the core data structures used throughout the application:
//! - [`JournalSource`]: One row of the journal list (feed URL plus source type)
//! - [`NormalizedFeedEntry`]: A feed item in canonical shape, before enrichment
//! - [`ArticleRecord`]: The durable unit of harvested knowledge
//! - [`JournalArchive`]: Everything ever captured for one journal
//!
//! `ArticleRecord.id` is immutable once assigned and is the sole merge key
//! within a journal archive. The serialized field names match the on-disk
//! JSON archive format consumed by downstream tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of publisher families this tool knows how to harvest.
///
/// Dispatch is static: each variant maps to one enrichment strategy in
/// `crate::scrapers`. Journals with a source type we do not recognize fall
/// back to [`SourceType::Feed`], which builds records from feed data alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Elsevier ScienceDirect: authoritative API with browser-rendered fallback.
    Sciencedirect,
    /// Oxford University Press: browser-rendered author enrichment only.
    Oxford,
    /// Plain RSS/Atom source with no publisher-specific enrichment.
    Feed,
}

impl SourceType {
    /// Parse a source-type label from the journal list. Unknown labels map
    /// to [`SourceType::Feed`].
    pub fn parse(label: &str) -> SourceType {
        match label.trim().to_ascii_lowercase().as_str() {
            "sciencedirect" => SourceType::Sciencedirect,
            "oxford" => SourceType::Oxford,
            _ => SourceType::Feed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Sciencedirect => "sciencedirect",
            SourceType::Oxford => "oxford",
            SourceType::Feed => "feed",
        }
    }

    /// Environment-variable prefix for per-source configuration
    /// (e.g. `SCIENCEDIRECT_COOKIES`).
    pub fn env_prefix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal from the configured journal list.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalSource {
    /// Human-readable journal name.
    pub name: String,
    /// RSS/Atom feed URL for new-article announcements.
    pub rss_url: String,
    /// Filesystem-safe identifier; names the archive file `{slug}.json`.
    pub slug: String,
    /// Which enrichment strategy applies.
    pub source_type: SourceType,
    /// Free-form operator notes carried into the archive metadata.
    pub notes: Option<String>,
}

/// A feed item after normalization, before enrichment.
///
/// Produced by the feed client from whatever the publisher's RSS/Atom feed
/// contains. The `id` here becomes the [`ArticleRecord`] id verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeedEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub authors: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Outcome of one translation attempt, persisted with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Success,
    Failed,
    Skipped,
}

/// Translation bookkeeping carried on every [`ArticleRecord`].
///
/// The archive store's merge law treats this specially: a prior `success`
/// is never replaced, and between two failures the newer one (with its
/// error message) wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub status: TranslationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translator: Option<String>,
    #[serde(default)]
    pub translated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationRecord {
    pub fn skipped() -> Self {
        TranslationRecord {
            status: TranslationStatus::Skipped,
            translator: None,
            translated_at: Some(Utc::now()),
            error: None,
        }
    }
}

/// The canonical unit of harvested knowledge: one article's metadata.
///
/// `id` is derived from the feed guid/link (or a content hash) and never
/// changes once assigned; it is the only merge key within a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    pub link: String,
    pub authors: Vec<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_language: Option<String>,
    /// Simplified-Chinese translation of the abstract, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_zh: Option<String>,
    pub translation: TranslationRecord,
    pub fetched_at: DateTime<Utc>,
    /// Where the base record came from; enrichment keeps this as-is.
    #[serde(default = "default_record_source")]
    pub source: String,
}

fn default_record_source() -> String {
    "RSS".to_string()
}

impl ArticleRecord {
    /// Ordering key for archive entries: publication date, falling back to
    /// fetch time for entries whose feed carried no date.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.fetched_at)
    }
}

/// Archive metadata block, refreshed on every successful persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalMetadata {
    pub name: String,
    pub rss_url: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub last_run_at: DateTime<Utc>,
}

/// A journal's durable archive: metadata plus all records ever captured,
/// unique by id, in published-then-fetched order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalArchive {
    pub journal: JournalMetadata,
    pub entries: Vec<ArticleRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str) -> ArticleRecord {
        ArticleRecord {
            id: id.to_string(),
            title: "Test Article".to_string(),
            link: "https://pub.example/a1".to_string(),
            authors: vec!["Y".to_string()],
            published_at: None,
            abstract_original: None,
            abstract_language: None,
            abstract_zh: None,
            translation: TranslationRecord::skipped(),
            fetched_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            source: "RSS".to_string(),
        }
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!(SourceType::parse("sciencedirect"), SourceType::Sciencedirect);
        assert_eq!(SourceType::parse(" Oxford "), SourceType::Oxford);
        assert_eq!(SourceType::parse("wiley"), SourceType::Feed);
        assert_eq!(SourceType::parse(""), SourceType::Feed);
    }

    #[test]
    fn test_source_type_env_prefix() {
        assert_eq!(SourceType::Sciencedirect.env_prefix(), "SCIENCEDIRECT");
        assert_eq!(SourceType::Oxford.env_prefix(), "OXFORD");
    }

    #[test]
    fn test_sort_key_prefers_published_at() {
        let mut r = record("a1");
        assert_eq!(r.sort_key(), r.fetched_at);
        let published = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        r.published_at = Some(published);
        assert_eq!(r.sort_key(), published);
    }

    #[test]
    fn test_record_roundtrip() {
        let r = record("a1");
        let json = serde_json::to_string_pretty(&r).unwrap();
        let back: ArticleRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_record_defaults_on_deserialize() {
        // Older archives may omit optional fields entirely.
        let json = r#"{
            "id": "a1",
            "title": "T",
            "link": "https://pub.example/a1",
            "authors": [],
            "translation": {"status": "skipped", "translated_at": null},
            "fetched_at": "2026-01-15T12:00:00Z"
        }"#;
        let r: ArticleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.source, "RSS");
        assert!(r.published_at.is_none());
        assert!(r.abstract_zh.is_none());
        assert_eq!(r.translation.status, TranslationStatus::Skipped);
    }

    #[test]
    fn test_translation_status_serializes_lowercase() {
        let json = serde_json::to_string(&TranslationStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }

    #[test]
    fn test_archive_roundtrip() {
        let archive = JournalArchive {
            journal: JournalMetadata {
                name: "Journal of Examples".to_string(),
                rss_url: "https://pub.example/feed".to_string(),
                notes: None,
                last_run_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            },
            entries: vec![record("a1")],
        };
        let json = serde_json::to_string_pretty(&archive).unwrap();
        let back: JournalArchive = serde_json::from_str(&json).unwrap();
        assert_eq!(back, archive);
    }
}
