//! The crawl orchestrator: feeds in, enriched durable archives out.
//!
//! One [`Runner::run`] pass walks the configured journals sequentially. Per
//! journal it fetches the feed, then streams entries one at a time: skip
//! anything the progress file already marks complete, otherwise build a
//! base record from feed data, enrich it through the publisher's strategy,
//! persist it immediately, and mark it complete. After a crash at most the
//! single in-flight entry is lost, and re-running is safe: the archive
//! merge is idempotent and completed entries are skipped without I/O.
//!
//! A journal that fails (dead feed, corrupt archive) is recorded in the
//! run report and the run moves on; one journal can never take down the
//! rest of the pass.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::browser::SessionRegistry;
use crate::feed::FeedSource;
use crate::models::{ArticleRecord, JournalSource, NormalizedFeedEntry, SourceType, TranslationStatus};
use crate::progress::CrawlProgress;
use crate::scrapers::oxford::OxfordEnricher;
use crate::scrapers::sciencedirect::ScienceDirectEnricher;
use crate::store::{JournalStore, StorageResult};
use crate::translate::{translate_abstract, Translator};

/// Which journals a run covers, and how it paces itself.
#[derive(Debug, Default)]
pub struct RunnerConfig {
    /// Restrict the run to these journal slugs, if non-empty.
    pub include_slugs: HashSet<String>,
    /// Restrict the run to these source types, if non-empty.
    pub include_sources: HashSet<SourceType>,
    /// Pause inserted after each entry whose processing called the
    /// translator, to stay under API rate limits.
    pub throttle: Duration,
}

/// What happened to one journal during a run.
#[derive(Debug)]
pub struct JournalRunResult {
    pub name: String,
    pub slug: String,
    pub fetched: usize,
    pub stored: StorageResult,
    pub translation_attempts: u32,
    pub translation_failures: u32,
    pub error: Option<String>,
}

impl JournalRunResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn failed(journal: &JournalSource, error: String) -> Self {
        JournalRunResult {
            name: journal.name.clone(),
            slug: journal.slug.clone(),
            fetched: 0,
            stored: StorageResult::default(),
            translation_attempts: 0,
            translation_failures: 0,
            error: Some(error),
        }
    }
}

/// Summary of a full run across all journals.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<JournalRunResult>,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn total_new_entries(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.stored.added)
            .sum()
    }

    pub fn total_translation_failures(&self) -> u32 {
        self.results
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.translation_failures)
            .sum()
    }

    pub fn had_errors(&self) -> bool {
        !self.errors.is_empty() || self.results.iter().any(|r| !r.succeeded())
    }
}

/// Coordinates feed ingestion, enrichment, translation, persistence, and
/// crawl progress for a set of journals.
pub struct Runner<F: FeedSource, T: Translator> {
    feed: F,
    translator: T,
    store: JournalStore,
    progress: CrawlProgress,
    sessions: SessionRegistry,
    sciencedirect: ScienceDirectEnricher,
    oxford: OxfordEnricher,
    config: RunnerConfig,
}

impl<F: FeedSource, T: Translator> Runner<F, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: F,
        translator: T,
        store: JournalStore,
        progress: CrawlProgress,
        sessions: SessionRegistry,
        sciencedirect: ScienceDirectEnricher,
        config: RunnerConfig,
    ) -> Self {
        Runner {
            feed,
            translator,
            store,
            progress,
            sessions,
            sciencedirect,
            oxford: OxfordEnricher,
            config,
        }
    }

    /// Run one pass over the journal list. Always closes browser sessions
    /// before returning, whatever happened to individual journals.
    #[instrument(level = "info", skip_all, fields(journals = journals.len()))]
    pub async fn run(&mut self, journals: &[JournalSource]) -> RunReport {
        let started_at = Utc::now();
        let mut results = Vec::new();
        let mut errors = Vec::new();

        let selected = self.apply_filters(journals);
        info!(
            total = journals.len(),
            selected = selected.len(),
            "Starting crawl pass"
        );
        if selected.is_empty() {
            let message = "No journals matched the requested filters".to_string();
            warn!("{message}");
            errors.push(message);
        }

        for journal in selected {
            match self.process_journal(journal).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(journal = %journal.name, error = %e, "Journal processing failed");
                    errors.push(format!("{}: {e}", journal.name));
                    results.push(JournalRunResult::failed(journal, e.to_string()));
                }
            }
        }

        self.sessions.close_all().await;

        RunReport {
            started_at,
            finished_at: Utc::now(),
            results,
            errors,
        }
    }

    fn apply_filters<'a>(&self, journals: &'a [JournalSource]) -> Vec<&'a JournalSource> {
        journals
            .iter()
            .filter(|j| {
                self.config.include_sources.is_empty()
                    || self.config.include_sources.contains(&j.source_type)
            })
            .filter(|j| {
                self.config.include_slugs.is_empty()
                    || self.config.include_slugs.contains(&j.slug)
            })
            .collect()
    }

    #[instrument(level = "info", skip_all, fields(journal = %journal.slug))]
    async fn process_journal(
        &mut self,
        journal: &JournalSource,
    ) -> Result<JournalRunResult, Box<dyn Error>> {
        self.store.ensure_archive(journal).await?;
        let archive = self.store.load_archive(journal).await?;
        let archived_ids: HashSet<String> =
            archive.entries.iter().map(|r| r.id.clone()).collect();
        let dropped = self.progress.reconcile(&journal.slug, &archived_ids).await?;
        if dropped > 0 {
            info!(
                dropped,
                "Progress claimed entries the archive does not hold; they will be re-fetched"
            );
        }

        let entries = self.feed.fetch(&journal.rss_url).await?;
        let fetched = entries.len();
        let mut stored = StorageResult::default();
        let mut translation_attempts = 0;
        let mut translation_failures = 0;

        for entry in &entries {
            if self.progress.is_complete(&journal.slug, &entry.id) {
                debug!(entry_id = %entry.id, "Already harvested; skipping");
                continue;
            }

            let (record, mut attempts, mut failures) = self.build_article(entry).await;
            let record = match journal.source_type {
                SourceType::Sciencedirect => {
                    let session = self.sessions.session_for(SourceType::Sciencedirect);
                    let (record, extra_attempts, extra_failures) = self
                        .sciencedirect
                        .enrich(record, entry, session, &self.translator)
                        .await;
                    attempts += extra_attempts;
                    failures += extra_failures;
                    record
                }
                SourceType::Oxford => {
                    let session = self.sessions.session_for(SourceType::Oxford);
                    self.oxford.enrich(record, entry, session).await
                }
                SourceType::Feed => record,
            };

            let result = self.store.persist(journal, std::slice::from_ref(&record)).await?;
            stored.added += result.added;
            stored.updated += result.updated;
            self.progress.mark_complete(&journal.slug, &entry.id).await?;

            translation_attempts += attempts;
            translation_failures += failures;
            if attempts > 0 && !self.config.throttle.is_zero() {
                tokio::time::sleep(self.config.throttle).await;
            }
        }

        info!(
            fetched,
            added = stored.added,
            updated = stored.updated,
            "Journal processed"
        );
        Ok(JournalRunResult {
            name: journal.name.clone(),
            slug: journal.slug.clone(),
            fetched,
            stored,
            translation_attempts,
            translation_failures,
            error: None,
        })
    }

    /// Build the base record from feed data alone, translating the summary
    /// when it needs translating.
    async fn build_article(&self, entry: &NormalizedFeedEntry) -> (ArticleRecord, u32, u32) {
        let summary = entry.summary.trim();
        let (outcome, attempted, language) =
            translate_abstract(&self.translator, summary).await;
        let attempts = u32::from(attempted);
        let failures = u32::from(attempted && outcome.status == TranslationStatus::Failed);

        let record = ArticleRecord {
            id: entry.id.clone(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            authors: entry.authors.clone(),
            published_at: entry.published_at,
            abstract_original: (!summary.is_empty()).then(|| summary.to_string()),
            abstract_language: language,
            abstract_zh: outcome.translated_text.clone(),
            translation: outcome.to_record(),
            fetched_at: Utc::now(),
            source: "RSS".to_string(),
        };
        (record, attempts, failures)
    }
}

/// Build the session registry and ScienceDirect client a runner needs,
/// from already-validated per-source profiles and optional API credentials.
pub fn build_enrichment(
    profiles: HashMap<SourceType, crate::config::SourceProfile>,
    debug_dir: Option<std::path::PathBuf>,
    elsevier_api_key: Option<String>,
    elsevier_inst_token: Option<String>,
) -> (SessionRegistry, ScienceDirectEnricher) {
    let sessions = SessionRegistry::new(profiles, debug_dir);
    let api_client = elsevier_api_key
        .map(|key| crate::scrapers::sciencedirect::ElsevierApiClient::new(key, elsevier_inst_token));
    (sessions, ScienceDirectEnricher::new(api_client))
}
