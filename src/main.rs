//! # Scholar Atlas
//!
//! A resilient metadata harvester for academic journals. It watches the
//! RSS/Atom feeds of a configured journal list, enriches new articles
//! through whatever access path each publisher requires, translates
//! abstracts into Simplified Chinese, and accumulates everything into
//! durable per-journal JSON archives.
//!
//! ## Features
//!
//! - Plain feeds work out of the box; ScienceDirect adds the Elsevier
//!   Article Retrieval API with a browser-rendered fallback; Oxford fills
//!   missing author lists from rendered pages
//! - Gated publishers are reached through persistent chromiumoxide browser
//!   sessions carrying operator-supplied cookies, headers, and profiles
//! - Archives merge idempotently: re-runs never lose captured data, and a
//!   progress file makes interrupted runs resumable mid-journal
//! - Abstract translation via the DeepSeek API, skipped automatically for
//!   abstracts already in Chinese
//!
//! ## Usage
//!
//! ```sh
//! scholar_atlas -l ./journals.csv -o ./archives
//! ```
//!
//! ## Architecture
//!
//! One run is a sequential pass over the journal list:
//! 1. **Ingest**: fetch and normalize each journal's feed
//! 2. **Enrich**: upgrade new entries through the publisher's strategy
//! 3. **Translate**: fill `abstract_zh` for non-Chinese abstracts
//! 4. **Persist**: merge into the journal archive, record crawl progress

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod browser;
mod cli;
mod config;
mod feed;
mod journals;
mod models;
mod progress;
mod provenance;
mod runner;
mod scrapers;
mod store;
mod translate;
mod utils;

use cli::Cli;
use config::SourceProfile;
use feed::FeedClient;
use journals::load_journal_list;
use models::SourceType;
use progress::CrawlProgress;
use runner::{build_enrichment, Runner, RunnerConfig};
use store::JournalStore;
use translate::{AnyTranslator, DeepSeekTranslator, NoOpTranslator};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    // Pull credentials from a .env file if one is present.
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Could not read .env file"),
    }

    let start_time = std::time::Instant::now();
    info!("scholar_atlas starting up");

    let args = Cli::parse();
    debug!(?args.journal_list, ?args.output_dir, "Parsed CLI arguments");

    // Early check: ensure the archive directory is writable before any
    // network work happens.
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Archive directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let journals = load_journal_list(Path::new(&args.journal_list))?;
    info!(count = journals.len(), path = %args.journal_list, "Loaded journal list");

    // Per-source browser profiles come from the environment, validated
    // once here; a channel/executable conflict is fatal before any fetch.
    let mut profiles: HashMap<SourceType, SourceProfile> = HashMap::new();
    for source_type in [SourceType::Sciencedirect, SourceType::Oxford] {
        profiles.insert(source_type, SourceProfile::from_env(source_type)?);
    }

    let translator = if args.skip_translation {
        info!("Translation disabled by --skip-translation");
        AnyTranslator::NoOp(NoOpTranslator)
    } else {
        match args.deepseek_api_key.clone() {
            Some(key) => AnyTranslator::DeepSeek(DeepSeekTranslator::new(key)),
            None => {
                warn!("DEEPSEEK_API_KEY not set; abstracts will not be translated");
                AnyTranslator::NoOp(NoOpTranslator)
            }
        }
    };

    if args.elsevier_api_key.is_none() {
        warn!("ELSEVIER_API_KEY not set; ScienceDirect enrichment will be render-only");
    }

    let (sessions, sciencedirect) = build_enrichment(
        profiles,
        args.debug_dir.clone().map(Into::into),
        args.elsevier_api_key.clone(),
        args.elsevier_inst_token.clone(),
    );

    let config = RunnerConfig {
        include_slugs: args.journals.iter().cloned().collect(),
        include_sources: args
            .sources
            .iter()
            .map(|label| SourceType::parse(label))
            .collect::<HashSet<_>>(),
        throttle: Duration::from_secs_f64(args.throttle_secs.max(0.0)),
    };

    let store = JournalStore::new(&args.output_dir);
    let progress = CrawlProgress::load(&args.progress_file).await;

    let mut runner = Runner::new(
        FeedClient::new(),
        translator,
        store,
        progress,
        sessions,
        sciencedirect,
        config,
    );
    let report = runner.run(&journals).await;

    for result in &report.results {
        match &result.error {
            None => info!(
                journal = %result.name,
                fetched = result.fetched,
                added = result.stored.added,
                updated = result.stored.updated,
                translation_attempts = result.translation_attempts,
                translation_failures = result.translation_failures,
                "Journal summary"
            ),
            Some(e) => error!(journal = %result.name, error = %e, "Journal failed"),
        }
    }
    info!(
        journals = report.results.len(),
        new_entries = report.total_new_entries(),
        translation_failures = report.total_translation_failures(),
        elapsed_secs = start_time.elapsed().as_secs(),
        "Run complete"
    );

    if report.had_errors() {
        std::process::exit(1);
    }
    Ok(())
}
