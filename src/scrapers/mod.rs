//! Publisher-specific enrichers that upgrade feed-derived records.
//!
//! Feeds announce that an article exists; what they carry beyond that
//! varies wildly by publisher. Each enricher here takes a base record built
//! from the feed and fills in what its publisher withholds, using whatever
//! access strategy that publisher requires.
//!
//! # Supported Publishers
//!
//! | Publisher | Module | Strategy | Fills in |
//! |-----------|--------|----------|----------|
//! | ScienceDirect | [`sciencedirect`] | Elsevier API, browser-rendered page as fallback | title, authors, date, abstract |
//! | Oxford (OUP) | [`oxford`] | Browser-rendered page | authors only |
//!
//! Journals typed as plain feeds skip enrichment entirely.
//!
//! # Common Patterns
//!
//! Enrichers share a contract:
//! - Input is an [`crate::models::ArticleRecord`] plus the feed entry it
//!   came from; output is the record, improved or untouched.
//! - Failures are soft: a dead API, an unrenderable page, or a parse gap
//!   logs a warning and keeps the feed-derived record. Only the
//!   orchestrator decides what counts as a journal-level failure.
//! - Browser access goes through the shared per-source
//!   [`crate::browser::BrowserSession`]; enrichers never launch browsers.
//! - Enrichers never touch storage. They return translation
//!   attempt/failure counts for the run report instead of recording
//!   anything themselves.

pub mod oxford;
pub mod sciencedirect;
