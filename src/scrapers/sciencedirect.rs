//! ScienceDirect (Elsevier) article enrichment.
//!
//! Two strategies, tried in order of authority:
//!
//! 1. **Article Retrieval API**: the feed entry's PII (Elsevier's article
//!    identifier) keys a JSON lookup that usually carries the full author
//!    list, cover date, and abstract. Auth and not-found failures are
//!    permanent; rate limits and server errors retry with capped
//!    exponential backoff.
//! 2. **Browser-rendered page**: when the API path is unavailable or yields
//!    nothing richer than the feed, the article page is rendered through the
//!    shared browser session and parsed field-by-field with provenance
//!    tracking (structured DOM, then Highwire `citation_*` meta tags, then
//!    URL inference).
//!
//! Either path triggers abstract translation only when it produced a
//! non-empty abstract the record does not already hold.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use rand::{rng, Rng};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::browser::BrowserSession;
use crate::models::{ArticleRecord, NormalizedFeedEntry};
use crate::provenance::{field_from, FieldSource, FieldValue};
use crate::translate::{translate_abstract, Translator};

const SCID_BASE_URL: &str = "https://www.sciencedirect.com";
const ELSEVIER_API_BASE: &str = "https://api.elsevier.com/content/article/pii";
const NEXT_DATA_SELECTOR: &str = "script#__NEXT_DATA__";
const NEXT_DATA_SCRIPT: &str = "window.__NEXT_DATA__";

static RE_PII: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/pii/([^/?#]+)").unwrap());
static RE_DOI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)10\.\d{4,9}/[-._;()/:A-Z0-9]+").unwrap());

/// Elsevier Article Retrieval API failures, split by retryability.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Auth rejection, unknown PII, or another status retrying cannot fix.
    #[error("Elsevier API returned {status}: {message}")]
    Permanent { status: u16, message: String },
    /// Rate limiting, server errors, or network failures that persisted
    /// through every retry.
    #[error("Elsevier API gave up after retries: {0}")]
    Transient(String),
}

enum Disposition {
    Success,
    Permanent,
    Retry,
}

fn classify_status(status: u16) -> Disposition {
    match status {
        200 => Disposition::Success,
        429 => Disposition::Retry,
        s if s >= 500 => Disposition::Retry,
        _ => Disposition::Permanent,
    }
}

/// Thin client for the Elsevier Article Retrieval API.
pub struct ElsevierApiClient {
    client: reqwest::Client,
    api_key: String,
    inst_token: Option<String>,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ElsevierApiClient {
    pub fn new(api_key: String, inst_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        ElsevierApiClient {
            client,
            api_key,
            inst_token,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Fetch the full-text-retrieval payload for a PII.
    ///
    /// 429 and 5xx responses (and network errors) retry with
    /// `base_delay * 2^(attempt-1)` capped at `max_delay`, plus jitter.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_by_pii(&self, pii: &str) -> Result<Value, ApiError> {
        let url = format!("{ELSEVIER_API_BASE}/{pii}");
        let mut last_failure = String::new();

        for attempt in 1..=self.max_retries {
            let mut request = self
                .client
                .get(&url)
                .query(&[("httpAccept", "application/json")])
                .header("X-ELS-APIKey", &self.api_key)
                .header("Accept", "application/json");
            if let Some(token) = &self.inst_token {
                request = request.header("X-ELS-Insttoken", token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match classify_status(status) {
                        Disposition::Success => {
                            return response.json::<Value>().await.map_err(|e| {
                                ApiError::Transient(format!("decode failed: {e}"))
                            });
                        }
                        Disposition::Permanent => {
                            let body = response.text().await.unwrap_or_default();
                            let message = match status {
                                401 | 403 => {
                                    "request rejected; check API key / insttoken".to_string()
                                }
                                404 => "PII not found".to_string(),
                                _ => truncate(&body, 200),
                            };
                            return Err(ApiError::Permanent { status, message });
                        }
                        Disposition::Retry => {
                            last_failure = format!("status {status}");
                        }
                    }
                }
                Err(e) => {
                    last_failure = e.to_string();
                }
            }

            if attempt < self.max_retries {
                let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                if delay > self.max_delay {
                    delay = self.max_delay;
                }
                let jitter_ms: u64 = rng().random_range(0..=250);
                let delay = delay + Duration::from_millis(jitter_ms);
                warn!(
                    attempt,
                    max = self.max_retries,
                    ?delay,
                    failure = %last_failure,
                    "Elsevier API attempt failed; backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(ApiError::Transient(last_failure))
    }
}

fn truncate(text: &str, max: usize) -> String {
    let mut end = text.len().min(max);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Extract the Elsevier PII from a feed entry: ScienceDirect feeds carry
/// it either as the entry id itself or inside the article link.
pub fn pii_from_entry(entry: &NormalizedFeedEntry) -> Option<String> {
    if entry.id.starts_with('S') && !entry.id.contains('/') {
        return Some(entry.id.clone());
    }
    RE_PII
        .captures(&entry.link)
        .map(|caps| caps[1].to_string())
}

/// Abstract-only landing pages live under `/science/article/abs/pii/`;
/// the full article renders at the non-abs path with the same session.
pub fn rewrite_abs_url(url: &str) -> String {
    url.replace("/science/article/abs/pii/", "/science/article/pii/")
}

/// An author as found on a ScienceDirect article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScidAuthor {
    pub name: String,
    pub affiliations: Vec<String>,
}

/// A ScienceDirect article page, parsed field-by-field with provenance.
#[derive(Debug, Clone)]
pub struct ParsedArticle {
    pub title: FieldValue<String>,
    pub doi: FieldValue<String>,
    pub pii: FieldValue<String>,
    pub authors: FieldValue<Vec<ScidAuthor>>,
    pub publication_date: FieldValue<String>,
    pub abstract_text: FieldValue<String>,
    pub keywords: FieldValue<Vec<String>>,
    pub highlights: FieldValue<Vec<String>>,
    pub pdf_url: FieldValue<String>,
}

impl ParsedArticle {
    /// Which fields came up empty, and why. Diagnostics for logging and a
    /// direct oracle for the parser tests.
    pub fn missing_fields(&self) -> BTreeMap<&'static str, &str> {
        fn note<'a>(
            report: &mut BTreeMap<&'static str, &'a str>,
            name: &'static str,
            reason: &'a Option<String>,
            missing: bool,
        ) {
            if missing {
                if let Some(reason) = reason {
                    report.insert(name, reason.as_str());
                }
            }
        }

        let mut report = BTreeMap::new();
        note(
            &mut report,
            "title",
            &self.title.missing_reason,
            self.title.is_missing(),
        );
        note(
            &mut report,
            "doi",
            &self.doi.missing_reason,
            self.doi.is_missing(),
        );
        note(
            &mut report,
            "pii",
            &self.pii.missing_reason,
            self.pii.is_missing(),
        );
        note(
            &mut report,
            "authors",
            &self.authors.missing_reason,
            self.authors.is_missing(),
        );
        note(
            &mut report,
            "publication_date",
            &self.publication_date.missing_reason,
            self.publication_date.is_missing(),
        );
        note(
            &mut report,
            "abstract",
            &self.abstract_text.missing_reason,
            self.abstract_text.is_missing(),
        );
        note(
            &mut report,
            "keywords",
            &self.keywords.missing_reason,
            self.keywords.is_missing(),
        );
        note(
            &mut report,
            "highlights",
            &self.highlights.missing_reason,
            self.highlights.is_missing(),
        );
        note(
            &mut report,
            "pdf_url",
            &self.pdf_url.missing_reason,
            self.pdf_url.is_missing(),
        );
        report
    }
}

/// Parse a rendered ScienceDirect article page.
pub fn parse_article(html: &str, url: Option<&str>) -> ParsedArticle {
    let doc = Html::parse_document(html);
    let pii = extract_pii(&doc, url);
    let pdf_url = extract_pdf_url(&doc, url, pii.as_ref().map(|(v, _)| v.as_str()));

    ParsedArticle {
        title: field_from(extract_title(&doc), "title not found in DOM or meta"),
        doi: field_from(extract_doi(&doc, html), "DOI missing from DOM/meta"),
        pii: field_from(pii, "PII missing from DOM/meta"),
        authors: field_from(extract_authors(&doc), "author list missing"),
        publication_date: field_from(extract_publication_date(&doc), "publication date missing"),
        abstract_text: field_from(extract_abstract(&doc), "abstract missing"),
        keywords: field_from(extract_keywords(&doc), "keywords missing"),
        highlights: field_from(extract_highlights(&doc), "highlights missing"),
        pdf_url: field_from(pdf_url, "PDF link missing"),
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn meta_content(doc: &Html, names: &[&str]) -> Option<(String, FieldSource)> {
    for name in names {
        let selector = Selector::parse(&format!(r#"meta[name="{name}"]"#)).ok()?;
        for el in doc.select(&selector) {
            if let Some(content) = el.value().attr("content") {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    return Some((trimmed.to_string(), FieldSource::Meta));
                }
            }
        }
    }
    None
}

fn meta_all(doc: &Html, name: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(&format!(r#"meta[name="{name}"]"#)) else {
        return Vec::new();
    };
    doc.select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn extract_title(doc: &Html) -> Option<(String, FieldSource)> {
    static SEL: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-qa="article-title"], h1[data-qa]"#).unwrap());
    if let Some(el) = doc.select(&SEL).next() {
        let text = element_text(el);
        if !text.is_empty() {
            return Some((text, FieldSource::Dom));
        }
    }
    meta_content(doc, &["citation_title"])
}

fn extract_doi(doc: &Html, raw_html: &str) -> Option<(String, FieldSource)> {
    if let Some(found) = meta_content(doc, &["citation_doi", "dc.identifier"]) {
        return Some(found);
    }
    static SEL: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"a[href*="doi.org"]"#).unwrap());
    for el in doc.select(&SEL) {
        if let Some(href) = el.value().attr("href") {
            if let Some(m) = RE_DOI.find(href) {
                return Some((m.as_str().to_string(), FieldSource::Dom));
            }
        }
    }
    RE_DOI
        .find(raw_html)
        .map(|m| (m.as_str().to_string(), FieldSource::Url))
}

fn extract_pii(doc: &Html, url: Option<&str>) -> Option<(String, FieldSource)> {
    if let Some(found) = meta_content(doc, &["citation_pii"]) {
        return Some(found);
    }
    static SEL_ATTR: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-pii]").unwrap());
    if let Some(el) = doc.select(&SEL_ATTR).next() {
        if let Some(value) = el.value().attr("data-pii") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some((trimmed.to_string(), FieldSource::Dom));
            }
        }
    }
    static SEL_A: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
    for el in doc.select(&SEL_A) {
        if let Some(href) = el.value().attr("href") {
            if let Some(caps) = RE_PII.captures(href) {
                return Some((caps[1].to_string(), FieldSource::Dom));
            }
        }
    }
    url.and_then(|u| RE_PII.captures(u))
        .map(|caps| (caps[1].to_string(), FieldSource::Url))
}

fn extract_authors(doc: &Html) -> Option<(Vec<ScidAuthor>, FieldSource)> {
    static SEL_AUTHOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-qa="author"], [data-qa="author-item"]"#).unwrap());
    static SEL_NAME: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-qa="author-name"]"#).unwrap());
    static SEL_AFF: Lazy<Selector> = Lazy::new(|| {
        Selector::parse(r#"[data-qa="author-affiliation"], [data-qa="author-affiliations"]"#)
            .unwrap()
    });

    let mut authors = Vec::new();
    for container in doc.select(&SEL_AUTHOR) {
        let Some(name_el) = container.select(&SEL_NAME).next() else {
            continue;
        };
        let name = element_text(name_el);
        if name.is_empty() {
            continue;
        }
        let affiliations = container
            .select(&SEL_AFF)
            .map(element_text)
            .filter(|a| !a.is_empty())
            .collect();
        authors.push(ScidAuthor { name, affiliations });
    }
    if !authors.is_empty() {
        return Some((authors, FieldSource::Dom));
    }

    let names = meta_all(doc, "citation_author");
    if names.is_empty() {
        return None;
    }
    let institutions = meta_all(doc, "citation_author_institution");
    let authors = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| ScidAuthor {
            name,
            affiliations: institutions
                .get(i)
                .map(|inst| split_multi(inst))
                .unwrap_or_default(),
        })
        .collect();
    Some((authors, FieldSource::Meta))
}

fn extract_publication_date(doc: &Html) -> Option<(String, FieldSource)> {
    static SEL: Lazy<Selector> = Lazy::new(|| {
        Selector::parse(r#"[data-qa="publication-date"], time[data-qa], div[data-qa="publication"]"#)
            .unwrap()
    });
    if let Some(el) = doc.select(&SEL).next() {
        if let Some(parsed) = parse_date(&element_text(el)) {
            return Some((parsed, FieldSource::Dom));
        }
    }
    let (value, source) =
        meta_content(doc, &["citation_publication_date", "prism.publicationDate"])?;
    parse_date(&value).map(|parsed| (parsed, source))
}

/// Normalize the date formats seen on publisher pages into ISO `YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Option<String> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    None
}

fn extract_abstract(doc: &Html) -> Option<(String, FieldSource)> {
    static SEL: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-qa="abstract-text"], section#abstracts div"#).unwrap());
    static SEL_BLOCKS: Lazy<Selector> = Lazy::new(|| Selector::parse("p, li").unwrap());
    if let Some(container) = doc.select(&SEL).next() {
        let mut paragraphs: Vec<String> = container
            .select(&SEL_BLOCKS)
            .map(element_text)
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            let whole = element_text(container);
            if !whole.is_empty() {
                paragraphs.push(whole);
            }
        }
        let joined = paragraphs.join("\n\n");
        if !joined.is_empty() {
            return Some((joined, FieldSource::Dom));
        }
    }
    meta_content(doc, &["citation_abstract"])
}

fn extract_keywords(doc: &Html) -> Option<(Vec<String>, FieldSource)> {
    static SEL: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-qa="keyword"], .keyword-chip"#).unwrap());
    let keywords: Vec<String> = doc
        .select(&SEL)
        .map(element_text)
        .filter(|k| !k.is_empty())
        .unique()
        .collect();
    if !keywords.is_empty() {
        return Some((keywords, FieldSource::Dom));
    }
    let meta_keywords: Vec<String> = meta_all(doc, "citation_keywords")
        .iter()
        .flat_map(|raw| split_multi(raw))
        .unique()
        .collect();
    if !meta_keywords.is_empty() {
        return Some((meta_keywords, FieldSource::Meta));
    }
    None
}

fn extract_highlights(doc: &Html) -> Option<(Vec<String>, FieldSource)> {
    static SEL: Lazy<Selector> = Lazy::new(|| {
        Selector::parse(r#"[data-qa="highlight-item"], section[data-qa="highlights"] li"#).unwrap()
    });
    let items: Vec<String> = doc
        .select(&SEL)
        .map(element_text)
        .filter(|h| !h.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some((items, FieldSource::Dom))
    }
}

fn extract_pdf_url(doc: &Html, url: Option<&str>, pii: Option<&str>) -> Option<(String, FieldSource)> {
    static SEL: Lazy<Selector> = Lazy::new(|| {
        Selector::parse(r#"a[data-qa="download-pdf"], a[href*="/pdfft"], a[href*="/pdf"]"#).unwrap()
    });
    if let Some(el) = doc.select(&SEL).next() {
        if let Some(href) = el.value().attr("href") {
            let base = url.unwrap_or(SCID_BASE_URL);
            if let Ok(base_url) = url::Url::parse(base) {
                if let Ok(resolved) = base_url.join(href) {
                    return Some((resolved.to_string(), FieldSource::Dom));
                }
            }
        }
    }
    if let Some(found) = meta_content(doc, &["citation_pdf_url"]) {
        return Some(found);
    }
    pii.map(|pii| {
        (
            format!("{SCID_BASE_URL}/science/article/pii/{pii}/pdf?isDTMRedir=true"),
            FieldSource::Inferred,
        )
    })
}

fn split_multi(value: &str) -> Vec<String> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// API + browser-fallback enricher for ScienceDirect journals.
pub struct ScienceDirectEnricher {
    api_client: Option<ElsevierApiClient>,
    logged_missing_client: bool,
}

impl ScienceDirectEnricher {
    pub fn new(api_client: Option<ElsevierApiClient>) -> Self {
        ScienceDirectEnricher {
            api_client,
            logged_missing_client: false,
        }
    }

    /// Enrich a base record. Returns the (possibly updated) record plus the
    /// number of translation attempts and failures the enrichment caused.
    /// Soft-fails: any path that cannot improve the record leaves it as-is.
    #[instrument(level = "info", skip_all, fields(entry_id = %entry.id))]
    pub async fn enrich<T: Translator>(
        &mut self,
        record: ArticleRecord,
        entry: &NormalizedFeedEntry,
        session: &mut BrowserSession,
        translator: &T,
    ) -> (ArticleRecord, u32, u32) {
        let Some(pii) = pii_from_entry(entry) else {
            warn!(link = %entry.link, "ScienceDirect entry has no PII; skipping enrichment");
            return (record, 0, 0);
        };

        match &self.api_client {
            Some(client) => match client.fetch_by_pii(&pii).await {
                Ok(payload) => {
                    match apply_api_payload(record.clone(), &payload, translator).await {
                        Some(result) => return result,
                        None => {
                            warn!(pii, "Elsevier API returned minimal metadata; trying page render")
                        }
                    }
                }
                Err(e) => warn!(pii, error = %e, "Elsevier API failed; trying page render"),
            },
            None => {
                if !self.logged_missing_client {
                    warn!("Elsevier API key not configured; ScienceDirect enrichment is render-only");
                    self.logged_missing_client = true;
                }
            }
        }

        self.enrich_from_page(record, entry, &pii, session, translator)
            .await
    }

    async fn enrich_from_page<T: Translator>(
        &self,
        record: ArticleRecord,
        entry: &NormalizedFeedEntry,
        pii: &str,
        session: &mut BrowserSession,
        translator: &T,
    ) -> (ArticleRecord, u32, u32) {
        let url = if entry.link.is_empty() {
            format!("{SCID_BASE_URL}/science/article/pii/{pii}")
        } else {
            rewrite_abs_url(&entry.link)
        };

        let html = match session
            .fetch(&url, Some(NEXT_DATA_SELECTOR), Some(NEXT_DATA_SCRIPT))
            .await
        {
            Ok(html) => html,
            Err(e) => {
                warn!(%url, error = %e, "ScienceDirect page render failed");
                return (record, 0, 0);
            }
        };

        let parsed = parse_article(&html, Some(&url));
        let missing = parsed.missing_fields();
        if !missing.is_empty() {
            debug!(%url, ?missing, "ScienceDirect page parsed with gaps");
        }
        apply_parsed_article(record, &parsed, translator).await
    }
}

/// Fold an API payload into the record. Returns `None` when the payload
/// supplied nothing the record did not already hold.
pub async fn apply_api_payload<T: Translator>(
    mut record: ArticleRecord,
    payload: &Value,
    translator: &T,
) -> Option<(ArticleRecord, u32, u32)> {
    let root = payload.get("full-text-retrieval-response")?;
    let coredata = root.get("coredata").cloned().unwrap_or(Value::Null);
    let mut changed = false;

    if let Some(title) = str_value(coredata.get("dc:title")) {
        if title != record.title {
            record.title = title;
            changed = true;
        }
    }

    let authors = api_authors(root, &coredata);
    if !authors.is_empty() && authors != record.authors {
        record.authors = authors;
        changed = true;
    }

    if let Some(cover_date) = str_value(coredata.get("prism:coverDate")) {
        if let Some(published_at) = date_to_utc(&cover_date) {
            if record.published_at != Some(published_at) {
                record.published_at = Some(published_at);
                changed = true;
            }
        }
    }

    let mut attempts = 0;
    let mut failures = 0;
    if let Some(abstract_text) = api_abstract(root, &coredata) {
        if record.abstract_original.as_deref() != Some(abstract_text.as_str()) {
            let (outcome, attempted, language) =
                translate_abstract(translator, &abstract_text).await;
            if attempted {
                attempts = 1;
                if outcome.status == crate::models::TranslationStatus::Failed {
                    failures = 1;
                }
            }
            record.abstract_original = Some(abstract_text);
            record.abstract_language = language;
            record.abstract_zh = outcome.translated_text.clone();
            record.translation = outcome.to_record();
            changed = true;
        }
    }

    if changed {
        info!(id = %record.id, "Applied Elsevier API metadata");
        Some((record, attempts, failures))
    } else {
        None
    }
}

/// Fold a parsed page into the record, same overwrite rules as the API path.
async fn apply_parsed_article<T: Translator>(
    mut record: ArticleRecord,
    parsed: &ParsedArticle,
    translator: &T,
) -> (ArticleRecord, u32, u32) {
    if let Some(title) = parsed.title.as_ref() {
        if !title.is_empty() && *title != record.title {
            record.title = title.clone();
        }
    }
    if let Some(authors) = parsed.authors.as_ref() {
        let names: Vec<String> = authors.iter().map(|a| a.name.clone()).unique().collect();
        if !names.is_empty() && names != record.authors {
            record.authors = names;
        }
    }
    if let Some(date) = parsed.publication_date.as_ref() {
        if let Some(published_at) = date_to_utc(date) {
            record.published_at = Some(published_at);
        }
    }

    let mut attempts = 0;
    let mut failures = 0;
    if let Some(abstract_text) = parsed.abstract_text.as_ref() {
        if !abstract_text.is_empty()
            && record.abstract_original.as_deref() != Some(abstract_text.as_str())
        {
            let (outcome, attempted, language) =
                translate_abstract(translator, abstract_text).await;
            if attempted {
                attempts = 1;
                if outcome.status == crate::models::TranslationStatus::Failed {
                    failures = 1;
                }
            }
            record.abstract_original = Some(abstract_text.clone());
            record.abstract_language = language;
            record.abstract_zh = outcome.translated_text.clone();
            record.translation = outcome.to_record();
        }
    }
    (record, attempts, failures)
}

fn str_value(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn date_to_utc(iso_date: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(iso_date.trim(), "%Y-%m-%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

fn api_authors(root: &Value, coredata: &Value) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();

    let name_from = |entry: &Value| -> Option<String> {
        if let Some(s) = entry.as_str() {
            let trimmed = s.trim();
            return (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        for key in ["ce:indexed-name", "ce:surname", "surname", "$", "#text"] {
            if let Some(candidate) = str_value(entry.get(key)) {
                return Some(candidate);
            }
        }
        None
    };

    let authors_node = root
        .get("authors")
        .filter(|v| !v.is_null())
        .or_else(|| coredata.get("authors"));
    if let Some(node) = authors_node {
        match node.get("author") {
            Some(Value::Array(raw)) => authors.extend(raw.iter().filter_map(name_from)),
            Some(single) if !single.is_null() => authors.extend(name_from(single)),
            _ => {}
        }
    }

    match coredata.get("dc:creator") {
        Some(Value::Array(creators)) => authors.extend(creators.iter().filter_map(name_from)),
        Some(single) if !single.is_null() => authors.extend(name_from(single)),
        _ => {}
    }

    authors.into_iter().unique().collect()
}

fn api_abstract(root: &Value, coredata: &Value) -> Option<String> {
    if let Some(first) = root
        .pointer("/abstracts/abstract/0")
        .filter(|v| v.is_object())
    {
        let paras = first.get("ce:para").or_else(|| first.get("para"));
        match paras {
            Some(Value::Array(items)) => {
                let joined = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .join("\n\n");
                if !joined.is_empty() {
                    return Some(joined);
                }
            }
            Some(Value::String(s)) if !s.trim().is_empty() => {
                return Some(s.trim().to_string());
            }
            _ => {}
        }
    }
    str_value(coredata.get("dc:description"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TranslationRecord, TranslationStatus};
    use crate::translate::TranslationOutcome;

    struct EchoTranslator;

    impl Translator for EchoTranslator {
        async fn translate(&self, text: &str, _source_language: &str) -> TranslationOutcome {
            TranslationOutcome {
                status: TranslationStatus::Success,
                translated_text: Some(format!("译:{text}")),
                translator: Some("echo".to_string()),
                translated_at: Utc::now(),
                error: None,
            }
        }
    }

    fn entry(id: &str, link: &str) -> NormalizedFeedEntry {
        NormalizedFeedEntry {
            id: id.to_string(),
            title: "T".to_string(),
            summary: String::new(),
            link: link.to_string(),
            authors: vec![],
            published_at: None,
        }
    }

    fn base_record() -> ArticleRecord {
        ArticleRecord {
            id: "S0001".to_string(),
            title: "Feed Title".to_string(),
            link: "https://www.sciencedirect.com/science/article/pii/S0001".to_string(),
            authors: vec![],
            published_at: None,
            abstract_original: None,
            abstract_language: None,
            abstract_zh: None,
            translation: TranslationRecord::skipped(),
            fetched_at: Utc::now(),
            source: "RSS".to_string(),
        }
    }

    #[test]
    fn test_pii_from_entry_id() {
        let e = entry("S0304393225001234", "");
        assert_eq!(pii_from_entry(&e).as_deref(), Some("S0304393225001234"));
    }

    #[test]
    fn test_pii_from_entry_link() {
        let e = entry(
            "tag:elsevier",
            "https://www.sciencedirect.com/science/article/pii/S030439322500X?dgcid=rss",
        );
        assert_eq!(pii_from_entry(&e).as_deref(), Some("S030439322500X"));
    }

    #[test]
    fn test_pii_from_entry_absent() {
        let e = entry("tag:elsevier", "https://www.sciencedirect.com/journal/home");
        assert!(pii_from_entry(&e).is_none());
    }

    #[test]
    fn test_rewrite_abs_url() {
        assert_eq!(
            rewrite_abs_url("https://www.sciencedirect.com/science/article/abs/pii/S1?via=ihub"),
            "https://www.sciencedirect.com/science/article/pii/S1?via=ihub"
        );
        let unchanged = "https://www.sciencedirect.com/science/article/pii/S1";
        assert_eq!(rewrite_abs_url(unchanged), unchanged);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(200), Disposition::Success));
        assert!(matches!(classify_status(401), Disposition::Permanent));
        assert!(matches!(classify_status(403), Disposition::Permanent));
        assert!(matches!(classify_status(404), Disposition::Permanent));
        assert!(matches!(classify_status(429), Disposition::Retry));
        assert!(matches!(classify_status(500), Disposition::Retry));
        assert!(matches!(classify_status(503), Disposition::Retry));
        assert!(matches!(classify_status(400), Disposition::Permanent));
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2026-01-15").as_deref(), Some("2026-01-15"));
        assert_eq!(parse_date("2026/01/15").as_deref(), Some("2026-01-15"));
        assert_eq!(parse_date("15 January 2026").as_deref(), Some("2026-01-15"));
        assert_eq!(parse_date("January 15, 2026").as_deref(), Some("2026-01-15"));
        assert_eq!(
            parse_date("2026-01-15T08:30:00Z").as_deref(),
            Some("2026-01-15")
        );
        assert!(parse_date("sometime soon").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_parse_article_dom_beats_meta() {
        let html = r#"<html><head>
            <meta name="citation_title" content="Meta Title"/>
        </head><body>
            <h1 data-qa="article-title">Dom Title</h1>
        </body></html>"#;
        let parsed = parse_article(html, None);
        assert_eq!(parsed.title.value.as_deref(), Some("Dom Title"));
        assert_eq!(parsed.title.source, Some(FieldSource::Dom));
    }

    #[test]
    fn test_parse_article_meta_fallback() {
        let html = r#"<html><head>
            <meta name="citation_title" content="Meta Title"/>
            <meta name="citation_doi" content="10.1016/j.test.2026.01.001"/>
            <meta name="citation_publication_date" content="2026/01/15"/>
            <meta name="citation_author" content="Liu, Wei"/>
            <meta name="citation_author_institution" content="Example University; Other Lab"/>
            <meta name="citation_keywords" content="growth; inflation"/>
        </head><body></body></html>"#;
        let parsed = parse_article(html, None);
        assert_eq!(parsed.title.value.as_deref(), Some("Meta Title"));
        assert_eq!(parsed.title.source, Some(FieldSource::Meta));
        assert_eq!(
            parsed.doi.value.as_deref(),
            Some("10.1016/j.test.2026.01.001")
        );
        assert_eq!(parsed.publication_date.value.as_deref(), Some("2026-01-15"));
        let authors = parsed.authors.value.unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].name, "Liu, Wei");
        assert_eq!(authors[0].affiliations, vec!["Example University", "Other Lab"]);
        assert_eq!(
            parsed.keywords.value.unwrap(),
            vec!["growth".to_string(), "inflation".to_string()]
        );
    }

    #[test]
    fn test_parse_article_missing_fields_report() {
        let parsed = parse_article("<html><body><p>nothing here</p></body></html>", None);
        let missing = parsed.missing_fields();
        // Every field absent: all nine reasons reported.
        assert_eq!(missing.len(), 9);
        assert_eq!(
            missing.get("title").copied(),
            Some("title not found in DOM or meta")
        );
        assert_eq!(missing.get("abstract").copied(), Some("abstract missing"));
        assert!(missing.contains_key("pii"));
        assert!(missing.contains_key("pdf_url"));
    }

    #[test]
    fn test_parse_article_pii_from_url_and_inferred_pdf() {
        let url = "https://www.sciencedirect.com/science/article/pii/S0304393225009999";
        let parsed = parse_article("<html><body></body></html>", Some(url));
        assert_eq!(parsed.pii.value.as_deref(), Some("S0304393225009999"));
        assert_eq!(parsed.pii.source, Some(FieldSource::Url));
        assert_eq!(
            parsed.pdf_url.value.as_deref(),
            Some("https://www.sciencedirect.com/science/article/pii/S0304393225009999/pdf?isDTMRedir=true")
        );
        assert_eq!(parsed.pdf_url.source, Some(FieldSource::Inferred));
    }

    #[test]
    fn test_parse_article_dom_abstract_and_highlights() {
        let html = r#"<html><body>
            <div data-qa="abstract-text"><p>First paragraph.</p><p>Second paragraph.</p></div>
            <section data-qa="highlights"><ul>
                <li>We show a thing.</li>
                <li>The thing matters.</li>
            </ul></section>
        </body></html>"#;
        let parsed = parse_article(html, None);
        assert_eq!(
            parsed.abstract_text.value.as_deref(),
            Some("First paragraph.\n\nSecond paragraph.")
        );
        assert_eq!(parsed.abstract_text.source, Some(FieldSource::Dom));
        assert_eq!(parsed.highlights.value.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_api_payload_updates_and_translates() {
        let payload = serde_json::json!({
            "full-text-retrieval-response": {
                "coredata": {
                    "dc:title": "API Title",
                    "prism:coverDate": "2026-02-01",
                    "dc:creator": [{"$": "Smith, Jane"}, {"$": "Doe, John"}]
                },
                "abstracts": {
                    "abstract": [{"ce:para": ["We study a mechanism.", "It works."]}]
                }
            }
        });
        let (record, attempts, failures) =
            apply_api_payload(base_record(), &payload, &EchoTranslator)
                .await
                .unwrap();
        assert_eq!(record.title, "API Title");
        assert_eq!(record.authors, vec!["Smith, Jane", "Doe, John"]);
        assert!(record.published_at.is_some());
        assert_eq!(
            record.abstract_original.as_deref(),
            Some("We study a mechanism.\n\nIt works.")
        );
        assert_eq!(record.translation.status, TranslationStatus::Success);
        assert!(record.abstract_zh.unwrap().starts_with("译:"));
        assert_eq!((attempts, failures), (1, 0));
    }

    #[tokio::test]
    async fn test_apply_api_payload_minimal_returns_none() {
        let payload = serde_json::json!({
            "full-text-retrieval-response": { "coredata": { "dc:title": "Feed Title" } }
        });
        // Title identical to the record: nothing to apply.
        assert!(apply_api_payload(base_record(), &payload, &EchoTranslator)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_apply_api_payload_authors_from_author_node() {
        let payload = serde_json::json!({
            "full-text-retrieval-response": {
                "coredata": {},
                "authors": {
                    "author": [
                        {"ce:indexed-name": "Smith J."},
                        {"ce:indexed-name": "Smith J."},
                        {"ce:surname": "Doe"}
                    ]
                }
            }
        });
        let (record, _, _) = apply_api_payload(base_record(), &payload, &EchoTranslator)
            .await
            .unwrap();
        // Duplicates collapse, order preserved.
        assert_eq!(record.authors, vec!["Smith J.", "Doe"]);
    }
}
