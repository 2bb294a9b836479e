//! Oxford University Press (academic.oup.com) enrichment.
//!
//! OUP feeds are complete except for one gap: author lists. The fix is
//! narrow: when the base record has no authors, render the article page
//! through the shared browser session and pull authors from the page's
//! JSON-LD block, falling back to `citation_author` meta tags. Everything
//! else on the record is left alone, and any failure along the way is a
//! soft failure that keeps the feed-derived record.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::browser::BrowserSession;
use crate::models::{ArticleRecord, NormalizedFeedEntry};

/// Authors-only enricher for Oxford journals.
pub struct OxfordEnricher;

impl OxfordEnricher {
    #[instrument(level = "info", skip_all, fields(entry_id = %entry.id))]
    pub async fn enrich(
        &self,
        record: ArticleRecord,
        entry: &NormalizedFeedEntry,
        session: &mut BrowserSession,
    ) -> ArticleRecord {
        if !record.authors.is_empty() {
            return record;
        }
        if entry.link.is_empty() {
            debug!("Oxford entry has no link; keeping feed record");
            return record;
        }

        let html = match session.fetch(&entry.link, None, None).await {
            Ok(html) => html,
            Err(e) => {
                warn!(link = %entry.link, error = %e, "Oxford page render failed");
                return record;
            }
        };

        let authors = extract_authors(&html);
        if authors.is_empty() {
            debug!(link = %entry.link, "No authors found on Oxford page");
            return record;
        }
        ArticleRecord { authors, ..record }
    }
}

/// Pull author names from a rendered OUP article page: JSON-LD first,
/// `citation_author` meta tags second.
pub fn extract_authors(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);

    static SEL_LD: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
    for script in doc.select(&SEL_LD) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        let candidates = match &data {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        };
        for item in candidates {
            let authors = coerce_ld_authors(item.get("author"));
            if !authors.is_empty() {
                return authors;
            }
        }
    }

    static SEL_META: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"meta[name="citation_author"]"#).unwrap());
    doc.select(&SEL_META)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON-LD `author` payloads come as a person object, a list of them, or a
/// bare string. Flatten whatever shape arrives into names.
fn coerce_ld_authors(payload: Option<&Value>) -> Vec<String> {
    match payload {
        Some(Value::Object(map)) => map
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| vec![n.to_string()])
            .unwrap_or_default(),
        Some(Value::Array(items)) => items
            .iter()
            .flat_map(|item| coerce_ld_authors(Some(item)))
            .collect(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_authors_from_json_ld_list() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@type": "ScholarlyArticle",
             "author": [{"name": "Ada Lovelace"}, {"name": "Alan Turing"}]}
            </script>
            <meta name="citation_author" content="Should Not Win"/>
        </head><body></body></html>"#;
        assert_eq!(extract_authors(html), vec!["Ada Lovelace", "Alan Turing"]);
    }

    #[test]
    fn test_extract_authors_from_json_ld_single_object() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"author": {"name": "Grace Hopper"}}
            </script>
        </head><body></body></html>"#;
        assert_eq!(extract_authors(html), vec!["Grace Hopper"]);
    }

    #[test]
    fn test_extract_authors_from_json_ld_top_level_array() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            [{"@type": "WebPage"}, {"author": ["K. Gödel", "E. Noether"]}]
            </script>
        </head><body></body></html>"#;
        assert_eq!(extract_authors(html), vec!["K. Gödel", "E. Noether"]);
    }

    #[test]
    fn test_extract_authors_meta_fallback() {
        let html = r#"<html><head>
            <script type="application/ld+json">not valid json at all</script>
            <meta name="citation_author" content="Liu, Wei"/>
            <meta name="citation_author" content="  "/>
            <meta name="citation_author" content="Chen, Min"/>
        </head><body></body></html>"#;
        assert_eq!(extract_authors(html), vec!["Liu, Wei", "Chen, Min"]);
    }

    #[test]
    fn test_extract_authors_empty_page() {
        assert!(extract_authors("<html><body><p>paywall</p></body></html>").is_empty());
    }
}
