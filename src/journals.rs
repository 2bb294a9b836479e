//! Journal list loading.
//!
//! The set of journals to harvest lives in a CSV file with the header
//! `name,rss_url,source_type,notes`. Slugs are derived from names and name
//! the archive file for each journal; source types select the enrichment
//! strategy (unknown labels fall back to the plain feed path).

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{JournalSource, SourceType};
use crate::utils::slugify;

#[derive(Debug, Error)]
pub enum JournalListError {
    #[error("journal list not found: {0}")]
    NotFound(String),
    #[error("journal list unreadable: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct JournalRow {
    name: String,
    rss_url: String,
    #[serde(default)]
    source_type: String,
    #[serde(default)]
    notes: String,
}

/// Load and validate the journal list. Rows without a name or feed URL are
/// skipped with a warning rather than failing the whole run.
pub fn load_journal_list(path: &Path) -> Result<Vec<JournalSource>, JournalListError> {
    if !path.exists() {
        return Err(JournalListError::NotFound(path.display().to_string()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut journals = Vec::new();
    for result in reader.deserialize::<JournalRow>() {
        let row = result?;
        if row.name.is_empty() || row.rss_url.is_empty() {
            warn!(name = %row.name, rss_url = %row.rss_url, "Skipping journal row with missing name or feed URL");
            continue;
        }
        let source_type = SourceType::parse(&row.source_type);
        journals.push(JournalSource {
            slug: slugify(&row.name),
            name: row.name,
            rss_url: row.rss_url,
            source_type,
            notes: if row.notes.is_empty() {
                None
            } else {
                Some(row.notes)
            },
        });
    }
    info!(count = journals.len(), path = %path.display(), "Loaded journal list");
    Ok(journals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_journal_list() {
        let file = write_csv(
            "name,rss_url,source_type,notes\n\
             European Economic Review,https://rss.sciencedirect.com/publication/science/00142921,sciencedirect,Elsevier\n\
             Review of Economic Studies,https://academic.oup.com/rss/site_5504/3365.xml,oxford,\n\
             Some Open Journal,https://open.example/feed,, \n",
        );
        let journals = load_journal_list(file.path()).unwrap();
        assert_eq!(journals.len(), 3);

        assert_eq!(journals[0].slug, "european-economic-review");
        assert_eq!(journals[0].source_type, SourceType::Sciencedirect);
        assert_eq!(journals[0].notes.as_deref(), Some("Elsevier"));

        assert_eq!(journals[1].source_type, SourceType::Oxford);
        assert!(journals[1].notes.is_none());

        assert_eq!(journals[2].source_type, SourceType::Feed);
    }

    #[test]
    fn test_rows_missing_required_fields_are_skipped() {
        let file = write_csv(
            "name,rss_url,source_type,notes\n\
             ,https://pub.example/feed,feed,\n\
             Named But Feedless,,feed,\n\
             Valid Journal,https://pub.example/feed,feed,\n",
        );
        let journals = load_journal_list(file.path()).unwrap();
        assert_eq!(journals.len(), 1);
        assert_eq!(journals[0].name, "Valid Journal");
    }

    #[test]
    fn test_missing_file() {
        let err = load_journal_list(Path::new("/nonexistent/journals.csv")).unwrap_err();
        assert!(matches!(err, JournalListError::NotFound(_)));
    }
}
