//! Field provenance: values that remember where they came from.
//!
//! Extraction helpers return [`FieldValue<T>`] rather than raw values. A
//! helper tries its sources in a fixed priority order (typically structured
//! DOM markup, then page metadata tags, then URL-derived inference) and
//! stops at the first non-empty result, tagging it with the source that
//! succeeded. If every source fails, the field is absent with a
//! human-readable missing reason.
//!
//! These wrappers live only for the duration of enrichment; they are
//! consumed to build an [`crate::models::ArticleRecord`] update and are
//! never persisted directly.

use serde::Serialize;

/// Which extraction strategy produced a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    /// Structured on-page markup (the most authoritative).
    Dom,
    /// `<meta>` tags such as Highwire `citation_*` entries.
    Meta,
    /// Parsed out of the page or article URL.
    Url,
    /// Derived from other extracted fields rather than observed directly.
    Inferred,
}

/// A value extracted from a document, tagged with how it was obtained,
/// or, if absent, why.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue<T> {
    pub value: Option<T>,
    pub source: Option<FieldSource>,
    pub missing_reason: Option<String>,
}

impl<T> FieldValue<T> {
    /// A present value with its provenance tag.
    pub fn found(value: T, source: FieldSource) -> Self {
        FieldValue {
            value: Some(value),
            source: Some(source),
            missing_reason: None,
        }
    }

    /// An absent value with a human-readable reason.
    pub fn missing(reason: impl Into<String>) -> Self {
        FieldValue {
            value: None,
            source: None,
            missing_reason: Some(reason.into()),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }

    /// Borrow the value, if present.
    pub fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

/// Wrap an extraction result: `Some` becomes a tagged value, `None` the
/// given missing reason. The common final step of a fallback chain.
pub fn field_from<T>(
    extracted: Option<(T, FieldSource)>,
    missing_reason: &str,
) -> FieldValue<T> {
    match extracted {
        Some((value, source)) => FieldValue::found(value, source),
        None => FieldValue::missing(missing_reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_carries_source() {
        let fv = FieldValue::found("Title".to_string(), FieldSource::Dom);
        assert!(!fv.is_missing());
        assert_eq!(fv.source, Some(FieldSource::Dom));
        assert!(fv.missing_reason.is_none());
    }

    #[test]
    fn test_missing_carries_reason() {
        let fv: FieldValue<String> = FieldValue::missing("abstract missing");
        assert!(fv.is_missing());
        assert!(fv.source.is_none());
        assert_eq!(fv.missing_reason.as_deref(), Some("abstract missing"));
    }

    #[test]
    fn test_field_from() {
        let present = field_from(Some(("doi".to_string(), FieldSource::Meta)), "DOI missing");
        assert_eq!(present.value.as_deref(), Some("doi"));
        assert_eq!(present.source, Some(FieldSource::Meta));

        let absent: FieldValue<String> = field_from(None, "DOI missing");
        assert!(absent.is_missing());
        assert_eq!(absent.missing_reason.as_deref(), Some("DOI missing"));
    }

    #[test]
    fn test_field_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FieldSource::Dom).unwrap(), "\"dom\"");
        assert_eq!(
            serde_json::to_string(&FieldSource::Inferred).unwrap(),
            "\"inferred\""
        );
    }
}
