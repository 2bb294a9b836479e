//! Abstract translation into Simplified Chinese.
//!
//! The enrichment pipeline treats translation as a capability behind the
//! [`Translator`] trait, so the orchestrator and enrichers can be exercised
//! in tests with a stub. Two implementations ship:
//!
//! - [`DeepSeekTranslator`]: LLM-backed, via the DeepSeek chat-completions API
//! - [`NoOpTranslator`]: used with `--skip-translation` or a missing API key
//!
//! Translation failures are soft: they are reported in the returned
//! [`TranslationOutcome`] (and persisted on the record) rather than raised,
//! so a flaky translator never aborts a crawl.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, instrument, warn};

use crate::models::{TranslationRecord, TranslationStatus};

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
const DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Result of one translation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOutcome {
    pub status: TranslationStatus,
    pub translated_text: Option<String>,
    pub translator: Option<String>,
    pub translated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl TranslationOutcome {
    pub fn skipped(translated_text: Option<String>) -> Self {
        TranslationOutcome {
            status: TranslationStatus::Skipped,
            translated_text,
            translator: None,
            translated_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(translator: &str, error: impl Into<String>) -> Self {
        TranslationOutcome {
            status: TranslationStatus::Failed,
            translated_text: None,
            translator: Some(translator.to_string()),
            translated_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    /// Convert into the persistent form carried on an article record.
    pub fn to_record(&self) -> TranslationRecord {
        TranslationRecord {
            status: self.status,
            translator: self.translator.clone(),
            translated_at: Some(self.translated_at),
            error: self.error.clone(),
        }
    }
}

/// Capability for translating abstracts into Chinese.
pub trait Translator {
    /// Translate `text` from `source_language` (a language code, or
    /// "unknown") into Simplified Chinese.
    async fn translate(&self, text: &str, source_language: &str) -> TranslationOutcome;

    /// Whether this translator actually calls out anywhere. Disabled
    /// translators are never counted as translation attempts.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Detect the language of the provided text, as a ISO 639-3 code.
pub fn detect_language(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    whatlang::detect(trimmed).map(|info| info.lang().code().to_string())
}

/// Whether a detected language code denotes Chinese.
pub fn is_chinese(code: &str) -> bool {
    code == "cmn" || code.starts_with("zh")
}

/// Shared pre-flight for abstract translation.
///
/// Decides whether a translation call is warranted and performs it. Returns
/// the outcome, whether a real attempt was made (for run statistics), and
/// the detected language. Empty text and text already in Chinese never hit
/// the translator; Chinese text is reported as `success` with the original
/// carried through so the record ends up with a filled `abstract_zh`.
pub async fn translate_abstract<T: Translator>(
    translator: &T,
    text: &str,
) -> (TranslationOutcome, bool, Option<String>) {
    let language = detect_language(text);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (TranslationOutcome::skipped(None), false, language);
    }
    if language.as_deref().is_some_and(is_chinese) {
        let outcome = TranslationOutcome {
            status: TranslationStatus::Success,
            translated_text: Some(trimmed.to_string()),
            translator: None,
            translated_at: Utc::now(),
            error: None,
        };
        return (outcome, false, language);
    }
    let source_language = language.as_deref().unwrap_or("unknown");
    let outcome = translator.translate(trimmed, source_language).await;
    let attempted = translator.is_enabled();
    (outcome, attempted, language)
}

/// LLM-backed translator calling the DeepSeek chat-completions API.
#[derive(Debug, Clone)]
pub struct DeepSeekTranslator {
    client: reqwest::Client,
    api_key: String,
}

impl DeepSeekTranslator {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        DeepSeekTranslator { client, api_key }
    }
}

impl Translator for DeepSeekTranslator {
    #[instrument(level = "info", skip_all, fields(chars = text.len(), source_language))]
    async fn translate(&self, text: &str, source_language: &str) -> TranslationOutcome {
        let payload = json!({
            "model": DEEPSEEK_MODEL,
            "temperature": 0.2,
            "messages": [
                {
                    "role": "system",
                    "content": "You translate academic abstracts into fluent, formal Simplified Chinese while preserving terminology.",
                },
                {
                    "role": "user",
                    "content": format!(
                        "Source language: {source_language}\nTarget language: zh\nTranslate the following abstract:\n{text}"
                    ),
                },
            ],
        });

        let response = self
            .client
            .post(DEEPSEEK_API_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;

        let data: serde_json::Value = match response {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json().await {
                    Ok(data) => data,
                    Err(e) => {
                        error!(error = %e, "DeepSeek returned unparseable body");
                        return TranslationOutcome::failed("deepseek", e.to_string());
                    }
                },
                Err(e) => {
                    error!(error = %e, "DeepSeek request rejected");
                    return TranslationOutcome::failed("deepseek", e.to_string());
                }
            },
            Err(e) => {
                error!(error = %e, "DeepSeek request failed");
                return TranslationOutcome::failed("deepseek", e.to_string());
            }
        };

        let message = data
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if message.is_empty() {
            warn!("DeepSeek returned empty content");
            return TranslationOutcome::failed("deepseek", "empty completion content");
        }

        TranslationOutcome {
            status: TranslationStatus::Success,
            translated_text: Some(message.to_string()),
            translator: Some("deepseek".to_string()),
            translated_at: Utc::now(),
            error: None,
        }
    }
}

/// Translator that performs no work; everything comes back `skipped`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTranslator;

impl Translator for NoOpTranslator {
    async fn translate(&self, _text: &str, _source_language: &str) -> TranslationOutcome {
        TranslationOutcome::skipped(None)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Runtime selection between the real and no-op translators, so callers
/// that are generic over [`Translator`] need a single concrete type.
#[derive(Debug, Clone)]
pub enum AnyTranslator {
    DeepSeek(DeepSeekTranslator),
    NoOp(NoOpTranslator),
}

impl Translator for AnyTranslator {
    async fn translate(&self, text: &str, source_language: &str) -> TranslationOutcome {
        match self {
            AnyTranslator::DeepSeek(t) => t.translate(text, source_language).await,
            AnyTranslator::NoOp(t) => t.translate(text, source_language).await,
        }
    }

    fn is_enabled(&self) -> bool {
        match self {
            AnyTranslator::DeepSeek(t) => t.is_enabled(),
            AnyTranslator::NoOp(t) => t.is_enabled(),
        }
    }
}
