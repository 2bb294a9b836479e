//! Per-source browser configuration, assembled once at startup.
//!
//! Protected publishers need a bundle of session state to render at all:
//! cookies exported from an operator's browser, extra headers, a believable
//! user agent, localStorage seeds, sometimes a whole persistent Chromium
//! profile. All of it arrives through environment variables named
//! `<SOURCE>_COOKIES`, `<SOURCE>_BROWSER_HEADERS`, and so on.
//!
//! Environment parsing happens here, at the boundary, exactly once; the
//! rest of the crate only ever sees an explicit [`SourceProfile`] passed by
//! reference. The one hard validation rule: a browser channel and an
//! executable override are mutually exclusive, and that conflict is fatal
//! before any fetch is attempted.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::models::SourceType;

/// Default desktop user agent presented to publishers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Default `Accept` / `Accept-Language` headers merged under any overrides.
pub fn base_headers() -> HashMap<String, String> {
    HashMap::from([
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
    ])
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Channel and executable overrides cannot both be set. Non-retryable.
    #[error(
        "{source_type} cannot set both {prefix}_BROWSER_CHANNEL and {prefix}_BROWSER_EXECUTABLE; choose one"
    )]
    LaunchConflict {
        source_type: SourceType,
        prefix: String,
    },
}

/// Everything needed to open a browser session for one source type.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    /// Cookie jar, parsed from a semicolon-delimited `Cookie:` header string.
    pub cookies: Vec<(String, String)>,
    /// Extra HTTP headers merged over [`base_headers`].
    pub headers: HashMap<String, String>,
    pub user_agent: String,
    /// localStorage entries seeded before navigation.
    pub local_storage: Option<HashMap<String, String>>,
    /// Persistent Chromium profile directory, if the source needs one.
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    /// Branded-browser channel override (e.g. `chrome`).
    pub browser_channel: Option<String>,
    /// Explicit browser binary override.
    pub executable_path: Option<PathBuf>,
}

impl Default for SourceProfile {
    fn default() -> Self {
        SourceProfile {
            cookies: Vec::new(),
            headers: base_headers(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            local_storage: None,
            user_data_dir: None,
            headless: true,
            browser_channel: None,
            executable_path: None,
        }
    }
}

impl SourceProfile {
    /// Assemble the profile for a source type from the process environment.
    pub fn from_env(source_type: SourceType) -> Result<SourceProfile, ConfigError> {
        let prefix = source_type.env_prefix();
        let get = |suffix: &str| -> Option<String> {
            std::env::var(format!("{prefix}_{suffix}"))
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let cookies = get("COOKIES")
            .map(|raw| parse_cookie_header(&raw))
            .unwrap_or_default();

        let mut headers = base_headers();
        if let Some(raw) = get("BROWSER_HEADERS") {
            headers.extend(parse_header_mapping(&raw));
        }

        let user_agent = get("BROWSER_USER_AGENT")
            .or_else(|| headers.get("User-Agent").cloned())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        // The UA is applied at context level, never as a raw header.
        headers.remove("User-Agent");

        let local_storage = get("BROWSER_LOCAL_STORAGE").and_then(|raw| {
            match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!(%source_type, error = %e, "Invalid local storage JSON; ignoring");
                    None
                }
            }
        });

        let user_data_dir = get("USER_DATA_DIR").map(PathBuf::from);

        let headless = get("BROWSER_HEADLESS")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let browser_channel = get("BROWSER_CHANNEL");
        let executable_path = get("BROWSER_EXECUTABLE").map(PathBuf::from);
        if browser_channel.is_some() && executable_path.is_some() {
            return Err(ConfigError::LaunchConflict {
                source_type,
                prefix,
            });
        }

        Ok(SourceProfile {
            cookies,
            headers,
            user_agent,
            local_storage,
            user_data_dir,
            headless,
            browser_channel,
            executable_path,
        })
    }
}

/// Parse a semicolon-delimited `Cookie:` header string into name/value pairs.
///
/// Tolerates surrounding quotes and stray whitespace; chunks without an `=`
/// are dropped.
pub fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    let cleaned = value.trim().trim_matches(|c| c == '"' || c == '\'');
    cleaned
        .split(';')
        .filter_map(|chunk| {
            let trimmed = chunk.trim();
            let (name, val) = trimmed.split_once('=')?;
            let name = name.trim().trim_matches(|c| c == '"' || c == '\'');
            let val = val.trim().trim_matches(|c| c == '"' || c == '\'');
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), val.to_string()))
        })
        .collect()
}

/// Parse a header mapping that operators supply either as a JSON object or
/// as a cookie-style `Name: value; Other: value` string.
pub fn parse_header_mapping(value: &str) -> HashMap<String, String> {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return HashMap::new();
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(cleaned) {
        return map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect();
    }
    parse_cookie_header(cleaned).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("sid=abc123; cf_clearance=tok; theme=dark");
        assert_eq!(
            cookies,
            vec![
                ("sid".to_string(), "abc123".to_string()),
                ("cf_clearance".to_string(), "tok".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_cookie_header_quotes_and_noise() {
        let cookies = parse_cookie_header("\"sid=abc; ; bare; x='y'\"");
        assert_eq!(
            cookies,
            vec![
                ("sid".to_string(), "abc".to_string()),
                ("x".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_header_mapping_json() {
        let headers = parse_header_mapping(r#"{"Referer": "https://pub.example/", "X-Req": "1"}"#);
        assert_eq!(headers.get("Referer").unwrap(), "https://pub.example/");
        assert_eq!(headers.get("X-Req").unwrap(), "1");
    }

    #[test]
    fn test_parse_header_mapping_cookie_style() {
        let headers = parse_header_mapping("Referer=https://pub.example/; X-Req=1");
        assert_eq!(headers.get("Referer").unwrap(), "https://pub.example/");
        assert_eq!(headers.get("X-Req").unwrap(), "1");
    }

    #[test]
    fn test_parse_header_mapping_empty() {
        assert!(parse_header_mapping("   ").is_empty());
    }

    // Env-backed tests mutate process state; keep them serialized by using
    // distinct prefixes per test (one source type each).

    #[test]
    fn test_from_env_launch_conflict_is_fatal() {
        unsafe {
            std::env::set_var("OXFORD_BROWSER_CHANNEL", "chrome");
            std::env::set_var("OXFORD_BROWSER_EXECUTABLE", "/usr/bin/chromium");
        }
        let err = SourceProfile::from_env(SourceType::Oxford).unwrap_err();
        assert!(matches!(err, ConfigError::LaunchConflict { .. }));
        unsafe {
            std::env::remove_var("OXFORD_BROWSER_CHANNEL");
            std::env::remove_var("OXFORD_BROWSER_EXECUTABLE");
        }
    }

    #[test]
    fn test_from_env_defaults() {
        let profile = SourceProfile::from_env(SourceType::Feed).unwrap();
        assert!(profile.cookies.is_empty());
        assert!(profile.headless);
        assert_eq!(profile.user_agent, DEFAULT_USER_AGENT);
        assert!(profile.headers.contains_key("Accept"));
        assert!(profile.user_data_dir.is_none());
    }

    #[test]
    fn test_from_env_reads_cookies_and_headless() {
        unsafe {
            std::env::set_var("SCIENCEDIRECT_COOKIES", "sid=1; tok=2");
            std::env::set_var("SCIENCEDIRECT_BROWSER_HEADLESS", "false");
        }
        let profile = SourceProfile::from_env(SourceType::Sciencedirect).unwrap();
        assert_eq!(profile.cookies.len(), 2);
        assert!(!profile.headless);
        unsafe {
            std::env::remove_var("SCIENCEDIRECT_COOKIES");
            std::env::remove_var("SCIENCEDIRECT_BROWSER_HEADLESS");
        }
    }
}
