//! Persistent headless-browser sessions for publishers that resist plain HTTP.
//!
//! A [`BrowserSession`] wraps one chromiumoxide browser per source type and
//! lives for a whole run: the first fallback fetch for a source launches it,
//! every later fetch of that source reuses it, and the run closes it exactly
//! once at the end. The launch carries everything a gated publisher expects
//! from a real visitor: cookies, headers, a believable user agent, an
//! anti-fingerprint init script, seeded localStorage, optionally a persistent
//! on-disk profile that has already passed an interactive challenge.
//!
//! Sessions serve fetches sequentially. They are not safe for concurrent
//! `fetch` calls; a parallel orchestrator must give each worker its own
//! session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::SourceProfile;
use crate::models::SourceType;
use crate::utils::safe_label;

const NAV_TIMEOUT: Duration = Duration::from_secs(45);
const SELECTOR_TIMEOUT: Duration = Duration::from_secs(45);
const IDLE_WAIT: Duration = Duration::from_secs(5);
const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Masks the obvious automation markers before any page script runs.
const ANTI_FINGERPRINT_SCRIPT: &str = r#"
(() => {
  Object.defineProperty(navigator, 'webdriver', {get: () => undefined});
  window.chrome = window.chrome || { runtime: {} };
  const originalPlugins = navigator.plugins;
  Object.defineProperty(navigator, 'plugins', {
    get: () => originalPlugins || [1, 2, 3],
  });
  const languages = navigator.languages;
  Object.defineProperty(navigator, 'languages', {
    get: () => languages || ['en-US', 'en']
  });
})();
"#;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed for {source_type}: {message}")]
    Launch {
        source_type: SourceType,
        message: String,
    },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("page interaction failed: {0}")]
    Page(String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Page(err.to_string())
    }
}

/// Build the localStorage-seeding init script for a set of entries.
pub fn local_storage_script(entries: &HashMap<String, String>) -> String {
    let payload = serde_json::to_string(entries).unwrap_or_else(|_| "{}".to_string());
    format!(
        "(() => {{ const entries = {payload}; Object.entries(entries).forEach(([k, v]) => localStorage.setItem(k, v)); }})()"
    )
}

/// Remove Chromium single-instance lock files left behind by a crashed
/// session. Best effort: a lock we cannot remove is logged and ignored.
pub fn clear_stale_profile_locks(profile_dir: &Path) {
    for name in ["SingletonLock", "SingletonCookie", "SingletonSocket"] {
        let lock_path = profile_dir.join(name);
        match std::fs::remove_file(&lock_path) {
            Ok(()) => debug!(path = %lock_path.display(), "Removed stale profile lock"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %lock_path.display(), error = %e, "Could not remove stale profile lock"),
        }
    }
}

/// Resolve a branded-browser channel name to an executable on this machine.
fn resolve_channel(channel: &str) -> Option<PathBuf> {
    let candidates: &[&str] = match channel {
        "chrome" | "chrome-stable" => &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ],
        "chromium" => &[
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ],
        _ => &[],
    };
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

struct ActiveSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// One reusable browser context for a source type.
pub struct BrowserSession {
    source_type: SourceType,
    profile: SourceProfile,
    debug_dir: Option<PathBuf>,
    active: Option<ActiveSession>,
    closed: bool,
}

impl BrowserSession {
    pub fn new(
        source_type: SourceType,
        profile: SourceProfile,
        debug_dir: Option<PathBuf>,
    ) -> Self {
        BrowserSession {
            source_type,
            profile,
            debug_dir,
            active: None,
            closed: false,
        }
    }

    /// Launch the browser if it is not already running. Subsequent calls
    /// are no-ops.
    #[instrument(level = "info", skip(self), fields(source_type = %self.source_type))]
    pub async fn ensure(&mut self) -> Result<(), BrowserError> {
        if self.active.is_some() {
            return Ok(());
        }

        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled");
        if !self.profile.headless {
            builder = builder.with_head();
        }
        if let Some(dir) = &self.profile.user_data_dir {
            clear_stale_profile_locks(dir);
            builder = builder.user_data_dir(dir);
        }
        if let Some(executable) = &self.profile.executable_path {
            builder = builder.chrome_executable(executable);
        } else if let Some(channel) = &self.profile.browser_channel {
            let resolved = resolve_channel(channel).ok_or_else(|| BrowserError::Launch {
                source_type: self.source_type,
                message: format!("browser channel '{channel}' not found on this machine"),
            })?;
            builder = builder.chrome_executable(resolved);
        }

        let config = builder.build().map_err(|message| BrowserError::Launch {
            source_type: self.source_type,
            message,
        })?;

        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| BrowserError::Launch {
                    source_type: self.source_type,
                    message: e.to_string(),
                })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        info!(
            headless = self.profile.headless,
            persistent = self.profile.user_data_dir.is_some(),
            "Browser session launched"
        );
        self.active = Some(ActiveSession {
            browser,
            handler_task,
        });
        Ok(())
    }

    /// Render a page and return its HTML.
    ///
    /// Waits for DOM readiness, then for `wait_selector` if given; either
    /// timeout degrades gracefully to whatever content has loaded. When
    /// `extract_script` is given, its serialized result is injected into
    /// the document as `<pre id="browser-snapshot-data">` so downstream
    /// parsers read page state and DOM through one interface.
    #[instrument(level = "info", skip(self), fields(source_type = %self.source_type))]
    pub async fn fetch(
        &mut self,
        url: &str,
        wait_selector: Option<&str>,
        extract_script: Option<&str>,
    ) -> Result<String, BrowserError> {
        self.ensure().await?;
        let Some(active) = self.active.as_ref() else {
            return Err(BrowserError::Page("session not initialized".to_string()));
        };
        let browser = &active.browser;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        let result = self
            .fetch_on_page(&page, url, wait_selector, extract_script)
            .await;
        // The page is disposable either way; teardown failures are not
        // allowed to mask the fetch result.
        if let Err(e) = page.close().await {
            debug!(error = %e, "Page close failed");
        }
        result
    }

    async fn fetch_on_page(
        &self,
        page: &Page,
        url: &str,
        wait_selector: Option<&str>,
        extract_script: Option<&str>,
    ) -> Result<String, BrowserError> {
        page.set_user_agent(self.profile.user_agent.as_str())
            .await?;

        if !self.profile.headers.is_empty() {
            let header_map: serde_json::Map<String, serde_json::Value> = self
                .profile
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(header_map),
            )))
            .await?;
        }

        if !self.profile.cookies.is_empty() {
            if let Some(domain) = cookie_domain(url) {
                let cookies: Vec<CookieParam> = self
                    .profile
                    .cookies
                    .iter()
                    .map(|(name, value)| {
                        let mut cookie = CookieParam::new(name.clone(), value.clone());
                        cookie.domain = Some(domain.clone());
                        cookie.path = Some("/".to_string());
                        cookie
                    })
                    .collect();
                page.set_cookies(cookies).await?;
            }
        }

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            ANTI_FINGERPRINT_SCRIPT.to_string(),
        ))
        .await?;
        if let Some(entries) = &self.profile.local_storage {
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
                local_storage_script(entries),
            ))
            .await?;
        }

        match tokio::time::timeout(NAV_TIMEOUT, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    message: format!("timed out after {}s", NAV_TIMEOUT.as_secs()),
                });
            }
        }

        if let Some(selector) = wait_selector {
            self.wait_for_selector(page, url, selector).await;
        }
        // Give late scripts a bounded chance to settle; a slow page is not
        // an error, we take whatever has rendered.
        if tokio::time::timeout(IDLE_WAIT, page.wait_for_navigation())
            .await
            .is_err()
        {
            debug!(%url, "Idle wait timed out; returning DOM as loaded");
        }

        if let Some(script) = extract_script {
            self.inject_snapshot(page, script).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        if let Some(debug_dir) = &self.debug_dir {
            self.capture_debug(page, url, debug_dir).await;
        }

        Ok(html)
    }

    async fn wait_for_selector(&self, page: &Page, url: &str, selector: &str) {
        let deadline = tokio::time::Instant::now() + SELECTOR_TIMEOUT;
        loop {
            if page.find_element(selector).await.is_ok() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(%url, selector, "Wait selector timed out; continuing with loaded DOM");
                return;
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    /// Evaluate `script` in the page and append its JSON-serialized result
    /// as a `<pre>` element the HTML parser can read back out.
    async fn inject_snapshot(&self, page: &Page, script: &str) {
        let serialized: Option<String> = match page
            .evaluate(format!("JSON.stringify({script})"))
            .await
        {
            Ok(result) => result.into_value().ok(),
            Err(e) => {
                debug!(error = %e, "Extract script evaluation failed");
                None
            }
        };
        let Some(content) = serialized.filter(|c| c != "null") else {
            return;
        };
        let encoded = serde_json::to_string(&content).unwrap_or_default();
        let source_attr = serde_json::to_string(script).unwrap_or_default();
        let injector = format!(
            r#"(() => {{
const pre = document.createElement('pre');
pre.id = 'browser-snapshot-data';
pre.setAttribute('data-source', {source_attr});
pre.textContent = {encoded};
document.body.appendChild(pre);
}})()"#
        );
        if let Err(e) = page.evaluate(injector).await {
            debug!(error = %e, "Snapshot injection failed");
        }
    }

    /// Save a full-page screenshot plus a small `{url, title}` metadata
    /// JSON under the debug directory. Capture failures are logged, never
    /// raised.
    async fn capture_debug(&self, page: &Page, url: &str, debug_dir: &Path) {
        if let Err(e) = std::fs::create_dir_all(debug_dir) {
            warn!(error = %e, "Could not create debug dir");
            return;
        }
        let label = safe_label(url);
        let screenshot_path = debug_dir.join(format!("{label}.png"));
        if let Err(e) = page
            .save_screenshot(
                ScreenshotParams::builder().full_page(true).build(),
                &screenshot_path,
            )
            .await
        {
            warn!(error = %e, "Screenshot capture failed");
            return;
        }
        let title = page.get_title().await.ok().flatten().unwrap_or_default();
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        let meta = serde_json::json!({ "url": final_url, "title": title });
        let meta_path = debug_dir.join(format!("{label}.json"));
        if let Err(e) = std::fs::write(&meta_path, serde_json::to_string_pretty(&meta).unwrap_or_default()) {
            warn!(error = %e, "Debug metadata write failed");
        } else {
            info!(path = %screenshot_path.display(), "Saved debug snapshot");
        }
    }

    /// Tear down the browser exactly once. Teardown failures are logged
    /// and swallowed; a close failure never becomes a run failure.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.browser.close().await {
                debug!(source_type = %self.source_type, error = %e, "Browser close failed");
            }
            if let Err(e) = active.browser.wait().await {
                debug!(source_type = %self.source_type, error = %e, "Browser wait failed");
            }
            active.handler_task.abort();
            info!(source_type = %self.source_type, "Browser session closed");
        }
    }
}

fn cookie_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Lazily-created sessions keyed by source type, owned by the orchestrator.
///
/// Replaces module-level browser singletons with an explicit lifecycle:
/// sessions come into being on first use and are all closed at run end.
pub struct SessionRegistry {
    profiles: HashMap<SourceType, SourceProfile>,
    debug_dir: Option<PathBuf>,
    sessions: HashMap<SourceType, BrowserSession>,
}

impl SessionRegistry {
    pub fn new(profiles: HashMap<SourceType, SourceProfile>, debug_dir: Option<PathBuf>) -> Self {
        SessionRegistry {
            profiles,
            debug_dir,
            sessions: HashMap::new(),
        }
    }

    /// The session for a source type, created (but not yet launched) on
    /// first request. The browser itself launches on first fetch.
    pub fn session_for(&mut self, source_type: SourceType) -> &mut BrowserSession {
        self.sessions.entry(source_type).or_insert_with(|| {
            let profile = self
                .profiles
                .get(&source_type)
                .cloned()
                .unwrap_or_default();
            BrowserSession::new(source_type, profile, self.debug_dir.clone())
        })
    }

    /// Close every live session. Safe to call more than once.
    pub async fn close_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_storage_script_embeds_entries() {
        let entries = HashMap::from([("flag".to_string(), "on".to_string())]);
        let script = local_storage_script(&entries);
        assert!(script.contains("\"flag\":\"on\""));
        assert!(script.contains("localStorage.setItem"));
    }

    #[test]
    fn test_clear_stale_profile_locks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SingletonLock"), "").unwrap();
        std::fs::write(dir.path().join("SingletonCookie"), "").unwrap();
        std::fs::write(dir.path().join("Preferences"), "{}").unwrap();

        clear_stale_profile_locks(dir.path());

        assert!(!dir.path().join("SingletonLock").exists());
        assert!(!dir.path().join("SingletonCookie").exists());
        // Only lock files are touched.
        assert!(dir.path().join("Preferences").exists());
    }

    #[test]
    fn test_clear_stale_profile_locks_on_clean_profile() {
        let dir = tempfile::tempdir().unwrap();
        // No locks present: must not panic or create anything.
        clear_stale_profile_locks(dir.path());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cookie_domain() {
        assert_eq!(
            cookie_domain("https://www.sciencedirect.com/science/article/pii/S1"),
            Some("www.sciencedirect.com".to_string())
        );
        assert_eq!(cookie_domain("not a url"), None);
    }

    #[test]
    fn test_registry_creates_sessions_lazily() {
        let mut registry = SessionRegistry::new(HashMap::new(), None);
        assert!(registry.sessions.is_empty());
        registry.session_for(SourceType::Oxford);
        assert_eq!(registry.sessions.len(), 1);
        registry.session_for(SourceType::Oxford);
        assert_eq!(registry.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_close_unlaunched_session_is_noop() {
        let mut session = BrowserSession::new(SourceType::Oxford, SourceProfile::default(), None);
        session.close().await;
        session.close().await; // second close must be a no-op too
    }
}
