//! DevTools-protocol browser drivers (via `chromiumoxide`).
//!
//! Two independently failing drivers feed the generic [`BrowserBackend`]:
//! - [`LaunchedChromium`] starts a private headless Chromium per call.
//! - [`RemoteBrowser`] attaches to an already running browser over its
//!   DevTools websocket and only ever owns the page it opened.

use super::browser::{BrowserBackend, BrowserDriver, BrowserSession};
use super::{ScrapeError, USER_AGENT};
use crate::config::ScraperConfig;
use crate::schema::BackendId;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Handler, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EXECUTABLE_CANDIDATES: [&str; 5] = [
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 720;

pub fn chromium_backend(config: &ScraperConfig) -> BrowserBackend<LaunchedChromium> {
    BrowserBackend::new(
        BackendId::Chromium,
        "Chromium",
        "Launches a private headless Chromium per request. Handles JavaScript-heavy pages and SPAs; needs a local Chromium install.",
        LaunchedChromium::new(config.chrome_executable.clone()),
    )
}

pub fn remote_browser_backend(config: &ScraperConfig) -> BrowserBackend<RemoteBrowser> {
    BrowserBackend::new(
        BackendId::RemoteBrowser,
        "Remote browser",
        "Drives an already running browser through its DevTools websocket. Same rendering as Chromium without a local install.",
        RemoteBrowser::new(config.browser_ws_url.clone()),
    )
}

/// Launches a fresh headless Chromium process per session.
pub struct LaunchedChromium {
    executable: Option<PathBuf>,
}

impl LaunchedChromium {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }

    fn resolve_executable(&self) -> Option<PathBuf> {
        match &self.executable {
            Some(path) => path.exists().then(|| path.clone()),
            None => EXECUTABLE_CANDIDATES
                .iter()
                .find_map(|name| which::which(name).ok()),
        }
    }

    fn build_config(
        &self,
        executable: &Path,
        profile_dir: &Path,
    ) -> Result<BrowserConfig, ScrapeError> {
        BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .chrome_executable(executable)
            .user_data_dir(profile_dir)
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .args(vec![
                format!("--user-agent={}", USER_AGENT),
                format!("--window-size={},{}", VIEWPORT_WIDTH, VIEWPORT_HEIGHT),
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-setuid-sandbox".to_string(),
                "--no-first-run".to_string(),
                "--no-zygote".to_string(),
            ])
            .build()
            .map_err(|e| ScrapeError::Configuration(format!("invalid Chromium config: {}", e)))
    }
}

#[async_trait::async_trait]
impl BrowserDriver for LaunchedChromium {
    fn is_available(&self) -> bool {
        self.resolve_executable().is_some()
    }

    async fn open(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let executable = self.resolve_executable().ok_or_else(|| {
            ScrapeError::Configuration(
                "Chromium is not installed. Install it or set CHROME_EXECUTABLE".to_string(),
            )
        })?;

        // A private profile per launch so concurrent sessions never share state.
        let profile_dir = std::env::temp_dir().join(format!("quiz-generator-{}", Uuid::new_v4()));
        let config = self.build_config(&executable, &profile_dir)?;

        info!(executable = %executable.display(), "Launching headless Chromium");
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("Chromium launch failed: {}", e)))?;

        let session = CdpSession::new(browser, handler, Ownership::Launched { profile_dir });
        session.with_blank_page(false).await
    }
}

/// Attaches to a browser that something else keeps running.
pub struct RemoteBrowser {
    ws_url: Option<String>,
}

impl RemoteBrowser {
    pub fn new(ws_url: Option<String>) -> Self {
        Self { ws_url }
    }
}

#[async_trait::async_trait]
impl BrowserDriver for RemoteBrowser {
    fn is_available(&self) -> bool {
        self.ws_url.is_some()
    }

    async fn open(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let ws_url = self.ws_url.as_deref().ok_or_else(|| {
            ScrapeError::Configuration("BROWSER_WS_URL is not set".to_string())
        })?;

        debug!(ws_url, "Connecting to remote browser");
        let (browser, handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| ScrapeError::Browser(format!("remote browser connect failed: {}", e)))?;

        let session = CdpSession::new(browser, handler, Ownership::Attached);
        session.with_blank_page(true).await
    }
}

enum Ownership {
    /// We spawned the process and must shut it down and delete its profile.
    Launched { profile_dir: PathBuf },
    /// Someone else owns the process; we only close our page.
    Attached,
}

struct CdpSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    ownership: Ownership,
    closed: bool,
}

impl CdpSession {
    fn new(browser: Browser, mut handler: Handler, ownership: Ownership) -> Self {
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "DevTools handler reported error");
                }
            }
        });

        Self {
            browser,
            page: None,
            handler_task,
            ownership,
            closed: false,
        }
    }

    /// Open the working page. On failure the session is torn down before the
    /// error is returned, since the caller never receives it.
    async fn with_blank_page(
        mut self,
        override_user_agent: bool,
    ) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let page = match self.browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                self.close().await;
                return Err(ScrapeError::Browser(format!("could not open page: {}", e)));
            }
        };

        if override_user_agent {
            if let Err(e) = page
                .set_user_agent(SetUserAgentOverrideParams::new(USER_AGENT))
                .await
            {
                warn!(error = %e, "Failed to override user agent");
            }
        }

        self.page = Some(page);
        Ok(Box::new(self))
    }

    fn page(&self) -> Result<&Page, ScrapeError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::Browser("session has no open page".to_string()))
    }
}

impl Drop for CdpSession {
    /// A session dropped before `close` (its open was cut off by a deadline)
    /// must not leave the DevTools handler task running.
    fn drop(&mut self) {
        if !self.closed {
            self.handler_task.abort();
        }
    }
}

#[async_trait::async_trait]
impl BrowserSession for CdpSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError> {
        self.page()?
            .goto(url)
            .await
            .map_err(|e| ScrapeError::Browser(format!("navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    async fn evaluate_text(&mut self, script: &str) -> Result<String, ScrapeError> {
        let evaluation = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| ScrapeError::Browser(format!("text extraction script failed: {}", e)))?;
        evaluation
            .into_value::<String>()
            .map_err(|e| ScrapeError::Browser(format!("script returned non-text value: {}", e)))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                warn!(error = %err, "Failed to close page");
            }
        }

        if let Ownership::Launched { profile_dir } = &self.ownership {
            if let Err(err) = self.browser.close().await {
                warn!(error = %err, "Failed to close Chromium gracefully");
            }
            if let Err(err) = self.browser.wait().await {
                warn!(error = %err, "Failed to reap Chromium process");
            }
            if let Err(err) = tokio::fs::remove_dir_all(profile_dir).await {
                debug!(error = %err, dir = %profile_dir.display(), "Profile dir not removed");
            }
        }

        self.handler_task.abort();
    }
}
