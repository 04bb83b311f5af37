//! Headless browser session.
//!
//! One Chromium instance per run, seeded with the stored session cookies and
//! handed to the feed client explicitly. On a successful close the live
//! cookie jar is exported back to the plaintext state file so the session
//! guard re-encrypts fresh state; on failure the browser is simply dropped
//! (the child process is killed) and the pre-run state stays authoritative.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::config::Config;
use crate::session::{StorageState, StoredCookie};

pub struct BrowserSession {
    browser: Browser,
    page: Page,
    state_path: PathBuf,
}

impl BrowserSession {
    /// Launch headless Chromium and install the stored session cookies.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot be launched or the cookies
    /// cannot be applied.
    pub async fn launch(config: &Config, state: StorageState) -> Result<Self> {
        info!("Launching headless browser");

        let mut builder = BrowserConfig::builder()
            .window_size(1280, 1600)
            .request_timeout(config.page_timeout)
            .no_sandbox()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--lang=en-US,en");

        if let Some(ref chrome_path) = config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // Drain CDP events in the background for the lifetime of the browser.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser page")?;

        if !state.cookies.is_empty() {
            let params = cookie_params(&state.cookies)?;
            let count = params.len();
            page.set_cookies(params)
                .await
                .context("Failed to install session cookies")?;
            debug!(cookies = count, "Session cookies installed");
        }

        Ok(Self {
            browser,
            page,
            state_path: config.state_path.clone(),
        })
    }

    /// The single page all timeline navigation happens on.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Export the live cookie jar to the plaintext state file, then shut the
    /// browser down.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookies cannot be read or the state file
    /// cannot be written.
    pub async fn close(mut self) -> Result<()> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("Failed to export browser cookies")?;

        let stored: Vec<StoredCookie> = cookies
            .into_iter()
            .filter_map(|c| {
                // CDP cookie types round-trip through serde; fields we don't
                // persist are dropped here.
                serde_json::to_value(c)
                    .ok()
                    .and_then(|v| serde_json::from_value(v).ok())
            })
            .collect();

        let state = StorageState { cookies: stored };
        let json =
            serde_json::to_string_pretty(&state).context("Failed to serialize session state")?;
        tokio::fs::write(&self.state_path, json)
            .await
            .with_context(|| {
                format!("Failed to write session state {}", self.state_path.display())
            })?;
        info!(
            cookies = state.cookies.len(),
            path = %self.state_path.display(),
            "Session state exported"
        );

        self.browser
            .close()
            .await
            .context("Failed to close browser")?;
        Ok(())
    }
}

fn cookie_params(cookies: &[StoredCookie]) -> Result<Vec<CookieParam>> {
    cookies
        .iter()
        .map(|c| {
            let value = serde_json::to_value(c).context("Failed to encode cookie")?;
            serde_json::from_value(value).context("Failed to build cookie param")
        })
        .collect()
}
