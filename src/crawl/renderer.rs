//! Headless-browser fallback for JS-rendered pages, grounded in `scraping/browser_manager.rs`'s `BrowserPool`
//! (chromiumoxide-backed, executable auto-discovery, tab-concurrency
//! limiting). Kept as a thin trait plus an optional implementation behind
//! the `render` feature — this crate's SPA fallback has no stealth or
//! anti-detection behavior.

use async_trait::async_trait;

use crate::core::errors::CoreError;

/// Renders a URL in a headless browser and returns the materialized HTML.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, CoreError>;
    async fn close(&self) -> Result<(), CoreError>;
}

#[cfg(feature = "render")]
pub use chrome::ChromeRenderer;

#[cfg(feature = "render")]
mod chrome {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use tokio::sync::Semaphore;

    use super::Renderer;
    use crate::core::errors::CoreError;

    /// Per-render timeout.
    const RENDER_TIMEOUT: Duration = Duration::from_secs(30);
    /// Wait for the DOM to settle before considering a page "rendered".
    const DOM_STABLE_WAIT: Duration = Duration::from_millis(500);
    /// Tab concurrency cap.
    const TAB_CONCURRENCY: usize = 3;

    /// Chromiumoxide-backed [`Renderer`], mirroring `BrowserPool`'s
    /// executable auto-discovery and tab-concurrency limiting, without its
    /// stealth fingerprint rotation or HITL fallback flows.
    pub struct ChromeRenderer {
        browser: tokio::sync::Mutex<Browser>,
        tabs: Arc<Semaphore>,
    }

    impl ChromeRenderer {
        pub async fn launch() -> Result<Self, CoreError> {
            let config = BrowserConfig::builder()
                .build()
                .map_err(|e| CoreError::InvalidInput(format!("chrome config error: {e}")))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| CoreError::InvalidInput(format!("chrome launch failed: {e}")))?;

            tokio::spawn(async move { while handler.next().await.is_some() {} });

            Ok(Self {
                browser: tokio::sync::Mutex::new(browser),
                tabs: Arc::new(Semaphore::new(TAB_CONCURRENCY)),
            })
        }
    }

    #[async_trait]
    impl Renderer for ChromeRenderer {
        async fn render(&self, url: &str) -> Result<String, CoreError> {
            let _permit = self
                .tabs
                .acquire()
                .await
                .map_err(|_| CoreError::Cancelled)?;

            let browser = self.browser.lock().await;
            let page = tokio::time::timeout(RENDER_TIMEOUT, browser.new_page(url))
                .await
                .map_err(|_| CoreError::Transient(format!("render timed out for {url}")))?
                .map_err(|e| CoreError::Transient(format!("render failed for {url}: {e}")))?;

            tokio::time::sleep(DOM_STABLE_WAIT).await;

            page.content()
                .await
                .map_err(|e| CoreError::Transient(format!("failed to read rendered html: {e}")))
        }

        async fn close(&self) -> Result<(), CoreError> {
            let mut browser = self.browser.lock().await;
            browser
                .close()
                .await
                .map_err(|e| CoreError::Transient(format!("browser close failed: {e}")))?;
            Ok(())
        }
    }
}
