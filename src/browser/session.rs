use anyhow::{Result, Context};
use async_trait::async_trait;
use thirtyfour::prelude::*;
use thirtyfour::{Capabilities, CapabilitiesHelper, PageLoadStrategy};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};
use url::Url;

use crate::browser::{Page, PageError, WaitUntil, LINK_SELECTOR};
use crate::cli::config::BrowserSettings;

/// Interval between `document.readyState` polls while waiting for a full load
const READY_STATE_POLL: Duration = Duration::from_millis(100);

/// W3C capability selecting when navigation commands return
const PAGE_LOAD_STRATEGY: &str = "pageLoadStrategy";

/// WebDriver backed page handle
pub struct BrowserSession {
    /// Browser settings
    config: BrowserSettings,

    /// Root of the site under test, every path is joined onto it
    base_url: Url,

    /// WebDriver instance
    driver: Option<WebDriver>,
}

impl BrowserSession {
    /// Create a new browser session
    pub fn new(config: BrowserSettings, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .context(format!("Invalid base URL: {}", base_url))?;

        Ok(Self {
            config,
            base_url,
            driver: None,
        })
    }

    /// Initialize the browser session
    ///
    /// With `block_resources` set, images are not fetched. Link discovery
    /// does not need them and crawls finish considerably faster.
    pub async fn initialize(&mut self, block_resources: bool) -> Result<()> {
        // Close any existing session
        self.close_driver().await;

        let caps = self.capabilities(block_resources)?;

        // Connect to WebDriver
        let driver = WebDriver::new(&self.config.webdriver_url, caps).await
            .context(format!("Failed to connect to WebDriver at {}", self.config.webdriver_url))?;

        // Set page load timeout
        driver.set_page_load_timeout(Duration::from_millis(self.config.page_load_timeout)).await?;

        debug!(browser = %self.config.browser_type, "Browser session initialized");

        self.driver = Some(driver);

        Ok(())
    }

    /// Build the WebDriver capabilities for the configured browser
    fn capabilities(&self, block_resources: bool) -> Result<Capabilities> {
        let viewport = &self.config.viewport;

        match self.config.browser_type.as_str() {
            "chrome" => {
                let mut caps = DesiredCapabilities::chrome();

                // Eager: `goto` returns once the DOM is parsed, not after every subresource
                caps.add(PAGE_LOAD_STRATEGY, PageLoadStrategy::Eager)?;
                caps.add_chrome_arg(&format!("--window-size={},{}", viewport.width, viewport.height))?;
                caps.add_chrome_arg(&format!("--force-device-scale-factor={}", viewport.device_scale_factor))?;
                caps.add_chrome_arg("--disable-dev-shm-usage")?;

                if self.config.headless {
                    caps.set_headless()?;
                }

                if block_resources {
                    caps.add_chrome_arg("--blink-settings=imagesEnabled=false")?;
                }

                Ok(caps.into())
            },
            "firefox" => {
                let mut caps = DesiredCapabilities::firefox();

                caps.add(PAGE_LOAD_STRATEGY, PageLoadStrategy::Eager)?;
                caps.add_firefox_arg(&format!("--width={}", viewport.width))?;
                caps.add_firefox_arg(&format!("--height={}", viewport.height))?;

                if self.config.headless {
                    caps.set_headless()?;
                }

                if block_resources {
                    debug!("Resource blocking is only available for chrome, ignoring");
                }

                Ok(caps.into())
            },
            other => {
                anyhow::bail!("Unsupported browser type: {}", other);
            }
        }
    }

    fn driver(&self) -> Result<&WebDriver, PageError> {
        self.driver.as_ref().ok_or(PageError::NotInitialized)
    }

    /// Poll `document.readyState` until the page reports a complete load
    async fn wait_for_load(&self, driver: &WebDriver) -> Result<(), PageError> {
        let timeout = Duration::from_millis(self.config.load_wait_timeout);
        let started = Instant::now();

        loop {
            let ret = driver.execute("return document.readyState;", Vec::new()).await?;
            if ret.json().as_str() == Some("complete") {
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(PageError::Timeout(self.config.load_wait_timeout));
            }

            sleep(READY_STATE_POLL).await;
        }
    }

    async fn close_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                error!("Error closing browser session: {}", e);
            }
            debug!("Browser session closed");
        }
    }
}

#[async_trait]
impl Page for BrowserSession {
    async fn navigate(&self, path: &str, wait: WaitUntil) -> Result<(), PageError> {
        let driver = self.driver()?;
        let url = self.base_url.join(path)?;

        debug!(%url, ?wait, "Navigating");
        driver.goto(url.as_str()).await?;

        if wait == WaitUntil::Load {
            self.wait_for_load(driver).await?;
        }

        Ok(())
    }

    async fn link_hrefs(&self) -> Result<Vec<Option<String>>, PageError> {
        let driver = self.driver()?;

        let elements = driver.find_all(By::Css(LINK_SELECTOR)).await?;

        // Hidden links are not something a visitor can follow
        let mut hrefs = Vec::with_capacity(elements.len());
        for element in elements {
            if !element.is_displayed().await? {
                continue;
            }
            hrefs.push(element.attr("href").await?);
        }

        Ok(hrefs)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        let driver = self.driver()?;

        let png = driver.screenshot_as_png().await?;

        Ok(png)
    }

    async fn add_style(&self, css: &str) -> Result<(), PageError> {
        let driver = self.driver()?;

        let script = "const style = document.createElement('style'); \
                      style.textContent = arguments[0]; \
                      document.head.appendChild(style);";
        driver.execute(script, vec![serde_json::Value::String(css.to_string())]).await?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), PageError> {
        self.close_driver().await;
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Spawn a task to quit the driver
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}
