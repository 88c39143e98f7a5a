pub mod http;
pub mod session;

#[cfg(test)]
pub mod fake;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::cli::config::BrowserSettings;

// Re-export common types
pub use http::HttpPage;
pub use session::BrowserSession;

/// How far a navigation has to progress before `navigate` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// The new document is committed and its DOM can be queried
    Commit,

    /// The document and all of its subresources finished loading
    Load,
}

/// Errors raised by a page handle
#[derive(Debug, Error)]
pub enum PageError {
    #[error("webdriver error: {0}")]
    WebDriver(#[from] thirtyfour::error::WebDriverError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("page did not finish loading within {0} ms")]
    Timeout(u64),

    #[error("{0} is not supported by this page handle")]
    Unsupported(&'static str),

    #[error("browser session not initialized")]
    NotInitialized,

    #[error("{0}")]
    Unreachable(String),
}

/// A single navigable browser tab (or stand-in for one)
///
/// Handles are used strictly sequentially: one navigation completes before the
/// next one starts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to a root-relative path of the site under test
    async fn navigate(&self, path: &str, wait: WaitUntil) -> Result<(), PageError>;

    /// Literal `href` attribute of every element with the link role
    async fn link_hrefs(&self) -> Result<Vec<Option<String>>, PageError>;

    /// PNG capture of the current viewport
    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;

    /// Append a stylesheet to the current document
    async fn add_style(&self, css: &str) -> Result<(), PageError>;

    /// Release the underlying session
    async fn close(&mut self) -> Result<(), PageError>;
}

/// Elements exposing the "link" accessibility role
pub const LINK_SELECTOR: &str = "a[href], area[href], [role='link']";

/// Open a page handle for the configured driver
pub async fn open_page(
    settings: &BrowserSettings,
    base_url: &str,
    block_resources: bool,
) -> Result<Box<dyn Page>> {
    match settings.driver.as_str() {
        "webdriver" => {
            let mut session = BrowserSession::new(settings.clone(), base_url)?;
            session.initialize(block_resources).await?;
            Ok(Box::new(session))
        },
        "http" => {
            let page = HttpPage::new(base_url, settings.page_load_timeout)?;
            Ok(Box::new(page))
        },
        _ => {
            anyhow::bail!("Unsupported page driver: {}", settings.driver);
        }
    }
}
