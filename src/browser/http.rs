use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::browser::{Page, PageError, WaitUntil, LINK_SELECTOR};

/// Browserless page handle
///
/// Fetches documents over plain HTTP and answers link queries from the
/// served HTML. Client-side rendered links are invisible to it, so it only
/// suits sites that render their navigation on the server.
pub struct HttpPage {
    client: Client,
    base_url: Url,

    /// HTML of the most recently navigated document
    document: Mutex<Option<String>>,
}

impl HttpPage {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .context(format!("Invalid base URL: {}", base_url))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            document: Mutex::new(None),
        })
    }
}

/// `href` of every visible link-role element in an HTML document
///
/// Without a layout engine visibility is judged from markup alone: the
/// `hidden` attribute, `aria-hidden="true"` and inline `display: none` on the
/// element or any ancestor.
pub fn hrefs_in_html(html: &str) -> Vec<Option<String>> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse(LINK_SELECTOR) {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter(|element| !is_hidden(*element))
        .map(|element| element.value().attr("href").map(str::to_string))
        .collect()
}

fn is_hidden(element: ElementRef) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .any(|el| {
            let value = el.value();
            let display_none = value.attr("style").map_or(false, |style| {
                style
                    .split(';')
                    .filter_map(|decl| decl.split_once(':'))
                    .any(|(prop, val)| {
                        prop.trim().eq_ignore_ascii_case("display") && val.trim().eq_ignore_ascii_case("none")
                    })
            });

            value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") || display_none
        })
}

#[async_trait]
impl Page for HttpPage {
    async fn navigate(&self, path: &str, wait: WaitUntil) -> Result<(), PageError> {
        let url = self.base_url.join(path)?;
        debug!(%url, ?wait, "Fetching");

        let response = self.client.get(url.clone()).send().await?;

        // A browser renders error pages too, so only transport failures abort
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Page responded with a non-success status");
        }

        let body = response.text().await?;
        *self.document.lock().await = Some(body);

        Ok(())
    }

    async fn link_hrefs(&self) -> Result<Vec<Option<String>>, PageError> {
        let document = self.document.lock().await;

        match document.as_deref() {
            Some(html) => Ok(hrefs_in_html(html)),
            None => Err(PageError::Unreachable("no document loaded yet".to_string())),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        Err(PageError::Unsupported("screenshot"))
    }

    async fn add_style(&self, _css: &str) -> Result<(), PageError> {
        Err(PageError::Unsupported("style injection"))
    }

    async fn close(&mut self) -> Result<(), PageError> {
        *self.document.get_mut() = None;
        Ok(())
    }
}
