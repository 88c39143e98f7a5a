//! In-memory site used by tests in place of a browser.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::browser::{Page, PageError, WaitUntil};

/// A site described as `path -> hrefs on that page`
#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, Vec<Option<String>>>,
    screenshots: HashMap<String, Vec<u8>>,
    current: Mutex<Option<String>>,
    navigations: Mutex<Vec<(String, WaitUntil)>>,
    styles: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page whose anchors carry the given hrefs
    pub fn page(mut self, path: &str, hrefs: &[&str]) -> Self {
        let hrefs = hrefs.iter().map(|href| Some(href.to_string())).collect();
        self.pages.insert(path.to_string(), hrefs);
        self
    }

    /// Add a page with arbitrary href attributes, including missing ones
    pub fn page_with_attrs(mut self, path: &str, hrefs: Vec<Option<&str>>) -> Self {
        let hrefs = hrefs.into_iter().map(|href| href.map(str::to_string)).collect();
        self.pages.insert(path.to_string(), hrefs);
        self
    }

    /// Bytes returned when a screenshot of `path` is taken
    pub fn screenshot_of(mut self, path: &str, png: &[u8]) -> Self {
        self.screenshots.insert(path.to_string(), png.to_vec());
        self
    }

    /// Every navigation performed so far, in order
    pub fn navigations(&self) -> Vec<(String, WaitUntil)> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn styles(&self) -> Vec<String> {
        self.styles.lock().unwrap().clone()
    }

    fn current(&self) -> Result<String, PageError> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PageError::Unreachable("no page loaded".to_string()))
    }
}

#[async_trait]
impl Page for FakeSite {
    async fn navigate(&self, path: &str, wait: WaitUntil) -> Result<(), PageError> {
        self.navigations.lock().unwrap().push((path.to_string(), wait));

        if !self.pages.contains_key(path) {
            return Err(PageError::Unreachable(format!("no such page: {}", path)));
        }

        *self.current.lock().unwrap() = Some(path.to_string());
        Ok(())
    }

    async fn link_hrefs(&self) -> Result<Vec<Option<String>>, PageError> {
        let current = self.current()?;
        Ok(self.pages.get(&current).cloned().unwrap_or_default())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        let current = self.current()?;
        self.screenshots
            .get(&current)
            .cloned()
            .ok_or(PageError::Unsupported("screenshot"))
    }

    async fn add_style(&self, css: &str) -> Result<(), PageError> {
        self.styles.lock().unwrap().push(css.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PageError> {
        Ok(())
    }
}
