use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::browser::{Page, PageError, WaitUntil};
use crate::crawler::links::extract_links;

/// Errors that abort a crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("failed to navigate to {path}")]
    Navigation {
        path: String,
        #[source]
        source: PageError,
    },

    #[error("failed to query links on {path}")]
    LinkQuery {
        path: String,
        #[source]
        source: PageError,
    },
}

/// Paths already fetched during one crawl, in the order they were first seen
#[derive(Debug, Default, Clone)]
pub struct VisitedSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path, returning `false` if it was already present
    pub fn insert(&mut self, path: &str) -> bool {
        if self.seen.contains(path) {
            return false;
        }

        self.seen.insert(path.to_string());
        self.order.push(path.to_string());
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Paths in discovery order
    pub fn into_paths(self) -> Vec<String> {
        self.order
    }
}

/// Links of one visited page that still have to be followed
struct Frame {
    links: Vec<String>,
    cursor: usize,
}

impl Frame {
    fn new(links: Vec<String>) -> Self {
        Self { links, cursor: 0 }
    }

    fn next_link(&mut self) -> Option<String> {
        let link = self.links.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(link)
    }
}

/// Crawl every local page reachable from `start` with a fresh visited set
pub async fn crawl(page: &dyn Page, start: &str) -> Result<VisitedSet, CrawlError> {
    let mut visited = VisitedSet::new();
    crawl_into(page, start, &mut visited).await?;
    Ok(visited)
}

/// Crawl from `start`, accumulating into an existing visited set
///
/// Paths already in `visited` are neither fetched nor expanded again. Pages
/// are visited depth first in preorder: every link of a page is exhausted,
/// including everything reachable through it, before the page's next link is
/// touched. The page handle is a single tab so navigations never overlap.
pub async fn crawl_into(
    page: &dyn Page,
    start: &str,
    visited: &mut VisitedSet,
) -> Result<(), CrawlError> {
    if !visited.insert(start) {
        return Ok(());
    }

    // One frame per page on the current path from `start`, kept on the heap so
    // long chains of pages cannot exhaust the stack
    let mut stack = vec![Frame::new(visit(page, start, visited).await?)];

    while let Some(frame) = stack.last_mut() {
        match frame.next_link() {
            None => {
                stack.pop();
            },
            Some(link) => {
                // Marked before navigating so a page linking to itself is not re-entered
                if !visited.insert(&link) {
                    continue;
                }

                let links = visit(page, &link, visited).await?;
                stack.push(Frame::new(links));
            }
        }
    }

    debug!(start = %start, visited = visited.len(), "Crawl finished");

    Ok(())
}

/// Navigate to `path` and return its local links
async fn visit(page: &dyn Page, path: &str, visited: &VisitedSet) -> Result<Vec<String>, CrawlError> {
    info!(path = %path, "Crawling");

    page.navigate(path, WaitUntil::Commit).await
        .map_err(|source| CrawlError::Navigation { path: path.to_string(), source })?;

    let links = extract_links(page).await
        .map_err(|source| CrawlError::LinkQuery { path: path.to_string(), source })?;

    for link in links.iter().filter(|link| !visited.contains(link)) {
        debug!(from = %path, link = %link, "Discovered");
    }

    Ok(links)
}
