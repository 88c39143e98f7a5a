use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, info_span, Instrument};

use crate::browser::Page;
use crate::crawler::traversal::{crawl, CrawlError};

/// Name reserved for the site root
pub const HOME_NAME: &str = "home";

/// One page to screenshot in the visual regression run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParam {
    pub name: String,
    pub url: String,
}

impl TestParam {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self { name: test_name(&url), url }
    }
}

/// Derive a test name from a root-relative path
///
/// The leading character is dropped and only the first remaining `/` becomes
/// `--`, so `/a/b/c` names `a--b/c`. Baseline files depend on these names and
/// the exact mapping must not change.
pub fn test_name(url: &str) -> String {
    let mut chars = url.chars();
    chars.next();

    let name = chars.as_str().replacen('/', "--", 1);
    if name.is_empty() {
        HOME_NAME.to_string()
    } else {
        name
    }
}

/// Path every crawl starts from
pub const ROOT_PATH: &str = "/";

/// Crawl the site from its root and name every page found, in discovery order
pub async fn generate_visual_test_params(page: &dyn Page) -> Result<Vec<TestParam>, CrawlError> {
    let visited = crawl(page, ROOT_PATH)
        .instrument(info_span!("crawl_pages"))
        .await?;

    info!(count = visited.len(), "Pages found");

    let urls = visited.into_paths();
    debug!(urls = ?urls, "URLs found");

    Ok(urls.into_iter().map(TestParam::from_url).collect())
}

/// Names shared by more than one distinct URL, with the URLs involved
///
/// Colliding params are kept as they are; this only exists so callers can
/// report the overlap.
pub fn name_collisions(params: &[TestParam]) -> Vec<(String, Vec<String>)> {
    let mut by_name: HashMap<&str, Vec<String>> = HashMap::new();
    let mut order = Vec::new();

    for param in params {
        let urls = by_name.entry(param.name.as_str()).or_insert_with(|| {
            order.push(param.name.as_str());
            Vec::new()
        });
        if !urls.contains(&param.url) {
            urls.push(param.url.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            let urls = by_name.remove(name)?;
            (urls.len() > 1).then(|| (name.to_string(), urls))
        })
        .collect()
}
