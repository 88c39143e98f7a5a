use std::collections::HashSet;

use crate::browser::{Page, PageError};

/// Whether an href points at a page of the site being crawled
///
/// Only root-relative paths qualify. Absolute URLs, `mailto:`/`tel:` links and
/// bare fragments are all rejected by the leading slash check. Protocol-relative
/// URLs (`//host/path`) start with a slash but name another origin.
pub fn is_local_link(href: &str) -> bool {
    href.starts_with('/') && !href.starts_with("//")
}

/// Filter raw href attributes down to distinct local paths
///
/// Missing attributes are dropped and the first occurrence of each path
/// decides its position.
pub fn local_links<I>(hrefs: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let mut seen = HashSet::new();

    hrefs
        .into_iter()
        .flatten()
        .filter(|href| is_local_link(href))
        .filter(|href| seen.insert(href.clone()))
        .collect()
}

/// Local links of the document currently loaded in `page`
pub async fn extract_links(page: &dyn Page) -> Result<Vec<String>, PageError> {
    let hrefs = page.link_hrefs().await?;
    Ok(local_links(hrefs))
}
