//! Screenshot comparison for every crawled page.
//!
//! Each test param is checked independently: a page that fails to load or
//! capture is recorded and the run moves on to the next one.

use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, info_span, warn, Instrument};

use crate::browser::{Page, WaitUntil};
use crate::crawler::TestParam;
use crate::storage::{BaselineStore, Comparison};

/// Outcome of one visual check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualOutcome {
    Matched,
    Mismatched,
    BaselineCreated,
    BaselineUpdated,
    Failed,
}

impl From<Comparison> for VisualOutcome {
    fn from(comparison: Comparison) -> Self {
        match comparison {
            Comparison::Matched => VisualOutcome::Matched,
            Comparison::Mismatched { .. } => VisualOutcome::Mismatched,
            Comparison::BaselineCreated => VisualOutcome::BaselineCreated,
            Comparison::BaselineUpdated => VisualOutcome::BaselineUpdated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualResult {
    pub name: String,
    pub url: String,
    pub outcome: VisualOutcome,

    /// Percentage of pixels that differ from the baseline, for mismatches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_percent: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualReport {
    pub generated_at: DateTime<Utc>,
    pub base_url: String,
    pub results: Vec<VisualResult>,
}

impl VisualReport {
    /// Results that should fail the run
    pub fn failures(&self) -> impl Iterator<Item = &VisualResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, VisualOutcome::Mismatched | VisualOutcome::Failed))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn count(&self, outcome: VisualOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize visual report")?;

        tokio::fs::write(path, contents).await
            .context(format!("Failed to write visual report: {}", path.display()))?;

        Ok(())
    }
}

/// Options for one visual regression run
#[derive(Debug, Clone, Default)]
pub struct VisualOptions {
    /// Stylesheet injected before every capture, e.g. to hide animated content
    pub styles: Option<String>,

    /// Overwrite baselines instead of comparing against them
    pub update: bool,
}

/// Screenshot every param and compare it with its baseline
pub async fn run_visual_checks(
    page: &dyn Page,
    params: &[TestParam],
    store: &BaselineStore,
    base_url: &str,
    options: &VisualOptions,
) -> VisualReport {
    let mut results = Vec::with_capacity(params.len());

    for param in params {
        let span = info_span!("visual_check", name = %param.name, url = %param.url);
        let result = check_one(page, param, store, options).instrument(span).await;

        let (outcome, diff_percent, detail) = match result {
            Ok(Comparison::Mismatched { diff_percent }) => (VisualOutcome::Mismatched, Some(diff_percent), None),
            Ok(comparison) => (VisualOutcome::from(comparison), None, None),
            Err(e) => {
                let detail = format!("{:#}", e);
                warn!(name = %param.name, error = %detail, "Visual check failed");
                (VisualOutcome::Failed, None, Some(detail))
            }
        };

        info!(name = %param.name, ?outcome, "Checked");

        results.push(VisualResult {
            name: param.name.clone(),
            url: param.url.clone(),
            outcome,
            diff_percent,
            detail,
        });
    }

    VisualReport {
        generated_at: Utc::now(),
        base_url: base_url.to_string(),
        results,
    }
}

async fn check_one(
    page: &dyn Page,
    param: &TestParam,
    store: &BaselineStore,
    options: &VisualOptions,
) -> Result<Comparison> {
    page.navigate(&param.url, WaitUntil::Load).await
        .context(format!("Failed to navigate to \"{}\"", param.name))?;

    if let Some(css) = &options.styles {
        page.add_style(css).await
            .context("Failed to inject test styles")?;
    }

    let png = page.screenshot().await
        .context(format!("Failed to screenshot \"{}\"", param.name))?;

    store.check(&param.name, &png, options.update).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeSite;
    use crate::storage::fixtures::{solid_png, spotted_png};
    use tempfile::tempdir;

    const HOME: [u8; 4] = [240, 240, 240, 255];
    const ABOUT: [u8; 4] = [20, 40, 60, 255];

    fn params(urls: &[&str]) -> Vec<TestParam> {
        urls.iter().map(|url| TestParam::from_url(*url)).collect()
    }

    fn site() -> FakeSite {
        FakeSite::new()
            .page("/", &[])
            .page("/about", &[])
            .screenshot_of("/", &solid_png(10, 10, HOME))
            .screenshot_of("/about", &solid_png(10, 10, ABOUT))
    }

    #[tokio::test]
    async fn test_first_run_creates_baselines() {
        let dir = tempdir().unwrap();
        let site = site();
        let store = BaselineStore::new(dir.path());

        let report = run_visual_checks(
            &site, &params(&["/", "/about"]), &store, "http://localhost/", &VisualOptions::default(),
        ).await;

        assert!(report.is_success());
        assert_eq!(report.count(VisualOutcome::BaselineCreated), 2);
        assert!(store.baseline_path("home").unwrap().exists());
        assert!(store.baseline_path("about").unwrap().exists());

        // Pages are loaded fully before capture
        assert!(site.navigations().iter().all(|(_, wait)| *wait == WaitUntil::Load));
    }

    #[tokio::test]
    async fn test_changed_page_is_a_mismatch() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        std::fs::write(store.baseline_path("home").unwrap(), solid_png(10, 10, HOME)).unwrap();
        std::fs::write(store.baseline_path("about").unwrap(), spotted_png(10, 10, ABOUT, HOME, 20)).unwrap();

        let report = run_visual_checks(
            &site(), &params(&["/", "/about"]), &store, "http://localhost/", &VisualOptions::default(),
        ).await;

        assert!(!report.is_success());
        assert_eq!(report.results[0].outcome, VisualOutcome::Matched);
        assert_eq!(report.results[0].diff_percent, None);
        assert_eq!(report.results[1].outcome, VisualOutcome::Mismatched);
        assert_eq!(report.results[1].diff_percent, Some(20.0));
        assert_eq!(report.failures().count(), 1);
        assert!(store.diff_path("about").unwrap().exists());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_run() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());

        let report = run_visual_checks(
            &site(), &params(&["/gone", "/about"]), &store, "http://localhost/", &VisualOptions::default(),
        ).await;

        assert_eq!(report.results[0].outcome, VisualOutcome::Failed);
        assert!(report.results[0].detail.as_deref().unwrap_or_default().contains("gone"));
        assert_eq!(report.results[1].outcome, VisualOutcome::BaselineCreated);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_escaping_page_name_fails_without_writing() {
        let root = tempdir().unwrap();
        let dir = root.path().join("a").join("b").join("snapshots");
        let url = "/x/../../../escaped";
        let site = FakeSite::new()
            .page(url, &[])
            .screenshot_of(url, &solid_png(2, 2, HOME));
        let store = BaselineStore::new(&dir);

        let report = run_visual_checks(&site, &params(&[url]), &store, "http://localhost/", &VisualOptions::default()).await;

        assert_eq!(report.results[0].name, "x--../../../escaped");
        assert_eq!(report.results[0].outcome, VisualOutcome::Failed);
        assert!(!root.path().join("a").join("escaped.png").exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_styles_injected_and_update_mode() {
        let dir = tempdir().unwrap();
        let site = site();
        let store = BaselineStore::new(dir.path());
        let options = VisualOptions {
            styles: Some(".clock { visibility: hidden; }".to_string()),
            update: true,
        };

        let report = run_visual_checks(&site, &params(&["/"]), &store, "http://localhost/", &options).await;

        assert_eq!(report.results[0].outcome, VisualOutcome::BaselineUpdated);
        assert_eq!(site.styles(), vec![".clock { visibility: hidden; }".to_string()]);
    }

    #[tokio::test]
    async fn test_report_written_as_json() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("snapshots"));

        let report = run_visual_checks(
            &site(), &params(&["/"]), &store, "http://localhost/", &VisualOptions::default(),
        ).await;
        let path = dir.path().join("report.json");
        report.write(&path).await.unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["results"][0]["name"], "home");
        assert_eq!(json["results"][0]["outcome"], "baseline_created");
        assert!(json["results"][0].get("detail").is_none());
        assert!(json["results"][0].get("diff_percent").is_none());
    }
}
