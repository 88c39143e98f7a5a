use anyhow::{Result, Context};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::browser::open_page;
use crate::cli::config::CrawlerConfig;
use crate::cli::SiteArgs;
use crate::crawler::{generate_visual_test_params, name_collisions};
use crate::storage::{BaselineStore, ParamsFile};
use crate::visual::{run_visual_checks, VisualOptions, VisualOutcome};

/// Load the profile and fold in environment and command line overrides
fn resolve_config(site: &SiteArgs) -> Result<CrawlerConfig> {
    let mut config = CrawlerConfig::load_profile(&site.profile)
        .context(format!("Failed to load profile: {}", site.profile))?;

    config.apply_env();

    if let Some(base_url) = &site.base_url {
        config.site.base_url = base_url.clone();
    }

    if let Some(driver) = &site.driver {
        config.browser.driver = driver.clone();
    }

    if let Some(browser) = &site.browser {
        config.browser.browser_type = browser.clone();
    }

    Ok(config)
}

/// Crawl the site and persist the test params
pub async fn crawl(site: SiteArgs, output: Option<PathBuf>) -> Result<()> {
    let mut config = resolve_config(&site)?;

    if let Some(output) = output {
        config.output.params_path = output;
    }

    info!("Crawling {}", config.site.base_url);

    let mut page = open_page(&config.browser, &config.site.base_url, config.browser.block_resources).await?;

    let result = generate_visual_test_params(page.as_ref()).await;

    if let Err(e) = page.close().await {
        warn!("Failed to close page: {}", e);
    }

    // Nothing is written unless the whole site was crawled
    let params = result.context("Crawl failed")?;

    for (name, urls) in name_collisions(&params) {
        warn!(name = %name, urls = ?urls, "Several pages share a test name");
    }

    let file = ParamsFile::new(&config.output.params_path);
    file.write(&params).await?;

    info!("Wrote {} test params to {}", params.len(), file.path().display());

    Ok(())
}

/// Compare a screenshot of every crawled page with its baseline
pub async fn smoke(
    site: SiteArgs,
    params_path: Option<PathBuf>,
    baselines: Option<PathBuf>,
    update: bool,
) -> Result<()> {
    let mut config = resolve_config(&site)?;

    if let Some(path) = params_path {
        config.output.params_path = path;
    }

    if let Some(dir) = baselines {
        config.output.baseline_dir = dir;
    }

    let params = ParamsFile::new(&config.output.params_path).read().await?;
    let store = BaselineStore::new(&config.output.baseline_dir).with_threshold(config.visual.threshold);
    let options = VisualOptions {
        styles: config.load_styles()?,
        update,
    };

    info!("Checking {} pages against {}", params.len(), config.output.baseline_dir.display());

    let mut page = open_page(&config.browser, &config.site.base_url, false).await?;

    let report = run_visual_checks(page.as_ref(), &params, &store, &config.site.base_url, &options).await;

    if let Err(e) = page.close().await {
        warn!("Failed to close page: {}", e);
    }

    report.write(&config.output.report_path).await?;

    info!(
        matched = report.count(VisualOutcome::Matched),
        created = report.count(VisualOutcome::BaselineCreated),
        updated = report.count(VisualOutcome::BaselineUpdated),
        mismatched = report.count(VisualOutcome::Mismatched),
        failed = report.count(VisualOutcome::Failed),
        "Smoke tests finished"
    );

    if !report.is_success() {
        let names: Vec<&str> = report.failures().map(|r| r.name.as_str()).collect();
        anyhow::bail!("{} smoke tests failed: {}", names.len(), names.join(", "));
    }

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a configuration profile, creating it with defaults if it does not exist
pub fn manage_profile(profile_name: String) -> Result<()> {
    let (config, created) = CrawlerConfig::load_or_create_profile(&profile_name)
        .context(format!("Failed to load profile: {}", profile_name))?;

    if created {
        warn!("Profile '{}' did not exist. Created a default profile.", profile_name);
        println!("Created default profile: {}", profile_name);
    } else {
        println!("Profile: {}", profile_name);
        println!("{:#?}", config);
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let mut config = CrawlerConfig::load_default()?;
    config.apply_env();

    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
