use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use tracing::{info, debug};

use crate::storage::baseline::DEFAULT_THRESHOLD;

/// Override `site.base_url`, checked in order
pub const BASE_URL_ENVS: [&str; 2] = ["SMOKE_BASE_URL", "PLAYWRIGHT_BASE_URL"];

/// Overrides `output.styles_path`
pub const STYLES_PATH_ENV: &str = "TEST_STYLES_PATH";

/// Checkout the stylesheet is looked up in when no explicit path is given
pub const REPOSITORY_DIR_ENV: &str = "TEST_REPOSITORY_DIR";

/// Stylesheet location relative to the repository checkout
pub const REPOSITORY_STYLES_PATH: &str = "tests/test-styles.css";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CrawlerConfig {
    pub site: SiteSettings,
    pub browser: BrowserSettings,
    pub output: OutputSettings,
    #[serde(default)]
    pub visual: VisualSettings,
}

/// The application under test
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SiteSettings {
    pub base_url: String,
}

/// Page handle settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BrowserSettings {
    pub driver: String,        // "webdriver", "http"
    pub webdriver_url: String,
    pub browser_type: String,  // "chrome", "firefox"
    pub headless: bool,
    pub viewport: Viewport,
    pub block_resources: bool, // Skip images while crawling
    pub page_load_timeout: u64, // Milliseconds
    pub load_wait_timeout: u64, // Milliseconds to wait for a complete load before a capture
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f32,
}

/// Where artifacts are read from and written to
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputSettings {
    pub params_path: PathBuf,
    pub baseline_dir: PathBuf,
    pub styles_path: Option<PathBuf>,
    pub report_path: PathBuf,
}

/// Screenshot comparison settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VisualSettings {
    pub threshold: f64, // Percentage of differing pixels still accepted as a match
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD }
    }
}

/// Values read from the environment that take precedence over the profile
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EnvOverrides {
    pub base_url: Option<String>,
    pub styles_path: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve overrides through `lookup`, treating empty values as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let base_url = BASE_URL_ENVS.iter().find_map(|key| get(*key));

        let styles_path = get(STYLES_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| get(REPOSITORY_DIR_ENV).map(|dir| Path::new(&dir).join(REPOSITORY_STYLES_PATH)));

        Self { base_url, styles_path }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            site: SiteSettings {
                base_url: "http://localhost:5173/".to_string(),
            },
            browser: BrowserSettings {
                driver: "webdriver".to_string(),
                webdriver_url: "http://localhost:4444".to_string(),
                browser_type: "chrome".to_string(),
                headless: true,
                viewport: Viewport {
                    width: 1280,
                    height: 720,
                    device_scale_factor: 1.0,
                },
                block_resources: true,
                page_load_timeout: 30_000,
                load_wait_timeout: 50_000,
            },
            output: OutputSettings {
                params_path: PathBuf::from("tests/test-params.json"),
                baseline_dir: PathBuf::from("tests/snapshots"),
                styles_path: Some(PathBuf::from("tests/test-styles.css")),
                report_path: PathBuf::from("tests/smoke-report.json"),
            },
            visual: VisualSettings::default(),
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "smoke-crawler", "smoke-crawler") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    fn default_path() -> PathBuf {
        Self::config_dir().join("default.yaml")
    }

    fn profile_path(profile: &str) -> PathBuf {
        Self::config_dir().join("sites").join(format!("{}.yaml", profile))
    }

    /// Load the default configuration, falling back to built-in defaults
    ///
    /// Nothing is written; `default.yaml` is only created through the
    /// `config` command.
    pub fn load_default() -> Result<Self> {
        Self::load_or_default(&Self::default_path())
    }

    /// Load a configuration profile, `default` meaning the default configuration
    pub fn load_profile(profile: &str) -> Result<Self> {
        if profile == "default" {
            return Self::load_default();
        }

        let profile_path = Self::profile_path(profile);

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load a profile, saving built-in defaults under its name if it does not exist
    ///
    /// Returns whether the profile was created. A profile that exists but
    /// cannot be read or parsed is an error and is left untouched.
    pub fn load_or_create_profile(profile: &str) -> Result<(Self, bool)> {
        let path = if profile == "default" { Self::default_path() } else { Self::profile_path(profile) };
        Self::load_or_create(&path)
    }

    fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::load_from_file(path)?, false));
        }

        info!("Configuration not found at {}. Creating...", path.display());
        let config = Self::default();
        config.save_to_file(path)?;
        Ok((config, true))
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment overrides for CI
    pub fn apply_env(&mut self) {
        self.apply_overrides(EnvOverrides::from_env());
    }

    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(base_url) = overrides.base_url {
            debug!("Base URL overridden from environment: {}", base_url);
            self.site.base_url = base_url;
        }

        if let Some(styles_path) = overrides.styles_path {
            self.output.styles_path = Some(styles_path);
        }
    }

    /// Contents of the test stylesheet, if one is configured and present
    pub fn load_styles(&self) -> Result<Option<String>> {
        match &self.output.styles_path {
            Some(path) if path.exists() => {
                let css = fs::read_to_string(path)
                    .context(format!("Failed to read test styles: {}", path.display()))?;
                Ok(Some(css))
            },
            _ => Ok(None),
        }
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    if let Some(name) = stem.to_str() {
                        profiles.push(name.to_string());
                    }
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
