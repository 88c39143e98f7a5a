use anyhow::{Result, Context};
use image::{DynamicImage, ImageOutputFormat, Pixel, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Largest per-channel difference still counted as the same pixel
const PIXEL_TOLERANCE: i32 = 5;

/// Default share of differing pixels, in percent, accepted as a match
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Result of checking one screenshot against its baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Matched,
    Mismatched { diff_percent: f64 },
    BaselineCreated,
    BaselineUpdated,
}

/// Pixel level difference between two screenshots of the same size
pub struct PixelDiff {
    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Differing pixels in red over a dimmed copy of the capture
    pub image: RgbaImage,
}

impl PixelDiff {
    pub fn percent(&self) -> f64 {
        if self.total_pixels == 0 {
            return 0.0;
        }
        self.diff_pixels as f64 * 100.0 / self.total_pixels as f64
    }
}

/// Compare two images pixel by pixel, `None` if their dimensions differ
pub fn compare_images(actual: &RgbaImage, baseline: &RgbaImage) -> Option<PixelDiff> {
    if actual.dimensions() != baseline.dimensions() {
        return None;
    }

    let (width, height) = actual.dimensions();
    let mut image = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for (x, y, actual_pixel) in actual.enumerate_pixels() {
        if pixels_differ(actual_pixel, baseline.get_pixel(x, y)) {
            diff_pixels += 1;
            image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
        } else {
            let c = actual_pixel.channels();
            image.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
        }
    }

    Some(PixelDiff {
        diff_pixels,
        total_pixels: u64::from(width) * u64::from(height),
        image,
    })
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(a, b)| (i32::from(*a) - i32::from(*b)).abs() > PIXEL_TOLERANCE)
}

/// Directory of `{name}.png` reference screenshots
pub struct BaselineStore {
    dir: PathBuf,
    threshold: f64,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Percentage of differing pixels tolerated before a capture mismatches
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn baseline_path(&self, name: &str) -> Result<PathBuf> {
        self.file_path(name, "")
    }

    /// Where a mismatching capture is kept for inspection
    pub fn actual_path(&self, name: &str) -> Result<PathBuf> {
        self.file_path(name, "-actual")
    }

    /// Where the highlighted difference of a mismatch is written
    pub fn diff_path(&self, name: &str) -> Result<PathBuf> {
        self.file_path(name, "-diff")
    }

    /// `{dir}/{name}{suffix}.png`, refusing names that would leave `dir`
    ///
    /// Names may contain `/` and then live in a subdirectory, but every
    /// component must be a plain file name.
    fn file_path(&self, name: &str, suffix: &str) -> Result<PathBuf> {
        let contained = !name.is_empty()
            && Path::new(name).components().all(|c| matches!(c, Component::Normal(_)));

        if !contained {
            anyhow::bail!("Screenshot name escapes the baseline directory: {:?}", name);
        }

        Ok(self.dir.join(format!("{}{}.png", name, suffix)))
    }

    /// Compare `png` with the stored baseline for `name`
    ///
    /// A missing baseline is created from `png`. With `update` set the
    /// baseline is overwritten unconditionally. Otherwise both images are
    /// decoded and compared pixel by pixel; a different size always
    /// mismatches.
    pub async fn check(&self, name: &str, png: &[u8], update: bool) -> Result<Comparison> {
        let baseline = self.baseline_path(name)?;

        if update {
            write_file(&baseline, png).await?;
            self.remove_artifacts(name).await?;
            return Ok(Comparison::BaselineUpdated);
        }

        if !fs::try_exists(&baseline).await.unwrap_or(false) {
            write_file(&baseline, png).await?;
            debug!(path = %baseline.display(), "Baseline created");
            return Ok(Comparison::BaselineCreated);
        }

        let expected = fs::read(&baseline).await
            .context(format!("Failed to read baseline: {}", baseline.display()))?;

        // Identical bytes need no decoding
        if expected == png {
            self.remove_artifacts(name).await?;
            return Ok(Comparison::Matched);
        }

        let expected_img = image::load_from_memory(&expected)
            .context(format!("Failed to decode baseline: {}", baseline.display()))?
            .to_rgba8();
        let actual_img = image::load_from_memory(png)
            .context("Failed to decode screenshot")?
            .to_rgba8();

        let diff = match compare_images(&actual_img, &expected_img) {
            Some(diff) => diff,
            None => {
                warn!(
                    name = %name,
                    actual = ?actual_img.dimensions(),
                    baseline = ?expected_img.dimensions(),
                    "Screenshot dimensions differ"
                );
                write_file(&self.actual_path(name)?, png).await?;
                return Ok(Comparison::Mismatched { diff_percent: 100.0 });
            }
        };

        let diff_percent = diff.percent();
        if diff_percent <= self.threshold {
            debug!(name = %name, diff_percent, "Screenshot within threshold");
            self.remove_artifacts(name).await?;
            return Ok(Comparison::Matched);
        }

        warn!(
            "Visual regression detected in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
            name, diff_percent, self.threshold
        );

        write_file(&self.actual_path(name)?, png).await?;
        write_file(&self.diff_path(name)?, &encode_png(diff.image)?).await?;

        Ok(Comparison::Mismatched { diff_percent })
    }

    /// Drop the capture and diff left by an earlier failing run
    async fn remove_artifacts(&self, name: &str) -> Result<()> {
        for path in [self.actual_path(name)?, self.diff_path(name)?] {
            if fs::try_exists(&path).await.unwrap_or(false) {
                fs::remove_file(&path).await
                    .context(format!("Failed to remove stale capture: {}", path.display()))?;
            }
        }
        Ok(())
    }
}

fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .context("Failed to encode diff image")?;
    Ok(bytes)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    // Names of nested pages contain a slash and land in a subdirectory
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await
            .context(format!("Failed to create directory: {}", parent.display()))?;
    }

    fs::write(path, bytes).await
        .context(format!("Failed to write screenshot: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::{rgb_png, solid_png, spotted_png};
    use tempfile::tempdir;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    #[tokio::test]
    async fn test_first_capture_becomes_baseline() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let png = solid_png(4, 4, WHITE);

        let outcome = store.check("home", &png, false).await.unwrap();

        assert_eq!(outcome, Comparison::BaselineCreated);
        assert_eq!(std::fs::read(store.baseline_path("home").unwrap()).unwrap(), png);
    }

    #[tokio::test]
    async fn test_match_and_mismatch() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let baseline = solid_png(10, 10, WHITE);
        let changed = spotted_png(10, 10, WHITE, BLACK, 5);
        store.check("about", &baseline, false).await.unwrap();

        assert_eq!(store.check("about", &baseline, false).await.unwrap(), Comparison::Matched);
        assert_eq!(
            store.check("about", &changed, false).await.unwrap(),
            Comparison::Mismatched { diff_percent: 5.0 }
        );

        // The baseline is untouched and the capture and diff are kept next to it
        assert_eq!(std::fs::read(store.baseline_path("about").unwrap()).unwrap(), baseline);
        assert_eq!(std::fs::read(store.actual_path("about").unwrap()).unwrap(), changed);
        let diff = image::open(store.diff_path("about").unwrap()).unwrap().to_rgba8();
        assert_eq!(diff.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(diff.get_pixel(9, 9), &Rgba([127, 127, 127, 128]));

        assert_eq!(store.check("about", &baseline, false).await.unwrap(), Comparison::Matched);
        assert!(!store.actual_path("about").unwrap().exists());
        assert!(!store.diff_path("about").unwrap().exists());
    }

    #[tokio::test]
    async fn test_same_pixels_different_encoding_match() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let baseline = rgb_png(8, 8, [10, 20, 30]);
        let capture = solid_png(8, 8, [10, 20, 30, 255]);
        assert_ne!(baseline, capture);

        store.check("home", &baseline, false).await.unwrap();

        assert_eq!(store.check("home", &capture, false).await.unwrap(), Comparison::Matched);
    }

    #[tokio::test]
    async fn test_small_color_drift_is_tolerated() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        store.check("home", &solid_png(8, 8, [100, 100, 100, 255]), false).await.unwrap();

        let drifted = solid_png(8, 8, [105, 95, 100, 255]);
        assert_eq!(store.check("home", &drifted, false).await.unwrap(), Comparison::Matched);

        let shifted = solid_png(8, 8, [106, 100, 100, 255]);
        assert_eq!(
            store.check("home", &shifted, false).await.unwrap(),
            Comparison::Mismatched { diff_percent: 100.0 }
        );
    }

    #[tokio::test]
    async fn test_threshold_decides_match() {
        let dir = tempdir().unwrap();
        let baseline = solid_png(10, 10, WHITE);
        let one_pixel = spotted_png(10, 10, WHITE, BLACK, 1);

        let strict = BaselineStore::new(dir.path());
        strict.check("blog", &baseline, false).await.unwrap();
        assert_eq!(
            strict.check("blog", &one_pixel, false).await.unwrap(),
            Comparison::Mismatched { diff_percent: 1.0 }
        );

        let lenient = BaselineStore::new(dir.path()).with_threshold(1.0);
        assert_eq!(lenient.check("blog", &one_pixel, false).await.unwrap(), Comparison::Matched);
    }

    #[tokio::test]
    async fn test_different_size_mismatches() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path()).with_threshold(100.0);
        store.check("home", &solid_png(4, 4, WHITE), false).await.unwrap();

        let outcome = store.check("home", &solid_png(4, 5, WHITE), false).await.unwrap();

        assert_eq!(outcome, Comparison::Mismatched { diff_percent: 100.0 });
        assert!(store.actual_path("home").unwrap().exists());
    }

    #[tokio::test]
    async fn test_undecodable_capture_is_an_error() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        store.check("home", &solid_png(4, 4, WHITE), false).await.unwrap();

        assert!(store.check("home", b"not a png", false).await.is_err());
    }

    #[tokio::test]
    async fn test_update_overwrites() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        store.check("blog", &solid_png(4, 4, WHITE), false).await.unwrap();
        store.check("blog", &solid_png(4, 4, BLACK), false).await.unwrap();
        assert!(store.diff_path("blog").unwrap().exists());

        let new = solid_png(4, 4, BLACK);
        let outcome = store.check("blog", &new, true).await.unwrap();

        assert_eq!(outcome, Comparison::BaselineUpdated);
        assert_eq!(std::fs::read(store.baseline_path("blog").unwrap()).unwrap(), new);
        assert!(!store.diff_path("blog").unwrap().exists());
    }

    #[tokio::test]
    async fn test_nested_names_create_directories() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path());

        let outcome = store.check("a--b/c", &solid_png(2, 2, WHITE), false).await.unwrap();

        assert_eq!(outcome, Comparison::BaselineCreated);
        assert!(dir.path().join("a--b").join("c.png").exists());
    }

    #[tokio::test]
    async fn test_names_cannot_leave_the_directory() {
        let root = tempdir().unwrap();
        let dir = root.path().join("snapshots");
        let store = BaselineStore::new(&dir);
        let png = solid_png(2, 2, WHITE);

        for name in ["x--../../../escaped", "../escaped", "/tmp/escaped", "./home", ""] {
            assert!(store.baseline_path(name).is_err(), "{:?}", name);
            assert!(store.check(name, &png, false).await.is_err(), "{:?}", name);
            assert!(store.check(name, &png, true).await.is_err(), "{:?}", name);
        }

        assert!(!root.path().join("escaped.png").exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_compare_images_counts_differing_pixels() {
        let baseline = RgbaImage::from_pixel(4, 1, Rgba(WHITE));
        let mut actual = baseline.clone();
        actual.put_pixel(3, 0, Rgba(BLACK));

        let diff = compare_images(&actual, &baseline).unwrap();

        assert_eq!(diff.diff_pixels, 1);
        assert_eq!(diff.total_pixels, 4);
        assert_eq!(diff.percent(), 25.0);
        assert!(compare_images(&RgbaImage::new(2, 2), &baseline).is_none());
    }
}
