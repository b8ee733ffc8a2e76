//! Turns artifact-bearing generate events into stored image files.
//!
//! Upscale results are written verbatim as a single image; draft and
//! variation composites are split into four quadrant files. Thumbnails
//! land under `_thumbnails/` inside the album directory. Failures are
//! logged and swallowed: a failed split yields exactly the images whose
//! files were written before the failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use easel_bot::transport::Downloader;
use easel_core::album::Image;
use easel_core::event::GenerateEvent;
use easel_core::task::Stage;

use crate::ops::{self, THUMBNAIL_FACTOR_QUADRANT, THUMBNAIL_FACTOR_UPSCALE};

/// Subdirectory for preview images inside the album directory.
pub const THUMBNAIL_DIR: &str = "_thumbnails";

/// Per-run materialization switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOptions {
    /// Download artifacts to disk; when off, images carry URLs only.
    pub download: bool,
    /// Also write reduced-scale previews.
    pub thumbnail: bool,
}

/// Materializes one album's artifacts into its directory.
pub struct Materializer {
    downloader: Arc<dyn Downloader>,
    album_dir: PathBuf,
    options: MaterializeOptions,
}

impl Materializer {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        album_dir: impl Into<PathBuf>,
        options: MaterializeOptions,
    ) -> Self {
        Self {
            downloader,
            album_dir: album_dir.into(),
            options,
        }
    }

    /// Produce the stored images for one artifact-bearing event.
    ///
    /// Returns an empty list when the event carries no URL or when
    /// every artifact failed; never returns an error.
    pub async fn materialize(&self, event: &GenerateEvent) -> Vec<Image> {
        let Some(url) = event.url.clone() else {
            return Vec::new();
        };

        if !self.options.download {
            return vec![Image {
                prompt: event.prompt.clone(),
                url,
                file: None,
            }];
        }

        let bytes = match self.downloader.download(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Couldn't download artifact");
                return Vec::new();
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.album_dir).await {
            tracing::warn!(dir = %self.album_dir.display(), error = %e, "Couldn't create album directory");
            return Vec::new();
        }
        if self.options.thumbnail {
            if let Err(e) = tokio::fs::create_dir_all(self.album_dir.join(THUMBNAIL_DIR)).await {
                tracing::warn!(error = %e, "Couldn't create thumbnail directory");
            }
        }

        let album_dir = self.album_dir.clone();
        let prompt = event.prompt.clone();
        let stage = event.stage;
        let prompt_index = event.prompt_index;
        let thumbnails = self.options.thumbnail;

        let write = tokio::task::spawn_blocking(move || {
            if stage.is_composite() {
                write_quadrants(&album_dir, prompt_index, stage, &prompt, &url, &bytes, thumbnails)
            } else {
                write_upscale(&album_dir, prompt_index, stage, &prompt, &url, &bytes, thumbnails)
            }
        });

        match write.await {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(error = %e, "Materialization task failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking write paths
// ---------------------------------------------------------------------------

/// Write an upscale result verbatim, plus an optional coarse thumbnail.
fn write_upscale(
    album_dir: &Path,
    prompt_index: usize,
    stage: Stage,
    prompt: &str,
    url: &str,
    bytes: &[u8],
    thumbnails: bool,
) -> Vec<Image> {
    let stem = file_stem(prompt_index, stage, None);
    let file_name = format!("{stem}.{}", extension_from_url(url));
    if let Err(e) = std::fs::write(album_dir.join(&file_name), bytes) {
        tracing::warn!(file = %file_name, error = %e, "Couldn't write image");
        return Vec::new();
    }

    if thumbnails {
        match ops::decode(bytes) {
            Ok(image) => write_thumbnail(album_dir, &stem, &image, THUMBNAIL_FACTOR_UPSCALE),
            Err(e) => tracing::warn!(file = %file_name, error = %e, "Couldn't decode for thumbnail"),
        }
    }

    vec![Image {
        prompt: prompt.to_string(),
        url: url.to_string(),
        file: Some(file_name),
    }]
}

/// Split a composite into quadrant files, plus optional finer
/// thumbnails. Stops at the first write failure and returns what landed.
fn write_quadrants(
    album_dir: &Path,
    prompt_index: usize,
    stage: Stage,
    prompt: &str,
    url: &str,
    bytes: &[u8],
    thumbnails: bool,
) -> Vec<Image> {
    let quadrants = match ops::decode(bytes).and_then(|image| ops::split_grid(&image)) {
        Ok(quadrants) => quadrants,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Couldn't split composite");
            return Vec::new();
        }
    };

    let mut images = Vec::with_capacity(4);
    for (i, quadrant) in quadrants.iter().enumerate() {
        let quadrant_no = i as u8 + 1;
        let stem = file_stem(prompt_index, stage, Some(quadrant_no));
        let file_name = format!("{stem}.png");
        if let Err(e) = quadrant.save(album_dir.join(&file_name)) {
            tracing::warn!(file = %file_name, error = %e, "Couldn't write quadrant");
            return images;
        }

        if thumbnails {
            write_thumbnail(album_dir, &stem, quadrant, THUMBNAIL_FACTOR_QUADRANT);
        }

        images.push(Image {
            prompt: prompt.to_string(),
            url: url.to_string(),
            file: Some(file_name),
        });
    }
    images
}

fn write_thumbnail(album_dir: &Path, stem: &str, image: &image::DynamicImage, factor: u32) {
    let path = album_dir.join(THUMBNAIL_DIR).join(format!("{stem}.jpg"));
    let thumb = ops::thumbnail(image, factor).to_rgb8();
    if let Err(e) = thumb.save(&path) {
        tracing::warn!(file = %path.display(), error = %e, "Couldn't write thumbnail");
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Stable artifact file stem: prompt index, stage tag, and quadrant,
/// e.g. `003_grid_q2` or `003_u1`.
fn file_stem(prompt_index: usize, stage: Stage, quadrant: Option<u8>) -> String {
    match quadrant {
        Some(q) => format!("{prompt_index:03}_{}_q{q}", stage.file_tag()),
        None => format!("{prompt_index:03}_{}", stage.file_tag()),
    }
}

/// Extension of the URL's last path segment; `png` when absent or
/// implausible.
fn extension_from_url(url: &str) -> String {
    let clean = url.split(['?', '#']).next().unwrap_or(url);
    let segment = clean.rsplit('/').next().unwrap_or(clean);
    match segment.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => "png".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use easel_bot::transport::BotError;
    use image::{DynamicImage, Rgba, RgbaImage};

    struct FakeDownloader {
        bytes: Option<Vec<u8>>,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, _url: &str) -> Result<Vec<u8>, BotError> {
            self.bytes
                .clone()
                .ok_or_else(|| BotError::Download("scripted failure".into()))
        }
    }

    fn composite_png() -> Vec<u8> {
        let mut img = RgbaImage::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                img.put_pixel(x, y, Rgba([x as u8 * 60, y as u8 * 60, 0, 255]));
            }
        }
        let mut bytes = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn event(stage: Stage, url: &str) -> GenerateEvent {
        GenerateEvent::completed(3, "a red fox", stage, Some(url.into()), false)
    }

    fn materializer(dir: &Path, bytes: Option<Vec<u8>>, options: MaterializeOptions) -> Materializer {
        Materializer::new(Arc::new(FakeDownloader { bytes }), dir, options)
    }

    #[tokio::test]
    async fn download_disabled_returns_url_only() {
        let dir = tempfile::tempdir().unwrap();
        let m = materializer(dir.path(), None, MaterializeOptions::default());
        let images = m
            .materialize(&event(Stage::Draft, "https://cdn.test/grid.png"))
            .await;
        assert_eq!(images.len(), 1);
        assert!(images[0].file.is_none());
        assert_eq!(images[0].url, "https://cdn.test/grid.png");
    }

    #[tokio::test]
    async fn composite_splits_into_four_files() {
        let dir = tempfile::tempdir().unwrap();
        let options = MaterializeOptions {
            download: true,
            thumbnail: true,
        };
        let m = materializer(dir.path(), Some(composite_png()), options);
        let images = m
            .materialize(&event(Stage::Draft, "https://cdn.test/grid.png"))
            .await;

        assert_eq!(images.len(), 4);
        for (i, image) in images.iter().enumerate() {
            let file = image.file.as_deref().unwrap();
            assert_eq!(file, format!("003_grid_q{}.png", i + 1));
            assert!(dir.path().join(file).exists());
            assert!(dir
                .path()
                .join(THUMBNAIL_DIR)
                .join(format!("003_grid_q{}.jpg", i + 1))
                .exists());
        }
    }

    #[tokio::test]
    async fn upscale_writes_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = MaterializeOptions {
            download: true,
            thumbnail: false,
        };
        let m = materializer(dir.path(), Some(composite_png()), options);
        let images = m
            .materialize(&event(Stage::Upscale(2), "https://cdn.test/big.png?width=2048"))
            .await;

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].file.as_deref(), Some("003_u2.png"));
        assert!(dir.path().join("003_u2.png").exists());
        assert!(!dir.path().join(THUMBNAIL_DIR).exists());
    }

    #[tokio::test]
    async fn download_failure_yields_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let options = MaterializeOptions {
            download: true,
            thumbnail: false,
        };
        let m = materializer(dir.path(), None, options);
        let images = m
            .materialize(&event(Stage::Draft, "https://cdn.test/grid.png"))
            .await;
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn undecodable_composite_yields_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let options = MaterializeOptions {
            download: true,
            thumbnail: false,
        };
        let m = materializer(dir.path(), Some(b"junk".to_vec()), options);
        let images = m
            .materialize(&event(Stage::Variation(1), "https://cdn.test/grid.png"))
            .await;
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn event_without_url_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let m = materializer(dir.path(), Some(composite_png()), MaterializeOptions::default());
        let event = GenerateEvent::failed(0, "a red fox", Stage::Draft, "timeout", true);
        assert!(m.materialize(&event).await.is_empty());
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension_from_url("https://x.test/a/b/c.webp"), "webp");
        assert_eq!(extension_from_url("https://x.test/c.PNG?w=1"), "png");
        assert_eq!(extension_from_url("https://x.test/no-extension"), "png");
        assert_eq!(extension_from_url("https://x.test/odd.thing.jpeg#f"), "jpeg");
    }

    #[test]
    fn file_stems() {
        assert_eq!(file_stem(7, Stage::Draft, Some(2)), "007_grid_q2");
        assert_eq!(file_stem(7, Stage::Upscale(1), None), "007_u1");
        assert_eq!(file_stem(12, Stage::Variation(3), Some(4)), "012_v3_q4");
    }
}
