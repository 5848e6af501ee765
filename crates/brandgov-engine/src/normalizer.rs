use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Result of normalizing one logo. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Ready {
        path: PathBuf,
        width: u32,
        height: u32,
    },
    Degraded {
        source: PathBuf,
        reason: String,
    },
}

impl Normalized {
    pub fn ready_path(&self) -> Option<&Path> {
        match self {
            Normalized::Ready { path, .. } => Some(path),
            Normalized::Degraded { .. } => None,
        }
    }
}

pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, source: &Path, out_dir: &Path) -> Normalized;
}

/// Decodes any raster format the `image` crate knows, shrinks it so the
/// longest edge fits `max_edge`, and re-encodes it as PNG.
#[derive(Debug, Clone)]
pub struct RasterNormalizer {
    max_edge: u32,
}

impl RasterNormalizer {
    pub fn new(max_edge: u32) -> Self {
        Self {
            max_edge: max_edge.max(1),
        }
    }

    fn try_normalize(&self, source: &Path, out_dir: &Path) -> anyhow::Result<Normalized> {
        let decoded = image::open(source)?;
        let resized = if decoded.width() > self.max_edge || decoded.height() > self.max_edge {
            decoded.resize(self.max_edge, self.max_edge, FilterType::Lanczos3)
        } else {
            decoded
        };
        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(format!("logo-{}.png", short_id(source)));
        resized.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(Normalized::Ready {
            path,
            width: resized.width(),
            height: resized.height(),
        })
    }
}

impl ImageNormalizer for RasterNormalizer {
    fn normalize(&self, source: &Path, out_dir: &Path) -> Normalized {
        match self.try_normalize(source, out_dir) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!(source = %source.display(), error = %err, "logo normalization degraded");
                Normalized::Degraded {
                    source: source.to_path_buf(),
                    reason: format!("{err:#}"),
                }
            }
        }
    }
}

fn short_id(source: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.to_string_lossy().as_bytes());
    hex::encode(&hasher.finalize()[..4])
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{ImageNormalizer, Normalized, RasterNormalizer};

    #[test]
    fn large_logos_are_shrunk_to_max_edge() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("logo.jpg");
        RgbImage::from_pixel(400, 200, Rgb([10, 20, 30])).save(&source)?;

        let result = RasterNormalizer::new(100).normalize(&source, &temp.path().join("out"));
        match result {
            Normalized::Ready { path, width, height } => {
                assert_eq!((width, height), (100, 50));
                assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("png"));
                assert!(path.exists());
            }
            other => panic!("expected ready logo, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unreadable_logo_degrades_instead_of_failing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("logo.png");
        std::fs::write(&source, b"not an image")?;

        let result = RasterNormalizer::new(100).normalize(&source, temp.path());
        assert!(result.ready_path().is_none());
        assert!(matches!(result, Normalized::Degraded { ref source, .. } if source.ends_with("logo.png")));
        Ok(())
    }
}
