//! Camera capture
//!
//! Photos are numbered `image_<n>.jpg` in the images directory, continuing
//! after the highest number already on disk.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::config::CameraConfig;
use crate::error::{Error, Result};

pub trait Camera: Send + 'static {
    /// Take a photo and return where it was written
    fn capture(&mut self) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Sequential `image_<n>.jpg` names in one directory
#[derive(Debug)]
struct ImageSequence {
    dir: PathBuf,
    next: u32,
}

impl ImageSequence {
    fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let next = next_image_number(&dir)?;
        Ok(Self { dir, next })
    }

    fn peek(&self) -> PathBuf {
        self.dir.join(format!("image_{}.jpg", self.next))
    }

    fn advance(&mut self) {
        self.next += 1;
    }
}

/// One past the highest `image_<n>.jpg` in `dir`, or 1
fn next_image_number(dir: &Path) -> Result<u32> {
    let mut highest = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(n) = name
            .to_str()
            .and_then(|n| n.strip_prefix("image_"))
            .and_then(|n| n.strip_suffix(".jpg"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        highest = highest.max(n);
    }
    Ok(highest + 1)
}

/// Shells out to `libcamera-still` (or a compatible command)
#[derive(Debug)]
pub struct LibcameraStill {
    config: CameraConfig,
    sequence: ImageSequence,
}

impl LibcameraStill {
    pub fn new(config: CameraConfig, images_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            config,
            sequence: ImageSequence::open(images_dir)?,
        })
    }
}

impl Camera for LibcameraStill {
    async fn capture(&mut self) -> Result<PathBuf> {
        let path = self.sequence.peek();

        let mut cmd = Command::new(&self.config.command);
        cmd.arg("--width")
            .arg(self.config.width.to_string())
            .arg("--height")
            .arg(self.config.height.to_string())
            .arg("--output")
            .arg(&path)
            .arg("--nopreview")
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Camera(format!(
                    "{} did not finish within {}s",
                    self.config.command, self.config.timeout_secs
                ))
            })?
            .map_err(|e| Error::Camera(format!("Failed to run {}: {}", self.config.command, e)))?;

        if !output.status.success() {
            return Err(Error::Camera(format!(
                "{} error ({}): {}",
                self.config.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !path.exists() {
            return Err(Error::Camera(format!(
                "{} exited successfully but wrote no image",
                self.config.command
            )));
        }

        self.sequence.advance();
        tracing::info!("Image captured: {}", path.display());
        Ok(path)
    }
}

/// Writes a small generated JPEG instead of using a real camera
#[derive(Debug)]
pub struct SimulatedCamera {
    sequence: ImageSequence,
}

impl SimulatedCamera {
    pub fn new(images_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            sequence: ImageSequence::open(images_dir)?,
        })
    }
}

impl Camera for SimulatedCamera {
    async fn capture(&mut self) -> Result<PathBuf> {
        let path = self.sequence.peek();
        let shade = (self.sequence.next.wrapping_mul(37) % 200) as u8 + 40;

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            let img = image::RgbImage::from_fn(160, 120, |x, y| {
                image::Rgb([shade, (x % 256) as u8, (y * 2 % 256) as u8])
            });
            img.save_with_format(&target, image::ImageFormat::Jpeg)
        })
        .await
        .map_err(|e| Error::Camera(format!("capture task failed: {}", e)))??;

        self.sequence.advance();
        tracing::info!("Simulated image written: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_image_number_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_image_number(dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_next_image_number_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["image_3.jpg", "image_12.jpg", "image_x.jpg", "capture7.jpg", "image_40.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(next_image_number(dir.path()).unwrap(), 13);
    }

    #[tokio::test]
    async fn test_simulated_camera_numbers_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("image_4.jpg"), b"old").unwrap();

        let mut camera = SimulatedCamera::new(dir.path()).unwrap();
        let first = camera.capture().await.unwrap();
        let second = camera.capture().await.unwrap();

        assert_eq!(first, dir.path().join("image_5.jpg"));
        assert_eq!(second, dir.path().join("image_6.jpg"));
        assert!(image::open(&first).is_ok());
    }

    #[tokio::test]
    async fn test_failed_command_does_not_advance() {
        let dir = tempfile::tempdir().unwrap();
        let config = CameraConfig {
            command: "false".to_string(),
            ..CameraConfig::default()
        };

        let mut camera = LibcameraStill::new(config, dir.path()).unwrap();
        let err = camera.capture().await.unwrap_err();
        assert!(matches!(err, Error::Camera(_)));
        assert_eq!(camera.sequence.peek(), dir.path().join("image_1.jpg"));
    }

    #[tokio::test]
    async fn test_missing_command_is_camera_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CameraConfig {
            command: "definitely-not-a-camera-binary".to_string(),
            ..CameraConfig::default()
        };

        let mut camera = LibcameraStill::new(config, dir.path()).unwrap();
        assert!(matches!(camera.capture().await, Err(Error::Camera(_))));
    }
}
