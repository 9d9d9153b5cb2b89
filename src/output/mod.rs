//! Output backends for displaying processed video.

pub mod offscreen;
pub mod window_output;

pub use offscreen::{HeadlessRenderer, OffscreenTarget};
pub use window_output::{WindowConfig, WindowRenderer};

use crate::frame::VideoFrame;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::info;

/// Trait for video output backends.
pub trait OutputBackend {
    /// Write a frame to the output.
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;
}

/// Writes each frame over a single image file. The format follows the extension.
pub struct ImageFileOutput {
    path: PathBuf,
    written: u64,
}

impl ImageFileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl OutputBackend for ImageFileOutput {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        let rgba = frame.to_rgba();
        let image = image::RgbaImage::from_raw(rgba.width, rgba.height, rgba.data)
            .ok_or_else(|| anyhow!("frame data does not cover {}x{}", frame.width, frame.height))?;
        image.save(&self.path)?;
        self.written += 1;
        if self.written == 1 {
            info!("Writing output frames to {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn test_image_output_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut output = ImageFileOutput::new(&path);
        let frame = VideoFrame::from_data(2, 1, PixelFormat::Rgb, vec![255, 0, 0, 0, 255, 0]);
        output.write_frame(&frame).unwrap();
        assert_eq!(output.written(), 1);

        let image = image::open(&path).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 255, 0, 255]);
    }
}
