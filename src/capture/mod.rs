//! Frame sources: webcam capture backends and still images.

mod nokhwa_backend;

pub use nokhwa_backend::NokhwaCapture;

use crate::error::SetupError;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Something the renderer and the detection loop can pull the current frame from.
pub trait FrameSource {
    /// The most recent frame, if one has arrived. Does not block.
    fn current_frame(&mut self) -> Option<&VideoFrame>;

    /// Current frame dimensions; `(0, 0)` until the source is ready.
    fn frame_size(&self) -> (u32, u32);
}

/// Trait for webcam capture backends.
pub trait CaptureBackend {
    /// Returns a list of available camera devices.
    fn list_devices() -> Result<Vec<CameraInfo>>
    where
        Self: Sized;

    /// Opens the camera with the specified configuration.
    fn open(config: CaptureConfig) -> Result<Self>
    where
        Self: Sized;

    /// Captures a single frame from the camera.
    fn capture_frame(&mut self) -> Result<VideoFrame>;

    /// Returns the current frame dimensions.
    fn frame_size(&self) -> (u32, u32);
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Camera capture running on its own thread.
///
/// The camera is opened on the worker so a slow device never stalls rendering.
/// Only the newest frame is kept; older frames are dropped.
pub struct AsyncCapture {
    rx: Receiver<VideoFrame>,
    latest: Option<VideoFrame>,
    width: u32,
    height: u32,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncCapture {
    /// Open the camera and start capturing. Fails if the device cannot be opened.
    pub fn new(config: CaptureConfig) -> Result<Self, SetupError> {
        let (frame_tx, frame_rx) = mpsc::sync_channel::<VideoFrame>(1);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u32), String>>();
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();

        let thread = thread::Builder::new()
            .name("prism-capture".into())
            .spawn(move || {
                let mut camera = match NokhwaCapture::open(config) {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(camera.frame_size()));
                        camera
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                capture_loop(&mut camera, &frame_tx, &worker_running);
            })
            .map_err(|e| SetupError::NoFrameSource(e.to_string()))?;

        let (width, height) = ready_rx
            .recv()
            .map_err(|_| SetupError::NoFrameSource("capture thread exited during startup".into()))?
            .map_err(SetupError::NoFrameSource)?;
        info!("Async capture running at {}x{}", width, height);

        Ok(Self {
            rx: frame_rx,
            latest: None,
            width,
            height,
            running,
            thread: Some(thread),
        })
    }
}

fn capture_loop(camera: &mut NokhwaCapture, tx: &SyncSender<VideoFrame>, running: &AtomicBool) {
    let mut consecutive_errors = 0u32;
    while running.load(Ordering::Relaxed) {
        match camera.capture_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                match tx.try_send(frame) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors == 1 || consecutive_errors % 100 == 0 {
                    warn!("Capture error ({} in a row): {}", consecutive_errors, e);
                }
                if consecutive_errors > 1000 {
                    error!("Camera keeps failing, stopping capture");
                    break;
                }
                thread::sleep(std::time::Duration::from_millis(10));
            }
        }
    }
}

impl FrameSource for AsyncCapture {
    fn current_frame(&mut self) -> Option<&VideoFrame> {
        while let Ok(frame) = self.rx.try_recv() {
            self.width = frame.width;
            self.height = frame.height;
            self.latest = Some(frame);
        }
        self.latest.as_ref()
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for AsyncCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A frame source that always returns the same image.
#[derive(Debug, Clone, Default)]
pub struct StillImageSource {
    frame: Option<VideoFrame>,
}

impl StillImageSource {
    /// Load an image file (any format the `image` crate reads).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| SetupError::NoFrameSource(format!("{}: {}", path.display(), e)))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        info!("Loaded still image {:?} ({}x{})", path, width, height);
        Ok(Self::from_frame(VideoFrame::from_data(width, height, PixelFormat::Rgba, img.into_raw())))
    }

    pub fn from_frame(frame: VideoFrame) -> Self {
        Self { frame: Some(frame) }
    }

    /// A source that never produces a frame.
    pub fn empty() -> Self {
        Self { frame: None }
    }

    pub fn set_frame(&mut self, frame: Option<VideoFrame>) {
        self.frame = frame;
    }
}

impl FrameSource for StillImageSource {
    fn current_frame(&mut self) -> Option<&VideoFrame> {
        self.frame.as_ref()
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame.as_ref().map(|f| (f.width, f.height)).unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_image_source() {
        let mut empty = StillImageSource::empty();
        assert!(empty.current_frame().is_none());
        assert_eq!(empty.frame_size(), (0, 0));

        let mut source = StillImageSource::from_frame(VideoFrame::new(4, 3, PixelFormat::Rgba));
        assert_eq!(source.frame_size(), (4, 3));
        assert!(source.current_frame().unwrap().is_ready());
    }

    #[test]
    fn test_open_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255])).save(&path).unwrap();

        let mut source = StillImageSource::open(&path).unwrap();
        let frame = source.current_frame().unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.pixel(2, 1), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_open_missing_file_is_setup_error() {
        assert!(matches!(
            StillImageSource::open("/nonexistent/frame.png"),
            Err(SetupError::NoFrameSource(_))
        ));
    }
}
