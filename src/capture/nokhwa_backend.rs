//! Nokhwa-based webcam capture backend.

use super::{CameraInfo, CaptureBackend, CaptureConfig};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{info, warn};

/// Formats tried in order until one opens a stream. Some drivers reject
/// `Closest` requests that are far from what they support, so the list walks
/// down from the configured size to VGA.
fn seed_formats(config: &CaptureConfig) -> Vec<CameraFormat> {
    let mut sizes = vec![(config.width, config.height), (1280, 720), (640, 480)];
    sizes.dedup();
    let mut seeds = Vec::new();
    for (w, h) in sizes {
        for format in [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG] {
            seeds.push(CameraFormat::new(Resolution::new(w, h), format, config.fps));
        }
    }
    seeds
}

/// Webcam capture using the nokhwa library. Frames are always decoded to RGB.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(config: CaptureConfig) -> Result<Self> {
        let mut opened = None;
        for seed in seed_formats(&config) {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed));
            let Ok(mut cam) = Camera::new(CameraIndex::Index(config.device_index), requested) else {
                continue;
            };
            // Creating the camera is not enough on some drivers; the stream has to open too.
            if cam.open_stream().is_ok() {
                info!("Camera stream opened with seed format {:?}", seed);
                opened = Some(cam);
                break;
            }
            warn!("Camera rejected seed format {:?}", seed);
        }

        let camera = opened.ok_or_else(|| {
            anyhow!(
                "could not open a stream on camera {} with any standard format",
                config.device_index
            )
        })?;

        let resolution = camera.resolution();
        info!("Camera opened with resolution: {}", resolution);

        Ok(Self {
            camera,
            width: resolution.width(),
            height: resolution.height(),
        })
    }

    fn capture_frame(&mut self) -> Result<VideoFrame> {
        let frame = self.camera.frame()?;
        let decoded = frame.decode_image::<RgbFormat>()?;
        let (width, height) = decoded.dimensions();
        self.width = width;
        self.height = height;

        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
