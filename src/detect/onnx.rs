//! YOLO-style object detector running an ONNX model on a worker thread.

use super::source::{pending, DetectionSource, Pending, Resolver};
use super::Detection;
use crate::error::DetectionError;
use crate::frame::VideoFrame;
use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgba};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, info, warn};

/// Class names of the COCO dataset, the default for YOLO exports.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Letterbox padding value used by YOLO preprocessing.
const PAD_VALUE: u8 = 114;

#[derive(Debug, Clone)]
pub struct OnnxDetectorConfig {
    pub model_path: PathBuf,
    /// Class names indexed by model class id.
    pub labels: Vec<String>,
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub input_name: String,
    pub output_name: String,
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub threads: usize,
}

impl Default for OnnxDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            labels: COCO_LABELS.iter().map(|s| s.to_string()).collect(),
            input_size: 640,
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
            score_threshold: 0.25,
            iou_threshold: 0.45,
            threads: 2,
        }
    }
}

struct Job {
    frame: VideoFrame,
    reply: Resolver<Result<Vec<Detection>, DetectionError>>,
}

/// Runs the model on a dedicated thread. `load` spawns the thread and builds
/// the session there; `release` drops the job queue, which ends the thread
/// once any in-flight inference finishes.
pub struct OnnxDetector {
    config: OnnxDetectorConfig,
    jobs: Option<Sender<Job>>,
}

impl OnnxDetector {
    pub fn new(config: OnnxDetectorConfig) -> Self {
        Self { config, jobs: None }
    }

    /// Initialize the ONNX Runtime environment. Call once at startup.
    pub fn init_runtime() {
        ort::init().with_name("prism").commit();
    }
}

impl DetectionSource for OnnxDetector {
    fn name(&self) -> &str {
        "onnx"
    }

    fn load(&mut self) -> Pending<Result<(), DetectionError>> {
        self.release();
        let (ready, ready_reply) = pending();
        let (tx, rx) = mpsc::channel::<Job>();
        let config = self.config.clone();

        let spawned = thread::Builder::new()
            .name("prism-detect".into())
            .spawn(move || worker(config, rx, ready));
        match spawned {
            Ok(_) => {
                self.jobs = Some(tx);
                ready_reply
            }
            Err(e) => Pending::ready(Err(DetectionError::Load(e.to_string()))),
        }
    }

    fn detect(&mut self, frame: VideoFrame) -> Pending<Result<Vec<Detection>, DetectionError>> {
        let Some(jobs) = &self.jobs else {
            return Pending::ready(Err(DetectionError::NotLoaded));
        };
        let (reply, result) = pending();
        if jobs.send(Job { frame, reply }).is_err() {
            self.jobs = None;
            return Pending::ready(Err(DetectionError::Abandoned));
        }
        result
    }

    fn release(&mut self) {
        if self.jobs.take().is_some() {
            debug!("Released ONNX detector");
        }
    }
}

fn worker(config: OnnxDetectorConfig, jobs: Receiver<Job>, ready: Resolver<Result<(), DetectionError>>) {
    let mut session = match build_session(&config) {
        Ok(session) => session,
        Err(e) => {
            ready.resolve(Err(DetectionError::Load(e.to_string())));
            return;
        }
    };
    if !ready.resolve(Ok(())) {
        return;
    }

    while let Ok(job) = jobs.recv() {
        let start = std::time::Instant::now();
        let result = infer(&mut session, &config, &job.frame).map_err(|e| DetectionError::Inference(e.to_string()));
        debug!("[Perf] ONNX inference: {:?}", start.elapsed());
        // The loop may have been disabled meanwhile; then nobody is listening.
        job.reply.resolve(result);
    }
    debug!("ONNX detector worker exiting");
}

fn build_session(config: &OnnxDetectorConfig) -> Result<Session> {
    if !config.model_path.exists() {
        return Err(anyhow!("model not found at {:?}", config.model_path));
    }
    info!("Loading detection model from {:?}", config.model_path);
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.threads)?
        .commit_from_file(&config.model_path)?;
    Ok(session)
}

/// Scale and offset that map model-input pixels back to frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub ratio: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_width: f32,
    pub frame_height: f32,
}

impl Letterbox {
    pub fn new(frame_width: u32, frame_height: u32, input_size: u32) -> Self {
        let ratio = (input_size as f32 / frame_width as f32).min(input_size as f32 / frame_height as f32);
        let scaled_w = (frame_width as f32 * ratio).round();
        let scaled_h = (frame_height as f32 * ratio).round();
        Self {
            ratio,
            pad_x: ((input_size as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - scaled_h) / 2.0).floor(),
            frame_width: frame_width as f32,
            frame_height: frame_height as f32,
        }
    }

    /// Convert a center-format box in model space to a clamped top-left box in frame space.
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
        let x0 = ((cx - w / 2.0 - self.pad_x) / self.ratio).clamp(0.0, self.frame_width);
        let y0 = ((cy - h / 2.0 - self.pad_y) / self.ratio).clamp(0.0, self.frame_height);
        let x1 = ((cx + w / 2.0 - self.pad_x) / self.ratio).clamp(0.0, self.frame_width);
        let y1 = ((cy + h / 2.0 - self.pad_y) / self.ratio).clamp(0.0, self.frame_height);
        [x0, y0, x1 - x0, y1 - y0]
    }
}

fn infer(session: &mut Session, config: &OnnxDetectorConfig, frame: &VideoFrame) -> Result<Vec<Detection>> {
    let rgba = frame.to_rgba();
    let img_buffer = ImageBuffer::<Rgba<u8>, _>::from_raw(rgba.width, rgba.height, rgba.data)
        .ok_or_else(|| anyhow!("frame data does not match its dimensions"))?;
    let img = DynamicImage::ImageRgba8(img_buffer);

    let size = config.input_size;
    let letterbox = Letterbox::new(frame.width, frame.height, size);
    let scaled_w = ((frame.width as f32 * letterbox.ratio).round() as u32).max(1);
    let scaled_h = ((frame.height as f32 * letterbox.ratio).round() as u32).max(1);
    let resized = img.resize_exact(scaled_w, scaled_h, FilterType::Triangle);
    let mut padded = ImageBuffer::from_pixel(size, size, Rgba([PAD_VALUE, PAD_VALUE, PAD_VALUE, 255]));
    image::imageops::overlay(&mut padded, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

    let mut input_tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in padded.enumerate_pixels() {
        for c in 0..3 {
            input_tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    let shape = input_tensor.shape().iter().map(|&x| x as i64).collect::<Vec<_>>();
    let data = input_tensor.into_raw_vec();
    let input_value = Value::from_array((shape, data))?;
    let outputs = session.run(ort::inputs![config.input_name.as_str() => &input_value])?;
    let (shape, data) = outputs[config.output_name.as_str()].try_extract_tensor::<f32>()?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

    let candidates = decode_yolo(&dims, data, &letterbox, config.labels.len(), config.score_threshold)?;
    let kept = non_max_suppression(candidates, config.iou_threshold);
    Ok(kept
        .into_iter()
        .map(|c| {
            let label = config
                .labels
                .get(c.class_id)
                .cloned()
                .unwrap_or_else(|| format!("class{}", c.class_id));
            Detection::new(label, c.score, c.rect[0], c.rect[1], c.rect[2], c.rect[3])
        })
        .collect())
}

/// A box that passed the score threshold, before suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub score: f32,
    /// `[x, y, w, h]` in frame pixels.
    pub rect: [f32; 4],
}

/// Decode a YOLOv8-style output of shape `[1, 4 + C, N]` (or transposed `[1, N, 4 + C]`).
pub fn decode_yolo(
    dims: &[usize],
    data: &[f32],
    letterbox: &Letterbox,
    num_classes: usize,
    threshold: f32,
) -> Result<Vec<Candidate>> {
    let [1, a, b] = dims else {
        return Err(anyhow!("unexpected output shape {:?}", dims));
    };
    let (a, b) = (*a, *b);
    let expected = 4 + num_classes;
    let (attrs, anchors, transposed) = if a == expected {
        (a, b, false)
    } else if b == expected {
        (b, a, true)
    } else if a <= b {
        // Unknown class count: attributes are the shorter axis (84 against 8400 for COCO).
        (a, b, false)
    } else {
        (b, a, true)
    };
    if attrs < 5 || data.len() < attrs * anchors {
        return Err(anyhow!("output shape {:?} too small for box decoding", dims));
    }
    let at = |attr: usize, anchor: usize| {
        if transposed {
            data[anchor * attrs + attr]
        } else {
            data[attr * anchors + anchor]
        }
    };

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, score) = (4..attrs)
            .map(|attr| (attr - 4, at(attr, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < threshold {
            continue;
        }
        let rect = letterbox.unmap(at(0, i), at(1, i), at(2, i), at(3, i));
        if rect[2] <= 0.0 || rect[3] <= 0.0 {
            continue;
        }
        candidates.push(Candidate { class_id, score, rect });
    }
    Ok(candidates)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x0 = a[0].max(b[0]);
    let y0 = a[1].max(b[1]);
    let x1 = (a[0] + a[2]).min(b[0] + b[2]);
    let y1 = (a[1] + a[3]).min(b[1] + b[3]);
    let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class suppression. Output is ordered by descending score.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(&k.rect, &cand.rect) > iou_threshold);
        if !overlaps {
            kept.push(cand);
        }
    }
    if kept.len() > 300 {
        warn!("NMS kept {} boxes; threshold may be too low", kept.len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_roundtrip_for_wide_frame() {
        let lb = Letterbox::new(1280, 720, 640);
        assert_eq!(lb.ratio, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        // A 100x50 box centered at frame (200, 100) sits at model (100, 190) with size 50x25.
        let rect = lb.unmap(100.0, 190.0, 50.0, 25.0);
        assert_eq!(rect, [150.0, 75.0, 100.0, 50.0]);
    }

    #[test]
    fn test_decode_picks_best_class_and_thresholds() {
        let lb = Letterbox::new(640, 640, 640);
        // 4 box rows + 2 classes, 3 anchors, attribute-major.
        #[rustfmt::skip]
        let data = vec![
            100.0, 300.0, 500.0,  // cx
            100.0, 300.0, 500.0,  // cy
             20.0,  40.0,  60.0,  // w
             20.0,  40.0,  60.0,  // h
              0.9,   0.1,  0.05,  // class 0
              0.2,   0.7,  0.10,  // class 1
        ];
        let out = decode_yolo(&[1, 6, 3], &data, &lb, 2, 0.5).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].rect, [90.0, 90.0, 20.0, 20.0]);
        assert_eq!(out[1].class_id, 1);
        assert!((out[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_accepts_transposed_layout() {
        let lb = Letterbox::new(640, 640, 640);
        #[rustfmt::skip]
        let data = vec![
            // cx, cy, w, h, class0
            50.0, 50.0, 10.0, 10.0, 0.8,
        ];
        // One anchor with five attributes arrives as [1, 1, 5].
        let out = decode_yolo(&[1, 1, 5], &data, &lb, 1, 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rect, [45.0, 45.0, 10.0, 10.0]);
        assert!(decode_yolo(&[2, 5], &data, &lb, 1, 0.5).is_err());
    }

    #[test]
    fn test_nms_suppresses_same_class_overlaps_only() {
        let boxes = vec![
            Candidate { class_id: 0, score: 0.6, rect: [0.0, 0.0, 10.0, 10.0] },
            Candidate { class_id: 0, score: 0.9, rect: [1.0, 1.0, 10.0, 10.0] },
            Candidate { class_id: 1, score: 0.8, rect: [1.0, 1.0, 10.0, 10.0] },
            Candidate { class_id: 0, score: 0.5, rect: [50.0, 50.0, 10.0, 10.0] },
        ];
        let kept = non_max_suppression(boxes, 0.45);
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.5]);
    }

    #[test]
    fn test_detect_before_load_fails_fast() {
        let mut detector = OnnxDetector::new(OnnxDetectorConfig::default());
        let mut reply = detector.detect(VideoFrame::new(2, 2, crate::frame::PixelFormat::Rgba));
        assert_eq!(
            reply.try_take(),
            crate::detect::Reply::Ready(Err(DetectionError::NotLoaded))
        );
    }

    #[test]
    fn test_missing_model_reports_load_failure() {
        let mut detector = OnnxDetector::new(OnnxDetectorConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            ..Default::default()
        });
        let mut ready = detector.load();
        let outcome = loop {
            match ready.try_take() {
                crate::detect::Reply::Waiting => thread::sleep(std::time::Duration::from_millis(5)),
                other => break other,
            }
        };
        assert!(matches!(outcome, crate::detect::Reply::Ready(Err(DetectionError::Load(_)))));
    }
}
