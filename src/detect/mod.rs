//! Object detection: results, the fixed-capacity buffer shared with the
//! renderer, and the self-rescheduling loop that keeps it fresh.

pub mod buffer;
pub mod detection_loop;
pub mod onnx;
pub mod source;
pub mod stats;

pub use buffer::{ClassMap, DetectionBuffer, DetectionSnapshot, DEFAULT_CAPACITY, MAX_DETECTIONS};
pub use detection_loop::{DetectionLoop, DetectionLoopConfig, LoopEvent, LoopPhase};
pub use onnx::{OnnxDetector, OnnxDetectorConfig};
pub use source::{pending, DetectionSource, Pending, Reply, Resolver};
pub use stats::DetectionStats;

/// One recognized object in a single detection cycle.
///
/// Coordinates are pixels in the source frame, origin at the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Within `[0, 1]` when built by `new`. The buffer re-sanitizes on write.
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            label: label.into(),
            confidence: sanitize_confidence(confidence),
            x,
            y,
            width,
            height,
        }
    }

    /// The box as `[x, y, w, h]`.
    pub fn rect(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Clamp into `[0, 1]`, mapping NaN and `-0.0` to `0.0`.
pub fn sanitize_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() || confidence <= 0.0 {
        0.0
    } else {
        confidence.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_sanitized() {
        assert_eq!(Detection::new("a", 1.7, 0.0, 0.0, 1.0, 1.0).confidence, 1.0);
        assert_eq!(Detection::new("a", -0.2, 0.0, 0.0, 1.0, 1.0).confidence, 0.0);
        assert_eq!(Detection::new("a", f32::NAN, 0.0, 0.0, 1.0, 1.0).confidence, 0.0);
        assert_eq!(Detection::new("a", 0.5, 1.0, 2.0, 3.0, 4.0).rect(), [1.0, 2.0, 3.0, 4.0]);
        assert!(Detection::new("a", -0.0, 0.0, 0.0, 1.0, 1.0).confidence.is_sign_positive());
    }
}
