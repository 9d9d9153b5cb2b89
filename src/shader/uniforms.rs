//! Host-side layouts of the two uniform blocks.
//!
//! Both follow std140 / WGSL uniform rules: scalar arrays use a 16-byte
//! stride, so class ids and scores sit in the first lane of a 4-vector.

use crate::detect::{DetectionSnapshot, MAX_DETECTIONS};
use bytemuck::{Pod, Zeroable};

/// Per-frame scalars (binding 2).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Seconds since the renderer started.
    pub time: f32,
    /// Index of the frame being drawn.
    pub frame: f32,
    /// Render target size in pixels.
    pub resolution: [f32; 2],
    /// Size of the current video frame in pixels, zero before the first frame.
    pub source_size: [f32; 2],
    pub _pad: [f32; 2],
}

/// Detection block (binding 3), sized for [`MAX_DETECTIONS`].
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DetectionUniforms {
    pub count: i32,
    pub _pad: [i32; 3],
    pub boxes: [[f32; 4]; MAX_DETECTIONS],
    pub class_ids: [[i32; 4]; MAX_DETECTIONS],
    pub scores: [[f32; 4]; MAX_DETECTIONS],
}

impl Default for DetectionUniforms {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl DetectionUniforms {
    /// Fill the block from all `K` slots of a snapshot, mapping each box through `map_box`.
    pub fn from_snapshot(snapshot: &DetectionSnapshot, map_box: impl Fn([f32; 4]) -> [f32; 4]) -> Self {
        let mut block = Self::zeroed();
        block.count = snapshot.count().min(MAX_DETECTIONS) as i32;
        let slots = snapshot
            .padded_boxes()
            .iter()
            .zip(snapshot.padded_class_ids())
            .zip(snapshot.padded_scores())
            .take(MAX_DETECTIONS);
        for (i, ((rect, class_id), score)) in slots.enumerate() {
            block.boxes[i] = map_box(*rect);
            block.class_ids[i][0] = *class_id;
            block.scores[i][0] = *score;
        }
        block
    }
}
