//! Fixed-capacity detection buffer shared between the detection loop and the renderer.
//!
//! The buffer never mutates a published snapshot. A write assembles a complete
//! replacement and then swaps the `Arc`, so a reader always sees a count and
//! arrays that came from the same update.

use super::{sanitize_confidence, Detection};
use crate::error::SetupError;
use std::collections::HashMap;
use std::sync::Arc;

/// Largest capacity the GPU detection block can hold.
pub const MAX_DETECTIONS: usize = 16;

/// Capacity used unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 16;

/// Maps detection labels to categorical ids.
///
/// Unmapped labels get the default id, so an empty map collapses every label to one class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassMap {
    ids: HashMap<String, i32>,
    default_id: i32,
}

impl ClassMap {
    /// An empty map; every label gets id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty map whose unmapped labels get `default_id`.
    pub fn with_default(default_id: i32) -> Self {
        Self {
            ids: HashMap::new(),
            default_id,
        }
    }

    /// Map `label` to `id`, replacing any earlier mapping.
    pub fn insert(&mut self, label: impl Into<String>, id: i32) {
        self.ids.insert(label.into(), id);
    }

    /// The id for `label`, or the default id when it is unmapped.
    pub fn id_for(&self, label: &str) -> i32 {
        self.ids.get(label).copied().unwrap_or(self.default_id)
    }
}

impl<S: Into<String>> FromIterator<(S, i32)> for ClassMap {
    fn from_iter<I: IntoIterator<Item = (S, i32)>>(iter: I) -> Self {
        let mut map = ClassMap::new();
        for (label, id) in iter {
            map.insert(label, id);
        }
        map
    }
}

/// An immutable view of the buffer at one point in time.
#[derive(Debug, Clone)]
pub struct DetectionSnapshot {
    count: usize,
    boxes: Vec<[f32; 4]>,
    class_ids: Vec<i32>,
    scores: Vec<f32>,
    source: Arc<[Detection]>,
    generation: u64,
}

impl DetectionSnapshot {
    fn empty(capacity: usize) -> Self {
        Self {
            count: 0,
            boxes: vec![[0.0; 4]; capacity],
            class_ids: vec![0; capacity],
            scores: vec![0.0; capacity],
            source: Arc::from(Vec::new()),
            generation: 0,
        }
    }

    /// Number of valid entries (`n`).
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.boxes.len()
    }

    /// Valid boxes as `[x, y, w, h]` in source-frame pixels.
    pub fn boxes(&self) -> &[[f32; 4]] {
        &self.boxes[..self.count]
    }

    pub fn class_ids(&self) -> &[i32] {
        &self.class_ids[..self.count]
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores[..self.count]
    }

    /// All `K` boxes, including stale padding past `count`. For upload only.
    pub fn padded_boxes(&self) -> &[[f32; 4]] {
        &self.boxes
    }

    pub fn padded_class_ids(&self) -> &[i32] {
        &self.class_ids
    }

    pub fn padded_scores(&self) -> &[f32] {
        &self.scores
    }

    /// The full, unselected result list this snapshot was built from.
    pub fn source(&self) -> &[Detection] {
        &self.source
    }

    /// Increments with every publish; lets consumers skip unchanged snapshots.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds the current best-K detections. Owned and mutated by the detection loop only.
pub struct DetectionBuffer {
    classes: ClassMap,
    current: Arc<DetectionSnapshot>,
}

impl DetectionBuffer {
    pub fn new(capacity: usize) -> Result<Self, SetupError> {
        Self::with_classes(capacity, ClassMap::new())
    }

    pub fn with_classes(capacity: usize, classes: ClassMap) -> Result<Self, SetupError> {
        if capacity == 0 || capacity > MAX_DETECTIONS {
            return Err(SetupError::Capacity {
                requested: capacity,
                max: MAX_DETECTIONS,
            });
        }
        Ok(Self {
            classes,
            current: Arc::new(DetectionSnapshot::empty(capacity)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.current.capacity()
    }

    pub fn classes(&self) -> &ClassMap {
        &self.classes
    }

    /// Replace the contents with the top-K of `detections`.
    ///
    /// Entries past the new count keep whatever the previous snapshot held.
    pub fn write(&mut self, detections: &[Detection]) {
        let capacity = self.capacity();
        let selected = select_top_k(detections, capacity);

        let mut boxes = self.current.boxes.clone();
        let mut class_ids = self.current.class_ids.clone();
        let mut scores = self.current.scores.clone();
        for (slot, &index) in selected.iter().enumerate() {
            let det = &detections[index];
            boxes[slot] = det.rect();
            class_ids[slot] = self.classes.id_for(&det.label);
            scores[slot] = sanitize_confidence(det.confidence);
        }

        self.publish(DetectionSnapshot {
            count: selected.len(),
            boxes,
            class_ids,
            scores,
            source: Arc::from(detections.to_vec()),
            generation: 0,
        });
    }

    /// Set the count to zero, leaving the array contents as stale padding.
    pub fn clear(&mut self) {
        let mut next = (*self.current).clone();
        next.count = 0;
        next.source = Arc::from(Vec::new());
        self.publish(next);
    }

    /// A consistent snapshot of the current contents.
    pub fn read(&self) -> Arc<DetectionSnapshot> {
        Arc::clone(&self.current)
    }

    fn publish(&mut self, mut next: DetectionSnapshot) {
        next.generation = self.current.generation + 1;
        self.current = Arc::new(next);
    }
}

/// Indices of the `k` highest-confidence detections, best first.
///
/// The sort is stable, so equal confidences keep their original order.
/// Confidences are compared after sanitizing, so NaN ranks as zero.
pub fn select_top_k(detections: &[Detection], k: usize) -> Vec<usize> {
    let keys: Vec<f32> = detections.iter().map(|d| sanitize_confidence(d.confidence)).collect();
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| keys[b].total_cmp(&keys[a]));
    order.truncate(k);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, x: f32) -> Detection {
        Detection::new(label, confidence, x, 0.0, 10.0, 10.0)
    }

    fn many(m: usize) -> Vec<Detection> {
        // Confidences cycle so the large case has plenty of ties.
        (0..m).map(|i| det("obj", ((i * 7) % 10) as f32 / 10.0, i as f32)).collect()
    }

    fn expected_top(detections: &[Detection], k: usize) -> Vec<f32> {
        let mut scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        scores.sort_by(|a, b| b.total_cmp(a));
        scores.truncate(k);
        scores
    }

    #[test]
    fn test_count_is_min_of_input_and_capacity() {
        for m in [0, 1, DEFAULT_CAPACITY, DEFAULT_CAPACITY + 1, 500] {
            let mut buffer = DetectionBuffer::new(DEFAULT_CAPACITY).unwrap();
            let input = many(m);
            buffer.write(&input);
            let snap = buffer.read();

            assert_eq!(snap.count(), m.min(DEFAULT_CAPACITY), "m = {}", m);
            assert_eq!(snap.scores(), expected_top(&input, DEFAULT_CAPACITY).as_slice(), "m = {}", m);
            assert_eq!(snap.boxes().len(), snap.count());
            assert_eq!(snap.class_ids().len(), snap.count());
            assert_eq!(snap.source().len(), m);
        }
    }

    #[test]
    fn test_ties_keep_original_order() {
        let mut buffer = DetectionBuffer::new(2).unwrap();
        buffer.write(&[det("a", 0.5, 1.0), det("b", 0.9, 2.0), det("c", 0.5, 3.0), det("d", 0.5, 4.0)]);
        let snap = buffer.read();
        let xs: Vec<f32> = snap.boxes().iter().map(|b| b[0]).collect();
        assert_eq!(xs, vec![2.0, 1.0]);
    }

    #[test]
    fn test_signed_zero_confidences_tie() {
        let mut buffer = DetectionBuffer::new(1).unwrap();
        buffer.write(&[det("first", -0.0, 1.0), det("second", 0.0, 2.0)]);
        let snap = buffer.read();
        assert_eq!(snap.boxes()[0][0], 1.0);
        assert!(snap.scores()[0].is_sign_positive());
    }

    #[test]
    fn test_nan_written_through_field_ranks_last() {
        let mut nan = det("nan", 0.5, 1.0);
        nan.confidence = f32::NAN;
        let mut buffer = DetectionBuffer::new(1).unwrap();
        buffer.write(&[nan.clone(), det("sure", 1.0, 2.0)]);
        let snap = buffer.read();
        assert_eq!(snap.boxes()[0][0], 2.0);
        assert_eq!(snap.scores(), &[1.0]);

        // Even when kept, the uploaded score is sanitized.
        buffer.write(&[nan]);
        assert_eq!(buffer.read().scores(), &[0.0]);
    }

    #[test]
    fn test_overflow_keeps_highest_confidence() {
        let mut buffer = DetectionBuffer::new(3).unwrap();
        let input = vec![
            det("a", 0.1, 0.0),
            det("b", 0.8, 1.0),
            det("c", 0.3, 2.0),
            det("d", 0.95, 3.0),
            det("e", 0.8, 4.0),
        ];
        buffer.write(&input);
        let snap = buffer.read();
        assert_eq!(snap.scores(), &[0.95, 0.8, 0.8]);
        let xs: Vec<f32> = snap.boxes().iter().map(|b| b[0]).collect();
        assert_eq!(xs, vec![3.0, 1.0, 4.0]);
    }

    #[test]
    fn test_clear_hides_previous_entries() {
        let mut buffer = DetectionBuffer::new(4).unwrap();
        buffer.write(&many(4));
        buffer.clear();
        let snap = buffer.read();

        assert_eq!(snap.count(), 0);
        assert!(snap.boxes().is_empty());
        assert!(snap.scores().is_empty());
        assert!(snap.class_ids().is_empty());
        assert!(snap.source().is_empty());
        assert_eq!(snap.padded_boxes().len(), 4);
    }

    #[test]
    fn test_short_write_leaves_stale_padding_outside_count() {
        let mut buffer = DetectionBuffer::new(4).unwrap();
        buffer.write(&many(4));
        let before = buffer.read();
        buffer.write(&[det("x", 0.99, 42.0)]);
        let after = buffer.read();

        assert_eq!(after.count(), 1);
        assert_eq!(after.boxes()[0][0], 42.0);
        assert_eq!(after.padded_boxes()[1..], before.padded_boxes()[1..]);
    }

    #[test]
    fn test_snapshots_are_not_affected_by_later_writes() {
        let mut buffer = DetectionBuffer::new(4).unwrap();
        buffer.write(&[det("a", 0.7, 1.0), det("b", 0.6, 2.0)]);
        let held = buffer.read();
        buffer.write(&[det("c", 0.9, 9.0)]);
        buffer.clear();

        assert_eq!(held.count(), 2);
        assert_eq!(held.boxes()[0][0], 1.0);
        assert!(buffer.read().generation() > held.generation());
    }

    #[test]
    fn test_class_mapping() {
        let classes: ClassMap = [("person", 1), ("dog", 2)].into_iter().collect();
        let mut buffer = DetectionBuffer::with_classes(4, classes).unwrap();
        buffer.write(&[det("dog", 0.9, 0.0), det("person", 0.8, 0.0), det("kite", 0.7, 0.0)]);
        assert_eq!(buffer.read().class_ids(), &[2, 1, 0]);

        let mut collapsed = DetectionBuffer::new(4).unwrap();
        collapsed.write(&[det("dog", 0.9, 0.0), det("person", 0.8, 0.0)]);
        assert_eq!(collapsed.read().class_ids(), &[0, 0]);
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(DetectionBuffer::new(0).is_err());
        assert!(DetectionBuffer::new(MAX_DETECTIONS + 1).is_err());
        assert_eq!(DetectionBuffer::new(MAX_DETECTIONS).unwrap().capacity(), MAX_DETECTIONS);
    }
}
