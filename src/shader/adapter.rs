//! Translate detection snapshots into the detection uniform block.

use super::compile::ProgramBindings;
use super::uniforms::DetectionUniforms;
use crate::detect::DetectionSnapshot;
use serde::{Deserialize, Serialize};

/// Destination of the detection block bytes.
pub trait UniformSink {
    fn write_detections(&mut self, offset: u64, bytes: &[u8]);
}

/// Everything an adapter may look at while drawing one frame.
pub struct AdapterContext<'a> {
    pub sink: &'a mut dyn UniformSink,
    pub bindings: ProgramBindings,
    pub snapshot: &'a DetectionSnapshot,
    pub resolution: [f32; 2],
    pub source_size: [f32; 2],
}

/// Maps the current snapshot onto the active program's uniforms once per frame.
pub trait UniformAdapter {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &mut AdapterContext<'_>);
}

/// Which adapter the renderer uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Boxes in source-frame pixels.
    #[default]
    Default,
    /// Boxes in normalized source UV coordinates.
    Normalized,
}

impl AdapterKind {
    pub fn build(self) -> Box<dyn UniformAdapter> {
        match self {
            AdapterKind::Default => Box::new(DefaultAdapter),
            AdapterKind::Normalized => Box::new(NormalizedAdapter),
        }
    }
}

/// Writes only the count when nothing is detected, the whole block otherwise.
fn upload(sink: &mut dyn UniformSink, block: &DetectionUniforms) {
    if block.count == 0 {
        sink.write_detections(0, bytemuck::bytes_of(&block.count));
    } else {
        sink.write_detections(0, bytemuck::bytes_of(block));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapter;

impl UniformAdapter for DefaultAdapter {
    fn name(&self) -> &'static str {
        "default"
    }

    fn apply(&self, ctx: &mut AdapterContext<'_>) {
        if !ctx.bindings.detections {
            return;
        }
        let block = DetectionUniforms::from_snapshot(ctx.snapshot, |rect| rect);
        upload(ctx.sink, &block);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizedAdapter;

impl UniformAdapter for NormalizedAdapter {
    fn name(&self) -> &'static str {
        "normalized"
    }

    fn apply(&self, ctx: &mut AdapterContext<'_>) {
        if !ctx.bindings.detections {
            return;
        }
        let [sw, sh] = ctx.source_size;
        let block = DetectionUniforms::from_snapshot(ctx.snapshot, |[x, y, w, h]| {
            if sw > 0.0 && sh > 0.0 {
                [x / sw, y / sh, w / sw, h / sh]
            } else {
                [x, y, w, h]
            }
        });
        upload(ctx.sink, &block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, DetectionBuffer};

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(u64, Vec<u8>)>,
    }

    impl UniformSink for RecordingSink {
        fn write_detections(&mut self, offset: u64, bytes: &[u8]) {
            self.writes.push((offset, bytes.to_vec()));
        }
    }

    fn with_detections() -> ProgramBindings {
        ProgramBindings {
            detections: true,
            ..Default::default()
        }
    }

    fn run(adapter: &dyn UniformAdapter, bindings: ProgramBindings, snapshot: &DetectionSnapshot) -> RecordingSink {
        let mut sink = RecordingSink::default();
        let mut ctx = AdapterContext {
            sink: &mut sink,
            bindings,
            snapshot,
            resolution: [640.0, 480.0],
            source_size: [200.0, 100.0],
        };
        adapter.apply(&mut ctx);
        sink
    }

    fn decode(bytes: &[u8]) -> DetectionUniforms {
        bytemuck::pod_read_unaligned(bytes)
    }

    #[test]
    fn test_empty_snapshot_writes_count_only() {
        let buffer = DetectionBuffer::new(16).unwrap();
        let sink = run(&DefaultAdapter, with_detections(), &buffer.read());
        assert_eq!(sink.writes, vec![(0, 0i32.to_ne_bytes().to_vec())]);
    }

    #[test]
    fn test_full_block_written_when_detections_present() {
        let mut buffer = DetectionBuffer::new(16).unwrap();
        buffer.write(&[
            Detection::new("person", 0.4, 10.0, 20.0, 30.0, 40.0),
            Detection::new("cup", 0.9, 1.0, 2.0, 3.0, 4.0),
        ]);
        let sink = run(&DefaultAdapter, with_detections(), &buffer.read());
        assert_eq!(sink.writes.len(), 1);
        let (offset, bytes) = &sink.writes[0];
        assert_eq!(*offset, 0);
        assert_eq!(bytes.len(), std::mem::size_of::<DetectionUniforms>());

        let block = decode(bytes);
        assert_eq!(block.count, 2);
        assert_eq!(block.boxes[0], [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(block.boxes[1], [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(block.scores[0][0], 0.9);
        assert_eq!(block.class_ids[1][0], 0);
    }

    #[test]
    fn test_skips_programs_without_detection_block() {
        let mut buffer = DetectionBuffer::new(16).unwrap();
        buffer.write(&[Detection::new("person", 0.4, 10.0, 20.0, 30.0, 40.0)]);
        let bindings = ProgramBindings {
            video: true,
            sampler: true,
            frame_uniforms: true,
            detections: false,
        };
        assert!(run(&DefaultAdapter, bindings, &buffer.read()).writes.is_empty());
        assert!(run(&NormalizedAdapter, bindings, &buffer.read()).writes.is_empty());
    }

    #[test]
    fn test_normalized_boxes() {
        let mut buffer = DetectionBuffer::new(4).unwrap();
        buffer.write(&[Detection::new("person", 0.5, 50.0, 25.0, 100.0, 50.0)]);
        let sink = run(&NormalizedAdapter, with_detections(), &buffer.read());
        let block = decode(&sink.writes[0].1);
        assert_eq!(block.boxes[0], [0.25, 0.25, 0.5, 0.5]);
    }

    #[test]
    fn test_adapter_kind_builds_named_adapter() {
        assert_eq!(AdapterKind::Default.build().name(), "default");
        assert_eq!(AdapterKind::Normalized.build().name(), "normalized");
        let kind: AdapterKind = serde_yaml::from_str("normalized").unwrap();
        assert_eq!(kind, AdapterKind::Normalized);
    }
}
