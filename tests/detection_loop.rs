use prism::capture::StillImageSource;
use prism::detect::{
    pending, ClassMap, Detection, DetectionLoop, DetectionLoopConfig, DetectionSource, LoopEvent, LoopPhase,
    Pending, Resolver,
};
use prism::error::DetectionError;
use prism::frame::{PixelFormat, VideoFrame};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

type DetectReply = Result<Vec<Detection>, DetectionError>;

/// What the test can observe and answer on behalf of the backend.
#[derive(Default)]
struct Backend {
    loads: Vec<Resolver<Result<(), DetectionError>>>,
    requests: Vec<Resolver<DetectReply>>,
    frame_sizes: Vec<(u32, u32)>,
    releases: usize,
}

/// A detection source answered by hand from the test body.
struct ManualSource(Rc<RefCell<Backend>>);

impl DetectionSource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn load(&mut self) -> Pending<Result<(), DetectionError>> {
        let (resolver, reply) = pending();
        self.0.borrow_mut().loads.push(resolver);
        reply
    }

    fn detect(&mut self, frame: VideoFrame) -> Pending<DetectReply> {
        let (resolver, reply) = pending();
        let mut backend = self.0.borrow_mut();
        backend.frame_sizes.push((frame.width, frame.height));
        backend.requests.push(resolver);
        reply
    }

    fn release(&mut self) {
        self.0.borrow_mut().releases += 1;
    }
}

struct Harness {
    backend: Rc<RefCell<Backend>>,
    detection: DetectionLoop,
    frames: StillImageSource,
    t0: Instant,
}

const INTERVAL: Duration = Duration::from_millis(100);

impl Harness {
    fn new() -> Self {
        Self::with_config(DetectionLoopConfig::default())
    }

    fn with_config(config: DetectionLoopConfig) -> Self {
        let backend = Rc::new(RefCell::new(Backend::default()));
        let detection = DetectionLoop::new(Box::new(ManualSource(backend.clone())), config).unwrap();
        Self {
            backend,
            detection,
            frames: StillImageSource::from_frame(VideoFrame::new(64, 48, PixelFormat::Rgb)),
            t0: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn poll(&mut self, ms: u64) -> Vec<LoopEvent> {
        let now = self.at(ms);
        self.detection.poll(now, &mut self.frames)
    }

    fn finish_load(&self, result: Result<(), DetectionError>) -> bool {
        let resolver = self.backend.borrow_mut().loads.pop().expect("no load outstanding");
        resolver.resolve(result)
    }

    fn answer(&self, result: DetectReply) -> bool {
        let resolver = self.backend.borrow_mut().requests.pop().expect("no request outstanding");
        resolver.resolve(result)
    }

    fn requests_made(&self) -> usize {
        self.backend.borrow().frame_sizes.len()
    }

    /// Enable and get through loading so the first request is in flight.
    fn start(&mut self) {
        self.detection.enable();
        assert!(self.finish_load(Ok(())));
        let events = self.poll(0);
        assert_eq!(events, vec![LoopEvent::BackendReady]);
        assert_eq!(self.detection.phase(), LoopPhase::Requesting);
    }
}

fn people(n: usize) -> Vec<Detection> {
    (0..n)
        .map(|i| Detection::new("person", 0.5 + i as f32 * 0.01, i as f32, 0.0, 10.0, 10.0))
        .collect()
}

#[test]
fn test_cycle_applies_then_waits_for_interval() {
    let mut h = Harness::new();
    assert_eq!(h.detection.phase(), LoopPhase::Idle);
    h.start();
    assert_eq!(h.backend.borrow().frame_sizes, vec![(64, 48)]);

    assert!(h.answer(Ok(people(3))));
    let events = h.poll(30);
    assert!(matches!(events.as_slice(), [LoopEvent::Applied { count: 3, .. }]));
    assert_eq!(h.detection.snapshot().count(), 3);
    assert_eq!(h.detection.phase(), LoopPhase::Scheduled);
    assert_eq!(h.detection.stats().cycles(), 1);
    assert_eq!(h.detection.next_deadline(), Some(h.at(130)));

    // The interval counts from the end of the cycle, not from the request.
    assert!(h.poll(129).is_empty());
    assert_eq!(h.requests_made(), 1);
    h.poll(130);
    assert_eq!(h.requests_made(), 2);
    assert_eq!(h.detection.phase(), LoopPhase::Requesting);
}

#[test]
fn test_never_more_than_one_request_in_flight() {
    let mut h = Harness::new();
    h.start();
    for ms in [100, 500, 5_000] {
        assert!(h.poll(ms).is_empty());
    }
    assert_eq!(h.requests_made(), 1);
    assert_eq!(h.detection.next_deadline(), None);
}

#[test]
fn test_failure_keeps_previous_results() {
    let mut h = Harness::new();
    h.start();
    h.answer(Ok(people(2)));
    h.poll(10);
    let before = h.detection.snapshot();

    h.poll(110);
    h.answer(Err(DetectionError::Inference("gpu fell over".into())));
    let events = h.poll(120);
    assert_eq!(
        events,
        vec![LoopEvent::Failed(DetectionError::Inference("gpu fell over".into()))]
    );

    let after = h.detection.snapshot();
    assert_eq!(after.count(), 2);
    assert_eq!(after.boxes(), before.boxes());
    assert_eq!(h.detection.stats().failures(), 1);
    assert_eq!(h.detection.phase(), LoopPhase::Scheduled);

    h.poll(220);
    assert_eq!(h.requests_made(), 3);
}

#[test]
fn test_dropped_reply_counts_as_failure() {
    let mut h = Harness::new();
    h.start();
    drop(h.backend.borrow_mut().requests.pop());
    let events = h.poll(5);
    assert_eq!(events, vec![LoopEvent::Failed(DetectionError::Abandoned)]);
    assert_eq!(h.detection.stats().failures(), 1);
    assert_eq!(h.detection.phase(), LoopPhase::Scheduled);
}

#[test]
fn test_missing_frame_skips_cycle() {
    let mut h = Harness::new();
    h.frames.set_frame(None);
    h.detection.enable();
    h.finish_load(Ok(()));
    let events = h.poll(0);
    assert_eq!(events, vec![LoopEvent::BackendReady, LoopEvent::Skipped]);
    assert_eq!(h.requests_made(), 0);
    assert_eq!(h.detection.stats().skipped(), 1);
    assert_eq!(h.detection.phase(), LoopPhase::Scheduled);

    // A zero-sized frame is not ready either.
    h.frames.set_frame(Some(VideoFrame::new(0, 48, PixelFormat::Rgb)));
    assert_eq!(h.poll(100), vec![LoopEvent::Skipped]);

    h.frames.set_frame(Some(VideoFrame::new(32, 32, PixelFormat::Rgba)));
    h.poll(200);
    assert_eq!(h.backend.borrow().frame_sizes, vec![(32, 32)]);
}

#[test]
fn test_disable_mid_request_ignores_late_reply() {
    let mut h = Harness::new();
    h.start();
    h.detection.disable();
    assert_eq!(h.detection.phase(), LoopPhase::Idle);
    assert_eq!(h.backend.borrow().releases, 1);

    // Nobody is listening anymore.
    assert!(!h.answer(Ok(people(5))));
    assert!(h.poll(50).is_empty());
    assert_eq!(h.detection.snapshot().count(), 0);
    assert_eq!(h.detection.stats().cycles(), 0);
}

#[test]
fn test_disable_while_scheduled_cancels_timer() {
    let mut h = Harness::new();
    h.start();
    h.answer(Ok(people(4)));
    h.poll(10);
    assert_eq!(h.detection.phase(), LoopPhase::Scheduled);

    h.detection.disable();
    assert_eq!(h.detection.next_deadline(), None);
    assert_eq!(h.detection.snapshot().count(), 0);
    assert!(h.poll(1_000).is_empty());
    assert_eq!(h.requests_made(), 1);
}

#[test]
fn test_disable_is_idempotent_and_safe_while_loading() {
    let mut h = Harness::new();
    h.detection.disable();
    assert_eq!(h.backend.borrow().releases, 0);

    h.detection.enable();
    assert_eq!(h.detection.phase(), LoopPhase::Loading);
    h.detection.disable();
    h.detection.disable();
    assert_eq!(h.backend.borrow().releases, 1);

    assert!(!h.finish_load(Ok(())));
    assert!(h.poll(10).is_empty());
    assert_eq!(h.requests_made(), 0);
}

#[test]
fn test_reenable_starts_fresh() {
    let mut h = Harness::new();
    h.start();
    h.answer(Ok(people(3)));
    h.poll(40);
    assert!(h.detection.stats().avg_ms().is_some());

    h.detection.disable();
    h.detection.enable();
    assert_eq!(h.detection.snapshot().count(), 0);
    assert_eq!(h.detection.stats().cycles(), 0);
    assert_eq!(h.detection.stats().avg_ms(), None);

    // The timer armed by the first session must not fire into the second.
    assert!(h.poll(140).is_empty());
    assert_eq!(h.requests_made(), 1);
    assert_eq!(h.detection.phase(), LoopPhase::Loading);
}

#[test]
fn test_toggle_flips_state() {
    let mut h = Harness::new();
    h.detection.toggle();
    assert!(h.detection.is_enabled());
    h.detection.toggle();
    assert!(!h.detection.is_enabled());
}

#[test]
fn test_backend_load_failure_returns_to_idle() {
    let mut h = Harness::new();
    h.detection.enable();
    h.finish_load(Err(DetectionError::Load("no model".into())));
    let events = h.poll(0);
    assert_eq!(events, vec![LoopEvent::BackendFailed(DetectionError::Load("no model".into()))]);
    assert_eq!(h.detection.phase(), LoopPhase::Idle);
    assert_eq!(h.backend.borrow().releases, 1);

    // A later enable retries.
    h.start();
}

#[test]
fn test_min_confidence_and_capacity_applied() {
    let mut classes = ClassMap::new();
    classes.insert("cat", 3);
    let mut h = Harness::with_config(DetectionLoopConfig {
        interval: INTERVAL,
        min_confidence: 0.5,
        capacity: 2,
        classes,
    });
    h.start();
    h.answer(Ok(vec![
        Detection::new("person", 0.45, 0.0, 0.0, 1.0, 1.0),
        Detection::new("cat", 0.6, 1.0, 0.0, 1.0, 1.0),
        Detection::new("person", 0.9, 2.0, 0.0, 1.0, 1.0),
        Detection::new("cat", 0.7, 3.0, 0.0, 1.0, 1.0),
    ]));
    let events = h.poll(10);
    assert!(matches!(events.as_slice(), [LoopEvent::Applied { count: 2, .. }]));

    let snapshot = h.detection.snapshot();
    assert_eq!(snapshot.scores(), &[0.9, 0.7]);
    assert_eq!(snapshot.class_ids(), &[0, 3]);
    assert_eq!(snapshot.source().len(), 3);
}
