//! The self-rescheduling detection loop.
//!
//! `Idle -> Loading -> Requesting -> (apply | skip) -> Scheduled -> Requesting -> ...`
//!
//! The loop runs on the caller's thread and only advances inside [`DetectionLoop::poll`].
//! A cycle's next request is armed on the loop's [`Scheduler`] once the cycle
//! finishes, so the request rate is bounded by the interval no matter how long
//! inference takes. Disabling cancels the armed [`TimerHandle`] and drops any
//! outstanding reply, so nothing from the old session can touch the buffer.

use super::buffer::{ClassMap, DetectionBuffer, DetectionSnapshot, DEFAULT_CAPACITY};
use super::source::{DetectionSource, Pending, Reply};
use super::stats::DetectionStats;
use super::Detection;
use crate::capture::FrameSource;
use crate::error::{DetectionError, SetupError};
use crate::schedule::{Scheduler, TimerHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tunables for the detection loop.
#[derive(Debug, Clone)]
pub struct DetectionLoopConfig {
    /// Delay between the end of one cycle and the next request.
    pub interval: Duration,
    /// Results below this confidence are dropped before top-K selection.
    pub min_confidence: f32,
    pub capacity: usize,
    pub classes: ClassMap,
}

impl Default for DetectionLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            min_confidence: 0.0,
            capacity: DEFAULT_CAPACITY,
            classes: ClassMap::new(),
        }
    }
}

/// Externally visible loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Loading,
    Requesting,
    Scheduled,
}

/// Something that happened during a [`DetectionLoop::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    BackendReady,
    BackendFailed(DetectionError),
    /// Results were written to the buffer.
    Applied { count: usize, latency: Duration },
    /// The cycle failed; the buffer still holds the previous results.
    Failed(DetectionError),
    /// No frame was ready, so no request was made this cycle.
    Skipped,
}

enum LoopState {
    Idle,
    Loading(Pending<Result<(), DetectionError>>),
    Requesting {
        reply: Pending<Result<Vec<Detection>, DetectionError>>,
        started: Instant,
    },
    Scheduled(TimerHandle),
}

pub struct DetectionLoop {
    source: Box<dyn DetectionSource>,
    buffer: DetectionBuffer,
    stats: DetectionStats,
    timers: Scheduler<u64>,
    state: LoopState,
    session: u64,
    config: DetectionLoopConfig,
}

impl DetectionLoop {
    pub fn new(source: Box<dyn DetectionSource>, config: DetectionLoopConfig) -> Result<Self, SetupError> {
        let buffer = DetectionBuffer::with_classes(config.capacity, config.classes.clone())?;
        Ok(Self {
            source,
            buffer,
            stats: DetectionStats::new(),
            timers: Scheduler::new(),
            state: LoopState::Idle,
            session: 0,
            config,
        })
    }

    pub fn phase(&self) -> LoopPhase {
        match self.state {
            LoopState::Idle => LoopPhase::Idle,
            LoopState::Loading(_) => LoopPhase::Loading,
            LoopState::Requesting { .. } => LoopPhase::Requesting,
            LoopState::Scheduled(_) => LoopPhase::Scheduled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state, LoopState::Idle)
    }

    /// Consistent snapshot of the current detections.
    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.buffer.read()
    }

    pub fn stats(&self) -> &DetectionStats {
        &self.stats
    }

    pub fn config(&self) -> &DetectionLoopConfig {
        &self.config
    }

    /// When the loop next needs a poll because of a timer, if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Start a fresh session: reset statistics and load the backend.
    pub fn enable(&mut self) {
        if self.is_enabled() {
            return;
        }
        self.session += 1;
        self.stats.reset();
        self.buffer.clear();
        info!("Detection enabled, loading backend '{}'", self.source.name());
        self.state = LoopState::Loading(self.source.load());
    }

    /// Stop detecting. Safe to call in any state.
    pub fn disable(&mut self) {
        match std::mem::replace(&mut self.state, LoopState::Idle) {
            LoopState::Idle => return,
            LoopState::Scheduled(timer) => {
                self.timers.cancel(timer);
            }
            // Dropping the pending reply makes a late answer a no-op.
            LoopState::Loading(_) | LoopState::Requesting { .. } => {}
        }
        self.timers.clear();
        self.buffer.clear();
        self.source.release();
        info!("Detection disabled");
    }

    pub fn toggle(&mut self) {
        if self.is_enabled() {
            self.disable();
        } else {
            self.enable();
        }
    }

    /// Advance the state machine. Never blocks.
    pub fn poll(&mut self, now: Instant, frames: &mut dyn FrameSource) -> Vec<LoopEvent> {
        let mut events = Vec::new();

        if let LoopState::Loading(reply) = &mut self.state {
            match reply.try_take() {
                Reply::Waiting => {}
                Reply::Ready(Ok(())) => {
                    info!("Detection backend '{}' ready", self.source.name());
                    events.push(LoopEvent::BackendReady);
                    self.issue_request(now, frames, &mut events);
                }
                Reply::Ready(Err(e)) => self.fail_backend(e, &mut events),
                Reply::Abandoned => self.fail_backend(DetectionError::Abandoned, &mut events),
            }
        }

        if let LoopState::Scheduled(armed) = self.state {
            for (handle, session) in self.timers.take_due(now) {
                if handle == armed && session == self.session {
                    self.issue_request(now, frames, &mut events);
                } else {
                    debug!("Ignoring stale detection timer");
                }
            }
        }

        if let LoopState::Requesting { reply, started } = &mut self.state {
            let started = *started;
            match reply.try_take() {
                Reply::Waiting => {}
                Reply::Ready(Ok(detections)) => {
                    let latency = now.saturating_duration_since(started);
                    let count = self.apply(&detections, latency);
                    events.push(LoopEvent::Applied { count, latency });
                    self.schedule_next(now);
                }
                Reply::Ready(Err(e)) => {
                    warn!("Detection cycle failed: {}", e);
                    self.stats.record_failure();
                    events.push(LoopEvent::Failed(e));
                    self.schedule_next(now);
                }
                Reply::Abandoned => {
                    warn!("Detection backend dropped a request");
                    self.stats.record_failure();
                    events.push(LoopEvent::Failed(DetectionError::Abandoned));
                    self.schedule_next(now);
                }
            }
        }

        events
    }

    fn issue_request(&mut self, now: Instant, frames: &mut dyn FrameSource, events: &mut Vec<LoopEvent>) {
        let frame = frames.current_frame().filter(|f| f.is_ready()).cloned();
        match frame {
            Some(frame) => {
                let reply = self.source.detect(frame);
                self.state = LoopState::Requesting { reply, started: now };
            }
            None => {
                debug!("No frame ready for detection, skipping cycle");
                self.stats.record_skip();
                events.push(LoopEvent::Skipped);
                self.schedule_next(now);
            }
        }
    }

    fn apply(&mut self, detections: &[Detection], latency: Duration) -> usize {
        let min = self.config.min_confidence;
        if min > 0.0 {
            let kept: Vec<Detection> = detections.iter().filter(|d| d.confidence >= min).cloned().collect();
            self.buffer.write(&kept);
        } else {
            self.buffer.write(detections);
        }
        self.stats.record_success(latency);
        let count = self.buffer.read().count();
        debug!(
            "[Perf] Detection: {} objects ({} kept) in {:?}, avg {:.1} ms",
            detections.len(),
            count,
            latency,
            self.stats.avg_ms().unwrap_or_default()
        );
        count
    }

    fn schedule_next(&mut self, now: Instant) {
        let timer = self.timers.schedule(now, self.config.interval, self.session);
        self.state = LoopState::Scheduled(timer);
    }

    fn fail_backend(&mut self, error: DetectionError, events: &mut Vec<LoopEvent>) {
        warn!("Detection backend '{}' failed to load: {}", self.source.name(), error);
        self.state = LoopState::Idle;
        self.source.release();
        events.push(LoopEvent::BackendFailed(error));
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.source.release();
    }
}
