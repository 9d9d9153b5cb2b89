//! The detection backend boundary and the one-shot reply channel it answers on.

use super::Detection;
use crate::error::DetectionError;
use crate::frame::VideoFrame;
use std::sync::mpsc::{self, TryRecvError};

/// State of a [`Pending`] reply when polled.
#[derive(Debug, PartialEq)]
pub enum Reply<T> {
    Ready(T),
    Waiting,
    /// The producer was dropped without answering.
    Abandoned,
}

/// Receiving half of a one-shot reply. Dropping it turns a late answer into a no-op.
pub struct Pending<T> {
    rx: mpsc::Receiver<T>,
}

/// Sending half of a one-shot reply; safe to move to a worker thread.
pub struct Resolver<T> {
    tx: mpsc::Sender<T>,
}

/// Create a connected resolver/pending pair.
pub fn pending<T>() -> (Resolver<T>, Pending<T>) {
    let (tx, rx) = mpsc::channel();
    (Resolver { tx }, Pending { rx })
}

impl<T> Pending<T> {
    /// An already-answered reply, for synchronous producers.
    pub fn ready(value: T) -> Self {
        let (resolver, pending) = pending();
        resolver.resolve(value);
        pending
    }

    /// Non-blocking poll.
    pub fn try_take(&mut self) -> Reply<T> {
        match self.rx.try_recv() {
            Ok(value) => Reply::Ready(value),
            Err(TryRecvError::Empty) => Reply::Waiting,
            Err(TryRecvError::Disconnected) => Reply::Abandoned,
        }
    }
}

impl<T> Resolver<T> {
    /// Deliver the answer. Returns false if the receiver is gone.
    pub fn resolve(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }
}

/// An asynchronous object detector.
///
/// Calls are made from the main thread; implementations do the heavy work
/// elsewhere and answer through the returned [`Pending`]. The detection loop
/// never has more than one `detect` call outstanding.
pub trait DetectionSource {
    /// Backend identifier for logs.
    fn name(&self) -> &str;

    /// Start (or restart) the backend. Resolves once it can accept frames.
    fn load(&mut self) -> Pending<Result<(), DetectionError>>;

    /// Detect objects in `frame`.
    fn detect(&mut self, frame: VideoFrame) -> Pending<Result<Vec<Detection>, DetectionError>>;

    /// Free the backend. Outstanding replies may still arrive and must be ignored.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_states() {
        let (resolver, mut reply) = pending::<u32>();
        assert_eq!(reply.try_take(), Reply::Waiting);
        assert!(resolver.resolve(7));
        assert_eq!(reply.try_take(), Reply::Ready(7));

        let (resolver, mut reply) = pending::<u32>();
        drop(resolver);
        assert_eq!(reply.try_take(), Reply::Abandoned);

        assert_eq!(Pending::ready(3).try_take(), Reply::Ready(3));
    }

    #[test]
    fn test_resolving_into_dropped_pending_is_harmless() {
        let (resolver, reply) = pending::<u32>();
        drop(reply);
        assert!(!resolver.resolve(1));
    }
}
