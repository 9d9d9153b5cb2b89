//! Human-readable status reporting.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// Receives short status lines such as compile timings or detection latency.
pub trait StatusSink {
    fn status(&self, kind: StatusKind, message: &str);
}

/// Forwards status lines to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn status(&self, kind: StatusKind, message: &str) {
        match kind {
            StatusKind::Info => info!(target: "prism::status", "{}", message),
            StatusKind::Success => info!(target: "prism::status", "OK: {}", message),
            StatusKind::Error => error!(target: "prism::status", "{}", message),
        }
    }
}

/// Report through an optional sink; a missing sink is a no-op.
pub fn report(sink: Option<&dyn StatusSink>, kind: StatusKind, message: &str) {
    match sink {
        Some(sink) => sink.status(kind, message),
        None if kind == StatusKind::Error => warn!("{}", message),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Collect(RefCell<Vec<(StatusKind, String)>>);

    impl StatusSink for Collect {
        fn status(&self, kind: StatusKind, message: &str) {
            self.0.borrow_mut().push((kind, message.to_string()));
        }
    }

    #[test]
    fn test_report_routes_to_sink() {
        let sink = Collect::default();
        report(Some(&sink), StatusKind::Success, "compiled in 3ms");
        report(None, StatusKind::Error, "ignored");
        assert_eq!(
            sink.0.into_inner(),
            vec![(StatusKind::Success, "compiled in 3ms".to_string())]
        );
    }
}
