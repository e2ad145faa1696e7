//! Progress notifications emitted during a task run.
//!
//! Three independent fire-and-forget signals (percent, phase, info)
//! plus a terminal event per task. None of them participate in the
//! correctness contract; a reporter that drops events on the floor is
//! a valid reporter.

/// Events emitted by the pipeline while a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Numeric completion of the current phase, 0–100.
    Percent(u8),
    /// Short "current phase" label.
    Phase(String),
    /// Informational detail, typically one line per processed item.
    Info(String),
    Completed {
        task_name: String,
        volume: String,
    },
    Failed {
        task_name: String,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and headless runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Collects every event; test helper for asserting emission order.
#[derive(Default)]
pub struct CollectingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter_keeps_order() {
        let progress = CollectingProgress::new();
        progress.report(ProgressEvent::Phase("classify".to_string()));
        progress.report(ProgressEvent::Percent(50));
        progress.report(ProgressEvent::Percent(100));

        let events = progress.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ProgressEvent::Phase("classify".to_string()));
        assert_eq!(events[2], ProgressEvent::Percent(100));
    }

    #[test]
    fn test_noop_reporter_accepts_everything() {
        NoopProgress.report(ProgressEvent::Completed {
            task_name: "T".to_string(),
            volume: "E".to_string(),
        });
    }
}
