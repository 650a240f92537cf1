//! The pipeline event bus.
//!
//! A thread-safe observer registry with copy-on-write list semantics:
//! emission clones an `Arc` to the current observer list and never holds the
//! lock while calling out, so observers cannot serialise emitters.
//! Panicking observers are caught and logged, never rethrown.

use crate::diagnostics::Diagnostic;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Everything the pipeline reports while it runs.
#[derive(Debug, Clone)]
pub enum CompilationEvent {
    PipelineStarted {
        stages: usize,
    },
    PipelineCompleted {
        success: bool,
    },
    StageStarted {
        name: String,
    },
    StageCompleted {
        name: String,
    },
    ValidationNote {
        message: String,
    },
    DependencyNote {
        message: String,
    },
    PackageDiscovered {
        name: String,
        source_count: usize,
    },
    PackageCompilationStarted {
        name: String,
    },
    PackageCompilationCompleted {
        name: String,
        artifact: PathBuf,
        diagnostics: Vec<Diagnostic>,
    },
    CompilationError {
        diagnostic: Diagnostic,
    },
    CompilationWarning {
        diagnostic: Diagnostic,
    },
    /// Verbatim compiler output line
    RawOutput {
        line: String,
        is_stderr: bool,
    },
    Progress {
        message: String,
    },
    /// Incremental change-detection outcome for one package
    ChangeDetection {
        package: String,
        change: String,
    },
    CacheNote {
        message: String,
    },
}

/// Implemented by anything that wants to watch a build.
///
/// Observers are externally owned; the bus only holds references. They must
/// not block: emission is synchronous to the caller.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &CompilationEvent);
}

/// Thread-safe observer registry.
pub struct EventBus {
    observers: Mutex<Arc<Vec<Arc<dyn EventObserver>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Register an observer.
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        let mut guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (**guard).clone();
        next.push(observer);
        *guard = Arc::new(next);
    }

    /// Emit an event to every observer, best-effort.
    pub fn emit(&self, event: CompilationEvent) {
        let observers = {
            let guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(&guard)
        };
        for observer in observers.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_event(&event)
            }));
            if result.is_err() {
                tracing::warn!("event observer panicked; suppressed");
            }
        }
    }
}

/// Observer that records every event, for tests and reports.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<CompilationEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CompilationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventObserver for CollectingObserver {
    fn on_event(&self, event: &CompilationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_all_observers() {
        let bus = EventBus::new();
        let a = Arc::new(CollectingObserver::new());
        let b = Arc::new(CollectingObserver::new());
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.emit(CompilationEvent::Progress {
            message: "hello".to_string(),
        });

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn panicking_observer_is_suppressed() {
        struct Bomb;
        impl EventObserver for Bomb {
            fn on_event(&self, _event: &CompilationEvent) {
                panic!("boom");
            }
        }

        let bus = EventBus::new();
        let collector = Arc::new(CollectingObserver::new());
        bus.subscribe(Arc::new(Bomb));
        bus.subscribe(collector.clone());

        // does not unwind, and later observers still run
        bus.emit(CompilationEvent::PipelineCompleted { success: true });
        assert_eq!(collector.events().len(), 1);
    }

    #[test]
    fn subscribing_during_a_long_emission_is_safe() {
        // copy-on-write: emission iterates a snapshot
        let bus = EventBus::new();
        let collector = Arc::new(CollectingObserver::new());
        bus.subscribe(collector.clone());
        bus.emit(CompilationEvent::Progress {
            message: "one".to_string(),
        });
        bus.subscribe(Arc::new(CollectingObserver::new()));
        bus.emit(CompilationEvent::Progress {
            message: "two".to_string(),
        });
        assert_eq!(collector.events().len(), 2);
    }
}
