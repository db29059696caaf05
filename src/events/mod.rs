//! Lifecycle hooks.
//!
//! User-defined side effects fire at four named points of a run. Hooks never
//! participate in control flow; a handler that panics is the user's problem,
//! a handler that fails silently is fine by design of the seam.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// The four points a hook can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePoint {
    RunStart,
    RunEnd,
    TaskStart,
    TaskEnd,
}

impl LifecyclePoint {
    /// Origin tag delivered with the event payload.
    pub fn origin(self) -> &'static str {
        match self {
            LifecyclePoint::RunStart => "run start",
            LifecyclePoint::RunEnd => "run end",
            LifecyclePoint::TaskStart => "task start",
            LifecyclePoint::TaskEnd => "task end",
        }
    }

    /// Event code carried alongside the origin tag. These are hook event
    /// codes, distinct from task status codes.
    pub fn code(self) -> u16 {
        match self {
            LifecyclePoint::RunStart => 100,
            LifecyclePoint::RunEnd => 101,
            LifecyclePoint::TaskStart => 200,
            LifecyclePoint::TaskEnd => 201,
        }
    }
}

/// Payload handed to every registered hook.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub point: LifecyclePoint,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(point: LifecyclePoint, message: impl Into<String>) -> Self {
        Self {
            point,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Trait implemented by lifecycle hook handlers.
pub trait LifecycleHook: Send + Sync {
    fn handle(&self, event: &LifecycleEvent);
}

/// Broadcasts lifecycle events to registered hooks.
#[derive(Default)]
pub struct HookDispatcher {
    handlers: Vec<Arc<dyn LifecycleHook>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn LifecycleHook>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, point: LifecyclePoint, message: impl Into<String>) {
        let event = LifecycleEvent::new(point, message);
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHook;

impl LifecycleHook for LoggingHook {
    fn handle(&self, event: &LifecycleEvent) {
        log::debug!(
            "[{} #{}] {}",
            event.point.origin(),
            event.point.code(),
            event.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(LifecyclePoint, String)>>);

    impl LifecycleHook for Recorder {
        fn handle(&self, event: &LifecycleEvent) {
            self.0
                .lock()
                .unwrap()
                .push((event.point, event.message.clone()));
        }
    }

    #[test]
    fn dispatches_to_all_handlers() {
        let mut dispatcher = HookDispatcher::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        dispatcher.register_handler(recorder.clone());
        dispatcher.register_handler(Arc::new(LoggingHook));

        dispatcher.dispatch(LifecyclePoint::TaskStart, "task about to run");

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, LifecyclePoint::TaskStart);
    }

    #[test]
    fn points_carry_stable_codes() {
        assert_eq!(LifecyclePoint::RunStart.code(), 100);
        assert_eq!(LifecyclePoint::TaskEnd.code(), 201);
        assert_eq!(LifecyclePoint::TaskStart.origin(), "task start");
    }
}
