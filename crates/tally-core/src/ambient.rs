//! Thread-keyed access to a shared engine
//!
//! The engine itself always takes an explicit `ContextKey`. Adapters that
//! sit on top of a test runtime with one test per thread use
//! `ThreadLifecycle`, which derives the key from the calling thread.
use crate::context::ContextKey;
use crate::data::{StepData, TestData};
use crate::id::NodeId;
use crate::lifecycle::Lifecycle;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tally_model::{Link, Status, StatusDetails};

impl Lifecycle {
    /// Run `body` inside a step on `ctx`.
    ///
    /// `Ok` passes the step, `Err` marks it broken, and a panic (a failed
    /// assertion) marks it failed before the panic continues.
    pub fn run_step<T, E, F>(&self, ctx: &ContextKey, data: impl Into<StepData>, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let id = self.start_step(ctx, data);
        let outcome = panic::catch_unwind(AssertUnwindSafe(body));

        if let Some(id) = &id {
            let (status, details) = match &outcome {
                Ok(Ok(_)) => (Status::Passed, None),
                Ok(Err(err)) => (Status::Broken, Some(StatusDetails::new().with_message(err.to_string()))),
                Err(payload) => (
                    Status::Failed,
                    Some(StatusDetails::new().with_message(panic_message(payload.as_ref()))),
                ),
            };
            self.set_status_of(id, status, details);
            self.stop_step_by_id(ctx, id);
        }

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "step panicked".to_string()
    }
}

/// A shared engine bound to whichever thread calls it
#[derive(Clone)]
pub struct ThreadLifecycle {
    lifecycle: Arc<Lifecycle>,
}

impl ThreadLifecycle {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Context key of the calling thread
    pub fn context(&self) -> ContextKey {
        ContextKey::current_thread()
    }

    pub fn start_test(&self, container: Option<&NodeId>, data: TestData) -> Option<NodeId> {
        self.lifecycle.start_test(&self.context(), container, data)
    }

    pub fn stop_test(&self) -> Option<NodeId> {
        self.lifecycle.stop_test(&self.context())
    }

    pub fn start_step(&self, data: impl Into<StepData>) -> Option<NodeId> {
        self.lifecycle.start_step(&self.context(), data)
    }

    pub fn stop_step(&self) -> Option<NodeId> {
        self.lifecycle.stop_step(&self.context())
    }

    pub fn step<T, E, F>(&self, data: impl Into<StepData>, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        self.lifecycle.run_step(&self.context(), data, body)
    }

    pub fn set_status(&self, status: Status, details: Option<StatusDetails>) -> bool {
        self.lifecycle.set_status(&self.context(), status, details)
    }

    pub fn add_parameter(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.lifecycle.add_parameter(&self.context(), name, value)
    }

    pub fn add_label(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.lifecycle.add_label(&self.context(), name, value)
    }

    pub fn add_link(&self, link: Link) -> bool {
        self.lifecycle.add_link(&self.context(), link)
    }

    pub fn add_attachment(
        &self,
        name: &str,
        content_type: Option<&str>,
        extension: Option<&str>,
        body: &[u8],
    ) -> Option<String> {
        self.lifecycle
            .add_attachment(&self.context(), name, content_type, extension, body)
    }

    /// Record this thread's events under `id`, started elsewhere
    pub fn attach(&self, id: &NodeId) -> bool {
        self.lifecycle.attach_context(&self.context(), id)
    }

    pub fn detach(&self) -> Option<NodeId> {
        self.lifecycle.detach_context(&self.context())
    }

    pub fn current_test(&self) -> Option<NodeId> {
        self.lifecycle.current_test(&self.context())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sink::ResultSink;
    use parking_lot::Mutex;
    use tally_model::{TestResult, TestResultContainer};

    #[derive(Default)]
    struct Collect(Mutex<Vec<TestResult>>);

    impl ResultSink for Collect {
        fn write_test(&self, result: TestResult) -> Result<(), SinkError> {
            self.0.lock().push(result);
            Ok(())
        }

        fn write_container(&self, _container: TestResultContainer) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn ambient() -> (ThreadLifecycle, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        let lifecycle = Arc::new(Lifecycle::new(sink.clone()));
        (ThreadLifecycle::new(lifecycle), sink)
    }

    #[test]
    fn test_step_outcomes() {
        let (ambient, sink) = ambient();
        ambient.start_test(None, TestData::new("outcomes"));

        let ok: Result<u32, String> = ambient.step("ok", || Ok(1));
        assert_eq!(ok, Ok(1));

        let err: Result<u32, String> = ambient.step("err", || Err("no route".to_string()));
        assert!(err.is_err());

        let panicked = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), String> = ambient.step("panics", || panic!("expected 2, got 3"));
        }));
        assert!(panicked.is_err());

        ambient.stop_test();

        let tests = sink.0.lock();
        let steps = &tests[0].steps;
        assert_eq!(tests[0].step_names(), vec!["ok", "err", "panics"]);
        assert_eq!(steps[0].status, Status::Passed);
        assert_eq!(steps[1].status, Status::Broken);
        assert_eq!(
            steps[1].status_details.as_ref().and_then(|d| d.message.as_deref()),
            Some("no route")
        );
        assert_eq!(steps[2].status, Status::Failed);
        assert_eq!(
            steps[2].status_details.as_ref().and_then(|d| d.message.as_deref()),
            Some("expected 2, got 3")
        );
    }

    #[test]
    fn test_threads_have_separate_contexts() {
        let (ambient, sink) = ambient();

        std::thread::scope(|scope| {
            for n in 0..4 {
                let ambient = ambient.clone();
                scope.spawn(move || {
                    ambient.start_test(None, TestData::new(format!("t{}", n)));
                    ambient.start_step(format!("t{}-step", n));
                    ambient.stop_step();
                    ambient.stop_test();
                });
            }
        });

        let tests = sink.0.lock();
        assert_eq!(tests.len(), 4);
        for test in tests.iter() {
            assert_eq!(test.step_names(), vec![format!("{}-step", test.name)]);
        }
    }
}
