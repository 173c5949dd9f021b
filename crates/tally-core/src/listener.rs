//! Lifecycle listeners
//!
//! Adapters observe transitions without the engine knowing about them.
//! `before_*` hooks on start and stop may change the result; the rest only
//! look. Hooks run while the node's lock is held, so a listener must not
//! call back into the engine for the node it is being told about.
use std::sync::Arc;
use tally_model::{FixtureResult, StepResult, TestResult, TestResultContainer};

#[allow(unused_variables)]
pub trait LifecycleListener: Send + Sync {
    fn before_test_schedule(&self, result: &mut TestResult) {}
    fn after_test_schedule(&self, result: &TestResult) {}
    fn before_test_start(&self, result: &mut TestResult) {}
    fn after_test_start(&self, result: &TestResult) {}
    fn before_test_update(&self, result: &TestResult) {}
    fn after_test_update(&self, result: &TestResult) {}
    fn before_test_stop(&self, result: &mut TestResult) {}
    fn after_test_stop(&self, result: &TestResult) {}
    fn before_test_write(&self, result: &TestResult) {}
    fn after_test_write(&self, result: &TestResult) {}

    fn before_step_start(&self, result: &mut StepResult) {}
    fn after_step_start(&self, result: &StepResult) {}
    fn before_step_update(&self, result: &StepResult) {}
    fn after_step_update(&self, result: &StepResult) {}
    fn before_step_stop(&self, result: &mut StepResult) {}
    fn after_step_stop(&self, result: &StepResult) {}

    fn before_fixture_start(&self, result: &mut FixtureResult) {}
    fn after_fixture_start(&self, result: &FixtureResult) {}
    fn before_fixture_stop(&self, result: &mut FixtureResult) {}
    fn after_fixture_stop(&self, result: &FixtureResult) {}

    fn before_container_start(&self, container: &mut TestResultContainer) {}
    fn after_container_start(&self, container: &TestResultContainer) {}
    fn before_container_update(&self, container: &TestResultContainer) {}
    fn after_container_update(&self, container: &TestResultContainer) {}
    fn before_container_stop(&self, container: &mut TestResultContainer) {}
    fn after_container_stop(&self, container: &TestResultContainer) {}
    fn before_container_write(&self, container: &TestResultContainer) {}
    fn after_container_write(&self, container: &TestResultContainer) {}
}

/// Listeners in registration order. Fixed once the engine is built.
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke `hook` on every listener
    pub fn notify(&self, mut hook: impl FnMut(&dyn LifecycleListener)) {
        for listener in &self.listeners {
            hook(listener.as_ref());
        }
    }
}
