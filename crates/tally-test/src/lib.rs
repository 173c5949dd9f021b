//! Tally Test: verifying code that drives the lifecycle
//!
//! `ResultsWriterStub` is a sink that keeps everything in memory, so an
//! adapter's behaviour can be checked by running it against a fresh engine
//! and looking at the results that came out.
//!
//! # Example
//!
//! ```
//! use tally_core::{ContextKey, TestData};
//! use tally_test::run_with_lifecycle;
//!
//! let results = run_with_lifecycle(|lifecycle| {
//!     let ctx = ContextKey::fresh();
//!     lifecycle.start_test(&ctx, None, TestData::new("t1"));
//!     lifecycle.stop_test(&ctx);
//! });
//!
//! assert_eq!(results.test_results().len(), 1);
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::{Lifecycle, LifecycleConfig, ResultSink, SinkError};
use tally_model::{TestResult, TestResultContainer};
use tracing::debug;

#[derive(Default)]
struct Written {
    tests: Vec<TestResult>,
    containers: Vec<TestResultContainer>,
    attachments: HashMap<String, Vec<u8>>,
}

/// In-memory results writer. A second write with an id already seen
/// replaces the first instead of adding a duplicate.
#[derive(Default)]
pub struct ResultsWriterStub {
    written: Mutex<Written>,
}

impl ResultsWriterStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tests in the order they were first written
    pub fn test_results(&self) -> Vec<TestResult> {
        self.written.lock().tests.clone()
    }

    pub fn containers(&self) -> Vec<TestResultContainer> {
        self.written.lock().containers.clone()
    }

    pub fn find_by_name(&self, name: &str) -> Option<TestResult> {
        self.written
            .lock()
            .tests
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Body written for an attachment source key
    pub fn attachment(&self, source: &str) -> Option<Vec<u8>> {
        self.written.lock().attachments.get(source).cloned()
    }

    pub fn attachment_count(&self) -> usize {
        self.written.lock().attachments.len()
    }
}

impl ResultSink for ResultsWriterStub {
    fn write_test(&self, result: TestResult) -> Result<(), SinkError> {
        let mut written = self.written.lock();
        match written.tests.iter_mut().find(|t| t.uuid == result.uuid) {
            Some(existing) => {
                debug!(uuid = %result.uuid, "duplicate test result replaced");
                *existing = result;
            }
            None => written.tests.push(result),
        }
        Ok(())
    }

    fn write_container(&self, container: TestResultContainer) -> Result<(), SinkError> {
        let mut written = self.written.lock();
        match written.containers.iter_mut().find(|c| c.uuid == container.uuid) {
            Some(existing) => *existing = container,
            None => written.containers.push(container),
        }
        Ok(())
    }

    fn write_attachment(&self, source: &str, body: &[u8]) -> Result<(), SinkError> {
        self.written
            .lock()
            .attachments
            .insert(source.to_string(), body.to_vec());
        Ok(())
    }
}

/// Route engine logs to the test output, filtered by `RUST_LOG`.
/// Calling it again once a subscriber is installed does nothing.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `body` against a fresh engine and return everything it wrote
pub fn run_with_lifecycle(body: impl FnOnce(&Lifecycle)) -> Arc<ResultsWriterStub> {
    run_with_config(LifecycleConfig::default(), body)
}

pub fn run_with_config(
    config: LifecycleConfig,
    body: impl FnOnce(&Lifecycle),
) -> Arc<ResultsWriterStub> {
    init_tracing();
    let results = Arc::new(ResultsWriterStub::new());
    let lifecycle = Lifecycle::builder(results.clone()).config(config).build();
    body(&lifecycle);
    results
}
