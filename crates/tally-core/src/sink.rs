//! Result sinks: where finished results go
//!
//! The engine calls `write_test` / `write_container` exactly once per
//! finalized node and never looks at what the sink does with it. Sinks are
//! shared by every context, so they must be safe to call concurrently and
//! should not block the caller for long.
use crate::error::SinkError;
use std::sync::Arc;
use tally_model::{TestResult, TestResultContainer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub trait ResultSink: Send + Sync {
    fn write_test(&self, result: TestResult) -> Result<(), SinkError>;

    fn write_container(&self, container: TestResultContainer) -> Result<(), SinkError>;

    /// Store an attachment body under its generated source key
    fn write_attachment(&self, _source: &str, _body: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: ResultSink + ?Sized> ResultSink for Arc<S> {
    fn write_test(&self, result: TestResult) -> Result<(), SinkError> {
        (**self).write_test(result)
    }

    fn write_container(&self, container: TestResultContainer) -> Result<(), SinkError> {
        (**self).write_container(container)
    }

    fn write_attachment(&self, source: &str, body: &[u8]) -> Result<(), SinkError> {
        (**self).write_attachment(source, body)
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ResultSink for NoopSink {
    fn write_test(&self, _result: TestResult) -> Result<(), SinkError> {
        Ok(())
    }

    fn write_container(&self, _container: TestResultContainer) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every result to each of its sinks.
///
/// A failing sink does not stop the others; the first error is returned.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(&self, mut write: impl FnMut(&dyn ResultSink) -> Result<(), SinkError>) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = write(sink.as_ref()) {
                warn!(error = %err, "fanout sink member failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl ResultSink for FanoutSink {
    fn write_test(&self, result: TestResult) -> Result<(), SinkError> {
        self.each(|sink| sink.write_test(result.clone()))
    }

    fn write_container(&self, container: TestResultContainer) -> Result<(), SinkError> {
        self.each(|sink| sink.write_container(container.clone()))
    }

    fn write_attachment(&self, source: &str, body: &[u8]) -> Result<(), SinkError> {
        self.each(|sink| sink.write_attachment(source, body))
    }
}

enum Message {
    Test(TestResult),
    Container(TestResultContainer),
    Attachment { source: String, body: Vec<u8> },
}

/// Hands results to a tokio task that writes them to an inner sink, so the
/// calling context never waits on the inner sink.
///
/// The task ends once every `HandoffSink` clone has been dropped and the
/// queue is drained; its join handle yields the number of successful writes.
#[derive(Clone)]
pub struct HandoffSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl HandoffSink {
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(inner: S) -> (Self, JoinHandle<usize>)
    where
        S: ResultSink + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let handle = tokio::spawn(async move {
            let mut written = 0;
            while let Some(message) = rx.recv().await {
                let outcome = match message {
                    Message::Test(result) => inner.write_test(result),
                    Message::Container(container) => inner.write_container(container),
                    Message::Attachment { source, body } => inner.write_attachment(&source, &body),
                };
                match outcome {
                    Ok(()) => written += 1,
                    Err(err) => warn!(error = %err, "handoff sink write failed"),
                }
            }
            written
        });
        (Self { tx }, handle)
    }

    fn send(&self, message: Message) -> Result<(), SinkError> {
        self.tx.send(message).map_err(|_| SinkError::Closed)
    }
}

impl ResultSink for HandoffSink {
    fn write_test(&self, result: TestResult) -> Result<(), SinkError> {
        self.send(Message::Test(result))
    }

    fn write_container(&self, container: TestResultContainer) -> Result<(), SinkError> {
        self.send(Message::Container(container))
    }

    fn write_attachment(&self, source: &str, body: &[u8]) -> Result<(), SinkError> {
        self.send(Message::Attachment {
            source: source.to_string(),
            body: body.to_vec(),
        })
    }
}
