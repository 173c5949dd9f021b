//! Outcome and lifecycle phase of a recorded node

use serde::{Deserialize, Serialize};

/// Outcome of a test, step or fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Broken,
    Skipped,
    /// Nothing has been set or derived yet
    #[default]
    Unknown,
}

impl Status {
    /// Status for a failure of the given kind.
    ///
    /// Assertion failures mean the product misbehaved; anything else means
    /// the test itself could not run as written.
    pub fn for_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Assertion => Status::Failed,
            FailureKind::Error => Status::Broken,
            FailureKind::Skipped => Status::Skipped,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Status::Unknown)
    }

    /// Passed or skipped
    pub fn is_successful(&self) -> bool {
        matches!(self, Status::Passed | Status::Skipped)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Status::Passed => write!(f, "passed"),
            Status::Failed => write!(f, "failed"),
            Status::Broken => write!(f, "broken"),
            Status::Skipped => write!(f, "skipped"),
            Status::Unknown => write!(f, "unknown"),
        }
    }
}

/// What went wrong, as reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Assertion,
    Error,
    Skipped,
}

/// Lifecycle phase, independent of the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Scheduled,
    Running,
    Finished,
    Pending,
    Interrupted,
}

impl Stage {
    /// Whether the node has reached a terminal stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Finished | Stage::Interrupted)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Stage::Scheduled => write!(f, "scheduled"),
            Stage::Running => write!(f, "running"),
            Stage::Finished => write!(f, "finished"),
            Stage::Pending => write!(f, "pending"),
            Stage::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Extra information attached to a status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,

    #[serde(default)]
    pub known: bool,

    #[serde(default)]
    pub muted: bool,

    #[serde(default)]
    pub flaky: bool,
}

impl StatusDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Details carrying only a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn flaky(mut self) -> Self {
        self.flaky = true;
        self
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    pub fn known(mut self) -> Self {
        self.known = true;
        self
    }

    /// Build details from an error and its chain of sources
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        let mut trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self {
            message: Some(error.to_string()),
            trace: if trace.is_empty() { None } else { Some(trace.join("\n")) },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Inner;

    impl std::fmt::Display for Inner {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "socket closed")
        }
    }

    impl std::error::Error for Inner {}

    #[derive(Debug)]
    struct Outer(Inner);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "request failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(Status::for_failure(FailureKind::Assertion), Status::Failed);
        assert_eq!(Status::for_failure(FailureKind::Error), Status::Broken);
        assert_eq!(Status::for_failure(FailureKind::Skipped), Status::Skipped);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Status::default(), Status::Unknown);
        assert_eq!(Stage::default(), Stage::Scheduled);
        assert!(Stage::Interrupted.is_terminal());
        assert!(!Stage::Running.is_terminal());
    }

    #[test]
    fn test_details_from_error_chain() {
        let details = StatusDetails::from_error(&Outer(Inner));
        assert_eq!(details.message.as_deref(), Some("request failed"));
        assert_eq!(details.trace.as_deref(), Some("caused by: socket closed"));
        assert!(!details.flaky);
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_string(&Status::Broken).unwrap(), "\"broken\"");
        assert_eq!(serde_json::to_string(&Stage::Finished).unwrap(), "\"finished\"");
    }
}
