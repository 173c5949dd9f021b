//! Tally Model: frozen report values
//!
//! Value objects handed to a result sink once a test, step, fixture or
//! container has been finalized by the lifecycle engine. Nothing in this
//! crate is shared with in-progress state: a result is owned by whoever
//! received it.
//!
//! # Example
//!
//! ```
//! use tally_model::{TestResult, Label, Status, Stage};
//!
//! let mut result = TestResult::new("4f1c", "login works");
//! result.labels.push(Label::owner("alice"));
//! result.status = Status::Passed;
//! result.stage = Stage::Finished;
//!
//! assert!(result.label("owner").is_some());
//! ```

pub mod meta;
pub mod result;
pub mod status;

pub use meta::{Label, Link, Parameter};
pub use result::{Attachment, FixtureResult, StepResult, TestResult, TestResultContainer};
pub use status::{FailureKind, Stage, Status, StatusDetails};

/// Version of the report model
pub const MODEL_VERSION: &str = "1.0.0";
