//! Unified Error Model
//!
//! None of these escape the public lifecycle operations: the engine absorbs
//! them at its boundary and reports them through `tracing`. The raw values
//! are visible through the `try_*` operations only.
use crate::id::NodeId;
use tally_model::Stage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// A stop arrived on a context with nothing started
    #[error("CONTEXT/EMPTY: no node in progress on {context}")]
    EmptyContext { context: String },

    #[error("STORAGE/DUPLICATE: {0} is already in progress")]
    DuplicateId(NodeId),

    #[error("STORAGE/NOT_FOUND: {0} is not in progress")]
    NotFound(NodeId),

    /// Mutation of a node that has already been finalized
    #[error("NODE/IMMUTABLE: {0} is finished")]
    ImmutableNode(NodeId),

    #[error("NODE/KIND: {id} is a {actual}, expected {expected}")]
    WrongKind {
        id: NodeId,
        expected: &'static str,
        actual: &'static str,
    },

    /// A transition requested from a stage it does not start from
    #[error("NODE/STAGE: {id} is {actual}, expected {expected}")]
    WrongStage {
        id: NodeId,
        expected: Stage,
        actual: Stage,
    },
}

impl LifecycleError {
    /// Short code used as a structured log field
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyContext { .. } => "CONTEXT/EMPTY",
            Self::DuplicateId(_) => "STORAGE/DUPLICATE",
            Self::NotFound(_) => "STORAGE/NOT_FOUND",
            Self::ImmutableNode(_) => "NODE/IMMUTABLE",
            Self::WrongKind { .. } => "NODE/KIND",
            Self::WrongStage { .. } => "NODE/STAGE",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG/IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("CONFIG/YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("SINK/IO: {0}")]
    Io(#[from] std::io::Error),

    /// The receiving side of an asynchronous sink has gone away
    #[error("SINK/CLOSED")]
    Closed,

    #[error("SINK/REJECTED: {0}")]
    Rejected(String),
}
