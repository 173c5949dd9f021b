//! Tally Core: lifecycle engine
//!
//! Test framework adapters emit events (start test, start step, add label,
//! stop step, stop test) from any number of threads. The engine keeps one
//! stack of in-progress nodes per execution context, attaches each event to
//! the right node, and hands a frozen `TestResult` to the configured sink
//! once the test stops.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tally_core::{ContextKey, Lifecycle, NoopSink, TestData};
//!
//! let lifecycle = Lifecycle::new(Arc::new(NoopSink));
//! let ctx = ContextKey::current_thread();
//!
//! lifecycle.start_test(&ctx, None, TestData::new("login works"));
//! lifecycle.start_step(&ctx, "open page");
//! lifecycle.add_label(&ctx, "owner", "alice");
//! lifecycle.stop_step(&ctx);
//! let id = lifecycle.stop_test(&ctx);
//!
//! assert!(id.is_some());
//! assert_eq!(lifecycle.in_progress(), 0);
//! ```

pub mod ambient;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod listener;
pub mod metadata;
pub mod node;
pub mod sink;
pub mod storage;

pub use ambient::ThreadLifecycle;
pub use config::LifecycleConfig;
pub use context::ContextKey;
pub use data::{ContainerData, StepData, TestData};
pub use error::{ConfigError, LifecycleError, SinkError};
pub use id::{IdGenerator, NodeId, SequentialGenerator, UuidGenerator};
pub use lifecycle::{Lifecycle, LifecycleBuilder};
pub use listener::{LifecycleListener, ListenerRegistry};
pub use metadata::{AttributeExtractor, Metadata, MetadataExtractor, TestDescriptor};
pub use node::FixtureKind;
pub use sink::{FanoutSink, HandoffSink, NoopSink, ResultSink};
