//! Lifecycle engine
//!
//! Receives test events, resolves the node they target (explicitly by id or
//! as the top of the calling context's stack), mutates it, and on stop
//! freezes it into an immutable result for the sink.
//!
//! Every public operation absorbs its own failure: a malformed event is
//! logged and dropped, never propagated, so one misbehaving test cannot
//! abort the run around it.
use crate::config::LifecycleConfig;
use crate::context::{ContextKey, ContextRegistry};
use crate::data::{ContainerData, StepData, TestData};
use crate::error::LifecycleError;
use crate::id::{IdGenerator, NodeId, UuidGenerator};
use crate::listener::{LifecycleListener, ListenerRegistry};
use crate::node::{ContainerNode, FixtureKind, FixtureNode, Node, NodeKind, StepNode, TestNode};
use crate::sink::ResultSink;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tally_model::{
    Attachment, Label, Link, Parameter, Stage, Status, StatusDetails, StepResult, TestResult,
    TestResultContainer,
};
use tracing::{debug, info, warn};

pub struct LifecycleBuilder {
    config: LifecycleConfig,
    ids: Arc<dyn IdGenerator>,
    sink: Arc<dyn ResultSink>,
    listeners: ListenerRegistry,
}

impl LifecycleBuilder {
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    pub fn build(self) -> Lifecycle {
        let shards = self.config.shards.max(1);
        Lifecycle {
            contexts: ContextRegistry::new(shards),
            storage: Storage::new(shards),
            config: self.config,
            ids: self.ids,
            sink: self.sink,
            listeners: self.listeners,
            attached: Mutex::new(HashSet::new()),
            attached_count: AtomicUsize::new(0),
        }
    }
}

pub struct Lifecycle {
    config: LifecycleConfig,
    ids: Arc<dyn IdGenerator>,
    contexts: ContextRegistry,
    storage: Storage,
    sink: Arc<dyn ResultSink>,
    listeners: ListenerRegistry,
    /// Nodes pushed onto a second context with `attach_context`
    attached: Mutex<HashSet<NodeId>>,
    attached_count: AtomicUsize,
}

impl Lifecycle {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self::builder(sink).build()
    }

    pub fn builder(sink: Arc<dyn ResultSink>) -> LifecycleBuilder {
        LifecycleBuilder {
            config: LifecycleConfig::default(),
            ids: Arc::new(UuidGenerator),
            sink,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// The single place internal errors end up
    fn absorb<T>(&self, operation: &'static str, outcome: Result<T, LifecycleError>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(operation = operation, code = err.code(), error = %err, "lifecycle event dropped");
                None
            }
        }
    }

    fn current(&self, ctx: &ContextKey) -> Result<NodeId, LifecycleError> {
        self.contexts.top(ctx).ok_or_else(|| LifecycleError::EmptyContext {
            context: ctx.to_string(),
        })
    }

    /// Closest node of `kind` on the stack of `ctx`, searching from the top
    fn nearest(&self, ctx: &ContextKey, kind: NodeKind) -> Result<NodeId, LifecycleError> {
        let stack = self.contexts.current_stack(ctx);
        let top = stack.last().cloned().ok_or_else(|| LifecycleError::EmptyContext {
            context: ctx.to_string(),
        })?;

        for id in stack.iter().rev() {
            if self.storage.kind(id).ok() == Some(kind) {
                return Ok(id.clone());
            }
        }

        let actual = self.storage.kind(&top).map(|k| k.as_str()).unwrap_or("unknown");
        Err(LifecycleError::WrongKind {
            id: top,
            expected: kind.as_str(),
            actual,
        })
    }

    // === Tests ===

    /// Register a test without starting it. No context is touched.
    pub fn schedule_test(&self, container: Option<&NodeId>, data: TestData) -> Option<NodeId> {
        let outcome = self.create_test(container, data, false);
        self.absorb("schedule_test", outcome)
    }

    /// Move a scheduled test to running and make it current on `ctx`.
    /// A test that has already started is left untouched.
    pub fn start_scheduled_test(&self, ctx: &ContextKey, id: &NodeId) -> bool {
        let outcome = self
            .storage
            .with(id, |node| {
                node.ensure_mutable()?;
                let test = node.as_test_mut()?;
                if test.result.stage != Stage::Scheduled {
                    return Err(LifecycleError::WrongStage {
                        id: id.clone(),
                        expected: Stage::Scheduled,
                        actual: test.result.stage,
                    });
                }
                self.listeners.notify(|l| l.before_test_start(&mut test.result));
                test.result.stage = Stage::Running;
                test.result.start = Some(Utc::now());
                self.listeners.notify(|l| l.after_test_start(&test.result));
                Ok(())
            })
            .map(|()| {
                self.contexts.push(ctx, id.clone());
                debug!(uuid = %id, context = %ctx, "scheduled test started");
            });
        self.absorb("start_scheduled_test", outcome).is_some()
    }

    /// Create a running test and make it current on `ctx`.
    ///
    /// A missing parent container is tolerated. Only a caller-supplied id
    /// that is already in progress makes this return `None`.
    pub fn start_test(
        &self,
        ctx: &ContextKey,
        container: Option<&NodeId>,
        data: TestData,
    ) -> Option<NodeId> {
        let outcome = self.create_test(container, data, true).map(|id| {
            self.contexts.push(ctx, id.clone());
            debug!(uuid = %id, context = %ctx, "test started");
            id
        });
        self.absorb("start_test", outcome)
    }

    fn create_test(
        &self,
        container: Option<&NodeId>,
        data: TestData,
        running: bool,
    ) -> Result<NodeId, LifecycleError> {
        let id = data.uuid.clone().unwrap_or_else(|| self.ids.generate());
        if self.storage.contains(&id) {
            return Err(LifecycleError::DuplicateId(id));
        }

        let mut result = data.into_result(&id);
        if running {
            result.stage = Stage::Running;
            result.start = Some(Utc::now());
            self.listeners.notify(|l| l.before_test_start(&mut result));
        } else {
            result.stage = Stage::Scheduled;
            self.listeners.notify(|l| l.before_test_schedule(&mut result));
        }

        let node = Node::Test(TestNode {
            result,
            children: Vec::new(),
            container: container.cloned(),
        });
        self.storage.insert(id.clone(), node)?;

        if let Some(container) = container {
            if let Err(err) = self.storage.with(container, |n| n.add_container_child(&id)) {
                warn!(uuid = %id, container = %container, error = %err, "test parent container unavailable");
            }
        }

        self.storage.with(&id, |node| {
            let test = node.as_test_mut()?;
            if running {
                self.listeners.notify(|l| l.after_test_start(&test.result));
            } else {
                self.listeners.notify(|l| l.after_test_schedule(&test.result));
            }
            Ok(())
        })?;
        Ok(id)
    }

    /// Stop the closest test on `ctx`, freeze it and hand it to the sink.
    /// Steps above it that were never stopped are interrupted.
    pub fn stop_test(&self, ctx: &ContextKey) -> Option<NodeId> {
        let outcome = self
            .nearest(ctx, NodeKind::Test)
            .and_then(|id| self.finish_test(ctx, &id).map(|()| id));
        self.absorb("stop_test", outcome)
    }

    pub fn stop_test_by_id(&self, ctx: &ContextKey, id: &NodeId) -> bool {
        let outcome = self.finish_test(ctx, id);
        self.absorb("stop_test", outcome).is_some()
    }

    fn finish_test(&self, ctx: &ContextKey, id: &NodeId) -> Result<(), LifecycleError> {
        self.storage.with(id, |node| node.as_test_mut().map(|_| ()))?;
        self.unwind(ctx, id);

        let test = self.storage.take(id, Some(NodeKind::Test))?.into_test()?;
        let mut result = test.freeze();
        self.listeners.notify(|l| l.before_test_stop(&mut result));

        result.stage = Stage::Finished;
        result.stop = Some(stop_time(result.start, Utc::now()));
        if result.status.is_unknown() {
            if let Some(status) = self.config.default_test_status {
                result.status = status;
            }
        }
        if self.config.compute_history_id && result.history_id.is_none() {
            result.history_id = Some(result.compute_history_id());
        }
        self.listeners.notify(|l| l.after_test_stop(&result));

        self.write_test(result);
        Ok(())
    }

    fn write_test(&self, result: TestResult) {
        self.listeners.notify(|l| l.before_test_write(&result));
        info!(
            uuid = %result.uuid,
            name = %result.name,
            status = %result.status,
            steps = result.steps.len(),
            "test result handed to sink"
        );

        if self.listeners.is_empty() {
            if let Err(err) = self.sink.write_test(result) {
                warn!(error = %err, "sink rejected test result");
            }
            return;
        }

        if let Err(err) = self.sink.write_test(result.clone()) {
            warn!(uuid = %result.uuid, error = %err, "sink rejected test result");
        }
        self.listeners.notify(|l| l.after_test_write(&result));
    }

    /// Apply `update` to an in-progress test.
    ///
    /// A test whose stage is already finished, or one being stopped
    /// concurrently, fails with `ImmutableNode`. Once a stopped test has
    /// left storage its id is unknown and the update fails with `NotFound`.
    pub fn try_update_test(
        &self,
        id: &NodeId,
        update: impl FnOnce(&mut TestResult),
    ) -> Result<(), LifecycleError> {
        self.storage.with(id, |node| {
            node.ensure_mutable()?;
            let test = node.as_test_mut()?;
            self.listeners.notify(|l| l.before_test_update(&test.result));
            update(&mut test.result);
            self.listeners.notify(|l| l.after_test_update(&test.result));
            Ok(())
        })
    }

    pub fn update_test(&self, id: &NodeId, update: impl FnOnce(&mut TestResult)) -> bool {
        let outcome = self.try_update_test(id, update);
        self.absorb("update_test", outcome).is_some()
    }

    /// Update the closest test on `ctx`
    pub fn update_current_test(&self, ctx: &ContextKey, update: impl FnOnce(&mut TestResult)) -> bool {
        let outcome = self
            .nearest(ctx, NodeKind::Test)
            .and_then(|id| self.try_update_test(&id, update));
        self.absorb("update_test", outcome).is_some()
    }

    // === Steps ===

    /// Start a step under the current node of `ctx`.
    ///
    /// With nothing current the step is still recorded, as an orphan that
    /// belongs to no result.
    pub fn start_step(&self, ctx: &ContextKey, data: impl Into<StepData>) -> Option<NodeId> {
        let parent = self.contexts.top(ctx);
        let outcome = self.create_step(ctx, parent, data.into());
        self.absorb("start_step", outcome)
    }

    /// Start a step under an explicit parent, current on `ctx`
    pub fn start_step_in(
        &self,
        ctx: &ContextKey,
        parent: &NodeId,
        data: impl Into<StepData>,
    ) -> Option<NodeId> {
        let outcome = self.create_step(ctx, Some(parent.clone()), data.into());
        self.absorb("start_step", outcome)
    }

    fn create_step(
        &self,
        ctx: &ContextKey,
        parent: Option<NodeId>,
        data: StepData,
    ) -> Result<NodeId, LifecycleError> {
        let id = data.uuid.clone().unwrap_or_else(|| self.ids.generate());
        if self.storage.contains(&id) {
            return Err(LifecycleError::DuplicateId(id));
        }

        let parent = match parent {
            Some(parent_id) => match self.storage.with(&parent_id, |n| n.push_child(id.clone())) {
                Ok(()) => Some(parent_id),
                Err(err) => {
                    warn!(uuid = %id, parent = %parent_id, error = %err, "step parent unavailable, recording orphan step");
                    None
                }
            },
            None => {
                warn!(uuid = %id, context = %ctx, "step started with nothing in progress, recording orphan step");
                None
            }
        };

        let mut result = data.into_step(&id);
        result.stage = Stage::Running;
        result.start = Some(Utc::now());
        self.listeners.notify(|l| l.before_step_start(&mut result));

        let node = Node::Step(StepNode {
            result,
            children: Vec::new(),
            parent: parent.clone(),
        });
        if let Err(err) = self.storage.insert(id.clone(), node) {
            if let Some(parent_id) = &parent {
                let _ = self.storage.with(parent_id, |n| n.drop_child(&id));
            }
            return Err(err);
        }

        self.contexts.push(ctx, id.clone());
        self.storage.with(&id, |node| {
            let step = node.as_step_mut()?;
            self.listeners.notify(|l| l.after_step_start(&step.result));
            Ok(())
        })?;
        debug!(uuid = %id, context = %ctx, parent = ?parent, "step started");
        Ok(id)
    }

    /// Stop the step on top of `ctx`. A test on top is left alone.
    pub fn stop_step(&self, ctx: &ContextKey) -> Option<NodeId> {
        let outcome = self
            .current(ctx)
            .and_then(|id| self.finish_step(ctx, &id).map(|()| id));
        self.absorb("stop_step", outcome)
    }

    pub fn stop_step_by_id(&self, ctx: &ContextKey, id: &NodeId) -> bool {
        let outcome = self.finish_step(ctx, id);
        self.absorb("stop_step", outcome).is_some()
    }

    fn finish_step(&self, ctx: &ContextKey, id: &NodeId) -> Result<(), LifecycleError> {
        self.storage.with(id, |node| node.as_step_mut().map(|_| ()))?;
        self.unwind(ctx, id);

        let step = self.storage.take(id, Some(NodeKind::Step))?.into_step()?;
        let parent = step.parent.clone();
        let mut result = step.freeze();
        self.listeners.notify(|l| l.before_step_stop(&mut result));

        result.stage = Stage::Finished;
        result.stop = Some(stop_time(result.start, Utc::now()));
        if result.status.is_unknown() {
            result.status = self.config.default_step_status;
        }
        self.listeners.notify(|l| l.after_step_stop(&result));
        debug!(uuid = %id, status = %result.status, "step stopped");

        self.attach_to_parent(id, parent, result);
        Ok(())
    }

    fn attach_to_parent(&self, id: &NodeId, parent: Option<NodeId>, result: StepResult) {
        let Some(parent) = parent else {
            warn!(uuid = %id, name = %result.name, "orphan step stopped, result discarded");
            return;
        };

        match self.storage.with(&parent, |p| p.complete_child(id, result)) {
            Ok(true) => {}
            Ok(false) => warn!(uuid = %id, parent = %parent, "parent holds no slot for step, result discarded"),
            Err(err) => warn!(uuid = %id, parent = %parent, error = %err, "step parent gone, result discarded"),
        }
    }

    /// Apply `update` to an in-progress step.
    ///
    /// A step whose stage is already finished, or one being stopped
    /// concurrently, fails with `ImmutableNode`. Once a stopped step has
    /// left storage its id is unknown and the update fails with `NotFound`.
    pub fn try_update_step(
        &self,
        id: &NodeId,
        update: impl FnOnce(&mut StepResult),
    ) -> Result<(), LifecycleError> {
        self.storage.with(id, |node| {
            node.ensure_mutable()?;
            let step = node.as_step_mut()?;
            self.listeners.notify(|l| l.before_step_update(&step.result));
            update(&mut step.result);
            self.listeners.notify(|l| l.after_step_update(&step.result));
            Ok(())
        })
    }

    pub fn update_step(&self, id: &NodeId, update: impl FnOnce(&mut StepResult)) -> bool {
        let outcome = self.try_update_step(id, update);
        self.absorb("update_step", outcome).is_some()
    }

    /// Update the step on top of `ctx`
    pub fn update_current_step(&self, ctx: &ContextKey, update: impl FnOnce(&mut StepResult)) -> bool {
        let outcome = self
            .current(ctx)
            .and_then(|id| self.try_update_step(&id, update));
        self.absorb("update_step", outcome).is_some()
    }

    /// Pop everything above `id` on `ctx`, plus `id` itself, interrupting
    /// steps that were never stopped. A node stopped from a context that
    /// does not hold it, or attached to other contexts, is cleared from
    /// every stack it is on.
    fn unwind(&self, ctx: &ContextKey, id: &NodeId) {
        let (mut hung, elsewhere) = match self.contexts.unwind_to(ctx, id) {
            Some(above) => (above, self.release_attached(id)),
            None => {
                debug!(uuid = %id, context = %ctx, "stopped node was not on the calling context");
                self.release_attached(id);
                (Vec::new(), true)
            }
        };
        if elsewhere {
            hung.extend(self.contexts.unwind_everywhere(id));
        }

        for hung in hung {
            self.interrupt(&hung);
        }
    }

    /// Drop `id` from the attached set. True if it was attached.
    fn release_attached(&self, id: &NodeId) -> bool {
        if self.attached_count.load(Ordering::Acquire) > 0 && self.attached.lock().remove(id) {
            self.attached_count.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        false
    }

    fn interrupt(&self, id: &NodeId) {
        let step = match self.storage.take(id, Some(NodeKind::Step)).and_then(Node::into_step) {
            Ok(step) => step,
            Err(LifecycleError::WrongKind { actual, .. }) => {
                warn!(uuid = %id, kind = actual, "unfinished node popped from context, left in storage");
                return;
            }
            Err(err) => {
                debug!(uuid = %id, error = %err, "nothing to interrupt");
                return;
            }
        };

        let parent = step.parent.clone();
        let mut result = step.freeze();
        self.listeners.notify(|l| l.before_step_stop(&mut result));
        result.stage = Stage::Interrupted;
        result.stop = Some(stop_time(result.start, Utc::now()));
        if result.status.is_unknown() {
            result.status = Status::Broken;
        }
        self.listeners.notify(|l| l.after_step_stop(&result));
        warn!(uuid = %id, name = %result.name, "step never stopped, interrupted");

        if self.config.keep_interrupted_steps {
            self.attach_to_parent(id, parent, result);
        } else if let Some(parent) = parent {
            let _ = self.storage.with(&parent, |p| p.drop_child(id));
        }
    }

    // === Containers and fixtures ===

    pub fn start_container(&self, parent: Option<&NodeId>, data: ContainerData) -> Option<NodeId> {
        let outcome = self.create_container(parent, data);
        self.absorb("start_container", outcome)
    }

    fn create_container(
        &self,
        parent: Option<&NodeId>,
        data: ContainerData,
    ) -> Result<NodeId, LifecycleError> {
        let id = data.uuid.clone().unwrap_or_else(|| self.ids.generate());
        let mut result = data.into_container(&id);
        result.start = Some(Utc::now());
        self.listeners.notify(|l| l.before_container_start(&mut result));

        self.storage.insert(id.clone(), Node::Container(ContainerNode { result }))?;
        if let Some(parent) = parent {
            if let Err(err) = self.storage.with(parent, |n| n.add_container_child(&id)) {
                warn!(uuid = %id, parent = %parent, error = %err, "parent container unavailable");
            }
        }

        self.storage.with(&id, |node| {
            let container = node.as_container_mut()?;
            self.listeners.notify(|l| l.after_container_start(&container.result));
            Ok(())
        })?;
        debug!(uuid = %id, "container started");
        Ok(id)
    }

    pub fn try_update_container(
        &self,
        id: &NodeId,
        update: impl FnOnce(&mut TestResultContainer),
    ) -> Result<(), LifecycleError> {
        self.storage.with(id, |node| {
            let container = node.as_container_mut()?;
            self.listeners.notify(|l| l.before_container_update(&container.result));
            update(&mut container.result);
            self.listeners.notify(|l| l.after_container_update(&container.result));
            Ok(())
        })
    }

    pub fn update_container(&self, id: &NodeId, update: impl FnOnce(&mut TestResultContainer)) -> bool {
        let outcome = self.try_update_container(id, update);
        self.absorb("update_container", outcome).is_some()
    }

    /// Freeze the container and hand it to the sink. Fixtures still running
    /// are dropped when they stop.
    pub fn stop_container(&self, id: &NodeId) -> bool {
        let outcome = self.finish_container(id);
        self.absorb("stop_container", outcome).is_some()
    }

    fn finish_container(&self, id: &NodeId) -> Result<(), LifecycleError> {
        let mut result = self
            .storage
            .take(id, Some(NodeKind::Container))?
            .into_container()?
            .result;
        self.listeners.notify(|l| l.before_container_stop(&mut result));
        result.stop = Some(stop_time(result.start, Utc::now()));
        self.listeners.notify(|l| l.after_container_stop(&result));

        self.listeners.notify(|l| l.before_container_write(&result));
        info!(uuid = %id, children = result.children.len(), "container handed to sink");
        if let Err(err) = self.sink.write_container(result.clone()) {
            warn!(uuid = %id, error = %err, "sink rejected container");
        }
        self.listeners.notify(|l| l.after_container_write(&result));
        Ok(())
    }

    pub fn start_prepare_fixture(
        &self,
        ctx: &ContextKey,
        container: &NodeId,
        data: impl Into<StepData>,
    ) -> Option<NodeId> {
        let outcome = self.create_fixture(ctx, container, data.into(), FixtureKind::Prepare);
        self.absorb("start_fixture", outcome)
    }

    pub fn start_tear_down_fixture(
        &self,
        ctx: &ContextKey,
        container: &NodeId,
        data: impl Into<StepData>,
    ) -> Option<NodeId> {
        let outcome = self.create_fixture(ctx, container, data.into(), FixtureKind::TearDown);
        self.absorb("start_fixture", outcome)
    }

    fn create_fixture(
        &self,
        ctx: &ContextKey,
        container: &NodeId,
        data: StepData,
        kind: FixtureKind,
    ) -> Result<NodeId, LifecycleError> {
        self.storage.with(container, |n| n.as_container_mut().map(|_| ()))?;

        let id = data.uuid.clone().unwrap_or_else(|| self.ids.generate());
        let mut result = data.into_fixture(&id);
        result.stage = Stage::Running;
        result.start = Some(Utc::now());
        self.listeners.notify(|l| l.before_fixture_start(&mut result));

        let node = Node::Fixture(FixtureNode {
            result,
            children: Vec::new(),
            container: container.clone(),
            kind,
        });
        self.storage.insert(id.clone(), node)?;
        self.contexts.push(ctx, id.clone());

        self.storage.with(&id, |node| {
            let fixture = node.as_fixture_mut()?;
            self.listeners.notify(|l| l.after_fixture_start(&fixture.result));
            Ok(())
        })?;
        debug!(uuid = %id, container = %container, kind = ?kind, "fixture started");
        Ok(id)
    }

    /// Stop the closest fixture on `ctx` and fold it into its container
    pub fn stop_fixture(&self, ctx: &ContextKey) -> Option<NodeId> {
        let outcome = self
            .nearest(ctx, NodeKind::Fixture)
            .and_then(|id| self.finish_fixture(ctx, &id).map(|()| id));
        self.absorb("stop_fixture", outcome)
    }

    pub fn stop_fixture_by_id(&self, ctx: &ContextKey, id: &NodeId) -> bool {
        let outcome = self.finish_fixture(ctx, id);
        self.absorb("stop_fixture", outcome).is_some()
    }

    fn finish_fixture(&self, ctx: &ContextKey, id: &NodeId) -> Result<(), LifecycleError> {
        self.storage.with(id, |node| node.as_fixture_mut().map(|_| ()))?;
        self.unwind(ctx, id);

        let fixture = self.storage.take(id, Some(NodeKind::Fixture))?.into_fixture()?;
        let container = fixture.container.clone();
        let kind = fixture.kind;
        let mut result = fixture.freeze();
        self.listeners.notify(|l| l.before_fixture_stop(&mut result));

        result.stage = Stage::Finished;
        result.stop = Some(stop_time(result.start, Utc::now()));
        if result.status.is_unknown() {
            result.status = self.config.default_step_status;
        }
        self.listeners.notify(|l| l.after_fixture_stop(&result));

        if let Err(err) = self.storage.with(&container, |c| c.add_fixture(kind, result)) {
            warn!(uuid = %id, container = %container, error = %err, "fixture container gone, result discarded");
        }
        Ok(())
    }

    // === Status, attachments, parameters, labels, links ===

    /// Overwrite the status of the current node. The stage is untouched.
    pub fn set_status(&self, ctx: &ContextKey, status: Status, details: Option<StatusDetails>) -> bool {
        let outcome = self
            .current(ctx)
            .and_then(|id| self.storage.with(&id, |n| n.set_status(status, details)));
        self.absorb("set_status", outcome).is_some()
    }

    pub fn set_status_of(&self, id: &NodeId, status: Status, details: Option<StatusDetails>) -> bool {
        let outcome = self.storage.with(id, |n| n.set_status(status, details));
        self.absorb("set_status", outcome).is_some()
    }

    /// Record an attachment on the current node and pass its body to the
    /// sink. Returns the generated source key.
    pub fn add_attachment(
        &self,
        ctx: &ContextKey,
        name: &str,
        content_type: Option<&str>,
        extension: Option<&str>,
        body: &[u8],
    ) -> Option<String> {
        let outcome = self
            .current(ctx)
            .and_then(|id| self.attach_body(&id, name, content_type, extension, body));
        self.absorb("add_attachment", outcome)
    }

    pub fn add_attachment_to(
        &self,
        id: &NodeId,
        name: &str,
        content_type: Option<&str>,
        extension: Option<&str>,
        body: &[u8],
    ) -> Option<String> {
        let outcome = self.attach_body(id, name, content_type, extension, body);
        self.absorb("add_attachment", outcome)
    }

    fn attach_body(
        &self,
        id: &NodeId,
        name: &str,
        content_type: Option<&str>,
        extension: Option<&str>,
        body: &[u8],
    ) -> Result<String, LifecycleError> {
        let source = attachment_source(&self.ids.generate(), extension);
        let mut attachment = Attachment::new(name, source.as_str());
        if let Some(content_type) = content_type {
            attachment = attachment.with_content_type(content_type);
        }

        self.storage.with(id, |n| n.add_attachment(attachment))?;
        if let Err(err) = self.sink.write_attachment(&source, body) {
            warn!(uuid = %id, source = %source, error = %err, "sink rejected attachment body");
        }
        debug!(uuid = %id, source = %source, bytes = body.len(), "attachment added");
        Ok(source)
    }

    /// Record an attachment whose body is already stored elsewhere
    pub fn add_attachment_ref(&self, ctx: &ContextKey, attachment: Attachment) -> bool {
        let outcome = self
            .current(ctx)
            .and_then(|id| self.storage.with(&id, |n| n.add_attachment(attachment)));
        self.absorb("add_attachment", outcome).is_some()
    }

    /// Append a parameter to the current node. Repeated names are kept.
    pub fn add_parameter(&self, ctx: &ContextKey, name: impl Into<String>, value: impl Into<String>) -> bool {
        let parameter = Parameter::new(name, value);
        let outcome = self
            .current(ctx)
            .and_then(|id| self.storage.with(&id, |n| n.add_parameter(parameter)));
        self.absorb("add_parameter", outcome).is_some()
    }

    pub fn add_parameter_to(&self, id: &NodeId, parameter: Parameter) -> bool {
        let outcome = self.storage.with(id, |n| n.add_parameter(parameter));
        self.absorb("add_parameter", outcome).is_some()
    }

    /// Append a label to the closest test on `ctx`
    pub fn add_label(&self, ctx: &ContextKey, name: impl Into<String>, value: impl Into<String>) -> bool {
        let label = Label::new(name, value);
        let outcome = self
            .nearest(ctx, NodeKind::Test)
            .and_then(|id| self.storage.with(&id, |n| n.add_label(label)));
        self.absorb("add_label", outcome).is_some()
    }

    pub fn add_label_to(&self, id: &NodeId, label: Label) -> bool {
        let outcome = self.storage.with(id, |n| n.add_label(label));
        self.absorb("add_label", outcome).is_some()
    }

    /// Append a link to the closest test on `ctx`
    pub fn add_link(&self, ctx: &ContextKey, link: Link) -> bool {
        let outcome = self
            .nearest(ctx, NodeKind::Test)
            .and_then(|id| self.storage.with(&id, |n| n.add_link(link)));
        self.absorb("add_link", outcome).is_some()
    }

    pub fn add_link_to(&self, id: &NodeId, link: Link) -> bool {
        let outcome = self.storage.with(id, |n| n.add_link(link));
        self.absorb("add_link", outcome).is_some()
    }

    // === Contexts ===

    /// Make an in-progress node current on another context as well, so a
    /// helper thread can record steps under it.
    pub fn attach_context(&self, ctx: &ContextKey, id: &NodeId) -> bool {
        let outcome = self.storage.with(id, |n| n.ensure_mutable()).map(|()| {
            self.contexts.push(ctx, id.clone());
            if self.attached.lock().insert(id.clone()) {
                self.attached_count.fetch_add(1, Ordering::AcqRel);
            }
            debug!(uuid = %id, context = %ctx, "node attached to context");
        });
        self.absorb("attach_context", outcome).is_some()
    }

    /// Pop the top of `ctx` without finishing anything
    pub fn detach_context(&self, ctx: &ContextKey) -> Option<NodeId> {
        let outcome = self.contexts.pop(ctx);
        self.absorb("detach_context", outcome)
    }

    /// Top of the stack of `ctx`
    pub fn current_node(&self, ctx: &ContextKey) -> Option<NodeId> {
        self.contexts.top(ctx)
    }

    pub fn current_test(&self, ctx: &ContextKey) -> Option<NodeId> {
        self.nearest(ctx, NodeKind::Test).ok()
    }

    pub fn context_depth(&self, ctx: &ContextKey) -> usize {
        self.contexts.depth(ctx)
    }

    /// Nodes started and not yet finalized, across all contexts
    pub fn in_progress(&self) -> usize {
        self.storage.len()
    }

    pub fn is_in_progress(&self, id: &NodeId) -> bool {
        self.storage.contains(id)
    }
}

/// Stop time never precedes start time, even if the clock steps back
fn stop_time(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match start {
        Some(start) if start > now => start,
        _ => now,
    }
}

fn attachment_source(id: &NodeId, extension: Option<&str>) -> String {
    match extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        Some(extension) => format!("{}-attachment.{}", id, extension),
        None => format!("{}-attachment", id),
    }
}
