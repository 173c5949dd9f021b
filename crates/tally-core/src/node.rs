//! In-progress nodes held by storage
//!
//! A node wraps the model value being built plus the bookkeeping needed to
//! assemble it: the ordered child slots (a slot is filled when the child
//! step stops, so order is start order, not completion order) and the
//! owner it will be folded into.
use crate::error::LifecycleError;
use crate::id::NodeId;
use tally_model::{
    Attachment, FixtureResult, Label, Link, Parameter, Stage, Status, StatusDetails, StepResult,
    TestResult, TestResultContainer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Test,
    Container,
    Step,
    Fixture,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Test => "test",
            NodeKind::Container => "container",
            NodeKind::Step => "step",
            NodeKind::Fixture => "fixture",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a child step inside its parent
#[derive(Debug, Clone)]
pub enum ChildSlot {
    /// Started, not stopped yet
    Pending(NodeId),
    Done(StepResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureKind {
    Prepare,
    TearDown,
}

#[derive(Debug, Clone)]
pub struct TestNode {
    pub result: TestResult,
    pub children: Vec<ChildSlot>,
    pub container: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct StepNode {
    pub result: StepResult,
    pub children: Vec<ChildSlot>,
    /// `None` for orphan steps started with nothing current
    pub parent: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct FixtureNode {
    pub result: FixtureResult,
    pub children: Vec<ChildSlot>,
    pub container: NodeId,
    pub kind: FixtureKind,
}

#[derive(Debug, Clone)]
pub struct ContainerNode {
    pub result: TestResultContainer,
}

#[derive(Debug, Clone)]
pub enum Node {
    Test(TestNode),
    Container(ContainerNode),
    Step(StepNode),
    Fixture(FixtureNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Test(_) => NodeKind::Test,
            Node::Container(_) => NodeKind::Container,
            Node::Step(_) => NodeKind::Step,
            Node::Fixture(_) => NodeKind::Fixture,
        }
    }

    pub fn id(&self) -> NodeId {
        let uuid = match self {
            Node::Test(n) => &n.result.uuid,
            Node::Container(n) => &n.result.uuid,
            Node::Step(n) => &n.result.uuid,
            Node::Fixture(n) => &n.result.uuid,
        };
        NodeId::from(uuid.as_str())
    }

    /// Containers have no stage; they count as running until stopped.
    pub fn stage(&self) -> Stage {
        match self {
            Node::Test(n) => n.result.stage,
            Node::Container(_) => Stage::Running,
            Node::Step(n) => n.result.stage,
            Node::Fixture(n) => n.result.stage,
        }
    }

    pub fn ensure_mutable(&self) -> Result<(), LifecycleError> {
        if self.stage() == Stage::Finished {
            return Err(LifecycleError::ImmutableNode(self.id()));
        }
        Ok(())
    }

    fn wrong_kind(&self, expected: &'static str) -> LifecycleError {
        LifecycleError::WrongKind {
            id: self.id(),
            expected,
            actual: self.kind().as_str(),
        }
    }

    fn children_mut(&mut self) -> Result<&mut Vec<ChildSlot>, LifecycleError> {
        match self {
            Node::Test(n) => Ok(&mut n.children),
            Node::Step(n) => Ok(&mut n.children),
            Node::Fixture(n) => Ok(&mut n.children),
            Node::Container(_) => Err(self.wrong_kind("test, step or fixture")),
        }
    }

    /// Reserve the next child position for a step that just started
    pub fn push_child(&mut self, child: NodeId) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        self.children_mut()?.push(ChildSlot::Pending(child));
        Ok(())
    }

    /// Fill the slot reserved for `child`. Returns false if no slot exists.
    pub fn complete_child(&mut self, child: &NodeId, step: StepResult) -> Result<bool, LifecycleError> {
        self.ensure_mutable()?;
        let slot = self
            .children_mut()?
            .iter_mut()
            .find(|slot| matches!(slot, ChildSlot::Pending(id) if id == child));

        match slot {
            Some(slot) => {
                *slot = ChildSlot::Done(step);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release the most recent slot reserved for `child`
    pub fn drop_child(&mut self, child: &NodeId) -> Result<(), LifecycleError> {
        let children = self.children_mut()?;
        if let Some(position) = children
            .iter()
            .rposition(|slot| matches!(slot, ChildSlot::Pending(id) if id == child))
        {
            children.remove(position);
        }
        Ok(())
    }

    pub fn set_status(
        &mut self,
        status: Status,
        details: Option<StatusDetails>,
    ) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        match self {
            Node::Test(n) => assign_status(&mut n.result.status, &mut n.result.status_details, status, details),
            Node::Step(n) => assign_status(&mut n.result.status, &mut n.result.status_details, status, details),
            Node::Fixture(n) => assign_status(&mut n.result.status, &mut n.result.status_details, status, details),
            Node::Container(_) => return Err(self.wrong_kind("test, step or fixture")),
        }
        Ok(())
    }

    pub fn add_attachment(&mut self, attachment: Attachment) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        match self {
            Node::Test(n) => n.result.attachments.push(attachment),
            Node::Step(n) => n.result.attachments.push(attachment),
            Node::Fixture(n) => n.result.attachments.push(attachment),
            Node::Container(_) => return Err(self.wrong_kind("test, step or fixture")),
        }
        Ok(())
    }

    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        match self {
            Node::Test(n) => n.result.parameters.push(parameter),
            Node::Step(n) => n.result.parameters.push(parameter),
            Node::Fixture(n) => n.result.parameters.push(parameter),
            Node::Container(_) => return Err(self.wrong_kind("test, step or fixture")),
        }
        Ok(())
    }

    pub fn add_label(&mut self, label: Label) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        match self {
            Node::Test(n) => {
                n.result.labels.push(label);
                Ok(())
            }
            _ => Err(self.wrong_kind("test")),
        }
    }

    pub fn add_link(&mut self, link: Link) -> Result<(), LifecycleError> {
        self.ensure_mutable()?;
        match self {
            Node::Test(n) => n.result.links.push(link),
            Node::Container(n) => n.result.links.push(link),
            _ => return Err(self.wrong_kind("test or container")),
        }
        Ok(())
    }

    /// Record a test or nested container as a child of this container
    pub fn add_container_child(&mut self, child: &NodeId) -> Result<(), LifecycleError> {
        match self {
            Node::Container(n) => {
                n.result.children.push(child.to_string());
                Ok(())
            }
            _ => Err(self.wrong_kind("container")),
        }
    }

    pub fn add_fixture(&mut self, kind: FixtureKind, fixture: FixtureResult) -> Result<(), LifecycleError> {
        match self {
            Node::Container(n) => {
                match kind {
                    FixtureKind::Prepare => n.result.befores.push(fixture),
                    FixtureKind::TearDown => n.result.afters.push(fixture),
                }
                Ok(())
            }
            _ => Err(self.wrong_kind("container")),
        }
    }

    pub fn into_test(self) -> Result<TestNode, LifecycleError> {
        match self {
            Node::Test(n) => Ok(n),
            other => Err(other.wrong_kind("test")),
        }
    }

    pub fn into_step(self) -> Result<StepNode, LifecycleError> {
        match self {
            Node::Step(n) => Ok(n),
            other => Err(other.wrong_kind("step")),
        }
    }

    pub fn into_fixture(self) -> Result<FixtureNode, LifecycleError> {
        match self {
            Node::Fixture(n) => Ok(n),
            other => Err(other.wrong_kind("fixture")),
        }
    }

    pub fn into_container(self) -> Result<ContainerNode, LifecycleError> {
        match self {
            Node::Container(n) => Ok(n),
            other => Err(other.wrong_kind("container")),
        }
    }

    pub fn as_test_mut(&mut self) -> Result<&mut TestNode, LifecycleError> {
        match self {
            Node::Test(n) => Ok(n),
            _ => Err(self.wrong_kind("test")),
        }
    }

    pub fn as_step_mut(&mut self) -> Result<&mut StepNode, LifecycleError> {
        match self {
            Node::Step(n) => Ok(n),
            _ => Err(self.wrong_kind("step")),
        }
    }

    pub fn as_fixture_mut(&mut self) -> Result<&mut FixtureNode, LifecycleError> {
        match self {
            Node::Fixture(n) => Ok(n),
            _ => Err(self.wrong_kind("fixture")),
        }
    }

    pub fn as_container_mut(&mut self) -> Result<&mut ContainerNode, LifecycleError> {
        match self {
            Node::Container(n) => Ok(n),
            _ => Err(self.wrong_kind("container")),
        }
    }
}

/// Explicit details replace earlier ones; `None` keeps them
fn assign_status(
    slot: &mut Status,
    details_slot: &mut Option<StatusDetails>,
    status: Status,
    details: Option<StatusDetails>,
) {
    *slot = status;
    if details.is_some() {
        *details_slot = details;
    }
}

/// Completed child steps in start order; slots still pending are dropped.
fn collect_steps(children: Vec<ChildSlot>) -> Vec<StepResult> {
    children
        .into_iter()
        .filter_map(|slot| match slot {
            ChildSlot::Done(step) => Some(step),
            ChildSlot::Pending(_) => None,
        })
        .collect()
}

impl TestNode {
    pub fn freeze(self) -> TestResult {
        let mut result = self.result;
        result.steps = collect_steps(self.children);
        result
    }
}

impl StepNode {
    pub fn freeze(self) -> StepResult {
        let mut result = self.result;
        result.steps = collect_steps(self.children);
        result
    }
}

impl FixtureNode {
    pub fn freeze(self) -> FixtureResult {
        let mut result = self.result;
        result.steps = collect_steps(self.children);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_node(uuid: &str) -> Node {
        Node::Step(StepNode {
            result: StepResult::new(uuid, uuid),
            children: Vec::new(),
            parent: None,
        })
    }

    #[test]
    fn test_children_keep_start_order() {
        let mut node = step_node("parent");
        node.push_child(NodeId::from("a")).unwrap();
        node.push_child(NodeId::from("b")).unwrap();

        // b completes before a
        assert!(node.complete_child(&NodeId::from("b"), StepResult::new("b", "b")).unwrap());
        assert!(node.complete_child(&NodeId::from("a"), StepResult::new("a", "a")).unwrap());

        let Node::Step(step) = node else { panic!("not a step") };
        assert_eq!(step.freeze().step_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_pending_children_are_dropped_on_freeze() {
        let mut node = step_node("parent");
        node.push_child(NodeId::from("done")).unwrap();
        node.push_child(NodeId::from("hung")).unwrap();
        node.complete_child(&NodeId::from("done"), StepResult::new("done", "done"))
            .unwrap();

        let Node::Step(step) = node else { panic!("not a step") };
        assert_eq!(step.freeze().step_names(), vec!["done"]);
    }

    #[test]
    fn test_finished_node_rejects_mutation() {
        let mut node = step_node("s");
        if let Node::Step(step) = &mut node {
            step.result.stage = Stage::Finished;
        }

        let err = node.add_parameter(Parameter::new("a", "1")).unwrap_err();
        assert_eq!(err, LifecycleError::ImmutableNode(NodeId::from("s")));
    }

    #[test]
    fn test_labels_only_on_tests() {
        let mut node = step_node("s");
        let err = node.add_label(Label::owner("alice")).unwrap_err();
        assert!(matches!(err, LifecycleError::WrongKind { expected: "test", .. }));
    }

    #[test]
    fn test_status_details_are_kept_when_not_replaced() {
        let mut node = step_node("s");
        node.set_status(Status::Failed, Some(StatusDetails::new().with_message("boom")))
            .unwrap();
        node.set_status(Status::Failed, None).unwrap();

        let Node::Step(step) = node else { panic!("not a step") };
        assert_eq!(
            step.result.status_details.and_then(|d| d.message),
            Some("boom".to_string())
        );
    }
}
