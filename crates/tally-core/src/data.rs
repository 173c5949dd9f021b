//! What an adapter knows about a node when it starts it
use crate::id::NodeId;
use tally_model::{
    FixtureResult, Label, Link, Parameter, StepResult, TestResult, TestResultContainer,
};

/// Start-time description of a test
#[derive(Debug, Clone, Default)]
pub struct TestData {
    /// Caller-chosen id; generated when absent
    pub uuid: Option<NodeId>,
    pub name: String,
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub test_case_id: Option<String>,
    pub history_id: Option<String>,
    pub labels: Vec<Label>,
    pub links: Vec<Link>,
    pub parameters: Vec<Parameter>,
}

impl TestData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<NodeId>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_test_case_id(mut self, id: impl Into<String>) -> Self {
        self.test_case_id = Some(id.into());
        self
    }

    pub fn with_history_id(mut self, id: impl Into<String>) -> Self {
        self.history_id = Some(id.into());
        self
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub(crate) fn into_result(self, uuid: &NodeId) -> TestResult {
        let mut result = TestResult::new(uuid.as_str(), self.name);
        result.full_name = self.full_name;
        result.description = self.description;
        result.test_case_id = self.test_case_id;
        result.history_id = self.history_id;
        result.labels = self.labels;
        result.links = self.links;
        result.parameters = self.parameters;
        result
    }
}

/// Start-time description of a step or fixture
#[derive(Debug, Clone, Default)]
pub struct StepData {
    pub uuid: Option<NodeId>,
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<Parameter>,
}

impl StepData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<NodeId>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub(crate) fn into_step(self, uuid: &NodeId) -> StepResult {
        let mut result = StepResult::new(uuid.as_str(), self.name);
        result.description = self.description;
        result.parameters = self.parameters;
        result
    }

    pub(crate) fn into_fixture(self, uuid: &NodeId) -> FixtureResult {
        let mut result = FixtureResult::new(uuid.as_str(), self.name);
        result.description = self.description;
        result.parameters = self.parameters;
        result
    }
}

impl From<&str> for StepData {
    fn from(name: &str) -> Self {
        StepData::new(name)
    }
}

impl From<String> for StepData {
    fn from(name: String) -> Self {
        StepData::new(name)
    }
}

/// Start-time description of a container
#[derive(Debug, Clone, Default)]
pub struct ContainerData {
    pub uuid: Option<NodeId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub links: Vec<Link>,
}

impl ContainerData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<NodeId>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub(crate) fn into_container(self, uuid: &NodeId) -> TestResultContainer {
        let mut result = TestResultContainer::new(uuid.as_str());
        result.name = self.name;
        result.description = self.description;
        result.links = self.links;
        result
    }
}
