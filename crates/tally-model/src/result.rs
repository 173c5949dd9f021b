//! Frozen test, step, fixture and container results

use crate::meta::{Label, Link, Parameter};
use crate::status::{Stage, Status, StatusDetails};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a captured attachment body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name
    pub name: String,

    /// Generated storage key of the body (e.g. "9c2e...-attachment.png")
    pub source: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A finished test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub uuid: String,

    /// Stable across runs of the same test with the same parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,

    pub stage: Stage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<DateTime<Utc>>,

    /// Top-level steps in call order
    #[serde(default)]
    pub steps: Vec<StepResult>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub labels: Vec<Label>,

    #[serde(default)]
    pub links: Vec<Link>,
}

impl TestResult {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            history_id: None,
            test_case_id: None,
            name: name.into(),
            full_name: None,
            description: None,
            status: Status::Unknown,
            status_details: None,
            stage: Stage::Scheduled,
            start: None,
            stop: None,
            steps: Vec::new(),
            attachments: Vec::new(),
            parameters: Vec::new(),
            labels: Vec::new(),
            links: Vec::new(),
        }
    }

    /// First label with the given name
    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.name == name)
    }

    /// All values of labels with the given name, in insertion order
    pub fn label_values(&self, name: &str) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|l| l.name == name)
            .map(|l| l.value.as_str())
            .collect()
    }

    /// Names of the top-level steps
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Milliseconds between start and stop, if both are known
    pub fn duration_ms(&self) -> Option<i64> {
        duration_ms(self.start, self.stop)
    }

    /// Hash of the test identity: full name (or name) plus the non-excluded
    /// parameters, sorted so that parameter order does not matter.
    pub fn compute_history_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.full_name.as_deref().unwrap_or(&self.name).as_bytes());

        let mut parameters: Vec<&Parameter> =
            self.parameters.iter().filter(|p| !p.excluded).collect();
        parameters.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)));

        for parameter in parameters {
            hasher.update(b"\0");
            hasher.update(parameter.name.as_bytes());
            hasher.update(b"=");
            hasher.update(parameter.value.as_bytes());
        }

        hasher.finalize().to_hex().to_string()
    }
}

/// A finished step, possibly holding nested steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub uuid: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,

    pub stage: Stage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<DateTime<Utc>>,

    #[serde(default)]
    pub steps: Vec<StepResult>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl StepResult {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            description: None,
            status: Status::Unknown,
            status_details: None,
            stage: Stage::Scheduled,
            start: None,
            stop: None,
            steps: Vec::new(),
            attachments: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        duration_ms(self.start, self.stop)
    }
}

/// A finished setup or teardown fixture of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureResult {
    pub uuid: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,

    pub stage: Stage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<DateTime<Utc>>,

    #[serde(default)]
    pub steps: Vec<StepResult>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl FixtureResult {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            description: None,
            status: Status::Unknown,
            status_details: None,
            stage: Stage::Scheduled,
            start: None,
            stop: None,
            steps: Vec::new(),
            attachments: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

/// Groups tests with the fixtures that ran around them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultContainer {
    pub uuid: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ids of tests and nested containers, in start order
    #[serde(default)]
    pub children: Vec<String>,

    #[serde(default)]
    pub befores: Vec<FixtureResult>,

    #[serde(default)]
    pub afters: Vec<FixtureResult>,

    #[serde(default)]
    pub links: Vec<Link>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<DateTime<Utc>>,
}

impl TestResultContainer {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
            description: None,
            children: Vec::new(),
            befores: Vec::new(),
            afters: Vec::new(),
            links: Vec::new(),
            start: None,
            stop: None,
        }
    }
}

fn duration_ms(start: Option<DateTime<Utc>>, stop: Option<DateTime<Utc>>) -> Option<i64> {
    match (start, stop) {
        (Some(start), Some(stop)) => Some((stop - start).num_milliseconds()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_id_ignores_parameter_order() {
        let mut a = TestResult::new("1", "login");
        a.parameters.push(Parameter::new("user", "alice"));
        a.parameters.push(Parameter::new("browser", "firefox"));

        let mut b = TestResult::new("2", "login");
        b.parameters.push(Parameter::new("browser", "firefox"));
        b.parameters.push(Parameter::new("user", "alice"));

        assert_eq!(a.compute_history_id(), b.compute_history_id());
    }

    #[test]
    fn test_history_id_skips_excluded_parameters() {
        let mut a = TestResult::new("1", "login");
        a.parameters.push(Parameter::new("user", "alice"));

        let mut b = a.clone();
        b.parameters.push(Parameter::new("timestamp", "1700000000").excluded());

        let mut c = a.clone();
        c.parameters.push(Parameter::new("user", "bob"));

        assert_eq!(a.compute_history_id(), b.compute_history_id());
        assert_ne!(a.compute_history_id(), c.compute_history_id());
    }

    #[test]
    fn test_history_id_prefers_full_name() {
        let mut a = TestResult::new("1", "works");
        a.full_name = Some("suite.one.works".to_string());
        let mut b = TestResult::new("2", "works");
        b.full_name = Some("suite.two.works".to_string());

        assert_ne!(a.compute_history_id(), b.compute_history_id());
    }

    #[test]
    fn test_label_values_keep_duplicates() {
        let mut result = TestResult::new("1", "t");
        result.labels.push(Label::tag("smoke"));
        result.labels.push(Label::owner("alice"));
        result.labels.push(Label::tag("smoke"));

        assert_eq!(result.label_values("tag"), vec!["smoke", "smoke"]);
        assert_eq!(result.label("owner").map(|l| l.value.as_str()), Some("alice"));
    }

    #[test]
    fn test_duration() {
        let mut step = StepResult::new("s", "step");
        assert_eq!(step.duration_ms(), None);

        let start = Utc::now();
        step.start = Some(start);
        step.stop = Some(start + chrono::Duration::milliseconds(250));
        assert_eq!(step.duration_ms(), Some(250));
    }

    #[test]
    fn test_camel_case_fields() {
        let mut result = TestResult::new("1", "t");
        result.full_name = Some("a.b.t".to_string());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["fullName"], "a.b.t");
        assert_eq!(json["status"], "unknown");
        assert!(json.get("historyId").is_none());
    }
}
