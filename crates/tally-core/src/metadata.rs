//! Seam for adapter-side metadata extraction
//!
//! How labels, links and parameters are discovered from a test's source is
//! the adapter's business. It hands the engine a plain `Metadata` value,
//! which flows through the ordinary add operations.
use crate::data::TestData;
use crate::id::NodeId;
use crate::lifecycle::Lifecycle;
use tally_model::{Label, Link, Parameter};
use tracing::debug;

/// What an adapter knows about a test before running it
#[derive(Debug, Clone, Default)]
pub struct TestDescriptor {
    pub name: String,
    pub full_name: Option<String>,
    pub tags: Vec<String>,
    /// Key/value annotations in declaration order (keys may repeat)
    pub attributes: Vec<(String, String)>,
    /// Data-driven arguments of this invocation
    pub arguments: Vec<(String, String)>,
}

impl TestDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    /// Start data for this test with the extracted metadata already applied
    pub fn to_test_data(&self, extractor: &dyn MetadataExtractor) -> TestData {
        let metadata = extractor.extract(self);
        let mut data = TestData::new(self.name.clone());
        data.full_name = self.full_name.clone();
        data.labels = metadata.labels;
        data.links = metadata.links;
        data.parameters = metadata.parameters;
        data
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub labels: Vec<Label>,
    pub links: Vec<Link>,
    pub parameters: Vec<Parameter>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.links.is_empty() && self.parameters.is_empty()
    }

    pub fn merge(mut self, other: Metadata) -> Self {
        self.labels.extend(other.labels);
        self.links.extend(other.links);
        self.parameters.extend(other.parameters);
        self
    }
}

/// Pure function from a test descriptor to its metadata
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, descriptor: &TestDescriptor) -> Metadata;
}

impl<F> MetadataExtractor for F
where
    F: Fn(&TestDescriptor) -> Metadata + Send + Sync,
{
    fn extract(&self, descriptor: &TestDescriptor) -> Metadata {
        self(descriptor)
    }
}

/// Maps well-known attribute keys to labels and links, tags to tag labels
/// and arguments to parameters. Unknown keys are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeExtractor;

const LABEL_KEYS: &[&str] = &["epic", "feature", "story", "owner", "severity", "suite", "layer", "lead"];

impl MetadataExtractor for AttributeExtractor {
    fn extract(&self, descriptor: &TestDescriptor) -> Metadata {
        let mut metadata = Metadata::default();

        for (key, value) in &descriptor.attributes {
            match key.as_str() {
                "issue" => metadata.links.push(Link::issue(value.as_str())),
                "tms" => metadata.links.push(Link::tms(value.as_str())),
                "link" => metadata.links.push(Link::new(value.as_str())),
                key if LABEL_KEYS.contains(&key) => {
                    metadata.labels.push(Label::new(key, value.as_str()))
                }
                _ => {}
            }
        }

        metadata
            .labels
            .extend(descriptor.tags.iter().map(|tag| Label::tag(tag.as_str())));
        metadata.parameters.extend(
            descriptor
                .arguments
                .iter()
                .map(|(name, value)| Parameter::new(name.as_str(), value.as_str())),
        );
        metadata
    }
}

impl Lifecycle {
    /// Feed extracted metadata into an in-progress test. Returns how many
    /// entries were recorded.
    pub fn apply_metadata(&self, id: &NodeId, metadata: Metadata) -> usize {
        let mut applied = 0;
        for label in metadata.labels {
            applied += usize::from(self.add_label_to(id, label));
        }
        for link in metadata.links {
            applied += usize::from(self.add_link_to(id, link));
        }
        for parameter in metadata.parameters {
            applied += usize::from(self.add_parameter_to(id, parameter));
        }
        debug!(uuid = %id, applied, "metadata applied");
        applied
    }
}
