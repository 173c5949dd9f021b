//! Labels, links and parameters
//!
//! None of these are deduplicated: a test may carry the same label twice
//! or the same parameter name with different values, and all of them are
//! kept in insertion order.

use serde::{Deserialize, Serialize};

/// Key/value classification of a test (owner, epic, severity, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn owner(value: impl Into<String>) -> Self {
        Self::new("owner", value)
    }

    pub fn epic(value: impl Into<String>) -> Self {
        Self::new("epic", value)
    }

    pub fn feature(value: impl Into<String>) -> Self {
        Self::new("feature", value)
    }

    pub fn story(value: impl Into<String>) -> Self {
        Self::new("story", value)
    }

    pub fn severity(value: impl Into<String>) -> Self {
        Self::new("severity", value)
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self::new("tag", value)
    }

    pub fn suite(value: impl Into<String>) -> Self {
        Self::new("suite", value)
    }

    pub fn host(value: impl Into<String>) -> Self {
        Self::new("host", value)
    }

    pub fn thread(value: impl Into<String>) -> Self {
        Self::new("thread", value)
    }
}

/// External reference attached to a test or container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub name: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link_type: None,
            url: None,
        }
    }

    pub fn with_type(mut self, link_type: impl Into<String>) -> Self {
        self.link_type = Some(link_type.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Issue tracker link
    pub fn issue(name: impl Into<String>) -> Self {
        Self::new(name).with_type("issue")
    }

    /// Test management system link
    pub fn tms(name: impl Into<String>) -> Self {
        Self::new(name).with_type("tms")
    }
}

/// Named input of a test or step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,

    /// Excluded parameters are kept in the report but ignored for history
    #[serde(default)]
    pub excluded: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            excluded: false,
        }
    }

    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }
}
