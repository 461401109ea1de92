//! Defines the infrastructure template the descriptor produces: a
//! CloudFormation document holding resource declarations and the
//! outputs surfaced to the operator.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// The only template format version CloudFormation understands.
pub const FORMAT_VERSION: &str = "2010-09-09";

/// What happens to a resource when it is removed from the stack or
/// replaced by an update. Every declared resource is torn down with
/// the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    Delete,
}

/// A named, typed request for a cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,

    pub properties: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<Policy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<Policy>,
}

impl Resource {
    pub fn new(kind: &str, properties: Value) -> Self {
        Resource {
            kind: String::from(kind),
            properties,
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Apply the same policy on removal and on replacement.
    pub fn with_removal_policy(mut self, policy: Policy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }
}

/// A named value surfaced after deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub description: String,
    pub value: Value,
}

/// A handle to a declared resource, usable by later declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    logical_id: String,
}

impl Reference {
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// The resource's primary identifier (`Ref`).
    pub fn id(&self) -> Value {
        json!({ "Ref": self.logical_id })
    }

    /// One of the resource's attributes (`Fn::GetAtt`).
    pub fn attribute(&self, name: &str) -> Value {
        json!({ "Fn::GetAtt": [self.logical_id, name] })
    }
}

/// Build a logical id out of a resource prefix and an instance label.
/// Logical ids may only contain ASCII letters and digits.
pub fn logical_id(prefix: &str, label: &str) -> String {
    format!("{}{}", prefix, label)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// The synthesized template. Resources and outputs are kept sorted so
/// that serializing the same declarations always yields the same
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    pub description: String,

    pub resources: BTreeMap<String, Resource>,

    #[serde(default)]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Template {
            format_version: String::from(FORMAT_VERSION),
            description: description.into(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource declaration. Each logical id may be declared
    /// only once.
    pub fn declare(
        &mut self,
        logical_id: impl Into<String>,
        resource: Resource,
    ) -> Result<Reference> {
        let logical_id = logical_id.into();
        if logical_id.is_empty() || !logical_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("Invalid logical id {:?}", logical_id);
        }
        if self.resources.contains_key(&logical_id) {
            bail!("Resource {:?} is declared more than once", logical_id);
        }
        self.resources.insert(logical_id.clone(), resource);
        Ok(Reference { logical_id })
    }

    /// Add a named output. Each name may be used only once.
    pub fn output(
        &mut self,
        name: impl Into<String>,
        description: &str,
        value: Value,
    ) -> Result<()> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            bail!("Output {:?} is declared more than once", name);
        }
        self.outputs.insert(
            name,
            Output {
                description: String::from(description),
                value,
            },
        );
        Ok(())
    }

    /// Look up a declared resource.
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }
}
