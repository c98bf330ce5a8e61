//! Architecture description
//!
//! The deduced resources, the closures that run on them, and the relationships
//! between the two. This is what gets handed to generators, serialized as JSON.

pub mod resource_id;

pub use resource_id::resource_id;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One argument of a resource constructor or infrastructure operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Argument {
    /// Target-rendered literal, `undefined` when absent
    Text {
        index: usize,
        name: String,
        value: String,
    },
    Resource {
        index: usize,
        name: String,
        #[serde(rename = "resourceId")]
        resource_id: String,
    },
    Closure {
        index: usize,
        name: String,
        #[serde(rename = "closureId")]
        closure_id: String,
    },
    CapturedProperty {
        index: usize,
        name: String,
        #[serde(rename = "resourceId")]
        resource_id: String,
        property: String,
    },
}

impl Argument {
    pub fn index(&self) -> usize {
        match self {
            Argument::Text { index, .. }
            | Argument::Resource { index, .. }
            | Argument::Closure { index, .. }
            | Argument::CapturedProperty { index, .. } => *index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Argument::Text { name, .. }
            | Argument::Resource { name, .. }
            | Argument::Closure { name, .. }
            | Argument::CapturedProperty { name, .. } => name,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Text { name, value, .. } => write!(f, "{}={}", name, value),
            Argument::Resource { name, resource_id, .. } => write!(f, "{}=<{}>", name, resource_id),
            Argument::Closure { name, closure_id, .. } => write!(f, "{}=[{}]", name, closure_id),
            Argument::CapturedProperty {
                name,
                resource_id,
                property,
                ..
            } => write!(f, "{}=<{}>.{}", name, resource_id, property),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    /// Fully qualified resource type, e.g. `@plutolang/pluto.Queue`
    #[serde(rename = "type")]
    pub resource_type: String,
    pub arguments: Vec<Argument>,
}

/// A code bundle staged on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub id: String,
    /// Directory holding the rendered entry file
    pub path: PathBuf,
    #[serde(rename = "accessedEnvVars")]
    pub accessed_env_vars: Vec<String>,
}

/// Relationships refer to resources and closures by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Relationship {
    /// A resource operation invoked while deploying
    Infrastructure {
        caller: String,
        operation: String,
        arguments: Vec<Argument>,
    },
    /// A closure calling a resource at runtime
    Client {
        bundle: String,
        resource: String,
        operation: String,
    },
    /// A closure reading a property only known after deployment
    CapturedProperty {
        bundle: String,
        resource: String,
        property: String,
    },
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Infrastructure {
                caller,
                operation,
                arguments,
            } => {
                let arguments: Vec<String> = arguments.iter().map(ToString::to_string).collect();
                write!(f, "{}.{}({})", caller, operation, arguments.join(", "))
            }
            Relationship::Client {
                bundle,
                resource,
                operation,
            } => write!(f, "{} -> {}.{}()", bundle, resource, operation),
            Relationship::CapturedProperty {
                bundle,
                resource,
                property,
            } => write!(f, "{} -> {}.{}", bundle, resource, property),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub resources: Vec<Resource>,
    pub closures: Vec<Closure>,
    pub relationships: Vec<Relationship>,
}

impl Architecture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        if self.find_resource(&resource.id).is_some() {
            return Err(Error::Architecture(format!("Resource '{}' already exists", resource.id)));
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn add_closure(&mut self, closure: Closure) -> Result<()> {
        if self.find_closure(&closure.id).is_some() {
            return Err(Error::Architecture(format!(
                "Compute closure '{}' already exists",
                closure.id
            )));
        }
        self.closures.push(closure);
        Ok(())
    }

    pub fn add_relationship(&mut self, relationship: Relationship) {
        self.relationships.push(relationship);
    }

    pub fn find_resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn find_closure(&self, id: &str) -> Option<&Closure> {
        self.closures.iter().find(|c| c.id == id)
    }

    /// Append everything in `other`; ids must not collide
    pub fn merge(&mut self, other: Architecture) -> Result<()> {
        for resource in other.resources {
            self.add_resource(resource)?;
        }
        for closure in other.closures {
            self.add_closure(closure)?;
        }
        self.relationships.extend(other.relationships);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.closures.is_empty() && self.relationships.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
