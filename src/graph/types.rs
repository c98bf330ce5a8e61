//! Resource graph entities
//!
//! Entities carry the source text of their node so a graph prints on its own.

use crate::NodeId;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Where a resource object comes from, relative to the scope the graph describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOrigin {
    /// Constructed inside the scope
    InternalCreated,
    /// Constructed in an enclosing scope
    ExternalCreated,
    /// Passed in as a parameter
    ParameterPassed,
}

impl ResourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceOrigin::InternalCreated => "InternalCreated",
            ResourceOrigin::ExternalCreated => "ExternalCreated",
            ResourceOrigin::ParameterPassed => "ParameterPassed",
        }
    }
}

/// A resource object; identity is its node
///
/// `node` is the constructor call, or the `Parameter` for parameter-passed
/// resources, which carry no arguments.
#[derive(Debug)]
pub struct Resource {
    pub origin: ResourceOrigin,
    pub node: NodeId,
    pub arguments: Vec<Argument>,
    pub(crate) text: String,
}

impl Resource {
    pub fn new(origin: ResourceOrigin, node: NodeId, arguments: Vec<Argument>, text: impl Into<String>) -> Self {
        Self {
            origin,
            node,
            arguments,
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource#{}({}", self.origin.as_str(), self.text)?;
        write_arguments(f, &self.arguments)?;
        write!(f, ")")
    }
}

/// Code that runs remotely: a `def`, a lambda, or a call returning a callable
#[derive(Debug)]
pub struct Bundle {
    pub node: NodeId,
    pub(crate) text: String,
}

impl Bundle {
    pub fn new(node: NodeId, text: impl Into<String>) -> Self {
        Self {
            node,
            text: text.into(),
        }
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bundle({})", self.text)
    }
}

#[derive(Debug, Clone)]
pub enum Argument {
    /// A value folded at evaluation time; `None` when neither passed nor defaulted
    Text { node: Option<NodeId>, text: String },
    Resource(Arc<Resource>),
    CapturedProperty { resource: Arc<Resource>, property: String },
    Bundle(Arc<Bundle>),
}

impl Argument {
    pub fn text(node: Option<NodeId>, text: impl Into<String>) -> Self {
        Argument::Text {
            node,
            text: text.into(),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Text { node: None, .. } => write!(f, "Argument#Text(undefined)"),
            Argument::Text { text, .. } => write!(f, "Argument#Text({})", text),
            Argument::Resource(resource) => write!(f, "Argument#Resource({})", resource),
            Argument::CapturedProperty { resource, property } => {
                write!(f, "Argument#CapturedProperty({}, {})", resource, property)
            }
            Argument::Bundle(bundle) => write!(f, "Argument#Bundle({})", bundle),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Relationship {
    /// An infrastructure operation; `node` is the call
    Infrastructure {
        node: NodeId,
        caller: Arc<Resource>,
        operation: String,
        arguments: Vec<Argument>,
    },
    Client {
        bundle: Arc<Bundle>,
        resource: Arc<Resource>,
        operation: String,
    },
    CapturedProperty {
        bundle: Arc<Bundle>,
        resource: Arc<Resource>,
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
                ..
            } => {
                write!(f, "Relationship#Infrastructure({}, {}", caller, operation)?;
                write_arguments(f, arguments)?;
                write!(f, ")")
            }
            Relationship::Client {
                bundle,
                resource,
                operation,
            } => write!(f, "Relationship#Client({}, {}, {})", bundle, resource, operation),
            Relationship::CapturedProperty {
                bundle,
                resource,
                property,
            } => write!(f, "Relationship#CapturedProperty({}, {}, {})", bundle, resource, property),
        }
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[Argument]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    let rendered: Vec<String> = arguments.iter().map(ToString::to_string).collect();
    write!(f, ", [{}]", rendered.join(", "))
}

/// Resources, bundles and relationships of one scope
#[derive(Debug, Default)]
pub struct ResourceGraph {
    pub resources: Vec<Arc<Resource>>,
    pub bundles: Vec<Arc<Bundle>>,
    pub relationships: Vec<Relationship>,
}

impl ResourceGraph {
    pub fn new(resources: Vec<Arc<Resource>>, bundles: Vec<Arc<Bundle>>, relationships: Vec<Relationship>) -> Self {
        Self {
            resources,
            bundles,
            relationships,
        }
    }

    pub fn merge(&self, other: &ResourceGraph) -> ResourceGraph {
        ResourceGraph {
            resources: self.resources.iter().chain(&other.resources).cloned().collect(),
            bundles: self.bundles.iter().chain(&other.bundles).cloned().collect(),
            relationships: self.relationships.iter().chain(&other.relationships).cloned().collect(),
        }
    }

    pub fn resource(&self, node: NodeId) -> Option<&Arc<Resource>> {
        self.resources.iter().find(|r| r.node == node)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.bundles.is_empty() && self.relationships.is_empty()
    }

    /// Write the listing produced by `Display` to `out`
    pub fn print(&self, out: &mut impl io::Write) -> io::Result<()> {
        write!(out, "{}", self)
    }
}

impl fmt::Display for ResourceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Resources:")?;
        for resource in &self.resources {
            writeln!(f, "    {}", resource)?;
        }
        writeln!(f, "Bundles:")?;
        for bundle in &self.bundles {
            writeln!(f, "    {}", bundle)?;
        }
        writeln!(f, "Relationships:")?;
        for relationship in &self.relationships {
            writeln!(f, "    {}", relationship)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let queue = Arc::new(Resource::new(
            ResourceOrigin::InternalCreated,
            NodeId(1),
            vec![Argument::text(Some(NodeId(2)), "\"q\""), Argument::text(None, "")],
            "Queue(\"q\")",
        ));
        assert_eq!(
            queue.to_string(),
            "Resource#InternalCreated(Queue(\"q\"), [Argument#Text(\"q\"), Argument#Text(undefined)])"
        );

        let param = Resource::new(ResourceOrigin::ParameterPassed, NodeId(3), vec![], "queue: Queue");
        assert_eq!(param.to_string(), "Resource#ParameterPassed(queue: Queue)");

        let bundle = Arc::new(Bundle::new(NodeId(4), "lambda x: x"));
        let relationship = Relationship::Infrastructure {
            node: NodeId(5),
            caller: queue.clone(),
            operation: "subscribe".to_string(),
            arguments: vec![Argument::Bundle(bundle)],
        };
        assert!(relationship
            .to_string()
            .ends_with(", subscribe, [Argument#Bundle(Bundle(lambda x: x))])"));
    }

    #[test]
    fn test_graph_listing_and_merge() {
        let queue = Arc::new(Resource::new(ResourceOrigin::InternalCreated, NodeId(1), vec![], "Queue()"));
        let graph = ResourceGraph::new(vec![queue], vec![], vec![]);
        let other = ResourceGraph::new(vec![], vec![Arc::new(Bundle::new(NodeId(2), "h"))], vec![]);
        let merged = graph.merge(&other);
        assert_eq!(
            merged.to_string(),
            "Resources:\n    Resource#InternalCreated(Queue())\nBundles:\n    Bundle(h)\nRelationships:\n"
        );
        assert!(merged.resource(NodeId(1)).is_some());

        let mut out = Vec::new();
        merged.print(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), merged.to_string());
    }
}
