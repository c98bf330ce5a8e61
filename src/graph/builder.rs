//! Builds the resource graph of a module or function scope

use super::types::{Argument, Bundle, Relationship, Resource, ResourceGraph, ResourceOrigin};
use crate::ast::{ArgumentCategory, NodeKind};
use crate::oracle::{Oracle, Type};
use crate::special::{SpecialCallClassifier, SpecialCalls, SpecialKind};
use crate::tracker::ResourceObjectTracker;
use crate::{Error, NodeId, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Built graphs of one run, keyed by scope node
pub struct GraphCache<'o> {
    oracle: &'o dyn Oracle,
    tracker: ResourceObjectTracker<'o>,
    graphs: RefCell<HashMap<NodeId, Arc<ResourceGraph>>>,
}

impl<'o> GraphCache<'o> {
    pub fn new(oracle: &'o dyn Oracle) -> Self {
        Self {
            oracle,
            tracker: ResourceObjectTracker::new(oracle),
            graphs: RefCell::new(HashMap::new()),
        }
    }

    /// Graph of a module root or a function definition
    pub fn build(&self, scope: NodeId) -> Result<Arc<ResourceGraph>> {
        if let Some(graph) = self.graphs.borrow().get(&scope) {
            return Ok(graph.clone());
        }

        let graph = Arc::new(GraphBuilder::new(self.oracle, &self.tracker, scope).build()?);
        debug!("{}: resource graph\n{}", self.oracle.position(scope), graph);
        self.graphs.borrow_mut().insert(scope, graph.clone());
        Ok(graph)
    }
}

/// One-shot builder for a single scope
struct GraphBuilder<'a, 'o> {
    oracle: &'o dyn Oracle,
    tracker: &'a ResourceObjectTracker<'o>,
    /// Special calls of the scope itself, nested definitions excluded
    specials: SpecialCalls,
    resources: Vec<Arc<Resource>>,
    bundles: Vec<Arc<Bundle>>,
    relationships: Vec<Relationship>,
}

impl<'a, 'o> GraphBuilder<'a, 'o> {
    fn new(oracle: &'o dyn Oracle, tracker: &'a ResourceObjectTracker<'o>, scope: NodeId) -> Self {
        Self {
            oracle,
            tracker,
            specials: SpecialCallClassifier::new(oracle).classify(scope, true),
            resources: Vec::new(),
            bundles: Vec::new(),
            relationships: Vec::new(),
        }
    }

    fn build(mut self) -> Result<ResourceGraph> {
        for call in self.specials.constructors().to_vec() {
            self.find_or_build_resource(call)?;
        }
        for call in self.specials.infra_calls().to_vec() {
            self.build_infra_relationship(call)?;
        }
        Ok(ResourceGraph::new(self.resources, self.bundles, self.relationships))
    }

    fn find_or_build_resource(&mut self, node: NodeId) -> Result<Arc<Resource>> {
        if let Some(resource) = self.resources.iter().find(|r| r.node == node) {
            return Ok(resource.clone());
        }

        let oracle = self.oracle;
        let resource = match oracle.kind(node) {
            NodeKind::Call { .. } if self.specials.contains_any(node) => {
                let arguments = self.argument_list(node)?;
                Resource::new(ResourceOrigin::InternalCreated, node, arguments, oracle.text(node))
            }
            NodeKind::Call { arguments, .. } => {
                let mut built = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    let value = match oracle.kind(*argument) {
                        NodeKind::Argument { value, .. } => Some(*value),
                        _ => None,
                    };
                    built.push(self.create_argument(value)?);
                }
                Resource::new(ResourceOrigin::ExternalCreated, node, built, oracle.text(node))
            }
            _ => Resource::new(ResourceOrigin::ParameterPassed, node, Vec::new(), oracle.text(node)),
        };

        let resource = Arc::new(resource);
        self.resources.push(resource.clone());
        Ok(resource)
    }

    fn build_infra_relationship(&mut self, call: NodeId) -> Result<()> {
        let caller = self.resource_for_callee(call)?;
        let operation = member_name(self.oracle, call)?;
        let arguments = self.argument_list(call)?;
        self.relationships.push(Relationship::Infrastructure {
            node: call,
            caller,
            operation,
            arguments,
        });
        Ok(())
    }

    /// Arguments of a constructor or method call, one per formal parameter after `self`
    ///
    /// Positional arguments are taken up to the first keyword argument; the
    /// remaining parameters take their keyword argument or declared default.
    fn argument_list(&mut self, call: NodeId) -> Result<Vec<Argument>> {
        let oracle = self.oracle;
        let NodeKind::Call { arguments, .. } = oracle.kind(call) else {
            return Err(Error::unsupported(oracle.position(call), "The node is not a call."));
        };

        let mut passed = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let NodeKind::Argument { name, category, value } = oracle.kind(*argument) else {
                continue;
            };
            if *category != ArgumentCategory::Simple {
                return Err(Error::unsupported(
                    oracle.position(*argument),
                    "Unpacked arguments are not supported in resource calls.",
                ));
            }
            passed.push((name.and_then(|n| oracle.program().name_of(n)), *value));
        }

        let mut built = Vec::new();
        let mut index = 0;
        while index < passed.len() && passed[index].0.is_none() {
            built.push(self.create_argument(Some(passed[index].1))?);
            index += 1;
        }
        // skip `self`
        index += 1;

        let function = oracle.function_declaration_for_call(call)?;
        let NodeKind::Function { parameters, .. } = oracle.kind(function) else {
            return Err(Error::unsupported(
                oracle.position(call),
                "Only can get the parameter name from a function.",
            ));
        };
        for parameter in parameters.iter().skip(index) {
            let NodeKind::Parameter { name, default, .. } = oracle.kind(*parameter) else {
                continue;
            };
            let parameter_name = name.and_then(|n| oracle.program().name_of(n));
            let expression = passed
                .iter()
                .find(|(label, _)| label.is_some() && *label == parameter_name)
                .map(|(_, value)| *value)
                .or(*default);
            built.push(self.create_argument(expression)?);
        }
        Ok(built)
    }

    fn create_argument(&mut self, expression: Option<NodeId>) -> Result<Argument> {
        let oracle = self.oracle;
        let Some(expression) = expression else {
            return Ok(Argument::text(None, ""));
        };

        if matches!(oracle.kind(expression), NodeKind::Call { .. })
            && self.specials.contains(expression, SpecialKind::CapturedProps)
        {
            let resource = self.resource_for_callee(expression)?;
            let property = member_name(oracle, expression)?;
            return Ok(Argument::CapturedProperty { resource, property });
        }

        let ty = oracle.type_of(expression);
        if matches!(oracle.kind(expression), NodeKind::Lambda { .. }) || matches!(ty, Type::Function(_)) {
            return self.create_bundle_argument(expression, &ty);
        }

        if oracle.is_resource_type(&ty) {
            return Ok(Argument::Resource(self.find_resource(expression)?));
        }

        Ok(Argument::text(Some(expression), oracle.text(expression)))
    }

    fn create_bundle_argument(&mut self, expression: NodeId, ty: &Type) -> Result<Argument> {
        let oracle = self.oracle;
        let node = match oracle.kind(expression) {
            NodeKind::Name { .. } => match ty {
                Type::Function(function) => match function.node {
                    Some(node) => node,
                    None => {
                        return Err(Error::unsupported(
                            oracle.position(expression),
                            format!(
                                "The function argument '{}' must name a function definition.",
                                oracle.text(expression)
                            ),
                        ));
                    }
                },
                _ => {
                    return Err(Error::unsupported(
                        oracle.position(expression),
                        "The argument must be a function.",
                    ));
                }
            },
            _ => expression,
        };

        let bundle = match self.bundles.iter().find(|b| b.node == node) {
            Some(bundle) => bundle.clone(),
            None => {
                let bundle = Arc::new(Bundle::new(node, oracle.text(node)));
                self.bundles.push(bundle.clone());
                bundle
            }
        };
        Ok(Argument::Bundle(bundle))
    }

    /// Resource an object expression refers to, through its declaration chain
    fn find_resource(&mut self, expression: NodeId) -> Result<Arc<Resource>> {
        let oracle = self.oracle;
        let declaration = match oracle.kind(expression) {
            NodeKind::Name { .. } => self.tracker.name_declaration(expression)?,
            NodeKind::Call { .. } => self
                .tracker
                .is_creating_resource(expression)?
                .then_some(expression),
            other => {
                return Err(Error::unsupported(
                    oracle.position(expression),
                    format!("The resource object expression '{}' is not supported.", other.name()),
                ));
            }
        };

        let Some(declaration) = declaration else {
            return Err(Error::missing(
                oracle.position(expression),
                "Cannot find the resource object declaration.",
            ));
        };
        self.find_or_build_resource(declaration)
    }

    /// Resource whose member a call invokes; the member must be accessed directly
    fn resource_for_callee(&mut self, call: NodeId) -> Result<Arc<Resource>> {
        let oracle = self.oracle;
        let NodeKind::Call { callee, .. } = oracle.kind(call) else {
            return Err(Error::unsupported(oracle.position(call), "The node is not a call."));
        };
        let NodeKind::MemberAccess { object, .. } = oracle.kind(*callee) else {
            return Err(Error::unsupported(
                oracle.position(*callee),
                "The member of the resource object must be accessed directly.",
            ));
        };
        if !matches!(oracle.kind(*object), NodeKind::Name { .. } | NodeKind::Call { .. }) {
            return Err(Error::unsupported(
                oracle.position(*object),
                "The member of the resource object must be accessed directly.",
            ));
        }
        self.find_resource(*object)
    }
}

/// Name of the method a call invokes
pub fn member_name(oracle: &dyn Oracle, call: NodeId) -> Result<String> {
    let NodeKind::Call { callee, .. } = oracle.kind(call) else {
        return Err(Error::unsupported(oracle.position(call), "The node is not a call."));
    };
    match oracle.type_of(*callee) {
        Type::Function(function) => Ok(function.name),
        _ => Err(Error::oracle(
            oracle.position(call),
            "The left expression of the call must be a function.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_module_graph() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router, Queue, QueueOptions\n",
            "router = Router(\"api\")\n",
            "queue = Queue(\"jobs\", opts=QueueOptions(fifo=True))\n",
            "def handler(req):\n",
            "    queue.push(req)\n",
            "router.get(\"/hello\", handler)\n",
            "queue.subscribe(lambda msg: print(msg))\n",
        ));
        let cache = GraphCache::new(&oracle);
        let graph = cache.build(testing::main_root(&oracle)).unwrap();

        assert_eq!(graph.resources.len(), 2);
        assert!(graph.resources.iter().all(|r| r.origin == ResourceOrigin::InternalCreated));
        let queue = &graph.resources[1];
        // `name` then `opts`
        assert_eq!(queue.arguments.len(), 2);
        assert_eq!(queue.arguments[0].to_string(), "Argument#Text(\"jobs\")");
        assert_eq!(queue.arguments[1].to_string(), "Argument#Text(QueueOptions(fifo=True))");

        assert_eq!(graph.bundles.len(), 2);
        assert_eq!(graph.relationships.len(), 2);
        let Relationship::Infrastructure {
            caller,
            operation,
            arguments,
            ..
        } = &graph.relationships[0]
        else {
            panic!("expected infrastructure relationship");
        };
        assert_eq!(operation, "get");
        assert_eq!(caller.node, testing::call_to(&oracle, "Router"));
        let Argument::Bundle(bundle) = &arguments[1] else {
            panic!("expected bundle argument");
        };
        // a function name becomes its definition
        assert_eq!(bundle.node, testing::definition(&oracle, "handler"));

        // cached per scope
        let again = cache.build(testing::main_root(&oracle)).unwrap();
        assert!(Arc::ptr_eq(&graph, &again));
    }

    #[test]
    fn test_defaults_fill_missing_parameters() {
        let oracle = testing::load("from pluto_client import Queue\nqueue = Queue()\n");
        let graph = GraphCache::new(&oracle).build(testing::main_root(&oracle)).unwrap();
        let queue = &graph.resources[0];
        // `name=None` and `opts=None` defaults
        assert_eq!(queue.arguments.len(), 2);
        assert_eq!(queue.arguments[0].to_string(), "Argument#Text(None)");
    }

    #[test]
    fn test_resource_and_captured_property_arguments() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router, Function\n",
            "router = Router(\"api\")\n",
            "fn = Function(lambda x: x, name=router.url())\n",
        ));
        let graph = GraphCache::new(&oracle).build(testing::main_root(&oracle)).unwrap();
        let function = graph
            .resources
            .iter()
            .find(|r| r.text().starts_with("Function("))
            .unwrap();
        assert!(matches!(function.arguments[0], Argument::Bundle(_)));
        let Argument::CapturedProperty { resource, property } = &function.arguments[1] else {
            panic!("expected captured property");
        };
        assert_eq!(property, "url");
        assert_eq!(resource.node, testing::call_to(&oracle, "Router"));
    }

    #[test]
    fn test_function_scope_resources() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router, Queue\n",
            "shared = Queue(\"shared\")\n",
            "def make(router: Router, name):\n",
            "    q = Queue(name)\n",
            "    router.post(\"/p\", lambda r: q.push(r))\n",
            "    shared.subscribe(lambda m: m)\n",
        ));
        let make = testing::definition(&oracle, "make");
        let graph = GraphCache::new(&oracle).build(make).unwrap();
        let origins: Vec<_> = graph.resources.iter().map(|r| r.origin).collect();
        assert_eq!(
            origins,
            vec![
                ResourceOrigin::InternalCreated,
                ResourceOrigin::ParameterPassed,
                ResourceOrigin::ExternalCreated,
            ]
        );
        assert_eq!(graph.relationships.len(), 2);
    }

    #[test]
    fn test_unknown_and_indirect_callers() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router\n",
            "routers = [Router(\"a\")]\n",
            "routers[0].get(\"/\", lambda r: r)\n",
        ));
        let result = GraphCache::new(&oracle).build(testing::main_root(&oracle));
        // the callee type of `routers[0].get` is unknown; nothing is classified
        assert!(result.unwrap().relationships.is_empty());

        let oracle = testing::load(concat!(
            "from pluto_client import Router\n",
            "router = Router(\"a\")\n",
            "def pick() -> Router:\n",
            "    return router\n",
            "pick().get(\"/\", lambda r: r)\n",
        ));
        let err = GraphCache::new(&oracle)
            .build(testing::main_root(&oracle))
            .unwrap_err();
        assert!(err.to_string().contains("not a class"));
    }

    #[test]
    fn test_call_returning_function_is_bundle() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router\n",
            "router = Router(\"api\")\n",
            "def h(req):\n",
            "    return req\n",
            "def make():\n",
            "    return h\n",
            "router.get(\"/\", make())\n",
        ));
        let graph = GraphCache::new(&oracle).build(testing::main_root(&oracle)).unwrap();
        let Relationship::Infrastructure { arguments, .. } = &graph.relationships[0] else {
            panic!("expected infrastructure relationship");
        };
        let Argument::Bundle(bundle) = &arguments[1] else {
            panic!("expected bundle argument, got {}", arguments[1]);
        };
        assert_eq!(bundle.node, testing::call_to(&oracle, "make"));
        assert_eq!(graph.bundles.len(), 1);
    }

    #[test]
    fn test_fresh_caches_agree() {
        let source = concat!(
            "from pluto_client import Router, Queue\n",
            "shared = Queue(\"shared\")\n",
            "def make(router: Router, name):\n",
            "    q = Queue(name)\n",
            "    router.post(\"/p\", lambda r: q.push(r))\n",
            "    shared.subscribe(lambda m: m)\n",
        );
        let oracle = testing::load(source);
        let make = testing::definition(&oracle, "make");

        let origins = |graph: &ResourceGraph| -> Vec<(NodeId, ResourceOrigin)> {
            graph.resources.iter().map(|r| (r.node, r.origin)).collect()
        };
        let first = GraphCache::new(&oracle).build(make).unwrap();
        let second = GraphCache::new(&oracle).build(make).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(origins(&first), origins(&second));
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn test_resource_reached_through_several_edges_is_shared() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router, Function\n",
            "router = Router(\"api\")\n",
            "a = Function(lambda x: x, name=router)\n",
            "b = Function(lambda x: x, name=router.url())\n",
            "router.get(\"/\", lambda r: r)\n",
        ));
        let graph = GraphCache::new(&oracle).build(testing::main_root(&oracle)).unwrap();
        let router_node = testing::call_to(&oracle, "Router");
        let routers: Vec<_> = graph.resources.iter().filter(|r| r.node == router_node).collect();
        assert_eq!(routers.len(), 1);
        assert_eq!(graph.resources.len(), 3);
        let router = routers[0];

        let by_text = |prefix: &str| graph.resources.iter().find(|r| r.text().starts_with(prefix)).unwrap();
        let Argument::Resource(passed) = &by_text("Function(lambda x: x, name=router)").arguments[1] else {
            panic!("expected resource argument");
        };
        assert!(Arc::ptr_eq(passed, router));
        let Argument::CapturedProperty { resource, .. } = &by_text("Function(lambda x: x, name=router.url())").arguments[1]
        else {
            panic!("expected captured property");
        };
        assert!(Arc::ptr_eq(resource, router));
        let Relationship::Infrastructure { caller, .. } = &graph.relationships[0] else {
            panic!("expected infrastructure relationship");
        };
        assert!(Arc::ptr_eq(caller, router));
    }
}
