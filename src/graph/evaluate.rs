//! Turns a resource graph into architecture entities
//!
//! Resources get their ids, arguments are folded into text, and every bundle
//! argument is extracted and staged for writing. Client calls and captured
//! properties reached by a bundle become relationships of its closure.

use super::builder::member_name;
use super::types::{Argument, Bundle, Relationship, Resource, ResourceGraph, ResourceOrigin};
use crate::arch::{self, Architecture, resource_id};
use crate::ast::NodeKind;
use crate::extract::CodeExtractor;
use crate::oracle::{Oracle, Type};
use crate::scope::Declaration;
use crate::tracker::ResourceObjectTracker;
use crate::value::{Filling, Fillings, TypeScriptEnv, ValueEvaluator};
use crate::{Error, NodeId, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Evaluated resources keyed by constructor call or parameter node
pub type ResourceMapping = HashMap<NodeId, arch::Resource>;

/// Names every resource id is derived from
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub project: String,
    pub stack: String,
    /// Directory each bundle gets a subdirectory of
    pub bundle_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    /// Resources evaluated by an enclosing scope
    pub resource_fillings: ResourceMapping,
    /// Call-site arguments of the function the graph belongs to
    pub argument_fillings: Fillings,
    pub bundle_filename: String,
    pub export_name: String,
    /// Appended to every bundle id as `_<suffix>`
    pub bundle_suffix: Option<String>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            resource_fillings: ResourceMapping::new(),
            argument_fillings: Fillings::new(),
            bundle_filename: "__init__.py".to_string(),
            export_name: "_default".to_string(),
            bundle_suffix: None,
        }
    }
}

/// Rendered bundle source waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBundle {
    pub id: String,
    pub dir: PathBuf,
    pub filename: String,
    pub code: String,
}

impl StagedBundle {
    pub fn file(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

#[derive(Debug)]
pub struct Evaluation {
    pub architecture: Architecture,
    /// Every resource of the graph, including external and parameter-passed ones
    pub resource_mapping: ResourceMapping,
    pub bundles: Vec<StagedBundle>,
}

/// Analyses shared by every evaluation of a run
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a, 'o> {
    pub oracle: &'o dyn Oracle,
    pub extractor: &'a CodeExtractor<'o>,
    pub values: &'a ValueEvaluator<'o>,
    pub tracker: &'a ResourceObjectTracker<'o>,
}

pub struct GraphEvaluator<'a, 'o> {
    context: EvaluationContext<'a, 'o>,
    project: &'a ProjectInfo,
    options: EvaluateOptions,
    resource_mapping: ResourceMapping,
    /// Closures in creation order, keyed by bundle node
    closures: Vec<(NodeId, arch::Closure)>,
    staged: Vec<StagedBundle>,
    /// Client and captured property relationships found inside bundles
    bundle_relationships: Vec<arch::Relationship>,
}

impl<'a, 'o> GraphEvaluator<'a, 'o> {
    pub fn new(context: EvaluationContext<'a, 'o>, project: &'a ProjectInfo, options: EvaluateOptions) -> Self {
        Self {
            context,
            project,
            options,
            resource_mapping: ResourceMapping::new(),
            closures: Vec::new(),
            staged: Vec::new(),
            bundle_relationships: Vec::new(),
        }
    }

    pub fn evaluate(mut self, graph: &ResourceGraph) -> Result<Evaluation> {
        let mut architecture = Architecture::new();

        for resource in &graph.resources {
            let evaluated = self.evaluate_resource(resource)?;
            if resource.origin == ResourceOrigin::InternalCreated {
                architecture.add_resource(evaluated.clone())?;
            }
            self.resource_mapping.insert(resource.node, evaluated);
        }

        for (index, relationship) in graph.relationships.iter().enumerate() {
            let evaluated = self.evaluate_relationship(relationship, index)?;
            architecture.add_relationship(evaluated);
        }

        for (_, closure) in self.closures {
            architecture.add_closure(closure)?;
        }
        for relationship in self.bundle_relationships {
            architecture.add_relationship(relationship);
        }

        info!(
            "Evaluated graph: {} resources, {} closures, {} relationships",
            architecture.resources.len(),
            architecture.closures.len(),
            architecture.relationships.len()
        );
        Ok(Evaluation {
            architecture,
            resource_mapping: self.resource_mapping,
            bundles: self.staged,
        })
    }

    fn evaluate_resource(&mut self, resource: &Resource) -> Result<arch::Resource> {
        match resource.origin {
            ResourceOrigin::InternalCreated => self.evaluate_internal_resource(resource),
            ResourceOrigin::ExternalCreated => self
                .options
                .resource_fillings
                .get(&resource.node)
                .cloned()
                .ok_or_else(|| {
                    Error::missing(
                        self.context.oracle.position(resource.node),
                        format!("Resource {} not found in fillings", resource),
                    )
                }),
            ResourceOrigin::ParameterPassed => self.parameter_resource(resource.node),
        }
    }

    fn evaluate_internal_resource(&mut self, resource: &Resource) -> Result<arch::Resource> {
        let call = resource.node;
        let name = self.resource_name(resource)?.unwrap_or_else(|| "default".to_string());
        let resource_type = self.resource_type(call)?;
        let id = resource_id(&self.project.project, &self.project.stack, &resource_type, &name);
        debug!("{}: resource '{}'", self.context.oracle.position(call), id);

        let mut arguments = Vec::with_capacity(resource.arguments.len());
        for (index, argument) in resource.arguments.iter().enumerate() {
            let parameter = self.parameter_name(call, index)?;
            let bundle_id = format!("{}_constructor_{}", id, index);
            arguments.push(self.evaluate_argument(argument, parameter, index, bundle_id)?);
        }

        Ok(arch::Resource {
            id,
            name,
            resource_type,
            arguments,
        })
    }

    /// Value of the argument bound to the `name` parameter, if one was given
    fn resource_name(&self, resource: &Resource) -> Result<Option<String>> {
        let oracle = self.context.oracle;
        for (index, argument) in resource.arguments.iter().enumerate() {
            if self.parameter_name(resource.node, index)? != "name" {
                continue;
            }
            let Argument::Text { node, .. } = argument else {
                return Err(Error::unsupported(
                    oracle.position(resource.node),
                    "Resource name must be a text",
                ));
            };
            let Some(node) = node else {
                continue;
            };

            let value = self.context.values.evaluate(*node, &self.options.argument_fillings)?;
            let rendered = value.to_target(&TypeScriptEnv);
            return match serde_json::from_str::<serde_json::Value>(&rendered) {
                Ok(serde_json::Value::String(name)) => Ok(Some(name)),
                Ok(serde_json::Value::Null) => Ok(None),
                Ok(other) => Ok(Some(other.to_string())),
                // runtime values never fall back to the default name
                Err(_) => Err(Error::unsupported(
                    oracle.position(*node),
                    format!(
                        "The resource name '{}' must be resolvable at compile time. Names read from \
                         environment variables or other runtime values are rejected rather than \
                         replaced with 'default'.",
                        rendered
                    ),
                )),
            };
        }
        Ok(None)
    }

    /// The `fqn` class attribute of the constructed resource class
    fn resource_type(&self, call: NodeId) -> Result<String> {
        let oracle = self.context.oracle;
        let NodeKind::Call { callee, .. } = oracle.kind(call) else {
            return Err(Error::unsupported(oracle.position(call), "The node is not a call."));
        };
        let Type::Class(class) = oracle.type_of(*callee) else {
            return Err(Error::oracle(
                oracle.position(call),
                "The constructor node must be a class type.",
            ));
        };
        let class_name = class.short_name().to_string();

        let member = oracle
            .mro(&class)
            .iter()
            .find_map(|c| oracle.class_members(c).into_iter().find(|m| m.name == "fqn"));
        let Some(member) = member else {
            return Err(Error::unsupported(
                oracle.position(call),
                format!("The resource type {} does not have a 'fqn' field.", class_name),
            ));
        };
        let [declaration] = member.declarations.as_slice() else {
            return Err(Error::unsupported(
                oracle.position(call),
                format!("The 'fqn' field of the resource type {} must be assigned only once.", class_name),
            ));
        };
        let Declaration::Variable { node: target } = declaration else {
            return Err(Error::unsupported(
                oracle.position(call),
                format!("The 'fqn' field of the resource type {} must be a variable.", class_name),
            ));
        };
        let value = match oracle.program().parent(*target).map(|p| oracle.kind(p)) {
            Some(NodeKind::Assignment {
                target: t,
                value: Some(value),
                ..
            }) if t == target => *value,
            _ => {
                return Err(Error::unsupported(
                    oracle.position(*target),
                    format!(
                        "The 'fqn' field of the resource type {} must be a variable assignment.",
                        class_name
                    ),
                ));
            }
        };

        let fqn = self.context.values.evaluate(value, &Fillings::new())?;
        match fqn.as_str() {
            Some(fqn) => Ok(fqn.to_string()),
            None => Err(Error::unsupported(
                oracle.position(value),
                format!("The 'fqn' field of the resource type {} must be a string.", class_name),
            )),
        }
    }

    /// Resource a parameter is bound to at the call site
    fn parameter_resource(&self, parameter: NodeId) -> Result<arch::Resource> {
        let context = self.context;
        let oracle = context.oracle;
        let at = oracle.position(parameter);
        let display = format!("Resource#ParameterPassed({})", oracle.text(parameter));

        let Some(Filling::Argument(expression)) = self.options.argument_fillings.get(&parameter) else {
            return Err(Error::missing(at, format!("Resource {} not found in fillings", display)));
        };
        let constructor = match oracle.kind(*expression) {
            NodeKind::Name { .. } => {
                let Some(declaration) = context.tracker.name_declaration(*expression)? else {
                    return Err(Error::missing(
                        at,
                        format!("The declaration node for {} not found", display),
                    ));
                };
                if !matches!(oracle.kind(declaration), NodeKind::Call { .. }) {
                    return Err(Error::unsupported(
                        at,
                        format!("The declaration node for {} is not a call node", display),
                    ));
                }
                declaration
            }
            NodeKind::Call { .. } => *expression,
            _ => {
                return Err(Error::unsupported(
                    at,
                    format!("The value expression of {} is not supported", display),
                ));
            }
        };

        self.options
            .resource_fillings
            .get(&constructor)
            .cloned()
            .ok_or_else(|| Error::missing(at, format!("The resource associated with {} not found", display)))
    }

    fn evaluate_relationship(&mut self, relationship: &Relationship, index: usize) -> Result<arch::Relationship> {
        let oracle = self.context.oracle;
        match relationship {
            Relationship::Infrastructure {
                node,
                caller,
                operation,
                arguments,
            } => {
                let Some(caller_id) = self.resource_mapping.get(&caller.node).map(|r| r.id.clone()) else {
                    return Err(Error::missing(
                        oracle.position(*node),
                        format!("Caller resource {} not found", caller),
                    ));
                };

                let mut evaluated = Vec::with_capacity(arguments.len());
                for (arg_index, argument) in arguments.iter().enumerate() {
                    let parameter = self.parameter_name(*node, arg_index)?;
                    let bundle_id = format!("{}_{}_{}_{}", caller_id, index, operation, arg_index);
                    evaluated.push(self.evaluate_argument(argument, parameter, arg_index, bundle_id)?);
                }
                Ok(arch::Relationship::Infrastructure {
                    caller: caller_id,
                    operation: operation.clone(),
                    arguments: evaluated,
                })
            }
            Relationship::Client {
                bundle,
                resource,
                operation,
            } => {
                let (bundle, resource) = self.mapped_pair(bundle, resource)?;
                Ok(arch::Relationship::Client {
                    bundle,
                    resource,
                    operation: operation.clone(),
                })
            }
            Relationship::CapturedProperty {
                bundle,
                resource,
                property,
            } => {
                let (bundle, resource) = self.mapped_pair(bundle, resource)?;
                Ok(arch::Relationship::CapturedProperty {
                    bundle,
                    resource,
                    property: property.clone(),
                })
            }
        }
    }

    /// Ids of an already evaluated bundle and resource
    fn mapped_pair(&self, bundle: &Bundle, resource: &Resource) -> Result<(String, String)> {
        let oracle = self.context.oracle;
        let Some((_, closure)) = self.closures.iter().find(|(node, _)| *node == bundle.node) else {
            return Err(Error::missing(
                oracle.position(bundle.node),
                format!("Bundle {} not found", bundle),
            ));
        };
        let Some(resource) = self.resource_mapping.get(&resource.node) else {
            return Err(Error::missing(
                oracle.position(resource.node),
                format!("Resource {} not found", resource),
            ));
        };
        Ok((closure.id.clone(), resource.id.clone()))
    }

    fn evaluate_argument(
        &mut self,
        argument: &Argument,
        name: String,
        index: usize,
        bundle_id: String,
    ) -> Result<arch::Argument> {
        match argument {
            Argument::Text { node, .. } => {
                let mut value = "undefined".to_string();
                if let Some(node) = node {
                    let evaluated = self.context.values.evaluate(*node, &self.options.argument_fillings)?;
                    if !evaluated.is_none() {
                        value = evaluated.to_target(&TypeScriptEnv);
                    }
                }
                Ok(arch::Argument::Text { index, name, value })
            }
            Argument::Resource(resource) => Ok(arch::Argument::Resource {
                index,
                name,
                resource_id: self.mapped_resource(resource)?.id.clone(),
            }),
            Argument::CapturedProperty { resource, property } => Ok(arch::Argument::CapturedProperty {
                index,
                name,
                resource_id: self.mapped_resource(resource)?.id.clone(),
                property: property.clone(),
            }),
            Argument::Bundle(bundle) => {
                let closure_id = match self.closures.iter().find(|(node, _)| *node == bundle.node) {
                    Some((_, closure)) => closure.id.clone(),
                    None => {
                        let closure = self.evaluate_bundle(bundle, bundle_id)?;
                        let id = closure.id.clone();
                        self.closures.push((bundle.node, closure));
                        id
                    }
                };
                Ok(arch::Argument::Closure {
                    index,
                    name,
                    closure_id,
                })
            }
        }
    }

    fn mapped_resource(&self, resource: &Resource) -> Result<&arch::Resource> {
        self.resource_mapping.get(&resource.node).ok_or_else(|| {
            Error::missing(
                self.context.oracle.position(resource.node),
                format!("The resource associated with argument {} not found", resource),
            )
        })
    }

    fn evaluate_bundle(&mut self, bundle: &Bundle, prepared_id: String) -> Result<arch::Closure> {
        let context = self.context;
        let oracle = context.oracle;
        let entry = match oracle.kind(bundle.node) {
            NodeKind::Function { name, .. } => *name,
            _ => bundle.node,
        };
        let segment = context.extractor.extract(entry, &self.options.argument_fillings)?;

        let id = match &self.options.bundle_suffix {
            Some(suffix) => format!("{}_{}", prepared_id, suffix),
            None => prepared_id,
        };
        let dir = self.project.bundle_dir.join(&id);
        let code = segment.render(Some(&self.options.export_name));
        debug!("{}: bundle '{}'\n{}", oracle.position(bundle.node), id, code);

        for call in segment.called_client_apis() {
            let resource = self.accessed_resource(call)?;
            self.bundle_relationships.push(arch::Relationship::Client {
                bundle: id.clone(),
                resource,
                operation: member_name(oracle, call)?,
            });
        }
        for call in segment.accessed_captured_props() {
            let resource = self.accessed_resource(call)?;
            self.bundle_relationships.push(arch::Relationship::CapturedProperty {
                bundle: id.clone(),
                resource,
                property: member_name(oracle, call)?,
            });
        }

        self.staged.push(StagedBundle {
            id: id.clone(),
            dir: dir.clone(),
            filename: self.options.bundle_filename.clone(),
            code,
        });
        Ok(arch::Closure {
            id,
            path: dir,
            accessed_env_vars: segment.accessed_env_vars(),
        })
    }

    /// Id of the resource a call inside a bundle is made on
    fn accessed_resource(&self, call: NodeId) -> Result<String> {
        let oracle = self.context.oracle;
        let Some(declaration) = self.context.tracker.caller_declaration(call)? else {
            return Err(Error::missing(
                oracle.position(call),
                "No resource object found for the client API call.",
            ));
        };

        if let Some(resource) = self
            .resource_mapping
            .get(&declaration)
            .or_else(|| self.options.resource_fillings.get(&declaration))
        {
            return Ok(resource.id.clone());
        }
        if matches!(oracle.kind(declaration), NodeKind::Parameter { .. }) {
            return Ok(self.parameter_resource(declaration)?.id);
        }
        Err(Error::missing(
            oracle.position(call),
            format!("Resource {} not found", oracle.text(declaration)),
        ))
    }

    /// Name of the formal parameter an argument binds to, after `self`
    fn parameter_name(&self, call: NodeId, index: usize) -> Result<String> {
        let oracle = self.context.oracle;
        let function = oracle.function_declaration_for_call(call)?;
        let NodeKind::Function { parameters, .. } = oracle.kind(function) else {
            return Ok("unknown".to_string());
        };
        let name = parameters
            .get(index + 1)
            .and_then(|p| match oracle.kind(*p) {
                NodeKind::Parameter { name: Some(name), .. } => oracle.program().name_of(*name),
                _ => None,
            })
            .unwrap_or("unknown");
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphCache;
    use crate::special::SpecialCallClassifier;
    use crate::testing;

    fn project() -> ProjectInfo {
        ProjectInfo {
            project: "default".to_string(),
            stack: "dev".to_string(),
            bundle_dir: PathBuf::from("/tmp/bundles"),
        }
    }

    fn evaluate(oracle: &dyn Oracle, scope: NodeId, options: EvaluateOptions) -> Result<Evaluation> {
        let specials = SpecialCallClassifier::new(oracle).classify_program();
        let extractor = CodeExtractor::new(oracle, &specials);
        let values = ValueEvaluator::new(oracle);
        let tracker = ResourceObjectTracker::new(oracle);
        let context = EvaluationContext {
            oracle,
            extractor: &extractor,
            values: &values,
            tracker: &tracker,
        };
        let graph = GraphCache::new(oracle).build(scope)?;
        let project = project();
        GraphEvaluator::new(context, &project, options).evaluate(&graph)
    }

    fn parameter(oracle: &dyn Oracle, name: &str) -> NodeId {
        let program = oracle.program();
        testing::find_nodes(oracle, |k| match k {
            NodeKind::Parameter { name: Some(n), .. } => program.name_of(*n) == Some(name),
            _ => false,
        })[0]
    }

    /// Value expressions of the arguments of a call
    fn argument_values(oracle: &dyn Oracle, call: NodeId) -> Vec<NodeId> {
        let NodeKind::Call { arguments, .. } = oracle.kind(call) else {
            panic!("expected call");
        };
        arguments
            .iter()
            .map(|a| match oracle.kind(*a) {
                NodeKind::Argument { value, .. } => *value,
                _ => panic!("expected argument"),
            })
            .collect()
    }

    const APP: &str = r#"
from pluto_client import Router, Queue

router = Router("api")
queue = Queue("jobs")

def handler(req):
    queue.push(router.url())
    return "ok"

router.get("/hello", handler)
"#;

    #[test]
    fn test_module_evaluation() {
        let oracle = testing::load(APP);
        let evaluation = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap();
        let arch = &evaluation.architecture;

        let router_id = "default_dev__plutolang_pluto_Router_api";
        let queue_id = "default_dev__plutolang_pluto_Queue_jobs";
        assert_eq!(arch.resources.len(), 2);
        assert_eq!(arch.resources[0].id, router_id);
        assert_eq!(arch.resources[0].name, "api");
        assert_eq!(arch.resources[0].resource_type, "@plutolang/pluto.Router");
        assert_eq!(
            arch.resources[1].arguments,
            vec![
                arch::Argument::Text {
                    index: 0,
                    name: "name".to_string(),
                    value: "\"jobs\"".to_string(),
                },
                arch::Argument::Text {
                    index: 1,
                    name: "opts".to_string(),
                    value: "undefined".to_string(),
                },
            ]
        );

        let closure_id = format!("{}_0_get_1", router_id);
        assert_eq!(arch.closures.len(), 1);
        assert_eq!(arch.closures[0].id, closure_id);
        assert_eq!(arch.closures[0].path, PathBuf::from("/tmp/bundles").join(&closure_id));

        assert_eq!(
            arch.relationships,
            vec![
                arch::Relationship::Infrastructure {
                    caller: router_id.to_string(),
                    operation: "get".to_string(),
                    arguments: vec![
                        arch::Argument::Text {
                            index: 0,
                            name: "path".to_string(),
                            value: "\"/hello\"".to_string(),
                        },
                        arch::Argument::Closure {
                            index: 1,
                            name: "fn".to_string(),
                            closure_id: closure_id.clone(),
                        },
                    ],
                },
                arch::Relationship::Client {
                    bundle: closure_id.clone(),
                    resource: queue_id.to_string(),
                    operation: "push".to_string(),
                },
                arch::Relationship::CapturedProperty {
                    bundle: closure_id.clone(),
                    resource: router_id.to_string(),
                    property: "url".to_string(),
                },
            ]
        );

        assert_eq!(evaluation.bundles.len(), 1);
        let bundle = &evaluation.bundles[0];
        assert_eq!(bundle.file(), PathBuf::from("/tmp/bundles").join(&closure_id).join("__init__.py"));
        assert!(bundle.code.contains("queue = Queue.build_client(\"jobs\")"));
        assert!(bundle.code.contains("def handler(req):"));
        assert!(bundle.code.trim_end().ends_with("_default = handler"));
        assert_eq!(evaluation.resource_mapping.len(), 2);
    }

    #[test]
    fn test_default_name_and_duplicates() {
        let oracle = testing::load("from pluto_client import Queue\nqueue = Queue()\n");
        let evaluation = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap();
        assert_eq!(
            evaluation.architecture.resources[0].id,
            "default_dev__plutolang_pluto_Queue_default"
        );

        let oracle = testing::load("from pluto_client import Queue\na = Queue(\"q\")\nb = Queue(name=\"q\")\n");
        let err = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_name_from_constant_expression() {
        let oracle = testing::load(concat!(
            "from pluto_client import Queue\n",
            "prefix = \"orders\"\n",
            "queue = Queue(prefix + \"-q1\")\n",
        ));
        let evaluation = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap();
        let queue = &evaluation.architecture.resources[0];
        assert_eq!(queue.name, "orders-q1");
        assert_eq!(queue.id, "default_dev__plutolang_pluto_Queue_orders_q1");
    }

    #[test]
    fn test_env_var_name_rejected() {
        let oracle = testing::load("import os\nfrom pluto_client import Queue\nqueue = Queue(os.environ[\"Q\"])\n");
        let err = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("must be resolvable at compile time"));
        assert!(message.contains("rejected rather than replaced with 'default'"));
    }

    const CUSTOM: &str = r#"
from pluto_client import Router, Queue

shared = Queue("shared")

def make(router: Router, name):
    q = Queue(name)
    router.post("/p", lambda r: q.push(r))
    shared.subscribe(lambda m: m)

router = Router("api")
make(router, "orders")
"#;

    #[test]
    fn test_custom_function_with_fillings() {
        let oracle = testing::load(CUSTOM);
        let module = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap();

        let call = testing::call_to(&oracle, "make");
        let values = argument_values(&oracle, call);
        let mut argument_fillings = Fillings::new();
        argument_fillings.insert(parameter(&oracle, "router"), Filling::Argument(values[0]));
        argument_fillings.insert(parameter(&oracle, "name"), Filling::Argument(values[1]));
        let options = EvaluateOptions {
            resource_fillings: module.resource_mapping.clone(),
            argument_fillings,
            bundle_suffix: Some("1".to_string()),
            ..EvaluateOptions::default()
        };
        let make = testing::definition(&oracle, "make");
        let evaluation = evaluate(&oracle, make, options).unwrap();
        let arch = &evaluation.architecture;

        // only the queue created inside the function is new
        assert_eq!(arch.resources.len(), 1);
        let queue_id = "default_dev__plutolang_pluto_Queue_orders";
        assert_eq!(arch.resources[0].id, queue_id);

        let router_id = "default_dev__plutolang_pluto_Router_api";
        let shared_id = "default_dev__plutolang_pluto_Queue_shared";
        let closure_ids: Vec<_> = arch.closures.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            closure_ids,
            vec![
                format!("{}_0_post_1_1", router_id),
                format!("{}_1_subscribe_0_1", shared_id),
            ]
        );
        assert!(arch.relationships.contains(&arch::Relationship::Client {
            bundle: format!("{}_0_post_1_1", router_id),
            resource: queue_id.to_string(),
            operation: "push".to_string(),
        }));

        // the parameter folds into the rebuilt constructor
        assert!(evaluation.bundles[0].code.contains("Queue.build_client(\"orders\")"));
    }

    #[test]
    fn test_missing_fillings() {
        let oracle = testing::load(CUSTOM);
        let make = testing::definition(&oracle, "make");
        let err = evaluate(&oracle, make, EvaluateOptions::default()).unwrap_err();
        assert!(err.to_string().contains("No filling found for the parameter node"));

        let mut argument_fillings = Fillings::new();
        let call = testing::call_to(&oracle, "make");
        let values = argument_values(&oracle, call);
        argument_fillings.insert(parameter(&oracle, "name"), Filling::Argument(values[1]));
        let options = EvaluateOptions {
            argument_fillings,
            ..EvaluateOptions::default()
        };
        let err = evaluate(&oracle, make, options).unwrap_err();
        assert!(err.to_string().contains("not found in fillings"));
    }

    #[test]
    fn test_missing_fqn() {
        let oracle = testing::load(concat!(
            "from pluto_base import IResource\n",
            "class Custom(IResource):\n",
            "    def __init__(self, name=None):\n",
            "        pass\n",
            "c = Custom(\"x\")\n",
        ));
        let err = evaluate(&oracle, testing::main_root(&oracle), EvaluateOptions::default()).unwrap_err();
        assert!(err.to_string().contains("does not have a 'fqn' field"));
    }
}
