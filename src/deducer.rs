//! Deduction driver
//!
//! Runs the whole pipeline over an entry module: the module-level graph
//! first, then every call of a custom infrastructure function made at module
//! level, each evaluated against the resources the module already produced.

use crate::arch::Architecture;
use crate::ast::{ArgumentCategory, NodeKind, ParameterCategory, Visit};
use crate::extract::CodeExtractor;
use crate::graph::{
    EvaluateOptions, EvaluationContext, GraphCache, GraphEvaluator, ProjectInfo, ResourceGraph, StagedBundle,
};
use crate::oracle::{Oracle, Type};
use crate::special::SpecialCallClassifier;
use crate::tracker::ResourceObjectTracker;
use crate::value::{Filling, Fillings, ValueEvaluator};
use crate::{Error, NodeId, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DeduceOptions {
    pub project: String,
    pub stack: String,
    pub bundle_dir: PathBuf,
    pub bundle_filename: String,
    pub export_name: String,
}

impl Default for DeduceOptions {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            stack: "dev".to_string(),
            bundle_dir: PathBuf::from(".archdeduce/bundles"),
            bundle_filename: "__init__.py".to_string(),
            export_name: "_default".to_string(),
        }
    }
}

/// Architecture of an entry module plus the bundles still to be written
#[derive(Debug)]
pub struct Deduction {
    pub architecture: Architecture,
    pub bundles: Vec<StagedBundle>,
}

/// A module-level call of a custom infrastructure function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub call: NodeId,
    pub function: NodeId,
}

pub struct Deducer<'o> {
    oracle: &'o dyn Oracle,
    options: DeduceOptions,
}

impl<'o> Deducer<'o> {
    pub fn new(oracle: &'o dyn Oracle, options: DeduceOptions) -> Self {
        Self { oracle, options }
    }

    pub fn options(&self) -> &DeduceOptions {
        &self.options
    }

    /// Deduce the architecture described by the module rooted at `root`
    pub fn deduce(&self, root: NodeId) -> Result<Deduction> {
        let oracle = self.oracle;
        let specials = SpecialCallClassifier::new(oracle).classify_program();
        info!("Found {} special calls", specials.len());

        let extractor = CodeExtractor::new(oracle, &specials);
        let values = ValueEvaluator::new(oracle);
        let tracker = ResourceObjectTracker::new(oracle);
        let context = EvaluationContext {
            oracle,
            extractor: &extractor,
            values: &values,
            tracker: &tracker,
        };
        let graphs = GraphCache::new(oracle);
        let project = ProjectInfo {
            project: self.options.project.clone(),
            stack: self.options.stack.clone(),
            bundle_dir: self.options.bundle_dir.clone(),
        };

        let module_graph = graphs.build(root)?;
        let module = GraphEvaluator::new(context, &project, self.evaluate_options()).evaluate(&module_graph)?;
        let mut architecture = module.architecture;
        let mut bundles = module.bundles;

        let invocations = self.invocations(root)?;
        let mut validated = Vec::new();
        for invocation in &invocations {
            if !validated.contains(&invocation.function) {
                validate_custom_function(oracle, invocation.function)?;
                validated.push(invocation.function);
            }
        }

        for (n, invocation) in invocations.into_iter().enumerate() {
            info!(
                "{}: evaluating custom infrastructure function '{}'",
                oracle.position(invocation.call),
                function_name(oracle, invocation.function)
            );
            let graph = graphs.build(invocation.function)?;
            let options = EvaluateOptions {
                resource_fillings: module.resource_mapping.clone(),
                argument_fillings: argument_fillings(oracle, invocation.call, invocation.function)?,
                bundle_suffix: Some(n.to_string()),
                ..self.evaluate_options()
            };
            let evaluation = GraphEvaluator::new(context, &project, options).evaluate(&graph)?;
            architecture.merge(evaluation.architecture)?;
            bundles.extend(evaluation.bundles);
        }

        info!(
            "Deduced {} resources, {} closures, {} relationships",
            architecture.resources.len(),
            architecture.closures.len(),
            architecture.relationships.len()
        );
        Ok(Deduction { architecture, bundles })
    }

    /// The module graph followed by the graph of every custom infrastructure function it calls
    pub fn graphs(&self, root: NodeId) -> Result<Vec<(String, Arc<ResourceGraph>)>> {
        let oracle = self.oracle;
        let cache = GraphCache::new(oracle);
        let module = oracle.program().module_of(root).name().to_string();
        let mut graphs = vec![(format!("module {}", module), cache.build(root)?)];

        let mut seen = Vec::new();
        for invocation in self.invocations(root)? {
            if seen.contains(&invocation.function) {
                continue;
            }
            seen.push(invocation.function);
            let label = format!("function {}", function_name(oracle, invocation.function));
            graphs.push((label, cache.build(invocation.function)?));
        }
        Ok(graphs)
    }

    /// Module-level calls of custom infrastructure functions, in source order
    ///
    /// A custom infrastructure function is a function defined at module level
    /// whose own body constructs resources or performs infrastructure calls.
    pub fn invocations(&self, root: NodeId) -> Result<Vec<Invocation>> {
        let oracle = self.oracle;
        let program = oracle.program();
        let NodeKind::Module { body } = program.kind(root) else {
            return Err(Error::unsupported(oracle.position(root), "The entry node is not a module."));
        };

        let classifier = SpecialCallClassifier::new(oracle);
        let custom: Vec<NodeId> = body
            .iter()
            .copied()
            .filter(|statement| matches!(program.kind(*statement), NodeKind::Function { .. }))
            .filter(|function| {
                let calls = classifier.classify(*function, true);
                !calls.constructors().is_empty() || !calls.infra_calls().is_empty()
            })
            .collect();
        if custom.is_empty() {
            return Ok(Vec::new());
        }
        debug!("{} custom infrastructure functions", custom.len());

        let mut invocations = Vec::new();
        for statement in body {
            program.visit::<Error>(*statement, &mut |node| match program.kind(node) {
                NodeKind::Function { .. } | NodeKind::Class { .. } | NodeKind::Lambda { .. } => {
                    Ok(Visit::SkipChildren)
                }
                NodeKind::Call { callee, .. } => {
                    if let Type::Function(function) = oracle.type_of(*callee) {
                        if let Some(definition) = function.node.filter(|d| custom.contains(d)) {
                            invocations.push(Invocation {
                                call: node,
                                function: definition,
                            });
                        }
                    }
                    Ok(Visit::Continue)
                }
                _ => Ok(Visit::Continue),
            })?;
        }
        Ok(invocations)
    }

    fn evaluate_options(&self) -> EvaluateOptions {
        EvaluateOptions {
            bundle_filename: self.options.bundle_filename.clone(),
            export_name: self.options.export_name.clone(),
            ..EvaluateOptions::default()
        }
    }
}

fn function_name(oracle: &dyn Oracle, function: NodeId) -> String {
    match oracle.kind(function) {
        NodeKind::Function { name, .. } => oracle.text(*name).to_string(),
        _ => oracle.text(function).to_string(),
    }
}

/// Check that a custom infrastructure function only has shapes the graph builder handles
///
/// The body may hold simple statements only, no `return`, and every named
/// parameter needs a plain, concrete type annotation.
pub fn validate_custom_function(oracle: &dyn Oracle, function: NodeId) -> Result<()> {
    let program = oracle.program();
    let NodeKind::Function { parameters, body, .. } = oracle.kind(function) else {
        return Err(Error::unsupported(oracle.position(function), "The node must be a function."));
    };
    let in_module = program
        .parent(function)
        .is_some_and(|parent| matches!(program.kind(parent), NodeKind::Module { .. }));
    if !in_module {
        return Err(Error::unsupported(
            oracle.position(function),
            "The function must reside in the global scope.",
        ));
    }

    for parameter in parameters {
        validate_parameter(oracle, *parameter)?;
    }

    for statement in body {
        match oracle.kind(*statement) {
            NodeKind::Return { .. } => {
                return Err(Error::unsupported(
                    oracle.position(*statement),
                    "The function should not contain a return statement, currently.",
                ));
            }
            NodeKind::Assignment { .. }
            | NodeKind::AugmentedAssignment { .. }
            | NodeKind::ExpressionStatement { .. }
            | NodeKind::Pass
            | NodeKind::Assert { .. }
            | NodeKind::Import { .. }
            | NodeKind::ImportFrom { .. } => {}
            _ => {
                return Err(Error::unsupported(
                    oracle.position(*statement),
                    "The function should only contain statements that involve calling methods on resource objects and constructing resource objects.",
                ));
            }
        }
    }
    Ok(())
}

fn validate_parameter(oracle: &dyn Oracle, parameter: NodeId) -> Result<()> {
    let NodeKind::Parameter {
        name: Some(_),
        category,
        annotation,
        ..
    } = oracle.kind(parameter)
    else {
        return Ok(());
    };
    if *category != ParameterCategory::Simple {
        return Err(Error::unsupported(
            oracle.position(parameter),
            "Variadic parameters are not supported in custom infrastructure functions.",
        ));
    }

    let Some(annotation) = annotation else {
        return Err(Error::unsupported(oracle.position(parameter), "The parameter type must be defined."));
    };
    if !matches!(oracle.kind(*annotation), NodeKind::Name { .. }) {
        return Err(Error::unsupported(
            oracle.position(parameter),
            "The parameter type must be a single type, not a complex type like 'Callable[[], Any]'.",
        ));
    }

    match oracle.type_of(*annotation) {
        Type::Unknown => Err(Error::oracle(
            oracle.position(*annotation),
            "Cannot determine the type of the parameter.",
        )),
        ty if ty.is_module_member("typing", "Any") => Err(Error::unsupported(
            oracle.position(parameter),
            "The parameter type should not be 'Any'.",
        )),
        ty if matches!(ty, Type::Function(_)) || ty.is_module_member("typing", "Callable") => {
            Err(Error::unsupported(
                oracle.position(parameter),
                "The parameter type should not be 'Callable'.",
            ))
        }
        _ => Ok(()),
    }
}

/// Bind the arguments of `call` to the parameters of `function`
///
/// Positional arguments bind in order, keyword arguments by name. Parameters
/// left unbound fall back to their defaults during evaluation.
pub fn argument_fillings(oracle: &dyn Oracle, call: NodeId, function: NodeId) -> Result<Fillings> {
    let program = oracle.program();
    let (NodeKind::Call { arguments, .. }, NodeKind::Function { parameters, .. }) =
        (oracle.kind(call), oracle.kind(function))
    else {
        return Err(Error::unsupported(
            oracle.position(call),
            "Only calls of function definitions can be bound.",
        ));
    };

    let parameter_name = |parameter: NodeId| match program.kind(parameter) {
        NodeKind::Parameter { name: Some(name), .. } => program.name_of(*name),
        _ => None,
    };

    let mut fillings = Fillings::new();
    let mut position = 0;
    for argument in arguments {
        let NodeKind::Argument { name, category, value } = program.kind(*argument) else {
            continue;
        };
        if *category != ArgumentCategory::Simple {
            return Err(Error::unsupported(
                oracle.position(*argument),
                "Unpacked arguments are not supported when calling a custom infrastructure function.",
            ));
        }

        let parameter = match name.and_then(|n| program.name_of(n)) {
            Some(label) => parameters.iter().copied().find(|p| parameter_name(*p) == Some(label)),
            None => {
                position += 1;
                parameters.get(position - 1).copied()
            }
        };
        let Some(parameter) = parameter else {
            return Err(Error::unsupported(
                oracle.position(*argument),
                format!(
                    "The argument '{}' does not match any parameter of '{}'.",
                    oracle.text(*argument),
                    function_name(oracle, function)
                ),
            ));
        };
        fillings.insert(parameter, Filling::Argument(*value));
    }
    Ok(fillings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    const APP: &str = r#"
from pluto_client import Router, Queue

router = Router("api")

def add_queue(router: Router, name: str, path: str = "/q"):
    q = Queue(name)
    router.post(path, lambda r: q.push(r))

def handler(req):
    return req

add_queue(router, "orders")
add_queue(router, name="audit", path="/audit")
router.get("/h", handler)
"#;

    #[test]
    fn test_invocations_of_custom_functions() {
        let oracle = testing::load(APP);
        let deducer = Deducer::new(&oracle, DeduceOptions::default());
        let invocations = deducer.invocations(testing::main_root(&oracle)).unwrap();
        let add_queue = testing::definition(&oracle, "add_queue");
        // `handler` has no infrastructure calls of its own
        assert_eq!(invocations.len(), 2);
        assert!(invocations.iter().all(|i| i.function == add_queue));
        assert_eq!(invocations[0].call, testing::calls_to(&oracle, "add_queue")[0]);
    }

    #[test]
    fn test_argument_fillings() {
        let oracle = testing::load(APP);
        let add_queue = testing::definition(&oracle, "add_queue");
        let calls = testing::calls_to(&oracle, "add_queue");

        let fillings = argument_fillings(&oracle, calls[1], add_queue).unwrap();
        assert_eq!(fillings.len(), 3);
        let NodeKind::Function { parameters, .. } = oracle.kind(add_queue) else {
            panic!("expected function");
        };
        let Some(Filling::Argument(path)) = fillings.get(&parameters[2]) else {
            panic!("expected argument filling");
        };
        assert_eq!(oracle.text(*path), "\"/audit\"");

        let oracle = testing::load("def f(a):\n    pass\nf(1, 2)\n");
        let err = argument_fillings(&oracle, testing::call_to(&oracle, "f"), testing::definition(&oracle, "f"))
            .unwrap_err();
        assert!(err.to_string().contains("does not match any parameter"));
    }

    #[test]
    fn test_deduce_merges_custom_functions() {
        let oracle = testing::load(APP);
        let options = DeduceOptions {
            bundle_dir: PathBuf::from("/tmp/out"),
            ..DeduceOptions::default()
        };
        let deduction = Deducer::new(&oracle, options)
            .deduce(testing::main_root(&oracle))
            .unwrap();
        let arch = &deduction.architecture;

        let ids: Vec<_> = arch.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "default_dev__plutolang_pluto_Router_api",
                "default_dev__plutolang_pluto_Queue_orders",
                "default_dev__plutolang_pluto_Queue_audit",
            ]
        );

        let router = "default_dev__plutolang_pluto_Router_api";
        let closures: Vec<_> = arch.closures.iter().map(|c| c.id.clone()).collect();
        assert_eq!(
            closures,
            vec![
                format!("{}_0_get_1", router),
                format!("{}_0_post_1_0", router),
                format!("{}_0_post_1_1", router),
            ]
        );
        assert_eq!(deduction.bundles.len(), 3);
        assert!(deduction.bundles[2].code.contains("Queue.build_client(\"audit\")"));

        let infra = arch
            .relationships
            .iter()
            .filter(|r| matches!(r, crate::arch::Relationship::Infrastructure { .. }))
            .count();
        assert_eq!(infra, 3);
    }

    #[test]
    fn test_validate_custom_function() {
        let oracle = testing::load(APP);
        validate_custom_function(&oracle, testing::definition(&oracle, "add_queue")).unwrap();

        let cases = [
            ("def f(q):\n    pass\n", "must be defined"),
            ("from typing import Any\ndef f(q: Any):\n    pass\n", "should not be 'Any'"),
            ("from typing import Callable\ndef f(q: Callable):\n    pass\n", "should not be 'Callable'"),
            ("from typing import List\ndef f(q: List[int]):\n    pass\n", "must be a single type"),
            ("def f(q: str):\n    return q\n", "return statement"),
            ("def f(q: str):\n    if q:\n        pass\n", "should only contain statements"),
        ];
        for (source, message) in cases {
            let oracle = testing::load(source);
            let err = validate_custom_function(&oracle, testing::definition(&oracle, "f")).unwrap_err();
            assert!(err.to_string().contains(message), "{}: {}", source, err);
        }
    }

    #[test]
    fn test_graphs_listing() {
        let oracle = testing::load(APP);
        let graphs = Deducer::new(&oracle, DeduceOptions::default())
            .graphs(testing::main_root(&oracle))
            .unwrap();
        let labels: Vec<_> = graphs.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(labels, vec!["module main", "function add_queue"]);
        assert_eq!(graphs[1].1.resources.len(), 2);
    }

    #[test]
    fn test_bundle_uses_resource_parameter() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router, Queue\n",
            "q = Queue(\"jobs\")\n",
            "def wire(router: Router, queue: Queue):\n",
            "    router.post(\"/p\", lambda r: queue.push(r))\n",
            "wire(Router(\"api\"), q)\n",
        ));
        let deduction = Deducer::new(&oracle, DeduceOptions::default())
            .deduce(testing::main_root(&oracle))
            .unwrap();

        assert_eq!(deduction.bundles.len(), 1);
        let code = &deduction.bundles[0].code;
        assert!(code.contains("queue = Queue.build_client(\"jobs\")"), "{}", code);

        let client = deduction.architecture.relationships.iter().find_map(|r| match r {
            crate::arch::Relationship::Client {
                resource, operation, ..
            } => Some((resource.as_str(), operation.as_str())),
            _ => None,
        });
        assert_eq!(client, Some(("default_dev__plutolang_pluto_Queue_jobs", "push")));
    }
}
