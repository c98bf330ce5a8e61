//! Name Resolver - Resolves references to declarations
//!
//! Resolution algorithm (Python's LEGB rule):
//! 1. `global` names go straight to the module scope, then builtins
//! 2. Otherwise walk outward from the reference's scope
//! 3. Class scopes are only visible to code directly in the class body

use super::graph::{Declaration, ScopeGraph, ScopeId, ScopeKind};
use crate::ast::{NodeId, Program};

/// A resolved name: the scope that binds it and all of its declarations
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolLookup {
    pub scope: ScopeId,
    pub declarations: Vec<Declaration>,
}

/// Name resolver using scope graph
pub struct NameResolver<'a> {
    scope_graph: &'a ScopeGraph,
}

impl<'a> NameResolver<'a> {
    /// Create a new resolver
    pub fn new(scope_graph: &'a ScopeGraph) -> Self {
        Self { scope_graph }
    }

    /// Resolve `name` as seen from `scope`
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<SymbolLookup> {
        let graph = self.scope_graph;

        if graph.is_global(scope, name) {
            return graph
                .module_scope(scope)
                .into_iter()
                .chain(std::iter::once(ScopeId::root()))
                .find_map(|s| self.local(s, name));
        }

        let mut current = Some(scope);
        let mut first = true;
        while let Some(s) = current {
            if first || graph.kind(s) != Some(ScopeKind::Class) {
                if let Some(found) = self.local(s, name) {
                    return Some(found);
                }
            }
            first = false;
            current = graph.parent(s);
        }
        None
    }

    /// Resolve a `Name` node from the scope it is evaluated in
    pub fn resolve_node(&self, program: &Program, node: NodeId) -> Option<SymbolLookup> {
        let scope = self.scope_graph.node_scope(node)?;
        let name = program.name_of(node)?;
        self.resolve(scope, name)
    }

    fn local(&self, scope: ScopeId, name: &str) -> Option<SymbolLookup> {
        self.scope_graph
            .lookup_local(scope, name)
            .filter(|declarations| !declarations.is_empty())
            .map(|declarations| SymbolLookup {
                scope,
                declarations: declarations.to_vec(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PythonAdapter;
    use crate::ast::NodeKind;
    use crate::scope::Binder;
    use std::path::PathBuf;

    fn setup(source: &str) -> (Program, ScopeGraph) {
        let mut program = Program::new();
        let mut adapter = PythonAdapter::new().unwrap();
        adapter
            .parse_module(&mut program, "main", &PathBuf::from("main.py"), source)
            .unwrap();
        let graph = Binder::bind(&program);
        (program, graph)
    }

    fn names(program: &Program, value: &str) -> Vec<NodeId> {
        let root = program.modules()[0].root();
        program
            .descendants(root)
            .into_iter()
            .filter(|n| program.name_of(*n) == Some(value))
            .collect()
    }

    #[test]
    fn test_class_scope_invisible_to_methods() {
        let source = "x = 1\nclass C:\n    x = 2\n    y = x\n    def m(self):\n        return x\n";
        let (program, graph) = setup(source);
        let resolver = NameResolver::new(&graph);
        let module = graph.scope_of_owner(program.modules()[0].root()).unwrap();

        let uses = names(&program, "x");
        // module `x`, class `x`, `y = x`, `return x`
        assert_eq!(uses.len(), 4);

        let in_body = resolver.resolve_node(&program, uses[2]).unwrap();
        assert_ne!(in_body.scope, module);

        let in_method = resolver.resolve_node(&program, uses[3]).unwrap();
        assert_eq!(in_method.scope, module);
    }

    #[test]
    fn test_builtins_and_unknown() {
        let (program, graph) = setup("print(undefined_name)\n");
        let resolver = NameResolver::new(&graph);

        let print = resolver
            .resolve_node(&program, names(&program, "print")[0])
            .unwrap();
        assert_eq!(print.scope, ScopeId::root());
        assert!(matches!(print.declarations[0], Declaration::Intrinsic { name: "print" }));

        assert!(resolver
            .resolve_node(&program, names(&program, "undefined_name")[0])
            .is_none());
    }

    #[test]
    fn test_lambda_parameter_shadows() {
        let (program, graph) = setup("a = 1\nf = lambda a: a\n");
        let resolver = NameResolver::new(&graph);
        let uses = names(&program, "a");
        let body_use = *uses.last().unwrap();
        let lookup = resolver.resolve_node(&program, body_use).unwrap();
        assert!(matches!(lookup.declarations[0], Declaration::Parameter { .. }));

        let lambda = program
            .descendants(program.modules()[0].root())
            .into_iter()
            .find(|n| matches!(program.kind(*n), NodeKind::Lambda { .. }))
            .unwrap();
        assert_eq!(graph.scope_of_owner(lambda), Some(lookup.scope));
    }
}
