//! Binder - populates the scope graph from the arena AST
//!
//! One pass per module. Every node is tagged with the scope it is evaluated
//! in, and every binding construct adds a declaration to the scope that owns
//! the name (after `global`/`nonlocal` redirection).

use super::graph::{Declaration, ScopeGraph, ScopeId, ScopeKind};
use crate::ast::{NodeId, NodeKind, Program, Visit};

/// Names visible in every module without an import
pub const BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "breakpoint", "bytearray", "bytes", "callable",
    "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod", "enumerate",
    "eval", "exec", "filter", "float", "format", "frozenset", "getattr", "globals", "hasattr",
    "hash", "help", "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len", "list",
    "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow",
    "print", "property", "range", "repr", "reversed", "round", "set", "setattr", "slice", "sorted",
    "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip", "__import__",
    "__build_class__", "Ellipsis", "NotImplemented", "BaseException", "Exception",
    "ArithmeticError", "AssertionError", "AttributeError", "EOFError", "ImportError",
    "ModuleNotFoundError", "IndexError", "KeyError", "KeyboardInterrupt", "LookupError",
    "MemoryError", "NameError", "NotImplementedError", "OSError", "OverflowError",
    "RecursionError", "RuntimeError", "StopIteration", "StopAsyncIteration", "SyntaxError",
    "SystemExit", "TimeoutError", "TypeError", "UnboundLocalError", "UnicodeError",
    "ValueError", "ZeroDivisionError", "FileNotFoundError", "PermissionError",
    "ConnectionError", "Warning", "DeprecationWarning", "UserWarning",
];

/// Names every module scope defines implicitly
pub const MODULE_INTRINSICS: &[&str] = &["__name__", "__file__", "__doc__", "__package__", "__spec__"];

/// Walks modules and records their bindings
pub struct Binder<'p> {
    program: &'p Program,
    graph: ScopeGraph,
}

impl<'p> Binder<'p> {
    /// Bind every module of `program`
    pub fn bind(program: &'p Program) -> ScopeGraph {
        let mut graph = ScopeGraph::new();
        for name in BUILTINS {
            graph.add_declaration(ScopeId::root(), *name, Declaration::Intrinsic { name: *name });
        }

        let mut binder = Binder { program, graph };
        for module in program.modules() {
            binder.bind_module(module.root());
        }
        binder.graph
    }

    fn bind_module(&mut self, root: NodeId) {
        let program = self.program;
        let scope = self.graph.add_scope(ScopeId::root(), ScopeKind::Module, root);
        self.graph.set_node_scope(root, scope);
        for name in MODULE_INTRINSICS {
            self.graph
                .add_declaration(scope, *name, Declaration::Intrinsic { name: *name });
        }

        if let NodeKind::Module { body } = program.kind(root) {
            for stmt in body {
                self.visit(*stmt, scope);
            }
        }
    }

    fn visit(&mut self, id: NodeId, scope: ScopeId) {
        let program = self.program;
        self.graph.set_node_scope(id, scope);

        match program.kind(id) {
            NodeKind::Function {
                name,
                parameters,
                returns,
                body,
                decorators,
                ..
            } => {
                for decorator in decorators {
                    self.visit(*decorator, scope);
                }
                self.visit_parameter_defaults(parameters, scope);
                if let Some(returns) = returns {
                    self.visit(*returns, scope);
                }
                self.graph.set_node_scope(*name, scope);
                if let Some(value) = program.name_of(*name) {
                    self.declare(scope, value, Declaration::Function { node: id });
                }

                let inner = self.graph.add_scope(scope, ScopeKind::Function, id);
                self.prescan(body, inner);
                self.bind_parameters(parameters, inner);
                for stmt in body {
                    self.visit(*stmt, inner);
                }
            }
            NodeKind::Class {
                name,
                arguments,
                body,
                decorators,
            } => {
                for node in decorators.iter().chain(arguments) {
                    self.visit(*node, scope);
                }
                self.graph.set_node_scope(*name, scope);
                if let Some(value) = program.name_of(*name) {
                    self.declare(scope, value, Declaration::Class { node: id });
                }

                let inner = self.graph.add_scope(scope, ScopeKind::Class, id);
                self.prescan(body, inner);
                for stmt in body {
                    self.visit(*stmt, inner);
                }
            }
            NodeKind::Lambda { parameters, body } => {
                self.visit_parameter_defaults(parameters, scope);
                let inner = self.graph.add_scope(scope, ScopeKind::Lambda, id);
                self.bind_parameters(parameters, inner);
                self.visit(*body, inner);
            }
            NodeKind::Comprehension {
                element, clauses, ..
            } => {
                let inner = self.graph.add_scope(scope, ScopeKind::Comprehension, id);
                for (index, clause) in clauses.iter().enumerate() {
                    self.graph.set_node_scope(*clause, inner);
                    match program.kind(*clause) {
                        NodeKind::ComprehensionFor {
                            target, iterable, ..
                        } => {
                            // The first iterable is evaluated in the enclosing scope
                            let iterable_scope = if index == 0 { scope } else { inner };
                            self.visit(*iterable, iterable_scope);
                            self.bind_target(*target, inner);
                        }
                        NodeKind::ComprehensionIf { test } => self.visit(*test, inner),
                        _ => self.visit(*clause, inner),
                    }
                }
                self.visit(*element, inner);
            }
            NodeKind::Assignment {
                target,
                annotation,
                value,
            } => {
                if let Some(value) = value {
                    self.visit(*value, scope);
                }
                if let Some(annotation) = annotation {
                    self.visit(*annotation, scope);
                }
                self.bind_target(*target, scope);
            }
            NodeKind::AugmentedAssignment { target, value, .. } => {
                self.visit(*value, scope);
                self.bind_target(*target, scope);
            }
            NodeKind::For {
                target,
                iterable,
                body,
                orelse,
                ..
            } => {
                self.visit(*iterable, scope);
                self.bind_target(*target, scope);
                for stmt in body.iter().chain(orelse) {
                    self.visit(*stmt, scope);
                }
            }
            NodeKind::WithItem { expression, target } => {
                self.visit(*expression, scope);
                if let Some(target) = target {
                    self.bind_target(*target, scope);
                }
            }
            NodeKind::ExceptHandler {
                type_expression,
                name,
                body,
            } => {
                if let Some(ty) = type_expression {
                    self.visit(*ty, scope);
                }
                if let Some(name) = name {
                    self.bind_target(*name, scope);
                }
                for stmt in body {
                    self.visit(*stmt, scope);
                }
            }
            NodeKind::ImportAs { module, alias } => {
                let bound = match alias {
                    Some(alias) => {
                        self.graph.set_node_scope(*alias, scope);
                        program.name_of(*alias).map(str::to_string)
                    }
                    None => module.first().cloned(),
                };
                if let Some(bound) = bound {
                    self.declare(scope, &bound, Declaration::Alias { node: id });
                }
            }
            NodeKind::ImportFromAs { name, alias } => {
                let bound = match alias {
                    Some(alias) => {
                        self.graph.set_node_scope(*alias, scope);
                        program.name_of(*alias).map(str::to_string)
                    }
                    None => Some(name.clone()),
                };
                if let Some(bound) = bound {
                    self.declare(scope, &bound, Declaration::Alias { node: id });
                }
            }
            NodeKind::AssignmentExpression { target, value } => {
                self.visit(*value, scope);
                let mut owner = scope;
                while self.graph.kind(owner) == Some(ScopeKind::Comprehension) {
                    match self.graph.parent(owner) {
                        Some(parent) => owner = parent,
                        None => break,
                    }
                }
                self.graph.set_node_scope(*target, scope);
                if let Some(value) = program.name_of(*target) {
                    self.declare(owner, value, Declaration::Variable { node: *target });
                }
            }
            other => {
                for child in other.children() {
                    self.visit(child, scope);
                }
            }
        }
    }

    /// Annotations and defaults are evaluated where the definition appears
    fn visit_parameter_defaults(&mut self, parameters: &[NodeId], scope: ScopeId) {
        let program = self.program;
        for parameter in parameters {
            if let NodeKind::Parameter {
                annotation,
                default,
                ..
            } = program.kind(*parameter)
            {
                for node in annotation.iter().chain(default) {
                    self.visit(*node, scope);
                }
            }
        }
    }

    fn bind_parameters(&mut self, parameters: &[NodeId], inner: ScopeId) {
        let program = self.program;
        for parameter in parameters {
            self.graph.set_node_scope(*parameter, inner);
            if let NodeKind::Parameter { name: Some(name), .. } = program.kind(*parameter) {
                self.graph.set_node_scope(*name, inner);
                if let Some(value) = program.name_of(*name) {
                    self.declare(inner, value, Declaration::Parameter { node: *parameter });
                }
            }
        }
    }

    fn bind_target(&mut self, target: NodeId, scope: ScopeId) {
        let program = self.program;
        self.graph.set_node_scope(target, scope);
        match program.kind(target) {
            NodeKind::Name { value } => {
                self.declare(scope, value, Declaration::Variable { node: target });
            }
            NodeKind::Tuple { items } | NodeKind::List { items } => {
                for item in items {
                    self.bind_target(*item, scope);
                }
            }
            NodeKind::Unpack { value } => self.bind_target(*value, scope),
            _ => self.visit(target, scope),
        }
    }

    fn declare(&mut self, scope: ScopeId, name: &str, declaration: Declaration) {
        let owner = if self.graph.is_global(scope, name) {
            self.graph.module_scope(scope).unwrap_or(scope)
        } else if self.graph.is_nonlocal(scope, name) {
            self.enclosing_function_scope(scope, name).unwrap_or(scope)
        } else {
            scope
        };
        self.graph.add_declaration(owner, name, declaration);
    }

    fn enclosing_function_scope(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = self.graph.parent(scope);
        let mut fallback = None;
        while let Some(s) = current {
            match self.graph.kind(s) {
                Some(ScopeKind::Function | ScopeKind::Lambda) => {
                    if self.graph.lookup_local(s, name).is_some() {
                        return Some(s);
                    }
                    fallback.get_or_insert(s);
                }
                Some(ScopeKind::Module | ScopeKind::Builtin) => break,
                _ => {}
            }
            current = self.graph.parent(s);
        }
        fallback
    }

    /// Record `global`/`nonlocal` statements before binding, since they
    /// apply to the whole body regardless of position
    fn prescan(&mut self, body: &[NodeId], scope: ScopeId) {
        let program = self.program;
        let graph = &mut self.graph;
        for stmt in body {
            let _ = program.visit::<()>(*stmt, &mut |node| {
                let kind = program.kind(node);
                match kind {
                    NodeKind::Global { names } | NodeKind::Nonlocal { names } => {
                        let global = matches!(kind, NodeKind::Global { .. });
                        for name in names {
                            if let Some(value) = program.name_of(*name) {
                                if global {
                                    graph.add_global(scope, value);
                                } else {
                                    graph.add_nonlocal(scope, value);
                                }
                            }
                        }
                        Ok(Visit::SkipChildren)
                    }
                    k if k.is_scope_owner() => Ok(Visit::SkipChildren),
                    _ => Ok(Visit::Continue),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PythonAdapter;
    use std::path::PathBuf;

    fn bind(source: &str) -> (Program, ScopeGraph, NodeId) {
        let mut program = Program::new();
        let mut adapter = PythonAdapter::new().unwrap();
        let root = adapter
            .parse_module(&mut program, "main", &PathBuf::from("main.py"), source)
            .unwrap();
        let graph = Binder::bind(&program);
        (program, graph, root)
    }

    #[test]
    fn test_module_bindings() {
        let (_, graph, root) = bind("import os\nfrom a import b as c\nx = 1\ndef f(p, q=x):\n    y = p\n");
        let module = graph.scope_of_owner(root).unwrap();
        for name in ["os", "c", "x", "f", "__name__"] {
            assert!(graph.lookup_local(module, name).is_some(), "missing {}", name);
        }
        assert!(graph.lookup_local(module, "y").is_none());
        assert!(graph.lookup_local(ScopeId::root(), "print").is_some());
    }

    #[test]
    fn test_function_scope_and_defaults() {
        let (program, graph, root) = bind("x = 1\ndef f(p, q=x):\n    y = p\n");
        let NodeKind::Module { body } = program.kind(root) else {
            panic!("expected module");
        };
        let function = body[1];
        let inner = graph.scope_of_owner(function).unwrap();
        let module = graph.scope_of_owner(root).unwrap();

        assert!(graph.lookup_local(inner, "p").is_some());
        assert!(graph.lookup_local(inner, "y").is_some());
        assert!(matches!(
            graph.lookup_local(inner, "q").unwrap()[0],
            Declaration::Parameter { .. }
        ));

        let NodeKind::Function { parameters, .. } = program.kind(function) else {
            panic!("expected function");
        };
        let NodeKind::Parameter { default: Some(default), .. } = program.kind(parameters[1]) else {
            panic!("expected default");
        };
        assert_eq!(graph.node_scope(*default), Some(module));
    }

    #[test]
    fn test_global_redirects_to_module() {
        let (_, graph, root) = bind("def f():\n    global counter\n    counter = 1\n");
        let module = graph.scope_of_owner(root).unwrap();
        assert!(graph.lookup_local(module, "counter").is_some());
    }

    #[test]
    fn test_comprehension_target_scope() {
        let (program, graph, root) = bind("items = [1]\nsquares = [i * i for i in items]\n");
        let comprehension = program
            .descendants(root)
            .into_iter()
            .find(|n| matches!(program.kind(*n), NodeKind::Comprehension { .. }))
            .unwrap();
        let inner = graph.scope_of_owner(comprehension).unwrap();
        assert!(graph.lookup_local(inner, "i").is_some());
        let module = graph.scope_of_owner(root).unwrap();
        assert!(graph.lookup_local(module, "i").is_none());
    }

    #[test]
    fn test_tuple_targets() {
        let (_, graph, root) = bind("a, (b, *c) = 1, (2, 3)\n");
        let module = graph.scope_of_owner(root).unwrap();
        for name in ["a", "b", "c"] {
            assert!(graph.lookup_local(module, name).is_some());
        }
    }
}
