//! Scope Graph data structure for name binding
//!
//! The scope graph tracks:
//! - Scope hierarchy (parent/child relationships)
//! - The node that owns each scope
//! - Declarations of every symbol bound in a scope
//! - The scope each node is evaluated in

use crate::ast::NodeId;
use std::collections::{HashMap, HashSet};

/// Unique identifier for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    /// The builtin scope, parent of every module scope
    pub fn root() -> Self {
        Self(0)
    }
}

/// The kind of scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Names every module sees without importing
    Builtin,
    /// Module/file level scope
    Module,
    /// Class body scope
    Class,
    /// Function body scope
    Function,
    /// Lambda body scope
    Lambda,
    /// List/set/dict comprehension or generator scope
    Comprehension,
}

/// What introduced a name into a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Declaration {
    /// Builtins and module intrinsics such as `__name__`
    Intrinsic { name: &'static str },
    /// A bound target; `node` is the target `Name`
    Variable { node: NodeId },
    /// `node` is the `Parameter`
    Parameter { node: NodeId },
    /// `node` is the `Function` definition
    Function { node: NodeId },
    /// `node` is the `Class` definition
    Class { node: NodeId },
    /// `node` is the `ImportAs` or `ImportFromAs`
    Alias { node: NodeId },
}

impl Declaration {
    /// The declaring node, absent for intrinsics
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Intrinsic { .. } => None,
            Self::Variable { node }
            | Self::Parameter { node }
            | Self::Function { node }
            | Self::Class { node }
            | Self::Alias { node } => Some(*node),
        }
    }
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    owner: Option<NodeId>,
    /// Symbol names in first-declaration order
    order: Vec<String>,
    symbols: HashMap<String, Vec<Declaration>>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
}

/// Scope graph of a whole program
#[derive(Debug, Clone)]
pub struct ScopeGraph {
    scopes: Vec<Scope>,
    /// Scope opened by a definition node
    by_owner: HashMap<NodeId, ScopeId>,
    /// Scope each node is evaluated in
    node_scopes: HashMap<NodeId, ScopeId>,
}

impl Default for ScopeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeGraph {
    /// Create a new scope graph holding only the builtin scope
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Builtin,
                parent: None,
                owner: None,
                order: Vec::new(),
                symbols: HashMap::new(),
                globals: HashSet::new(),
                nonlocals: HashSet::new(),
            }],
            by_owner: HashMap::new(),
            node_scopes: HashMap::new(),
        }
    }

    /// Create a new child scope opened by `owner`
    pub fn add_scope(&mut self, parent: ScopeId, kind: ScopeKind, owner: NodeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            owner: Some(owner),
            order: Vec::new(),
            symbols: HashMap::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
        });
        self.by_owner.insert(owner, id);
        id
    }

    /// Add a declaration for `name` to a scope
    pub fn add_declaration(&mut self, scope: ScopeId, name: impl Into<String>, declaration: Declaration) {
        let name = name.into();
        let scope = &mut self.scopes[scope.0 as usize];
        if !scope.symbols.contains_key(&name) {
            scope.order.push(name.clone());
        }
        let declarations = scope.symbols.entry(name).or_default();
        if !declarations.contains(&declaration) {
            declarations.push(declaration);
        }
    }

    pub fn add_global(&mut self, scope: ScopeId, name: impl Into<String>) {
        self.scopes[scope.0 as usize].globals.insert(name.into());
    }

    pub fn add_nonlocal(&mut self, scope: ScopeId, name: impl Into<String>) {
        self.scopes[scope.0 as usize].nonlocals.insert(name.into());
    }

    pub fn is_global(&self, scope: ScopeId, name: &str) -> bool {
        self.scopes[scope.0 as usize].globals.contains(name)
    }

    pub fn is_nonlocal(&self, scope: ScopeId, name: &str) -> bool {
        self.scopes[scope.0 as usize].nonlocals.contains(name)
    }

    /// Record the scope a node is evaluated in
    pub fn set_node_scope(&mut self, node: NodeId, scope: ScopeId) {
        self.node_scopes.insert(node, scope);
    }

    /// Scope a node is evaluated in
    pub fn node_scope(&self, node: NodeId) -> Option<ScopeId> {
        self.node_scopes.get(&node).copied()
    }

    /// Scope opened by a definition node (module, function, class, lambda, comprehension)
    pub fn scope_of_owner(&self, owner: NodeId) -> Option<ScopeId> {
        self.by_owner.get(&owner).copied()
    }

    /// Get the parent of a scope
    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes.get(scope.0 as usize).and_then(|s| s.parent)
    }

    /// Get the kind of a scope
    pub fn kind(&self, scope: ScopeId) -> Option<ScopeKind> {
        self.scopes.get(scope.0 as usize).map(|s| s.kind)
    }

    pub fn owner(&self, scope: ScopeId) -> Option<NodeId> {
        self.scopes.get(scope.0 as usize).and_then(|s| s.owner)
    }

    /// Look up a symbol in a scope (not walking parents)
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<&[Declaration]> {
        self.scopes
            .get(scope.0 as usize)
            .and_then(|s| s.symbols.get(name))
            .map(Vec::as_slice)
    }

    /// Get all symbols of a scope in first-declaration order
    pub fn symbols(&self, scope: ScopeId) -> Vec<(&str, &[Declaration])> {
        let Some(s) = self.scopes.get(scope.0 as usize) else {
            return Vec::new();
        };
        s.order
            .iter()
            .filter_map(|name| s.symbols.get(name).map(|d| (name.as_str(), d.as_slice())))
            .collect()
    }

    /// Get scope chain from a scope up to the builtin scope
    pub fn scope_chain(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = vec![scope];
        let mut current = scope;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether `inner` is `outer` or nested somewhere inside it
    pub fn is_contained_within(&self, inner: ScopeId, outer: ScopeId) -> bool {
        self.scope_chain(inner).contains(&outer)
    }

    /// Nearest enclosing module scope
    pub fn module_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scope_chain(scope)
            .into_iter()
            .find(|s| self.kind(*s) == Some(ScopeKind::Module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_hierarchy() {
        let mut graph = ScopeGraph::new();

        let module = graph.add_scope(ScopeId::root(), ScopeKind::Module, NodeId(0));
        let class_scope = graph.add_scope(module, ScopeKind::Class, NodeId(1));
        let method_scope = graph.add_scope(class_scope, ScopeKind::Function, NodeId(2));

        assert_eq!(graph.parent(method_scope), Some(class_scope));
        assert_eq!(graph.parent(class_scope), Some(module));
        assert_eq!(graph.parent(ScopeId::root()), None);
        assert_eq!(graph.scope_of_owner(NodeId(2)), Some(method_scope));
        assert_eq!(graph.module_scope(method_scope), Some(module));
    }

    #[test]
    fn test_declarations_keep_order() {
        let mut graph = ScopeGraph::new();
        let module = graph.add_scope(ScopeId::root(), ScopeKind::Module, NodeId(0));

        graph.add_declaration(module, "b", Declaration::Variable { node: NodeId(3) });
        graph.add_declaration(module, "a", Declaration::Function { node: NodeId(4) });
        graph.add_declaration(module, "b", Declaration::Variable { node: NodeId(5) });
        graph.add_declaration(module, "b", Declaration::Variable { node: NodeId(5) });

        let symbols = graph.symbols(module);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].0, "b");
        assert_eq!(symbols[0].1.len(), 2);
        assert!(graph.lookup_local(module, "a").is_some());
        assert!(graph.lookup_local(ScopeId::root(), "a").is_none());
    }

    #[test]
    fn test_scope_containment() {
        let mut graph = ScopeGraph::new();

        let s1 = graph.add_scope(ScopeId::root(), ScopeKind::Module, NodeId(0));
        let s2 = graph.add_scope(s1, ScopeKind::Function, NodeId(1));
        let s3 = graph.add_scope(s2, ScopeKind::Lambda, NodeId(2));

        assert_eq!(graph.scope_chain(s3), vec![s3, s2, s1, ScopeId::root()]);
        assert!(graph.is_contained_within(s3, s1));
        assert!(graph.is_contained_within(s2, s2));
        assert!(!graph.is_contained_within(s1, s2));
    }
}
