//! Walkers used by the extractor
//!
//! - [`OutsideSymbolFinder`] collects the names a definition uses but does not declare
//! - [`AccessedSpecialNodeFinder`] collects client API and captured property calls
//! - [`env_var_reads`] collects environment variables read with literal keys

use crate::ast::{ArgumentCategory, NodeKind, Visit};
use crate::oracle::{ClassMember, Oracle, Type};
use crate::scope::ScopeId;
use crate::special::{SpecialCalls, SpecialKind};
use crate::{Error, NodeId, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Finds names used inside a definition but bound outside of it
pub struct OutsideSymbolFinder<'o> {
    oracle: &'o dyn Oracle,
    /// Scope the definition opens
    scope: ScopeId,
    /// The definition's own name
    root_name: Option<NodeId>,
    /// Members of the class being extracted, including inherited ones
    members: Vec<ClassMember>,
}

impl<'o> OutsideSymbolFinder<'o> {
    pub fn new(oracle: &'o dyn Oracle, scope: ScopeId) -> Self {
        Self {
            oracle,
            scope,
            root_name: None,
            members: Vec::new(),
        }
    }

    pub fn with_root_name(mut self, name: NodeId) -> Self {
        self.root_name = Some(name);
        self
    }

    pub fn with_members(mut self, members: Vec<ClassMember>) -> Self {
        self.members = members;
        self
    }

    /// Name nodes under `node` that need extracting, in traversal order
    pub fn find(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let program = self.oracle.program();
        let mut names = Vec::new();
        program.visit(node, &mut |id| {
            if Some(id) != self.root_name
                && matches!(program.kind(id), NodeKind::Name { .. })
                && !self.should_ignore(id)?
            {
                names.push(id);
            }
            Ok::<_, Error>(Visit::Continue)
        })?;
        Ok(names)
    }

    fn should_ignore(&self, name: NodeId) -> Result<bool> {
        let oracle = self.oracle;
        let program = oracle.program();
        let value = program.name_of(name).unwrap_or_default();
        let lookup = oracle.lookup_symbol(name);

        if let Some(lookup) = &lookup {
            for member in &self.members {
                if member.scope == lookup.scope && member.name == value {
                    return Ok(true);
                }
                if oracle.is_scope_contained_within(lookup.scope, member.scope) {
                    return Ok(true);
                }
            }
            if oracle.is_scope_contained_within(lookup.scope, self.scope) {
                return Ok(true);
            }
        }

        if oracle.scope_has_symbol(self.scope, value) {
            return Ok(true);
        }

        let parent = program.parent(name).map(|p| program.kind(p));
        match parent {
            Some(NodeKind::MemberAccess { member, .. }) if *member == name => return Ok(true),
            Some(NodeKind::Argument { name: Some(label), .. }) if *label == name => return Ok(true),
            Some(NodeKind::Parameter { name: Some(param), .. }) if *param == name => return Ok(true),
            _ => {}
        }

        if value == "self" {
            return Ok(true);
        }

        let Some(lookup) = lookup else {
            return Err(Error::oracle(
                oracle.position(name),
                format!("No symbol found for node '{}'.", value),
            ));
        };
        Ok(oracle.is_builtin_scope(lookup.scope))
    }
}

#[derive(Debug, Default)]
struct Accessed {
    client_calls: Vec<NodeId>,
    captured_props: Vec<NodeId>,
}

/// Client API and captured property calls anywhere under a node
///
/// Results are memoized per node; every subtree is visited once.
pub struct AccessedSpecialNodeFinder<'s> {
    specials: &'s SpecialCalls,
    memo: RefCell<HashMap<NodeId, Rc<Accessed>>>,
}

impl<'s> AccessedSpecialNodeFinder<'s> {
    pub fn new(specials: &'s SpecialCalls) -> Self {
        Self {
            specials,
            memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn client_api_calls(&self, oracle: &dyn Oracle, node: NodeId) -> Vec<NodeId> {
        self.accessed(oracle, node).client_calls.clone()
    }

    pub fn captured_properties(&self, oracle: &dyn Oracle, node: NodeId) -> Vec<NodeId> {
        self.accessed(oracle, node).captured_props.clone()
    }

    fn accessed(&self, oracle: &dyn Oracle, node: NodeId) -> Rc<Accessed> {
        if let Some(found) = self.memo.borrow().get(&node) {
            return found.clone();
        }

        let mut accessed = Accessed::default();
        if matches!(oracle.kind(node), NodeKind::Call { .. }) {
            if self.specials.contains(node, SpecialKind::ClientApi) {
                accessed.client_calls.push(node);
            }
            if self.specials.contains(node, SpecialKind::CapturedProps) {
                accessed.captured_props.push(node);
            }
        }
        for child in oracle.kind(node).children() {
            let nested = self.accessed(oracle, child);
            accessed.client_calls.extend(&nested.client_calls);
            accessed.captured_props.extend(&nested.captured_props);
        }

        let accessed = Rc::new(accessed);
        self.memo.borrow_mut().insert(node, accessed.clone());
        accessed
    }
}

/// Environment variables read under `node` with a literal name, first read first
///
/// Covers `os.environ["K"]`, `os.environ.get("K")` and `os.getenv("K")`.
pub fn env_var_reads(oracle: &dyn Oracle, node: NodeId) -> Vec<String> {
    let program = oracle.program();
    let mut names: Vec<String> = Vec::new();
    let _ = program.visit::<()>(node, &mut |id| {
        let key = match program.kind(id) {
            NodeKind::Index { object, items } if items.len() == 1 => oracle
                .type_of(*object)
                .is_module_member("os", "environ")
                .then(|| items[0]),
            NodeKind::Call { callee, arguments } => {
                let callee_type = oracle.type_of(*callee);
                if is_env_getter(&callee_type) {
                    arguments.first().and_then(|a| match program.kind(*a) {
                        NodeKind::Argument {
                            category: ArgumentCategory::Simple,
                            value,
                            ..
                        } => Some(*value),
                        _ => None,
                    })
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(name) = key.and_then(|k| string_literal(oracle, k)) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(Visit::Continue)
    });
    names
}

fn is_env_getter(ty: &Type) -> bool {
    ty.is_module_member("os", "environ.get") || ty.is_module_member("os", "getenv")
}

/// Text of a plain (non-formatted) string literal
fn string_literal(oracle: &dyn Oracle, node: NodeId) -> Option<String> {
    let NodeKind::StringList { strings } = oracle.kind(node) else {
        return None;
    };
    strings
        .iter()
        .map(|s| match oracle.kind(*s) {
            NodeKind::Str { value } => Some(value.as_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.concat())
}
