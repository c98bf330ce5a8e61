//! Resource Object Tracker
//!
//! Follows a resource object back to where it came from: either the
//! constructor call that created it or the parameter it was passed in
//! through. Only direct chains are followed (`a = Router(); b = a; b.get()`).

use crate::ast::NodeKind;
use crate::oracle::{Oracle, Type};
use crate::scope::Declaration;
use crate::{Error, NodeId, Result};
use std::cell::RefCell;
use std::collections::HashMap;

pub struct ResourceObjectTracker<'o> {
    oracle: &'o dyn Oracle,
    /// Call or name node -> constructor call or parameter
    cache: RefCell<HashMap<NodeId, NodeId>>,
}

impl<'o> ResourceObjectTracker<'o> {
    pub fn new(oracle: &'o dyn Oracle) -> Self {
        Self {
            oracle,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Declaration of the object a method is called on (`obj.method(...)`)
    pub fn caller_declaration(&self, call: NodeId) -> Result<Option<NodeId>> {
        if let Some(found) = self.cached(call) {
            return Ok(Some(found));
        }

        let oracle = self.oracle;
        let NodeKind::Call { callee, .. } = oracle.kind(call) else {
            return Err(Error::unsupported(oracle.position(call), "The node is not a call."));
        };
        let NodeKind::MemberAccess { object, .. } = oracle.kind(*callee) else {
            return Err(Error::unsupported(
                oracle.position(call),
                "Failed to process this expression. We currently only support directly calling \
                 methods on the resource object; indirect method calls, such as assigning a \
                 method to a variable and then invoking it, are not supported.",
            ));
        };

        let declaration = match oracle.kind(*object) {
            NodeKind::Name { .. } => self.name_declaration(*object)?,
            NodeKind::Call { .. } => self.is_creating_resource(*object)?.then_some(*object),
            other => {
                return Err(Error::unsupported(
                    oracle.position(*object),
                    format!("The caller node type '{}' is not supported.", other.name()),
                ));
            }
        };

        if let Some(found) = declaration {
            self.cache.borrow_mut().insert(call, found);
        }
        Ok(declaration)
    }

    /// Declaration of the resource object a name refers to
    pub fn name_declaration(&self, name: NodeId) -> Result<Option<NodeId>> {
        if let Some(found) = self.cached(name) {
            return Ok(Some(found));
        }

        let oracle = self.oracle;
        let value = oracle.program().name_of(name).unwrap_or_default();
        let Some(lookup) = oracle.lookup_symbol(name) else {
            return Err(Error::oracle(
                oracle.position(name),
                format!("No symbol found for node '{}'.", value),
            ));
        };

        let declaration = match lookup.declarations.as_slice() {
            [] => {
                return Err(Error::missing(
                    oracle.position(name),
                    "Cannot find the resource object declaration.",
                ));
            }
            [declaration] => *declaration,
            _ => {
                return Err(Error::unsupported(
                    oracle.position(name),
                    "The resource object has multiple declarations.",
                ));
            }
        };

        let target = match declaration {
            Declaration::Parameter { node } => return Ok(Some(node)),
            Declaration::Variable { node } => node,
            other => {
                return Err(Error::unsupported(
                    oracle.position(name),
                    format!("The declaration type '{}' is not variable.", declaration_kind(&other)),
                ));
            }
        };

        let source = self.inferred_source(target)?;
        let found = match oracle.kind(source) {
            NodeKind::Call { .. } => self.is_creating_resource(source)?.then_some(source),
            NodeKind::Name { .. } => self.name_declaration(source)?,
            other => {
                return Err(Error::unsupported(
                    oracle.position(source),
                    format!("The inferred type source node type '{}' is not supported.", other.name()),
                ));
            }
        };

        if let Some(found) = found {
            self.cache.borrow_mut().insert(name, found);
        }
        Ok(found)
    }

    /// Whether `call` constructs a resource object
    pub fn is_creating_resource(&self, call: NodeId) -> Result<bool> {
        if self.cached(call) == Some(call) {
            return Ok(true);
        }

        let oracle = self.oracle;
        let NodeKind::Call { callee, .. } = oracle.kind(call) else {
            return Ok(false);
        };
        let Type::Class(class) = oracle.type_of(*callee) else {
            return Err(Error::unsupported(
                oracle.position(call),
                format!(
                    "The type of the call node '{}' is not a class. We currently only support the \
                     variable assigned from a class constructor.",
                    oracle.text(*callee)
                ),
            ));
        };

        if oracle.is_resource_class(&class) {
            self.cache.borrow_mut().insert(call, call);
            return Ok(true);
        }
        Ok(false)
    }

    /// The value a variable target was assigned
    fn inferred_source(&self, target: NodeId) -> Result<NodeId> {
        let oracle = self.oracle;
        let parent = oracle.program().parent(target);
        match parent.map(|p| oracle.kind(p)) {
            Some(NodeKind::Assignment {
                target: t,
                value: Some(value),
                ..
            }) if *t == target => Ok(*value),
            Some(NodeKind::AssignmentExpression { target: t, value }) if *t == target => Ok(*value),
            other => Err(Error::unsupported(
                oracle.position(target),
                format!(
                    "The inferred type source node type '{}' is not supported.",
                    other.map(NodeKind::name).unwrap_or("Unknown")
                ),
            )),
        }
    }

    fn cached(&self, node: NodeId) -> Option<NodeId> {
        self.cache.borrow().get(&node).copied()
    }
}

fn declaration_kind(declaration: &Declaration) -> &'static str {
    match declaration {
        Declaration::Intrinsic { .. } => "intrinsic",
        Declaration::Variable { .. } => "variable",
        Declaration::Parameter { .. } => "parameter",
        Declaration::Function { .. } => "function",
        Declaration::Class { .. } => "class",
        Declaration::Alias { .. } => "alias",
    }
}
