//! Semantic oracle
//!
//! Everything the deduction core knows about a program it learns through the
//! [`Oracle`] trait: node kinds and text, scopes, declarations, and inferred
//! types. [`StaticOracle`] implements it for programs loaded by the Python
//! front end.

pub mod static_oracle;
pub mod types;

pub use crate::scope::SymbolLookup;
pub use static_oracle::StaticOracle;
pub use types::{ClassMember, ClassRef, DataClassField, FunctionType, MarkerTypes, Type};

use crate::ast::{NodeKind, Position, Program};
use crate::scope::{Declaration, ScopeId};
use crate::{Error, NodeId, Result};

/// Semantic queries over one program
pub trait Oracle {
    fn program(&self) -> &Program;

    /// Full names of the resource marker classes
    fn markers(&self) -> &MarkerTypes;

    /// Scope a node is evaluated in
    fn scope_of(&self, node: NodeId) -> Option<ScopeId>;

    /// Scope opened by a definition (function, class, lambda, comprehension, module)
    fn scope_of_definition(&self, node: NodeId) -> Option<ScopeId>;

    fn is_scope_contained_within(&self, inner: ScopeId, outer: ScopeId) -> bool;

    fn is_builtin_scope(&self, scope: ScopeId) -> bool;

    /// Whether `scope` itself binds `name`
    fn scope_has_symbol(&self, scope: ScopeId, name: &str) -> bool;

    /// Resolve a `Name` node to the scope that binds it
    fn lookup_symbol(&self, name: NodeId) -> Option<SymbolLookup>;

    fn type_of(&self, node: NodeId) -> Type;

    /// Whether the class is `full_name` or has it in its MRO
    fn is_subclass_of(&self, class: &ClassRef, full_name: &str) -> bool;

    /// Whether a class in the receiver's MRO defines the method and derives from `full_name`
    fn does_method_belong_to(&self, method: &FunctionType, full_name: &str) -> bool;

    /// Method resolution order, starting with the class itself
    fn mro(&self, class: &ClassRef) -> Vec<ClassRef>;

    /// Symbols bound directly in the class body
    fn class_members(&self, class: &ClassRef) -> Vec<ClassMember>;

    /// Attribute lookup along the MRO
    fn lookup_class_attribute(&self, class: &ClassRef, name: &str) -> Option<Declaration>;

    fn is_dataclass(&self, class: &ClassRef) -> bool;

    /// Fields in declaration order, inherited fields first
    fn dataclass_fields(&self, class: &ClassRef) -> Vec<DataClassField>;

    /// Absolute module name imported by an `ImportAs` or `ImportFromAs` node
    fn import_module_name(&self, node: NodeId) -> Option<String>;

    fn position(&self, node: NodeId) -> Position {
        self.program().position(node)
    }

    fn text(&self, node: NodeId) -> &str {
        self.program().text(node)
    }

    fn kind(&self, node: NodeId) -> &NodeKind {
        self.program().kind(node)
    }

    fn is_resource_class(&self, class: &ClassRef) -> bool {
        self.is_subclass_of(class, &self.markers().resource)
    }

    /// Whether the expression evaluates to a resource object
    fn is_resource_type(&self, ty: &Type) -> bool {
        match ty {
            Type::Instance(class) => self.is_resource_class(class),
            _ => false,
        }
    }

    /// The `def` whose parameters a call binds to
    ///
    /// For a class this is its `__init__`.
    fn function_declaration_for_call(&self, call: NodeId) -> Result<NodeId> {
        let NodeKind::Call { callee, .. } = self.kind(call) else {
            return Err(Error::unsupported(self.position(call), "The node is not a call."));
        };

        match self.type_of(*callee) {
            Type::Class(class) => match self.lookup_class_attribute(&class, "__init__") {
                Some(Declaration::Function { node }) => Ok(node),
                _ => Err(Error::unsupported(
                    self.position(call),
                    "The __init__ function must be a function.",
                )),
            },
            Type::Function(FunctionType {
                node: Some(node), ..
            }) if matches!(self.kind(node), NodeKind::Function { .. }) => Ok(node),
            Type::Function(_) => Err(Error::unsupported(
                self.position(call),
                "Only can get the parameter name from a function.",
            )),
            _ => Err(Error::unsupported(
                self.position(call),
                "The type of the call node is not supported.",
            )),
        }
    }
}
