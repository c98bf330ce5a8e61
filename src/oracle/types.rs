//! Types reported by the oracle

use crate::ast::NodeId;
use crate::scope::{Declaration, ScopeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user-defined class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRef {
    /// The `Class` definition node
    pub node: NodeId,
    /// Qualified name inside the module, `Outer.Inner` for nested classes
    pub name: String,
    /// Dotted name of the defining module
    pub module: String,
}

impl ClassRef {
    /// `module.Qualified.Name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// The innermost class name
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// A callable: a `def`, a lambda, or an opaque `Callable` annotation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub name: String,
    /// `Function` or `Lambda` node; absent for annotated callables
    pub node: Option<NodeId>,
    /// Receiver class when the function was reached through a member access
    pub bound_to: Option<ClassRef>,
}

/// Inferred type of an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Type {
    #[default]
    Unknown,
    /// A module object, loaded or not
    Module { name: String },
    /// A member of a module the program does not contain (`os.environ`)
    ModuleMember { module: String, name: String },
    /// The class object itself
    Class(ClassRef),
    /// An instance of a class
    Instance(ClassRef),
    Function(FunctionType),
    /// Builtin functions and instances of builtin types (`str`, `print`)
    Builtin(String),
}

impl Type {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Dotted name used in diagnostics
    pub fn qualified_name(&self) -> String {
        match self {
            Self::Unknown => "Unknown".to_string(),
            Self::Module { name } => name.clone(),
            Self::ModuleMember { module, name } => format!("{}.{}", module, name),
            Self::Class(class) | Self::Instance(class) => class.full_name(),
            Self::Function(function) => match &function.bound_to {
                Some(class) => format!("{}.{}", class.full_name(), function.name),
                None => function.name.clone(),
            },
            Self::Builtin(name) => format!("builtins.{}", name),
        }
    }

    /// Whether this is the given member of an opaque module
    pub fn is_module_member(&self, module: &str, name: &str) -> bool {
        matches!(self, Self::ModuleMember { module: m, name: n } if m == module && n == name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "type[{}]", class.full_name()),
            Self::Function(function) => match &function.bound_to {
                Some(class) => write!(f, "function {}.{}", class.short_name(), function.name),
                None => write!(f, "function {}", function.name),
            },
            other => f.write_str(&other.qualified_name()),
        }
    }
}

/// One field of a data class, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataClassField {
    pub name: String,
    /// Default value expression
    pub default: Option<NodeId>,
}

/// Full names of the four marker base classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerTypes {
    pub resource: String,
    pub infra_api: String,
    pub client_api: String,
    pub captured_props: String,
}

impl Default for MarkerTypes {
    fn default() -> Self {
        Self {
            resource: "pluto_base.IResource".to_string(),
            infra_api: "pluto_base.IResourceInfraApi".to_string(),
            client_api: "pluto_base.IResourceClientApi".to_string(),
            captured_props: "pluto_base.IResourceCapturedProps".to_string(),
        }
    }
}

/// A symbol bound directly in a class body
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMember {
    pub scope: ScopeId,
    pub name: String,
    pub declarations: Vec<Declaration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        let router = ClassRef {
            node: NodeId(3),
            name: "Router".into(),
            module: "pluto_client".into(),
        };
        assert_eq!(router.full_name(), "pluto_client.Router");
        assert_eq!(Type::Instance(router.clone()).qualified_name(), "pluto_client.Router");
        assert_eq!(Type::Class(router.clone()).to_string(), "type[pluto_client.Router]");

        let get = Type::Function(FunctionType {
            name: "get".into(),
            node: None,
            bound_to: Some(router),
        });
        assert_eq!(get.qualified_name(), "pluto_client.Router.get");
        assert_eq!(get.to_string(), "function Router.get");

        let environ = Type::ModuleMember {
            module: "os".into(),
            name: "environ".into(),
        };
        assert!(environ.is_module_member("os", "environ"));
        assert!(!environ.is_module_member("os", "getenv"));
    }

    #[test]
    fn test_nested_class_short_name() {
        let inner = ClassRef {
            node: NodeId(0),
            name: "Outer.Inner".into(),
            module: "m".into(),
        };
        assert_eq!(inner.short_name(), "Inner");
        assert_eq!(inner.full_name(), "m.Outer.Inner");
    }
}
