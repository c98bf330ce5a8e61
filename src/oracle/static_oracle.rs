//! Static Oracle - scope graph plus a small type inferencer
//!
//! Types are inferred on demand and memoized per node. Inference follows
//! declarations, annotations, constructor calls, member accesses, return
//! annotations and returned functions; anything else is `Unknown`. A node whose inference re-enters
//! itself (`x = x`) is `Unknown` as well.

use super::types::{ClassMember, ClassRef, DataClassField, FunctionType, MarkerTypes, Type};
use super::Oracle;
use crate::ast::{Constant, Number, NodeKind, ParameterCategory, Program, Visit};
use crate::scope::{Binder, Declaration, NameResolver, ScopeGraph, ScopeId, SymbolLookup};
use crate::NodeId;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Builtins whose call returns an instance of the same name
const BUILTIN_CONSTRUCTORS: &[&str] = &["str", "int", "float", "bool", "list", "dict", "tuple", "set"];

/// Oracle over a fully loaded program
pub struct StaticOracle {
    program: Program,
    scopes: ScopeGraph,
    markers: MarkerTypes,
    types: RefCell<HashMap<NodeId, Type>>,
    in_progress: RefCell<HashSet<NodeId>>,
    mros: RefCell<HashMap<NodeId, Vec<ClassRef>>>,
}

impl StaticOracle {
    pub fn new(program: Program) -> Self {
        Self::with_markers(program, MarkerTypes::default())
    }

    pub fn with_markers(program: Program, markers: MarkerTypes) -> Self {
        let scopes = Binder::bind(&program);
        debug!("Bound {} modules", program.modules().len());
        Self {
            program,
            scopes,
            markers,
            types: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
            mros: RefCell::new(HashMap::new()),
        }
    }

    pub fn scopes(&self) -> &ScopeGraph {
        &self.scopes
    }

    fn infer(&self, node: NodeId) -> Type {
        let program = &self.program;
        match program.kind(node) {
            NodeKind::Name { .. } => self.name_type(node),
            NodeKind::MemberAccess { object, member } => match program.name_of(*member) {
                Some(member) => self.member_type(self.type_of(*object), member),
                None => Type::Unknown,
            },
            NodeKind::Call { callee, .. } => self.call_result(self.type_of(*callee)),
            NodeKind::Lambda { .. } => Type::Function(FunctionType {
                name: "<lambda>".to_string(),
                node: Some(node),
                bound_to: None,
            }),
            NodeKind::Function { name, .. } => Type::Function(FunctionType {
                name: program.name_of(*name).unwrap_or_default().to_string(),
                node: Some(node),
                bound_to: None,
            }),
            NodeKind::Class { .. } => self.class_ref(node).map(Type::Class).unwrap_or_default(),
            NodeKind::Parameter { .. } => self.parameter_type(node),
            NodeKind::Number { value } => Type::Builtin(
                match value {
                    Number::Int(_) => "int",
                    Number::Float(_) => "float",
                }
                .to_string(),
            ),
            NodeKind::StringList { .. } | NodeKind::Str { .. } | NodeKind::FormatString { .. } => {
                Type::Builtin("str".to_string())
            }
            NodeKind::Constant { value } => Type::Builtin(
                match value {
                    Constant::None => "None",
                    Constant::True | Constant::False => "bool",
                    Constant::Ellipsis => "ellipsis",
                }
                .to_string(),
            ),
            NodeKind::Tuple { .. } => Type::Builtin("tuple".to_string()),
            NodeKind::List { .. } => Type::Builtin("list".to_string()),
            NodeKind::Set { .. } => Type::Builtin("set".to_string()),
            NodeKind::Dictionary { .. } => Type::Builtin("dict".to_string()),
            _ => Type::Unknown,
        }
    }

    fn name_type(&self, node: NodeId) -> Type {
        let program = &self.program;
        // The name of a definition types as the definition
        if let Some(parent) = program.parent(node) {
            match program.kind(parent) {
                NodeKind::Function { name, .. } | NodeKind::Class { name, .. } if *name == node => {
                    return self.type_of(parent);
                }
                _ => {}
            }
        }

        self.lookup_symbol(node)
            .and_then(|lookup| lookup.declarations.last().copied())
            .map(|declaration| self.declaration_type(declaration))
            .unwrap_or_default()
    }

    fn declaration_type(&self, declaration: Declaration) -> Type {
        match declaration {
            Declaration::Intrinsic { name } => Type::Builtin(name.to_string()),
            Declaration::Variable { node } => self.variable_type(node),
            Declaration::Parameter { node } | Declaration::Function { node } | Declaration::Class { node } => {
                self.type_of(node)
            }
            Declaration::Alias { node } => self.alias_type(node),
        }
    }

    fn variable_type(&self, target: NodeId) -> Type {
        let program = &self.program;
        let Some(parent) = program.parent(target) else {
            return Type::Unknown;
        };
        match program.kind(parent) {
            NodeKind::Assignment {
                target: t,
                annotation,
                value,
            } if *t == target => {
                if let Some(annotation) = annotation {
                    let ty = self.annotation_type(*annotation);
                    if !ty.is_unknown() {
                        return ty;
                    }
                }
                value.map(|v| self.type_of(v)).unwrap_or_default()
            }
            NodeKind::AssignmentExpression { target: t, value } if *t == target => self.type_of(*value),
            _ => Type::Unknown,
        }
    }

    fn alias_type(&self, node: NodeId) -> Type {
        match self.program.kind(node) {
            NodeKind::ImportAs { module, alias } => Type::Module {
                name: match alias {
                    Some(_) => module.join("."),
                    None => module.first().cloned().unwrap_or_default(),
                },
            },
            NodeKind::ImportFromAs { name, .. } => match self.import_module_name(node) {
                Some(module) => self.module_member_type(&module, name),
                None => Type::Unknown,
            },
            _ => Type::Unknown,
        }
    }

    /// Type of `module.name`, whether or not the module was loaded
    fn module_member_type(&self, module: &str, name: &str) -> Type {
        let program = &self.program;
        let loaded = program.module_by_name(module);
        if let Some(m) = loaded {
            let declaration = self
                .scopes
                .scope_of_owner(m.root())
                .and_then(|scope| self.scopes.lookup_local(scope, name))
                .and_then(|declarations| declarations.last().copied());
            if let Some(declaration) = declaration {
                return self.declaration_type(declaration);
            }
        }

        let submodule = format!("{}.{}", module, name);
        if program.module_by_name(&submodule).is_some() {
            return Type::Module { name: submodule };
        }
        if loaded.is_some() {
            return Type::Unknown;
        }
        Type::ModuleMember {
            module: module.to_string(),
            name: name.to_string(),
        }
    }

    fn member_type(&self, base: Type, member: &str) -> Type {
        match base {
            Type::Module { name } => self.module_member_type(&name, member),
            Type::ModuleMember { module, name } => Type::ModuleMember {
                module,
                name: format!("{}.{}", name, member),
            },
            Type::Instance(class) | Type::Class(class) => {
                match self.lookup_class_attribute(&class, member) {
                    Some(Declaration::Function { node }) => Type::Function(FunctionType {
                        name: member.to_string(),
                        node: Some(node),
                        bound_to: Some(class),
                    }),
                    Some(declaration) => self.declaration_type(declaration),
                    None => Type::Unknown,
                }
            }
            _ => Type::Unknown,
        }
    }

    fn call_result(&self, callee: Type) -> Type {
        match callee {
            Type::Class(class) => Type::Instance(class),
            Type::Function(FunctionType {
                node: Some(node), ..
            }) => match self.program.kind(node) {
                NodeKind::Function {
                    returns: Some(returns),
                    ..
                } => self.annotation_type(*returns),
                NodeKind::Function { returns: None, .. } => self.returned_function(node),
                _ => Type::Unknown,
            },
            Type::Builtin(name) if BUILTIN_CONSTRUCTORS.contains(&name.as_str()) => Type::Builtin(name),
            _ => Type::Unknown,
        }
    }

    /// The function type returned by an unannotated `def`, if any `return` yields one
    fn returned_function(&self, function: NodeId) -> Type {
        let program = &self.program;
        let mut returned = Type::Unknown;
        let _ = program.visit::<()>(function, &mut |n| {
            if !returned.is_unknown() {
                return Ok(Visit::SkipChildren);
            }
            match program.kind(n) {
                NodeKind::Function { .. } | NodeKind::Lambda { .. } | NodeKind::Class { .. } if n != function => {
                    Ok(Visit::SkipChildren)
                }
                NodeKind::Return { value: Some(value) } => {
                    if let ty @ Type::Function(_) = self.type_of(*value) {
                        returned = ty;
                    }
                    Ok(Visit::SkipChildren)
                }
                _ => Ok(Visit::Continue),
            }
        });
        returned
    }

    /// Type of a value annotated with `node`
    fn annotation_type(&self, node: NodeId) -> Type {
        match self.program.kind(node) {
            NodeKind::Constant {
                value: Constant::None,
            } => Type::Builtin("None".to_string()),
            NodeKind::Index { object, items } => {
                let base = self.type_of(*object);
                if base.is_module_member("typing", "Optional") {
                    items.first().map(|i| self.annotation_type(*i)).unwrap_or_default()
                } else if is_callable_annotation(&base) {
                    callable()
                } else {
                    Type::Unknown
                }
            }
            NodeKind::Name { .. } | NodeKind::MemberAccess { .. } => match self.type_of(node) {
                Type::Class(class) => Type::Instance(class),
                Type::Builtin(name) => Type::Builtin(name),
                ty if is_callable_annotation(&ty) => callable(),
                _ => Type::Unknown,
            },
            _ => Type::Unknown,
        }
    }

    fn parameter_type(&self, parameter: NodeId) -> Type {
        let program = &self.program;
        let NodeKind::Parameter {
            category,
            annotation,
            default,
            ..
        } = program.kind(parameter)
        else {
            return Type::Unknown;
        };

        match category {
            ParameterCategory::VarArgs => return Type::Builtin("tuple".to_string()),
            ParameterCategory::KwArgs => return Type::Builtin("dict".to_string()),
            _ => {}
        }

        if let Some(annotation) = annotation {
            let ty = self.annotation_type(*annotation);
            if !ty.is_unknown() {
                return ty;
            }
        }

        if let Some(ty) = self.receiver_type(parameter) {
            return ty;
        }

        default.map(|d| self.type_of(d)).unwrap_or_default()
    }

    /// `self`/`cls` typing for the first parameter of a method
    fn receiver_type(&self, parameter: NodeId) -> Option<Type> {
        let program = &self.program;
        let function = program.parent(parameter)?;
        let NodeKind::Function {
            parameters,
            decorators,
            ..
        } = program.kind(function)
        else {
            return None;
        };
        if parameters.first() != Some(&parameter) {
            return None;
        }
        let class = self.class_ref(program.parent(function)?)?;

        let decorated = |name: &str| decorators.iter().any(|d| program.text(*d) == name);
        if decorated("staticmethod") {
            None
        } else if decorated("classmethod") {
            Some(Type::Class(class))
        } else {
            Some(Type::Instance(class))
        }
    }

    fn class_ref(&self, node: NodeId) -> Option<ClassRef> {
        let program = &self.program;
        let NodeKind::Class { name, .. } = program.kind(node) else {
            return None;
        };

        let mut parts = vec![program.name_of(*name)?.to_string()];
        for ancestor in program.ancestors(node) {
            if let NodeKind::Class { name, .. } = program.kind(ancestor) {
                if let Some(outer) = program.name_of(*name) {
                    parts.push(outer.to_string());
                }
            }
        }
        parts.reverse();

        Some(ClassRef {
            node,
            name: parts.join("."),
            module: program.module_of(node).name().to_string(),
        })
    }

    fn bases(&self, class: &ClassRef) -> Vec<ClassRef> {
        let program = &self.program;
        let NodeKind::Class { arguments, .. } = program.kind(class.node) else {
            return Vec::new();
        };
        arguments
            .iter()
            .filter_map(|arg| match program.kind(*arg) {
                NodeKind::Argument {
                    name: None, value, ..
                } => match self.type_of(*value) {
                    Type::Class(base) => Some(base),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn compute_mro(&self, class: &ClassRef, visiting: &mut HashSet<NodeId>) -> Vec<ClassRef> {
        if let Some(mro) = self.mros.borrow().get(&class.node) {
            return mro.clone();
        }
        if !visiting.insert(class.node) {
            return vec![class.clone()];
        }

        let bases = self.bases(class);
        let mut sequences: Vec<Vec<ClassRef>> = bases
            .iter()
            .map(|base| self.compute_mro(base, visiting))
            .collect();
        sequences.push(bases);
        visiting.remove(&class.node);

        let mut mro = vec![class.clone()];
        match merge_c3(sequences.clone()) {
            Some(merged) => mro.extend(merged),
            None => {
                debug!("No consistent MRO for {}, using depth-first order", class.full_name());
                for base in sequences.into_iter().flatten() {
                    if !mro.contains(&base) {
                        mro.push(base);
                    }
                }
            }
        }

        self.mros.borrow_mut().insert(class.node, mro.clone());
        mro
    }

    fn contains_method(&self, class: NodeId, method: &str) -> bool {
        let program = &self.program;
        program.descendants(class).into_iter().any(|node| match program.kind(node) {
            NodeKind::Function { name, .. } => program.name_of(*name) == Some(method),
            _ => false,
        })
    }

    fn is_dataclass_decorator(&self, decorator: NodeId) -> bool {
        let program = &self.program;
        let expression = match program.kind(decorator) {
            NodeKind::Call { callee, .. } => *callee,
            _ => decorator,
        };
        if self.type_of(expression).is_module_member("dataclasses", "dataclass") {
            return true;
        }
        let text = program.text(expression);
        text == "dataclass" || text.ends_with(".dataclass")
    }
}

fn callable() -> Type {
    Type::Function(FunctionType {
        name: "Callable".to_string(),
        node: None,
        bound_to: None,
    })
}

fn is_callable_annotation(ty: &Type) -> bool {
    ty.is_module_member("typing", "Callable") || ty.is_module_member("collections.abc", "Callable")
}

/// C3 merge; `None` when the hierarchy has no consistent order
fn merge_c3(mut sequences: Vec<Vec<ClassRef>>) -> Option<Vec<ClassRef>> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }

        let candidate = sequences
            .iter()
            .map(|s| &s[0])
            .find(|head| !sequences.iter().any(|s| s[1..].contains(head)))?
            .clone();

        for sequence in sequences.iter_mut() {
            if sequence.first() == Some(&candidate) {
                sequence.remove(0);
            }
        }
        result.push(candidate);
    }
}

impl Oracle for StaticOracle {
    fn program(&self) -> &Program {
        &self.program
    }

    fn markers(&self) -> &MarkerTypes {
        &self.markers
    }

    fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.scopes.node_scope(node)
    }

    fn scope_of_definition(&self, node: NodeId) -> Option<ScopeId> {
        self.scopes.scope_of_owner(node)
    }

    fn is_scope_contained_within(&self, inner: ScopeId, outer: ScopeId) -> bool {
        self.scopes.is_contained_within(inner, outer)
    }

    fn is_builtin_scope(&self, scope: ScopeId) -> bool {
        scope == ScopeId::root()
    }

    fn scope_has_symbol(&self, scope: ScopeId, name: &str) -> bool {
        self.scopes.lookup_local(scope, name).is_some()
    }

    fn lookup_symbol(&self, name: NodeId) -> Option<SymbolLookup> {
        NameResolver::new(&self.scopes).resolve_node(&self.program, name)
    }

    fn type_of(&self, node: NodeId) -> Type {
        if let Some(ty) = self.types.borrow().get(&node) {
            return ty.clone();
        }
        if !self.in_progress.borrow_mut().insert(node) {
            return Type::Unknown;
        }

        let ty = self.infer(node);

        self.in_progress.borrow_mut().remove(&node);
        self.types.borrow_mut().insert(node, ty.clone());
        ty
    }

    fn is_subclass_of(&self, class: &ClassRef, full_name: &str) -> bool {
        self.mro(class).iter().any(|k| k.full_name() == full_name)
    }

    fn does_method_belong_to(&self, method: &FunctionType, full_name: &str) -> bool {
        let Some(receiver) = &method.bound_to else {
            return false;
        };
        self.mro(receiver)
            .iter()
            .any(|k| self.contains_method(k.node, &method.name) && self.is_subclass_of(k, full_name))
    }

    fn mro(&self, class: &ClassRef) -> Vec<ClassRef> {
        self.compute_mro(class, &mut HashSet::new())
    }

    fn class_members(&self, class: &ClassRef) -> Vec<ClassMember> {
        let Some(scope) = self.scopes.scope_of_owner(class.node) else {
            return Vec::new();
        };
        self.scopes
            .symbols(scope)
            .into_iter()
            .map(|(name, declarations)| ClassMember {
                scope,
                name: name.to_string(),
                declarations: declarations.to_vec(),
            })
            .collect()
    }

    fn lookup_class_attribute(&self, class: &ClassRef, name: &str) -> Option<Declaration> {
        self.mro(class).iter().find_map(|k| {
            self.scopes
                .scope_of_owner(k.node)
                .and_then(|scope| self.scopes.lookup_local(scope, name))
                .and_then(|declarations| declarations.last().copied())
        })
    }

    fn is_dataclass(&self, class: &ClassRef) -> bool {
        match self.program.kind(class.node) {
            NodeKind::Class { decorators, .. } => {
                decorators.iter().any(|d| self.is_dataclass_decorator(*d))
            }
            _ => false,
        }
    }

    fn dataclass_fields(&self, class: &ClassRef) -> Vec<DataClassField> {
        let program = &self.program;
        let mut fields: Vec<DataClassField> = Vec::new();
        for k in self.mro(class).iter().rev() {
            if !self.is_dataclass(k) {
                continue;
            }
            let NodeKind::Class { body, .. } = program.kind(k.node) else {
                continue;
            };
            for stmt in body {
                let NodeKind::Assignment {
                    target,
                    annotation: Some(annotation),
                    value,
                } = program.kind(*stmt)
                else {
                    continue;
                };
                let Some(name) = program.name_of(*target) else {
                    continue;
                };
                if program.text(*annotation).contains("ClassVar") {
                    continue;
                }

                let field = DataClassField {
                    name: name.to_string(),
                    default: *value,
                };
                match fields.iter_mut().find(|f| f.name == name) {
                    Some(existing) => *existing = field,
                    None => fields.push(field),
                }
            }
        }
        fields
    }

    fn import_module_name(&self, node: NodeId) -> Option<String> {
        let program = &self.program;
        match program.kind(node) {
            NodeKind::ImportAs { module, .. } => Some(module.join(".")),
            NodeKind::ImportFromAs { .. } => {
                let parent = program.parent(node)?;
                let NodeKind::ImportFrom { module, .. } = program.kind(parent) else {
                    return None;
                };
                program.module_of(node).absolute_import(module)
            }
            _ => None,
        }
    }
}
