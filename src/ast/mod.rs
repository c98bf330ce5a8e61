//! Arena AST for analyzed Python programs
//!
//! Every node of every loaded module lives in one id space so that a `NodeId`
//! alone identifies a node across the whole `Program`. Nodes are immutable once
//! a module is inserted; the deduction core only ever reads them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable identity of a node, usable as a map key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte range plus 1-based line/column of the first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

/// Printable source position, rendered as `<path:line:column>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}:{}>", self.path.display(), self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    MatrixMultiply,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    And,
    Or,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Is,
    IsNot,
    In,
    NotIn,
}

impl Operator {
    /// Parse an operator token, accepting the augmented form (`+=`) as well
    pub fn from_token(token: &str) -> Option<Self> {
        let token = match token.strip_suffix('=') {
            Some(stripped)
                if !matches!(token, "==" | "!=" | "<=" | ">=") && !stripped.is_empty() =>
            {
                stripped
            }
            _ => token,
        };
        let op = match token {
            "+" => Self::Add,
            "-" => Self::Subtract,
            "*" => Self::Multiply,
            "/" => Self::Divide,
            "//" => Self::FloorDivide,
            "%" => Self::Modulo,
            "**" => Self::Power,
            "@" => Self::MatrixMultiply,
            "&" => Self::BitwiseAnd,
            "|" => Self::BitwiseOr,
            "^" => Self::BitwiseXor,
            "<<" => Self::LeftShift,
            ">>" => Self::RightShift,
            "and" => Self::And,
            "or" => Self::Or,
            "==" => Self::Equals,
            "!=" | "<>" => Self::NotEquals,
            "<" => Self::LessThan,
            "<=" => Self::LessThanOrEqual,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterThanOrEqual,
            "is" => Self::Is,
            "is not" => Self::IsNot,
            "in" => Self::In,
            "not in" => Self::NotIn,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::FloorDivide => "//",
            Self::Modulo => "%",
            Self::Power => "**",
            Self::MatrixMultiply => "@",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::LeftShift => "<<",
            Self::RightShift => ">>",
            Self::And => "and",
            Self::Or => "or",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    None,
    True,
    False,
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterCategory {
    Simple,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
    /// bare `*`
    KeywordSeparator,
    /// bare `/`
    PositionalSeparator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentCategory {
    Simple,
    UnpackedList,
    UnpackedDictionary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// One piece of an f-string, in source order
#[derive(Debug, Clone, PartialEq)]
pub enum FormatPiece {
    Literal(String),
    Field {
        expression: NodeId,
        conversion: Option<char>,
        spec: Option<String>,
    },
}

/// Syntax of one node. Child references are ids into the same program.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Module {
        body: Vec<NodeId>,
    },
    Function {
        name: NodeId,
        parameters: Vec<NodeId>,
        returns: Option<NodeId>,
        body: Vec<NodeId>,
        decorators: Vec<NodeId>,
        is_async: bool,
    },
    Class {
        name: NodeId,
        arguments: Vec<NodeId>,
        body: Vec<NodeId>,
        decorators: Vec<NodeId>,
    },
    Parameter {
        name: Option<NodeId>,
        category: ParameterCategory,
        annotation: Option<NodeId>,
        default: Option<NodeId>,
    },
    Lambda {
        parameters: Vec<NodeId>,
        body: NodeId,
    },
    Assignment {
        target: NodeId,
        annotation: Option<NodeId>,
        value: Option<NodeId>,
    },
    AugmentedAssignment {
        target: NodeId,
        operator: Operator,
        value: NodeId,
    },
    ExpressionStatement {
        expression: NodeId,
    },
    Return {
        value: Option<NodeId>,
    },
    Pass,
    Break,
    Continue,
    Raise {
        exception: Option<NodeId>,
        cause: Option<NodeId>,
    },
    Assert {
        test: NodeId,
        message: Option<NodeId>,
    },
    Delete {
        targets: Vec<NodeId>,
    },
    Global {
        names: Vec<NodeId>,
    },
    Nonlocal {
        names: Vec<NodeId>,
    },
    If {
        test: NodeId,
        body: Vec<NodeId>,
        orelse: Vec<NodeId>,
    },
    While {
        test: NodeId,
        body: Vec<NodeId>,
        orelse: Vec<NodeId>,
    },
    For {
        target: NodeId,
        iterable: NodeId,
        body: Vec<NodeId>,
        orelse: Vec<NodeId>,
        is_async: bool,
    },
    With {
        items: Vec<NodeId>,
        body: Vec<NodeId>,
    },
    WithItem {
        expression: NodeId,
        target: Option<NodeId>,
    },
    Try {
        body: Vec<NodeId>,
        handlers: Vec<NodeId>,
        orelse: Vec<NodeId>,
        finally: Vec<NodeId>,
    },
    ExceptHandler {
        type_expression: Option<NodeId>,
        name: Option<NodeId>,
        body: Vec<NodeId>,
    },
    Import {
        names: Vec<NodeId>,
    },
    /// `import a.b.c [as alias]`
    ImportAs {
        module: Vec<String>,
        alias: Option<NodeId>,
    },
    /// `from module import ...`; `module` keeps leading dots of relative imports
    ImportFrom {
        module: String,
        names: Vec<NodeId>,
        wildcard: bool,
    },
    ImportFromAs {
        name: String,
        alias: Option<NodeId>,
    },
    Name {
        value: String,
    },
    Call {
        callee: NodeId,
        arguments: Vec<NodeId>,
    },
    Argument {
        name: Option<NodeId>,
        category: ArgumentCategory,
        value: NodeId,
    },
    MemberAccess {
        object: NodeId,
        member: NodeId,
    },
    Index {
        object: NodeId,
        items: Vec<NodeId>,
    },
    Slice {
        lower: Option<NodeId>,
        upper: Option<NodeId>,
        step: Option<NodeId>,
    },
    Number {
        value: Number,
    },
    /// Adjacent string literals; a single literal is a one-element list
    StringList {
        strings: Vec<NodeId>,
    },
    Str {
        value: String,
    },
    FormatString {
        pieces: Vec<FormatPiece>,
    },
    Constant {
        value: Constant,
    },
    Tuple {
        items: Vec<NodeId>,
    },
    List {
        items: Vec<NodeId>,
    },
    Set {
        items: Vec<NodeId>,
    },
    Dictionary {
        entries: Vec<NodeId>,
    },
    DictionaryEntry {
        key: NodeId,
        value: NodeId,
    },
    DictionaryExpand {
        value: NodeId,
    },
    BinaryOperation {
        left: NodeId,
        operator: Operator,
        right: NodeId,
    },
    UnaryOperation {
        operator: UnaryOperator,
        operand: NodeId,
    },
    Ternary {
        test: NodeId,
        if_true: NodeId,
        if_false: NodeId,
    },
    Comprehension {
        kind: ComprehensionKind,
        element: NodeId,
        clauses: Vec<NodeId>,
    },
    ComprehensionFor {
        target: NodeId,
        iterable: NodeId,
        is_async: bool,
    },
    ComprehensionIf {
        test: NodeId,
    },
    Await {
        value: NodeId,
    },
    Yield {
        value: Option<NodeId>,
        from: bool,
    },
    /// `*value` inside a display or call
    Unpack {
        value: NodeId,
    },
    /// `target := value`
    AssignmentExpression {
        target: NodeId,
        value: NodeId,
    },
    /// Grammar the lowering keeps only structurally
    Unknown {
        kind: String,
        children: Vec<NodeId>,
    },
}

impl NodeKind {
    /// Short name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Module { .. } => "Module",
            Self::Function { .. } => "Function",
            Self::Class { .. } => "Class",
            Self::Parameter { .. } => "Parameter",
            Self::Lambda { .. } => "Lambda",
            Self::Assignment { .. } => "Assignment",
            Self::AugmentedAssignment { .. } => "AugmentedAssignment",
            Self::ExpressionStatement { .. } => "ExpressionStatement",
            Self::Return { .. } => "Return",
            Self::Pass => "Pass",
            Self::Break => "Break",
            Self::Continue => "Continue",
            Self::Raise { .. } => "Raise",
            Self::Assert { .. } => "Assert",
            Self::Delete { .. } => "Delete",
            Self::Global { .. } => "Global",
            Self::Nonlocal { .. } => "Nonlocal",
            Self::If { .. } => "If",
            Self::While { .. } => "While",
            Self::For { .. } => "For",
            Self::With { .. } => "With",
            Self::WithItem { .. } => "WithItem",
            Self::Try { .. } => "Try",
            Self::ExceptHandler { .. } => "ExceptHandler",
            Self::Import { .. } => "Import",
            Self::ImportAs { .. } => "ImportAs",
            Self::ImportFrom { .. } => "ImportFrom",
            Self::ImportFromAs { .. } => "ImportFromAs",
            Self::Name { .. } => "Name",
            Self::Call { .. } => "Call",
            Self::Argument { .. } => "Argument",
            Self::MemberAccess { .. } => "MemberAccess",
            Self::Index { .. } => "Index",
            Self::Slice { .. } => "Slice",
            Self::Number { .. } => "Number",
            Self::StringList { .. } => "StringList",
            Self::Str { .. } => "String",
            Self::FormatString { .. } => "FormatString",
            Self::Constant { .. } => "Constant",
            Self::Tuple { .. } => "Tuple",
            Self::List { .. } => "List",
            Self::Set { .. } => "Set",
            Self::Dictionary { .. } => "Dictionary",
            Self::DictionaryEntry { .. } => "DictionaryEntry",
            Self::DictionaryExpand { .. } => "DictionaryExpand",
            Self::BinaryOperation { .. } => "BinaryOperation",
            Self::UnaryOperation { .. } => "UnaryOperation",
            Self::Ternary { .. } => "Ternary",
            Self::Comprehension { .. } => "Comprehension",
            Self::ComprehensionFor { .. } => "ComprehensionFor",
            Self::ComprehensionIf { .. } => "ComprehensionIf",
            Self::Await { .. } => "Await",
            Self::Yield { .. } => "Yield",
            Self::Unpack { .. } => "Unpack",
            Self::AssignmentExpression { .. } => "AssignmentExpression",
            Self::Unknown { .. } => "Unknown",
        }
    }

    /// Child nodes in source order
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self {
            Self::Module { body } => out.extend(body),
            Self::Function {
                name,
                parameters,
                returns,
                body,
                decorators,
                ..
            } => {
                out.extend(decorators);
                out.push(*name);
                out.extend(parameters);
                out.extend(returns);
                out.extend(body);
            }
            Self::Class {
                name,
                arguments,
                body,
                decorators,
            } => {
                out.extend(decorators);
                out.push(*name);
                out.extend(arguments);
                out.extend(body);
            }
            Self::Parameter {
                name,
                annotation,
                default,
                ..
            } => {
                out.extend(name);
                out.extend(annotation);
                out.extend(default);
            }
            Self::Lambda { parameters, body } => {
                out.extend(parameters);
                out.push(*body);
            }
            Self::Assignment {
                target,
                annotation,
                value,
            } => {
                out.push(*target);
                out.extend(annotation);
                out.extend(value);
            }
            Self::AugmentedAssignment { target, value, .. } => {
                out.push(*target);
                out.push(*value);
            }
            Self::ExpressionStatement { expression } => out.push(*expression),
            Self::Return { value } => out.extend(value),
            Self::Pass | Self::Break | Self::Continue => {}
            Self::Raise { exception, cause } => {
                out.extend(exception);
                out.extend(cause);
            }
            Self::Assert { test, message } => {
                out.push(*test);
                out.extend(message);
            }
            Self::Delete { targets } => out.extend(targets),
            Self::Global { names } | Self::Nonlocal { names } => out.extend(names),
            Self::If { test, body, orelse } | Self::While { test, body, orelse } => {
                out.push(*test);
                out.extend(body);
                out.extend(orelse);
            }
            Self::For {
                target,
                iterable,
                body,
                orelse,
                ..
            } => {
                out.push(*target);
                out.push(*iterable);
                out.extend(body);
                out.extend(orelse);
            }
            Self::With { items, body } => {
                out.extend(items);
                out.extend(body);
            }
            Self::WithItem { expression, target } => {
                out.push(*expression);
                out.extend(target);
            }
            Self::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                out.extend(body);
                out.extend(handlers);
                out.extend(orelse);
                out.extend(finally);
            }
            Self::ExceptHandler {
                type_expression,
                name,
                body,
            } => {
                out.extend(type_expression);
                out.extend(name);
                out.extend(body);
            }
            Self::Import { names } | Self::ImportFrom { names, .. } => out.extend(names),
            Self::ImportAs { alias, .. } | Self::ImportFromAs { alias, .. } => out.extend(alias),
            Self::Name { .. } | Self::Number { .. } | Self::Str { .. } | Self::Constant { .. } => {}
            Self::Call { callee, arguments } => {
                out.push(*callee);
                out.extend(arguments);
            }
            Self::Argument { name, value, .. } => {
                out.extend(name);
                out.push(*value);
            }
            Self::MemberAccess { object, member } => {
                out.push(*object);
                out.push(*member);
            }
            Self::Index { object, items } => {
                out.push(*object);
                out.extend(items);
            }
            Self::Slice { lower, upper, step } => {
                out.extend(lower);
                out.extend(upper);
                out.extend(step);
            }
            Self::StringList { strings } => out.extend(strings),
            Self::FormatString { pieces } => {
                for piece in pieces {
                    if let FormatPiece::Field { expression, .. } = piece {
                        out.push(*expression);
                    }
                }
            }
            Self::Tuple { items } | Self::List { items } | Self::Set { items } => {
                out.extend(items)
            }
            Self::Dictionary { entries } => out.extend(entries),
            Self::DictionaryEntry { key, value } => {
                out.push(*key);
                out.push(*value);
            }
            Self::DictionaryExpand { value }
            | Self::Await { value }
            | Self::Unpack { value } => out.push(*value),
            Self::BinaryOperation { left, right, .. } => {
                out.push(*left);
                out.push(*right);
            }
            Self::UnaryOperation { operand, .. } => out.push(*operand),
            Self::Ternary {
                test,
                if_true,
                if_false,
            } => {
                out.push(*if_true);
                out.push(*test);
                out.push(*if_false);
            }
            Self::Comprehension {
                element, clauses, ..
            } => {
                out.push(*element);
                out.extend(clauses);
            }
            Self::ComprehensionFor {
                target, iterable, ..
            } => {
                out.push(*target);
                out.push(*iterable);
            }
            Self::ComprehensionIf { test } => out.push(*test),
            Self::Yield { value, .. } => out.extend(value),
            Self::AssignmentExpression { target, value } => {
                out.push(*target);
                out.push(*value);
            }
            Self::Unknown { children, .. } => out.extend(children),
        }
        out
    }

    /// Whether the node opens a new Python scope
    pub fn is_scope_owner(&self) -> bool {
        matches!(
            self,
            Self::Module { .. }
                | Self::Function { .. }
                | Self::Class { .. }
                | Self::Lambda { .. }
                | Self::Comprehension { .. }
        )
    }
}

/// A node in the arena
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub span: Span,
    pub kind: NodeKind,
}

/// Outcome of visiting one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    SkipChildren,
}

/// One parsed source file
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    path: PathBuf,
    source: String,
    base: u32,
    nodes: Vec<Node>,
}

impl Module {
    /// Start an empty module whose ids begin at `base`
    pub fn builder(name: impl Into<String>, path: impl Into<PathBuf>, source: impl Into<String>, base: u32) -> ModuleBuilder {
        ModuleBuilder {
            module: Module {
                name: name.into(),
                path: path.into(),
                source: source.into(),
                base,
                nodes: Vec::new(),
            },
        }
    }

    /// Dotted module name (`pkg.sub`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The module node; always the first node allocated
    pub fn root(&self) -> NodeId {
        NodeId(self.base)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the module is a package (`pkg/__init__.py`)
    pub fn is_package(&self) -> bool {
        self.path.file_stem().is_some_and(|stem| stem == "__init__")
    }

    /// Absolute dotted name of an import spec seen in this module
    ///
    /// `spec` keeps the leading dots of relative imports (`..pkg.mod`). Returns
    /// `None` when a relative import climbs above the top-level package.
    pub fn absolute_import(&self, spec: &str) -> Option<String> {
        let level = spec.chars().take_while(|c| *c == '.').count();
        if level == 0 {
            return Some(spec.to_string());
        }

        let mut package: Vec<&str> = self.name.split('.').collect();
        if !self.is_package() {
            package.pop();
        }
        for _ in 1..level {
            package.pop()?;
        }

        let rest = &spec[level..];
        if !rest.is_empty() {
            package.extend(rest.split('.'));
        }
        if package.is_empty() {
            return None;
        }
        Some(package.join("."))
    }

    fn contains(&self, id: NodeId) -> bool {
        id.0 >= self.base && ((id.0 - self.base) as usize) < self.nodes.len()
    }
}

/// Incremental construction of a module's node arena
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Reserve a node; its kind is filled in once children exist
    pub fn alloc(&mut self, parent: Option<NodeId>, span: Span) -> NodeId {
        let id = NodeId(self.module.base + self.module.nodes.len() as u32);
        self.module.nodes.push(Node {
            id,
            parent,
            span,
            kind: NodeKind::Pass,
        });
        id
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        let index = (id.0 - self.module.base) as usize;
        self.module.nodes[index].kind = kind;
    }

    pub fn source(&self) -> &str {
        &self.module.source
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

/// All modules loaded for one deduction run
#[derive(Debug, Default, Clone)]
pub struct Program {
    modules: Vec<Module>,
    next_base: u32,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// First id the next inserted module must use
    pub fn next_base(&self) -> u32 {
        self.next_base
    }

    /// Insert a finished module, returning its root node
    pub fn insert(&mut self, module: Module) -> NodeId {
        self.next_base = module.base + module.nodes.len() as u32;
        let root = module.root();
        self.modules.push(module);
        root
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module_by_name(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// The module that owns `id`
    pub fn module_of(&self, id: NodeId) -> &Module {
        let index = self
            .modules
            .partition_point(|m| m.base <= id.0)
            .saturating_sub(1);
        &self.modules[index]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.modules.iter().any(|m| m.contains(id))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        let module = self.module_of(id);
        &module.nodes[(id.0 - module.base) as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Ancestors from the direct parent up to the module node
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |n| self.parent(*n))
    }

    /// Source text covered by the node
    pub fn text(&self, id: NodeId) -> &str {
        let module = self.module_of(id);
        let span = self.node(id).span;
        module.source.get(span.start..span.end).unwrap_or_default()
    }

    pub fn position(&self, id: NodeId) -> Position {
        let module = self.module_of(id);
        let span = self.node(id).span;
        Position {
            path: module.path.clone(),
            line: span.line,
            column: span.column,
        }
    }

    /// Identifier of a `Name` node
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Name { value } => Some(value),
            _ => None,
        }
    }

    /// Pre-order walk rooted at `id`; the callback decides whether to descend
    pub fn visit<E>(
        &self,
        id: NodeId,
        f: &mut impl FnMut(NodeId) -> std::result::Result<Visit, E>,
    ) -> std::result::Result<(), E> {
        if f(id)? == Visit::SkipChildren {
            return Ok(());
        }
        for child in self.kind(id).children() {
            self.visit(child, f)?;
        }
        Ok(())
    }

    /// Every node of the subtree rooted at `id`, in pre-order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let _ = self.visit::<()>(id, &mut |n| {
            out.push(n);
            Ok(Visit::Continue)
        });
        out
    }
}
