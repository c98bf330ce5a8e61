//! Python language adapter
//!
//! Parses Python sources with tree-sitter and lowers the concrete syntax tree
//! into the arena AST of [`crate::ast`].

use crate::ast::{
    ArgumentCategory, ComprehensionKind, Constant, FormatPiece, Module, ModuleBuilder, NodeId,
    NodeKind, Number, Operator, ParameterCategory, Program, Span, UnaryOperator,
};
use crate::{Error, Result};
use std::path::Path;
use tree_sitter::{Node as TsNode, Parser};

/// Python language adapter
pub struct PythonAdapter {
    parser: Parser,
}

impl PythonAdapter {
    /// Create a new Python adapter
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| Error::Parse(format!("Failed to set language: {}", e)))?;
        Ok(Self { parser })
    }

    /// Parse `source` and insert it into `program` as module `name`
    pub fn parse_module(
        &mut self,
        program: &mut Program,
        name: &str,
        path: &Path,
        source: &str,
    ) -> Result<NodeId> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| Error::Parse(format!("Failed to parse {}", path.display())))?;

        let root = tree.root_node();
        if root.has_error() {
            let at = first_error(root).unwrap_or(root);
            return Err(Error::Parse(format!(
                "{}:{}:{}: invalid syntax near `{}`",
                path.display(),
                at.start_position().row + 1,
                at.start_position().column + 1,
                at.utf8_text(source.as_bytes()).unwrap_or_default().lines().next().unwrap_or_default()
            )));
        }

        let mut lowering = Lowering {
            src: source,
            builder: Module::builder(name, path, source, program.next_base()),
        };
        lowering.module(root);
        Ok(program.insert(lowering.builder.finish()))
    }
}

fn first_error(node: TsNode<'_>) -> Option<TsNode<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

fn span_of(ts: TsNode<'_>) -> Span {
    Span {
        start: ts.start_byte(),
        end: ts.end_byte(),
        line: ts.start_position().row as u32 + 1,
        column: ts.start_position().column as u32 + 1,
    }
}

fn named_children(ts: TsNode<'_>) -> Vec<TsNode<'_>> {
    let mut cursor = ts.walk();
    ts.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

fn all_children(ts: TsNode<'_>) -> Vec<TsNode<'_>> {
    let mut cursor = ts.walk();
    ts.children(&mut cursor).collect()
}

fn starts_with_token(ts: TsNode<'_>, token: &str) -> bool {
    ts.child(0).is_some_and(|c| c.kind() == token)
}

struct Lowering<'s> {
    src: &'s str,
    builder: ModuleBuilder,
}

impl<'s> Lowering<'s> {
    fn text(&self, ts: TsNode<'_>) -> &'s str {
        ts.utf8_text(self.src.as_bytes()).unwrap_or_default()
    }

    fn alloc(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        self.builder.alloc(Some(parent), span_of(ts))
    }

    fn module(&mut self, ts: TsNode<'_>) -> NodeId {
        let id = self.builder.alloc(None, span_of(ts));
        let body = self.statements(ts, id);
        self.builder.set_kind(id, NodeKind::Module { body });
        id
    }

    fn statements(&mut self, ts: TsNode<'_>, parent: NodeId) -> Vec<NodeId> {
        named_children(ts)
            .into_iter()
            .map(|c| self.lower(c, parent))
            .collect()
    }

    fn block_field(&mut self, ts: TsNode<'_>, field: &str, parent: NodeId) -> Vec<NodeId> {
        match ts.child_by_field_name(field) {
            Some(block) => self.statements(block, parent),
            None => Vec::new(),
        }
    }

    fn optional(&mut self, ts: Option<TsNode<'_>>, parent: NodeId) -> Option<NodeId> {
        ts.map(|c| self.lower(c, parent))
    }

    fn field(&mut self, ts: TsNode<'_>, field: &str, parent: NodeId) -> Option<NodeId> {
        let child = ts.child_by_field_name(field);
        self.optional(child, parent)
    }

    fn required(&mut self, ts: TsNode<'_>, field: &str, parent: NodeId) -> NodeId {
        match ts.child_by_field_name(field) {
            Some(child) => self.lower(child, parent),
            None => self.empty(ts, parent),
        }
    }

    fn empty(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        self.builder.set_kind(
            id,
            NodeKind::Unknown {
                kind: format!("missing in {}", ts.kind()),
                children: Vec::new(),
            },
        );
        id
    }

    fn name_node(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let value = self.text(ts).to_string();
        self.builder.set_kind(id, NodeKind::Name { value });
        id
    }

    /// Lower any statement or expression
    fn lower(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        match ts.kind() {
            "expression_statement" => self.expression_statement(ts, parent),
            "assignment" => self.assignment(ts, parent),
            "augmented_assignment" => {
                let id = self.alloc(ts, parent);
                let target = self.required(ts, "left", id);
                let operator = ts
                    .child_by_field_name("operator")
                    .and_then(|op| Operator::from_token(self.text(op)))
                    .unwrap_or(Operator::Add);
                let value = self.required(ts, "right", id);
                self.builder.set_kind(
                    id,
                    NodeKind::AugmentedAssignment {
                        target,
                        operator,
                        value,
                    },
                );
                id
            }
            "return_statement" => {
                let id = self.alloc(ts, parent);
                let value = named_children(ts).first().map(|c| self.lower(*c, id));
                self.builder.set_kind(id, NodeKind::Return { value });
                id
            }
            "pass_statement" => self.leaf(ts, parent, NodeKind::Pass),
            "break_statement" => self.leaf(ts, parent, NodeKind::Break),
            "continue_statement" => self.leaf(ts, parent, NodeKind::Continue),
            "raise_statement" => {
                let id = self.alloc(ts, parent);
                let cause = ts.child_by_field_name("cause");
                let exception = named_children(ts)
                    .into_iter()
                    .find(|c| Some(*c) != cause)
                    .map(|c| self.lower(c, id));
                let cause = self.optional(cause, id);
                self.builder
                    .set_kind(id, NodeKind::Raise { exception, cause });
                id
            }
            "assert_statement" => {
                let id = self.alloc(ts, parent);
                let children = named_children(ts);
                let test = match children.first() {
                    Some(c) => self.lower(*c, id),
                    None => self.empty(ts, id),
                };
                let message = children.get(1).map(|c| self.lower(*c, id));
                self.builder.set_kind(id, NodeKind::Assert { test, message });
                id
            }
            "delete_statement" => {
                let id = self.alloc(ts, parent);
                let mut targets = Vec::new();
                for child in named_children(ts) {
                    if child.kind() == "expression_list" {
                        for item in named_children(child) {
                            targets.push(self.lower(item, id));
                        }
                    } else {
                        targets.push(self.lower(child, id));
                    }
                }
                self.builder.set_kind(id, NodeKind::Delete { targets });
                id
            }
            "global_statement" | "nonlocal_statement" => {
                let id = self.alloc(ts, parent);
                let names = named_children(ts)
                    .into_iter()
                    .map(|c| self.name_node(c, id))
                    .collect();
                let kind = if ts.kind() == "global_statement" {
                    NodeKind::Global { names }
                } else {
                    NodeKind::Nonlocal { names }
                };
                self.builder.set_kind(id, kind);
                id
            }
            "if_statement" | "elif_clause" => self.if_statement(ts, parent),
            "while_statement" => {
                let id = self.alloc(ts, parent);
                let test = self.required(ts, "condition", id);
                let body = self.block_field(ts, "body", id);
                let orelse = match ts.child_by_field_name("alternative") {
                    Some(alt) => self.block_field(alt, "body", id),
                    None => Vec::new(),
                };
                self.builder
                    .set_kind(id, NodeKind::While { test, body, orelse });
                id
            }
            "for_statement" => {
                let id = self.alloc(ts, parent);
                let target = self.required(ts, "left", id);
                let iterable = self.required(ts, "right", id);
                let body = self.block_field(ts, "body", id);
                let orelse = match ts.child_by_field_name("alternative") {
                    Some(alt) => self.block_field(alt, "body", id),
                    None => Vec::new(),
                };
                self.builder.set_kind(
                    id,
                    NodeKind::For {
                        target,
                        iterable,
                        body,
                        orelse,
                        is_async: starts_with_token(ts, "async"),
                    },
                );
                id
            }
            "with_statement" => self.with_statement(ts, parent),
            "try_statement" => self.try_statement(ts, parent),
            "function_definition" => self.function(ts, ts, parent, Vec::new()),
            "class_definition" => self.class(ts, ts, parent, Vec::new()),
            "decorated_definition" => self.decorated(ts, parent),
            "import_statement" => {
                let id = self.alloc(ts, parent);
                let mut cursor = ts.walk();
                let items: Vec<_> = ts.children_by_field_name("name", &mut cursor).collect();
                let names = items
                    .into_iter()
                    .map(|item| self.import_as(item, id))
                    .collect();
                self.builder.set_kind(id, NodeKind::Import { names });
                id
            }
            "import_from_statement" | "future_import_statement" => self.import_from(ts, parent),
            "identifier" | "keyword_identifier" => self.name_node(ts, parent),
            "call" => self.call(ts, parent),
            "attribute" => {
                let id = self.alloc(ts, parent);
                let object = self.required(ts, "object", id);
                let member = match ts.child_by_field_name("attribute") {
                    Some(attr) => self.name_node(attr, id),
                    None => self.empty(ts, id),
                };
                self.builder
                    .set_kind(id, NodeKind::MemberAccess { object, member });
                id
            }
            "subscript" => {
                let id = self.alloc(ts, parent);
                let object = self.required(ts, "value", id);
                let mut cursor = ts.walk();
                let subscripts: Vec<_> =
                    ts.children_by_field_name("subscript", &mut cursor).collect();
                let items = subscripts
                    .into_iter()
                    .map(|s| self.lower(s, id))
                    .collect();
                self.builder.set_kind(id, NodeKind::Index { object, items });
                id
            }
            "slice" => self.slice(ts, parent),
            "integer" => {
                let value = parse_integer(self.text(ts));
                self.leaf(ts, parent, NodeKind::Number { value })
            }
            "float" => {
                let text = self.text(ts).replace('_', "");
                match text.parse::<f64>() {
                    Ok(v) => self.leaf(ts, parent, NodeKind::Number { value: Number::Float(v) }),
                    Err(_) => self.unknown(ts, parent),
                }
            }
            "string" => {
                let id = self.alloc(ts, parent);
                let string = self.string(ts, id);
                self.builder.set_kind(
                    id,
                    NodeKind::StringList {
                        strings: vec![string],
                    },
                );
                id
            }
            "concatenated_string" => {
                let id = self.alloc(ts, parent);
                let strings = named_children(ts)
                    .into_iter()
                    .map(|s| self.string(s, id))
                    .collect();
                self.builder.set_kind(id, NodeKind::StringList { strings });
                id
            }
            "true" => self.leaf(ts, parent, NodeKind::Constant { value: Constant::True }),
            "false" => self.leaf(ts, parent, NodeKind::Constant { value: Constant::False }),
            "none" => self.leaf(ts, parent, NodeKind::Constant { value: Constant::None }),
            "ellipsis" => self.leaf(ts, parent, NodeKind::Constant { value: Constant::Ellipsis }),
            "tuple" | "expression_list" | "pattern_list" | "tuple_pattern" => {
                let id = self.alloc(ts, parent);
                let items = self.statements(ts, id);
                self.builder.set_kind(id, NodeKind::Tuple { items });
                id
            }
            "list" | "list_pattern" => {
                let id = self.alloc(ts, parent);
                let items = self.statements(ts, id);
                self.builder.set_kind(id, NodeKind::List { items });
                id
            }
            "set" => {
                let id = self.alloc(ts, parent);
                let items = self.statements(ts, id);
                self.builder.set_kind(id, NodeKind::Set { items });
                id
            }
            "dictionary" => {
                let id = self.alloc(ts, parent);
                let entries = named_children(ts)
                    .into_iter()
                    .map(|entry| self.dictionary_entry(entry, id))
                    .collect();
                self.builder.set_kind(id, NodeKind::Dictionary { entries });
                id
            }
            "pair" => self.dictionary_entry(ts, parent),
            "binary_operator" | "boolean_operator" => {
                let id = self.alloc(ts, parent);
                let left = self.required(ts, "left", id);
                let operator = ts
                    .child_by_field_name("operator")
                    .and_then(|op| Operator::from_token(self.text(op)))
                    .unwrap_or(Operator::Add);
                let right = self.required(ts, "right", id);
                self.builder.set_kind(
                    id,
                    NodeKind::BinaryOperation {
                        left,
                        operator,
                        right,
                    },
                );
                id
            }
            "comparison_operator" => self.comparison(ts, parent),
            "not_operator" => {
                let id = self.alloc(ts, parent);
                let operand = self.required(ts, "argument", id);
                self.builder.set_kind(
                    id,
                    NodeKind::UnaryOperation {
                        operator: UnaryOperator::Not,
                        operand,
                    },
                );
                id
            }
            "unary_operator" => {
                let id = self.alloc(ts, parent);
                let operator = match ts.child_by_field_name("operator").map(|op| self.text(op)) {
                    Some("-") => UnaryOperator::Negate,
                    Some("~") => UnaryOperator::Invert,
                    _ => UnaryOperator::Plus,
                };
                let operand = self.required(ts, "argument", id);
                self.builder
                    .set_kind(id, NodeKind::UnaryOperation { operator, operand });
                id
            }
            "conditional_expression" => {
                let id = self.alloc(ts, parent);
                let parts = named_children(ts);
                if parts.len() != 3 {
                    return self.fill_unknown(ts, id);
                }
                let if_true = self.lower(parts[0], id);
                let test = self.lower(parts[1], id);
                let if_false = self.lower(parts[2], id);
                self.builder.set_kind(
                    id,
                    NodeKind::Ternary {
                        test,
                        if_true,
                        if_false,
                    },
                );
                id
            }
            "lambda" => {
                let id = self.alloc(ts, parent);
                let parameters = match ts.child_by_field_name("parameters") {
                    Some(params) => self.parameters(params, id),
                    None => Vec::new(),
                };
                let body = self.required(ts, "body", id);
                self.builder
                    .set_kind(id, NodeKind::Lambda { parameters, body });
                id
            }
            "list_comprehension" => self.comprehension(ts, parent, ComprehensionKind::List),
            "set_comprehension" => self.comprehension(ts, parent, ComprehensionKind::Set),
            "dictionary_comprehension" => self.comprehension(ts, parent, ComprehensionKind::Dict),
            "generator_expression" => self.comprehension(ts, parent, ComprehensionKind::Generator),
            "parenthesized_expression" | "type" | "as_pattern_target" => {
                match named_children(ts).first() {
                    Some(inner) => self.lower(*inner, parent),
                    None => self.unknown(ts, parent),
                }
            }
            "await" => {
                let id = self.alloc(ts, parent);
                let value = match named_children(ts).first() {
                    Some(c) => self.lower(*c, id),
                    None => self.empty(ts, id),
                };
                self.builder.set_kind(id, NodeKind::Await { value });
                id
            }
            "yield" => {
                let id = self.alloc(ts, parent);
                let from = all_children(ts).iter().any(|c| c.kind() == "from");
                let value = named_children(ts).first().map(|c| self.lower(*c, id));
                self.builder.set_kind(id, NodeKind::Yield { value, from });
                id
            }
            "list_splat" | "list_splat_pattern" => {
                let id = self.alloc(ts, parent);
                let value = match named_children(ts).first() {
                    Some(c) => self.lower(*c, id),
                    None => self.empty(ts, id),
                };
                self.builder.set_kind(id, NodeKind::Unpack { value });
                id
            }
            "named_expression" => {
                let id = self.alloc(ts, parent);
                let target = self.required(ts, "name", id);
                let value = self.required(ts, "value", id);
                self.builder
                    .set_kind(id, NodeKind::AssignmentExpression { target, value });
                id
            }
            "member_type" => {
                let id = self.alloc(ts, parent);
                let parts = named_children(ts);
                if parts.len() != 2 {
                    return self.fill_unknown(ts, id);
                }
                let object = self.lower(parts[0], id);
                let member = self.name_node(parts[1], id);
                self.builder
                    .set_kind(id, NodeKind::MemberAccess { object, member });
                id
            }
            "generic_type" => {
                let id = self.alloc(ts, parent);
                let parts = named_children(ts);
                let Some((head, rest)) = parts.split_first() else {
                    return self.fill_unknown(ts, id);
                };
                let object = self.lower(*head, id);
                let mut items = Vec::new();
                for part in rest {
                    for item in named_children(*part) {
                        items.push(self.lower(item, id));
                    }
                }
                self.builder.set_kind(id, NodeKind::Index { object, items });
                id
            }
            _ => self.unknown(ts, parent),
        }
    }

    fn leaf(&mut self, ts: TsNode<'_>, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.alloc(ts, parent);
        self.builder.set_kind(id, kind);
        id
    }

    fn unknown(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        self.fill_unknown(ts, id)
    }

    fn fill_unknown(&mut self, ts: TsNode<'_>, id: NodeId) -> NodeId {
        let children = self.statements(ts, id);
        self.builder.set_kind(
            id,
            NodeKind::Unknown {
                kind: ts.kind().to_string(),
                children,
            },
        );
        id
    }

    fn expression_statement(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let children = named_children(ts);
        if let [single] = children.as_slice() {
            if matches!(single.kind(), "assignment" | "augmented_assignment") {
                return self.lower(*single, parent);
            }
        }

        let id = self.alloc(ts, parent);
        let expression = match children.as_slice() {
            [single] => self.lower(*single, id),
            _ => {
                let tuple = self.alloc(ts, id);
                let items = children.into_iter().map(|c| self.lower(c, tuple)).collect();
                self.builder.set_kind(tuple, NodeKind::Tuple { items });
                tuple
            }
        };
        self.builder
            .set_kind(id, NodeKind::ExpressionStatement { expression });
        id
    }

    fn assignment(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let target = self.required(ts, "left", id);
        let annotation = self.field(ts, "type", id);
        let value = self.field(ts, "right", id);
        self.builder.set_kind(
            id,
            NodeKind::Assignment {
                target,
                annotation,
                value,
            },
        );
        id
    }

    fn if_statement(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let test = self.required(ts, "condition", id);
        let body = self.block_field(ts, "consequence", id);

        let mut cursor = ts.walk();
        let alternatives: Vec<_> = ts
            .children_by_field_name("alternative", &mut cursor)
            .collect();
        let orelse = self.alternatives(&alternatives, id);
        self.builder.set_kind(id, NodeKind::If { test, body, orelse });
        id
    }

    /// Fold `elif` chains into nested `If` nodes
    fn alternatives(&mut self, alternatives: &[TsNode<'_>], parent: NodeId) -> Vec<NodeId> {
        let Some((first, rest)) = alternatives.split_first() else {
            return Vec::new();
        };
        match first.kind() {
            "elif_clause" => {
                let id = self.alloc(*first, parent);
                let test = self.required(*first, "condition", id);
                let body = self.block_field(*first, "consequence", id);
                let orelse = self.alternatives(rest, id);
                self.builder.set_kind(id, NodeKind::If { test, body, orelse });
                vec![id]
            }
            _ => self.block_field(*first, "body", parent),
        }
    }

    fn with_statement(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let mut items = Vec::new();
        for clause in named_children(ts) {
            if clause.kind() != "with_clause" {
                continue;
            }
            for item in named_children(clause) {
                let item_id = self.alloc(item, id);
                let value = item.child_by_field_name("value").unwrap_or(item);
                let (expression, target) = if value.kind() == "as_pattern" {
                    let parts = named_children(value);
                    let expression = match parts.first() {
                        Some(e) => self.lower(*e, item_id),
                        None => self.empty(value, item_id),
                    };
                    let target = self.field(value, "alias", item_id);
                    (expression, target)
                } else {
                    (self.lower(value, item_id), None)
                };
                self.builder
                    .set_kind(item_id, NodeKind::WithItem { expression, target });
                items.push(item_id);
            }
        }
        let body = self.block_field(ts, "body", id);
        self.builder.set_kind(id, NodeKind::With { items, body });
        id
    }

    fn try_statement(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let body = self.block_field(ts, "body", id);
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finally = Vec::new();

        for clause in named_children(ts) {
            match clause.kind() {
                "except_clause" | "except_group_clause" => {
                    handlers.push(self.except_clause(clause, id));
                }
                "else_clause" => orelse = self.block_field(clause, "body", id),
                "finally_clause" => {
                    finally = named_children(clause)
                        .into_iter()
                        .filter(|c| c.kind() == "block")
                        .flat_map(named_children)
                        .map(|c| self.lower(c, id))
                        .collect();
                }
                _ => {}
            }
        }

        self.builder.set_kind(
            id,
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finally,
            },
        );
        id
    }

    fn except_clause(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let parts = named_children(ts);
        let (block, heads): (Vec<_>, Vec<_>) = parts.into_iter().partition(|c| c.kind() == "block");

        let (type_expression, name) = match heads.as_slice() {
            [pattern] if pattern.kind() == "as_pattern" => {
                let inner = named_children(*pattern);
                let ty = inner.first().map(|c| self.lower(*c, id));
                let alias = self.field(*pattern, "alias", id);
                (ty, alias)
            }
            [ty] => (Some(self.lower(*ty, id)), None),
            [ty, alias, ..] => (Some(self.lower(*ty, id)), Some(self.lower(*alias, id))),
            [] => (None, None),
        };

        let body = block
            .into_iter()
            .flat_map(named_children)
            .map(|c| self.lower(c, id))
            .collect();
        self.builder.set_kind(
            id,
            NodeKind::ExceptHandler {
                type_expression,
                name,
                body,
            },
        );
        id
    }

    fn decorated(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let Some(definition) = ts.child_by_field_name("definition") else {
            return self.unknown(ts, parent);
        };
        let decorators: Vec<_> = named_children(ts)
            .into_iter()
            .filter(|c| c.kind() == "decorator")
            .collect();
        match definition.kind() {
            "class_definition" => self.class(ts, definition, parent, decorators),
            _ => self.function(ts, definition, parent, decorators),
        }
    }

    /// `outer` is the decorated definition when decorators exist, so the
    /// node's text covers them
    fn function(
        &mut self,
        outer: TsNode<'_>,
        ts: TsNode<'_>,
        parent: NodeId,
        decorators: Vec<TsNode<'_>>,
    ) -> NodeId {
        let id = self.alloc(outer, parent);
        let decorators = decorators
            .into_iter()
            .filter_map(|d| named_children(d).first().copied())
            .map(|d| self.lower(d, id))
            .collect();
        let name = match ts.child_by_field_name("name") {
            Some(n) => self.name_node(n, id),
            None => self.empty(ts, id),
        };
        let parameters = match ts.child_by_field_name("parameters") {
            Some(params) => self.parameters(params, id),
            None => Vec::new(),
        };
        let returns = self.field(ts, "return_type", id);
        let body = self.block_field(ts, "body", id);
        self.builder.set_kind(
            id,
            NodeKind::Function {
                name,
                parameters,
                returns,
                body,
                decorators,
                is_async: starts_with_token(ts, "async"),
            },
        );
        id
    }

    fn class(
        &mut self,
        outer: TsNode<'_>,
        ts: TsNode<'_>,
        parent: NodeId,
        decorators: Vec<TsNode<'_>>,
    ) -> NodeId {
        let id = self.alloc(outer, parent);
        let decorators = decorators
            .into_iter()
            .filter_map(|d| named_children(d).first().copied())
            .map(|d| self.lower(d, id))
            .collect();
        let name = match ts.child_by_field_name("name") {
            Some(n) => self.name_node(n, id),
            None => self.empty(ts, id),
        };
        let arguments = match ts.child_by_field_name("superclasses") {
            Some(args) => self.arguments(args, id),
            None => Vec::new(),
        };
        let body = self.block_field(ts, "body", id);
        self.builder.set_kind(
            id,
            NodeKind::Class {
                name,
                arguments,
                body,
                decorators,
            },
        );
        id
    }

    fn parameters(&mut self, ts: TsNode<'_>, parent: NodeId) -> Vec<NodeId> {
        named_children(ts)
            .into_iter()
            .map(|p| self.parameter(p, parent))
            .collect()
    }

    fn parameter(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let (name, category, annotation, default) = match ts.kind() {
            "identifier" => (Some(self.name_node(ts, id)), ParameterCategory::Simple, None, None),
            "typed_parameter" => {
                let head = named_children(ts)
                    .into_iter()
                    .find(|c| Some(*c) != ts.child_by_field_name("type"));
                let (name, category) = match head {
                    Some(h) => self.parameter_head(h, id),
                    None => (None, ParameterCategory::Simple),
                };
                let annotation = self.field(ts, "type", id);
                (name, category, annotation, None)
            }
            "default_parameter" | "typed_default_parameter" => {
                let name = ts.child_by_field_name("name").map(|n| self.name_node(n, id));
                let annotation = self.field(ts, "type", id);
                let default = self.field(ts, "value", id);
                (name, ParameterCategory::Simple, annotation, default)
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                let (name, category) = self.parameter_head(ts, id);
                (name, category, None, None)
            }
            "keyword_separator" => (None, ParameterCategory::KeywordSeparator, None, None),
            "positional_separator" => (None, ParameterCategory::PositionalSeparator, None, None),
            _ => (None, ParameterCategory::Simple, None, None),
        };
        self.builder.set_kind(
            id,
            NodeKind::Parameter {
                name,
                category,
                annotation,
                default,
            },
        );
        id
    }

    fn parameter_head(
        &mut self,
        ts: TsNode<'_>,
        parent: NodeId,
    ) -> (Option<NodeId>, ParameterCategory) {
        match ts.kind() {
            "identifier" => (Some(self.name_node(ts, parent)), ParameterCategory::Simple),
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                let category = if ts.kind() == "list_splat_pattern" {
                    ParameterCategory::VarArgs
                } else {
                    ParameterCategory::KwArgs
                };
                let name = named_children(ts)
                    .first()
                    .map(|n| self.name_node(*n, parent));
                (name, category)
            }
            _ => (None, ParameterCategory::Simple),
        }
    }

    fn import_as(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let (dotted, alias) = if ts.kind() == "aliased_import" {
            let alias = ts.child_by_field_name("alias").map(|a| self.name_node(a, id));
            (ts.child_by_field_name("name"), alias)
        } else {
            (Some(ts), None)
        };
        let module = dotted
            .map(|d| self.text(d).split('.').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        self.builder.set_kind(id, NodeKind::ImportAs { module, alias });
        id
    }

    fn import_from(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let module = if ts.kind() == "future_import_statement" {
            "__future__".to_string()
        } else {
            ts.child_by_field_name("module_name")
                .map(|m| self.text(m).chars().filter(|c| !c.is_whitespace()).collect())
                .unwrap_or_default()
        };
        let wildcard = named_children(ts)
            .iter()
            .any(|c| c.kind() == "wildcard_import");

        let mut cursor = ts.walk();
        let items: Vec<_> = ts.children_by_field_name("name", &mut cursor).collect();
        let names = items
            .into_iter()
            .map(|item| {
                let item_id = self.alloc(item, id);
                let (name, alias) = if item.kind() == "aliased_import" {
                    let name = item
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default();
                    let alias = item
                        .child_by_field_name("alias")
                        .map(|a| self.name_node(a, item_id));
                    (name, alias)
                } else {
                    (self.text(item).to_string(), None)
                };
                self.builder
                    .set_kind(item_id, NodeKind::ImportFromAs { name, alias });
                item_id
            })
            .collect();

        self.builder.set_kind(
            id,
            NodeKind::ImportFrom {
                module,
                names,
                wildcard,
            },
        );
        id
    }

    fn call(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let callee = self.required(ts, "function", id);
        let arguments = match ts.child_by_field_name("arguments") {
            Some(args) if args.kind() == "generator_expression" => {
                let arg = self.alloc(args, id);
                let value = self.lower(args, arg);
                self.builder.set_kind(
                    arg,
                    NodeKind::Argument {
                        name: None,
                        category: ArgumentCategory::Simple,
                        value,
                    },
                );
                vec![arg]
            }
            Some(args) => self.arguments(args, id),
            None => Vec::new(),
        };
        self.builder.set_kind(id, NodeKind::Call { callee, arguments });
        id
    }

    fn arguments(&mut self, ts: TsNode<'_>, parent: NodeId) -> Vec<NodeId> {
        named_children(ts)
            .into_iter()
            .map(|arg| {
                let id = self.alloc(arg, parent);
                let (name, category, value) = match arg.kind() {
                    "keyword_argument" => {
                        let name = arg.child_by_field_name("name").map(|n| self.name_node(n, id));
                        let value = self.required(arg, "value", id);
                        (name, ArgumentCategory::Simple, value)
                    }
                    "list_splat" | "dictionary_splat" => {
                        let category = if arg.kind() == "list_splat" {
                            ArgumentCategory::UnpackedList
                        } else {
                            ArgumentCategory::UnpackedDictionary
                        };
                        let value = match named_children(arg).first() {
                            Some(v) => self.lower(*v, id),
                            None => self.empty(arg, id),
                        };
                        (None, category, value)
                    }
                    _ => (None, ArgumentCategory::Simple, self.lower(arg, id)),
                };
                self.builder.set_kind(
                    id,
                    NodeKind::Argument {
                        name,
                        category,
                        value,
                    },
                );
                id
            })
            .collect()
    }

    fn slice(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let mut parts: [Option<NodeId>; 3] = [None, None, None];
        let mut position = 0;
        for child in all_children(ts) {
            if child.kind() == ":" {
                position += 1;
            } else if child.is_named() && child.kind() != "comment" && position < 3 {
                parts[position] = Some(self.lower(child, id));
            }
        }
        let [lower, upper, step] = parts;
        self.builder
            .set_kind(id, NodeKind::Slice { lower, upper, step });
        id
    }

    fn dictionary_entry(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        match ts.kind() {
            "pair" => {
                let key = self.required(ts, "key", id);
                let value = self.required(ts, "value", id);
                self.builder
                    .set_kind(id, NodeKind::DictionaryEntry { key, value });
            }
            "dictionary_splat" => {
                let value = match named_children(ts).first() {
                    Some(v) => self.lower(*v, id),
                    None => self.empty(ts, id),
                };
                self.builder.set_kind(id, NodeKind::DictionaryExpand { value });
            }
            _ => {
                self.fill_unknown(ts, id);
            }
        }
        id
    }

    /// `a < b < c` folds to `(a < b) < c`; only the operands matter downstream
    fn comparison(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let mut operands = Vec::new();
        let mut operators = Vec::new();
        let mut pending = String::new();
        for child in all_children(ts) {
            if child.is_named() && child.kind() != "comment" {
                if !pending.is_empty() {
                    operators.push(std::mem::take(&mut pending));
                }
                operands.push(child);
            } else if !child.is_extra() {
                if !pending.is_empty() {
                    pending.push(' ');
                }
                pending.push_str(self.text(child));
            }
        }

        let id = self.alloc(ts, parent);
        if operands.len() < 2 || operators.len() + 1 != operands.len() {
            return self.fill_unknown(ts, id);
        }

        let mut left = self.lower(operands[0], id);
        for (index, (operand, token)) in operands[1..].iter().zip(&operators).enumerate() {
            let operator = Operator::from_token(token).unwrap_or(Operator::Equals);
            let right = self.lower(*operand, id);
            if index + 2 == operands.len() {
                self.builder.set_kind(
                    id,
                    NodeKind::BinaryOperation {
                        left,
                        operator,
                        right,
                    },
                );
                return id;
            }
            let nested = self.builder.alloc(Some(id), span_of(ts));
            self.builder.set_kind(
                nested,
                NodeKind::BinaryOperation {
                    left,
                    operator,
                    right,
                },
            );
            left = nested;
        }
        id
    }

    fn comprehension(&mut self, ts: TsNode<'_>, parent: NodeId, kind: ComprehensionKind) -> NodeId {
        let id = self.alloc(ts, parent);
        let element = self.required(ts, "body", id);
        let mut clauses = Vec::new();
        for clause in named_children(ts) {
            match clause.kind() {
                "for_in_clause" => {
                    let clause_id = self.alloc(clause, id);
                    let target = self.required(clause, "left", clause_id);
                    let iterable = self.required(clause, "right", clause_id);
                    self.builder.set_kind(
                        clause_id,
                        NodeKind::ComprehensionFor {
                            target,
                            iterable,
                            is_async: starts_with_token(clause, "async"),
                        },
                    );
                    clauses.push(clause_id);
                }
                "if_clause" => {
                    let clause_id = self.alloc(clause, id);
                    let test = match named_children(clause).first() {
                        Some(t) => self.lower(*t, clause_id),
                        None => self.empty(clause, clause_id),
                    };
                    self.builder
                        .set_kind(clause_id, NodeKind::ComprehensionIf { test });
                    clauses.push(clause_id);
                }
                _ => {}
            }
        }
        self.builder.set_kind(
            id,
            NodeKind::Comprehension {
                kind,
                element,
                clauses,
            },
        );
        id
    }

    /// One literal of a string list: plain or formatted
    fn string(&mut self, ts: TsNode<'_>, parent: NodeId) -> NodeId {
        let id = self.alloc(ts, parent);
        let prefix: String = all_children(ts)
            .first()
            .filter(|c| c.kind() == "string_start")
            .map(|c| {
                self.text(*c)
                    .chars()
                    .take_while(|ch| ch.is_ascii_alphabetic())
                    .collect::<String>()
                    .to_ascii_lowercase()
            })
            .unwrap_or_default();
        let raw = prefix.contains('r');
        let formatted = prefix.contains('f');

        let mut pieces = Vec::new();
        let mut literal = String::new();
        for child in all_children(ts) {
            match child.kind() {
                "string_content" | "escape_sequence" => {
                    let text = self.text(child);
                    let text = if formatted {
                        text.replace("{{", "{").replace("}}", "}")
                    } else {
                        text.to_string()
                    };
                    if raw {
                        literal.push_str(&text);
                    } else {
                        literal.push_str(&unescape(&text));
                    }
                }
                "escape_interpolation" => {
                    literal.push_str(&self.text(child)[..1]);
                }
                "interpolation" => {
                    if !literal.is_empty() {
                        pieces.push(FormatPiece::Literal(std::mem::take(&mut literal)));
                    }
                    let expression = match child
                        .child_by_field_name("expression")
                        .or_else(|| named_children(child).first().copied())
                    {
                        Some(e) => self.lower(e, id),
                        None => self.empty(child, id),
                    };
                    let conversion = child
                        .child_by_field_name("type_conversion")
                        .and_then(|c| self.text(c).chars().last());
                    let spec = child
                        .child_by_field_name("format_specifier")
                        .map(|s| self.text(s).trim_start_matches(':').to_string());
                    pieces.push(FormatPiece::Field {
                        expression,
                        conversion,
                        spec,
                    });
                }
                _ => {}
            }
        }

        if formatted {
            if !literal.is_empty() {
                pieces.push(FormatPiece::Literal(literal));
            }
            self.builder.set_kind(id, NodeKind::FormatString { pieces });
        } else {
            self.builder.set_kind(id, NodeKind::Str { value: literal });
        }
        id
    }
}

fn parse_integer(text: &str) -> Number {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .trim_end_matches(['l', 'L'])
        .to_ascii_lowercase();
    let parsed = if let Some(hex) = cleaned.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else if let Some(oct) = cleaned.strip_prefix("0o") {
        i64::from_str_radix(oct, 8)
    } else if let Some(bin) = cleaned.strip_prefix("0b") {
        i64::from_str_radix(bin, 2)
    } else {
        cleaned.parse::<i64>()
    };
    match parsed {
        Ok(v) => Number::Int(v),
        Err(_) => Number::Float(cleaned.parse::<f64>().unwrap_or(f64::NAN)),
    }
}

/// Decode the escape sequences of a non-raw Python string literal
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0b}'),
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&digits);
                    }
                }
            }
            '0'..='7' => {
                let mut digits = next.to_string();
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&digits, 8).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => out.push_str(&digits),
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(source: &str) -> (Program, NodeId) {
        let mut program = Program::new();
        let mut adapter = PythonAdapter::new().unwrap();
        let root = adapter
            .parse_module(&mut program, "main", &PathBuf::from("main.py"), source)
            .unwrap();
        (program, root)
    }

    fn body(program: &Program, root: NodeId) -> Vec<NodeId> {
        match program.kind(root) {
            NodeKind::Module { body } => body.clone(),
            other => panic!("expected module, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_assignment() {
        let (program, root) = parse("x = 1\n");
        let stmts = body(&program, root);
        assert_eq!(stmts.len(), 1);
        let NodeKind::Assignment { target, value, .. } = program.kind(stmts[0]) else {
            panic!("expected assignment");
        };
        assert_eq!(program.name_of(*target), Some("x"));
        assert_eq!(program.parent(*target), Some(stmts[0]));
        let value = value.unwrap();
        assert!(matches!(
            program.kind(value),
            NodeKind::Number { value: Number::Int(1) }
        ));
    }

    #[test]
    fn test_tuple_assignment_target() {
        let (program, root) = parse("a, b = 1, 2\n");
        let stmts = body(&program, root);
        let NodeKind::Assignment { target, .. } = program.kind(stmts[0]) else {
            panic!("expected assignment");
        };
        let NodeKind::Tuple { items } = program.kind(*target) else {
            panic!("expected tuple target");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(program.parent(items[0]), Some(*target));
    }

    #[test]
    fn test_function_with_parameters() {
        let (program, root) = parse("def f(a, b: int = 2, *args, **kw):\n    return a\n");
        let stmts = body(&program, root);
        let NodeKind::Function { name, parameters, body, .. } = program.kind(stmts[0]) else {
            panic!("expected function");
        };
        assert_eq!(program.name_of(*name), Some("f"));
        assert_eq!(parameters.len(), 4);
        let NodeKind::Parameter { default, annotation, .. } = program.kind(parameters[1]) else {
            panic!("expected parameter");
        };
        assert!(default.is_some());
        assert!(annotation.is_some());
        let NodeKind::Parameter { category, .. } = program.kind(parameters[3]) else {
            panic!("expected parameter");
        };
        assert_eq!(*category, ParameterCategory::KwArgs);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_call_arguments() {
        let (program, root) = parse("f(1, name=\"q\")\n");
        let stmts = body(&program, root);
        let NodeKind::ExpressionStatement { expression } = program.kind(stmts[0]) else {
            panic!("expected expression statement");
        };
        let NodeKind::Call { arguments, .. } = program.kind(*expression) else {
            panic!("expected call");
        };
        assert_eq!(arguments.len(), 2);
        let NodeKind::Argument { name, .. } = program.kind(arguments[1]) else {
            panic!("expected argument");
        };
        assert_eq!(program.name_of(name.unwrap()), Some("name"));
    }

    #[test]
    fn test_strings() {
        let (program, root) = parse("s = 'a\\n' \"b\"\nt = f\"x{y}z{{\"\n");
        let stmts = body(&program, root);

        let NodeKind::Assignment { value: Some(value), .. } = program.kind(stmts[0]) else {
            panic!("expected assignment");
        };
        let NodeKind::StringList { strings } = program.kind(*value) else {
            panic!("expected string list");
        };
        assert_eq!(strings.len(), 2);
        assert_eq!(program.kind(strings[0]), &NodeKind::Str { value: "a\n".into() });

        let NodeKind::Assignment { value: Some(value), .. } = program.kind(stmts[1]) else {
            panic!("expected assignment");
        };
        let NodeKind::StringList { strings } = program.kind(*value) else {
            panic!("expected string list");
        };
        let NodeKind::FormatString { pieces } = program.kind(strings[0]) else {
            panic!("expected f-string");
        };
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], FormatPiece::Literal("x".into()));
        assert_eq!(pieces[2], FormatPiece::Literal("z{".into()));
    }

    #[test]
    fn test_imports() {
        let (program, root) = parse("import os.path as p\nfrom .pkg import A, B as C\n");
        let stmts = body(&program, root);
        let NodeKind::Import { names } = program.kind(stmts[0]) else {
            panic!("expected import");
        };
        let NodeKind::ImportAs { module, alias } = program.kind(names[0]) else {
            panic!("expected import-as");
        };
        assert_eq!(module, &vec!["os".to_string(), "path".to_string()]);
        assert_eq!(program.name_of(alias.unwrap()), Some("p"));

        let NodeKind::ImportFrom { module, names, .. } = program.kind(stmts[1]) else {
            panic!("expected import-from");
        };
        assert_eq!(module, ".pkg");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_decorated_class_text_includes_decorator() {
        let (program, root) = parse("@dataclass\nclass C:\n    a: int = 1\n");
        let stmts = body(&program, root);
        assert!(program.text(stmts[0]).starts_with("@dataclass"));
        let NodeKind::Class { decorators, body, .. } = program.kind(stmts[0]) else {
            panic!("expected class");
        };
        assert_eq!(decorators.len(), 1);
        assert!(matches!(
            program.kind(body[0]),
            NodeKind::Assignment { annotation: Some(_), .. }
        ));
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let mut program = Program::new();
        let mut adapter = PythonAdapter::new().unwrap();
        let err = adapter
            .parse_module(&mut program, "main", &PathBuf::from("main.py"), "def (:\n")
            .unwrap_err();
        assert!(matches!(err, Error::Parse(msg) if msg.starts_with("main.py:1:")));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\tb"), "a\tb");
        assert_eq!(unescape("\\x41\\u0042"), "AB");
        assert_eq!(unescape("\\q"), "\\q");
        assert_eq!(parse_integer("0x1F"), Number::Int(31));
        assert_eq!(parse_integer("1_000"), Number::Int(1000));
    }
}
