//! Builds evaluation trees from expressions
//!
//! Names are followed to their last declaration: parameters become
//! placeholders, variables are replaced by the expression they were assigned.

use super::tree::{FormatPart, TreeFlags, TreeKind, TreeNode};
use crate::ast::{ArgumentCategory, Constant, FormatPiece, NodeKind, Number, UnaryOperator};
use crate::oracle::{Oracle, Type};
use crate::scope::Declaration;
use crate::{Error, NodeId, Result};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::trace;

pub struct TreeBuilder<'o> {
    oracle: &'o dyn Oracle,
    memo: RefCell<HashMap<NodeId, Rc<TreeNode>>>,
    in_progress: RefCell<HashSet<NodeId>>,
}

impl<'o> TreeBuilder<'o> {
    pub fn new(oracle: &'o dyn Oracle) -> Self {
        Self {
            oracle,
            memo: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    pub fn oracle(&self) -> &'o dyn Oracle {
        self.oracle
    }

    /// Tree for `node`, built once per node
    pub fn build(&self, node: NodeId) -> Result<Rc<TreeNode>> {
        if let Some(tree) = self.memo.borrow().get(&node) {
            return Ok(tree.clone());
        }
        if !self.in_progress.borrow_mut().insert(node) {
            return Err(Error::cycle(self.oracle.position(node), self.oracle.text(node)));
        }

        let built = self.create(node);
        self.in_progress.borrow_mut().remove(&node);
        let tree = built?;

        trace!("built {} tree for {}", tree.kind.name(), node);
        self.memo.borrow_mut().insert(node, tree.clone());
        Ok(tree)
    }

    fn create(&self, node: NodeId) -> Result<Rc<TreeNode>> {
        let oracle = self.oracle;
        let kind = oracle.kind(node);
        let tree = match kind {
            NodeKind::Name { .. } => return self.create_for_name(node),
            NodeKind::Index { object, items } => return self.create_for_index(node, *object, items),
            NodeKind::Call { callee, arguments } => {
                return self.create_for_call(node, *callee, arguments);
            }
            NodeKind::Constant { value } => {
                if *value == Constant::Ellipsis {
                    return Err(Error::unsupported(
                        oracle.position(node),
                        "Only support the constant node with the value 'None', 'True' or 'False'.",
                    ));
                }
                TreeNode::new(node, TreeKind::Constant { value: *value })
            }
            NodeKind::Number { value } => TreeNode::new(node, TreeKind::Number { value: *value }),
            NodeKind::UnaryOperation {
                operator: UnaryOperator::Negate,
                operand,
            } => return self.create_for_negative(node, *operand),
            NodeKind::Tuple { items } => TreeNode::new(
                node,
                TreeKind::Tuple {
                    items: self.build_all(items)?,
                },
            ),
            NodeKind::Dictionary { entries } => {
                let mut pairs = Vec::with_capacity(entries.len());
                for entry in entries {
                    let NodeKind::DictionaryEntry { key, value } = oracle.kind(*entry) else {
                        return Err(Error::unsupported(
                            oracle.position(*entry),
                            "We only support the dictionary key-value pair in the dictionary \
                             construction expression.",
                        ));
                    };
                    pairs.push((self.build(*key)?, self.build(*value)?));
                }
                TreeNode::new(node, TreeKind::Dictionary { entries: pairs })
            }
            NodeKind::BinaryOperation {
                left,
                operator,
                right,
            } => TreeNode::new(
                node,
                TreeKind::BinaryOperation {
                    left: self.build(*left)?,
                    operator: *operator,
                    right: self.build(*right)?,
                },
            ),
            NodeKind::StringList { strings } => TreeNode::new(
                node,
                TreeKind::StringList {
                    strings: self.build_all(strings)?,
                },
            ),
            NodeKind::Str { value } => TreeNode::new(node, TreeKind::Str { value: value.clone() }),
            NodeKind::FormatString { pieces } => {
                let mut parts = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    match piece {
                        FormatPiece::Literal(text) => parts.push(FormatPart::Literal(text.clone())),
                        FormatPiece::Field {
                            expression,
                            conversion: None,
                            spec: None,
                        } => parts.push(FormatPart::Field(self.build(*expression)?)),
                        FormatPiece::Field { .. } => {
                            return Err(Error::unsupported(
                                oracle.position(node),
                                "Format string with format expressions is not supported yet.",
                            ));
                        }
                    }
                }
                TreeNode::new(node, TreeKind::FormatString { parts })
            }
            other => {
                return Err(Error::unsupported(
                    oracle.position(node),
                    format!(
                        "The creation of node type '{}' is not implemented yet. If you need this \
                         feature, please submit an issue.",
                        other.name()
                    ),
                ));
            }
        };
        Ok(tree)
    }

    fn build_all(&self, nodes: &[NodeId]) -> Result<Vec<Rc<TreeNode>>> {
        nodes.iter().map(|n| self.build(*n)).collect()
    }

    fn create_for_name(&self, node: NodeId) -> Result<Rc<TreeNode>> {
        let oracle = self.oracle;
        let text = oracle.text(node);
        let declaration = oracle
            .lookup_symbol(node)
            .and_then(|lookup| lookup.declarations.last().copied())
            .ok_or_else(|| {
                Error::oracle(
                    oracle.position(node),
                    format!("No declaration found for name node: {}", text),
                )
            })?;

        match declaration {
            Declaration::Parameter { node: parameter } => {
                if let Some(tree) = self.memo.borrow().get(&parameter) {
                    return Ok(tree.clone());
                }
                let NodeKind::Parameter { default, .. } = oracle.kind(parameter) else {
                    return Err(Error::oracle(
                        oracle.position(parameter),
                        "The parameter declaration is not a parameter node.",
                    ));
                };
                let default = default.map(|d| self.build(d)).transpose()?;
                let tree = TreeNode::with_flags(
                    parameter,
                    TreeFlags::PLACEHOLDER,
                    TreeKind::Parameter { default },
                );
                self.memo.borrow_mut().insert(parameter, tree.clone());
                Ok(tree)
            }
            Declaration::Variable { node: target } => {
                let parent = oracle.program().parent(target);
                match parent.map(|p| oracle.kind(p)) {
                    Some(NodeKind::Assignment {
                        target: t,
                        value: Some(value),
                        ..
                    }) if *t == target => self.build(*value),
                    _ => Err(Error::unsupported(
                        oracle.position(node),
                        format!(
                            "Variable '{}' must be assigned a value directly. We only support the \
                             simplest assignment statement, the tuple assignment or other \
                             statements are not supported yet.",
                            text
                        ),
                    )),
                }
            }
            _ => Err(Error::unsupported(
                oracle.position(node),
                format!(
                    "Variable '{}' must be assigned a value directly. Functions, classes and \
                     imported names cannot be evaluated.",
                    text
                ),
            )),
        }
    }

    fn create_for_index(&self, node: NodeId, object: NodeId, items: &[NodeId]) -> Result<Rc<TreeNode>> {
        let oracle = self.oracle;
        if !oracle.type_of(object).is_module_member("os", "environ") {
            return Err(Error::unsupported(
                oracle.position(node),
                "Only support environment variable access using index node",
            ));
        }
        if items.len() != 1 {
            return Err(Error::unsupported(
                oracle.position(node),
                "The index of the 'os.environ' access should have only one item.",
            ));
        }
        Ok(TreeNode::with_flags(
            node,
            TreeFlags::ACCESS_ENV_VAR,
            TreeKind::Index {
                items: vec![self.build(items[0])?],
            },
        ))
    }

    fn create_for_call(&self, node: NodeId, callee: NodeId, arguments: &[NodeId]) -> Result<Rc<TreeNode>> {
        let oracle = self.oracle;
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for argument in arguments {
            let NodeKind::Argument {
                name,
                category: ArgumentCategory::Simple,
                value,
            } = oracle.kind(*argument)
            else {
                return Err(Error::unsupported(
                    oracle.position(*argument),
                    "Unpacked arguments are not supported in evaluated calls.",
                ));
            };
            let tree = self.build(*value)?;
            match name.and_then(|n| oracle.program().name_of(n)) {
                Some(name) => keywords.push((name.to_string(), tree)),
                None => positional.push(tree),
            }
        }

        let callee_type = oracle.type_of(callee);
        if callee_type.is_module_member("os", "environ.get") || callee_type.is_module_member("os", "getenv") {
            let mut values = positional.into_iter();
            let key = values
                .next()
                .or_else(|| take_keyword(&mut keywords, "key"))
                .ok_or_else(|| {
                    Error::unsupported(
                        oracle.position(node),
                        "The environment variable access must name the variable.",
                    )
                })?;
            let default = values.next().or_else(|| take_keyword(&mut keywords, "default"));
            return Ok(TreeNode::with_flags(
                node,
                TreeFlags::ACCESS_ENV_VAR,
                TreeKind::EnvCall { key, default },
            ));
        }

        if let Type::Class(class) = &callee_type {
            if oracle.is_dataclass(class) {
                return Ok(TreeNode::new(
                    node,
                    TreeKind::DataClass {
                        class: class.clone(),
                        positional,
                        keywords,
                    },
                ));
            }
        }

        Err(Error::unsupported(
            oracle.position(node),
            "Only support environment variable access and data class.",
        ))
    }

    /// `-5` folds to a negative number literal
    fn create_for_negative(&self, node: NodeId, operand: NodeId) -> Result<Rc<TreeNode>> {
        let oracle = self.oracle;
        let negated = match oracle.kind(operand) {
            NodeKind::Number { value: Number::Int(i) } => i.checked_neg().map(Number::Int),
            NodeKind::Number {
                value: Number::Float(f),
            } => Some(Number::Float(-f)),
            _ => {
                return Err(Error::unsupported(
                    oracle.position(node),
                    "Only support negative number literals in unary operation.",
                ));
            }
        };
        let value = negated.ok_or_else(|| {
            Error::unsupported(oracle.position(node), "The integer literal is out of range.")
        })?;
        Ok(TreeNode::new(node, TreeKind::Number { value }))
    }
}

fn take_keyword(keywords: &mut Vec<(String, Rc<TreeNode>)>, name: &str) -> Option<Rc<TreeNode>> {
    let index = keywords.iter().position(|(k, _)| k == name)?;
    Some(keywords.remove(index).1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn tree_for(source: &str, text: &str) -> Result<Rc<TreeNode>> {
        let oracle = testing::load(source);
        let node = testing::node_with_text(&oracle, text);
        TreeBuilder::new(&oracle).build(node)
    }

    #[test]
    fn test_variable_follows_assignment() {
        let oracle = testing::load("base = \"v1\"\nname = base + \"-api\"\nprint(name)\n");
        let builder = TreeBuilder::new(&oracle);
        let name = testing::find_nodes(&oracle, |k| matches!(k, NodeKind::Name { value } if value == "name"))
            .into_iter()
            .last()
            .unwrap();
        let tree = builder.build(name).unwrap();
        assert!(matches!(tree.kind, TreeKind::BinaryOperation { .. }));
        // memoized: the same Rc comes back
        assert!(Rc::ptr_eq(&tree, &builder.build(name).unwrap()));
    }

    #[test]
    fn test_parameter_placeholder_with_default() {
        let oracle = testing::load("def f(region=\"us\"):\n    return region\n");
        let builder = TreeBuilder::new(&oracle);
        let usage = testing::node_with_text(&oracle, "return region");
        let NodeKind::Return { value: Some(name) } = oracle.kind(usage) else {
            panic!("expected return");
        };
        let tree = builder.build(*name).unwrap();
        assert!(tree.flags.contains(TreeFlags::PLACEHOLDER));
        assert!(matches!(oracle.kind(tree.node), NodeKind::Parameter { .. }));
        let TreeKind::Parameter { default: Some(default) } = &tree.kind else {
            panic!("expected default");
        };
        assert!(matches!(default.kind, TreeKind::StringList { .. }));
    }

    #[test]
    fn test_env_reads() {
        let source = "import os\na = os.environ[\"A\"]\nb = os.environ.get(\"B\", \"x\")\nc = os.getenv(\"C\")\n";
        let index = tree_for(source, "os.environ[\"A\"]").unwrap();
        assert!(index.flags.contains(TreeFlags::ACCESS_ENV_VAR));
        assert!(matches!(index.kind, TreeKind::Index { .. }));

        let get = tree_for(source, "os.environ.get(\"B\", \"x\")").unwrap();
        assert!(matches!(get.kind, TreeKind::EnvCall { default: Some(_), .. }));

        let getenv = tree_for(source, "os.getenv(\"C\")").unwrap();
        assert!(matches!(getenv.kind, TreeKind::EnvCall { default: None, .. }));
    }

    #[test]
    fn test_rejected_shapes() {
        let err = tree_for("import os\nx = os.environ[\"A\", \"B\"]\n", "os.environ[\"A\", \"B\"]").unwrap_err();
        assert!(err.to_string().contains("only one item"));

        let err = tree_for("items = {}\nx = items[\"A\"]\n", "items[\"A\"]").unwrap_err();
        assert!(err.to_string().contains("using index node"));

        let err = tree_for("x = [1, 2]\n", "[1, 2]").unwrap_err();
        assert!(err.to_string().contains("node type 'List' is not implemented"));

        let err = tree_for("d = {**other}\n", "{**other}").unwrap_err();
        assert!(err.to_string().contains("key-value pair"));

        let err = tree_for("n = 1\ns = f\"{n!r}\"\n", "f\"{n!r}\"").unwrap_err();
        assert!(err.to_string().contains("format expressions"));
    }

    #[test]
    fn test_tuple_assignment_rejected() {
        let oracle = testing::load("a, b = 1, 2\nprint(a)\n");
        let name = testing::find_nodes(&oracle, |k| matches!(k, NodeKind::Name { value } if value == "a"))
            .into_iter()
            .last()
            .unwrap();
        let err = TreeBuilder::new(&oracle).build(name).unwrap_err();
        assert!(err.to_string().contains("must be assigned a value directly"));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let oracle = testing::load("x = x + 1\n");
        let name = testing::find_nodes(&oracle, |k| matches!(k, NodeKind::Name { value } if value == "x"))
            .into_iter()
            .last()
            .unwrap();
        let err = TreeBuilder::new(&oracle).build(name).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn test_negative_number_folds() {
        let tree = tree_for("x = -3\n", "-3").unwrap();
        assert!(matches!(tree.kind, TreeKind::Number { value: Number::Int(-3) }));
    }
}
