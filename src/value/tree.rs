//! Evaluation tree
//!
//! One tree node per expression the evaluator understands. Trees are shared
//! (`Rc`) because a variable referenced twice builds only once.

use crate::ast::{Constant, Number, Operator};
use crate::oracle::ClassRef;
use crate::NodeId;
use std::fmt;
use std::rc::Rc;

/// Tree node flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeFlags(u8);

impl TreeFlags {
    pub const NONE: Self = Self(0);
    /// A value supplied by the caller: a function parameter
    pub const PLACEHOLDER: Self = Self(1);
    /// A read of an environment variable
    pub const ACCESS_ENV_VAR: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for TreeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One piece of a format string
#[derive(Debug, Clone)]
pub enum FormatPart {
    Literal(String),
    Field(Rc<TreeNode>),
}

#[derive(Debug, Clone)]
pub enum TreeKind {
    /// `default` is the parameter's default value, when declared
    Parameter {
        default: Option<Rc<TreeNode>>,
    },
    /// `os.environ[key]`
    Index {
        items: Vec<Rc<TreeNode>>,
    },
    /// `os.environ.get(key[, default])` / `os.getenv(key[, default])`
    EnvCall {
        key: Rc<TreeNode>,
        default: Option<Rc<TreeNode>>,
    },
    /// Construction of a data class
    DataClass {
        class: ClassRef,
        positional: Vec<Rc<TreeNode>>,
        keywords: Vec<(String, Rc<TreeNode>)>,
    },
    Tuple {
        items: Vec<Rc<TreeNode>>,
    },
    Dictionary {
        entries: Vec<(Rc<TreeNode>, Rc<TreeNode>)>,
    },
    BinaryOperation {
        left: Rc<TreeNode>,
        operator: Operator,
        right: Rc<TreeNode>,
    },
    StringList {
        strings: Vec<Rc<TreeNode>>,
    },
    Str {
        value: String,
    },
    FormatString {
        parts: Vec<FormatPart>,
    },
    Number {
        value: Number,
    },
    Constant {
        value: Constant,
    },
}

impl TreeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parameter { .. } => "Parameter",
            Self::Index { .. } => "Index",
            Self::EnvCall { .. } | Self::DataClass { .. } => "Call",
            Self::Tuple { .. } => "Tuple",
            Self::Dictionary { .. } => "Dictionary",
            Self::BinaryOperation { .. } => "BinaryOperation",
            Self::StringList { .. } => "StringList",
            Self::Str { .. } => "String",
            Self::FormatString { .. } => "FormatString",
            Self::Number { .. } => "Number",
            Self::Constant { .. } => "Constant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The expression, or the `Parameter` node for placeholders
    pub node: NodeId,
    pub flags: TreeFlags,
    pub kind: TreeKind,
}

impl TreeNode {
    pub fn new(node: NodeId, kind: TreeKind) -> Rc<Self> {
        Rc::new(Self {
            node,
            flags: TreeFlags::NONE,
            kind,
        })
    }

    pub fn with_flags(node: NodeId, flags: TreeFlags, kind: TreeKind) -> Rc<Self> {
        Rc::new(Self { node, flags, kind })
    }

    /// Direct sub-trees in evaluation order
    pub fn children(&self) -> Vec<Rc<TreeNode>> {
        match &self.kind {
            TreeKind::Parameter { default } => default.iter().cloned().collect(),
            TreeKind::Index { items } | TreeKind::Tuple { items } => items.clone(),
            TreeKind::EnvCall { key, default } => {
                std::iter::once(key.clone()).chain(default.iter().cloned()).collect()
            }
            TreeKind::DataClass {
                positional,
                keywords,
                ..
            } => positional
                .iter()
                .cloned()
                .chain(keywords.iter().map(|(_, v)| v.clone()))
                .collect(),
            TreeKind::Dictionary { entries } => entries
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            TreeKind::BinaryOperation { left, right, .. } => vec![left.clone(), right.clone()],
            TreeKind::StringList { strings } => strings.clone(),
            TreeKind::FormatString { parts } => parts
                .iter()
                .filter_map(|p| match p {
                    FormatPart::Field(tree) => Some(tree.clone()),
                    FormatPart::Literal(_) => None,
                })
                .collect(),
            TreeKind::Str { .. } | TreeKind::Number { .. } | TreeKind::Constant { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for TreeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::PLACEHOLDER) {
            names.push("PLACEHOLDER");
        }
        if self.contains(Self::ACCESS_ENV_VAR) {
            names.push("ACCESS_ENV_VAR");
        }
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = TreeFlags::PLACEHOLDER | TreeFlags::ACCESS_ENV_VAR;
        assert!(flags.contains(TreeFlags::PLACEHOLDER));
        assert!(flags.contains(TreeFlags::ACCESS_ENV_VAR));
        assert!(!TreeFlags::NONE.contains(TreeFlags::PLACEHOLDER));
        assert!(!TreeFlags::PLACEHOLDER.contains(TreeFlags::NONE));
        assert_eq!(flags.to_string(), "PLACEHOLDER|ACCESS_ENV_VAR");
    }

    #[test]
    fn test_children_order() {
        let one = TreeNode::new(NodeId(1), TreeKind::Number { value: Number::Int(1) });
        let two = TreeNode::new(NodeId(2), TreeKind::Number { value: Number::Int(2) });
        let sum = TreeNode::new(
            NodeId(3),
            TreeKind::BinaryOperation {
                left: one,
                operator: Operator::Add,
                right: two,
            },
        );
        let ids: Vec<_> = sum.children().iter().map(|c| c.node).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2)]);
    }
}
