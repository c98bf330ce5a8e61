//! Partial value evaluation
//!
//! Expressions handed to resource constructors and operations are reduced to
//! structured [`Value`]s. A [`TreeBuilder`] first turns an expression into an
//! evaluation tree; parameters stay as placeholders until a caller fills them.

pub mod builder;
pub mod evaluator;
pub mod tree;
pub mod types;

pub use builder::TreeBuilder;
pub use evaluator::TreeEvaluator;
pub use tree::{FormatPart, TreeFlags, TreeKind, TreeNode};
pub use types::{EnvVarRenderer, Literal, PythonEnv, ResolvedEnv, TypeScriptEnv, Value};

use crate::oracle::Oracle;
use crate::{NodeId, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;

/// What a placeholder parameter is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Filling {
    /// An already evaluated value
    Value(Value),
    /// An argument expression from the call site, evaluated on demand
    Argument(NodeId),
}

/// Placeholder fillings keyed by `Parameter` node
pub type Fillings = HashMap<NodeId, Filling>;

pub struct ValueEvaluator<'o> {
    builder: TreeBuilder<'o>,
}

impl<'o> ValueEvaluator<'o> {
    pub fn new(oracle: &'o dyn Oracle) -> Self {
        Self {
            builder: TreeBuilder::new(oracle),
        }
    }

    /// Evaluate `node`, filling placeholders from `fillings`
    pub fn evaluate(&self, node: NodeId, fillings: &Fillings) -> Result<Value> {
        let tree = self.builder.build(node)?;
        TreeEvaluator::new(&self.builder, fillings).evaluate(&tree)
    }

    /// Parameter nodes the value of `node` depends on, breadth first
    pub fn placeholders(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let tree = self.builder.build(node)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([tree]);
        while let Some(current) = queue.pop_front() {
            if current.flags.contains(TreeFlags::PLACEHOLDER) && seen.insert(current.node) {
                out.push(current.node);
            }
            queue.extend(current.children());
        }
        Ok(out)
    }

    /// Indented dump of the evaluation tree of `node`
    pub fn print_tree(&self, node: NodeId) -> Result<String> {
        let tree = self.builder.build(node)?;
        let mut out = String::new();
        self.print_node(&tree, 0, &mut out);
        Ok(out)
    }

    fn print_node(&self, tree: &TreeNode, depth: usize, out: &mut String) {
        let oracle = self.builder.oracle();
        let flags = if tree.flags == TreeFlags::NONE {
            String::new()
        } else {
            format!(" [{}]", tree.flags)
        };
        let _ = writeln!(
            out,
            "{}{} {}{} `{}`",
            "  ".repeat(depth),
            tree.kind.name(),
            tree.node,
            flags,
            oracle.text(tree.node)
        );
        for child in tree.children() {
            self.print_node(&child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use crate::testing;

    /// The value of the last assignment in `main`
    fn last_value(oracle: &dyn Oracle) -> NodeId {
        testing::find_nodes(oracle, |k| matches!(k, NodeKind::Assignment { value: Some(_), .. }))
            .into_iter()
            .last()
            .and_then(|n| match oracle.kind(n) {
                NodeKind::Assignment { value, .. } => *value,
                _ => None,
            })
            .unwrap()
    }

    fn parameter(oracle: &dyn Oracle, name: &str) -> NodeId {
        let program = oracle.program();
        testing::find_nodes(oracle, |k| match k {
            NodeKind::Parameter { name: Some(n), .. } => program.name_of(*n) == Some(name),
            _ => false,
        })[0]
    }

    #[test]
    fn test_literals_round_trip() {
        let oracle = testing::load("a = \"abc\"\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let value = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap();
        assert_eq!(value.display(false), "\"abc\"");

        let oracle = testing::load("a = 5\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let value = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap();
        assert_eq!(value.display(false), "5");
    }

    #[test]
    fn test_structures_and_strings() {
        let oracle = testing::load(concat!(
            "prefix = \"app\"\n",
            "stage = \"dev\"\n",
            "cfg = {\"name\": f\"{prefix}-{stage}\", \"size\": (1 + 2, 3.5 * 2), \"flag\": True, \"none\": None, \"s\": \"a\" \"b\"}\n",
        ));
        let evaluator = ValueEvaluator::new(&oracle);
        let value = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap();
        assert_eq!(
            value.display(false),
            "{\"name\": \"app-dev\", \"size\": (3, 7.0), \"flag\": True, \"none\": None, \"s\": \"ab\"}"
        );
    }

    #[test]
    fn test_env_var_access() {
        let oracle = testing::load("import os\nkey = os.environ.get(\"KEY\", \"D\")\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let value = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap();
        assert_eq!(
            value,
            Value::EnvVarAccess {
                name: "KEY".into(),
                default: Some("D".into())
            }
        );
        assert_eq!(value.to_target(&TypeScriptEnv), "process.env[\"KEY\"] ?? \"D\"");
        assert_eq!(value.to_target(&PythonEnv), "os.environ.get(\"KEY\", \"D\")");
    }

    #[test]
    fn test_env_key_must_be_literal() {
        let oracle = testing::load("import os\ndef f(k):\n    v = os.environ[k]\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let mut fillings = Fillings::new();
        fillings.insert(parameter(&oracle, "k"), Filling::Value(Value::int(1)));
        let err = evaluator.evaluate(last_value(&oracle), &fillings).unwrap_err();
        assert!(err.to_string().contains("string literal access as index"));
    }

    #[test]
    fn test_data_class_defaults_then_arguments() {
        let oracle = testing::load(concat!(
            "from pluto_client import QueueOptions\n",
            "opts = QueueOptions(True, retention=3)\n",
        ));
        let evaluator = ValueEvaluator::new(&oracle);
        let value = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap();
        assert_eq!(value.display(true), "pluto_client.QueueOptions(fifo=True, retention=3)");

        let oracle = testing::load("from pluto_client import QueueOptions\nopts = QueueOptions()\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let value = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap();
        assert_eq!(value.display(false), "QueueOptions(fifo=False, retention=7)");

        let oracle = testing::load("from pluto_client import QueueOptions\nopts = QueueOptions(True, 1, 2)\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let err = evaluator.evaluate(last_value(&oracle), &Fillings::new()).unwrap_err();
        assert!(err.to_string().contains("Too many positional arguments"));
    }

    #[test]
    fn test_placeholders_and_fillings() {
        let oracle = testing::load(concat!(
            "def make(name, suffix=\"-x\"):\n",
            "    full = name + suffix + name\n",
        ));
        let evaluator = ValueEvaluator::new(&oracle);
        let node = last_value(&oracle);
        let name = parameter(&oracle, "name");
        let suffix = parameter(&oracle, "suffix");
        assert_eq!(evaluator.placeholders(node).unwrap(), vec![name, suffix]);

        let err = evaluator.evaluate(node, &Fillings::new()).unwrap_err();
        assert!(err.to_string().contains("No filling found for the parameter node"));

        let mut fillings = Fillings::new();
        fillings.insert(name, Filling::Value(Value::str("q")));
        assert_eq!(evaluator.evaluate(node, &fillings).unwrap(), Value::str("q-xq"));

        fillings.insert(suffix, Filling::Value(Value::str("_")));
        assert_eq!(evaluator.evaluate(node, &fillings).unwrap(), Value::str("q_q"));
    }

    #[test]
    fn test_argument_filling() {
        let oracle = testing::load(concat!(
            "def make(name):\n",
            "    full = name + \"-svc\"\n",
            "base = \"orders\"\n",
            "make(base)\n",
        ));
        let evaluator = ValueEvaluator::new(&oracle);
        let full = testing::node_with_text(&oracle, "name + \"-svc\"");
        // the argument of `make(base)`
        let base = testing::find_nodes(&oracle, |k| matches!(k, NodeKind::Name { value } if value == "base"))
            .into_iter()
            .last()
            .unwrap();
        let mut fillings = Fillings::new();
        fillings.insert(parameter(&oracle, "name"), Filling::Argument(base));
        assert_eq!(evaluator.evaluate(full, &fillings).unwrap(), Value::str("orders-svc"));
    }

    #[test]
    fn test_print_tree() {
        let oracle = testing::load("import os\ndef f(a):\n    x = a + os.environ[\"K\"]\n");
        let evaluator = ValueEvaluator::new(&oracle);
        let dump = evaluator.print_tree(last_value(&oracle)).unwrap();
        let lines: Vec<_> = dump.lines().collect();
        assert!(lines[0].starts_with("BinaryOperation #"));
        assert!(lines[1].starts_with("  Parameter #") && lines[1].contains("[PLACEHOLDER]"));
        assert!(lines[2].starts_with("  Index #") && lines[2].contains("[ACCESS_ENV_VAR]"));
        assert!(lines[3].starts_with("    StringList #"));
    }
}
