//! Reduces evaluation trees to values

use super::builder::TreeBuilder;
use super::tree::{FormatPart, TreeKind, TreeNode};
use super::types::{Literal, Value};
use super::{Filling, Fillings};
use crate::ast::{Constant, Number, Operator};
use crate::oracle::{ClassRef, Oracle};
use crate::{Error, NodeId, Result};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

pub struct TreeEvaluator<'a, 'o> {
    builder: &'a TreeBuilder<'o>,
    fillings: &'a Fillings,
    /// Parameters whose argument filling is being evaluated
    active: RefCell<HashSet<NodeId>>,
}

impl<'a, 'o> TreeEvaluator<'a, 'o> {
    pub fn new(builder: &'a TreeBuilder<'o>, fillings: &'a Fillings) -> Self {
        Self {
            builder,
            fillings,
            active: RefCell::new(HashSet::new()),
        }
    }

    fn oracle(&self) -> &'o dyn Oracle {
        self.builder.oracle()
    }

    pub fn evaluate(&self, tree: &TreeNode) -> Result<Value> {
        let oracle = self.oracle();
        match &tree.kind {
            TreeKind::Parameter { default } => self.evaluate_parameter(tree.node, default.as_deref()),
            TreeKind::Index { items } => {
                let key = self.env_key(&items[0], "Only support string literal access as index.")?;
                Ok(Value::EnvVarAccess {
                    name: key,
                    default: None,
                })
            }
            TreeKind::EnvCall { key, default } => {
                let name = self.env_key(key, "Only support string literal access as index.")?;
                let default = match default {
                    Some(default) => match self.evaluate(default)? {
                        Value::None => None,
                        Value::Literal(Literal::Str(s)) => Some(s),
                        _ => {
                            return Err(Error::unsupported(
                                oracle.position(default.node),
                                "Only support string literal as default value in environment \
                                 variable access.",
                            ));
                        }
                    },
                    None => None,
                };
                Ok(Value::EnvVarAccess { name, default })
            }
            TreeKind::DataClass {
                class,
                positional,
                keywords,
            } => self.evaluate_data_class(tree.node, class, positional, keywords),
            TreeKind::Tuple { items } => Ok(Value::Tuple(
                items.iter().map(|item| self.evaluate(item)).collect::<Result<_>>()?,
            )),
            TreeKind::Dictionary { entries } => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    pairs.push((self.evaluate(key)?, self.evaluate(value)?));
                }
                Ok(Value::Dict(pairs))
            }
            TreeKind::BinaryOperation {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary_operation(&left, *operator, &right)
                    .map_err(|message| Error::unsupported(oracle.position(tree.node), message))
            }
            TreeKind::StringList { strings } => {
                let mut out = String::new();
                for string in strings {
                    match self.evaluate(string)? {
                        Value::Literal(Literal::Str(s)) => out.push_str(&s),
                        _ => {
                            return Err(Error::unsupported(
                                oracle.position(string.node),
                                "Only support string literal in string list.",
                            ));
                        }
                    }
                }
                Ok(Value::str(out))
            }
            TreeKind::FormatString { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FormatPart::Literal(text) => out.push_str(text),
                        FormatPart::Field(field) => match self.evaluate(field)? {
                            Value::Literal(Literal::Str(s)) => out.push_str(&s),
                            _ => {
                                return Err(Error::unsupported(
                                    oracle.position(field.node),
                                    "Only support string literal, not including the string \
                                     returned by a function, in the format string.",
                                ));
                            }
                        },
                    }
                }
                Ok(Value::str(out))
            }
            TreeKind::Str { value } => Ok(Value::str(value.clone())),
            TreeKind::Number { value } => Ok(Value::Literal(match value {
                Number::Int(i) => Literal::Int(*i),
                Number::Float(f) => Literal::Float(*f),
            })),
            TreeKind::Constant { value } => match value {
                Constant::None => Ok(Value::None),
                Constant::True => Ok(Value::Literal(Literal::Bool(true))),
                Constant::False => Ok(Value::Literal(Literal::Bool(false))),
                Constant::Ellipsis => Err(Error::unsupported(
                    oracle.position(tree.node),
                    "Only support the constant node with the value 'None', 'True' or 'False'.",
                )),
            },
        }
    }

    fn evaluate_parameter(&self, parameter: NodeId, default: Option<&TreeNode>) -> Result<Value> {
        let oracle = self.oracle();
        match self.fillings.get(&parameter) {
            Some(Filling::Value(value)) => Ok(value.clone()),
            Some(Filling::Argument(expression)) => {
                if !self.active.borrow_mut().insert(parameter) {
                    return Err(Error::cycle(oracle.position(parameter), oracle.text(parameter)));
                }
                let result = self
                    .builder
                    .build(*expression)
                    .and_then(|tree| self.evaluate(&tree));
                self.active.borrow_mut().remove(&parameter);
                result
            }
            None => match default {
                Some(default) => self.evaluate(default),
                None => Err(Error::missing(
                    oracle.position(parameter),
                    format!(
                        "No filling found for the parameter node '{}'.",
                        oracle.text(parameter)
                    ),
                )),
            },
        }
    }

    fn env_key(&self, key: &TreeNode, message: &str) -> Result<String> {
        match self.evaluate(key)? {
            Value::Literal(Literal::Str(s)) => Ok(s),
            _ => Err(Error::unsupported(self.oracle().position(key.node), message)),
        }
    }

    /// Defaults first, then positional arguments by field order, then keywords by name
    fn evaluate_data_class(
        &self,
        node: NodeId,
        class: &ClassRef,
        positional: &[Rc<TreeNode>],
        keywords: &[(String, Rc<TreeNode>)],
    ) -> Result<Value> {
        let oracle = self.oracle();
        let fields = oracle.dataclass_fields(class);
        let mut values: Vec<(String, Option<Value>)> = Vec::with_capacity(fields.len());
        for field in &fields {
            let default = match field.default {
                Some(default) => {
                    let tree = self.builder.build(default)?;
                    Some(self.evaluate(&tree)?)
                }
                None => None,
            };
            values.push((field.name.clone(), default));
        }

        if positional.len() > values.len() {
            return Err(Error::unsupported(
                oracle.position(node),
                format!(
                    "Too many positional arguments for data class '{}': expected at most {}, got {}.",
                    class.short_name(),
                    values.len(),
                    positional.len()
                ),
            ));
        }
        for (slot, argument) in values.iter_mut().zip(positional) {
            slot.1 = Some(self.evaluate(argument)?);
        }
        for (name, argument) in keywords {
            let Some(slot) = values.iter_mut().find(|(field, _)| field == name) else {
                return Err(Error::unsupported(
                    oracle.position(argument.node),
                    format!("Data class '{}' has no field '{}'.", class.short_name(), name),
                ));
            };
            slot.1 = Some(self.evaluate(argument)?);
        }

        let mut out = Vec::with_capacity(values.len());
        for (name, value) in values {
            let Some(value) = value else {
                return Err(Error::missing(
                    oracle.position(node),
                    format!("Missing value for field '{}' of data class '{}'.", name, class.short_name()),
                ));
            };
            out.push((name, value));
        }
        Ok(Value::DataClass {
            type_name: class.full_name(),
            fields: out,
        })
    }
}

fn binary_operation(left: &Value, operator: Operator, right: &Value) -> std::result::Result<Value, String> {
    let (Value::Literal(left), Value::Literal(right)) = (left, right) else {
        return Err("Only support literal values in binary operation.".to_string());
    };
    let supported = |l: &Literal| l.is_number() || l.as_str().is_some();
    if !supported(left) || !supported(right) {
        return Err("Only support number or string literal in binary operation.".to_string());
    }
    if left.is_number() != right.is_number() {
        return Err("The left and right values in binary operation must have the same type.".to_string());
    }

    let unsupported = || {
        format!(
            "The operator '{}' is not supported yet. If you need this feature, please submit an issue.",
            operator
        )
    };

    if let (Literal::Str(l), Literal::Str(r)) = (left, right) {
        return match operator {
            Operator::Add => Ok(Value::str(format!("{}{}", l, r))),
            _ => Err(unsupported()),
        };
    }

    let literal = match (left, right) {
        (Literal::Int(l), Literal::Int(r)) => {
            let (l, r) = (*l, *r);
            match operator {
                Operator::Add => Literal::Int(l.checked_add(r).ok_or("Integer overflow in binary operation.")?),
                Operator::Subtract => {
                    Literal::Int(l.checked_sub(r).ok_or("Integer overflow in binary operation.")?)
                }
                Operator::Multiply => {
                    Literal::Int(l.checked_mul(r).ok_or("Integer overflow in binary operation.")?)
                }
                Operator::Divide => {
                    if r == 0 {
                        return Err("Division by zero in binary operation.".to_string());
                    }
                    Literal::Float(l as f64 / r as f64)
                }
                _ => return Err(unsupported()),
            }
        }
        _ => {
            let (Some(l), Some(r)) = (as_float(left), as_float(right)) else {
                return Err("Only support number or string literal in binary operation.".to_string());
            };
            match operator {
                Operator::Add => Literal::Float(l + r),
                Operator::Subtract => Literal::Float(l - r),
                Operator::Multiply => Literal::Float(l * r),
                Operator::Divide => {
                    if r == 0.0 {
                        return Err("Division by zero in binary operation.".to_string());
                    }
                    Literal::Float(l / r)
                }
                _ => return Err(unsupported()),
            }
        }
    };
    Ok(Value::Literal(literal))
}

fn as_float(literal: &Literal) -> Option<f64> {
    match literal {
        Literal::Int(i) => Some(*i as f64),
        Literal::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_numbers() {
        assert_eq!(binary_operation(&Value::int(2), Operator::Add, &Value::int(3)), Ok(Value::int(5)));
        assert_eq!(
            binary_operation(&Value::int(7), Operator::Divide, &Value::int(2)),
            Ok(Value::Literal(Literal::Float(3.5)))
        );
        assert_eq!(
            binary_operation(&Value::int(2), Operator::Multiply, &Value::Literal(Literal::Float(1.5))),
            Ok(Value::Literal(Literal::Float(3.0)))
        );
        assert!(binary_operation(&Value::int(i64::MAX), Operator::Add, &Value::int(1))
            .unwrap_err()
            .contains("overflow"));
        assert!(binary_operation(&Value::int(1), Operator::Divide, &Value::int(0))
            .unwrap_err()
            .contains("Division by zero"));
        assert!(binary_operation(&Value::int(1), Operator::Modulo, &Value::int(2))
            .unwrap_err()
            .contains("'%' is not supported"));
    }

    #[test]
    fn test_binary_strings_and_mismatches() {
        assert_eq!(
            binary_operation(&Value::str("a"), Operator::Add, &Value::str("b")),
            Ok(Value::str("ab"))
        );
        assert!(binary_operation(&Value::str("a"), Operator::Multiply, &Value::int(2))
            .unwrap_err()
            .contains("same type"));
        assert!(binary_operation(&Value::str("a"), Operator::Subtract, &Value::str("b"))
            .unwrap_err()
            .contains("'-' is not supported"));
        assert!(binary_operation(&Value::None, Operator::Add, &Value::int(1))
            .unwrap_err()
            .contains("literal values"));
        assert!(binary_operation(&Value::Literal(Literal::Bool(true)), Operator::Add, &Value::int(1))
            .unwrap_err()
            .contains("number or string"));
    }
}
