//! Evaluated values and their renderings

use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    fn python(&self) -> String {
        match self {
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => float_text(*f),
            Self::Str(s) => quote(s),
        }
    }

    fn json(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.is_finite() => float_text(*f),
            Self::Float(_) => "null".to_string(),
            Self::Str(s) => quote(s),
        }
    }
}

/// Result of partially evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Literal(Literal),
    /// `type_name` is the class full name; fields keep declaration order
    DataClass {
        type_name: String,
        fields: Vec<(String, Value)>,
    },
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    /// Read of an environment variable, resolved where the code runs
    EnvVarAccess {
        name: String,
        default: Option<String>,
    },
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Literal(Literal::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::Literal(Literal::Int(value))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(literal) => literal.as_str(),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Python source rendering; data class names keep their module when `qualified`
    pub fn display(&self, qualified: bool) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Literal(literal) => literal.python(),
            Self::Tuple(items) => {
                let items: Vec<_> = items.iter().map(|v| v.display(qualified)).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    format!("({})", items.join(", "))
                }
            }
            Self::Dict(entries) => {
                let entries: Vec<_> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.display(qualified), v.display(qualified)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Self::DataClass { type_name, fields } => {
                let name = if qualified {
                    type_name.as_str()
                } else {
                    type_name.rsplit('.').next().unwrap_or(type_name)
                };
                let fields: Vec<_> = fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.display(qualified)))
                    .collect();
                format!("{}({})", name, fields.join(", "))
            }
            Self::EnvVarAccess { name, default } => match default {
                Some(default) => format!("os.environ.get({}, {})", quote(name), quote(default)),
                None => format!("os.environ[{}]", quote(name)),
            },
        }
    }

    /// JSON rendering for generated infrastructure code
    pub fn to_target(&self, env: &dyn EnvVarRenderer) -> String {
        match self {
            Self::None => "null".to_string(),
            Self::Literal(literal) => literal.json(),
            Self::Tuple(items) => {
                let items: Vec<_> = items.iter().map(|v| v.to_target(env)).collect();
                format!("[{}]", items.join(","))
            }
            Self::Dict(entries) => {
                let entries: Vec<_> = entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k.as_str() {
                            Some(s) => quote(s),
                            None => quote(&k.to_target(env)),
                        };
                        format!("{}:{}", key, v.to_target(env))
                    })
                    .collect();
                format!("{{{}}}", entries.join(","))
            }
            Self::DataClass { fields, .. } => {
                let fields: Vec<_> = fields
                    .iter()
                    .map(|(k, v)| format!("{}:{}", quote(k), v.to_target(env)))
                    .collect();
                format!("{{{}}}", fields.join(","))
            }
            Self::EnvVarAccess { name, default } => env.render(name, default.as_deref()),
        }
    }

    /// Full names of every data class inside the value, first occurrence first
    pub fn data_class_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        self.collect_data_class_types(&mut types);
        types
    }

    fn collect_data_class_types(&self, types: &mut Vec<String>) {
        match self {
            Self::None | Self::Literal(_) | Self::EnvVarAccess { .. } => {}
            Self::Tuple(items) => items.iter().for_each(|v| v.collect_data_class_types(types)),
            Self::Dict(entries) => {
                for (k, v) in entries {
                    k.collect_data_class_types(types);
                    v.collect_data_class_types(types);
                }
            }
            Self::DataClass { type_name, fields } => {
                if !types.contains(type_name) {
                    types.push(type_name.clone());
                }
                fields.iter().for_each(|(_, v)| v.collect_data_class_types(types));
            }
        }
    }

    /// Environment variable reads inside the value
    pub fn env_var_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_env_var_names(&mut names);
        names
    }

    fn collect_env_var_names(&self, names: &mut Vec<String>) {
        match self {
            Self::None | Self::Literal(_) => {}
            Self::EnvVarAccess { name, .. } => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Self::Tuple(items) => items.iter().for_each(|v| v.collect_env_var_names(names)),
            Self::Dict(entries) => {
                for (k, v) in entries {
                    k.collect_env_var_names(names);
                    v.collect_env_var_names(names);
                }
            }
            Self::DataClass { fields, .. } => {
                fields.iter().for_each(|(_, v)| v.collect_env_var_names(names))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(true))
    }
}

/// Renders an environment variable read in a target language
pub trait EnvVarRenderer {
    fn render(&self, name: &str, default: Option<&str>) -> String;
}

/// `process.env["K"] ?? "D"`
pub struct TypeScriptEnv;

impl EnvVarRenderer for TypeScriptEnv {
    fn render(&self, name: &str, default: Option<&str>) -> String {
        match default {
            Some(default) => format!("process.env[{}] ?? {}", quote(name), quote(default)),
            None => format!("process.env[{}]", quote(name)),
        }
    }
}

/// `os.environ.get("K", "D")`
pub struct PythonEnv;

impl EnvVarRenderer for PythonEnv {
    fn render(&self, name: &str, default: Option<&str>) -> String {
        match default {
            Some(default) => format!("os.environ.get({}, {})", quote(name), quote(default)),
            None => format!("os.environ.get({})", quote(name)),
        }
    }
}

/// The current process environment, else the default, else `null`
pub struct ResolvedEnv;

impl EnvVarRenderer for ResolvedEnv {
    fn render(&self, name: &str, default: Option<&str>) -> String {
        match std::env::var(name).ok().or_else(|| default.map(str::to_string)) {
            Some(value) => quote(&value),
            None => "null".to_string(),
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}
