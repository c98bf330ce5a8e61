//! # archdeduce - cloud resource graph deduction
//!
//! Statically analyzes Python application code and deduces the cloud
//! architecture it describes.
//!
//! archdeduce provides:
//! - A tree-sitter based front end lowering Python into an arena AST
//! - A semantic oracle (scopes, declarations, inferred types) behind a trait
//! - A closure extractor rendering the code a remote function needs
//! - A partial value evaluator for literal constructor and operation arguments
//! - A resource graph builder and evaluator producing an [`arch::Architecture`]

pub mod adapter;
pub mod arch;
pub mod ast;
pub mod bundle;
pub mod config;
pub mod deducer;
pub mod extract;
pub mod graph;
pub mod oracle;
pub mod scope;
pub mod special;
pub mod tracker;
pub mod ui;
pub mod value;

#[cfg(test)]
mod testing;

use std::fmt::Display;

// Re-exports for convenient access
pub use arch::Architecture;
pub use ast::{NodeId, Program};
pub use deducer::{Deducer, DeduceOptions};
pub use oracle::{Oracle, StaticOracle};
pub use value::{Value, ValueEvaluator};

/// Result type alias for archdeduce operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for archdeduce operations
///
/// Every deduction error aborts the run. `at` is the `<path:line:column>`
/// position of the offending node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{at}: {message}")]
    Unsupported { at: String, message: String },

    #[error("{at}: {message}")]
    MissingBinding { at: String, message: String },

    #[error("{at}: {message}")]
    Oracle { at: String, message: String },

    #[error("{at}: cyclic reference to '{name}'")]
    Cycle { at: String, name: String },

    #[error("Architecture error: {0}")]
    Architecture(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn unsupported(at: impl Display, message: impl Into<String>) -> Self {
        Self::Unsupported {
            at: at.to_string(),
            message: message.into(),
        }
    }

    pub fn missing(at: impl Display, message: impl Into<String>) -> Self {
        Self::MissingBinding {
            at: at.to_string(),
            message: message.into(),
        }
    }

    pub fn oracle(at: impl Display, message: impl Into<String>) -> Self {
        Self::Oracle {
            at: at.to_string(),
            message: message.into(),
        }
    }

    pub fn cycle(at: impl Display, name: impl Into<String>) -> Self {
        Self::Cycle {
            at: at.to_string(),
            name: name.into(),
        }
    }
}
