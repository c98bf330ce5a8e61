//! Scope Graph - Python name binding model
//!
//! The binder walks the arena AST and records, for every scope, the names it
//! binds and their declarations. The resolver answers lookups with Python's
//! scoping rules.

pub mod binder;
pub mod graph;
pub mod resolver;

pub use binder::Binder;
pub use graph::{Declaration, ScopeGraph, ScopeId, ScopeKind};
pub use resolver::{NameResolver, SymbolLookup};
