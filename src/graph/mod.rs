//! Resource graphs
//!
//! A [`ResourceGraph`] describes the resources one scope constructs or
//! receives, the code bundles it hands to them, and the infrastructure
//! operations it performs. [`GraphCache`] builds graphs per scope and
//! [`GraphEvaluator`] turns a graph into [`crate::arch`] entities.

pub mod builder;
pub mod evaluate;
pub mod types;

pub use builder::{GraphCache, member_name};
pub use evaluate::{
    EvaluateOptions, Evaluation, EvaluationContext, GraphEvaluator, ProjectInfo, ResourceMapping, StagedBundle,
};
pub use types::{Argument, Bundle, Relationship, Resource, ResourceGraph, ResourceOrigin};
