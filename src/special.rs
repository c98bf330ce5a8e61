//! Special Calls - resource constructors and resource operations
//!
//! A call is special when its callee is a resource class (a constructor) or a
//! method that a resource class inherits from one of the marker interfaces
//! (infrastructure API, client API, captured property).

use crate::ast::{NodeKind, Visit};
use crate::oracle::{Oracle, Type};
use crate::NodeId;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Category of a special call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    Constructor,
    InfraApi,
    ClientApi,
    CapturedProps,
}

impl fmt::Display for SpecialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructor => "constructor",
            Self::InfraApi => "infra api",
            Self::ClientApi => "client api",
            Self::CapturedProps => "captured property",
        };
        f.write_str(name)
    }
}

/// Special calls of one walk, each list in traversal order
#[derive(Debug, Clone, Default)]
pub struct SpecialCalls {
    constructors: Vec<NodeId>,
    infra_calls: Vec<NodeId>,
    client_calls: Vec<NodeId>,
    captured_props: Vec<NodeId>,
    /// Membership of every list, for lookups during graph building and extraction
    index: HashSet<(SpecialKind, NodeId)>,
}

impl SpecialCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: SpecialKind, call: NodeId) {
        if self.index.insert((kind, call)) {
            self.list_mut(kind).push(call);
        }
    }

    /// Whether `call` was classified as `kind`
    pub fn contains(&self, call: NodeId, kind: SpecialKind) -> bool {
        self.index.contains(&(kind, call))
    }

    /// Whether `call` was classified at all
    pub fn contains_any(&self, call: NodeId) -> bool {
        self.kinds_of(call).next().is_some()
    }

    /// Every kind `call` was classified as; a method may belong to several interfaces
    pub fn kinds_of(&self, call: NodeId) -> impl Iterator<Item = SpecialKind> + '_ {
        [
            SpecialKind::Constructor,
            SpecialKind::InfraApi,
            SpecialKind::ClientApi,
            SpecialKind::CapturedProps,
        ]
        .into_iter()
        .filter(move |kind| self.contains(call, *kind))
    }

    pub fn by_kind(&self, kind: SpecialKind) -> &[NodeId] {
        match kind {
            SpecialKind::Constructor => &self.constructors,
            SpecialKind::InfraApi => &self.infra_calls,
            SpecialKind::ClientApi => &self.client_calls,
            SpecialKind::CapturedProps => &self.captured_props,
        }
    }

    pub fn constructors(&self) -> &[NodeId] {
        &self.constructors
    }

    pub fn infra_calls(&self) -> &[NodeId] {
        &self.infra_calls
    }

    pub fn client_calls(&self) -> &[NodeId] {
        &self.client_calls
    }

    pub fn captured_props(&self) -> &[NodeId] {
        &self.captured_props
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the calls of `other` that are not already present
    pub fn merge(&mut self, other: &SpecialCalls) {
        for kind in [
            SpecialKind::Constructor,
            SpecialKind::InfraApi,
            SpecialKind::ClientApi,
            SpecialKind::CapturedProps,
        ] {
            for call in other.by_kind(kind) {
                self.add(kind, *call);
            }
        }
    }

    fn list_mut(&mut self, kind: SpecialKind) -> &mut Vec<NodeId> {
        match kind {
            SpecialKind::Constructor => &mut self.constructors,
            SpecialKind::InfraApi => &mut self.infra_calls,
            SpecialKind::ClientApi => &mut self.client_calls,
            SpecialKind::CapturedProps => &mut self.captured_props,
        }
    }
}

/// Walks code and classifies its calls by callee type
pub struct SpecialCallClassifier<'o> {
    oracle: &'o dyn Oracle,
}

impl<'o> SpecialCallClassifier<'o> {
    pub fn new(oracle: &'o dyn Oracle) -> Self {
        Self { oracle }
    }

    /// Classify the calls under `top`
    ///
    /// For a function only its body is walked. With `skip_sub_scopes`, nested
    /// functions, lambdas and classes are not entered.
    pub fn classify(&self, top: NodeId, skip_sub_scopes: bool) -> SpecialCalls {
        let program = self.oracle.program();
        let roots = match program.kind(top) {
            NodeKind::Function { body, .. } => body.clone(),
            _ => vec![top],
        };

        let mut calls = SpecialCalls::new();
        for root in roots {
            let _ = program.visit::<()>(root, &mut |node| {
                let kind = program.kind(node);
                if skip_sub_scopes
                    && node != top
                    && matches!(
                        kind,
                        NodeKind::Function { .. } | NodeKind::Class { .. } | NodeKind::Lambda { .. }
                    )
                {
                    return Ok(Visit::SkipChildren);
                }
                if let NodeKind::Call { callee, .. } = kind {
                    self.classify_call(node, *callee, &mut calls);
                }
                Ok(Visit::Continue)
            });
        }
        calls
    }

    /// Classify every call of every module, nested definitions included
    pub fn classify_program(&self) -> SpecialCalls {
        let mut calls = SpecialCalls::new();
        for module in self.oracle.program().modules() {
            calls.merge(&self.classify(module.root(), false));
        }
        calls
    }

    fn classify_call(&self, call: NodeId, callee: NodeId, calls: &mut SpecialCalls) {
        let oracle = self.oracle;
        let markers = oracle.markers();
        match oracle.type_of(callee) {
            Type::Unknown => {
                warn!(
                    "{}: The type of the callee '{}' is unknown. We skip it.",
                    oracle.position(call),
                    oracle.text(callee)
                );
            }
            Type::Function(function) => {
                let Some(receiver) = &function.bound_to else {
                    return;
                };
                if !oracle.is_resource_class(receiver) {
                    return;
                }
                for (kind, marker) in [
                    (SpecialKind::InfraApi, &markers.infra_api),
                    (SpecialKind::ClientApi, &markers.client_api),
                    (SpecialKind::CapturedProps, &markers.captured_props),
                ] {
                    if oracle.does_method_belong_to(&function, marker) {
                        debug!("{}: {} call '{}'", oracle.position(call), kind, function.name);
                        calls.add(kind, call);
                    }
                }
            }
            Type::Class(class) => {
                if oracle.is_resource_class(&class) {
                    debug!("{}: constructs {}", oracle.position(call), class.full_name());
                    calls.add(SpecialKind::Constructor, call);
                }
            }
            _ => {}
        }
    }
}
