//! Fixtures shared by unit tests
//!
//! Python sources are loaded in memory as module `main`, next to stub
//! `pluto_base` / `pluto_client` SDK modules.

use crate::adapter::ProgramLoader;
use crate::ast::NodeKind;
use crate::oracle::{Oracle, StaticOracle};
use crate::NodeId;

pub const PLUTO_BASE: &str = r#"
class IResource:
    pass


class IResourceInfraApi:
    pass


class IResourceClientApi:
    pass


class IResourceCapturedProps:
    pass
"#;

pub const PLUTO_CLIENT: &str = r#"
from dataclasses import dataclass
from typing import Callable, Optional
from pluto_base import IResource, IResourceInfraApi, IResourceClientApi, IResourceCapturedProps


class RouterInfraApi(IResourceInfraApi):
    def get(self, path: str, fn: Callable) -> None:
        raise NotImplementedError

    def post(self, path: str, fn: Callable) -> None:
        raise NotImplementedError


class RouterCapturedProps(IResourceCapturedProps):
    def url(self) -> str:
        raise NotImplementedError


class Router(IResource, RouterInfraApi, RouterCapturedProps):
    fqn = "@plutolang/pluto.Router"

    def __init__(self, name: Optional[str] = None):
        pass


class QueueClientApi(IResourceClientApi):
    def push(self, msg: str) -> None:
        raise NotImplementedError


class QueueInfraApi(IResourceInfraApi):
    def subscribe(self, fn: Callable) -> None:
        raise NotImplementedError


@dataclass
class QueueOptions:
    fifo: bool = False
    retention: int = 7


class Queue(IResource, QueueClientApi, QueueInfraApi):
    fqn = "@plutolang/pluto.Queue"

    def __init__(self, name: Optional[str] = None, opts: Optional[QueueOptions] = None):
        pass


class KVStoreClientApi(IResourceClientApi):
    def get(self, key: str) -> str:
        raise NotImplementedError

    def set(self, key: str, val: str) -> None:
        raise NotImplementedError


class KVStore(IResource, KVStoreClientApi):
    fqn = "@plutolang/pluto.KVStore"

    def __init__(self, name: Optional[str] = None):
        pass


class FunctionClientApi(IResourceClientApi):
    def invoke(self, payload: str) -> str:
        raise NotImplementedError


class FunctionCapturedProps(IResourceCapturedProps):
    def url(self) -> str:
        raise NotImplementedError


class Function(IResource, FunctionClientApi, FunctionCapturedProps):
    fqn = "@plutolang/pluto.Function"

    def __init__(self, handler: Callable, name: Optional[str] = None):
        pass
"#;

/// Load `source` as module `main` next to the SDK stubs
pub fn load(source: &str) -> StaticOracle {
    let mut loader = ProgramLoader::new(Vec::new()).unwrap();
    loader.add_source("pluto_base", "pluto_base.py", PLUTO_BASE).unwrap();
    loader.add_source("pluto_client", "pluto_client.py", PLUTO_CLIENT).unwrap();
    loader.add_source("main", "main.py", source).unwrap();
    StaticOracle::new(loader.finish())
}

/// Root node of module `main`
pub fn main_root(oracle: &dyn Oracle) -> NodeId {
    oracle.program().module_by_name("main").unwrap().root()
}

/// Nodes of `main` matching `predicate`, in pre-order
pub fn find_nodes(oracle: &dyn Oracle, predicate: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
    let program = oracle.program();
    program
        .descendants(main_root(oracle))
        .into_iter()
        .filter(|n| predicate(program.kind(*n)))
        .collect()
}

/// First node of `main` whose source text is exactly `text`
///
/// Wrappers sharing their child's text (arguments, expression statements,
/// import items) are skipped in favor of what they wrap.
pub fn node_with_text(oracle: &dyn Oracle, text: &str) -> NodeId {
    let program = oracle.program();
    program
        .descendants(main_root(oracle))
        .into_iter()
        .filter(|n| !is_wrapper(program.kind(*n)))
        .find(|n| program.text(*n) == text)
        .unwrap_or_else(|| panic!("no node with text {:?}", text))
}

fn is_wrapper(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Argument { .. }
            | NodeKind::ExpressionStatement { .. }
            | NodeKind::ImportAs { .. }
            | NodeKind::ImportFromAs { .. }
    )
}

/// First call of `main` whose callee text is `callee`
pub fn call_to(oracle: &dyn Oracle, callee: &str) -> NodeId {
    calls_to(oracle, callee)
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no call to {:?}", callee))
}

/// Every call of `main` whose callee text is `callee`
pub fn calls_to(oracle: &dyn Oracle, callee: &str) -> Vec<NodeId> {
    let program = oracle.program();
    find_nodes(oracle, |kind| match kind {
        NodeKind::Call { callee: c, .. } => program.text(*c) == callee,
        _ => false,
    })
}

/// The `def` or `class` named `name` in `main`
pub fn definition(oracle: &dyn Oracle, name: &str) -> NodeId {
    let program = oracle.program();
    find_nodes(oracle, |kind| match kind {
        NodeKind::Function { name: n, .. } | NodeKind::Class { name: n, .. } => {
            program.name_of(*n) == Some(name)
        }
        _ => false,
    })
    .into_iter()
    .next()
    .unwrap_or_else(|| panic!("no definition named {:?}", name))
}
