//! Closure extraction
//!
//! Produces the source a bundle needs to run an expression on its own: the
//! expression plus every declaration it reaches outside its own scope,
//! recursively. Resource constructors are rewritten to `build_client` calls and
//! constant expressions are folded into literals.

pub mod finder;

pub use finder::{AccessedSpecialNodeFinder, OutsideSymbolFinder, env_var_reads};

use crate::ast::{ArgumentCategory, FormatPiece, NodeKind};
use crate::oracle::{Oracle, Type};
use crate::scope::Declaration;
use crate::special::{SpecialCalls, SpecialKind};
use crate::tracker::ResourceObjectTracker;
use crate::value::{Filling, Fillings, Value, ValueEvaluator};
use crate::{Error, NodeId, Result};
use std::cell::RefCell;
use std::collections::HashSet;
use tracing::debug;

/// Extracted code of one node plus the declarations it depends on
#[derive(Debug, Clone)]
pub struct CodeSegment {
    pub node: NodeId,
    /// Name the segment binds, when it is a definition or assignment
    pub exportable_name: Option<String>,
    pub code: String,
    pub dependencies: Vec<CodeSegment>,
    pub called_client_apis: Vec<NodeId>,
    pub accessed_captured_props: Vec<NodeId>,
    pub accessed_env_vars: Vec<String>,
    /// Name references render nothing themselves
    silent: bool,
}

impl CodeSegment {
    pub fn new(node: NodeId, code: impl Into<String>) -> Self {
        Self {
            node,
            exportable_name: None,
            code: code.into(),
            dependencies: Vec::new(),
            called_client_apis: Vec::new(),
            accessed_captured_props: Vec::new(),
            accessed_env_vars: Vec::new(),
            silent: false,
        }
    }

    pub fn exportable(mut self, name: impl Into<String>) -> Self {
        self.exportable_name = Some(name.into());
        self
    }

    /// Lift the dependencies and accesses of `children` into this segment
    fn with_children(mut self, children: Vec<CodeSegment>) -> Self {
        for child in children {
            self.dependencies.extend(child.dependencies);
            self.called_client_apis.extend(child.called_client_apis);
            self.accessed_captured_props.extend(child.accessed_captured_props);
            self.accessed_env_vars.extend(child.accessed_env_vars);
        }
        self
    }

    /// Source text with dependencies first; each node is emitted at most once
    ///
    /// With `export`, the root is bound to that name: definitions get a trailing
    /// `export = name`, other expressions are assigned directly.
    pub fn render(&self, export: Option<&str>) -> String {
        let mut emitted = HashSet::new();
        self.render_into(true, export, &mut emitted)
    }

    fn render_into(&self, is_root: bool, export: Option<&str>, emitted: &mut HashSet<NodeId>) -> String {
        let mut pieces: Vec<String> = self
            .dependencies
            .iter()
            .map(|d| d.render_into(false, None, emitted))
            .filter(|piece| !piece.is_empty())
            .collect();

        if !emitted.insert(self.node) {
            return pieces.join("\n");
        }

        let export = export.filter(|_| is_root);
        match (export, &self.exportable_name) {
            (Some(export), None) => pieces.push(format!("{} = {}", export, self.code)),
            (export, name) => {
                if !self.silent && !self.code.is_empty() {
                    pieces.push(self.code.clone());
                }
                if let (Some(export), Some(name)) = (export, name) {
                    pieces.push(format!("{} = {}", export, name));
                }
            }
        }
        pieces.join("\n")
    }

    pub fn called_client_apis(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(&mut out, &|s: &CodeSegment| s.called_client_apis.clone());
        out
    }

    pub fn accessed_captured_props(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(&mut out, &|s: &CodeSegment| s.accessed_captured_props.clone());
        out
    }

    pub fn accessed_env_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&mut out, &|s: &CodeSegment| s.accessed_env_vars.clone());
        out
    }

    fn collect<T: PartialEq>(&self, out: &mut Vec<T>, get: &dyn Fn(&CodeSegment) -> Vec<T>) {
        for item in get(self) {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        for dependency in &self.dependencies {
            dependency.collect(out, get);
        }
    }
}

pub struct CodeExtractor<'o> {
    oracle: &'o dyn Oracle,
    specials: &'o SpecialCalls,
    finder: AccessedSpecialNodeFinder<'o>,
    tracker: ResourceObjectTracker<'o>,
    values: ValueEvaluator<'o>,
    /// Declarations being extracted
    in_progress: RefCell<HashSet<NodeId>>,
}

impl<'o> CodeExtractor<'o> {
    /// `specials` must cover the whole program; closures reach into any module
    pub fn new(oracle: &'o dyn Oracle, specials: &'o SpecialCalls) -> Self {
        Self {
            oracle,
            specials,
            finder: AccessedSpecialNodeFinder::new(specials),
            tracker: ResourceObjectTracker::new(oracle),
            values: ValueEvaluator::new(oracle),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// Extract an expression and everything it depends on
    pub fn extract(&self, node: NodeId, fillings: &Fillings) -> Result<CodeSegment> {
        let oracle = self.oracle;
        match oracle.kind(node) {
            NodeKind::Lambda { .. } => self.extract_definition(node, None, fillings),
            NodeKind::Name { .. } => self.extract_name(node, fillings),
            NodeKind::Call { callee, arguments } => self.extract_call(node, *callee, arguments, fillings),
            NodeKind::MemberAccess { object, member } => {
                let object_segment = self.extract(*object, fillings)?;
                let member = oracle.program().name_of(*member).unwrap_or_default();
                let code = format!("{}.{}", object_segment.code, member);
                Ok(CodeSegment::new(node, code).with_children(vec![object_segment]))
            }
            NodeKind::Number { .. } | NodeKind::Constant { .. } => Ok(CodeSegment::new(node, oracle.text(node))),
            NodeKind::StringList { strings } => {
                let mut children = Vec::new();
                for string in strings {
                    if let NodeKind::FormatString { pieces } = oracle.kind(*string) {
                        for piece in pieces {
                            if let FormatPiece::Field { expression, .. } = piece {
                                children.push(self.extract(*expression, fillings)?);
                            }
                        }
                    }
                }
                Ok(CodeSegment::new(node, oracle.text(node)).with_children(children))
            }
            NodeKind::BinaryOperation { left, right, .. } => {
                let children = vec![self.extract(*left, fillings)?, self.extract(*right, fillings)?];
                Ok(CodeSegment::new(node, oracle.text(node)).with_children(children))
            }
            NodeKind::Comprehension { element, clauses, .. } => {
                let mut children = Vec::new();
                match oracle.kind(*element) {
                    NodeKind::DictionaryEntry { key, value } => {
                        children.push(self.extract(*key, fillings)?);
                        children.push(self.extract(*value, fillings)?);
                    }
                    _ => children.push(self.extract(*element, fillings)?),
                }
                for clause in clauses {
                    match oracle.kind(*clause) {
                        NodeKind::ComprehensionFor { target, iterable, .. } => {
                            children.push(self.extract(*iterable, fillings)?);
                            children.push(self.extract(*target, fillings)?);
                        }
                        NodeKind::ComprehensionIf { test } => children.push(self.extract(*test, fillings)?),
                        other => {
                            return Err(Error::unsupported(
                                oracle.position(*clause),
                                format!("Unsupported node type {} in list comprehension.", other.name()),
                            ));
                        }
                    }
                }
                Ok(CodeSegment::new(node, oracle.text(node)).with_children(children))
            }
            NodeKind::Dictionary { entries } => {
                let mut children = Vec::new();
                for entry in entries {
                    let NodeKind::DictionaryEntry { key, value } = oracle.kind(*entry) else {
                        return Err(Error::unsupported(
                            oracle.position(*entry),
                            format!("Unsupported dictionary entry type: {}", oracle.kind(*entry).name()),
                        ));
                    };
                    children.push(self.extract(*key, fillings)?);
                    children.push(self.extract(*value, fillings)?);
                }
                Ok(CodeSegment::new(node, oracle.text(node)).with_children(children))
            }
            NodeKind::Tuple { items } | NodeKind::List { items } => {
                let children = items
                    .iter()
                    .map(|item| self.extract(*item, fillings))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CodeSegment::new(node, oracle.text(node)).with_children(children))
            }
            other => Err(Error::unsupported(
                oracle.position(node),
                format!("Unsupported node type: {}, text: `{}`", other.name(), oracle.text(node)),
            )),
        }
    }

    /// A name stands for its declaration; the declaration is what gets extracted
    fn extract_name(&self, name: NodeId, fillings: &Fillings) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let value = oracle.program().name_of(name).unwrap_or_default().to_string();
        let Some(lookup) = oracle.lookup_symbol(name) else {
            return Err(Error::oracle(
                oracle.position(name),
                format!("No symbol found for node '{}'.", value),
            ));
        };
        let declaration = match lookup.declarations.as_slice() {
            [] => {
                return Err(Error::oracle(
                    oracle.position(name),
                    format!("No declaration found for symbol '{}'.", value),
                ));
            }
            [declaration] => *declaration,
            _ => {
                return Err(Error::unsupported(
                    oracle.position(name),
                    format!(
                        "Multiple declarations found for symbol '{}'. We don't support this yet.",
                        value
                    ),
                ));
            }
        };

        let key = declaration.node().unwrap_or(name);
        if !self.in_progress.borrow_mut().insert(key) {
            return Err(Error::cycle(oracle.position(name), value));
        }
        let extracted = self.extract_declaration(name, &value, declaration, fillings);
        self.in_progress.borrow_mut().remove(&key);

        let mut segment = CodeSegment::new(name, value.clone()).exportable(value);
        segment.silent = true;
        segment.dependencies.push(extracted?);
        Ok(segment)
    }

    fn extract_declaration(
        &self,
        name: NodeId,
        value: &str,
        declaration: Declaration,
        fillings: &Fillings,
    ) -> Result<CodeSegment> {
        let oracle = self.oracle;
        match declaration {
            Declaration::Variable { node } => self.extract_variable(node, fillings),
            Declaration::Function { node } => {
                let NodeKind::Function { name, .. } = oracle.kind(node) else {
                    return Err(Error::oracle(oracle.position(node), "The declaration is not a function."));
                };
                self.extract_definition(node, Some(*name), fillings)
            }
            Declaration::Class { node } => {
                let NodeKind::Class { name, .. } = oracle.kind(node) else {
                    return Err(Error::oracle(oracle.position(node), "The declaration is not a class."));
                };
                self.extract_definition(node, Some(*name), fillings)
            }
            Declaration::Alias { node } => self.extract_import(node),
            Declaration::Intrinsic { .. } => Ok(CodeSegment::new(name, "")),
            Declaration::Parameter { node } => {
                if !fillings.contains_key(&node) {
                    return Err(Error::missing(
                        oracle.position(name),
                        format!(
                            "The parameter '{}' is used by the closure but has no value bound by \
                             the caller.",
                            value
                        ),
                    ));
                }
                if oracle.is_resource_type(&oracle.type_of(node)) {
                    return self.extract_resource_parameter(node, value, fillings);
                }
                let folded = self.values.evaluate(name, fillings)?;
                let mut segment = CodeSegment::new(node, format!("{} = {}", value, folded.display(false)))
                    .exportable(value);
                self.add_folded(&mut segment, &folded)?;
                Ok(segment)
            }
        }
    }

    /// A resource handed in by the caller becomes a client of the resource the
    /// caller's argument constructs
    fn extract_resource_parameter(&self, parameter: NodeId, value: &str, fillings: &Fillings) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let at = oracle.position(parameter);
        let Some(Filling::Argument(expression)) = fillings.get(&parameter) else {
            return Err(Error::unsupported(
                at,
                format!("The resource parameter '{}' must be bound to a resource object.", value),
            ));
        };

        let constructor = match oracle.kind(*expression) {
            NodeKind::Name { .. } => self.tracker.name_declaration(*expression)?,
            NodeKind::Call { .. } if self.tracker.is_creating_resource(*expression)? => Some(*expression),
            _ => None,
        };
        let Some(constructor) = constructor.filter(|c| matches!(oracle.kind(*c), NodeKind::Call { .. })) else {
            return Err(Error::missing(
                at,
                format!(
                    "Cannot find the resource object passed as the parameter '{}'.",
                    value
                ),
            ));
        };

        // the argument lives in the caller's scope, where no parameters are bound
        let client = self.extract(constructor, &Fillings::new())?;
        let code = format!("{} = {}", value, client.code);
        Ok(CodeSegment::new(parameter, code)
            .exportable(value)
            .with_children(vec![client]))
    }

    fn extract_variable(&self, target: NodeId, fillings: &Fillings) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let program = oracle.program();
        let value = program.name_of(target).unwrap_or_default().to_string();

        // comprehension targets are bound by the comprehension itself
        let binder = program
            .ancestors(target)
            .find(|a| !matches!(program.kind(*a), NodeKind::Tuple { .. } | NodeKind::List { .. }));
        if binder.is_some_and(|b| matches!(program.kind(b), NodeKind::ComprehensionFor { .. })) {
            return Ok(CodeSegment::new(target, value));
        }

        let assignment = program.parent(target);
        let rhs = match assignment.map(|a| program.kind(a)) {
            Some(NodeKind::Assignment {
                target: t,
                value: Some(rhs),
                ..
            }) if *t == target => *rhs,
            _ => {
                return Err(Error::unsupported(
                    oracle.position(target),
                    "We only support the simplest assignment statement, the tuple assignment or \
                     other statements are not supported yet.",
                ));
            }
        };
        let assignment = assignment.unwrap_or(target);

        let rhs_segment = if oracle.is_resource_type(&oracle.type_of(target)) {
            match self.tracker.name_declaration(target)? {
                Some(constructor) if matches!(oracle.kind(constructor), NodeKind::Call { .. }) => {
                    self.extract(constructor, fillings)?
                }
                _ => self.extract(rhs, fillings)?,
            }
        } else {
            match oracle.kind(rhs) {
                NodeKind::Call { .. }
                | NodeKind::Lambda { .. }
                | NodeKind::Name { .. }
                | NodeKind::MemberAccess { .. }
                | NodeKind::List { .. }
                | NodeKind::Set { .. }
                | NodeKind::Comprehension { .. } => self.extract(rhs, fillings)?,
                _ => {
                    let folded = self.values.evaluate(rhs, fillings)?;
                    let mut segment = CodeSegment::new(rhs, folded.display(false));
                    self.add_folded(&mut segment, &folded)?;
                    segment
                }
            }
        };

        let code = format!("{} = {}", value, rhs_segment.code);
        Ok(CodeSegment::new(assignment, code)
            .exportable(value)
            .with_children(vec![rhs_segment]))
    }

    /// Function, lambda or class: its own text plus what it reaches outside itself
    fn extract_definition(&self, node: NodeId, name: Option<NodeId>, fillings: &Fillings) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let Some(scope) = oracle.scope_of_definition(node) else {
            return Err(Error::oracle(
                oracle.position(node),
                format!("No scope found for this definition '{}'.", oracle.text(node)),
            ));
        };

        let mut finder = OutsideSymbolFinder::new(oracle, scope);
        if let Some(name) = name {
            finder = finder.with_root_name(name);
        }
        if matches!(oracle.kind(node), NodeKind::Class { .. }) {
            let Type::Class(class) = oracle.type_of(name.unwrap_or(node)) else {
                return Err(Error::oracle(
                    oracle.position(node),
                    format!("The type of the class '{}' is not a class.", oracle.text(node)),
                ));
            };
            let members = oracle.mro(&class).iter().flat_map(|k| oracle.class_members(k)).collect();
            finder = finder.with_members(members);
        }

        let mut children = Vec::new();
        for outside in finder.find(node)? {
            children.push(self.extract_name(outside, fillings)?);
        }

        let mut segment = CodeSegment::new(node, oracle.text(node));
        if let Some(name) = name.and_then(|n| oracle.program().name_of(n)) {
            segment = segment.exportable(name);
        }
        segment.called_client_apis = self.finder.client_api_calls(oracle, node);
        segment.accessed_captured_props = self.finder.captured_properties(oracle, node);
        segment.accessed_env_vars = env_var_reads(oracle, node);
        Ok(segment.with_children(children))
    }

    fn extract_call(
        &self,
        call: NodeId,
        callee: NodeId,
        arguments: &[NodeId],
        fillings: &Fillings,
    ) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let is_constructor = self.specials.contains(call, SpecialKind::Constructor);

        let mut children = Vec::new();
        let mut codes = Vec::new();
        for argument in arguments {
            let segment = self.extract_argument(*argument, is_constructor, fillings)?;
            codes.push(segment.code.clone());
            children.push(segment);
        }

        let callee_segment = self.extract(callee, fillings)?;
        let middle = if is_constructor { ".build_client" } else { "" };
        let code = format!("{}{}({})", callee_segment.code, middle, codes.join(", "));
        children.push(callee_segment);

        let mut segment = CodeSegment::new(call, code);
        if is_constructor {
            debug!("{}: constructor rewritten to build_client", oracle.position(call));
        } else {
            segment.called_client_apis = self.finder.client_api_calls(oracle, call);
            segment.accessed_captured_props = self.finder.captured_properties(oracle, call);
        }
        Ok(segment.with_children(children))
    }

    fn extract_argument(&self, argument: NodeId, is_constructor: bool, fillings: &Fillings) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let NodeKind::Argument { name, category, value } = oracle.kind(argument) else {
            return self.extract(argument, fillings);
        };
        let prefix = match (name.and_then(|n| oracle.program().name_of(n)), category) {
            (Some(label), _) => format!("{}=", label),
            (None, ArgumentCategory::UnpackedList) => "*".to_string(),
            (None, ArgumentCategory::UnpackedDictionary) => "**".to_string(),
            (None, ArgumentCategory::Simple) => String::new(),
        };

        if is_constructor {
            let is_function = matches!(oracle.kind(*value), NodeKind::Lambda { .. })
                || matches!(oracle.type_of(*value), Type::Function(_));
            if is_function {
                return Ok(CodeSegment::new(argument, format!("{}lambda _: _", prefix)));
            }
            // runs remotely against an existing resource; only the literal value travels
            let folded = self.values.evaluate(*value, fillings)?;
            let mut segment = CodeSegment::new(argument, format!("{}{}", prefix, folded.display(false)));
            self.add_folded(&mut segment, &folded)?;
            return Ok(segment);
        }

        let value_segment = self.extract(*value, fillings)?;
        let code = format!("{}{}", prefix, value_segment.code);
        Ok(CodeSegment::new(argument, code).with_children(vec![value_segment]))
    }

    fn extract_import(&self, node: NodeId) -> Result<CodeSegment> {
        let oracle = self.oracle;
        let program = oracle.program();
        let module = oracle.import_module_name(node).ok_or_else(|| {
            Error::oracle(
                oracle.position(node),
                format!("Cannot resolve the module imported by '{}'.", oracle.text(node)),
            )
        })?;
        let alias = |alias: &Option<NodeId>| {
            alias
                .and_then(|a| program.name_of(a))
                .map(|a| format!(" as {}", a))
                .unwrap_or_default()
        };
        let code = match oracle.kind(node) {
            NodeKind::ImportFromAs { name, alias: a } => format!("from {} import {}{}", module, name, alias(a)),
            NodeKind::ImportAs { alias: a, .. } => format!("import {}{}", module, alias(a)),
            other => {
                return Err(Error::unsupported(
                    oracle.position(node),
                    format!("Unsupported node type: {}", other.name()),
                ));
            }
        };
        Ok(CodeSegment::new(node, code))
    }

    /// Record what a folded value needs: its env reads and data class imports
    fn add_folded(&self, segment: &mut CodeSegment, value: &Value) -> Result<()> {
        segment.accessed_env_vars.extend(value.env_var_names());
        for type_name in value.data_class_types() {
            let Some((module, class)) = type_name.rsplit_once('.') else {
                return Err(Error::unsupported(
                    self.oracle.position(segment.node),
                    format!("The data class '{}' has no module.", type_name),
                ));
            };
            let import = CodeSegment::new(self.import_key(&type_name), format!("from {} import {}", module, class));
            segment.dependencies.push(import);
        }
        Ok(())
    }

    /// Stable id for a data class import: the class definition node when loaded
    fn import_key(&self, type_name: &str) -> NodeId {
        let program = self.oracle.program();
        let found = type_name.rsplit_once('.').and_then(|(module, class)| {
            let module = program.module_by_name(module)?;
            program.descendants(module.root()).into_iter().find(|n| match program.kind(*n) {
                NodeKind::Class { name, .. } => program.name_of(*name) == Some(class),
                _ => false,
            })
        });
        found.unwrap_or(NodeId(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::special::SpecialCallClassifier;
    use crate::testing;
    use crate::value::Filling;

    fn extract_text(source: &str, text: &str) -> Result<CodeSegment> {
        let oracle = testing::load(source);
        let specials = SpecialCallClassifier::new(&oracle).classify_program();
        let extractor = CodeExtractor::new(&oracle, &specials);
        extractor.extract(testing::node_with_text(&oracle, text), &Fillings::new())
    }

    fn lines(code: &str) -> Vec<&str> {
        code.lines().filter(|l| !l.trim().is_empty()).collect()
    }

    #[test]
    fn test_render_dependencies_first_once() {
        let shared = CodeSegment::new(NodeId(1), "a = 1").exportable("a");
        let mut left = CodeSegment::new(NodeId(2), "b = a + 1").exportable("b");
        left.dependencies.push(shared.clone());
        let mut root = CodeSegment::new(NodeId(3), "lambda: a + b");
        root.dependencies = vec![shared, left];

        assert_eq!(lines(&root.render(None)), vec!["a = 1", "b = a + 1", "lambda: a + b"]);
        assert_eq!(
            lines(&root.render(Some("_default"))),
            vec!["a = 1", "b = a + 1", "_default = lambda: a + b"]
        );

        let def = CodeSegment::new(NodeId(4), "def f():\n    pass").exportable("f");
        assert_eq!(lines(&def.render(Some("_default"))), vec!["def f():", "    pass", "_default = f"]);
    }

    #[test]
    fn test_render_skips_empty_pieces() {
        let mut name = CodeSegment::new(NodeId(1), "a");
        name.silent = true;
        let empty = CodeSegment::new(NodeId(2), "");
        let mut root = CodeSegment::new(NodeId(3), "lambda: a");
        root.dependencies = vec![name, empty];
        assert_eq!(root.render(Some("_default")), "_default = lambda: a");

        let segment = extract_text(
            concat!(
                "from pluto_client import Router\n",
                "router = Router(\"api\")\n",
                "def a():\n",
                "    return 1\n",
                "def b():\n",
                "    return a()\n",
                "router.get(\"/\", lambda r: b() + a())\n",
            ),
            "lambda r: b() + a()",
        )
        .unwrap();
        let code = segment.render(Some("_default"));
        assert!(!code.starts_with('\n'), "{:?}", code);
        assert!(!code.contains("\n\n"), "{:?}", code);
        assert_eq!(
            code,
            "def a():\n    return 1\ndef b():\n    return a()\n_default = lambda r: b() + a()"
        );
    }

    #[test]
    fn test_lambda_captures_outside_names() {
        let segment = extract_text(
            concat!(
                "import json\n",
                "from pluto_client import Router, KVStore\n",
                "store = KVStore(\"kv\")\n",
                "prefix = \"v\" + \"1\"\n",
                "router = Router(\"api\")\n",
                "router.get(\"/\", lambda req: json.dumps(store.get(prefix + req)))\n",
            ),
            "lambda req: json.dumps(store.get(prefix + req))",
        )
        .unwrap();
        let code = segment.render(Some("_default"));
        assert_eq!(
            lines(&code),
            vec![
                "import json",
                "from pluto_client import KVStore",
                "store = KVStore.build_client(\"kv\")",
                "prefix = \"v1\"",
                "_default = lambda req: json.dumps(store.get(prefix + req))",
            ]
        );
        assert_eq!(segment.called_client_apis().len(), 1);
        assert!(segment.accessed_captured_props().is_empty());
    }

    #[test]
    fn test_function_with_helpers_and_env() {
        let source = concat!(
            "import os\n",
            "from pluto_client import Router, Function\n",
            "router = Router(\"api\")\n",
            "def helper(x):\n",
            "    return x * 2\n",
            "def handler(req):\n",
            "    key = os.environ.get(\"TOKEN\", \"none\")\n",
            "    return helper(req) + router.url() + key\n",
            "fn = Function(handler)\n",
        );
        let oracle = testing::load(source);
        let specials = SpecialCallClassifier::new(&oracle).classify_program();
        let extractor = CodeExtractor::new(&oracle, &specials);
        let handler = testing::definition(&oracle, "handler");
        let segment = extractor.extract(handler_name(&oracle, handler), &Fillings::new()).unwrap();

        let code = segment.render(Some("_default"));
        let code_lines = lines(&code);
        assert_eq!(code_lines[0], "import os");
        assert!(code_lines.contains(&"router = Router.build_client(\"api\")"));
        assert!(code_lines.contains(&"def helper(x):"));
        assert_eq!(*code_lines.last().unwrap(), "_default = handler");
        // the helper precedes its user
        let helper_at = code_lines.iter().position(|l| *l == "def helper(x):").unwrap();
        let handler_at = code_lines.iter().position(|l| *l == "def handler(req):").unwrap();
        assert!(helper_at < handler_at);

        assert_eq!(segment.accessed_env_vars(), vec!["TOKEN".to_string()]);
        assert_eq!(segment.accessed_captured_props(), vec![testing::call_to(&oracle, "router.url")]);
    }

    fn handler_name(oracle: &dyn Oracle, def: NodeId) -> NodeId {
        // a reference to the function, as an argument would be
        let program = oracle.program();
        testing::find_nodes(oracle, |k| matches!(k, NodeKind::Name { value } if value == "handler"))
            .into_iter()
            .find(|n| program.parent(*n) != Some(def))
            .unwrap()
    }

    #[test]
    fn test_constructor_arguments_are_folded() {
        let segment = extract_text(
            concat!(
                "from pluto_client import Queue, QueueOptions, Function\n",
                "name = \"jobs\"\n",
                "queue = Queue(name, QueueOptions(fifo=True))\n",
                "fn = Function(lambda x: queue.push(x))\n",
            ),
            "lambda x: queue.push(x)",
        )
        .unwrap();
        let code = segment.render(None);
        assert!(code.contains("queue = Queue.build_client(\"jobs\", QueueOptions(fifo=True, retention=7))"));
        assert!(code.contains("from pluto_client import QueueOptions"));
        let import_at = code.find("from pluto_client import QueueOptions").unwrap();
        assert!(import_at < code.find("queue = Queue.build_client").unwrap());
    }

    #[test]
    fn test_function_arguments_of_constructors_become_stubs() {
        let segment = extract_text(
            concat!(
                "from pluto_client import Function\n",
                "fn = Function(lambda x: x, name=\"f\")\n",
                "g = lambda: fn.invoke(\"a\")\n",
            ),
            "lambda: fn.invoke(\"a\")",
        )
        .unwrap();
        assert!(segment.render(None).contains("fn = Function.build_client(lambda _: _, name=\"f\")"));
        assert_eq!(segment.called_client_apis().len(), 1);
    }

    #[test]
    fn test_tuple_assignment_rejected() {
        let err = extract_text("a, b = 1, 2\nf = lambda: a\n", "lambda: a").unwrap_err();
        assert!(err.to_string().contains("simplest assignment statement"));
    }

    #[test]
    fn test_multiple_declarations_rejected() {
        let err = extract_text("a = 1\na = 2\nf = lambda: a\n", "lambda: a").unwrap_err();
        assert!(err.to_string().contains("Multiple declarations found for symbol 'a'"));
    }

    #[test]
    fn test_recursive_function_is_cycle() {
        let oracle = testing::load("def f(n):\n    return f(n - 1)\ng = lambda: f(3)\n");
        let specials = SpecialCallClassifier::new(&oracle).classify_program();
        let extractor = CodeExtractor::new(&oracle, &specials);
        let lambda = testing::node_with_text(&oracle, "lambda: f(3)");
        let err = extractor.extract(lambda, &Fillings::new()).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn test_parameter_with_filling() {
        let oracle = testing::load(concat!(
            "from pluto_client import Router\n",
            "def attach(router: Router, greeting):\n",
            "    router.get(\"/\", lambda req: greeting + req)\n",
        ));
        let specials = SpecialCallClassifier::new(&oracle).classify_program();
        let extractor = CodeExtractor::new(&oracle, &specials);
        let lambda = testing::node_with_text(&oracle, "lambda req: greeting + req");
        let greeting = testing::find_nodes(&oracle, |k| matches!(k, NodeKind::Parameter { .. }))
            .into_iter()
            .find(|p| oracle.text(*p) == "greeting")
            .unwrap();

        let err = extractor.extract(lambda, &Fillings::new()).unwrap_err();
        assert!(err.to_string().contains("no value bound by the caller"));

        let mut fillings = Fillings::new();
        fillings.insert(greeting, Filling::Value(Value::str("hi ")));
        let segment = extractor.extract(lambda, &fillings).unwrap();
        assert_eq!(
            lines(&segment.render(None)),
            vec!["greeting = \"hi \"", "lambda req: greeting + req"]
        );
    }

    #[test]
    fn test_comprehension_targets_are_local() {
        let segment = extract_text(
            "items = [1, 2]\nf = lambda: [i * 2 for i in items if i]\n",
            "lambda: [i * 2 for i in items if i]",
        )
        .unwrap();
        assert_eq!(
            lines(&segment.render(None)),
            vec!["items = [1, 2]", "lambda: [i * 2 for i in items if i]"]
        );
    }

    #[test]
    fn test_class_members_are_not_dependencies() {
        let segment = extract_text(
            concat!(
                "LIMIT = 3\n",
                "class Counter:\n",
                "    step = 1\n",
                "    def bump(self, n):\n",
                "        return min(n + self.step, LIMIT)\n",
                "f = lambda: Counter().bump(1)\n",
            ),
            "lambda: Counter().bump(1)",
        )
        .unwrap();
        let code = segment.render(None);
        let code_lines = lines(&code);
        assert_eq!(code_lines[0], "LIMIT = 3");
        assert_eq!(code_lines[1], "class Counter:");
        assert_eq!(code_lines.len(), 6);
    }
}
