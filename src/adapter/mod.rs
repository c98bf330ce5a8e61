//! Language Adapter
//!
//! Python is the only source language. The adapter parses files with
//! Tree-sitter and lowers them into the arena AST; the loader follows imports
//! so that every module reachable from the entry point ends up in one
//! [`Program`].

pub mod python;

pub use python::PythonAdapter;

use crate::ast::{NodeKind, Program};
use crate::{NodeId, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads an entry module and every importable module it depends on
pub struct ProgramLoader {
    adapter: PythonAdapter,
    search_paths: Vec<PathBuf>,
    program: Program,
    loaded: HashSet<String>,
}

impl ProgramLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Result<Self> {
        Ok(Self {
            adapter: PythonAdapter::new()?,
            search_paths,
            program: Program::new(),
            loaded: HashSet::new(),
        })
    }

    /// Add an in-memory module, then load whatever it imports from disk
    pub fn add_source(&mut self, name: &str, path: impl AsRef<Path>, source: &str) -> Result<NodeId> {
        let root = self
            .adapter
            .parse_module(&mut self.program, name, path.as_ref(), source)?;
        self.loaded.insert(name.to_string());
        self.follow_imports(root)?;
        Ok(root)
    }

    /// Load the entry file; its directory becomes the first search path
    pub fn load_entry(&mut self, path: &Path) -> Result<NodeId> {
        if let Some(dir) = path.parent() {
            let dir = if dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                dir.to_path_buf()
            };
            if !self.search_paths.contains(&dir) {
                self.search_paths.insert(0, dir);
            }
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "__main__".to_string());
        let source = std::fs::read_to_string(path)?;
        self.add_source(&name, path, &source)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn finish(self) -> Program {
        self.program
    }

    fn follow_imports(&mut self, root: NodeId) -> Result<()> {
        for wanted in self.imported_modules(root) {
            // `a.b.c` needs `a` and `a.b` first
            let parts: Vec<&str> = wanted.split('.').collect();
            for end in 1..=parts.len() {
                let name = parts[..end].join(".");
                self.load_module(&name)?;
            }
        }
        Ok(())
    }

    /// Absolute names of every module the module rooted at `root` may import
    fn imported_modules(&self, root: NodeId) -> Vec<String> {
        let module = self.program.module_of(root);
        let mut wanted = Vec::new();
        for id in self.program.descendants(root) {
            match self.program.kind(id) {
                NodeKind::ImportAs { module: parts, .. } => wanted.push(parts.join(".")),
                NodeKind::ImportFrom { module: spec, names, .. } => {
                    let Some(base) = module.absolute_import(spec) else {
                        continue;
                    };
                    for name in names {
                        if let NodeKind::ImportFromAs { name, .. } = self.program.kind(*name) {
                            // `from pkg import sub` may name a submodule
                            wanted.push(format!("{}.{}", base, name));
                        }
                    }
                    wanted.push(base);
                }
                _ => {}
            }
        }
        wanted
    }

    fn load_module(&mut self, name: &str) -> Result<()> {
        if self.loaded.contains(name) {
            return Ok(());
        }
        self.loaded.insert(name.to_string());

        let Some(path) = self.find_module(name) else {
            debug!("Module '{}' not found on the search paths", name);
            return Ok(());
        };

        debug!("Loading module '{}' from {}", name, path.display());
        let source = std::fs::read_to_string(&path)?;
        let root = self
            .adapter
            .parse_module(&mut self.program, name, &path, &source)?;
        self.follow_imports(root)
    }

    fn find_module(&self, name: &str) -> Option<PathBuf> {
        let relative: PathBuf = name.split('.').collect();
        self.search_paths.iter().find_map(|base| {
            let package = base.join(&relative).join("__init__.py");
            if package.is_file() {
                return Some(package);
            }
            let file = base.join(&relative).with_extension("py");
            file.is_file().then_some(file)
        })
    }
}
