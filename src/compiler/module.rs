// Vesper Module Loading
// Discovers the import graph of an entry file and orders it for compilation

use crate::ast::Module;
use crate::error::{Span, VesperError, VesperResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};

/// Supplies parsed modules by absolute path
pub trait ModuleSource {
    fn load(&mut self, path: &Path) -> VesperResult<Module>;
}

/// Modules held in memory, keyed by normalized absolute path
#[derive(Debug, Default)]
pub struct MemorySource {
    modules: FxHashMap<PathBuf, Module>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, module: Module) {
        self.modules.insert(absolutize(path.as_ref()), module);
    }

    pub fn with(mut self, path: impl AsRef<Path>, module: Module) -> Self {
        self.insert(path, module);
        self
    }
}

impl ModuleSource for MemorySource {
    fn load(&mut self, path: &Path) -> VesperResult<Module> {
        self.modules.get(path).cloned().ok_or_else(|| {
            VesperError::import_error(
                format!("cannot find module {}", path.display()),
                Span::default(),
            )
        })
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, normalized form of `path`
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(_) => normalize_path(path),
    }
}

/// Resolve an import relative to the importing file's directory
pub fn resolve_module_path(importer: &Path, import: &str) -> PathBuf {
    let base = importer.parent().unwrap_or_else(|| Path::new(""));
    absolutize(&base.join(import))
}

/// A parsed module and its resolved imports
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub path: PathBuf,
    pub ast: Module,
    /// Resolved path of each import, parallel to `ast.imports`
    pub imports: Vec<PathBuf>,
}

/// Every module reachable from an entry file, each loaded once
#[derive(Debug, Default)]
pub struct ModuleGraph {
    pub modules: Vec<LoadedModule>,
    index: FxHashMap<PathBuf, usize>,
}

impl ModuleGraph {
    pub fn load(entry: &Path, source: &mut dyn ModuleSource) -> VesperResult<Self> {
        let mut graph = Self::default();
        let mut loading = Vec::new();
        graph.visit(absolutize(entry), source, &mut loading, Span::default())?;
        Ok(graph)
    }

    fn visit(
        &mut self,
        path: PathBuf,
        source: &mut dyn ModuleSource,
        loading: &mut Vec<PathBuf>,
        span: Span,
    ) -> VesperResult<()> {
        if let Some(start) = loading.iter().position(|p| *p == path) {
            let chain: Vec<String> = loading[start..]
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| p.display().to_string())
                .collect();
            let importer = loading.last().map(|p| p.display().to_string());
            let err = VesperError::import_error(
                format!("circular dependency detected: {}", chain.join(" -> ")),
                span,
            );
            return Err(match importer {
                Some(file) => err.with_file(file),
                None => err,
            });
        }
        if self.index.contains_key(&path) {
            return Ok(());
        }

        let ast = source.load(&path).map_err(|err| {
            let err = err.with_span(span);
            match loading.last() {
                Some(importer) => err.with_file(importer.display().to_string()),
                None => err,
            }
        })?;
        tracing::debug!(path = %path.display(), imports = ast.imports.len(), "loaded module");

        let imports: Vec<PathBuf> = ast
            .imports
            .iter()
            .map(|decl| resolve_module_path(&path, &decl.path))
            .collect();

        loading.push(path.clone());
        for (decl, dep) in ast.imports.iter().zip(&imports) {
            self.visit(dep.clone(), source, loading, decl.span)?;
        }
        loading.pop();

        self.index.insert(path.clone(), self.modules.len());
        self.modules.push(LoadedModule { path, ast, imports });
        Ok(())
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Dependencies before dependents; ties keep load order
    pub fn topological_order(&self) -> VesperResult<Vec<usize>> {
        let count = self.modules.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (idx, module) in self.modules.iter().enumerate() {
            let deps: FxHashSet<usize> = module
                .imports
                .iter()
                .filter_map(|p| self.index_of(p))
                .collect();
            in_degree[idx] = deps.len();
            for dep in deps {
                dependents[dep].push(idx);
            }
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|i| in_degree[*i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            let mut ready = Vec::new();
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        if order.len() != count {
            return Err(VesperError::import_error(
                "circular dependency detected",
                Span::default(),
            ));
        }
        tracing::debug!(
            order = ?order
                .iter()
                .map(|i| self.modules[*i].path.display().to_string())
                .collect::<Vec<_>>(),
            "module order"
        );
        Ok(order)
    }
}
