// Vesper Symbol Resolution
// Maps identifiers to global, local, free, native or self-reference access

use crate::vm::natives;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Native,
    /// A function's own name inside its body
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    pub is_const: bool,
}

/// Symbols of one function-compilation context (or of a module body)
#[derive(Debug)]
pub struct SymbolTable {
    /// Innermost block last
    blocks: Vec<FxHashMap<String, Symbol>>,
    /// Symbols captured from the enclosing context, in capture order,
    /// as seen from that enclosing context
    pub free_symbols: Vec<Symbol>,
    num_definitions: usize,
    function_name: Option<String>,
    is_global: bool,
}

impl SymbolTable {
    pub fn new_global() -> Self {
        Self {
            blocks: vec![FxHashMap::default()],
            free_symbols: Vec::new(),
            num_definitions: 0,
            function_name: None,
            is_global: true,
        }
    }

    pub fn new_function(function_name: Option<String>) -> Self {
        Self {
            is_global: false,
            function_name,
            ..Self::new_global()
        }
    }

    /// Allocate a fresh slot. Slots are never reused within one table,
    /// so a closure never aliases a slot from a finished block.
    pub fn define(&mut self, name: &str, is_const: bool) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: if self.is_global {
                SymbolScope::Global
            } else {
                SymbolScope::Local
            },
            index: self.num_definitions,
            is_const,
        };
        self.num_definitions += 1;
        self.insert(symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
            is_const: original.is_const,
        };
        if let Some(function_block) = self.blocks.first_mut() {
            function_block.insert(symbol.name.clone(), symbol.clone());
        }
        symbol
    }

    fn insert(&mut self, symbol: Symbol) {
        if let Some(block) = self.blocks.last_mut() {
            block.insert(symbol.name.clone(), symbol);
        }
    }

    pub fn enter_block(&mut self) {
        self.blocks.push(FxHashMap::default());
    }

    pub fn leave_block(&mut self) {
        if self.blocks.len() > 1 {
            self.blocks.pop();
        }
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.blocks.iter().rev().find_map(|block| block.get(name))
    }

    /// Whether `name` was declared (not captured) in the innermost block
    pub fn declared_in_current_block(&self, name: &str) -> bool {
        self.blocks
            .last()
            .and_then(|block| block.get(name))
            .is_some_and(|s| matches!(s.scope, SymbolScope::Local | SymbolScope::Global))
    }

    /// No block is open inside this table
    pub fn is_top_level(&self) -> bool {
        self.blocks.len() == 1
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    pub fn is_global(&self) -> bool {
        self.is_global
    }
}

/// An import alias bound in the module being compiled
#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub module: usize,
    /// Export name -> export index
    pub exports: FxHashMap<String, usize>,
}

/// Stack of symbol tables, outermost (module) first
#[derive(Debug)]
pub struct SymbolStack {
    tables: Vec<SymbolTable>,
    imports: FxHashMap<String, ImportBinding>,
}

impl Default for SymbolStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolStack {
    pub fn new() -> Self {
        Self {
            tables: vec![SymbolTable::new_global()],
            imports: FxHashMap::default(),
        }
    }

    pub fn current(&self) -> &SymbolTable {
        // The module table is never popped
        &self.tables[self.tables.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut SymbolTable {
        let top = self.tables.len() - 1;
        &mut self.tables[top]
    }

    pub fn depth(&self) -> usize {
        self.tables.len() - 1
    }

    pub fn push_function(&mut self, name: Option<String>) {
        self.tables.push(SymbolTable::new_function(name));
    }

    pub fn pop_function(&mut self) -> Option<SymbolTable> {
        if self.tables.len() > 1 {
            self.tables.pop()
        } else {
            None
        }
    }

    pub fn define(&mut self, name: &str, is_const: bool) -> Symbol {
        self.current_mut().define(name, is_const)
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        let top = self.tables.len() - 1;
        self.resolve_at(top, name)
    }

    fn resolve_at(&mut self, level: usize, name: &str) -> Option<Symbol> {
        let table = &self.tables[level];
        if let Some(symbol) = table.lookup(name) {
            return Some(symbol.clone());
        }
        if table.function_name.as_deref() == Some(name) {
            return Some(Symbol {
                name: name.to_string(),
                scope: SymbolScope::Function,
                index: 0,
                is_const: true,
            });
        }
        if level == 0 {
            return natives::lookup(name).map(|index| Symbol {
                name: name.to_string(),
                scope: SymbolScope::Native,
                index,
                is_const: true,
            });
        }

        let outer = self.resolve_at(level - 1, name)?;
        match outer.scope {
            SymbolScope::Global | SymbolScope::Native => Some(outer),
            _ => Some(self.tables[level].define_free(outer)),
        }
    }

    pub fn define_import(&mut self, alias: &str, binding: ImportBinding) {
        self.imports.insert(alias.to_string(), binding);
    }

    pub fn is_import(&self, name: &str) -> bool {
        self.imports.contains_key(name)
    }

    /// (module index, export index) for `alias.name`
    pub fn resolve_import(&self, alias: &str, name: &str) -> Option<(usize, usize)> {
        let binding = self.imports.get(alias)?;
        binding
            .exports
            .get(name)
            .map(|export| (binding.module, *export))
    }
}
