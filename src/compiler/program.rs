// Vesper Compiled Program
// Output of the compiler and input of the VM

use crate::vm::Value;

/// Source location table for one function or module body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugEntry {
    pub file: String,
    /// Source line of each instruction byte
    pub lines: Vec<usize>,
}

impl DebugEntry {
    pub fn line_at(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }
}

/// One compiled source file
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    pub instructions: Vec<u8>,
    pub num_globals: usize,
    /// Export index -> global slot
    pub exports: Vec<usize>,
    /// Export names, parallel to `exports`
    pub export_names: Vec<String>,
    pub debug: usize,
}

impl CompiledModule {
    pub fn export_index(&self, name: &str) -> Option<usize> {
        self.export_names.iter().position(|n| n == name)
    }
}

/// Modules in dependency order over one shared constant pool
#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    pub modules: Vec<CompiledModule>,
    pub constants: Vec<Value>,
    pub debug_info: Vec<DebugEntry>,
}

impl CompiledProgram {
    pub fn debug_entry(&self, index: usize) -> Option<&DebugEntry> {
        self.debug_info.get(index)
    }
}
