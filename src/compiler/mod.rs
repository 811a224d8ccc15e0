// Vesper Compiler Module
// AST to bytecode, module graph loading, and diagnostics

pub mod chunk;
#[allow(clippy::module_inception)]
mod compiler;
pub mod diagnostics;
mod loop_stack;
pub mod module;
pub mod opcode;
pub mod program;
pub mod symbol_table;


pub use compiler::Compiler;
pub use diagnostics::{
    Diagnostic, DiagnosticCollector, DiagnosticHandler, Severity, TracingDiagnostics,
};
pub use module::{MemorySource, ModuleSource};
pub use opcode::{disassemble, Instruction, OpCode};
pub use program::{CompiledModule, CompiledProgram, DebugEntry};
