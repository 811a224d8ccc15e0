// Vesper Programming Language
// Bytecode compiler, stack VM and time-travel debugger for a small class-based scripting language

pub mod ast;
pub mod compiler;
pub mod debugger;
pub mod error;
pub mod vm;

pub use compiler::{CompiledProgram, Compiler};
pub use debugger::Controller;
pub use error::{ErrorKind, VesperError, VesperResult};
pub use vm::{Value, Vm, VmConfig, VmState};
