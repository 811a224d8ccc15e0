// Vesper Virtual Machine Module
// Runtime values, natives, frames, execution and snapshots

mod frame;
pub mod natives;
mod state;
pub mod value;
#[allow(clippy::module_inception)]
mod vm;

#[cfg(test)]
mod tests;

pub use frame::Frame;
pub use state::{FrameState, ValueView, VmState};
pub use value::{
    BoundMethod, Cell, Closure, CompiledClass, CompiledFunction, Instance, NativeFunction, Value,
};
pub use vm::{StepHook, Vm, VmConfig, DEFAULT_MAX_FRAMES, DEFAULT_STACK_SIZE};
