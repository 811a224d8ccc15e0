// Vesper Call Frames

use super::value::{Closure, CompiledFunction};
use std::sync::Arc;

/// One function, method or module activation
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Arc<Closure>,
    pub ip: usize,
    /// Stack index of local slot 0
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Arc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    pub fn function(&self) -> &CompiledFunction {
        &self.closure.function
    }

    pub fn instructions(&self) -> &[u8] {
        &self.closure.function.instructions
    }

    /// Offset of the instruction being executed, once `ip` has moved past it
    pub fn last_offset(&self) -> usize {
        self.ip.saturating_sub(1)
    }
}
