// Vesper Loop Control Stack
// Pending break/continue jump sites per enclosing loop

#[derive(Debug, Default)]
pub struct LoopContext {
    /// Known up front for `while`; set once the increment is reached for `for`
    pub continue_target: Option<usize>,
    pub breaks: Vec<usize>,
    pub continues: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct LoopStack {
    loops: Vec<LoopContext>,
}

impl LoopStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, continue_target: Option<usize>) {
        self.loops.push(LoopContext {
            continue_target,
            ..Default::default()
        });
    }

    pub fn pop(&mut self) -> Option<LoopContext> {
        self.loops.pop()
    }

    pub fn current(&mut self) -> Option<&mut LoopContext> {
        self.loops.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}
