// Vesper VM Snapshots
// Owned copies of VM state, safe to keep after the VM moves on

use super::frame::Frame;
use super::value::Value;
use super::vm::Vm;
use crate::compiler::opcode::Instruction;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owned, comparable rendering of a runtime value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ValueView {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<ValueView>),
    Hash(BTreeMap<String, ValueView>),
    Function {
        name: String,
        num_params: usize,
        num_locals: usize,
    },
    Closure {
        name: String,
        free: Vec<ValueView>,
    },
    Cell(Box<ValueView>),
    Class {
        name: String,
        superclass: Option<String>,
        methods: Vec<String>,
    },
    Instance {
        class: String,
        fields: BTreeMap<String, ValueView>,
    },
    BoundMethod {
        method: String,
        receiver: String,
    },
    Native(String),
    /// A container reached again while it was being rendered
    Cycle,
}

impl ValueView {
    /// Containers stay locked while their children render, so meeting
    /// one again fails `try_lock` and yields `Cycle`
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Nil => ValueView::Nil,
            Value::Boolean(b) => ValueView::Boolean(*b),
            Value::Number(n) => ValueView::Number(*n),
            Value::String(s) => ValueView::String(s.to_string()),
            Value::Array(items) => match items.try_lock() {
                Some(items) => ValueView::Array(items.iter().map(ValueView::of).collect()),
                None => ValueView::Cycle,
            },
            Value::Hash(map) => match map.try_lock() {
                Some(map) => ValueView::Hash(
                    map.iter()
                        .map(|(k, v)| (k.clone(), ValueView::of(v)))
                        .collect(),
                ),
                None => ValueView::Cycle,
            },
            Value::Function(function) => ValueView::Function {
                name: function.display_name().to_string(),
                num_params: function.num_params,
                num_locals: function.num_locals,
            },
            Value::Closure(closure) => ValueView::Closure {
                name: closure.function.display_name().to_string(),
                free: closure
                    .free
                    .iter()
                    .map(|cell| match cell.try_lock() {
                        Some(inner) => ValueView::Cell(Box::new(ValueView::of(&inner))),
                        None => ValueView::Cycle,
                    })
                    .collect(),
            },
            Value::Cell(cell) => match cell.try_lock() {
                Some(inner) => ValueView::Cell(Box::new(ValueView::of(&inner))),
                None => ValueView::Cycle,
            },
            Value::Class(class) => {
                let mut methods: Vec<String> = class.methods.keys().cloned().collect();
                methods.sort();
                ValueView::Class {
                    name: class.name.clone(),
                    superclass: class.superclass.as_ref().map(|s| s.name.clone()),
                    methods,
                }
            }
            Value::Instance(instance) => match instance.try_lock() {
                Some(instance) => ValueView::Instance {
                    class: instance.class.name.clone(),
                    fields: instance
                        .fields
                        .iter()
                        .map(|(k, v)| (k.clone(), ValueView::of(v)))
                        .collect(),
                },
                None => ValueView::Cycle,
            },
            Value::BoundMethod(bound) => ValueView::BoundMethod {
                method: bound.method.function.display_name().to_string(),
                receiver: bound
                    .receiver
                    .try_lock()
                    .map(|r| r.class.name.clone())
                    .unwrap_or_default(),
            },
            Value::Native(native) => ValueView::Native(native.name.to_string()),
        }
    }
}

impl From<&Value> for ValueView {
    fn from(value: &Value) -> Self {
        ValueView::of(value)
    }
}

/// One activation as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameState {
    pub function: String,
    pub module: usize,
    pub ip: usize,
    pub line: usize,
    pub base_pointer: usize,
    pub num_params: usize,
    pub num_locals: usize,
    pub locals: Vec<ValueView>,
    pub free: Vec<ValueView>,
}

/// Everything a debugger shows for one point of execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmState {
    /// Instruction pointer of the innermost frame
    pub ip: usize,
    /// Instruction about to execute, if any
    pub instruction: Option<Instruction>,
    pub file: String,
    pub line: usize,
    pub stack: Vec<ValueView>,
    /// Outermost frame first
    pub frames: Vec<FrameState>,
    pub current_module: usize,
    pub num_modules: usize,
    pub globals: Vec<Vec<ValueView>>,
    pub constants: Arc<Vec<ValueView>>,
    pub output: Vec<String>,
    pub finished: bool,
}

impl VmState {
    pub fn module_globals(&self, index: usize) -> Option<&[ValueView]> {
        self.globals.get(index).map(Vec::as_slice)
    }
}

impl Vm {
    /// Snapshot of the VM as it stands
    pub fn state(&self) -> VmState {
        let constants = self
            .constant_views
            .get_or_init(|| Arc::new(self.program.constants.iter().map(ValueView::of).collect()))
            .clone();

        let (ip, instruction, file, line) = match self.frames.last() {
            Some(frame) => {
                let (file, _) = self.position_of(frame);
                let line = self
                    .program
                    .debug_entry(frame.function().debug)
                    .map(|entry| entry.line_at(frame.ip))
                    .unwrap_or(0);
                (
                    frame.ip,
                    Instruction::decode(frame.instructions(), frame.ip),
                    file,
                    line,
                )
            }
            None => (0, None, String::new(), 0),
        };

        VmState {
            ip,
            instruction,
            file,
            line,
            stack: self.stack.iter().map(ValueView::of).collect(),
            frames: self.frames.iter().map(|f| self.frame_state(f)).collect(),
            current_module: self.current_module,
            num_modules: self.modules.len(),
            globals: self
                .modules
                .iter()
                .map(|m| m.globals.iter().map(ValueView::of).collect())
                .collect(),
            constants,
            output: self.output.clone(),
            finished: self.finished,
        }
    }

    fn frame_state(&self, frame: &Frame) -> FrameState {
        let function = frame.function();
        let start = frame.base_pointer.min(self.stack.len());
        let end = (frame.base_pointer + function.num_locals).min(self.stack.len());
        let line = self
            .program
            .debug_entry(function.debug)
            .map(|entry| entry.line_at(frame.ip))
            .unwrap_or(0);

        FrameState {
            function: function.display_name().to_string(),
            module: function.module,
            ip: frame.ip,
            line,
            base_pointer: frame.base_pointer,
            num_params: function.num_params,
            num_locals: function.num_locals,
            locals: self.stack[start..end].iter().map(ValueView::of).collect(),
            free: frame
                .closure
                .free
                .iter()
                .map(|cell| match cell.try_lock() {
                    Some(inner) => ValueView::of(&inner),
                    None => ValueView::Cycle,
                })
                .collect(),
        }
    }
}
