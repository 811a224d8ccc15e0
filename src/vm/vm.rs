// Vesper Virtual Machine
// Stack-based VM executing a compiled program one module at a time
// Each module runs from its own main closure over its own globals

use super::frame::Frame;
use super::natives;
use super::state::ValueView;
use super::value::{
    BoundMethod, Cell, Closure, CompiledClass, CompiledFunction, Instance, NativeFunction, Value,
};
use crate::compiler::opcode::{read_operands, OpCode};
use crate::compiler::CompiledProgram;
use crate::error::{ErrorKind, Span, StackFrame, VesperError, VesperResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};

pub const DEFAULT_MAX_FRAMES: usize = 1024;
pub const DEFAULT_STACK_SIZE: usize = 2048 * 16;

/// Resource limits of one VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub max_frames: usize,
    pub stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl VmConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Called before every instruction; `Break` halts the run
pub type StepHook = Box<dyn FnMut(&Vm) -> ControlFlow<()> + Send>;

/// Runtime state of one compiled module
pub(super) struct ModuleInstance {
    pub(super) globals: Vec<Value>,
    pub(super) main: Arc<Closure>,
}

/// The Vesper Virtual Machine
pub struct Vm {
    pub(super) program: Arc<CompiledProgram>,
    config: VmConfig,
    pub(super) modules: Vec<ModuleInstance>,
    pub(super) stack: Vec<Value>,
    pub(super) frames: Vec<Frame>,
    pub(super) current_module: usize,
    pub(super) output: Vec<String>,
    pub(super) finished: bool,
    /// Constants never change, so their views are built once
    pub(super) constant_views: OnceLock<Arc<Vec<ValueView>>>,
    last_popped: Value,
    on_step: Option<StepHook>,
}

impl Vm {
    pub fn new(program: impl Into<Arc<CompiledProgram>>) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: impl Into<Arc<CompiledProgram>>, config: VmConfig) -> Self {
        let program = program.into();
        let modules = program
            .modules
            .iter()
            .enumerate()
            .map(|(index, module)| {
                let main = CompiledFunction {
                    instructions: module.instructions.clone(),
                    num_locals: 0,
                    num_params: 0,
                    name: Some("<module>".to_string()),
                    module: index,
                    debug: module.debug,
                };
                ModuleInstance {
                    globals: vec![Value::Nil; module.num_globals],
                    main: Arc::new(Closure::new(Arc::new(main), Vec::new())),
                }
            })
            .collect();

        Self {
            program,
            config,
            modules,
            stack: Vec::new(),
            frames: Vec::new(),
            current_module: 0,
            output: Vec::new(),
            finished: false,
            constant_views: OnceLock::new(),
            last_popped: Value::Nil,
            on_step: None,
        }
    }

    pub fn set_on_step<F>(&mut self, hook: F)
    where
        F: FnMut(&Vm) -> ControlFlow<()> + Send + 'static,
    {
        self.on_step = Some(Box::new(hook));
    }

    pub fn clear_on_step(&mut self) {
        self.on_step = None;
    }

    pub fn program(&self) -> &Arc<CompiledProgram> {
        &self.program
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn module_globals(&self, index: usize) -> Option<&[Value]> {
        self.modules.get(index).map(|m| m.globals.as_slice())
    }

    /// Value removed by the most recent `OpPop`
    pub fn last_popped(&self) -> &Value {
        &self.last_popped
    }

    /// Display strings of every `print`, in order
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run every module in dependency order. On a fault the stack and frames
    /// are left as they were at the failing instruction.
    pub fn run_program(&mut self) -> VesperResult<()> {
        self.finished = false;
        self.output.clear();
        self.last_popped = Value::Nil;
        for module in &mut self.modules {
            module.globals.fill(Value::Nil);
        }

        let result = self.run_modules();
        self.finished = true;
        result
    }

    fn run_modules(&mut self) -> VesperResult<()> {
        for index in 0..self.modules.len() {
            self.current_module = index;
            self.stack.clear();
            self.frames.clear();
            let main = self.modules[index].main.clone();
            self.frames.push(Frame::new(main, 0));

            tracing::debug!(module = index, "running module");
            self.execute()?;
        }
        Ok(())
    }

    fn execute(&mut self) -> VesperResult<()> {
        loop {
            let Some(frame) = self.frames.last() else {
                return Ok(());
            };
            if frame.ip >= frame.instructions().len() {
                if self.frames.len() == 1 {
                    // Module bodies end by running off their last instruction
                    self.frames.pop();
                    return Ok(());
                }
                self.return_from_frame(Value::Nil)?;
                continue;
            }

            if let Some(mut hook) = self.on_step.take() {
                let flow = hook(self);
                self.on_step = Some(hook);
                if flow.is_break() {
                    return Err(self.error(ErrorKind::Halted, "execution halted"));
                }
            }

            self.step()?;
        }
    }

    /// Decode and run the instruction at the current frame's ip
    fn step(&mut self) -> VesperResult<()> {
        let (op, operands) = {
            let frame = self.frame()?;
            let code = frame.instructions();
            let offset = frame.ip;
            let op = OpCode::try_from(code[offset])
                .map_err(|byte| {
                    self.error(ErrorKind::RuntimeError, format!("unknown opcode {}", byte))
                })?;
            let operands = read_operands(op, code, offset + 1)
                .ok_or_else(|| self.error(ErrorKind::RuntimeError, "truncated instruction"))?;
            tracing::trace!(offset, op = op.name(), depth = self.frames.len(), "execute");
            (op, operands)
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.ip += 1 + op.operand_bytes();
        }
        let a = operands.first().copied().unwrap_or(0);
        let b = operands.get(1).copied().unwrap_or(0);

        match op {
            OpCode::Constant => {
                let value = self
                    .program
                    .constants
                    .get(a)
                    .cloned()
                    .ok_or_else(|| {
                        self.error(ErrorKind::RuntimeError, format!("constant {} out of range", a))
                    })?;
                self.push(value)?;
            }
            OpCode::Nil => self.push(Value::Nil)?,
            OpCode::True => self.push(Value::Boolean(true))?,
            OpCode::False => self.push(Value::Boolean(false))?,
            OpCode::Pop => {
                self.last_popped = self.pop()?;
            }
            OpCode::Dup => {
                let top = self.peek()?.clone();
                self.push(top)?;
            }

            OpCode::Add => self.add()?,
            OpCode::Sub => self.arithmetic("-", |x, y| x - y)?,
            OpCode::Mul => self.arithmetic("*", |x, y| x * y)?,
            OpCode::Div => self.arithmetic("/", |x, y| x / y)?,
            OpCode::Mod => self.arithmetic("%", |x, y| x % y)?,
            OpCode::Negate => {
                let value = self.pop()?;
                match value {
                    Value::Number(n) => self.push(Value::Number(-n))?,
                    other => {
                        return Err(self.error(
                            ErrorKind::TypeError,
                            format!("unsupported operand type for -: {}", other.type_name()),
                        ))
                    }
                }
            }
            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Boolean(!value.is_truthy()))?;
            }
            OpCode::Equal => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(Value::Boolean(left == right))?;
            }
            OpCode::NotEqual => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(Value::Boolean(left != right))?;
            }
            OpCode::Greater => self.compare(">", Ordering::is_gt)?,
            OpCode::Less => self.compare("<", Ordering::is_lt)?,

            OpCode::Jump => self.jump(a)?,
            OpCode::JumpIfFalse => {
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    self.jump(a)?;
                }
            }

            OpCode::GetGlobal => {
                let module = self.frame()?.function().module;
                let value = self
                    .modules
                    .get(module)
                    .and_then(|m| m.globals.get(a))
                    .cloned()
                    .ok_or_else(|| {
                        self.error(ErrorKind::RuntimeError, format!("global {} out of range", a))
                    })?;
                self.push(value)?;
            }
            OpCode::SetGlobal => {
                let value = self.pop()?;
                let module = self.frame()?.function().module;
                match self.modules.get_mut(module).and_then(|m| m.globals.get_mut(a)) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(self.error(
                            ErrorKind::RuntimeError,
                            format!("global {} out of range", a),
                        ))
                    }
                }
            }
            OpCode::GetLocal => {
                let slot = self.local_slot(a)?;
                let value = self.stack[slot].clone().unwrap_cell();
                self.push(value)?;
            }
            OpCode::SetLocal => {
                let value = self.pop()?;
                let slot = self.local_slot(a)?;
                if let Value::Cell(cell) = &self.stack[slot] {
                    cell.set(value);
                } else {
                    self.stack[slot] = value;
                }
            }
            OpCode::GetFree => {
                let cell = self.free_cell(a)?;
                self.push(cell.get())?;
            }
            OpCode::SetFree => {
                let value = self.pop()?;
                self.free_cell(a)?.set(value);
            }
            OpCode::MakeCell => {
                let slot = self.local_slot(a)?;
                let existing = match &self.stack[slot] {
                    Value::Cell(cell) => Some(cell.clone()),
                    _ => None,
                };
                let cell = match existing {
                    Some(cell) => cell,
                    None => {
                        let value = std::mem::take(&mut self.stack[slot]);
                        let cell = Arc::new(Cell::new(value));
                        self.stack[slot] = Value::Cell(cell.clone());
                        cell
                    }
                };
                self.push(Value::Cell(cell))?;
            }
            OpCode::GetFreeCell => {
                let cell = self.free_cell(a)?;
                self.push(Value::Cell(cell))?;
            }
            OpCode::CurrentClosure => {
                let closure = self.frame()?.closure.clone();
                self.push(Value::Closure(closure))?;
            }
            OpCode::GetNative => {
                let native = natives::get(a)
                    .ok_or_else(|| {
                        self.error(ErrorKind::RuntimeError, format!("native {} out of range", a))
                    })?;
                self.push(Value::Native(native))?;
            }
            OpCode::Closure => self.make_closure(a, b)?,

            OpCode::Call => self.call_value(a)?,
            OpCode::ReturnValue => {
                let value = self.pop()?;
                self.return_from_frame(value)?;
            }
            OpCode::Return => self.return_from_frame(Value::Nil)?,

            OpCode::Array => {
                let items = self.pop_n(a)?;
                self.push(Value::array(items))?;
            }
            OpCode::Hash => self.make_hash(a)?,
            OpCode::Index => self.index()?,
            OpCode::SetIndex => self.set_index()?,

            OpCode::Class => self.make_class(a, b)?,
            OpCode::GetProperty => self.get_property(a)?,
            OpCode::SetProperty => {
                let name = self.string_constant(a)?;
                let value = self.pop()?;
                let object = self.pop()?;
                match &object {
                    Value::Instance(instance) => {
                        instance.lock().fields.insert(name.to_string(), value.clone());
                    }
                    other => {
                        return Err(self.error(
                            ErrorKind::TypeError,
                            format!("only instances have properties, got {}", other.type_name()),
                        ))
                    }
                }
                self.push(value)?;
            }
            OpCode::GetSuper => self.get_super(a)?,
            OpCode::GetExport => {
                let slot = self
                    .program
                    .modules
                    .get(a)
                    .and_then(|m| m.exports.get(b))
                    .copied();
                let value = slot
                    .and_then(|slot| self.modules.get(a).and_then(|m| m.globals.get(slot)))
                    .cloned()
                    .ok_or_else(|| {
                        self.error(
                            ErrorKind::RuntimeError,
                            format!("export {} of module {} out of range", b, a),
                        )
                    })?;
                self.push(value)?;
            }

            OpCode::Print => {
                let value = self.pop()?;
                self.output.push(value.to_string());
            }
        }
        Ok(())
    }

    // ==================== Calls ====================

    fn call_value(&mut self, argc: usize) -> VesperResult<()> {
        let callee_idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| self.underflow())?;
        let callee = self.stack[callee_idx].clone();

        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::BoundMethod(bound) => {
                let want = bound.method.function.num_params.saturating_sub(1);
                if argc != want {
                    return Err(self.wrong_arity(want, argc));
                }
                self.stack
                    .insert(callee_idx + 1, Value::Instance(bound.receiver.clone()));
                self.call_closure(bound.method.clone(), argc + 1)
            }
            Value::Class(class) => self.instantiate(class, callee_idx, argc),
            Value::Native(native) => self.call_native(native, callee_idx, argc),
            other => Err(self.error(
                ErrorKind::TypeError,
                format!("cannot call {}", other.type_name()),
            )),
        }
    }

    /// Push a frame over the `argc` values on top of the stack
    fn call_closure(&mut self, closure: Arc<Closure>, argc: usize) -> VesperResult<()> {
        let function = &closure.function;
        if argc != function.num_params {
            return Err(self.wrong_arity(function.num_params, argc));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(self.error(ErrorKind::StackOverflow, "stack overflow"));
        }

        let base_pointer = self.stack.len() - argc;
        let top = base_pointer + function.num_locals.max(argc);
        if top > self.config.stack_size {
            return Err(self.error(ErrorKind::StackOverflow, "stack overflow"));
        }
        self.stack.resize(top, Value::Nil);
        self.frames.push(Frame::new(closure, base_pointer));
        Ok(())
    }

    fn instantiate(
        &mut self,
        class: Arc<CompiledClass>,
        callee_idx: usize,
        argc: usize,
    ) -> VesperResult<()> {
        let instance = Arc::new(Mutex::new(Instance::new(class.clone())));

        match class.find_method("init") {
            Some(init) => {
                let want = init.function.num_params.saturating_sub(1);
                if argc != want {
                    return Err(self.wrong_arity(want, argc));
                }
                self.stack[callee_idx] = Value::BoundMethod(Arc::new(BoundMethod {
                    receiver: instance.clone(),
                    method: init.clone(),
                }));
                self.stack.insert(callee_idx + 1, Value::Instance(instance));
                self.call_closure(init, argc + 1)
            }
            None if argc > 0 => Err(self.error(
                ErrorKind::ArgumentError,
                format!("expected 0 arguments but got {}", argc),
            )),
            None => {
                self.stack.truncate(callee_idx);
                self.push(Value::Instance(instance))
            }
        }
    }

    fn call_native(
        &mut self,
        native: &'static NativeFunction,
        callee_idx: usize,
        argc: usize,
    ) -> VesperResult<()> {
        if argc != native.arity {
            return Err(self.wrong_arity(native.arity, argc));
        }
        let args = self.stack.split_off(callee_idx + 1);
        let result = (native.func)(&args).map_err(|err| self.locate(err))?;
        self.stack.truncate(callee_idx);
        self.push(result)
    }

    fn return_from_frame(&mut self, value: Value) -> VesperResult<()> {
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        if self.frames.is_empty() {
            // Returning from a module body ends that module's run
            self.stack.truncate(frame.base_pointer);
            return Ok(());
        }
        self.stack.truncate(frame.base_pointer.saturating_sub(1));
        self.push(value)
    }

    fn make_closure(&mut self, constant: usize, num_free: usize) -> VesperResult<()> {
        let function = match self.program.constants.get(constant) {
            Some(Value::Function(function)) => function.clone(),
            _ => {
                return Err(self.error(
                    ErrorKind::RuntimeError,
                    format!("constant {} is not a function", constant),
                ))
            }
        };
        let free = self
            .pop_n(num_free)?
            .into_iter()
            .map(|value| match value {
                Value::Cell(cell) => cell,
                other => Arc::new(Cell::new(other)),
            })
            .collect();
        self.push(Value::Closure(Arc::new(Closure::new(function, free))))
    }

    // ==================== Classes ====================

    fn make_class(&mut self, name: usize, num_methods: usize) -> VesperResult<()> {
        let name = self.string_constant(name)?;
        let method_values = self.pop_n(num_methods)?;
        let superclass = match self.pop()? {
            Value::Nil => None,
            Value::Class(class) => Some(class),
            other => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("superclass must be a class, got {}", other.type_name()),
                ))
            }
        };

        let mut methods = FxHashMap::default();
        for value in method_values {
            let Value::Closure(method) = value else {
                return Err(self.error(
                    ErrorKind::RuntimeError,
                    format!("class {} has a method that is not a closure", name),
                ));
            };
            let method_name = method.function.display_name().to_string();
            methods.insert(method_name, method);
        }

        self.push(Value::Class(Arc::new(CompiledClass {
            name: name.to_string(),
            methods,
            superclass,
        })))
    }

    fn get_property(&mut self, name: usize) -> VesperResult<()> {
        let name = self.string_constant(name)?;
        let instance = match self.pop()? {
            Value::Instance(instance) => instance,
            other => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("only instances have properties, got {}", other.type_name()),
                ))
            }
        };

        let (field, class) = {
            let guard = instance.lock();
            (guard.fields.get(&*name).cloned(), guard.class.clone())
        };
        if let Some(value) = field {
            return self.push(value);
        }
        match class.find_method(&name) {
            Some(method) => self.push(Value::BoundMethod(Arc::new(BoundMethod {
                receiver: instance,
                method,
            }))),
            None => Err(self.error(
                ErrorKind::AttributeError,
                format!("undefined property {} on {}", name, class.name),
            )),
        }
    }

    /// Resolve `name` one level above the receiver's class
    fn get_super(&mut self, name: usize) -> VesperResult<()> {
        let name = self.string_constant(name)?;
        let instance = match self.pop()? {
            Value::Instance(instance) => instance,
            other => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("super requires an instance, got {}", other.type_name()),
                ))
            }
        };

        let class = instance.lock().class.clone();
        let Some(parent) = class.superclass.clone() else {
            return Err(self.error(
                ErrorKind::AttributeError,
                format!("class {} has no superclass", class.name),
            ));
        };
        match parent.find_method(&name) {
            Some(method) => self.push(Value::BoundMethod(Arc::new(BoundMethod {
                receiver: instance,
                method,
            }))),
            None => Err(self.error(
                ErrorKind::AttributeError,
                format!("undefined property {} on {}", name, parent.name),
            )),
        }
    }

    // ==================== Collections ====================

    fn make_hash(&mut self, count: usize) -> VesperResult<()> {
        let values = self.pop_n(count)?;
        let mut entries = FxHashMap::default();
        let mut values = values.into_iter();
        while let (Some(key), Some(value)) = (values.next(), values.next()) {
            let key = self.hash_key(&key)?;
            entries.insert(key, value);
        }
        self.push(Value::hash(entries))
    }

    fn index(&mut self) -> VesperResult<()> {
        let index = self.pop()?;
        let object = self.pop()?;

        let value = match (&object, &index) {
            (Value::Array(items), Value::Number(n)) => {
                let items = items.lock();
                array_slot(*n, items.len())
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| self.error(ErrorKind::IndexError, "index out of bounds"))?
            }
            (Value::String(s), Value::Number(n)) => array_slot(*n, s.chars().count())
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::string(c.to_string()))
                .ok_or_else(|| self.error(ErrorKind::IndexError, "index out of bounds"))?,
            (Value::Hash(map), key) => {
                let key = self.hash_key(key)?;
                let found = map.lock().get(&key).cloned();
                found.ok_or_else(|| {
                    self.error(ErrorKind::KeyError, format!("key '{}' not found in hash map", key))
                })?
            }
            (Value::Array(_) | Value::String(_), other) => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("index must be a number, got {}", other.type_name()),
                ))
            }
            (other, _) => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("index operator not supported on {}", other.type_name()),
                ))
            }
        };
        self.push(value)
    }

    fn set_index(&mut self) -> VesperResult<()> {
        let value = self.pop()?;
        let index = self.pop()?;
        let object = self.pop()?;

        match (&object, &index) {
            (Value::Array(items), Value::Number(n)) => {
                let mut items = items.lock();
                let slot = array_slot(*n, items.len())
                    .ok_or_else(|| self.error(ErrorKind::IndexError, "index out of bounds"))?;
                items[slot] = value.clone();
            }
            (Value::Hash(map), key) => {
                let key = self.hash_key(key)?;
                map.lock().insert(key, value.clone());
            }
            (Value::Array(_), other) => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("index must be a number, got {}", other.type_name()),
                ))
            }
            (other, _) => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("index assignment not supported on {}", other.type_name()),
                ))
            }
        }
        self.push(value)
    }

    fn hash_key(&self, key: &Value) -> VesperResult<String> {
        key.hash_key().ok_or_else(|| {
            self.error(
                ErrorKind::TypeError,
                format!("unusable as hash key: {}", key.type_name()),
            )
        })
    }

    // ==================== Operators ====================

    fn add(&mut self) -> VesperResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
            (Value::String(_), Value::String(_) | Value::Number(_))
            | (Value::Number(_), Value::String(_)) => Value::string(format!("{}{}", left, right)),
            _ => return Err(self.operand_error("+", &left, &right)),
        };
        self.push(result)
    }

    fn arithmetic(&mut self, symbol: &str, op: fn(f64, f64) -> f64) -> VesperResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        match (&left, &right) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(op(*x, *y))),
            _ => Err(self.operand_error(symbol, &left, &right)),
        }
    }

    fn compare(&mut self, symbol: &str, accept: fn(Ordering) -> bool) -> VesperResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let ordering = match (&left, &right) {
            (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => return Err(self.operand_error(symbol, &left, &right)),
        };
        self.push(Value::Boolean(ordering.is_some_and(accept)))
    }

    fn operand_error(&self, symbol: &str, left: &Value, right: &Value) -> VesperError {
        self.error(
            ErrorKind::TypeError,
            format!(
                "unsupported operand types for {}: {} and {}",
                symbol,
                left.type_name(),
                right.type_name()
            ),
        )
    }

    // ==================== Helper Methods ====================

    fn push(&mut self, value: Value) -> VesperResult<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(self.error(ErrorKind::StackOverflow, "stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VesperResult<Value> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    fn peek(&self) -> VesperResult<&Value> {
        self.stack.last().ok_or_else(|| self.underflow())
    }

    /// Remove the top `count` values, oldest first
    fn pop_n(&mut self, count: usize) -> VesperResult<Vec<Value>> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| self.underflow())?;
        Ok(self.stack.split_off(start))
    }

    fn underflow(&self) -> VesperError {
        self.error(ErrorKind::RuntimeError, "stack underflow")
    }

    fn frame(&self) -> VesperResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| VesperError::new(ErrorKind::RuntimeError, "no active frame"))
    }

    fn jump(&mut self, target: usize) -> VesperResult<()> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.ip = target;
                Ok(())
            }
            None => Err(VesperError::new(ErrorKind::RuntimeError, "no active frame")),
        }
    }

    fn local_slot(&self, index: usize) -> VesperResult<usize> {
        let slot = self.frame()?.base_pointer + index;
        if slot >= self.stack.len() {
            return Err(self.error(
                ErrorKind::RuntimeError,
                format!("local {} out of range", index),
            ));
        }
        Ok(slot)
    }

    fn free_cell(&self, index: usize) -> VesperResult<Arc<Cell>> {
        self.frame()?
            .closure
            .free
            .get(index)
            .cloned()
            .ok_or_else(|| {
                self.error(
                    ErrorKind::RuntimeError,
                    format!("free variable {} out of range", index),
                )
            })
    }

    fn string_constant(&self, index: usize) -> VesperResult<Arc<str>> {
        match self.program.constants.get(index) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(self.error(
                ErrorKind::RuntimeError,
                format!("constant {} is not a string", index),
            )),
        }
    }

    fn wrong_arity(&self, want: usize, got: usize) -> VesperError {
        self.error(
            ErrorKind::ArgumentError,
            format!("wrong number of arguments: want={}, got={}", want, got),
        )
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> VesperError {
        self.locate(VesperError::new(kind, message))
    }

    /// Attach the current source position and a stack trace
    fn locate(&self, err: VesperError) -> VesperError {
        let Some(frame) = self.frames.last() else {
            return err;
        };
        let (file, line) = self.position_of(frame);
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let (file, line) = self.position_of(frame);
                StackFrame {
                    function_name: frame.function().display_name().to_string(),
                    file,
                    line,
                }
            })
            .collect();
        err.with_span(Span::line(line))
            .with_file(file)
            .with_stack_trace(trace)
    }

    pub(super) fn position_of(&self, frame: &Frame) -> (String, usize) {
        match self.program.debug_entry(frame.function().debug) {
            Some(entry) => (entry.file.clone(), entry.line_at(frame.last_offset())),
            None => (String::new(), 0),
        }
    }
}

/// Slot for an integral, in-range index
fn array_slot(n: f64, len: usize) -> Option<usize> {
    if n < 0.0 || n.fract() != 0.0 {
        return None;
    }
    let index = n as usize;
    (index < len).then_some(index)
}
