// Vesper Runtime Values
// Object kinds shared by the compiler (constants) and the VM (stack values)
// Uses Arc/Mutex so a VM can be moved onto a worker thread by the debugger

use crate::error::VesperError;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Native function signature
pub type NativeFn = fn(&[Value]) -> Result<Value, VesperError>;

pub type InstanceRef = Arc<Mutex<Instance>>;

/// Runtime value types
#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Mutex<Vec<Value>>>),
    /// Keys are stringified Number/String/Bool values
    Hash(Arc<Mutex<FxHashMap<String, Value>>>),
    Function(Arc<CompiledFunction>),
    Closure(Arc<Closure>),
    Cell(Arc<Cell>),
    Class(Arc<CompiledClass>),
    Instance(InstanceRef),
    BoundMethod(Arc<BoundMethod>),
    Native(&'static NativeFunction),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn hash(entries: FxHashMap<String, Value>) -> Self {
        Value::Hash(Arc::new(Mutex::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::Function(_) => "function",
            Value::Closure(_) => "closure",
            Value::Cell(_) => "cell",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::BoundMethod(_) => "bound method",
            Value::Native(_) => "native function",
        }
    }

    /// Only nil and false are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Key under which this value is stored in a hash, if it may be one
    pub fn hash_key(&self) -> Option<String> {
        match self {
            Value::Number(_) | Value::String(_) | Value::Boolean(_) => Some(self.to_string()),
            _ => None,
        }
    }

    /// The value a cell holds, or the value itself
    pub fn unwrap_cell(self) -> Value {
        match self {
            Value::Cell(cell) => cell.get(),
            other => other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

/// Integral numbers print without a fractional part
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(arr) => {
                // A held lock means this array contains itself
                let Some(items) = arr.try_lock() else {
                    return write!(f, "[...]");
                };
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Hash(map) => {
                let Some(map) = map.try_lock() else {
                    return write!(f, "{{...}}");
                };
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, map[key])?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<compiled fn {}>", func.display_name()),
            Value::Closure(closure) => write!(f, "<fn {}>", closure.function.display_name()),
            Value::Cell(cell) => match cell.try_lock() {
                Some(inner) => write!(f, "cell({})", *inner),
                None => write!(f, "cell(...)"),
            },
            Value::Class(class) => write!(f, "<class {}>", class.name),
            Value::Instance(inst) => match inst.try_lock() {
                Some(inst) => write!(f, "<{} instance>", inst.class.name),
                None => write!(f, "<instance>"),
            },
            Value::BoundMethod(bound) => {
                write!(f, "<bound method {}>", bound.method.function.display_name())
            }
            Value::Native(native) => write!(f, "<native fn {}>", native.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            _ => write!(f, "{}", self),
        }
    }
}

/// Compiled function body stored in the constant pool
#[derive(Debug, Clone, Default)]
pub struct CompiledFunction {
    pub instructions: Vec<u8>,
    pub num_locals: usize,
    /// Declared parameters, including the implicit receiver of methods
    pub num_params: usize,
    pub name: Option<String>,
    /// Module whose globals this function reads and writes
    pub module: usize,
    /// Index into the program's debug-info table
    pub debug: usize,
}

impl CompiledFunction {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Mutable box shared by every closure that captured the same variable
#[derive(Debug, Default)]
pub struct Cell {
    value: Mutex<Value>,
}

impl Cell {
    pub fn new(value: Value) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn get(&self) -> Value {
        self.value.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.lock() = value;
    }

    /// `None` while the cell is already held further up the current traversal
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, Value>> {
        self.value.try_lock()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

/// Compiled function plus the cells it captured
#[derive(Debug)]
pub struct Closure {
    pub function: Arc<CompiledFunction>,
    pub free: Vec<Arc<Cell>>,
}

impl Closure {
    pub fn new(function: Arc<CompiledFunction>, free: Vec<Arc<Cell>>) -> Self {
        Self { function, free }
    }
}

/// Class value: method table plus optional parent
#[derive(Debug)]
pub struct CompiledClass {
    pub name: String,
    pub methods: FxHashMap<String, Arc<Closure>>,
    pub superclass: Option<Arc<CompiledClass>>,
}

impl CompiledClass {
    /// Look up a method on this class, then its ancestors
    pub fn find_method(&self, name: &str) -> Option<Arc<Closure>> {
        let mut class = Some(self);
        while let Some(current) = class {
            if let Some(method) = current.methods.get(name) {
                return Some(method.clone());
            }
            class = current.superclass.as_deref();
        }
        None
    }
}

/// Instance of a class
#[derive(Debug)]
pub struct Instance {
    pub class: Arc<CompiledClass>,
    pub fields: FxHashMap<String, Value>,
}

impl Instance {
    pub fn new(class: Arc<CompiledClass>) -> Self {
        Self {
            class,
            fields: FxHashMap::default(),
        }
    }
}

/// Method closure fixed to a receiver
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: InstanceRef,
    pub method: Arc<Closure>,
}

/// Built-in function callable from scripts
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}
