// Vesper Native Functions

use super::value::{NativeFunction, Value};
use crate::error::{ErrorKind, VesperError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Natives in index order, as referenced by `OpGetNative`
pub static NATIVES: [NativeFunction; 2] = [
    NativeFunction {
        name: "len",
        arity: 1,
        func: native_len,
    },
    NativeFunction {
        name: "clock",
        arity: 0,
        func: native_clock,
    },
];

pub fn lookup(name: &str) -> Option<usize> {
    NATIVES.iter().position(|native| native.name == name)
}

pub fn get(index: usize) -> Option<&'static NativeFunction> {
    NATIVES.get(index)
}

fn native_len(args: &[Value]) -> Result<Value, VesperError> {
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.lock().len(),
        Value::Hash(map) => map.lock().len(),
        other => {
            return Err(VesperError::new(
                ErrorKind::TypeError,
                format!("argument to `len` not supported, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Number(len as f64))
}

fn native_clock(_args: &[Value]) -> Result<Value, VesperError> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(secs))
}
