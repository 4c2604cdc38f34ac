//! The structured values crossing the engine boundary.

use std::sync::Arc;

use crate::registry::StructLayout;
use crate::types::TypeInfo;

/// A boxed native struct instance: raw bytes tied to the registered layout
/// they were produced under.
#[derive(Debug, Clone)]
pub struct StructValue {
    pub layout: Arc<StructLayout>,
    pub bytes: Box<[u8]>,
}

impl StructValue {
    pub fn new(layout: Arc<StructLayout>, bytes: impl Into<Box<[u8]>>) -> Self {
        StructValue {
            layout,
            bytes: bytes.into(),
        }
    }
}

/// One argument: a value and the runtime description of its native type.
#[derive(Debug, Clone)]
pub struct Arg {
    pub value: Value,
    pub info: TypeInfo,
}

impl Arg {
    pub fn new(value: Value, info: TypeInfo) -> Self {
        Arg { value, info }
    }
}

/// Host-side representation of values entering and leaving a native call.
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// A raw native address, never dereferenced by the engine.
    Ptr(u64),
    Null,
    /// Raw bytes; passed as a pointer to their storage for `c_ptr`
    /// arguments, or as aggregate contents for struct/array arguments.
    Bytes(Vec<u8>),
    Struct(StructValue),
    /// The payload of a trailing `va_args` formal: the remaining actual
    /// arguments, each individually typed.
    VaArgs(Vec<Arg>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

/// A completed invocation: the primary return value plus the echoed values
/// of every `out`-flagged argument, in call order.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub ret: Value,
    pub outputs: Vec<Value>,
}
