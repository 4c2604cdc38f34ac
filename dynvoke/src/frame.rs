//! Call frame construction.
//!
//! Turns an ordered argument list into the two parallel arrays the call
//! interface needs: type descriptors and value pointers. Work happens in two
//! phases. The binding phase walks arguments left to right, depositing every
//! scalar in its arena and flattening a trailing `va_args` payload into the
//! frame; arenas may grow freely here. The finalization phase captures slot
//! addresses, patches pointer slots for by-address bindings, and validates
//! that every frame entry resolved. No arena grows after finalization
//! begins.

use std::ffi::c_void;
use std::ptr;

use libffi::middle::Type;
use log::trace;

use crate::error::{Error, Result};
use crate::pool::{ArgPool, ScalarValue, Slot};
use crate::types::{ScalarKind, TypeDescriptor};
use crate::value::{Arg, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassingMode {
    /// The callee receives the value itself.
    Value,
    /// The callee receives the address of an arena slot holding the value;
    /// the original slot is kept so a mutated value can be echoed back.
    ByAddress,
    /// The callee receives the address of caller-owned storage (struct and
    /// array bytes are never copied into the pool).
    ByReference,
}

/// One resolved frame entry.
#[derive(Debug)]
pub struct Binding {
    pub desc: TypeDescriptor,
    pub mode: PassingMode,
    pub out: bool,
    /// Arena slot holding the marshaled value, for scalar bindings.
    pub value_slot: Option<Slot>,
    /// Arena slot holding the pointer-to-value, for by-address bindings.
    pub ptr_slot: Option<Slot>,
    /// Borrowed caller storage, for by-reference bindings. Valid for the
    /// lifetime of the caller's argument list.
    bytes_ptr: *mut c_void,
}

/// The bound-but-not-yet-finalized shape of a call.
#[derive(Debug)]
pub struct FramePlan {
    pub bindings: Vec<Binding>,
    pub fixed_count: usize,
    pub variadic_count: usize,
}

/// A finalized frame, ready for call interface preparation. The value
/// pointers alias the pool and the caller's aggregate storage; both outlive
/// the frame within one invocation.
pub struct CallFrame {
    pub types: Vec<Type>,
    pub value_ptrs: Vec<*mut c_void>,
    pub fixed_count: usize,
    pub variadic_count: usize,
}

impl CallFrame {
    pub fn arg_count(&self) -> usize {
        self.fixed_count + self.variadic_count
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic_count > 0
    }
}

// ── Binding phase ────────────────────────────────────────────────────

/// Walk the arguments left to right, marshaling each into the pool and
/// flattening a trailing `va_args` list. Only the last argument may be
/// `va_args`; its payload becomes the variadic region of the frame.
pub fn bind_args(pool: &mut ArgPool, args: &[Arg]) -> Result<FramePlan> {
    let mut bindings = Vec::with_capacity(args.len());
    let mut variadic_count = 0usize;

    for (index, arg) in args.iter().enumerate() {
        let desc = TypeDescriptor::parse(&arg.info)?;

        if matches!(desc, TypeDescriptor::VarArgs) {
            if index + 1 != args.len() {
                return Err(Error::build(
                    index,
                    "va_args must be the last argument",
                ));
            }
            let rest = match &arg.value {
                Value::VaArgs(rest) => rest,
                other => {
                    return Err(Error::build(
                        index,
                        format!("va_args payload must be an argument list, got {other:?}"),
                    ));
                }
            };
            for (vi, va) in rest.iter().enumerate() {
                let va_desc = TypeDescriptor::parse(&va.info)?;
                if matches!(va_desc, TypeDescriptor::VarArgs) {
                    return Err(Error::build(
                        index + vi,
                        "va_args cannot nest inside a va_args payload",
                    ));
                }
                let promoted = promote_variadic(va_desc);
                bindings.push(bind_one(pool, index + vi, promoted, va)?);
            }
            variadic_count = rest.len();
            break;
        }

        bindings.push(bind_one(pool, index, desc, arg)?);
    }

    let fixed_count = bindings.len() - variadic_count;
    Ok(FramePlan {
        bindings,
        fixed_count,
        variadic_count,
    })
}

/// C default argument promotions for the variadic region. Aggregates pass
/// unchanged.
fn promote_variadic(desc: TypeDescriptor) -> TypeDescriptor {
    match desc {
        TypeDescriptor::Scalar(kind) => TypeDescriptor::Scalar(kind.promoted()),
        other => other,
    }
}

fn bind_one(
    pool: &mut ArgPool,
    index: usize,
    desc: TypeDescriptor,
    arg: &Arg,
) -> Result<Binding> {
    match &desc {
        TypeDescriptor::VarArgs => unreachable!("handled by bind_args"),
        TypeDescriptor::Scalar(ScalarKind::Void) => Err(Error::Type(format!(
            "argument #{index}: void is not a parameter type"
        ))),
        TypeDescriptor::Scalar(kind) => {
            let by_address = arg.info.addr || arg.info.by_ref;
            let scalar = marshal_scalar(*kind, &arg.value, index)?;
            let value_slot = pool.bind(scalar)?;
            let ptr_slot = if by_address {
                // Placeholder; the address of the value slot is only known
                // once binding is complete.
                Some(pool.bind(ScalarValue::Ptr(ptr::null_mut()))?)
            } else {
                None
            };
            Ok(Binding {
                mode: if by_address {
                    PassingMode::ByAddress
                } else {
                    PassingMode::Value
                },
                // by_ref alone never echoes; out is an addr-only contract.
                out: arg.info.out && arg.info.addr,
                desc,
                value_slot: Some(value_slot),
                ptr_slot,
                bytes_ptr: ptr::null_mut(),
            })
        }
        TypeDescriptor::Struct(_) | TypeDescriptor::Array { .. } => {
            if arg.info.addr {
                return Err(Error::Type(format!(
                    "argument #{index}: addr is not supported for aggregate type {}",
                    desc.name()
                )));
            }
            let bytes_ptr = aggregate_ptr(&desc, &arg.value, index)?;
            Ok(Binding {
                mode: PassingMode::ByReference,
                out: false,
                desc,
                value_slot: None,
                ptr_slot: None,
                bytes_ptr,
            })
        }
    }
}

/// Borrow the address of an aggregate argument's bytes, checking that the
/// caller supplied enough of them.
fn aggregate_ptr(desc: &TypeDescriptor, value: &Value, index: usize) -> Result<*mut c_void> {
    let need = desc.byte_size();
    let (ptr, have) = match value {
        Value::Struct(sv) => {
            if let TypeDescriptor::Struct(layout) = desc {
                if !std::sync::Arc::ptr_eq(&sv.layout, layout) && sv.layout.id != layout.id {
                    return Err(Error::Type(format!(
                        "argument #{index}: struct value has layout '{}', expected '{}'",
                        sv.layout.id, layout.id
                    )));
                }
            }
            (sv.bytes.as_ptr(), sv.bytes.len())
        }
        Value::Bytes(bytes) => (bytes.as_ptr(), bytes.len()),
        other => {
            return Err(Error::Type(format!(
                "argument #{index}: expected struct or byte value for {}, got {other:?}",
                desc.name()
            )));
        }
    };
    if have < need {
        return Err(Error::Type(format!(
            "argument #{index}: {} needs {need} bytes, value has {have}",
            desc.name()
        )));
    }
    Ok(ptr as *mut c_void)
}

/// Convert a host value into the typed representation its arena stores,
/// with range checking.
fn marshal_scalar(kind: ScalarKind, value: &Value, index: usize) -> Result<ScalarValue> {
    fn narrow<T>(index: usize, kind: ScalarKind, v: Option<T>) -> Result<T> {
        v.ok_or_else(|| {
            Error::Type(format!("argument #{index}: value out of {} range", kind.tag()))
        })
    }

    match kind {
        ScalarKind::Void => unreachable!("checked by bind_one"),
        ScalarKind::U8 => {
            let n = expect_uint(value, kind, index)?;
            Ok(ScalarValue::U8(narrow(index, kind, u8::try_from(n).ok())?))
        }
        ScalarKind::U16 => {
            let n = expect_uint(value, kind, index)?;
            Ok(ScalarValue::U16(narrow(index, kind, u16::try_from(n).ok())?))
        }
        ScalarKind::U32 => {
            let n = expect_uint(value, kind, index)?;
            Ok(ScalarValue::U32(narrow(index, kind, u32::try_from(n).ok())?))
        }
        ScalarKind::U64 => Ok(ScalarValue::U64(expect_uint(value, kind, index)?)),
        ScalarKind::S8 => {
            let n = expect_int(value, kind, index)?;
            Ok(ScalarValue::S8(narrow(index, kind, i8::try_from(n).ok())?))
        }
        ScalarKind::S16 => {
            let n = expect_int(value, kind, index)?;
            Ok(ScalarValue::S16(narrow(index, kind, i16::try_from(n).ok())?))
        }
        ScalarKind::S32 => {
            let n = expect_int(value, kind, index)?;
            Ok(ScalarValue::S32(narrow(index, kind, i32::try_from(n).ok())?))
        }
        ScalarKind::S64 => Ok(ScalarValue::S64(expect_int(value, kind, index)?)),
        ScalarKind::F32 => {
            let f = expect_float(value, kind, index)?;
            Ok(ScalarValue::F32(f as f32))
        }
        ScalarKind::F64 => Ok(ScalarValue::F64(expect_float(value, kind, index)?)),
        ScalarKind::CPtr => match value {
            Value::Null => Ok(ScalarValue::Ptr(ptr::null_mut())),
            Value::Ptr(addr) => Ok(ScalarValue::Ptr(*addr as *mut c_void)),
            Value::Int(n) if *n >= 0 => Ok(ScalarValue::Ptr(*n as u64 as *mut c_void)),
            Value::UInt(n) => Ok(ScalarValue::Ptr(*n as *mut c_void)),
            // Borrow the byte buffer's own address; the caller's argument
            // list outlives the call.
            Value::Bytes(bytes) => Ok(ScalarValue::Ptr(bytes.as_ptr() as *mut c_void)),
            other => Err(Error::Type(format!(
                "argument #{index}: cannot pass {other:?} as c_ptr"
            ))),
        },
    }
}

fn expect_int(value: &Value, kind: ScalarKind, index: usize) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        Error::Type(format!(
            "argument #{index}: expected integer for {}, got {value:?}",
            kind.tag()
        ))
    })
}

fn expect_uint(value: &Value, kind: ScalarKind, index: usize) -> Result<u64> {
    value.as_uint().ok_or_else(|| {
        Error::Type(format!(
            "argument #{index}: expected unsigned integer for {}, got {value:?}",
            kind.tag()
        ))
    })
}

fn expect_float(value: &Value, kind: ScalarKind, index: usize) -> Result<f64> {
    value.as_float().ok_or_else(|| {
        Error::Type(format!(
            "argument #{index}: expected float for {}, got {value:?}",
            kind.tag()
        ))
    })
}

// ── Finalization phase ───────────────────────────────────────────────

/// Capture stable addresses for every binding and assemble the frame.
/// By-address pointer slots are patched here, after the last binding, so
/// arena growth can no longer move the value storage they point at.
pub fn finalize(pool: &mut ArgPool, plan: &FramePlan) -> Result<CallFrame> {
    for binding in &plan.bindings {
        if binding.mode == PassingMode::ByAddress {
            let value_slot = binding.value_slot.expect("by-address binding has a value slot");
            let ptr_slot = binding.ptr_slot.expect("by-address binding has a pointer slot");
            let addr = pool.addr(value_slot);
            pool.write(ptr_slot, ScalarValue::Ptr(addr));
        }
    }

    let mut types = Vec::with_capacity(plan.bindings.len());
    let mut value_ptrs = Vec::with_capacity(plan.bindings.len());
    for binding in &plan.bindings {
        let (ty, ptr) = match binding.mode {
            PassingMode::Value => {
                let slot = binding.value_slot.expect("value binding has a slot");
                (binding.desc.ffi_type(), pool.addr(slot))
            }
            PassingMode::ByAddress => {
                let slot = binding.ptr_slot.expect("by-address binding has a pointer slot");
                (Type::pointer(), pool.addr(slot))
            }
            PassingMode::ByReference => (binding.desc.ffi_type(), binding.bytes_ptr),
        };
        types.push(ty);
        value_ptrs.push(ptr);
    }

    for (index, ptr) in value_ptrs.iter().enumerate() {
        if ptr.is_null() {
            return Err(Error::build(
                index,
                format!(
                    "unresolved value slot for type {}",
                    plan.bindings[index].desc.name()
                ),
            ));
        }
    }

    trace!(
        "frame ready: {} fixed + {} variadic arguments",
        plan.fixed_count, plan.variadic_count
    );
    Ok(CallFrame {
        types,
        value_ptrs,
        fixed_count: plan.fixed_count,
        variadic_count: plan.variadic_count,
    })
}
