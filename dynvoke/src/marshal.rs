//! Return and output value marshaling.
//!
//! Converts the raw return buffer into a structured value and re-reads the
//! arena slots of `out`-flagged arguments after the native call may have
//! mutated them. Integral returns narrower than a machine word are read at
//! word width and truncated, matching the call interface's widened-return
//! convention.

use crate::error::{Error, Result};
use crate::frame::{FramePlan, PassingMode};
use crate::invoke::RetBuffer;
use crate::pool::{ArgPool, ScalarValue};
use crate::types::{ScalarKind, TypeDescriptor};
use crate::value::{Outcome, StructValue, Value};

pub fn outcome(
    buffer: &RetBuffer,
    ret: &TypeDescriptor,
    plan: &FramePlan,
    pool: &ArgPool,
) -> Result<Outcome> {
    let ret_value = match ret {
        TypeDescriptor::Scalar(ScalarKind::Void) => Value::Void,
        TypeDescriptor::Scalar(kind) => scalar_return(*kind, buffer),
        TypeDescriptor::Struct(layout) => {
            let bytes = buffer
                .bytes()
                .get(..layout.size)
                .ok_or_else(|| {
                    Error::Marshal(format!(
                        "return buffer too small for struct '{}'",
                        layout.id
                    ))
                })?;
            Value::Struct(StructValue::new(layout.clone(), bytes))
        }
        TypeDescriptor::Array { .. } | TypeDescriptor::VarArgs => {
            return Err(Error::Marshal(format!(
                "{} is not a marshalable return type",
                ret.name()
            )));
        }
    };

    let mut outputs = Vec::new();
    for binding in &plan.bindings {
        if !binding.out || binding.mode != PassingMode::ByAddress {
            continue;
        }
        let slot = binding
            .value_slot
            .ok_or_else(|| Error::Marshal("output binding lost its value slot".into()))?;
        outputs.push(scalar_to_value(pool.read(slot)));
    }

    Ok(Outcome {
        ret: ret_value,
        outputs,
    })
}

/// Read a scalar return out of the buffer. Narrow integrals come back
/// widened to one machine word; that word is read at its native width and
/// truncated, so the result follows the value, not the byte order. 64-bit
/// integrals are written at full width regardless of the word size.
fn scalar_return(kind: ScalarKind, buffer: &RetBuffer) -> Value {
    let bytes = buffer.bytes();
    let word = usize::from_ne_bytes(
        bytes[..size_of::<usize>()]
            .try_into()
            .expect("buffer is word sized"),
    ) as u64;
    match kind {
        ScalarKind::U8 => Value::UInt(word as u8 as u64),
        ScalarKind::U16 => Value::UInt(word as u16 as u64),
        ScalarKind::U32 => Value::UInt(word as u32 as u64),
        ScalarKind::U64 => Value::UInt(u64::from_ne_bytes(
            bytes[..8].try_into().expect("buffer holds a u64"),
        )),
        ScalarKind::S8 => Value::Int(word as u8 as i8 as i64),
        ScalarKind::S16 => Value::Int(word as u16 as i16 as i64),
        ScalarKind::S32 => Value::Int(word as u32 as i32 as i64),
        ScalarKind::S64 => Value::Int(i64::from_ne_bytes(
            bytes[..8].try_into().expect("buffer holds an i64"),
        )),
        ScalarKind::F32 => {
            let v = f32::from_ne_bytes(bytes[..4].try_into().expect("buffer holds an f32"));
            Value::Float(v as f64)
        }
        ScalarKind::F64 => {
            let v = f64::from_ne_bytes(bytes[..8].try_into().expect("buffer holds an f64"));
            Value::Float(v)
        }
        ScalarKind::CPtr => Value::Ptr(word),
        ScalarKind::Void => unreachable!("void handled by outcome"),
    }
}

/// Convert an arena value back into the host representation, using the same
/// rules as scalar returns.
fn scalar_to_value(value: ScalarValue) -> Value {
    match value {
        ScalarValue::U8(v) => Value::UInt(v as u64),
        ScalarValue::U16(v) => Value::UInt(v as u64),
        ScalarValue::U32(v) => Value::UInt(v as u64),
        ScalarValue::U64(v) => Value::UInt(v),
        ScalarValue::S8(v) => Value::Int(v as i64),
        ScalarValue::S16(v) => Value::Int(v as i64),
        ScalarValue::S32(v) => Value::Int(v as i64),
        ScalarValue::S64(v) => Value::Int(v),
        ScalarValue::F32(v) => Value::Float(v as f64),
        ScalarValue::F64(v) => Value::Float(v),
        ScalarValue::Ptr(p) => Value::Ptr(p as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with_word(word: u64) -> RetBuffer {
        let mut buf = RetBuffer::new(8);
        unsafe { (buf.as_mut_ptr() as *mut u64).write(word) };
        buf
    }

    #[test]
    fn narrow_integral_returns_truncate_the_word() {
        let buf = buffer_with_word(0x1234_5678_9abc_deff);
        assert!(matches!(scalar_return(ScalarKind::U8, &buf), Value::UInt(0xff)));
        assert!(matches!(
            scalar_return(ScalarKind::S8, &buf),
            Value::Int(-1)
        ));
        assert!(matches!(
            scalar_return(ScalarKind::U32, &buf),
            Value::UInt(0x9abc_deff)
        ));
    }

    #[test]
    fn narrow_returns_read_only_one_machine_word() {
        let mut buf = RetBuffer::new(1);
        unsafe { (buf.as_mut_ptr() as *mut usize).write(0x2a) };
        assert!(matches!(scalar_return(ScalarKind::U8, &buf), Value::UInt(0x2a)));
        assert!(matches!(scalar_return(ScalarKind::S16, &buf), Value::Int(0x2a)));
        assert!(matches!(scalar_return(ScalarKind::CPtr, &buf), Value::Ptr(0x2a)));
    }

    #[test]
    fn float_returns_read_their_exact_width() {
        let mut buf = RetBuffer::new(8);
        unsafe { (buf.as_mut_ptr() as *mut f32).write(1.5) };
        match scalar_return(ScalarKind::F32, &buf) {
            Value::Float(f) => assert_eq!(f, 1.5),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn pointer_return_is_surfaced_raw() {
        let buf = buffer_with_word(0xdead_beef);
        assert!(matches!(
            scalar_return(ScalarKind::CPtr, &buf),
            Value::Ptr(0xdead_beef)
        ));
    }
}
