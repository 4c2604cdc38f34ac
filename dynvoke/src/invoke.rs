//! Call interface preparation and dispatch.

use std::ffi::c_void;

use libffi::low;
use libffi::raw;
use log::trace;

use crate::error::{Error, Result};
use crate::frame::{self, CallFrame};
use crate::guard;
use crate::marshal;
use crate::pool::ArgPool;
use crate::types::{TypeDescriptor, TypeInfo};
use crate::value::{Arg, Outcome};

/// A resolved native function address. Opaque to the engine: it comes from
/// the dynamic-loading collaborator (or any other source) and is never
/// dereferenced except by the call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnAddr(usize);

impl FnAddr {
    pub fn new(addr: usize) -> Self {
        FnAddr(addr)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Aligned storage for the raw return value. Always at least word sized:
/// the call interface widens small integral returns, and aggregates smaller
/// than a word still get a word-sized buffer.
pub struct RetBuffer {
    chunks: Vec<RetChunk>,
    len: usize,
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct RetChunk([u8; 16]);

impl RetBuffer {
    pub(crate) fn new(len: usize) -> Self {
        let len = len.max(size_of::<usize>());
        RetBuffer {
            chunks: vec![RetChunk([0; 16]); len.div_ceil(16)],
            len,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.chunks.as_mut_ptr() as *mut u8
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.chunks.as_ptr() as *const u8, self.len) }
    }
}

/// Invoke the native function at `addr` with the described return type and
/// argument list. This is the engine's single entry point: descriptor
/// resolution, argument binding, frame finalization, dispatch and result
/// marshaling run in sequence, and the per-call pool is released on every
/// exit path.
pub fn invoke(addr: FnAddr, ret_info: &TypeInfo, args: &[Arg]) -> Result<Outcome> {
    if addr.is_null() {
        return Err(Error::Invoke("function address is null".into()));
    }

    let ret = TypeDescriptor::parse_return(ret_info)?;
    let mut pool = ArgPool::new();
    let plan = frame::bind_args(&mut pool, args)?;
    let call_frame = frame::finalize(&mut pool, &plan)?;
    let ret_buffer = dispatch(&call_frame, &ret, addr)?;
    marshal::outcome(&ret_buffer, &ret, &plan, &pool)
}

/// Prepare a call interface for the frame and perform the call inside the
/// fault-containment region.
fn dispatch(call_frame: &CallFrame, ret: &TypeDescriptor, addr: FnAddr) -> Result<RetBuffer> {
    let ret_ffi = ret.ffi_type();
    let mut arg_types: Vec<*mut raw::ffi_type> =
        call_frame.types.iter().map(|t| t.as_raw_ptr()).collect();

    let mut cif: low::ffi_cif = unsafe { std::mem::zeroed() };
    let prepared = if call_frame.is_variadic() {
        unsafe {
            low::prep_cif_var(
                &mut cif,
                low::ffi_abi_FFI_DEFAULT_ABI,
                call_frame.fixed_count,
                call_frame.arg_count(),
                ret_ffi.as_raw_ptr(),
                arg_types.as_mut_ptr(),
            )
        }
    } else {
        unsafe {
            low::prep_cif(
                &mut cif,
                low::ffi_abi_FFI_DEFAULT_ABI,
                call_frame.arg_count(),
                ret_ffi.as_raw_ptr(),
                arg_types.as_mut_ptr(),
            )
        }
    };
    prepared.map_err(|e| {
        Error::Invoke(format!("call interface preparation failed: {e:?}"))
    })?;

    let mut ret_buffer = RetBuffer::new(ret.byte_size());
    let mut values = call_frame.value_ptrs.clone();

    let cif_ptr = &mut cif as *mut low::ffi_cif;
    let code = low::CodePtr(addr.raw() as *mut c_void);
    let rvalue = ret_buffer.as_mut_ptr() as *mut c_void;
    let avalues = values.as_mut_ptr();

    trace!(
        "invoking {:#x}: {} fixed + {} variadic args, {} byte return",
        addr.raw(),
        call_frame.fixed_count,
        call_frame.variadic_count,
        ret.byte_size()
    );
    guard::protected(|| unsafe {
        raw::ffi_call(cif_ptr, Some(*code.as_safe_fun()), rvalue, avalues);
    })
    .map_err(|fault| Error::Invoke(fault.describe().into()))?;

    Ok(ret_buffer)
}
