//! Process-lifetime struct type registry.
//!
//! A struct id maps to exactly one resolved layout for the lifetime of the
//! process. The first registration computes field offsets, size and
//! alignment through libffi and caches the result; later calls with the same
//! id return the cached layout and ignore the supplied field list. That
//! memoization is the contract: redefining an id with different fields is
//! caller error and is deliberately not detected here.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use libffi::middle::Type;
use libffi::raw;
use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{TypeDescriptor, TypeInfo};

/// Resolved native layout of a registered struct type. Owned by the
/// registry; frames and boxed struct values share it read-only.
#[derive(Debug)]
pub struct StructLayout {
    pub id: String,
    pub fields: Vec<TypeDescriptor>,
    pub size: usize,
    pub align: usize,
    pub offsets: Vec<usize>,
}

impl StructLayout {
    pub fn ffi_type(&self) -> Type {
        Type::structure(self.fields.iter().map(|f| f.ffi_type()))
    }

    pub fn field_offset(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied()
    }
}

pub struct StructRegistry {
    layouts: Mutex<HashMap<String, Arc<StructLayout>>>,
}

/// The process-wide registry. Call frames never copy layouts out of it.
pub fn global() -> &'static StructRegistry {
    static REGISTRY: OnceLock<StructRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| StructRegistry {
        layouts: Mutex::new(HashMap::new()),
    })
}

impl StructRegistry {
    pub fn lookup(&self, id: &str) -> Option<Arc<StructLayout>> {
        self.layouts.lock().get(id).cloned()
    }

    /// Return the layout registered under `id`, registering it from
    /// `fields` first if this id has never been seen. First registration
    /// wins; a concurrent or later registration of the same id returns the
    /// existing layout regardless of its field list.
    pub fn register_or_get(&self, id: &str, fields: &[TypeInfo]) -> Result<Arc<StructLayout>> {
        if let Some(existing) = self.lookup(id) {
            return Ok(existing);
        }

        if fields.is_empty() {
            return Err(Error::Lookup(format!(
                "struct '{id}' is not registered and no field list was supplied"
            )));
        }

        // Field resolution happens outside the lock: nested inline structs
        // re-enter the registry.
        let mut resolved = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            let desc = TypeDescriptor::parse(field)?;
            match desc {
                TypeDescriptor::VarArgs => {
                    return Err(Error::Type(format!(
                        "struct '{id}' field #{i} cannot be va_args"
                    )));
                }
                TypeDescriptor::Scalar(kind) if kind.size() == 0 => {
                    return Err(Error::Type(format!(
                        "struct '{id}' field #{i} cannot be void"
                    )));
                }
                other => resolved.push(other),
            }
        }

        let field_types: Vec<Type> = resolved.iter().map(|d| d.ffi_type()).collect();
        let (size, align, offsets) = compute_struct_layout(&field_types)?;

        let layout = Arc::new(StructLayout {
            id: id.to_string(),
            fields: resolved,
            size,
            align,
            offsets,
        });

        let mut layouts = self.layouts.lock();
        let entry = layouts.entry(id.to_string()).or_insert_with(|| {
            debug!("registered struct '{id}': {size} bytes, align {align}");
            layout
        });
        Ok(entry.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.layouts.lock().len()
    }
}

/// Ask libffi for the size, alignment and field offsets of an aggregate.
fn compute_struct_layout(field_types: &[Type]) -> Result<(usize, usize, Vec<usize>)> {
    let ffi_type = Type::structure(field_types.iter().cloned());
    let raw_type = ffi_type.as_raw_ptr();
    let mut offsets = vec![0usize; field_types.len()];
    let status = unsafe {
        raw::ffi_get_struct_offsets(
            raw::ffi_abi_FFI_DEFAULT_ABI,
            raw_type,
            offsets.as_mut_ptr(),
        )
    };
    if status != raw::ffi_status_FFI_OK {
        return Err(Error::Type("failed to compute struct layout".into()));
    }
    let size = unsafe { (*raw_type).size };
    let align = unsafe { (*raw_type).alignment } as usize;
    Ok((size, align, offsets))
}
