//! Per-call argument storage arenas.
//!
//! The call interface takes an array of pointers to argument values, so
//! every marshaled value needs an address that stays valid for the whole
//! call. Values live in one growable arena per scalar type, indexed by slot;
//! arenas grow only while arguments are being bound, and addresses are
//! captured afterwards, so a reallocation can never invalidate a pointer
//! that has already entered a frame. A pool belongs to exactly one
//! invocation and is dropped with it.

use std::ffi::c_void;

use crate::error::{Error, Result};
use crate::types::ScalarKind;

/// Slots are reserved in chunks of this many entries.
const ARENA_CHUNK: usize = 8;

#[derive(Debug)]
struct Arena<T> {
    slots: Vec<T>,
}

impl<T: Copy> Arena<T> {
    const fn new() -> Self {
        Arena { slots: Vec::new() }
    }

    fn bind(&mut self, value: T) -> Result<usize> {
        if self.slots.len() == self.slots.capacity() {
            self.slots.try_reserve_exact(ARENA_CHUNK).map_err(|_| {
                Error::Resource("argument arena growth failed".into())
            })?;
        }
        self.slots.push(value);
        Ok(self.slots.len() - 1)
    }

    fn get(&self, slot: usize) -> T {
        self.slots[slot]
    }

    fn set(&mut self, slot: usize, value: T) {
        self.slots[slot] = value;
    }

    fn addr(&self, slot: usize) -> *mut c_void {
        &self.slots[slot] as *const T as *mut c_void
    }
}

/// A typed value on its way into an arena, or read back out of one.
#[derive(Debug, Clone, Copy)]
pub enum ScalarValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::U8(_) => ScalarKind::U8,
            ScalarValue::U16(_) => ScalarKind::U16,
            ScalarValue::U32(_) => ScalarKind::U32,
            ScalarValue::U64(_) => ScalarKind::U64,
            ScalarValue::S8(_) => ScalarKind::S8,
            ScalarValue::S16(_) => ScalarKind::S16,
            ScalarValue::S32(_) => ScalarKind::S32,
            ScalarValue::S64(_) => ScalarKind::S64,
            ScalarValue::F32(_) => ScalarKind::F32,
            ScalarValue::F64(_) => ScalarKind::F64,
            ScalarValue::Ptr(_) => ScalarKind::CPtr,
        }
    }
}

/// Handle to one occupied arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub kind: ScalarKind,
    pub index: usize,
}

/// All arenas for one invocation. Arenas allocate nothing until their first
/// binding.
#[derive(Debug)]
pub struct ArgPool {
    u8s: Arena<u8>,
    u16s: Arena<u16>,
    u32s: Arena<u32>,
    u64s: Arena<u64>,
    s8s: Arena<i8>,
    s16s: Arena<i16>,
    s32s: Arena<i32>,
    s64s: Arena<i64>,
    f32s: Arena<f32>,
    f64s: Arena<f64>,
    ptrs: Arena<*mut c_void>,
}

impl ArgPool {
    pub fn new() -> Self {
        ArgPool {
            u8s: Arena::new(),
            u16s: Arena::new(),
            u32s: Arena::new(),
            u64s: Arena::new(),
            s8s: Arena::new(),
            s16s: Arena::new(),
            s32s: Arena::new(),
            s64s: Arena::new(),
            f32s: Arena::new(),
            f64s: Arena::new(),
            ptrs: Arena::new(),
        }
    }

    /// Deposit a value in the arena for its type and return its slot.
    pub fn bind(&mut self, value: ScalarValue) -> Result<Slot> {
        let kind = value.kind();
        let index = match value {
            ScalarValue::U8(v) => self.u8s.bind(v)?,
            ScalarValue::U16(v) => self.u16s.bind(v)?,
            ScalarValue::U32(v) => self.u32s.bind(v)?,
            ScalarValue::U64(v) => self.u64s.bind(v)?,
            ScalarValue::S8(v) => self.s8s.bind(v)?,
            ScalarValue::S16(v) => self.s16s.bind(v)?,
            ScalarValue::S32(v) => self.s32s.bind(v)?,
            ScalarValue::S64(v) => self.s64s.bind(v)?,
            ScalarValue::F32(v) => self.f32s.bind(v)?,
            ScalarValue::F64(v) => self.f64s.bind(v)?,
            ScalarValue::Ptr(v) => self.ptrs.bind(v)?,
        };
        Ok(Slot { kind, index })
    }

    /// Overwrite an occupied slot in place. Never grows an arena.
    pub fn write(&mut self, slot: Slot, value: ScalarValue) {
        debug_assert_eq!(slot.kind, value.kind());
        match value {
            ScalarValue::U8(v) => self.u8s.set(slot.index, v),
            ScalarValue::U16(v) => self.u16s.set(slot.index, v),
            ScalarValue::U32(v) => self.u32s.set(slot.index, v),
            ScalarValue::U64(v) => self.u64s.set(slot.index, v),
            ScalarValue::S8(v) => self.s8s.set(slot.index, v),
            ScalarValue::S16(v) => self.s16s.set(slot.index, v),
            ScalarValue::S32(v) => self.s32s.set(slot.index, v),
            ScalarValue::S64(v) => self.s64s.set(slot.index, v),
            ScalarValue::F32(v) => self.f32s.set(slot.index, v),
            ScalarValue::F64(v) => self.f64s.set(slot.index, v),
            ScalarValue::Ptr(v) => self.ptrs.set(slot.index, v),
        }
    }

    /// Read a slot back, typically after the native call mutated it.
    pub fn read(&self, slot: Slot) -> ScalarValue {
        match slot.kind {
            ScalarKind::U8 => ScalarValue::U8(self.u8s.get(slot.index)),
            ScalarKind::U16 => ScalarValue::U16(self.u16s.get(slot.index)),
            ScalarKind::U32 => ScalarValue::U32(self.u32s.get(slot.index)),
            ScalarKind::U64 => ScalarValue::U64(self.u64s.get(slot.index)),
            ScalarKind::S8 => ScalarValue::S8(self.s8s.get(slot.index)),
            ScalarKind::S16 => ScalarValue::S16(self.s16s.get(slot.index)),
            ScalarKind::S32 => ScalarValue::S32(self.s32s.get(slot.index)),
            ScalarKind::S64 => ScalarValue::S64(self.s64s.get(slot.index)),
            ScalarKind::F32 => ScalarValue::F32(self.f32s.get(slot.index)),
            ScalarKind::F64 => ScalarValue::F64(self.f64s.get(slot.index)),
            ScalarKind::CPtr => ScalarValue::Ptr(self.ptrs.get(slot.index)),
            ScalarKind::Void => unreachable!("void values are never stored"),
        }
    }

    /// Stable address of a slot's storage. Valid until the pool is dropped,
    /// provided no further bindings occur.
    pub fn addr(&self, slot: Slot) -> *mut c_void {
        match slot.kind {
            ScalarKind::U8 => self.u8s.addr(slot.index),
            ScalarKind::U16 => self.u16s.addr(slot.index),
            ScalarKind::U32 => self.u32s.addr(slot.index),
            ScalarKind::U64 => self.u64s.addr(slot.index),
            ScalarKind::S8 => self.s8s.addr(slot.index),
            ScalarKind::S16 => self.s16s.addr(slot.index),
            ScalarKind::S32 => self.s32s.addr(slot.index),
            ScalarKind::S64 => self.s64s.addr(slot.index),
            ScalarKind::F32 => self.f32s.addr(slot.index),
            ScalarKind::F64 => self.f64s.addr(slot.index),
            ScalarKind::CPtr => self.ptrs.addr(slot.index),
            ScalarKind::Void => unreachable!("void values are never stored"),
        }
    }
}

impl Default for ArgPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_assigned_in_order_per_type() {
        let mut pool = ArgPool::new();
        let a = pool.bind(ScalarValue::U32(1)).unwrap();
        let b = pool.bind(ScalarValue::F64(2.0)).unwrap();
        let c = pool.bind(ScalarValue::U32(3)).unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 0, 1));
        assert!(matches!(pool.read(c), ScalarValue::U32(3)));
    }

    #[test]
    fn addresses_are_stable_after_binding_phase() {
        let mut pool = ArgPool::new();
        let mut slots = Vec::new();
        for i in 0..64u64 {
            slots.push(pool.bind(ScalarValue::U64(i)).unwrap());
        }
        // All addresses captured after the last bind must observe the bound
        // values.
        for (i, slot) in slots.iter().enumerate() {
            let p = pool.addr(*slot) as *const u64;
            assert_eq!(unsafe { *p }, i as u64);
        }
    }

    #[test]
    fn write_updates_in_place() {
        let mut pool = ArgPool::new();
        let slot = pool.bind(ScalarValue::S32(7)).unwrap();
        pool.write(slot, ScalarValue::S32(8));
        assert!(matches!(pool.read(slot), ScalarValue::S32(8)));
    }
}
