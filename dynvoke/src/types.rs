//! Runtime type descriptors.
//!
//! Callers describe a native signature as data: a string tag per scalar, an
//! optional element count that turns a scalar into a fixed-size aggregate,
//! and struct references that resolve through the struct registry. Tags form
//! a closed vocabulary; anything unmatched is a hard error rather than a
//! silent fallthrough.

use std::sync::Arc;

use libffi::middle::Type;

use crate::error::{Error, Result};
use crate::registry::{self, StructLayout};

// ── Scalar vocabulary ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    F32,
    F64,
    CPtr,
    Void,
}

impl ScalarKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "u8" => Some(Self::U8),
            "u16" => Some(Self::U16),
            "u32" => Some(Self::U32),
            "u64" => Some(Self::U64),
            "s8" => Some(Self::S8),
            "s16" => Some(Self::S16),
            "s32" => Some(Self::S32),
            "s64" => Some(Self::S64),
            "f32" => Some(Self::F32),
            "f64" => Some(Self::F64),
            "c_ptr" => Some(Self::CPtr),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::S64 => "s64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::CPtr => "c_ptr",
            Self::Void => "void",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 | Self::F32 => 4,
            Self::U64 | Self::S64 | Self::F64 => 8,
            Self::CPtr => size_of::<*const ()>(),
            Self::Void => 0,
        }
    }

    pub fn ffi_type(self) -> Type {
        match self {
            Self::U8 => Type::u8(),
            Self::U16 => Type::u16(),
            Self::U32 => Type::u32(),
            Self::U64 => Type::u64(),
            Self::S8 => Type::i8(),
            Self::S16 => Type::i16(),
            Self::S32 => Type::i32(),
            Self::S64 => Type::i64(),
            Self::F32 => Type::f32(),
            Self::F64 => Type::f64(),
            Self::CPtr => Type::pointer(),
            Self::Void => Type::void(),
        }
    }

    /// C default argument promotion, applied to every entry of the variadic
    /// region before it enters the frame.
    pub fn promoted(self) -> Self {
        match self {
            Self::F32 => Self::F64,
            Self::U8 | Self::U16 => Self::U32,
            Self::S8 | Self::S16 => Self::S32,
            other => other,
        }
    }
}

const VA_ARGS_TAG: &str = "va_args";

// ── Raw descriptors ──────────────────────────────────────────────────

/// The `type` field of a raw descriptor: either a tag string (scalar,
/// `va_args`, or a previously registered struct id) or an inline struct
/// definition.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Tag(String),
    Struct { id: String, fields: Vec<TypeInfo> },
}

/// A caller-supplied type description for one argument or the return value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub expr: TypeExpr,
    /// Element count; a value above 1 wraps the type into a fixed-size
    /// contiguous aggregate.
    pub size: u64,
    /// Pass a pointer to the value instead of the value itself.
    pub addr: bool,
    /// Echo the (possibly mutated) value back after the call. Only
    /// meaningful together with `addr`.
    pub out: bool,
    /// Pass the caller's own storage by address, without copy-back.
    pub by_ref: bool,
}

impl TypeInfo {
    pub fn tag(tag: impl Into<String>) -> Self {
        TypeInfo {
            expr: TypeExpr::Tag(tag.into()),
            size: 1,
            addr: false,
            out: false,
            by_ref: false,
        }
    }

    pub fn struct_of(id: impl Into<String>, fields: Vec<TypeInfo>) -> Self {
        TypeInfo {
            expr: TypeExpr::Struct {
                id: id.into(),
                fields,
            },
            size: 1,
            addr: false,
            out: false,
            by_ref: false,
        }
    }

    pub fn va_args() -> Self {
        Self::tag(VA_ARGS_TAG)
    }

    pub fn array(mut self, len: u64) -> Self {
        self.size = len;
        self
    }

    pub fn by_addr(mut self) -> Self {
        self.addr = true;
        self
    }

    pub fn with_out(mut self) -> Self {
        self.out = true;
        self
    }

    pub fn by_ref(mut self) -> Self {
        self.by_ref = true;
        self
    }
}

// ── Resolved descriptors ─────────────────────────────────────────────

/// A fully resolved type: the vocabulary the frame builder, invoker and
/// marshaler operate on. Struct references share the registry's layout.
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Scalar(ScalarKind),
    Array {
        elem: Box<TypeDescriptor>,
        len: u64,
    },
    Struct(Arc<StructLayout>),
    VarArgs,
}

impl TypeDescriptor {
    /// Resolve a raw descriptor. Struct references either look up an
    /// existing registration (bare tag) or register-or-get (inline
    /// definition).
    pub fn parse(info: &TypeInfo) -> Result<Self> {
        let base = match &info.expr {
            TypeExpr::Tag(tag) if tag == VA_ARGS_TAG => {
                if info.size > 1 || info.addr || info.out || info.by_ref {
                    return Err(Error::Type(
                        "va_args takes no size or passing hints".into(),
                    ));
                }
                return Ok(TypeDescriptor::VarArgs);
            }
            TypeExpr::Tag(tag) => match ScalarKind::from_tag(tag) {
                Some(kind) => TypeDescriptor::Scalar(kind),
                None => {
                    let layout = registry::global().lookup(tag).ok_or_else(|| {
                        Error::Lookup(format!(
                            "unknown type tag '{tag}': not a scalar and no struct registered under that id"
                        ))
                    })?;
                    TypeDescriptor::Struct(layout)
                }
            },
            TypeExpr::Struct { id, fields } => {
                let layout = registry::global().register_or_get(id, fields)?;
                TypeDescriptor::Struct(layout)
            }
        };

        if info.size > 1 {
            if matches!(base, TypeDescriptor::Scalar(ScalarKind::Void)) {
                return Err(Error::Type("array of void is not a type".into()));
            }
            return Ok(TypeDescriptor::Array {
                elem: Box::new(base),
                len: info.size,
            });
        }
        Ok(base)
    }

    /// Resolve a return-type descriptor. `void` is allowed here; `va_args`
    /// and arrays are not.
    pub fn parse_return(info: &TypeInfo) -> Result<Self> {
        let desc = Self::parse(info)?;
        match desc {
            TypeDescriptor::VarArgs => {
                Err(Error::Type("va_args is not a return type".into()))
            }
            TypeDescriptor::Array { .. } => {
                Err(Error::Type("array return types are not supported".into()))
            }
            other => Ok(other),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Scalar(ScalarKind::Void))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, TypeDescriptor::Array { .. } | TypeDescriptor::Struct(_))
    }

    /// Resolved storage size in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            TypeDescriptor::Scalar(kind) => kind.size(),
            TypeDescriptor::Array { elem, len } => elem.byte_size() * *len as usize,
            TypeDescriptor::Struct(layout) => layout.size,
            TypeDescriptor::VarArgs => 0,
        }
    }

    /// The libffi view of this type. Aggregates are rebuilt on demand because
    /// the underlying descriptors are not shareable across threads.
    pub fn ffi_type(&self) -> Type {
        match self {
            TypeDescriptor::Scalar(kind) => kind.ffi_type(),
            TypeDescriptor::Array { elem, len } => {
                let elem_ty = elem.ffi_type();
                Type::structure((0..*len as usize).map(|_| elem_ty.clone()))
            }
            TypeDescriptor::Struct(layout) => layout.ffi_type(),
            TypeDescriptor::VarArgs => {
                unreachable!("va_args never reaches the call interface")
            }
        }
    }

    /// Display name used in error messages.
    pub fn name(&self) -> String {
        match self {
            TypeDescriptor::Scalar(kind) => kind.tag().to_string(),
            TypeDescriptor::Array { elem, len } => format!("{}[{len}]", elem.name()),
            TypeDescriptor::Struct(layout) => format!("struct {}", layout.id),
            TypeDescriptor::VarArgs => VA_ARGS_TAG.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tags_round_trip() {
        for tag in [
            "u8", "u16", "u32", "u64", "s8", "s16", "s32", "s64", "f32", "f64",
            "c_ptr", "void",
        ] {
            let kind = ScalarKind::from_tag(tag).expect(tag);
            assert_eq!(kind.tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(ScalarKind::from_tag("i32").is_none());
        let err = TypeDescriptor::parse(&TypeInfo::tag("quaternion")).unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    #[test]
    fn size_above_one_wraps_into_array() {
        let desc = TypeDescriptor::parse(&TypeInfo::tag("u32").array(256)).unwrap();
        match desc {
            TypeDescriptor::Array { ref elem, len } => {
                assert_eq!(len, 256);
                assert_eq!(elem.byte_size(), 4);
            }
            other => panic!("expected array, got {other:?}"),
        }
        assert_eq!(desc.byte_size(), 1024);
    }

    #[test]
    fn va_args_rejects_hints_and_return_position() {
        assert!(TypeDescriptor::parse(&TypeInfo::va_args().by_addr()).is_err());
        assert!(TypeDescriptor::parse_return(&TypeInfo::va_args()).is_err());
        assert!(matches!(
            TypeDescriptor::parse(&TypeInfo::va_args()).unwrap(),
            TypeDescriptor::VarArgs
        ));
    }

    #[test]
    fn variadic_promotions() {
        assert_eq!(ScalarKind::F32.promoted(), ScalarKind::F64);
        assert_eq!(ScalarKind::U8.promoted(), ScalarKind::U32);
        assert_eq!(ScalarKind::S16.promoted(), ScalarKind::S32);
        assert_eq!(ScalarKind::U64.promoted(), ScalarKind::U64);
        assert_eq!(ScalarKind::CPtr.promoted(), ScalarKind::CPtr);
    }
}
