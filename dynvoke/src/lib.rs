//! Dynamic foreign-function invocation.
//!
//! `dynvoke` calls a native function whose signature is only known at run
//! time: the address, return type and argument types arrive as data. The
//! engine resolves the runtime type descriptions, lays the argument values
//! out in per-call arenas so the calling-convention layer gets stable
//! addresses, prepares a call interface (fixed-arity or variadic) through
//! libffi, performs the call inside a fault-containment region, and marshals
//! the result (scalar, pointer or boxed struct) together with the echoed
//! values of output parameters back into structured values.

mod error;
mod frame;
mod guard;
mod invoke;
mod marshal;
mod pool;
mod registry;
mod types;
mod value;

pub mod library;

pub use error::{Error, Result};
pub use invoke::{FnAddr, invoke};
pub use registry::{StructLayout, StructRegistry, global as struct_registry};
pub use types::{ScalarKind, TypeDescriptor, TypeExpr, TypeInfo};
pub use value::{Arg, Outcome, StructValue, Value};
