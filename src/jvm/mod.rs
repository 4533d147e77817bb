//! Read-only view over loader-supplied JVM metadata: names, type
//! descriptors, access flags, and normalized instruction lists.

mod access_flags;
mod descriptors;
mod insn;
mod names;

pub use access_flags::*;
pub use descriptors::*;
pub use insn::*;
pub use names::*;
