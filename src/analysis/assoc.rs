//! Member Associator: ties a container access to the field whose value it
//! writes out or reads back.
//!
//! This is a bounded local search over the instruction list, not a dataflow
//! framework. A write searches backward for the `GetField` that produced the
//! written value; a read searches forward for the `PutField` that receives
//! the loaded value. Any instruction that indicates the value was routed
//! somewhere else disqualifies the search, returning `None` ("stored or
//! loaded through a local, not a field"). Values that travel through
//! non-trivial control flow are deliberately reported as unassociated rather
//! than risked being mis-associated.

use crate::jvm::{FieldRef, Insn, LocalVariable, MethodCode};

/// Whether a container access consumes a value (write) or produces one (read)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Find the field a container access at `access_idx` is paired with
pub fn find_associated_member(
    code: &MethodCode,
    access_idx: usize,
    kind: AccessKind,
) -> Option<FieldRef> {
    match kind {
        AccessKind::Write => find_source_field(code, access_idx),
        AccessKind::Read => find_target_field(code, access_idx),
    }
}

/// Backward search: the value written into the container should have been
/// produced by a `getfield` with nothing in between that re-routes it
fn find_source_field(code: &MethodCode, access_idx: usize) -> Option<FieldRef> {
    let mut idx = access_idx;
    while idx > 0 {
        idx -= 1;
        match code.insn(idx)? {
            Insn::GetField(fref) => return Some(fref.clone()),

            // Transparent: conversions and pushed operands don't move the value
            Insn::Const(_)
            | Insn::CheckCast(_)
            | Insn::InstanceOf(_)
            | Insn::Arith(_)
            | Insn::Concat
            | Insn::IInc(_)
            | Insn::ArrayLength
            | Insn::Other => {}

            // Anything else means the written value came from somewhere other
            // than a direct field read
            _ => return None,
        }
    }
    None
}

/// Forward search: the value read from the container should land in a
/// `putfield` with nothing in between that tests or re-routes it
fn find_target_field(code: &MethodCode, access_idx: usize) -> Option<FieldRef> {
    let mut idx = access_idx + 1;
    while let Some(insn) = code.insn(idx) {
        match insn {
            Insn::PutField(fref) => return Some(fref.clone()),

            // A cast between the read and the store is the common pattern for
            // reference-typed values; keep walking
            Insn::CheckCast(_)
            | Insn::InstanceOf(_)
            | Insn::Const(_)
            | Insn::Arith(_)
            | Insn::Concat
            | Insn::IInc(_)
            | Insn::ArrayLength
            | Insn::Other => {}

            // Branch right after the read: the value is being tested, not
            // stored. New: the value is being routed into a constructor.
            // Loads/stores: the value went through a local. Every other
            // access or call: the value escaped.
            _ => return None,
        }
        idx += 1;
    }
    None
}

/// Name the local-variable slot a read value is spilled into, if the very
/// next thing that happens to it is a store; used to word the advisory
/// "unresolved association" finding
pub fn spilled_local<'a>(code: &'a MethodCode, access_idx: usize) -> Option<&'a LocalVariable> {
    let mut idx = access_idx + 1;
    while let Some(insn) = code.insn(idx) {
        match insn {
            Insn::Store(slot) => return code.local(*slot),
            Insn::CheckCast(_) | Insn::InstanceOf(_) => idx += 1,
            _ => return None,
        }
    }
    None
}
