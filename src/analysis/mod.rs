//! The pairing analysis: stack-effect resolution, member association, and
//! the two pairing policies (ordered queues and keyed maps) that detect
//! missing, out-of-order, duplicated, or type-inconsistent container
//! operations.

mod assoc;
mod keyed;
mod ordered;
mod report;
mod stack;
mod tables;
mod unit;

pub use assoc::{find_associated_member, spilled_local, AccessKind};
pub use keyed::KeyedPairing;
pub use ordered::OrderedPairing;
pub use report::{Location, MemoryReporter, Reporter, Violation, ViolationKind};
pub use stack::{resolve_argument, ResolvedConst};
pub use tables::{CompatTable, KeyedConfig, OrderedConfig};
pub use unit::{Phase, UnitAnalyzer};

use crate::jvm::{FieldRef, FieldType, UnqualifiedName};

/// Result of analyzing one container-access instruction
///
/// Created lazily per access; lives for one unit pass and is never persisted
/// across units.
#[derive(Clone, Debug)]
pub struct ResolvedOperation {
    /// Whether the container access consumes or produces the value
    pub access: AccessKind,
    /// Name of the container method invoked (`writeInt`, `getString`, ...)
    pub method: UnqualifiedName,
    /// Resolved constant key, for keyed accesses
    pub key: Option<String>,
    /// Declared type of the transported value
    pub value_type: Option<FieldType>,
    /// Field the value comes from / lands in; `None` when it is purely local
    pub member: Option<FieldRef>,
    pub location: Location,
}

impl ResolvedOperation {
    /// Short description for diagnostics: the member name when there is one,
    /// otherwise the container method involved
    pub fn describe(&self) -> String {
        match &self.member {
            Some(member) => format!("the {} field", member.name),
            None => format!("the value passed through {}", self.method),
        }
    }
}

/// One pairing policy over the shared primitives
///
/// A closed set of variants rather than a trait hierarchy: the policies
/// share all of their collaborators and differ only in bookkeeping.
#[derive(Debug)]
pub enum Pairing {
    Ordered(OrderedPairing),
    Keyed(KeyedPairing),
}

impl Pairing {
    /// Discard every queue/map entry and buffered finding
    pub fn clear(&mut self) {
        match self {
            Pairing::Ordered(engine) => engine.clear(),
            Pairing::Keyed(engine) => engine.clear(),
        }
    }

    /// Visit every relevant call site of the unit, in program order
    pub fn scan_unit(&mut self, unit: &crate::jvm::ClassUnit) {
        match self {
            Pairing::Ordered(engine) => engine.scan_unit(unit),
            Pairing::Keyed(engine) => engine.scan_unit(unit),
        }
    }

    /// Reconcile collected operations and emit findings
    pub fn reconcile(&mut self, reporter: &mut dyn Reporter) {
        match self {
            Pairing::Ordered(engine) => engine.reconcile(reporter),
            Pairing::Keyed(engine) => engine.reconcile(reporter),
        }
    }
}
