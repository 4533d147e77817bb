//! Findings and the diagnostics-sink boundary.
//!
//! Violations are first-class values, not errors: nothing in the engine
//! propagates them through `Result`. The host hands the engine a [`Reporter`]
//! and owns aggregation, deduplication and rendering.

use crate::jvm::{BinaryName, UnqualifiedName};
use std::fmt;

/// Category of a pairing violation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Write without read, save without restore, or vice versa
    MissingCounterpart,
    /// Ordered-pairing member mismatch at the queue heads
    OutOfOrder,
    /// Second operation under an already-used key within one direction
    DuplicateKey,
    /// Second key stored into an already-used member within one direction
    DuplicateMember,
    /// Same key tied to different members across save/restore
    FieldMismatch,
    /// Declared types differ across the paired operations
    TypeMismatch,
    /// Key could not be resolved to a compile-time literal
    NonConstantKey,
    /// Value could not be tied to any member (informational)
    UnresolvedAssociation,
}

impl ViolationKind {
    /// Advisory findings are suppressed by default at the reporting boundary
    pub fn is_advisory(self) -> bool {
        matches!(self, ViolationKind::UnresolvedAssociation)
    }

    /// Stable identifier used when rendering diagnostics
    pub fn id(self) -> &'static str {
        match self {
            ViolationKind::MissingCounterpart => "MissingCounterpart",
            ViolationKind::OutOfOrder => "OutOfOrder",
            ViolationKind::DuplicateKey => "DuplicateKey",
            ViolationKind::DuplicateMember => "DuplicateMember",
            ViolationKind::FieldMismatch => "FieldMismatch",
            ViolationKind::TypeMismatch => "TypeMismatch",
            ViolationKind::NonConstantKey => "NonConstantKey",
            ViolationKind::UnresolvedAssociation => "UnresolvedAssociation",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Source position of a container operation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub class: BinaryName,
    pub method: UnqualifiedName,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.method, self.line)
    }
}

/// One categorized finding with its location(s) and formatted message
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub location: Location,
    /// Second site involved in cross-operation findings (eg. the save call
    /// paired with a mismatched restore)
    pub secondary_location: Option<Location>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.kind, self.message)?;
        if let Some(secondary) = &self.secondary_location {
            write!(f, " (see also {})", secondary)?;
        }
        Ok(())
    }
}

/// Diagnostics sink supplied by the host
pub trait Reporter {
    fn report(&mut self, violation: Violation);
}

/// Reporter that collects findings in memory, in emission order
#[derive(Debug, Default)]
pub struct MemoryReporter {
    pub violations: Vec<Violation>,
}

impl MemoryReporter {
    pub fn new() -> MemoryReporter {
        MemoryReporter::default()
    }

    /// Findings that should surface to users under the default policy
    pub fn reportable(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| !v.kind.is_advisory())
    }
}

impl Reporter for MemoryReporter {
    fn report(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}
