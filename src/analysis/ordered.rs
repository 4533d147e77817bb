//! Ordered Queue Pairing: a container serialized in a fixed order must be
//! read back in that same order, with compatible types.
//!
//! Write operations enqueue in program order into a write queue and reads
//! into a read queue; at end of unit the queues are drained head-to-head
//! comparing member identity. On a mismatch only the offending write is
//! discarded and the drain resyncs against subsequent reads - a deliberate
//! simplicity/completeness trade-off, not a full alignment diff.

use super::report::{Location, Reporter, Violation, ViolationKind};
use super::tables::OrderedConfig;
use super::{find_associated_member, AccessKind, ResolvedOperation};
use crate::jvm::{ClassUnit, FieldType, Insn, InvokeKind, MethodCode, MethodDescriptor,
                 UnqualifiedName};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct OrderedPairing {
    config: OrderedConfig,
    write_queue: VecDeque<ResolvedOperation>,
    read_queue: VecDeque<ResolvedOperation>,
    /// Findings raised during scanning, flushed ahead of reconciliation ones
    pending: Vec<Violation>,
}

impl OrderedPairing {
    pub fn new(config: OrderedConfig) -> OrderedPairing {
        OrderedPairing {
            config,
            write_queue: VecDeque::new(),
            read_queue: VecDeque::new(),
            pending: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.write_queue.clear();
        self.read_queue.clear();
        self.pending.clear();
    }

    pub fn scan_unit(&mut self, unit: &ClassUnit) {
        for method in &unit.methods {
            if let Some(access) = self.method_role(method) {
                let mut visited = vec![(method.name.clone(), method.descriptor.clone())];
                self.scan_method(unit, method, access, &mut visited);
            }
        }
    }

    /// Which sequence, if any, this method contributes to
    fn method_role(&self, method: &MethodCode) -> Option<AccessKind> {
        let takes_container = method
            .descriptor
            .parameters
            .contains(&FieldType::object(self.config.container.clone()));
        if !takes_container {
            return None;
        }
        if self.config.write_entry_points.contains(&method.name) {
            Some(AccessKind::Write)
        } else if self.config.read_entry_points.contains(&method.name) {
            Some(AccessKind::Read)
        } else {
            None
        }
    }

    fn scan_method(
        &mut self,
        unit: &ClassUnit,
        method: &MethodCode,
        access: AccessKind,
        visited: &mut Vec<(UnqualifiedName, MethodDescriptor)>,
    ) {
        for (idx, (insn, line)) in method.insns.iter().enumerate() {
            let mref = match insn {
                Insn::Invoke(InvokeKind::Virtual | InvokeKind::Interface, mref)
                    if mref.owner == self.config.container =>
                {
                    mref
                }
                // A same-class helper taking the container continues the
                // sequence: its accesses join the queue at the call site, in
                // program order. The visited list keeps the descent
                // non-reentrant.
                Insn::Invoke(_, mref) if mref.owner == unit.name => {
                    let takes_container = mref
                        .descriptor
                        .parameters
                        .contains(&FieldType::object(self.config.container.clone()));
                    let seen = visited
                        .iter()
                        .any(|(name, desc)| name == &mref.name && desc == &mref.descriptor);
                    if takes_container && !seen {
                        let helper = unit
                            .methods
                            .iter()
                            .find(|m| m.name == mref.name && m.descriptor == mref.descriptor);
                        if let Some(helper) = helper {
                            log::debug!("following helper {}.{}", unit.name, helper.name);
                            visited.push((helper.name.clone(), helper.descriptor.clone()));
                            self.scan_method(unit, helper, access, visited);
                        }
                    }
                    continue;
                }
                _ => continue,
            };

            let relevant = match access {
                AccessKind::Write => self.config.compat.is_write(&mref.name),
                AccessKind::Read => self.config.compat.is_read(&mref.name),
            };
            if !relevant {
                continue;
            }

            let member = find_associated_member(method, idx, access);
            let op = ResolvedOperation {
                access,
                method: mref.name.clone(),
                key: None,
                value_type: None,
                member,
                location: Location {
                    class: unit.name.clone(),
                    method: method.name.clone(),
                    line: *line,
                },
            };

            log::debug!(
                "{:?} operation {} at {} (member: {:?})",
                access,
                op.method,
                op.location,
                op.member.as_ref().map(|m| m.name.clone()),
            );
            if op.member.is_none() {
                self.pending.push(Violation {
                    kind: ViolationKind::UnresolvedAssociation,
                    message: format!(
                        "The value passed through {} could not be tied to a field",
                        op.method
                    ),
                    location: op.location.clone(),
                    secondary_location: None,
                });
            }

            match access {
                AccessKind::Write => self.write_queue.push_back(op),
                AccessKind::Read => self.read_queue.push_back(op),
            }
        }
    }

    pub fn reconcile(&mut self, reporter: &mut dyn Reporter) {
        for violation in self.pending.drain(..) {
            reporter.report(violation);
        }

        // Type compatibility is positional and independent of the ordering
        // check: the n-th read must use a method compatible with the n-th
        // write, even if the members line up.
        for (write, read) in self.write_queue.iter().zip(self.read_queue.iter()) {
            if !self.config.compat.compatible(&read.method, &write.method) {
                reporter.report(Violation {
                    kind: ViolationKind::TypeMismatch,
                    message: format!("Incompatible types: {} - {}", read.method, write.method),
                    location: read.location.clone(),
                    secondary_location: Some(write.location.clone()),
                });
            }
        }

        // Drain head-to-head; on mismatch drop the write and resync
        while let (Some(write), Some(read)) = (self.write_queue.front(), self.read_queue.front()) {
            if member_matches(write, read) {
                self.write_queue.pop_front();
                self.read_queue.pop_front();
            } else {
                reporter.report(Violation {
                    kind: ViolationKind::OutOfOrder,
                    message: format!(
                        "Writing {} here but the next read expects {}",
                        write.describe(),
                        read.describe()
                    ),
                    location: write.location.clone(),
                    secondary_location: Some(read.location.clone()),
                });
                self.write_queue.pop_front();
            }
        }

        // After one queue empties, everything left lacks a counterpart
        for write in self.write_queue.drain(..) {
            reporter.report(Violation {
                kind: ViolationKind::MissingCounterpart,
                message: format!("{} is written but never read back", capitalize(&write.describe())),
                location: write.location,
                secondary_location: None,
            });
        }
        for read in self.read_queue.drain(..) {
            reporter.report(Violation {
                kind: ViolationKind::MissingCounterpart,
                message: format!("{} is read but never written", capitalize(&read.describe())),
                location: read.location,
                secondary_location: None,
            });
        }
    }
}

/// Member identity: field name and declared type. Two operations on purely
/// local values are indistinguishable without a CFG and treated as matching.
fn member_matches(write: &ResolvedOperation, read: &ResolvedOperation) -> bool {
    match (&write.member, &read.member) {
        (Some(w), Some(r)) => w.name == r.name && w.descriptor == r.descriptor,
        (None, None) => true,
        _ => false,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
