//! Keyed Map Pairing: values stored into a keyed container must be retrieved
//! under the same key, into the same field, with the same type, and without
//! duplicate stores.
//!
//! Save and restore operations are recorded in two maps keyed by the resolved
//! constant key. Duplicates within one map are reported immediately and never
//! replace the first occurrence (first occurrence wins for the later
//! cross-map comparison). Keys whose argument cannot be resolved to a literal
//! bypass the maps entirely and raise their own finding. The maps are ordered
//! so that reconciliation output is deterministic run to run.

use super::report::{Location, Reporter, Violation, ViolationKind};
use super::stack::{resolve_argument, ResolvedConst};
use super::tables::KeyedConfig;
use super::{find_associated_member, spilled_local, AccessKind, ResolvedOperation};
use crate::jvm::{ClassUnit, Insn, InvokeKind, MethodCode, MethodRef, Name, UnqualifiedName};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct KeyedPairing {
    config: KeyedConfig,
    saved: BTreeMap<String, ResolvedOperation>,
    restored: BTreeMap<String, ResolvedOperation>,
    /// Members already used per direction, for key-reuse detection
    saved_members: BTreeSet<UnqualifiedName>,
    restored_members: BTreeSet<UnqualifiedName>,
    /// Findings raised during scanning, flushed ahead of reconciliation ones
    pending: Vec<Violation>,
}

impl KeyedPairing {
    pub fn new(config: KeyedConfig) -> KeyedPairing {
        KeyedPairing {
            config,
            saved: BTreeMap::new(),
            restored: BTreeMap::new(),
            saved_members: BTreeSet::new(),
            restored_members: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.saved.clear();
        self.restored.clear();
        self.saved_members.clear();
        self.restored_members.clear();
        self.pending.clear();
    }

    pub fn scan_unit(&mut self, unit: &ClassUnit) {
        // One direction at a time: all save sites in program order, then all
        // restore sites
        for method in &unit.methods {
            if self.config.save_entry_points.contains(&method.name) {
                self.scan_method(unit, method, AccessKind::Write);
            }
        }
        for method in &unit.methods {
            if self.config.restore_entry_points.contains(&method.name) {
                self.scan_method(unit, method, AccessKind::Read);
            }
        }
    }

    fn scan_method(&mut self, unit: &ClassUnit, method: &MethodCode, access: AccessKind) {
        for (idx, (insn, line)) in method.insns.iter().enumerate() {
            let mref = match insn {
                Insn::Invoke(InvokeKind::Virtual, mref) if mref.owner == self.config.container => {
                    mref
                }
                _ => continue,
            };
            if !is_keyed_access(mref, access) {
                continue;
            }

            let location = Location {
                class: unit.name.clone(),
                method: method.name.clone(),
                line: *line,
            };

            // The key is always the first declared argument
            let key = match resolve_argument(method, idx, 0) {
                ResolvedConst::Const(value) => value.as_key(),
                ResolvedConst::NotConstant => {
                    self.pending.push(Violation {
                        kind: ViolationKind::NonConstantKey,
                        message: format!(
                            "The key passed to {} could not be resolved to a constant",
                            mref.name
                        ),
                        location,
                        secondary_location: None,
                    });
                    continue;
                }
            };

            let member = find_associated_member(method, idx, access);
            let value_type = match access {
                AccessKind::Write => mref.descriptor.parameters.get(1).cloned(),
                AccessKind::Read => mref.descriptor.return_type.clone(),
            };
            let op = ResolvedOperation {
                access,
                method: mref.name.clone(),
                key: Some(key.clone()),
                value_type,
                member,
                location: location.clone(),
            };
            log::debug!("{:?} of key {:?} at {}", access, key, location);

            if op.member.is_none() {
                // Saved or restored locally; advisory only. A spilled local
                // is only meaningful on the restore side, where the loaded
                // value is what gets stored.
                let detail = match access {
                    AccessKind::Read => spilled_local(method, idx)
                        .map(|local| format!(" (stored in local '{}')", local.name))
                        .unwrap_or_default(),
                    AccessKind::Write => String::new(),
                };
                self.pending.push(Violation {
                    kind: ViolationKind::UnresolvedAssociation,
                    message: format!(
                        "The value under the {} key could not be tied to a field{}",
                        key, detail
                    ),
                    location: location.clone(),
                    secondary_location: None,
                });
            }

            self.record(op, access);
        }
    }

    fn record(&mut self, op: ResolvedOperation, access: AccessKind) {
        let (map, members, already) = match access {
            AccessKind::Write => (&mut self.saved, &mut self.saved_members, "saved"),
            AccessKind::Read => (&mut self.restored, &mut self.restored_members, "restored"),
        };
        let key = op.key.clone().unwrap_or_default();

        if let Some(member) = &op.member {
            if !members.insert(member.name.clone()) {
                self.pending.push(Violation {
                    kind: ViolationKind::DuplicateMember,
                    message: format!("The {} field is already {}", member.name, already),
                    location: op.location.clone(),
                    secondary_location: None,
                });
            }
        }

        if let Some(first) = map.get(&key) {
            // First occurrence wins: the original entry stays in place for
            // the cross-map comparison
            self.pending.push(Violation {
                kind: ViolationKind::DuplicateKey,
                message: format!("The {} key has been already {}", key, already),
                location: op.location,
                secondary_location: Some(first.location.clone()),
            });
        } else {
            map.insert(key, op);
        }
    }

    pub fn reconcile(&mut self, reporter: &mut dyn Reporter) {
        for violation in self.pending.drain(..) {
            reporter.report(violation);
        }

        for (key, save_op) in &self.saved {
            let restore_op = match self.restored.get(key) {
                Some(op) => op,
                None => {
                    reporter.report(Violation {
                        kind: ViolationKind::MissingCounterpart,
                        message: format!(
                            "The {} key is being saved but has never been restored",
                            key
                        ),
                        location: save_op.location.clone(),
                        secondary_location: None,
                    });
                    continue;
                }
            };

            // Same key, different field on the two sides
            if let (Some(saved), Some(restored)) = (&save_op.member, &restore_op.member) {
                if saved.name != restored.name {
                    reporter.report(Violation {
                        kind: ViolationKind::FieldMismatch,
                        message: format!(
                            "The {} key is saved from field {} but restored into field {}",
                            key, saved.name, restored.name
                        ),
                        location: restore_op.location.clone(),
                        secondary_location: Some(save_op.location.clone()),
                    });
                }
            }

            // Declared value types must agree across the pair
            if let (Some(saved), Some(restored)) = (&save_op.value_type, &restore_op.value_type) {
                if saved != restored {
                    reporter.report(Violation {
                        kind: ViolationKind::TypeMismatch,
                        message: format!(
                            "The {} key is saved as a {} but restored as a {}",
                            key,
                            saved.pretty(),
                            restored.pretty()
                        ),
                        location: restore_op.location.clone(),
                        secondary_location: Some(save_op.location.clone()),
                    });
                }
            }
        }

        for (key, restore_op) in &self.restored {
            if !self.saved.contains_key(key) {
                reporter.report(Violation {
                    kind: ViolationKind::MissingCounterpart,
                    message: format!(
                        "The {} key is being restored but has never been saved",
                        key
                    ),
                    location: restore_op.location.clone(),
                    secondary_location: None,
                });
            }
        }
    }
}

/// A container call participates in keyed pairing when it carries a key
/// argument: stores take a key and a value, loads take at least the key.
/// `containsKey` probes are not accesses.
fn is_keyed_access(mref: &MethodRef, access: AccessKind) -> bool {
    if mref.name == UnqualifiedName::CONTAINSKEY {
        return false;
    }
    match access {
        AccessKind::Write => {
            mref.name.as_str().starts_with("put") && mref.descriptor.parameters.len() >= 2
        }
        AccessKind::Read => {
            mref.name.as_str().starts_with("get")
                && !mref.descriptor.parameters.is_empty()
                && mref.descriptor.return_type.is_some()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analysis::MemoryReporter;
    use crate::jvm::*;

    const OWNER: &str = "com/example/StateActivity";

    fn field(name: &str, descriptor: &str) -> FieldRef {
        FieldRef {
            owner: BinaryName::from_string(String::from(OWNER)).unwrap(),
            name: UnqualifiedName::from_string(name.to_string()).unwrap(),
            descriptor: FieldType::parse(descriptor).unwrap(),
        }
    }

    fn bundle_call(name: &str, descriptor: &str) -> Insn {
        Insn::Invoke(
            InvokeKind::Virtual,
            MethodRef {
                owner: BinaryName::BUNDLE,
                name: UnqualifiedName::from_string(name.to_string()).unwrap(),
                descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            },
        )
    }

    fn method(name: UnqualifiedName, descriptor: &str, insns: Vec<Insn>) -> MethodCode {
        MethodCode {
            name,
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            access: MethodAccessFlags::PUBLIC,
            insns: insns.into_iter().map(|i| (i, 0)).collect(),
            locals: vec![],
        }
    }

    /// `outState.put<T>(key, this.<field>)`
    fn save(key: &str, put: &str, descriptor: &str, field_name: &str, field_ty: &str) -> Vec<Insn> {
        vec![
            Insn::Load(1),
            Insn::Const(ConstValue::Str(key.to_string())),
            Insn::Load(0),
            Insn::GetField(field(field_name, field_ty)),
            bundle_call(put, descriptor),
        ]
    }

    /// `this.<field> = savedInstanceState.get<T>(key)`
    fn restore(key: &str, get: &str, descriptor: &str, field_name: &str, field_ty: &str) -> Vec<Insn> {
        vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::Const(ConstValue::Str(key.to_string())),
            bundle_call(get, descriptor),
            Insn::PutField(field(field_name, field_ty)),
        ]
    }

    fn unit(methods: Vec<MethodCode>) -> ClassUnit {
        ClassUnit {
            name: BinaryName::from_string(String::from(OWNER)).unwrap(),
            super_name: None,
            fields: vec![],
            methods,
        }
    }

    fn save_method(insns: Vec<Insn>) -> MethodCode {
        method(
            UnqualifiedName::ONSAVEINSTANCESTATE,
            "(Landroid/os/Bundle;)V",
            insns,
        )
    }

    fn restore_method(insns: Vec<Insn>) -> MethodCode {
        method(UnqualifiedName::ONCREATE, "(Landroid/os/Bundle;)V", insns)
    }

    fn run(unit: &ClassUnit) -> Vec<Violation> {
        let mut engine = KeyedPairing::new(KeyedConfig::bundle());
        let mut reporter = MemoryReporter::new();
        engine.scan_unit(unit);
        engine.reconcile(&mut reporter);
        reporter.reportable().cloned().collect()
    }

    #[test]
    fn save_and_restore_round_trip_is_clean() {
        let unit = unit(vec![
            save_method(save("count", "putInt", "(Ljava/lang/String;I)V", "count", "I")),
            restore_method(restore("count", "getInt", "(Ljava/lang/String;)I", "count", "I")),
        ]);
        assert_eq!(run(&unit), vec![]);
    }

    #[test]
    fn saved_but_never_restored() {
        let unit = unit(vec![save_method(save(
            "count", "putInt", "(Ljava/lang/String;I)V", "count", "I",
        ))]);
        let violations = run(&unit);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::MissingCounterpart);
        assert_eq!(
            violations[0].message,
            "The count key is being saved but has never been restored"
        );
    }

    #[test]
    fn restored_but_never_saved() {
        let unit = unit(vec![restore_method(restore(
            "count", "getInt", "(Ljava/lang/String;)I", "count", "I",
        ))]);
        let violations = run(&unit);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::MissingCounterpart);
        assert_eq!(
            violations[0].message,
            "The count key is being restored but has never been saved"
        );
    }

    #[test]
    fn duplicate_key_reported_once_and_first_occurrence_wins() {
        // "K" saved twice, into two different fields; restored once into the
        // first field
        let mut insns = save("K", "putInt", "(Ljava/lang/String;I)V", "first", "I");
        insns.extend(save("K", "putInt", "(Ljava/lang/String;I)V", "second", "I"));
        let unit = unit(vec![
            save_method(insns),
            restore_method(restore("K", "getInt", "(Ljava/lang/String;)I", "first", "I")),
        ]);
        let violations = run(&unit);
        let duplicates: Vec<_> = violations
            .iter()
            .filter(|v| v.kind == ViolationKind::DuplicateKey)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].message, "The K key has been already saved");
        // the first save won the map slot, so the restore pairs cleanly
        assert!(!violations
            .iter()
            .any(|v| v.kind == ViolationKind::FieldMismatch));
    }

    #[test]
    fn duplicate_member_across_two_keys() {
        let mut insns = save("a", "putInt", "(Ljava/lang/String;I)V", "count", "I");
        insns.extend(save("b", "putInt", "(Ljava/lang/String;I)V", "count", "I"));
        let unit = unit(vec![
            save_method(insns),
            restore_method({
                let mut insns = restore("a", "getInt", "(Ljava/lang/String;)I", "count", "I");
                insns.extend(restore("b", "getInt", "(Ljava/lang/String;)I", "other", "I"));
                insns
            }),
        ]);
        let violations = run(&unit);
        let duplicate_members: Vec<_> = violations
            .iter()
            .filter(|v| v.kind == ViolationKind::DuplicateMember)
            .collect();
        assert_eq!(duplicate_members.len(), 1);
        assert_eq!(duplicate_members[0].message, "The count field is already saved");
    }

    #[test]
    fn type_mismatch_reported_at_both_sites() {
        // putDouble("K", ...) then getInt("K")
        let unit = unit(vec![
            save_method(save("K", "putDouble", "(Ljava/lang/String;D)V", "value", "D")),
            restore_method(restore("K", "getInt", "(Ljava/lang/String;)I", "value", "D")),
        ]);
        let violations = run(&unit);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::TypeMismatch);
        assert!(violations[0].message.contains("double"));
        assert!(violations[0].message.contains("int"));
        assert!(violations[0].message.contains('K'));
        assert_eq!(violations[0].location.method, UnqualifiedName::ONCREATE);
        assert_eq!(
            violations[0]
                .secondary_location
                .as_ref()
                .expect("save site")
                .method,
            UnqualifiedName::ONSAVEINSTANCESTATE
        );
    }

    #[test]
    fn field_mismatch_across_save_and_restore() {
        let unit = unit(vec![
            save_method(save("K", "putInt", "(Ljava/lang/String;I)V", "first", "I")),
            restore_method(restore("K", "getInt", "(Ljava/lang/String;)I", "second", "I")),
        ]);
        let violations = run(&unit);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::FieldMismatch);
        assert!(violations[0].message.contains("first"));
        assert!(violations[0].message.contains("second"));
    }

    #[test]
    fn non_constant_key_bypasses_the_maps() {
        // key loaded from a field
        let unit = unit(vec![save_method(vec![
            Insn::Load(1),
            Insn::Load(0),
            Insn::GetField(field("KEY", "Ljava/lang/String;")),
            Insn::Load(0),
            Insn::GetField(field("count", "I")),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ])]);
        let violations = run(&unit);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::NonConstantKey);
    }

    #[test]
    fn concatenated_literal_key_pairs_with_plain_literal() {
        let mut save_insns = vec![
            Insn::Load(1),
            Insn::Const(ConstValue::Str(String::from("user."))),
            Insn::Const(ConstValue::Str(String::from("name"))),
            Insn::Concat,
            Insn::Load(0),
            Insn::GetField(field("name", "Ljava/lang/String;")),
            bundle_call("putString", "(Ljava/lang/String;Ljava/lang/String;)V"),
        ];
        save_insns.push(Insn::Return(false));
        let unit = unit(vec![
            save_method(save_insns),
            restore_method(restore(
                "user.name",
                "getString",
                "(Ljava/lang/String;)Ljava/lang/String;",
                "name",
                "Ljava/lang/String;",
            )),
        ]);
        assert_eq!(run(&unit), vec![]);
    }

    #[test]
    fn contains_key_probe_is_ignored() {
        let unit = unit(vec![restore_method(vec![
            Insn::Load(1),
            Insn::Const(ConstValue::Str(String::from("count"))),
            bundle_call("containsKey", "(Ljava/lang/String;)Z"),
            Insn::Branch(BranchKind::If),
        ])]);
        assert_eq!(run(&unit), vec![]);
    }

    #[test]
    fn locally_restored_value_is_advisory_only() {
        let unit = unit(vec![
            save_method(save("count", "putInt", "(Ljava/lang/String;I)V", "count", "I")),
            restore_method(vec![
                Insn::Load(1),
                Insn::Const(ConstValue::Str(String::from("count"))),
                bundle_call("getInt", "(Ljava/lang/String;)I"),
                Insn::Store(2),
            ]),
        ]);
        let mut engine = KeyedPairing::new(KeyedConfig::bundle());
        let mut reporter = MemoryReporter::new();
        engine.scan_unit(&unit);
        engine.reconcile(&mut reporter);
        // the key still pairs; the only trace is the advisory association
        assert!(reporter.reportable().next().is_none());
        assert!(reporter
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::UnresolvedAssociation));
    }
}
