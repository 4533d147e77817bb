//! Unit lifecycle: engines accumulate state only within one compiled unit.
//!
//! Every pairing engine is cleared when a unit begins, so nothing observed in
//! one class can leak into the diagnostics of the next. The phase field
//! enforces the begin/scan/end sequencing; calling out of sequence is a host
//! bug and panics rather than producing findings against stale state.

use super::report::Reporter;
use super::Pairing;
use crate::jvm::ClassUnit;

/// Where the analyzer is in the per-unit sequence
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Reconciling,
}

/// Drives a set of pairing engines over one unit at a time
#[derive(Debug)]
pub struct UnitAnalyzer {
    pairings: Vec<Pairing>,
    phase: Phase,
}

impl UnitAnalyzer {
    pub fn new(pairings: Vec<Pairing>) -> UnitAnalyzer {
        UnitAnalyzer {
            pairings,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Start a fresh unit. Always clears engine state, even if the previous
    /// unit was abandoned mid-scan.
    pub fn begin_unit(&mut self) {
        assert_ne!(
            self.phase,
            Phase::Reconciling,
            "begin_unit called while reconciling"
        );
        for pairing in &mut self.pairings {
            pairing.clear();
        }
        self.phase = Phase::Scanning;
    }

    /// Feed the unit's method bodies to every engine, in program order
    pub fn scan(&mut self, unit: &ClassUnit) {
        assert_eq!(self.phase, Phase::Scanning, "scan called outside a unit");
        log::debug!("scanning unit {}", unit.name);
        for pairing in &mut self.pairings {
            pairing.scan_unit(unit);
        }
    }

    /// Reconcile everything collected since `begin_unit` and reset
    pub fn end_unit(&mut self, reporter: &mut dyn Reporter) {
        assert_eq!(
            self.phase,
            Phase::Scanning,
            "end_unit called without begin_unit"
        );
        self.phase = Phase::Reconciling;
        for pairing in &mut self.pairings {
            pairing.reconcile(reporter);
            pairing.clear();
        }
        self.phase = Phase::Idle;
    }

    /// Run the full begin/scan/end sequence over one unit
    pub fn analyze_unit(&mut self, unit: &ClassUnit, reporter: &mut dyn Reporter) {
        self.begin_unit();
        self.scan(unit);
        self.end_unit(reporter);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analysis::{
        KeyedConfig, KeyedPairing, MemoryReporter, OrderedConfig, OrderedPairing, Violation,
    };
    use crate::jvm::*;

    fn analyzer() -> UnitAnalyzer {
        UnitAnalyzer::new(vec![
            Pairing::Ordered(OrderedPairing::new(OrderedConfig::parcel())),
            Pairing::Keyed(KeyedPairing::new(KeyedConfig::bundle())),
        ])
    }

    /// A class that writes one field to a parcel and never reads it back
    fn lopsided_unit(class: &str) -> ClassUnit {
        let field = FieldRef {
            owner: BinaryName::from_string(class.to_string()).unwrap(),
            name: UnqualifiedName::from_string(String::from("count")).unwrap(),
            descriptor: FieldType::int(),
        };
        let write = MethodCode {
            name: UnqualifiedName::WRITETOPARCEL,
            descriptor: MethodDescriptor::parse("(Landroid/os/Parcel;I)V").unwrap(),
            access: MethodAccessFlags::PUBLIC,
            insns: vec![
                (Insn::Load(1), 10),
                (Insn::Load(0), 10),
                (Insn::GetField(field), 10),
                (
                    Insn::Invoke(
                        InvokeKind::Virtual,
                        MethodRef {
                            owner: BinaryName::PARCEL,
                            name: UnqualifiedName::from_string(String::from("writeInt")).unwrap(),
                            descriptor: MethodDescriptor::parse("(I)V").unwrap(),
                        },
                    ),
                    10,
                ),
            ],
            locals: vec![],
        };
        ClassUnit {
            name: BinaryName::from_string(class.to_string()).unwrap(),
            super_name: None,
            fields: vec![],
            methods: vec![write],
        }
    }

    fn empty_unit(class: &str) -> ClassUnit {
        ClassUnit {
            name: BinaryName::from_string(class.to_string()).unwrap(),
            super_name: None,
            fields: vec![],
            methods: vec![],
        }
    }

    fn run(analyzer: &mut UnitAnalyzer, unit: &ClassUnit) -> Vec<Violation> {
        let mut reporter = MemoryReporter::new();
        analyzer.analyze_unit(unit, &mut reporter);
        reporter.violations
    }

    #[test]
    fn state_does_not_leak_between_units() {
        let mut analyzer = analyzer();
        let findings = run(&mut analyzer, &lopsided_unit("com/example/A"));
        assert_eq!(findings.len(), 1);

        // a following clean unit must not inherit the unread write
        let findings = run(&mut analyzer, &empty_unit("com/example/B"));
        assert_eq!(findings, vec![]);
    }

    #[test]
    fn analyzing_the_same_unit_twice_is_idempotent() {
        let mut analyzer = analyzer();
        let unit = lopsided_unit("com/example/A");
        let first = run(&mut analyzer, &unit);
        let second = run(&mut analyzer, &unit);
        assert_eq!(first, second);
    }

    #[test]
    fn begin_unit_recovers_from_an_abandoned_scan() {
        let mut analyzer = analyzer();
        analyzer.begin_unit();
        analyzer.scan(&lopsided_unit("com/example/A"));
        // no end_unit; the next begin clears the abandoned state
        let findings = run(&mut analyzer, &empty_unit("com/example/B"));
        assert_eq!(findings, vec![]);
    }

    #[test]
    #[should_panic(expected = "end_unit called without begin_unit")]
    fn end_unit_out_of_sequence_panics() {
        let mut analyzer = analyzer();
        let mut reporter = MemoryReporter::new();
        analyzer.end_unit(&mut reporter);
    }

    #[test]
    #[should_panic(expected = "scan called outside a unit")]
    fn scan_before_begin_panics() {
        let mut analyzer = analyzer();
        analyzer.scan(&empty_unit("com/example/A"));
    }
}
