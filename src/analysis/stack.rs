//! Stack-Effect Resolver: recovers compile-time-constant call arguments by
//! walking backward over the instruction list.
//!
//! The walk keeps a count of stack values still owed between the call site
//! and the producer of the wanted argument slot, adjusting it with the fixed
//! per-opcode stack-effect table. There is no control-flow graph: reaching a
//! branch, an invoke result, or a field load for the owed slot means the
//! argument is not a constant, and that is a valid, reportable outcome rather
//! than an error.

use crate::jvm::{stack_effect, ConstValue, Insn, MethodCode};

/// Outcome of resolving one argument slot
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedConst {
    Const(ConstValue),
    NotConstant,
}

impl ResolvedConst {
    pub fn is_constant(&self) -> bool {
        matches!(self, ResolvedConst::Const(_))
    }
}

/// Bound on nested constant folding (`Concat` operands resolving through
/// further `Concat`/`Dup` producers); defends against malformed input
const MAX_FOLD_DEPTH: usize = 8;

/// Resolve declared argument `arg_index` (0-based, receiver not counted) of
/// the call at `call_idx`
pub fn resolve_argument(code: &MethodCode, call_idx: usize, arg_index: usize) -> ResolvedConst {
    let params = match code.insn(call_idx) {
        Some(Insn::Invoke(_, mref)) => mref.descriptor.parameters.len(),
        _ => return ResolvedConst::NotConstant,
    };
    if arg_index >= params {
        return ResolvedConst::NotConstant;
    }

    // The receiver sits below every declared parameter, so the number of
    // values still owed is independent of the invoke flavor: the wanted slot
    // has `params - 1 - arg_index` values stacked above it.
    let owed = params - arg_index;
    resolve_stack_value(code, call_idx, owed, 0)
}

/// Find the producer of the stack value `owed` positions deep at `at_idx`
/// (1 = top of stack) and classify it as constant or not
fn resolve_stack_value(
    code: &MethodCode,
    at_idx: usize,
    owed: usize,
    depth: usize,
) -> ResolvedConst {
    if depth > MAX_FOLD_DEPTH {
        log::warn!(
            "constant folding depth exceeded in {} at insn {}",
            code.name,
            at_idx
        );
        return ResolvedConst::NotConstant;
    }

    let mut owed = owed;
    let mut idx = at_idx;
    while idx > 0 {
        idx -= 1;
        let insn = match code.insn(idx) {
            Some(insn) => insn,
            None => return ResolvedConst::NotConstant,
        };

        // A jump between the producer and the consumer means the value may
        // come from more than one path; give up rather than guess.
        if let Insn::Branch(_) = insn {
            log::trace!("resolution in {} crossed a branch at insn {}", code.name, idx);
            return ResolvedConst::NotConstant;
        }

        let effect = stack_effect(insn);
        if effect.pushes >= owed {
            return classify_producer(code, idx, insn, depth);
        }

        // Everything this instruction pushed is above the wanted slot;
        // whatever it popped is owed by still-earlier instructions.
        owed = owed - effect.pushes + effect.pops;
    }

    // Walked off the start of the method: the slot comes from a parameter
    ResolvedConst::NotConstant
}

/// Decide whether the producing instruction yields a compile-time constant
fn classify_producer(
    code: &MethodCode,
    idx: usize,
    insn: &Insn,
    depth: usize,
) -> ResolvedConst {
    match insn {
        Insn::Const(value) => ResolvedConst::Const(value.clone()),

        // Both copies a dup pushes come from the value just below it
        Insn::Dup => resolve_stack_value(code, idx, 1, depth + 1),

        // Fold string concatenation when both segments are literals
        Insn::Concat => {
            let left = resolve_stack_value(code, idx, 2, depth + 1);
            let right = resolve_stack_value(code, idx, 1, depth + 1);
            match (left, right) {
                (
                    ResolvedConst::Const(ConstValue::Str(mut l)),
                    ResolvedConst::Const(ConstValue::Str(r)),
                ) => {
                    l.push_str(&r);
                    ResolvedConst::Const(ConstValue::Str(l))
                }
                _ => ResolvedConst::NotConstant,
            }
        }

        // Field loads, invoke results, locals, swaps: conservatively opaque
        other => {
            log::trace!(
                "non-constant producer {:?} in {} at insn {}",
                other,
                code.name,
                idx
            );
            ResolvedConst::NotConstant
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::*;

    fn method(insns: Vec<Insn>) -> MethodCode {
        MethodCode {
            name: UnqualifiedName::ONSAVEINSTANCESTATE,
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::object(BinaryName::BUNDLE)],
                return_type: None,
            },
            access: MethodAccessFlags::PUBLIC,
            insns: insns.into_iter().map(|i| (i, 0)).collect(),
            locals: vec![],
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

    fn this_field(name: &str, descriptor: &str) -> FieldRef {
        FieldRef {
            owner: BinaryName::from_string(String::from("com/example/Holder")).unwrap(),
            name: UnqualifiedName::from_string(name.to_string()).unwrap(),
            descriptor: FieldType::parse(descriptor).unwrap(),
        }
    }

    fn str_const(s: &str) -> Insn {
        Insn::Const(ConstValue::Str(s.to_string()))
    }

    #[test]
    fn key_below_loaded_value() {
        // state.putInt("count", this.count)
        let code = method(vec![
            Insn::Load(1),
            str_const("count"),
            Insn::Load(0),
            Insn::GetField(this_field("count", "I")),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ]);
        assert_eq!(
            resolve_argument(&code, 4, 0),
            ResolvedConst::Const(ConstValue::Str(String::from("count")))
        );
        // the value argument is a field load, not a constant
        assert_eq!(resolve_argument(&code, 4, 1), ResolvedConst::NotConstant);
    }

    #[test]
    fn key_directly_below_call() {
        // state.getInt("count")
        let code = method(vec![
            Insn::Load(1),
            str_const("count"),
            bundle_call("getInt", "(Ljava/lang/String;)I"),
        ]);
        assert_eq!(
            resolve_argument(&code, 2, 0),
            ResolvedConst::Const(ConstValue::Str(String::from("count")))
        );
    }

    #[test]
    fn concat_of_literals_folds() {
        let code = method(vec![
            Insn::Load(1),
            str_const("user."),
            str_const("name"),
            Insn::Concat,
            Insn::Load(0),
            Insn::GetField(this_field("name", "Ljava/lang/String;")),
            bundle_call("putString", "(Ljava/lang/String;Ljava/lang/String;)V"),
        ]);
        assert_eq!(
            resolve_argument(&code, 6, 0),
            ResolvedConst::Const(ConstValue::Str(String::from("user.name")))
        );
    }

    #[test]
    fn concat_with_field_segment_is_not_constant() {
        let code = method(vec![
            Insn::Load(1),
            Insn::Load(0),
            Insn::GetField(this_field("prefix", "Ljava/lang/String;")),
            str_const(".name"),
            Insn::Concat,
            Insn::Const(ConstValue::Int(1)),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ]);
        assert_eq!(resolve_argument(&code, 6, 0), ResolvedConst::NotConstant);
    }

    #[test]
    fn key_from_field_is_not_constant() {
        let code = method(vec![
            Insn::Load(1),
            Insn::Load(0),
            Insn::GetField(this_field("KEY", "Ljava/lang/String;")),
            Insn::Const(ConstValue::Int(3)),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ]);
        assert_eq!(resolve_argument(&code, 4, 0), ResolvedConst::NotConstant);
    }

    #[test]
    fn dup_resolves_through_to_source() {
        let code = method(vec![
            Insn::Load(1),
            str_const("k"),
            Insn::Dup,
            Insn::Store(2),
            Insn::Const(ConstValue::Int(9)),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ]);
        assert_eq!(
            resolve_argument(&code, 5, 0),
            ResolvedConst::Const(ConstValue::Str(String::from("k")))
        );
    }

    #[test]
    fn branch_in_between_gives_up() {
        let code = method(vec![
            str_const("a"),
            Insn::Branch(BranchKind::Goto),
            Insn::Const(ConstValue::Int(5)),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ]);
        assert_eq!(resolve_argument(&code, 3, 0), ResolvedConst::NotConstant);
    }

    #[test]
    fn walking_off_the_method_start() {
        // key comes in as a parameter
        let code = method(vec![
            Insn::Load(1),
            Insn::Load(2),
            Insn::Const(ConstValue::Int(5)),
            bundle_call("putInt", "(Ljava/lang/String;I)V"),
        ]);
        assert_eq!(resolve_argument(&code, 3, 0), ResolvedConst::NotConstant);
    }

    #[test]
    fn non_call_instruction_resolves_to_nothing() {
        let code = method(vec![str_const("x")]);
        assert_eq!(resolve_argument(&code, 0, 0), ResolvedConst::NotConstant);
    }
}
