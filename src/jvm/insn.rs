//! Normalized view of a loaded method body.
//!
//! The representation collapses JVM opcode families into one variant with a
//! field wherever the analysis doesn't care about the distinction: there is a
//! single `Load(slot)` where the JVM has `iload`/`aload`/..., a single
//! `Branch` for every jump, and so on. The loader also rewrites string
//! concatenation (whether `StringBuilder` chains or `invokedynamic`
//! `makeConcat`) into the synthetic `Concat` instruction so the stack
//! resolver can fold literal segments.
//!
//! Instructions are immutable once produced by the loader; the engine only
//! traverses them. Program order is index order within [`MethodCode::insns`],
//! so predecessor/successor lookup is O(1).

use super::{BinaryName, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor,
            UnqualifiedName};

/// Constant payload of a push-constant instruction
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Str(String),
    Int(i64),
    Float(f64),
    Null,
}

impl ConstValue {
    /// String form used when a constant serves as a container key
    pub fn as_key(&self) -> String {
        match self {
            ConstValue::Str(s) => s.clone(),
            ConstValue::Int(i) => i.to_string(),
            ConstValue::Float(f) => f.to_string(),
            ConstValue::Null => String::from("null"),
        }
    }
}

/// Symbolic reference to a field
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// Symbolic reference to a method
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

/// Flavor of an `invoke*` instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    /// Whether the call pops an implicit receiver below its declared arguments
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

/// Binary arithmetic/logic operator (all pop two values, push one)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Branch shape, as far as stack effects are concerned
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchKind {
    /// Unary conditional (`ifeq`, `ifnull`, ...): pops one value
    If,
    /// Binary conditional (`if_icmpeq`, `if_acmpne`, ...): pops two values
    IfCmp,
    /// Unconditional jump: pops nothing
    Goto,
}

/// One instruction, classified into the categories the engine distinguishes
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    /// Push a constant (`ldc`, `iconst_*`, `bipush`, ...)
    Const(ConstValue),
    /// Load a local variable slot (`iload`, `aload`, ...)
    Load(u16),
    /// Store into a local variable slot (`istore`, `astore`, ...)
    Store(u16),
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke(InvokeKind, MethodRef),
    New(BinaryName),
    Dup,
    DupX1,
    Swap,
    Pop,
    Pop2,
    /// Loader-normalized string concatenation: pops two strings, pushes one
    Concat,
    Arith(ArithOp),
    CheckCast(BinaryName),
    InstanceOf(BinaryName),
    Branch(BranchKind),
    IInc(u16),
    ArrayLength,
    ArrayLoad,
    ArrayStore,
    /// `return` (false) or `ireturn`/`areturn`/... (true)
    Return(bool),
    Throw,
    /// Anything the engine has no stack-relevant interpretation for
    Other,
}

/// Net stack effect of one instruction, at *value* granularity
///
/// Category-2 values (`long`, `double`) count as one value, not two slots:
/// the pairing engine matches produced/consumed values, never raw slot
/// arithmetic. `Pop2` is the one place this shows - it is modeled as popping
/// two values, which matches how javac emits it for discarded pairs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

impl StackEffect {
    const fn new(pops: usize, pushes: usize) -> StackEffect {
        StackEffect { pops, pushes }
    }
}

/// Fixed per-opcode stack-effect table (static configuration, versioned with
/// the instruction model rather than computed at runtime)
pub fn stack_effect(insn: &Insn) -> StackEffect {
    match insn {
        Insn::Const(_) => StackEffect::new(0, 1),
        Insn::Load(_) => StackEffect::new(0, 1),
        Insn::Store(_) => StackEffect::new(1, 0),
        Insn::GetField(_) => StackEffect::new(1, 1),
        Insn::PutField(_) => StackEffect::new(2, 0),
        Insn::GetStatic(_) => StackEffect::new(0, 1),
        Insn::PutStatic(_) => StackEffect::new(1, 0),
        Insn::Invoke(kind, mref) => {
            let receiver = if kind.has_receiver() { 1 } else { 0 };
            let pops = receiver + mref.descriptor.parameters.len();
            let pushes = if mref.descriptor.return_type.is_some() {
                1
            } else {
                0
            };
            StackEffect::new(pops, pushes)
        }
        Insn::New(_) => StackEffect::new(0, 1),
        Insn::Dup => StackEffect::new(1, 2),
        Insn::DupX1 => StackEffect::new(2, 3),
        Insn::Swap => StackEffect::new(2, 2),
        Insn::Pop => StackEffect::new(1, 0),
        Insn::Pop2 => StackEffect::new(2, 0),
        Insn::Concat => StackEffect::new(2, 1),
        Insn::Arith(_) => StackEffect::new(2, 1),
        Insn::CheckCast(_) => StackEffect::new(1, 1),
        Insn::InstanceOf(_) => StackEffect::new(1, 1),
        Insn::Branch(BranchKind::If) => StackEffect::new(1, 0),
        Insn::Branch(BranchKind::IfCmp) => StackEffect::new(2, 0),
        Insn::Branch(BranchKind::Goto) => StackEffect::new(0, 0),
        Insn::IInc(_) => StackEffect::new(0, 0),
        Insn::ArrayLength => StackEffect::new(1, 1),
        Insn::ArrayLoad => StackEffect::new(2, 1),
        Insn::ArrayStore => StackEffect::new(3, 0),
        Insn::Return(has_value) => StackEffect::new(if *has_value { 1 } else { 0 }, 0),
        Insn::Throw => StackEffect::new(1, 0),
        Insn::Other => StackEffect::new(0, 0),
    }
}

/// Entry in the local-variable table the loader supplies per method
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVariable {
    pub slot: u16,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// A loaded method body: instructions in program order plus metadata
#[derive(Clone, Debug)]
pub struct MethodCode {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access: MethodAccessFlags,
    /// Instructions paired with their source line number
    pub insns: Vec<(Insn, u32)>,
    pub locals: Vec<LocalVariable>,
}

impl MethodCode {
    /// Instruction at `idx`, if in range
    pub fn insn(&self, idx: usize) -> Option<&Insn> {
        self.insns.get(idx).map(|(insn, _)| insn)
    }

    /// Source line of the instruction at `idx` (0 when unknown)
    pub fn line(&self, idx: usize) -> u32 {
        self.insns.get(idx).map(|(_, line)| *line).unwrap_or(0)
    }

    /// Look up a local-variable table entry by slot
    pub fn local(&self, slot: u16) -> Option<&LocalVariable> {
        self.locals.iter().find(|lv| lv.slot == slot)
    }
}

/// Declared field of a loaded class
#[derive(Clone, Debug)]
pub struct FieldData {
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
    pub access: FieldAccessFlags,
}

/// One compiled unit: the granularity at which engine state is reset
#[derive(Clone, Debug)]
pub struct ClassUnit {
    pub name: BinaryName,
    pub super_name: Option<BinaryName>,
    pub fields: Vec<FieldData>,
    pub methods: Vec<MethodCode>,
}

impl ClassUnit {
    /// Look up a declared field by name
    pub fn field(&self, name: &UnqualifiedName) -> Option<&FieldData> {
        self.fields.iter().find(|f| &f.name == name)
    }
}
