//! Loader stand-in: parses textual method listings into [`ClassUnit`]s.
//!
//! The format is a javap-flavored line syntax, one directive or mnemonic per
//! line, `#` starting a comment:
//!
//! ```text
//! class com/example/Point
//! super java/lang/Object
//! field x I
//! field y I
//!
//! method writeToParcel (Landroid/os/Parcel;I)V
//!   line 14
//!   aload 1
//!   aload 0
//!   getfield com/example/Point.x I
//!   invokevirtual android/os/Parcel.writeInt (I)V
//!   return
//! end
//! ```
//!
//! The parser validates every name and descriptor, cross-checks field
//! references against the declared field table when the owner is the class
//! being parsed, and produces an immutable unit. Parse failures carry the
//! offending line number; they are loader fatalities and never reach the
//! pairing engines.

use crate::jvm::{
    ArithOp, BinaryName, BranchKind, ClassUnit, ConstValue, FieldAccessFlags, FieldData, FieldRef,
    FieldType, Insn, InvokeKind, LocalVariable, MethodAccessFlags, MethodCode, MethodDescriptor,
    MethodRef, Name, ParseDescriptor, RenderDescriptor, UnqualifiedName,
};
use std::fmt;

/// Why a listing failed to parse
#[derive(Debug)]
pub enum Error {
    /// No `class` directive before the first member
    MissingClassHeader { line: usize },
    /// A second `class` directive in the same listing
    DuplicateClassHeader { line: usize },
    /// Directive only valid inside a `method` block found outside one
    OutsideMethod { line: usize, directive: String },
    /// Header directive found inside a `method` block
    InsideMethod { line: usize, directive: String },
    /// Mnemonic not part of the instruction surface
    UnknownMnemonic { line: usize, mnemonic: String },
    /// Directive or mnemonic missing a required operand
    MissingOperand { line: usize, subject: String },
    /// Operand that should be a number but isn't
    BadNumber { line: usize, token: String },
    /// Class, method, or field name rejected by name validation
    BadName { line: usize, message: String },
    /// Field or method descriptor rejected by the descriptor parser
    BadDescriptor { line: usize, cause: std::io::Error },
    /// Member reference missing its `owner.name` shape
    BadMemberRef { line: usize, token: String },
    /// Field access on the class under parse that no `field` line declares
    UndeclaredField { line: usize, field: String },
    /// `method` block with no closing `end`
    UnterminatedMethod { method: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingClassHeader { line } => {
                write!(f, "line {}: expected a 'class' directive first", line)
            }
            Error::DuplicateClassHeader { line } => {
                write!(f, "line {}: second 'class' directive", line)
            }
            Error::OutsideMethod { line, directive } => {
                write!(f, "line {}: '{}' outside a method block", line, directive)
            }
            Error::InsideMethod { line, directive } => {
                write!(f, "line {}: '{}' inside a method block", line, directive)
            }
            Error::UnknownMnemonic { line, mnemonic } => {
                write!(f, "line {}: unknown mnemonic '{}'", line, mnemonic)
            }
            Error::MissingOperand { line, subject } => {
                write!(f, "line {}: '{}' is missing an operand", line, subject)
            }
            Error::BadNumber { line, token } => {
                write!(f, "line {}: '{}' is not a number", line, token)
            }
            Error::BadName { line, message } => write!(f, "line {}: {}", line, message),
            Error::BadDescriptor { line, cause } => {
                write!(f, "line {}: bad descriptor: {}", line, cause)
            }
            Error::BadMemberRef { line, token } => {
                write!(f, "line {}: '{}' is not of the form owner.name", line, token)
            }
            Error::UndeclaredField { line, field } => {
                write!(f, "line {}: field '{}' is not declared on this class", line, field)
            }
            Error::UnterminatedMethod { method } => {
                write!(f, "method '{}' has no closing 'end'", method)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Parse one listing into a unit
pub fn parse_listing(source: &str) -> Result<ClassUnit, Error> {
    let mut parser = Parser::default();
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        parser.directive(line_no, line)?;
    }
    parser.finish()
}

/// Cut the line at the first `#` that is not inside a string literal
fn strip_comment(raw: &str) -> &str {
    let mut in_string = false;
    for (pos, c) in raw.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &raw[..pos],
            _ => {}
        }
    }
    raw
}

#[derive(Default)]
struct Parser {
    class: Option<BinaryName>,
    super_name: Option<BinaryName>,
    fields: Vec<FieldData>,
    methods: Vec<MethodCode>,
    current: Option<MethodBuilder>,
}

struct MethodBuilder {
    name: UnqualifiedName,
    descriptor: MethodDescriptor,
    access: MethodAccessFlags,
    insns: Vec<(Insn, u32)>,
    locals: Vec<LocalVariable>,
    source_line: u32,
}

impl Parser {
    fn directive(&mut self, line_no: usize, line: &str) -> Result<(), Error> {
        let mut tokens = line.split_whitespace();
        let head = tokens.next().unwrap();

        if self.current.is_some() {
            return self.method_directive(line_no, line, head, tokens);
        }

        match head {
            "class" => {
                if self.class.is_some() {
                    return Err(Error::DuplicateClassHeader { line: line_no });
                }
                self.class = Some(binary_name(line_no, operand(line_no, head, tokens.next())?)?);
            }
            "super" => {
                self.require_class(line_no)?;
                self.super_name =
                    Some(binary_name(line_no, operand(line_no, head, tokens.next())?)?);
            }
            "field" => {
                self.require_class(line_no)?;
                let mut access = FieldAccessFlags::empty();
                let mut next = operand(line_no, head, tokens.next())?;
                loop {
                    match next {
                        "static" => access |= FieldAccessFlags::STATIC,
                        "final" => access |= FieldAccessFlags::FINAL,
                        "transient" => access |= FieldAccessFlags::TRANSIENT,
                        _ => break,
                    }
                    next = operand(line_no, head, tokens.next())?;
                }
                let name = unqualified_name(line_no, next)?;
                let descriptor = field_type(line_no, operand(line_no, head, tokens.next())?)?;
                self.fields.push(FieldData {
                    name,
                    descriptor,
                    access,
                });
            }
            "method" => {
                self.require_class(line_no)?;
                let mut access = MethodAccessFlags::PUBLIC;
                let mut next = operand(line_no, head, tokens.next())?;
                if next == "static" {
                    access |= MethodAccessFlags::STATIC;
                    next = operand(line_no, head, tokens.next())?;
                }
                let name = unqualified_name(line_no, next)?;
                let descriptor =
                    method_descriptor(line_no, operand(line_no, head, tokens.next())?)?;
                self.current = Some(MethodBuilder {
                    name,
                    descriptor,
                    access,
                    insns: Vec::new(),
                    locals: Vec::new(),
                    source_line: 0,
                });
            }
            other => {
                return Err(Error::OutsideMethod {
                    line: line_no,
                    directive: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn method_directive<'a>(
        &mut self,
        line_no: usize,
        line: &'a str,
        head: &'a str,
        mut tokens: impl Iterator<Item = &'a str>,
    ) -> Result<(), Error> {
        match head {
            "class" | "super" | "field" | "method" => Err(Error::InsideMethod {
                line: line_no,
                directive: head.to_string(),
            }),
            "end" => {
                let builder = self.current.take().unwrap();
                self.methods.push(MethodCode {
                    name: builder.name,
                    descriptor: builder.descriptor,
                    access: builder.access,
                    insns: builder.insns,
                    locals: builder.locals,
                });
                Ok(())
            }
            "line" => {
                let source_line = number(line_no, operand(line_no, head, tokens.next())?)?;
                self.current.as_mut().unwrap().source_line = source_line;
                Ok(())
            }
            "local" => {
                let slot = number(line_no, operand(line_no, head, tokens.next())?)?;
                let name = unqualified_name(line_no, operand(line_no, head, tokens.next())?)?;
                let descriptor = field_type(line_no, operand(line_no, head, tokens.next())?)?;
                self.current.as_mut().unwrap().locals.push(LocalVariable {
                    slot,
                    name,
                    descriptor,
                });
                Ok(())
            }
            mnemonic => {
                let insn = parse_insn(line_no, line, mnemonic, &mut tokens)?;
                if let Insn::GetField(fref) | Insn::PutField(fref) = &insn {
                    self.check_field_ref(line_no, fref)?;
                }
                let builder = self.current.as_mut().unwrap();
                let source_line = builder.source_line;
                builder.insns.push((insn, source_line));
                Ok(())
            }
        }
    }

    /// Instance-field refs on the class under parse must match a declared field
    fn check_field_ref(&self, line_no: usize, fref: &FieldRef) -> Result<(), Error> {
        if Some(&fref.owner) != self.class.as_ref() {
            return Ok(());
        }
        let declared = self
            .fields
            .iter()
            .any(|f| f.name == fref.name && f.descriptor == fref.descriptor);
        if declared {
            Ok(())
        } else {
            Err(Error::UndeclaredField {
                line: line_no,
                field: format!("{} {}", fref.name, fref.descriptor.render()),
            })
        }
    }

    fn require_class(&self, line_no: usize) -> Result<(), Error> {
        if self.class.is_some() {
            Ok(())
        } else {
            Err(Error::MissingClassHeader { line: line_no })
        }
    }

    fn finish(self) -> Result<ClassUnit, Error> {
        if let Some(builder) = self.current {
            return Err(Error::UnterminatedMethod {
                method: builder.name.as_str().to_string(),
            });
        }
        let name = self.class.ok_or(Error::MissingClassHeader { line: 0 })?;
        Ok(ClassUnit {
            name,
            super_name: self.super_name,
            fields: self.fields,
            methods: self.methods,
        })
    }
}

fn operand<'a>(line_no: usize, subject: &str, token: Option<&'a str>) -> Result<&'a str, Error> {
    token.ok_or_else(|| Error::MissingOperand {
        line: line_no,
        subject: subject.to_string(),
    })
}

fn number<T: std::str::FromStr>(line_no: usize, token: &str) -> Result<T, Error> {
    token.parse().map_err(|_| Error::BadNumber {
        line: line_no,
        token: token.to_string(),
    })
}

fn binary_name(line_no: usize, token: &str) -> Result<BinaryName, Error> {
    BinaryName::from_string(token.to_string()).map_err(|message| Error::BadName {
        line: line_no,
        message,
    })
}

fn unqualified_name(line_no: usize, token: &str) -> Result<UnqualifiedName, Error> {
    UnqualifiedName::from_string(token.to_string()).map_err(|message| Error::BadName {
        line: line_no,
        message,
    })
}

fn field_type(line_no: usize, token: &str) -> Result<FieldType, Error> {
    FieldType::parse(token).map_err(|cause| Error::BadDescriptor {
        line: line_no,
        cause,
    })
}

fn method_descriptor(line_no: usize, token: &str) -> Result<MethodDescriptor, Error> {
    MethodDescriptor::parse(token).map_err(|cause| Error::BadDescriptor {
        line: line_no,
        cause,
    })
}

/// `owner.name` member reference; the final dot separates owner from name
fn member_ref(line_no: usize, token: &str) -> Result<(BinaryName, UnqualifiedName), Error> {
    let dot = token.rfind('.').ok_or_else(|| Error::BadMemberRef {
        line: line_no,
        token: token.to_string(),
    })?;
    let owner = binary_name(line_no, &token[..dot])?;
    let name = unqualified_name(line_no, &token[dot + 1..])?;
    Ok((owner, name))
}

fn field_ref<'a>(
    line_no: usize,
    mnemonic: &str,
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<FieldRef, Error> {
    let (owner, name) = member_ref(line_no, operand(line_no, mnemonic, tokens.next())?)?;
    let descriptor = field_type(line_no, operand(line_no, mnemonic, tokens.next())?)?;
    Ok(FieldRef {
        owner,
        name,
        descriptor,
    })
}

fn method_ref<'a>(
    line_no: usize,
    mnemonic: &str,
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<MethodRef, Error> {
    let (owner, name) = member_ref(line_no, operand(line_no, mnemonic, tokens.next())?)?;
    let descriptor = method_descriptor(line_no, operand(line_no, mnemonic, tokens.next())?)?;
    Ok(MethodRef {
        owner,
        name,
        descriptor,
    })
}

/// `ldc` operand: a quoted string, `null`, or a numeric literal
fn ldc_operand(line_no: usize, line: &str, mnemonic: &str) -> Result<ConstValue, Error> {
    let rest = line[mnemonic.len()..].trim();
    if rest.is_empty() {
        return Err(Error::MissingOperand {
            line: line_no,
            subject: mnemonic.to_string(),
        });
    }
    if let Some(body) = rest.strip_prefix('"') {
        let end = body.rfind('"').ok_or_else(|| Error::BadName {
            line: line_no,
            message: format!("unterminated string literal {}", rest),
        })?;
        return Ok(ConstValue::Str(body[..end].to_string()));
    }
    if rest == "null" {
        return Ok(ConstValue::Null);
    }
    if rest.contains('.') {
        Ok(ConstValue::Float(number(line_no, rest)?))
    } else {
        Ok(ConstValue::Int(number(line_no, rest)?))
    }
}

fn parse_insn<'a>(
    line_no: usize,
    line: &str,
    mnemonic: &str,
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<Insn, Error> {
    let insn = match mnemonic {
        "ldc" | "ldc2" => Insn::Const(ldc_operand(line_no, line, mnemonic)?),
        "aconst_null" => Insn::Const(ConstValue::Null),
        "iconst" | "bipush" | "sipush" | "lconst" => {
            Insn::Const(ConstValue::Int(number(line_no, operand(line_no, mnemonic, tokens.next())?)?))
        }
        "fconst" | "dconst" => {
            Insn::Const(ConstValue::Float(number(line_no, operand(line_no, mnemonic, tokens.next())?)?))
        }

        "aload" | "iload" | "lload" | "fload" | "dload" => {
            Insn::Load(number(line_no, operand(line_no, mnemonic, tokens.next())?)?)
        }
        "astore" | "istore" | "lstore" | "fstore" | "dstore" => {
            Insn::Store(number(line_no, operand(line_no, mnemonic, tokens.next())?)?)
        }

        "getfield" => Insn::GetField(field_ref(line_no, mnemonic, tokens)?),
        "putfield" => Insn::PutField(field_ref(line_no, mnemonic, tokens)?),
        "getstatic" => Insn::GetStatic(field_ref(line_no, mnemonic, tokens)?),
        "putstatic" => Insn::PutStatic(field_ref(line_no, mnemonic, tokens)?),

        "invokevirtual" => Insn::Invoke(InvokeKind::Virtual, method_ref(line_no, mnemonic, tokens)?),
        "invokespecial" => Insn::Invoke(InvokeKind::Special, method_ref(line_no, mnemonic, tokens)?),
        "invokestatic" => Insn::Invoke(InvokeKind::Static, method_ref(line_no, mnemonic, tokens)?),
        "invokeinterface" => {
            Insn::Invoke(InvokeKind::Interface, method_ref(line_no, mnemonic, tokens)?)
        }

        "new" => Insn::New(binary_name(line_no, operand(line_no, mnemonic, tokens.next())?)?),
        "checkcast" => {
            Insn::CheckCast(binary_name(line_no, operand(line_no, mnemonic, tokens.next())?)?)
        }
        "instanceof" => {
            Insn::InstanceOf(binary_name(line_no, operand(line_no, mnemonic, tokens.next())?)?)
        }

        "dup" => Insn::Dup,
        "dup_x1" => Insn::DupX1,
        "swap" => Insn::Swap,
        "pop" => Insn::Pop,
        "pop2" => Insn::Pop2,
        "concat" => Insn::Concat,

        "iadd" | "ladd" | "fadd" | "dadd" => Insn::Arith(ArithOp::Add),
        "isub" | "lsub" | "fsub" | "dsub" => Insn::Arith(ArithOp::Sub),
        "imul" | "lmul" | "fmul" | "dmul" => Insn::Arith(ArithOp::Mul),
        "idiv" | "ldiv" | "fdiv" | "ddiv" => Insn::Arith(ArithOp::Div),
        "irem" | "lrem" | "frem" | "drem" => Insn::Arith(ArithOp::Rem),
        "iand" | "land" => Insn::Arith(ArithOp::And),
        "ior" | "lor" => Insn::Arith(ArithOp::Or),
        "ixor" | "lxor" => Insn::Arith(ArithOp::Xor),
        "ishl" | "lshl" => Insn::Arith(ArithOp::Shl),
        "ishr" | "lshr" | "iushr" | "lushr" => Insn::Arith(ArithOp::Shr),

        "ifeq" | "ifne" | "iflt" | "ifge" | "ifgt" | "ifle" | "ifnull" | "ifnonnull" => {
            Insn::Branch(BranchKind::If)
        }
        "goto" => Insn::Branch(BranchKind::Goto),
        branch if branch.starts_with("if_icmp") || branch.starts_with("if_acmp") => {
            Insn::Branch(BranchKind::IfCmp)
        }

        "iinc" => Insn::IInc(number(line_no, operand(line_no, mnemonic, tokens.next())?)?),
        "arraylength" => Insn::ArrayLength,

        "iaload" | "laload" | "faload" | "daload" | "aaload" | "baload" | "caload" | "saload" => {
            Insn::ArrayLoad
        }
        "iastore" | "lastore" | "fastore" | "dastore" | "aastore" | "bastore" | "castore"
        | "sastore" => Insn::ArrayStore,

        "return" => Insn::Return(false),
        "ireturn" | "lreturn" | "freturn" | "dreturn" | "areturn" => Insn::Return(true),
        "athrow" => Insn::Throw,
        "nop" => Insn::Other,

        other => {
            return Err(Error::UnknownMnemonic {
                line: line_no,
                mnemonic: other.to_string(),
            })
        }
    };
    Ok(insn)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::BaseType;

    const POINT: &str = "\
class com/example/Point
super java/lang/Object
field x I
field transient cached Z

method writeToParcel (Landroid/os/Parcel;I)V
  line 14
  aload 1
  aload 0
  getfield com/example/Point.x I
  invokevirtual android/os/Parcel.writeInt (I)V
  line 15
  return
end

method static describe ()Ljava/lang/String;
  ldc \"a point\"
  areturn
end
";

    #[test]
    fn parses_a_full_listing() {
        let unit = parse_listing(POINT).unwrap();
        assert_eq!(unit.name.as_str(), "com/example/Point");
        assert_eq!(unit.super_name.as_ref().unwrap().as_str(), "java/lang/Object");
        assert_eq!(unit.fields.len(), 2);
        assert!(unit.fields[1].access.contains(FieldAccessFlags::TRANSIENT));
        assert_eq!(unit.methods.len(), 2);

        let write = &unit.methods[0];
        assert_eq!(write.name, UnqualifiedName::WRITETOPARCEL);
        assert_eq!(write.insns.len(), 5);
        assert_eq!(write.line(0), 14);
        assert_eq!(write.line(4), 15);
        match write.insn(2).unwrap() {
            Insn::GetField(fref) => assert_eq!(fref.name.as_str(), "x"),
            other => panic!("expected getfield, got {:?}", other),
        }

        let describe = &unit.methods[1];
        assert!(describe.access.contains(MethodAccessFlags::STATIC));
        assert_eq!(
            describe.insn(0),
            Some(&Insn::Const(ConstValue::Str(String::from("a point"))))
        );
        assert_eq!(describe.insn(1), Some(&Insn::Return(true)));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let unit = parse_listing(
            "# header comment\nclass com/example/A\n\nmethod f ()V\n  return # trailing\nend\n",
        )
        .unwrap();
        assert_eq!(unit.methods[0].insns.len(), 1);
    }

    #[test]
    fn hash_inside_a_string_literal_is_not_a_comment() {
        let unit = parse_listing(
            "class com/example/A\nmethod f ()V\n  ldc \"tag#1\" # the real comment\n  pop\n  return\nend\n",
        )
        .unwrap();
        assert_eq!(
            unit.methods[0].insn(0),
            Some(&Insn::Const(ConstValue::Str(String::from("tag#1"))))
        );
    }

    #[test]
    fn local_and_line_directives() {
        let unit = parse_listing(
            "class com/example/A\nmethod f ()V\n  local 2 tmpCount I\n  line 7\n  iconst 0\n  istore 2\n  return\nend\n",
        )
        .unwrap();
        let method = &unit.methods[0];
        assert_eq!(method.locals.len(), 1);
        assert_eq!(method.locals[0].slot, 2);
        assert_eq!(method.locals[0].descriptor, FieldType::Base(BaseType::Int));
        assert_eq!(method.line(0), 7);
    }

    #[test]
    fn field_ref_on_own_class_is_cross_checked() {
        let err = parse_listing(
            "class com/example/A\nmethod f ()V\n  aload 0\n  getfield com/example/A.missing I\n  return\nend\n",
        )
        .unwrap_err();
        match err {
            Error::UndeclaredField { line, field } => {
                assert_eq!(line, 4);
                assert_eq!(field, "missing I");
            }
            other => panic!("expected UndeclaredField, got {}", other),
        }
    }

    #[test]
    fn field_ref_on_foreign_class_is_not_cross_checked() {
        let unit = parse_listing(
            "class com/example/A\nmethod f ()V\n  getfield com/example/B.x I\n  return\nend\n",
        )
        .unwrap();
        assert_eq!(unit.methods[0].insns.len(), 2);
    }

    #[test]
    fn unknown_mnemonic_carries_its_line() {
        let err =
            parse_listing("class com/example/A\nmethod f ()V\n  frobnicate\nend\n").unwrap_err();
        match err {
            Error::UnknownMnemonic { line, mnemonic } => {
                assert_eq!(line, 3);
                assert_eq!(mnemonic, "frobnicate");
            }
            other => panic!("expected UnknownMnemonic, got {}", other),
        }
    }

    #[test]
    fn bad_descriptor_is_rejected() {
        let err = parse_listing("class com/example/A\nfield x Q\n").unwrap_err();
        assert!(matches!(err, Error::BadDescriptor { line: 2, .. }));
    }

    #[test]
    fn missing_class_header_is_rejected() {
        assert!(matches!(
            parse_listing("field x I\n"),
            Err(Error::MissingClassHeader { line: 1 })
        ));
    }

    #[test]
    fn unterminated_method_is_rejected() {
        assert!(matches!(
            parse_listing("class com/example/A\nmethod f ()V\n  return\n"),
            Err(Error::UnterminatedMethod { .. })
        ));
    }

    #[test]
    fn constructor_name_is_accepted() {
        let unit = parse_listing(
            "class com/example/A\nmethod <init> (Landroid/os/Parcel;)V\n  return\nend\n",
        )
        .unwrap();
        assert_eq!(unit.methods[0].name, UnqualifiedName::INIT);
    }
}
