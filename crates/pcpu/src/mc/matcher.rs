//! Matches parsed instructions against the PCPU mnemonic table.
//!
//! Operand classes are checked here, after parsing: range and alignment
//! failures become "invalid operand" diagnostics pointing at the operand.

use super::expr::Expr;
use super::fixup::ImmField;
use super::parser::{Operand, OperandKind, ParsedInstruction};
use crate::error::Diagnostic;
use crate::isa::{
    AccessSize, AluCode, BranchTarget, CondCode, Instruction, MemOp, Register, SrOp, Value,
};

/// Constant values of symbols known at match time (`.set`).
pub type SymbolLookup<'a> = &'a dyn Fn(&str) -> Option<i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchError {
    Mnemonic,
    InvalidOperand(usize),
    NotRelocatable(usize),
    TooFew,
    TooMany(usize),
}

/// Operand classes with their accepted constant ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImmClass {
    /// Constant or relocatable expression for an instruction field.
    Field(ImmField),
    /// Word offset of `ld`/`st`: magnitude up to 16 bits, sign picks add/sub.
    MemOffset,
    /// Short-pointer offset at the access granularity.
    ShortOffset(AccessSize),
    /// Shift amount.
    Shift,
    /// Signed 8-bit.
    Imm8,
}

impl ImmClass {
    fn accepts_constant(self, v: i64) -> bool {
        match self {
            Self::Field(ImmField::Imm16 | ImmField::Branch16) => (0..=0xFFFF).contains(&v),
            Self::Field(ImmField::Addr21 | ImmField::Imm21) => (0..=0x1F_FFFF).contains(&v),
            Self::Field(ImmField::Call25) => (0..=0x1FF_FFFF).contains(&v),
            Self::MemOffset => (-0xFFFF..=0xFFFF).contains(&v),
            Self::ShortOffset(size) => size.accepts_short_offset(v),
            Self::Shift => (0..=31).contains(&v),
            Self::Imm8 => (-128..=127).contains(&v),
        }
    }

    const fn field(self) -> Option<ImmField> {
        match self {
            Self::Field(field) => Some(field),
            Self::MemOffset => Some(ImmField::Imm16),
            Self::ShortOffset(_) | Self::Shift | Self::Imm8 => None,
        }
    }
}

struct Operands<'a> {
    ops: &'a [Operand],
    lookup: SymbolLookup<'a>,
}

impl Operands<'_> {
    fn get(&self, i: usize) -> Result<&Operand, MatchError> {
        self.ops.get(i).ok_or(MatchError::TooFew)
    }

    fn is_register(&self, i: usize) -> bool {
        matches!(self.ops.get(i).map(|o| &o.kind), Some(OperandKind::Register(_)))
    }

    fn is_token(&self, i: usize, text: &str) -> bool {
        self.ops.get(i).is_some_and(|o| o.is_token(text))
    }

    fn gpr(&self, i: usize) -> Result<Register, MatchError> {
        match self.get(i)?.kind {
            OperandKind::Register(reg) if reg.is_general() => Ok(reg),
            _ => Err(MatchError::InvalidOperand(i)),
        }
    }

    fn special(&self, i: usize) -> Result<Register, MatchError> {
        match self.get(i)?.kind {
            OperandKind::Register(reg) if reg.is_special() => Ok(reg),
            _ => Err(MatchError::InvalidOperand(i)),
        }
    }

    fn token(&self, i: usize, text: &str) -> Result<(), MatchError> {
        if self.get(i)?.is_token(text) {
            Ok(())
        } else {
            Err(MatchError::InvalidOperand(i))
        }
    }

    fn imm(&self, i: usize, class: ImmClass) -> Result<Value, MatchError> {
        let OperandKind::Immediate(expr) = &self.get(i)?.kind else {
            return Err(MatchError::InvalidOperand(i));
        };
        // Literal branch and call targets are word indices; anything naming a
        // symbol is a byte address and goes through the fixup.
        let byte_address = matches!(
            class,
            ImmClass::Field(ImmField::Branch16 | ImmField::Call25)
        ) && expr.evaluate(&|_| None).is_none();
        if let Some(v) = expr.evaluate(self.lookup).filter(|_| !byte_address) {
            return if class.accepts_constant(v) {
                Ok(Value::Imm(v))
            } else {
                Err(MatchError::InvalidOperand(i))
            };
        }
        let Some(field) = class.field() else {
            return Err(MatchError::InvalidOperand(i));
        };
        if let Some(address) = expr
            .strip_modifier()
            .evaluate(self.lookup)
            .filter(|_| byte_address)
        {
            let index = address >> 2;
            if address & 3 != 0 || !(0..=i64::from(field.mask())).contains(&index) {
                return Err(MatchError::InvalidOperand(i));
            }
        }
        if expr
            .modifier()
            .is_some_and(|modifier| field.modified_kind(modifier).is_none())
        {
            return Err(MatchError::InvalidOperand(i));
        }
        if expr.strip_modifier().to_relocatable(self.lookup).is_none() {
            return Err(MatchError::NotRelocatable(i));
        }
        Ok(Value::Expr(expr.clone()))
    }

    fn finish(&self, count: usize) -> Result<(), MatchError> {
        if self.ops.len() > count {
            Err(MatchError::TooMany(count))
        } else {
            Ok(())
        }
    }
}

fn memory_form(mnemonic: &str) -> Option<(MemOp, Option<AccessSize>, bool)> {
    Some(match mnemonic {
        "ld" => (MemOp::Load, None, false),
        "st" => (MemOp::Store, None, false),
        "ld.b" => (MemOp::Load, Some(AccessSize::Byte), false),
        "ld.bs" => (MemOp::Load, Some(AccessSize::Byte), true),
        "ld.h" => (MemOp::Load, Some(AccessSize::Half), false),
        "ld.hs" => (MemOp::Load, Some(AccessSize::Half), true),
        "ld.w" => (MemOp::Load, Some(AccessSize::Word), false),
        "st.b" => (MemOp::Store, Some(AccessSize::Byte), false),
        "st.h" => (MemOp::Store, Some(AccessSize::Half), false),
        "st.w" => (MemOp::Store, Some(AccessSize::Word), false),
        _ => return None,
    })
}

fn match_alu(ops: &Operands<'_>, op: AluCode, set_flags: bool) -> Result<Instruction, MatchError> {
    let rd = ops.gpr(0)?;
    let rs1 = ops.gpr(1)?;
    ops.get(2)?;
    ops.finish(3)?;
    if ops.is_register(2) {
        return Ok(Instruction::AluReg {
            op,
            set_flags,
            rd,
            rs1,
            rs2: ops.gpr(2)?,
        });
    }
    let class = if op.is_shift() {
        ImmClass::Shift
    } else {
        ImmClass::Field(ImmField::Imm16)
    };
    Ok(Instruction::AluImm {
        op,
        set_flags,
        rd,
        rs1,
        imm: ops.imm(2, class)?,
    })
}

fn match_compare(ops: &Operands<'_>) -> Result<Instruction, MatchError> {
    let rs1 = ops.gpr(0)?;
    ops.get(1)?;
    ops.finish(2)?;
    if ops.is_register(1) {
        return Ok(Instruction::AluReg {
            op: AluCode::SUB,
            set_flags: true,
            rd: Register::R0,
            rs1,
            rs2: ops.gpr(1)?,
        });
    }
    Ok(Instruction::AluImm {
        op: AluCode::SUB,
        set_flags: true,
        rd: Register::R0,
        rs1,
        imm: ops.imm(1, ImmClass::Field(ImmField::Imm16))?,
    })
}

fn match_mov(ops: &Operands<'_>) -> Result<Instruction, MatchError> {
    let rd = ops.gpr(0)?;
    ops.get(1)?;
    ops.finish(2)?;
    if ops.is_register(1) {
        return Ok(Instruction::mov(rd, ops.gpr(1)?));
    }
    Ok(Instruction::LoadImm {
        rd,
        imm: ops.imm(1, ImmClass::Field(ImmField::Imm21))?,
    })
}

/// `r, base, off`, `r, (base), off` (post-op) or `r, off, (base)` (pre-op).
fn match_memory(
    ops: &Operands<'_>,
    dir: MemOp,
    size: Option<AccessSize>,
    sign_extend: bool,
) -> Result<Instruction, MatchError> {
    let reg = ops.gpr(0)?;
    let (base, off_index, count, wrap): (Register, usize, usize, fn(AluCode) -> AluCode) =
        if ops.is_token(1, "(") {
            let base = ops.gpr(2)?;
            ops.token(3, ")")?;
            (base, 4, 5, AluCode::make_post_op)
        } else if ops.is_token(2, "(") {
            let base = ops.gpr(3)?;
            ops.token(4, ")")?;
            (base, 1, 5, AluCode::make_pre_op)
        } else {
            (ops.gpr(1)?, 2, 3, |op| op)
        };
    ops.get(off_index)?;
    ops.finish(count)?;

    if ops.is_register(off_index) {
        return Ok(Instruction::MemReg {
            dir,
            op: wrap(AluCode::ADD),
            size: size.unwrap_or(AccessSize::Word),
            sign_extend,
            reg,
            base,
            index: ops.gpr(off_index)?,
        });
    }

    if let Some(size) = size {
        let Value::Imm(offset) = ops.imm(off_index, ImmClass::ShortOffset(size))? else {
            return Err(MatchError::InvalidOperand(off_index));
        };
        return Ok(Instruction::MemShort {
            dir,
            op: wrap(AluCode::ADD),
            size,
            sign_extend,
            reg,
            base,
            offset: offset as u16,
        });
    }

    let (op, offset) = match ops.imm(off_index, ImmClass::MemOffset)? {
        Value::Imm(v) if v < 0 => (AluCode::SUB, Value::Imm(-v)),
        other => (AluCode::ADD, other),
    };
    Ok(Instruction::Mem {
        dir,
        op: wrap(op),
        reg,
        base,
        offset,
    })
}

fn match_branch(ops: &Operands<'_>, cond: CondCode) -> Result<Instruction, MatchError> {
    ops.get(0)?;
    ops.finish(1)?;
    let target = if ops.is_register(0) {
        BranchTarget::Reg(ops.gpr(0)?)
    } else {
        BranchTarget::Value(ops.imm(0, ImmClass::Field(ImmField::Branch16))?)
    };
    Ok(Instruction::Branch { cond, target })
}

fn match_mnemonic(mnemonic: &str, ops: &Operands<'_>) -> Result<Instruction, MatchError> {
    if let Some((dir, size, sign_extend)) = memory_form(mnemonic) {
        return match_memory(ops, dir, size, sign_extend);
    }
    let (base, set_flags) = match mnemonic.strip_suffix(".f") {
        Some(base) => (base, true),
        None => (mnemonic, false),
    };
    if let Some(op) = AluCode::from_mnemonic(base) {
        return match_alu(ops, op, set_flags);
    }
    if let Some(op) = SrOp::from_prefix(mnemonic) {
        let reg = ops.gpr(0)?;
        let sreg = ops.special(1)?;
        ops.finish(2)?;
        return Ok(Instruction::SpecialReg { op, reg, sreg });
    }
    if let Some(cond) = mnemonic.strip_prefix('j').and_then(CondCode::from_suffix) {
        return match_branch(ops, cond);
    }
    match mnemonic {
        "nop" => ops.finish(0).map(|()| Instruction::Nop),
        "ret" => ops.finish(0).map(|()| Instruction::ret()),
        "sys" => {
            let code = ops.imm(0, ImmClass::Imm8)?;
            ops.finish(1)?;
            Ok(Instruction::Sys {
                code: code.as_imm().unwrap_or_default() as i8,
            })
        }
        "cmp" => match_compare(ops),
        "mov" => match_mov(ops),
        "movhi" => {
            let rd = ops.gpr(0)?;
            let imm = ops.imm(1, ImmClass::Field(ImmField::Imm16))?;
            ops.finish(2)?;
            Ok(Instruction::MovHi { rd, imm })
        }
        "lda" | "sta" => {
            let reg = ops.gpr(0)?;
            let addr = ops.imm(1, ImmClass::Field(ImmField::Addr21))?;
            ops.finish(2)?;
            let dir = if mnemonic == "lda" { MemOp::Load } else { MemOp::Store };
            Ok(Instruction::MemAbs { dir, reg, addr })
        }
        "call" => {
            ops.get(0)?;
            if ops.is_register(0) {
                return Err(MatchError::InvalidOperand(0));
            }
            let target = ops.imm(0, ImmClass::Field(ImmField::Call25))?;
            ops.finish(1)?;
            Ok(Instruction::Call { target })
        }
        _ => Err(MatchError::Mnemonic),
    }
}

/// Converts a parsed instruction into a machine instruction.
pub fn match_instruction(
    inst: &ParsedInstruction,
    lookup: SymbolLookup<'_>,
) -> Result<Instruction, Diagnostic> {
    let operands = inst.operands.get(1..).unwrap_or_default();
    let ops = Operands {
        ops: operands,
        lookup,
    };
    match_mnemonic(&inst.mnemonic, &ops).map_err(|err| {
        let at = |i: usize| operands.get(i).map_or(inst.span, |o| o.span.or(inst.span));
        match err {
            MatchError::Mnemonic => Diagnostic::new(inst.span, "unrecognized instruction mnemonic"),
            MatchError::InvalidOperand(i) => Diagnostic::new(at(i), "invalid operand for instruction"),
            MatchError::NotRelocatable(i) => Diagnostic::new(at(i), "expression is not relocatable"),
            MatchError::TooFew => Diagnostic::new(inst.span, "too few operands for instruction"),
            MatchError::TooMany(i) => Diagnostic::new(at(i), "too many operands for instruction"),
        }
    })
}

/// Whether `expr` can be encoded into a data directive of `size` bytes.
#[must_use]
pub fn data_expr_is_encodable(expr: &Expr, lookup: SymbolLookup<'_>) -> bool {
    expr.evaluate(lookup).is_some() || expr.strip_modifier().to_relocatable(lookup).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Span;
    use crate::mc::Modifier;
    use crate::mc::parser::{Statement, parse};

    fn no_symbols(_: &str) -> Option<i64> {
        None
    }

    fn matched(source: &str) -> Result<Instruction, Diagnostic> {
        let (statements, diags) = parse(source);
        assert!(diags.is_empty(), "{diags:?}");
        let [Statement::Instruction(inst)] = statements.as_slice() else {
            panic!("expected one instruction");
        };
        match_instruction(inst, &no_symbols)
    }

    #[test]
    fn alu_register_and_immediate_forms() {
        assert_eq!(
            matched("add r1, r2, r3").unwrap(),
            Instruction::alu_reg(AluCode::ADD, Register::R1, Register::R2, Register::R3)
        );
        assert_eq!(
            matched("sub r1, r2, 20").unwrap(),
            Instruction::alu_imm(AluCode::SUB, Register::R1, Register::R2, 20)
        );
        let Instruction::AluImm { set_flags, .. } = matched("and.f r1, r1, 0xff").unwrap() else {
            panic!("expected RI");
        };
        assert!(set_flags);
    }

    #[test]
    fn alu_immediate_is_unsigned() {
        let err = matched("add r1, r2, -1").unwrap_err();
        assert_eq!(err.message, "invalid operand for instruction");
        assert_eq!(err.span, Span::new(1, 13));
    }

    #[test]
    fn shift_amount_range() {
        assert!(matched("sh r1, r1, 31").is_ok());
        assert!(matched("sh r1, r1, 32").is_err());
        assert!(matched("sh r1, r1, sym").is_err(), "shift amounts are constants");
    }

    #[test]
    fn negative_word_offset_selects_sub() {
        let inst = matched("ld r1, fp, -20").unwrap();
        assert_eq!(
            inst,
            Instruction::Mem {
                dir: MemOp::Load,
                op: AluCode::SUB,
                reg: Register::R1,
                base: Register::FP,
                offset: Value::Imm(20),
            }
        );
    }

    #[test]
    fn post_and_pre_increment() {
        let Instruction::Mem { op, .. } = matched("ld r1, (r2), 4").unwrap() else {
            panic!("expected RM");
        };
        assert!(op.is_post_op());
        let Instruction::Mem { op, base, .. } = matched("st r1, -4, (sp)").unwrap() else {
            panic!("expected RM");
        };
        assert!(op.is_pre_op());
        assert_eq!(op.base(), AluCode::SUB);
        assert_eq!(base, Register::SP);
    }

    #[test]
    fn short_offsets_check_granularity() {
        assert!(matched("ld.b r1, r2, 255").is_ok());
        assert!(matched("ld.b r1, r2, 256").is_err());
        assert!(matched("ld.h r1, r2, 510").is_ok());
        assert!(matched("ld.h r1, r2, 3").is_err());
        assert!(matched("st.w r1, r2, 1020").is_ok());
        assert!(matched("st.w r1, r2, 1018").is_err());
    }

    #[test]
    fn register_offset_selects_rrm() {
        let inst = matched("ld.hs r1, r2, r3").unwrap();
        assert_eq!(
            inst,
            Instruction::MemReg {
                dir: MemOp::Load,
                op: AluCode::ADD,
                size: AccessSize::Half,
                sign_extend: true,
                reg: Register::R1,
                base: Register::R2,
                index: Register::R3,
            }
        );
    }

    #[test]
    fn branches_and_calls() {
        assert!(matches!(
            matched("jne loop").unwrap(),
            Instruction::Branch { cond: CondCode::Ne, target: BranchTarget::Value(Value::Expr(_)) }
        ));
        assert_eq!(matched("ret").unwrap(), matched("jmp rca").unwrap());
        assert!(matched("call r1").is_err());
        assert!(matches!(matched("call f").unwrap(), Instruction::Call { .. }));
    }

    #[test]
    fn modifiers_must_suit_the_field() {
        let Instruction::MovHi { imm, .. } = matched("movhi r1, %hi(x)").unwrap() else {
            panic!("expected movhi");
        };
        assert!(matches!(imm, Value::Expr(e) if e.modifier() == Some(Modifier::Hi)));
        assert!(matched("lda r1, %hi(x)").is_err());
    }

    #[test]
    fn constant_modifiers_fold() {
        assert_eq!(
            matched("movhi r1, %hi(0x12345678)").unwrap(),
            Instruction::MovHi {
                rd: Register::R1,
                imm: Value::Imm(0x1234)
            }
        );
    }

    #[test]
    fn symbol_difference_is_rejected() {
        let err = matched("add r1, r1, a - b").unwrap_err();
        assert_eq!(err.message, "expression is not relocatable");
    }

    #[test]
    fn special_registers() {
        assert_eq!(
            matched("wsr.pc r3").unwrap(),
            Instruction::SpecialReg {
                op: SrOp::Write,
                reg: Register::R3,
                sreg: Register::Pc
            }
        );
        assert!(matched("rsr r1, r2").is_err(), "r2 is not a special register");
    }

    #[test]
    fn operand_count_diagnostics() {
        assert_eq!(matched("add r1, r2").unwrap_err().message, "too few operands for instruction");
        let err = matched("nop r1").unwrap_err();
        assert_eq!(err.message, "too many operands for instruction");
        assert_eq!(err.span, Span::new(1, 5));
        assert_eq!(matched("frob r1").unwrap_err().message, "unrecognized instruction mnemonic");
    }

    #[test]
    fn sys_takes_signed_byte() {
        assert_eq!(matched("sys -1").unwrap(), Instruction::Sys { code: -1 });
        assert!(matched("sys 128").is_err());
    }

    #[test]
    fn set_constants_are_visible() {
        let (statements, _) = parse("add r1, r1, SIZE * 2");
        let [Statement::Instruction(inst)] = statements.as_slice() else {
            panic!("expected one instruction");
        };
        let lookup = |name: &str| (name == "SIZE").then_some(8);
        assert_eq!(
            match_instruction(inst, &lookup).unwrap(),
            Instruction::alu_imm(AluCode::ADD, Register::R1, Register::R1, 16)
        );
    }

    fn matched_with(source: &str, name: &str, value: i64) -> Result<Instruction, Diagnostic> {
        let (statements, _) = parse(source);
        let [Statement::Instruction(inst)] = statements.as_slice() else {
            panic!("expected one instruction");
        };
        match_instruction(inst, &|symbol: &str| (symbol == name).then_some(value))
    }

    #[test]
    fn named_branch_targets_are_byte_addresses() {
        assert_eq!(
            matched_with("jmp TGT", "TGT", 400).unwrap(),
            Instruction::Branch {
                cond: CondCode::T,
                target: BranchTarget::Value(Value::Expr(Expr::symbol("TGT"))),
            }
        );
        assert_eq!(
            matched("jmp 100").unwrap(),
            Instruction::Branch { cond: CondCode::T, target: BranchTarget::Value(Value::Imm(100)) }
        );
        let err = matched_with("jmp TGT", "TGT", 402).unwrap_err();
        assert_eq!(err.message, "invalid operand for instruction");
        assert_eq!(err.span, Span::new(1, 5));
        assert!(matched_with("call F", "F", 0x800_0000).is_err());
        assert!(matched_with("call F", "F", 0x7FF_FFFC).is_ok());
    }

    #[test]
    fn named_word_offset_selects_sub() {
        let Instruction::Mem { op, offset, .. } = matched_with("ld r1, fp, K", "K", -20).unwrap()
        else {
            panic!("expected RM");
        };
        assert_eq!((op, offset), (AluCode::SUB, Value::Imm(20)));
    }
}
