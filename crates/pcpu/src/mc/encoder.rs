//! Instruction and operand encoding.

use super::expr::Expr;
use super::fixup::{Fixup, ImmField};
use crate::error::Span;
use crate::isa::{AluCode, BranchTarget, Instruction, Register, Value};
use crate::target::{Endianness, TargetConfig};

/// Where the P/Q addressing bits sit for a memory instruction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemShape {
    /// RM and RRM.
    RegImm,
    /// SPLS.
    ShortPointer,
}

impl MemShape {
    const fn p_bit(self) -> u32 {
        match self {
            Self::RegImm => 13,
            Self::ShortPointer => 21,
        }
    }

    const fn q_bit(self) -> u32 {
        match self {
            Self::RegImm => 14,
            Self::ShortPointer => 20,
        }
    }
}

/// P: the offset is applied before the access. Q: the base is written back.
#[must_use]
pub const fn pq_bits(op: AluCode, offset_nonzero: bool) -> (bool, bool) {
    let p = offset_nonzero && !op.is_post_op();
    let q = op.is_pre_or_post() && offset_nonzero;
    (p, q)
}

fn encode_pq(shape: MemShape, op: AluCode, offset_nonzero: bool) -> u32 {
    let (p, q) = pq_bits(op, offset_nonzero);
    (u32::from(p) << shape.p_bit()) | (u32::from(q) << shape.q_bit())
}

/// General-purpose register field value.
fn gpr(reg: Register) -> u32 {
    debug_assert!(reg.is_general(), "{reg} in a general register field");
    reg.encoding()
}

/// Encodes an immediate operand for `field`. Constants are truncated to the
/// field width (range checks happen when operands are matched); expressions
/// push exactly one fixup and encode as zero.
///
/// # Panics
/// If an expression carries a modifier the field does not admit. The operand
/// matcher rejects those before encoding.
pub fn encode_imm(value: &Value, field: ImmField, fixups: &mut Vec<Fixup>) -> u32 {
    match value {
        Value::Imm(v) => (*v as u32) & field.mask(),
        Value::Expr(expr) => {
            let kind = match expr {
                Expr::Modified(modifier, _) => match field.modified_kind(*modifier) {
                    Some(kind) => kind,
                    None => unreachable!("%{} in {field:?} field", modifier.name()),
                },
                _ => field.default_kind(),
            };
            fixups.push(Fixup {
                offset: 0,
                expr: expr.strip_modifier().clone(),
                kind,
                span: Span::default(),
            });
            0
        }
    }
}

fn alu_fields(op: AluCode, set_flags: bool, rd: Register, rs1: Register) -> u32 {
    (op.encode() << 4)
        | (gpr(rd) << 7)
        | (gpr(rs1) << 10)
        | (u32::from(set_flags) << 13)
        | (op.shift_kind() << 14)
}

fn mem_fields(op: AluCode, reg: Register, base: Register) -> u32 {
    (op.encode() << 4) | (gpr(reg) << 7) | (gpr(base) << 10)
}

/// Turns instructions into words in the target's byte order.
#[derive(Debug, Clone)]
pub struct CodeEmitter {
    endian: Endianness,
}

impl CodeEmitter {
    #[must_use]
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            endian: config.endian(),
        }
    }

    #[must_use]
    pub const fn endian(&self) -> Endianness {
        self.endian
    }

    /// Encodes one instruction. Fixup offsets are relative to the instruction.
    pub fn encode(&self, inst: &Instruction, fixups: &mut Vec<Fixup>) -> u32 {
        let body = match inst {
            Instruction::AluImm {
                op,
                set_flags,
                rd,
                rs1,
                imm,
            } => alu_fields(*op, *set_flags, *rd, *rs1) | (encode_imm(imm, ImmField::Imm16, fixups) << 16),
            Instruction::AluReg {
                op,
                set_flags,
                rd,
                rs1,
                rs2,
            } => alu_fields(*op, *set_flags, *rd, *rs1) | (gpr(*rs2) << 16),
            Instruction::Mem {
                op,
                reg,
                base,
                offset,
                ..
            } => {
                mem_fields(*op, *reg, *base)
                    | encode_pq(MemShape::RegImm, *op, offset.is_nonzero())
                    | (encode_imm(offset, ImmField::Imm16, fixups) << 16)
            }
            Instruction::MemReg {
                op,
                size,
                sign_extend,
                reg,
                base,
                index,
                ..
            } => {
                // No register reads as zero, so an index register is always a
                // non-zero offset.
                mem_fields(*op, *reg, *base)
                    | encode_pq(MemShape::RegImm, *op, true)
                    | (gpr(*index) << 16)
                    | (size.encode() << 19)
                    | (u32::from(*sign_extend) << 21)
            }
            Instruction::MemShort {
                op,
                size,
                sign_extend,
                reg,
                base,
                offset,
                ..
            } => {
                mem_fields(*op, *reg, *base)
                    | (size.encode() << 13)
                    | (u32::from(*sign_extend) << 15)
                    | encode_pq(MemShape::ShortPointer, *op, *offset != 0)
                    | ((u32::from(*offset) & 0x3FF) << 22)
            }
            Instruction::MemAbs { reg, addr, .. } => {
                (gpr(*reg) << 4) | (encode_imm(addr, ImmField::Addr21, fixups) << 11)
            }
            Instruction::LoadImm { rd, imm } => {
                (gpr(*rd) << 4) | (encode_imm(imm, ImmField::Imm21, fixups) << 11)
            }
            Instruction::MovHi { rd, imm } => {
                (gpr(*rd) << 4) | (encode_imm(imm, ImmField::Imm16, fixups) << 16)
            }
            Instruction::Branch { cond, target } => {
                let target = match target {
                    BranchTarget::Reg(reg) => (1 << 8) | (gpr(*reg) << 9),
                    BranchTarget::Value(value) => encode_imm(value, ImmField::Branch16, fixups) << 16,
                };
                (cond.encode() << 4) | target
            }
            Instruction::Call { target } => encode_imm(target, ImmField::Call25, fixups) << 7,
            Instruction::SpecialReg { op, reg, sreg } => {
                debug_assert!(sreg.is_special(), "{sreg} is not a special register");
                (op.encode() << 4) | (gpr(*reg) << 7) | (sreg.encoding() << 10)
            }
            Instruction::Sys { code } => (1 << 4) | (u32::from(*code as u8) << 8),
            Instruction::Nop => 0,
        };
        inst.major() as u32 | body
    }

    /// Appends the encoded instruction to `out`, rebasing its fixups onto the
    /// buffer offset.
    pub fn emit(&self, inst: &Instruction, out: &mut Vec<u8>, fixups: &mut Vec<Fixup>) {
        let start = out.len() as u32;
        let mut local = Vec::new();
        let word = self.encode(inst, &mut local);
        self.endian.write_u32(out, word);
        fixups.extend(local.into_iter().map(|mut fixup| {
            fixup.offset += start;
            fixup
        }));
    }
}
