use super::{AccessSize, AluCode, CondCode, Major, MemOp, Register, SrOp};
use crate::mc::Expr;

/// An immediate operand: a resolved constant or an expression that still
/// references a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Imm(i64),
    Expr(Expr),
}

impl Value {
    /// Whether the operand counts as a non-zero offset. Unresolved
    /// expressions always do.
    #[must_use]
    pub const fn is_nonzero(&self) -> bool {
        match self {
            Self::Imm(v) => *v != 0,
            Self::Expr(_) => true,
        }
    }

    #[must_use]
    pub const fn as_imm(&self) -> Option<i64> {
        match self {
            Self::Imm(v) => Some(*v),
            Self::Expr(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Imm(value)
    }
}

impl From<Expr> for Value {
    fn from(expr: Expr) -> Self {
        Self::Expr(expr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    Reg(Register),
    Value(Value),
}

/// A PCPU machine instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// RI: `rd = rs1 op imm16`.
    AluImm {
        op: AluCode,
        set_flags: bool,
        rd: Register,
        rs1: Register,
        imm: Value,
    },
    /// RR: `rd = rs1 op rs2`.
    AluReg {
        op: AluCode,
        set_flags: bool,
        rd: Register,
        rs1: Register,
        rs2: Register,
    },
    /// RM: word access at `base op offset`.
    Mem {
        dir: MemOp,
        op: AluCode,
        reg: Register,
        base: Register,
        offset: Value,
    },
    /// RRM: sized access at `base op index`.
    MemReg {
        dir: MemOp,
        op: AluCode,
        size: AccessSize,
        sign_extend: bool,
        reg: Register,
        base: Register,
        index: Register,
    },
    /// SPLS: sized access with a 10-bit unsigned offset.
    MemShort {
        dir: MemOp,
        op: AluCode,
        size: AccessSize,
        sign_extend: bool,
        reg: Register,
        base: Register,
        offset: u16,
    },
    /// SLS: word access at an absolute 21-bit address.
    MemAbs {
        dir: MemOp,
        reg: Register,
        addr: Value,
    },
    /// SLI: `rd = imm21`.
    LoadImm { rd: Register, imm: Value },
    /// `rd = imm16 << 16`.
    MovHi { rd: Register, imm: Value },
    Branch { cond: CondCode, target: BranchTarget },
    Call { target: Value },
    SpecialReg {
        op: SrOp,
        reg: Register,
        sreg: Register,
    },
    Sys { code: i8 },
    Nop,
}

/// Largest value the 10-bit short-pointer offset field holds.
pub const SHORT_OFFSET_MAX: u32 = 0x3FF;

impl Instruction {
    #[must_use]
    pub const fn major(&self) -> Major {
        match self {
            Self::AluImm { .. } => Major::AluImm,
            Self::AluReg { .. } => Major::AluReg,
            Self::Mem { dir: MemOp::Load, .. } => Major::Load,
            Self::Mem { dir: MemOp::Store, .. } => Major::Store,
            Self::MemReg { dir: MemOp::Load, .. } => Major::LoadReg,
            Self::MemReg { dir: MemOp::Store, .. } => Major::StoreReg,
            Self::MemShort { dir: MemOp::Load, .. } => Major::LoadShort,
            Self::MemShort { dir: MemOp::Store, .. } => Major::StoreShort,
            Self::MemAbs { dir: MemOp::Load, .. } => Major::LoadAbs,
            Self::MemAbs { dir: MemOp::Store, .. } => Major::StoreAbs,
            Self::LoadImm { .. } => Major::LoadImm,
            Self::Branch { .. } => Major::Branch,
            Self::Call { .. } => Major::Call,
            Self::SpecialReg { .. } => Major::SpecialReg,
            Self::MovHi { .. } => Major::MovHi,
            Self::Sys { .. } | Self::Nop => Major::System,
        }
    }

    #[must_use]
    pub fn alu_imm(op: AluCode, rd: Register, rs1: Register, imm: i64) -> Self {
        Self::AluImm {
            op,
            set_flags: false,
            rd,
            rs1,
            imm: Value::Imm(imm),
        }
    }

    #[must_use]
    pub const fn alu_reg(op: AluCode, rd: Register, rs1: Register, rs2: Register) -> Self {
        Self::AluReg {
            op,
            set_flags: false,
            rd,
            rs1,
            rs2,
        }
    }

    /// `mov rd, rs`, encoded as `add rd, rs, 0`.
    #[must_use]
    pub fn mov(rd: Register, rs: Register) -> Self {
        Self::alu_imm(AluCode::ADD, rd, rs, 0)
    }

    /// Sized access relative to `base`; a negative offset selects `sub`.
    ///
    /// # Panics
    /// If `offset` does not fit the short-pointer field; callers range-check first.
    #[must_use]
    pub fn short(
        dir: MemOp,
        size: AccessSize,
        reg: Register,
        base: Register,
        offset: i64,
    ) -> Self {
        let magnitude = offset.unsigned_abs();
        assert!(
            magnitude <= u64::from(SHORT_OFFSET_MAX),
            "offset {offset} does not fit a short-pointer access"
        );
        Self::MemShort {
            dir,
            op: if offset < 0 { AluCode::SUB } else { AluCode::ADD },
            size,
            sign_extend: false,
            reg,
            base,
            offset: magnitude as u16,
        }
    }

    /// `jmp rca`.
    #[must_use]
    pub const fn ret() -> Self {
        Self::Branch {
            cond: CondCode::T,
            target: BranchTarget::Reg(Register::RCA),
        }
    }

    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(self, Self::Branch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expressions_are_nonzero_offsets() {
        assert!(!Value::Imm(0).is_nonzero());
        assert!(Value::Imm(-4).is_nonzero());
        assert!(Value::Expr(Expr::symbol("x")).is_nonzero());
    }

    #[test]
    fn negative_short_offsets_use_sub() {
        let inst = Instruction::short(MemOp::Store, AccessSize::Half, Register::FP, Register::SP, -2);
        let Instruction::MemShort { op, offset, .. } = inst else {
            panic!("expected a short-pointer store");
        };
        assert_eq!(op, AluCode::SUB);
        assert_eq!(offset, 2);
    }

    #[test]
    fn majors_follow_direction() {
        let load = Instruction::Mem {
            dir: MemOp::Load,
            op: AluCode::ADD,
            reg: Register::R1,
            base: Register::R2,
            offset: Value::Imm(0),
        };
        assert_eq!(load.major(), Major::Load);
        assert_eq!(Instruction::Nop.major(), Major::System);
        assert!(Instruction::ret().is_terminator());
    }
}
