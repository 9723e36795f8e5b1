//! Machine IR: functions of basic blocks holding concrete instructions and
//! the pseudos that frame and call lowering resolve.

use std::fmt;

use super::frame::FrameInfo;
use crate::abi;
use crate::isa::{AccessSize, BranchTarget, CondCode, Instruction, MemOp, Register, SrOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameIndex(pub usize);

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fi#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// A set of general-purpose registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSet(u8);

impl RegSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn of(regs: &[Register]) -> Self {
        let mut set = Self::empty();
        for &reg in regs {
            set.insert(reg);
        }
        set
    }

    pub fn insert(&mut self, reg: Register) {
        if reg.is_general() {
            self.0 |= 1 << reg.encoding();
        }
    }

    pub fn remove(&mut self, reg: Register) {
        if reg.is_general() {
            self.0 &= !(1 << reg.encoding());
        }
    }

    #[must_use]
    pub const fn contains(self, reg: Register) -> bool {
        reg.is_general() && self.0 & (1 << reg.encoding()) != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Register> {
        Register::GENERAL
            .into_iter()
            .filter(move |&reg| self.contains(reg))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Symbol(String),
    /// Expanded to `rsr.pc rca; add rca, rca, 12; jmp reg`.
    Register(Register),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineInstr {
    Real(Instruction),
    /// `rd = address of object + offset`.
    FrameAddr {
        rd: Register,
        index: FrameIndex,
        offset: i64,
    },
    /// Load from a stack object. `size: None` is a word access through RM.
    FrameLoad {
        reg: Register,
        index: FrameIndex,
        offset: i64,
        size: Option<AccessSize>,
        sign_extend: bool,
    },
    FrameStore {
        reg: Register,
        index: FrameIndex,
        offset: i64,
        size: Option<AccessSize>,
    },
    /// Opens a call sequence needing `bytes` of outgoing stack.
    CallSeqStart { bytes: u32 },
    CallSeqEnd { bytes: u32 },
    Call(CallTarget),
    Jump { cond: CondCode, target: BlockId },
    Ret,
}

impl From<Instruction> for MachineInstr {
    fn from(inst: Instruction) -> Self {
        Self::Real(inst)
    }
}

fn mem_writeback(op: crate::isa::AluCode, base: Register, set: &mut RegSet) {
    if op.is_pre_or_post() {
        set.insert(base);
    }
}

/// Registers an instruction reads.
#[must_use]
pub fn inst_uses(inst: &Instruction) -> RegSet {
    let mut set = RegSet::empty();
    match inst {
        Instruction::AluImm { rs1, .. } => set.insert(*rs1),
        Instruction::AluReg { rs1, rs2, .. } => {
            set.insert(*rs1);
            set.insert(*rs2);
        }
        Instruction::Mem { dir, reg, base, .. } | Instruction::MemShort { dir, reg, base, .. } => {
            set.insert(*base);
            if *dir == MemOp::Store {
                set.insert(*reg);
            }
        }
        Instruction::MemReg {
            dir,
            reg,
            base,
            index,
            ..
        } => {
            set.insert(*base);
            set.insert(*index);
            if *dir == MemOp::Store {
                set.insert(*reg);
            }
        }
        Instruction::MemAbs {
            dir: MemOp::Store,
            reg,
            ..
        } => set.insert(*reg),
        Instruction::Branch {
            target: BranchTarget::Reg(reg),
            ..
        } => set.insert(*reg),
        Instruction::SpecialReg {
            op: SrOp::Write | SrOp::Exchange,
            reg,
            ..
        } => set.insert(*reg),
        Instruction::Sys { .. } => set = RegSet::of(&abi::ARG_REGS),
        _ => {}
    }
    set
}

/// Registers an instruction writes.
#[must_use]
pub fn inst_defs(inst: &Instruction) -> RegSet {
    let mut set = RegSet::empty();
    match inst {
        Instruction::AluImm { set_flags, rd, .. } | Instruction::AluReg { set_flags, rd, .. } => {
            if !set_flags {
                set.insert(*rd);
            }
        }
        Instruction::Mem {
            dir, op, reg, base, ..
        }
        | Instruction::MemReg {
            dir, op, reg, base, ..
        }
        | Instruction::MemShort {
            dir, op, reg, base, ..
        } => {
            if *dir == MemOp::Load {
                set.insert(*reg);
            }
            mem_writeback(*op, *base, &mut set);
        }
        Instruction::MemAbs {
            dir: MemOp::Load,
            reg,
            ..
        } => set.insert(*reg),
        Instruction::LoadImm { rd, .. } | Instruction::MovHi { rd, .. } => set.insert(*rd),
        Instruction::Call { .. } => set.insert(abi::RETURN_ADDR_REG),
        Instruction::SpecialReg {
            op: SrOp::Read | SrOp::Exchange,
            reg,
            ..
        } => set.insert(*reg),
        Instruction::Sys { .. } => set = RegSet::of(&abi::RETURN_REGS),
        _ => {}
    }
    set
}

impl MachineInstr {
    #[must_use]
    pub fn uses(&self) -> RegSet {
        match self {
            Self::Real(inst) => inst_uses(inst),
            Self::FrameStore { reg, .. } => RegSet::of(&[*reg]),
            Self::Call(target) => {
                let mut set = RegSet::of(&abi::ARG_REGS);
                if let CallTarget::Register(reg) = target {
                    set.insert(*reg);
                }
                set
            }
            Self::Ret => RegSet::of(&abi::RETURN_REGS),
            Self::FrameAddr { .. }
            | Self::FrameLoad { .. }
            | Self::CallSeqStart { .. }
            | Self::CallSeqEnd { .. }
            | Self::Jump { .. } => RegSet::empty(),
        }
    }

    #[must_use]
    pub fn defs(&self) -> RegSet {
        match self {
            Self::Real(inst) => inst_defs(inst),
            Self::FrameAddr { rd, .. } => RegSet::of(&[*rd]),
            Self::FrameLoad { reg, .. } => RegSet::of(&[*reg]),
            Self::Call(_) => {
                let mut set = RegSet::of(&abi::CALLER_SAVED_REGS);
                set.insert(abi::RETURN_ADDR_REG);
                set
            }
            Self::FrameStore { .. }
            | Self::CallSeqStart { .. }
            | Self::CallSeqEnd { .. }
            | Self::Jump { .. }
            | Self::Ret => RegSet::empty(),
        }
    }

    /// Whether the instruction still references a stack object.
    #[must_use]
    pub const fn frame_index(&self) -> Option<FrameIndex> {
        match self {
            Self::FrameAddr { index, .. }
            | Self::FrameLoad { index, .. }
            | Self::FrameStore { index, .. } => Some(*index),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        match self {
            Self::Real(inst) => inst.is_terminator(),
            Self::Jump { .. } | Self::Ret => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineBlock {
    pub instrs: Vec<MachineInstr>,
}

impl MachineBlock {
    #[must_use]
    pub fn new(instrs: Vec<MachineInstr>) -> Self {
        Self { instrs }
    }

    pub fn push(&mut self, inst: impl Into<MachineInstr>) {
        self.instrs.push(inst.into());
    }

    /// Index of the first terminator, or the block length.
    #[must_use]
    pub fn first_terminator(&self) -> usize {
        self.instrs
            .iter()
            .position(MachineInstr::is_terminator)
            .unwrap_or(self.instrs.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFunction {
    pub name: String,
    pub blocks: Vec<MachineBlock>,
    pub frame: FrameInfo,
    pub is_vararg: bool,
}

impl MachineFunction {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blocks: vec![MachineBlock::default()],
            frame: FrameInfo::default(),
            is_vararg: false,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(MachineBlock::default());
        BlockId(self.blocks.len() - 1)
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut MachineBlock {
        &mut self.blocks[id.0]
    }

    /// Iterates every instruction in layout order.
    pub fn instrs(&self) -> impl Iterator<Item = &MachineInstr> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::AluCode;

    #[test]
    fn regset_ignores_special_registers() {
        let mut set = RegSet::of(&[Register::R1, Register::Pc]);
        assert!(set.contains(Register::R1));
        assert!(!set.contains(Register::Pc));
        set.remove(Register::R1);
        assert!(set.is_empty());
    }

    #[test]
    fn post_increment_writes_its_base() {
        let inst = Instruction::Mem {
            dir: MemOp::Load,
            op: AluCode::ADD.make_post_op(),
            reg: Register::R1,
            base: Register::R2,
            offset: crate::isa::Value::Imm(4),
        };
        assert_eq!(inst_defs(&inst), RegSet::of(&[Register::R1, Register::R2]));
        assert_eq!(inst_uses(&inst), RegSet::of(&[Register::R2]));
    }

    #[test]
    fn flag_setting_compare_defines_nothing() {
        let cmp = Instruction::AluReg {
            op: AluCode::SUB,
            set_flags: true,
            rd: Register::R0,
            rs1: Register::R1,
            rs2: Register::R2,
        };
        assert!(inst_defs(&cmp).is_empty());
    }

    #[test]
    fn calls_clobber_caller_saved_registers() {
        let call = MachineInstr::Call(CallTarget::Symbol("f".into()));
        for reg in abi::CALLER_SAVED_REGS {
            assert!(call.defs().contains(reg));
        }
        assert!(!call.defs().contains(Register::FP));
    }

    #[test]
    fn first_terminator_finds_jumps() {
        let mut block = MachineBlock::default();
        block.push(Instruction::Nop);
        block.push(MachineInstr::Jump {
            cond: CondCode::Eq,
            target: BlockId(1),
        });
        block.push(MachineInstr::Ret);
        assert_eq!(block.first_terminator(), 1);
    }
}
