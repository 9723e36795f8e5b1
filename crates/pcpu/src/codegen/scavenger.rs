//! Register liveness and scavenging after allocation.

use super::branch::{BranchKind, analyze_branch, successors};
use super::mir::{BlockId, MachineBlock, MachineFunction, MachineInstr, RegSet};
use crate::abi;
use crate::isa::{BranchTarget, Instruction, Register};

/// Registers live on exit from blocks without successors.
fn exit_live(block: &MachineBlock) -> RegSet {
    match block.instrs.last() {
        Some(MachineInstr::Real(Instruction::Branch {
            target: BranchTarget::Reg(reg),
            ..
        })) if *reg != abi::RETURN_ADDR_REG => RegSet::of(&abi::ALLOCATABLE_REGS),
        _ => RegSet::empty(),
    }
}

/// Live-in of `block` given its live-out.
fn transfer(block: &MachineBlock, live_out: RegSet) -> RegSet {
    block
        .instrs
        .iter()
        .rev()
        .fold(live_out, |live, inst| live.difference(inst.defs()).union(inst.uses()))
}

/// Per-block live-out sets of a function.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_out: Vec<RegSet>,
}

impl Liveness {
    #[must_use]
    pub fn compute(mf: &MachineFunction) -> Self {
        let count = mf.blocks.len();
        let succs: Vec<Vec<BlockId>> = (0..count).map(|i| successors(mf, BlockId(i))).collect();
        let mut live_in = vec![RegSet::empty(); count];
        let mut live_out = vec![RegSet::empty(); count];
        let mut changed = true;
        while changed {
            changed = false;
            for i in (0..count).rev() {
                let block = &mf.blocks[i];
                let mut out = match analyze_branch(block) {
                    Some(BranchKind::Indirect) | None => exit_live(block),
                    _ => RegSet::empty(),
                };
                for succ in &succs[i] {
                    out = out.union(live_in[succ.0]);
                }
                let inn = transfer(block, out);
                if out != live_out[i] || inn != live_in[i] {
                    live_out[i] = out;
                    live_in[i] = inn;
                    changed = true;
                }
            }
        }
        Self { live_out }
    }

    #[must_use]
    pub fn live_out(&self, id: BlockId) -> RegSet {
        self.live_out[id.0]
    }
}

/// Finds free registers at points inside one block. The state is scoped to
/// the block it was built for.
#[derive(Debug, Clone)]
pub struct RegScavenger {
    live_after: Vec<RegSet>,
}

impl RegScavenger {
    #[must_use]
    pub fn for_block(block: &MachineBlock, live_out: RegSet) -> Self {
        let mut live_after = vec![RegSet::empty(); block.instrs.len()];
        let mut live = live_out;
        for (i, inst) in block.instrs.iter().enumerate().rev() {
            live_after[i] = live;
            live = live.difference(inst.defs()).union(inst.uses());
        }
        Self { live_after }
    }

    #[must_use]
    pub fn live_after(&self, index: usize) -> RegSet {
        self.live_after[index]
    }

    /// Registers the instruction at `index` may use as a temporary: not
    /// reserved, not touched by the instruction, not live afterwards.
    #[must_use]
    pub fn available(&self, index: usize, inst: &MachineInstr) -> RegSet {
        let busy = self.live_after[index]
            .union(inst.uses())
            .union(inst.defs());
        RegSet::of(&abi::ALLOCATABLE_REGS).difference(busy)
    }

    /// Prefers the scratch register, then the lowest free one.
    #[must_use]
    pub fn scavenge(&self, index: usize, inst: &MachineInstr) -> Option<Register> {
        let free = self.available(index, inst);
        if free.contains(abi::SCRATCH_REG) {
            return Some(abi::SCRATCH_REG);
        }
        free.iter().next()
    }

    /// Register to spill through the emergency slot when nothing is free.
    #[must_use]
    pub fn spill_candidate(inst: &MachineInstr) -> Option<Register> {
        let busy = inst.uses().union(inst.defs());
        std::iter::once(abi::SCRATCH_REG)
            .chain(abi::ALLOCATABLE_REGS)
            .find(|&reg| !busy.contains(reg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::mir::{CallTarget, FrameIndex};
    use crate::isa::{AluCode, CondCode};

    fn add(rd: Register, rs1: Register, rs2: Register) -> MachineInstr {
        Instruction::alu_reg(AluCode::ADD, rd, rs1, rs2).into()
    }

    fn load(reg: Register) -> MachineInstr {
        MachineInstr::FrameLoad {
            reg,
            index: FrameIndex(0),
            offset: 0,
            size: None,
            sign_extend: false,
        }
    }

    #[test]
    fn scratch_register_is_preferred() {
        let block = MachineBlock::new(vec![load(Register::R1), MachineInstr::Ret]);
        let scavenger = RegScavenger::for_block(&block, RegSet::empty());
        assert_eq!(scavenger.scavenge(0, &block.instrs[0]), Some(Register::R4));
    }

    #[test]
    fn live_registers_are_skipped() {
        let block = MachineBlock::new(vec![
            load(Register::R1),
            add(Register::R0, Register::R2, Register::R3),
            add(Register::R0, Register::R0, Register::R4),
            MachineInstr::Ret,
        ]);
        let scavenger = RegScavenger::for_block(&block, RegSet::empty());
        let free = scavenger.available(0, &block.instrs[0]);
        assert_eq!(free, RegSet::of(&[Register::R0]));
        assert_eq!(scavenger.scavenge(0, &block.instrs[0]), Some(Register::R0));
    }

    #[test]
    fn nothing_free_before_a_call() {
        let block = MachineBlock::new(vec![
            load(Register::R4),
            MachineInstr::Call(CallTarget::Symbol("f".into())),
            MachineInstr::Ret,
        ]);
        let scavenger = RegScavenger::for_block(&block, RegSet::empty());
        assert_eq!(scavenger.scavenge(0, &block.instrs[0]), None);
        assert_eq!(
            RegScavenger::spill_candidate(&block.instrs[0]),
            Some(Register::R0)
        );
    }

    #[test]
    fn liveness_flows_through_loops() {
        let mut mf = MachineFunction::new("loop");
        mf.blocks = vec![
            MachineBlock::new(vec![Instruction::LoadImm {
                rd: Register::R2,
                imm: crate::isa::Value::Imm(0),
            }
            .into()]),
            MachineBlock::new(vec![
                add(Register::R2, Register::R2, Register::R3),
                MachineInstr::Jump {
                    cond: CondCode::Ne,
                    target: BlockId(1),
                },
            ]),
            MachineBlock::new(vec![MachineInstr::Ret]),
        ];
        let liveness = Liveness::compute(&mf);
        let out0 = liveness.live_out(BlockId(0));
        assert!(out0.contains(Register::R2));
        assert!(out0.contains(Register::R3));
        assert!(out0.contains(Register::R0));
        assert!(!out0.contains(Register::R4));
        assert_eq!(
            liveness.live_out(BlockId(2)),
            RegSet::empty()
        );
    }
}
