//! Emission of lowered machine functions through the object streamer.

use super::frame_lowering::FrameLowering;
use super::mir::{BlockId, CallTarget, MachineFunction, MachineInstr};
use crate::abi;
use crate::isa::{AluCode, BranchTarget, CondCode, Instruction, Register, SrOp, Value};
use crate::mc::{Expr, ObjectStreamer};
use crate::target::TargetConfig;
use crate::{Error, Result};

/// Local label of a basic block.
#[must_use]
pub fn block_label(function: &str, block: BlockId) -> String {
    format!(".LBB{function}_{}", block.0)
}

/// `rsr.pc rca; add rca, rca, 12; jmp target`.
#[must_use]
pub fn expand_indirect_call(target: Register) -> [Instruction; 3] {
    let rca = abi::RETURN_ADDR_REG;
    [
        Instruction::SpecialReg {
            op: SrOp::Read,
            reg: rca,
            sreg: Register::Pc,
        },
        Instruction::alu_imm(AluCode::ADD, rca, rca, abi::INDIRECT_CALL_RETURN_OFFSET),
        Instruction::Branch {
            cond: CondCode::T,
            target: BranchTarget::Reg(target),
        },
    ]
}

/// Concrete instructions for one post-frame-lowering machine instruction.
fn expand(mf: &MachineFunction, inst: &MachineInstr) -> Result<Vec<Instruction>> {
    Ok(match inst {
        MachineInstr::Real(inst) => vec![inst.clone()],
        MachineInstr::Jump { cond, target } => vec![Instruction::Branch {
            cond: *cond,
            target: BranchTarget::Value(Value::Expr(Expr::symbol(block_label(&mf.name, *target)))),
        }],
        MachineInstr::Call(CallTarget::Symbol(name)) => vec![Instruction::Call {
            target: Value::Expr(Expr::symbol(name.as_str())),
        }],
        MachineInstr::Call(CallTarget::Register(reg)) => expand_indirect_call(*reg).to_vec(),
        MachineInstr::Ret => vec![Instruction::ret()],
        other => {
            return Err(Error::Internal(format!(
                "{}: {other:?} survived frame lowering",
                mf.name
            )));
        }
    })
}

/// Streams a fully lowered function into the current section. The function
/// symbol is global.
pub fn emit_function(mf: &MachineFunction, streamer: &mut ObjectStreamer) -> Result<()> {
    streamer.switch_section(".text");
    streamer.align(4)?;
    streamer.declare_global(&mf.name);
    streamer.define_label(&mf.name)?;
    let start = streamer.offset();
    for (index, block) in mf.blocks.iter().enumerate() {
        streamer.define_label(&block_label(&mf.name, BlockId(index)))?;
        for inst in &block.instrs {
            for concrete in expand(mf, inst)? {
                streamer.emit_instruction(&concrete)?;
            }
        }
    }
    tracing::debug!(
        function = %mf.name,
        bytes = streamer.offset() - start,
        blocks = mf.blocks.len(),
        "emitted function"
    );
    Ok(())
}

/// Runs branch simplification and frame lowering, then emits the function.
pub fn compile_function(
    mut mf: MachineFunction,
    config: &TargetConfig,
    streamer: &mut ObjectStreamer,
) -> Result<()> {
    super::branch::simplify_branches(&mut mf);
    FrameLowering::new(config).run(&mut mf)?;
    emit_function(&mf, streamer)
}
