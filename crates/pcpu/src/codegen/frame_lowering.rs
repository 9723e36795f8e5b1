//! Frame layout, prologue/epilogue insertion and frame-index elimination.

use super::frame::FrameInfo;
use super::mir::{BlockId, MachineFunction, MachineInstr};
use super::scavenger::{Liveness, RegScavenger};
use crate::abi::{self, MAX_ALU_IMM, MAX_FRAME_SIZE};
use crate::isa::{AccessSize, AluCode, Instruction, MemOp, Register, Value};
use crate::target::TargetConfig;
use crate::{Error, Result};

/// Size of the emergency spill slot: one full register.
const SCAVENGING_SLOT_SIZE: u32 = 4;

/// ALU code and unsigned magnitude applying `offset` to a base register.
/// Immediate fields are unsigned, so a negative offset turns `add` into `sub`.
fn signed_offset(offset: i64) -> (AluCode, u64) {
    let op = if offset < 0 { AluCode::SUB } else { AluCode::ADD };
    (op, offset.unsigned_abs())
}

/// Word access through RM at `base ± offset`.
fn word_access(dir: MemOp, reg: Register, base: Register, offset: i64) -> Instruction {
    let (op, magnitude) = signed_offset(offset);
    Instruction::Mem {
        dir,
        op,
        reg,
        base,
        offset: Value::Imm(magnitude as i64),
    }
}

/// Loads `value` into `reg`: `mov` for 16-bit values, `movhi` + `or` above.
fn materialize(reg: Register, value: u64) -> Vec<Instruction> {
    if value <= MAX_ALU_IMM {
        return vec![Instruction::LoadImm {
            rd: reg,
            imm: Value::Imm(value as i64),
        }];
    }
    let mut seq = vec![Instruction::MovHi {
        rd: reg,
        imm: Value::Imm(((value >> 16) & 0xFFFF) as i64),
    }];
    let low = value & 0xFFFF;
    if low != 0 {
        seq.push(Instruction::alu_imm(AluCode::OR, reg, reg, low as i64));
    }
    seq
}

/// Immediate form of a frame pseudo at final `offset`, if the field holds it.
fn direct_form(inst: &MachineInstr, offset: i64) -> Option<Instruction> {
    let (op, magnitude) = signed_offset(offset);
    let fp = abi::FRAME_PTR_REG;
    match *inst {
        MachineInstr::FrameAddr { rd, .. } => (magnitude <= MAX_ALU_IMM).then(|| Instruction::AluImm {
            op,
            set_flags: false,
            rd,
            rs1: fp,
            imm: Value::Imm(magnitude as i64),
        }),
        MachineInstr::FrameLoad {
            reg, size: None, ..
        } => (magnitude <= MAX_ALU_IMM).then(|| word_access(MemOp::Load, reg, fp, offset)),
        MachineInstr::FrameStore {
            reg, size: None, ..
        } => (magnitude <= MAX_ALU_IMM).then(|| word_access(MemOp::Store, reg, fp, offset)),
        MachineInstr::FrameLoad {
            reg,
            size: Some(size),
            sign_extend,
            ..
        } => size
            .accepts_short_offset(magnitude as i64)
            .then(|| Instruction::MemShort {
                dir: MemOp::Load,
                op,
                size,
                sign_extend,
                reg,
                base: fp,
                offset: magnitude as u16,
            }),
        MachineInstr::FrameStore {
            reg,
            size: Some(size),
            ..
        } => size
            .accepts_short_offset(magnitude as i64)
            .then(|| Instruction::MemShort {
                dir: MemOp::Store,
                op,
                size,
                sign_extend: false,
                reg,
                base: fp,
                offset: magnitude as u16,
            }),
        _ => None,
    }
}

/// Register-register form of a frame pseudo with the offset held in `scratch`.
fn indexed_form(inst: &MachineInstr, offset: i64, scratch: Register) -> Vec<Instruction> {
    let (op, magnitude) = signed_offset(offset);
    let fp = abi::FRAME_PTR_REG;
    let mut seq = materialize(scratch, magnitude);
    seq.push(match *inst {
        MachineInstr::FrameAddr { rd, .. } => Instruction::alu_reg(op, rd, fp, scratch),
        MachineInstr::FrameLoad {
            reg,
            size,
            sign_extend,
            ..
        } => Instruction::MemReg {
            dir: MemOp::Load,
            op,
            size: size.unwrap_or(AccessSize::Word),
            sign_extend,
            reg,
            base: fp,
            index: scratch,
        },
        MachineInstr::FrameStore { reg, size, .. } => Instruction::MemReg {
            dir: MemOp::Store,
            op,
            size: size.unwrap_or(AccessSize::Word),
            sign_extend: false,
            reg,
            base: fp,
            index: scratch,
        },
        _ => unreachable!("indexed_form on a non-frame instruction"),
    });
    seq
}

const fn pseudo_offset(inst: &MachineInstr) -> i64 {
    match inst {
        MachineInstr::FrameAddr { offset, .. }
        | MachineInstr::FrameLoad { offset, .. }
        | MachineInstr::FrameStore { offset, .. } => *offset,
        _ => 0,
    }
}

/// Lowers the frame of one function. Holds only target constants; all
/// per-function state lives in the [`MachineFunction`].
#[derive(Debug, Clone)]
pub struct FrameLowering {
    slot: u32,
    stack_align: u32,
}

impl FrameLowering {
    #[must_use]
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            slot: config.slot_size(),
            stack_align: config.stack_align(),
        }
    }

    /// Outgoing arguments live in the fixed frame unless `sp` moves at run time.
    #[must_use]
    pub fn has_reserved_call_frame(&self, frame: &FrameInfo) -> bool {
        !frame.has_var_sized_objects
    }

    /// Saved `rca`/`fp` slot access.
    fn slot_access(&self, dir: MemOp, reg: Register, offset: i64) -> Instruction {
        match AccessSize::for_bytes(self.slot) {
            Some(size @ (AccessSize::Byte | AccessSize::Half)) => {
                Instruction::short(dir, size, reg, abi::STACK_PTR_REG, offset)
            }
            _ => word_access(dir, reg, abi::STACK_PTR_REG, offset),
        }
    }

    /// Creates the emergency spill slot when the frame may outgrow the
    /// shortest short-pointer range.
    pub fn process_before_layout(&self, mf: &mut MachineFunction) {
        let limit = u64::from(AccessSize::Byte.max_short_offset());
        let estimate = mf.frame.estimate_stack_size() + u64::from(self.slot);
        if estimate > limit && mf.frame.scavenging_slot.is_none() {
            let slot = mf
                .frame
                .create_stack_object(SCAVENGING_SLOT_SIZE, self.stack_align);
            mf.frame.scavenging_slot = Some(slot);
            tracing::debug!(function = %mf.name, estimate, %slot, "created emergency spill slot");
        }
    }

    /// Assigns offsets to the non-fixed objects and computes the frame size.
    pub fn determine_frame_layout(&self, mf: &mut MachineFunction) -> Result<u32> {
        let reserved = self.has_reserved_call_frame(&mf.frame);
        let frame = &mut mf.frame;
        let order: Vec<_> = frame
            .scavenging_slot
            .into_iter()
            .chain(
                (0..frame.objects().len())
                    .map(super::mir::FrameIndex)
                    .filter(|&i| Some(i) != frame.scavenging_slot && !frame.object(i).fixed),
            )
            .collect();

        let mut placed = u64::from(self.slot);
        for index in order {
            let object = frame.object_mut(index);
            placed = (placed + u64::from(object.size)).next_multiple_of(u64::from(object.align));
            object.offset = -(placed as i64);
        }
        if reserved && frame.adjusts_stack {
            placed += u64::from(frame.max_call_frame);
        }

        let align = u64::from(self.stack_align);
        let mut size = placed.next_multiple_of(align);
        if !reserved {
            size += u64::from(frame.max_call_frame).next_multiple_of(align);
        }
        if size > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                function: mf.name.clone(),
                size,
            });
        }
        frame.stack_size = size as u32;
        tracing::debug!(function = %mf.name, size, reserved, "frame layout");
        Ok(frame.stack_size)
    }

    /// Saves `rca` and `fp`, establishes `fp` and allocates the frame.
    pub fn emit_prologue(&self, mf: &mut MachineFunction) {
        let slot = i64::from(self.slot);
        let mut prologue = vec![
            self.slot_access(MemOp::Store, abi::RETURN_ADDR_REG, abi::RETURN_ADDR_SLOT),
            self.slot_access(MemOp::Store, abi::FRAME_PTR_REG, -slot),
            Instruction::mov(abi::FRAME_PTR_REG, abi::STACK_PTR_REG),
        ];
        if mf.frame.stack_size != 0 {
            prologue.push(Instruction::alu_imm(
                AluCode::SUB,
                abi::STACK_PTR_REG,
                abi::STACK_PTR_REG,
                i64::from(mf.frame.stack_size),
            ));
        }
        let entry = &mut mf.blocks[0].instrs;
        entry.splice(0..0, prologue.into_iter().map(MachineInstr::Real));
    }

    /// Restores `sp`, `fp` and `rca` in front of every return.
    pub fn emit_epilogue(&self, mf: &mut MachineFunction) {
        let slot = i64::from(self.slot);
        let epilogue = [
            Instruction::mov(abi::STACK_PTR_REG, abi::FRAME_PTR_REG),
            self.slot_access(MemOp::Load, abi::FRAME_PTR_REG, -slot),
            self.slot_access(MemOp::Load, abi::RETURN_ADDR_REG, abi::RETURN_ADDR_SLOT),
        ];
        for block in &mut mf.blocks {
            let mut i = 0;
            while i < block.instrs.len() {
                if block.instrs[i] == MachineInstr::Ret {
                    block
                        .instrs
                        .splice(i..i, epilogue.iter().cloned().map(MachineInstr::Real));
                    i += epilogue.len();
                }
                i += 1;
            }
        }
    }

    /// Deletes call-frame pseudos, or turns them into `sp` adjustments when the
    /// call frame is not reserved.
    pub fn eliminate_call_frame_pseudos(&self, mf: &mut MachineFunction) {
        let reserved = self.has_reserved_call_frame(&mf.frame);
        let sp = abi::STACK_PTR_REG;
        let align = self.stack_align;
        for block in &mut mf.blocks {
            block.instrs = std::mem::take(&mut block.instrs)
                .into_iter()
                .filter_map(|inst| match inst {
                    MachineInstr::CallSeqStart { bytes } | MachineInstr::CallSeqEnd { bytes }
                        if reserved || bytes == 0 =>
                    {
                        None
                    }
                    MachineInstr::CallSeqStart { bytes } => Some(MachineInstr::Real(
                        Instruction::alu_imm(AluCode::SUB, sp, sp, i64::from(bytes.next_multiple_of(align))),
                    )),
                    MachineInstr::CallSeqEnd { bytes } => Some(MachineInstr::Real(
                        Instruction::alu_imm(AluCode::ADD, sp, sp, i64::from(bytes.next_multiple_of(align))),
                    )),
                    other => Some(other),
                })
                .collect();
        }
    }

    /// Rewrites every frame pseudo to a concrete `fp`-relative instruction.
    pub fn eliminate_frame_indices(&self, mf: &mut MachineFunction) -> Result<()> {
        let liveness = Liveness::compute(mf);
        let mut scavenged = 0usize;
        let mut spilled = 0usize;
        for b in 0..mf.blocks.len() {
            let block = std::mem::take(&mut mf.blocks[b]);
            let scavenger = RegScavenger::for_block(&block, liveness.live_out(BlockId(b)));
            let mut out = Vec::with_capacity(block.instrs.len());
            for (i, inst) in block.instrs.into_iter().enumerate() {
                let Some(index) = inst.frame_index() else {
                    out.push(inst);
                    continue;
                };
                let offset = mf.frame.object(index).offset + pseudo_offset(&inst);
                if let Some(direct) = direct_form(&inst, offset) {
                    out.push(MachineInstr::Real(direct));
                    continue;
                }
                if let Some(scratch) = scavenger.scavenge(i, &inst) {
                    scavenged += 1;
                    out.extend(indexed_form(&inst, offset, scratch).into_iter().map(MachineInstr::Real));
                    continue;
                }
                let (Some(slot), Some(reg)) =
                    (mf.frame.scavenging_slot, RegScavenger::spill_candidate(&inst))
                else {
                    return Err(Error::Internal(format!(
                        "{}: no register to reach {index} at offset {offset}",
                        mf.name
                    )));
                };
                spilled += 1;
                let spill_offset = mf.frame.object(slot).offset;
                let fp = abi::FRAME_PTR_REG;
                out.push(MachineInstr::Real(word_access(MemOp::Store, reg, fp, spill_offset)));
                out.extend(indexed_form(&inst, offset, reg).into_iter().map(MachineInstr::Real));
                out.push(MachineInstr::Real(word_access(MemOp::Load, reg, fp, spill_offset)));
            }
            mf.blocks[b].instrs = out;
        }
        if scavenged + spilled > 0 {
            tracing::debug!(function = %mf.name, scavenged, spilled, "out-of-range frame offsets");
        }
        Ok(())
    }

    /// Runs the whole frame pipeline once.
    pub fn run(&self, mf: &mut MachineFunction) -> Result<()> {
        self.process_before_layout(mf);
        self.determine_frame_layout(mf)?;
        self.emit_prologue(mf);
        self.emit_epilogue(mf);
        self.eliminate_call_frame_pseudos(mf);
        self.eliminate_frame_indices(mf)
    }
}
