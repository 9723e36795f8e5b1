//! PiOS calling convention: location assignment and call lowering.

use super::frame::FrameInfo;
use super::mir::{BlockId, CallTarget, FrameIndex, MachineFunction, MachineInstr};
use crate::abi;
use crate::isa::{AccessSize, AluCode, Instruction, MemOp, Register, Value};
use crate::target::TargetConfig;
use crate::{Error, Result};

/// Width of a general-purpose register in bytes.
const REGISTER_BYTES: u32 = 4;

/// Shape of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgInfo {
    pub size: u32,
    pub align: u32,
    /// Aggregate passed by copying it into caller-owned stack storage.
    pub byval: bool,
    /// `false` for arguments matching the `...` of a varargs callee.
    pub fixed: bool,
}

impl ArgInfo {
    #[must_use]
    pub const fn scalar(size: u32) -> Self {
        Self {
            size,
            align: size,
            byval: false,
            fixed: true,
        }
    }

    #[must_use]
    pub const fn byval(size: u32, align: u32) -> Self {
        Self {
            size,
            align,
            byval: true,
            fixed: true,
        }
    }

    #[must_use]
    pub const fn variadic(self) -> Self {
        Self {
            fixed: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    Register(Register),
    /// Offset past the header gap of the outgoing area.
    Stack { offset: u32, size: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLayout {
    pub locations: Vec<ArgLocation>,
    /// Outgoing stack bytes, header gap excluded.
    pub stack_bytes: u32,
}

/// Incoming value of a formal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingArg {
    Register(Register),
    /// Fixed object over the caller's outgoing slot.
    Stack(FrameIndex),
}

/// A call to lower: `args` are registers holding the argument values (for
/// byval arguments, the address of the aggregate); `results` receive the
/// returned registers in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub target: CallTarget,
    pub args: Vec<(ArgInfo, Register)>,
    pub results: Vec<Register>,
}

/// Orders a parallel register move so that no source is overwritten before
/// it is read. Cycles are broken through `scratch`.
///
/// # Panics
/// If two moves share a destination, or `scratch` is read by a move.
#[must_use]
pub fn sequentialize_moves(moves: &[(Register, Register)], scratch: Register) -> Vec<Instruction> {
    let mut pending: Vec<(Register, Register)> =
        moves.iter().copied().filter(|(dst, src)| dst != src).collect();
    for (i, (dst, src)) in pending.iter().enumerate() {
        assert!(
            pending[i + 1..].iter().all(|(d, _)| d != dst),
            "{dst} is written twice"
        );
        assert!(*src != scratch, "{scratch} is the move scratch");
    }
    let mut out = Vec::new();
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|(dst, _)| !pending.iter().any(|(_, src)| src == dst));
        match ready {
            Some(i) => {
                let (dst, src) = pending.remove(i);
                out.push(Instruction::mov(dst, src));
            }
            None => {
                // Every destination is still read: park one in the scratch.
                let (dst, _) = pending[0];
                out.push(Instruction::mov(scratch, dst));
                for (_, src) in &mut pending {
                    if *src == dst {
                        *src = scratch;
                    }
                }
            }
        }
    }
    out
}

/// A register no move in `moves` touches, preferring the scratch register.
fn unused_register(moves: &[(Register, Register)]) -> Register {
    std::iter::once(abi::SCRATCH_REG)
        .chain(abi::ALLOCATABLE_REGS)
        .find(|reg| moves.iter().all(|(dst, src)| dst != reg && src != reg))
        .unwrap_or(abi::SCRATCH_REG)
}

fn store_sized(reg: Register, base: Register, offset: u32, size: u32) -> Instruction {
    match AccessSize::for_bytes(size) {
        Some(access @ (AccessSize::Byte | AccessSize::Half))
            if access.accepts_short_offset(i64::from(offset)) =>
        {
            Instruction::short(MemOp::Store, access, reg, base, i64::from(offset))
        }
        _ => Instruction::Mem {
            dir: MemOp::Store,
            op: AluCode::ADD,
            reg,
            base,
            offset: Value::Imm(i64::from(offset)),
        },
    }
}

/// Largest access no wider than `remaining` that `align` permits.
fn chunk(remaining: u32, align: u32) -> AccessSize {
    if remaining >= 4 && align % 4 == 0 {
        AccessSize::Word
    } else if remaining >= 2 && align % 2 == 0 {
        AccessSize::Half
    } else {
        AccessSize::Byte
    }
}

#[derive(Debug, Clone)]
pub struct CallingConvention {
    gap: u32,
    slot: u32,
}

impl CallingConvention {
    #[must_use]
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            gap: config.slot_size(),
            slot: config.slot_size(),
        }
    }

    /// Bytes at the bottom of an outgoing area reserved for the callee's
    /// saved return address.
    #[must_use]
    pub const fn header_gap(&self) -> u32 {
        self.gap
    }

    /// Assigns argument locations: fixed scalars to `r0..r3` in order, the
    /// rest to slot-aligned stack offsets. Byval arguments are assigned as
    /// the pointer to their copy.
    #[must_use]
    pub fn assign_args(&self, args: &[ArgInfo]) -> CallLayout {
        let mut next_reg = abi::ARG_REGS.iter();
        let mut offset = 0u32;
        let locations = args
            .iter()
            .map(|arg| {
                let size = if arg.byval { self.slot } else { arg.size };
                let reg = (arg.fixed && size <= REGISTER_BYTES)
                    .then(|| next_reg.next())
                    .flatten();
                if let Some(&reg) = reg {
                    return ArgLocation::Register(reg);
                }
                let align = if arg.byval { self.slot } else { arg.align.max(self.slot) };
                offset = offset.next_multiple_of(align);
                let location = ArgLocation::Stack { offset, size };
                offset += size;
                location
            })
            .collect();
        CallLayout {
            locations,
            stack_bytes: offset.next_multiple_of(self.slot),
        }
    }

    /// Return value registers; more values than registers is an error.
    pub fn assign_returns(&self, count: usize) -> Result<&'static [Register]> {
        abi::RETURN_REGS.get(..count).ok_or_else(|| {
            Error::CallingConvention(format!(
                "{count} return values, at most {} are passed in registers",
                abi::RETURN_REGS.len()
            ))
        })
    }

    /// Copies `size` bytes from the address in `src` into a new stack object
    /// through the scratch register.
    fn copy_byval(
        &self,
        frame: &mut FrameInfo,
        out: &mut Vec<MachineInstr>,
        src: Register,
        arg: ArgInfo,
    ) -> FrameIndex {
        let copy = frame.create_stack_object(arg.size, arg.align);
        let scratch = abi::SCRATCH_REG;
        let mut done = 0;
        while done < arg.size {
            let size = chunk(arg.size - done, arg.align);
            let load = if size == AccessSize::Word {
                Instruction::Mem {
                    dir: MemOp::Load,
                    op: AluCode::ADD,
                    reg: scratch,
                    base: src,
                    offset: Value::Imm(i64::from(done)),
                }
            } else if size.accepts_short_offset(i64::from(done)) {
                Instruction::short(MemOp::Load, size, scratch, src, i64::from(done))
            } else {
                Instruction::MemReg {
                    dir: MemOp::Load,
                    op: AluCode::ADD,
                    size,
                    sign_extend: false,
                    reg: scratch,
                    base: src,
                    index: scratch,
                }
            };
            if matches!(load, Instruction::MemReg { .. }) {
                out.push(Instruction::LoadImm {
                    rd: scratch,
                    imm: Value::Imm(i64::from(done)),
                }
                .into());
            }
            out.push(load.into());
            out.push(MachineInstr::FrameStore {
                reg: scratch,
                index: copy,
                offset: i64::from(done),
                size: (size != AccessSize::Word).then_some(size),
            });
            done += size.bytes();
        }
        copy
    }

    /// Lowers `call` at the end of `block`.
    pub fn lower_call(&self, mf: &mut MachineFunction, block: BlockId, call: &CallSite) -> Result<()> {
        let infos: Vec<ArgInfo> = call.args.iter().map(|(info, _)| *info).collect();
        let layout = self.assign_args(&infos);
        let returns = self.assign_returns(call.results.len())?;
        if call.args.iter().any(|(_, reg)| *reg == abi::SCRATCH_REG) {
            return Err(Error::CallingConvention(format!(
                "argument value in the scratch register {}",
                abi::SCRATCH_REG
            )));
        }
        let bytes = layout.stack_bytes + self.gap;
        mf.frame.adjust_for_call(bytes);

        let sp = abi::STACK_PTR_REG;
        let mut out = vec![MachineInstr::CallSeqStart { bytes }];
        let mut moves = Vec::new();
        let mut byval_addrs = Vec::new();

        // Indirect targets in a register the moves may clobber wait in a slot.
        let mut target = call.target.clone();
        let mut parked = None;
        let clobbered = match &call.target {
            CallTarget::Register(reg) if abi::ALLOCATABLE_REGS.contains(reg) => Some(*reg),
            _ => None,
        };
        if let Some(reg) = clobbered {
            let slot = mf.frame.create_stack_object(REGISTER_BYTES, self.slot);
            out.push(MachineInstr::FrameStore {
                reg,
                index: slot,
                offset: 0,
                size: None,
            });
            parked = Some(slot);
            target = CallTarget::Register(abi::SCRATCH_REG);
        }

        for ((info, value), location) in call.args.iter().zip(&layout.locations) {
            match (*location, info.byval) {
                (ArgLocation::Stack { offset, size }, false) => {
                    out.push(store_sized(*value, sp, self.gap + offset, size).into());
                }
                (ArgLocation::Stack { offset, size }, true) => {
                    let copy = self.copy_byval(&mut mf.frame, &mut out, *value, *info);
                    out.push(MachineInstr::FrameAddr {
                        rd: abi::SCRATCH_REG,
                        index: copy,
                        offset: 0,
                    });
                    out.push(store_sized(abi::SCRATCH_REG, sp, self.gap + offset, size).into());
                }
                (ArgLocation::Register(reg), false) => moves.push((reg, *value)),
                (ArgLocation::Register(reg), true) => {
                    let copy = self.copy_byval(&mut mf.frame, &mut out, *value, *info);
                    byval_addrs.push((reg, copy));
                }
            }
        }

        out.extend(
            sequentialize_moves(&moves, abi::SCRATCH_REG)
                .into_iter()
                .map(MachineInstr::Real),
        );
        for (reg, copy) in byval_addrs {
            out.push(MachineInstr::FrameAddr {
                rd: reg,
                index: copy,
                offset: 0,
            });
        }
        if let Some(slot) = parked {
            out.push(MachineInstr::FrameLoad {
                reg: abi::SCRATCH_REG,
                index: slot,
                offset: 0,
                size: None,
                sign_extend: false,
            });
        }
        out.push(MachineInstr::Call(target));
        out.push(MachineInstr::CallSeqEnd { bytes });

        let result_moves: Vec<_> = call.results.iter().copied().zip(returns.iter().copied()).collect();
        out.extend(
            sequentialize_moves(&result_moves, unused_register(&result_moves))
                .into_iter()
                .map(MachineInstr::Real),
        );
        tracing::trace!(
            caller = %mf.name,
            args = call.args.len(),
            stack_bytes = layout.stack_bytes,
            "lowered call"
        );
        mf.block_mut(block).instrs.extend(out);
        Ok(())
    }

    /// Describes where each formal parameter arrives. Stack parameters become
    /// fixed objects past the header gap; a varargs function also records the
    /// first variadic slot.
    pub fn lower_formal_arguments(
        &self,
        mf: &mut MachineFunction,
        params: &[ArgInfo],
    ) -> Vec<IncomingArg> {
        let layout = self.assign_args(params);
        let incoming = layout
            .locations
            .iter()
            .map(|location| match *location {
                ArgLocation::Register(reg) => IncomingArg::Register(reg),
                ArgLocation::Stack { offset, size } => IncomingArg::Stack(
                    mf.frame
                        .create_fixed_object(size, i64::from(offset + self.gap)),
                ),
            })
            .collect();
        if mf.is_vararg {
            let first = mf
                .frame
                .create_fixed_object(self.slot, i64::from(layout.stack_bytes + self.gap));
            mf.frame.vararg_index = Some(first);
        }
        incoming
    }

    /// Moves `values` into the return registers and returns from `block`.
    pub fn lower_return(&self, mf: &mut MachineFunction, block: BlockId, values: &[Register]) -> Result<()> {
        let returns = self.assign_returns(values.len())?;
        let moves: Vec<_> = returns.iter().copied().zip(values.iter().copied()).collect();
        let block = mf.block_mut(block);
        block.instrs.extend(
            sequentialize_moves(&moves, unused_register(&moves))
                .into_iter()
                .map(MachineInstr::Real),
        );
        block.push(MachineInstr::Ret);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::mir::MachineBlock;

    fn cc() -> CallingConvention {
        CallingConvention::new(&TargetConfig::pios())
    }

    /// Runs `insts` on a register file and returns it.
    fn simulate(insts: &[Instruction], mut regs: [i64; 8]) -> [i64; 8] {
        for inst in insts {
            let Instruction::AluImm { rd, rs1, imm, .. } = inst else {
                panic!("unexpected {inst:?}");
            };
            regs[rd.encoding() as usize] = regs[rs1.encoding() as usize] + imm.as_imm().unwrap();
        }
        regs
    }

    #[test]
    fn registers_then_stack() {
        let args = [ArgInfo::scalar(2); 6];
        let layout = cc().assign_args(&args);
        assert_eq!(
            layout.locations[..4],
            abi::ARG_REGS.map(ArgLocation::Register)
        );
        assert_eq!(layout.locations[4], ArgLocation::Stack { offset: 0, size: 2 });
        assert_eq!(layout.locations[5], ArgLocation::Stack { offset: 2, size: 2 });
        assert_eq!(layout.stack_bytes, 4);
    }

    #[test]
    fn variadic_arguments_always_use_the_stack() {
        let args = [ArgInfo::scalar(2), ArgInfo::scalar(1).variadic(), ArgInfo::scalar(2).variadic()];
        let layout = cc().assign_args(&args);
        assert_eq!(layout.locations[0], ArgLocation::Register(Register::R0));
        assert_eq!(layout.locations[1], ArgLocation::Stack { offset: 0, size: 1 });
        assert_eq!(layout.locations[2], ArgLocation::Stack { offset: 2, size: 2 });
    }

    #[test]
    fn byval_passes_a_pointer() {
        let layout = cc().assign_args(&[ArgInfo::byval(12, 2)]);
        assert_eq!(layout.locations[0], ArgLocation::Register(Register::R0));
    }

    #[test]
    fn too_many_return_values() {
        assert_eq!(cc().assign_returns(2).unwrap(), &[Register::R0, Register::R1]);
        assert!(matches!(cc().assign_returns(3), Err(Error::CallingConvention(_))));
    }

    #[test]
    fn parallel_moves_break_cycles() {
        let moves = [
            (Register::R0, Register::R1),
            (Register::R1, Register::R0),
            (Register::R2, Register::R0),
        ];
        let seq = sequentialize_moves(&moves, Register::R4);
        let before = [10, 11, 12, 13, 14, 15, 16, 17];
        let after = simulate(&seq, before);
        assert_eq!(after[0], 11);
        assert_eq!(after[1], 10);
        assert_eq!(after[2], 10);
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn call_sequence_shape() {
        let mut mf = MachineFunction::new("caller");
        let site = CallSite {
            target: CallTarget::Symbol("callee".into()),
            args: vec![
                (ArgInfo::scalar(2), Register::R1),
                (ArgInfo::scalar(2), Register::R0),
                (ArgInfo::scalar(2), Register::R2),
                (ArgInfo::scalar(2), Register::R3),
                (ArgInfo::scalar(2), Register::R3),
            ],
            results: vec![Register::R2],
        };
        cc().lower_call(&mut mf, BlockId(0), &site).unwrap();
        assert_eq!(mf.frame.max_call_frame, 4);
        let insts = &mf.blocks[0].instrs;
        assert_eq!(insts[0], MachineInstr::CallSeqStart { bytes: 4 });
        assert_eq!(
            insts[1],
            MachineInstr::Real(Instruction::short(
                MemOp::Store,
                AccessSize::Half,
                Register::R3,
                Register::SP,
                2
            ))
        );
        let call = insts
            .iter()
            .position(|i| *i == MachineInstr::Call(CallTarget::Symbol("callee".into())))
            .unwrap();
        assert_eq!(insts[call + 1], MachineInstr::CallSeqEnd { bytes: 4 });
        assert_eq!(
            insts[call + 2],
            MachineInstr::Real(Instruction::mov(Register::R2, Register::R0))
        );
    }

    #[test]
    fn byval_argument_is_copied() {
        let mut mf = MachineFunction::new("caller");
        let site = CallSite {
            target: CallTarget::Symbol("callee".into()),
            args: vec![(ArgInfo::byval(6, 2), Register::R2)],
            results: vec![],
        };
        cc().lower_call(&mut mf, BlockId(0), &site).unwrap();
        let copy = FrameIndex(0);
        assert_eq!(mf.frame.object(copy).size, 6);
        let stores = mf.blocks[0]
            .instrs
            .iter()
            .filter(|i| matches!(i, MachineInstr::FrameStore { index, .. } if *index == copy))
            .count();
        assert_eq!(stores, 3);
        assert!(mf.blocks[0].instrs.contains(&MachineInstr::FrameAddr {
            rd: Register::R0,
            index: copy,
            offset: 0,
        }));
    }

    #[test]
    fn indirect_target_survives_argument_moves() {
        let mut mf = MachineFunction::new("caller");
        let site = CallSite {
            target: CallTarget::Register(Register::R0),
            args: vec![(ArgInfo::scalar(2), Register::R1)],
            results: vec![],
        };
        cc().lower_call(&mut mf, BlockId(0), &site).unwrap();
        let insts = &mf.blocks[0].instrs;
        let call = insts.len() - 2;
        assert_eq!(insts[call], MachineInstr::Call(CallTarget::Register(Register::R4)));
        assert!(matches!(
            insts[call - 1],
            MachineInstr::FrameLoad {
                reg: Register::R4,
                ..
            }
        ));
    }

    #[test]
    fn scratch_register_cannot_hold_arguments() {
        let mut mf = MachineFunction::new("caller");
        let site = CallSite {
            target: CallTarget::Symbol("f".into()),
            args: vec![(ArgInfo::scalar(2), Register::R4)],
            results: vec![],
        };
        assert!(cc().lower_call(&mut mf, BlockId(0), &site).is_err());
    }

    #[test]
    fn incoming_stack_arguments_skip_the_header_gap() {
        let mut mf = MachineFunction::new("callee");
        mf.is_vararg = true;
        let incoming = cc().lower_formal_arguments(&mut mf, &[ArgInfo::scalar(2); 5]);
        let IncomingArg::Stack(fi) = incoming[4] else {
            panic!("fifth argument should be on the stack");
        };
        assert_eq!(mf.frame.object(fi).offset, i64::from(cc().header_gap()));
        let va = mf.frame.vararg_index.unwrap();
        assert_eq!(mf.frame.object(va).offset, 4);
    }

    #[test]
    fn return_moves_values_into_place() {
        let mut mf = MachineFunction::new("f");
        mf.blocks = vec![MachineBlock::default()];
        cc().lower_return(&mut mf, BlockId(0), &[Register::R1, Register::R0])
            .unwrap();
        let insts = &mf.blocks[0].instrs;
        assert_eq!(insts.len(), 4);
        assert_eq!(insts[3], MachineInstr::Ret);
    }
}
