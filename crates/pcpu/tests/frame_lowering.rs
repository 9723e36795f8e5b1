//! Frame lowering and calling convention, end to end through the linker.

use pcpu::codegen::{
    ArgInfo, BlockId, CallSite, CallTarget, CallingConvention, FrameLowering, IncomingArg,
    MachineFunction, MachineInstr, compile_function,
};
use pcpu::isa::{AccessSize, AluCode, Instruction, MemOp, Register, Value};
use pcpu::mc::ObjectStreamer;
use pcpu::test_harness::*;
use pcpu::{LinkOptions, Linker, TargetConfig};

fn half_slot(dir: MemOp, reg: Register, offset: u16) -> InstructionPattern {
    InstructionPattern::MemShort {
        dir: Pat::Exact(dir),
        size: Pat::Exact(AccessSize::Half),
        reg: Pat::Exact(reg),
        base: Pat::Exact(Register::SP),
        offset: Pat::Exact(offset),
    }
}

fn alu_imm(op: AluCode, rd: Register, rs1: Register, imm: i64) -> InstructionPattern {
    InstructionPattern::AluImm {
        op: Pat::Exact(op),
        rd: Pat::Exact(rd),
        rs1: Pat::Exact(rs1),
        imm: Pat::Exact(imm),
    }
}

#[test]
fn local_buffer_address_is_fp_minus_offset() {
    let mut mf = MachineFunction::new("f");
    let buf = mf.frame.create_stack_object(18, 2);
    mf.blocks[0].push(MachineInstr::FrameAddr {
        rd: Register::R1,
        index: buf,
        offset: 0,
    });
    mf.blocks[0].push(MachineInstr::Ret);
    FrameLowering::new(&TargetConfig::pios()).run(&mut mf).unwrap();

    assert_eq!(mf.frame.object(buf).offset, -20);
    assert_eq!(mf.frame.stack_size, 20);
    assert_matches(
        &real_instructions(&mf),
        &[
            half_slot(MemOp::Store, Register::RCA, 0),
            half_slot(MemOp::Store, Register::FP, 2),
            InstructionPattern::Mov {
                rd: Pat::Exact(Register::FP),
                rs: Pat::Exact(Register::SP),
            },
            alu_imm(AluCode::SUB, Register::SP, Register::SP, 20),
            alu_imm(AluCode::SUB, Register::R1, Register::FP, 20),
            InstructionPattern::Mov {
                rd: Pat::Exact(Register::SP),
                rs: Pat::Exact(Register::FP),
            },
            half_slot(MemOp::Load, Register::FP, 2),
            half_slot(MemOp::Load, Register::RCA, 0),
        ],
    );
}

#[test]
fn far_sized_load_goes_through_a_scavenged_register() {
    let mut mf = MachineFunction::new("f");
    let buf = mf.frame.create_stack_object(300, 1);
    mf.blocks[0].push(MachineInstr::FrameLoad {
        reg: Register::R0,
        index: buf,
        offset: 0,
        size: Some(AccessSize::Byte),
        sign_extend: true,
    });
    mf.blocks[0].push(MachineInstr::Ret);
    FrameLowering::new(&TargetConfig::pios()).run(&mut mf).unwrap();

    assert!(mf.frame.scavenging_slot.is_some());
    let insts = real_instructions(&mf);
    assert_has_pattern(
        &insts,
        &[
            InstructionPattern::LoadImm {
                rd: Pat::Exact(Register::R4),
                imm: Pat::Exact(-mf.frame.object(buf).offset),
            },
            InstructionPattern::MemReg {
                dir: Pat::Exact(MemOp::Load),
                op: Pat::Exact(AluCode::SUB),
                size: Pat::Exact(AccessSize::Byte),
                reg: Pat::Exact(Register::R0),
                base: Pat::Exact(Register::FP),
                index: Pat::Exact(Register::R4),
            },
        ],
    );
}

#[test]
fn incoming_stack_arguments_sit_above_the_header() {
    let config = TargetConfig::pios();
    let cc = CallingConvention::new(&config);
    let mut mf = MachineFunction::new("sum6");
    let params = cc.lower_formal_arguments(&mut mf, &[ArgInfo::scalar(2); 6]);
    let IncomingArg::Stack(fifth) = params[4] else {
        panic!("fifth argument should be on the stack");
    };
    mf.blocks[0].push(MachineInstr::FrameLoad {
        reg: Register::R1,
        index: fifth,
        offset: 0,
        size: Some(AccessSize::Half),
        sign_extend: false,
    });
    cc.lower_return(&mut mf, BlockId(0), &[Register::R1]).unwrap();
    FrameLowering::new(&config).run(&mut mf).unwrap();

    let insts = real_instructions(&mf);
    assert!(insts.contains(&Instruction::short(
        MemOp::Load,
        AccessSize::Half,
        Register::R1,
        Register::FP,
        2
    )));
}

#[test]
fn compiled_call_links_to_its_callee() {
    let config = TargetConfig::pios();
    let cc = CallingConvention::new(&config);
    let mut streamer = ObjectStreamer::new(&config);

    let mut start = MachineFunction::new("__start");
    start.blocks[0].push(Instruction::LoadImm {
        rd: Register::R1,
        imm: Value::Imm(41),
    });
    cc.lower_call(
        &mut start,
        BlockId(0),
        &CallSite {
            target: CallTarget::Symbol("helper".into()),
            args: vec![(ArgInfo::scalar(2), Register::R1)],
            results: vec![Register::R2],
        },
    )
    .unwrap();
    cc.lower_return(&mut start, BlockId(0), &[Register::R2]).unwrap();
    compile_function(start, &config, &mut streamer).unwrap();

    let mut helper = MachineFunction::new("helper");
    let params = cc.lower_formal_arguments(&mut helper, &[ArgInfo::scalar(2)]);
    assert_eq!(params, [IncomingArg::Register(Register::R0)]);
    helper.blocks[0].push(Instruction::alu_imm(AluCode::ADD, Register::R0, Register::R0, 1));
    cc.lower_return(&mut helper, BlockId(0), &[Register::R0]).unwrap();
    compile_function(helper, &config, &mut streamer).unwrap();

    let elf = streamer.finish().unwrap().to_elf().unwrap();
    let mut linker = Linker::new(&config, LinkOptions::default());
    linker.add_object("prog.o", &elf).unwrap();
    let image = linker.link().unwrap();

    assert_eq!(image.entry, Some(0));
    // Prologue (4), ldi, mov, call, mov, mov, epilogue (3), ret.
    assert_eq!(image.symbol("helper"), Some(13 * 4));
    let call = image_word(&image, 6 * 4).unwrap();
    assert_eq!(call >> 7, 13);
    assert_eq!(
        image_word(&image, 5 * 4).unwrap(),
        encode_word(&Instruction::mov(Register::R0, Register::R1))
    );
}
