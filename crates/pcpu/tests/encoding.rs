//! Assembled text must encode exactly like the equivalent instruction values.

use pcpu::isa::{
    AccessSize, AluCode, BranchTarget, CondCode, Instruction, MemOp, Register, SrOp, Value,
};
use pcpu::test_harness::*;

fn single(source: &str) -> u32 {
    let words = assemble_words(source).expect("assembles");
    assert_eq!(words.len(), 1, "{source}");
    words[0]
}

// ── ALU ──

#[test]
fn alu_register_and_immediate_forms() {
    assert_eq!(
        single("xor.f r1, r2, r3"),
        encode_word(&Instruction::AluReg {
            op: AluCode::XOR,
            set_flags: true,
            rd: Register::R1,
            rs1: Register::R2,
            rs2: Register::R3,
        })
    );
    assert_eq!(
        single("sub sp, sp, 0x20"),
        encode_word(&Instruction::alu_imm(AluCode::SUB, Register::SP, Register::SP, 0x20))
    );
}

#[test]
fn aliases_encode_as_their_registers() {
    assert_eq!(single("mov fp, sp"), single("mov r5, r7"));
    assert_eq!(single("mov rv, rca"), single("mov r0, r6"));
}

#[test]
fn compare_discards_the_result() {
    assert_eq!(
        single("cmp r2, 9"),
        encode_word(&Instruction::AluImm {
            op: AluCode::SUB,
            set_flags: true,
            rd: Register::R0,
            rs1: Register::R2,
            imm: Value::Imm(9),
        })
    );
}

#[test]
fn shift_amount_out_of_range() {
    let err = assemble_pios("sh r1, r1, 32").unwrap_err();
    assert_eq!(err.to_string(), "1:12: error: invalid operand for instruction");
}

// ── Memory ──

#[test]
fn negative_word_offset_uses_sub() {
    assert_eq!(
        single("ld r1, fp, -8"),
        encode_word(&Instruction::Mem {
            dir: MemOp::Load,
            op: AluCode::SUB,
            reg: Register::R1,
            base: Register::FP,
            offset: Value::Imm(8),
        })
    );
}

#[test]
fn sized_access_uses_short_pointer_form() {
    assert_eq!(
        single("st.h r3, sp, 510"),
        encode_word(&Instruction::short(
            MemOp::Store,
            AccessSize::Half,
            Register::R3,
            Register::SP,
            510
        ))
    );
    assert!(assemble_pios("st.h r3, sp, 511").is_err());
    assert!(assemble_pios("ld.w r3, sp, 1024").is_err());
}

#[test]
fn post_increment_writes_back() {
    let word = single("ld r1, (r2), 4");
    assert_eq!(
        word,
        encode_word(&Instruction::Mem {
            dir: MemOp::Load,
            op: AluCode::ADD.make_post_op(),
            reg: Register::R1,
            base: Register::R2,
            offset: Value::Imm(4),
        })
    );
    // Post-op: base written back (Q) but the access uses the old base (no P).
    assert_eq!((word >> 13) & 1, 0);
    assert_eq!((word >> 14) & 1, 1);
}

#[test]
fn register_offset_selects_rrm() {
    assert_eq!(
        single("ld.bs r1, r2, r3"),
        encode_word(&Instruction::MemReg {
            dir: MemOp::Load,
            op: AluCode::ADD,
            size: AccessSize::Byte,
            sign_extend: true,
            reg: Register::R1,
            base: Register::R2,
            index: Register::R3,
        })
    );
}

// ── Control flow and misc ──

#[test]
fn branches_and_returns() {
    assert_eq!(single("ret"), single("jmp rca"));
    assert_eq!(
        single("jgeu 0x40"),
        encode_word(&Instruction::Branch {
            cond: CondCode::Geu,
            target: BranchTarget::Value(Value::Imm(0x40)),
        })
    );
}

#[test]
fn special_register_spellings_agree() {
    let expected = encode_word(&Instruction::SpecialReg {
        op: SrOp::Read,
        reg: Register::RCA,
        sreg: Register::Pc,
    });
    assert_eq!(single("rsr.pc rca"), expected);
    assert_eq!(single("rsr rca, pc"), expected);
}

#[test]
fn system_call_is_signed_eight_bit() {
    assert_eq!(single("sys -1"), encode_word(&Instruction::Sys { code: -1 }));
    assert!(assemble_pios("sys 128").is_err());
}

#[test]
fn wide_immediate_moves() {
    assert_eq!(
        single("mov r2, 0x12345"),
        encode_word(&Instruction::LoadImm {
            rd: Register::R2,
            imm: Value::Imm(0x12345),
        })
    );
    assert_eq!(
        single("movhi r2, 0xbeef"),
        encode_word(&Instruction::MovHi {
            rd: Register::R2,
            imm: Value::Imm(0xbeef),
        })
    );
}
