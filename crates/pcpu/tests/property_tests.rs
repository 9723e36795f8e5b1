//! Property-based tests for the PCPU toolchain.
//!
//! Uses `proptest` to generate random inputs and verify invariants:
//! - P/Q addressing bits follow the pre/post-operation rules
//! - Register names and aliases resolve to their encodings
//! - Condition negation is an involution where defined
//! - Word-index relocations divide aligned addresses and reject the rest
//! - Assembled immediates match direct encoding
//! - Parallel register moves preserve every source value

use proptest::prelude::*;
use pcpu::codegen::sequentialize_moves;
use pcpu::isa::{AluCode, CondCode, Instruction, NameMode, Register, Value};
use pcpu::mc::pq_bits;
use pcpu::reloc::{self, RelocType};
use pcpu::target::Endianness;
use pcpu::test_harness::*;
use pcpu::Error;

fn alu_op() -> impl Strategy<Value = AluCode> {
    prop_oneof![Just(AluCode::ADD), Just(AluCode::SUB)].prop_flat_map(|op| {
        prop_oneof![Just(op), Just(op.make_pre_op()), Just(op.make_post_op())]
    })
}

fn general_reg() -> impl Strategy<Value = Register> {
    (0u32..8).prop_map(|n| Register::general(n).unwrap())
}

proptest! {
    #[test]
    fn pq_bits_follow_addressing_mode(op in alu_op(), nonzero in any::<bool>()) {
        let (p, q) = pq_bits(op, nonzero);
        prop_assert_eq!(p, nonzero && !op.is_post_op());
        prop_assert_eq!(q, nonzero && (op.is_pre_op() || op.is_post_op()));
        if !nonzero {
            prop_assert!(!p && !q);
        }
    }

    #[test]
    fn register_names_round_trip(reg in general_reg()) {
        prop_assert_eq!(Register::from_name(reg.name(), NameMode::Normal), Some(reg));
        let numbered = format!("R{}", reg.encoding());
        prop_assert_eq!(Register::from_name(&numbered, NameMode::Normal), Some(reg));
    }

    #[test]
    fn word_index_transform(addr in 0i64..0x4_0000) {
        let mut word = vec![0u8; 4];
        let result = reloc::apply(RelocType::PcInstr16, &mut word, 0, addr, Endianness::Little);
        if addr % 4 != 0 {
            let is_misaligned = matches!(result, Err(Error::MisalignedTarget { .. }));
            prop_assert!(is_misaligned);
        } else if addr >> 2 > 0xFFFF {
            let is_out_of_range = matches!(result, Err(Error::ValueOutOfRange { .. }));
            prop_assert!(is_out_of_range);
        } else {
            prop_assert!(result.is_ok());
            let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            prop_assert_eq!(i64::from(raw >> 16), addr >> 2);
        }
    }

    #[test]
    fn assembled_immediates_match_encoding(
        rd in general_reg(),
        rs in general_reg(),
        imm in 0i64..=0xFFFF,
    ) {
        let source = format!("add {}, {}, {imm}", rd.name(), rs.name());
        let words = assemble_words(&source).unwrap();
        prop_assert_eq!(
            words,
            vec![encode_word(&Instruction::alu_imm(AluCode::ADD, rd, rs, imm))]
        );
    }

    #[test]
    fn parallel_moves_preserve_sources(
        perm in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
        count in 1usize..=4,
    ) {
        let regs = [Register::R0, Register::R1, Register::R2, Register::R3];
        let moves: Vec<_> = (0..count).map(|i| (regs[i], regs[perm[i]])).collect();

        let mut file = [0i64; 8];
        for (i, value) in file.iter_mut().enumerate() {
            *value = 100 + i as i64;
        }
        let before = file;
        for inst in sequentialize_moves(&moves, Register::R4) {
            let Instruction::AluImm { rd, rs1, imm: Value::Imm(0), .. } = inst else {
                panic!("expected mov, got {inst:?}");
            };
            file[rd.encoding() as usize] = file[rs1.encoding() as usize];
        }
        for (dst, src) in moves {
            prop_assert_eq!(file[dst.encoding() as usize], before[src.encoding() as usize]);
        }
    }
}

#[test]
fn condition_negation_is_an_involution() {
    for cond in CondCode::ALL {
        match cond.negation() {
            Some(negated) => {
                assert_ne!(negated, cond);
                assert_eq!(negated.negation(), Some(cond));
            }
            None => assert!(matches!(cond, CondCode::T | CondCode::Ovf)),
        }
    }
}
