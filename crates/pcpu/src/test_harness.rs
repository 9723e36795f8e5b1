//! Test harness for pcpu unit and integration tests
//!
//! Helpers that assemble, encode and link in one call, plus pattern matching
//! over lowered instruction sequences.
//!
//! # Example
//!
//! ```rust
//! use pcpu::isa::{AluCode, Register};
//! use pcpu::test_harness::*;
//!
//! let words = assemble_words("add r1, r2, 7\nret").expect("assembles");
//! assert_eq!(words.len(), 2);
//!
//! let insts = vec![pcpu::isa::Instruction::alu_imm(AluCode::ADD, Register::R1, Register::R2, 7)];
//! assert_has_pattern(&insts, &[InstructionPattern::AluImm {
//!     op: Pat::Exact(AluCode::ADD),
//!     rd: Pat::Exact(Register::R1),
//!     rs1: Pat::Any,
//!     imm: Pat::Exact(7),
//! }]);
//! ```

#![allow(
    clippy::must_use_candidate,
    clippy::manual_assert,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use crate::codegen::{MachineFunction, MachineInstr};
use crate::isa::{AccessSize, AluCode, BranchTarget, CondCode, Instruction, MemOp, Register};
use crate::link::{LinkOptions, LinkedImage, Linker};
use crate::mc::{CodeEmitter, ObjectFile, assemble};
use crate::target::TargetConfig;
use crate::{Error, Result};

/// Assemble PiOS source into an object.
pub fn assemble_pios(source: &str) -> Result<ObjectFile> {
    assemble(source, &TargetConfig::pios())
}

/// Assemble PiOS source and return the `.text` words.
pub fn assemble_words(source: &str) -> Result<Vec<u32>> {
    let object = assemble_pios(source)?;
    text_words(&object)
}

/// The `.text` contents of an object as words in its byte order.
pub fn text_words(object: &ObjectFile) -> Result<Vec<u32>> {
    let text = object
        .section(".text")
        .ok_or_else(|| Error::Internal("object has no .text".into()))?;
    let endian = object.config.endian();
    Ok(text
        .data
        .chunks_exact(4)
        .map(|chunk| endian.read(chunk) as u32)
        .collect())
}

/// Encode a single instruction for PiOS, discarding fixups.
pub fn encode_word(inst: &Instruction) -> u32 {
    CodeEmitter::new(&TargetConfig::pios()).encode(inst, &mut Vec::new())
}

/// Assemble each source as its own object and link them.
pub fn link_sources(sources: &[&str], options: LinkOptions) -> Result<LinkedImage> {
    let config = TargetConfig::pios();
    let mut linker = Linker::new(&config, options);
    for (index, source) in sources.iter().enumerate() {
        let elf = assemble(source, &config)?.to_elf()?;
        linker.add_object(&format!("input{index}.o"), &elf)?;
    }
    linker.link()
}

/// Word at `address` of a linked PiOS image.
pub fn image_word(image: &LinkedImage, address: u64) -> Option<u32> {
    let bytes = image.bytes_at(address, 4)?;
    Some(TargetConfig::pios().endian().read(bytes) as u32)
}

/// The concrete instructions of a function, in layout order. Pseudos are
/// skipped.
pub fn real_instructions(mf: &MachineFunction) -> Vec<Instruction> {
    mf.instrs()
        .filter_map(|inst| match inst {
            MachineInstr::Real(inst) => Some(inst.clone()),
            _ => None,
        })
        .collect()
}

/// Pattern matching for instruction fields
#[derive(Debug, Clone)]
pub enum Pat<T> {
    /// Match any value
    Any,
    /// Match exact value
    Exact(T),
    /// Match if value satisfies predicate
    Predicate(fn(&T) -> bool),
}

impl<T: PartialEq> Pat<T> {
    /// Check if a value matches this pattern
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Pat::Any => true,
            Pat::Exact(expected) => value == expected,
            Pat::Predicate(pred) => pred(value),
        }
    }
}

/// Pattern for matching instructions in tests
///
/// Immediates only match resolved constants; an instruction whose operand
/// is still a symbolic expression matches `Pat::Any` alone.
#[derive(Debug, Clone)]
pub enum InstructionPattern {
    Any,
    AluImm {
        op: Pat<AluCode>,
        rd: Pat<Register>,
        rs1: Pat<Register>,
        imm: Pat<i64>,
    },
    AluReg {
        op: Pat<AluCode>,
        rd: Pat<Register>,
        rs1: Pat<Register>,
        rs2: Pat<Register>,
    },
    /// `mov rd, rs` (ADD with a zero immediate).
    Mov {
        rd: Pat<Register>,
        rs: Pat<Register>,
    },
    /// RM word access.
    Mem {
        dir: Pat<MemOp>,
        op: Pat<AluCode>,
        reg: Pat<Register>,
        base: Pat<Register>,
        offset: Pat<i64>,
    },
    MemReg {
        dir: Pat<MemOp>,
        op: Pat<AluCode>,
        size: Pat<AccessSize>,
        reg: Pat<Register>,
        base: Pat<Register>,
        index: Pat<Register>,
    },
    MemShort {
        dir: Pat<MemOp>,
        size: Pat<AccessSize>,
        reg: Pat<Register>,
        base: Pat<Register>,
        offset: Pat<u16>,
    },
    LoadImm {
        rd: Pat<Register>,
        imm: Pat<i64>,
    },
    Branch {
        cond: Pat<CondCode>,
    },
    JumpReg {
        reg: Pat<Register>,
    },
    Call,
    Ret,
}

impl InstructionPattern {
    /// Check if an instruction matches this pattern
    pub fn matches(&self, instr: &Instruction) -> bool {
        use InstructionPattern as P;

        fn imm_matches(pat: &Pat<i64>, value: &crate::isa::Value) -> bool {
            match value.as_imm() {
                Some(v) => pat.matches(&v),
                None => matches!(pat, Pat::Any),
            }
        }

        match (self, instr) {
            (P::Any, _) => true,
            (P::Ret, inst) => *inst == Instruction::ret(),
            (P::Call, Instruction::Call { .. }) => true,
            (
                P::AluImm { op, rd, rs1, imm },
                Instruction::AluImm {
                    op: i_op,
                    rd: i_rd,
                    rs1: i_rs1,
                    imm: i_imm,
                    ..
                },
            ) => op.matches(i_op) && rd.matches(i_rd) && rs1.matches(i_rs1) && imm_matches(imm, i_imm),
            (
                P::AluReg { op, rd, rs1, rs2 },
                Instruction::AluReg {
                    op: i_op,
                    rd: i_rd,
                    rs1: i_rs1,
                    rs2: i_rs2,
                    ..
                },
            ) => op.matches(i_op) && rd.matches(i_rd) && rs1.matches(i_rs1) && rs2.matches(i_rs2),
            (
                P::Mov { rd, rs },
                Instruction::AluImm {
                    op: AluCode::ADD,
                    set_flags: false,
                    rd: i_rd,
                    rs1,
                    imm: crate::isa::Value::Imm(0),
                },
            ) => rd.matches(i_rd) && rs.matches(rs1),
            (
                P::Mem {
                    dir,
                    op,
                    reg,
                    base,
                    offset,
                },
                Instruction::Mem {
                    dir: i_dir,
                    op: i_op,
                    reg: i_reg,
                    base: i_base,
                    offset: i_offset,
                },
            ) => {
                dir.matches(i_dir)
                    && op.matches(i_op)
                    && reg.matches(i_reg)
                    && base.matches(i_base)
                    && imm_matches(offset, i_offset)
            }
            (
                P::MemReg {
                    dir,
                    op,
                    size,
                    reg,
                    base,
                    index,
                },
                Instruction::MemReg {
                    dir: i_dir,
                    op: i_op,
                    size: i_size,
                    reg: i_reg,
                    base: i_base,
                    index: i_index,
                    ..
                },
            ) => {
                dir.matches(i_dir)
                    && op.matches(i_op)
                    && size.matches(i_size)
                    && reg.matches(i_reg)
                    && base.matches(i_base)
                    && index.matches(i_index)
            }
            (
                P::MemShort {
                    dir,
                    size,
                    reg,
                    base,
                    offset,
                },
                Instruction::MemShort {
                    dir: i_dir,
                    size: i_size,
                    reg: i_reg,
                    base: i_base,
                    offset: i_offset,
                    ..
                },
            ) => {
                dir.matches(i_dir)
                    && size.matches(i_size)
                    && reg.matches(i_reg)
                    && base.matches(i_base)
                    && offset.matches(i_offset)
            }
            (P::LoadImm { rd, imm }, Instruction::LoadImm { rd: i_rd, imm: i_imm }) => {
                rd.matches(i_rd) && imm_matches(imm, i_imm)
            }
            (
                P::Branch { cond },
                Instruction::Branch {
                    cond: i_cond,
                    target: BranchTarget::Value(_),
                },
            ) => cond.matches(i_cond),
            (
                P::JumpReg { reg },
                Instruction::Branch {
                    cond: CondCode::T,
                    target: BranchTarget::Reg(i_reg),
                },
            ) => reg.matches(i_reg),
            _ => false,
        }
    }
}

/// Find a pattern in an instruction sequence
///
/// Returns the index of the first match, or None if not found
pub fn find_pattern(instructions: &[Instruction], pattern: &[InstructionPattern]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }
    if pattern.len() > instructions.len() {
        return None;
    }

    'outer: for start in 0..=instructions.len() - pattern.len() {
        for (i, pat) in pattern.iter().enumerate() {
            if !pat.matches(&instructions[start + i]) {
                continue 'outer;
            }
        }
        return Some(start);
    }
    None
}

/// Assert that an instruction sequence contains a pattern
///
/// Panics with a descriptive message if the pattern is not found
pub fn assert_has_pattern(instructions: &[Instruction], pattern: &[InstructionPattern]) {
    if find_pattern(instructions, pattern).is_none() {
        panic!(
            "Pattern not found in instruction sequence.\n\nExpected pattern:\n{}\n\nActual instructions:\n{}",
            format_patterns(pattern),
            format_instructions(instructions)
        );
    }
}

/// Assert that instructions match a pattern exactly
///
/// Panics with a descriptive message if they don't match
pub fn assert_matches(instructions: &[Instruction], pattern: &[InstructionPattern]) {
    if instructions.len() != pattern.len() {
        panic!(
            "Instruction count mismatch: expected {}, got {}.\n\nExpected pattern:\n{}\n\nActual instructions:\n{}",
            pattern.len(),
            instructions.len(),
            format_patterns(pattern),
            format_instructions(instructions)
        );
    }

    for (i, (instr, pat)) in instructions.iter().zip(pattern.iter()).enumerate() {
        if !pat.matches(instr) {
            panic!(
                "Instruction mismatch at index {i}:\nExpected: {pat:?}\nActual:   {instr:?}\n\nFull pattern:\n{}\n\nFull instructions:\n{}",
                format_patterns(pattern),
                format_instructions(instructions)
            );
        }
    }
}

fn format_patterns(patterns: &[InstructionPattern]) -> String {
    patterns
        .iter()
        .map(|p| format!("  {p:?}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_instructions(instructions: &[Instruction]) -> String {
    instructions
        .iter()
        .map(|i| format!("  {i:?}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_follow_assembly_order() {
        let words = assemble_words("nop\nret").unwrap();
        assert_eq!(words, [encode_word(&Instruction::Nop), encode_word(&Instruction::ret())]);
    }

    #[test]
    fn mov_pattern_ignores_other_adds() {
        let mov = Instruction::mov(Register::R1, Register::R2);
        let add = Instruction::alu_imm(AluCode::ADD, Register::R1, Register::R2, 1);
        let pat = InstructionPattern::Mov {
            rd: Pat::Any,
            rs: Pat::Exact(Register::R2),
        };
        assert!(pat.matches(&mov));
        assert!(!pat.matches(&add));
    }

    #[test]
    fn find_pattern_handles_short_sequences() {
        let insts = [Instruction::Nop];
        let pattern = [InstructionPattern::Any, InstructionPattern::Any];
        assert_eq!(find_pattern(&insts, &pattern), None);
        assert_eq!(find_pattern(&insts, &[]), Some(0));
    }

    #[test]
    #[should_panic(expected = "Pattern not found")]
    fn missing_pattern_panics() {
        assert_has_pattern(&[Instruction::Nop], &[InstructionPattern::Ret]);
    }
}
