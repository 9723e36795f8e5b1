// Instruction words are packed with explicit 'as' casts between field widths.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

mod alu;
mod cond;
mod instruction;
mod opcode;
mod register;

pub use alu::AluCode;
pub use cond::{Comparison, CondCode};
pub use instruction::{BranchTarget, Instruction, SHORT_OFFSET_MAX, Value};
pub use opcode::{AccessSize, Major, MemOp, SrOp};
pub use register::{NameMode, Register};
