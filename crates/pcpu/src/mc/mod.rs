// Machine-code layer: expressions, fixups, encoding, assembly and objects.

#![allow(
    clippy::cast_possible_truncation, // field values are masked before narrowing
    clippy::cast_possible_wrap,       // addends and fields share bit patterns
    clippy::cast_sign_loss            // immediates are reinterpreted as raw field bits
)]

mod assembler;
mod encoder;
mod expr;
mod fixup;
mod lexer;
mod matcher;
pub mod object;
mod parser;
mod streamer;

pub use assembler::assemble;
pub use encoder::{CodeEmitter, MemShape, encode_imm, pq_bits};
pub use expr::{BinaryOp, Expr, Modifier, Relocatable, UnaryOp};
pub use fixup::{Fixup, FixupKind, ImmField};
pub use lexer::{Token, TokenKind, tokenize};
pub use matcher::{SymbolLookup, data_expr_is_encodable, match_instruction};
pub use object::{
    Binding, ObjectFile, RelocTarget, RelocationRecord, Section, SectionKind, SymbolDef,
};
pub use parser::{DirectiveArg, Operand, OperandKind, ParsedInstruction, Statement, parse};
pub use streamer::ObjectStreamer;
