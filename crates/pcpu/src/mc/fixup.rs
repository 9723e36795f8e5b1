use super::expr::{Expr, Modifier};
use crate::error::Span;
use crate::reloc::{self, FieldSpec, RelocType};

/// Kinds of values the encoder can leave unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixupKind {
    None,
    Data8,
    Data16,
    Data32,
    /// `.short %pc(sym)`.
    Data16Pc,
    /// Default for symbols in 16-bit immediate fields.
    Imm16,
    /// Branch targets.
    Pc16,
    Hi16,
    Lo16,
    /// Default for symbols in absolute-address fields.
    Addr21,
    /// Symbols loaded by `mov rd, sym`.
    Imm21F,
    /// Call targets.
    Pc25,
}

impl FixupKind {
    #[must_use]
    pub const fn reloc_type(self) -> RelocType {
        reloc::reloc_for_fixup(self)
    }

    /// Bit offset, width and transform, shared with the linker.
    #[must_use]
    pub const fn info(self) -> FieldSpec {
        self.reloc_type().field()
    }

    /// Kind for a data directive of `size` bytes.
    #[must_use]
    pub const fn data(size: u32, modifier: Option<Modifier>) -> Option<Self> {
        match (size, modifier) {
            (1, None) => Some(Self::Data8),
            (2, None) => Some(Self::Data16),
            (2, Some(Modifier::Pc)) => Some(Self::Data16Pc),
            (4, None) => Some(Self::Data32),
            _ => None,
        }
    }
}

/// An immediate field of an instruction word as seen by the operand encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmField {
    /// ALU, RM offset and `movhi` immediates.
    Imm16,
    /// Absolute address of `lda`/`sta`.
    Addr21,
    /// `mov rd, imm`.
    Imm21,
    /// Branch target word index.
    Branch16,
    /// Call target word index.
    Call25,
}

impl ImmField {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Imm16 | Self::Branch16 => 16,
            Self::Addr21 | Self::Imm21 => 21,
            Self::Call25 => 25,
        }
    }

    #[must_use]
    pub const fn bit_offset(self) -> u32 {
        match self {
            Self::Imm16 | Self::Branch16 => 16,
            Self::Addr21 | Self::Imm21 => 11,
            Self::Call25 => 7,
        }
    }

    /// Fixup kind for a bare symbol reference.
    #[must_use]
    pub const fn default_kind(self) -> FixupKind {
        match self {
            Self::Imm16 => FixupKind::Imm16,
            Self::Addr21 => FixupKind::Addr21,
            Self::Imm21 => FixupKind::Imm21F,
            Self::Branch16 => FixupKind::Pc16,
            Self::Call25 => FixupKind::Pc25,
        }
    }

    /// Fixup kind for a modifier-wrapped reference, if the field admits it.
    #[must_use]
    pub const fn modified_kind(self, modifier: Modifier) -> Option<FixupKind> {
        match (self, modifier) {
            (Self::Imm16, Modifier::Hi) => Some(FixupKind::Hi16),
            (Self::Imm16, Modifier::Lo) => Some(FixupKind::Lo16),
            (Self::Imm16 | Self::Branch16, Modifier::Pc) => Some(FixupKind::Pc16),
            (Self::Call25, Modifier::Pc) => Some(FixupKind::Pc25),
            _ => None,
        }
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        (1u32 << self.bits()) - 1
    }
}

/// An unresolved value inside encoded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixup {
    /// Byte offset of the container: relative to the instruction when produced
    /// by the encoder, relative to the section once streamed.
    pub offset: u32,
    /// The referenced expression with any modifier already consumed by `kind`.
    pub expr: Expr,
    pub kind: FixupKind,
    /// Source statement that produced the fixup, unknown for generated code.
    pub span: Span,
}
