//! PCPU relocation types and the fixup-kind → relocation-type contract.
//!
//! This is the one place that defines, for every relocation, which bits of
//! which container it patches and how the value is transformed first. The
//! assembler resolves constant fixups through [`apply`], the object writer
//! maps fixups with [`reloc_for_fixup`], and the linker patches through
//! [`apply`] again, so the three agree by construction.

use std::fmt;

use crate::mc::FixupKind;
use crate::target::Endianness;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RelocType {
    None = 0,
    Abs8 = 1,
    Abs16 = 2,
    Abs32 = 3,
    Imm16 = 4,
    PcInstr16 = 5,
    PcRef16 = 6,
    Hi16 = 7,
    Lo16 = 8,
    Addr21 = 9,
    Imm21F = 10,
    Pc25 = 11,
}

/// Value transform applied before patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Byte address to word index (`>> 2`), alignment required.
    WordIndex,
    /// Upper half (`>> 16`).
    High16,
    /// Truncate to the field width.
    Mask,
}

/// Where a relocation's bits live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub bit_offset: u32,
    pub bits: u32,
    /// Size in bytes of the container read in target byte order.
    pub container: usize,
    pub transform: Transform,
}

const fn instr(bit_offset: u32, bits: u32, transform: Transform) -> FieldSpec {
    FieldSpec {
        bit_offset,
        bits,
        container: 4,
        transform,
    }
}

const fn data(bits: u32, transform: Transform) -> FieldSpec {
    FieldSpec {
        bit_offset: 0,
        bits,
        container: (bits / 8) as usize,
        transform,
    }
}

impl FieldSpec {
    #[must_use]
    pub const fn mask(self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    /// Transforms and range-checks `value` into the raw field contents.
    pub fn encode(self, reloc: RelocType, value: i64) -> Result<u64> {
        let out_of_range = || Error::ValueOutOfRange { reloc, value };
        let bits = self.bits;
        match self.transform {
            Transform::Identity => {
                if bits == 0 {
                    return Ok(0);
                }
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << bits) - 1;
                if value < min || value > max {
                    return Err(out_of_range());
                }
                Ok(value as u64 & self.mask())
            }
            Transform::WordIndex => {
                if value & 3 != 0 {
                    return Err(Error::MisalignedTarget { reloc, value });
                }
                let index = value >> 2;
                if index < 0 || index as u64 > self.mask() {
                    return Err(out_of_range());
                }
                Ok(index as u64)
            }
            Transform::High16 => Ok((value >> 16) as u64 & self.mask()),
            Transform::Mask => Ok(value as u64 & self.mask()),
        }
    }
}

impl RelocType {
    pub const ALL: [Self; 12] = [
        Self::None,
        Self::Abs8,
        Self::Abs16,
        Self::Abs32,
        Self::Imm16,
        Self::PcInstr16,
        Self::PcRef16,
        Self::Hi16,
        Self::Lo16,
        Self::Addr21,
        Self::Imm21F,
        Self::Pc25,
    ];

    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "R_PCPU_NONE",
            Self::Abs8 => "R_PCPU_8",
            Self::Abs16 => "R_PCPU_16",
            Self::Abs32 => "R_PCPU_32",
            Self::Imm16 => "R_PCPU_16_IMM",
            Self::PcInstr16 => "R_PCPU_16_PC_INSTR",
            Self::PcRef16 => "R_PCPU_16_PC_REF",
            Self::Hi16 => "R_PCPU_HI16",
            Self::Lo16 => "R_PCPU_LO16",
            Self::Addr21 => "R_PCPU_21",
            Self::Imm21F => "R_PCPU_21_F",
            Self::Pc25 => "R_PCPU_25",
        }
    }

    #[must_use]
    pub const fn field(self) -> FieldSpec {
        match self {
            Self::None => data(0, Transform::Identity),
            Self::Abs8 => data(8, Transform::Identity),
            Self::Abs16 => data(16, Transform::Identity),
            Self::Abs32 => data(32, Transform::Identity),
            Self::PcRef16 => data(16, Transform::WordIndex),
            Self::Imm16 => instr(16, 16, Transform::Identity),
            Self::PcInstr16 => instr(16, 16, Transform::WordIndex),
            Self::Hi16 => instr(16, 16, Transform::High16),
            Self::Lo16 => instr(16, 16, Transform::Mask),
            Self::Addr21 => instr(11, 21, Transform::Identity),
            Self::Imm21F => instr(11, 21, Transform::Mask),
            Self::Pc25 => instr(7, 25, Transform::WordIndex),
        }
    }

    /// Relocations that must keep referring to their symbol instead of being
    /// folded into a section-relative addend.
    #[must_use]
    pub const fn keeps_symbol(self) -> bool {
        matches!(
            self,
            Self::Addr21 | Self::Imm21F | Self::Pc25 | Self::Abs32 | Self::Hi16
        )
    }
}

impl fmt::Display for RelocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The fixup-kind → relocation-type mapping.
#[must_use]
pub const fn reloc_for_fixup(kind: FixupKind) -> RelocType {
    match kind {
        FixupKind::None => RelocType::None,
        FixupKind::Data8 => RelocType::Abs8,
        FixupKind::Data16 => RelocType::Abs16,
        FixupKind::Data32 => RelocType::Abs32,
        FixupKind::Data16Pc => RelocType::PcRef16,
        FixupKind::Imm16 => RelocType::Imm16,
        FixupKind::Pc16 => RelocType::PcInstr16,
        FixupKind::Hi16 => RelocType::Hi16,
        FixupKind::Lo16 => RelocType::Lo16,
        FixupKind::Addr21 => RelocType::Addr21,
        FixupKind::Imm21F => RelocType::Imm21F,
        FixupKind::Pc25 => RelocType::Pc25,
    }
}

/// ORs the encoded `value` into `section` at `offset`. Bits already set in
/// the container are preserved.
pub fn apply(
    reloc: RelocType,
    section: &mut [u8],
    offset: usize,
    value: i64,
    endian: Endianness,
) -> Result<()> {
    let field = reloc.field();
    let Some(container) = offset
        .checked_add(field.container)
        .and_then(|end| section.get_mut(offset..end))
    else {
        return Err(Error::InvalidObject(format!(
            "{reloc} at offset {offset:#x} runs past the end of its section"
        )));
    };
    let encoded = field.encode(reloc, value)?;
    if encoded == 0 {
        return Ok(());
    }
    let shifted = encoded << field.bit_offset;
    let width = container.len();
    for (i, byte) in container.iter_mut().enumerate() {
        *byte |= (shifted >> endian.byte_shift(i, width)) as u8;
    }
    tracing::trace!(%reloc, offset, value, encoded, "patched field");
    Ok(())
}
