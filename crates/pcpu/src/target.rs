//! Target configuration for PCPU.
//!
//! Every component (encoder, object writer, linker, frame lowering) receives a
//! [`TargetConfig`] explicitly. Only byte order and the data layout vary between
//! presets; the instruction tables are shared.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Shift that selects byte `index` of a `width`-byte container.
    #[must_use]
    pub const fn byte_shift(self, index: usize, width: usize) -> u32 {
        match self {
            Self::Little => (index * 8) as u32,
            Self::Big => ((width - 1 - index) * 8) as u32,
        }
    }

    pub fn write_u32(self, out: &mut Vec<u8>, word: u32) {
        match self {
            Self::Little => out.extend_from_slice(&word.to_le_bytes()),
            Self::Big => out.extend_from_slice(&word.to_be_bytes()),
        }
    }

    /// Reads up to eight bytes as one unsigned container.
    #[must_use]
    pub fn read(self, bytes: &[u8]) -> u64 {
        bytes.iter().enumerate().fold(0u64, |acc, (i, &b)| {
            acc | (u64::from(b) << self.byte_shift(i, bytes.len()))
        })
    }

    /// Encodes `value` into `width` bytes.
    #[must_use]
    pub fn bytes(self, value: u64, width: usize) -> Vec<u8> {
        (0..width)
            .map(|i| (value >> self.byte_shift(i, width)) as u8)
            .collect()
    }
}

impl From<Endianness> for object::Endianness {
    fn from(endian: Endianness) -> Self {
        match endian {
            Endianness::Little => object::Endianness::Little,
            Endianness::Big => object::Endianness::Big,
        }
    }
}

/// Front-end type sizing constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub endian: Endianness,
    pub pointer_bits: u32,
    pub int_bits: u32,
    pub long_bits: u32,
    pub long_long_bits: u32,
    /// Widest integer type with a natural alignment entry (`i<N>:<N>`).
    pub aligned_int_bits: u32,
    pub native_bits: u32,
    pub stack_align_bits: u32,
}

impl DataLayout {
    /// 16-bit address space used by PiOS.
    #[must_use]
    pub const fn narrow16() -> Self {
        Self {
            endian: Endianness::Little,
            pointer_bits: 16,
            int_bits: 16,
            long_bits: 32,
            long_long_bits: 64,
            aligned_int_bits: 16,
            native_bits: 16,
            stack_align_bits: 16,
        }
    }

    /// 32-bit big-endian address space.
    #[must_use]
    pub const fn wide32() -> Self {
        Self {
            endian: Endianness::Big,
            pointer_bits: 32,
            int_bits: 32,
            long_bits: 32,
            long_long_bits: 64,
            aligned_int_bits: 64,
            native_bits: 32,
            stack_align_bits: 64,
        }
    }

    #[must_use]
    pub const fn pointer_bytes(&self) -> u32 {
        self.pointer_bits / 8
    }

    #[must_use]
    pub const fn stack_align(&self) -> u32 {
        self.stack_align_bits / 8
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = match self.endian {
            Endianness::Little => 'e',
            Endianness::Big => 'E',
        };
        let p = self.pointer_bits;
        let i = self.aligned_int_bits;
        write!(
            f,
            "{e}-m:e-p:{p}:{p}-i{i}:{i}-a:0:{p}-n{}-S{}",
            self.native_bits, self.stack_align_bits
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub triple: String,
    pub layout: DataLayout,
    pub elf_machine: u16,
}

/// ELF `e_machine` value written into PCPU objects.
pub const EM_PCPU: u16 = 0x5043;

/// Default target triple.
pub const PIOS_TRIPLE: &str = "pcpu-unknown-pios";

/// Macros every translation unit sees.
pub const PREDEFINED_MACROS: [(&str, &str); 2] = [("__PCPU__", "1"), ("__pcpu__", "1")];

/// Register names accepted in inline-assembly clobber lists.
pub const GCC_REG_NAMES: [&str; 12] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "rv", "fp", "rca", "sp",
];

impl TargetConfig {
    /// The PiOS ABI: little-endian, 16-bit pointers.
    #[must_use]
    pub fn pios() -> Self {
        Self {
            triple: PIOS_TRIPLE.to_string(),
            layout: DataLayout::narrow16(),
            elf_machine: EM_PCPU,
        }
    }

    /// The wide variant: big-endian, 32-bit pointers.
    #[must_use]
    pub fn wide() -> Self {
        Self {
            triple: "pcpu-unknown-elf".to_string(),
            layout: DataLayout::wide32(),
            elf_machine: EM_PCPU,
        }
    }

    #[must_use]
    pub const fn endian(&self) -> Endianness {
        self.layout.endian
    }

    /// Size of the saved return-address and frame-pointer slots, which is also
    /// the header gap in front of outgoing stack arguments.
    #[must_use]
    pub const fn slot_size(&self) -> u32 {
        self.layout.pointer_bytes()
    }

    #[must_use]
    pub const fn stack_align(&self) -> u32 {
        self.layout.stack_align()
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::pios()
    }
}
