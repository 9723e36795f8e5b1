/// Major opcode in bits [3:0] of every instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Major {
    AluImm = 0x0,
    AluReg = 0x1,
    Load = 0x2,
    Store = 0x3,
    LoadReg = 0x4,
    StoreReg = 0x5,
    LoadShort = 0x6,
    StoreShort = 0x7,
    LoadAbs = 0x8,
    StoreAbs = 0x9,
    LoadImm = 0xA,
    Branch = 0xB,
    Call = 0xC,
    SpecialReg = 0xD,
    MovHi = 0xE,
    System = 0xF,
}

impl Major {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Self::AluImm,
            0x1 => Self::AluReg,
            0x2 => Self::Load,
            0x3 => Self::Store,
            0x4 => Self::LoadReg,
            0x5 => Self::StoreReg,
            0x6 => Self::LoadShort,
            0x7 => Self::StoreShort,
            0x8 => Self::LoadAbs,
            0x9 => Self::StoreAbs,
            0xA => Self::LoadImm,
            0xB => Self::Branch,
            0xC => Self::Call,
            0xD => Self::SpecialReg,
            0xE => Self::MovHi,
            0xF => Self::System,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn is_load(self) -> bool {
        matches!(
            self,
            Self::Load | Self::LoadReg | Self::LoadShort | Self::LoadAbs
        )
    }

    #[must_use]
    pub const fn is_store(self) -> bool {
        matches!(
            self,
            Self::Store | Self::StoreReg | Self::StoreShort | Self::StoreAbs
        )
    }

    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(self, Self::Branch)
    }
}

/// Load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Load,
    Store,
}

/// Access width of sized memory instructions (Y field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    Byte,
    Half,
    Word,
}

impl AccessSize {
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }

    #[must_use]
    pub const fn encode(self) -> u32 {
        match self {
            Self::Byte => 0,
            Self::Half => 1,
            Self::Word => 2,
        }
    }

    #[must_use]
    pub const fn for_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Half),
            4 => Some(Self::Word),
            _ => None,
        }
    }

    /// Largest offset a short-pointer access of this size can encode
    /// directly from assembly (255 scaled by the access size).
    #[must_use]
    pub const fn max_short_offset(self) -> u32 {
        255 * self.bytes()
    }

    /// Accepts offsets in `[0, 255 * size]` that are multiples of the size.
    #[must_use]
    pub const fn accepts_short_offset(self, offset: i64) -> bool {
        let size = self.bytes() as i64;
        offset >= 0 && offset <= self.max_short_offset() as i64 && offset % size == 0
    }
}

/// Special-register operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrOp {
    Read,
    Write,
    Exchange,
}

impl SrOp {
    #[must_use]
    pub const fn encode(self) -> u32 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Exchange => 2,
        }
    }

    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "rsr" => Some(Self::Read),
            "wsr" => Some(Self::Write),
            "xsr" => Some(Self::Exchange),
            _ => None,
        }
    }
}
