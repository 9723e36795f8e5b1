use std::fmt;

/// ALU operation code. The low three bits select the operation; shifts use
/// extended codes on top of `SPECIAL`; bits 6 and 7 mark pre- and
/// post-operation addressing for memory instructions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AluCode(u8);

const PRE_OP: u8 = 0x40;
const POST_OP: u8 = 0x80;

impl AluCode {
    pub const ADD: Self = Self(0x00);
    pub const ADDC: Self = Self(0x01);
    pub const SUB: Self = Self(0x02);
    pub const SUBB: Self = Self(0x03);
    pub const AND: Self = Self(0x04);
    pub const OR: Self = Self(0x05);
    pub const XOR: Self = Self(0x06);
    pub const SPECIAL: Self = Self(0x07);
    pub const SHL: Self = Self(0x17);
    pub const SRL: Self = Self(0x27);
    pub const SRA: Self = Self(0x37);

    const MNEMONICS: [(&'static str, Self); 10] = [
        ("add", Self::ADD),
        ("addc", Self::ADDC),
        ("sub", Self::SUB),
        ("subb", Self::SUBB),
        ("and", Self::AND),
        ("or", Self::OR),
        ("xor", Self::XOR),
        ("sh", Self::SHL),
        ("srl", Self::SRL),
        ("sha", Self::SRA),
    ];

    /// Value of the 3-bit ALU field.
    #[must_use]
    pub const fn encode(self) -> u32 {
        (self.0 & 0x07) as u32
    }

    /// The operation with the addressing flags stripped.
    #[must_use]
    pub const fn base(self) -> Self {
        Self(self.0 & 0x3F)
    }

    #[must_use]
    pub const fn is_pre_op(self) -> bool {
        self.0 & PRE_OP != 0
    }

    #[must_use]
    pub const fn is_post_op(self) -> bool {
        self.0 & POST_OP != 0
    }

    #[must_use]
    pub const fn is_pre_or_post(self) -> bool {
        self.is_pre_op() || self.is_post_op()
    }

    /// Marks the code as pre-operation.
    ///
    /// # Panics
    /// If the code already carries the post-operation flag.
    #[must_use]
    pub fn make_pre_op(self) -> Self {
        assert!(!self.is_post_op(), "ALU code {self:?} is already post-op");
        Self(self.0 | PRE_OP)
    }

    /// Marks the code as post-operation.
    ///
    /// # Panics
    /// If the code already carries the pre-operation flag.
    #[must_use]
    pub fn make_post_op(self) -> Self {
        assert!(!self.is_pre_op(), "ALU code {self:?} is already pre-op");
        Self(self.0 | POST_OP)
    }

    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self.base().0, 0x17 | 0x27 | 0x37)
    }

    /// Value of the 2-bit shift-kind field (0 for non-shifts).
    #[must_use]
    pub const fn shift_kind(self) -> u32 {
        ((self.0 >> 4) & 0x03) as u32
    }

    /// Swaps `ADD` and `SUB`, keeping the addressing flags.
    #[must_use]
    pub const fn invert_add_sub(self) -> Option<Self> {
        let flags = self.0 & (PRE_OP | POST_OP);
        match self.base().0 {
            0x00 => Some(Self(Self::SUB.0 | flags)),
            0x02 => Some(Self(Self::ADD.0 | flags)),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::MNEMONICS
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(name))
            .map(|&(_, code)| code)
    }

    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        let base = self.base();
        Self::MNEMONICS
            .iter()
            .find(|&&(_, code)| code == base)
            .map_or("special", |&(m, _)| m)
    }
}

impl fmt::Debug for AluCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        if self.is_pre_op() {
            f.write_str("+pre")?;
        }
        if self.is_post_op() {
            f.write_str("+post")?;
        }
        Ok(())
    }
}
