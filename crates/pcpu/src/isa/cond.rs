/// Branch condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CondCode {
    /// Always true.
    T = 0,
    /// Carry set (unsigned less-than).
    Ca = 1,
    Eq = 2,
    Lt = 3,
    Gt = 4,
    Le = 5,
    Ge = 6,
    Ne = 7,
    /// Overflow.
    Ovf = 8,
    Gtu = 9,
    Geu = 10,
    Leu = 11,
}

/// Integer comparisons as produced by instruction selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl CondCode {
    pub const ALL: [Self; 12] = [
        Self::T,
        Self::Ca,
        Self::Eq,
        Self::Lt,
        Self::Gt,
        Self::Le,
        Self::Ge,
        Self::Ne,
        Self::Ovf,
        Self::Gtu,
        Self::Geu,
        Self::Leu,
    ];

    #[must_use]
    pub const fn encode(self) -> u32 {
        self as u32
    }

    /// Mnemonic suffix after `j` (`jmp`, `jeq`, ...).
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::T => "mp",
            Self::Ca => "ca",
            Self::Eq => "eq",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Ge => "ge",
            Self::Ne => "ne",
            Self::Ovf => "ov",
            Self::Gtu => "gtu",
            Self::Geu => "geu",
            Self::Leu => "leu",
        }
    }

    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.suffix().eq_ignore_ascii_case(suffix))
    }

    /// The opposite condition, when one exists.
    #[must_use]
    pub const fn negation(self) -> Option<Self> {
        Some(match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Gtu => Self::Leu,
            Self::Leu => Self::Gtu,
            Self::Ca => Self::Geu,
            Self::Geu => Self::Ca,
            Self::T | Self::Ovf => return None,
        })
    }

    /// # Panics
    /// For `T` and `Ovf`, which have no opposite. Callers must only reverse
    /// branches that [`CondCode::negation`] accepts.
    #[must_use]
    pub fn negate(self) -> Self {
        match self.negation() {
            Some(cc) => cc,
            None => panic!("condition code {self:?} cannot be negated"),
        }
    }

    #[must_use]
    pub const fn from_comparison(cmp: Comparison) -> Self {
        match cmp {
            Comparison::Eq => Self::Eq,
            Comparison::Ne => Self::Ne,
            Comparison::Slt => Self::Lt,
            Comparison::Sle => Self::Le,
            Comparison::Sgt => Self::Gt,
            Comparison::Sge => Self::Ge,
            Comparison::Ult => Self::Ca,
            Comparison::Ule => Self::Leu,
            Comparison::Ugt => Self::Gtu,
            Comparison::Uge => Self::Geu,
        }
    }
}
