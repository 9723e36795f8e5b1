use std::fmt;

/// A PCPU register. General-purpose registers share a 3-bit field; special
/// registers are addressed only by the SR instructions and use a separate
/// 4-bit space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    Pc,
    Ps,
}

/// How a name is matched against the register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMode {
    /// Only symbolic names.
    Normal,
    /// Symbolic names plus the numeric special-register identifiers.
    Special,
}

impl Register {
    /// Return value.
    pub const RV: Self = Self::R0;
    /// Frame pointer.
    pub const FP: Self = Self::R5;
    /// Return address ("return call address").
    pub const RCA: Self = Self::R6;
    /// Stack pointer.
    pub const SP: Self = Self::R7;

    pub const GENERAL: [Self; 8] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
    ];

    pub const SPECIAL: [Self; 2] = [Self::Pc, Self::Ps];

    /// Canonical field value. Total over every register the parser can produce.
    #[must_use]
    pub const fn encoding(self) -> u32 {
        match self {
            Self::R0 | Self::Pc => 0,
            Self::R1 | Self::Ps => 1,
            Self::R2 => 2,
            Self::R3 => 3,
            Self::R4 => 4,
            Self::R5 => 5,
            Self::R6 => 6,
            Self::R7 => 7,
        }
    }

    #[must_use]
    pub const fn is_general(self) -> bool {
        !self.is_special()
    }

    #[must_use]
    pub const fn is_special(self) -> bool {
        matches!(self, Self::Pc | Self::Ps)
    }

    #[must_use]
    pub fn general(index: u32) -> Option<Self> {
        Self::GENERAL.get(index as usize).copied()
    }

    /// Looks a register up by name, case-insensitively. Aliases resolve to the
    /// same register as their canonical name.
    #[must_use]
    pub fn from_name(name: &str, mode: NameMode) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let reg = match lower.as_str() {
            "r0" | "rv" => Self::R0,
            "r1" => Self::R1,
            "r2" => Self::R2,
            "r3" => Self::R3,
            "r4" => Self::R4,
            "r5" | "fp" => Self::R5,
            "r6" | "rca" => Self::R6,
            "r7" | "sp" => Self::R7,
            "pc" => Self::Pc,
            "ps" => Self::Ps,
            _ => return Self::from_number(&lower, mode),
        };
        Some(reg)
    }

    fn from_number(text: &str, mode: NameMode) -> Option<Self> {
        if mode != NameMode::Special {
            return None;
        }
        let n: u32 = text.parse().ok()?;
        Self::SPECIAL.into_iter().find(|r| r.encoding() == n)
    }

    /// Looks up a numeric special-register identifier.
    #[must_use]
    pub fn special_from_number(n: i64) -> Option<Self> {
        Self::SPECIAL
            .into_iter()
            .find(|r| i64::from(r.encoding()) == n)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::R0 => "r0",
            Self::R1 => "r1",
            Self::R2 => "r2",
            Self::R3 => "r3",
            Self::R4 => "r4",
            Self::R5 => "fp",
            Self::R6 => "rca",
            Self::R7 => "sp",
            Self::Pc => "pc",
            Self::Ps => "ps",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_share_encoding() {
        for (alias, canonical) in [("rv", "r0"), ("fp", "r5"), ("rca", "r6"), ("sp", "r7")] {
            let a = Register::from_name(alias, NameMode::Normal).unwrap();
            let c = Register::from_name(canonical, NameMode::Normal).unwrap();
            assert_eq!(a, c, "{alias} should alias {canonical}");
            assert_eq!(a.encoding(), c.encoding());
        }
    }

    #[test]
    fn numeric_names_only_in_special_mode() {
        assert_eq!(Register::from_name("0", NameMode::Normal), None);
        assert_eq!(Register::from_name("0", NameMode::Special), Some(Register::Pc));
        assert_eq!(Register::from_name("1", NameMode::Special), Some(Register::Ps));
        assert_eq!(Register::from_name("7", NameMode::Special), None);
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Register::from_name("SP", NameMode::Normal), Some(Register::SP));
        assert_eq!(Register::from_name("R3", NameMode::Normal), Some(Register::R3));
    }

    #[test]
    fn general_registers_round_trip() {
        for reg in Register::GENERAL {
            assert_eq!(Register::general(reg.encoding()), Some(reg));
        }
        assert_eq!(Register::general(8), None);
    }
}
