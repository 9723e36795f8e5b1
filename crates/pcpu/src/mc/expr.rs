//! Symbolic assembler expressions.

use std::fmt;

/// Relocation modifier written as `%name(expr)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Hi,
    Lo,
    Pc,
}

impl Modifier {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hi" => Some(Self::Hi),
            "lo" => Some(Self::Lo),
            "pc" => Some(Self::Pc),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hi => "hi",
            Self::Lo => "lo",
            Self::Pc => "pc",
        }
    }

    /// Applies the modifier to an already-known value.
    #[must_use]
    pub const fn fold(self, value: i64) -> i64 {
        match self {
            Self::Hi => (value >> 16) & 0xFFFF,
            Self::Lo => value & 0xFFFF,
            Self::Pc => value >> 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    And,
    Xor,
    Or,
}

impl BinaryOp {
    /// Binding strength, higher binds tighter.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 5,
            Self::Add | Self::Sub => 4,
            Self::Shl | Self::Shr => 3,
            Self::And => 2,
            Self::Xor => 1,
            Self::Or => 0,
        }
    }

    fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        Some(match self {
            Self::Mul => lhs.wrapping_mul(rhs),
            Self::Div => lhs.checked_div(rhs)?,
            Self::Rem => lhs.checked_rem(rhs)?,
            Self::Add => lhs.wrapping_add(rhs),
            Self::Sub => lhs.wrapping_sub(rhs),
            Self::Shl => lhs.checked_shl(u32::try_from(rhs).ok()?)?,
            Self::Shr => lhs.checked_shr(u32::try_from(rhs).ok()?)?,
            Self::And => lhs & rhs,
            Self::Xor => lhs ^ rhs,
            Self::Or => lhs | rhs,
        })
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::And => "&",
            Self::Xor => "^",
            Self::Or => "|",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Constant(i64),
    Symbol(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Modified(Modifier, Box<Expr>),
}

/// An expression reduced to `symbol + addend` (or a plain constant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocatable {
    pub symbol: Option<String>,
    pub addend: i64,
}

impl Expr {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    #[must_use]
    pub fn modified(modifier: Modifier, inner: Expr) -> Self {
        Self::Modified(modifier, Box::new(inner))
    }

    #[must_use]
    pub fn modifier(&self) -> Option<Modifier> {
        match self {
            Self::Modified(m, _) => Some(*m),
            _ => None,
        }
    }

    /// The expression under a modifier, or the expression itself.
    #[must_use]
    pub fn strip_modifier(&self) -> &Expr {
        match self {
            Self::Modified(_, inner) => inner,
            other => other,
        }
    }

    /// Evaluates to a constant if every symbol is known to `lookup`.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<i64>) -> Option<i64> {
        match self {
            Self::Constant(v) => Some(*v),
            Self::Symbol(name) => lookup(name),
            Self::Unary(UnaryOp::Neg, e) => Some(e.evaluate(lookup)?.wrapping_neg()),
            Self::Unary(UnaryOp::Not, e) => Some(!e.evaluate(lookup)?),
            Self::Binary(op, l, r) => op.apply(l.evaluate(lookup)?, r.evaluate(lookup)?),
            Self::Modified(m, e) => Some(m.fold(e.evaluate(lookup)?)),
        }
    }

    /// Reduces a modifier-free expression to `symbol + addend`. Returns `None`
    /// for shapes a relocation cannot express (symbol differences, scaled
    /// symbols, nested modifiers).
    pub fn to_relocatable(&self, lookup: &dyn Fn(&str) -> Option<i64>) -> Option<Relocatable> {
        if let Some(value) = self.evaluate(lookup) {
            return Some(Relocatable {
                symbol: None,
                addend: value,
            });
        }
        match self {
            Self::Symbol(name) => Some(Relocatable {
                symbol: Some(name.clone()),
                addend: 0,
            }),
            Self::Binary(BinaryOp::Add, l, r) => {
                let l = l.to_relocatable(lookup)?;
                let r = r.to_relocatable(lookup)?;
                match (l.symbol, r.symbol) {
                    (Some(s), None) | (None, Some(s)) => Some(Relocatable {
                        symbol: Some(s),
                        addend: l.addend.wrapping_add(r.addend),
                    }),
                    _ => None,
                }
            }
            Self::Binary(BinaryOp::Sub, l, r) => {
                let l = l.to_relocatable(lookup)?;
                let r = r.to_relocatable(lookup)?;
                if r.symbol.is_some() {
                    return None;
                }
                Some(Relocatable {
                    symbol: l.symbol,
                    addend: l.addend.wrapping_sub(r.addend),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::Symbol(name) => f.write_str(name),
            Self::Unary(UnaryOp::Neg, e) => write!(f, "-{e}"),
            Self::Unary(UnaryOp::Not, e) => write!(f, "~{e}"),
            Self::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            Self::Modified(m, e) => write!(f, "%{}({e})", m.name()),
        }
    }
}
