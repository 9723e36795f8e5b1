//! Tokenizer for PCPU assembly.
//!
//! Every token carries its [`Span`] so diagnostics can point at the exact
//! column. Newlines are tokens because they end statements.

use crate::error::{Diagnostic, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Mnemonics, registers, symbols and directives (a leading `.` is kept).
    Ident(String),
    Integer(i64),
    Str(String),
    Comma,
    Colon,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl TokenKind {
    /// Short description used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("'{name}'"),
            Self::Integer(v) => format!("'{v}'"),
            Self::Str(_) => "string".to_string(),
            Self::Newline => "end of line".to_string(),
            Self::Eof => "end of file".to_string(),
            other => format!("'{}'", other.punct()),
        }
    }

    const fn punct(&self) -> &'static str {
        match self {
            Self::Comma => ",",
            Self::Colon => ":",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::Shl => "<<",
            Self::Shr => ">>",
            _ => "",
        }
    }
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '$')
}

const fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl Lexer<'_> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            text.push(c);
            self.bump();
        }
        text
    }

    fn number(&mut self, span: Span) -> Result<TokenKind, Diagnostic> {
        let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let clean = text.replace('_', "");
        let lower = clean.to_ascii_lowercase();
        let parsed = if let Some(hex) = lower.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(bin) = lower.strip_prefix("0b") {
            i64::from_str_radix(bin, 2)
        } else {
            lower.parse::<i64>()
        };
        parsed
            .map(TokenKind::Integer)
            .map_err(|_| Diagnostic::new(span, format!("invalid integer '{text}'")))
    }

    fn escape(&mut self, span: Span) -> Result<char, Diagnostic> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some(c @ ('\\' | '"' | '\'')) => Ok(c),
            _ => Err(Diagnostic::new(span, "invalid escape sequence")),
        }
    }

    fn string(&mut self, span: Span) -> Result<TokenKind, Diagnostic> {
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::Str(text)),
                Some('\\') => text.push(self.escape(span)?),
                Some('\n') | None => {
                    return Err(Diagnostic::new(span, "unterminated string literal"));
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn character(&mut self, span: Span) -> Result<TokenKind, Diagnostic> {
        let c = match self.bump() {
            Some('\\') => self.escape(span)?,
            Some(c) if c != '\n' => c,
            _ => return Err(Diagnostic::new(span, "invalid character literal")),
        };
        if self.bump() != Some('\'') {
            return Err(Diagnostic::new(span, "unterminated character literal"));
        }
        Ok(TokenKind::Integer(i64::from(u32::from(c))))
    }
}

/// Splits `source` into tokens, ending with [`TokenKind::Eof`].
///
/// A malformed token yields a diagnostic and the rest of its line is dropped,
/// so one bad literal does not hide errors on later lines.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut lexer = Lexer {
        chars: source.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();

    while let Some(c) = lexer.peek() {
        let span = Span::new(lexer.line, lexer.column);
        let kind = match c {
            ' ' | '\t' | '\r' => {
                lexer.bump();
                continue;
            }
            ';' => {
                lexer.take_while(|c| c != '\n');
                continue;
            }
            '\n' => {
                lexer.bump();
                TokenKind::Newline
            }
            '0'..='9' => match lexer.number(span) {
                Ok(kind) => kind,
                Err(diag) => {
                    diagnostics.push(diag);
                    lexer.take_while(|c| c != '\n');
                    continue;
                }
            },
            '"' | '\'' => {
                lexer.bump();
                let lexed = if c == '"' {
                    lexer.string(span)
                } else {
                    lexer.character(span)
                };
                match lexed {
                    Ok(kind) => kind,
                    Err(diag) => {
                        diagnostics.push(diag);
                        lexer.take_while(|c| c != '\n');
                        continue;
                    }
                }
            }
            c if is_ident_start(c) => TokenKind::Ident(lexer.take_while(is_ident_continue)),
            _ => {
                lexer.bump();
                match c {
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '&' => TokenKind::Amp,
                    '|' => TokenKind::Pipe,
                    '^' => TokenKind::Caret,
                    '~' => TokenKind::Tilde,
                    '<' | '>' if lexer.peek() == Some(c) => {
                        lexer.bump();
                        if c == '<' { TokenKind::Shl } else { TokenKind::Shr }
                    }
                    other => {
                        diagnostics.push(Diagnostic::new(
                            span,
                            format!("unexpected character '{other}'"),
                        ));
                        lexer.take_while(|c| c != '\n');
                        continue;
                    }
                }
            }
        };
        tokens.push(Token { kind, span });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(lexer.line, lexer.column),
    });
    (tokens, diagnostics)
}
