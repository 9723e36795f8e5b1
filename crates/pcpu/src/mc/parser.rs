//! Statement parser for PCPU assembly.
//!
//! The parser only builds typed operands; whether an operand is acceptable for
//! a given mnemonic is decided later by the matcher. A malformed statement
//! produces one diagnostic and the parser resumes at the next line.

use super::expr::{BinaryOp, Expr, Modifier, UnaryOp};
use super::lexer::{Token, TokenKind, tokenize};
use crate::error::{Diagnostic, Span};
use crate::isa::{NameMode, Register, SrOp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    /// Literal piece of the instruction: the mnemonic, `(` or `)`.
    Token(String),
    Register(Register),
    Immediate(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub span: Span,
}

impl Operand {
    fn token(text: &str, span: Span) -> Self {
        Self {
            kind: OperandKind::Token(text.to_string()),
            span,
        }
    }

    #[must_use]
    pub fn is_token(&self, text: &str) -> bool {
        matches!(&self.kind, OperandKind::Token(t) if t == text)
    }
}

/// An instruction as written. `operands[0]` is the mnemonic token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub mnemonic: String,
    pub span: Span,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveArg {
    Expr(Expr, Span),
    Str(String, Span),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Label {
        name: String,
        span: Span,
    },
    Directive {
        name: String,
        args: Vec<DirectiveArg>,
        span: Span,
    },
    Instruction(ParsedInstruction),
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::Amp => BinaryOp::And,
        TokenKind::Caret => BinaryOp::Xor,
        TokenKind::Pipe => BinaryOp::Or,
        _ => return None,
    })
}

/// Splits `rsr`, `rsr.pc` and friends into the prefix and optional suffix.
fn special_register_form(name: &str) -> Option<(&str, Option<&str>)> {
    let prefix = name.get(..3)?;
    SrOp::from_prefix(prefix)?;
    match name.get(3..)? {
        "" => Some((prefix, None)),
        rest => rest.strip_prefix('.').map(|suffix| (prefix, Some(suffix))),
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    eof: Token,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        let eof = tokens.last().cloned().unwrap_or(Token {
            kind: TokenKind::Eof,
            span: Span::default(),
        });
        Self {
            tokens,
            pos: 0,
            eof,
        }
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens.get(self.pos + n).unwrap_or(&self.eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_end_of_statement(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn eat_to_end_of_statement(&mut self) {
        while !self.at_end_of_statement() {
            self.advance();
        }
    }

    fn unexpected(&self) -> Diagnostic {
        Diagnostic::new(self.peek().span, "unexpected token")
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, Diagnostic> {
        if &self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_end_of_statement(&self) -> Result<(), Diagnostic> {
        if self.at_end_of_statement() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_all(&mut self) -> (Vec<Statement>, Vec<Diagnostic>) {
        let mut statements = Vec::new();
        let mut diagnostics = Vec::new();
        loop {
            while self.peek().kind == TokenKind::Newline {
                self.advance();
            }
            if self.peek().kind == TokenKind::Eof {
                break;
            }
            if let Err(diag) = self.parse_statement(&mut statements) {
                diagnostics.push(diag);
                self.eat_to_end_of_statement();
            }
        }
        (statements, diagnostics)
    }

    fn parse_statement(&mut self, out: &mut Vec<Statement>) -> Result<(), Diagnostic> {
        let token = self.peek().clone();
        let TokenKind::Ident(name) = token.kind else {
            return Err(self.unexpected());
        };

        if self.peek_nth(1).kind == TokenKind::Colon {
            self.advance();
            self.advance();
            out.push(Statement::Label {
                name,
                span: token.span,
            });
            if self.at_end_of_statement() {
                return Ok(());
            }
            return self.parse_statement(out);
        }

        self.advance();
        if name.starts_with('.') {
            let args = self.parse_directive_args()?;
            out.push(Statement::Directive {
                name: name.to_ascii_lowercase(),
                args,
                span: token.span,
            });
            return Ok(());
        }

        let mnemonic = name.to_ascii_lowercase();
        let instruction = match special_register_form(&mnemonic) {
            Some((prefix, suffix)) => self.parse_special_register(prefix, suffix, token.span)?,
            None => self.parse_standard(&mnemonic, token.span)?,
        };
        out.push(Statement::Instruction(instruction));
        Ok(())
    }

    fn parse_standard(&mut self, mnemonic: &str, span: Span) -> Result<ParsedInstruction, Diagnostic> {
        let mut operands = vec![Operand::token(mnemonic, span)];
        if !self.at_end_of_statement() {
            self.parse_operand(&mut operands, false)?;
            while self.peek().kind == TokenKind::Comma {
                self.advance();
                self.parse_operand(&mut operands, false)?;
            }
        }
        self.expect_end_of_statement()?;
        Ok(ParsedInstruction {
            mnemonic: mnemonic.to_string(),
            span,
            operands,
        })
    }

    /// `rsr.pc r1` or `rsr r1, pc`. Both produce `[prefix, reg, sreg]`.
    fn parse_special_register(
        &mut self,
        prefix: &str,
        suffix: Option<&str>,
        span: Span,
    ) -> Result<ParsedInstruction, Diagnostic> {
        let mut operands = vec![Operand::token(prefix, span)];
        match suffix {
            Some(suffix) => {
                let sreg = Register::from_name(suffix, NameMode::Special)
                    .ok_or_else(|| Diagnostic::new(span, "invalid register name"))?;
                if !self.at_end_of_statement() {
                    self.parse_operand(&mut operands, false)?;
                }
                operands.push(Operand {
                    kind: OperandKind::Register(sreg),
                    span,
                });
            }
            None => {
                if !self.at_end_of_statement() {
                    self.parse_operand(&mut operands, false)?;
                    self.expect(&TokenKind::Comma)?;
                    self.parse_operand(&mut operands, true)?;
                }
            }
        }
        self.expect_end_of_statement()?;
        Ok(ParsedInstruction {
            mnemonic: prefix.to_string(),
            span,
            operands,
        })
    }

    fn parse_operand(&mut self, out: &mut Vec<Operand>, special: bool) -> Result<(), Diagnostic> {
        if self.try_register(out, special) {
            return Ok(());
        }
        let span = self.peek().span;
        match self.peek().kind {
            TokenKind::LParen
            | TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Tilde
            | TokenKind::Integer(_)
            | TokenKind::Ident(_)
            | TokenKind::Percent => {
                let expr = self.parse_expr()?;
                out.push(Operand {
                    kind: OperandKind::Immediate(expr),
                    span,
                });
                Ok(())
            }
            _ => Err(Diagnostic::new(span, "unknown operand")),
        }
    }

    /// Parses `reg` or `(reg)`. A parenthesised form is only taken when the
    /// token after next is `)`; `(4)` stays an expression unless `special`
    /// allows numeric register names. Nothing is consumed on failure.
    fn try_register(&mut self, out: &mut Vec<Operand>, special: bool) -> bool {
        let start = self.pos;
        let open = self.peek().span;
        let mut had_parens = false;
        if self.peek().kind == TokenKind::LParen && self.peek_nth(2).kind == TokenKind::RParen {
            if matches!(self.peek_nth(1).kind, TokenKind::Integer(_)) && !special {
                return false;
            }
            had_parens = true;
            self.advance();
        }

        let token = self.peek().clone();
        let reg = match &token.kind {
            TokenKind::Integer(n) if special => Register::special_from_number(*n),
            TokenKind::Ident(name) => Register::from_name(name, NameMode::Normal),
            _ => None,
        };
        let Some(reg) = reg else {
            self.pos = start;
            return false;
        };

        if had_parens {
            out.push(Operand::token("(", open));
        }
        self.advance();
        out.push(Operand {
            kind: OperandKind::Register(reg),
            span: token.span,
        });
        if had_parens {
            let close = self.advance();
            out.push(Operand::token(")", close.span));
        }
        true
    }

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = binary_op(&self.peek().kind) {
            if op.precedence() < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(op.precedence() + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        match self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            TokenKind::Tilde => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.advance();
        match token.kind {
            TokenKind::Integer(v) => Ok(Expr::Constant(v)),
            TokenKind::Ident(name) => Ok(Expr::Symbol(name)),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Percent => {
                let name = self.advance();
                let modifier = match &name.kind {
                    TokenKind::Ident(n) => Modifier::from_name(n),
                    _ => None,
                }
                .ok_or_else(|| Diagnostic::new(name.span, "unknown relocation modifier"))?;
                self.expect(&TokenKind::LParen)?;
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Expr::modified(modifier, inner))
            }
            _ => Err(Diagnostic::new(token.span, "unexpected token")),
        }
    }

    fn parse_directive_args(&mut self) -> Result<Vec<DirectiveArg>, Diagnostic> {
        let mut args = Vec::new();
        if self.at_end_of_statement() {
            return Ok(args);
        }
        loop {
            let span = self.peek().span;
            if let TokenKind::Str(text) = &self.peek().kind {
                args.push(DirectiveArg::Str(text.clone(), span));
                self.advance();
            } else {
                args.push(DirectiveArg::Expr(self.parse_expr()?, span));
            }
            if self.peek().kind != TokenKind::Comma {
                break;
            }
            self.advance();
        }
        self.expect_end_of_statement()?;
        Ok(args)
    }
}

/// Parses a whole source file. Statements that failed to parse are absent from
/// the result and reported in the diagnostics.
#[must_use]
pub fn parse(source: &str) -> (Vec<Statement>, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = tokenize(source);
    let (statements, parse_diagnostics) = Parser::new(&tokens).parse_all();
    diagnostics.extend(parse_diagnostics);
    diagnostics.sort_by_key(|d| d.span);
    (statements, diagnostics)
}
