//! Two-stage text assembler: parse, then stream statements into an object.

use super::expr::Expr;
use super::matcher::{data_expr_is_encodable, match_instruction};
use super::object::ObjectFile;
use super::parser::{DirectiveArg, Statement, parse};
use super::streamer::ObjectStreamer;
use crate::error::{Diagnostic, Span};
use crate::target::TargetConfig;
use crate::{Error, Result};

fn arg_span(arg: &DirectiveArg) -> Span {
    match arg {
        DirectiveArg::Expr(_, span) | DirectiveArg::Str(_, span) => *span,
    }
}

/// Bare name carried by a directive argument: a symbol or a string.
fn arg_name(arg: &DirectiveArg) -> Option<&str> {
    match arg {
        DirectiveArg::Expr(Expr::Symbol(name), _) | DirectiveArg::Str(name, _) => Some(name),
        DirectiveArg::Expr(..) => None,
    }
}

struct Assembler {
    streamer: ObjectStreamer,
    diagnostics: Vec<Diagnostic>,
}

impl Assembler {
    fn new(config: &TargetConfig) -> Self {
        Self {
            streamer: ObjectStreamer::new(config),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(span, message));
    }

    /// Reports a streamer failure at `span`.
    fn check(&mut self, span: Span, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(Error::DuplicateSymbol(name)) => {
                self.error(span, format!("symbol redefined: {name}"));
            }
            Err(err) => self.error(span, err.to_string()),
        }
    }

    /// Defines every `.set`/`.equ` up front, so a constant folds the same way
    /// above and below its definition.
    fn constants(&mut self, statements: &[Statement]) {
        let mut pending = Vec::new();
        for statement in statements {
            let Statement::Directive { name, args, span } = statement else {
                continue;
            };
            if name != ".set" && name != ".equ" {
                continue;
            }
            let [target, value] = args.as_slice() else {
                self.error(*span, format!("{name} takes a symbol and a value"));
                continue;
            };
            match arg_name(target) {
                Some(symbol) => pending.push((symbol, arg_span(target), value)),
                None => self.error(arg_span(target), "expected a symbol name"),
            }
        }
        // Constants may refer to ones defined further down.
        loop {
            let before = pending.len();
            pending.retain(|&(symbol, span, value)| {
                let DirectiveArg::Expr(expr, _) = value else {
                    self.error(arg_span(value), "expected an expression");
                    return false;
                };
                let streamer = &self.streamer;
                let Some(value) = expr.evaluate(&|name: &str| streamer.constant(name)) else {
                    return true;
                };
                let result = self.streamer.define_constant(symbol, value);
                self.check(span, result);
                false
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for (_, _, value) in pending {
            self.error(arg_span(value), "expected an absolute expression");
        }
    }

    fn statement(&mut self, statement: &Statement) {
        self.streamer.set_location(match statement {
            Statement::Label { span, .. } | Statement::Directive { span, .. } => *span,
            Statement::Instruction(parsed) => parsed.span,
        });
        match statement {
            Statement::Label { name, span } => {
                let result = self.streamer.define_label(name);
                self.check(*span, result);
            }
            Statement::Instruction(parsed) => {
                let streamer = &self.streamer;
                let lookup = |name: &str| streamer.constant(name);
                match match_instruction(parsed, &lookup) {
                    Ok(inst) => {
                        let result = self.streamer.emit_instruction(&inst);
                        self.check(parsed.span, result);
                    }
                    Err(diag) => self.diagnostics.push(diag),
                }
            }
            Statement::Directive { name, args, span } => self.directive(name, args, *span),
        }
    }

    fn constant(&mut self, arg: &DirectiveArg) -> Option<i64> {
        let DirectiveArg::Expr(expr, span) = arg else {
            self.error(arg_span(arg), "expected an expression");
            return None;
        };
        let streamer = &self.streamer;
        let value = expr.evaluate(&|name: &str| streamer.constant(name));
        if value.is_none() {
            self.error(*span, "expected an absolute expression");
        }
        value
    }

    fn data(&mut self, size: u32, args: &[DirectiveArg]) {
        for arg in args {
            let DirectiveArg::Expr(expr, span) = arg else {
                self.error(arg_span(arg), "expected an expression");
                continue;
            };
            let streamer = &self.streamer;
            if !data_expr_is_encodable(expr, &|name: &str| streamer.constant(name)) {
                self.error(*span, "expression is not relocatable");
                continue;
            }
            self.streamer.set_location(*span);
            let result = self.streamer.emit_value(expr, size);
            self.check(*span, result);
        }
    }

    fn strings(&mut self, args: &[DirectiveArg], terminate: bool) {
        for arg in args {
            let DirectiveArg::Str(text, span) = arg else {
                self.error(arg_span(arg), "expected a string");
                continue;
            };
            let mut bytes = text.as_bytes().to_vec();
            if terminate {
                bytes.push(0);
            }
            let result = self.streamer.emit_bytes(&bytes);
            self.check(*span, result);
        }
    }

    fn directive(&mut self, name: &str, args: &[DirectiveArg], span: Span) {
        match name {
            ".text" | ".data" | ".bss" => {
                self.streamer.switch_section(name);
            }
            ".section" => match args.first().and_then(arg_name) {
                Some(section) => {
                    self.streamer.switch_section(section);
                }
                None => self.error(span, "expected a section name"),
            },
            ".globl" | ".global" => {
                for arg in args {
                    match arg_name(arg) {
                        Some(symbol) => self.streamer.declare_global(symbol),
                        None => self.error(arg_span(arg), "expected a symbol name"),
                    }
                }
            }
            ".byte" => self.data(1, args),
            ".short" | ".half" | ".2byte" => self.data(2, args),
            ".word" | ".long" | ".4byte" => self.data(4, args),
            ".zero" | ".space" => {
                if let Some(count) = args.first().and_then(|arg| self.constant(arg)) {
                    match u64::try_from(count) {
                        Ok(count) => {
                            let result = self.streamer.emit_zeros(count);
                            self.check(span, result);
                        }
                        Err(_) => self.error(span, "negative size"),
                    }
                }
            }
            ".align" => {
                if let Some(align) = args.first().and_then(|arg| self.constant(arg)) {
                    match u64::try_from(align) {
                        Ok(align) if align.is_power_of_two() => {
                            let result = self.streamer.align(align);
                            self.check(span, result);
                        }
                        _ => self.error(span, "alignment must be a power of 2"),
                    }
                }
            }
            ".ascii" => self.strings(args, false),
            ".asciz" | ".string" => self.strings(args, true),
            // Defined by `constants` before streaming starts.
            ".set" | ".equ" => {}
            _ => self.error(span, "unknown directive"),
        }
    }
}

/// Assembles `source` into a relocatable object. Every diagnostic of the
/// source is collected before failing with [`Error::Assembly`].
pub fn assemble(source: &str, config: &TargetConfig) -> Result<ObjectFile> {
    let (statements, mut diagnostics) = parse(source);
    let mut assembler = Assembler::new(config);
    assembler.constants(&statements);
    for statement in &statements {
        assembler.statement(statement);
    }
    diagnostics.append(&mut assembler.diagnostics);
    if !diagnostics.is_empty() {
        diagnostics.sort_by_key(|d| d.span);
        tracing::debug!(count = diagnostics.len(), "assembly failed");
        return Err(Error::Assembly(diagnostics));
    }
    let object = assembler.streamer.finish()?;
    tracing::debug!(
        sections = object.sections.len(),
        symbols = object.symbols.len(),
        "assembled object"
    );
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::object::{Binding, RelocTarget};
    use crate::reloc::RelocType;

    fn diagnostics(source: &str) -> Vec<String> {
        match assemble(source, &TargetConfig::pios()) {
            Err(Error::Assembly(diags)) => diags.iter().map(ToString::to_string).collect(),
            other => panic!("expected diagnostics, got {other:?}"),
        }
    }

    #[test]
    fn text_and_data_sections() {
        let obj = assemble(
            ".text\nstart: nop\n ret\n.data\nmsg: .asciz \"hi\"\n.short 0x1234\n",
            &TargetConfig::pios(),
        )
        .unwrap();
        assert_eq!(obj.section(".text").unwrap().data.len(), 8);
        assert_eq!(
            obj.section(".data").unwrap().data,
            vec![b'h', b'i', 0, 0x34, 0x12]
        );
        let msg = obj.symbol("msg").unwrap();
        assert_eq!((msg.section, msg.value), (Some(1), 0));
    }

    #[test]
    fn global_symbols_keep_their_name() {
        let obj = assemble(
            ".globl main\nmain: call helper\nhelper: ret\n",
            &TargetConfig::pios(),
        )
        .unwrap();
        assert_eq!(obj.symbol("main").unwrap().binding, Binding::Global);
        assert_eq!(obj.symbol("helper").unwrap().binding, Binding::Local);
        let reloc = &obj.section(".text").unwrap().relocations[0];
        assert_eq!(reloc.r_type, RelocType::Pc25);
        assert_eq!(reloc.target, RelocTarget::Symbol("helper".into()));
    }

    #[test]
    fn branch_to_local_label_collapses() {
        let obj = assemble("nop\nloop: nop\n jmp loop\n", &TargetConfig::pios()).unwrap();
        let reloc = &obj.section(".text").unwrap().relocations[0];
        assert_eq!(reloc.r_type, RelocType::PcInstr16);
        assert_eq!(reloc.target, RelocTarget::Section(0));
        assert_eq!(reloc.addend, 4);
    }

    #[test]
    fn set_constants_resolve_in_operands() {
        let obj = assemble(".set SIZE, 12\nadd r1, r2, SIZE\n", &TargetConfig::pios()).unwrap();
        let text = obj.section(".text").unwrap();
        assert!(text.relocations.is_empty());
        let word = u32::from_le_bytes(text.data[..4].try_into().unwrap());
        assert_eq!(word >> 16, 12);
    }

    #[test]
    fn collects_all_diagnostics() {
        let diags = diagnostics("frob r1\n.bogus 1\nadd r1, r2\nx:\nx:\n");
        assert_eq!(
            diags,
            vec![
                "1:1: error: unrecognized instruction mnemonic",
                "2:1: error: unknown directive",
                "3:1: error: too few operands for instruction",
                "5:1: error: symbol redefined: x",
            ]
        );
    }

    #[test]
    fn symbol_differences_in_data_are_rejected() {
        let diags = diagnostics(".data\na: .word b - a\nb:\n");
        assert_eq!(diags, vec!["2:10: error: expression is not relocatable"]);
    }

    fn text(source: &str) -> Vec<u8> {
        let obj = assemble(source, &TargetConfig::pios()).unwrap();
        let text = obj.section(".text").unwrap();
        assert!(text.relocations.is_empty());
        text.data.clone()
    }

    #[test]
    fn constants_fold_the_same_above_and_below_their_use() {
        let backward = text(".set TGT, 400\njmp TGT\n");
        assert_eq!(backward, text("jmp TGT\n.set TGT, 400\n"));
        let word = u32::from_le_bytes(backward[..4].try_into().unwrap());
        assert_eq!(word >> 16, 100, "named targets are byte addresses");

        let backward = text(".set K, -20\nld r1, fp, K\n");
        assert_eq!(backward, text("ld r1, fp, K\n.set K, -20\n"));
        assert_eq!(backward, text("ld r1, fp, -20\n"));

        assert_eq!(
            diagnostics("add r1, r2, K\n.set K, -1\n"),
            vec!["1:13: error: invalid operand for instruction"]
        );
        assert_eq!(
            diagnostics("jmp T\n.set T, 402\n"),
            vec!["1:5: error: invalid operand for instruction"]
        );
    }

    #[test]
    fn constants_may_refer_forward() {
        assert_eq!(
            text(".set A, B + 1\n.set B, 2\nadd r1, r1, A\n"),
            text("add r1, r1, 3\n")
        );
        assert_eq!(
            diagnostics(".set A, A\n.set B, lbl\nlbl:\n"),
            vec![
                "1:9: error: expected an absolute expression",
                "2:9: error: expected an absolute expression",
            ]
        );
    }

    #[test]
    fn constant_data_must_fit() {
        let diags = diagnostics(".set K, 300\n.data\n.byte 255, K\n.short -32768, 65536\n");
        assert_eq!(diags.len(), 2);
        assert!(diags[0].starts_with("3:12: error: value 0x12c does not fit"), "{}", diags[0]);
        assert!(diags[1].starts_with("4:16: error: value 0x10000 does not fit"), "{}", diags[1]);
    }

    #[test]
    fn oversized_reservations_are_diagnosed() {
        assert_eq!(
            diagnostics(".zero 0x7fffffffffffffff\n"),
            vec!["1:1: error: size too large: .text would exceed 0x10000 bytes"]
        );
        let diags = diagnostics(".bss\n.space 0x8000\n.space 0x8000\n.space 1\n.align 0x20000\n");
        assert_eq!(diags.len(), 2);
        assert!(diags[0].starts_with("4:1: error: size too large"));
        assert!(diags[1].starts_with("5:1: error: size too large"));
    }

    #[test]
    fn instructions_in_bss_are_errors() {
        let diags = diagnostics(".bss\nnop\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].starts_with("2:1:"));
    }
}
