//! Section-aware byte emission shared by the assembler and code generator.

use std::collections::{HashMap, HashSet};

use super::encoder::CodeEmitter;
use super::expr::Expr;
use super::fixup::{Fixup, FixupKind};
use super::object::{
    Binding, ObjectFile, RelocTarget, RelocationRecord, Section, SectionKind, SymbolDef,
};
use crate::error::{Diagnostic, Span};
use crate::isa::Instruction;
use crate::reloc;
use crate::target::TargetConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Label {
    section: usize,
    offset: u64,
}

struct PendingSection {
    name: String,
    kind: SectionKind,
    data: Vec<u8>,
    bss_size: u64,
    align: u64,
    fixups: Vec<Fixup>,
}

impl PendingSection {
    fn new(name: &str) -> Self {
        let kind = SectionKind::from_name(name);
        Self {
            name: name.to_string(),
            kind,
            data: Vec::new(),
            bss_size: 0,
            align: if kind == SectionKind::Text { 4 } else { 1 },
            fixups: Vec::new(),
        }
    }

    fn size(&self) -> u64 {
        match self.kind {
            SectionKind::Bss => self.bss_size,
            _ => self.data.len() as u64,
        }
    }
}

/// Accumulates sections, labels and fixups, then resolves them into an
/// [`ObjectFile`].
pub struct ObjectStreamer {
    config: TargetConfig,
    emitter: CodeEmitter,
    sections: Vec<PendingSection>,
    current: usize,
    labels: HashMap<String, Label>,
    label_order: Vec<String>,
    constants: HashMap<String, i64>,
    globals: HashSet<String>,
    global_order: Vec<String>,
    location: Span,
}

impl ObjectStreamer {
    /// Starts with `.text`, `.data` and `.bss`, with `.text` current.
    #[must_use]
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            config: config.clone(),
            emitter: CodeEmitter::new(config),
            sections: vec![
                PendingSection::new(".text"),
                PendingSection::new(".data"),
                PendingSection::new(".bss"),
            ],
            current: 0,
            labels: HashMap::new(),
            label_order: Vec::new(),
            constants: HashMap::new(),
            globals: HashSet::new(),
            global_order: Vec::new(),
            location: Span::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Source position attached to fixups emitted from now on.
    pub fn set_location(&mut self, span: Span) {
        self.location = span;
    }

    /// Makes `name` current, creating it on first use. Returns its index.
    pub fn switch_section(&mut self, name: &str) -> usize {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(PendingSection::new(name));
                self.sections.len() - 1
            }
        };
        self.current = index;
        index
    }

    /// Offset of the next byte in the current section.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.sections[self.current].size()
    }

    fn is_defined(&self, name: &str) -> bool {
        self.labels.contains_key(name) || self.constants.contains_key(name)
    }

    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.is_defined(name) {
            return Err(Error::DuplicateSymbol(name.to_string()));
        }
        let label = Label {
            section: self.current,
            offset: self.offset(),
        };
        self.labels.insert(name.to_string(), label);
        self.label_order.push(name.to_string());
        Ok(())
    }

    /// `.set`/`.equ`: an absolute value visible to later expressions.
    pub fn define_constant(&mut self, name: &str, value: i64) -> Result<()> {
        if self.is_defined(name) {
            return Err(Error::DuplicateSymbol(name.to_string()));
        }
        self.constants.insert(name.to_string(), value);
        Ok(())
    }

    pub fn declare_global(&mut self, name: &str) {
        if self.globals.insert(name.to_string()) {
            self.global_order.push(name.to_string());
        }
    }

    #[must_use]
    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    fn writable(&mut self, what: &str) -> Result<&mut PendingSection> {
        let section = &mut self.sections[self.current];
        if section.kind == SectionKind::Bss {
            return Err(Error::Unsupported(format!(
                "{what} in zero-initialized section {}",
                section.name
            )));
        }
        Ok(section)
    }

    pub fn emit_instruction(&mut self, inst: &Instruction) -> Result<()> {
        let emitter = self.emitter.clone();
        let location = self.location;
        let section = self.writable("instruction")?;
        let first = section.fixups.len();
        emitter.emit(inst, &mut section.data, &mut section.fixups);
        for fixup in &mut section.fixups[first..] {
            fixup.span = location;
        }
        Ok(())
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writable("data")?.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Emits a `size`-byte value. Constants are range checked and written
    /// directly; anything else leaves a data fixup.
    pub fn emit_value(&mut self, expr: &Expr, size: u32) -> Result<()> {
        let Some(kind) = FixupKind::data(size, expr.modifier()) else {
            return Err(Error::Unsupported(format!(
                "{size}-byte data value {expr}"
            )));
        };
        let endian = self.config.endian();
        let lookup = |name: &str| self.constants.get(name).copied();
        let constant = expr.strip_modifier().evaluate(&lookup);
        let location = self.location;
        let section = self.writable("data")?;
        let offset = section.data.len();
        let mut value = vec![0; size as usize];
        match constant {
            Some(constant) => reloc::apply(kind.reloc_type(), &mut value, 0, constant, endian)?,
            None => section.fixups.push(Fixup {
                offset: offset as u32,
                expr: expr.strip_modifier().clone(),
                kind,
                span: location,
            }),
        }
        section.data.extend_from_slice(&value);
        Ok(())
    }

    /// Largest section the target address space can hold.
    fn size_limit(&self) -> u64 {
        1u64 << self.config.layout.pointer_bits.min(32)
    }

    /// Reserves `count` zero bytes; the only emission `.bss` accepts.
    pub fn emit_zeros(&mut self, count: u64) -> Result<()> {
        let limit = self.size_limit();
        let section = &mut self.sections[self.current];
        let Some(size) = section.size().checked_add(count).filter(|&size| size <= limit) else {
            return Err(Error::SectionTooLarge {
                section: section.name.clone(),
                limit,
            });
        };
        match section.kind {
            SectionKind::Bss => section.bss_size = size,
            _ => section.data.resize(size as usize, 0),
        }
        Ok(())
    }

    /// Pads the current section to a multiple of `align` and raises its
    /// alignment.
    pub fn align(&mut self, align: u64) -> Result<()> {
        let align = align.max(1);
        if align > self.size_limit() {
            return Err(Error::SectionTooLarge {
                section: self.sections[self.current].name.clone(),
                limit: self.size_limit(),
            });
        }
        let offset = self.offset();
        let padding = offset.next_multiple_of(align) - offset;
        self.emit_zeros(padding)?;
        let section = &mut self.sections[self.current];
        section.align = section.align.max(align);
        Ok(())
    }

    fn relocation(
        &self,
        section: usize,
        fixup: &Fixup,
        symbol: String,
        addend: i64,
    ) -> RelocationRecord {
        let r_type = fixup.kind.reloc_type();
        let is_local = !self.globals.contains(&symbol);
        let target = match self.labels.get(&symbol) {
            Some(label) if is_local && !r_type.keeps_symbol() => {
                return RelocationRecord {
                    offset: u64::from(fixup.offset),
                    target: RelocTarget::Section(label.section),
                    r_type,
                    addend: addend + label.offset as i64,
                };
            }
            _ => RelocTarget::Symbol(symbol),
        };
        tracing::trace!(section, offset = fixup.offset, %r_type, "kept symbol relocation");
        RelocationRecord {
            offset: u64::from(fixup.offset),
            target,
            r_type,
            addend,
        }
    }

    /// Resolves fixups and produces the object.
    pub fn finish(mut self) -> Result<ObjectFile> {
        let endian = self.config.endian();
        let mut referenced = Vec::new();
        let mut relocations = Vec::with_capacity(self.sections.len());
        for index in 0..self.sections.len() {
            let fixups = std::mem::take(&mut self.sections[index].fixups);
            let mut records = Vec::new();
            for fixup in &fixups {
                let lookup = |name: &str| self.constants.get(name).copied();
                let Some(target) = fixup.expr.to_relocatable(&lookup) else {
                    return Err(Error::Internal(format!(
                        "unrelocatable fixup {} in {}",
                        fixup.expr, self.sections[index].name
                    )));
                };
                match target.symbol {
                    None => reloc::apply(
                        fixup.kind.reloc_type(),
                        &mut self.sections[index].data,
                        fixup.offset as usize,
                        target.addend,
                        endian,
                    )
                    .map_err(|err| {
                        if fixup.span.is_unknown() {
                            err
                        } else {
                            Error::Assembly(vec![Diagnostic::new(fixup.span, err.to_string())])
                        }
                    })?,
                    Some(symbol) => {
                        if !self.labels.contains_key(&symbol) && !referenced.contains(&symbol) {
                            referenced.push(symbol.clone());
                        }
                        records.push(self.relocation(index, fixup, symbol, target.addend));
                    }
                }
            }
            relocations.push(records);
        }

        let mut symbols = Vec::new();
        for name in &self.label_order {
            let label = self.labels[name];
            let binding = if self.globals.contains(name) {
                Binding::Global
            } else {
                Binding::Local
            };
            symbols.push(SymbolDef {
                name: name.clone(),
                section: Some(label.section),
                value: label.offset,
                binding,
            });
        }
        // Globals declared but never defined, then plain undefined references.
        for name in self.global_order.iter().chain(&referenced) {
            if !self.labels.contains_key(name) && !symbols.iter().any(|s| &s.name == name) {
                symbols.push(SymbolDef {
                    name: name.clone(),
                    section: None,
                    value: 0,
                    binding: Binding::Global,
                });
            }
        }

        let sections = self
            .sections
            .into_iter()
            .zip(relocations)
            .map(|(pending, relocations)| Section {
                size: pending.size(),
                name: pending.name,
                kind: pending.kind,
                data: pending.data,
                align: pending.align,
                relocations,
            })
            .collect();
        Ok(ObjectFile {
            config: self.config,
            sections,
            symbols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{AluCode, BranchTarget, CondCode, Register, Value};
    use crate::reloc::RelocType;

    fn add_label(streamer: &mut ObjectStreamer, label: &str) {
        streamer
            .emit_instruction(&Instruction::AluImm {
                op: AluCode::ADD,
                set_flags: false,
                rd: Register::R1,
                rs1: Register::R2,
                imm: Value::Expr(Expr::symbol(label)),
            })
            .unwrap();
    }

    #[test]
    fn local_label_folds_into_section_symbol() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.emit_bytes(&[0; 8]).unwrap();
        s.define_label("here").unwrap();
        s.emit_value(&Expr::symbol("here"), 1).unwrap();
        let obj = s.finish().unwrap();
        let text = obj.section(".text").unwrap();
        assert_eq!(
            text.relocations,
            vec![RelocationRecord {
                offset: 8,
                target: RelocTarget::Section(0),
                r_type: RelocType::Abs8,
                addend: 8,
            }]
        );
    }

    #[test]
    fn whitelisted_relocations_keep_the_symbol() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.define_label("here").unwrap();
        s.emit_value(&Expr::symbol("here"), 4).unwrap();
        let obj = s.finish().unwrap();
        let reloc = &obj.section(".text").unwrap().relocations[0];
        assert_eq!(reloc.target, RelocTarget::Symbol("here".into()));
        assert_eq!(reloc.addend, 0);
    }

    #[test]
    fn immediate_fixup_against_undefined_symbol() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        add_label(&mut s, "extern_val");
        let obj = s.finish().unwrap();
        let reloc = &obj.section(".text").unwrap().relocations[0];
        assert_eq!(reloc.r_type, RelocType::Imm16);
        assert_eq!(reloc.target, RelocTarget::Symbol("extern_val".into()));
        let sym = obj.symbol("extern_val").unwrap();
        assert_eq!(sym.section, None);
        assert_eq!(sym.binding, Binding::Global);
    }

    #[test]
    fn constants_patch_in_place() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.define_constant("K", 0x1234).unwrap();
        s.emit_value(&Expr::symbol("K"), 2).unwrap();
        let obj = s.finish().unwrap();
        let text = obj.section(".text").unwrap();
        assert_eq!(text.data, vec![0x34, 0x12]);
        assert!(text.relocations.is_empty());
    }

    #[test]
    fn redefinition_is_rejected() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.define_label("x").unwrap();
        assert!(matches!(s.define_label("x"), Err(Error::DuplicateSymbol(_))));
        assert!(s.define_constant("x", 1).is_err());
    }

    #[test]
    fn bss_only_grows() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.switch_section(".bss");
        s.emit_zeros(6).unwrap();
        s.align(4).unwrap();
        assert_eq!(s.offset(), 8);
        assert!(s.emit_bytes(&[1]).is_err());
        let obj = s.finish().unwrap();
        let bss = obj.section(".bss").unwrap();
        assert_eq!((bss.size, bss.data.len(), bss.align), (8, 0, 4));
    }

    #[test]
    fn sections_stop_at_the_address_space() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.emit_zeros(0x1_0000).unwrap();
        assert!(matches!(s.emit_zeros(1), Err(Error::SectionTooLarge { limit: 0x1_0000, .. })));
        s.switch_section(".bss");
        s.emit_zeros(8).unwrap();
        assert!(s.emit_zeros(u64::MAX).is_err());
        assert!(s.align(1 << 40).is_err());
        assert_eq!(s.offset(), 8);
    }

    #[test]
    fn constant_data_is_range_checked() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.define_constant("K", 300).unwrap();
        let err = s.emit_value(&Expr::symbol("K"), 1).unwrap_err();
        assert!(matches!(err, Error::ValueOutOfRange { value: 300, .. }));
        s.emit_value(&Expr::Constant(-1), 2).unwrap();
        assert_eq!(s.offset(), 2);
    }

    #[test]
    fn constant_fixups_report_their_statement() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.set_location(Span::new(3, 9));
        s.emit_instruction(&Instruction::Branch {
            cond: CondCode::T,
            target: BranchTarget::Value(Value::Expr(Expr::symbol("T"))),
        })
        .unwrap();
        s.define_constant("T", 402).unwrap();
        match s.finish() {
            Err(Error::Assembly(diags)) => {
                assert_eq!(diags.len(), 1);
                assert!(diags[0].to_string().starts_with("3:9: error: "), "{}", diags[0]);
            }
            other => panic!("expected a positioned error, got {other:?}"),
        }
    }

    #[test]
    fn elf_output_starts_with_magic() {
        let mut s = ObjectStreamer::new(&TargetConfig::pios());
        s.declare_global("main");
        s.define_label("main").unwrap();
        s.emit_instruction(&Instruction::ret()).unwrap();
        let bytes = s.finish().unwrap().to_elf().unwrap();
        assert_eq!(&bytes[..4], b"\x7fELF");
    }
}
