//! Reading relocatable ELF32 objects back into linker input.

use std::collections::HashMap;

use object::read::elf::{ElfFile32, FileHeader as _};
use object::{
    Object, ObjectSection, ObjectSymbol, RelocationFlags, RelocationTarget, SymbolKind,
    SymbolSection,
};

use crate::mc::{Binding, SectionKind};
use crate::target::TargetConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRelocation {
    pub offset: u64,
    /// Index into [`InputObject::symbols`].
    pub symbol: usize,
    /// Raw relocation code; decoded when applied.
    pub r_type: u32,
    pub addend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSection {
    pub name: String,
    pub kind: SectionKind,
    pub data: Vec<u8>,
    pub size: u64,
    pub align: u64,
    pub relocations: Vec<InputRelocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolPlace {
    Undefined,
    Absolute,
    /// Index into [`InputObject::sections`].
    Section(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSymbol {
    /// Section symbols carry their section's name.
    pub name: String,
    pub place: SymbolPlace,
    pub value: u64,
    pub binding: Binding,
    pub is_section: bool,
}

/// One parsed object file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputObject {
    pub name: String,
    pub sections: Vec<InputSection>,
    pub symbols: Vec<InputSymbol>,
}

fn section_kind(kind: object::SectionKind) -> Option<SectionKind> {
    match kind {
        object::SectionKind::Text => Some(SectionKind::Text),
        object::SectionKind::Data | object::SectionKind::ReadOnlyData => Some(SectionKind::Data),
        object::SectionKind::UninitializedData => Some(SectionKind::Bss),
        _ => None,
    }
}

impl InputObject {
    /// Parses `data`, checking machine and byte order against `config`.
    pub fn parse(name: &str, data: &[u8], config: &TargetConfig) -> Result<Self> {
        let file = ElfFile32::<object::Endianness>::parse(data)?;
        let machine = file.elf_header().e_machine(file.endian());
        if machine != config.elf_machine {
            return Err(Error::InvalidObject(format!(
                "{name}: machine {machine:#x}, expected {:#x}",
                config.elf_machine
            )));
        }
        if file.is_little_endian() != (config.endian() == crate::target::Endianness::Little) {
            return Err(Error::InvalidObject(format!("{name}: byte order does not match target")));
        }

        let mut sections = Vec::new();
        let mut section_map = HashMap::new();
        for section in file.sections() {
            let Some(kind) = section_kind(section.kind()) else {
                if section.kind() == object::SectionKind::Other && section.size() != 0 {
                    tracing::warn!(
                        object = name,
                        section = section.name().unwrap_or_default(),
                        "ignoring section"
                    );
                }
                continue;
            };
            section_map.insert(section.index(), sections.len());
            let data = match kind {
                SectionKind::Bss => Vec::new(),
                _ => section.data()?.to_vec(),
            };
            sections.push(InputSection {
                name: section.name()?.to_string(),
                kind,
                data,
                size: section.size(),
                align: section.align().max(1),
                relocations: Vec::new(),
            });
        }

        let mut symbols = Vec::new();
        let mut symbol_map = HashMap::new();
        for symbol in file.symbols() {
            let place = match symbol.section() {
                SymbolSection::Section(index) => match section_map.get(&index) {
                    Some(&i) => SymbolPlace::Section(i),
                    None => continue,
                },
                SymbolSection::Absolute => SymbolPlace::Absolute,
                SymbolSection::Undefined => SymbolPlace::Undefined,
                _ => continue,
            };
            let is_section = symbol.kind() == SymbolKind::Section;
            let name = match place {
                SymbolPlace::Section(i) if is_section => sections[i].name.clone(),
                _ => symbol.name()?.to_string(),
            };
            symbol_map.insert(symbol.index(), symbols.len());
            symbols.push(InputSymbol {
                name,
                place,
                value: symbol.address(),
                binding: if symbol.is_local() {
                    Binding::Local
                } else {
                    Binding::Global
                },
                is_section,
            });
        }

        for section in file.sections() {
            let Some(&target) = section_map.get(&section.index()) else {
                continue;
            };
            for (offset, reloc) in section.relocations() {
                let RelocationFlags::Elf { r_type } = reloc.flags() else {
                    return Err(Error::InvalidObject(format!("{name}: non-ELF relocation")));
                };
                let RelocationTarget::Symbol(index) = reloc.target() else {
                    return Err(Error::InvalidObject(format!(
                        "{name}: relocation at {offset:#x} has no symbol"
                    )));
                };
                let Some(&symbol) = symbol_map.get(&index) else {
                    return Err(Error::InvalidObject(format!(
                        "{name}: relocation at {offset:#x} against unknown symbol {}",
                        index.0
                    )));
                };
                sections[target].relocations.push(InputRelocation {
                    offset,
                    symbol,
                    r_type,
                    addend: reloc.addend(),
                });
            }
        }

        tracing::debug!(
            object = name,
            sections = sections.len(),
            symbols = symbols.len(),
            "read object"
        );
        Ok(Self {
            name: name.to_string(),
            sections,
            symbols,
        })
    }

    #[must_use]
    pub fn section(&self, name: &str) -> Option<&InputSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::assemble;
    use crate::reloc::RelocType;

    fn read(source: &str, config: &TargetConfig) -> InputObject {
        let bytes = assemble(source, config).unwrap().to_elf().unwrap();
        InputObject::parse("test.o", &bytes, config).unwrap()
    }

    #[test]
    fn sections_and_symbols_survive_the_round_trip() {
        let obj = read(
            ".globl main\nmain: nop\n.data\nv: .short 7\n.bss\n.zero 6\n",
            &TargetConfig::pios(),
        );
        let names: Vec<_> = obj.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [".text", ".data", ".bss"]);
        assert_eq!(obj.section(".data").unwrap().data, vec![7, 0]);
        assert_eq!(obj.section(".bss").unwrap().size, 6);
        let main = obj.symbols.iter().find(|s| s.name == "main").unwrap();
        assert_eq!(main.binding, Binding::Global);
        assert_eq!(main.place, SymbolPlace::Section(0));
    }

    #[test]
    fn relocations_keep_code_and_addend() {
        let obj = read(".data\n.word ext + 8\n", &TargetConfig::pios());
        let reloc = &obj.section(".data").unwrap().relocations[0];
        assert_eq!(reloc.r_type, RelocType::Abs32.code());
        assert_eq!(reloc.addend, 8);
        let symbol = &obj.symbols[reloc.symbol];
        assert_eq!(symbol.name, "ext");
        assert_eq!(symbol.place, SymbolPlace::Undefined);
    }

    #[test]
    fn big_endian_objects_parse() {
        let obj = read(".data\n.short 0x0102\n", &TargetConfig::wide());
        assert_eq!(obj.section(".data").unwrap().data, vec![1, 2]);
    }

    #[test]
    fn byte_order_mismatch_is_rejected() {
        let bytes = assemble("nop\n", &TargetConfig::wide())
            .unwrap()
            .to_elf()
            .unwrap();
        assert!(matches!(
            InputObject::parse("be.o", &bytes, &TargetConfig::pios()),
            Err(Error::InvalidObject(_))
        ));
    }
}
