//! In-memory relocatable object and its ELF32 serialization.

use object::elf;
use object::write::elf::{FileHeader, Rel, SectionHeader, Sym, Writer};

use crate::reloc::RelocType;
use crate::target::TargetConfig;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    Data,
    Bss,
}

impl SectionKind {
    /// Classifies a section by its conventional name prefix.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.starts_with(".text") {
            Self::Text
        } else if name.starts_with(".bss") {
            Self::Bss
        } else {
            Self::Data
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    /// Contents; empty for `.bss`.
    pub data: Vec<u8>,
    /// Size in bytes, including `.bss` space.
    pub size: u64,
    pub align: u64,
    pub relocations: Vec<RelocationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDef {
    pub name: String,
    /// Defining section, `None` for undefined symbols.
    pub section: Option<usize>,
    pub value: u64,
    pub binding: Binding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocTarget {
    Symbol(String),
    /// Folded into the section symbol of the given section.
    Section(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationRecord {
    pub offset: u64,
    pub target: RelocTarget,
    pub r_type: RelocType,
    pub addend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFile {
    pub config: TargetConfig,
    pub sections: Vec<Section>,
    pub symbols: Vec<SymbolDef>,
}

const fn st_info(bind: u8, kind: u8) -> u8 {
    (bind << 4) | (kind & 0xF)
}

impl ObjectFile {
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&SymbolDef> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Serializes to an ELF32 relocatable file in the target byte order.
    pub fn to_elf(&self) -> Result<Vec<u8>> {
        let rela_names: Vec<Vec<u8>> = self
            .sections
            .iter()
            .map(|s| format!(".rela{}", s.name).into_bytes())
            .collect();
        let locals: Vec<&SymbolDef> = self
            .symbols
            .iter()
            .filter(|s| s.binding == Binding::Local)
            .collect();
        let globals: Vec<&SymbolDef> = self
            .symbols
            .iter()
            .filter(|s| s.binding == Binding::Global)
            .collect();

        let mut buffer = Vec::new();
        {
            let mut writer = Writer::new(self.config.endian().into(), false, &mut buffer);
            writer.reserve_file_header();

            writer.reserve_null_section_index();
            let mut section_names = Vec::new();
            let mut section_indices = Vec::new();
            for section in &self.sections {
                section_names.push(writer.add_section_name(section.name.as_bytes()));
                section_indices.push(writer.reserve_section_index());
            }
            let mut rela_sections = Vec::new();
            for (i, section) in self.sections.iter().enumerate() {
                if !section.relocations.is_empty() {
                    let name = writer.add_section_name(&rela_names[i]);
                    writer.reserve_section_index();
                    rela_sections.push((i, name));
                }
            }
            let symtab_index = writer.reserve_symtab_section_index();
            writer.reserve_strtab_section_index();
            writer.reserve_shstrtab_section_index();

            // Symbols: null, section symbols, locals, then globals.
            writer.reserve_null_symbol_index();
            let section_symbols: Vec<_> = section_indices
                .iter()
                .map(|&index| writer.reserve_symbol_index(Some(index)))
                .collect();
            let mut symbol_indices = std::collections::HashMap::new();
            let mut symbol_names = Vec::new();
            for sym in locals.iter().chain(globals.iter()) {
                let section = sym.section.map(|s| section_indices[s]);
                let index = writer.reserve_symbol_index(section);
                symbol_indices.insert(sym.name.as_str(), index);
                symbol_names.push(writer.add_string(sym.name.as_bytes()));
            }
            let num_local = 1 + section_symbols.len() + locals.len();

            let data_offsets: Vec<usize> = self
                .sections
                .iter()
                .map(|s| match s.kind {
                    SectionKind::Bss => 0,
                    _ => writer.reserve(s.data.len(), s.align as usize),
                })
                .collect();
            let rela_offsets: Vec<usize> = rela_sections
                .iter()
                .map(|&(i, _)| writer.reserve_relocations(self.sections[i].relocations.len(), true))
                .collect();
            writer.reserve_symtab();
            writer.reserve_strtab();
            writer.reserve_shstrtab();
            writer.reserve_section_headers();

            writer.write_file_header(&FileHeader {
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                e_type: elf::ET_REL,
                e_machine: self.config.elf_machine,
                e_entry: 0,
                e_flags: 0,
            })?;

            for section in &self.sections {
                if section.kind != SectionKind::Bss && !section.data.is_empty() {
                    writer.write_align(section.align as usize);
                    writer.write(&section.data);
                }
            }
            for &(i, _) in &rela_sections {
                writer.write_align_relocation();
                for reloc in &self.sections[i].relocations {
                    let symbol = match &reloc.target {
                        RelocTarget::Section(s) => section_symbols[*s],
                        RelocTarget::Symbol(name) => match symbol_indices.get(name.as_str()) {
                            Some(&index) => index,
                            None => {
                                return Err(crate::Error::Internal(format!(
                                    "relocation against unknown symbol {name}"
                                )));
                            }
                        },
                    };
                    writer.write_relocation(
                        true,
                        &Rel {
                            r_offset: reloc.offset,
                            r_sym: symbol.0,
                            r_type: reloc.r_type.code(),
                            r_addend: reloc.addend,
                        },
                    );
                }
            }

            writer.write_null_symbol();
            for &index in &section_indices {
                writer.write_symbol(&Sym {
                    name: None,
                    section: Some(index),
                    st_info: st_info(elf::STB_LOCAL, elf::STT_SECTION),
                    st_other: elf::STV_DEFAULT,
                    st_shndx: 0,
                    st_value: 0,
                    st_size: 0,
                });
            }
            for (sym, &name) in locals.iter().chain(globals.iter()).zip(&symbol_names) {
                let bind = match sym.binding {
                    Binding::Local => elf::STB_LOCAL,
                    Binding::Global => elf::STB_GLOBAL,
                };
                writer.write_symbol(&Sym {
                    name: Some(name),
                    section: sym.section.map(|s| section_indices[s]),
                    st_info: st_info(bind, elf::STT_NOTYPE),
                    st_other: elf::STV_DEFAULT,
                    st_shndx: elf::SHN_UNDEF,
                    st_value: sym.value,
                    st_size: 0,
                });
            }
            writer.write_strtab();
            writer.write_shstrtab();

            writer.write_null_section_header();
            for (i, section) in self.sections.iter().enumerate() {
                let (sh_type, flags) = match section.kind {
                    SectionKind::Text => (elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_EXECINSTR),
                    SectionKind::Data => (elf::SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE),
                    SectionKind::Bss => (elf::SHT_NOBITS, elf::SHF_ALLOC | elf::SHF_WRITE),
                };
                writer.write_section_header(&SectionHeader {
                    name: Some(section_names[i]),
                    sh_type,
                    sh_flags: u64::from(flags),
                    sh_addr: 0,
                    sh_offset: data_offsets[i] as u64,
                    sh_size: section.size,
                    sh_link: 0,
                    sh_info: 0,
                    sh_addralign: section.align,
                    sh_entsize: 0,
                });
            }
            for (&(i, name), &offset) in rela_sections.iter().zip(&rela_offsets) {
                writer.write_relocation_section_header(
                    name,
                    section_indices[i],
                    symtab_index,
                    offset,
                    self.sections[i].relocations.len(),
                    true,
                );
            }
            writer.write_symtab_section_header(num_local as u32);
            writer.write_strtab_section_header();
            writer.write_shstrtab_section_header();
        }
        tracing::debug!(bytes = buffer.len(), sections = self.sections.len(), "wrote ELF object");
        Ok(buffer)
    }
}
