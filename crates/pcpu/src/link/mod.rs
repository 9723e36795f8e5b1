// Static linker: reads objects, lays out sections and applies relocations.

#![allow(
    clippy::cast_possible_truncation, // image offsets fit in usize on supported hosts
    clippy::cast_possible_wrap        // S + A is computed in two's complement
)]

mod input;
mod relocate;

use std::collections::BTreeMap;

pub use input::{InputObject, InputRelocation, InputSection, InputSymbol, SymbolPlace};
pub use relocate::{SymbolTable, apply_relocation, resolve_symbol};

use crate::mc::SectionKind;
use crate::target::TargetConfig;
use crate::{Error, Result};

/// Program entry symbol required by default.
pub const DEFAULT_ENTRY: &str = "__start";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Entry symbol that must be defined; `None` for `-nostdlib` style links.
    pub entry: Option<String>,
    pub base_address: u64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            entry: Some(DEFAULT_ENTRY.to_string()),
            base_address: crate::abi::LINK_BASE_ADDRESS,
        }
    }
}

/// A flat executable image and its resolved symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedImage {
    pub base_address: u64,
    /// `.text`, `.data` and zero-filled `.bss`, in that order.
    pub image: Vec<u8>,
    pub entry: Option<u64>,
    pub symbols: BTreeMap<String, u64>,
    /// End address of each output region.
    pub text_end: u64,
    pub data_end: u64,
}

impl LinkedImage {
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// The bytes at `address`, relative to the base.
    #[must_use]
    pub fn bytes_at(&self, address: u64, len: usize) -> Option<&[u8]> {
        let start = address.checked_sub(self.base_address)? as usize;
        self.image.get(start..start + len)
    }
}

/// Collects input objects and links them.
pub struct Linker {
    config: TargetConfig,
    options: LinkOptions,
    objects: Vec<InputObject>,
}

impl Linker {
    #[must_use]
    pub fn new(config: &TargetConfig, options: LinkOptions) -> Self {
        Self {
            config: config.clone(),
            options,
            objects: Vec::new(),
        }
    }

    /// Parses and queues an ELF object.
    pub fn add_object(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let object = InputObject::parse(name, bytes, &self.config)?;
        self.objects.push(object);
        Ok(())
    }

    fn layout(&self) -> (Vec<Vec<u64>>, [u64; 3]) {
        let mut addresses: Vec<Vec<u64>> = self
            .objects
            .iter()
            .map(|o| vec![0; o.sections.len()])
            .collect();
        let mut cursor = self.options.base_address;
        let mut ends = [0; 3];
        for (region, kind) in [SectionKind::Text, SectionKind::Data, SectionKind::Bss]
            .into_iter()
            .enumerate()
        {
            for (obj_index, object) in self.objects.iter().enumerate() {
                for (sec_index, section) in object.sections.iter().enumerate() {
                    if section.kind != kind {
                        continue;
                    }
                    cursor = cursor.next_multiple_of(section.align.max(1));
                    addresses[obj_index][sec_index] = cursor;
                    tracing::trace!(
                        object = %object.name,
                        section = %section.name,
                        address = cursor,
                        size = section.size,
                        "placed section"
                    );
                    cursor += section.size;
                }
            }
            ends[region] = cursor;
        }
        (addresses, ends)
    }

    pub fn link(&self) -> Result<LinkedImage> {
        let base = self.options.base_address;
        let (addresses, [text_end, data_end, bss_end]) = self.layout();

        let mut image = vec![0u8; (bss_end - base) as usize];
        for (obj_index, object) in self.objects.iter().enumerate() {
            for (sec_index, section) in object.sections.iter().enumerate() {
                if section.kind == SectionKind::Bss || section.data.is_empty() {
                    continue;
                }
                let start = (addresses[obj_index][sec_index] - base) as usize;
                image[start..start + section.data.len()].copy_from_slice(&section.data);
            }
        }

        let globals = SymbolTable::build(&self.objects, &addresses)?;
        relocate::relocate_all(
            &mut image,
            base,
            &self.objects,
            &addresses,
            &globals,
            self.config.endian(),
        )?;

        let entry = match &self.options.entry {
            Some(name) => Some(
                globals
                    .get(name)
                    .ok_or_else(|| Error::MissingEntry(name.clone()))?,
            ),
            None => None,
        };
        let symbols = globals
            .iter()
            .map(|(name, address)| (name.to_string(), address))
            .collect();
        tracing::debug!(
            objects = self.objects.len(),
            size = image.len(),
            text_end,
            data_end,
            "linked image"
        );
        Ok(LinkedImage {
            base_address: base,
            image,
            entry,
            symbols,
            text_end,
            data_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::assemble;

    fn object(source: &str) -> Vec<u8> {
        assemble(source, &TargetConfig::pios())
            .unwrap()
            .to_elf()
            .unwrap()
    }

    fn link(sources: &[&str], options: LinkOptions) -> Result<LinkedImage> {
        let mut linker = Linker::new(&TargetConfig::pios(), options);
        for (i, source) in sources.iter().enumerate() {
            linker.add_object(&format!("{i}.o"), &object(source))?;
        }
        linker.link()
    }

    fn word(image: &LinkedImage, address: u64) -> u32 {
        u32::from_le_bytes(image.bytes_at(address, 4).unwrap().try_into().unwrap())
    }

    #[test]
    fn relocated_immediate_matches_direct_encoding() {
        let linked = link(
            &[
                ".globl __start\n__start: add r1, r2, target\n",
                ".zero 96\n.globl target\ntarget: nop\n",
            ],
            LinkOptions::default(),
        )
        .unwrap();
        assert_eq!(linked.symbol("target"), Some(100));
        let direct = link(&["__start: add r1, r2, 100\n.globl __start\n"], LinkOptions::default())
            .unwrap();
        assert_eq!(word(&linked, 0), word(&direct, 0));
        assert_eq!(linked.entry, Some(0));
    }

    #[test]
    fn regions_are_laid_out_in_order() {
        let linked = link(
            &[
                ".globl __start\n__start: ret\n.data\nd1: .byte 1\n.bss\n.globl b1\nb1: .zero 4\n",
                ".data\n.align 2\n.globl d2\nd2: .short d2\n",
            ],
            LinkOptions::default(),
        )
        .unwrap();
        assert_eq!(linked.text_end, 4);
        assert_eq!(linked.symbol("d2"), Some(6));
        assert_eq!(linked.data_end, 8);
        assert_eq!(linked.symbol("b1"), Some(8));
        assert_eq!(linked.image.len(), 12);
        assert_eq!(linked.bytes_at(6, 2).unwrap(), &[6, 0]);
        assert_eq!(linked.bytes_at(8, 4).unwrap(), &[0; 4]);
    }

    #[test]
    fn local_labels_do_not_clash_across_objects() {
        let linked = link(
            &[
                ".globl __start\n__start: jmp loop\nloop: ret\n",
                "nop\nloop: jmp loop\n",
            ],
            LinkOptions::default(),
        )
        .unwrap();
        assert_eq!(word(&linked, 0) >> 16, 1);
        assert_eq!(word(&linked, 12) >> 16, 3);
    }

    #[test]
    fn call_targets_resolve_across_objects() {
        let linked = link(
            &[".globl __start\n__start: call helper\n", "nop\n.globl helper\nhelper: ret\n"],
            LinkOptions::default(),
        )
        .unwrap();
        assert_eq!(word(&linked, 0) >> 7, 2);
    }

    #[test]
    fn duplicate_globals_fail() {
        let err = link(
            &[".globl f\nf: nop\n", ".globl f\nf: nop\n"],
            LinkOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateSymbol(name) if name == "f"));
    }

    #[test]
    fn undefined_symbols_fail() {
        let err = link(&[".globl __start\n__start: call missing\n"], LinkOptions::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "undefined symbol: missing");
    }

    #[test]
    fn entry_is_required_unless_disabled() {
        let err = link(&["nop\n"], LinkOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingEntry(_)));
        let options = LinkOptions {
            entry: None,
            ..LinkOptions::default()
        };
        let linked = link(&["nop\n"], options).unwrap();
        assert_eq!(linked.entry, None);
    }

    #[test]
    fn base_address_shifts_symbols() {
        let options = LinkOptions {
            entry: None,
            base_address: 0x100,
        };
        let linked = link(&[".data\n.globl v\nv: .short v\n"], options).unwrap();
        assert_eq!(linked.symbol("v"), Some(0x100));
        assert_eq!(linked.bytes_at(0x100, 2).unwrap(), &[0x00, 0x01]);
    }
}
