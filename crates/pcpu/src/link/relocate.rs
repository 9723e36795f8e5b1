//! Symbol resolution and relocation application over a laid-out image.

use std::collections::{BTreeMap, HashMap};

use super::input::{InputObject, InputRelocation, SymbolPlace};
use crate::mc::Binding;
use crate::reloc::{self, RelocType};
use crate::target::Endianness;
use crate::{Error, Result};

/// Final addresses of every input section, indexed `[object][section]`.
pub type SectionAddresses = Vec<Vec<u64>>;

/// Global symbols of the link with their defining object.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: BTreeMap<String, (usize, u64)>,
}

impl SymbolTable {
    /// Collects global definitions, rejecting duplicates.
    pub fn build(objects: &[InputObject], addresses: &SectionAddresses) -> Result<Self> {
        let mut globals: BTreeMap<String, (usize, u64)> = BTreeMap::new();
        for (obj_index, object) in objects.iter().enumerate() {
            for symbol in &object.symbols {
                if symbol.binding != Binding::Global || symbol.is_section {
                    continue;
                }
                let address = match symbol.place {
                    SymbolPlace::Undefined => continue,
                    SymbolPlace::Absolute => symbol.value,
                    SymbolPlace::Section(s) => addresses[obj_index][s] + symbol.value,
                };
                if let Some(&(previous, _)) = globals.get(&symbol.name) {
                    tracing::debug!(
                        symbol = %symbol.name,
                        first = %objects[previous].name,
                        second = %object.name,
                        "duplicate definition"
                    );
                    return Err(Error::DuplicateSymbol(symbol.name.clone()));
                }
                globals.insert(symbol.name.clone(), (obj_index, address));
            }
        }
        Ok(Self { globals })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.globals.get(name).map(|&(_, address)| address)
    }

    /// Name → address, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.globals
            .iter()
            .map(|(name, &(_, address))| (name.as_str(), address))
    }
}

/// Resolves the `S` of a relocation: section symbols and locals within their
/// object, everything else through the global table.
pub fn resolve_symbol(
    object: &InputObject,
    obj_index: usize,
    symbol: usize,
    addresses: &SectionAddresses,
    globals: &SymbolTable,
) -> Result<u64> {
    let sym = &object.symbols[symbol];
    match sym.place {
        SymbolPlace::Section(s) if sym.is_section => Ok(addresses[obj_index][s]),
        SymbolPlace::Section(s) if sym.binding == Binding::Local => {
            Ok(addresses[obj_index][s] + sym.value)
        }
        SymbolPlace::Absolute if sym.binding == Binding::Local => Ok(sym.value),
        _ => globals
            .get(&sym.name)
            .ok_or_else(|| Error::UndefinedSymbol(sym.name.clone())),
    }
}

/// Applies one relocation to `section`, the image bytes of the section it
/// belongs to. The field receives `S + A`.
pub fn apply_relocation(
    section: &mut [u8],
    relocation: &InputRelocation,
    symbol_name: &str,
    symbol_value: u64,
    endian: Endianness,
) -> Result<()> {
    let Some(r_type) = RelocType::from_code(relocation.r_type) else {
        return Err(Error::UnknownRelocation {
            r_type: relocation.r_type,
            symbol: symbol_name.to_string(),
        });
    };
    if r_type == RelocType::None {
        return Ok(());
    }
    let value = (symbol_value as i64).wrapping_add(relocation.addend);
    tracing::trace!(%r_type, symbol = symbol_name, value, offset = relocation.offset, "relocate");
    reloc::apply(r_type, section, relocation.offset as usize, value, endian)
}

/// Applies every relocation of every input onto `image`, which starts at
/// `base`.
pub fn relocate_all(
    image: &mut [u8],
    base: u64,
    objects: &[InputObject],
    addresses: &SectionAddresses,
    globals: &SymbolTable,
    endian: Endianness,
) -> Result<()> {
    let mut applied = HashMap::<RelocType, usize>::new();
    for (obj_index, object) in objects.iter().enumerate() {
        for (sec_index, section) in object.sections.iter().enumerate() {
            if section.relocations.is_empty() {
                continue;
            }
            let start = (addresses[obj_index][sec_index] - base) as usize;
            let end = start + section.size as usize;
            let Some(bytes) = image.get_mut(start..end) else {
                return Err(Error::Internal(format!(
                    "{}:{} lies outside the image",
                    object.name, section.name
                )));
            };
            for relocation in &section.relocations {
                let name = &object.symbols[relocation.symbol].name;
                let value = resolve_symbol(object, obj_index, relocation.symbol, addresses, globals)?;
                apply_relocation(bytes, relocation, name, value, endian)?;
                if let Some(r_type) = RelocType::from_code(relocation.r_type) {
                    *applied.entry(r_type).or_default() += 1;
                }
            }
        }
    }
    tracing::debug!(?applied, "applied relocations");
    Ok(())
}
