//! Shared vocabulary types for objects and their DWARF sections.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Selects every section group when opening a session.
pub const GROUP_ANY: u32 = 0;

/// The base section group, holding non-split DWARF sections.
pub const GROUP_BASE: u32 = 1;

/// The group holding `.dwo` split-DWARF sections.
pub const GROUP_DWO: u32 = 2;

/// The first group number assigned to named COMDAT groups.
pub const GROUP_FIRST_COMDAT: u32 = 3;

/// An error returned for unknown or invalid [`FileFormat`] names.
///
/// [`FileFormat`]: enum.FileFormat.html
#[derive(Debug)]
pub struct UnknownFileFormatError;

impl fmt::Display for UnknownFileFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown file format")
    }
}

impl std::error::Error for UnknownFileFormatError {}

/// The physical container format of an object file.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum FileFormat {
    /// An unknown file format.
    Unknown,
    /// Executable and Linkable Format, used on Linux.
    Elf,
    /// Mach Objects, used on macOS and iOS derivatives.
    MachO,
    /// Portable Executable, an extension of COFF used on Windows.
    Pe,
}

impl FileFormat {
    /// Returns the name of the file format.
    pub fn name(self) -> &'static str {
        match self {
            FileFormat::Unknown => "unknown",
            FileFormat::Elf => "elf",
            FileFormat::MachO => "macho",
            FileFormat::Pe => "pe",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileFormat {
    type Err = UnknownFileFormatError;

    fn from_str(string: &str) -> Result<FileFormat, UnknownFileFormatError> {
        Ok(match string {
            "elf" => FileFormat::Elf,
            "macho" => FileFormat::MachO,
            "pe" => FileFormat::Pe,
            _ => return Err(UnknownFileFormatError),
        })
    }
}

/// The designated use of an object file.
///
/// The reader mostly cares about [`Relocatable`](#variant.Relocatable):
/// relocatable objects carry unapplied relocations against their DWARF
/// sections, which the front end resolves before handing the bytes out.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum ObjectKind {
    /// No object class is specified in the header.
    None,

    /// An intermediate object file (`.o`), with sections not yet placed and
    /// relocations not yet applied.
    Relocatable,

    /// A standard executable program.
    Executable,

    /// A dynamic shared library.
    Library,

    /// A core dump.
    Dump,

    /// A stripped-out debug companion file.
    Debug,

    /// Any other valid object class.
    Other,
}

impl ObjectKind {
    /// Returns the name of the object kind.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::None => "none",
            ObjectKind::Relocatable => "rel",
            ObjectKind::Executable => "exe",
            ObjectKind::Library => "lib",
            ObjectKind::Dump => "dump",
            ObjectKind::Debug => "dbg",
            ObjectKind::Other => "other",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A well-known DWARF section.
///
/// Section identifiers abstract over the container-specific spellings:
/// `.debug_info` in ELF, `__debug_info` in Mach-O, `.debug_info.dwo` in
/// split-DWARF objects and `.zdebug_info` for GNU-compressed data all map to
/// [`DebugInfo`](#variant.DebugInfo).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
#[non_exhaustive]
pub enum SectionId {
    /// `.debug_info`: DIE trees of all compilation units.
    DebugInfo,
    /// `.debug_types`: DWARF 4 type units.
    DebugTypes,
    /// `.debug_abbrev`: abbreviation declarations.
    DebugAbbrev,
    /// `.debug_str`: string data referenced via `strp`.
    DebugStr,
    /// `.debug_line`: line number programs.
    DebugLine,
    /// `.debug_line_str`: string data referenced from line headers.
    DebugLineStr,
    /// `.debug_str_offsets`: string offset tables for `strx` forms.
    DebugStrOffsets,
    /// `.debug_addr`: address tables for `addrx` forms.
    DebugAddr,
    /// `.debug_ranges`: DWARF 2-4 address range lists.
    DebugRanges,
    /// `.debug_rnglists`: DWARF 5 address range lists.
    DebugRngLists,
    /// `.debug_loc`: DWARF 2-4 location lists.
    DebugLoc,
    /// `.debug_loclists`: DWARF 5 location lists.
    DebugLocLists,
    /// `.debug_macinfo`: DWARF 2-4 macro information.
    DebugMacinfo,
    /// `.debug_macro`: DWARF 5 macro information.
    DebugMacro,
    /// `.debug_frame`: call frame information.
    DebugFrame,
    /// `.eh_frame`: call frame information for exception handling.
    EhFrame,
    /// `.debug_aranges`: address range lookup tables.
    DebugAranges,
    /// `.debug_cu_index` / `.debug_tu_index`: DWARF package indexes.
    DebugCuIndex,
    /// `.gnu_debuglink`: the name and CRC of a debug companion file.
    GnuDebugLink,
}

impl SectionId {
    /// All identifiers the registry scans for.
    pub const ALL: &'static [SectionId] = &[
        SectionId::DebugInfo,
        SectionId::DebugTypes,
        SectionId::DebugAbbrev,
        SectionId::DebugStr,
        SectionId::DebugLine,
        SectionId::DebugLineStr,
        SectionId::DebugStrOffsets,
        SectionId::DebugAddr,
        SectionId::DebugRanges,
        SectionId::DebugRngLists,
        SectionId::DebugLoc,
        SectionId::DebugLocLists,
        SectionId::DebugMacinfo,
        SectionId::DebugMacro,
        SectionId::DebugFrame,
        SectionId::EhFrame,
        SectionId::DebugAranges,
        SectionId::DebugCuIndex,
        SectionId::GnuDebugLink,
    ];

    /// The canonical ELF name of this section.
    pub fn name(self) -> &'static str {
        match self {
            SectionId::DebugInfo => ".debug_info",
            SectionId::DebugTypes => ".debug_types",
            SectionId::DebugAbbrev => ".debug_abbrev",
            SectionId::DebugStr => ".debug_str",
            SectionId::DebugLine => ".debug_line",
            SectionId::DebugLineStr => ".debug_line_str",
            SectionId::DebugStrOffsets => ".debug_str_offsets",
            SectionId::DebugAddr => ".debug_addr",
            SectionId::DebugRanges => ".debug_ranges",
            SectionId::DebugRngLists => ".debug_rnglists",
            SectionId::DebugLoc => ".debug_loc",
            SectionId::DebugLocLists => ".debug_loclists",
            SectionId::DebugMacinfo => ".debug_macinfo",
            SectionId::DebugMacro => ".debug_macro",
            SectionId::DebugFrame => ".debug_frame",
            SectionId::EhFrame => ".eh_frame",
            SectionId::DebugAranges => ".debug_aranges",
            SectionId::DebugCuIndex => ".debug_cu_index",
            SectionId::GnuDebugLink => ".gnu_debuglink",
        }
    }

    /// Matches a container section name against the known identifiers.
    ///
    /// Returns the identifier along with whether the name carried a `.dwo`
    /// suffix and whether it used the `.zdebug_` compressed spelling.
    pub fn from_section_name(name: &str) -> Option<(SectionId, bool, bool)> {
        // Mach-O spells DWARF sections with two leading underscores.
        let name = match name.strip_prefix("__") {
            Some(rest) => Cow::Owned(format!(".{}", rest)),
            None => Cow::Borrowed(name),
        };

        let (name, is_dwo) = match name.strip_suffix(".dwo") {
            Some(rest) => (rest, true),
            None => (name.as_ref(), false),
        };

        let (name, compressed) = match name.strip_prefix(".zdebug_") {
            Some(rest) => (Cow::Owned(format!(".debug_{}", rest)), true),
            None => (Cow::Borrowed(name), false),
        };

        let id = Self::ALL
            .iter()
            .copied()
            .find(|id| id.name() == name.as_ref())?;
        Some((id, is_dwo, compressed))
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A symbol from an object's symbol table.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Symbol<'data> {
    /// The name of the symbol, generally mangled.
    pub name: Option<Cow<'data, str>>,

    /// The relative address of this symbol.
    pub address: u64,

    /// The size of this symbol, if known.
    pub size: u64,
}

impl<'data> Symbol<'data> {
    /// Returns the name of this symbol as string.
    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(Cow::as_ref)
    }

    /// Determines whether the given address is covered by this symbol.
    ///
    /// If the size is unknown (zero), every address at or after the symbol
    /// address is considered covered.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && (self.size == 0 || address < self.address + self.size)
    }
}

impl fmt::Debug for Symbol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name().unwrap_or("<unknown>"))
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// A sorted list of symbols, suitable for address lookups.
///
/// Symbols are sorted by address on construction and sizes of zero-sized
/// symbols are filled in from the offset to the next symbol, so lookups can
/// use binary search.
#[derive(Clone, Debug, Default)]
pub struct SymbolMap<'data> {
    symbols: Vec<Symbol<'data>>,
}

impl<'data> SymbolMap<'data> {
    /// Creates a new, empty symbol map.
    pub fn new() -> Self {
        SymbolMap {
            symbols: Vec::new(),
        }
    }

    /// Looks up the symbol covering the given address.
    pub fn lookup(&self, address: u64) -> Option<&Symbol<'data>> {
        let index = match self.symbols.binary_search_by_key(&address, |s| s.address) {
            Ok(index) => index,
            Err(0) => return None,
            Err(next) => next - 1,
        };

        let symbol = &self.symbols[index];
        symbol.contains(address).then_some(symbol)
    }

    /// Looks up a symbol starting exactly at the given address.
    pub fn lookup_exact(&self, address: u64) -> Option<&Symbol<'data>> {
        let index = self
            .symbols
            .binary_search_by_key(&address, |s| s.address)
            .ok()?;
        self.symbols.get(index)
    }

    /// Returns an iterator over all symbols, ordered by address.
    pub fn iter(&self) -> std::slice::Iter<'_, Symbol<'data>> {
        self.symbols.iter()
    }

    /// The number of symbols in this map.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if there are no symbols in this map.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl<'data> From<Vec<Symbol<'data>>> for SymbolMap<'data> {
    fn from(mut symbols: Vec<Symbol<'data>>) -> Self {
        symbols.sort_by_key(|symbol| symbol.address);

        // Fill in sizes from the gap to the next symbol where missing.
        for index in 1..symbols.len() {
            let next_address = symbols[index].address;
            let symbol = &mut symbols[index - 1];
            if symbol.size == 0 {
                symbol.size = next_address - symbol.address;
            }
        }

        SymbolMap { symbols }
    }
}

impl<'data> FromIterator<Symbol<'data>> for SymbolMap<'data> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Symbol<'data>>,
    {
        Vec::from_iter(iter).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_id_from_name() {
        assert_eq!(
            SectionId::from_section_name(".debug_info"),
            Some((SectionId::DebugInfo, false, false))
        );
        assert_eq!(
            SectionId::from_section_name(".debug_info.dwo"),
            Some((SectionId::DebugInfo, true, false))
        );
        assert_eq!(
            SectionId::from_section_name(".zdebug_line"),
            Some((SectionId::DebugLine, false, true))
        );
        assert_eq!(
            SectionId::from_section_name("__debug_str"),
            Some((SectionId::DebugStr, false, false))
        );
        assert_eq!(SectionId::from_section_name(".text"), None);
    }

    #[test]
    fn test_symbol_map_sizes() {
        let map = SymbolMap::from(vec![
            Symbol {
                name: Some("b".into()),
                address: 0x4200,
                size: 0,
            },
            Symbol {
                name: Some("a".into()),
                address: 0x4000,
                size: 0,
            },
        ]);

        assert_eq!(map.lookup(0x4100).unwrap().name(), Some("a"));
        assert_eq!(map.lookup(0x4100).unwrap().size, 0x200);
        assert!(map.lookup(0x3fff).is_none());
        assert_eq!(map.lookup_exact(0x4200).unwrap().name(), Some("b"));
    }
}
