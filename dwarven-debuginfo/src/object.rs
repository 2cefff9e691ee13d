//! Container detection and the caller-supplied object reader interface.

use std::borrow::Cow;

use dwarven_common::{Arch, Endianness};

use crate::base::{FileFormat, ObjectKind};
use crate::elf::ElfObject;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::macho::MachObject;
use crate::pe::PeObject;

/// A decoded relocation record, normalized across record layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocationEntry {
    /// The offset within the target section to patch.
    pub offset: u64,
    /// The index of the symbol the relocation refers to.
    pub symbol: u32,
    /// The relocation type.
    pub rtype: u32,
    /// The second relocation type of MIPS64 compound records.
    pub rtype2: u8,
    /// The third relocation type of MIPS64 compound records.
    pub rtype3: u8,
    /// The explicit addend of `.rela` records; 0 for `.rel`.
    pub addend: i64,
    /// Whether the record came from a `.rela` section.
    pub is_rela: bool,
}

/// An object file of any supported container format.
pub enum Object<'data> {
    /// An ELF object.
    Elf(ElfObject<'data>),
    /// A Mach-O object.
    MachO(MachObject<'data>),
    /// A PE/COFF object.
    Pe(PeObject<'data>),
}

impl<'data> Object<'data> {
    /// Identifies the container format of the buffer by its magic bytes.
    pub fn peek(data: &[u8]) -> FileFormat {
        if ElfObject::test(data) {
            FileFormat::Elf
        } else if MachObject::test(data) {
            FileFormat::MachO
        } else if PeObject::test(data) {
            FileFormat::Pe
        } else {
            FileFormat::Unknown
        }
    }

    /// Tries to parse the buffer with the container format it advertises.
    pub fn parse(data: &'data [u8]) -> Result<Self, DwarfError> {
        match Self::peek(data) {
            FileFormat::Elf => ElfObject::parse(data).map(Object::Elf),
            FileFormat::MachO => MachObject::parse(data).map(Object::MachO),
            FileFormat::Pe => PeObject::parse(data).map(Object::Pe),
            FileFormat::Unknown => Err(DwarfErrorKind::BadMagic.into()),
        }
    }

    /// The container format of this object.
    pub fn file_format(&self) -> FileFormat {
        match self {
            Object::Elf(_) => FileFormat::Elf,
            Object::MachO(_) => FileFormat::MachO,
            Object::Pe(_) => FileFormat::Pe,
        }
    }

    /// The byte order of this object.
    pub fn endianness(&self) -> Endianness {
        match self {
            Object::Elf(elf) => elf.endianness(),
            Object::MachO(macho) => macho.endianness(),
            Object::Pe(pe) => pe.endianness(),
        }
    }

    /// The CPU architecture of this object.
    pub fn arch(&self) -> Arch {
        match self {
            Object::Elf(elf) => elf.arch(),
            Object::MachO(macho) => macho.arch(),
            Object::Pe(pe) => pe.arch(),
        }
    }

    /// The kind of this object.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Elf(elf) => elf.kind(),
            Object::MachO(macho) => macho.kind(),
            Object::Pe(pe) => pe.kind(),
        }
    }
}

impl std::fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Object::Elf(elf) => std::fmt::Debug::fmt(elf, f),
            Object::MachO(macho) => std::fmt::Debug::fmt(macho, f),
            Object::Pe(pe) => std::fmt::Debug::fmt(pe, f),
        }
    }
}

/// Descriptive information about one section of a custom object.
#[derive(Clone, Debug, Default)]
pub struct SectionInfo {
    /// The section name, in the container's own spelling.
    pub name: String,
    /// The size of the section in bytes.
    pub size: u64,
    /// The virtual address the section is mapped at.
    pub address: u64,
    /// The section this one links to (symbol tables, relocations).
    pub link: u32,
    /// Container-specific section flags.
    pub flags: u64,
    /// The size of one table entry for tabular sections.
    pub entrysize: u64,
}

/// The capability set a caller-supplied object must provide.
///
/// This is the memory-form boundary of the reader: implementers may be
/// in-memory images, file-backed readers or network-backed fetchers. All
/// contracts are synchronous; an implementation that needs cancellation
/// returns an error from `load_section` to abort in-progress parsing.
pub trait ObjectReader<'data> {
    /// The total size of the object in bytes.
    fn object_size(&self) -> u64;

    /// The byte order of the object.
    fn endianness(&self) -> Endianness;

    /// The pointer width of the object in bytes (4 or 8).
    fn pointer_size(&self) -> u8;

    /// The machine architecture, when known.
    fn machine_type(&self) -> Arch {
        Arch::Unknown
    }

    /// The kind of the object; relocatable objects get their relocations
    /// applied.
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Other
    }

    /// The number of sections.
    fn section_count(&self) -> usize;

    /// Descriptive information for the section at `index`.
    fn section_info(&self, index: usize) -> Result<SectionInfo, DwarfError>;

    /// The contents of the section at `index`.
    fn load_section(&self, index: usize) -> Result<Cow<'data, [u8]>, DwarfError>;

    /// The relocations applying to the section at `index`.
    fn relocations(&self, index: usize) -> Result<Vec<RelocationEntry>, DwarfError> {
        let _ = index;
        Ok(Vec::new())
    }

    /// The value of the symbol at `index`, for relocation resolution.
    fn symbol_value(&self, index: u32) -> Option<u64> {
        let _ = index;
        None
    }

    /// The byte width patched by a relocation of the given type.
    fn relocation_width(&self, rtype: u32) -> Option<u8> {
        let _ = rtype;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek() {
        assert_eq!(Object::peek(b"\x7fELF\x02\x01\x01\x00"), FileFormat::Elf);
        assert_eq!(Object::peek(b"MZ\x90\x00"), FileFormat::Pe);
        assert_eq!(
            Object::peek(&0xfeed_facfu32.to_le_bytes()),
            FileFormat::MachO
        );
        assert_eq!(Object::peek(b"what"), FileFormat::Unknown);
    }
}
