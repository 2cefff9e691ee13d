//! The PE/COFF object front end.
//!
//! Windows binaries rarely embed DWARF, but MinGW toolchains do: the COFF
//! section table carries `.debug_*` sections whose long names live in the
//! COFF string table. Everything else about the DWARF payload is identical
//! to ELF.

use goblin::pe;

use dwarven_common::{Arch, Endianness};

use crate::base::ObjectKind;
use crate::error::{DwarfError, DwarfErrorKind};

/// Portable Executable, an extension of COFF used on Windows.
pub struct PeObject<'data> {
    pe: pe::PE<'data>,
    data: &'data [u8],
}

impl<'data> PeObject<'data> {
    /// Tests whether the buffer could contain a PE object.
    pub fn test(data: &[u8]) -> bool {
        data.get(0..2).map_or(false, |magic| magic == b"MZ")
    }

    /// Tries to parse a PE object from the given slice.
    pub fn parse(data: &'data [u8]) -> Result<Self, DwarfError> {
        pe::PE::parse(data)
            .map(|pe| PeObject { pe, data })
            .map_err(|error| DwarfError::new(DwarfErrorKind::TruncatedHeader, error))
    }

    /// The byte order of this object; PE files are always little-endian.
    pub fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    /// The CPU architecture of this object.
    pub fn arch(&self) -> Arch {
        match self.pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => Arch::X86,
            pe::header::COFF_MACHINE_X86_64 => Arch::Amd64,
            pe::header::COFF_MACHINE_ARM => Arch::Arm,
            pe::header::COFF_MACHINE_ARM64 => Arch::Arm64,
            _ => Arch::Unknown,
        }
    }

    /// The kind of this object.
    pub fn kind(&self) -> ObjectKind {
        if self.pe.is_lib {
            ObjectKind::Library
        } else {
            ObjectKind::Executable
        }
    }

    /// The preferred load address of this image.
    pub fn load_address(&self) -> u64 {
        self.pe.image_base as u64
    }

    /// Enumerates all sections with their resolved names and data.
    ///
    /// Section names longer than eight characters (all DWARF names are)
    /// are resolved through the COFF string table.
    pub fn sections(&self) -> Vec<(String, &'data [u8])> {
        let mut sections = Vec::new();
        for section in &self.pe.sections {
            let name = match section.real_name.as_deref() {
                Some(name) => name.to_string(),
                None => match section.name() {
                    Ok(name) => name.to_string(),
                    Err(_) => continue,
                },
            };

            let offset = section.pointer_to_raw_data as usize;
            let size = section.size_of_raw_data as usize;
            let data = match self.data.get(offset..offset.saturating_add(size)) {
                Some(data) => data,
                None => continue,
            };

            sections.push((name, data));
        }
        sections
    }
}

impl std::fmt::Debug for PeObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeObject")
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field("load_address", &format_args!("{:#x}", self.load_address()))
            .field("sections", &self.pe.sections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_pe() {
        assert!(!PeObject::test(b"\x7fELF"));
        assert!(PeObject::parse(b"MZ").is_err());
    }
}
