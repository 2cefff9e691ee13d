//! The Mach-O object front end.
//!
//! DWARF sections in Mach-O files live in the `__DWARF` segment and spell
//! their names with a `__` prefix (`__debug_info`). dsymutil sometimes
//! leaves phantom section headers whose data was stripped from the file;
//! those are presented as missing rather than as empty garbage.

use std::borrow::Cow;

use goblin::mach;

use dwarven_common::{Arch, Endianness};

use crate::base::{ObjectKind, Symbol};
use crate::error::{DwarfError, DwarfErrorKind};

/// Mach Objects, used on macOS and iOS derivatives.
pub struct MachObject<'data> {
    macho: mach::MachO<'data>,
}

impl<'data> MachObject<'data> {
    /// Tests whether the buffer could contain a Mach-O object or fat
    /// archive.
    pub fn test(data: &[u8]) -> bool {
        let magic = match data.get(0..4) {
            Some(bytes) => u32::from_le_bytes(bytes.try_into().unwrap()),
            None => return false,
        };
        matches!(
            magic,
            mach::header::MH_MAGIC
                | mach::header::MH_CIGAM
                | mach::header::MH_MAGIC_64
                | mach::header::MH_CIGAM_64
                | mach::fat::FAT_MAGIC
                | mach::fat::FAT_CIGAM
        )
    }

    /// Tries to parse a Mach-O from the given slice.
    ///
    /// Fat binaries are not multiplexed here; the caller slices out the
    /// desired architecture first.
    pub fn parse(data: &'data [u8]) -> Result<Self, DwarfError> {
        match mach::Mach::parse(data)
            .map_err(|error| DwarfError::new(DwarfErrorKind::TruncatedHeader, error))?
        {
            mach::Mach::Binary(macho) => Ok(MachObject { macho }),
            mach::Mach::Fat(fat) => {
                // Fall back to the first architecture of a fat binary.
                let macho = fat
                    .get(0)
                    .map_err(|error| DwarfError::new(DwarfErrorKind::TruncatedHeader, error))?;
                match macho {
                    mach::SingleArch::MachO(macho) => Ok(MachObject { macho }),
                    mach::SingleArch::Archive(_) => {
                        Err(DwarfErrorKind::BadMagic.into())
                    }
                }
            }
        }
    }

    /// The byte order of this object.
    pub fn endianness(&self) -> Endianness {
        if self.macho.little_endian {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// The CPU architecture of this object.
    pub fn arch(&self) -> Arch {
        use goblin::mach::constants::cputype;
        match self.macho.header.cputype {
            cputype::CPU_TYPE_X86 => Arch::X86,
            cputype::CPU_TYPE_X86_64 => Arch::Amd64,
            cputype::CPU_TYPE_ARM => Arch::Arm,
            cputype::CPU_TYPE_ARM64 => Arch::Arm64,
            cputype::CPU_TYPE_POWERPC => Arch::Ppc,
            cputype::CPU_TYPE_POWERPC64 => Arch::Ppc64,
            _ => Arch::Unknown,
        }
    }

    /// The kind of this object, as specified in the Mach header.
    pub fn kind(&self) -> ObjectKind {
        match self.macho.header.filetype {
            goblin::mach::header::MH_OBJECT => ObjectKind::Relocatable,
            goblin::mach::header::MH_EXECUTE => ObjectKind::Executable,
            goblin::mach::header::MH_DYLIB => ObjectKind::Library,
            goblin::mach::header::MH_CORE => ObjectKind::Dump,
            goblin::mach::header::MH_DSYM => ObjectKind::Debug,
            _ => ObjectKind::Other,
        }
    }

    /// The UUID load command of this object, used to match dSYM bundles.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        use goblin::mach::load_command::CommandVariant;
        for command in &self.macho.load_commands {
            if let CommandVariant::Uuid(uuid) = command.command {
                return Some(uuid.uuid);
            }
        }
        None
    }

    /// Enumerates all named sections with their data.
    ///
    /// Yields `(segment name, section name, data)` triples. Sections whose
    /// data was stripped by dsymutil (file offset 0) are skipped.
    pub fn sections(&self) -> Vec<(String, String, &'data [u8])> {
        let mut sections = Vec::new();
        for segment in &self.macho.segments {
            for section in segment.into_iter() {
                let (header, data) = match section {
                    Ok(section) => section,
                    Err(_) => continue,
                };
                if header.offset == 0 {
                    continue;
                }
                let segname = match header.segname() {
                    Ok(name) => name.to_string(),
                    Err(_) => continue,
                };
                let secname = match header.name() {
                    Ok(name) => name.to_string(),
                    Err(_) => continue,
                };
                sections.push((segname, secname, data));
            }
        }
        sections
    }

    /// Returns an iterator over function symbols in the symbol table.
    pub fn symbols(&self) -> Vec<Symbol<'data>> {
        let mut vmaddr = 0;
        for segment in &self.macho.segments {
            if segment.name().ok() == Some("__TEXT") {
                vmaddr = segment.vmaddr;
                break;
            }
        }

        let mut symbols = Vec::new();
        for next in self.macho.symbols() {
            let (name, nlist) = match next {
                Ok(symbol) => symbol,
                Err(_) => continue,
            };

            if nlist.is_stab()
                || nlist.get_type() != mach::symbols::N_SECT
                || nlist.n_value < vmaddr
            {
                continue;
            }

            let name = name.strip_prefix('_').unwrap_or(name);
            symbols.push(Symbol {
                name: Some(Cow::Borrowed(name)),
                address: nlist.n_value - vmaddr,
                size: 0,
            });
        }
        symbols
    }
}

impl std::fmt::Debug for MachObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachObject")
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field(
                "uuid",
                &self.uuid().map(|uuid| format!("{:02x?}", uuid)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_macho() {
        assert!(!MachObject::test(b"\x7fELF\x02\x01\x01\x00"));
        assert!(MachObject::parse(b"garbage").is_err());
    }
}
