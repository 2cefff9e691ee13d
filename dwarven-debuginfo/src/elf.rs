//! The ELF object front end.
//!
//! Beyond the header, section and symbol parsing that goblin provides, this
//! module implements the three DWARF-specific concerns of ELF objects:
//!
//! - **Section group partition**: `SHT_GROUP` payloads are decoded (with a
//!   byte-order heuristic for toolchains that emitted them in the wrong
//!   order), `.dwo`-suffixed sections are assigned to the split-DWARF
//!   group, and every remaining DWARF section falls into the base group.
//! - **Relocation records**: `.rel`/`.rela` sections targeting DWARF
//!   sections are decoded from their raw layouts, honoring the split
//!   type fields of little-endian MIPS64 and SPARCv9 objects.
//! - **Compressed sections**: both the `SHF_COMPRESSED` header and the
//!   legacy `.zdebug_*`/`ZLIB` prefix are recognized and inflated.

use std::borrow::Cow;
use std::ffi::CStr;

use flate2::{Decompress, FlushDecompress};
use goblin::elf;
use goblin::elf::compression_header::{CompressionHeader, ELFCOMPRESS_ZLIB};
use goblin::container::{Container, Ctx};
use scroll::Pread;

use dwarven_common::{Arch, Endianness};

use crate::base::{ObjectKind, GROUP_BASE, GROUP_DWO, GROUP_FIRST_COMDAT};
use crate::base::SectionId;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::object::RelocationEntry;
use crate::reader::Cursor;

const SHF_COMPRESSED: u64 = elf::section_header::SHF_COMPRESSED as u64;
const SHN_UNDEF: usize = elf::section_header::SHN_UNDEF as usize;

/// O32 ABI extended for 64-bit architecture.
const EF_MIPS_ABI_O64: u32 = 0x0000_2000;
/// EABI in 64 bit mode.
const EF_MIPS_ABI_EABI64: u32 = 0x0000_4000;
/// Any flag value that might indicate 64-bit MIPS.
const MIPS_64_FLAGS: u32 = EF_MIPS_ABI_O64 | EF_MIPS_ABI_EABI64;

const EM_SPARCV9: u16 = 43;

/// Executable and Linkable Format, used for executables and libraries on
/// Linux.
pub struct ElfObject<'data> {
    elf: elf::Elf<'data>,
    data: &'data [u8],
    groups: Vec<u32>,
}

impl<'data> ElfObject<'data> {
    /// Tests whether the buffer could contain an ELF object.
    pub fn test(data: &[u8]) -> bool {
        data.get(0..elf::header::SELFMAG)
            .map_or(false, |data| data == elf::header::ELFMAG)
    }

    /// Tries to parse an ELF object from the given slice.
    pub fn parse(data: &'data [u8]) -> Result<Self, DwarfError> {
        if !Self::test(data) {
            return Err(DwarfErrorKind::BadMagic.into());
        }

        let elf = elf::Elf::parse(data)
            .map_err(|error| DwarfError::new(DwarfErrorKind::TruncatedHeader, error))?;

        let mut object = ElfObject {
            elf,
            data,
            groups: Vec::new(),
        };
        object.groups = object.compute_section_groups()?;
        Ok(object)
    }

    /// The byte order of this object.
    pub fn endianness(&self) -> Endianness {
        if self.elf.little_endian {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// The CPU architecture of this object, as specified in the ELF header.
    pub fn arch(&self) -> Arch {
        match self.elf.header.e_machine {
            elf::header::EM_386 => Arch::X86,
            elf::header::EM_X86_64 => Arch::Amd64,
            elf::header::EM_AARCH64 => Arch::Arm64,
            elf::header::EM_ARM => Arch::Arm,
            elf::header::EM_PPC => Arch::Ppc,
            elf::header::EM_PPC64 => Arch::Ppc64,
            elf::header::EM_RISCV => Arch::Riscv64,
            self::EM_SPARCV9 => Arch::Sparc64,
            elf::header::EM_MIPS | elf::header::EM_MIPS_RS3_LE => {
                if self.elf.header.e_flags & MIPS_64_FLAGS != 0 {
                    Arch::Mips64
                } else {
                    Arch::Mips
                }
            }
            _ => Arch::Unknown,
        }
    }

    /// The kind of this object, as specified in the ELF header.
    pub fn kind(&self) -> ObjectKind {
        match self.elf.header.e_type {
            elf::header::ET_NONE => ObjectKind::None,
            elf::header::ET_REL => ObjectKind::Relocatable,
            elf::header::ET_EXEC => ObjectKind::Executable,
            elf::header::ET_DYN => ObjectKind::Library,
            elf::header::ET_CORE => ObjectKind::Dump,
            _ => ObjectKind::Other,
        }
    }

    /// The address at which the image prefers to be loaded into memory.
    pub fn load_address(&self) -> u64 {
        for phdr in &self.elf.program_headers {
            if phdr.p_type == elf::program_header::PT_LOAD {
                return phdr.p_vaddr;
            }
        }
        0
    }

    /// The number of sections in this object.
    pub fn section_count(&self) -> usize {
        self.elf.section_headers.len()
    }

    /// The name of the section at `index`, if it has a valid one.
    pub fn section_name(&self, index: usize) -> Option<&'data str> {
        let header = self.elf.section_headers.get(index)?;
        self.elf.shdr_strtab.get_at(header.sh_name)
    }

    /// The group number of the section at `index`.
    pub fn section_group(&self, index: usize) -> u32 {
        self.groups.get(index).copied().unwrap_or(0)
    }

    /// The raw file bytes of the section at `index`.
    ///
    /// Returns `None` for no-bits sections and out-of-file ranges.
    pub fn section_bytes(&self, index: usize) -> Option<&'data [u8]> {
        let header = self.elf.section_headers.get(index)?;
        if header.sh_type == elf::section_header::SHT_NOBITS {
            return None;
        }
        let offset = usize::try_from(header.sh_offset).ok()?;
        let size = usize::try_from(header.sh_size).ok()?;
        self.data.get(offset..offset.checked_add(size)?)
    }

    /// Whether the section at `index` is compressed, either through the
    /// `SHF_COMPRESSED` flag or the legacy `.zdebug_` naming.
    pub fn section_compressed(&self, index: usize) -> bool {
        let header = match self.elf.section_headers.get(index) {
            Some(header) => header,
            None => return false,
        };
        if header.sh_flags & SHF_COMPRESSED != 0 {
            return true;
        }
        self.section_name(index)
            .map_or(false, |name| name.starts_with(".zdebug_"))
    }

    /// Decompresses section data compressed with zlib.
    ///
    /// Handles both the GNU `ZLIB` + big-endian size prefix and the ELF
    /// compression header. Other compression types (zstd) are reported as
    /// unhandled.
    pub fn decompress_section_data(
        &self,
        section_data: &[u8],
    ) -> Result<Vec<u8>, DwarfError> {
        let (size, compressed) = if section_data.starts_with(b"ZLIB") {
            // 4 bytes magic plus an 8-byte big-endian size prefix.
            if section_data.len() < 12 {
                return Err(DwarfErrorKind::Truncated.into());
            }
            let mut size_bytes = [0; 8];
            size_bytes.copy_from_slice(&section_data[4..12]);
            (u64::from_be_bytes(size_bytes), &section_data[12..])
        } else {
            let context = self.scroll_ctx();
            let compression = CompressionHeader::parse(section_data, 0, context)
                .map_err(|error| DwarfError::new(DwarfErrorKind::TruncatedHeader, error))?;
            if compression.ch_type != ELFCOMPRESS_ZLIB {
                return Err(DwarfErrorKind::UnsupportedCompression(compression.ch_type).into());
            }
            let compressed = section_data
                .get(CompressionHeader::size(context)..)
                .ok_or(DwarfErrorKind::Truncated)?;
            (compression.ch_size, compressed)
        };

        let mut decompressed = Vec::with_capacity(size as usize);
        Decompress::new(true)
            .decompress_vec(compressed, &mut decompressed, FlushDecompress::Finish)
            .map_err(|error| DwarfError::new(DwarfErrorKind::Truncated, error))?;

        Ok(decompressed)
    }

    /// The value of the symbol at `index` in the static symbol table.
    pub fn symbol_value(&self, index: usize) -> Option<u64> {
        self.elf.syms.get(index).map(|symbol| symbol.st_value)
    }

    /// Returns the decoded relocation entries of the relocation section at
    /// `index`, together with the index of the section they apply to.
    ///
    /// Returns `None` if the section is not a relocation section.
    pub fn relocations(
        &self,
        index: usize,
    ) -> Option<Result<(usize, Vec<RelocationEntry>), DwarfError>> {
        let header = self.elf.section_headers.get(index)?;
        let is_rela = match header.sh_type {
            elf::section_header::SHT_RELA => true,
            elf::section_header::SHT_REL => false,
            _ => return None,
        };

        let target = header.sh_info as usize;
        let data = match self.section_bytes(index) {
            Some(data) => data,
            None => return Some(Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into())),
        };

        Some(self.parse_relocations(data, is_rela).map(|entries| (target, entries)))
    }

    /// Decodes raw relocation records.
    ///
    /// 64-bit records split `r_info` into symbol and type differently on
    /// little-endian MIPS64 (three single-byte type fields) and SPARCv9
    /// (type in the low byte, symbol in the first four bytes); both layouts
    /// follow the observed practice of those toolchains rather than the
    /// generic ELF64 split.
    fn parse_relocations(
        &self,
        data: &[u8],
        is_rela: bool,
    ) -> Result<Vec<RelocationEntry>, DwarfError> {
        let is_64 = self.elf.is_64;
        let endian = self.endianness();
        let entry_size = match (is_64, is_rela) {
            (true, true) => 24,
            (true, false) => 16,
            (false, true) => 12,
            (false, false) => 8,
        };

        if data.len() % entry_size != 0 {
            return Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
        }

        let is_mips64le = self.elf.header.e_machine == elf::header::EM_MIPS
            && endian == Endianness::Little
            && is_64;
        let is_sparcv9 = self.elf.header.e_machine == self::EM_SPARCV9 && is_64;

        let mut entries = Vec::with_capacity(data.len() / entry_size);
        let mut cursor = Cursor::new(data, endian);

        while !cursor.is_empty() {
            let (offset, info) = if is_64 {
                (cursor.read_u64()?, cursor.read_u64()?)
            } else {
                (u64::from(cursor.read_u32()?), u64::from(cursor.read_u32()?))
            };

            let addend = if is_rela {
                if is_64 {
                    cursor.read_u64()? as i64
                } else {
                    cursor.read_u32()? as i32 as i64
                }
            } else {
                0
            };

            let info_bytes = info.to_le_bytes();
            let (symbol, rtype, rtype2, rtype3) = if !is_64 {
                ((info >> 8) as u32, (info & 0xff) as u32, 0, 0)
            } else if is_mips64le {
                let symbol = u32::from_le_bytes(info_bytes[0..4].try_into().unwrap());
                (symbol, u32::from(info_bytes[7]), info_bytes[6], info_bytes[5])
            } else if is_sparcv9 {
                // SPARC objects are big-endian; the symbol lives in the
                // first four bytes of the record.
                let raw = info.to_be_bytes();
                let symbol = u32::from_be_bytes(raw[0..4].try_into().unwrap());
                (symbol, u32::from(raw[7]), 0, 0)
            } else {
                ((info >> 32) as u32, (info & 0xffff_ffff) as u32, 0, 0)
            };

            entries.push(RelocationEntry {
                offset,
                symbol,
                rtype,
                rtype2,
                rtype3,
                addend,
                is_rela,
            });
        }

        Ok(entries)
    }

    /// The byte width patched by a relocation of the given type, if the
    /// type is one this reader can apply.
    pub fn relocation_width(&self, rtype: u32) -> Option<u8> {
        match self.elf.header.e_machine {
            elf::header::EM_386 => match rtype {
                1 => Some(4), // R_386_32
                _ => None,
            },
            elf::header::EM_X86_64 => match rtype {
                1 => Some(8),       // R_X86_64_64
                10 | 11 => Some(4), // R_X86_64_32, R_X86_64_32S
                _ => None,
            },
            elf::header::EM_AARCH64 => match rtype {
                257 => Some(8), // R_AARCH64_ABS64
                258 => Some(4), // R_AARCH64_ABS32
                _ => None,
            },
            elf::header::EM_ARM => match rtype {
                2 => Some(4), // R_ARM_ABS32
                _ => None,
            },
            elf::header::EM_RISCV => match rtype {
                1 => Some(4), // R_RISCV_32
                2 => Some(8), // R_RISCV_64
                _ => None,
            },
            elf::header::EM_PPC => match rtype {
                1 => Some(4), // R_PPC_ADDR32
                _ => None,
            },
            elf::header::EM_PPC64 => match rtype {
                1 => Some(4),  // R_PPC64_ADDR32
                38 => Some(8), // R_PPC64_ADDR64
                _ => None,
            },
            elf::header::EM_MIPS | elf::header::EM_MIPS_RS3_LE => match rtype {
                2 => Some(4),  // R_MIPS_32
                18 => Some(8), // R_MIPS_64
                _ => None,
            },
            self::EM_SPARCV9 => match rtype {
                3 | 23 => Some(4),  // R_SPARC_32, R_SPARC_UA32
                32 | 54 => Some(8), // R_SPARC_64, R_SPARC_UA64
                _ => None,
            },
            _ => None,
        }
    }

    /// Searches for a GNU build identifier note in this object.
    ///
    /// Depending on the compiler and linker, the build ID can be declared
    /// in a `PT_NOTE` program header entry, the `.note.gnu.build-id`
    /// section, or both.
    pub fn build_id(&self) -> Option<&'data [u8]> {
        if let Some(mut notes) = self.elf.iter_note_headers(self.data) {
            while let Some(Ok(note)) = notes.next() {
                if note.n_type == elf::note::NT_GNU_BUILD_ID {
                    return Some(note.desc);
                }
            }
        }

        if let Some(mut notes) = self
            .elf
            .iter_note_sections(self.data, Some(".note.gnu.build-id"))
        {
            while let Some(Ok(note)) = notes.next() {
                if note.n_type == elf::note::NT_GNU_BUILD_ID {
                    return Some(note.desc);
                }
            }
        }

        None
    }

    /// The debug link of this object: the companion file name and the CRC32
    /// of its contents.
    pub fn debug_link(&self) -> Result<Option<(&'data CStr, u32)>, DwarfError> {
        let index = (0..self.section_count())
            .find(|&index| self.section_name(index) == Some(".gnu_debuglink"));
        let index = match index {
            Some(index) => index,
            None => return Ok(None),
        };

        let data = self
            .section_bytes(index)
            .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?;

        let nul = data
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(DwarfErrorKind::Truncated)?;
        let filename = CStr::from_bytes_with_nul(&data[..nul + 1])
            .map_err(|_| DwarfErrorKind::Truncated)?;

        // The CRC sits at the end, after padding to a 4-byte boundary.
        let crc_bytes: [u8; 4] = data
            .get(data.len().saturating_sub(4)..)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(DwarfErrorKind::Truncated)?;
        let crc = match self.endianness() {
            Endianness::Little => u32::from_le_bytes(crc_bytes),
            Endianness::Big => u32::from_be_bytes(crc_bytes),
        };

        Ok(Some((filename, crc)))
    }

    /// Returns an iterator over function symbols in the symbol table.
    pub fn symbols(&self) -> ElfSymbolIterator<'data, '_> {
        ElfSymbolIterator {
            symbols: self.elf.syms.iter(),
            strtab: &self.elf.strtab,
            load_addr: self.load_address(),
        }
    }

    fn scroll_ctx(&self) -> Ctx {
        Ctx {
            container: if self.elf.is_64 {
                Container::Big
            } else {
                Container::Little
            },
            le: if self.elf.little_endian {
                scroll::Endian::Little
            } else {
                scroll::Endian::Big
            },
        }
    }

    /// Partitions the sections into groups.
    ///
    /// `SHT_GROUP` members get the next free COMDAT group number,
    /// `.dwo`-suffixed sections get the split-DWARF group, and every other
    /// DWARF-bearing section falls into the base group. Non-DWARF sections
    /// stay unassigned (group 0 in the internal table).
    fn compute_section_groups(&self) -> Result<Vec<u32>, DwarfError> {
        let count = self.elf.section_headers.len();
        let mut groups = vec![0u32; count];
        let mut next_comdat = GROUP_FIRST_COMDAT;

        for index in 0..count {
            let header = &self.elf.section_headers[index];
            let name = self.section_name(index).unwrap_or("");
            if !section_is_group(header.sh_type, name) {
                continue;
            }

            let members = self.read_group_members(index)?;
            let mut found = false;
            for member in members {
                let member = member as usize;
                if member >= count {
                    return Err(DwarfErrorKind::MalformedSectionGroup.into());
                }
                if groups[member] != 0 {
                    // A section can belong to only one group.
                    return Err(DwarfErrorKind::MalformedSectionGroup.into());
                }
                groups[member] = next_comdat;
                found = true;
            }
            if found {
                next_comdat += 1;
            }
        }

        for index in 0..count {
            if groups[index] != 0 {
                continue;
            }
            let name = self.section_name(index).unwrap_or("");
            if name.ends_with(".dwo") {
                groups[index] = GROUP_DWO;
            } else if SectionId::from_section_name(name).is_some() {
                groups[index] = GROUP_BASE;
            }
        }

        Ok(groups)
    }

    /// Reads the member section numbers of one `SHT_GROUP` section.
    ///
    /// The payload is an array of 32-bit words: the `GRP_COMDAT` flag word
    /// followed by section numbers. Some toolchains emit these words in the
    /// opposite byte order from the file; the flag word is accepted in both
    /// orders, and member words are retried byte-swapped when the file
    /// order yields an impossible section number.
    fn read_group_members(&self, index: usize) -> Result<Vec<u32>, DwarfError> {
        let data = self
            .section_bytes(index)
            .ok_or(DwarfErrorKind::MalformedSectionGroup)?;
        let header = &self.elf.section_headers[index];

        if data.len() < 4 || header.sh_entsize != 4 {
            return Err(DwarfErrorKind::MalformedSectionGroup.into());
        }

        let le = self.elf.little_endian;
        let word = |position: usize| -> Result<u32, DwarfError> {
            let endian = if le {
                scroll::Endian::Little
            } else {
                scroll::Endian::Big
            };
            data.pread_with::<u32>(position, endian)
                .map_err(|error| DwarfError::new(DwarfErrorKind::Truncated, error))
        };

        let flag = word(0)?;
        if flag != 1 && flag != 0x0100_0000 {
            return Err(DwarfErrorKind::MalformedSectionGroup.into());
        }

        let section_count = self.elf.section_headers.len() as u32;
        let mut members = Vec::with_capacity(data.len() / 4 - 1);
        for position in (4..data.len()).step_by(4) {
            let value = word(position)?;
            if value == 0 {
                return Err(DwarfErrorKind::MalformedSectionGroup.into());
            }
            let member = if value < section_count {
                value
            } else {
                let swapped = value.swap_bytes();
                if swapped >= section_count {
                    return Err(DwarfErrorKind::MalformedSectionGroup.into());
                }
                swapped
            };
            members.push(member);
        }

        Ok(members)
    }
}

impl std::fmt::Debug for ElfObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfObject")
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field("load_address", &format_args!("{:#x}", self.load_address()))
            .field("sections", &self.section_count())
            .finish()
    }
}

/// Returns whether a section is a group section.
///
/// Either the `SHT_GROUP` type or the `.group` name qualifies; ARM
/// compilers name group sections `__ARM_grp<name>` with the type set.
fn section_is_group(sh_type: u32, name: &str) -> bool {
    sh_type == elf::section_header::SHT_GROUP || name == ".group"
}

/// An iterator over function symbols in an ELF symbol table.
pub struct ElfSymbolIterator<'data, 'object> {
    symbols: elf::sym::SymIterator<'data>,
    strtab: &'object goblin::strtab::Strtab<'data>,
    load_addr: u64,
}

impl<'data> Iterator for ElfSymbolIterator<'data, '_> {
    type Item = crate::base::Symbol<'data>;

    fn next(&mut self) -> Option<Self::Item> {
        for symbol in &mut self.symbols {
            if symbol.st_type() != elf::sym::STT_FUNC {
                continue;
            }
            if symbol.st_value < self.load_addr {
                continue;
            }
            if symbol.st_shndx == SHN_UNDEF {
                continue;
            }

            let name = self.strtab.get_at(symbol.st_name).map(Cow::Borrowed);
            return Some(crate::base::Symbol {
                name,
                address: symbol.st_value - self.load_addr,
                size: symbol.st_size,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_elf() {
        assert!(!ElfObject::test(b"MZ\x90\x00"));
        assert!(ElfObject::parse(b"garbage").is_err());
    }

    #[test]
    fn test_magic() {
        assert!(ElfObject::test(b"\x7fELF\x02\x01\x01\x00"));
    }
}
