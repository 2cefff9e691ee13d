//! The section registry and debug companion resolution.
//!
//! A [`SectionRegistry`] owns the bytes of every DWARF-bearing section of
//! one object, after group filtering, decompression and relocation
//! application. Owning the bytes outright keeps sessions free of borrow
//! chains into the original file mapping, at the cost of one copy per
//! section.
//!
//! [`SectionRegistry`]: struct.SectionRegistry.html

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use debugid::{CodeId, DebugId};
use uuid::Uuid;

use dwarven_common::{Arch, Endianness};

use crate::base::{
    FileFormat, ObjectKind, SectionId, SymbolMap, GROUP_ANY, GROUP_BASE, GROUP_DWO,
};
use crate::elf::ElfObject;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::object::{Object, ObjectReader, RelocationEntry};

/// One loaded section of a registry.
#[derive(Debug)]
pub struct Section {
    /// The canonical identifier, when the name is a known DWARF section.
    pub id: Option<SectionId>,
    /// The section name as spelled in the container.
    pub name: String,
    /// The section bytes, decompressed and relocated.
    pub data: Vec<u8>,
    /// The virtual address the section is mapped at.
    pub address: u64,
    /// The group this section belongs to.
    pub group: u32,
    /// Whether the name carried a `.dwo` suffix.
    pub is_dwo: bool,
    /// Whether the section was stored compressed.
    pub compressed: bool,
    /// Whether relocations were applied to the data.
    pub relocated: bool,
}

impl Section {
    /// Creates a section from a container-spelled name and its bytes.
    ///
    /// The canonical identifier and `.dwo` membership are derived from the
    /// name; the group is assigned accordingly.
    pub fn named(name: &str, data: Vec<u8>) -> Section {
        let matched = SectionId::from_section_name(name);
        let is_dwo = matched.map_or(false, |(_, is_dwo, _)| is_dwo);
        Section {
            id: matched.map(|(id, _, _)| id),
            name: name.to_string(),
            data,
            address: 0,
            group: if is_dwo { GROUP_DWO } else { GROUP_BASE },
            is_dwo,
            compressed: false,
            relocated: false,
        }
    }
}

/// The owned section store behind a session.
#[derive(Debug)]
pub struct SectionRegistry {
    format: FileFormat,
    endian: Endianness,
    arch: Arch,
    kind: ObjectKind,
    group: u32,
    groups_present: Vec<u32>,
    sections: Vec<Section>,
    symbols: SymbolMap<'static>,
    build_id: Option<Vec<u8>>,
    debug_link: Option<(String, u32)>,
    uuid: Option<[u8; 16]>,
    anomalies: Vec<DwarfErrorKind>,
}

impl SectionRegistry {
    /// Builds a registry from a parsed object, exposing the given group.
    ///
    /// Group `GROUP_ANY` resolves to the base group when base sections are
    /// present, otherwise to the split-DWARF group, otherwise to the first
    /// COMDAT group.
    pub fn from_object(object: &Object<'_>, group: u32) -> Result<Self, DwarfError> {
        match object {
            Object::Elf(elf) => Self::from_elf(elf, group),
            Object::MachO(macho) => Self::from_macho(macho, group),
            Object::Pe(pe) => Self::from_pe(pe, group),
        }
    }

    fn from_elf(elf: &ElfObject<'_>, requested: u32) -> Result<Self, DwarfError> {
        let mut anomalies = Vec::new();

        // Partition pass: collect the groups of all DWARF-bearing sections.
        let mut groups_present = Vec::new();
        for index in 0..elf.section_count() {
            let group = elf.section_group(index);
            if group != 0 && !groups_present.contains(&group) {
                groups_present.push(group);
            }
        }
        groups_present.sort_unstable();

        let group = resolve_group(requested, &groups_present);

        let mut sections = Vec::new();
        for index in 0..elf.section_count() {
            let name = match elf.section_name(index) {
                Some(name) => name,
                None => continue,
            };
            let (id, is_dwo, _) = match SectionId::from_section_name(name) {
                Some(matched) => matched,
                None => continue,
            };
            if elf.section_group(index) != group {
                continue;
            }

            let raw = match elf.section_bytes(index) {
                Some(raw) => raw,
                None => continue,
            };

            let compressed = elf.section_compressed(index);
            let data = if compressed {
                match elf.decompress_section_data(raw) {
                    Ok(data) => data,
                    Err(error) => {
                        // Present nothing rather than garbage, but let the
                        // other sections through.
                        anomalies.push(error.kind());
                        continue;
                    }
                }
            } else {
                raw.to_vec()
            };

            sections.push(Section {
                id: Some(id),
                name: name.to_string(),
                data,
                address: 0,
                group,
                is_dwo,
                compressed,
                relocated: false,
            });
        }

        let mut registry = SectionRegistry {
            format: FileFormat::Elf,
            endian: elf.endianness(),
            arch: elf.arch(),
            kind: elf.kind(),
            group,
            groups_present,
            sections,
            symbols: elf
                .symbols()
                .map(|symbol| crate::base::Symbol {
                    name: symbol.name.map(|name| Cow::Owned(name.into_owned())),
                    address: symbol.address,
                    size: symbol.size,
                })
                .collect(),
            build_id: elf.build_id().map(<[u8]>::to_vec),
            debug_link: match elf.debug_link() {
                Ok(link) => link.map(|(name, crc)| (name.to_string_lossy().into_owned(), crc)),
                Err(error) => {
                    anomalies.push(error.kind());
                    None
                }
            },
            uuid: None,
            anomalies,
        };

        if registry.kind == ObjectKind::Relocatable {
            registry.apply_elf_relocations(elf)?;
        }

        Ok(registry)
    }

    /// Applies `.rel`/`.rela` relocations to the loaded DWARF sections.
    ///
    /// Resolution is `S + A`: the symbol value (usually another DWARF
    /// section base, hence 0 in relocatable objects) plus the addend, which
    /// comes from the entry for `.rela` and from the patched bytes for
    /// `.rel`. Types the target machine table does not know are recorded
    /// as unhandled anomalies, and the section is presented regardless.
    fn apply_elf_relocations(&mut self, elf: &ElfObject<'_>) -> Result<(), DwarfError> {
        for index in 0..elf.section_count() {
            let (target, entries) = match elf.relocations(index) {
                Some(Ok(result)) => result,
                Some(Err(error)) => {
                    self.anomalies.push(error.kind());
                    continue;
                }
                None => continue,
            };

            let target_name = match elf.section_name(target) {
                Some(name) => name,
                None => continue,
            };
            let section = match self
                .sections
                .iter_mut()
                .find(|section| section.name == target_name)
            {
                Some(section) => section,
                None => continue,
            };

            for entry in &entries {
                let width = match elf.relocation_width(entry.rtype) {
                    Some(width) => width,
                    None => {
                        self.anomalies
                            .push(DwarfErrorKind::UnhandledRelocation(entry.rtype));
                        continue;
                    }
                };

                // `.rela` carries the addend explicitly; `.rel` leaves it
                // in the patched bytes, which the add below preserves.
                let symbol_value = elf.symbol_value(entry.symbol as usize).unwrap_or(0);
                let mut patched = *entry;
                patched.addend = entry.addend.wrapping_add(symbol_value as i64);

                if apply_relocation(&mut section.data, &patched, width, self.endian).is_err() {
                    self.anomalies
                        .push(DwarfErrorKind::SectionSizeOrOffsetLarge);
                    continue;
                }
                section.relocated = true;
            }
        }
        Ok(())
    }

    fn from_macho(macho: &crate::macho::MachObject<'_>, requested: u32) -> Result<Self, DwarfError> {
        let group = resolve_group(requested, &[GROUP_BASE]);

        let mut sections = Vec::new();
        if group == GROUP_BASE {
            for (segname, secname, data) in macho.sections() {
                if !segname.starts_with("__DWARF") && secname != "__eh_frame" {
                    continue;
                }
                // Section names are capped at 16 bytes; dsymutil truncates
                // the longer DWARF names.
                let full_name = match secname.as_str() {
                    "__debug_str_offs" => "__debug_str_offsets",
                    other => other,
                };
                let (id, is_dwo, _) = match SectionId::from_section_name(full_name) {
                    Some(matched) => matched,
                    None => continue,
                };
                sections.push(Section {
                    id: Some(id),
                    name: secname,
                    data: data.to_vec(),
                    address: 0,
                    group,
                    is_dwo,
                    compressed: false,
                    relocated: false,
                });
            }
        }

        Ok(SectionRegistry {
            format: FileFormat::MachO,
            endian: macho.endianness(),
            arch: macho.arch(),
            kind: macho.kind(),
            group,
            groups_present: vec![GROUP_BASE],
            sections,
            symbols: macho
                .symbols()
                .into_iter()
                .map(|symbol| crate::base::Symbol {
                    name: symbol.name.map(|name| Cow::Owned(name.into_owned())),
                    address: symbol.address,
                    size: symbol.size,
                })
                .collect(),
            build_id: None,
            debug_link: None,
            uuid: macho.uuid(),
            anomalies: Vec::new(),
        })
    }

    fn from_pe(pe: &crate::pe::PeObject<'_>, requested: u32) -> Result<Self, DwarfError> {
        let group = resolve_group(requested, &[GROUP_BASE]);

        let mut sections = Vec::new();
        if group == GROUP_BASE {
            for (name, data) in pe.sections() {
                let (id, is_dwo, _) = match SectionId::from_section_name(&name) {
                    Some(matched) => matched,
                    None => continue,
                };
                sections.push(Section {
                    id: Some(id),
                    name,
                    data: data.to_vec(),
                    address: 0,
                    group,
                    is_dwo,
                    compressed: false,
                    relocated: false,
                });
            }
        }

        Ok(SectionRegistry {
            format: FileFormat::Pe,
            endian: pe.endianness(),
            arch: pe.arch(),
            kind: pe.kind(),
            group,
            groups_present: vec![GROUP_BASE],
            sections,
            symbols: SymbolMap::new(),
            build_id: None,
            debug_link: None,
            uuid: None,
            anomalies: Vec::new(),
        })
    }

    /// Builds a registry directly from pre-loaded sections.
    ///
    /// This is the lowest-level entry point, for embedders that already
    /// hold decompressed, relocated section bytes.
    pub fn from_sections(endian: Endianness, sections: Vec<Section>) -> Self {
        let mut groups_present: Vec<u32> = sections
            .iter()
            .map(|section| section.group)
            .filter(|&group| group != 0)
            .collect();
        groups_present.sort_unstable();
        groups_present.dedup();

        SectionRegistry {
            format: FileFormat::Unknown,
            endian,
            arch: Arch::Unknown,
            kind: ObjectKind::Other,
            group: resolve_group(GROUP_ANY, &groups_present),
            groups_present,
            sections,
            symbols: SymbolMap::new(),
            build_id: None,
            debug_link: None,
            uuid: None,
            anomalies: Vec::new(),
        }
    }

    /// Builds a registry from a caller-supplied object reader.
    ///
    /// Sections are matched by name in any of the known spellings. Group
    /// assignment is name-based only (`.dwo` suffixes), since the reader
    /// interface does not expose container group metadata.
    pub fn from_reader<'data, R>(reader: &R, requested: u32) -> Result<Self, DwarfError>
    where
        R: ObjectReader<'data> + ?Sized,
    {
        if !matches!(reader.pointer_size(), 4 | 8) {
            return Err(DwarfErrorKind::OffsetSize.into());
        }

        let mut anomalies = Vec::new();
        let mut sections = Vec::new();
        let mut groups_present = Vec::new();

        for index in 0..reader.section_count() {
            let info = reader.section_info(index)?;
            if info.size > reader.object_size() {
                anomalies.push(DwarfErrorKind::SectionSizeOrOffsetLarge);
                continue;
            }
            let (id, is_dwo, compressed) = match SectionId::from_section_name(&info.name) {
                Some(matched) => matched,
                None => continue,
            };

            let group = if is_dwo { GROUP_DWO } else { GROUP_BASE };
            if !groups_present.contains(&group) {
                groups_present.push(group);
            }

            let data = reader.load_section(index)?;
            let data = if compressed || data.starts_with(b"ZLIB") {
                match decompress_gnu(&data) {
                    Ok(data) => data,
                    Err(error) => {
                        anomalies.push(error.kind());
                        continue;
                    }
                }
            } else {
                data.into_owned()
            };

            sections.push(Section {
                id: Some(id),
                name: info.name,
                data,
                address: info.address,
                group,
                is_dwo,
                compressed,
                relocated: false,
            });
        }

        groups_present.sort_unstable();
        let group = resolve_group(requested, &groups_present);
        sections.retain(|section| section.group == group);

        let mut registry = SectionRegistry {
            format: FileFormat::Unknown,
            endian: reader.endianness(),
            arch: reader.machine_type(),
            kind: reader.object_kind(),
            group,
            groups_present,
            sections,
            symbols: SymbolMap::new(),
            build_id: None,
            debug_link: None,
            uuid: None,
            anomalies,
        };

        if registry.kind == ObjectKind::Relocatable {
            for index in 0..reader.section_count() {
                let entries = reader.relocations(index)?;
                if entries.is_empty() {
                    continue;
                }
                let info = reader.section_info(index)?;
                let section = match registry
                    .sections
                    .iter_mut()
                    .find(|section| section.name == info.name)
                {
                    Some(section) => section,
                    None => continue,
                };

                for entry in &entries {
                    let width = match reader.relocation_width(entry.rtype) {
                        Some(width) => width,
                        None => {
                            registry
                                .anomalies
                                .push(DwarfErrorKind::UnhandledRelocation(entry.rtype));
                            continue;
                        }
                    };
                    let symbol_value = reader.symbol_value(entry.symbol).unwrap_or(0);
                    let mut patched = *entry;
                    patched.addend = patched.addend.wrapping_add(symbol_value as i64);
                    if apply_relocation(&mut section.data, &patched, width, registry.endian)
                        .is_err()
                    {
                        registry
                            .anomalies
                            .push(DwarfErrorKind::SectionSizeOrOffsetLarge);
                        continue;
                    }
                    section.relocated = true;
                }
            }
        }

        Ok(registry)
    }

    /// The container format the registry was built from.
    pub fn file_format(&self) -> FileFormat {
        self.format
    }

    /// The byte order of the object.
    pub fn endianness(&self) -> Endianness {
        self.endian
    }

    /// The CPU architecture of the object.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The kind of the object.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The group this registry exposes.
    pub fn group(&self) -> u32 {
        self.group
    }

    /// All group numbers that had DWARF-bearing sections.
    pub fn groups_present(&self) -> &[u32] {
        &self.groups_present
    }

    /// The loaded sections.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Looks up a loaded section by identifier.
    ///
    /// Sections of the selected group win over same-named sections of
    /// other groups that were loaded through
    /// [`from_sections`](#method.from_sections).
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections
            .iter()
            .find(|section| section.id == Some(id) && section.group == self.group)
            .or_else(|| self.sections.iter().find(|section| section.id == Some(id)))
    }

    /// The bytes of a loaded section.
    pub fn section_data(&self, id: SectionId) -> Option<&[u8]> {
        self.section(id).map(|section| section.data.as_slice())
    }

    /// Whether a section is present.
    pub fn has_section(&self, id: SectionId) -> bool {
        self.section(id).is_some()
    }

    /// The function symbols of the object, for address lookups.
    pub fn symbols(&self) -> &SymbolMap<'static> {
        &self.symbols
    }

    /// The GNU build id of the object, when present.
    pub fn build_id(&self) -> Option<&[u8]> {
        self.build_id.as_deref()
    }

    /// The debug link filename and CRC, when present.
    pub fn debug_link(&self) -> Option<(&str, u32)> {
        self.debug_link
            .as_ref()
            .map(|(name, crc)| (name.as_str(), *crc))
    }

    /// The Mach-O UUID of the object, when present.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.uuid
    }

    /// The code identifier of the object.
    ///
    /// For Mach-O this is the UUID load command; for ELF the GNU build id.
    pub fn code_id(&self) -> Option<CodeId> {
        match self.format {
            FileFormat::MachO => self.uuid.map(|uuid| CodeId::from_binary(&uuid)),
            _ => self
                .build_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(CodeId::from_binary),
        }
    }

    /// The debug identifier of the object, used to match debug companions.
    ///
    /// The identifier bytes are truncated or zero-extended to UUID size.
    /// Little-endian objects have the first three UUID fields byte-swapped
    /// to network order, matching the convention of breakpad processors.
    pub fn debug_id(&self) -> DebugId {
        let identifier = match self.format {
            FileFormat::MachO => self.uuid.as_ref().map(|uuid| &uuid[..]),
            _ => self.build_id.as_deref(),
        };
        let identifier = match identifier {
            Some(identifier) if !identifier.is_empty() => identifier,
            _ => return DebugId::default(),
        };

        let mut data = [0u8; 16];
        let len = identifier.len().min(16);
        data[..len].copy_from_slice(&identifier[..len]);

        if self.endian == Endianness::Little {
            data[0..4].reverse(); // uuid field 1
            data[4..6].reverse(); // uuid field 2
            data[6..8].reverse(); // uuid field 3
        }

        Uuid::from_slice(&data)
            .map(DebugId::from_uuid)
            .unwrap_or_default()
    }

    /// Non-fatal anomalies collected while building the registry.
    pub(crate) fn anomalies(&self) -> &[DwarfErrorKind] {
        &self.anomalies
    }
}

/// Resolves a requested group against the groups present in the object.
fn resolve_group(requested: u32, present: &[u32]) -> u32 {
    if requested != GROUP_ANY {
        return requested;
    }
    if present.contains(&GROUP_BASE) {
        GROUP_BASE
    } else if present.contains(&GROUP_DWO) {
        GROUP_DWO
    } else {
        present.first().copied().unwrap_or(GROUP_BASE)
    }
}

/// Patches `width` bytes at the relocation's offset with existing + addend.
fn apply_relocation(
    data: &mut [u8],
    entry: &RelocationEntry,
    width: u8,
    endian: Endianness,
) -> Result<(), ()> {
    let offset = usize::try_from(entry.offset).map_err(|_| ())?;
    let end = offset.checked_add(width as usize).ok_or(())?;
    if end > data.len() {
        return Err(());
    }

    match width {
        4 => {
            let raw: [u8; 4] = data[offset..end].try_into().unwrap();
            let existing = match endian {
                Endianness::Little => u32::from_le_bytes(raw),
                Endianness::Big => u32::from_be_bytes(raw),
            };
            let patched = existing.wrapping_add(entry.addend as u32);
            let out = match endian {
                Endianness::Little => patched.to_le_bytes(),
                Endianness::Big => patched.to_be_bytes(),
            };
            data[offset..end].copy_from_slice(&out);
        }
        8 => {
            let raw: [u8; 8] = data[offset..end].try_into().unwrap();
            let existing = match endian {
                Endianness::Little => u64::from_le_bytes(raw),
                Endianness::Big => u64::from_be_bytes(raw),
            };
            let patched = existing.wrapping_add(entry.addend as u64);
            let out = match endian {
                Endianness::Little => patched.to_le_bytes(),
                Endianness::Big => patched.to_be_bytes(),
            };
            data[offset..end].copy_from_slice(&out);
        }
        _ => return Err(()),
    }
    Ok(())
}

/// Inflates a GNU `ZLIB`-prefixed compressed section.
fn decompress_gnu(data: &[u8]) -> Result<Vec<u8>, DwarfError> {
    use flate2::{Decompress, FlushDecompress};

    if !data.starts_with(b"ZLIB") || data.len() < 12 {
        return Err(DwarfErrorKind::Truncated.into());
    }
    let mut size_bytes = [0; 8];
    size_bytes.copy_from_slice(&data[4..12]);
    let size = u64::from_be_bytes(size_bytes);

    let mut decompressed = Vec::with_capacity(size as usize);
    Decompress::new(true)
        .decompress_vec(&data[12..], &mut decompressed, FlushDecompress::Finish)
        .map_err(|error| DwarfError::new(DwarfErrorKind::Truncated, error))?;
    Ok(decompressed)
}

/// Where the opened debug object came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathSource {
    /// The originally requested file.
    Original,
    /// A companion found through `.gnu_debuglink` or the build id.
    Debuglink,
    /// A companion found in a sibling dSYM bundle.
    Dsym,
}

/// A located debug companion file.
#[derive(Clone, Debug)]
pub struct FoundDebugFile {
    /// The path of the companion.
    pub path: PathBuf,
    /// How it was found.
    pub source: PathSource,
}

/// Locates debug companion files through debug links, build ids and dSYM
/// bundles.
#[derive(Clone, Debug, Default)]
pub struct DebugFileLocator {
    search_paths: Vec<PathBuf>,
}

impl DebugFileLocator {
    /// Creates a locator preferring the given search paths.
    pub fn new(search_paths: &[PathBuf]) -> Self {
        DebugFileLocator {
            search_paths: search_paths.to_vec(),
        }
    }

    /// Tries to find the debug companion of the given object.
    ///
    /// Debug link candidates must pass the CRC32 check; build id and dSYM
    /// candidates must carry the matching identifier. A candidate that
    /// fails verification is treated as if it did not exist.
    pub fn locate(
        &self,
        object_path: &Path,
        object: &Object<'_>,
    ) -> Result<Option<FoundDebugFile>, DwarfError> {
        match object {
            Object::Elf(elf) => self.locate_elf(object_path, elf),
            Object::MachO(macho) => self.locate_dsym(object_path, macho),
            Object::Pe(_) => Ok(None),
        }
    }

    fn candidate_dirs(&self, object_dir: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.search_paths.clone();
        dirs.push(object_dir.to_path_buf());
        dirs.push(object_dir.join(".debug"));
        dirs.push(Path::new("/usr/lib/debug").join(object_dir.strip_prefix("/").unwrap_or(object_dir)));
        dirs
    }

    fn locate_elf(
        &self,
        object_path: &Path,
        elf: &ElfObject<'_>,
    ) -> Result<Option<FoundDebugFile>, DwarfError> {
        let object_dir = object_path.parent().unwrap_or_else(|| Path::new("."));

        if let Ok(Some((filename, expected_crc))) = elf.debug_link() {
            let filename = PathBuf::from(filename.to_string_lossy().into_owned());
            for dir in self.candidate_dirs(object_dir) {
                let candidate = dir.join(&filename);
                let contents = match std::fs::read(&candidate) {
                    Ok(contents) => contents,
                    Err(_) => continue,
                };
                if crc32fast::hash(&contents) == expected_crc {
                    return Ok(Some(FoundDebugFile {
                        path: candidate,
                        source: PathSource::Debuglink,
                    }));
                }
            }
        }

        if let Some(build_id) = elf.build_id() {
            if build_id.len() >= 2 {
                let head = format!("{:02x}", build_id[0]);
                let tail: String = build_id[1..]
                    .iter()
                    .map(|byte| format!("{:02x}", byte))
                    .collect();
                let mut roots: Vec<PathBuf> = self.search_paths.clone();
                roots.push(PathBuf::from("/usr/lib/debug"));

                for root in roots {
                    let candidate = root
                        .join(".build-id")
                        .join(&head)
                        .join(format!("{}.debug", tail));
                    let contents = match std::fs::read(&candidate) {
                        Ok(contents) => contents,
                        Err(_) => continue,
                    };
                    let matches = Object::parse(&contents)
                        .ok()
                        .and_then(|object| match object {
                            Object::Elf(elf) => elf.build_id().map(|id| id == build_id),
                            _ => None,
                        })
                        .unwrap_or(false);
                    if matches {
                        return Ok(Some(FoundDebugFile {
                            path: candidate,
                            source: PathSource::Debuglink,
                        }));
                    }
                }
            }
        }

        Ok(None)
    }

    fn locate_dsym(
        &self,
        object_path: &Path,
        macho: &crate::macho::MachObject<'_>,
    ) -> Result<Option<FoundDebugFile>, DwarfError> {
        let filename = match object_path.file_name() {
            Some(name) => name,
            None => return Ok(None),
        };

        let mut bundle = object_path.as_os_str().to_owned();
        bundle.push(".dSYM");
        let candidate = PathBuf::from(bundle)
            .join("Contents")
            .join("Resources")
            .join("DWARF")
            .join(filename);

        let contents = match std::fs::read(&candidate) {
            Ok(contents) => contents,
            Err(_) => return Ok(None),
        };

        let matches = Object::parse(&contents)
            .ok()
            .and_then(|object| match object {
                Object::MachO(companion) => {
                    Some(companion.uuid().is_some() && companion.uuid() == macho.uuid())
                }
                _ => None,
            })
            .unwrap_or(false);

        if matches {
            Ok(Some(FoundDebugFile {
                path: candidate,
                source: PathSource::Dsym,
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_group() {
        assert_eq!(resolve_group(GROUP_ANY, &[GROUP_BASE, GROUP_DWO]), GROUP_BASE);
        assert_eq!(resolve_group(GROUP_ANY, &[GROUP_DWO]), GROUP_DWO);
        assert_eq!(resolve_group(GROUP_ANY, &[3]), 3);
        assert_eq!(resolve_group(GROUP_ANY, &[]), GROUP_BASE);
        assert_eq!(resolve_group(5, &[GROUP_BASE]), 5);
    }

    #[test]
    fn test_apply_relocation() {
        let mut data = vec![0x10, 0x00, 0x00, 0x00, 0xaa];
        let entry = RelocationEntry {
            offset: 0,
            symbol: 0,
            rtype: 10,
            rtype2: 0,
            rtype3: 0,
            addend: 0x30,
            is_rela: true,
        };
        apply_relocation(&mut data, &entry, 4, Endianness::Little).unwrap();
        assert_eq!(&data[..4], &[0x40, 0x00, 0x00, 0x00]);
        assert_eq!(data[4], 0xaa);
    }

    #[test]
    fn test_apply_relocation_out_of_bounds() {
        let mut data = vec![0u8; 4];
        let entry = RelocationEntry {
            offset: 2,
            symbol: 0,
            rtype: 10,
            rtype2: 0,
            rtype3: 0,
            addend: 1,
            is_rela: true,
        };
        assert!(apply_relocation(&mut data, &entry, 4, Endianness::Little).is_err());
    }
}
