//! The session handle owning all DWARF reader state.
//!
//! A [`DwarfSession`] borrows its section bytes from a [`SectionRegistry`]
//! and owns everything derived from them: eagerly parsed unit headers,
//! lazily built per-unit state, shared abbreviation tables, the
//! harmless-error ring, and an optional tied session for split-DWARF
//! lookups.
//!
//! Sessions are single-threaded: caches use interior mutability that is not
//! synchronized. Independent sessions over different objects can be used
//! from parallel threads.
//!
//! [`DwarfSession`]: struct.DwarfSession.html
//! [`SectionRegistry`]: ../registry/struct.SectionRegistry.html

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use lazycell::LazyCell;

use dwarven_common::{AsSelf, ByteView, Endianness, SelfCell};

use crate::abbrev::AbbrevTable;
use crate::base::SectionId;
use crate::error::{DwarfError, DwarfErrorKind, HarmlessRing};
use crate::object::Object;
use crate::registry::{DebugFileLocator, PathSource, SectionRegistry};
use crate::unit::{Die, Unit, UnitHeader, UnitState};

/// The DWARF sections a session reads from, as borrowed slices.
///
/// Missing sections are empty slices; queries against them report valid
/// absence rather than errors.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SessionSections<'data> {
    pub debug_info: &'data [u8],
    pub debug_types: &'data [u8],
    pub debug_abbrev: &'data [u8],
    pub debug_str: &'data [u8],
    pub debug_line: &'data [u8],
    pub debug_line_str: &'data [u8],
    pub debug_str_offsets: &'data [u8],
    pub debug_addr: &'data [u8],
    pub debug_ranges: &'data [u8],
    pub debug_rnglists: &'data [u8],
    pub debug_loc: &'data [u8],
    pub debug_loclists: &'data [u8],
    pub debug_frame: &'data [u8],
    pub eh_frame: &'data [u8],
    pub debug_aranges: &'data [u8],
}

impl<'data> SessionSections<'data> {
    fn from_registry(registry: &'data SectionRegistry) -> Self {
        let data = |id| registry.section_data(id).unwrap_or(&[][..]);
        SessionSections {
            debug_info: data(SectionId::DebugInfo),
            debug_types: data(SectionId::DebugTypes),
            debug_abbrev: data(SectionId::DebugAbbrev),
            debug_str: data(SectionId::DebugStr),
            debug_line: data(SectionId::DebugLine),
            debug_line_str: data(SectionId::DebugLineStr),
            debug_str_offsets: data(SectionId::DebugStrOffsets),
            debug_addr: data(SectionId::DebugAddr),
            debug_ranges: data(SectionId::DebugRanges),
            debug_rnglists: data(SectionId::DebugRngLists),
            debug_loc: data(SectionId::DebugLoc),
            debug_loclists: data(SectionId::DebugLocLists),
            debug_frame: data(SectionId::DebugFrame),
            eh_frame: data(SectionId::EhFrame),
            debug_aranges: data(SectionId::DebugAranges),
        }
    }
}

/// A session over the DWARF debugging information of one object.
///
/// All handles derived from a session ([`Unit`], [`Die`], line programs,
/// list iterators) borrow the session and cannot outlive it. Dropping the
/// session releases every derived allocation.
///
/// [`Unit`]: ../unit/struct.Unit.html
/// [`Die`]: ../unit/struct.Die.html
pub struct DwarfSession<'data> {
    pub(crate) sections: SessionSections<'data>,
    endian: Endianness,
    info_headers: Vec<UnitHeader>,
    types_headers: Vec<UnitHeader>,
    info_states: Vec<LazyCell<UnitState<'data>>>,
    types_states: Vec<LazyCell<UnitState<'data>>>,
    abbrev_cache: RefCell<BTreeMap<u64, Rc<AbbrevTable>>>,
    signature_index: LazyCell<HashMap<u64, (bool, usize)>>,
    tied: LazyCell<Arc<DwarfSession<'data>>>,
    harmless: HarmlessRing,
}

impl<'data> DwarfSession<'data> {
    /// Creates a session reading from the given registry.
    ///
    /// Unit headers of `.debug_info` and `.debug_types` are parsed eagerly;
    /// everything else is decoded on demand. A unit whose declared length
    /// runs past its section is clamped and recorded as a harmless anomaly,
    /// so that walking it reports `Truncated` at the damaged entry rather
    /// than failing the open.
    pub fn parse(registry: &'data SectionRegistry) -> Result<Self, DwarfError> {
        let sections = SessionSections::from_registry(registry);
        let endian = registry.endianness();
        let harmless = HarmlessRing::default();

        for &kind in registry.anomalies() {
            harmless.record(kind.into());
        }

        let info_headers = Self::parse_headers(sections.debug_info, true, endian, &harmless)?;
        let types_headers = Self::parse_headers(sections.debug_types, false, endian, &harmless)?;

        let info_states = info_headers.iter().map(|_| LazyCell::new()).collect();
        let types_states = types_headers.iter().map(|_| LazyCell::new()).collect();

        Ok(DwarfSession {
            sections,
            endian,
            info_headers,
            types_headers,
            info_states,
            types_states,
            abbrev_cache: RefCell::new(BTreeMap::new()),
            signature_index: LazyCell::new(),
            tied: LazyCell::new(),
            harmless,
        })
    }

    fn parse_headers(
        data: &[u8],
        is_info: bool,
        endian: Endianness,
        harmless: &HarmlessRing,
    ) -> Result<Vec<UnitHeader>, DwarfError> {
        let mut headers = Vec::new();
        let mut offset = 0u64;

        while offset < data.len() as u64 {
            // A malformed header for a later unit clips the walk there; the
            // units parsed so far stay usable.
            let header = match UnitHeader::parse(data, offset, is_info, endian) {
                Ok(header) => header,
                Err(error) if offset > 0 => {
                    harmless.record(error);
                    break;
                }
                Err(error) => return Err(error),
            };
            let end = header.end_offset();
            if end > data.len() as u64 {
                harmless.record(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
                headers.push(header);
                break;
            }
            if end <= offset {
                // A zero-length unit would loop forever.
                harmless.record(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
                break;
            }
            headers.push(header);
            offset = end;
        }

        Ok(headers)
    }

    /// The byte order of this session's object.
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// The number of compilation units in `.debug_info`.
    pub fn unit_count(&self) -> usize {
        self.info_headers.len()
    }

    /// The number of type units in `.debug_types`.
    pub fn type_unit_count(&self) -> usize {
        self.types_headers.len()
    }

    /// Returns the `.debug_info` unit at the given index.
    pub fn unit(&self, index: usize) -> Result<Unit<'_, 'data>, DwarfError> {
        self.unit_impl(true, index)
    }

    /// Returns the `.debug_types` unit at the given index.
    pub fn type_unit(&self, index: usize) -> Result<Unit<'_, 'data>, DwarfError> {
        self.unit_impl(false, index)
    }

    fn unit_impl(&self, is_info: bool, index: usize) -> Result<Unit<'_, 'data>, DwarfError> {
        let (headers, states) = if is_info {
            (&self.info_headers, &self.info_states)
        } else {
            (&self.types_headers, &self.types_states)
        };

        let header = headers.get(index).ok_or(DwarfErrorKind::InvalidHandle)?;
        let state = states[index].try_borrow_with(|| UnitState::parse(self, header))?;

        Ok(Unit {
            session: self,
            header,
            state,
        })
    }

    /// Returns an iterator over the compilation units of `.debug_info`.
    pub fn units(&self) -> UnitIter<'_, 'data> {
        UnitIter {
            session: self,
            is_info: true,
            index: 0,
        }
    }

    /// Returns an iterator over the type units of `.debug_types`.
    pub fn type_units(&self) -> UnitIter<'_, 'data> {
        UnitIter {
            session: self,
            is_info: false,
            index: 0,
        }
    }

    /// Finds the unit containing the given section offset.
    pub fn unit_for_offset(
        &self,
        is_info: bool,
        offset: u64,
    ) -> Result<Option<Unit<'_, 'data>>, DwarfError> {
        let headers = if is_info {
            &self.info_headers
        } else {
            &self.types_headers
        };

        let index = match headers.binary_search_by_key(&offset, |header| header.offset()) {
            Ok(index) => index,
            Err(0) => return Ok(None),
            Err(next) => next - 1,
        };

        if offset >= headers[index].end_offset() {
            return Ok(None);
        }
        self.unit_impl(is_info, index).map(Some)
    }

    /// Resolves a DIE at an absolute `.debug_info` or `.debug_types` offset.
    ///
    /// This is the resolution path for `DW_FORM_ref_addr` references.
    pub fn die_at_offset(
        &self,
        is_info: bool,
        offset: u64,
    ) -> Result<Option<Die<'_, 'data>>, DwarfError> {
        match self.unit_for_offset(is_info, offset)? {
            Some(unit) => unit.die_at(offset),
            None => Ok(None),
        }
    }

    /// Finds the type unit with the given signature.
    ///
    /// DWARF 5 type units in `.debug_info` and DWARF 4 type units in
    /// `.debug_types` are both indexed. This is the resolution path for
    /// `DW_FORM_ref_sig8` references.
    pub fn unit_by_signature(
        &self,
        signature: u64,
    ) -> Result<Option<Unit<'_, 'data>>, DwarfError> {
        let index = self.signature_index.borrow_with(|| {
            let mut index = HashMap::new();
            for (position, header) in self.info_headers.iter().enumerate() {
                if let Some(signature) = header.type_signature() {
                    index.insert(signature, (true, position));
                }
            }
            for (position, header) in self.types_headers.iter().enumerate() {
                if let Some(signature) = header.type_signature() {
                    index.insert(signature, (false, position));
                }
            }
            index
        });

        match index.get(&signature) {
            Some(&(is_info, position)) => self.unit_impl(is_info, position).map(Some),
            None => Ok(None),
        }
    }

    /// Attaches a supplementary ("tied") session.
    ///
    /// The base session consults the tied session for `.debug_addr` data of
    /// split units, supplementary strings (`strp_sup`) and supplementary
    /// DIE references (`ref_sup`). Attaching a second time has no effect.
    pub fn attach_tied(&self, tied: Arc<DwarfSession<'data>>) {
        let _ = self.tied.fill(tied);
    }

    /// The tied session, if one has been attached.
    pub fn tied(&self) -> Option<&DwarfSession<'data>> {
        self.tied.borrow().map(|arc| arc.as_ref())
    }

    /// Drains the non-fatal anomalies recorded while parsing.
    pub fn harmless_errors(&self) -> Vec<DwarfError> {
        self.harmless.drain()
    }

    /// The raw bytes of a DWARF section this session reads from.
    ///
    /// Returns `None` for sections the session does not hold. The returned
    /// slice borrows from the backing registry, not from the session.
    pub fn section_data(&self, id: SectionId) -> Option<&'data [u8]> {
        let data = match id {
            SectionId::DebugInfo => self.sections.debug_info,
            SectionId::DebugTypes => self.sections.debug_types,
            SectionId::DebugAbbrev => self.sections.debug_abbrev,
            SectionId::DebugStr => self.sections.debug_str,
            SectionId::DebugLine => self.sections.debug_line,
            SectionId::DebugLineStr => self.sections.debug_line_str,
            SectionId::DebugStrOffsets => self.sections.debug_str_offsets,
            SectionId::DebugAddr => self.sections.debug_addr,
            SectionId::DebugRanges => self.sections.debug_ranges,
            SectionId::DebugRngLists => self.sections.debug_rnglists,
            SectionId::DebugLoc => self.sections.debug_loc,
            SectionId::DebugLocLists => self.sections.debug_loclists,
            SectionId::DebugFrame => self.sections.debug_frame,
            SectionId::EhFrame => self.sections.eh_frame,
            SectionId::DebugAranges => self.sections.debug_aranges,
            _ => return None,
        };
        (!data.is_empty()).then_some(data)
    }

    /// The address size used when no unit declares one: the first unit's,
    /// or 8 for sections read without any units.
    pub(crate) fn default_address_size(&self) -> u8 {
        self.info_headers
            .first()
            .map(|header| header.address_size())
            .unwrap_or(8)
    }

    pub(crate) fn unit_section_data(&self, is_info: bool) -> &'data [u8] {
        if is_info {
            self.sections.debug_info
        } else {
            self.sections.debug_types
        }
    }

    pub(crate) fn abbrev_table(&self, offset: u64) -> Result<Rc<AbbrevTable>, DwarfError> {
        if let Some(table) = self.abbrev_cache.borrow().get(&offset) {
            return Ok(Rc::clone(table));
        }

        let table = Rc::new(AbbrevTable::parse(
            self.sections.debug_abbrev,
            offset,
            self.endian,
        )?);
        self.abbrev_cache
            .borrow_mut()
            .insert(offset, Rc::clone(&table));
        Ok(table)
    }

    /// Reads the NUL-terminated string at `offset` in `.debug_str`.
    pub(crate) fn debug_str_at(&self, offset: u64) -> Result<&'data [u8], DwarfError> {
        Self::string_at(self.sections.debug_str, offset, self.endian)
    }

    /// Reads the NUL-terminated string at `offset` in `.debug_line_str`.
    pub(crate) fn debug_line_str_at(&self, offset: u64) -> Result<&'data [u8], DwarfError> {
        Self::string_at(self.sections.debug_line_str, offset, self.endian)
    }

    fn string_at(
        data: &'data [u8],
        offset: u64,
        endian: Endianness,
    ) -> Result<&'data [u8], DwarfError> {
        let offset = usize::try_from(offset)
            .ok()
            .filter(|&offset| offset < data.len())
            .ok_or(DwarfErrorKind::SectionStringOffsetBad)?;
        let mut cursor = crate::reader::Cursor::at(data, offset, endian);
        cursor
            .read_null_terminated()
            .map_err(|_| DwarfErrorKind::SectionStringOffsetBad.into())
    }

    /// Resolves a `strx` index through `.debug_str_offsets`.
    pub(crate) fn string_offset_at(
        &self,
        unit: &Unit<'_, 'data>,
        index: u64,
    ) -> Result<u64, DwarfError> {
        let base = unit
            .state
            .str_offsets_base
            .ok_or(DwarfErrorKind::MissingBase)?;
        let offset_size = u64::from(unit.header.format().offset_size());
        let position = base
            .checked_add(index.checked_mul(offset_size).ok_or(DwarfErrorKind::Truncated)?)
            .ok_or(DwarfErrorKind::Truncated)?;

        let data = self.sections.debug_str_offsets;
        let mut cursor =
            crate::reader::Cursor::at(data, position as usize, self.endian);
        cursor.read_offset(unit.header.format())
    }

    /// Resolves an `addrx` index through `.debug_addr`.
    ///
    /// If this session does not carry `.debug_addr`, the tied session is
    /// consulted, locating the skeleton unit with a matching DWO id to find
    /// the address base.
    pub(crate) fn address_at(
        &self,
        unit: &Unit<'_, 'data>,
        index: u64,
    ) -> Result<u64, DwarfError> {
        let address_size = unit.header.address_size();

        if !self.sections.debug_addr.is_empty() {
            let base = unit.state.addr_base.unwrap_or(0);
            return Self::debug_addr_entry(
                self.sections.debug_addr,
                base,
                index,
                address_size,
                self.endian,
            );
        }

        if let Some(tied) = self.tied() {
            let base = tied.addr_base_for_dwo(unit.dwo_id())?;
            return Self::debug_addr_entry(
                tied.sections.debug_addr,
                base,
                index,
                address_size,
                tied.endian,
            );
        }

        Err(DwarfErrorKind::MissingBase.into())
    }

    /// Finds the `.debug_addr` base of the skeleton unit with the given
    /// DWO id, used when a split unit resolves addresses through the tied
    /// session.
    pub(crate) fn addr_base_for_dwo(&self, dwo_id: Option<u64>) -> Result<u64, DwarfError> {
        for index in 0..self.info_headers.len() {
            let unit = self.unit(index)?;
            if dwo_id.is_none() || unit.dwo_id() == dwo_id {
                if let Some(base) = unit.state.addr_base {
                    return Ok(base);
                }
            }
        }
        Ok(0)
    }

    fn debug_addr_entry(
        data: &[u8],
        base: u64,
        index: u64,
        address_size: u8,
        endian: Endianness,
    ) -> Result<u64, DwarfError> {
        let position = base
            .checked_add(
                index
                    .checked_mul(u64::from(address_size))
                    .ok_or(DwarfErrorKind::AddrIndexOutOfRange(index))?,
            )
            .ok_or(DwarfErrorKind::AddrIndexOutOfRange(index))?;

        let end = position.checked_add(u64::from(address_size));
        if end.is_none() || end.unwrap() > data.len() as u64 {
            return Err(DwarfErrorKind::AddrIndexOutOfRange(index).into());
        }

        let mut cursor = crate::reader::Cursor::at(data, position as usize, endian);
        cursor.read_address(address_size)
    }
}

impl<'slf, 'data: 'slf> AsSelf<'slf> for DwarfSession<'data> {
    type Ref = DwarfSession<'slf>;

    fn as_self(&'slf self) -> &Self::Ref {
        unsafe { std::mem::transmute(self) }
    }
}

impl std::fmt::Debug for DwarfSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DwarfSession")
            .field("endian", &self.endian)
            .field("units", &self.info_headers.len())
            .field("type_units", &self.types_headers.len())
            .field("tied", &self.tied.filled())
            .finish()
    }
}

/// An iterator over the units of a session.
pub struct UnitIter<'s, 'data> {
    session: &'s DwarfSession<'data>,
    is_info: bool,
    index: usize,
}

impl<'s, 'data> Iterator for UnitIter<'s, 'data> {
    type Item = Result<Unit<'s, 'data>, DwarfError>;

    fn next(&mut self) -> Option<Self::Item> {
        let count = if self.is_info {
            self.session.info_headers.len()
        } else {
            self.session.types_headers.len()
        };

        if self.index >= count {
            return None;
        }

        let result = self.session.unit_impl(self.is_info, self.index);
        self.index += 1;
        Some(result)
    }
}

impl std::iter::FusedIterator for UnitIter<'_, '_> {}

/// The registries backing a loaded session pair.
#[derive(Debug)]
pub struct RegistrySet {
    base: SectionRegistry,
    tied: Option<SectionRegistry>,
}

struct SessionBundle<'data> {
    session: DwarfSession<'data>,
}

impl<'slf, 'data: 'slf> AsSelf<'slf> for SessionBundle<'data> {
    type Ref = SessionBundle<'slf>;

    fn as_self(&'slf self) -> &Self::Ref {
        unsafe { std::mem::transmute(self) }
    }
}

/// A self-contained session loaded from files.
///
/// This owns the section registries (and through them all section bytes)
/// together with the session borrowing from them, so it can be moved and
/// stored freely. When a debug companion was resolved through a debug link
/// or dSYM bundle, the companion provides the sections and the original
/// object is attached as the tied session.
pub struct LoadedSession {
    cell: SelfCell<Box<RegistrySet>, SessionBundle<'static>>,
    path: PathBuf,
    source: PathSource,
}

impl LoadedSession {
    /// Opens the object at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DwarfError> {
        SessionLoader::new().open(path)
    }

    /// Creates a session from already-built registries.
    pub fn from_registries(
        base: SectionRegistry,
        tied: Option<SectionRegistry>,
        path: PathBuf,
        source: PathSource,
    ) -> Result<Self, DwarfError> {
        let set = Box::new(RegistrySet { base, tied });
        let cell = SelfCell::try_new(set, |set| {
            let set = unsafe { &*set };
            let session = DwarfSession::parse(&set.base)?;
            if let Some(ref tied) = set.tied {
                session.attach_tied(Arc::new(DwarfSession::parse(tied)?));
            }
            Ok::<_, DwarfError>(SessionBundle { session })
        })?;

        Ok(LoadedSession { cell, path, source })
    }

    /// The session reading the resolved debug object.
    pub fn session(&self) -> &DwarfSession<'_> {
        &self.cell.get().session
    }

    /// The path of the object actually opened.
    ///
    /// This differs from the requested path when a debug companion was
    /// resolved through a debug link or a dSYM bundle.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the opened object came from.
    pub fn path_source(&self) -> PathSource {
        self.source
    }
}

impl std::fmt::Debug for LoadedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSession")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("session", &self.cell.get().session)
            .finish()
    }
}

/// Configuration for opening sessions from the file system.
///
/// The loader controls which section group is exposed and where debug
/// companion files are searched.
#[derive(Clone, Debug)]
pub struct SessionLoader {
    group: u32,
    search_paths: Vec<PathBuf>,
}

impl SessionLoader {
    /// Creates a loader with the default group and search paths.
    pub fn new() -> Self {
        SessionLoader {
            group: crate::base::GROUP_ANY,
            search_paths: Vec::new(),
        }
    }

    /// Selects the section group to expose.
    pub fn group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    /// Adds a directory to search for debug companion files.
    ///
    /// The object's own directory and the well-known system locations are
    /// always searched; paths added here take precedence.
    pub fn search_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Opens the object at `path`.
    ///
    /// If the object lacks `.debug_info` but carries a debug link or
    /// build id, the companion debug file is located and used instead,
    /// with the original object attached as the tied session.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<LoadedSession, DwarfError> {
        let path = path.as_ref();
        let view = ByteView::open(path)?;
        let object = Object::parse(view.as_slice())?;
        let registry = SectionRegistry::from_object(&object, self.group)?;

        if registry.has_section(SectionId::DebugInfo) {
            return LoadedSession::from_registries(
                registry,
                None,
                path.to_path_buf(),
                PathSource::Original,
            );
        }

        // No debug info in the object itself: follow the debug link or
        // build id to a companion file.
        let locator = DebugFileLocator::new(&self.search_paths);
        if let Some(found) = locator.locate(path, &object)? {
            let companion_view = ByteView::open(&found.path)?;
            let companion = Object::parse(companion_view.as_slice())?;
            let companion_registry = SectionRegistry::from_object(&companion, self.group)?;

            if companion_registry.has_section(SectionId::DebugInfo) {
                return LoadedSession::from_registries(
                    companion_registry,
                    Some(registry),
                    found.path,
                    found.source,
                );
            }
        }

        // Present the original object as-is; it may still carry frame or
        // line information worth reading.
        LoadedSession::from_registries(registry, None, path.to_path_buf(), PathSource::Original)
    }
}

impl Default for SessionLoader {
    fn default() -> Self {
        SessionLoader::new()
    }
}
