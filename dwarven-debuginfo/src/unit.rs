//! Unit headers and the lazy DIE deliverer.
//!
//! Unit headers are parsed eagerly when a session opens, which gives cheap
//! random access for cross-unit references. Everything below the header --
//! the abbreviation table, the root DIE's base offsets, and the DIE tree
//! itself -- is only decoded when a caller asks for it.

use std::rc::Rc;

use dwarven_common::Endianness;

use crate::abbrev::{Abbreviation, AbbrevTable};
use crate::constants::*;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::forms::{self, AttributeValue};
use crate::reader::{Cursor, Format};
use crate::session::DwarfSession;

/// The parsed header of a compilation, type, partial or split unit.
#[derive(Clone, Debug)]
pub struct UnitHeader {
    /// The section offset this unit starts at.
    pub(crate) offset: u64,
    /// Whether the unit lives in `.debug_info` (vs `.debug_types`).
    pub(crate) is_info: bool,
    /// The DWARF offset format of this unit.
    pub(crate) format: Format,
    /// The content length following the initial length field.
    pub(crate) length: u64,
    /// The DWARF version of this unit.
    pub(crate) version: u16,
    /// The unit kind; synthesized for pre-DWARF 5 units.
    pub(crate) kind: DwUt,
    /// The size of a target address in bytes.
    pub(crate) address_size: u8,
    /// The offset of this unit's abbreviation table in `.debug_abbrev`.
    pub(crate) abbrev_offset: u64,
    /// The type signature of a type unit.
    pub(crate) type_signature: Option<u64>,
    /// The unit-relative offset of the type DIE of a type unit.
    pub(crate) type_offset: Option<u64>,
    /// The DWO id of a skeleton or split unit header (DWARF 5).
    pub(crate) dwo_id: Option<u64>,
    /// The size of the header, i.e. the unit-relative offset of the root DIE.
    pub(crate) header_size: u64,
}

impl UnitHeader {
    /// Parses one unit header at `offset` within its section.
    pub(crate) fn parse(
        data: &[u8],
        offset: u64,
        is_info: bool,
        endian: Endianness,
    ) -> Result<Self, DwarfError> {
        let mut cursor = Cursor::at(data, offset as usize, endian);
        let (length, format) = cursor.read_initial_length()?;
        let version = cursor.read_u16()?;

        let mut type_signature = None;
        let mut type_offset = None;
        let mut dwo_id = None;

        let (kind, address_size, abbrev_offset) = match version {
            2..=4 => {
                let abbrev_offset = cursor.read_offset(format)?;
                let address_size = cursor.read_u8()?;
                let kind = if is_info { DW_UT_compile } else { DW_UT_type };
                if !is_info {
                    type_signature = Some(cursor.read_u64()?);
                    type_offset = Some(cursor.read_offset(format)?);
                }
                (kind, address_size, abbrev_offset)
            }
            5 => {
                let kind = DwUt(cursor.read_u8()?);
                let address_size = cursor.read_u8()?;
                let abbrev_offset = cursor.read_offset(format)?;
                match kind {
                    DW_UT_skeleton | DW_UT_split_compile => {
                        dwo_id = Some(cursor.read_u64()?);
                    }
                    DW_UT_type | DW_UT_split_type => {
                        type_signature = Some(cursor.read_u64()?);
                        type_offset = Some(cursor.read_offset(format)?);
                    }
                    DW_UT_compile | DW_UT_partial => {}
                    unknown => {
                        return Err(DwarfErrorKind::VersionUnsupported(u16::from(unknown.0)).into())
                    }
                }
                (kind, address_size, abbrev_offset)
            }
            other => return Err(DwarfErrorKind::VersionUnsupported(other).into()),
        };

        Ok(UnitHeader {
            offset,
            is_info,
            format,
            length,
            version,
            kind,
            address_size,
            abbrev_offset,
            type_signature,
            type_offset,
            dwo_id,
            header_size: cursor.position() as u64 - offset,
        })
    }

    /// The section offset one past the end of this unit.
    pub fn end_offset(&self) -> u64 {
        self.offset
            .saturating_add(u64::from(self.format.initial_length_size()))
            .saturating_add(self.length)
    }

    /// The section offset of the root DIE.
    pub fn first_die_offset(&self) -> u64 {
        self.offset + self.header_size
    }

    /// The section offset this unit starts at.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The DWARF version of this unit.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// The unit kind. Pre-DWARF 5 units report `DW_UT_compile` or
    /// `DW_UT_type` according to the section they live in.
    pub fn kind(&self) -> DwUt {
        self.kind
    }

    /// The DWARF offset format of this unit.
    pub fn format(&self) -> Format {
        self.format
    }

    /// The size of a target address in bytes.
    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    /// The type signature, for type units.
    pub fn type_signature(&self) -> Option<u64> {
        self.type_signature
    }

    /// The DWO id, for DWARF 5 skeleton and split units.
    pub fn dwo_id(&self) -> Option<u64> {
        self.dwo_id
    }
}

/// Lazily computed per-unit state: the abbreviation table and the base
/// offsets extracted from the root DIE.
pub(crate) struct UnitState<'data> {
    pub(crate) abbrevs: Rc<AbbrevTable>,
    pub(crate) addr_base: Option<u64>,
    pub(crate) str_offsets_base: Option<u64>,
    pub(crate) loclists_base: Option<u64>,
    pub(crate) rnglists_base: Option<u64>,
    pub(crate) stmt_list: Option<u64>,
    pub(crate) dwo_id: Option<u64>,
    pub(crate) low_pc: Option<AttributeValue<'data>>,
    pub(crate) name: Option<AttributeValue<'data>>,
    pub(crate) comp_dir: Option<AttributeValue<'data>>,
    pub(crate) dwo_name: Option<AttributeValue<'data>>,
    pub(crate) has_root: bool,
}

impl<'data> UnitState<'data> {
    pub(crate) fn parse(
        session: &DwarfSession<'data>,
        header: &UnitHeader,
    ) -> Result<Self, DwarfError> {
        let abbrevs = session.abbrev_table(header.abbrev_offset)?;

        let mut state = UnitState {
            abbrevs,
            addr_base: None,
            str_offsets_base: None,
            loclists_base: None,
            rnglists_base: None,
            stmt_list: None,
            dwo_id: header.dwo_id,
            low_pc: None,
            name: None,
            comp_dir: None,
            dwo_name: None,
            has_root: false,
        };

        let data = session.unit_section_data(header.is_info);
        let mut cursor = Cursor::at(
            data,
            header.first_die_offset() as usize,
            session.endian(),
        );

        let code = cursor.read_uleb128()?;
        if code == 0 {
            // An empty unit; nothing to extract.
            return Ok(state);
        }

        let abbrev = state
            .abbrevs
            .get(code)
            .ok_or(DwarfErrorKind::AbbrevMissing(code))?
            .clone();
        state.has_root = true;

        for spec in abbrev.attributes() {
            let value = forms::read_value(&mut cursor, *spec, header)?;
            match spec.attr {
                DW_AT_str_offsets_base => state.str_offsets_base = value.offset_value(),
                DW_AT_addr_base | DW_AT_GNU_addr_base => {
                    state.addr_base = value.offset_value().or_else(|| value.udata_value())
                }
                DW_AT_loclists_base => state.loclists_base = value.offset_value(),
                DW_AT_rnglists_base | DW_AT_GNU_ranges_base => {
                    state.rnglists_base = value.offset_value()
                }
                DW_AT_stmt_list => state.stmt_list = value.offset_value(),
                DW_AT_low_pc => state.low_pc = Some(value),
                DW_AT_name => state.name = Some(value),
                DW_AT_comp_dir => state.comp_dir = Some(value),
                DW_AT_dwo_name | DW_AT_GNU_dwo_name => state.dwo_name = Some(value),
                DW_AT_GNU_dwo_id => state.dwo_id = value.udata_value().or(state.dwo_id),
                _ => {}
            }
        }

        // DWARF 5 split units index their own string offset table, whose
        // base defaults to the size of that table's header.
        if state.str_offsets_base.is_none()
            && header.version >= 5
            && matches!(header.kind, DW_UT_split_compile | DW_UT_split_type)
        {
            state.str_offsets_base =
                Some(u64::from(header.format.initial_length_size()) + 4);
        }

        Ok(state)
    }
}

/// A handle to one unit of a session.
///
/// The handle is `Copy` and borrows the session it came from; it is the
/// anchor for all DIE, line, range and location queries within the unit.
#[derive(Clone, Copy)]
pub struct Unit<'s, 'data> {
    pub(crate) session: &'s DwarfSession<'data>,
    pub(crate) header: &'s UnitHeader,
    pub(crate) state: &'s UnitState<'data>,
}

impl<'s, 'data> Unit<'s, 'data> {
    /// The parsed header of this unit.
    pub fn header(&self) -> &'s UnitHeader {
        self.header
    }

    /// The session this unit belongs to.
    pub fn session(&self) -> &'s DwarfSession<'data> {
        self.session
    }

    /// The DWO id of this unit, from the DWARF 5 header or the GNU
    /// split-DWARF attribute.
    pub fn dwo_id(&self) -> Option<u64> {
        self.state.dwo_id
    }

    /// The `DW_AT_stmt_list` offset of this unit's line program.
    pub fn line_program_offset(&self) -> Option<u64> {
        self.state.stmt_list
    }

    /// The base address of this unit, resolving an indexed `DW_AT_low_pc`.
    pub fn base_address(&self) -> Result<Option<u64>, DwarfError> {
        match self.state.low_pc {
            Some(value) => self.address_value(value),
            None => Ok(None),
        }
    }

    /// The name of this unit, usually the primary source file path.
    pub fn name(&self) -> Result<Option<&'data [u8]>, DwarfError> {
        match self.state.name {
            Some(value) => self.string_value(value),
            None => Ok(None),
        }
    }

    /// The compilation directory of this unit.
    pub fn comp_dir(&self) -> Result<Option<&'data [u8]>, DwarfError> {
        match self.state.comp_dir {
            Some(value) => self.string_value(value),
            None => Ok(None),
        }
    }

    /// The name of the split-DWARF companion file, if this is a skeleton.
    pub fn dwo_name(&self) -> Result<Option<&'data [u8]>, DwarfError> {
        match self.state.dwo_name {
            Some(value) => self.string_value(value),
            None => Ok(None),
        }
    }

    /// Returns whether a section offset lies inside this unit's DIE range.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.header.first_die_offset() && offset < self.walk_end()
    }

    /// The root DIE of this unit.
    pub fn root(&self) -> Result<Option<Die<'s, 'data>>, DwarfError> {
        if !self.state.has_root {
            return Ok(None);
        }
        self.die_at(self.header.first_die_offset())
    }

    /// The type DIE of a type unit.
    pub fn type_die(&self) -> Result<Option<Die<'s, 'data>>, DwarfError> {
        match self.header.type_offset {
            Some(rel) => self.die_at(self.header.offset + rel),
            None => Ok(None),
        }
    }

    /// Returns a DIE handle for the given section offset.
    ///
    /// `Ok(None)` is returned if the offset holds a null entry (abbreviation
    /// code 0). Offsets outside this unit fail with `InvalidHandle`.
    pub fn die_at(&self, offset: u64) -> Result<Option<Die<'s, 'data>>, DwarfError> {
        if offset < self.header.first_die_offset() || offset >= self.walk_end() {
            return Err(DwarfErrorKind::InvalidHandle.into());
        }

        let mut cursor = self.cursor_at(offset);
        let code = cursor.read_uleb128()?;
        if code == 0 {
            return Ok(None);
        }

        let abbrev = self
            .state
            .abbrevs
            .get(code)
            .ok_or(DwarfErrorKind::AbbrevMissing(code))?;

        Ok(Some(Die {
            unit: *self,
            offset,
            attrs_offset: cursor.position() as u64,
            abbrev,
        }))
    }

    /// Returns a depth-first iterator over all DIEs of this unit.
    pub fn entries(&self) -> EntriesIter<'s, 'data> {
        EntriesIter {
            unit: *self,
            offset: self.header.first_die_offset(),
            depth: 0,
            done: !self.state.has_root,
        }
    }

    /// Resolves a string-class attribute value to its bytes.
    ///
    /// Returns `Ok(None)` for values that are not strings. Index-based
    /// values require the unit's string offsets base; a missing base is a
    /// `MissingBase` error.
    pub fn string_value(
        &self,
        value: AttributeValue<'data>,
    ) -> Result<Option<&'data [u8]>, DwarfError> {
        match value {
            AttributeValue::String(bytes) => Ok(Some(bytes)),
            AttributeValue::StringRef(offset) => {
                self.session.debug_str_at(offset).map(Some)
            }
            AttributeValue::LineStringRef(offset) => {
                self.session.debug_line_str_at(offset).map(Some)
            }
            AttributeValue::SupStringRef(offset) => match self.session.tied() {
                Some(tied) => tied.debug_str_at(offset).map(Some),
                None => Err(DwarfErrorKind::MissingBase.into()),
            },
            AttributeValue::StringIndex(index) => {
                let offset = self.session.string_offset_at(self, index)?;
                self.session.debug_str_at(offset).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Resolves a reference-class attribute value to the DIE it denotes.
    ///
    /// Same-unit references resolve within this unit, `ref_addr` references
    /// through the session's unit index, type signatures to the type DIE of
    /// the matching type unit, and supplementary references through the
    /// tied session. Non-reference values yield `Ok(None)`.
    pub fn resolve_reference(
        &self,
        value: AttributeValue<'data>,
    ) -> Result<Option<Die<'s, 'data>>, DwarfError> {
        match value {
            AttributeValue::UnitRef(offset) => self.die_at(offset),
            AttributeValue::DebugInfoRef(offset) => self.session.die_at_offset(true, offset),
            AttributeValue::TypeSignature(signature) => {
                match self.session.unit_by_signature(signature)? {
                    Some(unit) => match unit.type_die()? {
                        Some(die) => Ok(Some(die)),
                        None => unit.root(),
                    },
                    None => Ok(None),
                }
            }
            AttributeValue::SupRef(offset) => match self.session.tied() {
                Some(tied) => tied.die_at_offset(true, offset),
                None => Err(DwarfErrorKind::MissingBase.into()),
            },
            _ => Ok(None),
        }
    }

    /// Resolves an address-class attribute value to a target address.
    ///
    /// Returns `Ok(None)` for values that are not addresses. `addrx` values
    /// are resolved against `.debug_addr`, consulting the tied session when
    /// this session does not carry the section.
    pub fn address_value(
        &self,
        value: AttributeValue<'data>,
    ) -> Result<Option<u64>, DwarfError> {
        match value {
            AttributeValue::Address(address) => Ok(Some(address)),
            AttributeValue::AddressIndex(index) => {
                self.session.address_at(self, index).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn cursor_at(&self, offset: u64) -> Cursor<'data> {
        Cursor::at(
            self.session.unit_section_data(self.header.is_info),
            offset as usize,
            self.session.endian(),
        )
    }

    /// The end offset of the DIE walk, clamped to the section size for
    /// truncated units.
    pub(crate) fn walk_end(&self) -> u64 {
        let section_len = self.session.unit_section_data(self.header.is_info).len() as u64;
        self.header.end_offset().min(section_len)
    }
}

impl PartialEq for Unit<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.header.is_info == other.header.is_info && self.header.offset == other.header.offset
    }
}

impl Eq for Unit<'_, '_> {}

impl std::fmt::Debug for Unit<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("offset", &format_args!("{:#x}", self.header.offset))
            .field("version", &self.header.version)
            .field("kind", &self.header.kind)
            .field("address_size", &self.header.address_size)
            .field("format", &self.header.format)
            .finish()
    }
}

/// A decoded attribute of a DIE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribute<'data> {
    name: DwAt,
    form: DwForm,
    value: AttributeValue<'data>,
}

impl<'data> Attribute<'data> {
    /// The attribute number.
    pub fn name(&self) -> DwAt {
        self.name
    }

    /// The form this attribute's value was encoded with.
    pub fn form(&self) -> DwForm {
        self.form
    }

    /// The decoded value.
    pub fn value(&self) -> AttributeValue<'data> {
        self.value
    }
}

/// A handle to a debugging information entry.
///
/// Two handles are equal when they designate the same section offset in the
/// same section, regardless of how they were obtained.
#[derive(Clone, Copy)]
pub struct Die<'s, 'data> {
    unit: Unit<'s, 'data>,
    offset: u64,
    attrs_offset: u64,
    abbrev: &'s Abbreviation,
}

impl<'s, 'data> Die<'s, 'data> {
    /// The unit this DIE belongs to.
    pub fn unit(&self) -> Unit<'s, 'data> {
        self.unit
    }

    /// The section offset of this DIE.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The tag of this DIE.
    pub fn tag(&self) -> DwTag {
        self.abbrev.tag()
    }

    /// Whether this DIE has children.
    pub fn has_children(&self) -> bool {
        self.abbrev.has_children()
    }

    /// Returns an iterator over the attributes of this DIE.
    pub fn attributes(&self) -> AttributesIter<'s, 'data> {
        AttributesIter {
            unit: self.unit,
            cursor: self.unit.cursor_at(self.attrs_offset),
            specs: self.abbrev.attributes().iter(),
            failed: false,
        }
    }

    /// Returns the attribute with the given name, if present.
    pub fn attr(&self, name: DwAt) -> Result<Option<Attribute<'data>>, DwarfError> {
        for attr in self.attributes() {
            let attr = attr?;
            if attr.name() == name {
                return Ok(Some(attr));
            }
        }
        Ok(None)
    }

    /// Returns the value of the attribute with the given name, if present.
    pub fn attr_value(&self, name: DwAt) -> Result<Option<AttributeValue<'data>>, DwarfError> {
        Ok(self.attr(name)?.map(|attr| attr.value()))
    }

    /// The section offset immediately after this DIE's attribute values.
    pub(crate) fn after_attributes(&self) -> Result<u64, DwarfError> {
        let mut cursor = self.unit.cursor_at(self.attrs_offset);
        for spec in self.abbrev.attributes() {
            forms::skip_value(&mut cursor, *spec, self.unit.header)?;
        }
        Ok(cursor.position() as u64)
    }

    /// The first child of this DIE, if it has children.
    pub fn first_child(&self) -> Result<Option<Die<'s, 'data>>, DwarfError> {
        if !self.has_children() {
            return Ok(None);
        }
        self.unit.die_at(self.after_attributes()?)
    }

    /// The next sibling of this DIE.
    ///
    /// If the DIE carries a `DW_AT_sibling` attribute whose target lies
    /// within the current unit, the jump is taken directly; otherwise the
    /// attributes and any child subtree are skipped.
    pub fn sibling(&self) -> Result<Option<Die<'s, 'data>>, DwarfError> {
        if let Some(AttributeValue::UnitRef(target)) = self.attr_value(DW_AT_sibling)? {
            if target > self.offset && self.unit.contains(target) {
                return self.unit.die_at(target);
            }
        }

        let mut offset = self.after_attributes()?;
        if self.has_children() {
            offset = self.skip_subtree(offset)?;
        }

        if offset >= self.unit.walk_end() {
            return Ok(None);
        }
        self.unit.die_at(offset)
    }

    /// Skips the children starting at `offset` up to and including their
    /// null terminator, returning the offset of the next sibling entry.
    fn skip_subtree(&self, mut offset: u64) -> Result<u64, DwarfError> {
        let mut depth = 1usize;
        while depth > 0 {
            let mut cursor = self.unit.cursor_at(offset);
            let code = cursor.read_uleb128()?;
            if code == 0 {
                depth -= 1;
                offset = cursor.position() as u64;
                continue;
            }

            let abbrev = self
                .unit
                .state
                .abbrevs
                .get(code)
                .ok_or(DwarfErrorKind::AbbrevMissing(code))?;
            for spec in abbrev.attributes() {
                forms::skip_value(&mut cursor, *spec, self.unit.header)?;
            }
            offset = cursor.position() as u64;
            if abbrev.has_children() {
                depth += 1;
            }
        }
        Ok(offset)
    }
}

impl PartialEq for Die<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.unit == other.unit && self.offset == other.offset
    }
}

impl Eq for Die<'_, '_> {}

impl std::fmt::Debug for Die<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Die")
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("tag", &self.tag())
            .field("has_children", &self.has_children())
            .finish()
    }
}

/// An iterator over the attributes of one DIE.
pub struct AttributesIter<'s, 'data> {
    unit: Unit<'s, 'data>,
    cursor: Cursor<'data>,
    specs: std::slice::Iter<'s, crate::abbrev::AttributeSpec>,
    failed: bool,
}

impl<'data> Iterator for AttributesIter<'_, 'data> {
    type Item = Result<Attribute<'data>, DwarfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let spec = *self.specs.next()?;
        match forms::read_value(&mut self.cursor, spec, self.unit.header) {
            Ok(value) => Some(Ok(Attribute {
                name: spec.attr,
                form: spec.form,
                value,
            })),
            Err(error) => {
                // A malformed attribute aborts the whole DIE decode.
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

impl std::iter::FusedIterator for AttributesIter<'_, '_> {}

/// A depth-first iterator over all DIEs of a unit.
///
/// Items are `(depth, die)` pairs, with the root at depth 0. The traversal
/// delivers DIEs in section order.
pub struct EntriesIter<'s, 'data> {
    unit: Unit<'s, 'data>,
    offset: u64,
    depth: isize,
    done: bool,
}

impl<'s, 'data> Iterator for EntriesIter<'s, 'data> {
    type Item = Result<(isize, Die<'s, 'data>), DwarfError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.offset < self.unit.walk_end() {
            let mut cursor = self.unit.cursor_at(self.offset);
            let code = match cursor.read_uleb128() {
                Ok(code) => code,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };

            if code == 0 {
                self.depth -= 1;
                self.offset = cursor.position() as u64;
                if self.depth < 0 {
                    self.done = true;
                }
                continue;
            }

            let die = match self.unit.die_at(self.offset) {
                Ok(Some(die)) => die,
                Ok(None) => unreachable!("non-zero code yielded a null entry"),
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };

            let next_offset = match die.after_attributes() {
                Ok(offset) => offset,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };

            let depth = self.depth;
            self.offset = next_offset;
            if die.has_children() {
                self.depth += 1;
            }

            return Some(Ok((depth, die)));
        }

        self.done = true;
        None
    }
}

impl std::iter::FusedIterator for EntriesIter<'_, '_> {}
