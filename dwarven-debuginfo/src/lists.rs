//! Range and location list engines.
//!
//! DWARF 2-4 store lists as flat (begin, end) address pairs in
//! `.debug_ranges` and `.debug_loc`, terminated by a (0, 0) pair, with a
//! begin value of all ones selecting a new base address. DWARF 5 replaces
//! both with typed entry streams in `.debug_rnglists` and `.debug_loclists`
//! whose `*x` entries index `.debug_addr`.
//!
//! Both generations cook down to absolute (low, high) pairs here. When an
//! address index cannot be resolved because no usable `.debug_addr` base
//! exists, the raw index is passed through and the entry is marked with
//! `debug_addr_unavailable` instead of failing the whole list.

use fallible_iterator::FallibleIterator;

use crate::constants::*;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::forms::AttributeValue;
use crate::reader::Cursor;
use crate::unit::Unit;

/// An address range cooked from a range or location list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CookedRange {
    /// The first covered address.
    pub low: u64,
    /// One past the last covered address.
    pub high: u64,
    /// Set when an address index could not be resolved; `low`/`high` then
    /// carry raw indices rather than addresses.
    pub debug_addr_unavailable: bool,
}

/// One entry of a location list: a range and the expression covering it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationEntry<'data> {
    /// The address range this location applies to.
    pub range: CookedRange,
    /// The DWARF expression bytes.
    pub data: &'data [u8],
    /// Whether this is a `DW_LLE_default_location` entry, valid wherever no
    /// other entry matches; its range is empty.
    pub is_default: bool,
}

fn max_address(address_size: u8) -> u64 {
    match address_size {
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

/// The result of resolving an address or index operand.
#[derive(Clone, Copy)]
struct Operand {
    value: u64,
    unavailable: bool,
}

impl<'s, 'data> Unit<'s, 'data> {
    /// Returns an iterator over the ranges denoted by an attribute value.
    ///
    /// Accepts `SecOffset` values (an offset into `.debug_ranges` or
    /// `.debug_rnglists` depending on the unit version) and `RnglistIndex`
    /// values. Other values yield `Ok(None)`.
    pub fn attr_ranges(
        &self,
        value: AttributeValue<'data>,
    ) -> Result<Option<RangeIter<'s, 'data>>, DwarfError> {
        let v5 = self.header().version() >= 5;
        let offset = match value {
            AttributeValue::SecOffset(offset) => offset,
            AttributeValue::RnglistIndex(index) => {
                let base = self
                    .rnglists_base()
                    .ok_or(DwarfErrorKind::MissingBase)?;
                list_offset_from_index(
                    self.session().sections.debug_rnglists,
                    base,
                    index,
                    *self,
                )?
            }
            _ => return Ok(None),
        };

        let section = if v5 {
            self.session().sections.debug_rnglists
        } else {
            self.session().sections.debug_ranges
        };

        Ok(Some(RangeIter {
            unit: *self,
            cursor: Cursor::at(section, offset as usize, self.session().endian()),
            v5,
            base: self.initial_base(),
            base_unavailable: false,
            done: false,
        }))
    }

    /// Returns an iterator over the location list denoted by an attribute
    /// value.
    ///
    /// Accepts `SecOffset` values (an offset into `.debug_loc` or
    /// `.debug_loclists`) and `LoclistIndex` values. A single `Exprloc` is
    /// not a list; callers handle it directly. Other values yield
    /// `Ok(None)`.
    pub fn attr_locations(
        &self,
        value: AttributeValue<'data>,
    ) -> Result<Option<LocListIter<'s, 'data>>, DwarfError> {
        let v5 = self.header().version() >= 5;
        let offset = match value {
            AttributeValue::SecOffset(offset) => offset,
            AttributeValue::LoclistIndex(index) => {
                let base = self
                    .loclists_base()
                    .ok_or(DwarfErrorKind::MissingBase)?;
                list_offset_from_index(
                    self.session().sections.debug_loclists,
                    base,
                    index,
                    *self,
                )?
            }
            _ => return Ok(None),
        };

        let section = if v5 {
            self.session().sections.debug_loclists
        } else {
            self.session().sections.debug_loc
        };

        Ok(Some(LocListIter {
            unit: *self,
            cursor: Cursor::at(section, offset as usize, self.session().endian()),
            v5,
            base: self.initial_base(),
            base_unavailable: false,
            done: false,
        }))
    }

    fn rnglists_base(&self) -> Option<u64> {
        self.state.rnglists_base.or_else(|| {
            // Without an explicit base, index resolution starts right after
            // the section header.
            (self.header().version() >= 5)
                .then(|| u64::from(self.header().format().initial_length_size()) + 8)
        })
    }

    fn loclists_base(&self) -> Option<u64> {
        self.state.loclists_base.or_else(|| {
            (self.header().version() >= 5)
                .then(|| u64::from(self.header().format().initial_length_size()) + 8)
        })
    }

    /// The base address entries start out relative to: the unit's low pc.
    fn initial_base(&self) -> Option<u64> {
        self.base_address().ok().flatten()
    }

    /// Resolves an address index, falling back to the raw index with the
    /// unavailability marker when no base can be found.
    fn operand_from_index(&self, index: u64) -> Operand {
        match self.session().address_at(self, index) {
            Ok(value) => Operand {
                value,
                unavailable: false,
            },
            Err(_) => Operand {
                value: index,
                unavailable: true,
            },
        }
    }
}

fn list_offset_from_index(
    section: &[u8],
    base: u64,
    index: u64,
    unit: Unit<'_, '_>,
) -> Result<u64, DwarfError> {
    let offset_size = u64::from(unit.header().format().offset_size());
    let position = base
        .checked_add(
            index
                .checked_mul(offset_size)
                .ok_or(DwarfErrorKind::Truncated)?,
        )
        .ok_or(DwarfErrorKind::Truncated)?;

    let mut cursor = Cursor::at(section, position as usize, unit.session().endian());
    let relative = cursor.read_offset(unit.header().format())?;
    base.checked_add(relative)
        .ok_or_else(|| DwarfErrorKind::Truncated.into())
}

/// A fallible iterator over the cooked ranges of one range list.
pub struct RangeIter<'s, 'data> {
    unit: Unit<'s, 'data>,
    cursor: Cursor<'data>,
    v5: bool,
    base: Option<u64>,
    base_unavailable: bool,
    done: bool,
}

impl<'s, 'data> FallibleIterator for RangeIter<'s, 'data> {
    type Item = CookedRange;
    type Error = DwarfError;

    fn next(&mut self) -> Result<Option<CookedRange>, DwarfError> {
        let address_size = self.unit.header().address_size();

        while !self.done {
            if !self.v5 {
                let begin = self.cursor.read_address(address_size)?;
                let end = self.cursor.read_address(address_size)?;

                if begin == 0 && end == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if begin == max_address(address_size) {
                    self.base = Some(end);
                    self.base_unavailable = false;
                    continue;
                }

                let base = self.base.unwrap_or(0);
                return Ok(Some(CookedRange {
                    low: base.wrapping_add(begin),
                    high: base.wrapping_add(end),
                    debug_addr_unavailable: self.base_unavailable,
                }));
            }

            let kind = DwRle(self.cursor.read_u8()?);
            match kind {
                DW_RLE_end_of_list => {
                    self.done = true;
                    return Ok(None);
                }
                DW_RLE_base_addressx => {
                    let index = self.cursor.read_uleb128()?;
                    let operand = self.unit.operand_from_index(index);
                    self.base = Some(operand.value);
                    self.base_unavailable = operand.unavailable;
                }
                DW_RLE_base_address => {
                    self.base = Some(self.cursor.read_address(address_size)?);
                    self.base_unavailable = false;
                }
                DW_RLE_startx_endx => {
                    let start = self.unit.operand_from_index(self.cursor.read_uleb128()?);
                    let end = self.unit.operand_from_index(self.cursor.read_uleb128()?);
                    return Ok(Some(CookedRange {
                        low: start.value,
                        high: end.value,
                        debug_addr_unavailable: start.unavailable || end.unavailable,
                    }));
                }
                DW_RLE_startx_length => {
                    let start = self.unit.operand_from_index(self.cursor.read_uleb128()?);
                    let length = self.cursor.read_uleb128()?;
                    return Ok(Some(CookedRange {
                        low: start.value,
                        high: start.value.wrapping_add(length),
                        debug_addr_unavailable: start.unavailable,
                    }));
                }
                DW_RLE_offset_pair => {
                    let begin = self.cursor.read_uleb128()?;
                    let end = self.cursor.read_uleb128()?;
                    let base = self.base.unwrap_or(0);
                    return Ok(Some(CookedRange {
                        low: base.wrapping_add(begin),
                        high: base.wrapping_add(end),
                        debug_addr_unavailable: self.base_unavailable,
                    }));
                }
                DW_RLE_start_end => {
                    let low = self.cursor.read_address(address_size)?;
                    let high = self.cursor.read_address(address_size)?;
                    return Ok(Some(CookedRange {
                        low,
                        high,
                        debug_addr_unavailable: false,
                    }));
                }
                DW_RLE_start_length => {
                    let low = self.cursor.read_address(address_size)?;
                    let length = self.cursor.read_uleb128()?;
                    return Ok(Some(CookedRange {
                        low,
                        high: low.wrapping_add(length),
                        debug_addr_unavailable: false,
                    }));
                }
                unknown => {
                    return Err(DwarfErrorKind::UnknownOpcode(unknown.0).into());
                }
            }
        }

        Ok(None)
    }
}

/// A fallible iterator over the entries of one location list.
pub struct LocListIter<'s, 'data> {
    unit: Unit<'s, 'data>,
    cursor: Cursor<'data>,
    v5: bool,
    base: Option<u64>,
    base_unavailable: bool,
    done: bool,
}

impl<'s, 'data> LocListIter<'s, 'data> {
    fn read_expression(&mut self) -> Result<&'data [u8], DwarfError> {
        let length = if self.v5 {
            self.cursor.read_uleb128()? as usize
        } else {
            self.cursor.read_u16()? as usize
        };
        self.cursor.read_bytes(length)
    }
}

impl<'s, 'data> FallibleIterator for LocListIter<'s, 'data> {
    type Item = LocationEntry<'data>;
    type Error = DwarfError;

    fn next(&mut self) -> Result<Option<LocationEntry<'data>>, DwarfError> {
        let address_size = self.unit.header().address_size();

        while !self.done {
            if !self.v5 {
                let begin = self.cursor.read_address(address_size)?;
                let end = self.cursor.read_address(address_size)?;

                if begin == 0 && end == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if begin == max_address(address_size) {
                    self.base = Some(end);
                    self.base_unavailable = false;
                    continue;
                }

                let data = self.read_expression()?;
                let base = self.base.unwrap_or(0);
                return Ok(Some(LocationEntry {
                    range: CookedRange {
                        low: base.wrapping_add(begin),
                        high: base.wrapping_add(end),
                        debug_addr_unavailable: self.base_unavailable,
                    },
                    data,
                    is_default: false,
                }));
            }

            let kind = DwLle(self.cursor.read_u8()?);
            match kind {
                DW_LLE_end_of_list => {
                    self.done = true;
                    return Ok(None);
                }
                DW_LLE_base_addressx => {
                    let index = self.cursor.read_uleb128()?;
                    let operand = self.unit.operand_from_index(index);
                    self.base = Some(operand.value);
                    self.base_unavailable = operand.unavailable;
                }
                DW_LLE_base_address => {
                    self.base = Some(self.cursor.read_address(address_size)?);
                    self.base_unavailable = false;
                }
                DW_LLE_startx_endx => {
                    let start = self.unit.operand_from_index(self.cursor.read_uleb128()?);
                    let end = self.unit.operand_from_index(self.cursor.read_uleb128()?);
                    let data = self.read_expression()?;
                    return Ok(Some(LocationEntry {
                        range: CookedRange {
                            low: start.value,
                            high: end.value,
                            debug_addr_unavailable: start.unavailable || end.unavailable,
                        },
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_startx_length => {
                    let start = self.unit.operand_from_index(self.cursor.read_uleb128()?);
                    let length = self.cursor.read_uleb128()?;
                    let data = self.read_expression()?;
                    return Ok(Some(LocationEntry {
                        range: CookedRange {
                            low: start.value,
                            high: start.value.wrapping_add(length),
                            debug_addr_unavailable: start.unavailable,
                        },
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_offset_pair => {
                    let begin = self.cursor.read_uleb128()?;
                    let end = self.cursor.read_uleb128()?;
                    let data = self.read_expression()?;
                    let base = self.base.unwrap_or(0);
                    return Ok(Some(LocationEntry {
                        range: CookedRange {
                            low: base.wrapping_add(begin),
                            high: base.wrapping_add(end),
                            debug_addr_unavailable: self.base_unavailable,
                        },
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_default_location => {
                    let data = self.read_expression()?;
                    return Ok(Some(LocationEntry {
                        range: CookedRange {
                            low: 0,
                            high: 0,
                            debug_addr_unavailable: false,
                        },
                        data,
                        is_default: true,
                    }));
                }
                DW_LLE_start_end => {
                    let low = self.cursor.read_address(address_size)?;
                    let high = self.cursor.read_address(address_size)?;
                    let data = self.read_expression()?;
                    return Ok(Some(LocationEntry {
                        range: CookedRange {
                            low,
                            high,
                            debug_addr_unavailable: false,
                        },
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_start_length => {
                    let low = self.cursor.read_address(address_size)?;
                    let length = self.cursor.read_uleb128()?;
                    let data = self.read_expression()?;
                    return Ok(Some(LocationEntry {
                        range: CookedRange {
                            low,
                            high: low.wrapping_add(length),
                            debug_addr_unavailable: false,
                        },
                        data,
                        is_default: false,
                    }));
                }
                unknown => {
                    return Err(DwarfErrorKind::UnknownOpcode(unknown.0).into());
                }
            }
        }

        Ok(None)
    }
}
