//! Decoding of attribute values according to their form.
//!
//! Forms describe how an attribute value is encoded in the DIE byte stream.
//! The decoder turns each form into an [`AttributeValue`], leaving indexed
//! and offset-like values raw; cooking them (resolving `strx`/`addrx`
//! indices, following string offsets) is done by the unit, which has access
//! to the session's other sections.
//!
//! [`AttributeValue`]: enum.AttributeValue.html

use crate::abbrev::AttributeSpec;
use crate::constants::*;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::Cursor;
use crate::unit::UnitHeader;

/// A decoded attribute value.
///
/// Values that reference other sections (strings, lists, other DIEs) are
/// represented as raw offsets or indices here; see the accessors on
/// [`Unit`](crate::unit::Unit) for resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeValue<'data> {
    /// A target machine address.
    Address(u64),
    /// An index into `.debug_addr`, relative to the unit's address base.
    AddressIndex(u64),
    /// An uninterpreted block of bytes.
    Block(&'data [u8]),
    /// A DWARF expression.
    Exprloc(&'data [u8]),
    /// An unsigned constant.
    Udata(u64),
    /// A signed constant.
    Sdata(i64),
    /// A 16-byte constant, used for MD5 checksums and 128-bit values.
    Data16(&'data [u8]),
    /// A boolean flag.
    Flag(bool),
    /// An offset into another DWARF section, class-resolved by attribute.
    SecOffset(u64),
    /// A reference to a DIE in the same unit, as an absolute section offset.
    UnitRef(u64),
    /// A reference to a DIE anywhere in `.debug_info`.
    DebugInfoRef(u64),
    /// A reference into the supplementary object's `.debug_info`.
    SupRef(u64),
    /// The type signature of a type unit.
    TypeSignature(u64),
    /// A string stored inline in the DIE.
    String(&'data [u8]),
    /// An offset into `.debug_str`.
    StringRef(u64),
    /// An offset into `.debug_line_str`.
    LineStringRef(u64),
    /// An offset into the supplementary object's `.debug_str`.
    SupStringRef(u64),
    /// An index into `.debug_str_offsets`, relative to the unit's base.
    StringIndex(u64),
    /// An index into `.debug_loclists`, relative to the unit's base.
    LoclistIndex(u64),
    /// An index into `.debug_rnglists`, relative to the unit's base.
    RnglistIndex(u64),
}

impl AttributeValue<'_> {
    /// Returns the value as an unsigned constant, if it is one.
    pub fn udata_value(&self) -> Option<u64> {
        match *self {
            AttributeValue::Udata(value) => Some(value),
            AttributeValue::Sdata(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Returns the value as a signed constant, if it is one.
    pub fn sdata_value(&self) -> Option<i64> {
        match *self {
            AttributeValue::Sdata(value) => Some(value),
            AttributeValue::Udata(value) => i64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Returns the value as a section offset, if it is one.
    pub fn offset_value(&self) -> Option<u64> {
        match *self {
            AttributeValue::SecOffset(offset) => Some(offset),
            _ => None,
        }
    }
}

/// The value class of an attribute per the DWARF 5 classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValueClass {
    /// A machine address.
    Address,
    /// An offset into `.debug_addr`.
    AddrPtr,
    /// An uninterpreted byte block.
    Block,
    /// An integer constant.
    Constant,
    /// A DWARF expression.
    Exprloc,
    /// A boolean flag.
    Flag,
    /// An offset into `.debug_line`.
    LinePtr,
    /// A location list.
    Loclist,
    /// An offset into `.debug_loclists`.
    LoclistsPtr,
    /// An offset into `.debug_macinfo` or `.debug_macro`.
    MacroPtr,
    /// A reference to another DIE.
    Reference,
    /// A range list.
    Rnglist,
    /// An offset into `.debug_rnglists`.
    RnglistsPtr,
    /// A string.
    String,
    /// An offset into `.debug_str_offsets`.
    StrOffsetsPtr,
}

/// Returns whether `DW_FORM_data4`/`data8` acted as a section offset for
/// this attribute before DWARF 4 introduced `DW_FORM_sec_offset`.
fn dwarf2_offset_attr(attr: DwAt) -> bool {
    matches!(
        attr,
        DW_AT_location
            | DW_AT_stmt_list
            | DW_AT_string_length
            | DW_AT_return_addr
            | DW_AT_start_scope
            | DW_AT_data_member_location
            | DW_AT_frame_base
            | DW_AT_macro_info
            | DW_AT_segment
            | DW_AT_static_link
            | DW_AT_use_location
            | DW_AT_vtable_elem_location
            | DW_AT_ranges
            | DW_AT_GNU_ranges_base
            | DW_AT_GNU_addr_base
    )
}

/// Assigns the DWARF 5 value class of an attribute from its version,
/// attribute number and form.
///
/// Returns `None` when the combination is not classifiable, for instance an
/// unknown vendor form.
pub fn value_class(version: u16, attr: DwAt, form: DwForm) -> Option<ValueClass> {
    Some(match form {
        DW_FORM_addr => ValueClass::Address,
        DW_FORM_addrx | DW_FORM_addrx1 | DW_FORM_addrx2 | DW_FORM_addrx3 | DW_FORM_addrx4
        | DW_FORM_GNU_addr_index => ValueClass::Address,
        DW_FORM_block | DW_FORM_block1 | DW_FORM_block2 | DW_FORM_block4 => {
            // Before DWARF 4, location expressions were encoded as blocks.
            if version < 4 && location_attr(attr) {
                ValueClass::Exprloc
            } else {
                ValueClass::Block
            }
        }
        DW_FORM_exprloc => ValueClass::Exprloc,
        DW_FORM_data1 | DW_FORM_data2 | DW_FORM_data16 | DW_FORM_sdata | DW_FORM_udata
        | DW_FORM_implicit_const => ValueClass::Constant,
        DW_FORM_data4 | DW_FORM_data8 => {
            if version < 4 && dwarf2_offset_attr(attr) {
                class_of_offset_attr(attr)
            } else {
                ValueClass::Constant
            }
        }
        DW_FORM_flag | DW_FORM_flag_present => ValueClass::Flag,
        DW_FORM_ref1 | DW_FORM_ref2 | DW_FORM_ref4 | DW_FORM_ref8 | DW_FORM_ref_udata
        | DW_FORM_ref_addr | DW_FORM_ref_sig8 | DW_FORM_ref_sup4 | DW_FORM_ref_sup8
        | DW_FORM_GNU_ref_alt => ValueClass::Reference,
        DW_FORM_string | DW_FORM_strp | DW_FORM_line_strp | DW_FORM_strp_sup | DW_FORM_strx
        | DW_FORM_strx1 | DW_FORM_strx2 | DW_FORM_strx3 | DW_FORM_strx4
        | DW_FORM_GNU_str_index | DW_FORM_GNU_strp_alt => ValueClass::String,
        DW_FORM_sec_offset => class_of_offset_attr(attr),
        DW_FORM_loclistx => ValueClass::Loclist,
        DW_FORM_rnglistx => ValueClass::Rnglist,
        _ => return None,
    })
}

fn location_attr(attr: DwAt) -> bool {
    matches!(
        attr,
        DW_AT_location
            | DW_AT_data_member_location
            | DW_AT_frame_base
            | DW_AT_string_length
            | DW_AT_use_location
            | DW_AT_vtable_elem_location
            | DW_AT_return_addr
            | DW_AT_static_link
            | DW_AT_segment
    )
}

fn class_of_offset_attr(attr: DwAt) -> ValueClass {
    match attr {
        DW_AT_stmt_list => ValueClass::LinePtr,
        DW_AT_macro_info | DW_AT_macros => ValueClass::MacroPtr,
        DW_AT_str_offsets_base => ValueClass::StrOffsetsPtr,
        DW_AT_addr_base | DW_AT_GNU_addr_base => ValueClass::AddrPtr,
        DW_AT_rnglists_base | DW_AT_GNU_ranges_base => ValueClass::RnglistsPtr,
        DW_AT_loclists_base => ValueClass::LoclistsPtr,
        DW_AT_ranges | DW_AT_start_scope => ValueClass::Rnglist,
        attr if location_attr(attr) => ValueClass::Loclist,
        _ => ValueClass::Constant,
    }
}

/// The number of `DW_FORM_indirect` redirections tolerated per value.
const MAX_INDIRECTIONS: usize = 2;

/// Reads one attribute value according to its specification.
///
/// The cursor must sit on the first byte of the value within the unit's
/// section. On error the cursor is left unchanged.
pub(crate) fn read_value<'data>(
    cursor: &mut Cursor<'data>,
    spec: AttributeSpec,
    header: &UnitHeader,
) -> Result<AttributeValue<'data>, DwarfError> {
    let mut probe = *cursor;
    let mut form = spec.form;

    // `DW_FORM_indirect` stores the real form as a ULEB prefix of the value.
    let mut redirections = 0;
    while form == DW_FORM_indirect {
        if redirections == MAX_INDIRECTIONS {
            return Err(DwarfErrorKind::UnknownForm(form).into());
        }
        let raw = probe.read_uleb128()?;
        form = DwForm(u16::try_from(raw).map_err(|_| DwarfErrorKind::BadTypeSize)?);
        if form == DW_FORM_implicit_const {
            // implicit_const carries its value in the abbreviation table and
            // cannot be spelled through an indirection.
            return Err(DwarfErrorKind::UnknownForm(form).into());
        }
        redirections += 1;
    }

    let value = match form {
        DW_FORM_addr => AttributeValue::Address(probe.read_address(header.address_size)?),
        DW_FORM_addrx | DW_FORM_GNU_addr_index => {
            AttributeValue::AddressIndex(probe.read_uleb128()?)
        }
        DW_FORM_addrx1 => AttributeValue::AddressIndex(probe.read_uint(1)?),
        DW_FORM_addrx2 => AttributeValue::AddressIndex(probe.read_uint(2)?),
        DW_FORM_addrx3 => AttributeValue::AddressIndex(read_u24(&mut probe)?),
        DW_FORM_addrx4 => AttributeValue::AddressIndex(probe.read_uint(4)?),

        DW_FORM_block1 => {
            let len = probe.read_u8()? as usize;
            AttributeValue::Block(probe.read_bytes(len)?)
        }
        DW_FORM_block2 => {
            let len = probe.read_u16()? as usize;
            AttributeValue::Block(probe.read_bytes(len)?)
        }
        DW_FORM_block4 => {
            let len = probe.read_u32()? as usize;
            AttributeValue::Block(probe.read_bytes(len)?)
        }
        DW_FORM_block => {
            let len = leb_len(&mut probe)?;
            AttributeValue::Block(probe.read_bytes(len)?)
        }
        DW_FORM_exprloc => {
            let len = leb_len(&mut probe)?;
            AttributeValue::Exprloc(probe.read_bytes(len)?)
        }

        DW_FORM_data1 => AttributeValue::Udata(probe.read_uint(1)?),
        DW_FORM_data2 => AttributeValue::Udata(probe.read_uint(2)?),
        DW_FORM_data4 => {
            let value = probe.read_uint(4)?;
            if header.version < 4 && dwarf2_offset_attr(spec.attr) {
                AttributeValue::SecOffset(value)
            } else {
                AttributeValue::Udata(value)
            }
        }
        DW_FORM_data8 => {
            let value = probe.read_uint(8)?;
            if header.version < 4 && dwarf2_offset_attr(spec.attr) {
                AttributeValue::SecOffset(value)
            } else {
                AttributeValue::Udata(value)
            }
        }
        DW_FORM_data16 => AttributeValue::Data16(probe.read_bytes(16)?),
        DW_FORM_udata => AttributeValue::Udata(probe.read_uleb128()?),
        DW_FORM_sdata => AttributeValue::Sdata(probe.read_sleb128()?),
        DW_FORM_implicit_const => {
            AttributeValue::Sdata(spec.implicit_const.unwrap_or_default())
        }

        DW_FORM_flag => AttributeValue::Flag(probe.read_u8()? != 0),
        DW_FORM_flag_present => AttributeValue::Flag(true),

        DW_FORM_string => AttributeValue::String(probe.read_null_terminated()?),
        DW_FORM_strp => AttributeValue::StringRef(probe.read_offset(header.format)?),
        DW_FORM_line_strp => AttributeValue::LineStringRef(probe.read_offset(header.format)?),
        DW_FORM_strp_sup | DW_FORM_GNU_strp_alt => {
            AttributeValue::SupStringRef(probe.read_offset(header.format)?)
        }
        DW_FORM_strx | DW_FORM_GNU_str_index => {
            AttributeValue::StringIndex(probe.read_uleb128()?)
        }
        DW_FORM_strx1 => AttributeValue::StringIndex(probe.read_uint(1)?),
        DW_FORM_strx2 => AttributeValue::StringIndex(probe.read_uint(2)?),
        DW_FORM_strx3 => AttributeValue::StringIndex(read_u24(&mut probe)?),
        DW_FORM_strx4 => AttributeValue::StringIndex(probe.read_uint(4)?),

        DW_FORM_ref1 => unit_ref(header, probe.read_uint(1)?)?,
        DW_FORM_ref2 => unit_ref(header, probe.read_uint(2)?)?,
        DW_FORM_ref4 => unit_ref(header, probe.read_uint(4)?)?,
        DW_FORM_ref8 => unit_ref(header, probe.read_uint(8)?)?,
        DW_FORM_ref_udata => unit_ref(header, probe.read_uleb128()?)?,
        DW_FORM_ref_addr => {
            // DWARF 2 encoded this with the address size rather than the
            // offset size.
            let offset = if header.version == 2 {
                probe.read_address(header.address_size)?
            } else {
                probe.read_offset(header.format)?
            };
            AttributeValue::DebugInfoRef(offset)
        }
        DW_FORM_ref_sig8 => AttributeValue::TypeSignature(probe.read_u64()?),
        DW_FORM_ref_sup4 => AttributeValue::SupRef(probe.read_uint(4)?),
        DW_FORM_ref_sup8 => AttributeValue::SupRef(probe.read_uint(8)?),
        DW_FORM_GNU_ref_alt => AttributeValue::SupRef(probe.read_offset(header.format)?),

        DW_FORM_sec_offset => AttributeValue::SecOffset(probe.read_offset(header.format)?),
        DW_FORM_loclistx => AttributeValue::LoclistIndex(probe.read_uleb128()?),
        DW_FORM_rnglistx => AttributeValue::RnglistIndex(probe.read_uleb128()?),

        form => return Err(DwarfErrorKind::UnknownForm(form).into()),
    };

    *cursor = probe;
    Ok(value)
}

/// Skips one attribute value without materializing it.
pub(crate) fn skip_value(
    cursor: &mut Cursor<'_>,
    spec: AttributeSpec,
    header: &UnitHeader,
) -> Result<(), DwarfError> {
    // Skipping re-uses the decoder; every form is cheap to decode and the
    // error behavior must match exactly.
    read_value(cursor, spec, header).map(|_| ())
}

fn unit_ref(header: &UnitHeader, offset: u64) -> Result<AttributeValue<'static>, DwarfError> {
    let absolute = header
        .offset
        .checked_add(offset)
        .ok_or(DwarfErrorKind::Truncated)?;
    if absolute >= header.end_offset() {
        return Err(DwarfErrorKind::Truncated.into());
    }
    Ok(AttributeValue::UnitRef(absolute))
}

fn leb_len(cursor: &mut Cursor<'_>) -> Result<usize, DwarfError> {
    let len = cursor.read_uleb128()?;
    usize::try_from(len).map_err(|_| DwarfErrorKind::Truncated.into())
}

pub(crate) fn read_u24(cursor: &mut Cursor<'_>) -> Result<u64, DwarfError> {
    let bytes = cursor.read_bytes(3)?;
    let value = match cursor.endian() {
        dwarven_common::Endianness::Little => {
            u64::from(bytes[0]) | u64::from(bytes[1]) << 8 | u64::from(bytes[2]) << 16
        }
        dwarven_common::Endianness::Big => {
            u64::from(bytes[0]) << 16 | u64::from(bytes[1]) << 8 | u64::from(bytes[2])
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use dwarven_common::Endianness;

    use crate::reader::Format;

    use super::*;

    fn test_header() -> UnitHeader {
        UnitHeader {
            offset: 0x100,
            is_info: true,
            format: Format::Dwarf32,
            length: 0x200,
            version: 4,
            kind: DW_UT_compile,
            address_size: 8,
            abbrev_offset: 0,
            type_signature: None,
            type_offset: None,
            dwo_id: None,
            header_size: 11,
        }
    }

    fn spec(attr: DwAt, form: DwForm) -> AttributeSpec {
        AttributeSpec {
            attr,
            form,
            implicit_const: None,
        }
    }

    #[test]
    fn test_read_address() {
        let data = [0x00, 0x04, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(&data, Endianness::Little);
        let value =
            read_value(&mut cursor, spec(DW_AT_low_pc, DW_FORM_addr), &test_header()).unwrap();
        assert_eq!(value, AttributeValue::Address(0x0040_0400));
    }

    #[test]
    fn test_unit_ref_is_absolute() {
        let data = [0x2a, 0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(&data, Endianness::Little);
        let value =
            read_value(&mut cursor, spec(DW_AT_type, DW_FORM_ref4), &test_header()).unwrap();
        assert_eq!(value, AttributeValue::UnitRef(0x12a));
    }

    #[test]
    fn test_unit_ref_out_of_unit() {
        let data = [0xff, 0xff, 0xff, 0x7f];
        let mut cursor = Cursor::new(&data, Endianness::Little);
        assert!(read_value(&mut cursor, spec(DW_AT_type, DW_FORM_ref4), &test_header()).is_err());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_dwarf2_data4_is_offset() {
        let mut header = test_header();
        header.version = 2;
        let data = [0x10, 0x00, 0x00, 0x00];

        let mut cursor = Cursor::new(&data, Endianness::Little);
        let value =
            read_value(&mut cursor, spec(DW_AT_stmt_list, DW_FORM_data4), &header).unwrap();
        assert_eq!(value, AttributeValue::SecOffset(0x10));

        // The same form on a constant attribute stays a constant.
        let mut cursor = Cursor::new(&data, Endianness::Little);
        let value =
            read_value(&mut cursor, spec(DW_AT_byte_size, DW_FORM_data4), &header).unwrap();
        assert_eq!(value, AttributeValue::Udata(0x10));
    }

    #[test]
    fn test_exprloc() {
        let data = [0x02, 0x91, 0x10];
        let mut cursor = Cursor::new(&data, Endianness::Little);
        let value = read_value(
            &mut cursor,
            spec(DW_AT_location, DW_FORM_exprloc),
            &test_header(),
        )
        .unwrap();
        assert_eq!(value, AttributeValue::Exprloc(&[0x91, 0x10]));
    }

    #[test]
    fn test_indirect() {
        // indirect -> udata(0x7f)
        let data = [DW_FORM_udata.0 as u8, 0x7f];
        let mut cursor = Cursor::new(&data, Endianness::Little);
        let value = read_value(
            &mut cursor,
            spec(DW_AT_byte_size, DW_FORM_indirect),
            &test_header(),
        )
        .unwrap();
        assert_eq!(value, AttributeValue::Udata(0x7f));
    }

    #[test]
    fn test_implicit_const() {
        let mut spec = spec(DW_AT_decl_file, DW_FORM_implicit_const);
        spec.implicit_const = Some(-3);
        let mut cursor = Cursor::new(&[], Endianness::Little);
        let value = read_value(&mut cursor, spec, &test_header()).unwrap();
        assert_eq!(value, AttributeValue::Sdata(-3));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_value_class() {
        assert_eq!(
            value_class(5, DW_AT_stmt_list, DW_FORM_sec_offset),
            Some(ValueClass::LinePtr)
        );
        assert_eq!(
            value_class(2, DW_AT_location, DW_FORM_block1),
            Some(ValueClass::Exprloc)
        );
        assert_eq!(
            value_class(2, DW_AT_ranges, DW_FORM_data4),
            Some(ValueClass::Rnglist)
        );
        assert_eq!(
            value_class(5, DW_AT_name, DW_FORM_strx1),
            Some(ValueClass::String)
        );
        assert_eq!(value_class(5, DW_AT_name, DwForm(0x5555)), None);
    }
}
