//! Abbreviation tables from `.debug_abbrev`.
//!
//! Every DIE starts with an abbreviation code that selects a declaration
//! from its unit's table: the DIE's tag, whether it has children, and the
//! ordered list of (attribute, form) pairs that describe the value bytes
//! following the code. Code 0 is reserved as the sibling-chain terminator
//! and never appears in a table.
//!
//! Tables are parsed once per distinct abbreviation offset and cached on
//! the session, since many units commonly share one table.

use smallvec::SmallVec;

use dwarven_common::Endianness;

use crate::constants::{DwAt, DwForm, DwTag, DW_FORM_implicit_const};
use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::Cursor;

/// A single (attribute, form) pair of an abbreviation declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeSpec {
    /// The attribute number.
    pub attr: DwAt,
    /// The form of the attribute's value encoding.
    pub form: DwForm,
    /// The value carried by a `DW_FORM_implicit_const` spec.
    pub implicit_const: Option<i64>,
}

/// An abbreviation declaration shared by the DIEs referencing its code.
#[derive(Clone, Debug)]
pub struct Abbreviation {
    code: u64,
    tag: DwTag,
    has_children: bool,
    attributes: SmallVec<[AttributeSpec; 8]>,
}

impl Abbreviation {
    /// The abbreviation code DIEs use to select this declaration.
    pub fn code(&self) -> u64 {
        self.code
    }

    /// The tag of DIEs using this declaration.
    pub fn tag(&self) -> DwTag {
        self.tag
    }

    /// Whether DIEs using this declaration have children.
    pub fn has_children(&self) -> bool {
        self.has_children
    }

    /// The ordered attribute specifications of this declaration.
    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }
}

/// The abbreviation table of one unit.
#[derive(Clone, Debug, Default)]
pub struct AbbrevTable {
    declarations: Vec<Abbreviation>,
}

impl AbbrevTable {
    /// Parses the table starting at `offset` in `.debug_abbrev`.
    ///
    /// The table runs until its code-0 terminator. Declarations are kept
    /// sorted by code for lookup; producers nearly always emit them in
    /// ascending order already.
    pub fn parse(
        debug_abbrev: &[u8],
        offset: u64,
        endian: Endianness,
    ) -> Result<Self, DwarfError> {
        let offset = usize::try_from(offset).map_err(|_| DwarfErrorKind::Truncated)?;
        if offset > debug_abbrev.len() {
            return Err(DwarfErrorKind::Truncated.into());
        }

        let mut cursor = Cursor::at(debug_abbrev, offset, endian);
        let mut declarations = Vec::new();

        loop {
            let code = cursor.read_uleb128()?;
            if code == 0 {
                break;
            }

            let tag = DwTag(
                u16::try_from(cursor.read_uleb128()?)
                    .map_err(|_| DwarfErrorKind::BadTypeSize)?,
            );
            let has_children = cursor.read_u8()? != 0;

            let mut attributes = SmallVec::new();
            loop {
                let attr = cursor.read_uleb128()?;
                let form = cursor.read_uleb128()?;
                if attr == 0 && form == 0 {
                    break;
                }

                let attr =
                    DwAt(u16::try_from(attr).map_err(|_| DwarfErrorKind::BadTypeSize)?);
                let form =
                    DwForm(u16::try_from(form).map_err(|_| DwarfErrorKind::BadTypeSize)?);

                let implicit_const = if form == DW_FORM_implicit_const {
                    Some(cursor.read_sleb128()?)
                } else {
                    None
                };

                attributes.push(AttributeSpec {
                    attr,
                    form,
                    implicit_const,
                });
            }

            declarations.push(Abbreviation {
                code,
                tag,
                has_children,
                attributes,
            });
        }

        if !declarations.windows(2).all(|w| w[0].code < w[1].code) {
            declarations.sort_by_key(Abbreviation::code);
        }

        Ok(AbbrevTable { declarations })
    }

    /// Looks up the declaration for a non-zero abbreviation code.
    pub fn get(&self, code: u64) -> Option<&Abbreviation> {
        let index = self
            .declarations
            .binary_search_by_key(&code, Abbreviation::code)
            .ok()?;
        self.declarations.get(index)
    }

    /// The number of declarations in this table.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns `true` if the table has no declarations.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::constants::*;

    use super::*;

    fn uleb(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                return;
            }
        }
    }

    fn build_table() -> Vec<u8> {
        let mut data = Vec::new();
        // code 1: DW_TAG_compile_unit, has children, name=strp, stmt_list=sec_offset
        uleb(&mut data, 1);
        uleb(&mut data, DW_TAG_compile_unit.0.into());
        data.push(1);
        uleb(&mut data, DW_AT_name.0.into());
        uleb(&mut data, DW_FORM_strp.0.into());
        uleb(&mut data, DW_AT_stmt_list.0.into());
        uleb(&mut data, DW_FORM_sec_offset.0.into());
        uleb(&mut data, 0);
        uleb(&mut data, 0);
        // code 2: DW_TAG_subprogram, no children, implicit_const decl_file = 1
        uleb(&mut data, 2);
        uleb(&mut data, DW_TAG_subprogram.0.into());
        data.push(0);
        uleb(&mut data, DW_AT_decl_file.0.into());
        uleb(&mut data, DW_FORM_implicit_const.0.into());
        data.push(1); // sleb 1
        uleb(&mut data, 0);
        uleb(&mut data, 0);
        // terminator
        uleb(&mut data, 0);
        data
    }

    #[test]
    fn test_parse_table() {
        let data = build_table();
        let table = AbbrevTable::parse(&data, 0, Endianness::Little).unwrap();
        assert_eq!(table.len(), 2);

        let cu = table.get(1).unwrap();
        assert_eq!(cu.tag(), DW_TAG_compile_unit);
        assert!(cu.has_children());
        assert_eq!(cu.attributes().len(), 2);
        assert_eq!(cu.attributes()[0].attr, DW_AT_name);
        assert_eq!(cu.attributes()[0].form, DW_FORM_strp);

        let sub = table.get(2).unwrap();
        assert!(!sub.has_children());
        assert_eq!(sub.attributes()[0].implicit_const, Some(1));

        assert!(table.get(3).is_none());
        assert!(table.get(0).is_none());
    }

    #[test]
    fn test_truncated_table() {
        let mut data = build_table();
        data.truncate(4);
        assert!(AbbrevTable::parse(&data, 0, Endianness::Little).is_err());
    }

    #[test]
    fn test_offset_past_end() {
        assert!(AbbrevTable::parse(&[], 4, Endianness::Little).is_err());
    }
}
