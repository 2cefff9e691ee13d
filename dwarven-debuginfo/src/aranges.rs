//! The `.debug_aranges` address lookup tables.
//!
//! Each set in the section maps a group of address ranges to the offset of
//! the compilation unit describing them, letting symbolizers find the right
//! unit for a PC without walking every unit's DIEs.

use fallible_iterator::FallibleIterator;

use dwarven_common::Endianness;

use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::{Cursor, Format};

/// The header of one `.debug_aranges` set.
#[derive(Clone, Copy, Debug)]
pub struct ArangesHeader {
    /// The section offset of this set.
    pub offset: u64,
    /// The DWARF offset format.
    pub format: Format,
    /// The aranges version; always 2.
    pub version: u16,
    /// The `.debug_info` offset of the unit this set belongs to.
    pub debug_info_offset: u64,
    /// The size of addresses in the tuples.
    pub address_size: u8,
    /// The size of segment selectors in the tuples.
    pub segment_size: u8,
}

/// One (address, length) tuple of a set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArangeEntry {
    /// The first address of the range.
    pub address: u64,
    /// The length of the range in bytes.
    pub length: u64,
    /// The `.debug_info` offset of the owning unit.
    pub debug_info_offset: u64,
}

/// A reader over a `.debug_aranges` section.
#[derive(Clone, Copy, Debug)]
pub struct Aranges<'data> {
    data: &'data [u8],
    endian: Endianness,
}

impl<'data> Aranges<'data> {
    /// Creates a reader over the section bytes.
    pub fn new(data: &'data [u8], endian: Endianness) -> Self {
        Aranges { data, endian }
    }

    /// Returns an iterator over all tuples of all sets.
    pub fn entries(&self) -> ArangeEntryIter<'data> {
        ArangeEntryIter {
            data: self.data,
            cursor: Cursor::new(self.data, self.endian),
            current: None,
            set_end: 0,
        }
    }

    /// Finds the `.debug_info` unit offset covering the given address.
    pub fn find(&self, address: u64) -> Result<Option<u64>, DwarfError> {
        let mut entries = self.entries();
        while let Some(entry) = entries.next()? {
            if address >= entry.address && address - entry.address < entry.length {
                return Ok(Some(entry.debug_info_offset));
            }
        }
        Ok(None)
    }
}

impl<'data> crate::session::DwarfSession<'data> {
    /// Returns a reader over this object's `.debug_aranges` tables.
    pub fn aranges(&self) -> Aranges<'data> {
        Aranges::new(self.sections.debug_aranges, self.endian())
    }
}

/// A fallible iterator over the tuples of a `.debug_aranges` section.
pub struct ArangeEntryIter<'data> {
    data: &'data [u8],
    cursor: Cursor<'data>,
    current: Option<ArangesHeader>,
    set_end: u64,
}

impl<'data> ArangeEntryIter<'data> {
    fn parse_header(&mut self) -> Result<Option<ArangesHeader>, DwarfError> {
        if self.cursor.remaining() < 4 {
            return Ok(None);
        }

        let offset = self.cursor.position() as u64;
        let (length, format) = self.cursor.read_initial_length()?;
        let end = (self.cursor.position() as u64)
            .checked_add(length)
            .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?;
        if end > self.data.len() as u64 {
            return Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
        }

        let version = self.cursor.read_u16()?;
        if version != 2 {
            return Err(DwarfErrorKind::VersionUnsupported(version).into());
        }

        let debug_info_offset = self.cursor.read_offset(format)?;
        let address_size = self.cursor.read_u8()?;
        let segment_size = self.cursor.read_u8()?;

        // Tuples start at the next multiple of the tuple size, counted from
        // the beginning of the set.
        let tuple_size = u64::from(address_size) * 2;
        if tuple_size == 0 {
            return Err(DwarfErrorKind::BadTypeSize.into());
        }
        let from_set = self.cursor.position() as u64 - offset;
        let misaligned = from_set % tuple_size;
        if misaligned != 0 {
            self.cursor.skip((tuple_size - misaligned) as usize)?;
        }

        self.set_end = end;
        Ok(Some(ArangesHeader {
            offset,
            format,
            version,
            debug_info_offset,
            address_size,
            segment_size,
        }))
    }
}

impl<'data> FallibleIterator for ArangeEntryIter<'data> {
    type Item = ArangeEntry;
    type Error = DwarfError;

    fn next(&mut self) -> Result<Option<ArangeEntry>, DwarfError> {
        loop {
            let header = match self.current {
                Some(header) => header,
                None => match self.parse_header()? {
                    Some(header) => {
                        self.current = Some(header);
                        header
                    }
                    None => return Ok(None),
                },
            };

            if (self.cursor.position() as u64) >= self.set_end {
                self.current = None;
                continue;
            }

            if header.segment_size > 0 {
                self.cursor.skip(header.segment_size as usize)?;
            }
            let address = self.cursor.read_address(header.address_size)?;
            let length = self.cursor.read_address(header.address_size)?;

            if address == 0 && length == 0 {
                // The terminating tuple of this set.
                self.cursor.set_position(self.set_end as usize)?;
                self.current = None;
                continue;
            }

            return Ok(Some(ArangeEntry {
                address,
                length,
                debug_info_offset: header.debug_info_offset,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_set(info_offset: u32, tuples: &[(u64, u64)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_le_bytes()); // version
        body.extend_from_slice(&info_offset.to_le_bytes());
        body.push(8); // address size
        body.push(0); // segment size
        // Header is 4 + 2 + 4 + 1 + 1 = 12 bytes; pad to 16.
        body.extend_from_slice(&[0u8; 4]);
        for &(address, length) in tuples {
            body.extend_from_slice(&address.to_le_bytes());
            body.extend_from_slice(&length.to_le_bytes());
        }
        body.extend_from_slice(&[0u8; 16]); // terminator

        let mut out = Vec::new();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_find_unit_for_address() {
        let mut data = build_set(0x40, &[(0x1000, 0x100), (0x2000, 0x80)]);
        data.extend_from_slice(&build_set(0x90, &[(0x3000, 0x10)]));

        let aranges = Aranges::new(&data, Endianness::Little);
        assert_eq!(aranges.find(0x1080).unwrap(), Some(0x40));
        assert_eq!(aranges.find(0x2000).unwrap(), Some(0x40));
        assert_eq!(aranges.find(0x3008).unwrap(), Some(0x90));
        assert_eq!(aranges.find(0x4000).unwrap(), None);
    }

    #[test]
    fn test_entry_count() {
        let data = build_set(0x40, &[(0x1000, 0x100), (0x2000, 0x80)]);
        let aranges = Aranges::new(&data, Endianness::Little);
        let entries: Vec<_> = aranges.entries().collect().unwrap();
        assert_eq!(entries.len(), 2);
    }
}
