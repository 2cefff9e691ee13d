//! The line number program interpreter.
//!
//! A line program is a byte-coded state machine whose execution produces a
//! matrix of rows mapping machine addresses to source file, line and column
//! positions. The interpreter runs the program eagerly on parse, sorts the
//! resulting sequences by start address, and offers binary-search lookups
//! over them.
//!
//! Header layouts differ significantly between DWARF 2-4 and DWARF 5
//! (directory/file tables moved to format-described entries with optional
//! MD5 checksums, and file indexing changed from 1-based to 0-based); both
//! are supported, as is a structural decode of the experimental two-level
//! table format.

use dwarven_common::Endianness;

use crate::constants::*;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::{Cursor, Format};
use crate::session::DwarfSession;
use crate::unit::Unit;

/// String sections a line program header may reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineSections<'data> {
    /// The `.debug_line_str` section.
    pub debug_line_str: &'data [u8],
    /// The `.debug_str` section.
    pub debug_str: &'data [u8],
}

/// Everything the interpreter needs besides the `.debug_line` bytes.
#[derive(Clone, Copy, Debug)]
pub struct LineProgramContext<'data> {
    /// The byte order of the object.
    pub endian: Endianness,
    /// The address size used by `DW_LNE_set_address` before DWARF 5
    /// carried it in the line header.
    pub address_size: u8,
    /// String sections for `strp`/`line_strp` path entries.
    pub sections: LineSections<'data>,
}

/// A string value from a line program header.
///
/// Paths in DWARF 5 headers may be stored as `strx` indices into the unit's
/// string offset table; those cannot be resolved from the line section
/// alone and are surfaced as raw indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineString<'data> {
    /// Resolved string bytes.
    Bytes(&'data [u8]),
    /// An unresolved `strx` index; resolve through the unit.
    StrIndex(u64),
}

impl<'data> LineString<'data> {
    /// The string bytes, if resolved.
    pub fn bytes(&self) -> Option<&'data [u8]> {
        match *self {
            LineString::Bytes(bytes) => Some(bytes),
            LineString::StrIndex(_) => None,
        }
    }
}

impl Default for LineString<'_> {
    fn default() -> Self {
        LineString::Bytes(b"")
    }
}

/// A source file referenced by a line program.
#[derive(Clone, Debug, Default)]
pub struct FileEntry<'data> {
    /// The file path, relative to its directory entry.
    pub path: LineString<'data>,
    /// Index into the include directories.
    pub directory_index: u64,
    /// Modification timestamp, when recorded.
    pub timestamp: u64,
    /// File size in bytes, when recorded.
    pub size: u64,
    /// MD5 checksum of the source file (DWARF 5).
    pub md5: Option<[u8; 16]>,
}

/// The parsed header of a line number program.
#[derive(Clone, Debug)]
pub struct LineProgramHeader<'data> {
    /// The section offset of this program.
    pub offset: u64,
    /// The DWARF format of this program's offsets.
    pub format: Format,
    /// The line table version.
    pub version: u16,
    /// The target address size (DWARF 5; inherited from the unit before).
    pub address_size: u8,
    /// The segment selector size (DWARF 5).
    pub segment_selector_size: u8,
    /// The size in bytes of the smallest target instruction.
    pub minimum_instruction_length: u8,
    /// Maximum operations per instruction (VLIW targets; 1 otherwise).
    pub maximum_operations_per_instruction: u8,
    /// The initial value of the `is_stmt` register.
    pub default_is_stmt: bool,
    /// The smallest line increment of special opcodes.
    pub line_base: i8,
    /// The number of distinct line increments of special opcodes.
    pub line_range: u8,
    /// The first special opcode number.
    pub opcode_base: u8,
    /// Argument counts of the standard opcodes, indexed by opcode - 1.
    pub standard_opcode_lengths: Vec<u8>,
    /// The include directories.
    pub include_directories: Vec<LineString<'data>>,
    /// The file entries.
    pub file_names: Vec<FileEntry<'data>>,
    /// Whether this is the experimental two-level table format, decoded
    /// structurally without semantic guarantees.
    pub experimental: bool,
    program_start: u64,
    program_end: u64,
}

impl<'data> LineProgramHeader<'data> {
    /// The smallest valid file index for this version.
    pub fn base_file_index(&self) -> u64 {
        if self.version >= 5 {
            0
        } else {
            1
        }
    }

    /// One past the largest valid file index for this version.
    pub fn end_file_index(&self) -> u64 {
        self.base_file_index() + self.file_names.len() as u64
    }

    /// Looks up a file entry by its index as used in `DW_LNS_set_file`.
    pub fn file(&self, index: u64) -> Option<&FileEntry<'data>> {
        let position = index.checked_sub(self.base_file_index())?;
        self.file_names.get(position as usize)
    }

    /// Looks up an include directory by index.
    pub fn directory(&self, index: u64) -> Option<&LineString<'data>> {
        if self.version >= 5 {
            self.include_directories.get(index as usize)
        } else if index == 0 {
            // Directory 0 is the compilation directory, which lives on the
            // unit rather than in the header.
            None
        } else {
            self.include_directories.get(index as usize - 1)
        }
    }
}

/// One row of the line number matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineRow {
    /// The target address of this row.
    pub address: u64,
    /// The operation index within a VLIW instruction.
    pub op_index: u64,
    /// The file register, indexed per the header's file table.
    pub file: u64,
    /// The one-based source line, or 0 when unknown.
    pub line: u64,
    /// The one-based source column, or 0 for the left edge.
    pub column: u64,
    /// Whether this address is a recommended statement breakpoint.
    pub is_stmt: bool,
    /// Whether this address begins a basic block.
    pub basic_block: bool,
    /// Whether this row ends its sequence; its address is one past the end.
    pub end_sequence: bool,
    /// Whether this address is where execution should stop for function
    /// entry breakpoints.
    pub prologue_end: bool,
    /// Whether this address is where a function epilogue begins.
    pub epilogue_begin: bool,
    /// The instruction set architecture register.
    pub isa: u64,
    /// Discriminates multiple blocks on the same source position.
    pub discriminator: u64,
}

impl LineRow {
    fn new(default_is_stmt: bool) -> Self {
        LineRow {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }
}

/// A run of monotonically increasing addresses ended by `end_sequence`.
#[derive(Clone, Debug)]
pub struct LineSequence {
    /// The first covered address.
    pub start: u64,
    /// One past the last covered address.
    pub end: u64,
    /// The rows of this sequence, in address order.
    pub rows: Vec<LineRow>,
}

/// A fully executed line number program.
#[derive(Clone, Debug)]
pub struct LineProgram<'data> {
    header: LineProgramHeader<'data>,
    sequences: Vec<LineSequence>,
}

impl<'data> LineProgram<'data> {
    /// Parses the program at `offset` in `.debug_line` and executes it.
    pub fn parse(
        debug_line: &'data [u8],
        offset: u64,
        ctx: LineProgramContext<'data>,
    ) -> Result<Self, DwarfError> {
        let header = Self::parse_header(debug_line, offset, ctx)?;
        let sequences = Self::run(debug_line, &header, ctx)?;
        Ok(LineProgram { header, sequences })
    }

    /// The parsed program header.
    pub fn header(&self) -> &LineProgramHeader<'data> {
        &self.header
    }

    /// The executed sequences, sorted by start address.
    pub fn sequences(&self) -> &[LineSequence] {
        &self.sequences
    }

    /// Finds the row covering the given address.
    pub fn row_for_address(&self, address: u64) -> Option<&LineRow> {
        let sequence = self
            .sequences
            .iter()
            .find(|sequence| address >= sequence.start && address < sequence.end)?;

        let index = match sequence
            .rows
            .binary_search_by_key(&address, |row| row.address)
        {
            Ok(index) => index,
            Err(0) => return None,
            Err(next) => next - 1,
        };

        let row = &sequence.rows[index];
        (!row.end_sequence).then_some(row)
    }

    fn parse_header(
        debug_line: &'data [u8],
        offset: u64,
        ctx: LineProgramContext<'data>,
    ) -> Result<LineProgramHeader<'data>, DwarfError> {
        let mut cursor = Cursor::at(debug_line, offset as usize, ctx.endian);

        let (unit_length, format) = cursor.read_initial_length()?;
        let program_end = (cursor.position() as u64)
            .checked_add(unit_length)
            .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?;
        if program_end > debug_line.len() as u64 {
            return Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
        }

        let version = cursor.read_u16()?;
        let experimental = version == DW_LINE_VERSION_TWO_LEVEL;
        if !matches!(version, 2..=5) && !experimental {
            return Err(DwarfErrorKind::VersionUnsupported(version).into());
        }

        let (address_size, segment_selector_size) = if version >= 5 && !experimental {
            (cursor.read_u8()?, cursor.read_u8()?)
        } else {
            (ctx.address_size, 0)
        };

        let header_length = cursor.read_offset(format)?;
        let program_start = (cursor.position() as u64)
            .checked_add(header_length)
            .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?;
        if program_start > program_end {
            return Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
        }

        let minimum_instruction_length = cursor.read_u8()?;
        let maximum_operations_per_instruction = if version >= 4 || experimental {
            cursor.read_u8()?
        } else {
            1
        };
        let default_is_stmt = cursor.read_u8()? != 0;
        let line_base = cursor.read_u8()? as i8;
        let line_range = cursor.read_u8()?;
        let opcode_base = cursor.read_u8()?;

        if line_range == 0 || maximum_operations_per_instruction == 0 {
            return Err(DwarfErrorKind::BadTypeSize.into());
        }

        let mut standard_opcode_lengths = Vec::with_capacity(opcode_base.max(1) as usize - 1);
        for _ in 1..opcode_base {
            standard_opcode_lengths.push(cursor.read_u8()?);
        }

        let (include_directories, file_names) = if version >= 5 && !experimental {
            let directories = Self::parse_v5_entries(&mut cursor, format, ctx)?;
            let files = Self::parse_v5_entries_files(&mut cursor, format, ctx)?;
            (directories, files)
        } else {
            let mut directories = Vec::new();
            loop {
                let dir = cursor.read_null_terminated()?;
                if dir.is_empty() {
                    break;
                }
                directories.push(LineString::Bytes(dir));
            }

            let mut files = Vec::new();
            loop {
                let name = cursor.read_null_terminated()?;
                if name.is_empty() {
                    break;
                }
                files.push(FileEntry {
                    path: LineString::Bytes(name),
                    directory_index: cursor.read_uleb128()?,
                    timestamp: cursor.read_uleb128()?,
                    size: cursor.read_uleb128()?,
                    md5: None,
                });
            }
            (directories, files)
        };

        Ok(LineProgramHeader {
            offset,
            format,
            version,
            address_size,
            segment_selector_size,
            minimum_instruction_length,
            maximum_operations_per_instruction,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            standard_opcode_lengths,
            include_directories,
            file_names,
            experimental,
            program_start,
            program_end,
        })
    }

    fn parse_v5_entries(
        cursor: &mut Cursor<'data>,
        format: Format,
        ctx: LineProgramContext<'data>,
    ) -> Result<Vec<LineString<'data>>, DwarfError> {
        let formats = Self::parse_entry_formats(cursor)?;
        let count = cursor.read_uleb128()?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let mut path = LineString::default();
            for &(content, form) in &formats {
                let value = Self::read_entry_value(cursor, form, format, ctx)?;
                if content == DW_LNCT_path {
                    if let Some(string) = value.into_string() {
                        path = string;
                    }
                }
            }
            entries.push(path);
        }
        Ok(entries)
    }

    fn parse_v5_entries_files(
        cursor: &mut Cursor<'data>,
        format: Format,
        ctx: LineProgramContext<'data>,
    ) -> Result<Vec<FileEntry<'data>>, DwarfError> {
        let formats = Self::parse_entry_formats(cursor)?;
        let count = cursor.read_uleb128()?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let mut entry = FileEntry::default();
            for &(content, form) in &formats {
                let value = Self::read_entry_value(cursor, form, format, ctx)?;
                match content {
                    DW_LNCT_path => {
                        if let Some(string) = value.into_string() {
                            entry.path = string;
                        }
                    }
                    DW_LNCT_directory_index => {
                        entry.directory_index = value.into_uint().unwrap_or(0)
                    }
                    DW_LNCT_timestamp => entry.timestamp = value.into_uint().unwrap_or(0),
                    DW_LNCT_size => entry.size = value.into_uint().unwrap_or(0),
                    DW_LNCT_MD5 => {
                        if let EntryValue::Bytes(bytes) = value {
                            entry.md5 = bytes.try_into().ok();
                        }
                    }
                    _ => {}
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn parse_entry_formats(cursor: &mut Cursor<'_>) -> Result<Vec<(DwLnct, DwForm)>, DwarfError> {
        let count = cursor.read_u8()?;
        let mut formats = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let content = DwLnct(
                u16::try_from(cursor.read_uleb128()?).map_err(|_| DwarfErrorKind::BadTypeSize)?,
            );
            let form = DwForm(
                u16::try_from(cursor.read_uleb128()?).map_err(|_| DwarfErrorKind::BadTypeSize)?,
            );
            formats.push((content, form));
        }
        Ok(formats)
    }

    fn read_entry_value(
        cursor: &mut Cursor<'data>,
        form: DwForm,
        format: Format,
        ctx: LineProgramContext<'data>,
    ) -> Result<EntryValue<'data>, DwarfError> {
        Ok(match form {
            DW_FORM_string => EntryValue::String(LineString::Bytes(cursor.read_null_terminated()?)),
            DW_FORM_line_strp => {
                let offset = cursor.read_offset(format)?;
                EntryValue::String(LineString::Bytes(section_string(
                    ctx.sections.debug_line_str,
                    offset,
                    ctx.endian,
                )?))
            }
            DW_FORM_strp => {
                let offset = cursor.read_offset(format)?;
                EntryValue::String(LineString::Bytes(section_string(
                    ctx.sections.debug_str,
                    offset,
                    ctx.endian,
                )?))
            }
            DW_FORM_strx => EntryValue::String(LineString::StrIndex(cursor.read_uleb128()?)),
            DW_FORM_strx1 => EntryValue::String(LineString::StrIndex(cursor.read_uint(1)?)),
            DW_FORM_strx2 => EntryValue::String(LineString::StrIndex(cursor.read_uint(2)?)),
            DW_FORM_strx3 => {
                EntryValue::String(LineString::StrIndex(crate::forms::read_u24(cursor)?))
            }
            DW_FORM_strx4 => EntryValue::String(LineString::StrIndex(cursor.read_uint(4)?)),
            DW_FORM_udata => EntryValue::Uint(cursor.read_uleb128()?),
            DW_FORM_data1 => EntryValue::Uint(cursor.read_uint(1)?),
            DW_FORM_data2 => EntryValue::Uint(cursor.read_uint(2)?),
            DW_FORM_data4 => EntryValue::Uint(cursor.read_uint(4)?),
            DW_FORM_data8 => EntryValue::Uint(cursor.read_uint(8)?),
            DW_FORM_data16 => EntryValue::Bytes(cursor.read_bytes(16)?),
            DW_FORM_block => {
                let len = cursor.read_uleb128()? as usize;
                EntryValue::Bytes(cursor.read_bytes(len)?)
            }
            form => return Err(DwarfErrorKind::UnknownForm(form).into()),
        })
    }

    fn run(
        debug_line: &'data [u8],
        header: &LineProgramHeader<'data>,
        ctx: LineProgramContext<'data>,
    ) -> Result<Vec<LineSequence>, DwarfError> {
        let mut cursor = Cursor::at(debug_line, header.program_start as usize, ctx.endian);
        let mut registers = LineRow::new(header.default_is_stmt);
        let mut sequences = Vec::new();
        let mut rows: Vec<LineRow> = Vec::new();

        while (cursor.position() as u64) < header.program_end {
            let opcode = cursor.read_u8()?;

            if opcode >= header.opcode_base {
                // Special opcode: advance both address and line, emit a row.
                let adjusted = opcode - header.opcode_base;
                let operation_advance = u64::from(adjusted / header.line_range);
                Self::advance_address(header, &mut registers, operation_advance);
                registers.line = registers.line.wrapping_add_signed(
                    i64::from(header.line_base) + i64::from(adjusted % header.line_range),
                );
                Self::emit(&mut rows, &mut registers);
            } else if opcode != 0 {
                match DwLns(opcode) {
                    DW_LNS_copy => Self::emit(&mut rows, &mut registers),
                    DW_LNS_advance_pc => {
                        let advance = cursor.read_uleb128()?;
                        Self::advance_address(header, &mut registers, advance);
                    }
                    DW_LNS_advance_line => {
                        let delta = cursor.read_sleb128()?;
                        registers.line = registers.line.wrapping_add_signed(delta);
                    }
                    DW_LNS_set_file => registers.file = cursor.read_uleb128()?,
                    DW_LNS_set_column => registers.column = cursor.read_uleb128()?,
                    DW_LNS_negate_stmt => registers.is_stmt = !registers.is_stmt,
                    DW_LNS_set_basic_block => registers.basic_block = true,
                    DW_LNS_const_add_pc => {
                        let adjusted = 255 - header.opcode_base;
                        let advance = u64::from(adjusted / header.line_range);
                        Self::advance_address(header, &mut registers, advance);
                    }
                    DW_LNS_fixed_advance_pc => {
                        registers.address =
                            registers.address.wrapping_add(u64::from(cursor.read_u16()?));
                        registers.op_index = 0;
                    }
                    DW_LNS_set_prologue_end => registers.prologue_end = true,
                    DW_LNS_set_epilogue_begin => registers.epilogue_begin = true,
                    DW_LNS_set_isa => registers.isa = cursor.read_uleb128()?,
                    unknown => {
                        // Skip the declared ULEB arguments of opcodes from a
                        // newer standard than this header claims.
                        let arguments = header
                            .standard_opcode_lengths
                            .get(unknown.0 as usize - 1)
                            .copied()
                            .ok_or(DwarfErrorKind::UnknownOpcode(unknown.0))?;
                        for _ in 0..arguments {
                            cursor.read_uleb128()?;
                        }
                    }
                }
            } else {
                // Extended opcode: length-prefixed.
                let length = cursor.read_uleb128()? as usize;
                let start = cursor.position();
                let sub_opcode = DwLne(cursor.read_u8()?);

                match sub_opcode {
                    DW_LNE_end_sequence => {
                        registers.end_sequence = true;
                        Self::emit(&mut rows, &mut registers);
                        Self::finish_sequence(&mut sequences, &mut rows);
                        registers = LineRow::new(header.default_is_stmt);
                    }
                    DW_LNE_set_address => {
                        registers.address = cursor.read_address(header.address_size)?;
                        registers.op_index = 0;
                    }
                    DW_LNE_set_discriminator => {
                        registers.discriminator = cursor.read_uleb128()?;
                    }
                    DW_LNE_define_file => {
                        // Legacy in-program file definition; the header file
                        // table is authoritative for DWARF 5.
                        let _name = cursor.read_null_terminated()?;
                        let _dir = cursor.read_uleb128()?;
                        let _timestamp = cursor.read_uleb128()?;
                        let _size = cursor.read_uleb128()?;
                    }
                    _ => {}
                }

                // Trust the declared length over what we consumed.
                let consumed = cursor.position() - start;
                if consumed > length {
                    return Err(DwarfErrorKind::Truncated.into());
                }
                cursor.skip(length - consumed)?;
            }
        }

        if !rows.is_empty() {
            // A sequence without end_sequence; keep what was produced.
            Self::finish_sequence(&mut sequences, &mut rows);
        }

        // Sequences are not guaranteed to be emitted in address order.
        dmsort::sort_by_key(&mut sequences, |sequence| sequence.start);
        Ok(sequences)
    }

    fn advance_address(
        header: &LineProgramHeader<'_>,
        registers: &mut LineRow,
        operation_advance: u64,
    ) {
        let max_ops = u64::from(header.maximum_operations_per_instruction);
        let total = registers.op_index + operation_advance;
        registers.address = registers.address.wrapping_add(
            u64::from(header.minimum_instruction_length) * (total / max_ops),
        );
        registers.op_index = total % max_ops;
    }

    fn emit(rows: &mut Vec<LineRow>, registers: &mut LineRow) {
        rows.push(*registers);
        registers.basic_block = false;
        registers.prologue_end = false;
        registers.epilogue_begin = false;
        registers.discriminator = 0;
    }

    fn finish_sequence(sequences: &mut Vec<LineSequence>, rows: &mut Vec<LineRow>) {
        if rows.is_empty() {
            return;
        }
        let start = rows.first().map(|row| row.address).unwrap_or(0);
        let end = rows.last().map(|row| row.address).unwrap_or(start);
        sequences.push(LineSequence {
            start,
            end,
            rows: std::mem::take(rows),
        });
    }
}

fn section_string<'data>(
    data: &'data [u8],
    offset: u64,
    endian: Endianness,
) -> Result<&'data [u8], DwarfError> {
    let offset = usize::try_from(offset)
        .ok()
        .filter(|&offset| offset < data.len())
        .ok_or(DwarfErrorKind::SectionStringOffsetBad)?;
    Cursor::at(data, offset, endian)
        .read_null_terminated()
        .map_err(|_| DwarfErrorKind::SectionStringOffsetBad.into())
}

impl<'data> DwarfSession<'data> {
    /// Parses and executes the line program of a compilation unit.
    ///
    /// Returns `Ok(None)` when the unit carries no `DW_AT_stmt_list`.
    pub fn line_program(
        &self,
        unit: &Unit<'_, 'data>,
    ) -> Result<Option<LineProgram<'data>>, DwarfError> {
        let offset = match unit.line_program_offset() {
            Some(offset) => offset,
            None => return Ok(None),
        };

        let ctx = LineProgramContext {
            endian: self.endian(),
            address_size: unit.header().address_size(),
            sections: LineSections {
                debug_line_str: self.sections.debug_line_str,
                debug_str: self.sections.debug_str,
            },
        };

        LineProgram::parse(self.sections.debug_line, offset, ctx).map(Some)
    }
}

enum EntryValue<'data> {
    String(LineString<'data>),
    Uint(u64),
    Bytes(&'data [u8]),
}

impl<'data> EntryValue<'data> {
    fn into_string(self) -> Option<LineString<'data>> {
        match self {
            EntryValue::String(string) => Some(string),
            _ => None,
        }
    }

    fn into_uint(self) -> Option<u64> {
        match self {
            EntryValue::Uint(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
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

    fn ctx() -> LineProgramContext<'static> {
        LineProgramContext {
            endian: Endianness::Little,
            address_size: 8,
            sections: LineSections::default(),
        }
    }

    /// Builds a DWARF 4 line program with files "a.c" and "b.c" and the
    /// given program bytes.
    fn build_program(program: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&4u16.to_le_bytes()); // version
        let mut rest = Vec::new();
        rest.push(1); // minimum_instruction_length
        rest.push(1); // maximum_operations_per_instruction
        rest.push(1); // default_is_stmt
        rest.push(251u8); // line_base = -5
        rest.push(14); // line_range
        rest.push(13); // opcode_base
        rest.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        rest.push(0); // empty include directories
        for name in [&b"a.c"[..], &b"b.c"[..]] {
            rest.extend_from_slice(name);
            rest.push(0);
            uleb(&mut rest, 0); // dir
            uleb(&mut rest, 0); // mtime
            uleb(&mut rest, 0); // size
        }
        rest.push(0); // end of file table

        let header_length = rest.len() as u32;
        header.extend_from_slice(&header_length.to_le_bytes());
        header.extend_from_slice(&rest);
        header.extend_from_slice(program);

        let mut out = Vec::new();
        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        out
    }

    fn end_sequence_bytes() -> Vec<u8> {
        vec![0x00, 0x01, DW_LNE_end_sequence.0]
    }

    #[test]
    fn test_set_file_advance_copy() {
        let mut program = Vec::new();
        program.push(DW_LNS_set_file.0);
        uleb(&mut program, 2);
        program.push(DW_LNS_advance_pc.0);
        uleb(&mut program, 0x10);
        program.push(DW_LNS_copy.0);
        program.extend_from_slice(&end_sequence_bytes());

        let data = build_program(&program);
        let parsed = LineProgram::parse(&data, 0, ctx()).unwrap();

        assert_eq!(parsed.header().version, 4);
        assert_eq!(parsed.header().base_file_index(), 1);
        assert_eq!(
            parsed.header().file(2).unwrap().path,
            LineString::Bytes(b"b.c")
        );

        let sequences = parsed.sequences();
        assert_eq!(sequences.len(), 1);
        let rows = &sequences[0].rows;
        assert_eq!(rows.len(), 2);

        let row = rows[0];
        assert_eq!(row.address, 0x10);
        assert_eq!(row.file, 2);
        assert_eq!(row.line, 1);
        assert!(row.is_stmt);
        assert!(!row.end_sequence);

        assert!(rows.last().unwrap().end_sequence);
    }

    #[test]
    fn test_special_opcode() {
        // opcode_base 13, line_base -5, line_range 14:
        // opcode 13 => adjusted 0 => advance 0, line += -5.
        // Pick adjusted = 6: line += 1, address advance 0.
        let mut program = vec![DW_LNS_advance_line.0, 0x7f]; // line -1 => 0
        program.push(13 + 6);
        program.extend_from_slice(&end_sequence_bytes());

        let data = build_program(&program);
        let parsed = LineProgram::parse(&data, 0, ctx()).unwrap();
        let row = parsed.sequences()[0].rows[0];
        assert_eq!(row.line, 1);
        assert_eq!(row.address, 0);
    }

    #[test]
    fn test_row_lookup_and_end_sequence() {
        let mut program = Vec::new();
        program.extend_from_slice(&[0x00, 0x09, DW_LNE_set_address.0]);
        program.extend_from_slice(&0x1000u64.to_le_bytes());
        program.push(DW_LNS_copy.0);
        program.push(DW_LNS_advance_pc.0);
        uleb(&mut program, 0x20);
        program.extend_from_slice(&end_sequence_bytes());

        let data = build_program(&program);
        let parsed = LineProgram::parse(&data, 0, ctx()).unwrap();

        let sequence = &parsed.sequences()[0];
        assert_eq!(sequence.start, 0x1000);
        assert_eq!(sequence.end, 0x1020);

        assert_eq!(parsed.row_for_address(0x1000).unwrap().line, 1);
        assert_eq!(parsed.row_for_address(0x101f).unwrap().address, 0x1000);
        assert!(parsed.row_for_address(0x1020).is_none());
        assert!(parsed.row_for_address(0xfff).is_none());

        let last = sequence.rows.last().unwrap();
        assert!(last.end_sequence);
        assert_eq!(last.address, 0x1020);
    }

    #[test]
    fn test_truncated_program() {
        let mut program = Vec::new();
        program.push(DW_LNS_advance_pc.0);
        // Missing the ULEB operand entirely, then cut the section short.
        let mut data = build_program(&program);
        let declared_len = data.len() as u32 + 1;
        data[0..4].copy_from_slice(&declared_len.to_le_bytes());

        assert!(LineProgram::parse(&data, 0, ctx()).is_err());
    }

    #[test]
    fn test_default_is_stmt_off() {
        let mut program = Vec::new();
        program.push(DW_LNS_negate_stmt.0);
        program.push(DW_LNS_copy.0);
        program.extend_from_slice(&end_sequence_bytes());

        let data = build_program(&program);
        let parsed = LineProgram::parse(&data, 0, ctx()).unwrap();
        assert!(!parsed.sequences()[0].rows[0].is_stmt);
    }
}
