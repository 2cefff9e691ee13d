//! Call frame information from `.debug_frame` and `.eh_frame`.
//!
//! Frame sections interleave CIEs (common information entries) with FDEs
//! (frame description entries). A CIE carries the alignment factors, the
//! return address column and a prologue of instructions shared by its FDEs;
//! each FDE covers one contiguous PC range and refines the CIE rules with
//! its own instruction stream.
//!
//! The expander exposes both layers: the raw instruction stream, decoded
//! one record per `DW_CFA_*` opcode, and the evaluated unwind row for a
//! target PC with one register rule per column.
//!
//! The two container sections differ in detail: `.eh_frame` distinguishes
//! CIEs by a zero id, encodes CIE pointers as backwards-relative offsets,
//! and applies `DW_EH_PE` pointer encodings from the `z` augmentation to
//! FDE addresses.

use fallible_iterator::FallibleIterator;
use smallvec::SmallVec;

use dwarven_common::Endianness;

use crate::constants::*;
use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::{Cursor, Format};

/// A call frame section with the context needed to decode it.
#[derive(Clone, Copy, Debug)]
pub struct FrameSection<'data> {
    data: &'data [u8],
    endian: Endianness,
    address_size: u8,
    is_eh: bool,
    /// The virtual address this section is mapped at; needed to resolve
    /// pc-relative `.eh_frame` pointer encodings.
    section_address: u64,
}

/// A common information entry.
#[derive(Clone, Debug)]
pub struct Cie<'data> {
    /// The section offset of this CIE.
    pub offset: u64,
    /// The DWARF offset format of this entry.
    pub format: Format,
    /// The CIE version (1, 3 or 4).
    pub version: u8,
    /// The augmentation string.
    pub augmentation: &'data [u8],
    /// The target address size; from the CIE in version 4, from the
    /// section context before.
    pub address_size: u8,
    /// The segment selector size (version 4).
    pub segment_size: u8,
    /// Factor applied to advance-location deltas.
    pub code_alignment_factor: u64,
    /// Factor applied to offset rules.
    pub data_alignment_factor: i64,
    /// The column holding the return address.
    pub return_address_register: u64,
    /// The encoding of FDE addresses (`z R` augmentation).
    pub fde_encoding: Option<DwEhPe>,
    /// The encoding of LSDA pointers (`z L` augmentation).
    pub lsda_encoding: Option<DwEhPe>,
    /// The personality routine address (`z P` augmentation).
    pub personality: Option<u64>,
    /// The instructions establishing the initial row.
    pub initial_instructions: &'data [u8],
}

/// A frame description entry with its resolved CIE.
#[derive(Clone, Debug)]
pub struct Fde<'data> {
    /// The section offset of this FDE.
    pub offset: u64,
    /// The CIE this FDE refers to.
    pub cie: Cie<'data>,
    /// The first PC covered.
    pub initial_location: u64,
    /// The number of bytes covered.
    pub address_range: u64,
    /// Raw augmentation data (`z` augmentation).
    pub augmentation_data: &'data [u8],
    /// The instruction stream refining the CIE rules.
    pub instructions: &'data [u8],
}

impl Fde<'_> {
    /// Whether the given PC falls into this FDE's range.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.initial_location
            && address < self.initial_location.wrapping_add(self.address_range)
    }
}

/// An entry of a frame section.
#[derive(Clone, Debug)]
pub enum FrameEntry<'data> {
    /// A common information entry.
    Cie(Cie<'data>),
    /// A frame description entry.
    Fde(Fde<'data>),
}

/// One decoded call frame instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallFrameInstruction<'data> {
    /// Advance the current location by `delta` code alignment units.
    AdvanceLoc {
        /// The unfactored delta.
        delta: u64,
    },
    /// Set the current location to an absolute address.
    SetLoc {
        /// The new location.
        address: u64,
    },
    /// Rule: register saved at CFA + factored offset.
    Offset {
        /// The register column.
        register: u64,
        /// The offset in data alignment units.
        factored_offset: i64,
    },
    /// Rule: register value is CFA + factored offset.
    ValOffset {
        /// The register column.
        register: u64,
        /// The offset in data alignment units.
        factored_offset: i64,
    },
    /// Restore a register to its CIE initial rule.
    Restore {
        /// The register column.
        register: u64,
    },
    /// Rule: register value is unrecoverable.
    Undefined {
        /// The register column.
        register: u64,
    },
    /// Rule: register keeps its previous-frame value.
    SameValue {
        /// The register column.
        register: u64,
    },
    /// Rule: register saved in another register.
    Register {
        /// The register column.
        register: u64,
        /// The register holding the value.
        source: u64,
    },
    /// Rule: register saved at the address computed by an expression.
    Expression {
        /// The register column.
        register: u64,
        /// The DWARF expression.
        expression: &'data [u8],
    },
    /// Rule: register value is the result of an expression.
    ValExpression {
        /// The register column.
        register: u64,
        /// The DWARF expression.
        expression: &'data [u8],
    },
    /// Define the CFA as register + offset.
    DefCfa {
        /// The base register.
        register: u64,
        /// The unfactored offset.
        offset: i64,
    },
    /// Define the CFA as register + factored offset.
    DefCfaSf {
        /// The base register.
        register: u64,
        /// The offset in data alignment units.
        factored_offset: i64,
    },
    /// Change only the CFA base register.
    DefCfaRegister {
        /// The base register.
        register: u64,
    },
    /// Change only the CFA offset.
    DefCfaOffset {
        /// The unfactored offset.
        offset: i64,
    },
    /// Change only the CFA offset, factored.
    DefCfaOffsetSf {
        /// The offset in data alignment units.
        factored_offset: i64,
    },
    /// Define the CFA by an expression.
    DefCfaExpression {
        /// The DWARF expression.
        expression: &'data [u8],
    },
    /// Push the current register rules onto the implicit stack.
    RememberState,
    /// Pop the register rules from the implicit stack.
    RestoreState,
    /// The GNU argument size hint.
    ArgsSize {
        /// The size of the outgoing arguments.
        size: u64,
    },
    /// Padding.
    Nop,
}

/// The rule recovering one register in a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegisterRule<'data> {
    /// No rule; the value is unrecoverable unless the ABI says otherwise.
    #[default]
    Undefined,
    /// The register keeps its value.
    SameValue,
    /// Saved at CFA + offset (already factored).
    Offset(i64),
    /// The value is CFA + offset (already factored).
    ValOffset(i64),
    /// Saved in another register.
    Register(u64),
    /// Saved at the address computed by the expression.
    Expression(&'data [u8]),
    /// The value computed by the expression.
    ValExpression(&'data [u8]),
    /// Defined by the architecture's ABI.
    Architectural,
}

/// The rule computing the canonical frame address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CfaRule<'data> {
    /// CFA = register + offset.
    RegisterAndOffset {
        /// The base register.
        register: u64,
        /// The byte offset.
        offset: i64,
    },
    /// CFA computed by a DWARF expression.
    Expression(&'data [u8]),
}

impl Default for CfaRule<'_> {
    fn default() -> Self {
        CfaRule::RegisterAndOffset {
            register: 0,
            offset: 0,
        }
    }
}

type RegisterColumns<'data> = SmallVec<[(u64, RegisterRule<'data>); 8]>;

/// The evaluated unwind rules covering one PC range.
#[derive(Clone, Debug, Default)]
pub struct UnwindRow<'data> {
    /// The first PC this row applies to.
    pub start_address: u64,
    /// One past the last PC this row applies to.
    pub end_address: u64,
    /// The canonical frame address rule.
    pub cfa: CfaRule<'data>,
    /// The register rules, sparse by column number.
    registers: RegisterColumns<'data>,
}

impl<'data> UnwindRow<'data> {
    /// The rule for a register column.
    pub fn register(&self, column: u64) -> RegisterRule<'data> {
        self.registers
            .iter()
            .find(|(register, _)| *register == column)
            .map(|(_, rule)| *rule)
            .unwrap_or_default()
    }

    /// All explicitly set register rules, ordered by column.
    pub fn registers(&self) -> &[(u64, RegisterRule<'data>)] {
        &self.registers
    }

    fn set_register(&mut self, column: u64, rule: RegisterRule<'data>) {
        match self
            .registers
            .binary_search_by_key(&column, |(register, _)| *register)
        {
            Ok(index) => self.registers[index].1 = rule,
            Err(index) => self.registers.insert(index, (column, rule)),
        }
    }
}

impl<'data> FrameSection<'data> {
    /// Creates a reader over a `.debug_frame` section.
    pub fn debug_frame(data: &'data [u8], endian: Endianness, address_size: u8) -> Self {
        FrameSection {
            data,
            endian,
            address_size,
            is_eh: false,
            section_address: 0,
        }
    }

    /// Creates a reader over an `.eh_frame` section mapped at
    /// `section_address`.
    pub fn eh_frame(
        data: &'data [u8],
        endian: Endianness,
        address_size: u8,
        section_address: u64,
    ) -> Self {
        FrameSection {
            data,
            endian,
            address_size,
            is_eh: true,
            section_address,
        }
    }

    /// Returns an iterator over the entries of this section.
    pub fn entries(&self) -> FrameEntryIter<'data> {
        FrameEntryIter {
            section: *self,
            offset: 0,
            done: false,
        }
    }

    /// Finds the FDE covering the given PC.
    ///
    /// `Ok(None)` is valid absence: no FDE covers the address.
    pub fn fde_for_address(&self, address: u64) -> Result<Option<Fde<'data>>, DwarfError> {
        let mut entries = self.entries();
        while let Some(entry) = entries.next()? {
            if let FrameEntry::Fde(fde) = entry {
                if fde.contains(address) {
                    return Ok(Some(fde));
                }
            }
        }
        Ok(None)
    }

    /// Evaluates the unwind row covering the given PC.
    pub fn unwind_info_for_address(
        &self,
        address: u64,
    ) -> Result<Option<UnwindRow<'data>>, DwarfError> {
        match self.fde_for_address(address)? {
            Some(fde) => self.unwind_row(&fde, address).map(Some),
            None => Ok(None),
        }
    }

    /// Returns an iterator over the decoded instructions of a CIE or FDE
    /// instruction stream.
    pub fn instructions(&self, cie: &Cie<'data>, data: &'data [u8]) -> CfiInstructionIter<'data> {
        CfiInstructionIter {
            cursor: Cursor::new(data, self.endian),
            address_size: cie.address_size,
            fde_encoding: cie.fde_encoding,
            section: *self,
        }
    }

    /// Executes the CIE prologue and FDE instructions up to the target PC,
    /// producing the row covering it.
    pub fn unwind_row(
        &self,
        fde: &Fde<'data>,
        address: u64,
    ) -> Result<UnwindRow<'data>, DwarfError> {
        if !fde.contains(address) {
            return Err(DwarfErrorKind::InvalidHandle.into());
        }

        let cie = &fde.cie;
        let mut row = UnwindRow {
            start_address: fde.initial_location,
            end_address: fde.initial_location.wrapping_add(fde.address_range),
            ..Default::default()
        };

        // The CIE prologue establishes the initial rules.
        let mut initial = self.instructions(cie, cie.initial_instructions);
        let mut location = fde.initial_location;
        while let Some(instruction) = initial.next()? {
            // Advances inside a CIE prologue are not meaningful; apply only
            // the rule changes.
            Self::apply(cie, &mut row, instruction, &mut Vec::new(), None)?;
        }
        let initial_row = row.clone();

        let mut state_stack = Vec::new();
        let mut instructions = self.instructions(cie, fde.instructions);
        while let Some(instruction) = instructions.next()? {
            match instruction {
                CallFrameInstruction::AdvanceLoc { delta } => {
                    let next = location.wrapping_add(delta * cie.code_alignment_factor);
                    if next > address {
                        row.end_address = next;
                        break;
                    }
                    location = next;
                }
                CallFrameInstruction::SetLoc { address: next } => {
                    if next > address {
                        row.end_address = next;
                        break;
                    }
                    location = next;
                }
                other => {
                    Self::apply(cie, &mut row, other, &mut state_stack, Some(&initial_row))?
                }
            }
        }

        row.start_address = location;
        Ok(row)
    }

    fn apply(
        cie: &Cie<'data>,
        row: &mut UnwindRow<'data>,
        instruction: CallFrameInstruction<'data>,
        state_stack: &mut Vec<(CfaRule<'data>, RegisterColumns<'data>)>,
        initial: Option<&UnwindRow<'data>>,
    ) -> Result<(), DwarfError> {
        let daf = cie.data_alignment_factor;
        match instruction {
            CallFrameInstruction::AdvanceLoc { .. } | CallFrameInstruction::SetLoc { .. } => {}
            CallFrameInstruction::Offset {
                register,
                factored_offset,
            } => row.set_register(register, RegisterRule::Offset(factored_offset * daf)),
            CallFrameInstruction::ValOffset {
                register,
                factored_offset,
            } => row.set_register(register, RegisterRule::ValOffset(factored_offset * daf)),
            CallFrameInstruction::Restore { register } => {
                let rule = initial
                    .map(|row| row.register(register))
                    .unwrap_or_default();
                row.set_register(register, rule);
            }
            CallFrameInstruction::Undefined { register } => {
                row.set_register(register, RegisterRule::Undefined)
            }
            CallFrameInstruction::SameValue { register } => {
                row.set_register(register, RegisterRule::SameValue)
            }
            CallFrameInstruction::Register { register, source } => {
                row.set_register(register, RegisterRule::Register(source))
            }
            CallFrameInstruction::Expression {
                register,
                expression,
            } => row.set_register(register, RegisterRule::Expression(expression)),
            CallFrameInstruction::ValExpression {
                register,
                expression,
            } => row.set_register(register, RegisterRule::ValExpression(expression)),
            CallFrameInstruction::DefCfa { register, offset } => {
                row.cfa = CfaRule::RegisterAndOffset { register, offset }
            }
            CallFrameInstruction::DefCfaSf {
                register,
                factored_offset,
            } => {
                row.cfa = CfaRule::RegisterAndOffset {
                    register,
                    offset: factored_offset * daf,
                }
            }
            CallFrameInstruction::DefCfaRegister { register } => {
                if let CfaRule::RegisterAndOffset { offset, .. } = row.cfa {
                    row.cfa = CfaRule::RegisterAndOffset { register, offset };
                }
            }
            CallFrameInstruction::DefCfaOffset { offset } => {
                if let CfaRule::RegisterAndOffset { register, .. } = row.cfa {
                    row.cfa = CfaRule::RegisterAndOffset { register, offset };
                }
            }
            CallFrameInstruction::DefCfaOffsetSf { factored_offset } => {
                if let CfaRule::RegisterAndOffset { register, .. } = row.cfa {
                    row.cfa = CfaRule::RegisterAndOffset {
                        register,
                        offset: factored_offset * daf,
                    };
                }
            }
            CallFrameInstruction::DefCfaExpression { expression } => {
                row.cfa = CfaRule::Expression(expression)
            }
            CallFrameInstruction::RememberState => {
                state_stack.push((row.cfa, row.registers.clone()));
            }
            CallFrameInstruction::RestoreState => {
                if let Some((cfa, registers)) = state_stack.pop() {
                    row.cfa = cfa;
                    row.registers = registers;
                }
            }
            CallFrameInstruction::ArgsSize { .. } | CallFrameInstruction::Nop => {}
        }
        Ok(())
    }

    fn parse_cie(&self, offset: u64) -> Result<Cie<'data>, DwarfError> {
        let mut cursor = Cursor::at(self.data, offset as usize, self.endian);
        let (length, format) = cursor.read_initial_length()?;
        let end = (cursor.position() as u64)
            .checked_add(length)
            .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?;
        if end > self.data.len() as u64 {
            return Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
        }

        let id = cursor.read_offset(format)?;
        if !self.is_cie_id(id, format) {
            return Err(DwarfErrorKind::InvalidHandle.into());
        }

        let version = cursor.read_u8()?;
        if !matches!(version, 1 | 3 | 4) {
            return Err(DwarfErrorKind::VersionUnsupported(u16::from(version)).into());
        }

        let augmentation = cursor.read_null_terminated()?;

        let (address_size, segment_size) = if version == 4 {
            (cursor.read_u8()?, cursor.read_u8()?)
        } else {
            (self.address_size, 0)
        };

        let code_alignment_factor = cursor.read_uleb128()?;
        let data_alignment_factor = cursor.read_sleb128()?;
        let return_address_register = if version == 1 {
            u64::from(cursor.read_u8()?)
        } else {
            cursor.read_uleb128()?
        };

        let mut fde_encoding = None;
        let mut lsda_encoding = None;
        let mut personality = None;

        if augmentation.first() == Some(&b'z') {
            let aug_len = cursor.read_uleb128()? as usize;
            let aug_end = cursor.position() + aug_len;

            for &ch in &augmentation[1..] {
                match ch {
                    b'R' => fde_encoding = Some(DwEhPe(cursor.read_u8()?)),
                    b'L' => lsda_encoding = Some(DwEhPe(cursor.read_u8()?)),
                    b'P' => {
                        let encoding = DwEhPe(cursor.read_u8()?);
                        personality =
                            Some(self.read_encoded_pointer(&mut cursor, encoding, address_size)?);
                    }
                    b'S' => {}
                    _ => break,
                }
            }

            // Skip whatever remains of the augmentation data.
            if cursor.position() > aug_end {
                return Err(DwarfErrorKind::Truncated.into());
            }
            cursor.skip(aug_end - cursor.position())?;
        }

        let instructions_start = cursor.position() as u64;
        if instructions_start > end {
            return Err(DwarfErrorKind::Truncated.into());
        }
        let initial_instructions =
            &self.data[instructions_start as usize..end as usize];

        Ok(Cie {
            offset,
            format,
            version,
            augmentation,
            address_size,
            segment_size,
            code_alignment_factor,
            data_alignment_factor,
            return_address_register,
            fde_encoding,
            lsda_encoding,
            personality,
            initial_instructions,
        })
    }

    fn is_cie_id(&self, id: u64, format: Format) -> bool {
        if self.is_eh {
            id == 0
        } else {
            match format {
                Format::Dwarf32 => id == 0xffff_ffff,
                Format::Dwarf64 => id == u64::MAX,
            }
        }
    }

    fn read_encoded_pointer(
        &self,
        cursor: &mut Cursor<'data>,
        encoding: DwEhPe,
        address_size: u8,
    ) -> Result<u64, DwarfError> {
        if encoding == DW_EH_PE_omit {
            return Ok(0);
        }

        let position = cursor.position() as u64;
        let value = match encoding.format() {
            DW_EH_PE_absptr => cursor.read_address(address_size)?,
            DW_EH_PE_uleb128 => cursor.read_uleb128()?,
            DW_EH_PE_udata2 => cursor.read_uint(2)?,
            DW_EH_PE_udata4 => cursor.read_uint(4)?,
            DW_EH_PE_udata8 => cursor.read_uint(8)?,
            DW_EH_PE_sleb128 => cursor.read_sleb128()? as u64,
            DW_EH_PE_sdata2 => cursor.read_uint(2)? as i16 as i64 as u64,
            DW_EH_PE_sdata4 => cursor.read_uint(4)? as i32 as i64 as u64,
            DW_EH_PE_sdata8 => cursor.read_uint(8)?,
            unknown => return Err(DwarfErrorKind::UnknownOpcode(unknown.0).into()),
        };

        Ok(match encoding.application() {
            DW_EH_PE_pcrel => self
                .section_address
                .wrapping_add(position)
                .wrapping_add(value),
            // Other applications need linker context the section does not
            // carry; surface the raw value.
            _ => value,
        })
    }

    fn parse_fde(&self, offset: u64) -> Result<FrameEntry<'data>, DwarfError> {
        let mut cursor = Cursor::at(self.data, offset as usize, self.endian);
        let (length, format) = cursor.read_initial_length()?;
        let end = (cursor.position() as u64)
            .checked_add(length)
            .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?;
        if end > self.data.len() as u64 {
            return Err(DwarfErrorKind::SectionSizeOrOffsetLarge.into());
        }

        let id_position = cursor.position() as u64;
        let id = cursor.read_offset(format)?;

        if self.is_cie_id(id, format) {
            return self.parse_cie(offset).map(FrameEntry::Cie);
        }

        // In `.eh_frame` the CIE pointer is relative to this field; in
        // `.debug_frame` it is a section offset.
        let cie_offset = if self.is_eh {
            id_position
                .checked_sub(id)
                .ok_or(DwarfErrorKind::SectionSizeOrOffsetLarge)?
        } else {
            id
        };
        let cie = self.parse_cie(cie_offset)?;

        if cie.segment_size > 0 {
            cursor.skip(cie.segment_size as usize)?;
        }

        let (initial_location, address_range) = if self.is_eh {
            let encoding = cie.fde_encoding.unwrap_or(DW_EH_PE_absptr);
            let initial = self.read_encoded_pointer(&mut cursor, encoding, cie.address_size)?;
            // The range is always an absolute count, encoded with the
            // format half of the encoding only.
            let range = self.read_encoded_pointer(
                &mut cursor,
                encoding.format(),
                cie.address_size,
            )?;
            (initial, range)
        } else {
            (
                cursor.read_address(cie.address_size)?,
                cursor.read_address(cie.address_size)?,
            )
        };

        let augmentation_data = if cie.augmentation.first() == Some(&b'z') {
            let aug_len = cursor.read_uleb128()? as usize;
            cursor.read_bytes(aug_len)?
        } else {
            &[][..]
        };

        if cursor.position() as u64 > end {
            return Err(DwarfErrorKind::Truncated.into());
        }
        let instructions = &self.data[cursor.position()..end as usize];

        Ok(FrameEntry::Fde(Fde {
            offset,
            cie,
            initial_location,
            address_range,
            augmentation_data,
            instructions,
        }))
    }
}

impl<'data> crate::session::DwarfSession<'data> {
    /// Returns a reader over this object's call frame information.
    ///
    /// `.debug_frame` is preferred; `.eh_frame` is used when it is the only
    /// frame section present.
    pub fn frame_section(&self) -> Option<FrameSection<'data>> {
        let address_size = self.default_address_size();
        if !self.sections.debug_frame.is_empty() {
            Some(FrameSection::debug_frame(
                self.sections.debug_frame,
                self.endian(),
                address_size,
            ))
        } else if !self.sections.eh_frame.is_empty() {
            Some(FrameSection::eh_frame(
                self.sections.eh_frame,
                self.endian(),
                address_size,
                0,
            ))
        } else {
            None
        }
    }
}

/// A fallible iterator over the entries of a frame section.
pub struct FrameEntryIter<'data> {
    section: FrameSection<'data>,
    offset: u64,
    done: bool,
}

impl<'data> FallibleIterator for FrameEntryIter<'data> {
    type Item = FrameEntry<'data>;
    type Error = DwarfError;

    fn next(&mut self) -> Result<Option<FrameEntry<'data>>, DwarfError> {
        if self.done || self.offset >= self.section.data.len() as u64 {
            return Ok(None);
        }

        let mut cursor =
            Cursor::at(self.section.data, self.offset as usize, self.section.endian);
        let (length, _) = match cursor.read_initial_length() {
            Ok(header) => header,
            Err(_) => {
                // Trailing padding shorter than a length field.
                self.done = true;
                return Ok(None);
            }
        };

        // An `.eh_frame` terminator: a zero initial length.
        if length == 0 {
            self.done = true;
            return Ok(None);
        }

        let next = cursor.position() as u64 + length;
        let entry = self.section.parse_fde(self.offset)?;
        self.offset = next;
        Ok(Some(entry))
    }
}

/// A fallible iterator decoding a call frame instruction stream.
pub struct CfiInstructionIter<'data> {
    cursor: Cursor<'data>,
    address_size: u8,
    fde_encoding: Option<DwEhPe>,
    section: FrameSection<'data>,
}

impl<'data> FallibleIterator for CfiInstructionIter<'data> {
    type Item = CallFrameInstruction<'data>;
    type Error = DwarfError;

    fn next(&mut self) -> Result<Option<CallFrameInstruction<'data>>, DwarfError> {
        if self.cursor.is_empty() {
            return Ok(None);
        }

        let opcode = self.cursor.read_u8()?;
        let primary = opcode & 0xc0;
        let operand = u64::from(opcode & 0x3f);

        let instruction = match primary {
            DW_CFA_advance_loc => CallFrameInstruction::AdvanceLoc { delta: operand },
            DW_CFA_offset => CallFrameInstruction::Offset {
                register: operand,
                factored_offset: i64::try_from(self.cursor.read_uleb128()?)
                    .map_err(|_| DwarfErrorKind::MalformedLeb)?,
            },
            DW_CFA_restore => CallFrameInstruction::Restore { register: operand },
            _ => match DwCfa(opcode) {
                DW_CFA_nop => CallFrameInstruction::Nop,
                DW_CFA_set_loc => {
                    let address = match self.fde_encoding {
                        Some(encoding) => self.section.read_encoded_pointer(
                            &mut self.cursor,
                            encoding,
                            self.address_size,
                        )?,
                        None => self.cursor.read_address(self.address_size)?,
                    };
                    CallFrameInstruction::SetLoc { address }
                }
                DW_CFA_advance_loc1 => CallFrameInstruction::AdvanceLoc {
                    delta: self.cursor.read_uint(1)?,
                },
                DW_CFA_advance_loc2 => CallFrameInstruction::AdvanceLoc {
                    delta: self.cursor.read_uint(2)?,
                },
                DW_CFA_advance_loc4 => CallFrameInstruction::AdvanceLoc {
                    delta: self.cursor.read_uint(4)?,
                },
                DW_CFA_offset_extended => CallFrameInstruction::Offset {
                    register: self.cursor.read_uleb128()?,
                    factored_offset: i64::try_from(self.cursor.read_uleb128()?)
                        .map_err(|_| DwarfErrorKind::MalformedLeb)?,
                },
                DW_CFA_offset_extended_sf => CallFrameInstruction::Offset {
                    register: self.cursor.read_uleb128()?,
                    factored_offset: self.cursor.read_sleb128()?,
                },
                DW_CFA_val_offset => CallFrameInstruction::ValOffset {
                    register: self.cursor.read_uleb128()?,
                    factored_offset: i64::try_from(self.cursor.read_uleb128()?)
                        .map_err(|_| DwarfErrorKind::MalformedLeb)?,
                },
                DW_CFA_val_offset_sf => CallFrameInstruction::ValOffset {
                    register: self.cursor.read_uleb128()?,
                    factored_offset: self.cursor.read_sleb128()?,
                },
                DW_CFA_restore_extended => CallFrameInstruction::Restore {
                    register: self.cursor.read_uleb128()?,
                },
                DW_CFA_undefined => CallFrameInstruction::Undefined {
                    register: self.cursor.read_uleb128()?,
                },
                DW_CFA_same_value => CallFrameInstruction::SameValue {
                    register: self.cursor.read_uleb128()?,
                },
                DW_CFA_register => CallFrameInstruction::Register {
                    register: self.cursor.read_uleb128()?,
                    source: self.cursor.read_uleb128()?,
                },
                DW_CFA_remember_state => CallFrameInstruction::RememberState,
                DW_CFA_restore_state => CallFrameInstruction::RestoreState,
                DW_CFA_def_cfa => CallFrameInstruction::DefCfa {
                    register: self.cursor.read_uleb128()?,
                    offset: i64::try_from(self.cursor.read_uleb128()?)
                        .map_err(|_| DwarfErrorKind::MalformedLeb)?,
                },
                DW_CFA_def_cfa_sf => CallFrameInstruction::DefCfaSf {
                    register: self.cursor.read_uleb128()?,
                    factored_offset: self.cursor.read_sleb128()?,
                },
                DW_CFA_def_cfa_register => CallFrameInstruction::DefCfaRegister {
                    register: self.cursor.read_uleb128()?,
                },
                DW_CFA_def_cfa_offset => CallFrameInstruction::DefCfaOffset {
                    offset: i64::try_from(self.cursor.read_uleb128()?)
                        .map_err(|_| DwarfErrorKind::MalformedLeb)?,
                },
                DW_CFA_def_cfa_offset_sf => CallFrameInstruction::DefCfaOffsetSf {
                    factored_offset: self.cursor.read_sleb128()?,
                },
                DW_CFA_def_cfa_expression => {
                    let length = self.cursor.read_uleb128()? as usize;
                    CallFrameInstruction::DefCfaExpression {
                        expression: self.cursor.read_bytes(length)?,
                    }
                }
                DW_CFA_expression => {
                    let register = self.cursor.read_uleb128()?;
                    let length = self.cursor.read_uleb128()? as usize;
                    CallFrameInstruction::Expression {
                        register,
                        expression: self.cursor.read_bytes(length)?,
                    }
                }
                DW_CFA_val_expression => {
                    let register = self.cursor.read_uleb128()?;
                    let length = self.cursor.read_uleb128()? as usize;
                    CallFrameInstruction::ValExpression {
                        register,
                        expression: self.cursor.read_bytes(length)?,
                    }
                }
                DW_CFA_GNU_args_size => CallFrameInstruction::ArgsSize {
                    size: self.cursor.read_uleb128()?,
                },
                unknown => return Err(DwarfErrorKind::UnknownOpcode(unknown.0).into()),
            },
        };

        Ok(Some(instruction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleb(out: &mut Vec<u8>, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            out.push(if done { byte } else { byte | 0x80 });
            if done {
                return;
            }
        }
    }

    /// Builds a `.debug_frame` with one CIE (code align 1, data align -8,
    /// return address register 16) and one FDE at 0x1000 with the given
    /// instructions.
    fn build_debug_frame(fde_instructions: &[u8]) -> Vec<u8> {
        let mut cie = Vec::new();
        cie.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // CIE id
        cie.push(4); // version
        cie.push(0); // empty augmentation
        cie.push(8); // address size
        cie.push(0); // segment size
        cie.push(1); // code alignment factor
        sleb(&mut cie, -8); // data alignment factor
        cie.push(16); // return address register (uleb)
        while (cie.len() + 4) % 8 != 0 {
            cie.push(DW_CFA_nop.0);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&(cie.len() as u32).to_le_bytes());
        out.extend_from_slice(&cie);

        let mut fde = Vec::new();
        fde.extend_from_slice(&0u32.to_le_bytes()); // CIE pointer (offset 0)
        fde.extend_from_slice(&0x1000u64.to_le_bytes()); // initial location
        fde.extend_from_slice(&0x100u64.to_le_bytes()); // address range
        fde.extend_from_slice(fde_instructions);
        while (fde.len() + 4) % 8 != 0 {
            fde.push(DW_CFA_nop.0);
        }

        out.extend_from_slice(&(fde.len() as u32).to_le_bytes());
        out.extend_from_slice(&fde);
        out
    }

    fn section(data: &[u8]) -> FrameSection<'_> {
        FrameSection::debug_frame(data, Endianness::Little, 8)
    }

    #[test]
    fn test_cie_fde_roundtrip() {
        let data = build_debug_frame(&[]);
        let frame = section(&data);

        let entries: Vec<_> = frame.entries().collect().unwrap();
        assert_eq!(entries.len(), 2);

        match &entries[0] {
            FrameEntry::Cie(cie) => {
                assert_eq!(cie.version, 4);
                assert_eq!(cie.code_alignment_factor, 1);
                assert_eq!(cie.data_alignment_factor, -8);
                assert_eq!(cie.return_address_register, 16);
            }
            other => panic!("expected CIE, got {:?}", other),
        }

        match &entries[1] {
            FrameEntry::Fde(fde) => {
                assert_eq!(fde.initial_location, 0x1000);
                assert_eq!(fde.address_range, 0x100);
                assert!(fde.contains(0x1000));
                assert!(fde.contains(0x10ff));
                assert!(!fde.contains(0x1100));
            }
            other => panic!("expected FDE, got {:?}", other),
        }
    }

    #[test]
    fn test_advance_and_offset_rule() {
        // DW_CFA_advance_loc(4); DW_CFA_offset(7, 2)
        let instructions = [DW_CFA_advance_loc | 4, DW_CFA_offset | 7, 2];
        let data = build_debug_frame(&instructions);
        let frame = section(&data);

        // Before the advance, register 7 has no rule.
        let row = frame.unwind_info_for_address(0x1000).unwrap().unwrap();
        assert_eq!(row.register(7), RegisterRule::Undefined);
        assert_eq!(row.start_address, 0x1000);

        // At initial + 4, the offset rule is in effect: 2 * -8 = -16.
        let row = frame.unwind_info_for_address(0x1004).unwrap().unwrap();
        assert_eq!(row.register(7), RegisterRule::Offset(-16));
        assert_eq!(row.start_address, 0x1004);

        // Outside the FDE there is no row.
        assert!(frame.unwind_info_for_address(0x2000).unwrap().is_none());
    }

    #[test]
    fn test_every_pc_in_fde_has_row() {
        let instructions = [DW_CFA_advance_loc | 4, DW_CFA_offset | 7, 2];
        let data = build_debug_frame(&instructions);
        let frame = section(&data);

        for pc in (0x1000..0x1100).step_by(16) {
            assert!(
                frame.unwind_info_for_address(pc).unwrap().is_some(),
                "no row for {:#x}",
                pc
            );
        }
    }

    #[test]
    fn test_remember_restore() {
        let mut instructions = vec![
            DW_CFA_def_cfa.0,
            7,
            8, // cfa = r7 + 8
            DW_CFA_remember_state.0,
            DW_CFA_def_cfa_offset.0,
            16,
            DW_CFA_restore_state.0,
        ];
        instructions.push(DW_CFA_nop.0);
        let data = build_debug_frame(&instructions);
        let frame = section(&data);

        let row = frame.unwind_info_for_address(0x1000).unwrap().unwrap();
        assert_eq!(
            row.cfa,
            CfaRule::RegisterAndOffset {
                register: 7,
                offset: 8
            }
        );
    }

    #[test]
    fn test_truncated_fde_instructions() {
        // DW_CFA_offset with its ULEB operand cut off by the entry end.
        let instructions = [DW_CFA_offset | 7];
        let data = build_debug_frame(&instructions);
        let frame = section(&data);

        // The operand is read from the padding NOPs, which parse as ULEB 0;
        // the stream then ends cleanly. Truncation of the section itself is
        // the error case.
        let mut truncated = data.clone();
        truncated.truncate(data.len() - 9);
        let frame_truncated = section(&truncated);
        assert!(frame_truncated.fde_for_address(0x1000).is_err());
        let _ = frame;
    }
}
