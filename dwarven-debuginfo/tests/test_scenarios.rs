//! End-to-end scenarios over handcrafted object images.

use std::sync::Arc;

use similar_asserts::assert_eq;

use dwarven_common::Endianness;
use dwarven_debuginfo::constants::*;
use dwarven_debuginfo::error::DwarfErrorKind;
use dwarven_debuginfo::forms::AttributeValue;
use dwarven_debuginfo::frame::{FrameSection, RegisterRule};
use dwarven_debuginfo::line::{LineProgram, LineProgramContext, LineSections};
use dwarven_debuginfo::lists::CookedRange;
use dwarven_debuginfo::object::Object;
use dwarven_debuginfo::registry::{Section, SectionRegistry};
use dwarven_debuginfo::session::DwarfSession;
use fallible_iterator::FallibleIterator;

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

/// Serializes an abbreviation table from (code, tag, has_children, specs).
fn abbrev_table(declarations: &[(u64, u16, bool, &[(u16, u16)])]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(code, tag, has_children, specs) in declarations {
        uleb(&mut out, code);
        uleb(&mut out, u64::from(tag));
        out.push(has_children as u8);
        for &(attr, form) in specs {
            uleb(&mut out, u64::from(attr));
            uleb(&mut out, u64::from(form));
        }
        uleb(&mut out, 0);
        uleb(&mut out, 0);
    }
    uleb(&mut out, 0);
    out
}

/// Wraps DIE bytes into a DWARF 4 compilation unit (little-endian, 8-byte
/// addresses, 32-bit format).
fn unit_v4(dies: &[u8]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&4u16.to_le_bytes()); // version
    content.extend_from_slice(&0u32.to_le_bytes()); // abbrev offset
    content.push(8); // address size
    content.extend_from_slice(dies);

    let mut out = Vec::new();
    out.extend_from_slice(&(content.len() as u32).to_le_bytes());
    out.extend_from_slice(&content);
    out
}

/// Wraps DIE bytes into a DWARF 5 unit of the given type.
fn unit_v5(unit_type: u8, dwo_id: Option<u64>, dies: &[u8]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&5u16.to_le_bytes()); // version
    content.push(unit_type);
    content.push(8); // address size
    content.extend_from_slice(&0u32.to_le_bytes()); // abbrev offset
    if let Some(id) = dwo_id {
        content.extend_from_slice(&id.to_le_bytes());
    }
    content.extend_from_slice(dies);

    let mut out = Vec::new();
    out.extend_from_slice(&(content.len() as u32).to_le_bytes());
    out.extend_from_slice(&content);
    out
}

/// Builds a minimal 64-bit little-endian ELF executable holding the given
/// sections.
fn build_elf(sections: &[(&str, &[u8])]) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    let section_count = sections.len() + 2; // null + sections + shstrtab
    let shoff = 64u64;
    let mut data_offset = shoff + (section_count as u64) * 64;

    let mut header = Vec::new();
    header.extend_from_slice(b"\x7fELF\x02\x01\x01\x00");
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    header.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    header.extend_from_slice(&1u32.to_le_bytes()); // version
    header.extend_from_slice(&0u64.to_le_bytes()); // entry
    header.extend_from_slice(&0u64.to_le_bytes()); // phoff
    header.extend_from_slice(&shoff.to_le_bytes()); // shoff
    header.extend_from_slice(&0u32.to_le_bytes()); // flags
    header.extend_from_slice(&64u16.to_le_bytes()); // ehsize
    header.extend_from_slice(&0u16.to_le_bytes()); // phentsize
    header.extend_from_slice(&0u16.to_le_bytes()); // phnum
    header.extend_from_slice(&64u16.to_le_bytes()); // shentsize
    header.extend_from_slice(&(section_count as u16).to_le_bytes()); // shnum
    header.extend_from_slice(&((section_count - 1) as u16).to_le_bytes()); // shstrndx

    let shdr = |name: u32, sh_type: u32, offset: u64, size: u64| -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&name.to_le_bytes());
        out.extend_from_slice(&sh_type.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // flags
        out.extend_from_slice(&0u64.to_le_bytes()); // addr
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // link
        out.extend_from_slice(&0u32.to_le_bytes()); // info
        out.extend_from_slice(&1u64.to_le_bytes()); // addralign
        out.extend_from_slice(&0u64.to_le_bytes()); // entsize
        out
    };

    let mut shdrs = vec![0u8; 64]; // the null section header
    let mut payload = Vec::new();
    for ((_, data), &name_offset) in sections.iter().zip(&name_offsets) {
        shdrs.extend_from_slice(&shdr(name_offset, 1, data_offset, data.len() as u64));
        payload.extend_from_slice(data);
        data_offset += data.len() as u64;
    }
    shdrs.extend_from_slice(&shdr(
        shstrtab_name_offset,
        3,
        data_offset,
        shstrtab.len() as u64,
    ));
    payload.extend_from_slice(&shstrtab);

    let mut out = header;
    out.extend_from_slice(&shdrs);
    out.extend_from_slice(&payload);
    out
}

/// The abbreviations and sections of the S1 image: one CU with a
/// `DW_TAG_compile_unit` root and a `DW_TAG_subprogram` child named "main".
fn s1_sections() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let abbrev = abbrev_table(&[
        (
            1,
            DW_TAG_compile_unit.0,
            true,
            &[
                (DW_AT_name.0, DW_FORM_strp.0),
                (DW_AT_comp_dir.0, DW_FORM_strp.0),
            ],
        ),
        (
            2,
            DW_TAG_subprogram.0,
            false,
            &[
                (DW_AT_name.0, DW_FORM_strp.0),
                (DW_AT_low_pc.0, DW_FORM_addr.0),
            ],
        ),
    ]);

    let mut debug_str = Vec::new();
    let str_test_c = debug_str.len() as u32;
    debug_str.extend_from_slice(b"test.c\0");
    let str_src = debug_str.len() as u32;
    debug_str.extend_from_slice(b"/src\0");
    let str_main = debug_str.len() as u32;
    debug_str.extend_from_slice(b"main\0");

    let mut dies = Vec::new();
    uleb(&mut dies, 1); // compile unit
    dies.extend_from_slice(&str_test_c.to_le_bytes());
    dies.extend_from_slice(&str_src.to_le_bytes());
    uleb(&mut dies, 2); // subprogram
    dies.extend_from_slice(&str_main.to_le_bytes());
    dies.extend_from_slice(&0x1000u64.to_le_bytes());
    uleb(&mut dies, 0); // end of children

    (unit_v4(&dies), abbrev, debug_str)
}

#[test]
fn s1_elf_compile_unit_and_subprogram() {
    let (debug_info, debug_abbrev, debug_str) = s1_sections();
    let elf = build_elf(&[
        (".debug_info", &debug_info),
        (".debug_abbrev", &debug_abbrev),
        (".debug_str", &debug_str),
    ]);

    let object = Object::parse(&elf).unwrap();
    let registry = SectionRegistry::from_object(&object, 0).unwrap();
    let session = DwarfSession::parse(&registry).unwrap();

    assert_eq!(session.unit_count(), 1);

    let unit = session.unit(0).unwrap();
    assert_eq!(unit.header().version(), 4);
    assert_eq!(unit.name().unwrap().unwrap(), b"test.c");
    assert_eq!(unit.comp_dir().unwrap().unwrap(), b"/src");

    let root = unit.root().unwrap().unwrap();
    assert_eq!(root.tag().0, 17);

    let child = root.first_child().unwrap().unwrap();
    assert_eq!(child.tag().0, 46);

    let name = child.attr_value(DW_AT_name).unwrap().unwrap();
    assert_eq!(unit.string_value(name).unwrap().unwrap(), b"main");

    let low_pc = child.attr_value(DW_AT_low_pc).unwrap().unwrap();
    assert_eq!(unit.address_value(low_pc).unwrap(), Some(0x1000));

    // The subprogram is the last sibling.
    assert!(child.sibling().unwrap().is_none());
}

#[test]
fn s2_split_dwarf_addrx_through_tied_session() {
    // The skeleton in the executable carries the addr base and the DWO id.
    let skeleton_abbrev = abbrev_table(&[(
        1,
        DW_TAG_skeleton_unit.0,
        false,
        &[(DW_AT_addr_base.0, DW_FORM_sec_offset.0)],
    )]);

    let mut skeleton_dies = Vec::new();
    uleb(&mut skeleton_dies, 1);
    skeleton_dies.extend_from_slice(&8u32.to_le_bytes()); // addr base

    let mut debug_addr = Vec::new();
    debug_addr.extend_from_slice(&12u32.to_le_bytes()); // unit length
    debug_addr.extend_from_slice(&5u16.to_le_bytes()); // version
    debug_addr.push(8); // address size
    debug_addr.push(0); // segment selector size
    debug_addr.extend_from_slice(&0x0040_0400u64.to_le_bytes());

    let tied_registry = SectionRegistry::from_sections(
        Endianness::Little,
        vec![
            Section::named(
                ".debug_info",
                unit_v5(DW_UT_skeleton.0, Some(0xabcd), &skeleton_dies),
            ),
            Section::named(".debug_abbrev", skeleton_abbrev),
            Section::named(".debug_addr", debug_addr),
        ],
    );

    // The split unit in the .dwo uses addrx against the tied object.
    let split_abbrev = abbrev_table(&[(
        1,
        DW_TAG_compile_unit.0,
        false,
        &[(DW_AT_low_pc.0, DW_FORM_addrx.0)],
    )]);

    let mut split_dies = Vec::new();
    uleb(&mut split_dies, 1);
    uleb(&mut split_dies, 0); // addrx index 0

    let base_registry = SectionRegistry::from_sections(
        Endianness::Little,
        vec![
            Section::named(
                ".debug_info.dwo",
                unit_v5(DW_UT_split_compile.0, Some(0xabcd), &split_dies),
            ),
            Section::named(".debug_abbrev.dwo", split_abbrev),
        ],
    );

    let tied = Arc::new(DwarfSession::parse(&tied_registry).unwrap());
    let base = DwarfSession::parse(&base_registry).unwrap();
    base.attach_tied(tied);

    let unit = base.unit(0).unwrap();
    assert_eq!(unit.dwo_id(), Some(0xabcd));

    let root = unit.root().unwrap().unwrap();
    let low_pc = root.attr_value(DW_AT_low_pc).unwrap().unwrap();
    assert_eq!(low_pc, AttributeValue::AddressIndex(0));
    assert_eq!(unit.address_value(low_pc).unwrap(), Some(0x0040_0400));
}

#[test]
fn s3_line_program_row() {
    // Header declaring files "a.c" and "b.c", then:
    // set_file 2; advance_pc 0x10; copy.
    let mut header = Vec::new();
    header.extend_from_slice(&4u16.to_le_bytes());
    let mut rest = Vec::new();
    rest.push(1); // minimum instruction length
    rest.push(1); // maximum operations per instruction
    rest.push(1); // default is_stmt
    rest.push(251); // line base (-5)
    rest.push(14); // line range
    rest.push(13); // opcode base
    rest.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    rest.push(0); // no include directories
    for name in [&b"a.c"[..], &b"b.c"[..]] {
        rest.extend_from_slice(name);
        rest.push(0);
        rest.extend_from_slice(&[0, 0, 0]); // dir, mtime, size
    }
    rest.push(0);
    header.extend_from_slice(&(rest.len() as u32).to_le_bytes());
    header.extend_from_slice(&rest);

    let mut program = Vec::new();
    program.push(DW_LNS_set_file.0);
    uleb(&mut program, 2);
    program.push(DW_LNS_advance_pc.0);
    uleb(&mut program, 0x10);
    program.push(DW_LNS_copy.0);
    program.extend_from_slice(&[0x00, 0x01, DW_LNE_end_sequence.0]);
    header.extend_from_slice(&program);

    let mut debug_line = Vec::new();
    debug_line.extend_from_slice(&(header.len() as u32).to_le_bytes());
    debug_line.extend_from_slice(&header);

    let parsed = LineProgram::parse(
        &debug_line,
        0,
        LineProgramContext {
            endian: Endianness::Little,
            address_size: 8,
            sections: LineSections::default(),
        },
    )
    .unwrap();

    let rows = &parsed.sequences()[0].rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].address, 0x10);
    assert_eq!(rows[0].file, 2);
    assert_eq!(rows[0].line, 1);
    assert!(rows[0].is_stmt);
    assert!(rows[1].end_sequence);
}

#[test]
fn s4_frame_offset_rule() {
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

    let mut cie = Vec::new();
    cie.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    cie.push(4); // version
    cie.push(0); // augmentation
    cie.push(8); // address size
    cie.push(0); // segment size
    cie.push(1); // code alignment factor
    sleb(&mut cie, -8); // data alignment factor
    cie.push(16); // return address register

    let mut fde = Vec::new();
    fde.extend_from_slice(&0u32.to_le_bytes()); // CIE pointer
    fde.extend_from_slice(&0x1000u64.to_le_bytes()); // initial location
    fde.extend_from_slice(&0x40u64.to_le_bytes()); // address range
    fde.push(DW_CFA_advance_loc | 4);
    fde.push(DW_CFA_offset | 7);
    uleb(&mut fde, 2);

    let mut debug_frame = Vec::new();
    debug_frame.extend_from_slice(&(cie.len() as u32).to_le_bytes());
    debug_frame.extend_from_slice(&cie);
    debug_frame.extend_from_slice(&(fde.len() as u32).to_le_bytes());
    debug_frame.extend_from_slice(&fde);

    let frame = FrameSection::debug_frame(&debug_frame, Endianness::Little, 8);
    let row = frame.unwind_info_for_address(0x1004).unwrap().unwrap();
    assert_eq!(row.register(7), RegisterRule::Offset(-16));

    assert!(frame.unwind_info_for_address(0x1040).unwrap().is_none());
}

#[test]
fn s5_truncated_debug_info() {
    let (mut debug_info, debug_abbrev, debug_str) = s1_sections();
    debug_info.truncate(debug_info.len() - 3);

    let registry = SectionRegistry::from_sections(
        Endianness::Little,
        vec![
            Section::named(".debug_info", debug_info),
            Section::named(".debug_abbrev", debug_abbrev),
            Section::named(".debug_str", debug_str),
        ],
    );

    // The unit header is intact, so the session opens.
    let session = DwarfSession::parse(&registry).unwrap();
    assert_eq!(session.unit_count(), 1);
    assert!(!session.harmless_errors().is_empty());

    // Walking reaches the cut attribute and reports truncation.
    let unit = session.unit(0).unwrap();
    let root = unit.root().unwrap().unwrap();
    let error = root
        .first_child()
        .unwrap()
        .unwrap()
        .attr(DW_AT_low_pc)
        .unwrap_err();
    assert_eq!(error.kind(), DwarfErrorKind::Truncated);
}

#[test]
fn s6_rnglist_base_addressx() {
    let abbrev = abbrev_table(&[(
        1,
        DW_TAG_compile_unit.0,
        false,
        &[
            (DW_AT_addr_base.0, DW_FORM_sec_offset.0),
            (DW_AT_ranges.0, DW_FORM_sec_offset.0),
        ],
    )]);

    let mut debug_addr = Vec::new();
    debug_addr.extend_from_slice(&20u32.to_le_bytes()); // unit length
    debug_addr.extend_from_slice(&5u16.to_le_bytes());
    debug_addr.push(8);
    debug_addr.push(0);
    debug_addr.extend_from_slice(&0x1111u64.to_le_bytes()); // index 0
    debug_addr.extend_from_slice(&0x8000u64.to_le_bytes()); // index 1

    let mut debug_rnglists = Vec::new();
    debug_rnglists.push(DW_RLE_base_addressx.0);
    uleb(&mut debug_rnglists, 1);
    debug_rnglists.push(DW_RLE_offset_pair.0);
    uleb(&mut debug_rnglists, 0x10);
    uleb(&mut debug_rnglists, 0x20);
    debug_rnglists.push(DW_RLE_end_of_list.0);

    let mut dies = Vec::new();
    uleb(&mut dies, 1);
    dies.extend_from_slice(&8u32.to_le_bytes()); // addr base
    dies.extend_from_slice(&0u32.to_le_bytes()); // ranges offset

    let registry = SectionRegistry::from_sections(
        Endianness::Little,
        vec![
            Section::named(".debug_info", unit_v5(DW_UT_compile.0, None, &dies)),
            Section::named(".debug_abbrev", abbrev),
            Section::named(".debug_addr", debug_addr),
            Section::named(".debug_rnglists", debug_rnglists),
        ],
    );

    let session = DwarfSession::parse(&registry).unwrap();
    let unit = session.unit(0).unwrap();
    let root = unit.root().unwrap().unwrap();

    let ranges_value = root.attr_value(DW_AT_ranges).unwrap().unwrap();
    let mut ranges = unit.attr_ranges(ranges_value).unwrap().unwrap();

    let range = ranges.next().unwrap().unwrap();
    assert_eq!(
        range,
        CookedRange {
            low: 0x8010,
            high: 0x8020,
            debug_addr_unavailable: false,
        }
    );
    assert!(ranges.next().unwrap().is_none());
}

#[test]
fn custom_object_reader() {
    use std::borrow::Cow;

    use dwarven_debuginfo::object::{ObjectReader, SectionInfo};
    use dwarven_debuginfo::DwarfError;

    struct InMemoryObject {
        sections: Vec<(String, Vec<u8>)>,
    }

    impl<'data> ObjectReader<'data> for InMemoryObject {
        fn object_size(&self) -> u64 {
            self.sections.iter().map(|(_, data)| data.len() as u64).sum()
        }

        fn endianness(&self) -> Endianness {
            Endianness::Little
        }

        fn pointer_size(&self) -> u8 {
            8
        }

        fn section_count(&self) -> usize {
            self.sections.len()
        }

        fn section_info(&self, index: usize) -> Result<SectionInfo, DwarfError> {
            let (name, data) = &self.sections[index];
            Ok(SectionInfo {
                name: name.clone(),
                size: data.len() as u64,
                ..Default::default()
            })
        }

        fn load_section(&self, index: usize) -> Result<Cow<'data, [u8]>, DwarfError> {
            Ok(Cow::Owned(self.sections[index].1.clone()))
        }
    }

    let (debug_info, debug_abbrev, debug_str) = s1_sections();
    let object = InMemoryObject {
        sections: vec![
            (".text".into(), vec![0x90; 16]),
            (".debug_info".into(), debug_info),
            (".debug_abbrev".into(), debug_abbrev),
            (".debug_str".into(), debug_str),
        ],
    };

    let registry = SectionRegistry::from_reader(&object, 0).unwrap();
    let session = DwarfSession::parse(&registry).unwrap();

    assert_eq!(session.unit_count(), 1);
    let unit = session.unit(0).unwrap();
    let root = unit.root().unwrap().unwrap();
    assert_eq!(root.tag(), DW_TAG_compile_unit);
    assert_eq!(unit.name().unwrap().unwrap(), b"test.c");
}

/// Builds a unit with nested children and an explicit sibling attribute,
/// for the traversal properties.
fn traversal_unit() -> (Vec<u8>, Vec<u8>) {
    let abbrev = abbrev_table(&[
        (1, DW_TAG_compile_unit.0, true, &[]),
        (
            2,
            DW_TAG_subprogram.0,
            true,
            &[(DW_AT_sibling.0, DW_FORM_ref4.0)],
        ),
        (3, DW_TAG_lexical_block.0, false, &[(DW_AT_low_pc.0, DW_FORM_addr.0)]),
        (4, DW_TAG_subprogram.0, false, &[]),
    ]);

    // Header size for a DWARF 4 CU: 4 + 2 + 4 + 1 = 11 bytes.
    let header_size = 11u32;
    let mut dies = Vec::new();
    uleb(&mut dies, 1); // [0] compile unit

    uleb(&mut dies, 2); // [1] subprogram A with sibling
    let sibling_patch = dies.len();
    dies.extend_from_slice(&0u32.to_le_bytes()); // patched below

    uleb(&mut dies, 3); // [2] lexical block inside A
    dies.extend_from_slice(&0x2000u64.to_le_bytes());
    uleb(&mut dies, 0); // end of A's children

    let sub_b_offset = dies.len();
    uleb(&mut dies, 4); // [3] subprogram B
    uleb(&mut dies, 0); // end of root's children

    let sibling_target = header_size + sub_b_offset as u32;
    dies[sibling_patch..sibling_patch + 4].copy_from_slice(&sibling_target.to_le_bytes());

    (unit_v4(&dies), abbrev)
}

#[test]
fn traversal_visits_every_die_once() {
    let (debug_info, debug_abbrev) = traversal_unit();
    let registry = SectionRegistry::from_sections(
        Endianness::Little,
        vec![
            Section::named(".debug_info", debug_info),
            Section::named(".debug_abbrev", debug_abbrev),
        ],
    );

    let session = DwarfSession::parse(&registry).unwrap();
    let unit = session.unit(0).unwrap();

    let entries: Vec<_> = unit
        .entries()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    // Four DIEs with non-zero codes, each visited exactly once.
    assert_eq!(entries.len(), 4);
    let depths: Vec<isize> = entries.iter().map(|(depth, _)| *depth).collect();
    assert_eq!(depths, vec![0, 1, 2, 1]);

    let mut offsets: Vec<u64> = entries.iter().map(|(_, die)| die.offset()).collect();
    let unique = offsets.clone();
    offsets.dedup();
    assert_eq!(offsets, unique);
}

#[test]
fn sibling_jump_matches_manual_walk() {
    let (debug_info, debug_abbrev) = traversal_unit();
    let registry = SectionRegistry::from_sections(
        Endianness::Little,
        vec![
            Section::named(".debug_info", debug_info),
            Section::named(".debug_abbrev", debug_abbrev),
        ],
    );

    let session = DwarfSession::parse(&registry).unwrap();
    let unit = session.unit(0).unwrap();

    let root = unit.root().unwrap().unwrap();
    let sub_a = root.first_child().unwrap().unwrap();
    assert!(sub_a.attr_value(DW_AT_sibling).unwrap().is_some());

    // Following the sibling attribute and walking children to termination
    // must land on the same DIE.
    let via_jump = sub_a.sibling().unwrap().unwrap();
    assert_eq!(via_jump.tag(), DW_TAG_subprogram);

    let child = sub_a.first_child().unwrap().unwrap();
    assert_eq!(child.tag(), DW_TAG_lexical_block);
    let manual = child.sibling().unwrap();
    assert!(manual.is_none());

    // The block is the last child; B follows the end-of-children marker.
    assert_eq!(via_jump.offset(), child.offset() + 1 + 8 + 1);
}
