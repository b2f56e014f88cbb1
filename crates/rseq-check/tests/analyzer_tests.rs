//! Analyzer tests over hand-assembled functions and synthetic ELF images.

use rseq_check::{
    analyze_elf, analyze_rseq_critical_section, encode_rseq_descriptor, ElfFile, ElfFunction,
    LabelKind, RseqProblem, RSEQ_SIGNATURE_X86_64,
};

fn function_at(base_address: u64, instruction_bytes: Vec<u8>) -> ElfFunction {
    ElfFunction {
        name: "critical_fn".to_string(),
        base_address,
        instruction_bytes,
    }
}

/// A function shaped like a well-formed rseq user:
///
/// ```text
/// +0  nop                    ; prologue
/// +1  mov rax, [rbx+0x10]    ; critical section start
/// +5  mov rbx, rax
/// +8  nop                    ; post-commit
/// +9  <4-byte abort signature>
/// +13 nop                    ; abort handler
/// +14 ret
/// ```
fn well_formed_function(base: u64) -> (ElfFunction, u64, u64, u64) {
    let mut bytes = vec![0x90];
    bytes.extend_from_slice(&[0x48, 0x8b, 0x43, 0x10]); // mov rax, [rbx+0x10]
    bytes.extend_from_slice(&[0x48, 0x89, 0xc3]); // mov rbx, rax
    bytes.push(0x90); // post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort handler
    bytes.push(0xc3); // ret
    let start = base + 1;
    let post_commit = base + 8;
    let abort = base + 13;
    (function_at(base, bytes), start, post_commit, abort)
}

#[test]
fn well_formed_critical_section_has_no_problems() {
    let (function, start, post_commit, abort) = well_formed_function(0x1000);
    let analysis = analyze_rseq_critical_section(&function, start, post_commit, abort);
    assert!(analysis.is_ok(), "unexpected problems: {:?}", analysis.problems());
}

#[test]
fn empty_critical_section_is_flagged() {
    let (function, start, _post_commit, abort) = well_formed_function(0x1000);
    let analysis = analyze_rseq_critical_section(&function, start, start, abort);
    assert!(analysis
        .problems()
        .iter()
        .any(|problem| matches!(problem, RseqProblem::EmptyCriticalSection { .. })));
}

#[test]
fn inverted_critical_section_is_flagged() {
    let (function, start, _post_commit, abort) = well_formed_function(0x1000);
    let analysis = analyze_rseq_critical_section(&function, start + 4, start, abort);
    assert!(analysis
        .problems()
        .iter()
        .any(|problem| matches!(problem, RseqProblem::InvertedCriticalSection { .. })));
}

#[test]
fn empty_function_is_flagged() {
    let function = function_at(0x1000, Vec::new());
    let analysis = analyze_rseq_critical_section(&function, 0x1000, 0x1004, 0x1008);
    assert_eq!(analysis.problems().len(), 1);
    assert!(matches!(
        analysis.problems()[0],
        RseqProblem::EmptyFunction { .. }
    ));
}

#[test]
fn interrupt_inside_critical_section_is_flagged() {
    let base = 0x1000;
    let mut bytes = vec![0x90];
    bytes.push(0xcc); // int3 inside the critical section
    bytes.push(0x90); // post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 1, base + 2, base + 7);
    let interrupts: Vec<_> = analysis
        .problems()
        .iter()
        .filter_map(|problem| match problem {
            RseqProblem::InterruptInCriticalSection {
                interrupt_instruction_address,
                ..
            } => Some(*interrupt_instruction_address),
            _ => None,
        })
        .collect();
    assert_eq!(interrupts, vec![base + 1]);
}

#[test]
fn interrupt_outside_critical_section_is_not_flagged() {
    let base = 0x1000;
    let mut bytes = vec![0xcc]; // int3 before the critical section
    bytes.push(0x90); // critical section body
    bytes.push(0x90); // post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 1, base + 2, base + 7);
    assert!(!analysis
        .problems()
        .iter()
        .any(|problem| matches!(problem, RseqProblem::InterruptInCriticalSection { .. })));
}

#[test]
fn stack_pointer_write_inside_critical_section_is_flagged() {
    let base = 0x1000;
    let mut bytes = vec![0x90];
    bytes.extend_from_slice(&[0x48, 0x83, 0xec, 0x18]); // sub rsp, 0x18
    bytes.push(0x90); // post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 1, base + 5, base + 10);
    let writes: Vec<_> = analysis
        .problems()
        .iter()
        .filter_map(|problem| match problem {
            RseqProblem::StackPointerModifiedInCriticalSection {
                modifying_instruction_address,
                ..
            } => Some(*modifying_instruction_address),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec![base + 1]);
}

#[test]
fn push_inside_critical_section_is_flagged() {
    let base = 0x1000;
    let mut bytes = vec![0x90];
    bytes.push(0x55); // push rbp
    bytes.push(0x90); // post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 1, base + 2, base + 7);
    assert!(analysis.problems().iter().any(|problem| matches!(
        problem,
        RseqProblem::StackPointerModifiedInCriticalSection { .. }
    )));
}

#[test]
fn jump_into_critical_section_is_flagged() {
    let base = 0x1000;
    // jmp over the start label into the middle of the critical section
    let mut bytes = vec![0xeb, 0x03]; // jmp +3 -> base + 5
    bytes.push(0x90); // +2: critical section start
    bytes.extend_from_slice(&[0x90, 0x90, 0x90]); // +3..+6: body
    bytes.push(0x90); // +6: post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 2, base + 6, base + 11);
    let jumps: Vec<_> = analysis
        .problems()
        .iter()
        .filter_map(|problem| match problem {
            RseqProblem::JumpIntoCriticalSection {
                jump_instruction_address,
                target_instruction_address,
                ..
            } => Some((*jump_instruction_address, *target_instruction_address)),
            _ => None,
        })
        .collect();
    assert_eq!(jumps, vec![(base, base + 5)]);
}

#[test]
fn jump_to_critical_section_start_is_allowed() {
    let base = 0x1000;
    let mut bytes = vec![0xeb, 0x00]; // jmp +0 -> base + 2, the start label
    bytes.push(0x90); // +2: critical section start
    bytes.push(0x90); // +3: post-commit
    bytes.extend_from_slice(&RSEQ_SIGNATURE_X86_64);
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 2, base + 3, base + 8);
    assert!(!analysis
        .problems()
        .iter()
        .any(|problem| matches!(problem, RseqProblem::JumpIntoCriticalSection { .. })));
}

#[test]
fn labels_outside_the_function_are_flagged() {
    let (function, start, post_commit, _abort) = well_formed_function(0x1000);
    let analysis = analyze_rseq_critical_section(&function, start, post_commit, 0x9000);
    let outside: Vec<_> = analysis
        .problems()
        .iter()
        .filter_map(|problem| match problem {
            RseqProblem::LabelOutsideFunction { label_kind, .. } => Some(*label_kind),
            _ => None,
        })
        .collect();
    assert_eq!(outside, vec![LabelKind::Abort]);
}

#[test]
fn corrupt_abort_signature_is_flagged() {
    let base = 0x1000;
    let mut bytes = vec![0x90];
    bytes.push(0x90); // critical section
    bytes.push(0x90); // post-commit
    bytes.extend_from_slice(&[0x00, 0x11, 0x22, 0x33]); // wrong signature
    bytes.push(0x90); // abort
    let function = function_at(base, bytes);
    let analysis = analyze_rseq_critical_section(&function, base + 1, base + 2, base + 7);
    let signature_problems: Vec<_> = analysis
        .problems()
        .iter()
        .filter_map(|problem| match problem {
            RseqProblem::InvalidAbortSignature {
                expected_signature,
                actual_signature,
                ..
            } => Some((*expected_signature, *actual_signature)),
            _ => None,
        })
        .collect();
    assert_eq!(signature_problems.len(), 1);
    let (expected, actual) = signature_problems[0];
    assert_eq!(expected, RSEQ_SIGNATURE_X86_64);
    assert_eq!(actual, [Some(0x00), Some(0x11), Some(0x22), Some(0x33)]);
}

// =============================================================================
// End-to-end: synthetic ELF images
// =============================================================================

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;

struct SectionSpec {
    name: &'static str,
    sh_type: u32,
    address: u64,
    link: u32,
    bytes: Vec<u8>,
}

/// Builds a minimal ELF64 x86-64 image: null section, the given sections,
/// and .shstrtab.
fn build_elf(sections: Vec<SectionSpec>) -> Vec<u8> {
    const HEADER_SIZE: usize = 64;
    const SECTION_HEADER_SIZE: usize = 64;

    // Section name string table.
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for section in &sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(section.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    // Layout: header, section contents, section header table.
    let mut image = vec![0u8; HEADER_SIZE];
    let mut content_offsets = Vec::new();
    for section in &sections {
        content_offsets.push(image.len() as u64);
        image.extend_from_slice(&section.bytes);
    }
    let shstrtab_offset = image.len() as u64;
    image.extend_from_slice(&shstrtab);

    let section_count = sections.len() + 2; // + null + .shstrtab
    let section_header_offset = image.len() as u64;

    // Null section header.
    image.extend_from_slice(&[0u8; SECTION_HEADER_SIZE]);
    // Real sections.
    for (index, section) in sections.iter().enumerate() {
        image.extend_from_slice(&section_header(
            name_offsets[index],
            section.sh_type,
            section.address,
            content_offsets[index],
            section.bytes.len() as u64,
            section.link,
        ));
    }
    // .shstrtab.
    image.extend_from_slice(&section_header(
        shstrtab_name_offset,
        SHT_STRTAB,
        0,
        shstrtab_offset,
        shstrtab.len() as u64,
        0,
    ));

    // ELF header.
    image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    image[4] = 2; // ELFCLASS64
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1; // EV_CURRENT
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    image[0x28..0x30].copy_from_slice(&section_header_offset.to_le_bytes());
    image[0x3a..0x3c].copy_from_slice(&(SECTION_HEADER_SIZE as u16).to_le_bytes());
    image[0x3c..0x3e].copy_from_slice(&(section_count as u16).to_le_bytes());
    image[0x3e..0x40].copy_from_slice(&((section_count - 1) as u16).to_le_bytes());
    image
}

fn section_header(
    name_offset: u32,
    sh_type: u32,
    address: u64,
    file_offset: u64,
    size: u64,
    link: u32,
) -> [u8; 64] {
    let mut header = [0u8; 64];
    header[0..4].copy_from_slice(&name_offset.to_le_bytes());
    header[4..8].copy_from_slice(&sh_type.to_le_bytes());
    header[16..24].copy_from_slice(&address.to_le_bytes());
    header[24..32].copy_from_slice(&file_offset.to_le_bytes());
    header[32..40].copy_from_slice(&size.to_le_bytes());
    header[40..44].copy_from_slice(&link.to_le_bytes());
    header[58..60].copy_from_slice(&24u16.to_le_bytes()); // sh_entsize for symtab
    header
}

fn symbol_entry(name_offset: u32, address: u64, size: u64) -> [u8; 24] {
    let mut entry = [0u8; 24];
    entry[0..4].copy_from_slice(&name_offset.to_le_bytes());
    entry[4] = 0x12; // STB_GLOBAL | STT_FUNC
    entry[6..8].copy_from_slice(&1u16.to_le_bytes()); // defined in .text
    entry[8..16].copy_from_slice(&address.to_le_bytes());
    entry[16..24].copy_from_slice(&size.to_le_bytes());
    entry
}

/// ELF with one function containing a well-formed critical section, plus
/// the given descriptor bytes.
fn elf_with_descriptors(descriptor_bytes: Vec<u8>) -> Vec<u8> {
    const TEXT_ADDRESS: u64 = 0x401000;
    let (function, _start, _post_commit, _abort) = well_formed_function(TEXT_ADDRESS);

    let mut strtab = vec![0u8];
    let function_name_offset = strtab.len() as u32;
    strtab.extend_from_slice(b"critical_fn\0");

    let mut symtab = vec![0u8; 24]; // null symbol
    symtab.extend_from_slice(&symbol_entry(
        function_name_offset,
        TEXT_ADDRESS,
        function.instruction_bytes.len() as u64,
    ));

    build_elf(vec![
        SectionSpec {
            name: ".text",
            sh_type: SHT_PROGBITS,
            address: TEXT_ADDRESS,
            link: 0,
            bytes: function.instruction_bytes,
        },
        SectionSpec {
            name: ".data_ringtrace_rseq",
            sh_type: SHT_PROGBITS,
            address: 0x402000,
            link: 0,
            bytes: descriptor_bytes,
        },
        SectionSpec {
            name: ".symtab",
            sh_type: SHT_SYMTAB,
            address: 0,
            link: 4, // .strtab index: null, .text, rseq, .symtab, .strtab
            bytes: symtab,
        },
        SectionSpec {
            name: ".strtab",
            sh_type: SHT_STRTAB,
            address: 0,
            link: 0,
            bytes: strtab,
        },
    ])
}

#[test]
fn elf_with_well_formed_descriptor_passes() {
    let descriptor = encode_rseq_descriptor(0, 0, 0x401001, 7, 0x40100d).to_vec();
    let elf = ElfFile::parse(elf_with_descriptors(descriptor)).unwrap();
    let analysis = analyze_elf(&elf);
    assert!(analysis.is_ok(), "unexpected problems: {:?}", analysis.problems());
}

#[test]
fn elf_without_descriptors_is_flagged() {
    let elf = ElfFile::parse(elf_with_descriptors(Vec::new())).unwrap();
    let analysis = analyze_elf(&elf);
    assert_eq!(analysis.problems().len(), 1);
    assert!(matches!(
        analysis.problems()[0],
        RseqProblem::NoRseqDescriptors { .. }
    ));
}

#[test]
fn truncated_descriptor_is_flagged_as_incomplete() {
    let mut descriptor = encode_rseq_descriptor(0, 0, 0x401001, 7, 0x40100d).to_vec();
    descriptor.truncate(20);
    let elf = ElfFile::parse(elf_with_descriptors(descriptor)).unwrap();
    let analysis = analyze_elf(&elf);
    assert_eq!(analysis.problems().len(), 1);
    assert!(matches!(
        analysis.problems()[0],
        RseqProblem::IncompleteDescriptor {
            descriptor_address: 0x402000
        }
    ));
}

#[test]
fn descriptor_pointing_outside_any_function_is_flagged() {
    let descriptor = encode_rseq_descriptor(0, 0, 0x999000, 7, 0x99900d).to_vec();
    let elf = ElfFile::parse(elf_with_descriptors(descriptor)).unwrap();
    let analysis = analyze_elf(&elf);
    assert_eq!(analysis.problems().len(), 1);
    assert!(matches!(
        analysis.problems()[0],
        RseqProblem::LabelOutsideFunction {
            label_kind: LabelKind::Start,
            ..
        }
    ));
}
