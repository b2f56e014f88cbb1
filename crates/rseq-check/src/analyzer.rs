use crate::descriptor::{
    parse_rseq_descriptors, RSEQ_DESCRIPTOR_SECTION_NAME, RSEQ_SIGNATURE_SIZE,
    RSEQ_SIGNATURE_X86_64,
};
use crate::elf::{ElfError, ElfFile, ElfFunction};
use crate::insn::decode;
use std::fmt;
use std::path::Path;

/// One critical section as described by a descriptor, resolved against the
/// function containing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RseqCriticalSection {
    pub function_address: u64,
    pub function: String,
    pub start_address: u64,
    pub post_commit_address: u64,
    pub abort_address: u64,
}

impl RseqCriticalSection {
    pub fn size_in_bytes(&self) -> Option<u64> {
        self.post_commit_address.checked_sub(self.start_address)
    }
}

/// Which critical-section label a problem refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Start,
    PostCommit,
    Abort,
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelKind::Start => write!(f, "start"),
            LabelKind::PostCommit => write!(f, "post-commit"),
            LabelKind::Abort => write!(f, "abort"),
        }
    }
}

/// A defect found in an rseq descriptor or the code it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RseqProblem {
    EmptyCriticalSection {
        critical_section: RseqCriticalSection,
    },
    EmptyFunction {
        critical_section: RseqCriticalSection,
    },
    IncompleteDescriptor {
        descriptor_address: u64,
    },
    InterruptInCriticalSection {
        critical_section: RseqCriticalSection,
        interrupt_instruction_address: u64,
    },
    InvalidAbortSignature {
        critical_section: RseqCriticalSection,
        expected_signature: [u8; RSEQ_SIGNATURE_SIZE],
        actual_signature: [Option<u8>; RSEQ_SIGNATURE_SIZE],
    },
    InvertedCriticalSection {
        critical_section: RseqCriticalSection,
    },
    JumpIntoCriticalSection {
        critical_section: RseqCriticalSection,
        jump_instruction_address: u64,
        target_instruction_address: u64,
    },
    LabelOutsideFunction {
        critical_section: RseqCriticalSection,
        label_kind: LabelKind,
    },
    NoRseqDescriptors {
        section_name: String,
    },
    StackPointerModifiedInCriticalSection {
        critical_section: RseqCriticalSection,
        modifying_instruction_address: u64,
    },
}

impl fmt::Display for RseqProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RseqProblem::EmptyCriticalSection { critical_section } => write!(
                f,
                "critical section at {:#x} is empty",
                critical_section.start_address
            ),
            RseqProblem::EmptyFunction { critical_section } => write!(
                f,
                "function {} at {:#x} is empty",
                critical_section.function, critical_section.function_address
            ),
            RseqProblem::IncompleteDescriptor { descriptor_address } => write!(
                f,
                "incomplete rseq descriptor at {descriptor_address:#x}"
            ),
            RseqProblem::InterruptInCriticalSection {
                interrupt_instruction_address,
                ..
            } => write!(
                f,
                "interrupt instruction at {interrupt_instruction_address:#x} inside critical section"
            ),
            RseqProblem::InvalidAbortSignature {
                expected_signature,
                actual_signature,
                ..
            } => {
                write!(f, "invalid abort signature; expected [")?;
                for byte in expected_signature {
                    write!(f, " {byte:#04x}")?;
                }
                write!(f, " ], found [")?;
                for byte in actual_signature {
                    match byte {
                        Some(byte) => write!(f, " {byte:#04x}")?,
                        None => write!(f, " ??")?,
                    }
                }
                write!(f, " ]")
            }
            RseqProblem::InvertedCriticalSection { critical_section } => write!(
                f,
                "critical section bounds are inverted: start {:#x} is after post-commit {:#x}",
                critical_section.start_address, critical_section.post_commit_address
            ),
            RseqProblem::JumpIntoCriticalSection {
                jump_instruction_address,
                target_instruction_address,
                ..
            } => write!(
                f,
                "jump at {jump_instruction_address:#x} into middle of critical section ({target_instruction_address:#x})"
            ),
            RseqProblem::LabelOutsideFunction {
                critical_section,
                label_kind,
            } => write!(
                f,
                "{label_kind} label is outside function {}",
                critical_section.function
            ),
            RseqProblem::NoRseqDescriptors { section_name } => {
                write!(f, "no rseq descriptors found in section {section_name}")
            }
            RseqProblem::StackPointerModifiedInCriticalSection {
                modifying_instruction_address,
                ..
            } => write!(
                f,
                "stack pointer modified at {modifying_instruction_address:#x} inside critical section"
            ),
        }
    }
}

impl RseqProblem {
    /// The critical section this problem refers to, when it refers to one.
    pub fn critical_section(&self) -> Option<&RseqCriticalSection> {
        match self {
            RseqProblem::EmptyCriticalSection { critical_section }
            | RseqProblem::EmptyFunction { critical_section }
            | RseqProblem::InterruptInCriticalSection {
                critical_section, ..
            }
            | RseqProblem::InvalidAbortSignature {
                critical_section, ..
            }
            | RseqProblem::InvertedCriticalSection { critical_section }
            | RseqProblem::JumpIntoCriticalSection {
                critical_section, ..
            }
            | RseqProblem::LabelOutsideFunction {
                critical_section, ..
            }
            | RseqProblem::StackPointerModifiedInCriticalSection {
                critical_section, ..
            } => Some(critical_section),
            RseqProblem::IncompleteDescriptor { .. } | RseqProblem::NoRseqDescriptors { .. } => {
                None
            }
        }
    }
}

/// All problems found in one file.
#[derive(Debug, Default)]
pub struct RseqAnalysis {
    problems: Vec<RseqProblem>,
}

impl RseqAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_problem(&mut self, problem: RseqProblem) {
        self.problems.push(problem);
    }

    pub fn problems(&self) -> &[RseqProblem] {
        &self.problems
    }

    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Analyzes every rseq descriptor embedded in the ELF file at `path`.
pub fn analyze_rseq_critical_sections_in_file(path: &Path) -> Result<RseqAnalysis, ElfError> {
    let elf = ElfFile::open(path)?;
    Ok(analyze_elf(&elf))
}

/// Analyzes an already-parsed ELF image.
pub fn analyze_elf(elf: &ElfFile) -> RseqAnalysis {
    let mut analysis = RseqAnalysis::new();

    let mut descriptors = Vec::new();
    for (section_address, bytes) in elf.sections_with_name(RSEQ_DESCRIPTOR_SECTION_NAME) {
        descriptors.extend(parse_rseq_descriptors(bytes, section_address));
    }
    if descriptors.is_empty() {
        analysis.add_problem(RseqProblem::NoRseqDescriptors {
            section_name: RSEQ_DESCRIPTOR_SECTION_NAME.to_string(),
        });
        return analysis;
    }

    for descriptor in descriptors {
        if !descriptor.is_complete() {
            analysis.add_problem(RseqProblem::IncompleteDescriptor {
                descriptor_address: descriptor.descriptor_address,
            });
            continue;
        }
        let start_address = descriptor.start_ip.unwrap_or_default();
        let post_commit_offset = descriptor.post_commit_offset.unwrap_or_default();
        let abort_address = descriptor.abort_ip.unwrap_or_default();
        let mut critical_section = RseqCriticalSection {
            function_address: 0,
            function: String::new(),
            start_address,
            post_commit_address: start_address.wrapping_add(post_commit_offset),
            abort_address,
        };

        let Some(function) = elf.function_containing_address(start_address) else {
            analysis.add_problem(RseqProblem::LabelOutsideFunction {
                critical_section,
                label_kind: LabelKind::Start,
            });
            continue;
        };
        critical_section.function_address = function.base_address;
        critical_section.function.clone_from(&function.name);
        analyze_critical_section_impl(&function, &critical_section, &mut analysis);
    }
    analysis
}

/// Analyzes one critical section against the function containing it. The
/// file-level entry resolves descriptors and calls this per descriptor.
pub fn analyze_rseq_critical_section(
    function: &ElfFunction,
    start_address: u64,
    post_commit_address: u64,
    abort_address: u64,
) -> RseqAnalysis {
    let critical_section = RseqCriticalSection {
        function_address: function.base_address,
        function: function.name.clone(),
        start_address,
        post_commit_address,
        abort_address,
    };
    let mut analysis = RseqAnalysis::new();
    analyze_critical_section_impl(function, &critical_section, &mut analysis);
    analysis
}

fn analyze_critical_section_impl(
    function: &ElfFunction,
    critical_section: &RseqCriticalSection,
    analysis: &mut RseqAnalysis,
) {
    if function.instruction_bytes.is_empty() {
        analysis.add_problem(RseqProblem::EmptyFunction {
            critical_section: critical_section.clone(),
        });
        return;
    }
    analyze_function_instructions(function, critical_section, analysis);
    analyze_abort_signature(function, critical_section, analysis);
    analyze_address_bounds(function, critical_section, analysis);
}

fn address_within_critical_section(critical_section: &RseqCriticalSection, address: u64) -> bool {
    critical_section.start_address <= address && address < critical_section.post_commit_address
}

fn analyze_function_instructions(
    function: &ElfFunction,
    critical_section: &RseqCriticalSection,
    analysis: &mut RseqAnalysis,
) {
    let mut offset = 0usize;
    while offset < function.instruction_bytes.len() {
        let address = function.base_address + offset as u64;
        let insn = decode(&function.instruction_bytes[offset..], address);

        // An instruction partially inside the critical section counts as
        // inside.
        let within_critical_section = (0..insn.length as u64)
            .any(|byte| address_within_critical_section(critical_section, address + byte));

        if within_critical_section && !insn.opaque {
            if insn.writes_stack_pointer {
                analysis.add_problem(RseqProblem::StackPointerModifiedInCriticalSection {
                    critical_section: critical_section.clone(),
                    modifying_instruction_address: address,
                });
            }
            if insn.is_interrupt {
                analysis.add_problem(RseqProblem::InterruptInCriticalSection {
                    critical_section: critical_section.clone(),
                    interrupt_instruction_address: address,
                });
            }
        }

        if let Some(target) = insn.branch_target {
            if address_within_critical_section(critical_section, target)
                && target != critical_section.start_address
            {
                analysis.add_problem(RseqProblem::JumpIntoCriticalSection {
                    critical_section: critical_section.clone(),
                    jump_instruction_address: address,
                    target_instruction_address: target,
                });
            }
        }

        offset += insn.length.max(1);
    }
}

fn analyze_abort_signature(
    function: &ElfFunction,
    critical_section: &RseqCriticalSection,
    analysis: &mut RseqAnalysis,
) {
    let abort_address = critical_section.abort_address;
    let function_begin = function.base_address;
    let function_end = function.base_address + function.instruction_bytes.len() as u64;

    // Only check when the abort address or its signature overlaps the
    // function; a fully out-of-function abort is reported as a label
    // problem instead.
    let signature_address = abort_address.wrapping_sub(RSEQ_SIGNATURE_SIZE as u64);
    if !(abort_address >= function_begin && signature_address < function_end) {
        return;
    }

    let mut actual_signature = [None; RSEQ_SIGNATURE_SIZE];
    for (index, slot) in actual_signature.iter_mut().enumerate() {
        let address = signature_address + index as u64;
        if function.contains_address(address) {
            *slot = Some(function.instruction_bytes[(address - function_begin) as usize]);
        }
    }

    let matches = actual_signature
        .iter()
        .zip(RSEQ_SIGNATURE_X86_64.iter())
        .all(|(actual, expected)| *actual == Some(*expected));
    if !matches {
        analysis.add_problem(RseqProblem::InvalidAbortSignature {
            critical_section: critical_section.clone(),
            expected_signature: RSEQ_SIGNATURE_X86_64,
            actual_signature,
        });
    }
}

fn analyze_address_bounds(
    function: &ElfFunction,
    critical_section: &RseqCriticalSection,
    analysis: &mut RseqAnalysis,
) {
    if critical_section.start_address == critical_section.post_commit_address {
        analysis.add_problem(RseqProblem::EmptyCriticalSection {
            critical_section: critical_section.clone(),
        });
    }
    if critical_section.post_commit_address < critical_section.start_address {
        analysis.add_problem(RseqProblem::InvertedCriticalSection {
            critical_section: critical_section.clone(),
        });
    }
    for (label_kind, address) in [
        (LabelKind::Start, critical_section.start_address),
        (LabelKind::PostCommit, critical_section.post_commit_address),
        (LabelKind::Abort, critical_section.abort_address),
    ] {
        if !function.contains_address(address) {
            analysis.add_problem(RseqProblem::LabelOutsideFunction {
                critical_section: critical_section.clone(),
                label_kind,
            });
        }
    }
}
