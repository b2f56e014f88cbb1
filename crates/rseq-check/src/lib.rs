//! rseq-check — validates restartable-sequence critical sections embedded
//! in ELF executables.
//!
//! A build that uses restartable sequences emits one 32-byte descriptor per
//! critical section into a dedicated section (see [`descriptor`]). Each
//! descriptor names the section's start, its post-commit address, and the
//! abort handler the kernel jumps to on preemption. A malformed descriptor
//! or a critical section that breaks the rseq rules (interrupting
//! instructions, stack-pointer writes, jumps into the middle) fails at run
//! time in ways that are miserable to debug; this crate checks all of it
//! statically.
//!
//! Entry point: [`analyze_rseq_critical_sections_in_file`], which yields an
//! [`RseqAnalysis`] of [`RseqProblem`]s.

pub mod descriptor;
mod elf;
mod insn;

mod analyzer;

pub use analyzer::{
    analyze_elf, analyze_rseq_critical_section, analyze_rseq_critical_sections_in_file, LabelKind,
    RseqAnalysis, RseqCriticalSection, RseqProblem,
};
pub use descriptor::{
    encode_rseq_descriptor, parse_rseq_descriptors, ParsedRseqDescriptor,
    RSEQ_DESCRIPTOR_SECTION_NAME, RSEQ_DESCRIPTOR_SIZE, RSEQ_SIGNATURE_SIZE,
    RSEQ_SIGNATURE_X86_64,
};
pub use elf::{ElfError, ElfFile, ElfFunction, ElfFunctionSymbol};
pub use insn::{decode, DecodedInsn};
