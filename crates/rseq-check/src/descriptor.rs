//! On-disk rseq critical-section descriptors.
//!
//! The build embeds one descriptor per critical section into a dedicated
//! section of the executable. The layout is a packed little-endian record —
//! fixed for binary compatibility:
//!
//! ```text
//! u32 version
//! u32 flags
//! u64 start_ip
//! u64 post_commit_offset
//! u64 abort_ip
//! ```
//!
//! 32 bytes total. The instruction stream must carry a 4-byte
//! architecture-specific signature immediately before `abort_ip`, so a
//! corrupt descriptor cannot redirect the kernel to an arbitrary address.

/// Size of one packed descriptor record.
pub const RSEQ_DESCRIPTOR_SIZE: usize = 32;

/// Size of the signature preceding the abort handler.
pub const RSEQ_SIGNATURE_SIZE: usize = 4;

/// librseq's default x86-64 signature (RSEQ_SIG).
pub const RSEQ_SIGNATURE_X86_64: [u8; RSEQ_SIGNATURE_SIZE] = [0x53, 0x30, 0x05, 0x53];

/// Name of the section descriptors are collected into.
pub const RSEQ_DESCRIPTOR_SECTION_NAME: &str = ".data_ringtrace_rseq";

/// A descriptor as parsed from the section, field by field.
///
/// The trailing record of a truncated section yields `None` fields; such a
/// descriptor is incomplete and analyzed no further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRseqDescriptor {
    /// Address of the descriptor record itself.
    pub descriptor_address: u64,
    pub version: Option<u32>,
    pub flags: Option<u32>,
    pub start_ip: Option<u64>,
    pub post_commit_offset: Option<u64>,
    pub abort_ip: Option<u64>,
}

impl ParsedRseqDescriptor {
    pub fn is_complete(&self) -> bool {
        self.version.is_some()
            && self.flags.is_some()
            && self.start_ip.is_some()
            && self.post_commit_offset.is_some()
            && self.abort_ip.is_some()
    }
}

/// Parses every descriptor in a descriptor section's bytes.
///
/// `section_address` is the section's load address, used to report each
/// descriptor's own address.
pub fn parse_rseq_descriptors(bytes: &[u8], section_address: u64) -> Vec<ParsedRseqDescriptor> {
    let mut descriptors = Vec::new();
    let mut cursor = Cursor::new(bytes);
    while cursor.remaining() > 0 {
        let offset = cursor.position();
        descriptors.push(ParsedRseqDescriptor {
            descriptor_address: section_address + offset as u64,
            version: cursor.parse_u32_le(),
            flags: cursor.parse_u32_le(),
            start_ip: cursor.parse_u64_le(),
            post_commit_offset: cursor.parse_u64_le(),
            abort_ip: cursor.parse_u64_le(),
        });
    }
    descriptors
}

/// Encodes a descriptor record, for building test images.
pub fn encode_rseq_descriptor(
    version: u32,
    flags: u32,
    start_ip: u64,
    post_commit_offset: u64,
    abort_ip: u64,
) -> [u8; RSEQ_DESCRIPTOR_SIZE] {
    let mut bytes = [0u8; RSEQ_DESCRIPTOR_SIZE];
    bytes[0..4].copy_from_slice(&version.to_le_bytes());
    bytes[4..8].copy_from_slice(&flags.to_le_bytes());
    bytes[8..16].copy_from_slice(&start_ip.to_le_bytes());
    bytes[16..24].copy_from_slice(&post_commit_offset.to_le_bytes());
    bytes[24..32].copy_from_slice(&abort_ip.to_le_bytes());
    bytes
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn parse_u32_le(&mut self) -> Option<u32> {
        let slice = self.bytes.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_le_bytes(slice.try_into().ok()?))
    }

    fn parse_u64_le(&mut self) -> Option<u64> {
        let slice = self.bytes.get(self.position..self.position + 8)?;
        self.position += 8;
        Some(u64::from_le_bytes(slice.try_into().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_descriptor() {
        let bytes = encode_rseq_descriptor(0, 0, 0x1000, 0x20, 0x1100);
        let descriptors = parse_rseq_descriptors(&bytes, 0x2000);
        assert_eq!(descriptors.len(), 1);
        let descriptor = &descriptors[0];
        assert!(descriptor.is_complete());
        assert_eq!(descriptor.descriptor_address, 0x2000);
        assert_eq!(descriptor.start_ip, Some(0x1000));
        assert_eq!(descriptor.post_commit_offset, Some(0x20));
        assert_eq!(descriptor.abort_ip, Some(0x1100));
    }

    #[test]
    fn truncated_trailing_record_is_incomplete() {
        let full = encode_rseq_descriptor(0, 0, 0x1000, 0x20, 0x1100);
        let mut bytes = full.to_vec();
        bytes.extend_from_slice(&full[..16]); // second record cut short
        let descriptors = parse_rseq_descriptors(&bytes, 0);
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors[0].is_complete());
        assert!(!descriptors[1].is_complete());
        assert_eq!(descriptors[1].descriptor_address, 32);
        assert_eq!(descriptors[1].start_ip, Some(0x1000));
        assert_eq!(descriptors[1].post_commit_offset, None);
    }

    #[test]
    fn empty_section_has_no_descriptors() {
        assert!(parse_rseq_descriptors(&[], 0).is_empty());
    }
}
