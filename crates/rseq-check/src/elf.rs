//! Minimal ELF64 little-endian reader.
//!
//! Just enough of the format for descriptor validation: section headers,
//! section names, section contents, and function symbols. Only 64-bit
//! little-endian x86-64 objects are accepted — the descriptor layout and
//! abort signature are architecture-specific.

use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("not an ELF file")]
    NotElf,
    #[error("unsupported ELF: expected 64-bit little-endian x86-64")]
    Unsupported,
    #[error("ELF file is truncated or malformed")]
    Malformed,
}

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EM_X86_64: u16 = 62;

const SHT_SYMTAB: u32 = 2;

const STT_FUNC: u8 = 2;
const SYMBOL_ENTRY_SIZE: usize = 24;
const SECTION_HEADER_SIZE: usize = 64;

/// A parsed ELF image, held in memory.
pub struct ElfFile {
    bytes: Vec<u8>,
    sections: Vec<Section>,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    sh_type: u32,
    address: u64,
    file_offset: u64,
    size: u64,
    link: u32,
}

/// A function's bytes, extracted from its defining section.
#[derive(Debug, Clone)]
pub struct ElfFunction {
    pub name: String,
    pub base_address: u64,
    pub instruction_bytes: Vec<u8>,
}

impl ElfFunction {
    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.base_address
            && address < self.base_address + self.instruction_bytes.len() as u64
    }
}

impl ElfFile {
    pub fn open(path: &Path) -> Result<Self, ElfError> {
        let bytes = fs::read(path).map_err(|source| ElfError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(bytes)
    }

    pub fn parse(bytes: Vec<u8>) -> Result<Self, ElfError> {
        if bytes.len() < 64 {
            return Err(ElfError::NotElf);
        }
        if bytes[0..4] != ELF_MAGIC {
            return Err(ElfError::NotElf);
        }
        if bytes[4] != ELFCLASS64 || bytes[5] != ELFDATA2LSB {
            return Err(ElfError::Unsupported);
        }
        let machine = read_u16(&bytes, 18).ok_or(ElfError::Malformed)?;
        if machine != EM_X86_64 {
            return Err(ElfError::Unsupported);
        }

        let section_header_offset = read_u64(&bytes, 0x28).ok_or(ElfError::Malformed)?;
        let section_header_entry_size = read_u16(&bytes, 0x3a).ok_or(ElfError::Malformed)? as usize;
        let section_count = read_u16(&bytes, 0x3c).ok_or(ElfError::Malformed)? as usize;
        let name_table_index = read_u16(&bytes, 0x3e).ok_or(ElfError::Malformed)? as usize;
        if section_header_entry_size < SECTION_HEADER_SIZE {
            return Err(ElfError::Malformed);
        }

        struct RawSection {
            name_offset: u32,
            sh_type: u32,
            address: u64,
            file_offset: u64,
            size: u64,
            link: u32,
        }
        let mut raw_sections = Vec::with_capacity(section_count);
        for index in 0..section_count {
            let base = section_header_offset as usize + index * section_header_entry_size;
            raw_sections.push(RawSection {
                name_offset: read_u32(&bytes, base).ok_or(ElfError::Malformed)?,
                sh_type: read_u32(&bytes, base + 4).ok_or(ElfError::Malformed)?,
                address: read_u64(&bytes, base + 16).ok_or(ElfError::Malformed)?,
                file_offset: read_u64(&bytes, base + 24).ok_or(ElfError::Malformed)?,
                size: read_u64(&bytes, base + 32).ok_or(ElfError::Malformed)?,
                link: read_u32(&bytes, base + 40).ok_or(ElfError::Malformed)?,
            });
        }

        let name_table = raw_sections.get(name_table_index).ok_or(ElfError::Malformed)?;
        let name_table_bytes = bytes
            .get(name_table.file_offset as usize..(name_table.file_offset + name_table.size) as usize)
            .ok_or(ElfError::Malformed)?
            .to_vec();

        let sections = raw_sections
            .iter()
            .map(|raw| Section {
                name: string_at(&name_table_bytes, raw.name_offset as usize),
                sh_type: raw.sh_type,
                address: raw.address,
                file_offset: raw.file_offset,
                size: raw.size,
                link: raw.link,
            })
            .collect();

        Ok(Self { bytes, sections })
    }

    /// Contents of every section named `name` (linkers may emit several).
    pub fn sections_with_name(&self, name: &str) -> Vec<(u64, &[u8])> {
        self.sections
            .iter()
            .filter(|section| section.name == name)
            .filter_map(|section| {
                let bytes = self.section_bytes(section)?;
                Some((section.address, bytes))
            })
            .collect()
    }

    fn section_bytes(&self, section: &Section) -> Option<&[u8]> {
        self.bytes
            .get(section.file_offset as usize..(section.file_offset + section.size) as usize)
    }

    /// All function symbols with a non-empty body.
    pub fn functions(&self) -> Vec<ElfFunctionSymbol> {
        let mut functions = Vec::new();
        for section in &self.sections {
            if section.sh_type != SHT_SYMTAB {
                continue;
            }
            let Some(symbol_bytes) = self.section_bytes(section) else {
                continue;
            };
            let Some(string_table) = self
                .sections
                .get(section.link as usize)
                .and_then(|strtab| self.section_bytes(strtab))
            else {
                continue;
            };
            for entry in symbol_bytes.chunks_exact(SYMBOL_ENTRY_SIZE) {
                let name_offset = u32::from_le_bytes(entry[0..4].try_into().unwrap_or_default());
                let info = entry[4];
                let value = u64::from_le_bytes(entry[8..16].try_into().unwrap_or_default());
                let size = u64::from_le_bytes(entry[16..24].try_into().unwrap_or_default());
                if info & 0x0f != STT_FUNC {
                    continue;
                }
                functions.push(ElfFunctionSymbol {
                    name: string_at(string_table, name_offset as usize),
                    address: value,
                    size,
                });
            }
        }
        functions
    }

    /// The function whose `[address, address + size)` range contains
    /// `address`, with its instruction bytes.
    pub fn function_containing_address(&self, address: u64) -> Option<ElfFunction> {
        let symbol = self
            .functions()
            .into_iter()
            .find(|function| address >= function.address && address < function.address + function.size)?;
        self.load_function(&symbol)
    }

    fn load_function(&self, symbol: &ElfFunctionSymbol) -> Option<ElfFunction> {
        let section = self.sections.iter().find(|section| {
            section.address != 0
                && symbol.address >= section.address
                && symbol.address + symbol.size <= section.address + section.size
        })?;
        let begin = (symbol.address - section.address + section.file_offset) as usize;
        let end = begin + symbol.size as usize;
        let instruction_bytes = self.bytes.get(begin..end)?.to_vec();
        Some(ElfFunction {
            name: symbol.name.clone(),
            base_address: symbol.address,
            instruction_bytes,
        })
    }
}

/// A function symbol before its bytes are loaded.
#[derive(Debug, Clone)]
pub struct ElfFunctionSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

fn string_at(table: &[u8], offset: usize) -> String {
    let Some(tail) = table.get(offset..) else {
        return String::new();
    };
    let end = tail.iter().position(|&byte| byte == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(offset..offset + 4)?.try_into().ok()?))
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.get(offset..offset + 8)?.try_into().ok()?))
}
