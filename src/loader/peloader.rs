//! PE image mapping into virtual memory.
//!
//! The loader lays a Portable Executable out in the emulated address space the
//! way the OS loader would: headers at the base address, every section at
//! `base + rva`, and alignment gaps zero-filled. All mapped bytes are *known*
//! bits; everything around the image keeps degrading to unknown.
//!
//! Mapping fidelity is a correctness contract: re-reading the mapped region
//! and parsing it as a mapped-layout PE must reproduce the original image's
//! section table and header identity. [`MappedImage::from_memory`] exists for
//! exactly that check.
//!
//! Parsing is delegated to the `goblin` crate; both PE32 and PE32+ images are
//! supported.

use std::path::Path;

use bitflags::bitflags;
use goblin::pe::{options::ParseOptions, PE};

use crate::{memory::VirtualMemory, Error, Result};

/// Section characteristics flags relevant to mapping.
mod characteristics {
    /// Section contains executable code.
    pub const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
    /// Section can be executed.
    pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
    /// Section can be read.
    pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
    /// Section can be written.
    pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;
}

bitflags! {
    /// Memory protection derived from a section's characteristics.
    ///
    /// The engine does not enforce protection on access; the flags are carried
    /// as mapping metadata for analysis layers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionProtection: u8 {
        /// The section is readable.
        const READ = 0b001;
        /// The section is writable.
        const WRITE = 0b010;
        /// The section is executable.
        const EXECUTE = 0b100;
    }
}

impl SectionProtection {
    /// Derives protection flags from PE section characteristics.
    #[must_use]
    pub fn from_characteristics(value: u32) -> Self {
        let mut protection = SectionProtection::empty();
        if value & characteristics::IMAGE_SCN_MEM_READ != 0 {
            protection |= SectionProtection::READ;
        }
        if value & characteristics::IMAGE_SCN_MEM_WRITE != 0 {
            protection |= SectionProtection::WRITE;
        }
        if value & (characteristics::IMAGE_SCN_MEM_EXECUTE | characteristics::IMAGE_SCN_CNT_CODE)
            != 0
        {
            protection |= SectionProtection::EXECUTE;
        }
        protection
    }
}

/// Configuration options for PE image mapping.
///
/// The default maps the image at its preferred base address from the optional
/// header.
#[derive(Clone, Debug, Default)]
pub struct PeLoaderConfig {
    /// Base address override for the mapping.
    ///
    /// When `None`, the loader uses the image's preferred base.
    pub base_address: Option<u64>,
}

impl PeLoaderConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        PeLoaderConfig::default()
    }

    /// Forces the image to be mapped at `base` instead of its preferred base.
    #[must_use]
    pub fn with_base_address(mut self, base: u64) -> Self {
        self.base_address = Some(base);
        self
    }
}

/// Metadata about one mapped PE section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedSection {
    /// Section name with trailing NULs stripped (e.g. `.text`).
    pub name: String,
    /// RVA the section was mapped at.
    pub virtual_address: u32,
    /// In-memory size of the section.
    pub virtual_size: u32,
    /// On-disk size of the section's raw data.
    pub raw_size: u32,
    /// Protection flags derived from the section characteristics.
    pub protection: SectionProtection,
}

/// Description of a PE image mapped into virtual memory.
///
/// Carries the externally visible identity of the image: header fields and the
/// ordered section table. Two mappings of the same image compare equal on
/// everything except the chosen `base_address`.
#[derive(Clone, Debug)]
pub struct MappedImage {
    /// Address the image was mapped at.
    pub base_address: u64,
    /// Preferred base address from the optional header.
    pub preferred_base: u64,
    /// Total size of the mapped region (`SizeOfImage`).
    pub size_of_image: u64,
    /// Entry point RVA, if the image declares one.
    pub entry_point: Option<u64>,
    /// Whether the image is PE32+ (64-bit).
    pub is_64_bit: bool,
    /// COFF machine identifier.
    pub machine: u16,
    /// CLR runtime header RVA for .NET images.
    pub clr_header_rva: Option<u32>,
    /// Mapped sections in table order.
    pub sections: Vec<MappedSection>,
}

impl MappedImage {
    /// Re-parses a mapped image out of virtual memory.
    ///
    /// This is the round-trip side of the mapping contract: the `size` bytes
    /// at `base` must be fully known and parse as a mapped-layout PE.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageNotKnown`] when the region contains unknown bits,
    /// or a goblin error when the bytes do not form a valid PE.
    pub fn from_memory(memory: &VirtualMemory, base: u64, size: u64) -> Result<Self> {
        if !memory.is_range_fully_known(base, size as usize) {
            return Err(Error::ImageNotKnown { base, size });
        }
        let bytes = memory.read_bytes(base, size as usize);

        let mut options = ParseOptions::default();
        options.resolve_rva = false;
        let pe = PE::parse_with_opts(&bytes, &options)?;
        Self::from_parsed(&pe, base)
    }

    /// Builds the description from a parsed PE at the given mapping base.
    fn from_parsed(pe: &PE<'_>, base_address: u64) -> Result<Self> {
        let optional_header = pe.header.optional_header.ok_or_else(|| {
            goblin::error::Error::Malformed("PE image has no optional header".into())
        })?;

        let entry_point = optional_header.standard_fields.address_of_entry_point;
        let clr_header_rva = optional_header
            .data_directories
            .get_clr_runtime_header()
            .filter(|directory| directory.size > 0)
            .map(|directory| directory.virtual_address);

        let sections = pe
            .sections
            .iter()
            .map(|section| MappedSection {
                name: String::from_utf8_lossy(&section.name)
                    .trim_end_matches('\0')
                    .to_string(),
                virtual_address: section.virtual_address,
                virtual_size: section.virtual_size,
                raw_size: section.size_of_raw_data,
                protection: SectionProtection::from_characteristics(section.characteristics),
            })
            .collect();

        Ok(MappedImage {
            base_address,
            preferred_base: optional_header.windows_fields.image_base,
            size_of_image: u64::from(optional_header.windows_fields.size_of_image),
            entry_point: if entry_point == 0 {
                None
            } else {
                Some(entry_point as u64)
            },
            is_64_bit: pe.is_64,
            machine: pe.header.coff_header.machine,
            clr_header_rva,
            sections,
        })
    }

    /// Converts an RVA to an absolute address inside this mapping.
    #[must_use]
    pub fn rva_to_va(&self, rva: u32) -> u64 {
        self.base_address + u64::from(rva)
    }

    /// Whether an RVA falls inside the mapped region.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        u64::from(rva) < self.size_of_image
    }

    /// The section containing `rva`, if any.
    #[must_use]
    pub fn section_for_rva(&self, rva: u32) -> Option<&MappedSection> {
        self.sections.iter().find(|section| {
            rva >= section.virtual_address
                && rva < section.virtual_address + section.virtual_size.max(section.raw_size)
        })
    }

    /// The section names in table order.
    #[must_use]
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Whether the image carries a CLR runtime header (managed code).
    #[must_use]
    pub fn is_dotnet(&self) -> bool {
        self.clr_header_rva.is_some()
    }
}

/// Maps PE images into a [`VirtualMemory`] address space.
///
/// # Example
///
/// ```ignore
/// let mut memory = VirtualMemory::new();
/// let image = PeLoader::new().map(&pe_bytes, &mut memory)?;
/// assert!(memory.is_range_fully_known(image.base_address, 0x200));
/// ```
#[derive(Debug, Default)]
pub struct PeLoader {
    config: PeLoaderConfig,
}

impl PeLoader {
    /// Creates a loader with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        PeLoader::default()
    }

    /// Creates a loader with the given configuration.
    #[must_use]
    pub fn with_config(config: PeLoaderConfig) -> Self {
        PeLoader { config }
    }

    /// Maps a PE image from raw file bytes into `memory`.
    ///
    /// The whole `SizeOfImage` region becomes known: headers and section data
    /// carry the file's bytes, alignment gaps carry zeroes. Returns the
    /// mapping description including the chosen base address.
    ///
    /// # Errors
    ///
    /// Returns a goblin error for unparseable images.
    pub fn map(&self, pe_bytes: &[u8], memory: &mut VirtualMemory) -> Result<MappedImage> {
        let pe = PE::parse(pe_bytes)?;
        let optional_header = pe.header.optional_header.ok_or_else(|| {
            goblin::error::Error::Malformed("PE image has no optional header".into())
        })?;

        let base_address = self
            .config
            .base_address
            .unwrap_or(optional_header.windows_fields.image_base);
        let size_of_image = u64::from(optional_header.windows_fields.size_of_image);

        // Alignment gaps and uninitialised section tails read back as known
        // zero, matching what the OS loader produces.
        memory.zero_fill(base_address, size_of_image as usize);

        let headers_size =
            (optional_header.windows_fields.size_of_headers as usize).min(pe_bytes.len());
        memory.write_bytes(base_address, &pe_bytes[..headers_size]);

        for section in &pe.sections {
            let raw_offset = section.pointer_to_raw_data as usize;
            if raw_offset >= pe_bytes.len() {
                continue;
            }
            // Copy the raw data that both exists on disk and fits the image.
            let available = pe_bytes.len() - raw_offset;
            let in_image = size_of_image.saturating_sub(u64::from(section.virtual_address));
            let length = (section.size_of_raw_data as usize)
                .min(available)
                .min(in_image as usize);
            memory.write_bytes(
                base_address + u64::from(section.virtual_address),
                &pe_bytes[raw_offset..raw_offset + length],
            );
        }

        MappedImage::from_parsed(&pe, base_address)
    }

    /// Memory-maps a PE file from disk and maps it into `memory`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened or mapped, or a
    /// goblin error when it is not a valid PE.
    pub fn map_file(&self, path: &Path, memory: &mut VirtualMemory) -> Result<MappedImage> {
        let file = std::fs::File::open(path)?;
        // Read-only mapping of an immutable input file.
        let mapping = unsafe { memmap2::Mmap::map(&file)? };
        self.map(&mapping, memory)
    }
}
