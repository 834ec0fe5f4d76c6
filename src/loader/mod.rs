//! Mapping executable images into the emulated address space.
//!
//! [`PeLoader`] translates a PE file's section table into known-byte regions
//! of [`VirtualMemory`](crate::VirtualMemory) starting at a chosen base
//! address, and [`MappedImage`] describes (and re-parses) the result. See the
//! [`peloader`] module docs for the mapping contract.

pub(crate) mod peloader;

pub use peloader::{MappedImage, MappedSection, PeLoader, PeLoaderConfig, SectionProtection};
