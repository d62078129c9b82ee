//! Parsed image description
//!
//! An executable image arrives as an opaque byte buffer. Before it can be
//! mapped, a format backend turns it into an [`ImageLayout`]: where each
//! section lands inside the mapped region, which slots need rebasing,
//! which slots import foreign symbols, and which offsets are exported.
//!
//! Parsing the platform's container format (headers, section tables,
//! relocation records) is the backend's job; the loader only consumes the
//! layout. Backends live outside this crate and plug in through
//! [`ImageFormat`].

use std::ops::Range;

use crate::error::LoadError;

/// Memory protection applied to a mapped section once loading completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protect {
    /// Read-only data
    Read,
    /// Writable data
    ReadWrite,
    /// Executable code (never writable after load, W^X)
    ReadExec,
}

/// One section to copy into the mapped region.
#[derive(Debug, Clone)]
pub struct Section {
    /// Offset of the section inside the mapped region
    pub vaddr: usize,
    /// Bytes to copy from the source buffer
    pub file_range: Range<usize>,
    /// Protection to apply after all fixups are written
    pub protect: Protect,
}

/// A pointer-sized slot that must be rebased by the load delta.
///
/// The slot holds an address computed against the image's preferred
/// base; the loader adds `actual_base - preferred_base` to it.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    /// Offset of the slot inside the mapped region
    pub offset: usize,
}

/// A pointer-sized slot that receives a foreign symbol's address.
#[derive(Debug, Clone)]
pub struct Import {
    /// Name of the module the symbol is expected in
    pub module: String,
    /// Symbol name
    pub symbol: String,
    /// Offset of the slot inside the mapped region
    pub slot: usize,
}

/// A symbol this image makes resolvable once mapped.
#[derive(Debug, Clone)]
pub struct Export {
    /// Exported symbol name
    pub name: String,
    /// Offset of the symbol inside the mapped region
    pub offset: usize,
}

/// Everything the loader needs to map one image.
#[derive(Debug, Clone, Default)]
pub struct ImageLayout {
    /// Total size of the region to map (before page rounding)
    pub mapped_size: usize,
    /// Base address the image's internal addresses were computed against
    pub preferred_base: usize,
    /// Sections to copy, in file order
    pub sections: Vec<Section>,
    /// Slots to rebase
    pub relocations: Vec<Relocation>,
    /// Slots to bind to foreign symbols
    pub imports: Vec<Import>,
    /// Symbols resolvable from this image after mapping
    pub exports: Vec<Export>,
}

/// Platform executable-format parser.
///
/// Implementations read the container format directly from the buffer,
/// never from a file, and describe it as an [`ImageLayout`].
pub trait ImageFormat {
    /// Parse `image` into a layout, or report why it cannot be mapped.
    fn parse(&self, image: &[u8]) -> Result<ImageLayout, LoadError>;
}

impl ImageLayout {
    /// Validate internal consistency against the source buffer.
    ///
    /// Every file range must lie within the source, and every section,
    /// relocation slot, import slot, and export must lie within the
    /// mapped region.
    pub fn validate(&self, source_len: usize) -> Result<(), LoadError> {
        let slot = std::mem::size_of::<usize>();

        for section in &self.sections {
            if section.file_range.end > source_len
                || section.file_range.start > section.file_range.end
            {
                return Err(LoadError::BadImage(format!(
                    "section file range {:?} outside source of {} bytes",
                    section.file_range, source_len
                )));
            }
            let len = section.file_range.len();
            if section.vaddr.checked_add(len).is_none()
                || section.vaddr + len > self.mapped_size
            {
                return Err(LoadError::BadImage(format!(
                    "section at {:#x}+{:#x} outside mapped size {:#x}",
                    section.vaddr, len, self.mapped_size
                )));
            }
        }

        for reloc in &self.relocations {
            if reloc.offset + slot > self.mapped_size {
                return Err(LoadError::BadImage(format!(
                    "relocation slot {:#x} outside mapped size {:#x}",
                    reloc.offset, self.mapped_size
                )));
            }
        }

        for import in &self.imports {
            if import.slot + slot > self.mapped_size {
                return Err(LoadError::BadImage(format!(
                    "import slot {:#x} outside mapped size {:#x}",
                    import.slot, self.mapped_size
                )));
            }
        }

        for export in &self.exports {
            if export.offset >= self.mapped_size {
                return Err(LoadError::BadImage(format!(
                    "export {} at {:#x} outside mapped size {:#x}",
                    export.name, export.offset, self.mapped_size
                )));
            }
        }

        Ok(())
    }
}
