//! Reflective image loader
//!
//! Maps an executable image from a byte buffer into the address space:
//! 1. Parse the buffer into an [`ImageLayout`] via the format backend
//! 2. Map an anonymous writable region and copy each section into place
//! 3. Apply base relocations for the delta between preferred and actual base
//! 4. Bind import slots against symbols already resolvable in the process
//! 5. Apply final per-section protections (W^X)
//!
//! No file is ever written or read; the operating system's own loader is
//! bypassed entirely.

use std::collections::HashMap;
use std::ffi::c_void;

use log::debug;

use crate::error::{LoadError, SymbolNotFound};
use crate::format::{ImageFormat, Protect};

/// Source of addresses for import binding.
///
/// During a bootstrap this is backed by the modules loaded so far plus
/// whatever the host process already has resident; later images may
/// depend on earlier ones.
pub trait SymbolSource {
    /// Look up `symbol` as exported by `module`, if resolvable.
    fn lookup(&self, module: &str, symbol: &str) -> Option<*const c_void>;
}

/// An executable image mapped from memory.
///
/// Owns the mapped region for its whole lifetime and exposes the export
/// table parsed at map time.
#[derive(Debug)]
pub struct MappedImage {
    name: String,

    /// Base address of the mapped region.
    #[cfg(unix)]
    base: *mut u8,

    /// Size of the mapped region in bytes (page rounded).
    size: usize,

    /// Exported symbol name → offset from base.
    exports: HashMap<String, usize>,
}

// Safety: the region is immutable once loading completes (final
// protections are applied before the value is returned), so concurrent
// reads are fine.
unsafe impl Send for MappedImage {}
unsafe impl Sync for MappedImage {}

impl MappedImage {
    /// Map `image` into the address space.
    ///
    /// `imports` supplies addresses for the image's import slots; an
    /// import that cannot be bound fails the whole load.
    #[cfg(unix)]
    pub fn load(
        name: &str,
        format: &dyn ImageFormat,
        image: &[u8],
        imports: &dyn SymbolSource,
    ) -> Result<Self, LoadError> {
        let layout = format.parse(image)?;
        layout.validate(image.len())?;

        if layout.mapped_size == 0 {
            return Err(LoadError::BadImage("empty mapped size".to_string()));
        }

        let page = page_size();
        let size = layout.mapped_size.div_ceil(page) * page;

        debug!(
            "mapping {}: {} bytes, {} sections, {} relocs, {} imports",
            name,
            size,
            layout.sections.len(),
            layout.relocations.len(),
            layout.imports.len()
        );

        let base = unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(LoadError::Region(format!(
                    "mmap of {} bytes failed",
                    size
                )));
            }
            ptr as *mut u8
        };

        // From here on the region must be unmapped on every failure path;
        // the value's own Drop covers early returns.
        let mut mapped = MappedImage {
            name: name.to_string(),
            base,
            size,
            exports: HashMap::new(),
        };

        unsafe {
            for section in &layout.sections {
                std::ptr::copy_nonoverlapping(
                    image[section.file_range.clone()].as_ptr(),
                    base.add(section.vaddr),
                    section.file_range.len(),
                );
            }

            let delta = (base as usize).wrapping_sub(layout.preferred_base);
            for reloc in &layout.relocations {
                let slot = base.add(reloc.offset) as *mut usize;
                let value = std::ptr::read_unaligned(slot);
                std::ptr::write_unaligned(slot, value.wrapping_add(delta));
            }

            for import in &layout.imports {
                let addr = imports
                    .lookup(&import.module, &import.symbol)
                    .ok_or_else(|| LoadError::UnresolvedImport {
                        module: import.module.clone(),
                        symbol: import.symbol.clone(),
                    })?;
                let slot = base.add(import.slot) as *mut usize;
                std::ptr::write_unaligned(slot, addr as usize);
            }

            // All writes are done; freeze each section to its final
            // protection. Write access never coexists with execute.
            for section in &layout.sections {
                let prot = match section.protect {
                    Protect::Read => libc::PROT_READ,
                    Protect::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
                    Protect::ReadExec => libc::PROT_READ | libc::PROT_EXEC,
                };
                let start = section.vaddr / page * page;
                let end =
                    (section.vaddr + section.file_range.len()).div_ceil(page) * page;
                if libc::mprotect(
                    base.add(start) as *mut libc::c_void,
                    end - start,
                    prot,
                ) != 0
                {
                    return Err(LoadError::Region(format!(
                        "mprotect of section at {:#x} failed",
                        section.vaddr
                    )));
                }
            }
        }

        mapped.exports.reserve(layout.exports.len());
        for export in &layout.exports {
            mapped.exports.insert(export.name.clone(), export.offset);
        }

        debug!(
            "mapped {} at {:p} ({} exports)",
            name,
            base,
            mapped.exports.len()
        );

        Ok(mapped)
    }

    #[cfg(not(unix))]
    pub fn load(
        _name: &str,
        _format: &dyn ImageFormat,
        _image: &[u8],
        _imports: &dyn SymbolSource,
    ) -> Result<Self, LoadError> {
        Err(LoadError::Unsupported)
    }

    /// Name the image was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the mapped region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Resolve an exported symbol by walking the export table parsed at
    /// map time.
    pub fn resolve(&self, symbol: &str) -> Result<*const c_void, SymbolNotFound> {
        #[cfg(unix)]
        {
            if let Some(offset) = self.exports.get(symbol) {
                return Ok(unsafe { self.base.add(*offset) } as *const c_void);
            }
        }
        Err(SymbolNotFound {
            symbol: symbol.to_string(),
            module: self.name.clone(),
        })
    }
}

#[cfg(unix)]
impl Drop for MappedImage {
    fn drop(&mut self) {
        if !self.base.is_null() && self.size > 0 {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.size);
            }
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
