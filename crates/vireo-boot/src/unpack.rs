//! Archive decompression and post-use memory hygiene.
//!
//! Embedded archives are zlib streams. Decompression yields a [`ScrubBuf`]
//! whose contents are overwritten with [`SCRUB_FILL`] when dropped, and
//! the static region a buffer was decompressed *from* is handed back to
//! the OS with [`release_region`] once it is no longer needed.

use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{compiler_fence, Ordering};

use flate2::read::ZlibDecoder;
use log::debug;

use crate::error::DecompressError;

/// Byte pattern written over sensitive regions after their one-time use.
pub const SCRUB_FILL: u8 = 0xFF;

/// A decompressed buffer that scrubs itself on drop.
///
/// Holds configuration parcels and library source regions, which must not
/// outlive their one-time use in readable form.
#[derive(Debug)]
pub struct ScrubBuf {
    data: Vec<u8>,
}

impl ScrubBuf {
    /// Number of decompressed bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for ScrubBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for ScrubBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for ScrubBuf {
    fn drop(&mut self) {
        scrub(&mut self.data);
    }
}

/// Decompress a zlib stream into a freshly allocated buffer.
///
/// `size_hint` bounds the allocation; it is an upper bound, not an exact
/// size. Corrupt or truncated input fails with [`DecompressError`] and is
/// non-retryable.
pub fn decompress(
    compressed: &[u8],
    size_hint: usize,
) -> Result<ScrubBuf, DecompressError> {
    let decoder = ZlibDecoder::new(compressed);
    let mut data = Vec::with_capacity(size_hint);

    // One byte of headroom past the bound distinguishes "exactly at the
    // bound" from "exceeds it".
    decoder
        .take(size_hint as u64 + 1)
        .read_to_end(&mut data)
        .map_err(|e| DecompressError::Corrupt(e.to_string()))?;

    if data.len() > size_hint {
        return Err(DecompressError::TooLarge { limit: size_hint });
    }

    debug!(
        "decompressed {} bytes into {} (bound {})",
        compressed.len(),
        data.len(),
        size_hint
    );

    Ok(ScrubBuf { data })
}

/// Overwrite a region with the fill pattern.
///
/// Volatile writes with a trailing fence so the stores cannot be elided
/// even though the region is about to be released.
pub fn scrub(region: &mut [u8]) {
    let ptr = region.as_mut_ptr();
    for i in 0..region.len() {
        // Safety: i is in bounds of the region for its whole length.
        unsafe {
            std::ptr::write_volatile(ptr.add(i), SCRUB_FILL);
        }
    }
    compiler_fence(Ordering::SeqCst);
}

/// Hand a static in-process region back to the OS as unneeded.
///
/// Only the page-aligned interior of the region is affected; a region
/// smaller than a page is left alone. The memory stays addressable, the
/// OS is merely free to drop the backing pages.
#[cfg(unix)]
pub fn release_region(region: &[u8]) {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let start = region.as_ptr() as usize;
    let end = start + region.len();

    let aligned_start = start.div_ceil(page) * page;
    let aligned_end = end / page * page;
    if aligned_start >= aligned_end {
        return;
    }

    let rc = unsafe {
        libc::madvise(
            aligned_start as *mut libc::c_void,
            aligned_end - aligned_start,
            libc::MADV_DONTNEED,
        )
    };
    if rc != 0 {
        debug!("madvise on {} bytes failed", aligned_end - aligned_start);
    }
}

#[cfg(not(unix))]
pub fn release_region(_region: &[u8]) {}

/// Packer-side compression for in-memory test fixtures.
#[cfg(test)]
pub(crate) fn compress_fixture(data: &[u8]) -> Vec<u8> {
    use std::io::Write;

    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
