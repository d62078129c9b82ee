//! Vireo reflective image loading
//!
//! Brings executable images into the process directly from memory buffers
//! and makes their exported symbols resolvable, bypassing the operating
//! system's on-disk loader:
//! - **format**: parsed-image description and the format backend trait
//! - **loader**: anonymous mapping, relocation, import binding, W^X freeze
//! - **os**: resident-module probing and the unified resolve contract

pub mod error;
pub mod format;
pub mod loader;
pub mod os;

pub use error::{LoadError, SymbolNotFound};
pub use format::{Export, Import, ImageFormat, ImageLayout, Protect, Relocation, Section};
pub use loader::{MappedImage, SymbolSource};
pub use os::{process_symbol, ModuleHandle, OsModule, ResolveSymbol};
