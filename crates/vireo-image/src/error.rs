//! Image loading and symbol resolution error types.

use thiserror::Error;

/// Errors that can occur while mapping an executable image from a buffer.
///
/// A `LoadError` is never fatal by itself: it means "this image could not
/// be brought into the process from memory" and is propagated to the
/// caller, which decides whether the component was mandatory.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The image metadata is malformed or internally inconsistent
    #[error("bad image: {0}")]
    BadImage(String),

    /// An anonymous memory region could not be mapped or re-protected
    #[error("region mapping failed: {0}")]
    Region(String),

    /// An imported symbol could not be found in any loaded module
    #[error("unresolved import: {symbol} from {module}")]
    UnresolvedImport {
        /// Module the import was declared against
        module: String,
        /// Symbol name that could not be bound
        symbol: String,
    },

    /// In-memory image loading is not supported on this platform
    #[error("in-memory image loading is not supported on this platform")]
    Unsupported,
}

/// Symbol lookup failure.
///
/// Missing a *required* symbol is always fatal to the enclosing
/// bootstrap; the caller enforces that policy.
#[derive(Debug, Error)]
#[error("undefined symbol {symbol} in {module}")]
pub struct SymbolNotFound {
    /// Symbol name that was requested
    pub symbol: String,
    /// Module the lookup ran against
    pub module: String,
}
