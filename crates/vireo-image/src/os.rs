//! Resident-module probing and the unified symbol-resolution contract.
//!
//! Two disjoint kinds of module handle exist during a bootstrap:
//! - [`OsModule`]: a module the host process already has resident,
//!   discovered by name and resolved through the platform's own export
//!   mechanism
//! - [`MappedImage`]: a module this crate mapped from a buffer, resolved
//!   through the export table parsed at map time
//!
//! Both expose the same `resolve(name) -> address` contract through
//! [`ResolveSymbol`].

use std::ffi::c_void;
#[cfg(unix)]
use std::ffi::CString;

use crate::error::SymbolNotFound;
use crate::loader::MappedImage;

/// One resolution contract over both handle variants.
pub trait ResolveSymbol {
    /// Resolve an exported symbol to its address.
    fn resolve(&self, symbol: &str) -> Result<*const c_void, SymbolNotFound>;
}

/// A module already resident in the process, found by name lookup.
///
/// The probe never loads anything: a module that is not already resident
/// stays that way.
#[derive(Debug)]
pub struct OsModule {
    handle: OsHandle,
    name: String,
}

impl OsModule {
    /// Probe for an already-resident module by name.
    ///
    /// # Platform-specific behavior
    ///
    /// - **Unix**: `dlopen(RTLD_NOLOAD | RTLD_LAZY)`, which returns a handle
    ///   only if the module is already in the process
    /// - **Windows**: `GetModuleHandleW`
    pub fn resident(name: &str) -> Option<Self> {
        let handle = OsHandle::resident(name)?;
        Some(OsModule {
            handle,
            name: name.to_string(),
        })
    }

    /// Name the module was probed under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ResolveSymbol for OsModule {
    fn resolve(&self, symbol: &str) -> Result<*const c_void, SymbolNotFound> {
        self.handle.symbol(symbol).ok_or_else(|| SymbolNotFound {
            symbol: symbol.to_string(),
            module: self.name.clone(),
        })
    }
}

impl ResolveSymbol for MappedImage {
    fn resolve(&self, symbol: &str) -> Result<*const c_void, SymbolNotFound> {
        MappedImage::resolve(self, symbol)
    }
}

/// Opaque identifier for a loaded module, owned by whichever loader
/// produced it.
#[derive(Debug)]
pub enum ModuleHandle {
    /// Already resident; resolution delegates to the platform loader
    Os(OsModule),
    /// Mapped from a buffer; resolution walks the parsed export table
    Mem(MappedImage),
}

impl ModuleHandle {
    /// Name the module is known under.
    pub fn name(&self) -> &str {
        match self {
            ModuleHandle::Os(m) => m.name(),
            ModuleHandle::Mem(m) => m.name(),
        }
    }
}

impl ResolveSymbol for ModuleHandle {
    fn resolve(&self, symbol: &str) -> Result<*const c_void, SymbolNotFound> {
        match self {
            ModuleHandle::Os(m) => m.resolve(symbol),
            ModuleHandle::Mem(m) => m.resolve(symbol),
        }
    }
}

/// Look a symbol up in the process's default scope (the host executable
/// and everything it has loaded). Used as the last resort when binding
/// imports.
pub fn process_symbol(symbol: &str) -> Option<*const c_void> {
    OsHandle::process_symbol(symbol)
}

// Platform-specific implementations

#[cfg(unix)]
type OsHandle = UnixHandle;

#[cfg(windows)]
type OsHandle = WindowsHandle;

#[cfg(not(any(unix, windows)))]
type OsHandle = UnsupportedHandle;

// ============================================================================
// Unix Implementation (Linux, macOS, BSD)
// ============================================================================

#[cfg(unix)]
#[derive(Debug)]
struct UnixHandle {
    handle: *mut c_void,
}

#[cfg(unix)]
impl UnixHandle {
    fn resident(name: &str) -> Option<Self> {
        let c_name = CString::new(name).ok()?;

        let handle = unsafe {
            // RTLD_NOLOAD: only succeed if the module is already mapped
            libc::dlopen(c_name.as_ptr(), libc::RTLD_NOLOAD | libc::RTLD_LAZY)
        };

        if handle.is_null() {
            None
        } else {
            Some(UnixHandle { handle })
        }
    }

    fn symbol(&self, name: &str) -> Option<*const c_void> {
        let c_name = CString::new(name).ok()?;

        unsafe {
            // Clear any previous error; a null return is only a failure
            // if dlerror reports one (null-valued symbols are legal).
            libc::dlerror();

            let addr = libc::dlsym(self.handle, c_name.as_ptr());

            if !libc::dlerror().is_null() {
                return None;
            }
            if addr.is_null() {
                return None;
            }
            Some(addr as *const c_void)
        }
    }

    fn process_symbol(name: &str) -> Option<*const c_void> {
        let c_name = CString::new(name).ok()?;
        unsafe {
            libc::dlerror();
            let addr = libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr());
            if !libc::dlerror().is_null() || addr.is_null() {
                return None;
            }
            Some(addr as *const c_void)
        }
    }
}

#[cfg(unix)]
impl Drop for UnixHandle {
    fn drop(&mut self) {
        // Balances the reference taken by the RTLD_NOLOAD probe; the
        // module itself stays resident.
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

#[cfg(unix)]
unsafe impl Send for UnixHandle {}
#[cfg(unix)]
unsafe impl Sync for UnixHandle {}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
#[derive(Debug)]
struct WindowsHandle {
    handle: *mut c_void,
}

#[cfg(windows)]
impl WindowsHandle {
    fn resident(name: &str) -> Option<Self> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = OsStr::new(name)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // GetModuleHandleW does not add a reference; the handle is valid
        // as long as the module stays loaded.
        let handle = unsafe { GetModuleHandleW(wide.as_ptr()) };

        if handle.is_null() {
            None
        } else {
            Some(WindowsHandle { handle })
        }
    }

    fn symbol(&self, name: &str) -> Option<*const c_void> {
        let c_name = std::ffi::CString::new(name).ok()?;
        let addr = unsafe { GetProcAddress(self.handle, c_name.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr as *const c_void)
        }
    }

    fn process_symbol(name: &str) -> Option<*const c_void> {
        let this = WindowsHandle {
            handle: unsafe { GetModuleHandleW(std::ptr::null()) },
        };
        if this.handle.is_null() {
            return None;
        }
        this.symbol(name)
    }
}

#[cfg(windows)]
unsafe impl Send for WindowsHandle {}
#[cfg(windows)]
unsafe impl Sync for WindowsHandle {}

// Windows FFI declarations
#[cfg(windows)]
extern "system" {
    fn GetModuleHandleW(name: *const u16) -> *mut c_void;
    fn GetProcAddress(module: *mut c_void, procname: *const i8) -> *mut c_void;
}

// ============================================================================
// Fallback
// ============================================================================

#[cfg(not(any(unix, windows)))]
#[derive(Debug)]
struct UnsupportedHandle;

#[cfg(not(any(unix, windows)))]
impl UnsupportedHandle {
    fn resident(_name: &str) -> Option<Self> {
        None
    }

    fn symbol(&self, _name: &str) -> Option<*const c_void> {
        None
    }

    fn process_symbol(_name: &str) -> Option<*const c_void> {
        None
    }
}
