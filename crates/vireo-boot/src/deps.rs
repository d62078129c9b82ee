//! Ordered native-dependency bootstrap.
//!
//! Walks the build-time component table until the engine's own native
//! component is located. Each component is either reused from the host
//! process (already resident) or decompressed and mapped from its
//! embedded image; the compressed source bytes are handed back to the OS
//! immediately after the load attempt either way. Every declared
//! component is mandatory; there is no partial-success mode.
//!
//! Once the engine is located, the fixed required-symbol list is resolved
//! into a [`SymbolTable`]; a single missing symbol aborts the bootstrap.

use std::collections::HashMap;
use std::ffi::c_void;

use log::{debug, warn};
use vireo_image::{
    process_symbol, ImageFormat, MappedImage, ModuleHandle, OsModule, ResolveSymbol,
    SymbolSource,
};

use crate::error::BootError;
use crate::unpack::{decompress, release_region};

/// One required native component, fixed at build time.
///
/// The table's order defines load precedence: components a later image
/// imports from must come earlier.
#[derive(Debug, Clone, Copy)]
pub struct NativeComponent<'a> {
    /// Module name the component is known under
    pub name: &'a str,
    /// Compressed image bytes, owned by the process image
    pub image: &'a [u8],
    /// Decompression bound for the image
    pub unpacked_size: usize,
    /// Whether this component is the engine's own native library
    pub is_engine: bool,
}

/// Host-residency probe.
///
/// Covers the case where the host environment already provides a
/// component; such components are reused instead of loaded.
pub trait HostProbe {
    /// Return a handle for `name` if the host already has it resident.
    fn resident(&self, name: &str) -> Option<ModuleHandle>;
}

/// Probe backed by the platform loader's own bookkeeping.
pub struct OsProbe;

impl HostProbe for OsProbe {
    fn resident(&self, name: &str) -> Option<ModuleHandle> {
        OsModule::resident(name).map(ModuleHandle::Os)
    }
}

/// Symbol-name → address mapping for the engine's entry points.
///
/// Built once per process and immutable thereafter. Must not be used
/// after the engine is finalized.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: HashMap<String, *const c_void>,
}

impl SymbolTable {
    /// Resolve every name in `required` against one module.
    ///
    /// All-or-nothing: the first missing symbol aborts, so a partial
    /// table can never escape.
    pub fn resolve_all(
        module: &ModuleHandle,
        required: &[&str],
    ) -> Result<Self, BootError> {
        let mut symbols = HashMap::with_capacity(required.len());
        for name in required {
            let addr = module.resolve(name).map_err(|e| {
                warn!("required symbol {} missing from {}", name, module.name());
                e
            })?;
            symbols.insert((*name).to_string(), addr);
        }
        debug!(
            "resolved {} required symbols from {}",
            symbols.len(),
            module.name()
        );
        Ok(SymbolTable { symbols })
    }

    /// Address of a resolved symbol.
    pub fn get(&self, name: &str) -> Option<*const c_void> {
        self.symbols.get(name).copied()
    }

    /// Number of resolved symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
impl SymbolTable {
    /// Hand-build a table for exercising symbol consumers.
    pub(crate) fn from_entries(entries: &[(&str, *const c_void)]) -> Self {
        SymbolTable {
            symbols: entries
                .iter()
                .map(|(name, addr)| (name.to_string(), *addr))
                .collect(),
        }
    }
}

/// Import source for images loaded during the bootstrap: modules loaded
/// earlier in the same scan, then anything the host already has.
struct ProcessSymbols<'a> {
    loaded: &'a [ModuleHandle],
}

impl SymbolSource for ProcessSymbols<'_> {
    fn lookup(&self, module: &str, symbol: &str) -> Option<*const c_void> {
        if let Some(handle) = self.loaded.iter().find(|h| h.name() == module) {
            if let Ok(addr) = handle.resolve(symbol) {
                return Some(addr);
            }
        }
        if let Some(resident) = OsModule::resident(module) {
            if let Ok(addr) = resident.resolve(symbol) {
                return Some(addr);
            }
        }
        process_symbol(symbol)
    }
}

/// The engine's native side, ready for symbol-table-backed calls.
#[derive(Debug)]
pub struct NativeRuntime {
    modules: Vec<ModuleHandle>,
    engine: usize,
    symbols: SymbolTable,
}

impl NativeRuntime {
    /// Handle of the engine's own native component.
    pub fn engine_handle(&self) -> &ModuleHandle {
        &self.modules[self.engine]
    }

    /// The fully populated required-symbol table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Every module this bootstrap is keeping alive.
    pub fn modules(&self) -> &[ModuleHandle] {
        &self.modules
    }
}

/// Drive the ordered component scan to completion.
///
/// Scan policy: iteration stops as soon as the engine component is
/// located (resident or freshly mapped); components listed after it are
/// never examined. Any load failure is fatal: the bootstrap ends with
/// either a complete [`NativeRuntime`] or an error, never partial state.
pub fn bootstrap_native(
    components: &[NativeComponent<'_>],
    probe: &dyn HostProbe,
    format: &dyn ImageFormat,
    required: &[&str],
) -> Result<NativeRuntime, BootError> {
    if components.iter().filter(|c| c.is_engine).count() > 1 {
        return Err(BootError::DuplicateEngine);
    }

    let mut modules: Vec<ModuleHandle> = Vec::new();
    let mut engine: Option<usize> = None;

    for component in components {
        if engine.is_some() {
            break;
        }

        if let Some(handle) = probe.resident(component.name) {
            debug!("{} already resident, reusing", component.name);
            if component.is_engine {
                modules.push(handle);
                engine = Some(modules.len() - 1);
            }
            continue;
        }

        debug!(
            "loading {} from embedded image ({} bytes compressed)",
            component.name,
            component.image.len()
        );

        let loaded = decompress(component.image, component.unpacked_size)
            .map_err(BootError::from)
            .and_then(|buffer| {
                MappedImage::load(
                    component.name,
                    format,
                    &buffer,
                    &ProcessSymbols { loaded: &modules },
                )
                .map_err(BootError::from)
            });

        // The compressed source is a single-use static resource; hand it
        // back whether or not the load worked.
        release_region(component.image);

        let image = loaded.map_err(|e| {
            warn!("{}: load failed: {}", component.name, e);
            e
        })?;

        modules.push(ModuleHandle::Mem(image));
        if component.is_engine {
            engine = Some(modules.len() - 1);
        }
    }

    let engine = engine.ok_or(BootError::EngineNotFound)?;
    let symbols = SymbolTable::resolve_all(&modules[engine], required)?;

    Ok(NativeRuntime {
        modules,
        engine,
        symbols,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::DecompressError;
    use crate::unpack::compress_fixture as compress;
    use vireo_image::{Export, ImageLayout, LoadError, Protect, Section};

    /// Test format backend: every image is one writable data section
    /// whose exports are listed in `self.0` at successive offsets.
    struct FlatExports(Vec<String>);

    impl ImageFormat for FlatExports {
        fn parse(&self, image: &[u8]) -> Result<ImageLayout, LoadError> {
            if image.is_empty() {
                return Err(LoadError::BadImage("empty image".to_string()));
            }
            Ok(ImageLayout {
                mapped_size: image.len().max(self.0.len()),
                preferred_base: 0,
                sections: vec![Section {
                    vaddr: 0,
                    file_range: 0..image.len(),
                    protect: Protect::ReadWrite,
                }],
                relocations: vec![],
                imports: vec![],
                exports: self
                    .0
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Export {
                        name: name.clone(),
                        offset: i,
                    })
                    .collect(),
            })
        }
    }

    struct NothingResident;

    impl HostProbe for NothingResident {
        fn resident(&self, _name: &str) -> Option<ModuleHandle> {
            None
        }
    }

    /// Marks one name resident, backed by a pre-mapped image.
    struct OneResident {
        name: String,
        exports: Vec<String>,
    }

    impl HostProbe for OneResident {
        fn resident(&self, name: &str) -> Option<ModuleHandle> {
            if name != self.name {
                return None;
            }
            let image = MappedImage::load(
                name,
                &FlatExports(self.exports.clone()),
                &[0u8; 32],
                &NoImports,
            )
            .unwrap();
            Some(ModuleHandle::Mem(image))
        }
    }

    struct NoImports;

    impl vireo_image::SymbolSource for NoImports {
        fn lookup(&self, _m: &str, _s: &str) -> Option<*const c_void> {
            None
        }
    }

    fn engine_component<'a>(name: &'a str, image: &'a [u8]) -> NativeComponent<'a> {
        NativeComponent {
            name,
            image,
            unpacked_size: 4096,
            is_engine: true,
        }
    }

    #[test]
    fn test_memory_load_populates_table() {
        let image = compress(&[0u8; 32]);
        let components = [engine_component("libvireo", &image)];

        let runtime = bootstrap_native(
            &components,
            &NothingResident,
            &FlatExports(vec!["vireo_init".to_string(), "vireo_eval".to_string()]),
            &["vireo_init", "vireo_eval"],
        )
        .unwrap();

        assert_eq!(runtime.modules().len(), 1);
        assert_eq!(runtime.symbols().len(), 2);
        assert!(runtime.symbols().get("vireo_init").is_some());
        assert!(runtime.engine_handle().resolve("vireo_eval").is_ok());
    }

    #[test]
    fn test_missing_symbol_aborts() {
        let image = compress(&[0u8; 32]);
        let components = [engine_component("libvireo", &image)];

        let err = bootstrap_native(
            &components,
            &NothingResident,
            &FlatExports(vec!["vireo_init".to_string()]),
            &["vireo_init", "vireo_missing"],
        )
        .unwrap_err();

        assert!(matches!(err, BootError::Symbol(_)));
    }

    #[test]
    fn test_resident_engine_skips_decompression() {
        // The embedded image is garbage; only a skipped load can succeed.
        let components = [engine_component("libvireo", b"not compressed at all")];
        let probe = OneResident {
            name: "libvireo".to_string(),
            exports: vec!["vireo_init".to_string()],
        };

        let runtime = bootstrap_native(
            &components,
            &probe,
            &FlatExports(vec![]),
            &["vireo_init"],
        )
        .unwrap();

        assert_eq!(runtime.modules().len(), 1);
    }

    #[test]
    fn test_loads_exactly_the_missing_component() {
        // One dependency must be mapped from memory, the engine is
        // already resident.
        let dep_image = compress(&[1u8; 16]);
        let components = [
            NativeComponent {
                name: "libdep",
                image: &dep_image,
                unpacked_size: 64,
                is_engine: false,
            },
            engine_component("libvireo", b"garbage"),
        ];
        let probe = OneResident {
            name: "libvireo".to_string(),
            exports: vec!["vireo_init".to_string()],
        };

        let runtime = bootstrap_native(
            &components,
            &probe,
            &FlatExports(vec![]),
            &["vireo_init"],
        )
        .unwrap();

        // libdep mapped from memory, engine reused.
        assert_eq!(runtime.modules().len(), 2);
        assert_eq!(runtime.modules()[0].name(), "libdep");
        assert_eq!(runtime.engine_handle().name(), "libvireo");
    }

    #[test]
    fn test_scan_stops_after_engine() {
        // The component after the engine is unloadable garbage; success
        // proves the scan never reached it.
        let components = [
            engine_component("libvireo", b"garbage"),
            NativeComponent {
                name: "libafter",
                image: b"also garbage",
                unpacked_size: 64,
                is_engine: false,
            },
        ];
        let probe = OneResident {
            name: "libvireo".to_string(),
            exports: vec!["vireo_init".to_string()],
        };

        let runtime = bootstrap_native(
            &components,
            &probe,
            &FlatExports(vec![]),
            &["vireo_init"],
        )
        .unwrap();
        assert_eq!(runtime.modules().len(), 1);
    }

    #[test]
    fn test_corrupt_component_aborts() {
        let components = [engine_component("libvireo", b"garbage")];
        let err = bootstrap_native(
            &components,
            &NothingResident,
            &FlatExports(vec![]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BootError::Decompress(DecompressError::Corrupt(_))
        ));
    }

    #[test]
    fn test_no_engine_flag_aborts() {
        let image = compress(&[0u8; 16]);
        let components = [NativeComponent {
            name: "libdep",
            image: &image,
            unpacked_size: 64,
            is_engine: false,
        }];
        let err = bootstrap_native(
            &components,
            &NothingResident,
            &FlatExports(vec![]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, BootError::EngineNotFound));
    }

    #[test]
    fn test_duplicate_engine_flag_aborts() {
        let image = compress(&[0u8; 16]);
        let components = [
            engine_component("liba", &image),
            engine_component("libb", &image),
        ];
        let err = bootstrap_native(
            &components,
            &NothingResident,
            &FlatExports(vec![]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, BootError::DuplicateEngine));
    }
}
