//! Symbol-table-backed engine binding.
//!
//! Once the sequencer has located the engine's native component and
//! resolved the required-symbol list, the addresses are materialized into
//! a typed [`EngineApi`] vtable (one `extern "C"` entry point per
//! required symbol) and [`NativeEngine`] implements the [`Engine`]
//! capability trait on top of it. Every call into the engine from that
//! point on goes through this table.
//!
//! Error details stay inside the engine: a null return here becomes an
//! [`EngineError`] naming the entry point, and [`Engine::report_error`]
//! asks the engine to print its own pending error state.

use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};

use log::debug;
use vireo_image::SymbolNotFound;

use crate::bundle::ModuleBundle;
use crate::deps::SymbolTable;
use crate::engine::{Attr, Engine, EngineError, InitConfig, Value};
use crate::error::BootError;

/// Engine entry points resolved during dependency bootstrap.
///
/// Ordering matches [`EngineApi`]'s fields; the list and the ABI below
/// are one contract.
pub const REQUIRED_SYMBOLS: &[&str] = &[
    "vireo_is_initialized",
    "vireo_initialize",
    "vireo_acquire_lock",
    "vireo_release_lock",
    "vireo_clear_search_path",
    "vireo_set_argv",
    "vireo_set_executable",
    "vireo_unmarshal",
    "vireo_unit_load",
    "vireo_map_new",
    "vireo_map_set",
    "vireo_module_register",
    "vireo_module_namespace",
    "vireo_attr_set_text",
    "vireo_attr_set_path",
    "vireo_builtins_inject",
    "vireo_unit_eval",
    "vireo_namespace_get",
    "vireo_entry_call",
    "vireo_error_print",
    "vireo_release",
    "vireo_finalize",
];

/// C-ABI mirror of [`InitConfig`].
#[repr(C)]
pub struct RawInitConfig {
    pub program_name: *const c_char,
    pub install_signal_handlers: c_int,
    pub ignore_environment: c_int,
    pub isolate_site: c_int,
    pub optimize: c_int,
    pub write_compiled_files: c_int,
    pub threads: c_int,
}

pub type IsInitializedFn = unsafe extern "C" fn() -> c_int;
pub type InitializeFn = unsafe extern "C" fn(*const RawInitConfig) -> c_int;
pub type LockFn = unsafe extern "C" fn();
pub type ClearSearchPathFn = unsafe extern "C" fn();
pub type SetArgvFn = unsafe extern "C" fn(c_int, *const *const c_char);
pub type SetExecutableFn = unsafe extern "C" fn(*const c_char);
pub type BytesInFn = unsafe extern "C" fn(*const u8, usize) -> *mut c_void;
pub type MapNewFn = unsafe extern "C" fn() -> *mut c_void;
pub type MapSetFn =
    unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize) -> c_int;
pub type ModuleRegisterFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
pub type ModuleNamespaceFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
pub type AttrSetTextFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> c_int;
pub type AttrSetPathFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, *const *const c_char, usize) -> c_int;
pub type BuiltinsInjectFn = unsafe extern "C" fn(*mut c_void) -> c_int;
pub type UnitEvalFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> *mut c_void;
pub type NamespaceGetFn =
    unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void;
pub type EntryCallFn =
    unsafe extern "C" fn(*mut c_void, c_int, *mut c_void, *mut c_void) -> *mut c_void;
pub type VoidFn = unsafe extern "C" fn();
pub type ReleaseFn = unsafe extern "C" fn(*mut c_void);

/// Typed vtable over the resolved required symbols.
#[derive(Debug)]
pub struct EngineApi {
    is_initialized: IsInitializedFn,
    initialize: InitializeFn,
    acquire_lock: LockFn,
    release_lock: LockFn,
    clear_search_path: ClearSearchPathFn,
    set_argv: SetArgvFn,
    set_executable: SetExecutableFn,
    unmarshal: BytesInFn,
    unit_load: BytesInFn,
    map_new: MapNewFn,
    map_set: MapSetFn,
    module_register: ModuleRegisterFn,
    module_namespace: ModuleNamespaceFn,
    attr_set_text: AttrSetTextFn,
    attr_set_path: AttrSetPathFn,
    builtins_inject: BuiltinsInjectFn,
    unit_eval: UnitEvalFn,
    namespace_get: NamespaceGetFn,
    entry_call: EntryCallFn,
    error_print: VoidFn,
    release: ReleaseFn,
    finalize: VoidFn,
}

impl EngineApi {
    /// Materialize the vtable from a resolved symbol table.
    ///
    /// Fails on the first required symbol the table does not hold; a
    /// partial vtable never escapes.
    pub fn from_table(table: &SymbolTable) -> Result<Self, BootError> {
        // Safety: each entry point's ABI is fixed by the engine
        // contract; the table maps the names above to those entry
        // points.
        unsafe {
            Ok(EngineApi {
                is_initialized: fetch(table, "vireo_is_initialized")?,
                initialize: fetch(table, "vireo_initialize")?,
                acquire_lock: fetch(table, "vireo_acquire_lock")?,
                release_lock: fetch(table, "vireo_release_lock")?,
                clear_search_path: fetch(table, "vireo_clear_search_path")?,
                set_argv: fetch(table, "vireo_set_argv")?,
                set_executable: fetch(table, "vireo_set_executable")?,
                unmarshal: fetch(table, "vireo_unmarshal")?,
                unit_load: fetch(table, "vireo_unit_load")?,
                map_new: fetch(table, "vireo_map_new")?,
                map_set: fetch(table, "vireo_map_set")?,
                module_register: fetch(table, "vireo_module_register")?,
                module_namespace: fetch(table, "vireo_module_namespace")?,
                attr_set_text: fetch(table, "vireo_attr_set_text")?,
                attr_set_path: fetch(table, "vireo_attr_set_path")?,
                builtins_inject: fetch(table, "vireo_builtins_inject")?,
                unit_eval: fetch(table, "vireo_unit_eval")?,
                namespace_get: fetch(table, "vireo_namespace_get")?,
                entry_call: fetch(table, "vireo_entry_call")?,
                error_print: fetch(table, "vireo_error_print")?,
                release: fetch(table, "vireo_release")?,
                finalize: fetch(table, "vireo_finalize")?,
            })
        }
    }
}

/// Fetch one typed entry point out of the table.
///
/// # Safety
/// `T` must be the fn-pointer type matching the symbol's actual ABI.
unsafe fn fetch<T: Copy>(table: &SymbolTable, name: &str) -> Result<T, BootError> {
    let addr = table.get(name).ok_or_else(|| {
        BootError::Symbol(SymbolNotFound {
            symbol: name.to_string(),
            module: "engine".to_string(),
        })
    })?;
    Ok(std::mem::transmute_copy(&addr))
}

/// [`Engine`] implementation calling through the resolved vtable.
pub struct NativeEngine {
    api: EngineApi,
}

impl NativeEngine {
    /// Wrap an already-materialized vtable.
    pub fn new(api: EngineApi) -> Self {
        NativeEngine { api }
    }

    /// Materialize the vtable and wrap it in one step.
    pub fn from_symbols(table: &SymbolTable) -> Result<Self, BootError> {
        Ok(NativeEngine::new(EngineApi::from_table(table)?))
    }

    fn owned(&self, entry_point: &str, ptr: *mut c_void) -> Result<Value, EngineError> {
        if ptr.is_null() {
            return Err(EngineError::new(format!("{} returned null", entry_point)));
        }
        Ok(Value(ptr as usize))
    }

    fn checked(&self, entry_point: &str, rc: c_int) -> Result<(), EngineError> {
        if rc != 0 {
            return Err(EngineError::new(format!("{} failed ({})", entry_point, rc)));
        }
        Ok(())
    }
}

fn as_ptr(value: Value) -> *mut c_void {
    value.0 as *mut c_void
}

fn c_string(text: &str) -> CString {
    // Interior NULs cannot appear in the fixed names and logical paths
    // this layer passes; an embedded one degrades to an empty string.
    CString::new(text).unwrap_or_default()
}

impl Engine for NativeEngine {
    fn is_initialized(&self) -> bool {
        unsafe { (self.api.is_initialized)() != 0 }
    }

    fn initialize(&mut self, config: &InitConfig) -> Result<(), EngineError> {
        debug!("initializing engine as {}", config.program_name);
        let program_name = c_string(&config.program_name);
        let raw = RawInitConfig {
            program_name: program_name.as_ptr(),
            install_signal_handlers: config.install_signal_handlers as c_int,
            ignore_environment: config.ignore_environment as c_int,
            isolate_site: config.isolate_site as c_int,
            optimize: config.optimize as c_int,
            write_compiled_files: config.write_compiled_files as c_int,
            threads: config.effective_threads() as c_int,
        };
        let rc = unsafe { (self.api.initialize)(&raw) };
        self.checked("vireo_initialize", rc)
    }

    fn acquire_lock(&mut self) {
        unsafe { (self.api.acquire_lock)() }
    }

    fn release_lock(&mut self) {
        unsafe { (self.api.release_lock)() }
    }

    fn clear_search_path(&mut self) {
        unsafe { (self.api.clear_search_path)() }
    }

    fn set_argv(&mut self, argv: &[String]) {
        let c_args: Vec<CString> = argv.iter().map(|a| c_string(a)).collect();
        let ptrs: Vec<*const c_char> = c_args.iter().map(|a| a.as_ptr()).collect();
        // The engine copies the vector during the call.
        unsafe { (self.api.set_argv)(ptrs.len() as c_int, ptrs.as_ptr()) }
    }

    fn set_executable(&mut self, path: &str) {
        let c_path = c_string(path);
        unsafe { (self.api.set_executable)(c_path.as_ptr()) }
    }

    fn unmarshal(&mut self, bytes: &[u8]) -> Result<Value, EngineError> {
        let ptr = unsafe { (self.api.unmarshal)(bytes.as_ptr(), bytes.len()) };
        self.owned("vireo_unmarshal", ptr)
    }

    fn load_unit(&mut self, bytes: &[u8]) -> Result<Value, EngineError> {
        let ptr = unsafe { (self.api.unit_load)(bytes.as_ptr(), bytes.len()) };
        self.owned("vireo_unit_load", ptr)
    }

    fn install_modules(&mut self, modules: &ModuleBundle) -> Result<Value, EngineError> {
        let map = self.owned("vireo_map_new", unsafe { (self.api.map_new)() })?;
        for (path, unit) in modules.iter() {
            let rc = unsafe {
                (self.api.map_set)(
                    as_ptr(map),
                    path.as_ptr(),
                    path.len(),
                    unit.as_ptr(),
                    unit.len(),
                )
            };
            if let Err(e) = self.checked("vireo_map_set", rc) {
                self.release(map);
                return Err(e);
            }
        }
        Ok(map)
    }

    fn register_module(&mut self, name: &str) -> Result<Value, EngineError> {
        let c_name = c_string(name);
        let ptr = unsafe { (self.api.module_register)(c_name.as_ptr()) };
        self.owned("vireo_module_register", ptr)
    }

    fn module_namespace(&mut self, module: Value) -> Result<Value, EngineError> {
        let ptr = unsafe { (self.api.module_namespace)(as_ptr(module)) };
        self.owned("vireo_module_namespace", ptr)
    }

    fn set_attr(
        &mut self,
        target: Value,
        name: &str,
        value: Attr,
    ) -> Result<(), EngineError> {
        let c_name = c_string(name);
        match value {
            Attr::Text(text) => {
                let c_text = c_string(&text);
                let rc = unsafe {
                    (self.api.attr_set_text)(
                        as_ptr(target),
                        c_name.as_ptr(),
                        c_text.as_ptr(),
                    )
                };
                self.checked("vireo_attr_set_text", rc)
            }
            Attr::TextList(items) => {
                let c_items: Vec<CString> = items.iter().map(|i| c_string(i)).collect();
                let ptrs: Vec<*const c_char> =
                    c_items.iter().map(|i| i.as_ptr()).collect();
                let rc = unsafe {
                    (self.api.attr_set_path)(
                        as_ptr(target),
                        c_name.as_ptr(),
                        ptrs.as_ptr(),
                        ptrs.len(),
                    )
                };
                self.checked("vireo_attr_set_path", rc)
            }
        }
    }

    fn inject_builtins(&mut self, namespace: Value) -> Result<(), EngineError> {
        let rc = unsafe { (self.api.builtins_inject)(as_ptr(namespace)) };
        self.checked("vireo_builtins_inject", rc)
    }

    fn eval_unit(&mut self, unit: Value, namespace: Value) -> Result<Value, EngineError> {
        let ptr = unsafe { (self.api.unit_eval)(as_ptr(unit), as_ptr(namespace)) };
        self.owned("vireo_unit_eval", ptr)
    }

    fn get_item(&mut self, namespace: Value, name: &str) -> Option<Value> {
        let c_name = c_string(name);
        let ptr = unsafe { (self.api.namespace_get)(as_ptr(namespace), c_name.as_ptr()) };
        if ptr.is_null() {
            None
        } else {
            Some(Value(ptr as usize))
        }
    }

    fn call_entry(
        &mut self,
        func: Value,
        debug: bool,
        config: Value,
        modules: Value,
    ) -> Result<Value, EngineError> {
        let ptr = unsafe {
            (self.api.entry_call)(
                as_ptr(func),
                debug as c_int,
                as_ptr(config),
                as_ptr(modules),
            )
        };
        self.owned("vireo_entry_call", ptr)
    }

    fn report_error(&mut self, error: &EngineError) {
        debug!("asking engine to surface: {}", error);
        // The engine owns the detailed error state; it prints to its own
        // standard error channel.
        unsafe { (self.api.error_print)() }
    }

    fn release(&mut self, value: Value) {
        unsafe { (self.api.release)(as_ptr(value)) }
    }

    fn finalize(&mut self) {
        debug!("finalizing engine");
        unsafe { (self.api.finalize)() }
    }
}
