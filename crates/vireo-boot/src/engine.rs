//! The scripting engine as an external collaborator.
//!
//! The bootstrap never interprets compiled units itself; it drives an
//! engine through the capability trait below. The engine owns every
//! [`Value`] it hands out; this layer only threads handles through and
//! releases them on the paths it acquired them on.

use thiserror::Error;

/// Opaque handle to an engine-owned value.
///
/// Only meaningful to the engine that produced it, and only until that
/// engine is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub usize);

/// An attribute stamped onto a module object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    /// A text attribute
    Text(String),
    /// A list-of-text attribute (search paths)
    TextList(Vec<String>),
}

/// Engine-reported failure.
///
/// Whether it aborts the bootstrap depends on the stage: pre-handoff
/// stages treat it as fatal, evaluation and dispatch report and swallow
/// it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    /// Engine-provided description
    pub message: String,
}

impl EngineError {
    /// Wrap an engine-side message.
    pub fn new(message: impl Into<String>) -> Self {
        EngineError {
            message: message.into(),
        }
    }
}

/// Engine initialization parameters.
///
/// Applied only when the engine reports it is not yet initialized;
/// bootstrapping an initialized engine is an idempotent no-op.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Executable identity reported to scripts
    pub program_name: String,
    /// Install signal handlers (off when hosted as a shared object)
    pub install_signal_handlers: bool,
    /// Ignore environment variables that would alter engine behavior
    pub ignore_environment: bool,
    /// Skip host site-package directories
    pub isolate_site: bool,
    /// Optimization level for evaluated units
    pub optimize: u8,
    /// Allow the engine to write compiled files to disk
    pub write_compiled_files: bool,
    /// Worker threads (0 = one per CPU)
    pub threads: usize,
}

impl Default for InitConfig {
    fn default() -> Self {
        InitConfig {
            program_name: String::new(),
            install_signal_handlers: true,
            ignore_environment: true,
            isolate_site: true,
            optimize: 2,
            write_compiled_files: false,
            threads: 0,
        }
    }
}

impl InitConfig {
    /// Effective worker thread count.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

/// Capability contract the bootstrap drives the engine through.
///
/// The contract mirrors the handoff's needs exactly: initialize, accept
/// identity and arguments, deserialize opaque parcels, host a module
/// namespace, evaluate a compiled unit in it, and tear down.
///
/// Handle ownership: values returned by [`Engine::unmarshal`],
/// [`Engine::load_unit`], [`Engine::install_modules`],
/// [`Engine::eval_unit`], and [`Engine::call_entry`] are owned by the
/// caller and must be passed to [`Engine::release`] exactly once.
/// [`Engine::register_module`], [`Engine::module_namespace`], and
/// [`Engine::get_item`] hand out borrowed handles the engine keeps
/// ownership of.
pub trait Engine {
    /// Whether the engine's internals are already initialized.
    fn is_initialized(&self) -> bool;

    /// Initialize threading and core state. Called at most once per
    /// process by this layer.
    fn initialize(&mut self, config: &InitConfig) -> Result<(), EngineError>;

    /// Acquire the engine's global execution lock.
    fn acquire_lock(&mut self);

    /// Release the engine's global execution lock.
    fn release_lock(&mut self);

    /// Clear the engine's module search path so only in-memory modules
    /// resolve.
    fn clear_search_path(&mut self);

    /// Hand the argument vector to the engine. Never called with an
    /// empty vector.
    fn set_argv(&mut self, argv: &[String]);

    /// Report the executable identity to the engine.
    fn set_executable(&mut self, path: &str);

    /// Deserialize an opaque configuration parcel into an engine value.
    fn unmarshal(&mut self, bytes: &[u8]) -> Result<Value, EngineError>;

    /// Deserialize a compiled unit (header already stripped).
    fn load_unit(&mut self, bytes: &[u8]) -> Result<Value, EngineError>;

    /// Install a module mapping into the engine's registry and return a
    /// handle to it.
    fn install_modules(
        &mut self,
        modules: &crate::bundle::ModuleBundle,
    ) -> Result<Value, EngineError>;

    /// Register (or fetch) a top-level module by name.
    fn register_module(&mut self, name: &str) -> Result<Value, EngineError>;

    /// The namespace shared as both global and local scope of a module.
    fn module_namespace(&mut self, module: Value) -> Result<Value, EngineError>;

    /// Stamp an attribute onto a module object.
    fn set_attr(
        &mut self,
        target: Value,
        name: &str,
        value: Attr,
    ) -> Result<(), EngineError>;

    /// Expose the engine's built-in symbol table inside a namespace.
    fn inject_builtins(&mut self, namespace: Value) -> Result<(), EngineError>;

    /// Evaluate a compiled unit with `namespace` as both global and
    /// local scope.
    fn eval_unit(&mut self, unit: Value, namespace: Value)
        -> Result<Value, EngineError>;

    /// Look up a name in a namespace. `None` when absent.
    fn get_item(&mut self, namespace: Value, name: &str) -> Option<Value>;

    /// Invoke the entry callable positionally: absent session argument,
    /// debug flag, configuration value, module mapping.
    fn call_entry(
        &mut self,
        func: Value,
        debug: bool,
        config: Value,
        modules: Value,
    ) -> Result<Value, EngineError>;

    /// Surface a swallowed failure on the engine's standard error
    /// channel.
    fn report_error(&mut self, error: &EngineError);

    /// Drop a value handle acquired from any of the calls above.
    fn release(&mut self, value: Value);

    /// Shut the engine down. Called exactly once, last.
    fn finalize(&mut self);
}
