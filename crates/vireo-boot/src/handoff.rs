//! Runtime bootstrap and payload handoff.
//!
//! Drives the engine through a single linear sequence: initialize, probe
//! and decompress the embedded configuration, decompress the standard
//! library, merge the payload's module overlay, evaluate the entry unit
//! inside a synthetic module, dispatch its entry callable, tear down.
//!
//! Every stage before the payload reaches the engine is fail-fast; a
//! failure jumps straight to teardown of whatever was already acquired.
//! Evaluation and dispatch are fail-soft: errors are surfaced through
//! the engine's own error channel and swallowed so teardown still runs.
//! Teardown executes exactly once on every path.

use log::{debug, error};

use crate::bundle::ModuleBundle;
use crate::engine::{Attr, Engine, EngineError, InitConfig, Value};
use crate::error::{BootError, PayloadError};
use crate::payload::{
    probe_config, split_payload, APP_MODULE, APP_ORIGIN, APP_SEARCH_PATH,
    CONFIG_HEADER_LEN, ENTRY_FUNCTION, ENTRY_HEADER_LEN, ENTRY_UNIT_PATH,
    MAX_PAYLOAD_SIZE,
};
use crate::program::{build_argv, program_name};
use crate::unpack::{decompress, release_region, scrub};

/// The embedded regions the handoff consumes.
///
/// Threads what used to be process-global slots through the pipeline as
/// an explicit value.
pub struct PayloadSource<'a> {
    /// Configuration slot: 4-byte size field plus compressed body
    pub config_slot: &'a mut [u8],
    /// Compressed standard-library archive
    pub stdlib: &'a [u8],
    /// Decompression bound for the standard-library archive
    pub stdlib_unpacked_size: usize,
}

/// Options for one bootstrap run.
#[derive(Debug, Clone)]
pub struct BootOptions {
    /// Raw process arguments
    pub args: Vec<String>,
    /// Whether the process entered through a loadable shared image
    pub is_shared: bool,
    /// Debug flag forwarded to the entry callable
    pub debug: bool,
    /// Engine initialization parameters
    pub init: InitConfig,
}

impl Default for BootOptions {
    fn default() -> Self {
        BootOptions {
            args: Vec::new(),
            is_shared: false,
            debug: cfg!(debug_assertions),
            init: InitConfig::default(),
        }
    }
}

/// How a completed handoff ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The payload was evaluated and dispatched
    Ran,
    /// The absent sentinel was embedded: nothing to run, not an error
    NoPayload,
}

/// Engine values still owned when a stage fails; released by teardown.
#[derive(Default)]
struct Acquired {
    config: Option<Value>,
    modules: Option<Value>,
    unit: Option<Value>,
}

/// Run the embedded payload to completion.
///
/// Initializes the engine (a no-op if the process already did),
/// acquires its execution lock, walks the handoff stages, and tears
/// down exactly once no matter which stage failed.
pub fn run_payload(
    engine: &mut dyn Engine,
    source: &mut PayloadSource<'_>,
    options: &BootOptions,
) -> Result<Outcome, BootError> {
    if !engine.is_initialized() {
        engine.clear_search_path();
        let mut init = options.init.clone();
        if init.program_name.is_empty() {
            init.program_name = program_name().to_string();
        }
        init.install_signal_handlers = !options.is_shared;
        engine.initialize(&init)?;
    }

    engine.acquire_lock();

    let argv = build_argv(&options.args, options.is_shared);
    if !argv.is_empty() {
        engine.set_argv(&argv);
    }
    engine.set_executable(program_name());

    let mut acquired = Acquired::default();
    let result = run_stages(engine, source, options, &mut acquired);

    // Teardown. Release in reverse acquisition order, then the lock,
    // then the engine itself.
    if let Some(unit) = acquired.unit.take() {
        engine.release(unit);
    }
    if let Some(modules) = acquired.modules.take() {
        engine.release(modules);
    }
    if let Some(config) = acquired.config.take() {
        engine.release(config);
    }
    engine.release_lock();
    engine.finalize();

    result
}

fn run_stages(
    engine: &mut dyn Engine,
    source: &mut PayloadSource<'_>,
    options: &BootOptions,
    acquired: &mut Acquired,
) -> Result<Outcome, BootError> {
    // ConfigProbe
    let Some(compressed_len) = probe_config(source.config_slot)? else {
        debug!("no embedded configuration");
        return Ok(Outcome::NoPayload);
    };
    debug!("configuration: {} compressed bytes", compressed_len);

    // ConfigDecompress
    let used = CONFIG_HEADER_LEN + compressed_len;
    let parcel = decompress(
        &source.config_slot[CONFIG_HEADER_LEN..used],
        MAX_PAYLOAD_SIZE,
    )?;
    let payload = split_payload(&parcel)?;
    let config = engine.unmarshal(&payload.config)?;
    acquired.config = Some(config);

    // The slot's bytes are single-use; blank them the moment the engine
    // holds the configuration.
    scrub(&mut source.config_slot[..used]);
    drop(parcel);

    // StdlibDecompress
    let stdlib_raw = decompress(source.stdlib, source.stdlib_unpacked_size)?;
    let mut bundle = ModuleBundle::decode(&stdlib_raw)?;
    drop(stdlib_raw);
    release_region(source.stdlib);
    release_region(source.config_slot);
    debug!("standard library: {} modules", bundle.len());

    // Merge
    debug!("overlaying {} payload modules", payload.overlay.len());
    bundle.overlay(payload.overlay);

    let module = engine.register_module(APP_MODULE)?;
    engine.set_attr(module, "__file__", Attr::Text(APP_ORIGIN.to_string()))?;
    engine.set_attr(module, "__package__", Attr::Text(APP_MODULE.to_string()))?;
    engine.set_attr(
        module,
        "__path__",
        Attr::TextList(vec![APP_SEARCH_PATH.to_string()]),
    )?;

    // EntryExtract
    let entry = bundle
        .remove(ENTRY_UNIT_PATH)
        .ok_or_else(|| PayloadError::MissingEntryUnit(ENTRY_UNIT_PATH.to_string()))?;
    if entry.len() < ENTRY_HEADER_LEN {
        return Err(PayloadError::ShortEntryUnit.into());
    }
    let unit = engine.load_unit(&entry[ENTRY_HEADER_LEN..])?;
    acquired.unit = Some(unit);

    let modules = engine.install_modules(&bundle)?;
    acquired.modules = Some(modules);

    let namespace = engine.module_namespace(module)?;
    engine.inject_builtins(namespace)?;

    // Evaluate. Best effort from here on.
    match engine.eval_unit(unit, namespace) {
        Ok(result) => engine.release(result),
        Err(e) => {
            error!("payload evaluation failed: {}", e);
            engine.report_error(&e);
        }
    }
    if let Some(unit) = acquired.unit.take() {
        engine.release(unit);
    }

    // Dispatch
    match engine.get_item(namespace, ENTRY_FUNCTION) {
        Some(entry_fn) => {
            debug!("dispatching {}", ENTRY_FUNCTION);
            match engine.call_entry(entry_fn, options.debug, config, modules) {
                Ok(result) => engine.release(result),
                Err(e) => {
                    error!("entry dispatch failed: {}", e);
                    engine.report_error(&e);
                }
            }
        }
        None => {
            let e = EngineError::new(format!(
                "entry callable '{}' not found in {}",
                ENTRY_FUNCTION, APP_MODULE
            ));
            error!("{}", e);
            engine.report_error(&e);
        }
    }

    Ok(Outcome::Ran)
}
