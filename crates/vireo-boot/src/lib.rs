//! Vireo in-memory bootstrap
//!
//! Brings a scripting runtime up entirely from memory: locates or loads
//! its native components, decompresses the embedded standard-library and
//! payload archives, and hands control to the payload's entry callable,
//! all without writing any artifact to disk.
//!
//! - **unpack**: archive decompression, scrub-on-drop buffers, region release
//! - **payload** / **bundle**: embedded slot probing and the two-part
//!   payload and module-table wire formats
//! - **deps**: ordered native-component bootstrap and the required-symbol
//!   table
//! - **engine** / **native**: the engine capability contract and its
//!   symbol-table-backed implementation
//! - **handoff**: the top-level bootstrap state machine
//! - **program**: executable identity and argument conventions

pub mod bundle;
pub mod deps;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod native;
pub mod payload;
pub mod program;
pub mod unpack;

pub use bundle::ModuleBundle;
pub use deps::{
    bootstrap_native, HostProbe, NativeComponent, NativeRuntime, OsProbe, SymbolTable,
};
pub use engine::{Attr, Engine, EngineError, InitConfig, Value};
pub use error::{BootError, DecompressError, PayloadError};
pub use handoff::{run_payload, BootOptions, Outcome, PayloadSource};
pub use native::{EngineApi, NativeEngine, REQUIRED_SYMBOLS};
pub use payload::{
    probe_config, split_payload, Payload, CONFIG_ABSENT, ENTRY_UNIT_PATH,
};
pub use program::{build_argv, program_name, PASS_ARGS_FLAG};
pub use unpack::{decompress, ScrubBuf, SCRUB_FILL};

use vireo_image::ImageFormat;

/// Run the whole bootstrap: native components, symbol table, engine
/// binding, payload handoff.
///
/// The convenience composition of [`bootstrap_native`],
/// [`NativeEngine::from_symbols`], and [`run_payload`]; callers with
/// their own [`Engine`] drive [`run_payload`] directly.
pub fn bootstrap(
    components: &[NativeComponent<'_>],
    format: &dyn ImageFormat,
    source: &mut PayloadSource<'_>,
    options: &BootOptions,
) -> Result<Outcome, BootError> {
    let native = bootstrap_native(components, &OsProbe, format, REQUIRED_SYMBOLS)?;
    let mut engine = NativeEngine::from_symbols(native.symbols())?;
    run_payload(&mut engine, source, options)
}
