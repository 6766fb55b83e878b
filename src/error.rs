//! Error taxonomy for the PLC core, one enum per subsystem.
//!
//! Errors stay confined to the subsystem that raised them; only a
//! transition to [`crate::state::PlcState::Error`] is visible to external
//! callers, via [`crate::state::StateMachine::get_state`].

use std::path::PathBuf;
use thiserror::Error;

/// Artifact loading failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no libplc_* artifact found in {0}")]
    NotFound(PathBuf),
    #[error("artifact {path} is missing required symbol {symbol}")]
    MissingSymbol { path: PathBuf, symbol: &'static str },
    #[error("failed to open artifact {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

/// Plugin lifecycle failures, isolated to the plugin that raised them.
/// Other plugins keep running.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {0} exports no init symbol")]
    MissingInit(String),
    #[error("plugin {name} init() returned non-zero status {code}")]
    InitFailed { name: String, code: i32 },
    #[error("failed to load plugin {name} from {path}: {source}")]
    LoadFailed {
        name: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin descriptor file has too many entries (max {max})")]
    TooManyDescriptors { max: usize },
    #[error("malformed plugin descriptor line {line_no}: {reason}")]
    MalformedDescriptor { line_no: usize, reason: String },
    #[cfg(feature = "script")]
    #[error("script plugin {name} failed: {source}")]
    ScriptFailed {
        name: String,
        #[source]
        source: pyo3::PyErr,
    },
}

/// `set_state` rejects any transition outside the documented lifecycle table.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid state transition")]
    InvalidTransition,
}

/// An OS-level lock primitive failure. Fatal: the process cannot make
/// progress once a lock is unrecoverable.
#[derive(Debug, Error)]
#[error("fatal lock failure: {0}")]
pub struct FatalError(pub String);
