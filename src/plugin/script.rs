//! SCRIPT plugin instances: a module in an embedded CPython interpreter.
//! Gated behind the `script` feature so the crate still builds on hosts
//! with no Python development headers.
//!
//! Grounded on `original_source`'s `python_loader.c`/`iec_python.h`
//! heritage; `pyo3`'s embedding API (`Python::with_gil`, `PyCapsule`)
//! stands in for the original's raw `Py_Initialize`/`PyObject*` plumbing.

use crate::plugin::config::Descriptor;
use crate::plugin::runtime_args::RuntimeArgs;
use crate::PluginError;
use pyo3::types::{PyCapsule, PyModule};
use pyo3::{PyErr, Python};
use std::os::raw::c_void;
use std::thread::JoinHandle;

/// A loaded SCRIPT plugin. Unlike [`crate::plugin::native::NativePlugin`]
/// it exposes no `cycle_start`/`cycle_end` — script plugins cannot meet
/// real-time deadlines and instead run on their own thread,
/// synchronizing through the image-table lock like any other non-scan
/// thread.
pub struct ScriptPlugin {
    name: String,
    module: pyo3::Py<PyModule>,
    has_start_loop: bool,
    has_stop_loop: bool,
    has_cleanup: bool,
    thread: Option<JoinHandle<()>>,
    pub running: bool,
}

fn to_plugin_error(name: &str, err: PyErr) -> PluginError {
    PluginError::ScriptFailed {
        name: name.to_owned(),
        source: err,
    }
}

impl ScriptPlugin {
    pub fn load(descriptor: &Descriptor) -> Result<Self, PluginError> {
        Python::with_gil(|py| {
            let sys_path = py
                .import("sys")
                .and_then(|m| m.getattr("path"))
                .map_err(|e| to_plugin_error(&descriptor.name, e))?;

            if let Some(dir) = descriptor.path.parent() {
                sys_path
                    .call_method1("insert", (0, dir.to_string_lossy().into_owned()))
                    .map_err(|e| to_plugin_error(&descriptor.name, e))?;
            }
            if let Some(env_path) = &descriptor.script_env_path {
                sys_path
                    .call_method1("insert", (0, env_path.to_string_lossy().into_owned()))
                    .map_err(|e| to_plugin_error(&descriptor.name, e))?;
            }

            let module_name = descriptor
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| descriptor.name.clone());

            let module = PyModule::import(py, module_name.as_str())
                .map_err(|e| to_plugin_error(&descriptor.name, e))?;

            if !module.hasattr("init").unwrap_or(false) {
                return Err(PluginError::MissingInit(descriptor.name.clone()));
            }

            Ok(Self {
                name: descriptor.name.clone(),
                has_start_loop: module.hasattr("start_loop").unwrap_or(false),
                has_stop_loop: module.hasattr("stop_loop").unwrap_or(false),
                has_cleanup: module.hasattr("cleanup").unwrap_or(false),
                module: module.into(),
                thread: None,
                running: false,
            })
        })
    }

    pub fn init(&self, args: &mut RuntimeArgs) -> Result<(), PluginError> {
        Python::with_gil(|py| {
            let capsule = PyCapsule::new(py, args.as_ptr() as *mut c_void, None)
                .map_err(|e| to_plugin_error(&self.name, e))?;
            self.module
                .as_ref(py)
                .call_method1("init", (capsule,))
                .map_err(|e| to_plugin_error(&self.name, e))?;
            Ok(())
        })
    }

    /// Spawn the plugin's cooperative thread. The Python
    /// `start_loop` function owns its own loop and is expected to return
    /// only after its corresponding `stop_loop` call asks it to.
    pub fn start(&mut self) {
        self.running = true;
        if !self.has_start_loop {
            return;
        }
        let module = self.module.clone();
        let name = self.name.clone();
        self.thread = Some(std::thread::spawn(move || {
            let result = Python::with_gil(|py| module.as_ref(py).call_method0("start_loop"));
            if let Err(err) = result {
                log::error!("script plugin {name} start_loop failed: {err}");
            }
        }));
    }

    pub fn stop(&mut self) {
        if self.has_stop_loop {
            let result =
                Python::with_gil(|py| self.module.as_ref(py).call_method0("stop_loop"));
            if let Err(err) = result {
                log::error!("script plugin {} stop_loop failed: {err}", self.name);
            }
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.running = false;
    }

    pub fn cleanup(&mut self) {
        if self.has_cleanup {
            let result = Python::with_gil(|py| self.module.as_ref(py).call_method0("cleanup"));
            if let Err(err) = result {
                log::error!("script plugin {} cleanup failed: {err}", self.name);
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
