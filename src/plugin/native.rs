//! NATIVE plugin instances: a dynamically loaded library exposing
//! `init(runtime_args) -> int` plus optional lifecycle and cycle hooks.
//! Grounded on `other_examples/.../crates-plugins-src-native.rs.rs`'s
//! `libloading` idiom, layered over the artifact loader's own RTLD_NOW
//! policy.

use crate::plugin::config::Descriptor;
use crate::plugin::runtime_args::RuntimeArgs;
use crate::PluginError;
use libloading::Library;
use std::os::raw::{c_int, c_void};

type InitFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type VoidFn = unsafe extern "C" fn();

/// A loaded NATIVE plugin. Optional hooks that the library does not export
/// are simply `None`; the driver's fan-out skips them.
pub struct NativePlugin {
    _lib: Library,
    name: String,
    init: InitFn,
    start_loop: Option<VoidFn>,
    stop_loop: Option<VoidFn>,
    cycle_start: Option<VoidFn>,
    cycle_end: Option<VoidFn>,
    cleanup: Option<VoidFn>,
    pub running: bool,
}

impl NativePlugin {
    pub fn load(descriptor: &Descriptor) -> Result<Self, PluginError> {
        let lib = unsafe {
            libloading::os::unix::Library::open(
                Some(&descriptor.path),
                libloading::os::unix::RTLD_NOW,
            )
        }
        .map(Library::from)
        .map_err(|source| PluginError::LoadFailed {
            name: descriptor.name.clone(),
            path: descriptor.path.clone(),
            source,
        })?;

        let init: InitFn = unsafe { lib.get(b"init") }
            .map(|sym| *sym)
            .map_err(|_| PluginError::MissingInit(descriptor.name.clone()))?;

        let optional = |name: &[u8]| -> Option<VoidFn> {
            unsafe { lib.get::<VoidFn>(name) }.ok().map(|sym| *sym)
        };

        Ok(Self {
            name: descriptor.name.clone(),
            start_loop: optional(b"start_loop"),
            stop_loop: optional(b"stop_loop"),
            cycle_start: optional(b"cycle_start"),
            cycle_end: optional(b"cycle_end"),
            cleanup: optional(b"cleanup"),
            init,
            running: false,
            _lib: lib,
        })
    }

    pub fn init(&self, args: &mut RuntimeArgs) -> Result<(), PluginError> {
        let code = unsafe { (self.init)(args.as_ptr()) };
        if code != 0 {
            return Err(PluginError::InitFailed {
                name: self.name.clone(),
                code,
            });
        }
        Ok(())
    }

    pub fn start(&mut self) {
        if let Some(f) = self.start_loop {
            unsafe { f() };
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        if let Some(f) = self.stop_loop {
            unsafe { f() };
        }
        self.running = false;
    }

    #[inline]
    pub fn cycle_start(&self) {
        if self.running {
            if let Some(f) = self.cycle_start {
                unsafe { f() };
            }
        }
    }

    #[inline]
    pub fn cycle_end(&self) {
        if self.running {
            if let Some(f) = self.cycle_end {
                unsafe { f() };
            }
        }
    }

    pub fn cleanup(&mut self) {
        if let Some(f) = self.cleanup {
            unsafe { f() };
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
