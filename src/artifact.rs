//! Loads a single program artifact: a dynamically loadable library
//! exporting a fixed symbol set (`config_init__`, `config_run__`,
//! `glueVars`, `updateTime`, `setBufferPointers`, the
//! `common_ticktime__`/`plc_program_md5` globals, and the debug
//! accessors).
//!
//! Grounded on `original_source/core/src/plc_app/plc_main.c` and
//! `plcapp_manager.c` (immediate `dlopen`/`dlsym` resolution of a fixed
//! symbol table), loaded over `libloading` the same way native plugins are.

use crate::image::Tables;
use crate::LoadError;
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

type ConfigRunFn = unsafe extern "C" fn(u64);
type ConfigInitFn = unsafe extern "C" fn();
type GlueVarsFn = unsafe extern "C" fn();
type UpdateTimeFn = unsafe extern "C" fn();
#[rustfmt::skip]
type SetBufferPointersFn = unsafe extern "C" fn(
    *mut [*mut bool; 8], *mut [*mut bool; 8],
    *mut *mut u8, *mut *mut u8,
    *mut *mut u16, *mut *mut u16,
    *mut *mut u32, *mut *mut u32,
    *mut *mut u64, *mut *mut u64,
    *mut *mut u16, *mut *mut u32, *mut *mut u64,
);
type SetEndiannessFn = unsafe extern "C" fn(u8);
type GetVarCountFn = unsafe extern "C" fn() -> u16;
type GetVarSizeFn = unsafe extern "C" fn(usize) -> usize;
type GetVarAddrFn = unsafe extern "C" fn(usize) -> *mut c_void;
type SetTraceFn = unsafe extern "C" fn(usize, c_int, *mut c_void);

/// An opened, symbol-resolved program artifact. Drops the underlying
/// library on drop, which is only safe to do after the caller has stopped
/// the scan thread and called [`crate::image::ImageTables::clear`].
pub struct Artifact {
    _lib: Library,
    config_run: ConfigRunFn,
    config_init: ConfigInitFn,
    glue_vars: GlueVarsFn,
    update_time: UpdateTimeFn,
    set_endianness: SetEndiannessFn,
    get_var_count: GetVarCountFn,
    get_var_size: GetVarSizeFn,
    get_var_addr: GetVarAddrFn,
    set_trace: SetTraceFn,
    tick_time_ns: u64,
    md5: String,
    path: PathBuf,
    current_tick: AtomicU64,
    /// Forced-trace value buffers, keyed by variable index, kept alive for
    /// as long as the artifact has them bound via `set_trace` (the debug
    /// protocol's `SET_TRACE`). Replacing an entry drops the previous
    /// buffer.
    trace_buffers: Mutex<HashMap<usize, Box<[u8]>>>,
}

macro_rules! resolve {
    ($lib:expr, $path:expr, $name:literal) => {
        unsafe {
            match $lib.get($name.as_bytes()) {
                Ok(sym) => *sym,
                Err(_) => {
                    return Err(LoadError::MissingSymbol {
                        path: $path.to_owned(),
                        symbol: $name,
                    })
                }
            }
        }
    };
}

impl Artifact {
    /// Open `path` with immediate symbol resolution, bind the image-table
    /// bases via `setBufferPointers`, then run `config_init__`/`glueVars`.
    pub fn load(path: &Path, tables: &mut Tables) -> Result<Self, LoadError> {
        // RTLD_NOW: immediate, not lazy, symbol resolution.
        let lib = unsafe {
            libloading::os::unix::Library::open(
                Some(path),
                libloading::os::unix::RTLD_NOW,
            )
        }
        .map(Library::from)
        .map_err(|source| LoadError::OpenFailed {
            path: path.to_owned(),
            source,
        })?;

        let config_run: ConfigRunFn = resolve!(lib, path, "config_run__");
        let config_init: ConfigInitFn = resolve!(lib, path, "config_init__");
        let glue_vars: GlueVarsFn = resolve!(lib, path, "glueVars");
        let update_time: UpdateTimeFn = resolve!(lib, path, "updateTime");
        let set_buffer_pointers: SetBufferPointersFn = resolve!(lib, path, "setBufferPointers");
        let set_endianness: SetEndiannessFn = resolve!(lib, path, "set_endianness");
        let get_var_count: GetVarCountFn = resolve!(lib, path, "get_var_count");
        let get_var_size: GetVarSizeFn = resolve!(lib, path, "get_var_size");
        let get_var_addr: GetVarAddrFn = resolve!(lib, path, "get_var_addr");
        let set_trace: SetTraceFn = resolve!(lib, path, "set_trace");

        let tick_time_ns: u64 = unsafe {
            let sym: Symbol<'_, *const u64> = lib
                .get(b"common_ticktime__")
                .map_err(|_| LoadError::MissingSymbol {
                    path: path.to_owned(),
                    symbol: "common_ticktime__",
                })?;
            **sym
        };
        let md5: String = unsafe {
            let sym: Symbol<'_, *const *const i8> =
                lib.get(b"plc_program_md5").map_err(|_| LoadError::MissingSymbol {
                    path: path.to_owned(),
                    symbol: "plc_program_md5",
                })?;
            CStr::from_ptr(**sym).to_string_lossy().into_owned()
        };

        // Hand the thirteen matrix bases to the artifact in the fixed
        // order `setBufferPointers` expects; it writes its own variable
        // addresses into them.
        unsafe {
            set_buffer_pointers(
                tables.bool_input.as_mut_ptr().cast(),
                tables.bool_output.as_mut_ptr().cast(),
                tables.byte_input.as_mut_ptr().cast(),
                tables.byte_output.as_mut_ptr().cast(),
                tables.int_input.as_mut_ptr().cast(),
                tables.int_output.as_mut_ptr().cast(),
                tables.dint_input.as_mut_ptr().cast(),
                tables.dint_output.as_mut_ptr().cast(),
                tables.lint_input.as_mut_ptr().cast(),
                tables.lint_output.as_mut_ptr().cast(),
                tables.int_memory.as_mut_ptr().cast(),
                tables.dint_memory.as_mut_ptr().cast(),
                tables.lint_memory.as_mut_ptr().cast(),
            );
            config_init();
            glue_vars();
        }

        Ok(Self {
            _lib: lib,
            config_run,
            config_init,
            glue_vars,
            update_time,
            set_endianness,
            get_var_count,
            get_var_size,
            get_var_addr,
            set_trace,
            tick_time_ns,
            md5,
            path: path.to_owned(),
            current_tick: AtomicU64::new(0),
            trace_buffers: Mutex::new(HashMap::new()),
        })
    }

    /// Artifact discovery policy: if `path` is a directory,
    /// pick the first entry named `libplc_*` with a loadable-library
    /// suffix for the host; if `path` is itself a file, use it directly.
    pub fn discover(path: &Path) -> Result<PathBuf, LoadError> {
        if path.is_file() {
            return Ok(path.to_owned());
        }
        let suffix = std::env::consts::DLL_SUFFIX;
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|_| LoadError::NotFound(path.to_owned()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("libplc_") && n.ends_with(suffix))
            })
            .collect();
        entries.sort();
        entries
            .into_iter()
            .next()
            .ok_or_else(|| LoadError::NotFound(path.to_owned()))
    }

    #[inline]
    pub fn tick_time_ns(&self) -> u64 {
        self.tick_time_ns
    }

    #[inline]
    pub fn md5(&self) -> &str {
        &self.md5
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One scan iteration. Caller must hold the image-table lock.
    #[inline]
    pub fn run(&self, tick: u64) {
        unsafe { (self.config_run)(tick) };
        self.current_tick.store(tick, Ordering::Release);
    }

    /// The tick value passed to the most recent `config_run__` call, used
    /// by the debug/trace frame codec.
    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Acquire)
    }

    /// Advance the artifact's internal clocks. Caller
    /// must hold the image-table lock.
    #[inline]
    pub fn update_time(&self) {
        unsafe { (self.update_time)() };
    }

    /// Re-run the artifact's init sequence. Exposed for completeness;
    /// `load` already calls this once.
    #[inline]
    #[allow(dead_code)]
    pub fn reinit(&self) {
        unsafe {
            (self.config_init)();
            (self.glue_vars)();
        }
    }

    #[inline]
    pub fn set_endianness(&self, value: u8) {
        unsafe { (self.set_endianness)(value) };
    }

    #[inline]
    pub fn var_count(&self) -> u16 {
        unsafe { (self.get_var_count)() }
    }

    #[inline]
    pub fn var_size(&self, idx: usize) -> usize {
        unsafe { (self.get_var_size)(idx) }
    }

    #[inline]
    pub fn var_addr(&self, idx: usize) -> *mut c_void {
        unsafe { (self.get_var_addr)(idx) }
    }

    #[inline]
    pub fn set_trace(&self, idx: usize, forced: bool, value: *mut c_void) {
        let flag: c_int = if forced { 1 } else { 0 };
        unsafe { (self.set_trace)(idx, flag, value) };
    }

    /// `SET_TRACE`: force variable `idx` to `bytes`, keeping the
    /// buffer alive for as long as the artifact holds a pointer to it.
    /// Passing `forced = false` releases the previous buffer, if any.
    pub fn set_trace_forced(&self, idx: usize, forced: bool, bytes: &[u8]) {
        let mut buffers = self.trace_buffers.lock();
        if forced {
            let mut boxed: Box<[u8]> = bytes.to_vec().into_boxed_slice();
            let ptr = boxed.as_mut_ptr().cast();
            buffers.insert(idx, boxed);
            self.set_trace(idx, true, ptr);
        } else {
            buffers.remove(&idx);
            self.set_trace(idx, false, std::ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_prefers_a_direct_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libplc_custom.so");
        std::fs::write(&file, b"").unwrap();
        assert_eq!(Artifact::discover(&file).unwrap(), file);
    }

    #[test]
    fn discover_picks_first_matching_entry_in_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libplc_b.so"), b"").unwrap();
        std::fs::write(dir.path().join("libplc_a.so"), b"").unwrap();
        std::fs::write(dir.path().join("not_a_plc.so"), b"").unwrap();
        let found = Artifact::discover(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "libplc_a.so");
    }

    #[test]
    fn discover_reports_not_found_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Artifact::discover(dir.path()),
            Err(LoadError::NotFound(_))
        ));
    }
}
