//! Runtime-args factory: the opaque, `#[repr(C)]` handle every
//! plugin's `init` receives. Grounded on `plugin_driver.h`'s
//! `plugin_runtime_args_t` layout.

use crate::image::{ImageTables, BITS_PER_CELL, N};
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;

/// `int (*)(Lock*)`. Returns 0 on success, matching the C convention used
/// throughout the plugin ABI.
pub type LockTakeFn = unsafe extern "C" fn(*const c_void) -> c_int;
pub type LockGiveFn = unsafe extern "C" fn(*const c_void) -> c_int;

/// A single pre-formatted line; the runtime does the `printf`-style
/// formatting on the Rust side so the ABI stays a plain, non-variadic
/// `extern "C" fn` (a C `void(*)(const char*, ...)` has no sound Rust
/// equivalent without the unstable `c_variadic` feature — see DESIGN.md).
pub type LogFn = unsafe extern "C" fn(*const c_char);

use lock_api::RawMutex as _;

unsafe extern "C" fn lock_take_shim(lock: *const c_void) -> c_int {
    // SAFETY: `lock` is always a `&RawMutex` handed out by
    // `ImageTables::raw_mutex`, valid for the plugin instance's lifetime.
    let raw = unsafe { &*(lock as *const parking_lot::RawMutex) };
    raw.lock();
    0
}

unsafe extern "C" fn lock_give_shim(lock: *const c_void) -> c_int {
    // SAFETY: caller pairs this with a prior `lock_take` on the same
    // thread, per the plugin ABI contract.
    let raw = unsafe { &*(lock as *const parking_lot::RawMutex) };
    unsafe { raw.unlock() };
    0
}

extern "C" fn log_info_shim(msg: *const c_char) {
    log_shim(log::Level::Info, msg);
}
extern "C" fn log_debug_shim(msg: *const c_char) {
    log_shim(log::Level::Debug, msg);
}
extern "C" fn log_warn_shim(msg: *const c_char) {
    log_shim(log::Level::Warn, msg);
}
extern "C" fn log_error_shim(msg: *const c_char) {
    log_shim(log::Level::Error, msg);
}

fn log_shim(level: log::Level, msg: *const c_char) {
    if msg.is_null() {
        return;
    }
    // SAFETY: the plugin ABI requires a NUL-terminated string here.
    let cstr = unsafe { std::ffi::CStr::from_ptr(msg) };
    log::log!(level, "[plugin] {}", cstr.to_string_lossy());
}

const CONFIG_PATH_LEN: usize = 256;

/// Mirrors `plugin_runtime_args_t`: thirteen matrix bases, the lock
/// take/give function pointers plus the lock itself, the plugin's
/// `config_path`, the capacity constants, and four log callbacks.
#[repr(C)]
pub struct RuntimeArgs {
    pub bool_input: *mut [*mut bool; BITS_PER_CELL],
    pub bool_output: *mut [*mut bool; BITS_PER_CELL],
    pub byte_input: *mut *mut u8,
    pub byte_output: *mut *mut u8,
    pub int_input: *mut *mut u16,
    pub int_output: *mut *mut u16,
    pub dint_input: *mut *mut u32,
    pub dint_output: *mut *mut u32,
    pub lint_input: *mut *mut u64,
    pub lint_output: *mut *mut u64,
    pub int_memory: *mut *mut u16,
    pub dint_memory: *mut *mut u32,
    pub lint_memory: *mut *mut u64,
    pub lock_take: LockTakeFn,
    pub lock_give: LockGiveFn,
    pub image_lock: *const c_void,
    pub config_path: [c_char; CONFIG_PATH_LEN],
    pub capacity: c_int,
    pub bits_per_cell: c_int,
    pub log_info: LogFn,
    pub log_debug: LogFn,
    pub log_warn: LogFn,
    pub log_error: LogFn,
}

// SAFETY: every pointer field either points into `image` (kept alive by
// the `Arc<ImageTables>` the owning plugin instance holds) or at a
// `'static` shim function; the struct carries no thread-confined state.
unsafe impl Send for RuntimeArgs {}

impl RuntimeArgs {
    /// Build a handle valid for as long as `image` and the matrix bases it
    /// hands out stay alive, i.e. for the lifetime of the plugin instance.
    pub fn new(image: &ImageTables, config_path: &Path) -> Self {
        let mut tables = image.lock();
        let mut path_buf = [0 as c_char; CONFIG_PATH_LEN];
        if let Ok(c_path) = CString::new(config_path.to_string_lossy().as_bytes()) {
            let bytes = c_path.as_bytes_with_nul();
            let n = bytes.len().min(CONFIG_PATH_LEN);
            for (slot, byte) in path_buf.iter_mut().zip(bytes[..n].iter()) {
                *slot = *byte as c_char;
            }
        }

        Self {
            bool_input: tables.bool_input.as_mut_ptr().cast(),
            bool_output: tables.bool_output.as_mut_ptr().cast(),
            byte_input: tables.byte_input.as_mut_ptr().cast(),
            byte_output: tables.byte_output.as_mut_ptr().cast(),
            int_input: tables.int_input.as_mut_ptr().cast(),
            int_output: tables.int_output.as_mut_ptr().cast(),
            dint_input: tables.dint_input.as_mut_ptr().cast(),
            dint_output: tables.dint_output.as_mut_ptr().cast(),
            lint_input: tables.lint_input.as_mut_ptr().cast(),
            lint_output: tables.lint_output.as_mut_ptr().cast(),
            int_memory: tables.int_memory.as_mut_ptr().cast(),
            dint_memory: tables.dint_memory.as_mut_ptr().cast(),
            lint_memory: tables.lint_memory.as_mut_ptr().cast(),
            lock_take: lock_take_shim,
            lock_give: lock_give_shim,
            image_lock: (image.raw_mutex() as *const parking_lot::RawMutex).cast(),
            config_path: path_buf,
            capacity: N as c_int,
            bits_per_cell: BITS_PER_CELL as c_int,
            log_info: log_info_shim,
            log_debug: log_debug_shim,
            log_warn: log_warn_shim,
            log_error: log_error_shim,
        }
    }

    /// Raw pointer handed across the FFI boundary to a plugin's `init`.
    pub fn as_ptr(&mut self) -> *mut c_void {
        (self as *mut Self).cast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageTables;

    #[test]
    fn config_path_is_nul_terminated_and_truncated_safely() {
        let image = ImageTables::new();
        let args = RuntimeArgs::new(&image, Path::new("/etc/plc/plugin.cfg"));
        let cstr = unsafe { std::ffi::CStr::from_ptr(args.config_path.as_ptr()) };
        assert_eq!(cstr.to_str().unwrap(), "/etc/plc/plugin.cfg");
        assert_eq!(args.capacity, N as c_int);
        assert_eq!(args.bits_per_cell, BITS_PER_CELL as c_int);
    }
}
