//! Plugin driver: loads descriptors, resolves each plugin's
//! symbol set, and drives its lifecycle and per-cycle hooks. Grounded on
//! `original_source/core/src/drivers/plugin_driver.c`/`plugin_driver.h`.

pub mod config;
pub mod native;
pub mod runtime_args;
#[cfg(feature = "script")]
pub mod script;

use crate::image::ImageTables;
use crate::PluginError;
use config::{Descriptor, PluginKind};
use native::NativePlugin;
use parking_lot::Mutex;
use runtime_args::RuntimeArgs;
use std::path::PathBuf;
use std::sync::Arc;

enum Impl {
    Native(NativePlugin),
    #[cfg(feature = "script")]
    Script(script::ScriptPlugin),
}

impl Impl {
    fn name(&self) -> &str {
        match self {
            Impl::Native(p) => p.name(),
            #[cfg(feature = "script")]
            Impl::Script(p) => p.name(),
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Impl::Native(p) => p.running,
            #[cfg(feature = "script")]
            Impl::Script(p) => p.running,
        }
    }
}

struct Entry {
    descriptor: Descriptor,
    /// Pinned so the raw pointer a plugin received at `init` stays valid
    /// for the entry's whole lifetime.
    args: Option<Box<RuntimeArgs>>,
    instance: Option<Impl>,
}

/// Owner of every loaded plugin instance and the config path they were
/// last loaded from. One per [`crate::Runtime`].
pub struct PluginDriver {
    image: Arc<ImageTables>,
    entries: Mutex<Vec<Entry>>,
    config_path: Mutex<Option<PathBuf>>,
}

impl PluginDriver {
    pub fn new(image: Arc<ImageTables>) -> Self {
        Self {
            image,
            entries: Mutex::new(Vec::new()),
            config_path: Mutex::new(None),
        }
    }

    /// Parse up to 16 descriptors from `path` and remember it for
    /// `restart()`. Does not load or init anything yet.
    pub fn load_config(&self, path: &std::path::Path) -> Result<(), PluginError> {
        let descriptors = config::load(path)?;
        let mut entries = self.entries.lock();
        *entries = descriptors
            .into_iter()
            .map(|descriptor| Entry {
                descriptor,
                args: None,
                instance: None,
            })
            .collect();
        *self.config_path.lock() = Some(path.to_owned());
        Ok(())
    }

    /// Resolve symbols and call `init` for every enabled descriptor.
    /// A plugin whose load/init fails is skipped (and reported); the
    /// others still run.
    pub fn init(&self) -> Vec<PluginError> {
        let mut errors = Vec::new();
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if !entry.descriptor.enabled {
                continue;
            }
            let loaded = match entry.descriptor.kind {
                PluginKind::Native => NativePlugin::load(&entry.descriptor).map(Impl::Native),
                PluginKind::Script => load_script(&entry.descriptor),
            };
            let instance = match loaded {
                Ok(inst) => inst,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            let mut args = Box::new(RuntimeArgs::new(&self.image, &entry.descriptor.config_path));
            let init_result = match &instance {
                Impl::Native(p) => p.init(&mut args),
                #[cfg(feature = "script")]
                Impl::Script(p) => p.init(&mut args),
            };
            match init_result {
                Ok(()) => {
                    entry.instance = Some(instance);
                    entry.args = Some(args);
                }
                Err(err) => errors.push(err),
            }
        }
        errors
    }

    /// Start every successfully initialized plugin's loop.
    pub fn start(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if let Some(inst) = &mut entry.instance {
                match inst {
                    Impl::Native(p) => p.start(),
                    #[cfg(feature = "script")]
                    Impl::Script(p) => p.start(),
                }
            }
        }
    }

    /// Fan out to every running NATIVE plugin's `cycle_start`. Called from
    /// the scan thread while the image-table lock is held.
    pub fn cycle_start(&self) {
        let entries = self.entries.lock();
        for entry in entries.iter() {
            if let Some(Impl::Native(p)) = &entry.instance {
                p.cycle_start();
            }
        }
    }

    /// Fan out to every running NATIVE plugin's `cycle_end`.
    pub fn cycle_end(&self) {
        let entries = self.entries.lock();
        for entry in entries.iter() {
            if let Some(Impl::Native(p)) = &entry.instance {
                p.cycle_end();
            }
        }
    }

    /// Stop every running plugin's loop.
    pub fn stop(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if let Some(inst) = &mut entry.instance {
                if inst.is_running() {
                    match inst {
                        Impl::Native(p) => p.stop(),
                        #[cfg(feature = "script")]
                        Impl::Script(p) => p.stop(),
                    }
                }
            }
        }
    }

    /// `stop -> cleanup every instance -> load_config -> init -> start`.
    /// Reloads the descriptor file named by the last `load_config` call.
    pub fn restart(&self) -> Result<Vec<PluginError>, PluginError> {
        self.stop();
        self.cleanup_all();
        let path = self
            .config_path
            .lock()
            .clone()
            .ok_or_else(|| PluginError::MalformedDescriptor {
                line_no: 0,
                reason: "restart() called before any load_config()".to_owned(),
            })?;
        self.load_config(&path)?;
        let errors = self.init();
        self.start();
        Ok(errors)
    }

    /// Stop, cleanup, and drop every plugin instance (closes every library
    /// handle); the embedded scripting environment (if used) is torn down
    /// implicitly when the last `Py<PyModule>` handle drops.
    pub fn destroy(&self) {
        self.stop();
        self.cleanup_all();
        self.entries.lock().clear();
        *self.config_path.lock() = None;
    }

    fn cleanup_all(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if let Some(inst) = &mut entry.instance {
                match inst {
                    Impl::Native(p) => p.cleanup(),
                    #[cfg(feature = "script")]
                    Impl::Script(p) => p.cleanup(),
                }
            }
            entry.instance = None;
            entry.args = None;
        }
    }

    /// Names of every descriptor currently loaded, for diagnostics/tests.
    pub fn plugin_names(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }
}

#[cfg(feature = "script")]
fn load_script(descriptor: &Descriptor) -> Result<Impl, PluginError> {
    script::ScriptPlugin::load(descriptor).map(Impl::Script)
}

#[cfg(not(feature = "script"))]
fn load_script(descriptor: &Descriptor) -> Result<Impl, PluginError> {
    Err(PluginError::MissingInit(format!(
        "{} is a SCRIPT plugin but this build has no `script` feature",
        descriptor.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_populates_entries_without_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "p_off,./z.so,0,1,./z.cfg").unwrap();
        let driver = PluginDriver::new(Arc::new(ImageTables::new()));
        driver.load_config(file.path()).unwrap();
        assert_eq!(driver.plugin_names(), vec!["p_off".to_owned()]);
    }

    #[test]
    fn init_reports_load_failure_for_unresolvable_path_but_does_not_panic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "missing,./does_not_exist.so,1,1,./x.cfg").unwrap();
        let driver = PluginDriver::new(Arc::new(ImageTables::new()));
        driver.load_config(file.path()).unwrap();
        let errors = driver.init();
        assert_eq!(errors.len(), 1);
    }
}
