//! End-to-end tests over the public `Runtime` API. No dynamically loadable
//! artifact is compiled for these tests (that would require the Rust
//! toolchain to build a `cdylib` fixture); instead these exercise every
//! path reachable without one: the "no artifact present" lifecycle, plugin
//! descriptor loading against a NATIVE plugin that genuinely fails to
//! resolve, and the debug-frame accessor with no artifact loaded.

use plc_core::{PlcState, Runtime, RuntimeConfig};
use std::io::Write;

fn config(program_path: std::path::PathBuf) -> RuntimeConfig {
    RuntimeConfig {
        program_path,
        plugin_descriptor_path: None,
        thread_affinity: None,
        stack_size: None,
        autostart: false,
    }
}

#[test]
fn boots_stopped_and_stays_stopped_without_autostart() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(&config(dir.path().to_owned()));
    assert_eq!(runtime.state().get_state(), PlcState::Stopped);
}

#[test]
fn start_against_an_empty_directory_moves_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(&config(dir.path().to_owned()));
    assert!(!runtime.state().set_state(PlcState::Running));
    assert_eq!(runtime.state().get_state(), PlcState::Empty);
    // image tables were never bound, so they must still read as all-null.
    assert!(runtime.image().all_null());
}

#[test]
fn debug_frame_is_none_without_a_loaded_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(&config(dir.path().to_owned()));
    assert_eq!(runtime.process_debug_frame(&[0x41]), None);
}

#[test]
fn plugin_descriptor_with_three_entries_skips_the_disabled_one() {
    let program_dir = tempfile::tempdir().unwrap();
    let mut descriptor_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(descriptor_file, "# test").unwrap();
    writeln!(descriptor_file, "p_native,./does_not_exist.so,1,1,./x.cfg").unwrap();
    writeln!(descriptor_file, "p_off,./does_not_exist.so,0,1,./z.cfg").unwrap();

    let mut cfg = config(program_dir.path().to_owned());
    cfg.plugin_descriptor_path = Some(descriptor_file.path().to_owned());
    let runtime = Runtime::new(&cfg);

    // Both descriptors parsed; the disabled one is never resolved/init'd,
    // the enabled one fails to load (no such library) and is reported, not
    // fatal to runtime construction.
    assert_eq!(
        runtime.plugins().plugin_names(),
        vec!["p_native".to_owned(), "p_off".to_owned()]
    );
}

#[test]
fn stopping_an_already_stopped_runtime_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(&config(dir.path().to_owned()));
    assert!(!runtime.state().set_state(PlcState::Stopped));
    assert_eq!(runtime.state().get_state(), PlcState::Stopped);
}
