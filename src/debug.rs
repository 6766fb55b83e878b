//! Debug/trace frame codec: a framed function-code
//! handler over the loaded artifact's variable metadata accessors.
//! Grounded on `original_source/core/src/plc_app/debug_handler.c`'s byte
//! layout; the transport (a socket server) stays external to this crate.

use crate::artifact::Artifact;
use std::os::raw::c_void;

const FN_INFO: u8 = 0x41;
const FN_SET_TRACE: u8 = 0x42;
const FN_GET_TRACE: u8 = 0x43;
const FN_GET_TRACE_LIST: u8 = 0x44;
const FN_GET_MD5: u8 = 0x45;

const STATUS_OK: u8 = 0x7E;
const STATUS_OUT_OF_BOUNDS: u8 = 0x81;
const STATUS_OUT_OF_MEMORY: u8 = 0x82;

/// `ext_set_endianness(SAME_ENDIANNESS)`/`ext_set_endianness(REVERSE_ENDIANNESS)`
/// in `debug_handler.c`'s `debugGetMd5`.
const SAME_ENDIANNESS: u8 = 0;
const REVERSE_ENDIANNESS: u8 = 1;

/// `debugGetTraceList`'s `VARIDX_SIZE`: the maximum number of indices a
/// single `GET_TRACE_LIST` request may name.
const VARIDX_SIZE: usize = 256;

/// Max total reply size, envelope included.
const MAX_FRAME: usize = 4096;
/// `fn(1) + status(1) + last_idx(2) + tick(4) + payload_len(2)`.
const ENVELOPE_LEN: usize = 10;
/// `debugSetTrace`'s bound on the caller-declared value length:
/// `MAX_DEBUG_FRAME - 7`.
const MAX_SET_TRACE_VALUE: usize = MAX_FRAME - 7;

/// Anything the debug-frame codec needs from a loaded program artifact.
/// A trait, rather than a direct `&Artifact` parameter, so the codec is
/// unit-testable without a real dynamically loaded library.
pub trait DebugTarget {
    fn var_count(&self) -> u16;
    fn var_size(&self, idx: usize) -> usize;
    fn var_addr(&self, idx: usize) -> *mut c_void;
    fn set_trace_forced(&self, idx: usize, forced: bool, bytes: &[u8]);
    fn set_endianness(&self, value: u8);
    fn md5(&self) -> &str;
    fn current_tick(&self) -> u64;
}

impl DebugTarget for Artifact {
    fn var_count(&self) -> u16 {
        Artifact::var_count(self)
    }
    fn var_size(&self, idx: usize) -> usize {
        Artifact::var_size(self, idx)
    }
    fn var_addr(&self, idx: usize) -> *mut c_void {
        Artifact::var_addr(self, idx)
    }
    fn set_trace_forced(&self, idx: usize, forced: bool, bytes: &[u8]) {
        Artifact::set_trace_forced(self, idx, forced, bytes)
    }
    fn set_endianness(&self, value: u8) {
        Artifact::set_endianness(self, value)
    }
    fn md5(&self) -> &str {
        Artifact::md5(self)
    }
    fn current_tick(&self) -> u64 {
        Artifact::current_tick(self)
    }
}

/// Read `len` bytes directly out of the artifact's own variable storage.
///
/// # Safety
/// Caller must hold the image-table lock: the pointer returned by
/// `var_addr` aliases program-owned memory the scan thread may be
/// writing concurrently otherwise.
unsafe fn read_var(target: &impl DebugTarget, idx: usize) -> Vec<u8> {
    let len = target.var_size(idx);
    let ptr = target.var_addr(idx) as *const u8;
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
}

fn envelope(status: u8, last_idx: u16, tick: u32, payload: &[u8]) -> Vec<u8> {
    let mut reply = Vec::with_capacity(ENVELOPE_LEN + payload.len());
    reply.push(FN_GET_TRACE); // overwritten by caller for 0x44
    reply.push(status);
    reply.extend_from_slice(&last_idx.to_be_bytes());
    reply.extend_from_slice(&tick.to_be_bytes());
    reply.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    reply.extend_from_slice(payload);
    reply
}

/// Copy every variable named by `indices` into the reply payload, stopping
/// (not erroring) the moment the next variable would push the reply past
/// `MAX_FRAME` — a silent truncation, exactly as `debugGetTrace`/
/// `debugGetTraceList`'s own capacity `break` does. Callers are required to
/// have already validated every index in `indices` is in range;
/// `initial_last_idx` seeds `last_idx` the way each original function does
/// (`debugGetTrace` seeds it with `startidx`, `debugGetTraceList` with `0`).
fn accumulate_trace(
    target: &impl DebugTarget,
    initial_last_idx: u16,
    indices: impl Iterator<Item = u16>,
) -> (Vec<u8>, u16) {
    let mut payload = Vec::new();
    let mut last_idx = initial_last_idx;
    for idx in indices {
        // SAFETY: the caller of `process_frame` is required to hold the
        // image-table lock for the duration of the call.
        let bytes = unsafe { read_var(target, idx as usize) };
        if ENVELOPE_LEN + payload.len() + bytes.len() > MAX_FRAME {
            break;
        }
        payload.extend_from_slice(&bytes);
        last_idx = idx;
    }
    (payload, last_idx)
}

fn trace_reply(fn_code: u8, target: &impl DebugTarget, payload: &[u8], last_idx: u16) -> Vec<u8> {
    let tick = target.current_tick() as u32;
    let mut reply = envelope(STATUS_OK, last_idx, tick, payload);
    reply[0] = fn_code;
    reply
}

fn error_reply(fn_code: u8, status: u8) -> Vec<u8> {
    vec![fn_code, status]
}

/// Decode and execute one debug-frame request, returning the encoded
/// reply. Caller must hold the image-table lock for the duration of this
/// call (the codec reads/writes live program variables).
pub fn process_frame(target: &impl DebugTarget, request: &[u8]) -> Vec<u8> {
    let Some((&fn_code, body)) = request.split_first() else {
        return Vec::new();
    };
    match fn_code {
        FN_INFO => {
            let count = target.var_count();
            vec![FN_INFO, (count >> 8) as u8, (count & 0xFF) as u8]
        }
        FN_SET_TRACE => {
            // Wire layout: varidx(2) + flag(1) + len(2) + value(len bytes),
            // matching `debugSetTrace`'s call site in `process_debug_data`.
            if body.len() < 5 {
                return error_reply(FN_SET_TRACE, STATUS_OUT_OF_BOUNDS);
            }
            let idx = u16::from_be_bytes([body[0], body[1]]);
            let forced = body[2] != 0;
            let len = u16::from_be_bytes([body[3], body[4]]) as usize;
            if idx >= target.var_count() || len > MAX_SET_TRACE_VALUE {
                return error_reply(FN_SET_TRACE, STATUS_OUT_OF_BOUNDS);
            }
            let Some(value) = body.get(5..5 + len) else {
                return error_reply(FN_SET_TRACE, STATUS_OUT_OF_BOUNDS);
            };
            target.set_trace_forced(idx as usize, forced, value);
            vec![FN_SET_TRACE, STATUS_OK]
        }
        FN_GET_TRACE => {
            if body.len() < 4 {
                return error_reply(FN_GET_TRACE, STATUS_OUT_OF_BOUNDS);
            }
            let start = u16::from_be_bytes([body[0], body[1]]);
            let end = u16::from_be_bytes([body[2], body[3]]);
            let count = target.var_count();
            if start >= count || end >= count || start > end {
                return error_reply(FN_GET_TRACE, STATUS_OUT_OF_BOUNDS);
            }
            let (payload, last_idx) = accumulate_trace(target, start, start..=end);
            trace_reply(FN_GET_TRACE, target, &payload, last_idx)
        }
        FN_GET_TRACE_LIST => {
            if body.len() < 2 {
                return error_reply(FN_GET_TRACE_LIST, STATUS_OUT_OF_BOUNDS);
            }
            let requested = u16::from_be_bytes([body[0], body[1]]) as usize;
            if requested > VARIDX_SIZE {
                return error_reply(FN_GET_TRACE_LIST, STATUS_OUT_OF_MEMORY);
            }
            let count = target.var_count();
            let mut indices = Vec::with_capacity(requested);
            for chunk in body[2..].chunks_exact(2).take(requested) {
                let idx = u16::from_be_bytes([chunk[0], chunk[1]]);
                if idx >= count {
                    return error_reply(FN_GET_TRACE_LIST, STATUS_OUT_OF_BOUNDS);
                }
                indices.push(idx);
            }
            let (payload, last_idx) = accumulate_trace(target, 0, indices.into_iter());
            trace_reply(FN_GET_TRACE_LIST, target, &payload, last_idx)
        }
        FN_GET_MD5 => {
            if body.len() < 2 {
                return error_reply(FN_GET_MD5, STATUS_OUT_OF_BOUNDS);
            }
            // The marker selects endianness (`debugGetMd5`): 0xDEAD keeps
            // native byte order, 0xADDE requests the reverse; anything
            // else is rejected rather than silently accepted.
            let marker = u16::from_be_bytes([body[0], body[1]]);
            match marker {
                0xDEAD => target.set_endianness(SAME_ENDIANNESS),
                0xADDE => target.set_endianness(REVERSE_ENDIANNESS),
                _ => return error_reply(FN_GET_MD5, STATUS_OUT_OF_BOUNDS),
            }
            let mut reply = vec![FN_GET_MD5, STATUS_OK];
            reply.extend_from_slice(target.md5().as_bytes());
            reply
        }
        _ => vec![fn_code, STATUS_OUT_OF_BOUNDS],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeTarget {
        count: u16,
        sizes: Vec<usize>,
        storage: RefCell<Vec<Vec<u8>>>,
        md5: String,
        tick: u64,
        endianness: RefCell<Option<u8>>,
    }

    impl DebugTarget for FakeTarget {
        fn var_count(&self) -> u16 {
            self.count
        }
        fn var_size(&self, idx: usize) -> usize {
            self.sizes[idx]
        }
        fn var_addr(&self, idx: usize) -> *mut c_void {
            self.storage.borrow_mut()[idx].as_mut_ptr().cast()
        }
        fn set_trace_forced(&self, idx: usize, _forced: bool, bytes: &[u8]) {
            self.storage.borrow_mut()[idx] = bytes.to_vec();
        }
        fn set_endianness(&self, value: u8) {
            *self.endianness.borrow_mut() = Some(value);
        }
        fn md5(&self) -> &str {
            &self.md5
        }
        fn current_tick(&self) -> u64 {
            self.tick
        }
    }

    fn fake() -> FakeTarget {
        FakeTarget {
            count: 7,
            sizes: vec![2; 7],
            storage: RefCell::new(vec![vec![0u8; 2]; 7]),
            md5: "deadbeefcafebabe0123456789abcdef".to_owned(),
            tick: 42,
            endianness: RefCell::new(None),
        }
    }

    #[test]
    fn info_round_trip_matches_scenario_5() {
        let target = fake();
        let reply = process_frame(&target, &[0x41]);
        assert_eq!(reply, vec![0x41, 0x00, 0x07]);
    }

    #[test]
    fn get_trace_envelope_length_matches_p9() {
        let target = fake();
        let reply = process_frame(&target, &[0x43, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(reply.len(), ENVELOPE_LEN + 2 + 2 + 2);
    }

    #[test]
    fn set_trace_then_get_trace_reads_back_forced_value() {
        let target = fake();
        // varidx=0x0001, flag=0x01 (forced), len=0x0002, value=AB CD.
        let set = process_frame(&target, &[0x42, 0x00, 0x01, 0x01, 0x00, 0x02, 0xAB, 0xCD]);
        assert_eq!(set, vec![0x42, STATUS_OK]);
        let reply = process_frame(&target, &[0x43, 0x00, 0x01, 0x00, 0x01]);
        let payload = &reply[ENVELOPE_LEN..];
        assert_eq!(payload, &[0xAB, 0xCD]);
    }

    #[test]
    fn set_trace_out_of_bounds_index_is_rejected() {
        let target = fake();
        let reply = process_frame(&target, &[0x42, 0xFF, 0xFF, 0x01, 0x00, 0x00]);
        assert_eq!(reply, vec![0x42, STATUS_OUT_OF_BOUNDS]);
    }

    #[test]
    fn set_trace_declared_length_longer_than_supplied_value_is_rejected() {
        let target = fake();
        // len=4 declared but only 2 bytes of value follow.
        let reply = process_frame(&target, &[0x42, 0x00, 0x00, 0x01, 0x00, 0x04, 0xAB, 0xCD]);
        assert_eq!(reply, vec![0x42, STATUS_OUT_OF_BOUNDS]);
    }

    #[test]
    fn get_md5_returns_artifact_identifier_and_selects_endianness() {
        let target = fake();
        let reply = process_frame(&target, &[0x45, 0xDE, 0xAD]);
        assert_eq!(&reply[2..], target.md5().as_bytes());
        assert_eq!(*target.endianness.borrow(), Some(SAME_ENDIANNESS));

        let reply = process_frame(&target, &[0x45, 0xAD, 0xDE]);
        assert_eq!(&reply[2..], target.md5().as_bytes());
        assert_eq!(*target.endianness.borrow(), Some(REVERSE_ENDIANNESS));
    }

    #[test]
    fn get_md5_rejects_unrecognized_marker() {
        let target = fake();
        let reply = process_frame(&target, &[0x45, 0x00, 0x00]);
        assert_eq!(reply, vec![0x45, STATUS_OUT_OF_BOUNDS]);
    }

    #[test]
    fn get_trace_list_honours_explicit_indices() {
        let target = fake();
        let reply = process_frame(&target, &[0x44, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03]);
        assert_eq!(reply[0], 0x44);
        let payload_len = u16::from_be_bytes([reply[8], reply[9]]) as usize;
        assert_eq!(payload_len, 4);
    }

    #[test]
    fn get_trace_rejects_out_of_range_end_index_instead_of_truncating() {
        let target = fake();
        let reply = process_frame(&target, &[0x43, 0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(reply, vec![0x43, STATUS_OUT_OF_BOUNDS]);
    }

    #[test]
    fn get_trace_list_rejects_any_out_of_range_index() {
        let target = fake();
        let reply = process_frame(&target, &[0x44, 0x00, 0x02, 0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(reply, vec![0x44, STATUS_OUT_OF_BOUNDS]);
    }

    #[test]
    fn get_trace_list_rejects_more_than_varidx_size_entries() {
        let target = fake();
        let mut request = vec![0x44];
        request.extend_from_slice(&257u16.to_be_bytes());
        let reply = process_frame(&target, &request);
        assert_eq!(reply, vec![0x44, STATUS_OUT_OF_MEMORY]);
    }
}
