//! The shared process image: thirteen fixed-capacity pointer matrices and
//! the single lock that serializes all access to them.

use crate::cell::Cell;
use parking_lot::{MappedMutexGuard, Mutex};

/// Fixed image-table capacity.
pub const N: usize = 1024;

/// Bits packed per boolean byte-cell.
pub const BITS_PER_CELL: usize = 8;

/// The thirteen pointer matrices, guarded as one unit. Plain data, no
/// locking of its own — callers always reach it through
/// [`ImageTables::lock`].
pub struct Tables {
    pub bool_input: [[Cell<bool>; BITS_PER_CELL]; N],
    pub bool_output: [[Cell<bool>; BITS_PER_CELL]; N],
    pub byte_input: [Cell<u8>; N],
    pub byte_output: [Cell<u8>; N],
    pub int_input: [Cell<u16>; N],
    pub int_output: [Cell<u16>; N],
    pub dint_input: [Cell<u32>; N],
    pub dint_output: [Cell<u32>; N],
    pub lint_input: [Cell<u64>; N],
    pub lint_output: [Cell<u64>; N],
    pub int_memory: [Cell<u16>; N],
    pub dint_memory: [Cell<u32>; N],
    pub lint_memory: [Cell<u64>; N],
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            bool_input: std::array::from_fn(|_| std::array::from_fn(|_| Cell::null())),
            bool_output: std::array::from_fn(|_| std::array::from_fn(|_| Cell::null())),
            byte_input: std::array::from_fn(|_| Cell::null()),
            byte_output: std::array::from_fn(|_| Cell::null()),
            int_input: std::array::from_fn(|_| Cell::null()),
            int_output: std::array::from_fn(|_| Cell::null()),
            dint_input: std::array::from_fn(|_| Cell::null()),
            dint_output: std::array::from_fn(|_| Cell::null()),
            lint_input: std::array::from_fn(|_| Cell::null()),
            lint_output: std::array::from_fn(|_| Cell::null()),
            int_memory: std::array::from_fn(|_| Cell::null()),
            dint_memory: std::array::from_fn(|_| Cell::null()),
            lint_memory: std::array::from_fn(|_| Cell::null()),
        }
    }
}

/// Scratch storage backing the "fill-null-pointers" policy. Reallocated on
/// every [`ImageTables::fill_null_pointers`] call rather than kept across
/// reloads: a stale scratch cell from a previous artifact must never be
/// mistaken for one owned by the newly loaded one.
#[derive(Default)]
struct Scratch {
    bools: Vec<Box<bool>>,
    bytes: Vec<Box<u8>>,
    ints: Vec<Box<u16>>,
    dints: Vec<Box<u32>>,
    lints: Vec<Box<u64>>,
}

struct Inner {
    tables: Tables,
    scratch: Scratch,
}

/// Owner of the process image and its lock.
pub struct ImageTables {
    inner: Mutex<Inner>,
}

impl Default for ImageTables {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageTables {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: Tables::default(),
                scratch: Scratch::default(),
            }),
        }
    }

    /// Acquire the image-table lock. Releasing is implicit: dropping the
    /// returned guard is "unlock" (spec §4.1's `lock()`/`unlock()` pair,
    /// expressed as RAII rather than a manual release call).
    pub fn lock(&self) -> MappedMutexGuard<'_, Tables> {
        parking_lot::MutexGuard::map(self.inner.lock(), |i| &mut i.tables)
    }

    /// The raw, manually lockable half of the mutex, handed to native
    /// plugins as the `lock_take`/`lock_give` target. Plugin code that calls these functions is
    /// trusted to pair every take with a give on the same thread.
    pub fn raw_mutex(&self) -> &parking_lot::RawMutex {
        // SAFETY: `raw()` just exposes the mutex's own raw-lock half; no
        // unsafety beyond what parking_lot itself performs.
        unsafe { self.inner.raw() }
    }

    /// After the artifact's `setBufferPointers` has populated every cell
    /// the program uses, point every still-null cell at a fresh
    /// runtime-owned scratch cell so downstream code never needs a null
    /// check.
    pub fn fill_null_pointers(&self) {
        let mut guard = self.inner.lock();
        let Inner { tables, scratch } = &mut *guard;
        *scratch = Scratch::default();

        macro_rules! fill {
            ($matrix:expr, $pool:expr, $default:expr) => {
                for cell in $matrix.iter_mut() {
                    if cell.is_null() {
                        let mut boxed = Box::new($default);
                        // SAFETY: `boxed` outlives the cell: it is moved
                        // into `scratch`, which is only cleared together
                        // with the cells that reference it (unbind/clear).
                        unsafe {
                            cell.bind(&mut *boxed as *mut _);
                        }
                        $pool.push(boxed);
                    }
                }
            };
        }
        for row in tables.bool_input.iter_mut() {
            fill!(row, scratch.bools, false);
        }
        for row in tables.bool_output.iter_mut() {
            fill!(row, scratch.bools, false);
        }
        fill!(tables.byte_input, scratch.bytes, 0u8);
        fill!(tables.byte_output, scratch.bytes, 0u8);
        fill!(tables.int_input, scratch.ints, 0u16);
        fill!(tables.int_output, scratch.ints, 0u16);
        fill!(tables.dint_input, scratch.dints, 0u32);
        fill!(tables.dint_output, scratch.dints, 0u32);
        fill!(tables.lint_input, scratch.lints, 0u64);
        fill!(tables.lint_output, scratch.lints, 0u64);
        fill!(tables.int_memory, scratch.ints, 0u16);
        fill!(tables.dint_memory, scratch.dints, 0u32);
        fill!(tables.lint_memory, scratch.lints, 0u64);
    }

    /// Revert every cell reference to null and drop the scratch pool.
    /// Must run before the artifact handle that owns the program-side
    /// cells is dropped.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        let Inner { tables, scratch } = &mut *guard;

        macro_rules! clear_all {
            ($matrix:expr) => {
                for cell in $matrix.iter_mut() {
                    cell.unbind();
                }
            };
        }
        for row in tables.bool_input.iter_mut() {
            clear_all!(row);
        }
        for row in tables.bool_output.iter_mut() {
            clear_all!(row);
        }
        clear_all!(tables.byte_input);
        clear_all!(tables.byte_output);
        clear_all!(tables.int_input);
        clear_all!(tables.int_output);
        clear_all!(tables.dint_input);
        clear_all!(tables.dint_output);
        clear_all!(tables.lint_input);
        clear_all!(tables.lint_output);
        clear_all!(tables.int_memory);
        clear_all!(tables.dint_memory);
        clear_all!(tables.lint_memory);
        *scratch = Scratch::default();
    }

    /// True iff every cell in every matrix is currently bound (non-null).
    pub fn all_bound(&self) -> bool {
        let guard = self.inner.lock();
        let t = &guard.tables;
        t.bool_input
            .iter()
            .flatten()
            .chain(t.bool_output.iter().flatten())
            .all(|c| !c.is_null())
            && [&t.byte_input[..], &t.byte_output[..]]
                .iter()
                .all(|m| m.iter().all(|c| !c.is_null()))
            && [
                &t.int_input[..],
                &t.int_output[..],
                &t.int_memory[..],
            ]
            .iter()
            .all(|m| m.iter().all(|c| !c.is_null()))
            && [
                &t.dint_input[..],
                &t.dint_output[..],
                &t.dint_memory[..],
            ]
            .iter()
            .all(|m| m.iter().all(|c| !c.is_null()))
            && [
                &t.lint_input[..],
                &t.lint_output[..],
                &t.lint_memory[..],
            ]
            .iter()
            .all(|m| m.iter().all(|c| !c.is_null()))
    }

    /// True iff every cell in every matrix is currently null.
    pub fn all_null(&self) -> bool {
        let guard = self.inner.lock();
        let t = &guard.tables;
        t.bool_input
            .iter()
            .flatten()
            .chain(t.bool_output.iter().flatten())
            .all(Cell::is_null)
            && t.byte_input.iter().all(Cell::is_null)
            && t.byte_output.iter().all(Cell::is_null)
            && t.int_input.iter().all(Cell::is_null)
            && t.int_output.iter().all(Cell::is_null)
            && t.int_memory.iter().all(Cell::is_null)
            && t.dint_input.iter().all(Cell::is_null)
            && t.dint_output.iter().all(Cell::is_null)
            && t.dint_memory.iter().all(Cell::is_null)
            && t.lint_input.iter().all(Cell::is_null)
            && t.lint_output.iter().all(Cell::is_null)
            && t.lint_memory.iter().all(Cell::is_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tables_are_all_null() {
        let img = ImageTables::new();
        assert!(img.all_null());
        assert!(!img.all_bound());
    }

    #[test]
    fn fill_null_pointers_binds_every_cell() {
        let img = ImageTables::new();
        img.fill_null_pointers();
        assert!(img.all_bound());
    }

    #[test]
    fn clear_unbinds_every_cell() {
        let img = ImageTables::new();
        img.fill_null_pointers();
        img.clear();
        assert!(img.all_null());
    }

    #[test]
    fn scratch_cells_are_independently_writable() {
        let img = ImageTables::new();
        img.fill_null_pointers();
        {
            let mut t = img.lock();
            unsafe {
                t.byte_input[0].write(7);
                t.byte_input[1].write(9);
            }
            assert_eq!(unsafe { t.byte_input[0].read() }, 7);
            assert_eq!(unsafe { t.byte_input[1].read() }, 9);
        }
    }
}
