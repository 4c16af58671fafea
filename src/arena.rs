use std::{
    cell::{Cell, UnsafeCell},
    mem::size_of,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

pub const BLOCK_SIZE: usize = 4096;

const POINTER_LENGTH: usize = size_of::<*mut u8>();
const ALIGN: usize = if POINTER_LENGTH > 8 { POINTER_LENGTH } else { 8 };
const _: () = assert!(ALIGN.is_power_of_two());

// Each block is kept as a `Vec` header in the block list.
const BLOCK_HEADER: usize = size_of::<Vec<u8>>();

/// Bump allocator backing skip-list nodes and memtable entries. Regions are
/// carved in order out of 4 KiB blocks and only released together, when the
/// arena is dropped.
///
/// `allocate`/`allocate_aligned` must run under the same external
/// serialization as skip-list inserts; `memory_usage` may be sampled from
/// any thread.
pub struct Arena {
    p: Cell<*mut u8>,
    remain: Cell<usize>,
    usage: AtomicUsize,
    blocks: UnsafeCell<Vec<Vec<u8>>>,
}

// Mutation goes through `Cell`/`UnsafeCell` so that allocation can share a
// `&self` receiver with concurrent `memory_usage` readers. The allocating
// side is single-threaded by contract.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new() -> Self {
        Arena {
            p: Cell::new(ptr::null_mut()),
            remain: Cell::new(0),
            usage: AtomicUsize::new(0),
            blocks: UnsafeCell::new(Vec::new()),
        }
    }

    pub fn allocate(&self, n: usize) -> *mut u8 {
        assert!(n > 0);
        if n <= self.remain.get() {
            let result = self.p.get();
            self.p.set(unsafe { result.add(n) });
            self.remain.set(self.remain.get() - n);
            result
        } else {
            self.allocate_fallback(n)
        }
    }

    pub fn allocate_aligned(&self, n: usize) -> *mut u8 {
        assert!(n > 0);
        let current_mod = self.p.get() as usize & (ALIGN - 1);
        let slop = if current_mod == 0 {
            0
        } else {
            ALIGN - current_mod
        };
        let needed = n + slop;
        let result = if needed <= self.remain.get() {
            let result = unsafe { self.p.get().add(slop) };
            self.p.set(unsafe { self.p.get().add(needed) });
            self.remain.set(self.remain.get() - needed);
            result
        } else {
            // Blocks come straight from the global allocator, which hands
            // out at least pointer-aligned memory.
            self.allocate_fallback(n)
        };
        assert_eq!(result as usize & (ALIGN - 1), 0);
        result
    }

    pub fn memory_usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    fn allocate_fallback(&self, n: usize) -> *mut u8 {
        if n > BLOCK_SIZE / 4 {
            // Object is more than a quarter of our block size. Allocate it
            // separately to avoid wasting too much space in leftover bytes.
            return self.allocate_new_block(n);
        }

        // We waste the remaining space in the current block.
        let p = self.allocate_new_block(BLOCK_SIZE);
        self.p.set(unsafe { p.add(n) });
        self.remain.set(BLOCK_SIZE - n);
        p
    }

    fn allocate_new_block(&self, block_bytes: usize) -> *mut u8 {
        let mut block: Vec<u8> = Vec::with_capacity(block_bytes);
        let result = block.as_mut_ptr();
        unsafe { (*self.blocks.get()).push(block) };
        self.usage
            .fetch_add(block_bytes + BLOCK_HEADER, Ordering::Relaxed);
        result
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_bump_within_block() {
        let arena = Arena::new();
        let a = arena.allocate(16);
        let b = arena.allocate(16);
        // Both live in the same block, back to back.
        assert_eq!(unsafe { a.add(16) }, b);
    }

    #[test]
    fn test_large_allocation_keeps_bump_pointer() {
        let arena = Arena::new();
        let a = arena.allocate(1);
        let big = arena.allocate(BLOCK_SIZE);
        let b = arena.allocate(1);

        // The big request got a dedicated block; the small ones are
        // contiguous in the original block.
        assert_eq!(unsafe { a.add(1) }, b);
        assert_ne!(big, a);
        assert!(arena.memory_usage() >= 2 * BLOCK_SIZE + 2 * BLOCK_HEADER);
    }

    #[test]
    #[should_panic]
    fn test_allocate_zero_panics() {
        let arena = Arena::new();
        arena.allocate(0);
    }

    #[test]
    fn test_aligned() {
        let arena = Arena::new();
        arena.allocate(1);
        for _ in 0..100 {
            let p = arena.allocate_aligned(3);
            assert_eq!(p as usize & (ALIGN - 1), 0);
        }
    }

    #[test]
    fn test_usage_monotonic() {
        let arena = Arena::new();
        let mut rng = StdRng::seed_from_u64(301);
        let mut last = 0;
        for _ in 0..2000 {
            arena.allocate(rng.gen_range(1..=BLOCK_SIZE / 2));
            let usage = arena.memory_usage();
            assert!(usage >= last);
            last = usage;
        }
    }

    #[test]
    fn test_regions_disjoint() {
        // Fill every region with its own pattern, then verify none of them
        // stomped on another.
        let arena = Arena::new();
        let mut rng = StdRng::seed_from_u64(17);
        let mut regions: Vec<(*mut u8, usize, u8)> = Vec::new();
        let mut total = 0usize;

        for i in 0..1000u32 {
            let size = if rng.gen_ratio(1, 10) {
                rng.gen_range(1..=6000)
            } else {
                rng.gen_range(1..=20)
            };
            let p = if i % 2 == 0 {
                arena.allocate(size)
            } else {
                arena.allocate_aligned(size)
            };
            let fill = (i % 256) as u8;
            unsafe { ptr::write_bytes(p, fill, size) };
            regions.push((p, size, fill));
            total += size;
        }

        for (p, size, fill) in regions {
            let bytes = unsafe { std::slice::from_raw_parts(p, size) };
            assert!(bytes.iter().all(|&b| b == fill));
        }
        assert!(arena.memory_usage() >= total);
    }
}
