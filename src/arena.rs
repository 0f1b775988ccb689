//! Bump arena backing node and leaf storage.
//!
//! The builder never touches the system allocator on the hot path: every
//! task grabs a [`ThreadArena`] handle at entry and bump-allocates nodes
//! out of coarse blocks. There is no `free`; the whole arena is released
//! when it is dropped, after the tree it backs is discarded.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::util::{Error, Result};

/// Default size of the blocks handed to thread-local allocators (1 MiB).
const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Largest alignment [`ThreadArena::alloc`] honors. Blocks are aligned to
/// this, so any smaller alignment can be served by rounding the bump
/// cursor.
pub const MAX_ALIGN: usize = 64;

/// One coarse allocation owned by the arena.
struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Blocks are created and dropped only while holding the arena's lock; the
// pointer itself is handed out in disjoint bump ranges.
unsafe impl Send for Block {}

/// Growable arena shared by all build workers.
///
/// The arena itself only tracks blocks; allocation goes through per-task
/// [`ThreadArena`] handles created with [`Arena::thread_local`]. The
/// internal mutex is held only while a new block is carved out, so
/// concurrent handle creation and allocation stay lock-free in the common
/// case.
pub struct Arena {
    block_size: usize,
    blocks: Mutex<Vec<Block>>,
}

impl Arena {
    /// Create an arena with the default block size.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create an arena carving blocks of `block_size` bytes.
    pub fn with_block_size(block_size: usize) -> Self {
        assert!(block_size > 0);
        Self {
            block_size,
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Create a bump handle for the current task.
    ///
    /// The handle is neither `Send` nor `Sync`; it is expected to live for
    /// one task and be dropped at task exit. Handles may be created
    /// concurrently from any number of threads.
    pub fn thread_local(&self) -> ThreadArena<'_> {
        ThreadArena {
            arena: self,
            cur: Cell::new(std::ptr::null_mut()),
            end: Cell::new(std::ptr::null_mut()),
        }
    }

    /// Total bytes reserved from the system allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.blocks.lock().iter().map(|b| b.layout.size()).sum()
    }

    /// Carve a new block of at least `min_bytes` and register it.
    fn grow(&self, min_bytes: usize) -> Result<(NonNull<u8>, usize)> {
        let size = self.block_size.max(min_bytes);
        let layout = Layout::from_size_align(size, MAX_ALIGN)
            .map_err(|_| Error::AllocationFailure { bytes: min_bytes, align: MAX_ALIGN })?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(Error::AllocationFailure { bytes: min_bytes, align: MAX_ALIGN });
        };
        self.blocks.lock().push(Block { ptr, layout });
        Ok((ptr, size))
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for block in self.blocks.get_mut().drain(..) {
            // Safety: each block was allocated with exactly this layout and
            // is freed once, here.
            unsafe { dealloc(block.ptr.as_ptr(), block.layout) };
        }
    }
}

/// Per-task bump allocator over an [`Arena`].
///
/// Allocations live until the arena is dropped; `Drop` impls of values
/// placed in the arena are never run.
pub struct ThreadArena<'a> {
    arena: &'a Arena,
    cur: Cell<*mut u8>,
    end: Cell<*mut u8>,
}

impl<'a> ThreadArena<'a> {
    /// Allocate `bytes` with the given alignment (a power of two, at most
    /// [`MAX_ALIGN`]).
    pub fn alloc(&self, bytes: usize, align: usize) -> Result<NonNull<u8>> {
        assert!(align.is_power_of_two() && align <= MAX_ALIGN);
        if bytes == 0 {
            // Safety: `align` is non-zero, so the address is non-null, and
            // a zero-length allocation is never dereferenced.
            return Ok(unsafe { NonNull::new_unchecked(align as *mut u8) });
        }
        loop {
            let addr = self.cur.get() as usize;
            let aligned = addr
                .checked_add(align - 1)
                .ok_or(Error::AllocationFailure { bytes, align })?
                & !(align - 1);
            let new_cur = aligned
                .checked_add(bytes)
                .ok_or(Error::AllocationFailure { bytes, align })?;
            if !self.cur.get().is_null() && new_cur <= self.end.get() as usize {
                self.cur.set(new_cur as *mut u8);
                // Safety: aligned >= addr > 0 inside a live block.
                return Ok(unsafe { NonNull::new_unchecked(aligned as *mut u8) });
            }
            // The remainder of the current block (if any) is abandoned;
            // allocation is coarse-grained by design of the block size.
            let (ptr, size) = self.arena.grow(bytes)?;
            self.cur.set(ptr.as_ptr());
            // Safety: ptr..ptr+size is the block just carved out.
            self.end.set(unsafe { ptr.as_ptr().add(size) });
        }
    }

    /// Move `value` into the arena and return a reference with the arena's
    /// lifetime.
    pub fn alloc_one<T>(&self, value: T) -> Result<&'a mut T> {
        let ptr = self.alloc(std::mem::size_of::<T>(), std::mem::align_of::<T>())?;
        let ptr = ptr.as_ptr() as *mut T;
        // Safety: freshly allocated, properly aligned, exclusively ours.
        unsafe {
            ptr.write(value);
            Ok(&mut *ptr)
        }
    }

    /// Copy a slice into the arena.
    pub fn alloc_slice<T: Copy>(&self, src: &[T]) -> Result<&'a mut [T]> {
        let bytes = std::mem::size_of_val(src);
        let ptr = self.alloc(bytes, std::mem::align_of::<T>())?;
        let ptr = ptr.as_ptr() as *mut T;
        // Safety: destination is fresh and disjoint from `src`.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), ptr, src.len());
            Ok(std::slice::from_raw_parts_mut(ptr, src.len()))
        }
    }
}
