//! # First-Fit Free-List Allocator
//!
//! The heap is a contiguous byte range `[start_brk, end_brk)` obtained by
//! advancing a program break, tiled edge to edge by blocks. Every block
//! starts with an in-band [`Block`] header; free blocks are additionally
//! threaded onto a doubly-linked list kept in strictly increasing address
//! order.
//!
//! ## Memory Layout
//!
//! ```text
//!   start_brk                                                   end_brk
//!      │                                                           │
//!      ▼                                                           ▼
//!   ┌──────┬────────┬──────┬──────────┬──────┬───────┬──────┬─────┐
//!   │ hdr  │ in use │ hdr  │   FREE   │ hdr  │in use │ hdr  │FREE │
//!   └──────┴────────┴──────┴──────────┴──────┴───────┴──────┴─────┘
//!                      ▲                                  ▲
//!                      │                                  │
//!                  free_head ───── next ─────────────► free_tail
//!                      ◄───────── prev ──────────────     │
//!                                                        next = heap_end
//! ```
//!
//! The `next` pointer of the last free block is not null but the
//! *heap-end sentinel*, the current break address. A null `next` is what
//! marks a block as allocated.
//!
//! ## Allocation
//!
//! First fit: the list is walked from `free_head`, so the lowest-addressed
//! block that can hold the (8-byte rounded) request wins. If the leftover
//! of the chosen block can hold a header plus one quantum it is split off
//! as a new free block; smaller leftovers are donated to the allocation:
//!
//! ```text
//!   before        ┌──────┬───────────────────────────┐
//!                 │ hdr  │           FREE            │
//!                 └──────┴───────────────────────────┘
//!   after split   ┌──────┬──────────┬──────┬─────────┐
//!                 │ hdr  │ returned │ hdr  │  FREE   │
//!                 └──────┴──────────┴──────┴─────────┘
//! ```
//!
//! A miss grows the break (by whole pages, in four-page increments),
//! either stretching a tail block that is flush with the break or
//! appending a fresh free block in the new region.
//!
//! ## Deallocation
//!
//! A freed block re-enters the list at its address position and is
//! eagerly merged with physically adjacent free neighbors, so no two free
//! blocks ever touch:
//!
//! ```text
//!   ┌──────┬──────┬──────┬──────┬──────┬──────┐
//!   │ hdr  │ FREE │ hdr  │freed │ hdr  │ FREE │
//!   └──────┴──────┴──────┴──────┴──────┴──────┘
//!                     │
//!                     ▼
//!   ┌──────┬──────────────────────────────────┐
//!   │ hdr  │               FREE               │
//!   └──────┴──────────────────────────────────┘
//! ```
//!
//! ## Large Requests
//!
//! Rounded requests of 128 KiB or more never touch the heap; they are
//! served from dedicated anonymous mappings (see [`crate::large`]) and
//! recognized on free by falling outside `[start_brk, end_brk]`.
//!
//! ## Thread Safety
//!
//! [`FreeListAllocator`] itself is **not** thread-safe; wrap it in
//! [`LockedAllocator`] to serialize every entry point behind one
//! process-wide mutex.

use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::align::ALIGNMENT;
use crate::block::{Block, HEADER_SIZE};
use crate::growers::{BrkGrower, Grower};
use crate::large;
use crate::large::MMAP_THRESHOLD;
use crate::{align, align_to};

/// Number of pages the break advances by at a time: growth requests are
/// rounded up to a multiple of this many pages.
const HEAP_GROWTH_INCREMENT: usize = 4;

/// Smallest leftover worth carving into its own free block: a header plus
/// one alignment quantum. Anything smaller is donated to the allocation.
const SPLIT_THRESHOLD: usize = HEADER_SIZE + ALIGNMENT;

/// A first-fit free-list allocator over a monotonically growing heap.
///
/// # Fields
///
/// * `grower` - Source of heap memory (the program break, real or arena)
/// * `start_brk` / `end_brk` - Bounds of the heap; `end_brk` only grows
/// * `free_head` / `free_tail` - Lowest and highest addressed free block
/// * `initialized` - Whether the first page has been acquired
///
/// The heap is lazily initialized on the first allocation: one page is
/// acquired and installed as a single spanning free block.
///
/// # Thread Safety
///
/// This type is **NOT** thread-safe; see [`LockedAllocator`].
pub struct FreeListAllocator<G: Grower = BrkGrower> {
  grower: G,
  start_brk: *mut u8,
  end_brk: *mut u8,
  free_head: *mut Block,
  free_tail: *mut Block,
  initialized: bool,
}

// All block pointers point into memory owned by the grower; moving the
// allocator to another thread moves that ownership with it.
unsafe impl<G: Grower + Send> Send for FreeListAllocator<G> {}

impl FreeListAllocator<BrkGrower> {
  /// Creates an allocator over the process program break.
  ///
  /// The process has a single break, so at most one such allocator should
  /// exist at a time.
  pub const fn new() -> Self {
    Self::with_grower(BrkGrower::new())
  }
}

impl<G: Grower> FreeListAllocator<G> {
  /// Creates an allocator drawing heap memory from `grower`.
  pub const fn with_grower(grower: G) -> Self {
    Self {
      grower,
      start_brk: ptr::null_mut(),
      end_brk: ptr::null_mut(),
      free_head: ptr::null_mut(),
      free_tail: ptr::null_mut(),
      initialized: false,
    }
  }

  /// Total bytes currently spanned by the heap.
  pub fn heap_size(&self) -> usize {
    self.end_brk as usize - self.start_brk as usize
  }

  /// The heap-end sentinel: terminates the free list in place of a null
  /// `next`, which is reserved for marking allocated blocks.
  fn heap_end(&self) -> *mut Block {
    self.end_brk as *mut Block
  }

  fn contains(
    &self,
    ptr: *mut u8,
  ) -> bool {
    ptr >= self.start_brk && ptr <= self.end_brk
  }

  /// Acquires the first page and installs it as a single free block.
  unsafe fn init(&mut self) -> bool {
    let page = self.grower.page_size();
    let Some(brk) = (unsafe { self.grower.extend_break(page) }) else {
      return false;
    };

    self.start_brk = unsafe { brk.sub(page) };
    self.end_brk = brk;

    let block = self.start_brk as *mut Block;
    unsafe {
      (*block).length = page - HEADER_SIZE;
      (*block).prev = ptr::null_mut();
      (*block).next = self.heap_end();
    }
    self.free_head = block;
    self.free_tail = block;
    self.initialized = true;

    debug!(start = ?self.start_brk, end = ?self.end_brk, "heap initialized");
    true
  }

  /// Allocates `size` bytes and returns the payload address.
  ///
  /// The returned address is 8-byte aligned and stays valid until passed
  /// to [`deallocate`](Self::deallocate) or [`resize`](Self::resize).
  ///
  /// Returns null when `size` is zero or the OS refuses memory.
  ///
  /// # Safety
  ///
  /// The caller must ensure the allocator's block pointers have not been
  /// corrupted through previously returned payloads.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }
    if !self.initialized && !unsafe { self.init() } {
      return ptr::null_mut();
    }

    let size = align!(size);
    if size >= MMAP_THRESHOLD {
      return unsafe { large::allocate(size) };
    }

    // First fit: the list is address ordered, so the walk returns the
    // lowest-addressed block that can hold the request.
    let mut current = self.free_head;
    while current != self.heap_end() {
      if unsafe { (*current).length } >= size {
        return unsafe { self.place(current, size) };
      }
      current = unsafe { (*current).next };
    }

    unsafe { self.grow_and_place(size) }
  }

  /// Converts the free block `block` into an allocated block of `size`
  /// payload bytes and returns its payload address.
  ///
  /// Splits off the leftover as a new free block when it can hold one;
  /// otherwise the whole block is donated. Never leaves the free list
  /// empty: consuming the last block refills the list from the break.
  unsafe fn place(
    &mut self,
    block: *mut Block,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if (*block).length - size >= SPLIT_THRESHOLD {
        // Carve the leftover into a new free block that takes over this
        // block's position in the list.
        let rest = (block as *mut u8).add(HEADER_SIZE + size) as *mut Block;
        (*rest).length = (*block).length - size - HEADER_SIZE;
        (*rest).prev = (*block).prev;
        (*rest).next = (*block).next;

        if (*block).prev.is_null() {
          self.free_head = rest;
        } else {
          (*(*block).prev).next = rest;
        }
        if (*block).next == self.heap_end() {
          self.free_tail = rest;
        } else {
          (*(*block).next).prev = rest;
        }

        (*block).length = size;
      } else {
        // The leftover cannot hold a block: donate it and unlink.
        if (*block).prev.is_null() {
          self.free_head = (*block).next;
        } else {
          (*(*block).prev).next = (*block).next;
        }
        if (*block).next == self.heap_end() {
          self.free_tail = (*block).prev;
        } else {
          (*(*block).next).prev = (*block).prev;
        }
      }

      (*block).next = ptr::null_mut();

      if self.free_head == self.heap_end() {
        self.free_tail = ptr::null_mut();
        self.refill();
      }

      Block::payload(block)
    }
  }

  /// Reseeds an emptied free list with one growth increment, so the next
  /// allocation always has a head to start from.
  unsafe fn refill(&mut self) {
    let old_end = self.end_brk;
    if unsafe { self.grow(1) } == 0 {
      // The break refused to move; the list stays empty until the next
      // deallocation reseeds it.
      return;
    }

    let block = old_end as *mut Block;
    unsafe {
      (*block).length = (self.end_brk as usize - old_end as usize) - HEADER_SIZE;
      (*block).prev = ptr::null_mut();
      (*block).next = self.heap_end();
    }
    self.free_head = block;
    self.free_tail = block;
  }

  /// Advances the break far enough for `bytes` more bytes, in whole pages
  /// rounded up to a multiple of [`HEAP_GROWTH_INCREMENT`].
  ///
  /// Returns the number of pages added, or 0 if the OS refused.
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> usize {
    let page = self.grower.page_size();
    let pages = align_to!(bytes.div_ceil(page), HEAP_GROWTH_INCREMENT);

    match unsafe { self.grower.extend_break(pages * page) } {
      Some(brk) => {
        self.end_brk = brk;
        debug!(pages, end = ?self.end_brk, "heap grown");
        pages
      }
      None => {
        error!(bytes, "heap growth refused");
        0
      }
    }
  }

  /// Serves an allocation no free block could hold by growing the heap.
  ///
  /// A tail block whose payload ends exactly at the break is stretched in
  /// place; otherwise the new region becomes a fresh tail block. Either
  /// way the request is then placed in that block.
  unsafe fn grow_and_place(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      let tail = self.free_tail;
      let flush = !tail.is_null() && Block::physically_next(tail) as *mut u8 == self.end_brk;

      if flush {
        let needed = size + HEADER_SIZE - (*tail).length;
        let pages = self.grow(needed);
        if pages == 0 {
          return ptr::null_mut();
        }

        (*tail).length += pages * self.grower.page_size();
        (*tail).next = self.heap_end();
        return self.place(tail, size);
      }

      let old_end = self.end_brk;
      let pages = self.grow(size + HEADER_SIZE);
      if pages == 0 {
        return ptr::null_mut();
      }

      let block = old_end as *mut Block;
      (*block).length = pages * self.grower.page_size() - HEADER_SIZE;
      (*block).prev = tail;
      (*block).next = self.heap_end();
      if tail.is_null() {
        self.free_head = block;
      } else {
        (*tail).next = block;
      }
      self.free_tail = block;

      self.place(block, size)
    }
  }

  /// Returns `ptr` to the allocator.
  ///
  /// A null `ptr` is a no-op. Pointers outside `[start_brk, end_brk]` are
  /// large allocations and are unmapped directly; everything else rejoins
  /// the free list, merging with physically adjacent free neighbors.
  ///
  /// # Behavior
  ///
  /// ```text
  ///   CASE A: past the tail          appended, or absorbed into the tail
  ///   ════════════════════════════════════════════════════════════════
  ///     ... ──► [free_tail]   [freed]
  ///
  ///   CASE B: before the head        prepended, or absorbing the head
  ///   ════════════════════════════════════════════════════════════════
  ///     [freed]   [free_head] ◄── ...
  ///
  ///   CASE C: interior               spliced between its two list
  ///   ════════════════════════════════  neighbors, merging with either
  ///     [free_head] ... [freed] ... [free_tail]      when adjacent
  /// ```
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a payload address previously returned by this
  /// allocator and not deallocated since; double frees and foreign
  /// pointers corrupt the heap.
  pub unsafe fn deallocate(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }
    if !self.contains(ptr) {
      unsafe { large::deallocate(ptr) };
      return;
    }

    let block = unsafe { Block::from_payload(ptr) };
    unsafe { self.insert_free(block) };
  }

  unsafe fn insert_free(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      if self.free_head == self.heap_end() {
        // Only reachable if a growth refusal left the list empty:
        // reseed it with the freed block.
        (*block).prev = ptr::null_mut();
        (*block).next = self.heap_end();
        self.free_head = block;
        self.free_tail = block;
        return;
      }

      if block > self.free_tail {
        self.insert_past_tail(block);
      } else if block < self.free_head {
        self.insert_before_head(block);
      } else {
        self.insert_interior(block);
      }
    }
  }

  unsafe fn insert_past_tail(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let tail = self.free_tail;

      if Block::physically_next(tail) == block {
        (*tail).length += (*block).length + HEADER_SIZE;
      } else {
        (*tail).next = block;
        (*block).prev = tail;
        (*block).next = self.heap_end();
        self.free_tail = block;
      }
    }
  }

  unsafe fn insert_before_head(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let head = self.free_head;

      if Block::physically_next(block) == head {
        // Absorb the old head; the freed block keeps its address.
        (*block).length += (*head).length + HEADER_SIZE;
        (*block).next = (*head).next;
        if (*head).next == self.heap_end() {
          self.free_tail = block;
        } else {
          (*(*head).next).prev = block;
        }
      } else {
        (*block).next = head;
        (*head).prev = block;
      }

      (*block).prev = ptr::null_mut();
      self.free_head = block;
    }
  }

  unsafe fn insert_interior(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let next_phys = Block::physically_next(block);
      let prev_free;

      if !(*next_phys).next.is_null() {
        // The physically next block is free: merge right, taking its
        // place in the list.
        prev_free = (*next_phys).prev;
        (*block).length += (*next_phys).length + HEADER_SIZE;
        (*block).next = (*next_phys).next;
        if (*next_phys).next == self.heap_end() {
          self.free_tail = block;
        } else {
          (*(*next_phys).next).prev = block;
        }
      } else {
        // Locate the list neighbors from whichever end of the heap is
        // closer to the freed block.
        let midpoint = self.start_brk as usize + self.heap_size() / 2;
        let next_free = if (block as usize) < midpoint {
          let mut prev = self.free_head;
          while (*prev).next < block {
            prev = (*prev).next;
          }
          prev_free = prev;
          (*prev).next
        } else {
          let mut next = self.free_tail;
          while (*next).prev > block {
            next = (*next).prev;
          }
          prev_free = (*next).prev;
          next
        };

        (*block).next = next_free;
        (*next_free).prev = block;
      }

      // An interior block always has a free predecessor at or above the
      // head, so prev_free is never null here.
      if Block::physically_next(prev_free) == block {
        (*prev_free).length += (*block).length + HEADER_SIZE;
        (*prev_free).next = (*block).next;
        if (*block).next == self.heap_end() {
          self.free_tail = prev_free;
        } else {
          (*(*block).next).prev = prev_free;
        }
      } else {
        (*prev_free).next = block;
        (*block).prev = prev_free;
      }
    }
  }

  /// Allocates `count * element_size` zeroed bytes.
  ///
  /// Returns null when the product is zero, overflows, or the allocation
  /// fails. Exactly the requested bytes are zeroed; the donated tail of
  /// the block, if any, is left as is.
  ///
  /// # Safety
  ///
  /// Same requirements as [`allocate`](Self::allocate).
  pub unsafe fn callocate(
    &mut self,
    count: usize,
    element_size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(element_size) else {
      return ptr::null_mut();
    };
    if total == 0 {
      return ptr::null_mut();
    }

    let payload = unsafe { self.allocate(total) };
    if !payload.is_null() {
      unsafe { ptr::write_bytes(payload, 0, total) };
    }
    payload
  }

  /// Moves the allocation at `ptr` into a fresh block of `size` bytes,
  /// preserving the common prefix of the payload.
  ///
  /// * null `ptr` behaves as [`allocate`](Self::allocate)`(size)`
  /// * zero `size` behaves as [`deallocate`](Self::deallocate) and
  ///   returns null
  /// * otherwise the contents move; the result is never the original
  ///   pointer, and the original is retired. If the new allocation
  ///   fails, null is returned and `ptr` stays live
  ///
  /// # Safety
  ///
  /// Same requirements as [`deallocate`](Self::deallocate) for `ptr`.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if ptr.is_null() {
        return self.allocate(size);
      }
      if size == 0 {
        self.deallocate(ptr);
        return ptr::null_mut();
      }

      let new_payload = self.allocate(size);
      if new_payload.is_null() {
        return ptr::null_mut();
      }

      let old_size = if self.contains(ptr) {
        (*Block::from_payload(ptr)).length
      } else {
        large::payload_size(ptr)
      };
      let new_size = if self.contains(new_payload) {
        (*Block::from_payload(new_payload)).length
      } else {
        large::payload_size(new_payload)
      };

      ptr::copy_nonoverlapping(ptr, new_payload, old_size.min(new_size));
      self.deallocate(ptr);
      new_payload
    }
  }
}

/// Serializes a [`FreeListAllocator`] behind one process-wide mutex.
///
/// Every public entry point takes the lock exactly once and releases it
/// on every return; `callocate` and `resize` reach the lock-less
/// internals, so the non-recursive mutex is never re-entered. Operations
/// are linearizable in lock-acquisition order.
///
/// Const-constructible, so the usual shape is a process-wide static:
///
/// ```rust,ignore
/// use rmalloc::LockedAllocator;
///
/// static MALLOC: LockedAllocator = LockedAllocator::new();
///
/// let ptr = unsafe { MALLOC.allocate(100) };
/// unsafe { MALLOC.deallocate(ptr) };
/// ```
pub struct LockedAllocator<G: Grower = BrkGrower> {
  inner: Mutex<FreeListAllocator<G>>,
}

impl LockedAllocator<BrkGrower> {
  /// Creates a locked allocator over the process program break.
  pub const fn new() -> Self {
    Self::with_grower(BrkGrower::new())
  }
}

impl<G: Grower> LockedAllocator<G> {
  /// Creates a locked allocator drawing heap memory from `grower`.
  pub const fn with_grower(grower: G) -> Self {
    Self {
      inner: Mutex::new(FreeListAllocator::with_grower(grower)),
    }
  }

  fn lock(&self) -> MutexGuard<'_, FreeListAllocator<G>> {
    // A panic can only poison the lock from a caller-visible bug; the
    // heap state itself is updated atomically with respect to the lock.
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Locked [`FreeListAllocator::allocate`].
  ///
  /// # Safety
  ///
  /// See [`FreeListAllocator::allocate`].
  pub unsafe fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.lock().allocate(size) }
  }

  /// Locked [`FreeListAllocator::deallocate`].
  ///
  /// # Safety
  ///
  /// See [`FreeListAllocator::deallocate`].
  pub unsafe fn deallocate(
    &self,
    ptr: *mut u8,
  ) {
    unsafe { self.lock().deallocate(ptr) }
  }

  /// Locked [`FreeListAllocator::callocate`].
  ///
  /// # Safety
  ///
  /// See [`FreeListAllocator::callocate`].
  pub unsafe fn callocate(
    &self,
    count: usize,
    element_size: usize,
  ) -> *mut u8 {
    unsafe { self.lock().callocate(count, element_size) }
  }

  /// Locked [`FreeListAllocator::resize`].
  ///
  /// # Safety
  ///
  /// See [`FreeListAllocator::resize`].
  pub unsafe fn resize(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.lock().resize(ptr, size) }
  }

  /// Total bytes currently spanned by the heap.
  pub fn heap_size(&self) -> usize {
    self.lock().heap_size()
  }
}
