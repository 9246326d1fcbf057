//! # rmalloc - A First-Fit Free-List Memory Allocator
//!
//! This crate provides a general-purpose **free-list allocator** that
//! services allocation, deallocation, zero-initialized allocation, and
//! resize requests from heap memory grown with the `sbrk` system call,
//! with large requests routed to dedicated anonymous mappings.
//!
//! ## Overview
//!
//! ```text
//!   Free-List Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                          HEAP MEMORY                             │
//!   │                                                                  │
//!   │   ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┬──────┐      │
//!   │   │ hdr  │ A1   │ hdr  │ FREE │ hdr  │ A2   │ hdr  │ FREE │      │
//!   │   └──────┴──────┴──────┴──────┴──────┴──────┴──────┴──────┘      │
//!   │              ▲      │                           ▲          ▲     │
//!   │              │      └── free blocks linked ─────┘          │     │
//!   │       payloads returned       in address order         Program   │
//!   │         to callers                                      Break    │
//!   │                                                                  │
//!   └──────────────────────────────────────────────────────────────────┘
//!
//!   Allocation walks the free list first-fit and splits what it finds;
//!   deallocation merges freed blocks with their free neighbors.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header and pointer arithmetic (internal)
//!   ├── os         - Page-size query and anonymous mappings (internal)
//!   ├── growers    - Heap-growth seam: BrkGrower, ArenaGrower
//!   ├── heap       - FreeListAllocator and LockedAllocator
//!   └── large      - Size-prefixed mapping fast path (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rmalloc::LockedAllocator;
//!
//! static MALLOC: LockedAllocator = LockedAllocator::new();
//!
//! fn main() {
//!     unsafe {
//!         // Allocate, use, resize, and free a buffer.
//!         let ptr = MALLOC.allocate(64);
//!         ptr.write(42);
//!
//!         let bigger = MALLOC.resize(ptr, 256);
//!         assert_eq!(bigger.read(), 42);
//!
//!         MALLOC.deallocate(bigger);
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! The heap is a single contiguous range grown by advancing the program
//! break, never shrunk. Every block carries an in-band header; free
//! blocks form a doubly-linked list in strictly increasing address
//! order, and freed blocks are eagerly merged with adjacent free
//! neighbors so the list never holds two touching blocks.
//!
//! Requests of 128 KiB and above skip the heap entirely: each becomes a
//! private anonymous mapping with its length stored in front of the
//! payload, and is returned to the OS the moment it is deallocated.
//!
//! ```text
//!   request < 128 KiB ──► free list ──► split / grow the break
//!   request ≥ 128 KiB ──► mmap ──────► unmapped on deallocate
//! ```
//!
//! Heap growth is pluggable through the [`Grower`] trait: [`BrkGrower`]
//! moves the real program break, while [`ArenaGrower`] simulates a
//! private break inside a fixed mapping, which is also how the test
//! suite exercises the allocator deterministically.
//!
//! ## Features
//!
//! - **First-fit placement**: lowest-addressed sufficient block wins
//! - **Eager coalescing**: no two free blocks are ever adjacent
//! - **Large-request fast path**: 128 KiB and up map and unmap directly
//! - **Single-mutex thread safety**: [`LockedAllocator`] serializes all
//!   entry points and is const-constructible for `static` use
//!
//! ## Limitations
//!
//! - **The break only grows**: heap pages are reused, never returned
//! - **Sole break user**: [`BrkGrower`] assumes nothing else moves the
//!   program break; mixing with another sbrk-based allocator corrupts
//!   both (use [`ArenaGrower`] to coexist)
//! - **8-byte alignment only**: no stronger alignment can be requested
//! - **Unix-only**: requires `libc` with `sbrk` and `mmap`
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. Callers must uphold the usual allocator rules:
//!
//! - Only pointers returned by this allocator may be passed back
//! - The same pointer is not deallocated twice
//! - Payloads are not used after being freed or resized away

pub mod align;
mod block;
mod growers;
mod heap;
mod large;
mod os;

pub use growers::{ArenaGrower, BrkGrower, Grower};
pub use heap::{FreeListAllocator, LockedAllocator};
