//! The large-allocation fast path.
//!
//! Requests at or above [`MMAP_THRESHOLD`] never touch the heap or its
//! free list. Each one gets its own anonymous mapping with the mapping
//! length stored in the leading word(s):
//!
//! ```text
//!   mapping base                payload (returned to the caller)
//!        │                           │
//!        ▼                           ▼
//!   ┌─────────────────┬──────────────────────────────────────────┐
//!   │ length: usize   │              payload bytes               │
//!   │ (whole mapping) │                                          │
//!   └─────────────────┴──────────────────────────────────────────┘
//!   ◄── PREFIX_SIZE ──►
//! ```
//!
//! Deallocation reads the prefix back and unmaps the whole region, so no
//! bookkeeping outlives the mapping itself.

use std::mem;
use std::ptr;

use tracing::{debug, error};

use crate::os;
use crate::{align, align_to};

/// Rounded requests at or above this many bytes bypass the heap and go
/// straight to an anonymous mapping.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Bytes between the mapping base and the payload: one `usize` word on
/// 64-bit hosts, two on 32-bit hosts, so the payload keeps 8-byte
/// alignment either way.
pub const PREFIX_SIZE: usize = align!(mem::size_of::<usize>());

/// Maps a region for a rounded request of `size` bytes and returns the
/// payload address, or null if the OS refuses the mapping.
pub unsafe fn allocate(size: usize) -> *mut u8 {
  let length = align_to!(size + PREFIX_SIZE, os::page_size());

  let base = unsafe { os::map_anonymous(length) };
  if base.is_null() {
    error!(length, "anonymous mapping refused");
    return ptr::null_mut();
  }

  unsafe {
    (base as *mut usize).write(length);
    debug!(length, base = ?base, "mapped large allocation");
    base.add(PREFIX_SIZE)
  }
}

/// Unmaps the region backing `payload`, using the length stored in the
/// prefix.
pub unsafe fn deallocate(payload: *mut u8) {
  unsafe {
    let base = payload.sub(PREFIX_SIZE);
    let length = (base as *const usize).read();
    debug!(length, base = ?base, "unmapping large allocation");
    os::unmap(base, length);
  }
}

/// Payload bytes available to the caller of a large allocation.
pub unsafe fn payload_size(payload: *mut u8) -> usize {
  unsafe {
    let base = payload.sub(PREFIX_SIZE);
    (base as *const usize).read() - PREFIX_SIZE
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::align::ALIGNMENT;

  #[test]
  fn prefix_keeps_the_payload_aligned() {
    assert_eq!(PREFIX_SIZE % ALIGNMENT, 0);

    unsafe {
      let payload = allocate(MMAP_THRESHOLD);
      assert!(!payload.is_null());
      assert_eq!(payload as usize % ALIGNMENT, 0);

      deallocate(payload);
    }
  }

  #[test]
  fn mapping_length_is_page_rounded_and_recorded() {
    let page = os::page_size();
    let size = MMAP_THRESHOLD + 10 * ALIGNMENT;

    unsafe {
      let payload = allocate(size);
      assert!(!payload.is_null());

      let expected_length = align_to!(size + PREFIX_SIZE, page);
      assert_eq!(payload_size(payload), expected_length - PREFIX_SIZE);
      assert!(payload_size(payload) >= size);

      deallocate(payload);
    }
  }

  #[test]
  fn payload_is_writable_across_its_whole_length() {
    unsafe {
      let payload = allocate(MMAP_THRESHOLD);
      let usable = payload_size(payload);

      payload.write(1);
      payload.add(usable - 1).write(2);
      assert_eq!(payload.read(), 1);
      assert_eq!(payload.add(usable - 1).read(), 2);

      deallocate(payload);
    }
  }
}
