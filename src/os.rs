//! Thin wrappers over the OS memory primitives the allocator consumes:
//! the page-size query and anonymous page mappings. Program-break growth
//! lives behind the [`Grower`](crate::growers::Grower) seam instead.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_void, off_t, size_t};

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Virtual memory page size of the host. Usually 4096; queried from the
/// OS once and cached.
pub fn page_size() -> usize {
  let cached = PAGE_SIZE.load(Ordering::Relaxed);
  if cached != 0 {
    return cached;
  }

  let size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } as usize;
  PAGE_SIZE.store(size, Ordering::Relaxed);
  size
}

/// Acquires a page-aligned, private, readable and writable anonymous
/// mapping of `length` bytes. Returns null if the OS refuses.
pub unsafe fn map_anonymous(length: usize) -> *mut u8 {
  const ADDR: *mut c_void = ptr::null_mut::<c_void>();
  const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
  const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
  const FD: c_int = -1;
  const OFFSET: off_t = 0;

  let addr = unsafe { libc::mmap(ADDR, length as size_t, PROT, FLAGS, FD, OFFSET) };
  if addr == libc::MAP_FAILED {
    return ptr::null_mut();
  }

  addr as *mut u8
}

/// Releases a mapping previously returned by [`map_anonymous`].
pub unsafe fn unmap(
  addr: *mut u8,
  length: usize,
) {
  unsafe { libc::munmap(addr as *mut c_void, length as size_t) };
}
