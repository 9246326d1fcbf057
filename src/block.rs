use std::mem;

use static_assertions::const_assert;

use crate::align::ALIGNMENT;

/// Size in bytes of the in-band header preceding every block's payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// In-band metadata at the start of every heap block, free or allocated.
///
/// `next` doubles as the allocated/free discriminator: a null `next` marks
/// an allocated block, while the last free block carries the heap-end
/// sentinel instead. `prev` of an allocated block is never read.
#[repr(C)]
pub struct Block {
  /// Payload byte count, excluding this header. Always a multiple of 8.
  pub length: usize,
  /// Previous free block, or null for the first free block.
  pub prev: *mut Block,
  /// Next free block, the heap-end sentinel, or null when allocated.
  pub next: *mut Block,
  /// Pads the header to 32 bytes, so a page-aligned block hands out a
  /// 16-byte-aligned payload.
  _pad: usize,
}

// Block addresses advance in header-plus-length steps, so every payload
// stays on the 8-byte quantum only if the header itself is a multiple of it.
const_assert!(HEADER_SIZE % ALIGNMENT == 0);
const_assert!(mem::align_of::<Block>() <= ALIGNMENT);

impl Block {
  /// Header address for a payload pointer previously handed out.
  pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(HEADER_SIZE) as *mut Block }
  }

  /// Payload address for a block header.
  pub unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { (block as *mut u8).add(HEADER_SIZE) }
  }

  /// Header of the block physically following `block` in the heap tiling.
  pub unsafe fn physically_next(block: *mut Block) -> *mut Block {
    unsafe { (block as *mut u8).add(HEADER_SIZE + (*block).length) as *mut Block }
  }
}
