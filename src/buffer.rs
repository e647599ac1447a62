//! Aligned I/O buffers
//!
//! Each worker owns one host buffer per ring slot (count = I/O depth), each
//! block-size bytes long and aligned to the system page size as required by
//! O_DIRECT. Buffers are filled with pseudo-random bytes once at allocation
//! so the memory is really backed and not sparse.

use crate::error::{WorkerError, WorkerResult};
use rand::RngCore;
use std::alloc::{alloc, dealloc, Layout};

/// Page-aligned heap buffer suitable for O_DIRECT.
pub struct AlignedBuffer {
    ptr: *mut u8,
    len: usize,
    layout: Layout,
}

impl AlignedBuffer {
    pub fn new(len: usize, alignment: usize) -> WorkerResult<Self> {
        let layout = Layout::from_size_align(len, alignment).map_err(|err| {
            WorkerError::failed(format!(
                "Aligned buffer layout invalid. Size: {len}; Alignment: {alignment}; Error: {err}"
            ))
        })?;

        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(WorkerError::failed(format!(
                "Aligned memory allocation failed. Buffer size: {len}; Alignment: {alignment}"
            )));
        }

        Ok(Self { ptr, len, layout })
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

// owns its memory exclusively
unsafe impl Send for AlignedBuffer {}

/// System page size, the alignment required by O_DIRECT.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// The per-worker set of host I/O buffers, one per ring slot.
pub struct IoBufferPool {
    buffers: Vec<AlignedBuffer>,
    block_size: usize,
}

impl IoBufferPool {
    /// Allocate `io_depth` page-aligned buffers of `block_size` bytes each
    /// and fill them with pseudo-random bytes. A zero block size yields an
    /// empty pool (metadata-only phases).
    pub fn new(io_depth: usize, block_size: usize, rng: &mut impl RngCore) -> WorkerResult<Self> {
        let mut buffers = Vec::with_capacity(io_depth);

        if block_size > 0 {
            let alignment = page_size();

            for _ in 0..io_depth {
                let mut buffer = AlignedBuffer::new(block_size, alignment)?;
                rng.fill_bytes(buffer.as_mut_slice());
                buffers.push(buffer);
            }
        }

        Ok(Self { buffers, block_size })
    }

    #[inline(always)]
    pub fn buffer(&self, index: usize) -> &AlignedBuffer {
        &self.buffers[index]
    }

    #[inline(always)]
    pub fn buffer_mut(&mut self, index: usize) -> &mut AlignedBuffer {
        &mut self.buffers[index]
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
