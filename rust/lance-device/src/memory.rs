// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow_buffer::{Buffer, MutableBuffer};
use lance_core::{Error, Result, SPLIT_ALIGN};
use snafu::location;

use crate::stream::Stream;

/// Source of device memory.
///
/// Implementations must return zero-initialized buffers whose first byte is
/// aligned to [`SPLIT_ALIGN`].  Failure leaves no state behind.
pub trait DeviceAllocator: Send + Sync + std::fmt::Debug {
    fn allocate(&self, size: usize, stream: &Stream) -> Result<DeviceBuffer>;
}

/// Allocates straight from the global allocator with no accounting.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl DeviceAllocator for SystemAllocator {
    fn allocate(&self, size: usize, stream: &Stream) -> Result<DeviceBuffer> {
        log::trace!("Allocating {} bytes on stream {}", size, stream.id());
        DeviceBuffer::try_new_zeroed(size)
    }
}

#[derive(Debug)]
struct PoolState {
    limit: usize,
    used: AtomicUsize,
    num_allocations: AtomicUsize,
}

impl PoolState {
    fn try_reserve(self: &Arc<Self>, size: usize) -> Option<Reservation> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let new_usage = current.checked_add(size)?;
            if new_usage > self.limit {
                return None;
            }
            match self.used.compare_exchange_weak(
                current,
                new_usage,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.num_allocations.fetch_add(1, Ordering::Relaxed);
                    return Some(Reservation {
                        pool: self.clone(),
                        size,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// An allocator with a fixed byte budget.
///
/// Every buffer it hands out holds a [`Reservation`] that returns its bytes to
/// the pool when the last reference to the memory is dropped.
#[derive(Debug, Clone)]
pub struct PoolAllocator {
    state: Arc<PoolState>,
}

impl PoolAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                limit,
                used: AtomicUsize::new(0),
                num_allocations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Bytes currently held by live buffers
    pub fn used(&self) -> usize {
        self.state.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.state.limit
    }

    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.used())
    }

    /// Number of successful allocations over the pool's lifetime
    pub fn num_allocations(&self) -> usize {
        self.state.num_allocations.load(Ordering::Relaxed)
    }
}

impl DeviceAllocator for PoolAllocator {
    fn allocate(&self, size: usize, stream: &Stream) -> Result<DeviceBuffer> {
        let reservation = self.state.try_reserve(size).ok_or_else(|| Error::Allocation {
            size,
            message: format!(
                "pool has {} of {} bytes available",
                self.available(),
                self.limit()
            ),
            location: location!(),
        })?;
        log::trace!(
            "Reserved {} bytes on stream {} ({} in use)",
            size,
            stream.id(),
            self.used()
        );
        Ok(DeviceBuffer::try_new_zeroed(size)?.with_reservation(reservation))
    }
}

/// RAII guard for bytes taken from a [`PoolAllocator`]
#[derive(Debug)]
pub struct Reservation {
    pool: Arc<PoolState>,
    size: usize,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pool.used.fetch_sub(self.size, Ordering::SeqCst);
    }
}

/// Keeps the storage (and its reservation) alive for as long as any frozen
/// [`Buffer`] points into it.
struct DeviceAllocation {
    storage: MutableBuffer,
    _reservation: Option<Reservation>,
}

/// An owned, writable, zero-initialized region of device memory whose first
/// byte is aligned to [`SPLIT_ALIGN`].
#[derive(Debug)]
pub struct DeviceBuffer {
    storage: MutableBuffer,
    start: usize,
    len: usize,
    reservation: Option<Reservation>,
}

impl DeviceBuffer {
    pub fn try_new_zeroed(len: usize) -> Result<Self> {
        // Leave room to realign and stay within Layout's limits
        if len > isize::MAX as usize - 2 * SPLIT_ALIGN {
            return Err(Error::Allocation {
                size: len,
                message: "size exceeds the maximum allocation".to_string(),
                location: location!(),
            });
        }
        let storage = MutableBuffer::from_len_zeroed(len);
        if storage.as_ptr().align_offset(SPLIT_ALIGN) == 0 {
            return Ok(Self {
                storage,
                start: 0,
                len,
                reservation: None,
            });
        }
        // The global alignment of this target is smaller than ours
        let storage = MutableBuffer::from_len_zeroed(len + SPLIT_ALIGN);
        let start = storage.as_ptr().align_offset(SPLIT_ALIGN);
        if start > SPLIT_ALIGN {
            return Err(Error::internal(
                format!("cannot align allocation to {} bytes", SPLIT_ALIGN),
                location!(),
            ));
        }
        Ok(Self {
            storage,
            start,
            len,
            reservation: None,
        })
    }

    pub fn with_reservation(mut self, reservation: Reservation) -> Self {
        self.reservation = Some(reservation);
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage.as_slice()[self.start..self.start + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let (start, len) = (self.start, self.len);
        &mut self.storage.as_slice_mut()[start..start + len]
    }

    /// Make the buffer immutable and shareable.
    ///
    /// The returned buffer (and every slice of it) keeps the allocation alive;
    /// any pool reservation is released when the last one is dropped.
    pub fn freeze(self) -> Buffer {
        let (start, len) = (self.start, self.len);
        let allocation = Arc::new(DeviceAllocation {
            storage: self.storage,
            _reservation: self.reservation,
        });
        let base = allocation.storage.as_ptr() as *mut u8;
        // MutableBuffer never hands out a null pointer, even when empty
        let ptr = NonNull::new(base.wrapping_add(start)).unwrap_or(NonNull::dangling());
        // SAFETY: `ptr..ptr + len` lies within `storage`, which is owned by
        // `allocation` and never mutated again.
        unsafe { Buffer::from_custom_allocation(ptr, len, allocation) }
    }
}

/// A typed array resident on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceVec<T> {
    data: Vec<T>,
}

impl<T: Clone + Default> DeviceVec<T> {
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![T::default(); len],
        }
    }
}

impl<T> DeviceVec<T> {
    pub(crate) fn from_host(host: &[T]) -> Self
    where
        T: Clone,
    {
        Self {
            data: host.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}
