// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::any::Any;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lance_core::{Error, Result};
use rayon::prelude::*;
use snafu::location;
use tracing::instrument;

use crate::device::Device;
use crate::launch::LaunchConfig;
use crate::memory::DeviceVec;
use crate::warp::Warp;

// A policy function receives the name of the operation about to be issued
// (a kernel name, "memcpy_htod" or "memcpy_dtoh") and may fail it.
pub trait StreamPolicyFn: Fn(&str) -> Result<()> + Send + Sync {}
impl<F> StreamPolicyFn for F where F: Fn(&str) -> Result<()> + Send + Sync {}
impl Debug for dyn StreamPolicyFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamPolicy")
    }
}
pub type StreamPolicy = Arc<dyn StreamPolicyFn>;

pub const MEMCPY_HOST_TO_DEVICE: &str = "memcpy_htod";
pub const MEMCPY_DEVICE_TO_HOST: &str = "memcpy_dtoh";

/// An ordered execution queue.
///
/// Operations issued on the same stream execute in issue order.  The first
/// fatal error (an invalid launch, a faulting kernel, a failed transfer) is
/// sticky: every later operation on the stream fails with it.  Cloning a
/// stream yields another handle to the same queue.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: usize,
    device: Arc<Device>,
    sticky_error: Mutex<Option<String>>,
    policy: Mutex<Option<StreamPolicy>>,
    num_launches: AtomicUsize,
    num_transfers: AtomicUsize,
}

impl Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("num_launches", &self.num_launches())
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(id: usize, device: Arc<Device>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id,
                device,
                sticky_error: Mutex::new(None),
                policy: Mutex::new(None),
                num_launches: AtomicUsize::new(0),
                num_transfers: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.inner.device
    }

    /// Install a policy that is consulted before every operation.
    ///
    /// Typically used in tests to simulate device faults.
    pub fn set_policy(&self, policy: StreamPolicy) {
        *self
            .inner
            .policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(policy);
    }

    pub fn clear_policy(&self) {
        *self
            .inner
            .policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of kernels that executed work on this stream
    pub fn num_launches(&self) -> usize {
        self.inner.num_launches.load(Ordering::Relaxed)
    }

    /// Number of host/device transfers issued on this stream
    pub fn num_transfers(&self) -> usize {
        self.inner.num_transfers.load(Ordering::Relaxed)
    }

    /// The launch shape this stream's device uses for `num_elements` indices
    pub fn launch_config(&self, num_elements: usize) -> LaunchConfig {
        let config = self.device().config();
        LaunchConfig::for_num_elements(num_elements, config.block_size, config.max_grid_size)
    }

    /// Launch a kernel with one work item per warp.
    ///
    /// `work[w]` holds whatever warp `w` needs exclusive access to (typically
    /// the disjoint slices of output it writes).  The grid has
    /// `config.concurrent_warps()` warp slots; slot `s` runs warps `s`, `s +
    /// stride`, `s + 2 * stride`, ... so a bounded grid covers any number of
    /// warps.  A launch with no work is a no-op.
    #[instrument(level = "trace", skip_all, fields(kernel = %kernel, warps = work.len()))]
    pub fn launch<W, F>(&self, kernel: &str, config: LaunchConfig, work: Vec<W>, body: F) -> Result<()>
    where
        W: Send,
        F: Fn(Warp, W) + Send + Sync,
    {
        self.begin(kernel)?;
        if let Err(message) = config.check() {
            return Err(self.fail(kernel, message));
        }
        if work.is_empty() {
            return Ok(());
        }

        let stride = config.concurrent_warps().min(work.len());
        let per_slot = work.len().div_ceil(stride);
        let mut slots = (0..stride)
            .map(|_| Vec::with_capacity(per_slot))
            .collect::<Vec<Vec<(usize, W)>>>();
        for (index, item) in work.into_iter().enumerate() {
            slots[index % stride].push((index, item));
        }

        self.inner.num_launches.fetch_add(1, Ordering::Relaxed);
        let body = &body;
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.device().pool().install(|| {
                slots.into_par_iter().for_each(|slot| {
                    for (index, item) in slot {
                        body(Warp::new(index), item);
                    }
                })
            })
        }));
        result.map_err(|payload| self.fail(kernel, panic_message(payload.as_ref())))
    }

    /// Copy host data into device memory.
    pub fn copy_to_device<T: Clone>(&self, host: &[T]) -> Result<DeviceVec<T>> {
        self.begin(MEMCPY_HOST_TO_DEVICE)?;
        self.inner.num_transfers.fetch_add(1, Ordering::Relaxed);
        Ok(DeviceVec::from_host(host))
    }

    /// Copy device data back to the host.
    ///
    /// This is a synchronization point: everything issued before it on this
    /// stream has completed once it returns.
    pub fn copy_to_host<T: Clone>(&self, device: &DeviceVec<T>, host: &mut [T]) -> Result<()> {
        self.begin(MEMCPY_DEVICE_TO_HOST)?;
        if device.len() != host.len() {
            return Err(Error::internal(
                format!(
                    "device to host copy of {} elements into a buffer of {}",
                    device.len(),
                    host.len()
                ),
                location!(),
            ));
        }
        self.inner.num_transfers.fetch_add(1, Ordering::Relaxed);
        host.clone_from_slice(device.as_slice());
        Ok(())
    }

    /// Wait for all issued work and report any error raised by it.
    pub fn synchronize(&self) -> Result<()> {
        match self.sticky_error() {
            Some(message) => Err(Error::Execution {
                kernel: "synchronize".to_string(),
                message,
                location: location!(),
            }),
            None => Ok(()),
        }
    }

    fn sticky_error(&self) -> Option<String> {
        self.inner
            .sticky_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin(&self, op: &str) -> Result<()> {
        if let Some(message) = self.sticky_error() {
            return Err(Error::Execution {
                kernel: op.to_string(),
                message: format!("stream {} is in an error state: {}", self.id(), message),
                location: location!(),
            });
        }
        let policy = self
            .inner
            .policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(policy) = policy {
            if let Err(err) = policy(op) {
                return Err(self.fail(op, err.to_string()));
            }
        }
        Ok(())
    }

    fn fail(&self, op: &str, message: String) -> Error {
        log::warn!("Stream {} failed in {}: {}", self.id(), op, message);
        let mut sticky = self
            .inner
            .sticky_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sticky.is_none() {
            *sticky = Some(message.clone());
        }
        Error::Execution {
            kernel: op.to_string(),
            message,
            location: location!(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("kernel panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("kernel panicked: {}", msg)
    } else {
        "kernel panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use rstest::rstest;

    use super::*;
    use crate::config::DeviceConfig;
    use crate::warp::{num_warps, WARP_SIZE};

    fn test_stream() -> Stream {
        Device::try_new(DeviceConfig::default().with_num_threads(4))
            .unwrap()
            .create_stream()
    }

    #[rstest]
    #[test_log::test]
    fn test_grid_stride_covers_every_warp_once(
        #[values(1, 2, 7)] grid_dim: u32,
        #[values(32, 64, 256)] block_dim: u32,
        #[values(0, 1, 31, 32, 33, 1000, 4096)] num_elements: usize,
    ) {
        let stream = test_stream();
        let mut out = vec![0u32; num_elements];
        let work = out.chunks_mut(WARP_SIZE).collect::<Vec<_>>();
        stream
            .launch("fill", LaunchConfig::new(grid_dim, block_dim), work, |warp, chunk| {
                for (lane, value) in chunk.iter_mut().enumerate() {
                    *value += (warp.first_index() + lane) as u32 + 1;
                }
            })
            .unwrap();
        let expected = (1..=num_elements as u32).collect::<Vec<_>>();
        assert_eq!(out, expected);
        assert_eq!(stream.num_launches(), usize::from(num_elements > 0));
    }

    #[test]
    fn test_ballot_single_writer() {
        let stream = test_stream();
        let rows = 100;
        let mut words = vec![0u32; num_warps(rows)];
        let writes = AtomicU32::new(0);
        let work = words.iter_mut().collect::<Vec<_>>();
        stream
            .launch("vote", stream.launch_config(rows), work, |warp, word| {
                let range = warp.indices(rows);
                *word = warp.ballot(|lane| lane < range.len() && (range.start + lane) % 3 == 0);
                writes.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(writes.load(Ordering::Relaxed) as usize, num_warps(rows));
        for row in 0..rows {
            let bit = words[row / 32] >> (row % 32) & 1;
            assert_eq!(bit == 1, row % 3 == 0, "row {}", row);
        }
    }

    #[test]
    fn test_invalid_launch_is_sticky() {
        let stream = test_stream();
        let err = stream
            .launch("bad", LaunchConfig::new(1, 48), vec![()], |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
        assert!(stream.synchronize().is_err());
        // Later work fails too
        let err = stream
            .launch("good", LaunchConfig::new(1, 32), vec![()], |_, _| {})
            .unwrap_err();
        assert!(err.to_string().contains("error state"));
        assert_eq!(stream.num_launches(), 0);
    }

    #[test]
    fn test_kernel_panic_is_execution_error() {
        let stream = test_stream();
        let err = stream
            .launch("boom", LaunchConfig::new(1, 32), vec![0usize, 1], |_, item| {
                if item == 1 {
                    panic!("lane fault");
                }
            })
            .unwrap_err();
        assert!(err.to_string().contains("lane fault"));
        assert!(stream.synchronize().is_err());
    }

    #[test]
    fn test_policy_failure() {
        let stream = test_stream();
        stream.set_policy(Arc::new(|op: &str| {
            if op == MEMCPY_DEVICE_TO_HOST {
                Err(Error::internal("injected", location!()))
            } else {
                Ok(())
            }
        }));
        let device = stream.copy_to_device(&[1u64, 2, 3]).unwrap();
        let mut host = vec![0u64; 3];
        assert!(stream.copy_to_host(&device, &mut host).is_err());
        stream.clear_policy();
        // The failure stays on the stream
        assert!(stream.synchronize().is_err());
    }

    #[test]
    fn test_round_trip_transfer() {
        let stream = test_stream();
        let device = stream.copy_to_device(&[5i32, 6, 7]).unwrap();
        let mut host = vec![0i32; 3];
        stream.copy_to_host(&device, &mut host).unwrap();
        assert_eq!(host, vec![5, 6, 7]);
        assert_eq!(stream.num_transfers(), 2);
        assert!(stream.synchronize().is_ok());

        let mut wrong = vec![0i32; 2];
        assert!(stream.copy_to_host(&device, &mut wrong).is_err());
    }
}
