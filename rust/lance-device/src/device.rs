// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use lance_core::{Error, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use snafu::location;

use crate::config::{DeviceConfig, MAX_THREADS_PER_BLOCK};
use crate::stream::Stream;
use crate::warp::WARP_SIZE;

static DEFAULT_DEVICE: OnceLock<Arc<Device>> = OnceLock::new();

/// Static properties of a device, queried when sizing launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProperties {
    pub warp_size: usize,
    pub max_threads_per_block: u32,
    pub multiprocessor_count: usize,
}

/// An execution device.  Warps run on a dedicated worker pool so device work
/// never competes with the caller's own rayon pool.
pub struct Device {
    config: DeviceConfig,
    pool: ThreadPool,
    next_stream_id: AtomicUsize,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .finish()
    }
}

impl Device {
    pub fn try_new(config: DeviceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|idx| format!("lance-device-{}", idx))
            .build()
            .map_err(|e| Error::Execution {
                kernel: "device_init".to_string(),
                message: e.to_string(),
                location: location!(),
            })?;
        log::debug!(
            "Created device with {} workers, block size {}, max grid {}",
            config.num_threads,
            config.block_size,
            config.max_grid_size
        );
        Ok(Arc::new(Self {
            config,
            pool,
            next_stream_id: AtomicUsize::new(0),
        }))
    }

    /// The process-wide device configured from the environment.
    pub fn default_device() -> Result<Arc<Self>> {
        if let Some(device) = DEFAULT_DEVICE.get() {
            return Ok(device.clone());
        }
        let device = Self::try_new(DeviceConfig::default())?;
        // Another thread may have won the race, either device is fine to hand out
        Ok(DEFAULT_DEVICE.get_or_init(|| device).clone())
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            warp_size: WARP_SIZE,
            max_threads_per_block: MAX_THREADS_PER_BLOCK,
            multiprocessor_count: self.config.num_threads,
        }
    }

    /// Create a new ordered execution queue on this device.
    pub fn create_stream(self: &Arc<Self>) -> Stream {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        Stream::new(id, self.clone())
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}
