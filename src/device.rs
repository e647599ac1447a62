//! Optional device-memory capabilities
//!
//! The workload engine can stage I/O buffers through device memory and
//! register host buffers or file handles with a device-DMA subsystem. Both
//! are modeled as capabilities behind traits so the core never names a
//! specific vendor API; when no provider is installed, requesting either
//! capability fails at preparation time with a clear message.

use crate::error::{WorkerError, WorkerResult};
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Opaque registration handle returned by a DMA registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaHandle(pub u64);

/// Per-worker staged device memory: one device buffer per ring slot.
pub trait DeviceStaging: Send + std::fmt::Debug {
    /// Copy a host buffer into the slot's device buffer (pre-write path).
    fn copy_to_device(&mut self, slot: usize, host: &[u8]) -> WorkerResult<()>;

    /// Copy the slot's device buffer back into a host buffer (post-read path).
    fn copy_from_device(&mut self, slot: usize, host: &mut [u8]) -> WorkerResult<()>;
}

/// Per-worker DMA registration of host buffers and open file handles.
pub trait DmaRegistrar: Send {
    fn register_buffer(&mut self, buf_ptr: *const u8, len: usize) -> WorkerResult<()>;

    fn deregister_buffer(&mut self, buf_ptr: *const u8) -> WorkerResult<()>;

    fn register_handle(&mut self, fd: RawFd) -> WorkerResult<DmaHandle>;

    fn deregister_handle(&mut self, handle: DmaHandle) -> WorkerResult<()>;
}

/// Factory for per-worker capability instances. The device for a worker is
/// selected by the provider from the worker's rank (round-robin across
/// devices is the expected policy).
pub trait CapabilityProvider: Send + Sync {
    fn open_staging(
        &self,
        worker_rank: usize,
        slot_count: usize,
        buf_len: usize,
    ) -> WorkerResult<Box<dyn DeviceStaging>>;

    fn open_dma(&self, worker_rank: usize) -> WorkerResult<Box<dyn DmaRegistrar>>;
}

/// The capability set handed to the worker manager. Empty by default; an
/// embedding with real device support installs a provider.
#[derive(Clone, Default)]
pub struct Capabilities {
    provider: Option<Arc<dyn CapabilityProvider>>,
}

impl Capabilities {
    pub fn none() -> Self {
        Self { provider: None }
    }

    pub fn with_provider(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn open_staging(
        &self,
        worker_rank: usize,
        slot_count: usize,
        buf_len: usize,
    ) -> WorkerResult<Box<dyn DeviceStaging>> {
        match &self.provider {
            Some(provider) => provider.open_staging(worker_rank, slot_count, buf_len),
            None => Err(WorkerError::failed(
                "Device staging requested, but no device capability is available",
            )),
        }
    }

    pub fn open_dma(&self, worker_rank: usize) -> WorkerResult<Box<dyn DmaRegistrar>> {
        match &self.provider {
            Some(provider) => provider.open_dma(worker_rank),
            None => Err(WorkerError::failed(
                "DMA registration requested, but no device capability is available",
            )),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Host-memory fake of the device capabilities for tests.

    use super::*;
    use parking_lot::Mutex;

    #[derive(Default, Debug)]
    pub struct MockDeviceState {
        pub to_device_copies: usize,
        pub from_device_copies: usize,
        pub registered_handles: usize,
        pub deregistered_handles: usize,
    }

    pub struct MockProvider {
        pub state: Arc<Mutex<MockDeviceState>>,
    }

    #[derive(Debug)]
    struct MockStaging {
        state: Arc<Mutex<MockDeviceState>>,
        slots: Vec<Vec<u8>>,
    }

    struct MockDma {
        state: Arc<Mutex<MockDeviceState>>,
        next_handle: u64,
    }

    impl CapabilityProvider for MockProvider {
        fn open_staging(
            &self,
            _worker_rank: usize,
            slot_count: usize,
            buf_len: usize,
        ) -> WorkerResult<Box<dyn DeviceStaging>> {
            Ok(Box::new(MockStaging {
                state: self.state.clone(),
                slots: vec![vec![0u8; buf_len]; slot_count],
            }))
        }

        fn open_dma(&self, _worker_rank: usize) -> WorkerResult<Box<dyn DmaRegistrar>> {
            Ok(Box::new(MockDma {
                state: self.state.clone(),
                next_handle: 1,
            }))
        }
    }

    impl DeviceStaging for MockStaging {
        fn copy_to_device(&mut self, slot: usize, host: &[u8]) -> WorkerResult<()> {
            self.slots[slot][..host.len()].copy_from_slice(host);
            self.state.lock().to_device_copies += 1;
            Ok(())
        }

        fn copy_from_device(&mut self, slot: usize, host: &mut [u8]) -> WorkerResult<()> {
            let len = host.len();
            host.copy_from_slice(&self.slots[slot][..len]);
            self.state.lock().from_device_copies += 1;
            Ok(())
        }
    }

    impl DmaRegistrar for MockDma {
        fn register_buffer(&mut self, _buf_ptr: *const u8, _len: usize) -> WorkerResult<()> {
            Ok(())
        }

        fn deregister_buffer(&mut self, _buf_ptr: *const u8) -> WorkerResult<()> {
            Ok(())
        }

        fn register_handle(&mut self, _fd: RawFd) -> WorkerResult<DmaHandle> {
            let handle = DmaHandle(self.next_handle);
            self.next_handle += 1;
            self.state.lock().registered_handles += 1;
            Ok(handle)
        }

        fn deregister_handle(&mut self, _handle: DmaHandle) -> WorkerResult<()> {
            self.state.lock().deregistered_handles += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_provider_fails_clearly() {
        let caps = Capabilities::none();

        let err = caps.open_staging(0, 4, 4096).unwrap_err();
        assert!(err.to_string().contains("no device capability"));

        assert!(caps.open_dma(0).is_err());
    }

    #[test]
    fn test_mock_staging_round_trip() {
        let state = Arc::new(parking_lot::Mutex::new(testing::MockDeviceState::default()));
        let caps = Capabilities::with_provider(Arc::new(testing::MockProvider {
            state: state.clone(),
        }));

        let mut staging = caps.open_staging(0, 2, 8).unwrap();

        let host_out = [7u8; 8];
        staging.copy_to_device(1, &host_out).unwrap();

        let mut host_in = [0u8; 8];
        staging.copy_from_device(1, &mut host_in).unwrap();

        assert_eq!(host_in, host_out);
        assert_eq!(state.lock().to_device_copies, 1);
        assert_eq!(state.lock().from_device_copies, 1);
    }
}
