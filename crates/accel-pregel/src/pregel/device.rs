//! Simulated fixed-capacity accelerator
//!
//! Device memory is modelled as owned, capacity-tracked buffers. Data only
//! crosses the host/device boundary through [`DeviceBuffer::upload`] and
//! [`DeviceBuffer::download`], both of which fail rather than truncate.
//! Kernels are dispatched in sub-batches no wider than the device's parallel
//! width.

use std::ops::Range;

use super::config::DeviceCapacity;
use super::error::DeviceError;

/// A device-resident buffer with a fixed element capacity
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    label: &'static str,
    capacity: usize,
    data: Vec<T>,
}

impl<T: Clone> DeviceBuffer<T> {
    /// Reserve a buffer of `capacity` elements. Memory is committed on upload.
    pub fn allocate(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            capacity,
            data: Vec::new(),
        }
    }

    /// Replace the buffer contents with `host`
    pub fn upload(&mut self, host: &[T]) -> Result<(), DeviceError> {
        self.check_len(host.len())?;
        self.data.clear();
        self.data.extend_from_slice(host);
        Ok(())
    }

    /// Replace the buffer contents with owned values
    pub fn upload_vec(&mut self, host: Vec<T>) -> Result<(), DeviceError> {
        self.check_len(host.len())?;
        self.data = host;
        Ok(())
    }

    /// Fill the first `len` elements with `value`
    pub fn fill(&mut self, len: usize, value: T) -> Result<(), DeviceError> {
        self.check_len(len)?;
        self.data.clear();
        self.data.resize(len, value);
        Ok(())
    }

    /// Copy the buffer back into `host`; lengths must match exactly
    pub fn download(&self, host: &mut [T]) -> Result<(), DeviceError> {
        if host.len() != self.data.len() {
            return Err(DeviceError::LengthMismatch {
                buffer: self.label,
                device: self.data.len(),
                host: host.len(),
            });
        }
        host.clone_from_slice(&self.data);
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<(), DeviceError> {
        if len > self.capacity {
            return Err(DeviceError::CapacityExceeded {
                buffer: self.label,
                requested: len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl<T> DeviceBuffer<T> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
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

    /// Drop the contents, keeping the reservation
    pub fn release(&mut self) {
        self.data = Vec::new();
    }
}

/// Counters for transfers and kernel dispatches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub launches: u64,
    pub dispatches: u64,
}

/// Kernel launcher bound to one capacity profile
#[derive(Debug)]
pub struct Device {
    capacity: DeviceCapacity,
    stats: DeviceStats,
}

impl Device {
    pub fn new(capacity: DeviceCapacity) -> Self {
        Self {
            capacity,
            stats: DeviceStats::default(),
        }
    }

    pub fn capacity(&self) -> &DeviceCapacity {
        &self.capacity
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    /// Run `body` over `0..count` in sub-batches of at most `parallel_width`.
    ///
    /// Sub-batches run in index order; the first failing dispatch aborts the
    /// launch.
    pub fn launch<F>(&mut self, kernel: &'static str, count: usize, mut body: F) -> Result<(), DeviceError>
    where
        F: FnMut(Range<usize>) -> Result<(), DeviceError>,
    {
        self.stats.launches += 1;
        let width = self.capacity.parallel_width;
        let mut start = 0;
        while start < count {
            let end = (start + width).min(count);
            self.dispatch(kernel, start..end, &mut body)?;
            start = end;
        }
        Ok(())
    }

    /// Dispatch a single sub-batch
    pub fn dispatch<F>(&mut self, kernel: &'static str, range: Range<usize>, body: &mut F) -> Result<(), DeviceError>
    where
        F: FnMut(Range<usize>) -> Result<(), DeviceError>,
    {
        if range.len() > self.capacity.parallel_width {
            return Err(DeviceError::LaunchTooWide {
                kernel,
                requested: range.len(),
                width: self.capacity.parallel_width,
            });
        }
        self.stats.dispatches += 1;
        body(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_rejects_over_capacity() {
        let mut buf = DeviceBuffer::allocate("edges", 3);
        assert!(buf.upload(&[1, 2, 3]).is_ok());

        let err = buf.upload(&[1, 2, 3, 4]).unwrap_err();
        assert_eq!(
            err,
            DeviceError::CapacityExceeded {
                buffer: "edges",
                requested: 4,
                capacity: 3
            }
        );
        // Failed upload leaves previous contents intact
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_download_requires_matching_length() {
        let mut buf = DeviceBuffer::allocate("values", 4);
        buf.upload(&[1.0, 2.0]).unwrap();

        let mut host = [0.0; 2];
        buf.download(&mut host).unwrap();
        assert_eq!(host, [1.0, 2.0]);

        let mut short = [0.0; 1];
        assert_eq!(buf.download(&mut short).unwrap_err().code(), "E_LENGTH");
    }

    #[test]
    fn test_launch_splits_by_parallel_width() {
        let mut device = Device::new(DeviceCapacity::new(2, 8, 8, 3));
        let mut seen = Vec::new();
        device
            .launch("scan", 8, |range| {
                seen.push(range);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![0..3, 3..6, 6..8]);
        assert_eq!(device.stats(), DeviceStats { launches: 1, dispatches: 3 });
    }

    #[test]
    fn test_dispatch_rejects_wide_range() {
        let mut device = Device::new(DeviceCapacity::new(2, 8, 8, 2));
        let err = device.dispatch("scan", 0..3, &mut |_| Ok(())).unwrap_err();
        assert_eq!(err.code(), "E_LAUNCH");
    }

    #[test]
    fn test_launch_stops_on_failure() {
        let mut device = Device::new(DeviceCapacity::new(2, 8, 8, 2));
        let mut calls = 0;
        let result = device.launch("faulty", 6, |range| {
            calls += 1;
            if range.start == 2 {
                return Err(DeviceError::KernelFailed {
                    kernel: "faulty",
                    reason: "injected".into(),
                });
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
