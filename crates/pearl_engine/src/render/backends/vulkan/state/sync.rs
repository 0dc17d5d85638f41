//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for binary semaphores, timeline semaphores and fences. Every
//! CPU-side wait takes a timeout and reports [`VulkanError::Timeout`] instead
//! of blocking forever on a hung device.

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Binary semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Timeline semaphore with CPU-side tracking of the last scheduled value
pub struct TimelineSemaphore {
    device: Device,
    semaphore: vk::Semaphore,
    last_value: u64,
    name: &'static str,
}

impl TimelineSemaphore {
    /// Create a timeline semaphore starting at zero
    pub fn new(device: Device, name: &'static str) -> VulkanResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore, last_value: 0, name })
    }

    /// Get the semaphore handle
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Value the most recent submission will signal
    pub const fn last_value(&self) -> u64 {
        self.last_value
    }

    /// Value the next submission should signal
    pub const fn upcoming_value(&self) -> u64 {
        self.last_value + 1
    }

    /// Record that a submission signalling `value` was queued
    pub fn commit(&mut self, value: u64) {
        self.last_value = self.last_value.max(value);
    }

    /// Block until the semaphore reaches `value`
    pub fn wait(&self, value: u64, timeout_ms: u64) -> VulkanResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ms.saturating_mul(1_000_000)) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::Timeout { what: self.name, timeout_ms }),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Block until every scheduled signal has landed
    pub fn wait_latest(&self, timeout_ms: u64) -> VulkanResult<()> {
        self.wait(self.last_value, timeout_ms)
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until signaled
    pub fn wait(&self, what: &'static str, timeout_ms: u64) -> VulkanResult<()> {
        match unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ms.saturating_mul(1_000_000)) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::Timeout { what, timeout_ms }),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Return to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Reset the fence and run `submit`, which queues the work signalling it
    ///
    /// When `submit` fails the fence is signalled again by an empty
    /// submission on `queue`, so later waits on it still return.
    pub fn submit_on<F>(&self, queue: vk::Queue, submit: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::Fence) -> VulkanResult<()>,
    {
        signal_or_restore(|| self.reset(), || submit(self.fence), || self.signal_empty(queue))
    }

    fn signal_empty(&self, queue: vk::Queue) -> VulkanResult<()> {
        unsafe {
            self.device.queue_submit(queue, &[], self.fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }
}

/// Reset, submit, and restore the signalled state if the submit failed
///
/// The error of `submit` is returned; a failing `restore` is only logged.
fn signal_or_restore(
    reset: impl FnOnce() -> VulkanResult<()>,
    submit: impl FnOnce() -> VulkanResult<()>,
    restore: impl FnOnce() -> VulkanResult<()>,
) -> VulkanResult<()> {
    reset()?;
    submit().map_err(|e| {
        if let Err(restore_error) = restore() {
            log::error!("Failed to re-signal fence after a failed submit: {}", restore_error);
        }
        e
    })
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_failed_submit_leaves_fence_signalled() {
        let signalled = Cell::new(true);
        let result = signal_or_restore(
            || {
                signalled.set(false);
                Ok(())
            },
            || Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
            || {
                signalled.set(true);
                Ok(())
            },
        );
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))));
        assert!(signalled.get());
    }

    #[test]
    fn test_successful_submit_skips_restore() {
        let restored = Cell::new(false);
        let result = signal_or_restore(
            || Ok(()),
            || Ok(()),
            || {
                restored.set(true);
                Ok(())
            },
        );
        assert!(result.is_ok());
        assert!(!restored.get());
    }

    #[test]
    fn test_failed_reset_submits_nothing() {
        let submitted = Cell::new(false);
        let result = signal_or_restore(
            || Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
            || {
                submitted.set(true);
                Ok(())
            },
            || Ok(()),
        );
        assert!(result.is_err());
        assert!(!submitted.get());
    }

    #[test]
    fn test_restore_error_does_not_mask_submit_error() {
        let result = signal_or_restore(
            || Ok(()),
            || Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY)),
            || Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
        );
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))));
    }
}
