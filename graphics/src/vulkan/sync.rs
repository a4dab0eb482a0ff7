//! Vulkan synchronization primitives (fences, semaphores, events).
//!
//! All three queue their native handle for deferred destruction when dropped,
//! since a submission may still be about to signal or wait on them.

use std::sync::Arc;

use ash::vk;

use super::context::DeviceContext;
use crate::deletion::PendingObject;
use crate::vk_check;

/// CPU-waitable completion signal.
pub struct Fence {
    context: Arc<DeviceContext>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled.
    pub fn new(context: &Arc<DeviceContext>, signaled: bool) -> Self {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = vk_check!(unsafe { context.device().create_fence(&fence_info, None) });
        Self {
            context: Arc::clone(context),
            fence,
        }
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until the fence is signaled.
    pub fn wait(&self) {
        vk_check!(unsafe {
            self.context
                .device()
                .wait_for_fences(&[self.fence], true, u64::MAX)
        });
    }

    /// Return the fence to the unsignaled state.
    pub fn reset(&self) {
        vk_check!(unsafe { self.context.device().reset_fences(&[self.fence]) });
    }

    pub fn is_signaled(&self) -> bool {
        vk_check!(unsafe { self.context.device().get_fence_status(self.fence) })
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::Fence(self.fence));
    }
}

/// GPU-to-GPU ordering between submissions.
pub struct Semaphore {
    context: Arc<DeviceContext>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(context: &Arc<DeviceContext>) -> Self {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore =
            vk_check!(unsafe { context.device().create_semaphore(&semaphore_info, None) });
        Self {
            context: Arc::clone(context),
            semaphore,
        }
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::Semaphore(self.semaphore));
    }
}

/// Host- or device-settable flag, usable for fine-grained GPU/CPU signaling.
pub struct Event {
    context: Arc<DeviceContext>,
    event: vk::Event,
}

impl Event {
    pub fn new(context: &Arc<DeviceContext>) -> Self {
        let event_info = vk::EventCreateInfo::default();
        let event = vk_check!(unsafe { context.device().create_event(&event_info, None) });
        Self {
            context: Arc::clone(context),
            event,
        }
    }

    pub fn handle(&self) -> vk::Event {
        self.event
    }

    pub fn is_set(&self) -> bool {
        vk_check!(unsafe { self.context.device().get_event_status(self.event) })
    }

    pub fn set(&self) {
        vk_check!(unsafe { self.context.device().set_event(self.event) });
    }

    pub fn reset(&self) {
        vk_check!(unsafe { self.context.device().reset_event(self.event) });
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.context
            .deletion()
            .queue_object_deletion(PendingObject::Event(self.event));
    }
}
