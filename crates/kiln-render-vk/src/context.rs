// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::{vk, Entry, Instance};

use crate::negotiate::{Negotiated, QueueFamilyIndices};

/// Instance and device side of the renderer. Created once, owned by
/// `VkRenderer` for its whole life, destroyed last.
pub(crate) struct GraphicsContext {
    // Keeps the loaded library alive while the instance exists.
    _entry: Entry,
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub families: QueueFamilyIndices,
    pub swapchain_loader: swapchain::Device,
    device_alive: bool,
    instance_alive: bool,
}

impl GraphicsContext {
    pub fn new(entry: Entry, instance: Instance, negotiated: Negotiated) -> Self {
        let swapchain_loader = swapchain::Device::new(&instance, &negotiated.device);
        Self {
            _entry: entry,
            instance,
            physical_device: negotiated.physical_device,
            device: negotiated.device,
            graphics_queue: negotiated.graphics_queue,
            present_queue: negotiated.present_queue,
            families: negotiated.families,
            swapchain_loader,
            device_alive: true,
            instance_alive: true,
        }
    }

    pub fn device_alive(&self) -> bool {
        self.device_alive
    }

    /// Every device-level object must already be gone.
    pub unsafe fn destroy_device(&mut self) {
        if self.device_alive {
            unsafe { self.device.destroy_device(None) };
            self.device_alive = false;
        }
    }

    /// The device and surface must already be gone.
    pub unsafe fn destroy_instance(&mut self) {
        if self.instance_alive {
            unsafe { self.instance.destroy_instance(None) };
            self.instance_alive = false;
        }
    }
}
