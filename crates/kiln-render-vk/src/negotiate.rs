// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical device, queue families and logical device.
//!
//! STRICT ORDER:
//! 1) instance (validation layer checked here, before any device exists)
//! 2) surface from THIS instance
//! 3) physical device + queue families queried AGAINST THIS surface
//! 4) logical device with one queue per unique family

use std::ffi::{c_char, CStr, CString};

use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::{RenderResult, VkCall, VkError};

pub const DEFAULT_VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub(crate) const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

/// Errors unless `requested` is in the instance layer list. Names must match exactly.
pub(crate) fn check_validation_layer(
    requested: &CStr,
    available: &[vk::LayerProperties],
) -> RenderResult<()> {
    if available
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == requested))
    {
        Ok(())
    } else {
        Err(VkError::MissingValidationLayer(
            requested.to_string_lossy().into_owned(),
        ))
    }
}

pub(crate) fn missing_extensions(
    required: &[&CStr],
    available: &[vk::ExtensionProperties],
) -> Vec<String> {
    required
        .iter()
        .filter(|req| {
            !available
                .iter()
                .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == *req))
        })
        .map(|req| req.to_string_lossy().into_owned())
        .collect()
}

/// Queue families as discovered; either may still be unresolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilies {
    pub fn resolve(self) -> RenderResult<QueueFamilyIndices> {
        let graphics = self.graphics.ok_or(VkError::NoGraphicsQueueFamily)?;
        let present = self.present.ok_or(VkError::NoPresentQueueFamily)?;
        Ok(QueueFamilyIndices { graphics, present })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// First graphics-capable family and first family that can present.
pub(crate) fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> RenderResult<bool>,
) -> RenderResult<QueueFamilies> {
    let mut found = QueueFamilies::default();
    for (i, props) in families.iter().enumerate() {
        let index = i as u32;
        if found.graphics.is_none() && props.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            found.graphics = Some(index);
        }
        if found.present.is_none() && supports_present(index)? {
            found.present = Some(index);
        }
        if found.graphics.is_some() && found.present.is_some() {
            break;
        }
    }
    Ok(found)
}

pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
    validation_layer: Option<&CStr>,
) -> RenderResult<Instance> {
    let app = CString::new(app_name).unwrap_or_else(|_| CString::from(c"kiln"));

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: app.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let layers: Vec<*const c_char> = match validation_layer {
        Some(layer) => {
            let available =
                unsafe { entry.enumerate_instance_layer_properties() }
                    .call("vkEnumerateInstanceLayerProperties")?;
            check_validation_layer(layer, &available)?;
            info!("found validation layer {}", layer.to_string_lossy());
            vec![layer.as_ptr()]
        }
        None => Vec::new(),
    };

    let ext_slice = ash_window::enumerate_required_extensions(display_raw)
        .call("enumerate_required_extensions")?;

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_slice.len() as u32,
        pp_enabled_extension_names: ext_slice.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance =
        unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;
    info!("created Vulkan instance");
    Ok(instance)
}

/// Presentation surface bound to the window; destroyed at shutdown only.
pub(crate) struct SurfaceState {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

impl SurfaceState {
    pub unsafe fn create(
        entry: &Entry,
        instance: &Instance,
        display_raw: RawDisplayHandle,
        window_raw: RawWindowHandle,
    ) -> RenderResult<Self> {
        let loader = surface::Instance::new(entry, instance);
        let handle =
            unsafe { ash_window::create_surface(entry, instance, display_raw, window_raw, None) }
                .call("ash_window::create_surface")?;
        Ok(Self { loader, handle })
    }

    pub unsafe fn destroy(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
        self.handle = vk::SurfaceKHR::null();
    }
}

pub(crate) struct Negotiated {
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilyIndices,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// Picks the first physical device, checks its extensions and queue
/// families against `surface`, and creates the logical device.
pub(crate) unsafe fn negotiate(
    instance: &Instance,
    surface: &SurfaceState,
) -> RenderResult<Negotiated> {
    let phys = unsafe { instance.enumerate_physical_devices() }
        .call("vkEnumeratePhysicalDevices")?
        .first()
        .copied()
        .ok_or(VkError::NoPhysicalDevice)?;

    let props = unsafe { instance.get_physical_device_properties(phys) };
    info!(
        "using physical device {}",
        props.device_name_as_c_str().unwrap_or_default().to_string_lossy()
    );

    let exts = unsafe { instance.enumerate_device_extension_properties(phys) }
        .call("vkEnumerateDeviceExtensionProperties")?;
    let missing = missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &exts);
    if !missing.is_empty() {
        return Err(VkError::MissingDeviceExtensions(missing));
    }

    let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let families = find_queue_families(&qprops, |i| {
        unsafe {
            surface
                .loader
                .get_physical_device_surface_support(phys, i, surface.handle)
        }
        .call("vkGetPhysicalDeviceSurfaceSupportKHR")
    })?
    .resolve()?;
    info!(
        "queue families: graphics={} present={}",
        families.graphics, families.present
    );

    // One create-info per unique family; duplicates are a validation error.
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();
    let device_exts: Vec<*const c_char> =
        REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device =
        unsafe { instance.create_device(phys, &dinfo, None) }.call("vkCreateDevice")?;
    let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(families.present, 0) };
    debug!("created logical device and queues");

    Ok(Negotiated {
        physical_device: phys,
        families,
        device,
        graphics_queue,
        present_queue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str) -> vk::LayerProperties {
        let mut p = vk::LayerProperties::default();
        for (dst, b) in p.layer_name.iter_mut().zip(name.bytes()) {
            *dst = b as c_char;
        }
        p
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut p = vk::ExtensionProperties::default();
        for (dst, b) in p.extension_name.iter_mut().zip(name.bytes()) {
            *dst = b as c_char;
        }
        p
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn validation_layer_found() {
        let available = [
            layer("VK_LAYER_MESA_device_select"),
            layer("VK_LAYER_KHRONOS_validation"),
        ];
        assert!(check_validation_layer(DEFAULT_VALIDATION_LAYER, &available).is_ok());
    }

    #[test]
    fn missing_validation_layer_is_fatal() {
        let available = [layer("VK_LAYER_MESA_device_select")];
        let err = check_validation_layer(DEFAULT_VALIDATION_LAYER, &available).unwrap_err();
        match err {
            VkError::MissingValidationLayer(name) => {
                assert_eq!(name, "VK_LAYER_KHRONOS_validation")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn layer_prefix_does_not_match() {
        let available = [layer("VK_LAYER_KHRONOS_validation_extra")];
        assert!(check_validation_layer(DEFAULT_VALIDATION_LAYER, &available).is_err());
    }

    #[test]
    fn unterminated_names_never_match() {
        let mut full = vk::LayerProperties::default();
        full.layer_name.fill(b'A' as c_char);
        assert!(check_validation_layer(DEFAULT_VALIDATION_LAYER, &[full]).is_err());

        let mut ext = vk::ExtensionProperties::default();
        ext.extension_name.fill(b'A' as c_char);
        assert_eq!(
            missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &[ext]),
            vec!["VK_KHR_swapchain".to_owned()]
        );
    }

    #[test]
    fn swapchain_extension_required() {
        let available = [extension("VK_KHR_maintenance1")];
        assert_eq!(
            missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &available),
            vec!["VK_KHR_swapchain".to_owned()]
        );

        let available = [extension("VK_KHR_maintenance1"), extension("VK_KHR_swapchain")];
        assert!(missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &available).is_empty());
    }

    #[test]
    fn shared_family() {
        let props = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let f = find_queue_families(&props, |_| Ok(true))
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(f, QueueFamilyIndices { graphics: 0, present: 0 });
        assert!(f.is_shared());
        assert_eq!(f.unique(), vec![0]);
    }

    #[test]
    fn split_families_take_first_match() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let f = find_queue_families(&props, |i| Ok(i >= 2))
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(f, QueueFamilyIndices { graphics: 1, present: 2 });
        assert!(!f.is_shared());
        assert_eq!(f.unique(), vec![1, 2]);
    }

    #[test]
    fn no_graphics_family() {
        let props = [family(vk::QueueFlags::COMPUTE)];
        let err = find_queue_families(&props, |_| Ok(true))
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, VkError::NoGraphicsQueueFamily));
    }

    #[test]
    fn no_present_family_is_a_distinct_error() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        let found = find_queue_families(&props, |_| Ok(false)).unwrap();
        assert_eq!(found.graphics, Some(0));
        assert_eq!(found.present, None);
        assert!(matches!(found.resolve(), Err(VkError::NoPresentQueueFamily)));
    }

    #[test]
    fn present_query_failure_propagates() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        let err = find_queue_families(&props, |_| {
            Err::<bool, _>(vk::Result::ERROR_SURFACE_LOST_KHR).call("vkGetPhysicalDeviceSurfaceSupportKHR")
        })
        .unwrap_err();
        assert!(matches!(
            err,
            VkError::Call {
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
                ..
            }
        ));
    }
}
