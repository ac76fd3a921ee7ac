// SPDX-License-Identifier: CEPL-1.0
//! Swapchain negotiation, images, views and framebuffers.
//!
//! Rebuild is all-or-nothing: the old images/views/framebuffers and the
//! swapchain are destroyed (after device idle) before a new set is built.

use ash::vk;
use kiln_render::RenderSize;
use tracing::{debug, info};

use crate::context::GraphicsContext;
use crate::error::{RenderResult, VkCall, VkError};
use crate::negotiate::{QueueFamilyIndices, SurfaceState};

pub(crate) struct SwapchainSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query(surface: &SurfaceState, phys: vk::PhysicalDevice) -> RenderResult<Self> {
        let loader = &surface.loader;
        let caps = unsafe { loader.get_physical_device_surface_capabilities(phys, surface.handle) }
            .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = unsafe { loader.get_physical_device_surface_formats(phys, surface.handle) }
            .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(phys, surface.handle) }
                .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        Ok(Self {
            caps,
            formats,
            present_modes,
        })
    }
}

pub(crate) fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

// FIFO is the one mode every implementation must support.
pub(crate) fn choose_present_mode(_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: want
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: want
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    // 0 == no max
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Sharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl Sharing {
    pub fn for_families(families: QueueFamilyIndices) -> Self {
        if families.is_shared() {
            Sharing::Exclusive
        } else {
            Sharing::Concurrent([families.graphics, families.present])
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Sharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            Sharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn indices(&self) -> &[u32] {
        match self {
            Sharing::Exclusive => &[],
            Sharing::Concurrent(indices) => indices,
        }
    }
}

/// Every decision needed to create a swapchain, made without touching the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: Sharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// `pinned` keeps a rebuild on the format the render pass was made for.
    pub fn new(
        support: &SwapchainSupport,
        size: RenderSize,
        families: QueueFamilyIndices,
        pinned: Option<vk::SurfaceFormatKHR>,
    ) -> RenderResult<Self> {
        if support.formats.is_empty() || support.present_modes.is_empty() {
            return Err(VkError::NoPresentationSupport);
        }

        let format = match pinned {
            Some(p) if support.formats.contains(&p) => p,
            Some(p) => return Err(VkError::SurfaceFormatChanged(p.format)),
            None => choose_surface_format(&support.formats).ok_or(VkError::NoPresentationSupport)?,
        };

        Ok(Self {
            format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.caps, size),
            image_count: choose_image_count(&support.caps),
            sharing: Sharing::for_families(families),
            pre_transform: support.caps.current_transform,
        })
    }

    pub unsafe fn for_surface(
        ctx: &GraphicsContext,
        surface: &SurfaceState,
        size: RenderSize,
        pinned: Option<vk::SurfaceFormatKHR>,
    ) -> RenderResult<Self> {
        let support = unsafe { SwapchainSupport::query(surface, ctx.physical_device) }?;
        Self::new(&support, size, ctx.families, pinned)
    }

    /// A minimized window can report a 0x0 surface; no swapchain may be
    /// created until it grows again.
    pub fn has_area(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// Builds view then framebuffer for each image, in order. On failure the
/// records created so far come back with the error so they can be destroyed;
/// a record whose framebuffer failed carries a null framebuffer.
pub(crate) fn assemble_images<E>(
    images: &[vk::Image],
    mut make_view: impl FnMut(vk::Image) -> Result<vk::ImageView, E>,
    mut make_framebuffer: impl FnMut(vk::ImageView) -> Result<vk::Framebuffer, E>,
) -> Result<Vec<SwapchainImage>, (Vec<SwapchainImage>, E)> {
    let mut out = Vec::with_capacity(images.len());
    for &image in images {
        let view = match make_view(image) {
            Ok(v) => v,
            Err(e) => return Err((out, e)),
        };
        let framebuffer = match make_framebuffer(view) {
            Ok(fb) => fb,
            Err(e) => {
                out.push(SwapchainImage {
                    image,
                    view,
                    framebuffer: vk::Framebuffer::null(),
                });
                return Err((out, e));
            }
        };
        out.push(SwapchainImage {
            image,
            view,
            framebuffer,
        });
    }
    Ok(out)
}

fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

/// The live swapchain. `images` holds image, view and framebuffer together,
/// so the three sequences are index-aligned by construction.
#[derive(Default)]
pub(crate) struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
}

impl SwapchainState {
    pub unsafe fn create(
        ctx: &GraphicsContext,
        surface: &SurfaceState,
        plan: &SwapchainPlan,
        render_pass: vk::RenderPass,
    ) -> RenderResult<Self> {
        let device = &ctx.device;
        let indices = plan.sharing.indices();

        info!(
            "swapchain: format {:?} / {:?}, present_mode {:?}, extent {}x{}, images {}, sharing {:?}",
            plan.format.format,
            plan.format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            plan.image_count,
            plan.sharing.mode(),
        );

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: plan.sharing.mode(),
            queue_family_index_count: indices.len() as u32,
            p_queue_family_indices: if indices.is_empty() {
                std::ptr::null()
            } else {
                indices.as_ptr()
            },
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let handle = unsafe { ctx.swapchain_loader.create_swapchain(&swap_info, None) }
            .call("vkCreateSwapchainKHR")?;

        let (viewport, scissor) = full_viewport(plan.extent);
        let mut state = Self {
            handle,
            format: plan.format,
            extent: plan.extent,
            images: Vec::new(),
            viewport,
            scissor,
        };

        // The driver may hand back more images than requested.
        let images = match unsafe { ctx.swapchain_loader.get_swapchain_images(handle) }
            .call("vkGetSwapchainImagesKHR")
        {
            Ok(images) => images,
            Err(e) => {
                unsafe { state.destroy_all(ctx) };
                return Err(e);
            }
        };

        let assembled = assemble_images(
            &images,
            |image| unsafe { create_image_view(device, image, plan.format.format) },
            |view| unsafe { create_framebuffer(device, render_pass, view, plan.extent) },
        );
        match assembled {
            Ok(records) => state.images = records,
            Err((partial, e)) => {
                state.images = partial;
                unsafe { state.destroy_all(ctx) };
                return Err(e);
            }
        }

        debug!("swapchain holds {} images", state.images.len());
        Ok(state)
    }

    /// Holds until the next rebuild, which resets to the full extent.
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.viewport = viewport;
    }

    /// Negative offsets are invalid for vkCmdSetScissor and clamp to 0.
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.offset.x.max(0),
                y: scissor.offset.y.max(0),
            },
            extent: scissor.extent,
        };
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.images
            .get(image_index as usize)
            .map(|record| record.framebuffer)
    }

    pub unsafe fn destroy_framebuffers(&mut self, device: &ash::Device) {
        for record in &mut self.images {
            unsafe { device.destroy_framebuffer(record.framebuffer, None) };
            record.framebuffer = vk::Framebuffer::null();
        }
    }

    pub unsafe fn destroy_image_views(&mut self, device: &ash::Device) {
        for record in &mut self.images {
            unsafe { device.destroy_image_view(record.view, None) };
            record.view = vk::ImageView::null();
        }
    }

    pub unsafe fn destroy_swapchain(&mut self, ctx: &GraphicsContext) {
        unsafe { ctx.swapchain_loader.destroy_swapchain(self.handle, None) };
        self.handle = vk::SwapchainKHR::null();
        self.extent = vk::Extent2D::default();
        self.images.clear();
    }

    unsafe fn destroy_all(&mut self, ctx: &GraphicsContext) {
        unsafe {
            self.destroy_framebuffers(&ctx.device);
            self.destroy_image_views(&ctx.device);
            self.destroy_swapchain(ctx);
        }
    }
}

unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> RenderResult<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        },
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    unsafe { device.create_image_view(&iv_info, None) }.call("vkCreateImageView")
}

unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> RenderResult<vk::Framebuffer> {
    let fb_info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: 1,
        p_attachments: &view,
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    unsafe { device.create_framebuffer(&fb_info, None) }.call("vkCreateFramebuffer")
}
