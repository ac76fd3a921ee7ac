// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan renderer: device negotiation, swapchain lifecycle and the
//! single-frame-in-flight acquire → record → submit → present loop.

mod context;
mod error;
mod frame;
mod geometry;
mod negotiate;
mod pipeline;
mod render_pass;
mod swapchain;
mod teardown;

use std::ffi::CString;

use anyhow::{Context, Result};
use ash::Entry;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use kiln_render::{ClearColor, RenderSize, Renderer, RendererDesc};

use context::GraphicsContext;
use error::VkCall;
use frame::{
    classify_acquire, classify_present, AcquireStatus, FrameBackend, FrameSyncState,
    FrameSynchronizer, RebuildCause, Rebuilt, SwapchainStatus,
};
use geometry::DrawSource;
use negotiate::{create_instance, negotiate, SurfaceState};
use pipeline::{PipelineState, ShaderPaths, VertexLayout};
use render_pass::create_render_pass;
use swapchain::{SwapchainPlan, SwapchainState};
use teardown::{Teardown, TeardownStep, REBUILD_ORDER, SHUTDOWN_ORDER};

pub use ash::vk;
pub use error::{RenderResult, VkError};
pub use kiln_render::FrameOutcome;
pub use negotiate::DEFAULT_VALIDATION_LAYER;

pub struct VkRenderer {
    ctx: GraphicsContext,
    surface: SurfaceState,
    swapchain: SwapchainState,
    render_pass: vk::RenderPass,
    pipeline: PipelineState,
    sync: FrameSyncState,
    draw: DrawSource,

    clear: ClearColor,
    size: RenderSize,
    frames: FrameSynchronizer,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        debug!("tearing down after {} presented frames", self.frames.presented());
        unsafe { teardown::run(self, &SHUTDOWN_ORDER) };
    }
}

/// Instance, surface and device. Anything created before the failing step
/// is destroyed here, since no `VkRenderer` exists yet to own it.
unsafe fn create_context(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    desc: &RendererDesc,
) -> RenderResult<(GraphicsContext, SurfaceState)> {
    let entry = unsafe { Entry::load() }?;

    let dh: RawDisplayHandle = display.display_handle()?.as_raw();
    let wh: RawWindowHandle = window.window_handle()?.as_raw();

    let layer = desc
        .validation_layer
        .as_deref()
        .map(|name| CString::new(name).map_err(|_| VkError::MissingValidationLayer(name.to_owned())))
        .transpose()?;

    let instance = unsafe { create_instance(&entry, dh, &desc.app_name, layer.as_deref()) }?;

    let mut surface = match unsafe { SurfaceState::create(&entry, &instance, dh, wh) } {
        Ok(surface) => surface,
        Err(e) => {
            unsafe { instance.destroy_instance(None) };
            return Err(e);
        }
    };

    match unsafe { negotiate(&instance, &surface) } {
        Ok(negotiated) => Ok((GraphicsContext::new(entry, instance, negotiated), surface)),
        Err(e) => {
            unsafe {
                surface.destroy();
                instance.destroy_instance(None);
            }
            Err(e)
        }
    }
}

impl VkRenderer {
    /// Render pass, swapchain, pipeline, sync objects and vertex data.
    /// On failure the caller drops `self`, which tears down whatever exists.
    /// A window with no area starts paused and gets its swapchain on resize.
    unsafe fn init_resources(&mut self, desc: &RendererDesc) -> RenderResult<()> {
        let plan = unsafe { SwapchainPlan::for_surface(&self.ctx, &self.surface, self.size, None) }?;

        self.render_pass = unsafe { create_render_pass(&self.ctx.device, plan.format.format) }?;
        if plan.has_area() && !self.size.is_empty() {
            self.swapchain = unsafe {
                SwapchainState::create(&self.ctx, &self.surface, &plan, self.render_pass)
            }?;
        } else {
            info!("window has no area at startup, paused");
            self.swapchain.format = plan.format;
            self.frames.pause();
        }

        let shaders = ShaderPaths {
            vertex: desc.vertex_shader.clone(),
            fragment: desc.fragment_shader.clone(),
        };
        let layout = VertexLayout::for_geometry(&desc.geometry);
        unsafe {
            self.pipeline
                .build(&self.ctx.device, self.render_pass, &layout, &shaders)
        }?;

        unsafe { self.sync.init(&self.ctx.device, self.ctx.families.graphics) }?;

        unsafe {
            DrawSource::create(
                &self.ctx.instance,
                self.ctx.physical_device,
                &self.ctx.device,
                &desc.geometry,
                &mut self.draw,
            )
        }?;
        Ok(())
    }

    pub fn extent(&self) -> RenderSize {
        RenderSize::new(self.swapchain.extent.width, self.swapchain.extent.height)
    }

    pub fn is_paused(&self) -> bool {
        self.frames.is_paused()
    }

    /// Applies until the next swapchain rebuild.
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.swapchain.set_viewport(viewport);
    }

    /// Applies until the next swapchain rebuild.
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.swapchain.set_scissor(scissor);
    }

    fn rebuild(&mut self, cause: RebuildCause) -> RenderResult<Rebuilt> {
        info!(
            "rebuilding swapchain ({:?}) for {}x{}",
            cause, self.size.width, self.size.height
        );
        unsafe { teardown::run(self, &REBUILD_ORDER) };

        if cause.renews_image_available() {
            unsafe { self.sync.renew_image_available(&self.ctx.device) }?;
        }

        // The render pass was built for this format, so a rebuild keeps it.
        let pinned = self.swapchain.format;
        let plan = unsafe {
            SwapchainPlan::for_surface(&self.ctx, &self.surface, self.size, Some(pinned))
        }?;
        if !plan.has_area() {
            return Ok(Rebuilt::NoArea);
        }

        self.swapchain =
            unsafe { SwapchainState::create(&self.ctx, &self.surface, &plan, self.render_pass) }?;
        Ok(Rebuilt::Ready)
    }
}

impl FrameBackend for VkRenderer {
    fn wait_for_previous_frame(&mut self) -> RenderResult<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.sync.in_flight], true, u64::MAX)
        }
        .call("vkWaitForFences")
    }

    fn acquire_image(&mut self) -> RenderResult<AcquireStatus> {
        classify_acquire(unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                self.sync.image_available,
                vk::Fence::null(),
            )
        })
    }

    fn reset_fence(&mut self) -> RenderResult<()> {
        unsafe { self.ctx.device.reset_fences(&[self.sync.in_flight]) }.call("vkResetFences")
    }

    fn record(&mut self, image_index: u32) -> RenderResult<()> {
        let d = &self.ctx.device;
        let cmd = self.sync.command_buffer;
        let framebuffer = self
            .swapchain
            .framebuffer(image_index)
            .ok_or(VkError::ImageIndexOutOfRange(image_index))?;

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .call("vkResetCommandBuffer")?;

            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .call("vkBeginCommandBuffer")?;

            let clears = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear.linearized(),
                },
            }];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.swapchain.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };

            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            d.cmd_set_viewport(cmd, 0, &[self.swapchain.viewport]);
            d.cmd_set_scissor(cmd, 0, &[self.swapchain.scissor]);
            self.draw.record(d, cmd);
            d.cmd_end_render_pass(cmd);

            d.end_command_buffer(cmd).call("vkEndCommandBuffer")
        }
    }

    fn submit(&mut self) -> RenderResult<()> {
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished];
        let cmd = self.sync.command_buffer;

        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal_semaphores.len() as u32,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&submit),
                self.sync.in_flight,
            )
        }
        .call("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32) -> RenderResult<SwapchainStatus> {
        let wait_semaphores = [self.sync.render_finished];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        classify_present(unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        })
    }

    fn rebuild_swapchain(&mut self, cause: RebuildCause) -> RenderResult<Rebuilt> {
        self.rebuild(cause)
    }
}

impl Teardown for VkRenderer {
    unsafe fn destroy_step(&mut self, step: TeardownStep) {
        let instance_level = matches!(step, TeardownStep::Surface | TeardownStep::Instance);
        if !instance_level && !self.ctx.device_alive() {
            return;
        }

        let d = &self.ctx.device;
        unsafe {
            match step {
                TeardownStep::WaitIdle => {
                    if let Err(e) = d.device_wait_idle() {
                        warn!("vkDeviceWaitIdle failed during teardown: {}", e);
                    }
                }
                TeardownStep::Framebuffers => self.swapchain.destroy_framebuffers(d),
                TeardownStep::ImageViews => self.swapchain.destroy_image_views(d),
                TeardownStep::Swapchain => self.swapchain.destroy_swapchain(&self.ctx),
                TeardownStep::Surface => self.surface.destroy(),
                TeardownStep::Pipeline => self.pipeline.destroy_pipeline(d),
                TeardownStep::PipelineLayout => self.pipeline.destroy_layout(d),
                TeardownStep::RenderPass => {
                    d.destroy_render_pass(self.render_pass, None);
                    self.render_pass = vk::RenderPass::null();
                }
                TeardownStep::CommandBuffers => self.sync.free_command_buffer(d),
                TeardownStep::CommandPool => self.sync.destroy_pool(d),
                TeardownStep::Semaphores => self.sync.destroy_semaphores(d),
                TeardownStep::Fence => self.sync.destroy_fence(d),
                TeardownStep::VertexBuffer => self.draw.destroy(d),
                TeardownStep::Device => self.ctx.destroy_device(),
                TeardownStep::Instance => self.ctx.destroy_instance(),
            }
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        desc: &RendererDesc,
    ) -> Result<Self> {
        let (ctx, surface) = unsafe { create_context(window, display, desc) }?;

        let mut r = VkRenderer {
            ctx,
            surface,
            swapchain: SwapchainState::default(),
            render_pass: vk::RenderPass::null(),
            pipeline: PipelineState::default(),
            sync: FrameSyncState::default(),
            draw: DrawSource::default(),
            clear: desc.clear_color,
            size,
            frames: FrameSynchronizer::default(),
        };
        // Dropping `r` on error runs the full teardown over what was built.
        unsafe { r.init_resources(desc) }?;

        info!(
            "Vulkan swapchain ready ({}x{}, fmt {:?})",
            r.swapchain.extent.width, r.swapchain.extent.height, r.swapchain.format.format
        );
        Ok(r)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        let mut frames = self.frames;
        let res = frames.resize(self, size);
        self.frames = frames;
        Ok(res?)
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        let mut frames = self.frames;
        let outcome = frames.run_frame(self);
        self.frames = frames;
        outcome.with_context(|| format!("frame failed while {:?}", frames.state()))
    }

    fn set_clear_color(&mut self, color: ClearColor) {
        self.clear = color;
    }
}
