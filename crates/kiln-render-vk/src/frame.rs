// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use kiln_render::{FrameOutcome, RenderSize};
use tracing::{debug, info, warn};

use crate::error::{RenderResult, VkCall, VkError};

#[derive(Default)]
pub(crate) struct FrameSyncState {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSyncState {
    /// Fills `self` as objects are created so teardown can clean a failure.
    pub unsafe fn init(&mut self, device: &ash::Device, graphics_family: u32) -> RenderResult<()> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: graphics_family,
            ..Default::default()
        };
        self.command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.call("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .call("vkAllocateCommandBuffers")?;
        self.command_buffer = buffers.into_iter().next().unwrap_or_default();

        self.image_available = unsafe { create_semaphore(device) }?;
        self.render_finished = unsafe { create_semaphore(device) }?;

        // Signaled so the first wait returns immediately.
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        self.in_flight = unsafe { device.create_fence(&fence_info, None) }.call("vkCreateFence")?;
        debug!("frame sync objects ready");
        Ok(())
    }

    /// A suboptimal acquire signals `image_available` but nothing waits on
    /// it, so the semaphore is swapped for an unsignaled one.
    pub unsafe fn renew_image_available(&mut self, device: &ash::Device) -> RenderResult<()> {
        unsafe { device.destroy_semaphore(self.image_available, None) };
        self.image_available = vk::Semaphore::null();
        self.image_available = unsafe { create_semaphore(device) }?;
        Ok(())
    }

    pub unsafe fn free_command_buffer(&mut self, device: &ash::Device) {
        if self.command_buffer != vk::CommandBuffer::null() {
            unsafe { device.free_command_buffers(self.command_pool, &[self.command_buffer]) };
        }
        self.command_buffer = vk::CommandBuffer::null();
    }

    pub unsafe fn destroy_pool(&mut self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.command_pool, None) };
        self.command_pool = vk::CommandPool::null();
    }

    pub unsafe fn destroy_semaphores(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
        self.image_available = vk::Semaphore::null();
        self.render_finished = vk::Semaphore::null();
    }

    pub unsafe fn destroy_fence(&mut self, device: &ash::Device) {
        unsafe { device.destroy_fence(self.in_flight, None) };
        self.in_flight = vk::Fence::null();
    }
}

unsafe fn create_semaphore(device: &ash::Device) -> RenderResult<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    unsafe { device.create_semaphore(&info, None) }.call("vkCreateSemaphore")
}

/// Where the frame cycle currently is. Left at the failing step on error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum FrameState {
    #[default]
    Idle,
    WaitingOnFence,
    ImageAcquired,
    Recording,
    Submitted,
    Presented,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AcquireStatus {
    Ready(u32),
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RebuildCause {
    AcquireSuboptimal,
    AcquireOutOfDate,
    PresentSuboptimal,
    PresentOutOfDate,
    Resize,
}

impl RebuildCause {
    /// Only a suboptimal acquire leaves `image_available` signaled with no waiter.
    pub fn renews_image_available(self) -> bool {
        matches!(self, RebuildCause::AcquireSuboptimal)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rebuilt {
    Ready,
    NoArea,
}

/// `vkAcquireNextImageKHR` as ash reports it: `(index, suboptimal)`.
pub(crate) fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RenderResult<AcquireStatus> {
    match result {
        Ok((index, false)) => Ok(AcquireStatus::Ready(index)),
        Ok((index, true)) => Ok(AcquireStatus::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(result) => Err(VkError::Call {
            call: "vkAcquireNextImageKHR",
            result,
        }),
    }
}

/// `vkQueuePresentKHR` as ash reports it: `suboptimal`.
pub(crate) fn classify_present(result: Result<bool, vk::Result>) -> RenderResult<SwapchainStatus> {
    match result {
        Ok(false) => Ok(SwapchainStatus::Optimal),
        Ok(true) => Ok(SwapchainStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
        Err(result) => Err(VkError::Call {
            call: "vkQueuePresentKHR",
            result,
        }),
    }
}

pub(crate) trait FrameBackend {
    fn wait_for_previous_frame(&mut self) -> RenderResult<()>;
    fn acquire_image(&mut self) -> RenderResult<AcquireStatus>;
    fn reset_fence(&mut self) -> RenderResult<()>;
    fn record(&mut self, image_index: u32) -> RenderResult<()>;
    fn submit(&mut self) -> RenderResult<()>;
    fn present(&mut self, image_index: u32) -> RenderResult<SwapchainStatus>;
    fn rebuild_swapchain(&mut self, cause: RebuildCause) -> RenderResult<Rebuilt>;
}

/// Drives wait → acquire → record → submit → present with one frame in flight.
/// While paused no step runs and no swapchain exists to draw into.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FrameSynchronizer {
    state: FrameState,
    presented: u64,
    paused: bool,
}

impl FrameSynchronizer {
    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resize<B: FrameBackend>(&mut self, backend: &mut B, size: RenderSize) -> RenderResult<()> {
        if size.is_empty() {
            if !self.paused {
                info!("render size is zero, pausing");
            }
            self.paused = true;
            return Ok(());
        }
        self.paused = false;
        self.rebuild(backend, RebuildCause::Resize)
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B, cause: RebuildCause) -> RenderResult<()> {
        if backend.rebuild_swapchain(cause)? == Rebuilt::NoArea {
            info!("surface has no area, pausing");
            self.paused = true;
        }
        Ok(())
    }

    pub fn run_frame<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<FrameOutcome> {
        if self.paused {
            return Ok(FrameOutcome::Paused);
        }

        self.state = FrameState::WaitingOnFence;
        backend.wait_for_previous_frame()?;

        let image_index = match backend.acquire_image()? {
            AcquireStatus::Ready(index) => index,
            AcquireStatus::Suboptimal(_) => {
                return self.skip(backend, RebuildCause::AcquireSuboptimal);
            }
            AcquireStatus::OutOfDate => {
                return self.skip(backend, RebuildCause::AcquireOutOfDate);
            }
        };
        self.state = FrameState::ImageAcquired;

        // Only now is this frame certain to submit work that signals the fence.
        backend.reset_fence()?;

        self.state = FrameState::Recording;
        backend.record(image_index)?;

        backend.submit()?;
        self.state = FrameState::Submitted;

        let status = backend.present(image_index)?;
        self.state = FrameState::Presented;

        // An out-of-date present never reached the screen.
        let outcome = match status {
            SwapchainStatus::Optimal => {
                self.presented += 1;
                FrameOutcome::Presented
            }
            SwapchainStatus::Suboptimal => {
                self.presented += 1;
                self.rebuild(backend, RebuildCause::PresentSuboptimal)?;
                FrameOutcome::PresentedThenRebuilt
            }
            SwapchainStatus::OutOfDate => {
                warn!("swapchain stale at present, rebuilding");
                self.rebuild(backend, RebuildCause::PresentOutOfDate)?;
                FrameOutcome::Skipped
            }
        };
        self.state = FrameState::Idle;
        Ok(outcome)
    }

    fn skip<B: FrameBackend>(&mut self, backend: &mut B, cause: RebuildCause) -> RenderResult<FrameOutcome> {
        warn!("swapchain stale at acquire ({:?}), rebuilding", cause);
        self.rebuild(backend, cause)?;
        self.state = FrameState::Idle;
        Ok(FrameOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Wait,
        Acquire,
        ResetFence,
        Record(u32),
        Submit,
        Present(u32),
        Rebuild(RebuildCause),
    }

    /// Replays scripted acquire/present results and records every call.
    #[derive(Default)]
    struct FakeBackend {
        acquires: Vec<RenderResult<AcquireStatus>>,
        presents: Vec<RenderResult<SwapchainStatus>>,
        calls: Vec<Call>,
        surface_area: bool,
    }

    impl FakeBackend {
        fn scripted(
            acquires: Vec<RenderResult<AcquireStatus>>,
            presents: Vec<RenderResult<SwapchainStatus>>,
        ) -> Self {
            let mut fake = Self {
                acquires,
                presents,
                calls: Vec::new(),
                surface_area: true,
            };
            fake.acquires.reverse();
            fake.presents.reverse();
            fake
        }
    }

    impl FrameBackend for FakeBackend {
        fn wait_for_previous_frame(&mut self) -> RenderResult<()> {
            self.calls.push(Call::Wait);
            Ok(())
        }
        fn acquire_image(&mut self) -> RenderResult<AcquireStatus> {
            self.calls.push(Call::Acquire);
            self.acquires.pop().unwrap_or(Ok(AcquireStatus::Ready(0)))
        }
        fn reset_fence(&mut self) -> RenderResult<()> {
            self.calls.push(Call::ResetFence);
            Ok(())
        }
        fn record(&mut self, image_index: u32) -> RenderResult<()> {
            self.calls.push(Call::Record(image_index));
            Ok(())
        }
        fn submit(&mut self) -> RenderResult<()> {
            self.calls.push(Call::Submit);
            Ok(())
        }
        fn present(&mut self, image_index: u32) -> RenderResult<SwapchainStatus> {
            self.calls.push(Call::Present(image_index));
            self.presents.pop().unwrap_or(Ok(SwapchainStatus::Optimal))
        }
        fn rebuild_swapchain(&mut self, cause: RebuildCause) -> RenderResult<Rebuilt> {
            self.calls.push(Call::Rebuild(cause));
            Ok(if self.surface_area {
                Rebuilt::Ready
            } else {
                Rebuilt::NoArea
            })
        }
    }

    #[test]
    fn normal_frame_runs_every_step_in_order() {
        let mut fake = FakeBackend::scripted(vec![Ok(AcquireStatus::Ready(2))], vec![]);
        let mut sync = FrameSynchronizer::default();

        let outcome = sync.run_frame(&mut fake).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            fake.calls,
            vec![
                Call::Wait,
                Call::Acquire,
                Call::ResetFence,
                Call::Record(2),
                Call::Submit,
                Call::Present(2),
            ]
        );
        assert_eq!(sync.state(), FrameState::Idle);
        assert_eq!(sync.presented(), 1);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_and_skips_then_resumes() {
        let mut fake = FakeBackend::scripted(
            vec![Ok(AcquireStatus::OutOfDate), Ok(AcquireStatus::Ready(1))],
            vec![],
        );
        let mut sync = FrameSynchronizer::default();

        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Skipped);
        assert_eq!(
            fake.calls,
            vec![
                Call::Wait,
                Call::Acquire,
                Call::Rebuild(RebuildCause::AcquireOutOfDate)
            ]
        );
        assert_eq!(sync.presented(), 0);

        fake.calls.clear();
        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Presented);
        assert!(fake.calls.contains(&Call::Submit));
        assert!(fake.calls.contains(&Call::Present(1)));
        assert_eq!(sync.presented(), 1);
    }

    #[test]
    fn suboptimal_acquire_rebuilds_without_touching_the_fence() {
        let mut fake = FakeBackend::scripted(vec![Ok(AcquireStatus::Suboptimal(0))], vec![]);
        let mut sync = FrameSynchronizer::default();

        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Skipped);
        assert!(!fake.calls.contains(&Call::ResetFence));
        assert!(!fake.calls.contains(&Call::Submit));
        assert_eq!(
            fake.calls.last(),
            Some(&Call::Rebuild(RebuildCause::AcquireSuboptimal))
        );
    }

    #[test]
    fn stale_present_rebuilds_after_presenting() {
        for (status, cause, outcome, presented) in [
            (
                SwapchainStatus::Suboptimal,
                RebuildCause::PresentSuboptimal,
                FrameOutcome::PresentedThenRebuilt,
                1,
            ),
            (
                SwapchainStatus::OutOfDate,
                RebuildCause::PresentOutOfDate,
                FrameOutcome::Skipped,
                0,
            ),
        ] {
            let mut fake = FakeBackend::scripted(vec![], vec![Ok(status)]);
            let mut sync = FrameSynchronizer::default();

            assert_eq!(sync.run_frame(&mut fake).unwrap(), outcome);
            let n = fake.calls.len();
            assert_eq!(fake.calls[n - 2], Call::Present(0));
            assert_eq!(fake.calls[n - 1], Call::Rebuild(cause));
            assert_eq!(sync.presented(), presented);
            assert_eq!(outcome.presented(), presented == 1);
            assert_eq!(sync.state(), FrameState::Idle);
        }
    }

    #[test]
    fn zero_size_pauses_until_the_next_real_resize() {
        let mut fake = FakeBackend::scripted(vec![], vec![]);
        let mut sync = FrameSynchronizer::default();

        sync.resize(&mut fake, RenderSize::new(0, 0)).unwrap();
        assert!(sync.is_paused());
        assert!(fake.calls.is_empty());

        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Paused);
        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Paused);
        assert!(fake.calls.is_empty());

        sync.resize(&mut fake, RenderSize::new(800, 600)).unwrap();
        assert!(!sync.is_paused());
        assert_eq!(fake.calls, vec![Call::Rebuild(RebuildCause::Resize)]);

        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn zero_area_surface_pauses_instead_of_drawing() {
        let mut fake = FakeBackend::scripted(vec![Ok(AcquireStatus::OutOfDate)], vec![]);
        fake.surface_area = false;
        let mut sync = FrameSynchronizer::default();

        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Skipped);
        assert!(sync.is_paused());

        fake.calls.clear();
        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Paused);
        assert!(fake.calls.is_empty());

        // Still minimized: the resize rebuild finds no area again.
        sync.resize(&mut fake, RenderSize::new(800, 600)).unwrap();
        assert!(sync.is_paused());

        fake.surface_area = true;
        sync.resize(&mut fake, RenderSize::new(800, 600)).unwrap();
        assert!(!sync.is_paused());
        assert_eq!(sync.run_frame(&mut fake).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn only_suboptimal_acquire_renews_image_available() {
        assert!(RebuildCause::AcquireSuboptimal.renews_image_available());
        for cause in [
            RebuildCause::AcquireOutOfDate,
            RebuildCause::PresentSuboptimal,
            RebuildCause::PresentOutOfDate,
            RebuildCause::Resize,
        ] {
            assert!(!cause.renews_image_available(), "{cause:?}");
        }
    }

    #[test]
    fn fatal_acquire_stops_the_frame() {
        let err = VkError::Call {
            call: "vkAcquireNextImageKHR",
            result: vk::Result::ERROR_DEVICE_LOST,
        };
        let mut fake = FakeBackend::scripted(vec![Err(err)], vec![]);
        let mut sync = FrameSynchronizer::default();

        assert!(sync.run_frame(&mut fake).is_err());
        assert_eq!(fake.calls, vec![Call::Wait, Call::Acquire]);
        assert_eq!(sync.state(), FrameState::WaitingOnFence);
    }

    #[test]
    fn acquire_statuses() {
        assert_eq!(classify_acquire(Ok((3, false))).unwrap(), AcquireStatus::Ready(3));
        assert_eq!(classify_acquire(Ok((1, true))).unwrap(), AcquireStatus::Suboptimal(1));
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireStatus::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(VkError::Call {
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
                ..
            })
        ));
    }

    #[test]
    fn present_statuses() {
        assert_eq!(classify_present(Ok(false)).unwrap(), SwapchainStatus::Optimal);
        assert_eq!(classify_present(Ok(true)).unwrap(), SwapchainStatus::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            SwapchainStatus::OutOfDate
        );
        assert!(classify_present(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }
}
