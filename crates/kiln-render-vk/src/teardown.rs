// SPDX-License-Identifier: CEPL-1.0
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TeardownStep {
    WaitIdle,
    Framebuffers,
    ImageViews,
    Swapchain,
    Surface,
    Pipeline,
    PipelineLayout,
    RenderPass,
    CommandBuffers,
    CommandPool,
    Semaphores,
    Fence,
    VertexBuffer,
    Device,
    Instance,
}

/// Full shutdown. Dependents always go before what they were created from.
pub(crate) const SHUTDOWN_ORDER: [TeardownStep; 15] = [
    TeardownStep::WaitIdle,
    TeardownStep::Framebuffers,
    TeardownStep::ImageViews,
    TeardownStep::Swapchain,
    TeardownStep::Surface,
    TeardownStep::Pipeline,
    TeardownStep::PipelineLayout,
    TeardownStep::RenderPass,
    TeardownStep::CommandBuffers,
    TeardownStep::CommandPool,
    TeardownStep::Semaphores,
    TeardownStep::Fence,
    TeardownStep::VertexBuffer,
    TeardownStep::Device,
    TeardownStep::Instance,
];

/// The swapchain-dependent prefix of shutdown, run before every rebuild.
pub(crate) const REBUILD_ORDER: [TeardownStep; 4] = [
    TeardownStep::WaitIdle,
    TeardownStep::Framebuffers,
    TeardownStep::ImageViews,
    TeardownStep::Swapchain,
];

/// Something that owns the objects named by [`TeardownStep`].
///
/// Implementations null each handle they destroy and treat a null handle as
/// already gone, so any step may run on partially built state and no step
/// destroys anything twice.
pub(crate) trait Teardown {
    unsafe fn destroy_step(&mut self, step: TeardownStep);
}

pub(crate) unsafe fn run<T: Teardown + ?Sized>(target: &mut T, order: &[TeardownStep]) {
    for &step in order {
        debug!("teardown: {:?}", step);
        unsafe { target.destroy_step(step) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<TeardownStep>);

    impl Teardown for Recorder {
        unsafe fn destroy_step(&mut self, step: TeardownStep) {
            self.0.push(step);
        }
    }

    fn position(order: &[TeardownStep], step: TeardownStep) -> usize {
        order.iter().position(|&s| s == step).unwrap()
    }

    #[test]
    fn shutdown_runs_every_step_once_in_order() {
        let mut rec = Recorder::default();
        unsafe { run(&mut rec, &SHUTDOWN_ORDER) };
        assert_eq!(rec.0, SHUTDOWN_ORDER.to_vec());

        for (i, step) in SHUTDOWN_ORDER.iter().enumerate() {
            assert_eq!(position(&SHUTDOWN_ORDER, *step), i, "{step:?} listed twice");
        }
    }

    #[test]
    fn dependents_go_first() {
        let o = &SHUTDOWN_ORDER;
        assert_eq!(o[0], TeardownStep::WaitIdle);
        assert!(position(o, TeardownStep::Framebuffers) < position(o, TeardownStep::ImageViews));
        assert!(position(o, TeardownStep::ImageViews) < position(o, TeardownStep::Swapchain));
        assert!(position(o, TeardownStep::Swapchain) < position(o, TeardownStep::Surface));
        assert!(position(o, TeardownStep::Framebuffers) < position(o, TeardownStep::RenderPass));
        assert!(position(o, TeardownStep::Pipeline) < position(o, TeardownStep::PipelineLayout));
        assert!(position(o, TeardownStep::Pipeline) < position(o, TeardownStep::RenderPass));
        assert!(position(o, TeardownStep::CommandBuffers) < position(o, TeardownStep::CommandPool));
        assert!(position(o, TeardownStep::Fence) < position(o, TeardownStep::VertexBuffer));
        assert!(position(o, TeardownStep::VertexBuffer) < position(o, TeardownStep::Device));
        assert_eq!(o[o.len() - 2], TeardownStep::Device);
        assert_eq!(o[o.len() - 1], TeardownStep::Instance);
    }

    #[test]
    fn rebuild_is_a_prefix_of_shutdown() {
        assert_eq!(&SHUTDOWN_ORDER[..REBUILD_ORDER.len()], &REBUILD_ORDER[..]);

        let mut rec = Recorder::default();
        unsafe { run(&mut rec, &REBUILD_ORDER) };
        assert!(!rec.0.contains(&TeardownStep::Surface));
        assert!(!rec.0.contains(&TeardownStep::RenderPass));
    }
}
