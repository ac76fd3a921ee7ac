// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

/// Framebuffer size in physical pixels, as reported by the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports 0 in one of the dimensions.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Clear color as authored (sRGB-ish). The renderer writes it to a
/// `*_SRGB` swapchain, so it is linearized first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl ClearColor {
    pub const GAMMA: f32 = 2.2;

    pub const BROWN: ClearColor = ClearColor([0.647, 0.165, 0.165, 1.0]);

    /// Every channel, alpha included, raised to [`Self::GAMMA`].
    pub fn linearized(self) -> [f32; 4] {
        self.0.map(|c| c.powf(Self::GAMMA))
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::BROWN
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from(rgba: [f32; 4]) -> Self {
        Self(rgba)
    }
}

/// Vertex record consumed by the pipeline: binding 0,
/// location 0 = `pos` (2×f32), location 1 = `color` (3×f32).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    pub const POS_OFFSET: u32 = std::mem::offset_of!(Vertex, pos) as u32;
    pub const COLOR_OFFSET: u32 = std::mem::offset_of!(Vertex, color) as u32;
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }
}

/// Red/green/blue triangle, clockwise in Vulkan clip space (y down).
pub const TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0]),
    Vertex::new([-0.5, 0.5], [0.0, 0.0, 1.0]),
];

#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    /// No vertex buffer; the vertex shader generates positions from
    /// `gl_VertexIndex`.
    Procedural { vertex_count: u32 },
    /// Uploaded once into a vertex buffer and bound every frame.
    Vertices(Vec<Vertex>),
}

impl Geometry {
    pub fn vertex_count(&self) -> u32 {
        match self {
            Geometry::Procedural { vertex_count } => *vertex_count,
            Geometry::Vertices(v) => v.len() as u32,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry::Procedural { vertex_count: 6 }
    }
}

#[derive(Clone, Debug)]
pub struct RendererDesc {
    pub app_name: String,
    pub clear_color: ClearColor,
    /// Instance layer to enable; startup fails if it is not installed.
    pub validation_layer: Option<String>,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub geometry: Geometry,
}

impl Default for RendererDesc {
    fn default() -> Self {
        Self {
            app_name: "kiln".to_owned(),
            clear_color: ClearColor::default(),
            validation_layer: None,
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            geometry: Geometry::default(),
        }
    }
}

/// What one call to [`Renderer::render`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Image drawn and queued for presentation.
    Presented,
    /// Presented, but the surface reported the swapchain stale, so it was rebuilt.
    PresentedThenRebuilt,
    /// The swapchain was stale; it was rebuilt and nothing reached the screen.
    Skipped,
    /// The window or its surface has no area; nothing touched the GPU.
    Paused,
}

impl FrameOutcome {
    pub fn presented(self) -> bool {
        matches!(self, FrameOutcome::Presented | FrameOutcome::PresentedThenRebuilt)
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        desc: &RendererDesc,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, color: ClearColor);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_abi() {
        assert_eq!(Vertex::POS_OFFSET, 0);
        assert_eq!(Vertex::COLOR_OFFSET, 8);
        assert_eq!(Vertex::STRIDE, 20);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&TRIANGLE).len(), 60);
    }

    #[test]
    fn clear_color_is_gamma_linearized() {
        let lin = ClearColor([0.5, 1.0, 0.0, 1.0]).linearized();
        assert!((lin[0] - 0.5f32.powf(2.2)).abs() < 1e-6);
        assert_eq!(lin[1], 1.0);
        assert_eq!(lin[2], 0.0);
        assert_eq!(lin[3], 1.0);
    }

    #[test]
    fn empty_size() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }

    #[test]
    fn only_drawn_frames_count_as_presented() {
        assert!(FrameOutcome::Presented.presented());
        assert!(FrameOutcome::PresentedThenRebuilt.presented());
        assert!(!FrameOutcome::Skipped.presented());
        assert!(!FrameOutcome::Paused.presented());
    }

    #[test]
    fn geometry_vertex_count() {
        assert_eq!(Geometry::default().vertex_count(), 6);
        assert_eq!(Geometry::Vertices(TRIANGLE.to_vec()).vertex_count(), 3);
    }
}
