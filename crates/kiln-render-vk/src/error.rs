// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Everything here is fatal. `SUBOPTIMAL_KHR` / `ERROR_OUT_OF_DATE_KHR` from
/// acquire or present never become a `VkError`; they trigger a rebuild.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("no Vulkan-capable physical device found")]
    NoPhysicalDevice,

    #[error("physical device is missing required extensions: {}", .0.join(", "))]
    MissingDeviceExtensions(Vec<String>),

    #[error("requested validation layer {0} is not installed")]
    MissingValidationLayer(String),

    #[error("no queue family supports graphics")]
    NoGraphicsQueueFamily,

    #[error("no queue family can present to the surface")]
    NoPresentQueueFamily,

    #[error("surface offers no formats or no present modes")]
    NoPresentationSupport,

    #[error("surface no longer offers format {0:?}; the render pass depends on it")]
    SurfaceFormatChanged(vk::Format),

    #[error("failed to read shader {}: {source}", path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader {} is not valid SPIR-V: {source}", path.display())]
    ShaderInvalid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no host-visible memory type for the vertex buffer")]
    NoHostVisibleMemory,

    #[error("acquired image index {0} has no framebuffer")]
    ImageIndexOutOfRange(u32),

    #[error("{call} failed: {result}")]
    Call {
        call: &'static str,
        result: vk::Result,
    },
}

pub type RenderResult<T> = Result<T, VkError>;

/// Names the failing entry point, like `anyhow::Context` does for strings.
pub(crate) trait VkCall<T> {
    fn call(self, call: &'static str) -> RenderResult<T>;
}

impl<T> VkCall<T> for Result<T, vk::Result> {
    fn call(self, call: &'static str) -> RenderResult<T> {
        self.map_err(|result| VkError::Call { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_names_the_entry_point() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .call("vkQueueSubmit")
            .unwrap_err();
        assert!(matches!(
            err,
            VkError::Call {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
    }

    #[test]
    fn missing_extensions_are_listed() {
        let err = VkError::MissingDeviceExtensions(vec!["VK_KHR_swapchain".into()]);
        assert_eq!(
            err.to_string(),
            "physical device is missing required extensions: VK_KHR_swapchain"
        );
    }
}
