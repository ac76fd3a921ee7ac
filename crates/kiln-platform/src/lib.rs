// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Windowing collaborator. The app reaches winit through this crate.

use anyhow::{Context, Result};
use tracing::debug;

pub use winit;

use winit::dpi::LogicalSize;
use winit::window::{Icon, Window, WindowAttributes};

/// 2×2 RGBA checkerboard: white, black / black, white.
pub const ICON_SIZE: u32 = 2;
pub const ICON_RGBA: [u8; 16] = [
    255, 255, 255, 255, 0, 0, 0, 255, //
    0, 0, 0, 255, 255, 255, 255, 255,
];

pub fn window_icon() -> Result<Icon> {
    Icon::from_rgba(ICON_RGBA.to_vec(), ICON_SIZE, ICON_SIZE).context("building window icon")
}

/// Normal (windowed, resizable) window with title, size and icon set.
pub fn window_attributes(title: &str, width: u32, height: u32) -> Result<WindowAttributes> {
    debug!("window attributes: \"{}\" {}x{}", title, width, height);
    Ok(Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width, height))
        .with_resizable(true)
        .with_window_icon(Some(window_icon()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_is_one_rgba_pixel_per_cell() {
        assert_eq!(ICON_RGBA.len() as u32, ICON_SIZE * ICON_SIZE * 4);
        assert!(window_icon().is_ok());
    }

    #[test]
    fn attributes_carry_title_and_icon() {
        let attrs = window_attributes("kiln", 800, 600).unwrap();
        assert_eq!(attrs.title, "kiln");
        assert!(attrs.window_icon.is_some());
        assert!(attrs.resizable);
    }
}
