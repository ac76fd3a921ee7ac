// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use kiln_core::{init_tracing, DEFAULT_FILTER};
use kiln_render::{RenderSize, Renderer};
use kiln_render_vk::VkRenderer;
use std::time::Instant;
use tracing::{debug, error, info};

use kiln_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{AppCfg, Args};

struct App {
    cfg: AppCfg,
    // Field order matters: the renderer must drop before the window.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    exiting: bool,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            renderer: None,
            window: None,
            render_size: RenderSize::new(1, 1),
            exiting: false,
            fatal: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let attrs = kiln_platform::window_attributes(&w.title, w.width, w.height)?;
        let window = event_loop.create_window(attrs).context("create_window")?;

        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let renderer = VkRenderer::new(
            &window,
            &window,
            self.render_size,
            &self.cfg.renderer_desc(),
        )
        .context("renderer init")?;
        let extent = renderer.extent();
        info!("swapchain extent {}x{}", extent.width, extent.height);

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Log, tear the renderer down, leave the loop; `main` reports the error.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        self.fatal = Some(e);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.create(event_loop) {
                self.fail(event_loop, e);
                return;
            }
            info!(
                "window {}x{}, renderer ready",
                self.render_size.width, self.render_size.height
            );
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                info!(
                    "Resized → {}x{}",
                    self.render_size.width, self.render_size.height
                );
                let res = match &mut self.renderer {
                    Some(r) => r.resize(self.render_size),
                    None => Ok(()),
                };
                if let Err(e) = res {
                    self.fail(event_loop, e.context("resize"));
                } else if let Some(r) = &self.renderer {
                    let extent = r.extent();
                    debug!("swapchain extent {}x{}", extent.width, extent.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let res = match &mut self.renderer {
                    Some(r) => r.render(),
                    None => return,
                };
                match res {
                    // count only frames that reached the screen
                    Ok(outcome) if outcome.presented() => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(_) => {}
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        let paused = self.renderer.as_ref().is_some_and(|r| r.is_paused());
        if paused {
            // Minimized: sleep until the next event.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing(DEFAULT_FILTER);
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config);
    cfg.apply_args(&args);
    info!(
        "validation = {}, shaders = {} / {}",
        cfg.render.validation,
        cfg.render.vertex_shader.display(),
        cfg.render.fragment_shader.display()
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            info!("clean shutdown");
            Ok(())
        }
    }
}
