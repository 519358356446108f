//! Window creation and event handling via winit.
//!
//! [`AppState`] implements winit's [`ApplicationHandler`]; [`run`] starts the
//! event loop and blocks until the window closes.

use std::sync::Arc;

use aether_config::Config;
use aether_render::{Extent2d, GraphicsContext, WgpuDevice, init_gpu_blocking};
use tracing::{error, info, instrument};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use crate::engine::Engine;
use crate::error::AppError;
use crate::game_loop::{FIXED_DT, GameLoop};

/// [`WindowAttributes`] for the configured window.
pub fn window_attributes_from_config(config: &Config) -> WindowAttributes {
    let attrs = WindowAttributes::default()
        .with_title(config.window.title.clone())
        .with_inner_size(winit::dpi::LogicalSize::new(
            config.window.width as f64,
            config.window.height as f64,
        ));
    if config.window.fullscreen {
        attrs.with_fullscreen(Some(Fullscreen::Borderless(None)))
    } else {
        attrs
    }
}

pub struct AppState {
    config: Config,
    window: Option<Arc<Window>>,
    engine: Option<Engine>,
    game_loop: GameLoop,
    frame_limit: Option<u64>,
    frames: u64,
    failure: Option<AppError>,
}

impl AppState {
    pub fn new(config: Config, frame_limit: Option<u64>) -> Self {
        Self {
            config,
            window: None,
            engine: None,
            game_loop: GameLoop::new(),
            frame_limit,
            frames: 0,
            failure: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<(), AppError> {
        let window = Arc::new(event_loop.create_window(window_attributes_from_config(&self.config))?);
        let inner = window.inner_size();
        let size = Extent2d::new(inner.width, inner.height);
        info!(
            "Window created: {}x{} (scale: {:.2})",
            size.width,
            size.height,
            window.scale_factor()
        );

        let gpu = init_gpu_blocking(Some(window.clone()))?;
        let ctx = GraphicsContext::new(Box::new(WgpuDevice::new(gpu, size)));
        self.engine = Some(Engine::new(ctx, &self.config)?);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: AppError) {
        error!("{e}");
        self.failure = Some(e);
        event_loop.exit();
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(engine) = &mut self.engine {
                    engine.resize(new_size.width, new_size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(engine) = &mut self.engine else {
                    return;
                };
                for _ in 0..self.game_loop.advance() {
                    engine.tick(FIXED_DT);
                }
                if let Err(e) = engine.frame() {
                    self.fail(event_loop, e);
                    return;
                }
                self.frames += 1;
                if self.frame_limit.is_some_and(|limit| self.frames >= limit) {
                    info!("Frame limit of {} reached", self.frames);
                    event_loop.exit();
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Open the window and run until it is closed or `frames` frames were drawn.
#[instrument(skip(config))]
pub fn run(config: Config, frames: Option<u64>) -> Result<(), AppError> {
    let event_loop = EventLoop::new()?;
    let mut app = AppState::new(config, frames);
    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
