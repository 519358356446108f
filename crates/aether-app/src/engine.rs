//! Ties the render pipeline, the planet scene and the atmosphere
//! precomputation together.

use std::time::Instant;

use aether_config::Config;
use aether_planet::{AtmoPreComputer, AtmosphereError, PrecomputeProgress};
use aether_render::{Extent2d, FrameStats, GraphicsContext, RenderPipeline, TargetId, WindowEvents};
use tracing::{debug, error, info};

use crate::demo::PlanetScene;
use crate::error::AppError;
use crate::overlay::{SharedOverlayInfo, StatsOverlay};

/// Frames between overlay reports.
const OVERLAY_INTERVAL: u64 = 120;

pub struct Engine {
    ctx: GraphicsContext,
    events: WindowEvents,
    pipeline: RenderPipeline,
    precomputer: AtmoPreComputer,
    scene: PlanetScene,
    /// Set when precomputation failed in a way retrying cannot fix.
    precompute_error: Option<AtmosphereError>,
    overlay: Option<SharedOverlayInfo>,
    last_frame: Instant,
    fps: f32,
}

impl Engine {
    pub fn new(mut ctx: GraphicsContext, config: &Config) -> Result<Self, AppError> {
        let mut events = WindowEvents::new();
        let mut pipeline = RenderPipeline::initialize(&mut ctx, &config.render, &mut events)?;

        let mut precomputer = AtmoPreComputer::new(&config.atmosphere);
        precomputer.init(&mut ctx)?;

        let size = ctx.window_size();
        let scene = PlanetScene::new(&mut ctx, config, size)?;

        let overlay = config.debug.show_frame_stats.then(|| {
            let info = SharedOverlayInfo::default();
            pipeline.add_overlay(Box::new(StatsOverlay::new(info.clone(), OVERLAY_INTERVAL)));
            info
        });

        info!(
            "Engine ready at {}x{}, atmosphere needs {} precompute steps",
            size.width,
            size.height,
            precomputer.total_steps()
        );
        Ok(Self {
            ctx,
            events,
            pipeline,
            precomputer,
            scene,
            precompute_error: None,
            overlay,
            last_frame: Instant::now(),
            fps: 0.0,
        })
    }

    /// One fixed simulation step. Runs at most one unit of atmosphere
    /// precomputation so frames stay responsive while the tables build.
    pub fn tick(&mut self, dt: f64) {
        self.scene.update(dt);
        if self.precompute_error.is_some() || self.scene.planet().atmosphere().is_ready() {
            return;
        }
        let atmosphere = self.scene.planet_mut().atmosphere_mut();
        match self.precomputer.precalculate(&mut self.ctx, atmosphere) {
            Ok(PrecomputeProgress::Running { order, step }) => {
                debug!("atmosphere precompute at order {order}, step {step}");
            }
            Ok(PrecomputeProgress::Finished) => info!("atmosphere tables ready"),
            Ok(PrecomputeProgress::Shared) => info!("atmosphere tables shared from cache"),
            Err(AtmosphereError::AlreadyFinished) => {}
            Err(e) => {
                error!("atmosphere precompute failed, sky stays unlit: {e}");
                self.precompute_error = Some(e);
            }
        }
    }

    /// Render one frame to the surface and present it.
    pub fn frame(&mut self) -> Result<FrameStats, AppError> {
        let stats = self
            .pipeline
            .draw(&mut self.ctx, &mut [&mut self.scene], TargetId::SURFACE)?;
        self.pipeline.swap_buffers(&mut self.ctx)?;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        if elapsed > 0.0 {
            self.fps = 1.0 / elapsed;
        }
        if let Some(info) = &self.overlay {
            let mut info = info.borrow_mut();
            info.stats = stats;
            info.fps = self.fps;
            info.altitude = self.scene.altitude();
            info.atmosphere = self.atmosphere_status();
        }
        Ok(stats)
    }

    /// Resize to the window's physical size. A minimized window reports a
    /// zero side and leaves targets and camera untouched.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let size = Extent2d::new(width, height);
        self.ctx.resize_surface(size);
        self.events.notify_resize(size);
        self.scene.set_aspect(size);
    }

    fn atmosphere_status(&self) -> String {
        if self.scene.planet().atmosphere().is_ready() {
            "ready".to_string()
        } else if let Some(e) = &self.precompute_error {
            format!("failed ({e})")
        } else {
            format!(
                "order {} step {}",
                self.precomputer.order(),
                self.precomputer.step()
            )
        }
    }

    pub fn scene(&self) -> &PlanetScene {
        &self.scene
    }

    pub fn precomputer(&self) -> &AtmoPreComputer {
        &self.precomputer
    }

    pub fn precomputer_mut(&mut self) -> &mut AtmoPreComputer {
        &mut self.precomputer
    }

    pub fn precompute_error(&self) -> Option<&AtmosphereError> {
        self.precompute_error.as_ref()
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn context_mut(&mut self) -> &mut GraphicsContext {
        &mut self.ctx
    }
}
