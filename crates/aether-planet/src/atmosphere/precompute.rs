//! Incremental lookup-table precomputation, one unit of work per call.
//!
//! Order 0 computes transmittance, then direct irradiance and single
//! scattering. Each following order runs four steps: scattering density,
//! indirect irradiance, multiple scattering and accumulation. Progress lives
//! in the precomputer, so calls can be interleaved freely with other device
//! work across frames.

use std::sync::Arc;

use aether_config::AtmosphereConfig;
use aether_render::{
    ComputeDispatch, GraphicsContext, ProgramId, Texture, TextureDescriptor, TextureDimension,
    TextureFormat, TextureId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace};

use super::kernels::{Lut, Stage};
use super::renderer::Atmosphere;
use super::scatter::{AtmosphereParams, LutDimensions, LutKey, PrecomputeUniform};
use crate::error::AtmosphereError;

/// Finished tables, shared read-only by every atmosphere with the same key.
pub struct AtmosphereLuts {
    key: LutKey,
    dims: LutDimensions,
    transmittance: Texture,
    irradiance: Texture,
    inscatter: Texture,
}

impl AtmosphereLuts {
    pub fn key(&self) -> LutKey {
        self.key
    }

    pub fn dimensions(&self) -> &LutDimensions {
        &self.dims
    }

    pub fn transmittance(&self) -> TextureId {
        self.transmittance.id()
    }

    pub fn irradiance(&self) -> TextureId {
        self.irradiance.id()
    }

    pub fn inscatter(&self) -> TextureId {
        self.inscatter.id()
    }
}

impl std::fmt::Debug for AtmosphereLuts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtmosphereLuts")
            .field("transmittance", &self.transmittance.id())
            .field("irradiance", &self.irradiance.id())
            .field("inscatter", &self.inscatter.id())
            .finish()
    }
}

/// Where the precomputer is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrecomputeState {
    Uninitialized,
    Initialized,
    /// The next call runs `step` of scattering `order`.
    Running { order: u32, step: u32 },
    Finished,
}

/// Outcome of one successful [`AtmoPreComputer::precalculate`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrecomputeProgress {
    /// Work was done; more remains.
    Running { order: u32, step: u32 },
    /// This call completed the tables and handed them to the atmosphere.
    Finished,
    /// Tables for identical parameters already existed and were shared.
    Shared,
}

struct Job {
    key: LutKey,
    params: AtmosphereParams,
    transmittance: Texture,
    irradiance: Texture,
    inscatter: Texture,
}

/// Computes atmosphere lookup tables incrementally.
pub struct AtmoPreComputer {
    dims: LutDimensions,
    state: PrecomputeState,
    order: u32,
    step: u32,
    programs: FxHashMap<Stage, ProgramId>,
    deltas: FxHashMap<Lut, Texture>,
    produced: FxHashSet<Lut>,
    job: Option<Job>,
    cache: FxHashMap<LutKey, Arc<AtmosphereLuts>>,
}

impl AtmoPreComputer {
    pub fn new(config: &AtmosphereConfig) -> Self {
        Self::with_dimensions(LutDimensions::from(config))
    }

    pub fn with_dimensions(dims: LutDimensions) -> Self {
        Self {
            dims,
            state: PrecomputeState::Uninitialized,
            order: 0,
            step: 0,
            programs: FxHashMap::default(),
            deltas: FxHashMap::default(),
            produced: FxHashSet::default(),
            job: None,
            cache: FxHashMap::default(),
        }
    }

    /// Compile every stage and allocate the delta tables. Later calls are
    /// no-ops.
    pub fn init(&mut self, ctx: &mut GraphicsContext) -> Result<(), AtmosphereError> {
        if self.state != PrecomputeState::Uninitialized {
            return Ok(());
        }
        for stage in Stage::ALL {
            let id = ctx.create_compute_program(stage.descriptor())?;
            self.programs.insert(stage, id);
        }
        self.allocate_deltas(ctx)?;
        self.state = PrecomputeState::Initialized;
        debug!(
            "atmosphere precomputer ready ({} stages, inscatter {:?})",
            self.programs.len(),
            self.dims.inscatter_extent()
        );
        Ok(())
    }

    /// Perform one unit of work towards `atmosphere`'s tables.
    pub fn precalculate(
        &mut self,
        ctx: &mut GraphicsContext,
        atmosphere: &mut Atmosphere,
    ) -> Result<PrecomputeProgress, AtmosphereError> {
        if self.state == PrecomputeState::Uninitialized {
            return Err(AtmosphereError::NotInitialized);
        }
        let key = LutKey::new(atmosphere.params(), &self.dims);
        if atmosphere.luts().is_some_and(|luts| luts.key() == key) {
            return Err(AtmosphereError::AlreadyFinished);
        }
        if let Some(luts) = self.cache.get(&key) {
            debug!("sharing precomputed atmosphere tables");
            atmosphere.set_luts(luts.clone());
            return Ok(PrecomputeProgress::Shared);
        }
        match &self.job {
            Some(job) if job.key != key => return Err(AtmosphereError::Busy),
            Some(_) => {}
            None => self.start(ctx, key, atmosphere.params().clone())?,
        }

        self.run_step(ctx)?;
        if self.order > self.dims.max_scattering_order {
            self.finish(atmosphere);
            return Ok(PrecomputeProgress::Finished);
        }
        self.state = PrecomputeState::Running {
            order: self.order,
            step: self.step,
        };
        Ok(PrecomputeProgress::Running {
            order: self.order,
            step: self.step,
        })
    }

    /// Release the delta tables. A job that is still running cannot read
    /// them afterwards and fails with [`AtmosphereError::OutOfOrder`].
    pub fn unload(&mut self) {
        if !self.deltas.is_empty() {
            debug!("releasing atmosphere delta tables");
        }
        self.deltas.clear();
        self.produced.retain(|lut| !lut.is_delta());
    }

    pub fn state(&self) -> PrecomputeState {
        self.state
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.state == PrecomputeState::Finished
    }

    pub fn dimensions(&self) -> &LutDimensions {
        &self.dims
    }

    /// Whether delta tables are currently allocated.
    pub fn has_deltas(&self) -> bool {
        !self.deltas.is_empty()
    }

    /// Finished tables for `params`, if any.
    pub fn cached(&self, params: &AtmosphereParams) -> Option<Arc<AtmosphereLuts>> {
        self.cache.get(&LutKey::new(params, &self.dims)).cloned()
    }

    /// Number of calls needed to finish one set of tables.
    pub fn total_steps(&self) -> u32 {
        2 + 4 * self.dims.max_scattering_order
    }

    fn texture_descriptor(&self, lut: Lut) -> TextureDescriptor {
        let format = TextureFormat::Rgba32Float;
        match lut.dimension() {
            TextureDimension::D2 => {
                let size = match lut {
                    Lut::Transmittance => self.dims.transmittance,
                    _ => self.dims.irradiance,
                };
                TextureDescriptor::d2(lut.label(), size.x, size.y, format)
            }
            TextureDimension::D3 => {
                let (w, h, d) = self.dims.inscatter_extent();
                TextureDescriptor::d3(lut.label(), w, h, d, format)
            }
        }
    }

    fn allocate_deltas(&mut self, ctx: &mut GraphicsContext) -> Result<(), AtmosphereError> {
        for lut in Lut::ALL.into_iter().filter(|l| l.is_delta()) {
            let texture = ctx.create_texture(&self.texture_descriptor(lut))?;
            self.deltas.insert(lut, texture);
        }
        self.produced.retain(|lut| !lut.is_delta());
        Ok(())
    }

    fn start(
        &mut self,
        ctx: &mut GraphicsContext,
        key: LutKey,
        params: AtmosphereParams,
    ) -> Result<(), AtmosphereError> {
        if self.deltas.is_empty() {
            self.allocate_deltas(ctx)?;
        }
        let job = Job {
            key,
            params,
            transmittance: ctx.create_texture(&self.texture_descriptor(Lut::Transmittance))?,
            irradiance: ctx.create_texture(&self.texture_descriptor(Lut::Irradiance))?,
            inscatter: ctx.create_texture(&self.texture_descriptor(Lut::Inscatter))?,
        };
        info!(
            "precomputing atmosphere tables (bottom radius {} km, {} orders)",
            job.params.bottom_radius, self.dims.max_scattering_order
        );
        self.job = Some(job);
        self.produced.clear();
        self.order = 0;
        self.step = 0;
        self.state = PrecomputeState::Running { order: 0, step: 0 };
        Ok(())
    }

    fn run_step(&mut self, ctx: &mut GraphicsContext) -> Result<(), AtmosphereError> {
        let stages: &[Stage] = match (self.order, self.step) {
            (0, 0) => &[Stage::Transmittance],
            (0, _) => &[
                Stage::DirectIrradiance,
                Stage::SingleScattering,
                Stage::ClearIrradiance,
                Stage::CopyInscatter,
            ],
            (_, 0) => &[Stage::ScatteringDensity],
            (_, 1) => &[Stage::IndirectIrradiance],
            (_, 2) => &[Stage::MultipleScattering],
            _ => &[Stage::AccumulateIrradiance, Stage::AccumulateInscatter],
        };
        // The first multiple-scattering order reads single scattering, which
        // is stored without phase functions.
        let first_order = self.order == 1;
        for stage in stages {
            self.dispatch(ctx, *stage, first_order)?;
        }

        match (self.order, self.step) {
            (0, 0) => self.step = 1,
            (0, _) | (_, 3) => {
                self.order += 1;
                self.step = 0;
            }
            _ => self.step += 1,
        }
        Ok(())
    }

    fn texture(&self, lut: Lut) -> Option<TextureId> {
        if lut.is_delta() {
            return self.deltas.get(&lut).map(Texture::id);
        }
        let job = self.job.as_ref()?;
        Some(match lut {
            Lut::Transmittance => job.transmittance.id(),
            Lut::Irradiance => job.irradiance.id(),
            _ => job.inscatter.id(),
        })
    }

    fn dispatch(
        &mut self,
        ctx: &mut GraphicsContext,
        stage: Stage,
        first_order: bool,
    ) -> Result<(), AtmosphereError> {
        if let Some(missing) = stage.reads().iter().find(|l| !self.produced.contains(l)) {
            return Err(AtmosphereError::OutOfOrder {
                stage,
                missing: *missing,
            });
        }
        let program = *self
            .programs
            .get(&stage)
            .ok_or(AtmosphereError::NotInitialized)?;
        let params = &self
            .job
            .as_ref()
            .ok_or(AtmosphereError::NotInitialized)?
            .params;
        let uniform = PrecomputeUniform::new(params, &self.dims, first_order);
        let inputs = stage
            .reads()
            .iter()
            .map(|l| self.texture(*l))
            .collect::<Option<Vec<_>>>()
            .ok_or(AtmosphereError::NotInitialized)?;
        let outputs = stage
            .writes()
            .iter()
            .map(|l| self.texture(*l))
            .collect::<Option<Vec<_>>>()
            .ok_or(AtmosphereError::NotInitialized)?;

        trace!("dispatching {stage} (order {}, step {})", self.order, self.step);
        ctx.dispatch(&ComputeDispatch {
            program,
            uniforms: bytemuck::bytes_of(&uniform),
            inputs: &inputs,
            outputs: &outputs,
        })?;
        self.produced.extend(stage.writes().iter().copied());
        Ok(())
    }

    fn finish(&mut self, atmosphere: &mut Atmosphere) {
        self.state = PrecomputeState::Finished;
        self.unload();
        self.produced.clear();
        let Some(job) = self.job.take() else {
            return;
        };
        let luts = Arc::new(AtmosphereLuts {
            key: job.key,
            dims: self.dims,
            transmittance: job.transmittance,
            irradiance: job.irradiance,
            inscatter: job.inscatter,
        });
        self.cache.insert(job.key, luts.clone());
        atmosphere.set_luts(luts);
        info!("atmosphere tables ready after {} orders", self.dims.max_scattering_order);
    }
}

#[cfg(test)]
mod tests {
    use aether_render::Extent2d;
    use glam::UVec2;

    use super::*;

    fn tiny() -> LutDimensions {
        LutDimensions {
            transmittance: UVec2::new(8, 4),
            irradiance: UVec2::new(4, 2),
            inscatter_r: 2,
            inscatter_mu: 4,
            inscatter_mu_s: 2,
            inscatter_nu: 2,
            transmittance_samples: 8,
            inscatter_samples: 4,
            irradiance_samples: 2,
            spherical_samples: 2,
            max_scattering_order: 1,
        }
    }

    fn setup() -> (GraphicsContext, AtmoPreComputer, Atmosphere) {
        let mut ctx = GraphicsContext::headless(Extent2d::new(4, 4));
        let pre = AtmoPreComputer::with_dimensions(tiny());
        let atmosphere = Atmosphere::new(&mut ctx, AtmosphereParams::earth()).unwrap();
        (ctx, pre, atmosphere)
    }

    #[test]
    fn test_requires_init() {
        let (mut ctx, mut pre, mut atmosphere) = setup();
        assert!(matches!(
            pre.precalculate(&mut ctx, &mut atmosphere),
            Err(AtmosphereError::NotInitialized)
        ));
        assert_eq!(pre.state(), PrecomputeState::Uninitialized);
    }

    #[test]
    fn test_steps_advance_through_orders() {
        let (mut ctx, mut pre, mut atmosphere) = setup();
        pre.init(&mut ctx).unwrap();
        assert_eq!(pre.state(), PrecomputeState::Initialized);
        assert!(pre.has_deltas());

        let mut seen = Vec::new();
        loop {
            match pre.precalculate(&mut ctx, &mut atmosphere).unwrap() {
                PrecomputeProgress::Running { order, step } => seen.push((order, step)),
                PrecomputeProgress::Finished => break,
                PrecomputeProgress::Shared => unreachable!(),
            }
        }
        assert_eq!(seen, vec![(0, 1), (1, 0), (1, 1), (1, 2), (1, 3)]);
        assert_eq!(seen.len() as u32 + 1, pre.total_steps());
        assert!(pre.is_finished());
        assert!(!pre.has_deltas());
        assert!(atmosphere.luts().is_some());
        assert_eq!((pre.order(), pre.step()), (2, 0));
    }

    #[test]
    fn test_unloading_mid_run_is_out_of_order() {
        let (mut ctx, mut pre, mut atmosphere) = setup();
        pre.init(&mut ctx).unwrap();
        pre.precalculate(&mut ctx, &mut atmosphere).unwrap();
        pre.precalculate(&mut ctx, &mut atmosphere).unwrap();
        pre.unload();
        let err = pre.precalculate(&mut ctx, &mut atmosphere).unwrap_err();
        assert!(matches!(
            err,
            AtmosphereError::OutOfOrder {
                stage: Stage::ScatteringDensity,
                missing: Lut::DeltaE,
            }
        ));
        // Progress is kept for the failed step.
        assert_eq!((pre.order(), pre.step()), (1, 0));
    }

    #[test]
    fn test_different_params_while_running_is_busy() {
        let (mut ctx, mut pre, mut atmosphere) = setup();
        pre.init(&mut ctx).unwrap();
        pre.precalculate(&mut ctx, &mut atmosphere).unwrap();
        let mut hazy = Atmosphere::new(
            &mut ctx,
            AtmosphereParams {
                mie_scattering: 2e-2,
                ..AtmosphereParams::earth()
            },
        )
        .unwrap();
        let before = ctx.device_stats().dispatches;
        assert!(matches!(
            pre.precalculate(&mut ctx, &mut hazy),
            Err(AtmosphereError::Busy)
        ));
        assert_eq!(ctx.device_stats().dispatches, before);
        assert_eq!((pre.order(), pre.step()), (0, 1));
    }
}
