//! CPU-side scattering model: physical parameters, lookup-table
//! parametrizations and the per-texel integrals of every precompute stage.
//!
//! Distances are in kilometres. The same math runs as WGSL on the GPU (see
//! [`kernels`](super::kernels)); the headless device runs it from here.

use std::f32::consts::PI;

use aether_config::AtmosphereConfig;
use aether_render::TextureData;
use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec2, Vec3, Vec4};

/// Physical parameters defining a planet's atmosphere.
#[derive(Clone, Debug, PartialEq)]
pub struct AtmosphereParams {
    /// Ground radius in kilometres.
    pub bottom_radius: f32,
    /// Top of the atmosphere in kilometres.
    pub top_radius: f32,
    /// Rayleigh scattering coefficients at sea level (per km, RGB).
    pub rayleigh_scattering: [f32; 3],
    /// Rayleigh density scale height in km.
    pub rayleigh_scale_height: f32,
    /// Mie scattering coefficient at sea level (per km).
    pub mie_scattering: f32,
    /// Mie extinction coefficient at sea level (per km).
    pub mie_extinction: f32,
    /// Mie density scale height in km.
    pub mie_scale_height: f32,
    /// Mie phase asymmetry (Cornette-Shanks g).
    pub mie_g: f32,
    /// Average ground reflectance.
    pub ground_albedo: f32,
}

impl AtmosphereParams {
    /// Earth's clear-sky atmosphere.
    pub fn earth() -> Self {
        Self {
            bottom_radius: 6360.0,
            top_radius: 6420.0,
            rayleigh_scattering: [5.8e-3, 1.35e-2, 3.31e-2],
            rayleigh_scale_height: 8.0,
            mie_scattering: 4e-3,
            mie_extinction: 4e-3 / 0.9,
            mie_scale_height: 1.2,
            mie_g: 0.8,
            ground_albedo: 0.1,
        }
    }

    /// Radius rays are integrated to; slightly above the top so that
    /// tangent rays at the top still have a positive length.
    pub fn limit_radius(&self) -> f32 {
        self.top_radius + 1.0
    }

    fn bits(&self) -> [u32; 11] {
        [
            self.bottom_radius,
            self.top_radius,
            self.rayleigh_scattering[0],
            self.rayleigh_scattering[1],
            self.rayleigh_scattering[2],
            self.rayleigh_scale_height,
            self.mie_scattering,
            self.mie_extinction,
            self.mie_scale_height,
            self.mie_g,
            self.ground_albedo,
        ]
        .map(f32::to_bits)
    }
}

impl Default for AtmosphereParams {
    fn default() -> Self {
        Self::earth()
    }
}

/// Table resolutions, integration sample counts and the highest scattering
/// order of one precomputation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LutDimensions {
    pub transmittance: UVec2,
    pub irradiance: UVec2,
    pub inscatter_r: u32,
    pub inscatter_mu: u32,
    pub inscatter_mu_s: u32,
    pub inscatter_nu: u32,
    pub transmittance_samples: u32,
    pub inscatter_samples: u32,
    pub irradiance_samples: u32,
    pub spherical_samples: u32,
    pub max_scattering_order: u32,
}

impl LutDimensions {
    /// Size of the 3D texture packing the 4D inscatter table:
    /// `(nu * mu_s) x mu x r`.
    pub fn inscatter_extent(&self) -> (u32, u32, u32) {
        (
            self.inscatter_nu * self.inscatter_mu_s,
            self.inscatter_mu,
            self.inscatter_r,
        )
    }
}

impl From<&AtmosphereConfig> for LutDimensions {
    /// Clamps every value to the smallest table the parametrizations accept.
    fn from(config: &AtmosphereConfig) -> Self {
        Self {
            transmittance: UVec2::new(
                config.transmittance_width.max(2),
                config.transmittance_height.max(2),
            ),
            irradiance: UVec2::new(
                config.irradiance_width.max(2),
                config.irradiance_height.max(2),
            ),
            inscatter_r: config.inscatter_r.max(2),
            // Split evenly between ground and sky rays.
            inscatter_mu: (config.inscatter_mu.max(4) + 1) & !1,
            inscatter_mu_s: config.inscatter_mu_s.max(2),
            inscatter_nu: config.inscatter_nu.max(2),
            transmittance_samples: config.transmittance_samples.max(1),
            inscatter_samples: config.inscatter_samples.max(1),
            irradiance_samples: config.irradiance_samples.max(2),
            spherical_samples: config.spherical_samples.max(1),
            max_scattering_order: config.max_scattering_order,
        }
    }
}

impl Default for LutDimensions {
    fn default() -> Self {
        Self::from(&AtmosphereConfig::default())
    }
}

/// Identity of a precomputation: equal keys produce identical tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LutKey {
    params: [u32; 11],
    dims: LutDimensions,
}

impl LutKey {
    pub fn new(params: &AtmosphereParams, dims: &LutDimensions) -> Self {
        Self {
            params: params.bits(),
            dims: *dims,
        }
    }
}

/// Uniform block shared by every precompute kernel, 112 bytes.
///
/// The compositor's uniform embeds it as its first member.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PrecomputeUniform {
    /// bottom radius, top radius, limit radius, ground albedo.
    pub radii: [f32; 4],
    /// Rayleigh scattering RGB, Rayleigh scale height.
    pub rayleigh: [f32; 4],
    /// Mie scattering, Mie extinction, Mie scale height, g.
    pub mie: [f32; 4],
    /// Transmittance width/height, irradiance width/height.
    pub lut_size: [u32; 4],
    /// Inscatter r, mu, mu_s, nu resolutions.
    pub inscatter_size: [u32; 4],
    /// Transmittance, inscatter, irradiance and spherical sample counts.
    pub samples: [u32; 4],
    /// x: 1 while the first multiple-scattering order reads single scattering.
    pub flags: [u32; 4],
}

static_assertions::assert_eq_size!(PrecomputeUniform, [u8; 112]);

impl PrecomputeUniform {
    pub fn new(params: &AtmosphereParams, dims: &LutDimensions, first_order: bool) -> Self {
        let [r, g, b] = params.rayleigh_scattering;
        Self {
            radii: [
                params.bottom_radius,
                params.top_radius,
                params.limit_radius(),
                params.ground_albedo,
            ],
            rayleigh: [r, g, b, params.rayleigh_scale_height],
            mie: [
                params.mie_scattering,
                params.mie_extinction,
                params.mie_scale_height,
                params.mie_g,
            ],
            lut_size: [
                dims.transmittance.x,
                dims.transmittance.y,
                dims.irradiance.x,
                dims.irradiance.y,
            ],
            inscatter_size: [
                dims.inscatter_r,
                dims.inscatter_mu,
                dims.inscatter_mu_s,
                dims.inscatter_nu,
            ],
            samples: [
                dims.transmittance_samples,
                dims.inscatter_samples,
                dims.irradiance_samples,
                dims.spherical_samples,
            ],
            flags: [first_order as u32, 0, 0, 0],
        }
    }
}

/// Rayleigh phase function.
pub fn rayleigh_phase(nu: f32) -> f32 {
    3.0 / (16.0 * PI) * (1.0 + nu * nu)
}

/// Cornette-Shanks Mie phase function.
pub fn mie_phase(nu: f32, g: f32) -> f32 {
    let g2 = g * g;
    1.5 / (4.0 * PI) * (1.0 - g2) * (1.0 + g2 - 2.0 * g * nu).max(1e-6).powf(-1.5)
        * (1.0 + nu * nu)
        / (2.0 + g2)
}

fn exp3(v: Vec3) -> Vec3 {
    Vec3::new(v.x.exp(), v.y.exp(), v.z.exp())
}

/// Radius of an inscatter layer and the distance bounds used by its
/// view-zenith parametrization.
#[derive(Clone, Copy, Debug)]
pub struct InscatterLayer {
    pub r: f32,
    /// Shortest and longest distance to the top boundary.
    pub d_top: Vec2,
    /// Shortest and longest distance to the ground.
    pub d_ground: Vec2,
}

/// Lookup-table parametrizations and scattering integrals for one set of
/// parameters and table sizes.
#[derive(Clone, Copy, Debug)]
pub struct ScatteringModel {
    rg: f32,
    rt: f32,
    rl: f32,
    ground_albedo: f32,
    beta_r: Vec3,
    hr: f32,
    beta_m_sca: Vec3,
    beta_m_ex: Vec3,
    hm: f32,
    mie_g: f32,
    res_r: u32,
    res_mu: u32,
    res_mu_s: u32,
    res_nu: u32,
    transmittance_samples: u32,
    inscatter_samples: u32,
    irradiance_samples: u32,
    spherical_samples: u32,
}

const MU_S_TAN: f32 = 1.26 * 1.1;

impl ScatteringModel {
    pub fn new(params: &AtmosphereParams, dims: &LutDimensions) -> Self {
        Self::from_uniform(&PrecomputeUniform::new(params, dims, false))
    }

    pub fn from_uniform(u: &PrecomputeUniform) -> Self {
        Self {
            rg: u.radii[0],
            rt: u.radii[1],
            rl: u.radii[2],
            ground_albedo: u.radii[3],
            beta_r: Vec3::new(u.rayleigh[0], u.rayleigh[1], u.rayleigh[2]),
            hr: u.rayleigh[3],
            beta_m_sca: Vec3::splat(u.mie[0]),
            beta_m_ex: Vec3::splat(u.mie[1]),
            hm: u.mie[2],
            mie_g: u.mie[3],
            res_r: u.inscatter_size[0].max(2),
            res_mu: u.inscatter_size[1].max(4),
            res_mu_s: u.inscatter_size[2].max(2),
            res_nu: u.inscatter_size[3].max(2),
            transmittance_samples: u.samples[0].max(1),
            inscatter_samples: u.samples[1].max(1),
            irradiance_samples: u.samples[2].max(2),
            spherical_samples: u.samples[3].max(1),
        }
    }

    pub fn bottom_radius(&self) -> f32 {
        self.rg
    }

    pub fn top_radius(&self) -> f32 {
        self.rt
    }

    pub fn mie_g(&self) -> f32 {
        self.mie_g
    }

    /// Cosine of the horizon seen from radius `r`.
    fn horizon(&self, r: f32) -> f32 {
        -(1.0 - (self.rg / r).powi(2)).max(0.0).sqrt()
    }

    /// Distance from radius `r` along zenith cosine `mu` to the ground or
    /// the limit sphere, whichever comes first.
    pub fn limit(&self, r: f32, mu: f32) -> f32 {
        let mut dout = -r * mu + (r * r * (mu * mu - 1.0) + self.rl * self.rl).max(0.0).sqrt();
        let delta2 = r * r * (mu * mu - 1.0) + self.rg * self.rg;
        if delta2 >= 0.0 {
            let din = -r * mu - delta2.sqrt();
            if din >= 0.0 {
                dout = dout.min(din);
            }
        }
        dout
    }

    // --- transmittance ---

    /// `(r, mu)` at the centre of transmittance texel `(x, y)`.
    pub fn transmittance_params(&self, x: u32, y: u32, size: UVec2) -> (f32, f32) {
        let u = (x as f32 + 0.5) / size.x as f32;
        let v = (y as f32 + 0.5) / size.y as f32;
        let r = self.rg + v * v * (self.rt - self.rg);
        let mu = -0.15 + (1.5 * u).tan() / 1.5f32.tan() * 1.15;
        (r, mu)
    }

    pub fn transmittance_uv(&self, r: f32, mu: f32) -> Vec2 {
        let u_r = ((r - self.rg) / (self.rt - self.rg)).max(0.0).sqrt();
        let u_mu = ((mu + 0.15) / 1.15 * 1.5f32.tan()).atan() / 1.5;
        Vec2::new(u_mu, u_r)
    }

    fn optical_depth(&self, scale_height: f32, r: f32, mu: f32) -> f32 {
        if mu < self.horizon(r) {
            return 1e9;
        }
        let n = self.transmittance_samples;
        let dx = self.limit(r, mu) / n as f32;
        let mut yi = (-(r - self.rg) / scale_height).exp();
        let mut result = 0.0;
        for i in 1..=n {
            let xj = i as f32 * dx;
            let rj = (r * r + xj * xj + 2.0 * xj * r * mu).sqrt();
            let yj = (-(rj - self.rg) / scale_height).exp();
            result += (yi + yj) / 2.0 * dx;
            yi = yj;
        }
        result
    }

    /// Transmittance from radius `r` to the top along `mu`, by integration.
    pub fn transmittance_to_top(&self, r: f32, mu: f32) -> Vec3 {
        let depth = self.beta_r * self.optical_depth(self.hr, r, mu)
            + self.beta_m_ex * self.optical_depth(self.hm, r, mu);
        exp3(-depth)
    }

    /// Transmittance to the top, read from the table.
    pub fn transmittance(&self, table: &TextureData, r: f32, mu: f32) -> Vec3 {
        table.sample_2d(self.transmittance_uv(r, mu)).truncate()
    }

    /// Zero when the ground blocks the ray.
    pub fn transmittance_with_shadow(&self, table: &TextureData, r: f32, mu: f32) -> Vec3 {
        if mu < self.horizon(r) {
            Vec3::ZERO
        } else {
            self.transmittance(table, r, mu)
        }
    }

    /// Transmittance over the first `d` km of the ray.
    pub fn transmittance_between(&self, table: &TextureData, r: f32, mu: f32, d: f32) -> Vec3 {
        let r1 = (r * r + d * d + 2.0 * r * mu * d).sqrt().max(self.rg);
        let mu1 = (r * mu + d) / r1;
        let ratio = if mu > 0.0 {
            self.transmittance(table, r, mu) / self.transmittance(table, r1, mu1).max(Vec3::splat(1e-30))
        } else {
            self.transmittance(table, r1, -mu1) / self.transmittance(table, r, -mu).max(Vec3::splat(1e-30))
        };
        ratio.min(Vec3::ONE)
    }

    // --- irradiance ---

    /// `(r, mu_s)` at the centre of irradiance texel `(x, y)`.
    pub fn irradiance_params(&self, x: u32, y: u32, size: UVec2) -> (f32, f32) {
        let r = self.rg + (y as f32 + 0.5) / size.y as f32 * (self.rt - self.rg);
        let mu_s = -0.2 + (x as f32 + 0.5) / size.x as f32 * 1.2;
        (r, mu_s)
    }

    pub fn irradiance(&self, table: &TextureData, r: f32, mu_s: f32) -> Vec3 {
        let uv = Vec2::new((mu_s + 0.2) / 1.2, (r - self.rg) / (self.rt - self.rg));
        table.sample_2d(uv).truncate()
    }

    // --- inscatter ---

    pub fn layer(&self, z: u32) -> InscatterLayer {
        let f = (z as f32 / (self.res_r - 1) as f32).powi(2);
        let mut r = (self.rg * self.rg + f * (self.rt * self.rt - self.rg * self.rg)).sqrt();
        if z == 0 {
            r += 0.01;
        } else if z == self.res_r - 1 {
            r -= 0.001;
        }
        let rho = (r * r - self.rg * self.rg).sqrt();
        let h = (self.rt * self.rt - self.rg * self.rg).sqrt();
        InscatterLayer {
            r,
            d_top: Vec2::new(self.rt - r, rho + h),
            d_ground: Vec2::new(r - self.rg, rho),
        }
    }

    /// `(mu, mu_s, nu)` of inscatter texel `(x, y)` in `layer`.
    pub fn inscatter_params(&self, x: u32, y: u32, layer: &InscatterLayer) -> Vec3 {
        let r = layer.r;
        let half = (self.res_mu / 2) as f32;
        let y = y as f32;
        let mu = if y < half {
            let d = 1.0 - y / (half - 1.0);
            let d = (d * layer.d_ground.y)
                .max(layer.d_ground.x)
                .min(layer.d_ground.y * 0.999);
            let mu = (self.rg * self.rg - r * r - d * d) / (2.0 * r * d);
            mu.min(self.horizon(r) - 0.001)
        } else {
            let d = (y - half) / (half - 1.0);
            let d = (d * layer.d_top.y).max(layer.d_top.x).min(layer.d_top.y * 0.999);
            (self.rt * self.rt - r * r - d * d) / (2.0 * r * d)
        };
        let u_mu_s = (x % self.res_mu_s) as f32 / (self.res_mu_s - 1) as f32;
        let mu_s = ((2.0 * u_mu_s - 1.0 + 0.26) * 1.1).tan() / MU_S_TAN.tan();
        let nu = -1.0 + (x / self.res_mu_s) as f32 / (self.res_nu - 1) as f32 * 2.0;
        Vec3::new(mu, mu_s, nu)
    }

    /// Read the packed 4D inscatter table, interpolating between nu slices.
    pub fn inscatter(&self, table: &TextureData, r: f32, mu: f32, mu_s: f32, nu: f32) -> Vec4 {
        let (res_r, res_mu) = (self.res_r as f32, self.res_mu as f32);
        let (res_mu_s, res_nu) = (self.res_mu_s as f32, self.res_nu as f32);
        let h = (self.rt * self.rt - self.rg * self.rg).sqrt();
        let rho = (r * r - self.rg * self.rg).max(0.0).sqrt();
        let rmu = r * mu;
        let delta = rmu * rmu - r * r + self.rg * self.rg;
        let cst = if rmu < 0.0 && delta > 0.0 {
            Vec4::new(1.0, 0.0, 0.0, 0.5 - 0.5 / res_mu)
        } else {
            Vec4::new(-1.0, h * h, h, 0.5 + 0.5 / res_mu)
        };
        let u_r = 0.5 / res_r + rho / h * (1.0 - 1.0 / res_r);
        let u_mu = cst.w
            + (rmu * cst.x + (delta + cst.y).max(0.0).sqrt()) / (rho + cst.z).max(1e-6)
                * (0.5 - 1.0 / res_mu);
        let u_mu_s = 0.5 / res_mu_s
            + ((mu_s.max(-0.1975) * MU_S_TAN.tan()).atan() / 1.1 + (1.0 - 0.26))
                * 0.5
                * (1.0 - 1.0 / res_mu_s);
        let lerp = (nu + 1.0) / 2.0 * (res_nu - 1.0);
        let u_nu = lerp.floor();
        let f = lerp - u_nu;
        let a = table.sample_3d(Vec3::new((u_nu + u_mu_s) / res_nu, u_mu, u_r));
        let b = table.sample_3d(Vec3::new((u_nu + u_mu_s + 1.0) / res_nu, u_mu, u_r));
        a * (1.0 - f) + b * f
    }

    /// Mie inscatter recovered from the red channel ratio stored in alpha.
    pub fn mie_from_combined(&self, v: Vec4) -> Vec3 {
        v.truncate() * v.w / v.x.max(1e-4) * (self.beta_r.x / self.beta_r)
    }

    // --- stage integrals ---

    /// Sun irradiance reaching radius `r` directly (unit sun).
    pub fn direct_irradiance(&self, transmittance: &TextureData, r: f32, mu_s: f32) -> Vec3 {
        self.transmittance(transmittance, r, mu_s) * mu_s.max(0.0)
    }

    /// Single Rayleigh and Mie scattering without phase functions.
    pub fn single_scattering(
        &self,
        transmittance: &TextureData,
        r: f32,
        mu: f32,
        mu_s: f32,
        nu: f32,
    ) -> (Vec3, Vec3) {
        let integrand = |t: f32| -> (Vec3, Vec3) {
            let ri = (r * r + t * t + 2.0 * r * mu * t).sqrt();
            let mu_si = (nu * t + mu_s * r) / ri;
            let ri = ri.max(self.rg);
            if mu_si < self.horizon(ri) {
                return (Vec3::ZERO, Vec3::ZERO);
            }
            let ti = self.transmittance_between(transmittance, r, mu, t)
                * self.transmittance(transmittance, ri, mu_si);
            (
                (-(ri - self.rg) / self.hr).exp() * ti,
                (-(ri - self.rg) / self.hm).exp() * ti,
            )
        };
        let n = self.inscatter_samples;
        let dx = self.limit(r, mu) / n as f32;
        let (mut ray_i, mut mie_i) = integrand(0.0);
        let (mut ray, mut mie) = (Vec3::ZERO, Vec3::ZERO);
        for i in 1..=n {
            let (ray_j, mie_j) = integrand(i as f32 * dx);
            ray += (ray_i + ray_j) / 2.0 * dx;
            mie += (mie_i + mie_j) / 2.0 * dx;
            ray_i = ray_j;
            mie_i = mie_j;
        }
        (ray * self.beta_r, mie * self.beta_m_sca)
    }

    /// Light scattered towards `mu` at radius `r` from every direction:
    /// previous-order inscatter plus ground-reflected irradiance.
    #[allow(clippy::too_many_arguments)]
    pub fn scattering_density(
        &self,
        transmittance: &TextureData,
        delta_e: &TextureData,
        delta_sr: &TextureData,
        delta_sm: &TextureData,
        first_order: bool,
        r: f32,
        mu: f32,
        mu_s: f32,
        nu: f32,
    ) -> Vec3 {
        let r = r.clamp(self.rg, self.rt);
        let mu = mu.clamp(-1.0, 1.0);
        let mu_s = mu_s.clamp(-1.0, 1.0);
        let var = (1.0 - mu * mu).max(0.0).sqrt() * (1.0 - mu_s * mu_s).max(0.0).sqrt();
        let nu = nu.clamp(mu_s * mu - var, mu_s * mu + var);

        let ctheta_min = self.horizon(r);
        let v = Vec3::new((1.0 - mu * mu).max(0.0).sqrt(), 0.0, mu);
        let sx = if v.x == 0.0 { 0.0 } else { (nu - mu_s * mu) / v.x };
        let s = Vec3::new(sx, (1.0 - sx * sx - mu_s * mu_s).max(0.0).sqrt(), mu_s);

        let n = self.spherical_samples;
        let dphi = PI / n as f32;
        let dtheta = PI / n as f32;
        let mut raymie = Vec3::ZERO;
        for itheta in 0..n {
            let theta = (itheta as f32 + 0.5) * dtheta;
            let ctheta = theta.cos();
            let (mut reflectance, mut d_ground, mut ground_t) = (0.0, 0.0, Vec3::ZERO);
            if ctheta < ctheta_min {
                reflectance = self.ground_albedo / PI;
                d_ground = -r * ctheta - (r * r * (ctheta * ctheta - 1.0) + self.rg * self.rg).max(0.0).sqrt();
                ground_t = self.transmittance_between(
                    transmittance,
                    self.rg,
                    -(r * ctheta + d_ground) / self.rg,
                    d_ground,
                );
            }
            for iphi in 0..2 * n {
                let phi = (iphi as f32 + 0.5) * dphi;
                let dw = dtheta * dphi * theta.sin();
                let w = Vec3::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), ctheta);

                let nu1 = s.dot(w);
                let nu2 = v.dot(w);
                let pr2 = rayleigh_phase(nu2);
                let pm2 = mie_phase(nu2, self.mie_g);

                let ground_normal = (Vec3::new(0.0, 0.0, r) + d_ground * w) / self.rg;
                let ground_irradiance = self.irradiance(delta_e, self.rg, ground_normal.dot(s));
                let mut incoming = reflectance * ground_irradiance * ground_t;

                if first_order {
                    let ray1 = self.inscatter(delta_sr, r, w.z, mu_s, nu1).truncate();
                    let mie1 = self.inscatter(delta_sm, r, w.z, mu_s, nu1).truncate();
                    incoming += ray1 * rayleigh_phase(nu1) + mie1 * mie_phase(nu1, self.mie_g);
                } else {
                    incoming += self.inscatter(delta_sr, r, w.z, mu_s, nu1).truncate();
                }

                raymie += incoming
                    * (self.beta_r * (-(r - self.rg) / self.hr).exp() * pr2
                        + self.beta_m_sca * (-(r - self.rg) / self.hm).exp() * pm2)
                    * dw;
            }
        }
        raymie
    }

    /// Irradiance at radius `r` from the previous order's inscatter over the
    /// upper hemisphere.
    pub fn indirect_irradiance(
        &self,
        delta_sr: &TextureData,
        delta_sm: &TextureData,
        first_order: bool,
        r: f32,
        mu_s: f32,
    ) -> Vec3 {
        let n = self.irradiance_samples;
        let dphi = PI / n as f32;
        let dtheta = PI / n as f32;
        let s = Vec3::new((1.0 - mu_s * mu_s).max(0.0).sqrt(), 0.0, mu_s);
        let mut result = Vec3::ZERO;
        for iphi in 0..2 * n {
            let phi = (iphi as f32 + 0.5) * dphi;
            for itheta in 0..n / 2 {
                let theta = (itheta as f32 + 0.5) * dtheta;
                let dw = dtheta * dphi * theta.sin();
                let w = Vec3::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), theta.cos());
                let nu = s.dot(w);
                let incoming = if first_order {
                    let ray = self.inscatter(delta_sr, r, w.z, mu_s, nu).truncate();
                    let mie = self.inscatter(delta_sm, r, w.z, mu_s, nu).truncate();
                    ray * rayleigh_phase(nu) + mie * mie_phase(nu, self.mie_g)
                } else {
                    self.inscatter(delta_sr, r, w.z, mu_s, nu).truncate()
                };
                result += incoming * w.z * dw;
            }
        }
        result
    }

    /// Next scattering order: the density `J` integrated along the ray.
    pub fn multiple_scattering(
        &self,
        transmittance: &TextureData,
        delta_j: &TextureData,
        r: f32,
        mu: f32,
        mu_s: f32,
        nu: f32,
    ) -> Vec3 {
        let integrand = |t: f32| -> Vec3 {
            let ri = (r * r + t * t + 2.0 * r * mu * t).sqrt();
            let mui = (r * mu + t) / ri;
            let mu_si = (nu * t + mu_s * r) / ri;
            self.inscatter(delta_j, ri, mui, mu_si, nu).truncate()
                * self.transmittance_between(transmittance, r, mu, t)
        };
        let n = self.inscatter_samples;
        let dx = self.limit(r, mu) / n as f32;
        let mut yi = integrand(0.0);
        let mut result = Vec3::ZERO;
        for i in 1..=n {
            let yj = integrand(i as f32 * dx);
            result += (yi + yj) / 2.0 * dx;
            yi = yj;
        }
        result
    }

    /// Inscattered radiance (unit sun) along a view ray from `camera`,
    /// planet-centred, plus the transmittance to the surface at distance `t`
    /// (or `None` for sky rays). `None` overall when the ray misses the
    /// atmosphere.
    pub fn sky_radiance(
        &self,
        transmittance: &TextureData,
        inscatter: &TextureData,
        camera: Vec3,
        view: Vec3,
        surface: Option<f32>,
        sun: Vec3,
    ) -> Option<(Vec3, Vec3)> {
        let mut x = camera;
        let mut r = x.length();
        let mut mu = x.dot(view) / r;
        let mut t = surface;
        let disc = r * r * mu * mu - r * r + self.rt * self.rt;
        if r > self.rt {
            // From space: advance to the atmosphere entry point.
            if disc < 0.0 {
                return None;
            }
            let d = -r * mu - disc.sqrt();
            if d <= 0.0 {
                return None;
            }
            x += d * view;
            t = t.map(|t| t - d);
            mu = (r * mu + d) / self.rt;
            r = self.rt;
        }
        if t.is_some_and(|t| t <= 0.0) {
            // Surface in front of the atmosphere.
            return None;
        }

        let nu = view.dot(sun);
        let mu_s = x.dot(sun) / r;
        let mut insc = self.inscatter(inscatter, r, mu, mu_s, nu).max(Vec4::ZERO);
        let mut attenuation = Vec3::ONE;
        if let Some(t) = t.filter(|t| *t > 0.0) {
            let x0 = x + t * view;
            let r0 = x0.length();
            let mu0 = x0.dot(view) / r0;
            let mu_s0 = x0.dot(sun) / r0;
            attenuation = self.transmittance_between(transmittance, r, mu, t);
            if r0 > self.rg + 0.01 {
                let far = self.inscatter(inscatter, r0, mu0, mu_s0, nu);
                insc = (insc - attenuation.extend(attenuation.x) * far).max(Vec4::ZERO);
            }
        }
        let radiance = insc.truncate() * rayleigh_phase(nu)
            + self.mie_from_combined(insc) * mie_phase(nu, self.mie_g);
        Some((radiance.max(Vec3::ZERO), attenuation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_dims() -> LutDimensions {
        LutDimensions {
            transmittance: UVec2::new(32, 16),
            irradiance: UVec2::new(16, 4),
            inscatter_r: 8,
            inscatter_mu: 16,
            inscatter_mu_s: 8,
            inscatter_nu: 4,
            transmittance_samples: 100,
            inscatter_samples: 20,
            irradiance_samples: 8,
            spherical_samples: 4,
            max_scattering_order: 2,
        }
    }

    fn model() -> ScatteringModel {
        ScatteringModel::new(&AtmosphereParams::earth(), &small_dims())
    }

    #[test]
    fn test_uniform_layout() {
        let u = PrecomputeUniform::new(&AtmosphereParams::earth(), &small_dims(), true);
        assert_eq!(u.radii[2], 6421.0);
        assert_eq!(u.flags[0], 1);
        let m = ScatteringModel::from_uniform(&u);
        assert_eq!(m.bottom_radius(), 6360.0);
    }

    #[test]
    fn test_phase_functions_integrate_to_one() {
        let n = 2000;
        let (mut ray, mut mie) = (0.0, 0.0);
        for i in 0..n {
            let theta = (i as f32 + 0.5) / n as f32 * PI;
            let dw = 2.0 * PI * theta.sin() * PI / n as f32;
            ray += rayleigh_phase(theta.cos()) * dw;
            mie += mie_phase(theta.cos(), 0.8) * dw;
        }
        assert!((ray - 1.0).abs() < 1e-2, "rayleigh integral {ray}");
        assert!((mie - 1.0).abs() < 5e-2, "mie integral {mie}");
    }

    #[test]
    fn test_limit_straight_up_and_down() {
        let m = model();
        assert!((m.limit(6360.0, 1.0) - 61.0).abs() < 1e-2);
        assert!((m.limit(6370.0, -1.0) - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_transmittance_in_unit_range_and_darker_toward_horizon() {
        let m = model();
        let mut previous = Vec3::ONE;
        for mu in [1.0, 0.7, 0.4, 0.2, 0.05, 0.0] {
            let t = m.transmittance_to_top(6360.0, mu);
            assert!(t.min_element() > 0.0 && t.max_element() <= 1.0, "{t} at mu {mu}");
            assert!(t.cmple(previous).all(), "{t} not below {previous}");
            previous = t;
        }
        // Blue is attenuated more than red.
        let zenith = m.transmittance_to_top(6360.0, 1.0);
        assert!(zenith.z < zenith.x);
        // Below the horizon the ground blocks everything.
        assert_eq!(m.transmittance_to_top(6400.0, -0.9), Vec3::ZERO);
    }

    #[test]
    fn test_transmittance_uv_hits_texel_centres() {
        let m = model();
        let size = small_dims().transmittance;
        for (x, y) in [(0, 0), (5, 3), (31, 15), (17, 9)] {
            let (r, mu) = m.transmittance_params(x, y, size);
            let uv = m.transmittance_uv(r, mu) * size.as_vec2() - 0.5;
            assert!((uv.x - x as f32).abs() < 1e-3, "{uv} vs ({x}, {y})");
            assert!((uv.y - y as f32).abs() < 1e-3, "{uv} vs ({x}, {y})");
        }
    }

    #[test]
    fn test_inscatter_lookup_inverts_texel_params() {
        let m = model();
        let dims = small_dims();
        let (w, h, d) = dims.inscatter_extent();
        let mut table = TextureData::new(w, h, d);
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    table.store(x, y, z, Vec4::new(x as f32, y as f32, z as f32, 0.0));
                }
            }
        }
        // Interior texels, away from the clamped distance ranges.
        for (x, y, z) in [(9, 2, 6), (12, 12, 3), (25, 11, 5), (3, 13, 4)] {
            let layer = m.layer(z);
            let p = m.inscatter_params(x, y, &layer);
            let v = m.inscatter(&table, layer.r, p.x, p.y, p.z);
            let expected = Vec3::new(x as f32, y as f32, z as f32);
            assert!(
                (v.truncate() - expected).abs().max_element() < 0.05,
                "texel {expected} read back as {v}"
            );
        }
    }

    #[test]
    fn test_lut_key_tracks_params_and_dims() {
        let earth = AtmosphereParams::earth();
        let dims = small_dims();
        assert_eq!(LutKey::new(&earth, &dims), LutKey::new(&earth.clone(), &dims));
        let hazy = AtmosphereParams {
            mie_scattering: 2e-2,
            ..earth.clone()
        };
        assert_ne!(LutKey::new(&earth, &dims), LutKey::new(&hazy, &dims));
        let bigger = LutDimensions {
            inscatter_r: 16,
            ..dims
        };
        assert_ne!(LutKey::new(&earth, &dims), LutKey::new(&earth, &bigger));
    }

    #[test]
    fn test_dimensions_from_config_are_clamped() {
        let config = AtmosphereConfig {
            inscatter_mu: 5,
            inscatter_nu: 0,
            ..Default::default()
        };
        let dims = LutDimensions::from(&config);
        assert_eq!(dims.inscatter_mu, 6);
        assert_eq!(dims.inscatter_nu, 2);
        assert_eq!(LutDimensions::default().inscatter_extent(), (256, 128, 32));
    }
}
