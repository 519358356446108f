//! Precompute stages: their tables, compute programs and CPU kernels.

use std::fmt;
use std::sync::Arc;

use aether_render::{
    ComputeKernel, ComputeProgramDescriptor, MAX_COMPUTE_OUTPUTS, ShaderResources,
    TextureBindingKind, TextureDimension,
};
use glam::{UVec2, UVec3, Vec4};

use super::scatter::{PrecomputeUniform, ScatteringModel, rayleigh_phase};

/// Every table the precomputation reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lut {
    Transmittance,
    Irradiance,
    Inscatter,
    /// Irradiance of the current order.
    DeltaE,
    /// Rayleigh (single) or combined (multiple) inscatter of the current order.
    DeltaSr,
    /// Mie single scattering.
    DeltaSm,
    /// Scattering density.
    DeltaJ,
}

impl Lut {
    pub const ALL: [Lut; 7] = [
        Lut::Transmittance,
        Lut::Irradiance,
        Lut::Inscatter,
        Lut::DeltaE,
        Lut::DeltaSr,
        Lut::DeltaSm,
        Lut::DeltaJ,
    ];

    pub fn dimension(self) -> TextureDimension {
        match self {
            Lut::Transmittance | Lut::Irradiance | Lut::DeltaE => TextureDimension::D2,
            Lut::Inscatter | Lut::DeltaSr | Lut::DeltaSm | Lut::DeltaJ => TextureDimension::D3,
        }
    }

    /// Transient tables released once the precomputation finishes.
    pub fn is_delta(self) -> bool {
        matches!(self, Lut::DeltaE | Lut::DeltaSr | Lut::DeltaSm | Lut::DeltaJ)
    }

    fn binding(self) -> TextureBindingKind {
        match self.dimension() {
            TextureDimension::D2 => TextureBindingKind::Color2d,
            TextureDimension::D3 => TextureBindingKind::Color3d,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Lut::Transmittance => "atmosphere-transmittance-lut",
            Lut::Irradiance => "atmosphere-irradiance-lut",
            Lut::Inscatter => "atmosphere-inscatter-lut",
            Lut::DeltaE => "atmosphere-delta-irradiance",
            Lut::DeltaSr => "atmosphere-delta-rayleigh",
            Lut::DeltaSm => "atmosphere-delta-mie",
            Lut::DeltaJ => "atmosphere-delta-density",
        }
    }
}

/// One compute pass of the precomputation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Transmittance,
    DirectIrradiance,
    SingleScattering,
    ClearIrradiance,
    CopyInscatter,
    ScatteringDensity,
    IndirectIrradiance,
    MultipleScattering,
    AccumulateIrradiance,
    AccumulateInscatter,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Transmittance,
        Stage::DirectIrradiance,
        Stage::SingleScattering,
        Stage::ClearIrradiance,
        Stage::CopyInscatter,
        Stage::ScatteringDensity,
        Stage::IndirectIrradiance,
        Stage::MultipleScattering,
        Stage::AccumulateIrradiance,
        Stage::AccumulateInscatter,
    ];

    /// Tables bound as inputs, in binding order.
    pub fn reads(self) -> &'static [Lut] {
        match self {
            Stage::Transmittance | Stage::ClearIrradiance => &[],
            Stage::DirectIrradiance | Stage::SingleScattering => &[Lut::Transmittance],
            Stage::CopyInscatter | Stage::IndirectIrradiance => &[Lut::DeltaSr, Lut::DeltaSm],
            Stage::ScatteringDensity => &[
                Lut::Transmittance,
                Lut::DeltaE,
                Lut::DeltaSr,
                Lut::DeltaSm,
            ],
            Stage::MultipleScattering => &[Lut::Transmittance, Lut::DeltaJ],
            Stage::AccumulateIrradiance => &[Lut::Irradiance, Lut::DeltaE],
            Stage::AccumulateInscatter => &[Lut::Inscatter, Lut::DeltaSr],
        }
    }

    /// Tables bound as storage outputs, in binding order.
    pub fn writes(self) -> &'static [Lut] {
        match self {
            Stage::Transmittance => &[Lut::Transmittance],
            Stage::DirectIrradiance | Stage::IndirectIrradiance => &[Lut::DeltaE],
            Stage::SingleScattering => &[Lut::DeltaSr, Lut::DeltaSm],
            Stage::ClearIrradiance | Stage::AccumulateIrradiance => &[Lut::Irradiance],
            Stage::CopyInscatter | Stage::AccumulateInscatter => &[Lut::Inscatter],
            Stage::ScatteringDensity => &[Lut::DeltaJ],
            Stage::MultipleScattering => &[Lut::DeltaSr],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Transmittance => "atmosphere-transmittance",
            Stage::DirectIrradiance => "atmosphere-direct-irradiance",
            Stage::SingleScattering => "atmosphere-single-scattering",
            Stage::ClearIrradiance => "atmosphere-clear-irradiance",
            Stage::CopyInscatter => "atmosphere-copy-inscatter",
            Stage::ScatteringDensity => "atmosphere-scattering-density",
            Stage::IndirectIrradiance => "atmosphere-indirect-irradiance",
            Stage::MultipleScattering => "atmosphere-multiple-scattering",
            Stage::AccumulateIrradiance => "atmosphere-accumulate-irradiance",
            Stage::AccumulateInscatter => "atmosphere-accumulate-inscatter",
        }
    }

    fn wgsl(self) -> &'static str {
        match self {
            Stage::Transmittance => TRANSMITTANCE_WGSL,
            Stage::DirectIrradiance => DIRECT_IRRADIANCE_WGSL,
            Stage::SingleScattering => SINGLE_SCATTERING_WGSL,
            Stage::ClearIrradiance => CLEAR_IRRADIANCE_WGSL,
            Stage::CopyInscatter => COPY_INSCATTER_WGSL,
            Stage::ScatteringDensity => SCATTERING_DENSITY_WGSL,
            Stage::IndirectIrradiance => INDIRECT_IRRADIANCE_WGSL,
            Stage::MultipleScattering => MULTIPLE_SCATTERING_WGSL,
            Stage::AccumulateIrradiance => ACCUMULATE_IRRADIANCE_WGSL,
            Stage::AccumulateInscatter => ACCUMULATE_INSCATTER_WGSL,
        }
    }

    pub fn descriptor(self) -> ComputeProgramDescriptor {
        ComputeProgramDescriptor {
            label: self.label(),
            wgsl: self.wgsl(),
            inputs: self.reads().iter().map(|l| l.binding()).collect(),
            outputs: self.writes().iter().map(|l| l.dimension()).collect(),
            kernel: Arc::new(StageKernel(self)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// CPU twin of a stage's WGSL.
struct StageKernel(Stage);

impl ComputeKernel for StageKernel {
    fn texel(&self, c: UVec3, res: &ShaderResources<'_>) -> [Vec4; MAX_COMPUTE_OUTPUTS] {
        let u: PrecomputeUniform = res.uniform();
        let first_order = u.flags[0] != 0;
        let m = ScatteringModel::from_uniform(&u);
        let size = UVec2::new(res.target_size.width, res.target_size.height);
        let one = |v: Vec4| [v, Vec4::ZERO];

        match self.0 {
            Stage::Transmittance => {
                let (r, mu) = m.transmittance_params(c.x, c.y, size);
                one(m.transmittance_to_top(r, mu).extend(1.0))
            }
            Stage::DirectIrradiance => {
                let (r, mu_s) = m.irradiance_params(c.x, c.y, size);
                one(m.direct_irradiance(res.texture(0), r, mu_s).extend(0.0))
            }
            Stage::SingleScattering => {
                let layer = m.layer(c.z);
                let p = m.inscatter_params(c.x, c.y, &layer);
                let (ray, mie) = m.single_scattering(res.texture(0), layer.r, p.x, p.y, p.z);
                [ray.extend(0.0), mie.extend(0.0)]
            }
            Stage::ClearIrradiance => one(Vec4::ZERO),
            Stage::CopyInscatter => {
                let ray = res.texture(0).load(c.x as i32, c.y as i32, c.z as i32);
                let mie = res.texture(1).load(c.x as i32, c.y as i32, c.z as i32);
                one(ray.truncate().extend(mie.x))
            }
            Stage::ScatteringDensity => {
                let layer = m.layer(c.z);
                let p = m.inscatter_params(c.x, c.y, &layer);
                let j = m.scattering_density(
                    res.texture(0),
                    res.texture(1),
                    res.texture(2),
                    res.texture(3),
                    first_order,
                    layer.r,
                    p.x,
                    p.y,
                    p.z,
                );
                one(j.extend(0.0))
            }
            Stage::IndirectIrradiance => {
                let (r, mu_s) = m.irradiance_params(c.x, c.y, size);
                let e = m.indirect_irradiance(
                    res.texture(0),
                    res.texture(1),
                    first_order,
                    r,
                    mu_s,
                );
                one(e.extend(0.0))
            }
            Stage::MultipleScattering => {
                let layer = m.layer(c.z);
                let p = m.inscatter_params(c.x, c.y, &layer);
                let s = m.multiple_scattering(
                    res.texture(0),
                    res.texture(1),
                    layer.r,
                    p.x,
                    p.y,
                    p.z,
                );
                one(s.extend(0.0))
            }
            Stage::AccumulateIrradiance => {
                let (x, y) = (c.x as i32, c.y as i32);
                one(res.texture(0).load(x, y, 0) + res.texture(1).load(x, y, 0))
            }
            Stage::AccumulateInscatter => {
                let layer = m.layer(c.z);
                let nu = m.inscatter_params(c.x, c.y, &layer).z;
                let (x, y, z) = (c.x as i32, c.y as i32, c.z as i32);
                let delta = res.texture(1).load(x, y, z).truncate() / rayleigh_phase(nu);
                one(res.texture(0).load(x, y, z) + delta.extend(0.0))
            }
        }
    }
}

const TRANSMITTANCE_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var out_tex: texture_storage_2d<rgba32float, write>;

fn optical_depth(scale_height: f32, r: f32, mu: f32) -> f32 {
    if mu < horizon(r) {
        return 1e9;
    }
    let rg = atmo.radii.x;
    let n = atmo.samples.x;
    let dx = limit(r, mu) / f32(n);
    var yi = exp(-(r - rg) / scale_height);
    var result = 0.0;
    for (var i = 1u; i <= n; i++) {
        let xj = f32(i) * dx;
        let yj = exp(-(sqrt(r * r + xj * xj + 2.0 * xj * r * mu) - rg) / scale_height);
        result += (yi + yj) / 2.0 * dx;
        yi = yj;
    }
    return result;
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    let r = atmo.radii.x + uv.y * uv.y * (atmo.radii.y - atmo.radii.x);
    let mu = -0.15 + tan(1.5 * uv.x) / tan(1.5) * 1.15;
    let depth = atmo.rayleigh.xyz * optical_depth(atmo.rayleigh.w, r, mu)
        + atmo.mie.y * optical_depth(atmo.mie.z, r, mu);
    textureStore(out_tex, vec2<i32>(id.xy), vec4<f32>(exp(-depth), 1.0));
}
"#
);

const DIRECT_IRRADIANCE_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var transmittance_tex: texture_2d<f32>;
@group(0) @binding(2)
var out_tex: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    let r = atmo.radii.x + uv.y * (atmo.radii.y - atmo.radii.x);
    let mu_s = -0.2 + uv.x * 1.2;
    let e = transmittance(transmittance_tex, r, mu_s) * max(mu_s, 0.0);
    textureStore(out_tex, vec2<i32>(id.xy), vec4<f32>(e, 0.0));
}
"#
);

const SINGLE_SCATTERING_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var transmittance_tex: texture_2d<f32>;
@group(0) @binding(2)
var delta_sr_out: texture_storage_3d<rgba32float, write>;
@group(0) @binding(3)
var delta_sm_out: texture_storage_3d<rgba32float, write>;

struct RayMie {
    ray: vec3<f32>,
    mie: vec3<f32>,
};

fn integrand(r: f32, mu: f32, mu_s: f32, nu: f32, t: f32) -> RayMie {
    let rg = atmo.radii.x;
    var ri = sqrt(r * r + t * t + 2.0 * r * mu * t);
    let mu_si = (nu * t + mu_s * r) / ri;
    ri = max(ri, rg);
    if mu_si < horizon(ri) {
        return RayMie(vec3<f32>(0.0), vec3<f32>(0.0));
    }
    let ti = transmittance_between(transmittance_tex, r, mu, t) * transmittance(transmittance_tex, ri, mu_si);
    return RayMie(exp(-(ri - rg) / atmo.rayleigh.w) * ti, exp(-(ri - rg) / atmo.mie.z) * ti);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(delta_sr_out);
    if any(id >= size) {
        return;
    }
    let l = layer(id.z);
    let p = inscatter_params(id.x, id.y, l);
    let n = atmo.samples.y;
    let dx = limit(l.r, p.x) / f32(n);
    var yi = integrand(l.r, p.x, p.y, p.z, 0.0);
    var ray = vec3<f32>(0.0);
    var mie = vec3<f32>(0.0);
    for (var i = 1u; i <= n; i++) {
        let yj = integrand(l.r, p.x, p.y, p.z, f32(i) * dx);
        ray += (yi.ray + yj.ray) / 2.0 * dx;
        mie += (yi.mie + yj.mie) / 2.0 * dx;
        yi = yj;
    }
    textureStore(delta_sr_out, vec3<i32>(id), vec4<f32>(ray * atmo.rayleigh.xyz, 0.0));
    textureStore(delta_sm_out, vec3<i32>(id), vec4<f32>(mie * atmo.mie.x, 0.0));
}
"#
);

const CLEAR_IRRADIANCE_WGSL: &str = r#"
@group(0) @binding(1)
var out_tex: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    textureStore(out_tex, vec2<i32>(id.xy), vec4<f32>(0.0));
}
"#;

const COPY_INSCATTER_WGSL: &str = r#"
@group(0) @binding(1)
var delta_sr_tex: texture_3d<f32>;
@group(0) @binding(2)
var delta_sm_tex: texture_3d<f32>;
@group(0) @binding(3)
var out_tex: texture_storage_3d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if any(id >= size) {
        return;
    }
    let p = vec3<i32>(id);
    let ray = textureLoad(delta_sr_tex, p, 0);
    let mie = textureLoad(delta_sm_tex, p, 0);
    textureStore(out_tex, p, vec4<f32>(ray.rgb, mie.r));
}
"#;

const SCATTERING_DENSITY_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var transmittance_tex: texture_2d<f32>;
@group(0) @binding(2)
var delta_e_tex: texture_2d<f32>;
@group(0) @binding(3)
var delta_sr_tex: texture_3d<f32>;
@group(0) @binding(4)
var delta_sm_tex: texture_3d<f32>;
@group(0) @binding(5)
var out_tex: texture_storage_3d<rgba32float, write>;

fn density(r_in: f32, mu_in: f32, mu_s_in: f32, nu_in: f32) -> vec3<f32> {
    let rg = atmo.radii.x;
    let r = clamp(r_in, rg, atmo.radii.y);
    let mu = clamp(mu_in, -1.0, 1.0);
    let mu_s = clamp(mu_s_in, -1.0, 1.0);
    let spread = sqrt(max(1.0 - mu * mu, 0.0)) * sqrt(max(1.0 - mu_s * mu_s, 0.0));
    let nu = clamp(nu_in, mu_s * mu - spread, mu_s * mu + spread);

    let ctheta_min = horizon(r);
    let v = vec3<f32>(sqrt(max(1.0 - mu * mu, 0.0)), 0.0, mu);
    var sx = 0.0;
    if v.x != 0.0 {
        sx = (nu - mu_s * mu) / v.x;
    }
    let s = vec3<f32>(sx, sqrt(max(1.0 - sx * sx - mu_s * mu_s, 0.0)), mu_s);

    let n = atmo.samples.w;
    let dphi = PI / f32(n);
    let dtheta = PI / f32(n);
    let first = atmo.flags.x != 0u;
    let beta = atmo.rayleigh.xyz * exp(-(r - rg) / atmo.rayleigh.w);
    let beta_m = atmo.mie.x * exp(-(r - rg) / atmo.mie.z);
    var raymie = vec3<f32>(0.0);
    for (var itheta = 0u; itheta < n; itheta++) {
        let theta = (f32(itheta) + 0.5) * dtheta;
        let ctheta = cos(theta);
        var reflectance = 0.0;
        var d_ground = 0.0;
        var ground_t = vec3<f32>(0.0);
        if ctheta < ctheta_min {
            reflectance = atmo.radii.w / PI;
            d_ground = -r * ctheta - sqrt(max(r * r * (ctheta * ctheta - 1.0) + rg * rg, 0.0));
            ground_t = transmittance_between(transmittance_tex, rg, -(r * ctheta + d_ground) / rg, d_ground);
        }
        for (var iphi = 0u; iphi < 2u * n; iphi++) {
            let phi = (f32(iphi) + 0.5) * dphi;
            let dw = dtheta * dphi * sin(theta);
            let w = vec3<f32>(cos(phi) * sin(theta), sin(phi) * sin(theta), ctheta);
            let nu1 = dot(s, w);
            let nu2 = dot(v, w);

            let ground_normal = (vec3<f32>(0.0, 0.0, r) + d_ground * w) / rg;
            let ground_irradiance = irradiance(delta_e_tex, rg, dot(ground_normal, s));
            var incoming = reflectance * ground_irradiance * ground_t;
            if first {
                let ray1 = inscatter4(delta_sr_tex, r, w.z, mu_s, nu1).rgb;
                let mie1 = inscatter4(delta_sm_tex, r, w.z, mu_s, nu1).rgb;
                incoming += ray1 * rayleigh_phase(nu1) + mie1 * mie_phase(nu1);
            } else {
                incoming += inscatter4(delta_sr_tex, r, w.z, mu_s, nu1).rgb;
            }
            raymie += incoming * (beta * rayleigh_phase(nu2) + beta_m * mie_phase(nu2)) * dw;
        }
    }
    return raymie;
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if any(id >= size) {
        return;
    }
    let l = layer(id.z);
    let p = inscatter_params(id.x, id.y, l);
    textureStore(out_tex, vec3<i32>(id), vec4<f32>(density(l.r, p.x, p.y, p.z), 0.0));
}
"#
);

const INDIRECT_IRRADIANCE_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var delta_sr_tex: texture_3d<f32>;
@group(0) @binding(2)
var delta_sm_tex: texture_3d<f32>;
@group(0) @binding(3)
var out_tex: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    let r = atmo.radii.x + uv.y * (atmo.radii.y - atmo.radii.x);
    let mu_s = -0.2 + uv.x * 1.2;
    let s = vec3<f32>(sqrt(max(1.0 - mu_s * mu_s, 0.0)), 0.0, mu_s);

    let n = atmo.samples.z;
    let dphi = PI / f32(n);
    let dtheta = PI / f32(n);
    let first = atmo.flags.x != 0u;
    var result = vec3<f32>(0.0);
    for (var iphi = 0u; iphi < 2u * n; iphi++) {
        let phi = (f32(iphi) + 0.5) * dphi;
        for (var itheta = 0u; itheta < n / 2u; itheta++) {
            let theta = (f32(itheta) + 0.5) * dtheta;
            let dw = dtheta * dphi * sin(theta);
            let w = vec3<f32>(cos(phi) * sin(theta), sin(phi) * sin(theta), cos(theta));
            let nu = dot(s, w);
            var incoming: vec3<f32>;
            if first {
                let ray = inscatter4(delta_sr_tex, r, w.z, mu_s, nu).rgb;
                let mie = inscatter4(delta_sm_tex, r, w.z, mu_s, nu).rgb;
                incoming = ray * rayleigh_phase(nu) + mie * mie_phase(nu);
            } else {
                incoming = inscatter4(delta_sr_tex, r, w.z, mu_s, nu).rgb;
            }
            result += incoming * w.z * dw;
        }
    }
    textureStore(out_tex, vec2<i32>(id.xy), vec4<f32>(result, 0.0));
}
"#
);

const MULTIPLE_SCATTERING_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var transmittance_tex: texture_2d<f32>;
@group(0) @binding(2)
var delta_j_tex: texture_3d<f32>;
@group(0) @binding(3)
var out_tex: texture_storage_3d<rgba32float, write>;

fn integrand(r: f32, mu: f32, mu_s: f32, nu: f32, t: f32) -> vec3<f32> {
    let ri = sqrt(r * r + t * t + 2.0 * r * mu * t);
    let mui = (r * mu + t) / ri;
    let mu_si = (nu * t + mu_s * r) / ri;
    return inscatter4(delta_j_tex, ri, mui, mu_si, nu).rgb * transmittance_between(transmittance_tex, r, mu, t);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if any(id >= size) {
        return;
    }
    let l = layer(id.z);
    let p = inscatter_params(id.x, id.y, l);
    let n = atmo.samples.y;
    let dx = limit(l.r, p.x) / f32(n);
    var yi = integrand(l.r, p.x, p.y, p.z, 0.0);
    var result = vec3<f32>(0.0);
    for (var i = 1u; i <= n; i++) {
        let yj = integrand(l.r, p.x, p.y, p.z, f32(i) * dx);
        result += (yi + yj) / 2.0 * dx;
        yi = yj;
    }
    textureStore(out_tex, vec3<i32>(id), vec4<f32>(result, 0.0));
}
"#
);

const ACCUMULATE_IRRADIANCE_WGSL: &str = r#"
@group(0) @binding(1)
var irradiance_tex: texture_2d<f32>;
@group(0) @binding(2)
var delta_e_tex: texture_2d<f32>;
@group(0) @binding(3)
var out_tex: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let p = vec2<i32>(id.xy);
    textureStore(out_tex, p, textureLoad(irradiance_tex, p, 0) + textureLoad(delta_e_tex, p, 0));
}
"#;

const ACCUMULATE_INSCATTER_WGSL: &str = concat!(
    precompute_prelude_wgsl!(),
    scattering_wgsl!(),
    r#"
@group(0) @binding(1)
var inscatter_tex: texture_3d<f32>;
@group(0) @binding(2)
var delta_sr_tex: texture_3d<f32>;
@group(0) @binding(3)
var out_tex: texture_storage_3d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(out_tex);
    if any(id >= size) {
        return;
    }
    let p = vec3<i32>(id);
    let nu = inscatter_params(id.x, id.y, layer(id.z)).z;
    let delta = textureLoad(delta_sr_tex, p, 0).rgb / rayleigh_phase(nu);
    textureStore(out_tex, p, textureLoad(inscatter_tex, p, 0) + vec4<f32>(delta, 0.0));
}
"#
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_follow_declared_sets() {
        for stage in Stage::ALL {
            let desc = stage.descriptor();
            assert_eq!(desc.inputs.len(), stage.reads().len(), "{stage}");
            assert_eq!(desc.outputs.len(), stage.writes().len(), "{stage}");
            assert!(desc.outputs.len() <= MAX_COMPUTE_OUTPUTS);
            // Outputs are declared after inputs.
            let last = stage.reads().len() + stage.writes().len();
            assert!(desc.wgsl.contains(&format!("@binding({last})")), "{stage}");
            assert!(desc.wgsl.contains("fn main("), "{stage}");
        }
    }

    #[test]
    fn test_only_accumulation_aliases_its_output() {
        for stage in Stage::ALL {
            let aliased = stage.writes().iter().any(|w| stage.reads().contains(w));
            let accumulates = matches!(
                stage,
                Stage::AccumulateIrradiance | Stage::AccumulateInscatter
            );
            assert_eq!(aliased, accumulates, "{stage}");
        }
    }

    #[test]
    fn test_labels_are_unique() {
        let mut labels: Vec<_> = Stage::ALL.iter().map(|s| s.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), Stage::ALL.len());
    }
}
