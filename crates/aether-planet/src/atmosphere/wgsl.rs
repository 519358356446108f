//! WGSL fragments shared by the precompute kernels and the compositor.
//!
//! They are macros rather than constants so each program's source can be
//! assembled with `concat!` into a `&'static str`.

/// Uniform block and inscatter texel parametrization of the precompute
/// kernels. Layout matches `PrecomputeUniform`.
macro_rules! precompute_prelude_wgsl {
    () => {
        r#"
struct Precompute {
    radii: vec4<f32>,
    rayleigh: vec4<f32>,
    mie: vec4<f32>,
    lut_size: vec4<u32>,
    inscatter_size: vec4<u32>,
    samples: vec4<u32>,
    flags: vec4<u32>,
};

@group(0) @binding(0)
var<uniform> atmo: Precompute;

struct Layer {
    r: f32,
    d_top: vec2<f32>,
    d_ground: vec2<f32>,
};

fn layer(z: u32) -> Layer {
    let rg = atmo.radii.x;
    let rt = atmo.radii.y;
    let n = atmo.inscatter_size.x;
    let s = f32(z) / f32(n - 1u);
    var r = sqrt(rg * rg + s * s * (rt * rt - rg * rg));
    if z == 0u {
        r += 0.01;
    } else if z == n - 1u {
        r -= 0.001;
    }
    let rho = sqrt(r * r - rg * rg);
    let h = sqrt(rt * rt - rg * rg);
    return Layer(r, vec2<f32>(rt - r, rho + h), vec2<f32>(r - rg, rho));
}

fn inscatter_params(x: u32, y: u32, l: Layer) -> vec3<f32> {
    let rg = atmo.radii.x;
    let rt = atmo.radii.y;
    let r = l.r;
    let half = f32(atmo.inscatter_size.y / 2u);
    let fy = f32(y);
    var mu: f32;
    if fy < half {
        let d = min(max((1.0 - fy / (half - 1.0)) * l.d_ground.y, l.d_ground.x), l.d_ground.y * 0.999);
        mu = min((rg * rg - r * r - d * d) / (2.0 * r * d), horizon(r) - 0.001);
    } else {
        let d = min(max((fy - half) / (half - 1.0) * l.d_top.y, l.d_top.x), l.d_top.y * 0.999);
        mu = (rt * rt - r * r - d * d) / (2.0 * r * d);
    }
    let res_mu_s = atmo.inscatter_size.z;
    let u_mu_s = f32(x % res_mu_s) / f32(res_mu_s - 1u);
    let mu_s = tan((2.0 * u_mu_s - 1.0 + 0.26) * 1.1) / tan(MU_S_TAN);
    let nu = -1.0 + f32(x / res_mu_s) / f32(atmo.inscatter_size.w - 1u) * 2.0;
    return vec3<f32>(mu, mu_s, nu);
}
"#
    };
}

/// Filtering helpers, table lookups and phase functions. Expects a global
/// `atmo` whose leading members match `Precompute`.
macro_rules! scattering_wgsl {
    () => {
        r#"
const PI: f32 = 3.14159265358979;
const MU_S_TAN: f32 = 1.386;

fn sample2(t: texture_2d<f32>, uv: vec2<f32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(t));
    let p = uv * vec2<f32>(size) - 0.5;
    let b = floor(p);
    let f = p - b;
    let i = vec2<i32>(b);
    let lo = vec2<i32>(0);
    let hi = size - vec2<i32>(1);
    let t00 = textureLoad(t, clamp(i, lo, hi), 0);
    let t10 = textureLoad(t, clamp(i + vec2<i32>(1, 0), lo, hi), 0);
    let t01 = textureLoad(t, clamp(i + vec2<i32>(0, 1), lo, hi), 0);
    let t11 = textureLoad(t, clamp(i + vec2<i32>(1, 1), lo, hi), 0);
    return mix(mix(t00, t10, f.x), mix(t01, t11, f.x), f.y);
}

fn load3(t: texture_3d<f32>, p: vec3<i32>, hi: vec3<i32>) -> vec4<f32> {
    return textureLoad(t, clamp(p, vec3<i32>(0), hi), 0);
}

fn sample3(t: texture_3d<f32>, uvw: vec3<f32>) -> vec4<f32> {
    let size = vec3<i32>(textureDimensions(t));
    let p = uvw * vec3<f32>(size) - 0.5;
    let b = floor(p);
    let f = p - b;
    let i = vec3<i32>(b);
    let hi = size - vec3<i32>(1);
    let near = mix(
        mix(load3(t, i, hi), load3(t, i + vec3<i32>(1, 0, 0), hi), f.x),
        mix(load3(t, i + vec3<i32>(0, 1, 0), hi), load3(t, i + vec3<i32>(1, 1, 0), hi), f.x),
        f.y,
    );
    let far = mix(
        mix(load3(t, i + vec3<i32>(0, 0, 1), hi), load3(t, i + vec3<i32>(1, 0, 1), hi), f.x),
        mix(load3(t, i + vec3<i32>(0, 1, 1), hi), load3(t, i + vec3<i32>(1, 1, 1), hi), f.x),
        f.y,
    );
    return mix(near, far, f.z);
}

fn horizon(r: f32) -> f32 {
    let x = atmo.radii.x / r;
    return -sqrt(max(1.0 - x * x, 0.0));
}

fn limit(r: f32, mu: f32) -> f32 {
    let rg = atmo.radii.x;
    let rl = atmo.radii.z;
    var dout = -r * mu + sqrt(max(r * r * (mu * mu - 1.0) + rl * rl, 0.0));
    let delta2 = r * r * (mu * mu - 1.0) + rg * rg;
    if delta2 >= 0.0 {
        let din = -r * mu - sqrt(delta2);
        if din >= 0.0 {
            dout = min(dout, din);
        }
    }
    return dout;
}

fn transmittance_uv(r: f32, mu: f32) -> vec2<f32> {
    let u_r = sqrt(max((r - atmo.radii.x) / (atmo.radii.y - atmo.radii.x), 0.0));
    let u_mu = atan((mu + 0.15) / 1.15 * tan(1.5)) / 1.5;
    return vec2<f32>(u_mu, u_r);
}

fn transmittance(t: texture_2d<f32>, r: f32, mu: f32) -> vec3<f32> {
    return sample2(t, transmittance_uv(r, mu)).rgb;
}

fn transmittance_between(t: texture_2d<f32>, r: f32, mu: f32, d: f32) -> vec3<f32> {
    let r1 = max(sqrt(r * r + d * d + 2.0 * r * mu * d), atmo.radii.x);
    let mu1 = (r * mu + d) / r1;
    var ratio: vec3<f32>;
    if mu > 0.0 {
        ratio = transmittance(t, r, mu) / max(transmittance(t, r1, mu1), vec3<f32>(1e-30));
    } else {
        ratio = transmittance(t, r1, -mu1) / max(transmittance(t, r, -mu), vec3<f32>(1e-30));
    }
    return min(ratio, vec3<f32>(1.0));
}

fn irradiance(t: texture_2d<f32>, r: f32, mu_s: f32) -> vec3<f32> {
    let uv = vec2<f32>((mu_s + 0.2) / 1.2, (r - atmo.radii.x) / (atmo.radii.y - atmo.radii.x));
    return sample2(t, uv).rgb;
}

fn inscatter4(t: texture_3d<f32>, r: f32, mu: f32, mu_s: f32, nu: f32) -> vec4<f32> {
    let rg = atmo.radii.x;
    let rt = atmo.radii.y;
    let res = vec4<f32>(atmo.inscatter_size);
    let h = sqrt(rt * rt - rg * rg);
    let rho = sqrt(max(r * r - rg * rg, 0.0));
    let rmu = r * mu;
    let delta = rmu * rmu - r * r + rg * rg;
    var cst = vec4<f32>(-1.0, h * h, h, 0.5 + 0.5 / res.y);
    if rmu < 0.0 && delta > 0.0 {
        cst = vec4<f32>(1.0, 0.0, 0.0, 0.5 - 0.5 / res.y);
    }
    let u_r = 0.5 / res.x + rho / h * (1.0 - 1.0 / res.x);
    let u_mu = cst.w + (rmu * cst.x + sqrt(max(delta + cst.y, 0.0))) / max(rho + cst.z, 1e-6) * (0.5 - 1.0 / res.y);
    let u_mu_s = 0.5 / res.z + (atan(max(mu_s, -0.1975) * tan(MU_S_TAN)) / 1.1 + (1.0 - 0.26)) * 0.5 * (1.0 - 1.0 / res.z);
    let lerp = (nu + 1.0) / 2.0 * (res.w - 1.0);
    let u_nu = floor(lerp);
    let f = lerp - u_nu;
    let a = sample3(t, vec3<f32>((u_nu + u_mu_s) / res.w, u_mu, u_r));
    let b = sample3(t, vec3<f32>((u_nu + u_mu_s + 1.0) / res.w, u_mu, u_r));
    return mix(a, b, f);
}

fn rayleigh_phase(nu: f32) -> f32 {
    return 3.0 / (16.0 * PI) * (1.0 + nu * nu);
}

fn mie_phase(nu: f32) -> f32 {
    let g = atmo.mie.w;
    let g2 = g * g;
    return 1.5 / (4.0 * PI) * (1.0 - g2) * pow(max(1.0 + g2 - 2.0 * g * nu, 1e-6), -1.5) * (1.0 + nu * nu) / (2.0 + g2);
}

fn mie_from_combined(v: vec4<f32>) -> vec3<f32> {
    return v.rgb * v.w / max(v.r, 1e-4) * (atmo.rayleigh.x / atmo.rayleigh.xyz);
}
"#
    };
}
