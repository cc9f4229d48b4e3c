//! WGSL for the GPU screen-space pass.
//!
//! The fragment shader is a line-for-line counterpart of
//! [`ScreenSpaceBackend`](crate::render::ScreenSpaceBackend): same pixel
//! mapping, same signed-distance estimate, same edge mask and tint.

use bytemuck::{Pod, Zeroable};

use crate::field::{FieldConfig, FieldModel, Kernel};
use crate::render::RenderConfig;
use crate::shader_utils;

/// Uniform block shared with `FIELD_MAIN_WGSL`. Field order and padding
/// follow WGSL uniform layout rules.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub(crate) struct FieldUniforms {
    pub palette: [[f32; 4]; 5],
    pub light_dir: [f32; 4],
    pub resolution: [f32; 2],
    pub time: f32,
    pub frame: u32,
    pub source_count: u32,
    pub model: u32,
    pub kernel: u32,
    pub sigma: f32,
    pub iso: f32,
    pub blend: f32,
    pub edge_softness: f32,
    pub gain: f32,
    pub grain: f32,
    pub z_plane: f32,
    pub gradient_epsilon: f32,
    pub _padding: f32,
}

impl FieldUniforms {
    pub fn new(render: &RenderConfig, field: &FieldConfig) -> Self {
        Self {
            palette: render.palette.uniform_stops(),
            light_dir: render.light_dir.extend(0.0).to_array(),
            resolution: [1.0, 1.0],
            time: 0.0,
            frame: 0,
            source_count: 0,
            model: match field.model {
                FieldModel::KernelSum => 0,
                FieldModel::SmoothUnion => 1,
            },
            kernel: match field.kernel {
                Kernel::Gaussian => 0,
                Kernel::Wyvill => 1,
            },
            sigma: field.sigma,
            iso: field.iso,
            blend: field.blend,
            edge_softness: render.edge_softness,
            gain: render.gain,
            grain: render.grain,
            z_plane: field.z_plane,
            gradient_epsilon: field.gradient_epsilon,
            _padding: 0.0,
        }
    }
}

/// One source in the storage buffer: `xyz` position and `w` radius, then
/// weight padded to 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub(crate) struct GpuSource {
    pub position_radius: [f32; 4],
    pub weight: f32,
    pub _padding: [f32; 3],
}

const BINDINGS_WGSL: &str = r#"
struct Uniforms {
    palette: array<vec4<f32>, 5>,
    light_dir: vec4<f32>,
    resolution: vec2<f32>,
    time: f32,
    frame: u32,
    source_count: u32,
    model: u32,
    kernel: u32,
    sigma: f32,
    iso: f32,
    blend: f32,
    edge_softness: f32,
    gain: f32,
    grain: f32,
    z_plane: f32,
    gradient_epsilon: f32,
    _padding: f32,
};

struct Source {
    position_radius: vec4<f32>,
    weight: f32,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var<storage, read> sources: array<Source>;
"#;

const FIELD_MAIN_WGSL: &str = r#"
const FAR_DISTANCE: f32 = 1000.0;
const CORE_DEPTH: f32 = 0.15;

fn field_value(p: vec3<f32>) -> f32 {
    var f = 0.0;
    let cutoff = kernel_cutoff(uniforms.kernel);
    for (var i = 0u; i < uniforms.source_count; i++) {
        let s = sources[i];
        let x = distance(p, s.position_radius.xyz) / max(s.position_radius.w * uniforms.sigma, 1e-6);
        if x < cutoff {
            f += s.weight * kernel_eval(x, uniforms.kernel);
        }
    }
    return f;
}

fn smooth_union(p: vec3<f32>) -> f32 {
    var d = FAR_DISTANCE;
    for (var i = 0u; i < uniforms.source_count; i++) {
        let s = sources[i];
        d = smin(d, distance(p, s.position_radius.xyz) - s.position_radius.w, uniforms.blend);
    }
    return d;
}

fn signed_distance(p: vec3<f32>) -> f32 {
    if uniforms.source_count == 0u {
        return FAR_DISTANCE;
    }
    if uniforms.model == 1u {
        return smooth_union(p);
    }
    let e = uniforms.gradient_epsilon;
    let g = vec3<f32>(
        field_value(p + vec3<f32>(e, 0.0, 0.0)) - field_value(p - vec3<f32>(e, 0.0, 0.0)),
        field_value(p + vec3<f32>(0.0, e, 0.0)) - field_value(p - vec3<f32>(0.0, e, 0.0)),
        field_value(p + vec3<f32>(0.0, 0.0, e)) - field_value(p - vec3<f32>(0.0, 0.0, e)),
    ) / (2.0 * e);
    let sd = (uniforms.iso - field_value(p)) / max(length(g), 1e-4);
    return clamp(sd, -FAR_DISTANCE, FAR_DISTANCE);
}

fn background(uv: vec2<f32>, time: f32) -> vec3<f32> {
    let base = uniforms.palette[0].rgb;
    let n = fbm(vec3<f32>(uv * 2.6, time * 0.2), 4);
    let g = clamp((uv.y + 0.9) / 2.0, 0.0, 1.0);
    let shade = base + vec3<f32>(0.02) - vec3<f32>(0.05) * g;
    return shade * (0.85 + 0.3 * n);
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    // Full-screen triangle.
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    var out: VertexOutput;
    out.clip_position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let res = uniforms.resolution;
    let short_side = max(min(res.x, res.y), 1.0);
    let coord = in.clip_position.xy;
    let uv = vec2<f32>((2.0 * coord.x - res.x) / short_side, (res.y - 2.0 * coord.y) / short_side);
    let bg = background(uv, uniforms.time);
    var color = bg;

    if uniforms.source_count > 0u {
        let edge = uniforms.edge_softness * 2.0 / short_side;
        let sd = signed_distance(vec3<f32>(uv, uniforms.z_plane));
        let mask = smoothstep(-edge, edge, -sd);
        if mask > 0.0 {
            let depth = clamp(-sd / CORE_DEPTH, 0.0, 1.0);
            let tint = palette_sample(0.45 + 0.5 * depth) * uniforms.gain;
            let lifted = tint + (vec3<f32>(1.0) - tint) * 0.15 * depth;
            let tex = fbm(vec3<f32>(uv * 2.0, uniforms.time * 0.15), 3);
            let interior = mix(bg, lifted, 0.55 + 0.35 * depth + 0.1 * tex);
            color = mix(bg, interior, mask);
        }
    }

    color += vec3<f32>(uniforms.grain * grain(vec2<u32>(coord), uniforms.frame));
    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
"#;

/// Complete WGSL module for the field pass.
pub fn field_shader() -> String {
    format!(
        "{}\n{}\n{}\n",
        BINDINGS_WGSL,
        shader_utils::all_utils_wgsl(),
        FIELD_MAIN_WGSL
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates WGSL code using naga.
    fn validate_wgsl(code: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {:?}", e))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;

        Ok(())
    }

    #[test]
    fn test_field_shader_validates() {
        let src = field_shader();
        if let Err(e) = validate_wgsl(&src) {
            panic!("{e}");
        }
    }

    #[test]
    fn test_shader_has_entry_points() {
        let src = field_shader();
        assert!(src.contains("fn vs_main"));
        assert!(src.contains("fn fs_main"));
    }

    #[test]
    fn test_uniform_layout_sizes() {
        assert_eq!(std::mem::size_of::<FieldUniforms>(), 160);
        assert_eq!(std::mem::size_of::<GpuSource>(), 32);
    }

    #[test]
    fn test_uniforms_follow_config() {
        let field = FieldConfig::new().with_model(FieldModel::SmoothUnion).with_kernel(Kernel::Wyvill).with_blend(0.3);
        let u = FieldUniforms::new(&RenderConfig::default(), &field);
        assert_eq!(u.model, 1);
        assert_eq!(u.kernel, 1);
        assert_eq!(u.blend, 0.3);
    }
}
