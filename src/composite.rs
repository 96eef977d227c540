//! Resolves fragment chains into final pixel colors.
//!
//! Each (sub)pixel chain is walked front to back while tracking the light that
//! still gets through (the transmittance). Gaps between fragments are filled
//! by the volumetric material the ray is inside of, or by fog.

use glam::Vec3;

use crate::fragment::{FragmentKind, FragmentRow, ObjectMaterialInfo};
use crate::lighting::BackgroundSampler;
use crate::math::pow_vec3;
use crate::rendercamera::RenderCamera;
use crate::scene::Fog;
use crate::util::argb_pack;

/// Non-uniform volumes stop marching once no channel lets more than this through
pub const TRANSMITTANCE_CUTOFF: f32 = 1e-3;

// Upper bound of march steps across one gap
const MAX_VOLUME_STEPS: usize = 4096;

/// Result for one (sub)pixel ray
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RaySample {
    pub color: Vec3,
    pub transmittance: Vec3,
    /// Depth of the first fragment, infinite when the ray only sees background
    pub depth: f32,
}

/// One composited output row
#[derive(Clone, Debug, Default)]
pub struct CompositedRow {
    pub argb: Vec<u32>,
    pub depth: Vec<f32>,
    /// Unclamped colors, filled when high dynamic range output is enabled
    pub hdr: Vec<Vec3>,
}

/// Per-worker compositing scratch state
pub struct CompositingContext {
    // Materials the ray is currently inside of, innermost last
    materials: Vec<u32>,
    row: CompositedRow,
}

impl CompositingContext {
    pub fn new(width: usize) -> Self {
        Self {
            materials: Vec::new(),
            row: CompositedRow {
                argb: vec![0; width],
                depth: vec![f32::INFINITY; width],
                hdr: Vec::with_capacity(width),
            },
        }
    }
}

pub struct Compositor<'a> {
    camera: &'a RenderCamera,
    samples: usize,
    materials: &'a [ObjectMaterialInfo],
    fog: Option<Fog>,
    background: BackgroundSampler,
    transparent_background: bool,
    high_dynamic_range: bool,
}

impl<'a> Compositor<'a> {
    pub fn new(
        camera: &'a RenderCamera,
        samples: usize,
        materials: &'a [ObjectMaterialInfo],
        fog: Option<Fog>,
        background: BackgroundSampler,
    ) -> Self {
        Self {
            camera,
            samples: samples.max(1),
            materials,
            fog,
            background,
            transparent_background: false,
            high_dynamic_range: false,
        }
    }

    pub fn transparent_background(mut self, enable: bool) -> Self {
        self.transparent_background = enable;
        self
    }

    pub fn high_dynamic_range(mut self, enable: bool) -> Self {
        self.high_dynamic_range = enable;
        self
    }

    /// Composites output row `y` from the `samples` fragment rows covering it
    pub fn composite_row<'c>(
        &self,
        rows: &[FragmentRow],
        y: usize,
        context: &'c mut CompositingContext,
    ) -> &'c CompositedRow {
        let samples = self.samples;
        let weight = 1.0 / (samples * samples) as f32;
        let width = self.camera.width;
        context.row.hdr.clear();

        for x in 0..width {
            let mut color = Vec3::ZERO;
            let mut transmittance = Vec3::ZERO;
            let mut depth = f32::INFINITY;
            for sy in y * samples..(y + 1) * samples {
                let row = &rows[sy];
                for sx in x * samples..(x + 1) * samples {
                    let sample = self.composite_sample(row, sx, sy, &mut context.materials);
                    color += sample.color;
                    transmittance += sample.transmittance;
                    depth = depth.min(sample.depth);
                }
            }
            color *= weight;
            transmittance *= weight;

            let alpha = if self.transparent_background {
                1.0 - (transmittance.x + transmittance.y + transmittance.z) / 3.0
            } else {
                1.0
            };
            context.row.argb[x] = argb_pack(color, alpha);
            context.row.depth[x] = depth;
            if self.high_dynamic_range {
                context.row.hdr.push(color);
            }
        }
        &context.row
    }

    /// Walks the chain of the subsample at (`sx`, `sy`) front to back
    pub fn composite_sample(
        &self,
        row: &FragmentRow,
        sx: usize,
        sy: usize,
        materials: &mut Vec<u32>,
    ) -> RaySample {
        materials.clear();
        let ray = self
            .camera
            .view_ray(sx as f32, sy as f32, self.samples);
        let ray_length = ray.length();

        let mut color = Vec3::ZERO;
        let mut transmittance = Vec3::ONE;
        let mut previous = 0.0;
        let first_depth = row.front(sx).map_or(f32::INFINITY, |fragment| fragment.depth);

        for fragment in row.chain(sx) {
            self.integrate_gap(
                ray,
                previous,
                fragment.depth,
                ray_length,
                materials.last().copied(),
                &mut color,
                &mut transmittance,
            );
            previous = fragment.depth;

            color += transmittance * fragment.additive.to_vec3();
            if fragment.is_opaque() {
                return RaySample {
                    color,
                    transmittance: Vec3::ZERO,
                    depth: first_depth,
                };
            }
            transmittance *= fragment.multiplicative.to_vec3();

            match (fragment.kind, fragment.material) {
                (FragmentKind::MaterialEntry, Some(material)) => materials.push(material),
                (FragmentKind::MaterialExit, Some(material)) => {
                    if let Some(index) = materials.iter().rposition(|&m| m == material) {
                        materials.remove(index);
                    }
                }
                _ => {}
            }
        }

        // The background sentinel
        if let Some(fog) = self.fog {
            color += fog.color * transmittance;
            transmittance = Vec3::ZERO;
        } else if !self.transparent_background {
            color += transmittance * self.background.sample(ray);
        }

        RaySample {
            color,
            transmittance,
            depth: first_depth,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_gap(
        &self,
        ray: Vec3,
        from: f32,
        to: f32,
        ray_length: f32,
        material: Option<u32>,
        color: &mut Vec3,
        transmittance: &mut Vec3,
    ) {
        let distance = (to - from) * ray_length;
        if !(distance > 0.0) {
            return;
        }

        match material.and_then(|handle| self.materials.get(handle as usize)) {
            Some(info) if info.material.is_uniform() => {
                let middle = ray * ((from + to) * 0.5);
                let spec = info.material.sample(info.to_local.transform_point3(middle));
                let passed = pow_vec3(spec.transparency, distance);
                *color += *transmittance * spec.color * (Vec3::ONE - passed);
                *transmittance *= passed;
            }
            Some(info) => {
                let step_size = info.material.step_size();
                let steps = if step_size > 0.0 {
                    ((distance / step_size).ceil() as usize).clamp(1, MAX_VOLUME_STEPS)
                } else {
                    MAX_VOLUME_STEPS
                };
                let step_depth = (to - from) / steps as f32;
                let step_length = distance / steps as f32;
                for step in 0..steps {
                    if transmittance.max_element() < TRANSMITTANCE_CUTOFF {
                        break;
                    }
                    let middle = ray * (from + (step as f32 + 0.5) * step_depth);
                    let spec = info.material.sample(info.to_local.transform_point3(middle));
                    let passed = pow_vec3(spec.transparency, step_length);
                    *color += *transmittance * spec.color * (Vec3::ONE - passed);
                    *transmittance *= passed;
                }
            }
            None => {
                if let Some(fog) = self.fog {
                    let passed = (-distance / fog.distance).exp();
                    *color += *transmittance * fog.color * (1.0 - passed);
                    *transmittance *= passed;
                }
            }
        }
    }
}
