//! Light evaluation shared by the shading variants and the compositor

use glam::{Mat4, Vec3};

use crate::rendercamera::RenderCamera;
use crate::scene::{Background, Environment, LightKind, Scene, SurfaceSpec};

// Highlight exponent for a perfectly smooth surface
const MAX_HIGHLIGHT_EXPONENT: f32 = 128.0;

#[derive(Copy, Clone, Debug)]
enum ViewLightKind {
    Directional { to_light: Vec3 },
    Point { position: Vec3, decay: f32 },
    Spot {
        position: Vec3,
        direction: Vec3,
        cone_cos: f32,
        exponent: f32,
        decay: f32,
    },
}

// A scene light transformed into view space
#[derive(Copy, Clone, Debug)]
struct ViewLight {
    kind: ViewLightKind,
    radiance: Vec3,
}

impl ViewLight {
    // Unit vector towards the light and the radiance arriving at `position`
    #[inline]
    fn incident(&self, position: Vec3) -> Option<(Vec3, Vec3)> {
        match self.kind {
            ViewLightKind::Directional { to_light } => Some((to_light, self.radiance)),
            ViewLightKind::Point { position: light, decay } => {
                let offset = light - position;
                let distance = offset.length();
                if distance <= 0.0 {
                    return None;
                }
                Some((offset / distance, self.radiance / (1.0 + decay * distance)))
            }
            ViewLightKind::Spot {
                position: light,
                direction,
                cone_cos,
                exponent,
                decay,
            } => {
                let offset = light - position;
                let distance = offset.length();
                if distance <= 0.0 {
                    return None;
                }
                let to_light = offset / distance;
                let spot_cos = -to_light.dot(direction);
                if spot_cos < cone_cos {
                    return None;
                }
                let falloff = spot_cos.powf(exponent);
                Some((to_light, self.radiance * falloff / (1.0 + decay * distance)))
            }
        }
    }
}

/// Light arriving at a vertex, interpolated by the flat shading variant
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VertexLighting {
    pub diffuse: Vec3,
    pub highlight: Vec3,
    pub reflection: Vec3,
}

/// Background and environment lookups in view space
#[derive(Clone, Debug)]
pub struct BackgroundSampler {
    background: Background,
    view_to_world: Mat4,
}

impl BackgroundSampler {
    pub fn new(environment: &Environment, camera: &RenderCamera) -> Self {
        Self {
            background: environment.background.clone(),
            view_to_world: camera.view_to_world,
        }
    }

    pub fn sample(&self, view_direction: Vec3) -> Vec3 {
        match &self.background {
            Background::Color(color) => *color,
            Background::Map(map) => {
                let world = self.view_to_world.transform_vector3(view_direction);
                map.sample(world.normalize_or_zero())
            }
        }
    }
}

/// All the lights of a scene, prepared for one camera
#[derive(Clone, Debug)]
pub struct SceneLighting {
    lights: Vec<ViewLight>,
    ambient: Vec3,
    background: BackgroundSampler,
}

impl SceneLighting {
    pub fn new(scene: &Scene, camera: &RenderCamera) -> Self {
        let world_to_view = camera.world_to_view;
        let lights = scene
            .lights
            .iter()
            .map(|light| {
                let kind = match light.kind {
                    LightKind::Directional { direction } => ViewLightKind::Directional {
                        to_light: -world_to_view.transform_vector3(direction).normalize_or_zero(),
                    },
                    LightKind::Point { position, decay } => ViewLightKind::Point {
                        position: world_to_view.transform_point3(position),
                        decay,
                    },
                    LightKind::Spot {
                        position,
                        direction,
                        cone_cos,
                        exponent,
                        decay,
                    } => ViewLightKind::Spot {
                        position: world_to_view.transform_point3(position),
                        direction: world_to_view.transform_vector3(direction).normalize_or_zero(),
                        cone_cos,
                        exponent,
                        decay,
                    },
                };
                ViewLight {
                    kind,
                    radiance: light.color * light.intensity,
                }
            })
            .collect();

        Self {
            lights,
            ambient: scene.environment.ambient,
            background: BackgroundSampler::new(&scene.environment, camera),
        }
    }

    pub fn background(&self) -> &BackgroundSampler {
        &self.background
    }

    /// Ambient plus Lambertian light at a point
    pub fn diffuse(&self, position: Vec3, normal: Vec3) -> Vec3 {
        let mut total = self.ambient;
        for light in &self.lights {
            if let Some((to_light, radiance)) = light.incident(position) {
                let n_dot_l = normal.dot(to_light);
                if n_dot_l > 0.0 {
                    total += radiance * n_dot_l;
                }
            }
        }
        total
    }

    /// Blinn-Phong highlight, sharper for smoother surfaces
    pub fn highlight(&self, position: Vec3, normal: Vec3, roughness: f32) -> Vec3 {
        let view = -position.normalize_or_zero();
        let exponent = (1.0 - roughness.clamp(0.0, 1.0)) * MAX_HIGHLIGHT_EXPONENT + 1.0;
        let mut total = Vec3::ZERO;
        for light in &self.lights {
            if let Some((to_light, radiance)) = light.incident(position) {
                if normal.dot(to_light) <= 0.0 {
                    continue;
                }
                let half = (to_light + view).normalize_or_zero();
                let n_dot_h = normal.dot(half);
                if n_dot_h > 0.0 {
                    total += radiance * n_dot_h.powf(exponent);
                }
            }
        }
        total
    }

    /// Environment seen in the mirror direction
    pub fn reflection(&self, position: Vec3, normal: Vec3) -> Vec3 {
        let incoming = position.normalize_or_zero();
        let reflected = incoming - normal * (2.0 * incoming.dot(normal));
        self.background.sample(reflected)
    }

    pub fn vertex_lighting(&self, position: Vec3, normal: Vec3, spec: &SurfaceSpec) -> VertexLighting {
        VertexLighting {
            diffuse: self.diffuse(position, normal),
            highlight: self.highlight(position, normal, spec.roughness),
            reflection: self.reflection(position, normal),
        }
    }
}
