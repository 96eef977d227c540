use glam::{Mat3, Vec3};

use crate::lighting::{SceneLighting, VertexLighting};
use crate::scene::{SurfaceQuery, SurfaceSpec, SurfaceTexture};
use crate::subdivide::SurfacePoint;

/// Attributes interpolated by the flat shader: barycentrics and three lighting terms
pub const FLAT_ATTRIBUTES: usize = 12;
/// Attributes interpolated by the per-pixel shaders: barycentrics and the normal
pub const NORMAL_ATTRIBUTES: usize = 6;

/// Light leaving a surface sample towards the camera
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ShadedSample {
    pub additive: Vec3,
    pub multiplicative: Vec3,
}

impl ShadedSample {
    pub fn combine(spec: &SurfaceSpec, diffuse: Vec3, highlight: Vec3, reflection: Vec3) -> Self {
        Self {
            additive: spec.emissive
                + spec.diffuse * diffuse
                + spec.highlight * highlight
                + spec.specular * reflection,
            multiplicative: spec.transparent,
        }
    }
}

pub struct RasterizerShaderParams<'a, const N: usize> {
    pub attributes: &'a [f32; N],
    /// View space position of the sample
    pub position: Vec3,
    /// Index of the mesh triangle being rasterized
    pub triangle: usize,
    /// Texture footprint of the sample
    pub size: f32,
}

impl<const N: usize> RasterizerShaderParams<'_, N> {
    #[inline]
    fn vec3(&self, offset: usize) -> Vec3 {
        Vec3::new(
            self.attributes[offset],
            self.attributes[offset + 1],
            self.attributes[offset + 2],
        )
    }

    #[inline]
    fn bary(&self) -> Vec3 {
        let bary = self.vec3(0);
        let sum = bary.x + bary.y + bary.z;
        if sum > 0.0 { bary / sum } else { bary }
    }
}

pub trait RasterizerShader<const N: usize> {
    /// Data computed once per vertex after subdivision
    type Vertex: Copy;

    fn shade_vertex(&self, triangle: usize, point: &SurfacePoint) -> Self::Vertex;

    /// Attributes interpolated perspective correctly across the triangle
    fn vertex_attributes(&self, point: &SurfacePoint, vertex: &Self::Vertex) -> [f32; N];

    fn shade(&self, params: &RasterizerShaderParams<N>) -> ShadedSample;
}

#[inline]
fn write_vec3<const N: usize>(attributes: &mut [f32; N], offset: usize, value: Vec3) {
    attributes[offset..offset + 3].copy_from_slice(&value.to_array());
}

// Cosine between the normal and the direction back to the camera
#[inline]
fn view_angle(position: Vec3, normal: Vec3) -> f32 {
    normal.dot(-position.normalize_or_zero())
}

// Gouraud shading: lighting per vertex, surface colors per pixel
pub struct FlatShader<'a> {
    pub lighting: &'a SceneLighting,
    pub surface: &'a dyn SurfaceTexture,
}

impl RasterizerShader<FLAT_ATTRIBUTES> for FlatShader<'_> {
    type Vertex = VertexLighting;

    fn shade_vertex(&self, triangle: usize, point: &SurfacePoint) -> VertexLighting {
        let spec = self.surface.sample(&SurfaceQuery {
            triangle,
            bary: point.bary,
            angle: view_angle(point.position, point.normal),
            size: 0.0,
        });
        self.lighting
            .vertex_lighting(point.position, point.normal, &spec)
    }

    fn vertex_attributes(
        &self,
        point: &SurfacePoint,
        vertex: &VertexLighting,
    ) -> [f32; FLAT_ATTRIBUTES] {
        let mut attributes = [0.0; FLAT_ATTRIBUTES];
        write_vec3(&mut attributes, 0, point.bary);
        write_vec3(&mut attributes, 3, vertex.diffuse);
        write_vec3(&mut attributes, 6, vertex.highlight);
        write_vec3(&mut attributes, 9, vertex.reflection);
        attributes
    }

    fn shade(&self, params: &RasterizerShaderParams<FLAT_ATTRIBUTES>) -> ShadedSample {
        let spec = self.surface.sample(&SurfaceQuery {
            triangle: params.triangle,
            bary: params.bary(),
            angle: 1.0,
            size: params.size,
        });
        ShadedSample::combine(&spec, params.vec3(3), params.vec3(6), params.vec3(9))
    }
}

fn normal_attributes(point: &SurfacePoint) -> [f32; NORMAL_ATTRIBUTES] {
    let mut attributes = [0.0; NORMAL_ATTRIBUTES];
    write_vec3(&mut attributes, 0, point.bary);
    write_vec3(&mut attributes, 3, point.normal);
    attributes
}

// Per-pixel diffuse lighting, specular terms only where the surface has them
pub struct HybridShader<'a> {
    pub lighting: &'a SceneLighting,
    pub surface: &'a dyn SurfaceTexture,
}

impl RasterizerShader<NORMAL_ATTRIBUTES> for HybridShader<'_> {
    type Vertex = ();

    fn shade_vertex(&self, _triangle: usize, _point: &SurfacePoint) {}

    fn vertex_attributes(&self, point: &SurfacePoint, _vertex: &()) -> [f32; NORMAL_ATTRIBUTES] {
        normal_attributes(point)
    }

    fn shade(&self, params: &RasterizerShaderParams<NORMAL_ATTRIBUTES>) -> ShadedSample {
        let position = params.position;
        let normal = params.vec3(3).normalize_or_zero();
        let spec = self.surface.sample(&SurfaceQuery {
            triangle: params.triangle,
            bary: params.bary(),
            angle: view_angle(position, normal),
            size: params.size,
        });

        let diffuse = self.lighting.diffuse(position, normal);
        let highlight = if spec.highlight != Vec3::ZERO {
            self.lighting.highlight(position, normal, spec.roughness)
        } else {
            Vec3::ZERO
        };
        let reflection = if spec.specular != Vec3::ZERO {
            self.lighting.reflection(position, normal)
        } else {
            Vec3::ZERO
        };
        ShadedSample::combine(&spec, diffuse, highlight, reflection)
    }
}

// Full per-pixel lighting with bump mapping
pub struct PhongShader<'a> {
    pub lighting: &'a SceneLighting,
    pub surface: &'a dyn SurfaceTexture,
    /// Takes bump gradients from object-local into view space
    pub normal_to_view: Mat3,
}

impl RasterizerShader<NORMAL_ATTRIBUTES> for PhongShader<'_> {
    type Vertex = ();

    fn shade_vertex(&self, _triangle: usize, _point: &SurfacePoint) {}

    fn vertex_attributes(&self, point: &SurfacePoint, _vertex: &()) -> [f32; NORMAL_ATTRIBUTES] {
        normal_attributes(point)
    }

    fn shade(&self, params: &RasterizerShaderParams<NORMAL_ATTRIBUTES>) -> ShadedSample {
        let position = params.position;
        let mut normal = params.vec3(3).normalize_or_zero();
        let spec = self.surface.sample(&SurfaceQuery {
            triangle: params.triangle,
            bary: params.bary(),
            angle: view_angle(position, normal),
            size: params.size,
        });

        if spec.bump_gradient != Vec3::ZERO {
            // Only the part of the gradient along the surface tilts the normal
            let gradient = self.normal_to_view * spec.bump_gradient;
            let tangential = gradient - normal * gradient.dot(normal);
            normal = (normal - tangential).normalize_or(normal);
        }

        let diffuse = self.lighting.diffuse(position, normal);
        let highlight = self.lighting.highlight(position, normal, spec.roughness);
        let reflection = self.lighting.reflection(position, normal);
        ShadedSample::combine(&spec, diffuse, highlight, reflection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendercamera::RenderCamera;
    use crate::scene::{Light, Scene, UniformSurface};
    use approx::assert_relative_eq;

    fn lit_scene() -> (Scene, RenderCamera) {
        let mut scene = Scene::new();
        scene.add_light(Light::directional(Vec3::NEG_Z, Vec3::ONE, 1.0));
        let camera = RenderCamera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0, 4, 4);
        (scene, camera)
    }

    fn facing_point() -> SurfacePoint {
        SurfacePoint {
            position: Vec3::new(0.0, 0.0, 5.0),
            normal: Vec3::NEG_Z,
            bary: Vec3::new(0.2, 0.3, 0.5),
        }
    }

    #[test]
    fn combine_adds_every_term() {
        let spec = SurfaceSpec {
            diffuse: Vec3::splat(0.5),
            specular: Vec3::splat(0.25),
            highlight: Vec3::splat(0.125),
            transparent: Vec3::splat(0.75),
            emissive: Vec3::splat(0.1),
            ..SurfaceSpec::default()
        };
        let sample = ShadedSample::combine(&spec, Vec3::ONE, Vec3::splat(2.0), Vec3::splat(4.0));
        assert_relative_eq!(sample.additive.x, 0.1 + 0.5 + 0.25 + 1.0);
        assert_eq!(sample.multiplicative, Vec3::splat(0.75));
    }

    #[test]
    fn flat_and_hybrid_agree_on_diffuse_surfaces() {
        let (scene, camera) = lit_scene();
        let lighting = SceneLighting::new(&scene, &camera);
        let surface = UniformSurface(SurfaceSpec {
            diffuse: Vec3::new(0.8, 0.4, 0.2),
            ..SurfaceSpec::default()
        });
        let point = facing_point();

        let flat = FlatShader {
            lighting: &lighting,
            surface: &surface,
        };
        let vertex = flat.shade_vertex(0, &point);
        let attributes = flat.vertex_attributes(&point, &vertex);
        let flat_sample = flat.shade(&RasterizerShaderParams {
            attributes: &attributes,
            position: point.position,
            triangle: 0,
            size: 0.0,
        });

        let hybrid = HybridShader {
            lighting: &lighting,
            surface: &surface,
        };
        let attributes = hybrid.vertex_attributes(&point, &());
        let hybrid_sample = hybrid.shade(&RasterizerShaderParams {
            attributes: &attributes,
            position: point.position,
            triangle: 0,
            size: 0.0,
        });

        assert_relative_eq!(flat_sample.additive.x, 0.8, epsilon = 1e-5);
        assert_relative_eq!(hybrid_sample.additive.y, 0.4, epsilon = 1e-5);
        assert_eq!(flat_sample.multiplicative, Vec3::ZERO);
    }

    #[test]
    fn bump_gradient_darkens_facing_surface() {
        let (scene, camera) = lit_scene();
        let lighting = SceneLighting::new(&scene, &camera);
        let flat_surface = UniformSurface(SurfaceSpec::default());
        let bumped_surface = UniformSurface(SurfaceSpec {
            bump_gradient: Vec3::new(0.8, 0.0, 0.0),
            ..SurfaceSpec::default()
        });
        let point = facing_point();
        let shade = |surface: &dyn SurfaceTexture| {
            let shader = PhongShader {
                lighting: &lighting,
                surface,
                normal_to_view: Mat3::IDENTITY,
            };
            let attributes = shader.vertex_attributes(&point, &());
            shader.shade(&RasterizerShaderParams {
                attributes: &attributes,
                position: point.position,
                triangle: 0,
                size: 0.0,
            })
        };
        let flat = shade(&flat_surface);
        let bumped = shade(&bumped_surface);
        assert!(bumped.additive.x < flat.additive.x);
    }
}
