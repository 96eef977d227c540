//! Contracts between the rasterizer and the host's scene description.
//!
//! The renderer only sees what is declared here: objects that can hand out a
//! triangle mesh for a given tolerance, surface textures sampled by barycentric
//! coordinates, volumetric materials, lights and global environment settings.
//! A few simple implementations are provided for tools and tests.

use glam::{Mat4, Vec3};
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for point in points {
            min = min.min(*point);
            max = max.max(*point);
        }
        Self { min, max }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshTriangle {
    pub vertices: [u32; 3],
    pub normals: [u32; 3],
}

/// Triangulated mesh in object-local space
#[derive(Clone, Debug, Default)]
pub struct RenderMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub triangles: Vec<MeshTriangle>,
}

impl RenderMesh {
    /// Mesh with one normal per vertex, indexed the same way as the positions
    pub fn smooth(positions: Vec<Vec3>, normals: Vec<Vec3>, indices: &[[u32; 3]]) -> Self {
        let triangles = indices
            .iter()
            .map(|&vertices| MeshTriangle {
                vertices,
                normals: vertices,
            })
            .collect();
        Self {
            positions,
            normals,
            triangles,
        }
    }

    /// Mesh with one face normal per triangle
    pub fn faceted(positions: Vec<Vec3>, indices: &[[u32; 3]]) -> Self {
        let mut normals = Vec::with_capacity(indices.len());
        let mut triangles = Vec::with_capacity(indices.len());
        for &vertices in indices {
            let [a, b, c] = vertices.map(|i| positions[i as usize]);
            let normal_index = normals.len() as u32;
            normals.push((b - a).cross(c - a).normalize_or_zero());
            triangles.push(MeshTriangle {
                vertices,
                normals: [normal_index; 3],
            });
        }
        Self {
            positions,
            normals,
            triangles,
        }
    }

    /// Rectangle in the XY plane facing +Z
    pub fn quad(width: f32, height: f32) -> Self {
        let (w, h) = (width * 0.5, height * 0.5);
        Self::faceted(
            vec![
                Vec3::new(-w, -h, 0.0),
                Vec3::new(w, -h, 0.0),
                Vec3::new(w, h, 0.0),
                Vec3::new(-w, h, 0.0),
            ],
            &[[0, 1, 2], [0, 2, 3]],
        )
    }

    /// Axis aligned box centered on the origin with outward facing triangles
    pub fn cuboid(size: Vec3) -> Self {
        let half = size * 0.5;
        // (normal axis, first tangent, second tangent) with first x second == normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];
        let mut positions = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(12);
        for (normal, a, b) in faces {
            let center = normal * half;
            let a = a * half;
            let b = b * half;
            let base = positions.len() as u32;
            positions.extend([center - a - b, center + a - b, center + a + b, center - a + b]);
            indices.push([base, base + 1, base + 2]);
            indices.push([base, base + 2, base + 3]);
        }
        Self::faceted(positions, &indices)
    }

    /// Latitude/longitude sphere with smooth normals
    pub fn sphere(radius: f32, slices: u32, stacks: u32) -> Self {
        let slices = slices.max(3);
        let stacks = stacks.max(2);
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        for i in 0..=stacks {
            let theta = std::f32::consts::PI * i as f32 / stacks as f32;
            for j in 0..=slices {
                let phi = std::f32::consts::TAU * j as f32 / slices as f32;
                let normal = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                normals.push(normal);
                positions.push(normal * radius);
            }
        }
        let row = slices + 1;
        let mut indices = Vec::new();
        for i in 0..stacks {
            for j in 0..slices {
                let a = i * row + j;
                let b = a + 1;
                let c = a + row + 1;
                let d = a + row;
                indices.push([a, b, c]);
                indices.push([a, c, d]);
            }
        }
        Self::smooth(positions, normals, &indices)
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(&self.positions)
    }
}

/// Geometry which can be converted to triangles at a requested tolerance
pub trait Geometry: Send + Sync {
    /// Returns None when the object has nothing renderable at this tolerance
    fn mesh_at_tolerance(&self, tolerance: f32) -> Option<Arc<RenderMesh>>;
    fn bounds(&self) -> BoundingBox;
}

/// Geometry backed by a fixed mesh, independent of the tolerance
pub struct StaticGeometry {
    mesh: Arc<RenderMesh>,
    bounds: BoundingBox,
}

impl StaticGeometry {
    pub fn new(mesh: RenderMesh) -> Self {
        let bounds = mesh.bounds();
        Self {
            mesh: Arc::new(mesh),
            bounds,
        }
    }
}

impl Geometry for StaticGeometry {
    fn mesh_at_tolerance(&self, _tolerance: f32) -> Option<Arc<RenderMesh>> {
        if self.mesh.triangles.is_empty() {
            None
        } else {
            Some(self.mesh.clone())
        }
    }

    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

/// Surface properties at one point of a triangle
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SurfaceSpec {
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub highlight: Vec3,
    pub transparent: Vec3,
    pub emissive: Vec3,
    pub roughness: f32,
    /// Gradient of the bump height in object-local space
    pub bump_gradient: Vec3,
}

impl Default for SurfaceSpec {
    fn default() -> Self {
        Self {
            diffuse: Vec3::splat(0.8),
            specular: Vec3::ZERO,
            highlight: Vec3::ZERO,
            transparent: Vec3::ZERO,
            emissive: Vec3::ZERO,
            roughness: 0.2,
            bump_gradient: Vec3::ZERO,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SurfaceQuery {
    pub triangle: usize,
    /// Barycentric weights of the triangle's three mesh vertices
    pub bary: Vec3,
    /// Cosine of the angle between the surface normal and the view direction
    pub angle: f32,
    /// Approximate world-space footprint of the sample, for texture smoothing
    pub size: f32,
}

pub trait SurfaceTexture: Send + Sync {
    fn sample(&self, query: &SurfaceQuery) -> SurfaceSpec;

    /// True if any part of the surface lets light through
    fn is_transparent(&self) -> bool;

    fn has_displacement(&self) -> bool {
        false
    }

    /// Displacement along the normal at barycentric position `bary`
    fn displacement(&self, _triangle: usize, _bary: Vec3, _tolerance: f32) -> f32 {
        0.0
    }
}

/// Surface with the same properties everywhere
#[derive(Copy, Clone, Debug, Default)]
pub struct UniformSurface(pub SurfaceSpec);

impl SurfaceTexture for UniformSurface {
    fn sample(&self, _query: &SurfaceQuery) -> SurfaceSpec {
        self.0
    }

    fn is_transparent(&self) -> bool {
        self.0.transparent.max_element() > 0.0
    }
}

/// Uniform surface displaced by a function of (triangle, barycentric position)
pub struct DisplacedSurface<F> {
    pub spec: SurfaceSpec,
    pub displacement: F,
}

impl<F> SurfaceTexture for DisplacedSurface<F>
where
    F: Fn(usize, Vec3) -> f32 + Send + Sync,
{
    fn sample(&self, _query: &SurfaceQuery) -> SurfaceSpec {
        self.spec
    }

    fn is_transparent(&self) -> bool {
        self.spec.transparent.max_element() > 0.0
    }

    fn has_displacement(&self) -> bool {
        true
    }

    fn displacement(&self, triangle: usize, bary: Vec3, _tolerance: f32) -> f32 {
        (self.displacement)(triangle, bary)
    }
}

/// Properties of a participating medium at one point
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VolumeSpec {
    /// Fraction of light transmitted over one unit of distance
    pub transparency: Vec3,
    /// Color added in proportion to the light absorbed
    pub color: Vec3,
}

pub trait VolumeMaterial: Send + Sync {
    /// Uniform materials are integrated in closed form
    fn is_uniform(&self) -> bool;
    /// Distance between samples when marching through a non-uniform material
    fn step_size(&self) -> f32;
    fn sample(&self, local: Vec3) -> VolumeSpec;
}

#[derive(Copy, Clone, Debug)]
pub struct UniformVolume(pub VolumeSpec);

impl VolumeMaterial for UniformVolume {
    fn is_uniform(&self) -> bool {
        true
    }

    fn step_size(&self) -> f32 {
        f32::INFINITY
    }

    fn sample(&self, _local: Vec3) -> VolumeSpec {
        self.0
    }
}

/// Non-uniform material defined by a function of the local position
pub struct ProceduralVolume<F> {
    pub step_size: f32,
    pub function: F,
}

impl<F> VolumeMaterial for ProceduralVolume<F>
where
    F: Fn(Vec3) -> VolumeSpec + Send + Sync,
{
    fn is_uniform(&self) -> bool {
        false
    }

    fn step_size(&self) -> f32 {
        self.step_size
    }

    fn sample(&self, local: Vec3) -> VolumeSpec {
        (self.function)(local)
    }
}

/// One renderable object of the scene
#[derive(Clone)]
pub struct SceneObject {
    pub name: String,
    pub geometry: Arc<dyn Geometry>,
    pub local_to_world: Mat4,
    pub surface: Arc<dyn SurfaceTexture>,
    pub volume: Option<Arc<dyn VolumeMaterial>>,
    /// The mesh encloses a volume, so its back faces are never visible from outside
    pub closed: bool,
    pub visible: bool,
}

impl SceneObject {
    pub fn new(
        name: impl Into<String>,
        geometry: Arc<dyn Geometry>,
        surface: Arc<dyn SurfaceTexture>,
    ) -> Self {
        Self {
            name: name.into(),
            geometry,
            local_to_world: Mat4::IDENTITY,
            surface,
            volume: None,
            closed: false,
            visible: true,
        }
    }

    pub fn with_transform(mut self, local_to_world: Mat4) -> Self {
        self.local_to_world = local_to_world;
        self
    }

    pub fn with_volume(mut self, volume: Arc<dyn VolumeMaterial>) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn closed(mut self, closed: bool) -> Self {
        self.closed = closed;
        self
    }
}

impl fmt::Debug for SceneObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneObject")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .field("visible", &self.visible)
            .field("has_volume", &self.volume.is_some())
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LightKind {
    /// Parallel light travelling along `direction`
    Directional { direction: Vec3 },
    /// Light radiating from a point, attenuated by `1 / (1 + decay * distance)`
    Point { position: Vec3, decay: f32 },
    /// Point light restricted to a cone around `direction`
    Spot {
        position: Vec3,
        direction: Vec3,
        cone_cos: f32,
        exponent: f32,
        decay: f32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction: direction.normalize_or(Vec3::NEG_Z),
            },
            color,
            intensity,
        }
    }

    pub fn point(position: Vec3, decay: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position, decay },
            color,
            intensity,
        }
    }

    /// Spot light with a cone of half angle `cone_angle` radians, brightest
    /// along `direction` and falling off with `cos^exponent`
    pub fn spot(
        position: Vec3,
        direction: Vec3,
        cone_angle: f32,
        exponent: f32,
        decay: f32,
        color: Vec3,
        intensity: f32,
    ) -> Self {
        Self {
            kind: LightKind::Spot {
                position,
                direction: direction.normalize_or(Vec3::NEG_Z),
                cone_cos: cone_angle.cos(),
                exponent,
                decay,
            },
            color,
            intensity,
        }
    }
}

pub trait EnvironmentMap: Send + Sync {
    /// Radiance arriving from the world-space `direction`
    fn sample(&self, direction: Vec3) -> Vec3;
}

#[derive(Clone)]
pub enum Background {
    Color(Vec3),
    Map(Arc<dyn EnvironmentMap>),
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Background::Color(color) => f.debug_tuple("Color").field(color).finish(),
            Background::Map(_) => f.write_str("Map"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fog {
    pub color: Vec3,
    /// Distance over which light falls to 1/e
    pub distance: f32,
}

#[derive(Clone, Debug)]
pub struct Environment {
    pub ambient: Vec3,
    pub background: Background,
    pub fog: Option<Fog>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            ambient: Vec3::ZERO,
            background: Background::Color(Vec3::ZERO),
            fog: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub lights: Vec<Light>,
    pub environment: Environment,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: SceneObject) {
        self.objects.push(object);
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }
}
