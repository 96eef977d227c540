//! Scan conversion of object meshes into the fragment buffer.
//!
//! Triangles are transformed into view space, optionally subdivided for
//! displacement, clipped against the near plane and projected onto the
//! (sub)pixel grid. Each covered row is shaded into a worker-local scratch row
//! and merged into the shared buffer under that row's lock.

use glam::{Mat3, Mat4, Vec2, Vec3};
use log::debug;

use crate::clip::clip_near;
use crate::fragbuffer::FragmentBuffer;
use crate::fragment::{Fragment, FragmentKind};
use crate::lighting::SceneLighting;
use crate::math::{blend3, normal_matrix};
use crate::options::{RenderOptions, ShadingMode};
use crate::rendercamera::RenderCamera;
use crate::scene::{RenderMesh, SceneObject};
use crate::shader::*;
use crate::subdivide::{Corner, Subdivider, SurfacePoint};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScanVertex<const N: usize> {
    /// Position on the (sub)pixel grid
    pub screen: Vec2,
    /// View space depth, in front of the near plane
    pub depth: f32,
    pub attributes: [f32; N],
}

// A quantity varying linearly over the screen
#[derive(Copy, Clone, Debug)]
struct Plane {
    value: f32,
    dx: f32,
    dy: f32,
}

impl Plane {
    fn new(values: [f32; 3], corners: &[Vec2; 3], area: f32) -> Self {
        let d1 = corners[1] - corners[0];
        let d2 = corners[2] - corners[0];
        let q1 = values[1] - values[0];
        let q2 = values[2] - values[0];
        Self {
            value: values[0],
            dx: (q1 * d2.y - q2 * d1.y) / area,
            dy: (q2 * d1.x - q1 * d2.x) / area,
        }
    }

    #[inline]
    fn at(&self, offset: Vec2) -> f32 {
        self.value + self.dx * offset.x + self.dy * offset.y
    }
}

/// A projected triangle ready to be scanned.
///
/// Attributes are stored divided by depth so they can be interpolated linearly
/// in screen space together with the inverse depth.
pub struct TriangleSetup<const N: usize> {
    // Snapped corners sorted top to bottom
    corners: [Vec2; 3],
    origin: Vec2,
    inv_depth: Plane,
    attributes: [Plane; N],
}

impl<const N: usize> TriangleSetup<N> {
    /// Returns None for triangles without area
    pub fn new(vertices: &[ScanVertex<N>; 3]) -> Option<Self> {
        let snapped = vertices.map(|vertex| (vertex.screen + 0.5).floor());
        let area = (snapped[1] - snapped[0]).perp_dot(snapped[2] - snapped[0]);
        if area == 0.0 || !area.is_finite() {
            return None;
        }

        let inv_depth = vertices.map(|vertex| 1.0 / vertex.depth);
        let attributes = std::array::from_fn(|i| {
            let values = [0, 1, 2].map(|v| vertices[v].attributes[i] * inv_depth[v]);
            Plane::new(values, &snapped, area)
        });

        let mut corners = snapped;
        corners.sort_by(|a, b| a.y.total_cmp(&b.y));
        Some(Self {
            corners,
            origin: snapped[0],
            inv_depth: Plane::new(inv_depth, &snapped, area),
            attributes,
        })
    }

    /// Calls `span(y, x_start, x_end)` for every covered row inside a
    /// `width` by `height` grid, top to bottom
    pub fn spans(&self, width: usize, height: usize, mut span: impl FnMut(usize, usize, usize)) {
        let [top, middle, bottom] = self.corners;
        // Upper half against the short edge top-middle, then lower half against middle-bottom
        for (upper, lower) in [(top, middle), (middle, bottom)] {
            let y_start = upper.y.max(0.0);
            let y_end = lower.y.min(height as f32);
            let mut y = y_start;
            while y < y_end {
                let long = edge_x(top, bottom, y);
                let short = edge_x(upper, lower, y);
                let x_start = long.min(short).ceil().max(0.0);
                let x_end = long.max(short).ceil().min(width as f32);
                if x_start < x_end {
                    span(y as usize, x_start as usize, x_end as usize);
                }
                y += 1.0;
            }
        }
    }

    /// Depth and perspective correct attributes at a grid position
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> Option<(f32, [f32; N])> {
        let offset = Vec2::new(x, y) - self.origin;
        let inv_depth = self.inv_depth.at(offset);
        if !(inv_depth > 0.0) {
            return None;
        }
        let depth = 1.0 / inv_depth;
        Some((
            depth,
            std::array::from_fn(|i| self.attributes[i].at(offset) * depth),
        ))
    }
}

#[inline]
fn edge_x(a: Vec2, b: Vec2, y: f32) -> f32 {
    a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y)
}

fn blend_attributes<const N: usize>(attributes: &[[f32; N]; 3], weights: Vec3) -> [f32; N] {
    std::array::from_fn(|i| blend3([attributes[0][i], attributes[1][i], attributes[2][i]], weights))
}

/// Rasterizer settings derived from the render options
#[derive(Copy, Clone, Debug)]
pub struct RasterSettings {
    pub shading: ShadingMode,
    pub samples: usize,
    pub shading_stride: usize,
    pub backface_culling: bool,
    pub texture_smoothing: f32,
}

impl RasterSettings {
    pub fn new(options: &RenderOptions) -> Self {
        Self {
            shading: options.shading,
            samples: options.supersampling.samples(),
            shading_stride: options.supersampling.shading_stride(),
            backface_culling: options.backface_culling,
            texture_smoothing: options.texture_smoothing,
        }
    }
}

/// One visible object, prepared by the renderer
#[derive(Clone, Debug)]
pub struct ObjectJob<'a> {
    pub object: &'a SceneObject,
    /// Geometric tolerance for tessellation and displacement
    pub tolerance: f32,
    /// Handle of the object's volumetric material
    pub material: Option<u32>,
    /// Depth of the nearest bounding box corner, used for sorting
    pub nearest_depth: f32,
}

// Entry or exit event attached to the fragments of one triangle
type MaterialEvent = Option<(FragmentKind, u32)>;

/// Per-worker rasterizer state, reused across objects
pub struct RasterContext {
    camera: RenderCamera,
    settings: RasterSettings,
    // World size of one output pixel at unit depth, times the texture smoothing
    footprint_scale: f32,
    scratch: Vec<Option<Fragment>>,
}

impl RasterContext {
    pub fn new(camera: &RenderCamera, settings: RasterSettings) -> Self {
        let width = camera.width * settings.samples;
        Self {
            camera: camera.clone(),
            settings,
            footprint_scale: settings.texture_smoothing / camera.focal_length(1),
            scratch: vec![None; width],
        }
    }

    /// Rasterizes every triangle of an object and returns the number of
    /// fragments merged into the buffer
    pub fn rasterize_object(
        &mut self,
        job: &ObjectJob,
        lighting: &SceneLighting,
        buffer: &FragmentBuffer,
    ) -> usize {
        let object = job.object;
        let Some(mesh) = object.geometry.mesh_at_tolerance(job.tolerance) else {
            debug!("{}: no mesh at tolerance {}", object.name, job.tolerance);
            return 0;
        };

        let local_to_view = self.camera.world_to_view * object.local_to_world;
        let normal_to_view = normal_matrix(&local_to_view);
        let surface = object.surface.as_ref();

        match self.settings.shading {
            ShadingMode::Flat => {
                let shader = FlatShader { lighting, surface };
                self.rasterize_mesh::<FLAT_ATTRIBUTES, _>(
                    &shader,
                    job,
                    &mesh,
                    local_to_view,
                    normal_to_view,
                    buffer,
                )
            }
            ShadingMode::Hybrid => {
                let shader = HybridShader { lighting, surface };
                self.rasterize_mesh::<NORMAL_ATTRIBUTES, _>(
                    &shader,
                    job,
                    &mesh,
                    local_to_view,
                    normal_to_view,
                    buffer,
                )
            }
            ShadingMode::Phong => {
                let shader = PhongShader {
                    lighting,
                    surface,
                    normal_to_view,
                };
                self.rasterize_mesh::<NORMAL_ATTRIBUTES, _>(
                    &shader,
                    job,
                    &mesh,
                    local_to_view,
                    normal_to_view,
                    buffer,
                )
            }
        }
    }

    fn rasterize_mesh<const N: usize, S: RasterizerShader<N>>(
        &mut self,
        shader: &S,
        job: &ObjectJob,
        mesh: &RenderMesh,
        local_to_view: Mat4,
        normal_to_view: Mat3,
        buffer: &FragmentBuffer,
    ) -> usize {
        let object = job.object;
        let surface = object.surface.as_ref();
        let linear = Mat3::from_mat4(local_to_view);
        // Mirroring transforms (the view basis among them) flip the winding
        let handedness = linear.determinant().signum();
        let cull_back_faces = self.settings.backface_culling
            && object.closed
            && !surface.is_transparent()
            && object.volume.is_none();
        let displaced = surface.has_displacement();

        let mut merged = 0;
        for (index, triangle) in mesh.triangles.iter().enumerate() {
            let local = triangle.vertices.map(|i| mesh.positions[i as usize]);
            let view = local.map(|position| local_to_view.transform_point3(position));

            // Facing is decided once for the whole triangle, before subdivision
            let geometric = (view[1] - view[0]).cross(view[2] - view[0]) * handedness;
            let back_facing = geometric.dot(view[0]) >= 0.0;
            if back_facing && cull_back_faces {
                continue;
            }
            let flip = if back_facing { -1.0 } else { 1.0 };
            let event: MaterialEvent = job.material.map(|material| {
                let kind = if back_facing {
                    FragmentKind::MaterialExit
                } else {
                    FragmentKind::MaterialEntry
                };
                (kind, material)
            });

            let face_normal = (local[1] - local[0]).cross(local[2] - local[0]).normalize_or_zero();
            let normals = triangle.normals.map(|i| {
                mesh.normals
                    .get(i as usize)
                    .copied()
                    .filter(|normal| normal.length_squared() > 0.0)
                    .unwrap_or(face_normal)
            });

            let to_view = |point: &SurfacePoint| SurfacePoint {
                position: local_to_view.transform_point3(point.position),
                normal: (normal_to_view * point.normal).normalize_or_zero() * flip,
                bary: point.bary,
            };
            let mut shade = |point: &SurfacePoint| {
                let view_point = to_view(point);
                (view_point, shader.shade_vertex(index, &view_point))
            };

            if displaced {
                let tolerance = job.tolerance;
                let displacement = |bary: Vec3| surface.displacement(index, bary, tolerance);
                let corners = [0, 1, 2].map(|i| Corner {
                    position: local[i],
                    normal: normals[i],
                });
                let mut subdivider =
                    Subdivider::new(tolerance, &displacement).measured_with(linear);
                subdivider.subdivide(corners, &mut shade, &mut |triangle| {
                    let vertices = triangle.map(|(_, shaded)| shaded);
                    merged += self.clip_and_scan(shader, vertices, index, event, buffer);
                });
            } else {
                let barys = [Vec3::X, Vec3::Y, Vec3::Z];
                let vertices = [0, 1, 2].map(|i| {
                    shade(&SurfacePoint {
                        position: local[i],
                        normal: normals[i],
                        bary: barys[i],
                    })
                });
                merged += self.clip_and_scan(shader, vertices, index, event, buffer);
            }
        }
        merged
    }

    fn clip_and_scan<const N: usize, S: RasterizerShader<N>>(
        &mut self,
        shader: &S,
        vertices: [(SurfacePoint, S::Vertex); 3],
        triangle: usize,
        event: MaterialEvent,
        buffer: &FragmentBuffer,
    ) -> usize {
        let positions = vertices.map(|(point, _)| point.position);
        let attributes = vertices.map(|(point, shaded)| shader.vertex_attributes(&point, &shaded));
        let clip = clip_near(positions.map(|position| position.z), self.camera.near);

        let mut merged = 0;
        for clipped in clip.triangles() {
            let scan_vertices = clipped.map(|vertex| ScanVertex {
                screen: self
                    .camera
                    .project(blend3(positions, vertex.bary), self.settings.samples),
                depth: vertex.depth,
                attributes: blend_attributes(&attributes, vertex.bary),
            });
            merged += self.scan(shader, &scan_vertices, triangle, event, buffer);
        }
        merged
    }

    fn scan<const N: usize, S: RasterizerShader<N>>(
        &mut self,
        shader: &S,
        vertices: &[ScanVertex<N>; 3],
        triangle: usize,
        event: MaterialEvent,
        buffer: &FragmentBuffer,
    ) -> usize {
        let Some(setup) = TriangleSetup::new(vertices) else {
            return 0;
        };

        let camera = &self.camera;
        let scratch = &mut self.scratch;
        let samples = self.settings.samples;
        let stride = self.settings.shading_stride;
        let footprint_scale = self.footprint_scale;
        let mut merged = 0;

        setup.spans(buffer.width(), buffer.height(), |y, x_start, x_end| {
            let mut cached: Option<ShadedSample> = None;
            for x in x_start..x_end {
                let Some((depth, attributes)) = setup.sample(x as f32, y as f32) else {
                    continue;
                };
                if depth < camera.near || depth >= buffer.opaque_depth(x, y) {
                    continue;
                }

                // Edge supersampling shades once per output pixel and reuses it
                let reshade = stride == 1 || x == x_start || x % stride == 0;
                let shaded = match cached {
                    Some(shaded) if !reshade => shaded,
                    _ => {
                        let shaded = shader.shade(&RasterizerShaderParams {
                            attributes: &attributes,
                            position: camera.view_ray(x as f32, y as f32, samples) * depth,
                            triangle,
                            size: footprint_scale * depth,
                        });
                        cached = Some(shaded);
                        shaded
                    }
                };

                let mut fragment = Fragment::new(shaded.additive, shaded.multiplicative, depth);
                if let Some((kind, material)) = event {
                    fragment = fragment.with_material(kind, material);
                }
                scratch[x] = Some(fragment);
            }
            merged += buffer.merge_span(y, x_start, &scratch[x_start..x_end]);
            scratch[x_start..x_end].fill(None);
        });
        merged
    }
}
