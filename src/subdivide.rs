//! Adaptive subdivision of displacement mapped triangles.
//!
//! Edges are split at their midpoints until every displaced edge is no longer
//! than the tolerance. Depending on how many edges of a triangle are too long
//! it is split into 2, 3 or 4 children. Vertices of the final triangles get a
//! normal bent by the gradient of the displacement function the first time a
//! triangle using them is emitted.

use glam::{Mat3, Vec3};

// Step for the forward differences of the displacement function
const GRADIENT_STEP: f32 = 1e-5;

/// A corner of the triangle to subdivide
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Corner {
    pub position: Vec3,
    pub normal: Vec3,
}

/// A finished vertex: displaced position, bent normal and barycentric
/// coordinates relative to the original triangle
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SurfacePoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub bary: Vec3,
}

struct DisplacedVertex<S> {
    // Undisplaced position and interpolated normal
    base: Vec3,
    normal: Vec3,
    bary: Vec3,
    displacement: f32,
    finished: Option<(SurfacePoint, S)>,
}

impl<S> DisplacedVertex<S> {
    fn displaced(&self) -> Vec3 {
        self.base + self.normal * self.displacement
    }
}

pub struct Subdivider<'a, S> {
    tolerance: f32,
    // Linear map from corner space to the space the tolerance is measured in
    metric: Mat3,
    displacement: &'a dyn Fn(Vec3) -> f32,
    // Edges of the original triangle along the first two barycentric directions
    edge_u: Vec3,
    edge_v: Vec3,
    vertices: Vec<DisplacedVertex<S>>,
}

impl<'a, S: Copy> Subdivider<'a, S> {
    /// `displacement` is sampled by barycentric coordinates of the original triangle
    pub fn new(tolerance: f32, displacement: &'a dyn Fn(Vec3) -> f32) -> Self {
        Self {
            tolerance,
            metric: Mat3::IDENTITY,
            displacement,
            edge_u: Vec3::ZERO,
            edge_v: Vec3::ZERO,
            vertices: Vec::new(),
        }
    }

    /// Measures edge lengths after `linear`, for corners given in object space
    /// with the tolerance in view space
    pub fn measured_with(mut self, linear: Mat3) -> Self {
        self.metric = linear;
        self
    }

    /// Splits the triangle and calls `emit` for every final triangle.
    ///
    /// `shade` computes the per-vertex shading data once for each vertex that
    /// ends up in an emitted triangle.
    pub fn subdivide(
        &mut self,
        corners: [Corner; 3],
        shade: &mut dyn FnMut(&SurfacePoint) -> S,
        emit: &mut dyn FnMut([(SurfacePoint, S); 3]),
    ) {
        self.vertices.clear();
        self.edge_u = corners[0].position - corners[2].position;
        self.edge_v = corners[1].position - corners[2].position;

        let barys = [Vec3::X, Vec3::Y, Vec3::Z];
        for (corner, bary) in corners.iter().zip(barys) {
            self.vertices.push(DisplacedVertex {
                base: corner.position,
                normal: corner.normal.normalize_or_zero(),
                bary,
                displacement: (self.displacement)(bary),
                finished: None,
            });
        }
        self.split([0, 1, 2], shade, emit);
    }

    fn edge_too_long(&self, a: usize, b: usize) -> bool {
        let edge = self.vertices[a].displaced() - self.vertices[b].displaced();
        (self.metric * edge).length() > self.tolerance
    }

    fn midpoint(&mut self, a: usize, b: usize) -> usize {
        let (va, vb) = (&self.vertices[a], &self.vertices[b]);
        let bary = (va.bary + vb.bary) * 0.5;
        let vertex = DisplacedVertex {
            base: (va.base + vb.base) * 0.5,
            normal: (va.normal + vb.normal).normalize_or(va.normal),
            bary,
            displacement: (self.displacement)(bary),
            finished: None,
        };
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }

    fn split(
        &mut self,
        [a, b, c]: [usize; 3],
        shade: &mut dyn FnMut(&SurfacePoint) -> S,
        emit: &mut dyn FnMut([(SurfacePoint, S); 3]),
    ) {
        let long_ab = self.edge_too_long(a, b);
        let long_bc = self.edge_too_long(b, c);
        let long_ca = self.edge_too_long(c, a);

        match (long_ab, long_bc, long_ca) {
            (false, false, false) => {
                let triangle = [a, b, c].map(|index| self.finish(index, shade));
                emit(triangle);
            }
            // One long edge: split it and connect to the opposite vertex
            (true, false, false) => {
                let m = self.midpoint(a, b);
                self.split([a, m, c], shade, emit);
                self.split([m, b, c], shade, emit);
            }
            (false, true, false) => {
                let m = self.midpoint(b, c);
                self.split([b, m, a], shade, emit);
                self.split([m, c, a], shade, emit);
            }
            (false, false, true) => {
                let m = self.midpoint(c, a);
                self.split([c, m, b], shade, emit);
                self.split([m, a, b], shade, emit);
            }
            // Two long edges: cut off the corner between them and split the rest
            (true, true, false) => {
                let m_ab = self.midpoint(a, b);
                let m_bc = self.midpoint(b, c);
                self.split([m_ab, b, m_bc], shade, emit);
                self.split([a, m_ab, m_bc], shade, emit);
                self.split([a, m_bc, c], shade, emit);
            }
            (false, true, true) => {
                let m_bc = self.midpoint(b, c);
                let m_ca = self.midpoint(c, a);
                self.split([m_bc, c, m_ca], shade, emit);
                self.split([b, m_bc, m_ca], shade, emit);
                self.split([b, m_ca, a], shade, emit);
            }
            (true, false, true) => {
                let m_ca = self.midpoint(c, a);
                let m_ab = self.midpoint(a, b);
                self.split([m_ca, a, m_ab], shade, emit);
                self.split([c, m_ca, m_ab], shade, emit);
                self.split([c, m_ab, b], shade, emit);
            }
            (true, true, true) => {
                let m_ab = self.midpoint(a, b);
                let m_bc = self.midpoint(b, c);
                let m_ca = self.midpoint(c, a);
                self.split([a, m_ab, m_ca], shade, emit);
                self.split([m_ab, b, m_bc], shade, emit);
                self.split([m_ca, m_bc, c], shade, emit);
                self.split([m_ab, m_bc, m_ca], shade, emit);
            }
        }
    }

    // Computes the displaced position, bent normal and shading of a vertex once
    fn finish(
        &mut self,
        index: usize,
        shade: &mut dyn FnMut(&SurfacePoint) -> S,
    ) -> (SurfacePoint, S) {
        if let Some(finished) = self.vertices[index].finished {
            return finished;
        }

        let vertex = &self.vertices[index];
        let normal = self.bent_normal(vertex.bary, vertex.normal, vertex.displacement);
        let point = SurfacePoint {
            position: vertex.displaced(),
            normal,
            bary: vertex.bary,
        };
        let finished = (point, shade(&point));
        self.vertices[index].finished = Some(finished);
        finished
    }

    fn bent_normal(&self, bary: Vec3, normal: Vec3, displacement: f32) -> Vec3 {
        // Moving along u or v takes the same amount away from w
        let along_u = (self.displacement)(bary + Vec3::new(GRADIENT_STEP, 0.0, -GRADIENT_STEP));
        let along_v = (self.displacement)(bary + Vec3::new(0.0, GRADIENT_STEP, -GRADIENT_STEP));
        let slope_u = (along_u - displacement) / GRADIENT_STEP;
        let slope_v = (along_v - displacement) / GRADIENT_STEP;
        if slope_u == 0.0 && slope_v == 0.0 {
            return normal;
        }

        // Find the in-plane gradient g with g.edge_u == slope_u and g.edge_v == slope_v
        let uu = self.edge_u.dot(self.edge_u);
        let uv = self.edge_u.dot(self.edge_v);
        let vv = self.edge_v.dot(self.edge_v);
        let determinant = uu * vv - uv * uv;
        if determinant.abs() <= f32::EPSILON * uu * vv {
            return normal;
        }
        let a = (slope_u * vv - slope_v * uv) / determinant;
        let b = (slope_v * uu - slope_u * uv) / determinant;
        let gradient = self.edge_u * a + self.edge_v * b;
        (normal - gradient).normalize_or(normal)
    }
}
