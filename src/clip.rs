//! Near plane clipping.
//!
//! Only the near plane needs real clipping: the scan converter clamps spans
//! to the image, but vertices behind the camera cannot be projected.

use glam::Vec3;

/// A vertex of a clipped triangle, expressed relative to the input triangle
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClipVertex {
    /// Weights of the three input vertices
    pub bary: Vec3,
    pub depth: f32,
}

impl ClipVertex {
    fn corner(index: usize, depth: f32) -> Self {
        let mut bary = Vec3::ZERO;
        bary[index] = 1.0;
        Self { bary, depth }
    }

    fn crossing(front: &ClipVertex, back: &ClipVertex, near: f32) -> Self {
        let t = (front.depth - near) / (front.depth - back.depth);
        Self {
            bary: front.bary + (back.bary - front.bary) * t,
            depth: front.depth + (back.depth - front.depth) * t,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NearClip {
    /// Entirely in front of the near plane, nothing changed
    Visible([ClipVertex; 3]),
    /// Entirely behind the near plane
    Culled,
    /// Two vertices were behind the plane
    Triangle([ClipVertex; 3]),
    /// One vertex was behind the plane, leaving a quadrilateral
    Quad([ClipVertex; 4]),
}

impl NearClip {
    /// Triangles to rasterize, in the winding order of the input
    pub fn triangles(&self) -> impl Iterator<Item = [ClipVertex; 3]> + '_ {
        let (first, second) = match self {
            NearClip::Visible(triangle) | NearClip::Triangle(triangle) => (Some(*triangle), None),
            NearClip::Culled => (None, None),
            NearClip::Quad([a, b, c, d]) => (Some([*a, *b, *c]), Some([*a, *c, *d])),
        };
        first.into_iter().chain(second)
    }
}

/// Clips a triangle with view-space depths `depths` against the plane `z = near`
pub fn clip_near(depths: [f32; 3], near: f32) -> NearClip {
    let corners: [ClipVertex; 3] = std::array::from_fn(|i| ClipVertex::corner(i, depths[i]));
    let behind = depths.iter().filter(|&&z| z < near).count();

    match behind {
        0 => NearClip::Visible(corners),
        3 => NearClip::Culled,
        _ => {
            // Sutherland-Hodgman against a single plane keeps the winding
            let mut polygon = [corners[0]; 4];
            let mut count = 0;
            for i in 0..3 {
                let current = &corners[i];
                let next = &corners[(i + 1) % 3];
                let current_in = current.depth >= near;
                let next_in = next.depth >= near;
                if current_in {
                    polygon[count] = *current;
                    count += 1;
                    if !next_in {
                        polygon[count] = ClipVertex::crossing(current, next, near);
                        count += 1;
                    }
                } else if next_in {
                    polygon[count] = ClipVertex::crossing(next, current, near);
                    count += 1;
                }
            }
            if count == 3 {
                NearClip::Triangle([polygon[0], polygon[1], polygon[2]])
            } else {
                NearClip::Quad(polygon)
            }
        }
    }
}
