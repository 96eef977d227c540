use glam::{Mat4, Vec2, Vec3, Vec4};

const DEFAULT_NEAR_CLIP: f32 = 0.01;

/// Camera used by the rasterizer.
///
/// View space has the camera at the origin with x pointing right, y up and
/// z pointing forward, so the depth of a point is its view-space z.
/// Screen coordinates put pixel (or subpixel) centers on integer coordinates.
#[derive(Clone, Debug)]
pub struct RenderCamera {
    pub position: Vec3,
    pub width: usize,
    pub height: usize,
    /// Vertical field of view in radians
    pub fov: f32,
    pub near: f32,
    // Cached matrices and planes
    pub world_to_view: Mat4,
    pub view_to_world: Mat4,
    pub view_clip_planes: [Vec4; 5],
}

impl RenderCamera {
    pub fn new(position: Vec3, look_at: Vec3, fov: f32, width: usize, height: usize) -> Self {
        let forward = (look_at - position).normalize_or(Vec3::NEG_Z);
        // Use Z as the reference up vector when looking straight up or down
        let reference_up = if forward.cross(Vec3::Y).length_squared() < 1e-8 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let right = forward.cross(reference_up).normalize();
        let up = right.cross(forward);

        let view_to_world = Mat4::from_cols(
            right.extend(0.0),
            up.extend(0.0),
            forward.extend(0.0),
            position.extend(1.0),
        );

        let mut camera = Self {
            position,
            width,
            height,
            fov,
            near: DEFAULT_NEAR_CLIP,
            world_to_view: view_to_world.inverse(),
            view_to_world,
            view_clip_planes: [Vec4::ZERO; 5],
        };
        camera.view_clip_planes = camera.compute_view_clip_planes();
        camera
    }

    pub fn with_near_clip(mut self, near: f32) -> Self {
        self.near = near;
        self.view_clip_planes = self.compute_view_clip_planes();
        self
    }

    /// Focal length in pixels of a grid with `samples` subsamples per pixel
    pub fn focal_length(&self, samples: usize) -> f32 {
        (self.height * samples) as f32 * 0.5 / (self.fov * 0.5).tan()
    }

    pub fn project(&self, view: Vec3, samples: usize) -> Vec2 {
        let focal = self.focal_length(samples);
        let center_x = (self.width * samples) as f32 * 0.5 - 0.5;
        let center_y = (self.height * samples) as f32 * 0.5 - 0.5;
        Vec2::new(
            center_x + focal * view.x / view.z,
            center_y - focal * view.y / view.z,
        )
    }

    /// View-space direction through a (sub)pixel center, scaled to unit depth
    pub fn view_ray(&self, x: f32, y: f32, samples: usize) -> Vec3 {
        let focal = self.focal_length(samples);
        let center_x = (self.width * samples) as f32 * 0.5 - 0.5;
        let center_y = (self.height * samples) as f32 * 0.5 - 0.5;
        Vec3::new((x - center_x) / focal, (center_y - y) / focal, 1.0)
    }

    // Planes in view space, inside when dot(plane, point) >= 0
    fn compute_view_clip_planes(&self) -> [Vec4; 5] {
        let tan_half_height = (self.fov * 0.5).tan();
        let tan_half_width = tan_half_height * self.width as f32 / self.height.max(1) as f32;

        let left = Vec4::new(1.0, 0.0, tan_half_width, 0.0);
        let right = Vec4::new(-1.0, 0.0, tan_half_width, 0.0);
        let bottom = Vec4::new(0.0, 1.0, tan_half_height, 0.0);
        let top = Vec4::new(0.0, -1.0, tan_half_height, 0.0);
        let near = Vec4::new(0.0, 0.0, 1.0, -self.near);

        [left, right, bottom, top, near]
    }
}
