use approx::assert_abs_diff_eq;
use glam::{Mat4, Vec3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use swscan::util::argb_unpack;
use swscan::{
    Background, BoundingBox, DisplacedSurface, EnvironmentMap, Geometry, Light, OptionValue, RenderCamera,
    RenderError, RenderListener, RenderMesh, RenderOption, RenderOptions, RenderedImage, Renderer,
    Scene, SceneObject, ShadingMode, StaticGeometry, Supersampling, SurfaceSpec, UniformSurface,
    UniformVolume, VolumeSpec,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera(width: usize, height: usize, fov_degrees: f32) -> RenderCamera {
    RenderCamera::new(
        Vec3::ZERO,
        Vec3::NEG_Z,
        fov_degrees.to_radians(),
        width,
        height,
    )
}

fn surface(spec: SurfaceSpec) -> Arc<UniformSurface> {
    Arc::new(UniformSurface(spec))
}

fn quad_at(name: &str, depth: f32, spec: SurfaceSpec) -> SceneObject {
    SceneObject::new(
        name,
        Arc::new(StaticGeometry::new(RenderMesh::quad(40.0, 40.0))),
        surface(spec),
    )
    .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -depth)))
}

// Orange wall filling the view, lit head on
fn lit_wall() -> Scene {
    let mut scene = Scene::new();
    scene.add_object(quad_at(
        "wall",
        10.0,
        SurfaceSpec {
            diffuse: Vec3::new(0.8, 0.4, 0.2),
            ..SurfaceSpec::default()
        },
    ));
    scene.add_light(Light::directional(Vec3::NEG_Z, Vec3::ONE, 1.0));
    scene
}

fn channels(argb: u32) -> [u32; 4] {
    [argb >> 24, (argb >> 16) & 0xFF, (argb >> 8) & 0xFF, argb & 0xFF]
}

fn assert_channels_near(argb: u32, expected: [u32; 4]) {
    for (actual, expected) in channels(argb).into_iter().zip(expected) {
        assert!(
            actual.abs_diff(expected) <= 1,
            "pixel {argb:08x} differs from {expected:?}"
        );
    }
}

#[test]
fn opaque_wall_shades_every_pixel() {
    init_logging();
    let renderer = Renderer::new(RenderOptions::new().shading(ShadingMode::Flat));
    let image = renderer
        .render_immediate(&lit_wall(), &camera(4, 4, 90.0))
        .unwrap();

    assert_eq!((image.width, image.height), (4, 4));
    assert!(image.hdr.is_none());
    for y in 0..4 {
        for x in 0..4 {
            assert_channels_near(image.pixel(x, y), [255, 204, 102, 51]);
            assert_abs_diff_eq!(image.depth_at(x, y), 10.0, epsilon = 1e-3);
        }
    }
}

#[test]
fn shading_modes_agree_on_a_plain_wall() {
    init_logging();
    let scene = lit_wall();
    let camera = camera(6, 4, 60.0);
    let images: Vec<RenderedImage> = [ShadingMode::Flat, ShadingMode::Hybrid, ShadingMode::Phong]
        .into_iter()
        .map(|shading| {
            Renderer::new(RenderOptions::new().shading(shading))
                .render_immediate(&scene, &camera)
                .unwrap()
        })
        .collect();

    for image in &images[1..] {
        for (a, b) in image.argb.iter().zip(&images[0].argb) {
            assert_channels_near(*a, channels(*b));
        }
    }
}

#[test]
fn supersampling_keeps_uniform_surfaces_unchanged() {
    init_logging();
    let scene = lit_wall();
    let camera = camera(5, 3, 70.0);
    let render = |supersampling| {
        Renderer::new(RenderOptions::new().supersampling(supersampling))
            .render_immediate(&scene, &camera)
            .unwrap()
    };

    let reference = render(Supersampling::None);
    for supersampling in [Supersampling::Full(2), Supersampling::Edges(3)] {
        let image = render(supersampling);
        for (a, b) in image.argb.iter().zip(&reference.argb) {
            assert_channels_near(*a, channels(*b));
        }
        assert_eq!(image.depth.len(), reference.depth.len());
    }
}

fn stacked_glass(transparent_background: bool) -> (Scene, Renderer) {
    let mut scene = Scene::new();
    let glass = |diffuse| SurfaceSpec {
        diffuse,
        transparent: Vec3::splat(0.5),
        ..SurfaceSpec::default()
    };
    // Added in back to front order, the rasterizer must sort them anyway
    scene.add_object(quad_at("green", 8.0, glass(Vec3::new(0.0, 0.5, 0.0))));
    scene.add_object(quad_at("red", 5.0, glass(Vec3::new(0.5, 0.0, 0.0))));
    scene.environment.ambient = Vec3::splat(0.5);
    scene.environment.background = Background::Color(Vec3::new(0.0, 0.0, 0.5));

    let renderer = Renderer::new(
        RenderOptions::new()
            .high_dynamic_range(true)
            .transparent_background(transparent_background),
    );
    (scene, renderer)
}

#[test]
fn translucent_layers_composite_front_to_back() {
    init_logging();
    let (scene, renderer) = stacked_glass(false);
    let image = renderer.render_immediate(&scene, &camera(3, 3, 60.0)).unwrap();

    let color = image.hdr_at(1, 1).unwrap();
    assert_abs_diff_eq!(color.x, 0.25, epsilon = 1e-4);
    assert_abs_diff_eq!(color.y, 0.125, epsilon = 1e-4);
    assert_abs_diff_eq!(color.z, 0.125, epsilon = 1e-4);
    // Depth reports the nearest surface even when it is translucent
    assert_abs_diff_eq!(image.depth_at(1, 1), 5.0, epsilon = 1e-3);
    assert_eq!(image.pixel(1, 1) >> 24, 255);
}

#[test]
fn transparent_background_leaves_coverage_in_alpha() {
    init_logging();
    let (scene, renderer) = stacked_glass(true);
    let image = renderer.render_immediate(&scene, &camera(3, 3, 60.0)).unwrap();

    let (color, alpha) = argb_unpack(image.pixel(1, 1));
    assert_abs_diff_eq!(alpha, 0.75, epsilon = 1.0 / 255.0);
    assert_abs_diff_eq!(color.x, 0.25, epsilon = 1.0 / 255.0);
    assert_abs_diff_eq!(color.z, 0.0, epsilon = 1.0 / 255.0);
    assert_channels_near(image.pixel(1, 1), [191, 64, 32, 0]);
}

#[test]
fn empty_scene_shows_the_background() {
    init_logging();
    let mut scene = Scene::new();
    scene.environment.background = Background::Color(Vec3::new(0.2, 0.4, 0.6));
    let image = Renderer::default()
        .render_immediate(&scene, &camera(4, 2, 60.0))
        .unwrap();

    for (&argb, &depth) in image.argb.iter().zip(&image.depth) {
        assert_channels_near(argb, [255, 51, 102, 153]);
        assert!(depth.is_infinite());
    }
}

#[test]
fn volume_inside_closed_glass_attenuates_the_background() {
    init_logging();
    let mut scene = Scene::new();
    let clear = SurfaceSpec {
        diffuse: Vec3::ZERO,
        transparent: Vec3::ONE,
        ..SurfaceSpec::default()
    };
    let half_per_unit = UniformVolume(VolumeSpec {
        transparency: Vec3::splat(0.5),
        color: Vec3::ZERO,
    });
    scene.add_object(
        SceneObject::new(
            "tank",
            Arc::new(StaticGeometry::new(RenderMesh::cuboid(Vec3::splat(2.0)))),
            surface(clear),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0)))
        .with_volume(Arc::new(half_per_unit))
        .closed(true),
    );
    scene.environment.background = Background::Color(Vec3::ONE);

    let renderer = Renderer::new(RenderOptions::new().high_dynamic_range(true));
    let image = renderer.render_immediate(&scene, &camera(5, 5, 20.0)).unwrap();

    // Two units of medium along the central ray
    let center = image.hdr_at(2, 2).unwrap();
    assert_abs_diff_eq!(center.x, 0.25, epsilon = 1e-3);
    assert_abs_diff_eq!(image.depth_at(2, 2), 9.0, epsilon = 1e-3);

    // Corners miss the tank entirely
    assert_abs_diff_eq!(image.hdr_at(0, 4).unwrap().x, 1.0, epsilon = 1e-5);
    assert!(image.depth_at(0, 4).is_infinite());
}

#[test]
fn fog_fades_distant_walls_towards_the_fog_color() {
    init_logging();
    let render = |depth: f32| {
        let mut scene = Scene::new();
        scene.add_object(quad_at(
            "wall",
            depth,
            SurfaceSpec {
                diffuse: Vec3::ZERO,
                ..SurfaceSpec::default()
            },
        ));
        scene.environment.fog = Some(swscan::Fog {
            color: Vec3::ONE,
            distance: 10.0,
        });
        Renderer::new(RenderOptions::new().high_dynamic_range(true))
            .render_immediate(&scene, &camera(1, 1, 30.0))
            .unwrap()
            .hdr_at(0, 0)
            .unwrap()
    };

    let near = render(5.0);
    let far = render(20.0);
    assert_abs_diff_eq!(near.x, 1.0 - (-0.5f32).exp(), epsilon = 1e-4);
    assert_abs_diff_eq!(far.x, 1.0 - (-2.0f32).exp(), epsilon = 1e-4);
}

#[test]
fn displacement_moves_the_surface_towards_the_camera() {
    init_logging();
    let mut scene = Scene::new();
    let raised = DisplacedSurface {
        spec: SurfaceSpec::default(),
        displacement: |_triangle: usize, _bary: Vec3| 1.0,
    };
    scene.add_object(
        SceneObject::new(
            "raised",
            Arc::new(StaticGeometry::new(RenderMesh::quad(40.0, 40.0))),
            Arc::new(raised),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0))),
    );

    let renderer = Renderer::new(RenderOptions::new().surface_error(5.0));
    let image = renderer.render_immediate(&scene, &camera(4, 4, 60.0)).unwrap();
    for &depth in &image.depth {
        assert_abs_diff_eq!(depth, 9.0, epsilon = 1e-2);
    }
}

// Counts displacement lookups on a flat 10 by 10 sheet built from `size` and `scale`
fn displacement_lookups(size: f32, scale: f32) -> usize {
    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = lookups.clone();
    let flat = DisplacedSurface {
        spec: SurfaceSpec::default(),
        displacement: move |_triangle: usize, _bary: Vec3| {
            counter.fetch_add(1, Ordering::Relaxed);
            0.0
        },
    };
    let mut scene = Scene::new();
    scene.add_object(
        SceneObject::new(
            "sheet",
            Arc::new(StaticGeometry::new(RenderMesh::quad(size, size))),
            Arc::new(flat),
        )
        .with_transform(
            Mat4::from_translation(Vec3::new(0.0, 0.0, -20.0)) * Mat4::from_scale(Vec3::splat(scale)),
        ),
    );

    Renderer::new(RenderOptions::new().surface_error(2.0))
        .render_immediate(&scene, &camera(4, 4, 60.0))
        .unwrap();
    lookups.load(Ordering::Relaxed)
}

#[test]
fn displacement_tolerance_is_measured_after_the_object_transform() {
    init_logging();
    let unscaled = displacement_lookups(10.0, 1.0);
    assert!(unscaled > 20, "{unscaled}");
    assert_eq!(displacement_lookups(1.0, 10.0), unscaled);
    assert_eq!(displacement_lookups(100.0, 0.1), unscaled);
}

// Maps each world direction component from [-1, 1] onto [0, 1]
struct DirectionMap;

impl EnvironmentMap for DirectionMap {
    fn sample(&self, direction: Vec3) -> Vec3 {
        (direction + Vec3::ONE) * 0.5
    }
}

fn direction_color(direction: Vec3) -> Vec3 {
    (direction.normalize() + Vec3::ONE) * 0.5
}

#[test]
fn environment_background_is_sampled_along_world_directions() {
    init_logging();
    let mut scene = Scene::new();
    scene.environment.background = Background::Map(Arc::new(DirectionMap));
    let image = Renderer::new(RenderOptions::new().high_dynamic_range(true))
        .render_immediate(&scene, &camera(3, 3, 90.0))
        .unwrap();

    let center = image.hdr_at(1, 1).unwrap();
    let expected = direction_color(Vec3::NEG_Z);
    assert_abs_diff_eq!(center.x, expected.x, epsilon = 1e-4);
    assert_abs_diff_eq!(center.y, expected.y, epsilon = 1e-4);
    assert_abs_diff_eq!(center.z, expected.z, epsilon = 1e-4);

    // Top left looks left, up and forward
    let corner = image.hdr_at(0, 0).unwrap();
    let expected = direction_color(Vec3::new(-2.0 / 3.0, 2.0 / 3.0, -1.0));
    assert_abs_diff_eq!(corner.x, expected.x, epsilon = 1e-4);
    assert_abs_diff_eq!(corner.y, expected.y, epsilon = 1e-4);
    assert_abs_diff_eq!(corner.z, expected.z, epsilon = 1e-4);
}

#[test]
fn mirrors_reflect_the_environment_behind_the_camera() {
    init_logging();
    let mut scene = Scene::new();
    scene.add_object(quad_at(
        "mirror",
        10.0,
        SurfaceSpec {
            diffuse: Vec3::ZERO,
            specular: Vec3::ONE,
            ..SurfaceSpec::default()
        },
    ));
    scene.environment.background = Background::Map(Arc::new(DirectionMap));
    let image = Renderer::new(
        RenderOptions::new()
            .shading(ShadingMode::Phong)
            .high_dynamic_range(true),
    )
    .render_immediate(&scene, &camera(3, 3, 90.0))
    .unwrap();

    let center = image.hdr_at(1, 1).unwrap();
    let expected = direction_color(Vec3::Z);
    assert_abs_diff_eq!(center.x, expected.x, epsilon = 1e-2);
    assert_abs_diff_eq!(center.y, expected.y, epsilon = 1e-2);
    assert_abs_diff_eq!(center.z, expected.z, epsilon = 1e-2);

    // Off axis rays bounce back towards +z but keep their sideways direction
    let corner = image.hdr_at(0, 0).unwrap();
    let expected = direction_color(Vec3::new(-2.0 / 3.0, 2.0 / 3.0, 1.0));
    assert_abs_diff_eq!(corner.x, expected.x, epsilon = 1e-2);
    assert_abs_diff_eq!(corner.y, expected.y, epsilon = 1e-2);
    assert_abs_diff_eq!(corner.z, expected.z, epsilon = 1e-2);
}

#[test]
fn objects_behind_the_camera_are_skipped() {
    init_logging();
    let mut scene = Scene::new();
    scene.add_object(
        SceneObject::new(
            "behind",
            Arc::new(StaticGeometry::new(RenderMesh::cuboid(Vec3::ONE))),
            surface(SurfaceSpec::default()),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)))
        .closed(true),
    );
    let mut hidden = quad_at("hidden", 10.0, SurfaceSpec::default());
    hidden.visible = false;
    scene.add_object(hidden);

    let image = Renderer::default()
        .render_immediate(&scene, &camera(4, 4, 90.0))
        .unwrap();
    assert!(image.depth.iter().all(|depth| depth.is_infinite()));
}

#[test]
fn options_are_validated() {
    let mut renderer = Renderer::default();
    assert_eq!(
        renderer.get_option(RenderOption::Shading),
        OptionValue::Shading(ShadingMode::Hybrid)
    );

    renderer
        .set_option(RenderOption::SurfaceError, OptionValue::Float(0.5))
        .unwrap();
    assert_eq!(
        renderer.get_option(RenderOption::SurfaceError),
        OptionValue::Float(0.5)
    );

    assert!(matches!(
        renderer.set_option(RenderOption::SurfaceError, OptionValue::Float(-1.0)),
        Err(RenderError::InvalidOption { .. })
    ));
    assert!(matches!(
        renderer.set_option(RenderOption::BackfaceCulling, OptionValue::Float(1.0)),
        Err(RenderError::OptionType { .. })
    ));
    assert!(
        renderer
            .set_option(
                RenderOption::Supersampling,
                OptionValue::Supersampling(Supersampling::Full(0))
            )
            .is_err()
    );
    // Rejected values leave the previous setting alone
    assert_eq!(
        renderer.get_option(RenderOption::SurfaceError),
        OptionValue::Float(0.5)
    );

    for option in RenderOption::ALL {
        let value = renderer.get_option(option);
        renderer.set_option(option, value).unwrap();
    }
}

// Geometry that takes a while to tessellate, so a render can be canceled midway
struct SlowGeometry {
    inner: StaticGeometry,
    delay: Duration,
}

impl Geometry for SlowGeometry {
    fn mesh_at_tolerance(&self, tolerance: f32) -> Option<Arc<RenderMesh>> {
        thread::sleep(self.delay);
        self.inner.mesh_at_tolerance(tolerance)
    }

    fn bounds(&self) -> BoundingBox {
        self.inner.bounds()
    }
}

fn slow_scene(delay: Duration) -> Arc<Scene> {
    let mut scene = Scene::new();
    scene.add_object(
        SceneObject::new(
            "slow",
            Arc::new(SlowGeometry {
                inner: StaticGeometry::new(RenderMesh::quad(40.0, 40.0)),
                delay,
            }),
            surface(SurfaceSpec::default()),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0))),
    );
    Arc::new(scene)
}

#[derive(Default)]
struct Recorder {
    complete: Mutex<Vec<RenderedImage>>,
    canceled: AtomicUsize,
    statuses: Mutex<Vec<String>>,
}

impl RenderListener for Recorder {
    fn image_updated(&self, _image: &RenderedImage) {}

    fn image_complete(&self, image: RenderedImage) {
        self.complete.lock().unwrap().push(image);
    }

    fn rendering_canceled(&self) {
        self.canceled.fetch_add(1, Ordering::SeqCst);
    }

    fn status_changed(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }
}

#[test]
fn background_render_reports_completion() {
    init_logging();
    let mut renderer = Renderer::default();
    let recorder = Arc::new(Recorder::default());
    renderer
        .render_scene(slow_scene(Duration::ZERO), camera(4, 4, 60.0), recorder.clone())
        .unwrap();
    renderer.wait();

    assert!(!renderer.is_rendering());
    assert_eq!(recorder.complete.lock().unwrap().len(), 1);
    assert_eq!(recorder.canceled.load(Ordering::SeqCst), 0);
    let statuses = recorder.statuses.lock().unwrap();
    assert_eq!(*statuses, ["Rasterizing", "Compositing"]);
}

#[test]
fn canceling_a_render_reports_cancellation() {
    init_logging();
    let mut renderer = Renderer::default();
    let recorder = Arc::new(Recorder::default());
    let scene = slow_scene(Duration::from_millis(300));
    renderer
        .render_scene(scene.clone(), camera(4, 4, 60.0), recorder.clone())
        .unwrap();
    assert!(renderer.is_rendering());

    // Returns once the render thread has stopped
    renderer.cancel_rendering(&scene);
    assert!(!renderer.is_rendering());
    assert_eq!(recorder.canceled.load(Ordering::SeqCst), 1);
    assert!(recorder.complete.lock().unwrap().is_empty());
}

#[test]
fn canceling_another_scene_is_ignored() {
    init_logging();
    let mut renderer = Renderer::default();
    let recorder = Arc::new(Recorder::default());
    let scene = slow_scene(Duration::from_millis(100));
    renderer
        .render_scene(scene, camera(4, 4, 60.0), recorder.clone())
        .unwrap();

    let unrelated = slow_scene(Duration::ZERO);
    renderer.cancel_rendering(&unrelated);
    renderer.wait();

    assert_eq!(recorder.canceled.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.complete.lock().unwrap().len(), 1);
}

#[test]
fn starting_a_new_render_cancels_the_previous_one() {
    init_logging();
    let mut renderer = Renderer::default();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    renderer
        .render_scene(
            slow_scene(Duration::from_millis(300)),
            camera(4, 4, 60.0),
            first.clone(),
        )
        .unwrap();
    renderer
        .render_scene(slow_scene(Duration::ZERO), camera(4, 4, 60.0), second.clone())
        .unwrap();
    renderer.wait();

    assert_eq!(first.canceled.load(Ordering::SeqCst), 1);
    assert!(first.complete.lock().unwrap().is_empty());
    assert_eq!(second.canceled.load(Ordering::SeqCst), 0);
    let images = second.complete.lock().unwrap();
    assert_eq!(images.len(), 1);
    assert!(images[0].depth.iter().all(|depth| (depth - 10.0).abs() < 1e-3));
}
