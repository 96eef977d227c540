use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{Receiver, Sender};
use glam::{Mat4, Vec3};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use swscan::math::blend3;
use swscan::util::argb_to_rgba8;
use swscan::{
    Background, DisplacedSurface, EnvironmentMap, Fog, Light, OptionValue, ProceduralVolume,
    RenderCamera, RenderListener, RenderMesh, RenderOption, RenderOptions, RenderedImage,
    Renderer, Scene, SceneObject, ShadingMode, StaticGeometry, Supersampling, SurfaceSpec,
    UniformSurface, UniformVolume, VolumeSpec,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Shading {
    Flat,
    Hybrid,
    Phong,
}

impl From<Shading> for ShadingMode {
    fn from(shading: Shading) -> Self {
        match shading {
            Shading::Flat => ShadingMode::Flat,
            Shading::Hybrid => ShadingMode::Hybrid,
            Shading::Phong => ShadingMode::Phong,
        }
    }
}

#[derive(Parser, Clone)]
#[command(name = "swscan")]
#[command(about = "Renders a built-in demo scene with the scanline fragment rasterizer")]
struct Settings {
    /// PNG file to write
    #[arg(default_value = "render.png")]
    output: PathBuf,

    #[arg(long, default_value_t = 800)]
    width: usize,

    #[arg(long, default_value_t = 600)]
    height: usize,

    #[arg(long, value_enum, default_value_t = Shading::Hybrid)]
    shading: Shading,

    /// Subsamples per pixel along each axis
    #[arg(long, default_value_t = 1)]
    supersample: u32,

    /// Only take the extra subsamples for coverage, not shading
    #[arg(long)]
    edges_only: bool,

    /// Maximum geometric error in world units
    #[arg(long, default_value_t = 0.02)]
    surface_error: f32,

    /// Interpret the surface error in pixels at each object's distance
    #[arg(long)]
    adaptive: bool,

    /// Fog distance, disabled when absent
    #[arg(long)]
    fog: Option<f32>,

    /// Leave the background transparent
    #[arg(long)]
    transparent: bool,

    /// Worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

impl Settings {
    fn supersampling(&self) -> Supersampling {
        match (self.supersample, self.edges_only) {
            (0 | 1, _) => Supersampling::None,
            (n, true) => Supersampling::Edges(n),
            (n, false) => Supersampling::Full(n),
        }
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions::new()
            .shading(self.shading.into())
            .adaptive_tolerance(self.adaptive)
            .transparent_background(self.transparent)
            .threads(self.threads)
    }
}

enum RenderEvent {
    Updated,
    Status(String),
    Complete(RenderedImage),
    Canceled,
}

// Forwards renderer callbacks to the main thread
struct ChannelListener {
    sender: Sender<RenderEvent>,
}

impl RenderListener for ChannelListener {
    fn image_updated(&self, _image: &RenderedImage) {
        let _ = self.sender.send(RenderEvent::Updated);
    }

    fn image_complete(&self, image: RenderedImage) {
        let _ = self.sender.send(RenderEvent::Complete(image));
    }

    fn rendering_canceled(&self) {
        let _ = self.sender.send(RenderEvent::Canceled);
    }

    fn status_changed(&self, status: &str) {
        let _ = self.sender.send(RenderEvent::Status(status.to_string()));
    }
}

// Vertical gradient from the horizon to the zenith
struct Sky {
    horizon: Vec3,
    zenith: Vec3,
}

impl EnvironmentMap for Sky {
    fn sample(&self, direction: Vec3) -> Vec3 {
        let t = direction.y.clamp(0.0, 1.0).sqrt();
        self.horizon.lerp(self.zenith, t)
    }
}

fn demo_scene(fog: Option<f32>) -> Scene {
    let mut scene = Scene::new();

    let ground = UniformSurface(SurfaceSpec {
        diffuse: Vec3::new(0.55, 0.5, 0.45),
        ..SurfaceSpec::default()
    });
    scene.add_object(
        SceneObject::new(
            "ground",
            Arc::new(StaticGeometry::new(RenderMesh::quad(20.0, 20.0))),
            Arc::new(ground),
        )
        .with_transform(Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2)),
    );

    // Glass cube filled with tinted medium
    let glass = UniformSurface(SurfaceSpec {
        diffuse: Vec3::splat(0.05),
        highlight: Vec3::splat(0.8),
        specular: Vec3::splat(0.1),
        transparent: Vec3::splat(0.85),
        roughness: 0.05,
        ..SurfaceSpec::default()
    });
    let tint = UniformVolume(VolumeSpec {
        transparency: Vec3::new(0.35, 0.7, 0.9),
        color: Vec3::new(0.02, 0.05, 0.08),
    });
    scene.add_object(
        SceneObject::new(
            "glass cube",
            Arc::new(StaticGeometry::new(RenderMesh::cuboid(Vec3::splat(1.4)))),
            Arc::new(glass),
        )
        .with_transform(
            Mat4::from_translation(Vec3::new(-1.3, 0.7, 0.0)) * Mat4::from_rotation_y(0.6),
        )
        .with_volume(Arc::new(tint))
        .closed(true),
    );

    // Sphere with horizontal ripples, displaced by height so neighbouring
    // triangles agree along shared edges
    let sphere = RenderMesh::sphere(0.8, 32, 16);
    let (positions, triangles) = (sphere.positions.clone(), sphere.triangles.clone());
    let rippled = DisplacedSurface {
        spec: SurfaceSpec {
            diffuse: Vec3::new(0.8, 0.3, 0.15),
            highlight: Vec3::splat(0.5),
            roughness: 0.3,
            ..SurfaceSpec::default()
        },
        displacement: move |triangle: usize, bary: Vec3| {
            let corners = triangles[triangle].vertices.map(|i| positions[i as usize]);
            (blend3(corners, bary).y * 24.0).sin() * 0.02
        },
    };
    scene.add_object(
        SceneObject::new(
            "rippled sphere",
            Arc::new(StaticGeometry::new(sphere)),
            Arc::new(rippled),
        )
        .with_transform(Mat4::from_translation(Vec3::new(1.2, 0.8, -0.5)))
        .closed(true),
    );

    // Puff of smoke, densest in the middle
    let clear = UniformSurface(SurfaceSpec {
        diffuse: Vec3::ZERO,
        transparent: Vec3::ONE,
        ..SurfaceSpec::default()
    });
    let smoke = ProceduralVolume {
        step_size: 0.05,
        function: |local: Vec3| {
            let density = (1.0 - local.length() / 0.6).clamp(0.0, 1.0);
            VolumeSpec {
                transparency: Vec3::splat(1.0 - 0.9 * density),
                color: Vec3::splat(0.6),
            }
        },
    };
    scene.add_object(
        SceneObject::new(
            "smoke",
            Arc::new(StaticGeometry::new(RenderMesh::sphere(0.6, 16, 8))),
            Arc::new(clear),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.2, 0.6, 1.4)))
        .with_volume(Arc::new(smoke))
        .closed(true),
    );

    scene.add_light(Light::directional(
        Vec3::new(-0.4, -1.0, -0.6),
        Vec3::new(1.0, 0.95, 0.85),
        1.0,
    ));
    scene.add_light(Light::point(
        Vec3::new(2.0, 3.0, 3.0),
        0.3,
        Vec3::new(0.6, 0.7, 1.0),
        0.8,
    ));

    scene.environment.ambient = Vec3::splat(0.08);
    scene.environment.background = Background::Map(Arc::new(Sky {
        horizon: Vec3::new(0.8, 0.85, 0.9),
        zenith: Vec3::new(0.25, 0.4, 0.75),
    }));
    scene.environment.fog = fog.map(|distance| Fog {
        color: Vec3::new(0.75, 0.78, 0.82),
        distance,
    });
    scene
}

fn wait_for_image(receiver: &Receiver<RenderEvent>) -> anyhow::Result<RenderedImage> {
    let mut updates = 0;
    loop {
        match receiver.recv().context("render thread stopped unexpectedly")? {
            RenderEvent::Updated => {
                updates += 1;
                log::debug!("Progress image {updates}");
            }
            RenderEvent::Status(status) => log::info!("{status}"),
            RenderEvent::Complete(image) => return Ok(image),
            RenderEvent::Canceled => bail!("rendering was canceled"),
        }
    }
}

fn save_png(image: &RenderedImage, path: &PathBuf) -> anyhow::Result<()> {
    let bytes: Vec<u8> = image.argb.iter().flat_map(|&argb| argb_to_rgba8(argb)).collect();
    let buffer = image::RgbaImage::from_raw(image.width as u32, image.height as u32, bytes)
        .context("image buffer has the wrong size")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let settings = Settings::parse();
    if settings.width == 0 || settings.height == 0 {
        bail!("image size must not be zero");
    }

    let scene = Arc::new(demo_scene(settings.fog));
    let camera = RenderCamera::new(
        Vec3::new(0.5, 2.2, 6.0),
        Vec3::new(0.0, 0.6, 0.0),
        45f32.to_radians(),
        settings.width,
        settings.height,
    );

    let (sender, receiver) = crossbeam_channel::unbounded();
    let listener = Arc::new(ChannelListener { sender });
    let mut renderer = Renderer::new(settings.render_options());
    // These go through validation
    renderer.set_option(
        RenderOption::Supersampling,
        OptionValue::Supersampling(settings.supersampling()),
    )?;
    renderer.set_option(
        RenderOption::SurfaceError,
        OptionValue::Float(settings.surface_error),
    )?;

    let start = Instant::now();
    renderer.render_scene(scene, camera, listener)?;
    let image = wait_for_image(&receiver)?;
    renderer.wait();
    log::info!("Finished in {:.2} s", start.elapsed().as_secs_f64());

    save_png(&image, &settings.output)?;
    log::info!("Wrote {}", settings.output.display());
    Ok(())
}
