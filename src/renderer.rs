use glam::{Mat4, Vec3};
use log::{debug, error, info, warn};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::composite::{CompositingContext, Compositor};
use crate::error::Result;
use crate::fragbuffer::FragmentBuffer;
use crate::fragment::ObjectMaterialInfo;
use crate::lighting::SceneLighting;
use crate::options::{OptionValue, RenderOption, RenderOptions};
use crate::raster::{ObjectJob, RasterContext, RasterSettings};
use crate::rendercamera::RenderCamera;
use crate::scene::{Scene, SceneObject};
use crate::util::{Throttle, argb_pack};

// Minimum time between two progress images
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Output of a render
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedImage {
    pub width: usize,
    pub height: usize,
    /// Packed ARGB pixels, row major
    pub argb: Vec<u32>,
    /// Depth of the nearest surface per pixel, infinite for background
    pub depth: Vec<f32>,
    /// Unclamped red, green and blue planes
    pub hdr: Option<[Vec<f32>; 3]>,
}

impl RenderedImage {
    pub fn new(width: usize, height: usize, high_dynamic_range: bool) -> Self {
        let pixels = width * height;
        Self {
            width,
            height,
            argb: vec![0; pixels],
            depth: vec![f32::INFINITY; pixels],
            hdr: high_dynamic_range.then(|| std::array::from_fn(|_| vec![0.0; pixels])),
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.argb[y * self.width + x]
    }

    pub fn depth_at(&self, x: usize, y: usize) -> f32 {
        self.depth[y * self.width + x]
    }

    pub fn hdr_at(&self, x: usize, y: usize) -> Option<Vec3> {
        let index = y * self.width + x;
        self.hdr
            .as_ref()
            .map(|[r, g, b]| Vec3::new(r[index], g[index], b[index]))
    }
}

/// Receives progress and results of asynchronous renders.
///
/// Callbacks run on the render thread or on pool workers.
pub trait RenderListener: Send + Sync {
    fn image_updated(&self, image: &RenderedImage);
    fn image_complete(&self, image: RenderedImage);
    fn rendering_canceled(&self);
    fn status_changed(&self, _status: &str) {}
}

struct SilentListener;

impl RenderListener for SilentListener {
    fn image_updated(&self, _image: &RenderedImage) {}
    fn image_complete(&self, _image: RenderedImage) {}
    fn rendering_canceled(&self) {}
}

/// Checked by workers between objects and rows
#[derive(Clone, Debug)]
pub struct CancelToken {
    generation: Arc<AtomicU64>,
    started: u64,
}

impl CancelToken {
    fn new(generation: &Arc<AtomicU64>) -> Self {
        Self {
            generation: generation.clone(),
            started: generation.load(Ordering::Acquire),
        }
    }

    // A token on a private counter which nobody bumps
    fn never() -> Self {
        Self::new(&Arc::new(AtomicU64::new(0)))
    }

    pub fn is_canceled(&self) -> bool {
        self.generation.load(Ordering::Acquire) != self.started
    }
}

// Everything one render needs, shared by the render thread and `render_immediate`
struct RenderJob<'a> {
    scene: &'a Scene,
    camera: &'a RenderCamera,
    options: &'a RenderOptions,
    listener: &'a dyn RenderListener,
    cancel: CancelToken,
}

impl RenderJob<'_> {
    // Returns None when canceled
    fn run(&self) -> Result<Option<RenderedImage>> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("swscan-worker-{index}"));
        if self.options.threads > 0 {
            builder = builder.num_threads(self.options.threads);
        }
        let pool = builder.build()?;
        Ok(pool.install(|| self.render()))
    }

    fn render(&self) -> Option<RenderedImage> {
        let start = Instant::now();
        let camera = self.camera;
        let settings = RasterSettings::new(self.options);
        let samples = settings.samples;
        let throttle = Throttle::new(PROGRESS_INTERVAL);

        let (jobs, materials) = self.prepare_objects();
        let lighting = SceneLighting::new(self.scene, camera);
        debug!(
            "{} of {} objects visible, {} volumetric materials",
            jobs.len(),
            self.scene.objects.len(),
            materials.len()
        );

        // Rasterize, one task per object
        self.listener.status_changed("Rasterizing");
        let buffer = FragmentBuffer::new(camera.width * samples, camera.height * samples);
        jobs.par_iter().for_each_init(
            || RasterContext::new(camera, settings),
            |context, job| {
                if self.cancel.is_canceled() {
                    return;
                }
                let merged = context.rasterize_object(job, &lighting, &buffer);
                debug!("{}: {} fragments", job.object.name, merged);
                if throttle.ready() {
                    self.listener
                        .image_updated(&self.preview(&buffer, samples));
                }
            },
        );
        if self.cancel.is_canceled() {
            return None;
        }
        let raster_time = start.elapsed();

        // Composite, one task per output row
        self.listener.status_changed("Compositing");
        let rows = buffer.into_rows();
        let compositor = Compositor::new(
            camera,
            samples,
            &materials,
            self.scene.environment.fog,
            lighting.background().clone(),
        )
        .transparent_background(self.options.transparent_background)
        .high_dynamic_range(self.options.high_dynamic_range);

        let image = Mutex::new(RenderedImage::new(
            camera.width,
            camera.height,
            self.options.high_dynamic_range,
        ));
        (0..camera.height).into_par_iter().for_each_init(
            || CompositingContext::new(camera.width),
            |context, y| {
                if self.cancel.is_canceled() {
                    return;
                }
                let row = compositor.composite_row(&rows, y, context);
                {
                    let mut image = image.lock().unwrap_or_else(PoisonError::into_inner);
                    let range = y * camera.width..(y + 1) * camera.width;
                    image.argb[range.clone()].copy_from_slice(&row.argb);
                    image.depth[range.clone()].copy_from_slice(&row.depth);
                    if let Some([r, g, b]) = image.hdr.as_mut() {
                        for (i, color) in range.zip(&row.hdr) {
                            r[i] = color.x;
                            g[i] = color.y;
                            b[i] = color.z;
                        }
                    }
                }
                if throttle.ready() {
                    let snapshot = image.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    self.listener.image_updated(&snapshot);
                }
            },
        );
        if self.cancel.is_canceled() {
            return None;
        }

        info!(
            "Rendered {}x{} ({}x{} samples): rasterization {:.2} ms, compositing {:.2} ms",
            camera.width,
            camera.height,
            samples,
            samples,
            raster_time.as_secs_f64() * 1000.0,
            (start.elapsed() - raster_time).as_secs_f64() * 1000.0
        );
        Some(image.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    // Culls objects against the view frustum, picks their tolerance and sorts
    // them front to back
    fn prepare_objects(&self) -> (Vec<ObjectJob<'_>>, Vec<ObjectMaterialInfo>) {
        let camera = self.camera;
        let options = self.options;
        let mut jobs = Vec::new();
        let mut materials = Vec::new();

        for object in self.scene.objects.iter().filter(|object| object.visible) {
            let local_to_view = camera.world_to_view * object.local_to_world;
            let Some(nearest_depth) = visible_depth(object, &local_to_view, camera) else {
                debug!("{}: outside the view frustum", object.name);
                continue;
            };

            let tolerance = if options.adaptive_tolerance {
                options.surface_error * nearest_depth.max(camera.near) / camera.focal_length(1)
            } else {
                options.surface_error
            };

            let material = object.volume.as_ref().map(|volume| {
                materials.push(ObjectMaterialInfo {
                    material: volume.clone(),
                    to_local: local_to_view.inverse(),
                });
                (materials.len() - 1) as u32
            });

            jobs.push(ObjectJob {
                object,
                tolerance,
                material,
                nearest_depth,
            });
        }

        jobs.sort_by_key(|job| OrderedFloat(job.nearest_depth));
        (jobs, materials)
    }

    // Averages the opaque front colors rasterized so far into a progress image
    fn preview(&self, buffer: &FragmentBuffer, samples: usize) -> RenderedImage {
        let camera = self.camera;
        let colors = buffer.front_opaque_colors();
        let weight = 1.0 / (samples * samples) as f32;
        let mut image = RenderedImage::new(camera.width, camera.height, false);
        for y in 0..camera.height {
            for x in 0..camera.width {
                let mut color = Vec3::ZERO;
                let mut coverage = 0.0;
                for sy in y * samples..(y + 1) * samples {
                    for sx in x * samples..(x + 1) * samples {
                        if let Some(front) = colors[sy * buffer.width() + sx] {
                            color += front;
                            coverage += weight;
                        }
                    }
                }
                image.argb[y * camera.width + x] = argb_pack(color * weight, coverage);
            }
        }
        image
    }
}

// Depth of the nearest bounding box corner, or None when the box is entirely
// outside one of the frustum planes
fn visible_depth(object: &SceneObject, local_to_view: &Mat4, camera: &RenderCamera) -> Option<f32> {
    let corners = object
        .geometry
        .bounds()
        .corners()
        .map(|corner| local_to_view.transform_point3(corner));
    let outside = camera.view_clip_planes.iter().any(|plane| {
        corners
            .iter()
            .all(|corner| plane.dot(corner.extend(1.0)) < 0.0)
    });
    if outside {
        return None;
    }
    corners.iter().map(|corner| corner.z).reduce(f32::min)
}

struct ActiveRender {
    scene: Arc<Scene>,
    handle: JoinHandle<()>,
}

/// Host facing renderer: owns the options and at most one background render
pub struct Renderer {
    options: RenderOptions,
    generation: Arc<AtomicU64>,
    active: Option<ActiveRender>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn get_option(&self, option: RenderOption) -> OptionValue {
        self.options.get(option)
    }

    /// Changes take effect with the next render
    pub fn set_option(&mut self, option: RenderOption, value: OptionValue) -> Result<()> {
        self.options.set(option, value)
    }

    /// Starts rendering `scene` on a background thread, canceling any render
    /// still running. Results arrive through `listener`.
    pub fn render_scene(
        &mut self,
        scene: Arc<Scene>,
        camera: RenderCamera,
        listener: Arc<dyn RenderListener>,
    ) -> Result<()> {
        self.cancel_active();

        let cancel = CancelToken::new(&self.generation);
        let options = self.options.clone();
        let thread_scene = scene.clone();
        let handle = thread::Builder::new()
            .name("swscan-render".to_string())
            .spawn(move || {
                let job = RenderJob {
                    scene: &thread_scene,
                    camera: &camera,
                    options: &options,
                    listener: listener.as_ref(),
                    cancel,
                };
                match job.run() {
                    Ok(Some(image)) => listener.image_complete(image),
                    Ok(None) => {
                        info!("Rendering canceled");
                        listener.rendering_canceled();
                    }
                    Err(err) => {
                        error!("Rendering failed: {err}");
                        listener.rendering_canceled();
                    }
                }
            })?;

        self.active = Some(ActiveRender { scene, handle });
        Ok(())
    }

    /// Cancels the running render if it belongs to `scene` and waits for it
    pub fn cancel_rendering(&mut self, scene: &Arc<Scene>) {
        let belongs = self
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(&active.scene, scene));
        if belongs {
            self.cancel_active();
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Blocks until the running render, if any, has finished
    pub fn wait(&mut self) {
        if let Some(active) = self.active.take() {
            if active.handle.join().is_err() {
                warn!("Render thread panicked");
            }
        }
    }

    /// Renders on the calling thread
    pub fn render_immediate(&self, scene: &Scene, camera: &RenderCamera) -> Result<RenderedImage> {
        let job = RenderJob {
            scene,
            camera,
            options: &self.options,
            listener: &SilentListener,
            cancel: CancelToken::never(),
        };
        let image = job.run()?;
        Ok(image.unwrap_or_else(|| {
            RenderedImage::new(camera.width, camera.height, self.options.high_dynamic_range)
        }))
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            if active.handle.join().is_err() {
                warn!("Render thread panicked");
            }
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cancel_active();
    }
}
