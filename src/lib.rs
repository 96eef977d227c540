//! Scanline software rasterizer with depth sorted translucent fragments.
//!
//! Objects are rasterized in parallel into per-pixel fragment chains, which a
//! second pass composites with fog, volumetric materials and the background.

pub mod clip;
pub mod composite;
pub mod error;
pub mod fragbuffer;
pub mod fragment;
pub mod lighting;
pub mod math;
pub mod options;
pub mod raster;
pub mod rendercamera;
pub mod renderer;
pub mod scene;
pub mod shader;
pub mod subdivide;
pub mod util;

pub use error::{RenderError, Result};
pub use options::{OptionValue, RenderOption, RenderOptions, ShadingMode, Supersampling};
pub use rendercamera::RenderCamera;
pub use renderer::{RenderListener, RenderedImage, Renderer};
pub use scene::{
    Background, BoundingBox, DisplacedSurface, Environment, EnvironmentMap, Fog, Geometry, Light,
    LightKind, ProceduralVolume, RenderMesh, Scene, SceneObject, StaticGeometry, SurfaceQuery,
    SurfaceSpec, SurfaceTexture, UniformSurface, UniformVolume, VolumeMaterial, VolumeSpec,
};
