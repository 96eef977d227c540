//! Renderer configuration

use crate::error::{RenderError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShadingMode {
    /// Lighting evaluated per vertex and interpolated (Gouraud)
    Flat,
    /// Per-pixel normals and diffuse lighting, specular terms only where present
    Hybrid,
    /// Full per-pixel lighting with bump mapping
    Phong,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Supersampling {
    None,
    /// N×N coverage samples per pixel, shading computed once per N samples
    Edges(u32),
    /// N×N fully shaded samples per pixel
    Full(u32),
}

impl Supersampling {
    /// Subsamples per pixel along one axis
    pub fn samples(&self) -> usize {
        match *self {
            Supersampling::None => 1,
            Supersampling::Edges(n) | Supersampling::Full(n) => n.max(1) as usize,
        }
    }

    /// Distance in subsamples between two shading evaluations along a row
    pub fn shading_stride(&self) -> usize {
        match *self {
            Supersampling::Edges(n) => n.max(1) as usize,
            Supersampling::None | Supersampling::Full(_) => 1,
        }
    }
}

/// The enumerated option set exposed to the host application
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderOption {
    SurfaceError,
    Shading,
    Supersampling,
    TextureSmoothing,
    AdaptiveTolerance,
    BackfaceCulling,
    TransparentBackground,
    HighDynamicRange,
    Threads,
}

impl RenderOption {
    pub const ALL: [RenderOption; 9] = [
        RenderOption::SurfaceError,
        RenderOption::Shading,
        RenderOption::Supersampling,
        RenderOption::TextureSmoothing,
        RenderOption::AdaptiveTolerance,
        RenderOption::BackfaceCulling,
        RenderOption::TransparentBackground,
        RenderOption::HighDynamicRange,
        RenderOption::Threads,
    ];
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OptionValue {
    Float(f32),
    Bool(bool),
    Count(usize),
    Shading(ShadingMode),
    Supersampling(Supersampling),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Maximum geometric error, in world units (or pixels with adaptive tolerance)
    pub surface_error: f32,
    pub shading: ShadingMode,
    pub supersampling: Supersampling,
    pub texture_smoothing: f32,
    pub adaptive_tolerance: bool,
    pub backface_culling: bool,
    pub transparent_background: bool,
    pub high_dynamic_range: bool,
    /// Worker threads, 0 lets the pool pick one per core
    pub threads: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            surface_error: 0.02,
            shading: ShadingMode::Hybrid,
            supersampling: Supersampling::None,
            texture_smoothing: 1.0,
            adaptive_tolerance: false,
            backface_culling: true,
            transparent_background: false,
            high_dynamic_range: false,
            threads: 0,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface_error(mut self, tolerance: f32) -> Self {
        self.surface_error = tolerance;
        self
    }

    pub fn shading(mut self, shading: ShadingMode) -> Self {
        self.shading = shading;
        self
    }

    pub fn supersampling(mut self, supersampling: Supersampling) -> Self {
        self.supersampling = supersampling;
        self
    }

    pub fn texture_smoothing(mut self, scale: f32) -> Self {
        self.texture_smoothing = scale;
        self
    }

    pub fn adaptive_tolerance(mut self, enable: bool) -> Self {
        self.adaptive_tolerance = enable;
        self
    }

    pub fn backface_culling(mut self, enable: bool) -> Self {
        self.backface_culling = enable;
        self
    }

    pub fn transparent_background(mut self, enable: bool) -> Self {
        self.transparent_background = enable;
        self
    }

    pub fn high_dynamic_range(mut self, enable: bool) -> Self {
        self.high_dynamic_range = enable;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn get(&self, option: RenderOption) -> OptionValue {
        match option {
            RenderOption::SurfaceError => OptionValue::Float(self.surface_error),
            RenderOption::Shading => OptionValue::Shading(self.shading),
            RenderOption::Supersampling => OptionValue::Supersampling(self.supersampling),
            RenderOption::TextureSmoothing => OptionValue::Float(self.texture_smoothing),
            RenderOption::AdaptiveTolerance => OptionValue::Bool(self.adaptive_tolerance),
            RenderOption::BackfaceCulling => OptionValue::Bool(self.backface_culling),
            RenderOption::TransparentBackground => OptionValue::Bool(self.transparent_background),
            RenderOption::HighDynamicRange => OptionValue::Bool(self.high_dynamic_range),
            RenderOption::Threads => OptionValue::Count(self.threads),
        }
    }

    /// Sets one option, rejecting values the rasterizer cannot work with
    pub fn set(&mut self, option: RenderOption, value: OptionValue) -> Result<()> {
        let invalid = |reason: &str| RenderError::InvalidOption {
            option,
            reason: reason.to_string(),
        };
        let mismatch = |expected: &'static str| RenderError::OptionType { option, expected };

        match (option, value) {
            (RenderOption::SurfaceError, OptionValue::Float(tolerance)) => {
                if !(tolerance > 0.0 && tolerance.is_finite()) {
                    return Err(invalid("tolerance must be a positive number"));
                }
                self.surface_error = tolerance;
            }
            (RenderOption::SurfaceError, _) => return Err(mismatch("float")),
            (RenderOption::Shading, OptionValue::Shading(shading)) => self.shading = shading,
            (RenderOption::Shading, _) => return Err(mismatch("shading mode")),
            (RenderOption::Supersampling, OptionValue::Supersampling(supersampling)) => {
                if let Supersampling::Edges(n) | Supersampling::Full(n) = supersampling {
                    if !(1..=16).contains(&n) {
                        return Err(invalid("subsamples per axis must be between 1 and 16"));
                    }
                }
                self.supersampling = supersampling;
            }
            (RenderOption::Supersampling, _) => return Err(mismatch("supersampling")),
            (RenderOption::TextureSmoothing, OptionValue::Float(scale)) => {
                if !(scale >= 0.0 && scale.is_finite()) {
                    return Err(invalid("smoothing must be zero or positive"));
                }
                self.texture_smoothing = scale;
            }
            (RenderOption::TextureSmoothing, _) => return Err(mismatch("float")),
            (RenderOption::AdaptiveTolerance, OptionValue::Bool(enable)) => {
                self.adaptive_tolerance = enable
            }
            (RenderOption::BackfaceCulling, OptionValue::Bool(enable)) => {
                self.backface_culling = enable
            }
            (RenderOption::TransparentBackground, OptionValue::Bool(enable)) => {
                self.transparent_background = enable
            }
            (RenderOption::HighDynamicRange, OptionValue::Bool(enable)) => {
                self.high_dynamic_range = enable
            }
            (
                RenderOption::AdaptiveTolerance
                | RenderOption::BackfaceCulling
                | RenderOption::TransparentBackground
                | RenderOption::HighDynamicRange,
                _,
            ) => return Err(mismatch("bool")),
            (RenderOption::Threads, OptionValue::Count(threads)) => self.threads = threads,
            (RenderOption::Threads, _) => return Err(mismatch("count")),
        }
        Ok(())
    }
}
