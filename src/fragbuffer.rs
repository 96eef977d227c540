//! Fragment chains of a whole (sub)image, shared between rasterizer workers

use crossbeam_utils::CachePadded;
use glam::Vec3;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::fragment::{Fragment, FragmentRow};

pub struct FragmentBuffer {
    width: usize,
    height: usize,
    // One lock per scanline, padded so neighbouring rows don't share a cache line
    rows: Vec<CachePadded<Mutex<FragmentRow>>>,
    // Nearest opaque depth per (sub)pixel as f32 bits. Depths are positive so
    // the integer order of the bits matches the float order.
    opaque_depth: Vec<AtomicU32>,
}

impl FragmentBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        let rows = (0..height)
            .map(|_| CachePadded::new(Mutex::new(FragmentRow::new(width))))
            .collect();
        let opaque_depth = (0..width * height)
            .map(|_| AtomicU32::new(f32::INFINITY.to_bits()))
            .collect();
        Self {
            width,
            height,
            rows,
            opaque_depth,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Depth of the nearest opaque fragment merged so far. This is only a hint
    /// and may lag behind a merge running on another thread.
    #[inline]
    pub fn opaque_depth(&self, x: usize, y: usize) -> f32 {
        f32::from_bits(self.opaque_depth[y * self.width + x].load(Ordering::Relaxed))
    }

    /// Inserts a rasterized span into row `y`, starting at column `x_start`.
    /// Returns the number of fragments which were not hidden.
    pub fn merge_span(&self, y: usize, x_start: usize, span: &[Option<Fragment>]) -> usize {
        let mut row = self.rows[y].lock().unwrap_or_else(PoisonError::into_inner);
        let mut merged = 0;
        for (x, fragment) in (x_start..).zip(span) {
            let Some(fragment) = fragment else {
                continue;
            };
            if !row.insert(x, *fragment) {
                continue;
            }
            merged += 1;
            if fragment.is_opaque() {
                let depth = fragment.depth.max(0.0).to_bits();
                self.opaque_depth[y * self.width + x].fetch_min(depth, Ordering::Relaxed);
            }
        }
        merged
    }

    /// Color of the front fragment of every (sub)pixel where it is opaque,
    /// used for progress images while rasterization is still running
    pub fn front_opaque_colors(&self) -> Vec<Option<Vec3>> {
        let mut colors = Vec::with_capacity(self.width * self.height);
        for row in &self.rows {
            let row = row.lock().unwrap_or_else(PoisonError::into_inner);
            colors.extend((0..self.width).map(|x| {
                row.front(x)
                    .filter(|fragment| fragment.is_opaque())
                    .map(|fragment| fragment.additive.to_vec3())
            }));
        }
        colors
    }

    /// Gives up the locks once all workers are done
    pub fn into_rows(self) -> Vec<FragmentRow> {
        self.rows
            .into_iter()
            .map(|row| {
                CachePadded::into_inner(row)
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
            })
            .collect()
    }
}
