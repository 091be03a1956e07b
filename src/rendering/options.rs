/// Frame options consumed read-only by the hider.
///
/// Everything the region manager, rasterizer and reconstruction filter need
/// to know about the frame lives here. Options are validated once, before
/// any region is laid out, and never change during the frame.
use glam::{Vec2, Vec3};

use super::error::ConfigError;
use super::filter::FilterKind;
use super::geometry::Rect;
use super::region_grid::ScanOrder;
use super::sample_store::DepthFilter;

/// Upper bound on subsamples per pixel axis. Subsample indices are stored as `u16`.
pub const MAX_PIXEL_SAMPLES: u32 = 64;

/// An extra output variable written alongside color, opacity and depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AovChannel {
    pub name: String,
    /// Number of float components (1 for scalars, 3 for colors).
    pub width: u32,
}

impl AovChannel {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// Thin-lens defocus expressed directly in raster units.
///
/// The circle of confusion for depth `z` is
/// `coc_scale * |1/z - 1/focal_distance|` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthOfField {
    pub coc_scale: Vec2,
    pub focal_distance: f32,
}

impl DepthOfField {
    /// Build from camera terms: f-stop, focal length, focal distance, and the
    /// raster scale (pixels per camera-space unit at unit depth).
    pub fn from_lens(fstop: f32, focal_length: f32, focal_distance: f32, raster_scale: Vec2) -> Self {
        let lens_radius = 0.5 * focal_length / fstop;
        let multiplier = lens_radius * focal_distance / (focal_distance - focal_length).max(f32::EPSILON);
        Self {
            coc_scale: raster_scale * multiplier * focal_length,
            focal_distance,
        }
    }

    #[inline]
    pub fn circle_of_confusion(&self, depth: f32) -> Vec2 {
        let d = depth.max(f32::EPSILON);
        self.coc_scale * (1.0 / d - 1.0 / self.focal_distance).abs()
    }

    /// Smallest and largest circle of confusion over `[zmin, zmax]`.
    pub fn coc_range(&self, zmin: f32, zmax: f32) -> (Vec2, Vec2) {
        let a = self.circle_of_confusion(zmin);
        let b = self.circle_of_confusion(zmax);
        let hi = a.max(b);
        if zmin <= self.focal_distance && self.focal_distance <= zmax {
            (Vec2::ZERO, hi)
        } else {
            (a.min(b), hi)
        }
    }
}

/// Read-only frame configuration.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    /// Region ("bucket") size in pixels.
    pub region_width: u32,
    pub region_height: u32,
    /// Subsamples per pixel along x and y.
    pub pixel_samples: (u32, u32),
    pub filter: FilterKind,
    pub filter_width: (f32, f32),
    /// Both filter widths must exceed this to switch to the separable two-pass filter.
    pub separable_threshold: f32,
    /// Normalized crop window `[xmin, xmax, ymin, ymax]`.
    pub crop_window: [f32; 4],
    /// Near and far clipping depths.
    pub clipping: (f32, f32),
    /// Shutter open and close times. Equal values disable motion blur.
    pub shutter: (f32, f32),
    pub exposure_gain: f32,
    pub exposure_gamma: f32,
    /// Splits allowed for a surface straddling the eye plane before it is discarded.
    pub eye_split_limit: u32,
    pub depth_filter: DepthFilter,
    /// Per-channel opacity a hit needs to count as opaque for depth output.
    pub z_threshold: Vec3,
    /// Depth-only (shadow map) output: every hit is kept for depth filtering.
    pub depth_only: bool,
    pub scan_order: ScanOrder,
    pub depth_of_field: Option<DepthOfField>,
    pub aovs: Vec<AovChannel>,
    /// Seed for subsample jitter. Combined with absolute pixel coordinates.
    pub seed: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            region_width: 16,
            region_height: 16,
            pixel_samples: (2, 2),
            filter: FilterKind::Gaussian,
            filter_width: (2.0, 2.0),
            separable_threshold: 16.0,
            crop_window: [0.0, 1.0, 0.0, 1.0],
            clipping: (f32::EPSILON, f32::MAX),
            shutter: (0.0, 0.0),
            exposure_gain: 1.0,
            exposure_gamma: 1.0,
            eye_split_limit: 10,
            depth_filter: DepthFilter::Min,
            z_threshold: Vec3::ONE,
            depth_only: false,
            scan_order: ScanOrder::Horizontal,
            depth_of_field: None,
            aovs: Vec::new(),
            seed: 0,
        }
    }
}

impl RenderOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Check every option for values the hider cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroResolution {
                width: self.width,
                height: self.height,
            });
        }
        if self.region_width == 0 || self.region_height == 0 {
            return Err(ConfigError::InvalidRegionSize {
                width: self.region_width,
                height: self.region_height,
            });
        }
        let (sx, sy) = self.pixel_samples;
        if sx == 0 || sy == 0 || sx > MAX_PIXEL_SAMPLES || sy > MAX_PIXEL_SAMPLES {
            return Err(ConfigError::InvalidSampleCount { x: sx, y: sy });
        }
        let (fx, fy) = self.filter_width;
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            return Err(ConfigError::InvalidFilterWidth { x: fx, y: fy });
        }
        let mut names: Vec<&str> = Vec::with_capacity(self.aovs.len());
        for aov in &self.aovs {
            if aov.width == 0 {
                return Err(ConfigError::ZeroChannels(aov.name.clone()));
            }
            if aov.name.is_empty() || names.contains(&aov.name.as_str()) {
                return Err(ConfigError::DuplicateChannel(aov.name.clone()));
            }
            names.push(&aov.name);
        }
        if self.crop_rect().is_empty() {
            let [x0, x1, y0, y1] = self.crop_window;
            return Err(ConfigError::EmptyCropWindow(x0, x1, y0, y1));
        }
        let (open, close) = self.shutter;
        if !(open.is_finite() && close.is_finite()) || close < open {
            return Err(ConfigError::InvalidShutter { open, close });
        }
        let (near, far) = self.clipping;
        if !(near > 0.0 && far > near) {
            return Err(ConfigError::InvalidClipping { near, far });
        }
        if !(self.exposure_gain > 0.0 && self.exposure_gamma > 0.0) {
            return Err(ConfigError::InvalidExposure {
                gain: self.exposure_gain,
                gamma: self.exposure_gamma,
            });
        }
        if let Some(dof) = &self.depth_of_field {
            if !(dof.focal_distance > 0.0 && dof.focal_distance.is_finite()) {
                return Err(ConfigError::InvalidFocalDistance(dof.focal_distance));
            }
        }
        Ok(())
    }

    /// Crop window in pixels, rounded the same way on both edges so adjacent
    /// crop windows tile without gaps.
    pub fn crop_rect(&self) -> Rect {
        let [x0, x1, y0, y1] = self.crop_window;
        let w = self.width as f32;
        let h = self.height as f32;
        let clamp_x = |v: f32| ((w * v.clamp(0.0, 1.0)).ceil() as i32).clamp(0, self.width as i32);
        let clamp_y = |v: f32| ((h * v.clamp(0.0, 1.0)).ceil() as i32).clamp(0, self.height as i32);
        Rect::new(clamp_x(x0), clamp_y(y0), clamp_x(x1), clamp_y(y1))
    }

    /// Discrete filter overlap in whole pixels on each side of a region.
    #[inline]
    pub fn filter_shift(&self) -> (i32, i32) {
        (
            (self.filter_width.0 * 0.5).floor() as i32,
            (self.filter_width.1 * 0.5).floor() as i32,
        )
    }

    #[inline]
    pub fn samples_per_pixel(&self) -> usize {
        (self.pixel_samples.0 * self.pixel_samples.1) as usize
    }

    #[inline]
    pub fn has_motion_blur(&self) -> bool {
        self.shutter.1 > self.shutter.0
    }

    #[inline]
    pub fn exposure_enabled(&self) -> bool {
        self.exposure_gain != 1.0 || self.exposure_gamma != 1.0
    }

    /// Total float components across all extra output channels.
    pub fn aov_width(&self) -> usize {
        self.aovs.iter().map(|a| a.width as usize).sum()
    }

    /// Number of time sub-bounds a moving micropolygon is split into.
    #[inline]
    pub fn time_ranges(&self) -> usize {
        self.samples_per_pixel().max(4)
    }
}
