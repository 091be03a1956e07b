/// Reconstruction filter kernels and precomputed weight tables.
///
/// Kernels take the offset `(x, y)` from the pixel centre and the full filter
/// widths. Weights are tabulated once per frame at sub-cell centres for every
/// pixel offset within the filter footprint, so the per-pixel filter loop
/// never evaluates a kernel.
use std::f32::consts::PI;

use glam::Vec2;

use super::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Box,
    Triangle,
    Gaussian,
    CatmullRom,
    Sinc,
    Disk,
    Bessel,
    Mitchell,
}

impl FilterKind {
    pub const ALL: [FilterKind; 8] = [
        FilterKind::Box,
        FilterKind::Triangle,
        FilterKind::Gaussian,
        FilterKind::CatmullRom,
        FilterKind::Sinc,
        FilterKind::Disk,
        FilterKind::Bessel,
        FilterKind::Mitchell,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Box => "box",
            FilterKind::Triangle => "triangle",
            FilterKind::Gaussian => "gaussian",
            FilterKind::CatmullRom => "catmull-rom",
            FilterKind::Sinc => "sinc",
            FilterKind::Disk => "disk",
            FilterKind::Bessel => "bessel",
            FilterKind::Mitchell => "mitchell",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let lower = name.trim().to_ascii_lowercase();
        FilterKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == lower || (lower == "catmullrom" && *k == FilterKind::CatmullRom))
            .ok_or_else(|| ConfigError::UnknownFilter(name.to_string()))
    }

    /// Evaluate the kernel at offset `(x, y)` for a `xwidth` by `ywidth` footprint.
    pub fn evaluate(&self, x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
        match self {
            FilterKind::Box => {
                let inside_x = x.abs() <= xwidth * 0.5;
                let inside_y = y.abs() <= ywidth * 0.5;
                if inside_x && inside_y {
                    1.0
                } else {
                    0.0
                }
            }
            FilterKind::Triangle => {
                let hx = xwidth * 0.5;
                let hy = ywidth * 0.5;
                let tx = if x.abs() <= hx { (hx - x.abs()) / hx } else { 0.0 };
                let ty = if y.abs() <= hy { (hy - y.abs()) / hy } else { 0.0 };
                tx.min(ty)
            }
            FilterKind::Gaussian => {
                let x = x / xwidth;
                let y = y / ywidth;
                (-8.0 * (x * x + y * y)).exp()
            }
            FilterKind::CatmullRom => {
                let r2 = x * x + y * y;
                let r = r2.sqrt();
                if r >= 2.0 {
                    0.0
                } else if r < 1.0 {
                    3.0 * r * r2 - 5.0 * r2 + 2.0
                } else {
                    -r * r2 + 5.0 * r2 - 8.0 * r + 4.0
                }
            }
            FilterKind::Sinc => windowed_sinc(x, xwidth) * windowed_sinc(y, ywidth),
            FilterKind::Disk => {
                let hx = xwidth * 0.5;
                let hy = ywidth * 0.5;
                let d = (x * x) / (hx * hx) + (y * y) / (hy * hy);
                if d < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            FilterKind::Bessel => {
                let hx = xwidth * 0.5;
                let hy = ywidth * 0.5;
                let w = (x * x) / (hx * hx) + (y * y) / (hy * hy);
                if w >= 1.0 {
                    return 0.0;
                }
                let d = (x * x + y * y).sqrt();
                if d == 0.0 {
                    return PI;
                }
                // Half cosine window over the elliptical support.
                let window = (0.5 * PI * w.sqrt()).cos();
                window * 2.0 * libm::j1f(PI * d) / d
            }
            FilterKind::Mitchell => mitchell_1d(x / xwidth) * mitchell_1d(y / ywidth),
        }
    }
}

#[inline]
fn windowed_sinc(v: f32, width: f32) -> f32 {
    if v == 0.0 {
        return 1.0;
    }
    let v = v * PI;
    (0.5 * v / width).cos() * v.sin() / v
}

/// Mitchell-Netravali with B = C = 1/3, on `[-1, 1]` after scaling by width.
#[inline]
fn mitchell_1d(x: f32) -> f32 {
    const B: f32 = 1.0 / 3.0;
    const C: f32 = 1.0 / 3.0;
    let x = (2.0 * x).abs();
    let v = if x > 1.0 {
        (-B - 6.0 * C) * x * x * x + (6.0 * B + 30.0 * C) * x * x + (-12.0 * B - 48.0 * C) * x
            + (8.0 * B + 24.0 * C)
    } else {
        (12.0 - 9.0 * B - 6.0 * C) * x * x * x + (-18.0 + 12.0 * B + 6.0 * C) * x * x
            + (6.0 - 2.0 * B)
    };
    v * (1.0 / 6.0)
}

/// Kernel weights tabulated per (pixel offset, sub-cell).
///
/// Layout: `((fy + ymax) * stride + fx + xmax) * samples_per_pixel + sub`,
/// with `stride = 2 * xmax + 1` so every tap row is distinct.
#[derive(Debug, Clone)]
pub struct FilterTable {
    kind: FilterKind,
    width: Vec2,
    half_support: Vec2,
    xmax: i32,
    ymax: i32,
    samples_x: usize,
    samples_y: usize,
    stride: usize,
    weights: Vec<f32>,
    /// Separable 1D weights, `(fx + xmax) * samples_x + sx`.
    weights_x: Vec<f32>,
    weights_y: Vec<f32>,
}

impl FilterTable {
    pub fn new(kind: FilterKind, width: (f32, f32), samples: (u32, u32)) -> Self {
        let (fw, fh) = width;
        let xmax = (fw * 0.5).floor() as i32;
        let ymax = (fh * 0.5).floor() as i32;
        let half_support = Vec2::new(fw.ceil() * 0.5, fh.ceil() * 0.5);
        let samples_x = samples.0 as usize;
        let samples_y = samples.1 as usize;
        let spp = samples_x * samples_y;
        let stride = (2 * xmax + 1) as usize;
        let rows = (2 * ymax + 1) as usize;

        let sub_offset_x = |fx: i32, sx: usize| (sx as f32 + 0.5) / samples_x as f32 + fx as f32 - 0.5;
        let sub_offset_y = |fy: i32, sy: usize| (sy as f32 + 0.5) / samples_y as f32 + fy as f32 - 0.5;
        let support = |x: f32, y: f32| x.abs() <= half_support.x && y.abs() <= half_support.y;

        let mut weights = vec![0.0; stride * rows * spp];
        for fy in -ymax..=ymax {
            for fx in -xmax..=xmax {
                let base = (((fy + ymax) as usize) * stride + (fx + xmax) as usize) * spp;
                for sy in 0..samples_y {
                    for sx in 0..samples_x {
                        let x = sub_offset_x(fx, sx);
                        let y = sub_offset_y(fy, sy);
                        if support(x, y) {
                            weights[base + sy * samples_x + sx] = kind.evaluate(x, y, fw, fh);
                        }
                    }
                }
            }
        }

        let mut weights_x = vec![0.0; stride * samples_x];
        for fx in -xmax..=xmax {
            for sx in 0..samples_x {
                let x = sub_offset_x(fx, sx);
                if x.abs() <= half_support.x {
                    weights_x[(fx + xmax) as usize * samples_x + sx] = kind.evaluate(x, 0.0, fw, fh);
                }
            }
        }
        let mut weights_y = vec![0.0; rows * samples_y];
        for fy in -ymax..=ymax {
            for sy in 0..samples_y {
                let y = sub_offset_y(fy, sy);
                if y.abs() <= half_support.y {
                    weights_y[(fy + ymax) as usize * samples_y + sy] = kind.evaluate(0.0, y, fw, fh);
                }
            }
        }

        Self {
            kind,
            width: Vec2::new(fw, fh),
            half_support,
            xmax,
            ymax,
            samples_x,
            samples_y,
            stride,
            weights,
            weights_x,
            weights_y,
        }
    }

    #[inline]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    #[inline]
    pub fn width(&self) -> Vec2 {
        self.width
    }

    /// Half extent of the rectangular support, `ceil(width) / 2`.
    #[inline]
    pub fn half_support(&self) -> Vec2 {
        self.half_support
    }

    /// Tap radius in whole pixels.
    #[inline]
    pub fn radius(&self) -> (i32, i32) {
        (self.xmax, self.ymax)
    }

    #[inline]
    pub fn weight(&self, fx: i32, fy: i32, sub: usize) -> f32 {
        let spp = self.samples_x * self.samples_y;
        let tap = ((fy + self.ymax) as usize) * self.stride + (fx + self.xmax) as usize;
        self.weights[tap * spp + sub]
    }

    #[inline]
    pub fn weight_x(&self, fx: i32, sx: usize) -> f32 {
        self.weights_x[(fx + self.xmax) as usize * self.samples_x + sx]
    }

    #[inline]
    pub fn weight_y(&self, fy: i32, sy: usize) -> f32 {
        self.weights_y[(fy + self.ymax) as usize * self.samples_y + sy]
    }
}
