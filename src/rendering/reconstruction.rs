/// Reconstruction filter: combined subsamples to output pixels.
///
/// Two algorithms share one accumulator:
/// 1. Non-separable: every tap pixel, every subsample, tested against the
///    rectangular support with its real position. Used for small filters.
/// 2. Separable: a horizontal pass per data row and sub-row, then a vertical
///    pass over those partial sums. Used when both widths exceed the threshold.
///
/// Values are normalised by the weight of every in-support subsample, hit or
/// not, so partially covered pixels come out premultiplied by coverage.
/// Depth is normalised over the hits alone. Filtering only reads the pool.
use glam::Vec2;
use rayon::prelude::*;

use super::channel_buffer::{
    ChannelBuffer, CHANNEL_A, CHANNEL_AOV_START, CHANNEL_B, CHANNEL_COVERAGE, CHANNEL_G, CHANNEL_OB,
    CHANNEL_OG, CHANNEL_OR, CHANNEL_R, CHANNEL_Z,
};
use super::filter::FilterTable;
use super::geometry::Rect;
use super::options::RenderOptions;
use super::sample_store::{Color, HitRecord, NO_SAMPLE_DEPTH};
use super::subsample::SamplePool;

/// Per-pixel shading hook run after filtering and exposure.
pub trait Imager: Send + Sync {
    /// Overwrite the filtered color and opacity of absolute pixel `(x, y)`.
    fn shade(&self, x: i32, y: i32, color: &mut Color, opacity: &mut Color);
}

/// `color = (color * gain) ^ (1 / gamma)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exposure {
    pub gain: f32,
    pub gamma: f32,
}

impl Default for Exposure {
    fn default() -> Self {
        Self {
            gain: 1.0,
            gamma: 1.0,
        }
    }
}

impl Exposure {
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.gain == 1.0 && self.gamma == 1.0
    }

    #[inline]
    pub fn apply(&self, color: Color) -> Color {
        let scaled = color * self.gain;
        if self.gamma == 1.0 {
            scaled
        } else {
            scaled.max(Color::ZERO).powf(1.0 / self.gamma)
        }
    }
}

/// Number of filtered floats per hit ahead of the AOVs: color and opacity.
const COLOR_VALUES: usize = 6;

/// Running sums for one output pixel (or one horizontal partial).
#[derive(Debug, Clone)]
struct PixelAccum {
    /// Weighted color, opacity, AOVs.
    values: Vec<f32>,
    /// Unweighted counterparts, used when the weights cancel out.
    plain: Vec<f32>,
    weight: f32,
    depth: f32,
    depth_weight: f32,
    plain_depth: f32,
    depth_hits: u32,
    hits: u32,
    in_support: u32,
}

impl PixelAccum {
    fn new(aov_width: usize) -> Self {
        Self {
            values: vec![0.0; COLOR_VALUES + aov_width],
            plain: vec![0.0; COLOR_VALUES + aov_width],
            weight: 0.0,
            depth: 0.0,
            depth_weight: 0.0,
            plain_depth: 0.0,
            depth_hits: 0,
            hits: 0,
            in_support: 0,
        }
    }

    fn reset(&mut self) {
        self.values.fill(0.0);
        self.plain.fill(0.0);
        self.weight = 0.0;
        self.depth = 0.0;
        self.depth_weight = 0.0;
        self.plain_depth = 0.0;
        self.depth_hits = 0;
        self.hits = 0;
        self.in_support = 0;
    }

    #[inline]
    fn add(&mut self, w: f32, hit: Option<&HitRecord>) {
        self.in_support += 1;
        self.weight += w;
        let Some(hit) = hit else {
            return;
        };
        self.hits += 1;
        let color = hit.color.to_array();
        let opacity = hit.opacity.to_array();
        for k in 0..3 {
            self.values[k] += w * color[k];
            self.values[3 + k] += w * opacity[k];
            self.plain[k] += color[k];
            self.plain[3 + k] += opacity[k];
        }
        let aovs = self.values.len() - COLOR_VALUES;
        for (k, &v) in hit.aov.iter().take(aovs).enumerate() {
            self.values[COLOR_VALUES + k] += w * v;
            self.plain[COLOR_VALUES + k] += v;
        }
        if hit.depth.is_finite() {
            self.depth += w * hit.depth;
            self.depth_weight += w;
            self.plain_depth += hit.depth;
            self.depth_hits += 1;
        }
    }

    /// Fold in a horizontal partial scaled by its vertical weight.
    fn merge_scaled(&mut self, other: &PixelAccum, wy: f32) {
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += wy * b;
        }
        for (a, b) in self.plain.iter_mut().zip(&other.plain) {
            *a += b;
        }
        self.weight += wy * other.weight;
        self.depth += wy * other.depth;
        self.depth_weight += wy * other.depth_weight;
        self.plain_depth += other.plain_depth;
        self.depth_hits += other.depth_hits;
        self.hits += other.hits;
        self.in_support += other.in_support;
    }

    /// Write the finished pixel. `px` is one channel-buffer record.
    fn resolve(&self, px: &mut [f32], exposure: &Exposure) {
        if self.hits == 0 {
            px.fill(0.0);
            px[CHANNEL_Z] = NO_SAMPLE_DEPTH;
            return;
        }
        let (sums, norm) = if self.weight != 0.0 {
            (&self.values, 1.0 / self.weight)
        } else {
            (&self.plain, 1.0 / self.in_support.max(1) as f32)
        };
        let depth = if self.depth_weight != 0.0 {
            self.depth / self.depth_weight
        } else if self.depth_hits > 0 {
            self.plain_depth / self.depth_hits as f32
        } else {
            NO_SAMPLE_DEPTH
        };
        let coverage = (self.hits as f32 / self.in_support.max(1) as f32).min(1.0);

        let mut color = Color::new(sums[0], sums[1], sums[2]) * norm;
        if !exposure.is_identity() {
            color = exposure.apply(color);
        }
        let opacity = Color::new(sums[3], sums[4], sums[5]) * norm;

        px[CHANNEL_R] = color.x;
        px[CHANNEL_G] = color.y;
        px[CHANNEL_B] = color.z;
        px[CHANNEL_OR] = opacity.x;
        px[CHANNEL_OG] = opacity.y;
        px[CHANNEL_OB] = opacity.z;
        px[CHANNEL_A] = (opacity.x + opacity.y + opacity.z) / 3.0 * coverage;
        px[CHANNEL_Z] = depth;
        px[CHANNEL_COVERAGE] = coverage;
        for (dst, &src) in px[CHANNEL_AOV_START..].iter_mut().zip(&sums[COLOR_VALUES..]) {
            *dst = src * norm;
        }
    }
}

pub struct Reconstruction {
    table: FilterTable,
    separable: bool,
    samples_x: usize,
    samples_y: usize,
    exposure: Exposure,
    aov_width: usize,
}

impl Reconstruction {
    pub fn new(options: &RenderOptions) -> Self {
        let (fw, fh) = options.filter_width;
        Self {
            table: FilterTable::new(options.filter, options.filter_width, options.pixel_samples),
            separable: fw > options.separable_threshold && fh > options.separable_threshold,
            samples_x: options.pixel_samples.0 as usize,
            samples_y: options.pixel_samples.1 as usize,
            exposure: Exposure {
                gain: options.exposure_gain,
                gamma: options.exposure_gamma,
            },
            aov_width: options.aov_width(),
        }
    }

    #[inline]
    pub fn table(&self) -> &FilterTable {
        &self.table
    }

    #[inline]
    pub fn is_separable(&self) -> bool {
        self.separable
    }

    /// Filter the pool into `out` over `out.rect()`. Only pool pixels inside
    /// `filter_area` contribute.
    pub fn filter(
        &self,
        pool: &SamplePool,
        filter_area: Rect,
        imager: Option<&dyn Imager>,
        out: &mut ChannelBuffer,
    ) {
        let rect = out.rect();
        if rect.is_empty() {
            return;
        }
        if !pool.has_hits() {
            out.clear();
        } else if self.separable {
            self.filter_separable(pool, filter_area, out);
        } else {
            self.filter_direct(pool, filter_area, out);
        }
        if let Some(imager) = imager {
            apply_imager(imager, out);
        }
    }

    fn filter_direct(&self, pool: &SamplePool, filter_area: Rect, out: &mut ChannelBuffer) {
        let rect = out.rect();
        let stride = out.stride();
        let row_len = rect.width() as usize * stride;
        let (xmax, ymax) = self.table.radius();
        let half = self.table.half_support();

        out.data_mut().par_chunks_mut(row_len).enumerate().for_each_init(
            || PixelAccum::new(self.aov_width),
            |acc, (row, line)| {
                let y = rect.ymin + row as i32;
                for (col, px) in line.chunks_exact_mut(stride).enumerate() {
                    let x = rect.xmin + col as i32;
                    let centre = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                    acc.reset();
                    for fy in -ymax..=ymax {
                        for fx in -xmax..=xmax {
                            let (tx, ty) = (x + fx, y + fy);
                            if !filter_area.contains(tx, ty) {
                                continue;
                            }
                            for (i, s) in pool.pixel(tx, ty).samples().iter().enumerate() {
                                let d = s.position - centre;
                                if d.x.abs() > half.x || d.y.abs() > half.y {
                                    continue;
                                }
                                acc.add(self.table.weight(fx, fy, i), s.hits.visible());
                            }
                        }
                    }
                    acc.resolve(px, &self.exposure);
                }
            },
        );
    }

    fn filter_separable(&self, pool: &SamplePool, filter_area: Rect, out: &mut ChannelBuffer) {
        let rect = out.rect();
        let stride = out.stride();
        let width = rect.width() as usize;
        let (xmax, ymax) = self.table.radius();
        let half = self.table.half_support();
        let (xs, ys) = (self.samples_x, self.samples_y);

        // Horizontal pass: one partial per (data row, sub-row, output column).
        let row_lo = (rect.ymin - ymax).max(filter_area.ymin);
        let row_hi = (rect.ymax + ymax).min(filter_area.ymax);
        let partials: Vec<Vec<PixelAccum>> = (row_lo..row_hi)
            .into_par_iter()
            .map(|ty| {
                let mut line = Vec::with_capacity(ys * width);
                for sy in 0..ys {
                    for x in rect.xmin..rect.xmax {
                        let centre_x = x as f32 + 0.5;
                        let mut acc = PixelAccum::new(self.aov_width);
                        for fx in -xmax..=xmax {
                            let tx = x + fx;
                            if !filter_area.contains(tx, ty) {
                                continue;
                            }
                            let samples = pool.pixel(tx, ty).samples();
                            for sx in 0..xs {
                                let s = &samples[sy * xs + sx];
                                if (s.position.x - centre_x).abs() > half.x {
                                    continue;
                                }
                                acc.add(self.table.weight_x(fx, sx), s.hits.visible());
                            }
                        }
                        line.push(acc);
                    }
                }
                line
            })
            .collect();

        // Vertical pass.
        out.data_mut().par_chunks_mut(width * stride).enumerate().for_each_init(
            || PixelAccum::new(self.aov_width),
            |acc, (row, line)| {
                let y = rect.ymin + row as i32;
                let centre_y = y as f32 + 0.5;
                for (col, px) in line.chunks_exact_mut(stride).enumerate() {
                    acc.reset();
                    for fy in -ymax..=ymax {
                        let ty = y + fy;
                        if ty < row_lo || ty >= row_hi {
                            continue;
                        }
                        let partial_row = &partials[(ty - row_lo) as usize];
                        for sy in 0..ys {
                            let sub_y = ty as f32 + (sy as f32 + 0.5) / ys as f32;
                            if (sub_y - centre_y).abs() > half.y {
                                continue;
                            }
                            acc.merge_scaled(&partial_row[sy * width + col], self.table.weight_y(fy, sy));
                        }
                    }
                    acc.resolve(px, &self.exposure);
                }
            },
        );
    }
}

fn apply_imager(imager: &dyn Imager, out: &mut ChannelBuffer) {
    let rect = out.rect();
    let stride = out.stride();
    let row_len = rect.width() as usize * stride;
    out.data_mut().par_chunks_mut(row_len).enumerate().for_each(|(row, line)| {
        let y = rect.ymin + row as i32;
        for (col, px) in line.chunks_exact_mut(stride).enumerate() {
            let mut color = Color::new(px[CHANNEL_R], px[CHANNEL_G], px[CHANNEL_B]);
            let mut opacity = Color::new(px[CHANNEL_OR], px[CHANNEL_OG], px[CHANNEL_OB]);
            imager.shade(rect.xmin + col as i32, y, &mut color, &mut opacity);
            px[CHANNEL_R] = color.x;
            px[CHANNEL_G] = color.y;
            px[CHANNEL_B] = color.z;
            px[CHANNEL_OR] = opacity.x;
            px[CHANNEL_OG] = opacity.y;
            px[CHANNEL_OB] = opacity.z;
            px[CHANNEL_A] = (opacity.x + opacity.y + opacity.z) / 3.0;
        }
    });
}
