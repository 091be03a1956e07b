/// Per-region output buffer of filtered channel values
///
/// Memory layout:
/// - One interleaved record of `stride` floats per pixel, row-major
/// - Fixed channels first (r g b or og ob a z coverage), then the AOVs in
///   declaration order
/// - Coordinates passed to accessors are absolute raster coordinates
use super::geometry::Rect;
use super::options::AovChannel;
use super::sample_store::NO_SAMPLE_DEPTH;

pub const CHANNEL_R: usize = 0;
pub const CHANNEL_G: usize = 1;
pub const CHANNEL_B: usize = 2;
pub const CHANNEL_OR: usize = 3;
pub const CHANNEL_OG: usize = 4;
pub const CHANNEL_OB: usize = 5;
pub const CHANNEL_A: usize = 6;
pub const CHANNEL_Z: usize = 7;
pub const CHANNEL_COVERAGE: usize = 8;
/// Offset of the first AOV component.
pub const CHANNEL_AOV_START: usize = 9;

const FIXED_CHANNELS: [&str; CHANNEL_AOV_START] = ["r", "g", "b", "or", "og", "ob", "a", "z", "coverage"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDesc {
    pub name: String,
    pub offset: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBuffer {
    rect: Rect,
    channels: Vec<ChannelDesc>,
    stride: usize,
    data: Vec<f32>,
}

impl ChannelBuffer {
    pub fn new(rect: Rect, aovs: &[AovChannel]) -> Self {
        let mut channels: Vec<ChannelDesc> = FIXED_CHANNELS
            .iter()
            .enumerate()
            .map(|(offset, name)| ChannelDesc {
                name: (*name).to_string(),
                offset,
                width: 1,
            })
            .collect();
        let mut offset = CHANNEL_AOV_START;
        for aov in aovs {
            channels.push(ChannelDesc {
                name: aov.name.clone(),
                offset,
                width: aov.width as usize,
            });
            offset += aov.width as usize;
        }
        let mut buffer = Self {
            rect,
            channels,
            stride: offset,
            data: Vec::new(),
        };
        buffer.resize(rect);
        buffer
    }

    /// Re-target to `rect`, keeping the allocation where possible.
    pub fn resize(&mut self, rect: Rect) {
        self.rect = rect;
        self.data.clear();
        self.data.resize(rect.area() * self.stride, 0.0);
        self.clear();
    }

    /// Zero every channel and mark depth as "no sample".
    pub fn clear(&mut self) {
        self.data.fill(0.0);
        for px in self.data.chunks_exact_mut(self.stride) {
            px[CHANNEL_Z] = NO_SAMPLE_DEPTH;
        }
    }

    #[inline]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.rect.width() as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.rect.height() as usize
    }

    /// Floats per pixel.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn channels(&self) -> &[ChannelDesc] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelDesc> {
        self.channels.iter().find(|c| c.name == name)
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        debug_assert!(self.rect.contains(x, y), "({}, {}) outside {:?}", x, y, self.rect);
        let lx = (x - self.rect.xmin) as usize;
        let ly = (y - self.rect.ymin) as usize;
        (ly * self.width() + lx) * self.stride
    }

    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> &[f32] {
        let i = self.index(x, y);
        &self.data[i..i + self.stride]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: i32, y: i32) -> &mut [f32] {
        let i = self.index(x, y);
        let stride = self.stride;
        &mut self.data[i..i + stride]
    }

    /// First component of channel `name` at `(x, y)`.
    pub fn value(&self, x: i32, y: i32, name: &str) -> Option<f32> {
        let offset = self.channel(name)?.offset;
        self.rect.contains(x, y).then(|| self.pixel(x, y)[offset])
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Raw rows for parallel writers, `width * stride` floats each.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copy the overlap of `src` into this buffer. Both must share a channel layout.
    pub fn copy_from(&mut self, src: &ChannelBuffer) {
        debug_assert_eq!(self.stride, src.stride, "channel layouts differ");
        let overlap = self.rect.intersect(&src.rect);
        if overlap.is_empty() {
            return;
        }
        let run = overlap.width() as usize * self.stride;
        for y in overlap.ymin..overlap.ymax {
            let from = src.index(overlap.xmin, y);
            let to = self.index(overlap.xmin, y);
            self.data[to..to + run].copy_from_slice(&src.data[from..from + run]);
        }
    }
}
