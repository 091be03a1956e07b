/// Output side of the hider
/// Finished regions are handed to a `DisplaySink` one at a time, in scan order.
/// `ImageAccumulator` stitches them into a full-frame channel buffer
use std::io::Write;

use super::channel_buffer::{ChannelBuffer, CHANNEL_B, CHANNEL_G, CHANNEL_R};
use super::error::{HiderError, HiderResult};
use super::geometry::Rect;
use super::options::RenderOptions;

pub trait DisplaySink {
    /// Receive the filtered display area `rect` of one region.
    fn write_region(&mut self, rect: Rect, buffer: &ChannelBuffer) -> HiderResult<()>;
}

/// In-memory frame assembled from region buffers.
pub struct ImageAccumulator {
    image: ChannelBuffer,
    regions_written: usize,
}

impl ImageAccumulator {
    pub fn new(options: &RenderOptions) -> Self {
        let rect = Rect::new(0, 0, options.width as i32, options.height as i32);
        Self {
            image: ChannelBuffer::new(rect, &options.aovs),
            regions_written: 0,
        }
    }

    #[inline]
    pub fn image(&self) -> &ChannelBuffer {
        &self.image
    }

    #[inline]
    pub fn regions_written(&self) -> usize {
        self.regions_written
    }

    /// Color channels clamped to `[0, 1]` and quantized, row-major RGB.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let stride = self.image.stride();
        let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        let mut out = Vec::with_capacity(self.image.width() * self.image.height() * 3);
        for px in self.image.data().chunks_exact(stride) {
            out.push(quantize(px[CHANNEL_R]));
            out.push(quantize(px[CHANNEL_G]));
            out.push(quantize(px[CHANNEL_B]));
        }
        out
    }

    /// Binary PPM (P6) of the color channels.
    pub fn write_ppm<W: Write>(&self, mut out: W) -> HiderResult<()> {
        write!(out, "P6\n{} {}\n255\n", self.image.width(), self.image.height())?;
        out.write_all(&self.to_rgb8())?;
        out.flush()?;
        Ok(())
    }
}

impl DisplaySink for ImageAccumulator {
    fn write_region(&mut self, rect: Rect, buffer: &ChannelBuffer) -> HiderResult<()> {
        if buffer.stride() != self.image.stride() {
            return Err(HiderError::display(format!(
                "region buffer has {} channels per pixel, image has {}",
                buffer.stride(),
                self.image.stride()
            )));
        }
        if buffer.rect() != rect || rect.intersect(&self.image.rect()) != rect {
            return Err(HiderError::display(format!(
                "region {:?} does not fit the image {:?}",
                rect,
                self.image.rect()
            )));
        }
        self.image.copy_from(buffer);
        self.regions_written += 1;
        Ok(())
    }
}
