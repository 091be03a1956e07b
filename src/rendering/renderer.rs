/// Frame driver: posts the scene, walks regions in scan order and hands each
/// finished region to the display sink
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::display::DisplaySink;
use super::error::HiderResult;
use super::options::RenderOptions;
use super::reconstruction::Imager;
use super::region_grid::FrameRegions;
use super::region_processor::{RegionOutcome, RegionProcessor};
use super::sample_store::CsgEvaluator;
use super::surface::Surface;
use crate::perf::RenderStats;
use crate::perf_scope;

/// Cooperative cancellation shared with whoever may abort the frame.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    pub stats: RenderStats,
    /// True when the stop flag ended the frame early.
    pub stopped: bool,
    pub regions_written: usize,
}

pub struct Renderer {
    options: RenderOptions,
    imager: Option<Box<dyn Imager>>,
    csg: Option<Box<dyn CsgEvaluator>>,
    stop: StopFlag,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> HiderResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            imager: None,
            csg: None,
            stop: StopFlag::new(),
        })
    }

    #[inline]
    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn with_imager(mut self, imager: Box<dyn Imager>) -> Self {
        self.imager = Some(imager);
        self
    }

    pub fn with_csg_evaluator(mut self, csg: Box<dyn CsgEvaluator>) -> Self {
        self.csg = Some(csg);
        self
    }

    /// Handle for stopping a frame in progress from another thread.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Render one frame. Regions are written to `sink` as they finish; a
    /// region interrupted by the stop flag is never written.
    pub fn render(
        &self,
        surfaces: Vec<Box<dyn Surface>>,
        sink: &mut dyn DisplaySink,
    ) -> HiderResult<FrameReport> {
        perf_scope!("frame");
        let mut frame = FrameRegions::new(&self.options);
        let mut report = FrameReport::default();

        for surface in surfaces {
            match frame.post_surface(surface) {
                Some(_) => report.stats.surfaces_posted += 1,
                None => log::debug!("surface outside every region, dropped"),
            }
        }
        log::info!(
            "rendering {}x{} in {}x{} regions, {} surfaces",
            self.options.width,
            self.options.height,
            frame.cols(),
            frame.rows(),
            report.stats.surfaces_posted
        );

        let mut processor = RegionProcessor::new(&self.options);
        let sequence = frame.scan_sequence().to_vec();
        for index in sequence {
            if self.stop.is_stopped() {
                report.stopped = true;
                break;
            }
            let outcome = processor.render_region(
                &mut frame,
                index,
                self.imager.as_deref(),
                self.csg.as_deref(),
                &self.stop,
            )?;
            report.stats += &processor.take_stats();
            match outcome {
                RegionOutcome::Rendered => {
                    sink.write_region(processor.display_area(), processor.channel_buffer())?;
                    report.regions_written += 1;
                }
                RegionOutcome::Skipped => {}
                RegionOutcome::Stopped => {
                    report.stopped = true;
                    break;
                }
            }
        }

        if report.stopped {
            log::info!("frame stopped after {} regions", report.regions_written);
        }
        report.stats.log_summary();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::display::ImageAccumulator;
    use crate::rendering::error::{ConfigError, HiderError};
    use crate::rendering::sample_store::Color;
    use crate::rendering::surface::BilinearPatch;

    #[test]
    fn test_new_rejects_invalid_options() {
        let mut opts = RenderOptions::new(8, 8);
        opts.pixel_samples = (0, 2);
        match Renderer::new(opts) {
            Err(HiderError::Config(ConfigError::InvalidSampleCount { x: 0, y: 2 })) => {}
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_render_writes_every_region() {
        let opts = RenderOptions::new(40, 20);
        let renderer = Renderer::new(opts.clone()).expect("renderer");
        let mut image = ImageAccumulator::new(&opts);
        let report = renderer
            .render(
                vec![Box::new(BilinearPatch::rect(0.0, 0.0, 40.0, 20.0, 2.0, Color::ONE))],
                &mut image,
            )
            .expect("render");
        assert!(!report.stopped);
        assert_eq!(report.regions_written, 3 * 2);
        assert_eq!(report.stats.regions_rendered, 6);
        assert_eq!(image.regions_written(), 6);
    }

    #[test]
    fn test_stopped_before_start_writes_nothing() {
        let opts = RenderOptions::new(16, 16);
        let renderer = Renderer::new(opts.clone()).expect("renderer");
        renderer.stop_flag().stop();
        let mut image = ImageAccumulator::new(&opts);
        let report = renderer.render(Vec::new(), &mut image).expect("render");
        assert!(report.stopped);
        assert_eq!(report.regions_written, 0);
        assert_eq!(image.regions_written(), 0);
    }
}
