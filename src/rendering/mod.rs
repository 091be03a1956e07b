/// Bucket hider: regions of stochastic subsamples, occlusion culling,
/// micropolygon sampling and reconstruction filtering
pub mod channel_buffer;
pub mod display;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod micropolygon;
pub mod occlusion;
pub mod options;
pub mod rasterizer;
pub mod reconstruction;
pub mod region;
pub mod region_grid;
pub mod region_processor;
pub mod renderer;
pub mod sample_store;
pub mod subsample;
pub mod surface;

pub use channel_buffer::ChannelBuffer;
pub use display::{DisplaySink, ImageAccumulator};
pub use error::{ConfigError, HiderError, HiderResult};
pub use filter::{FilterKind, FilterTable};
pub use geometry::{Bound, Rect};
pub use micropolygon::{GridInfo, Micropolygon, MicropolygonGrid};
pub use occlusion::OcclusionTree;
pub use options::{AovChannel, DepthOfField, RenderOptions};
pub use reconstruction::{Exposure, Imager, Reconstruction};
pub use region::{CacheSide, Region, RegionState};
pub use region_grid::{FrameRegions, ScanOrder};
pub use region_processor::{RegionOutcome, RegionProcessor};
pub use renderer::{FrameReport, Renderer, StopFlag};
pub use sample_store::{Color, CsgEvaluator, CsgTag, DepthFilter, HitRecord, SampleHits};
pub use subsample::{PixelSamples, SampleLayout, SamplePool, Subsample};
pub use surface::{BilinearPatch, Surface};
