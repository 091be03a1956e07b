/// REYES bucket hider - stochastic micropolygon sampling over screen regions
/// Built from compartmentalized, benchmarkable stages
pub mod perf;
pub mod rendering;

pub use perf::RenderStats;
pub use rendering::{
    BilinearPatch, DisplaySink, FrameReport, HiderError, HiderResult, ImageAccumulator,
    RenderOptions, Renderer, StopFlag, Surface,
};
