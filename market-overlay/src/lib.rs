/// Market Overlay Engine
///
/// Viewport-driven overlay computation for a candlestick chart. Turns a raw candle stream plus
/// auxiliary feeds (liquidations, fractal flags, cumulative volume delta) into a consistent set
/// of recomputable visual aggregates:
/// - Volume Profile Visible Range with Point of Control
/// - Deduplicated liquidation and fractal markers
/// - Indicator, volume and baseline-aligned CVD series
/// - Follow/browse viewport semantics
/// - POC band pixel placement
///
/// Engines are pure and synchronous. The chart is reached only through [`chart::ChartSurface`],
/// and every trigger is a named [`dispatch::OverlayEvent`].
pub mod chart;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types for convenience
pub use chart::{ChartSurface, SeriesData, SeriesOptions, SeriesTarget};
pub use config::OverlayConfig;
pub use dispatch::{
    FeedBatch, Overlay, OverlayEngine, OverlayEvent, OverlaySnapshot, OverlayToggles, Recompute,
    RecomputeSet,
};
pub use error::{OverlayError, RecordKind};
pub use session::OverlaySession;
pub use types::{RawCandle, RawCvdPoint, RawLiquidation, Timeframe};

pub use engine::candles::{Candle, CandleMeta, CandleStore};
pub use engine::markers::{Marker, MarkerPosition, MarkerShape};
pub use engine::plotter::{CoordinatePlotter, LinearPriceScale, PocBand, PriceScale};
pub use engine::profile::{
    PocPriceRange, VisibleRange, VolumeProfile, VolumeProfileRow, compute_volume_profile,
};
pub use engine::series::{IndicatorLine, LinePoint, SeriesKind, SeriesSet};
pub use engine::viewport::{TimeRange, ViewportChange, ViewportController, ViewportMode};
