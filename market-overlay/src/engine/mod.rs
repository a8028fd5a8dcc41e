/// Candle normalisation and the shared candle snapshot.
pub mod candles;

/// Chart markers from liquidations and fractal flags.
pub mod markers;

/// POC band pixel placement.
pub mod plotter;

/// Volume Profile Visible Range.
pub mod profile;

/// Indicator, volume and CVD series.
pub mod series;

/// Follow/browse viewport automaton.
pub mod viewport;
