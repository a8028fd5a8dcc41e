//! Stable capability interface over the charting library.
//!
//! Engines never touch a chart handle directly; everything that reaches the screen goes through
//! [`ChartSurface`], so library churn stays behind one adapter.

use crate::engine::candles::Candle;
use crate::engine::markers::Marker;
use crate::engine::plotter::{PocBand, PriceScale};
use crate::engine::profile::VolumeProfile;
use crate::engine::series::{HistogramPoint, IndicatorLine, LinePoint, SeriesKind};
use crate::engine::viewport::TimeRange;
use serde::{Deserialize, Serialize};

/// Series handle on the chart
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesTarget {
    Candles,
    Overlay(SeriesKind),
}

impl From<SeriesKind> for SeriesTarget {
    fn from(kind: SeriesKind) -> Self {
        SeriesTarget::Overlay(kind)
    }
}

/// Data handed to a series, borrowed from the engine's snapshot
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SeriesData<'a> {
    Candles(&'a [Candle]),
    Line(&'a [LinePoint]),
    Histogram(&'a [HistogramPoint]),
}

impl SeriesData<'_> {
    pub fn len(&self) -> usize {
        match self {
            SeriesData::Candles(data) => data.len(),
            SeriesData::Line(data) => data.len(),
            SeriesData::Histogram(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-series rendering options
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesOptions {
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_width: Option<u8>,
}

impl SeriesOptions {
    pub fn visibility(visible: bool) -> Self {
        Self {
            visible,
            color: None,
            line_width: None,
        }
    }

    /// Initial options for an overlay series.
    pub fn initial(kind: SeriesKind) -> Self {
        let (color, line_width) = match kind {
            SeriesKind::Line(IndicatorLine::Ma20) => (Some("#f7a600"), Some(1)),
            SeriesKind::Line(IndicatorLine::Ma60) => (Some("#2962ff"), Some(1)),
            SeriesKind::Line(IndicatorLine::Ma200) => (Some("#9c27b0"), Some(2)),
            SeriesKind::Line(IndicatorLine::BbUpper | IndicatorLine::BbLower) => {
                (Some("#787b86"), Some(1))
            }
            SeriesKind::Cvd => (Some("#00bcd4"), Some(2)),
            SeriesKind::Volume => (None, None),
        };

        Self {
            visible: true,
            color: color.map(str::to_string),
            line_width,
        }
    }
}

/// Everything the overlay engine needs from a chart.
///
/// The surface is also the live price scale used to place the POC band.
pub trait ChartSurface: PriceScale {
    fn set_data(&mut self, target: SeriesTarget, data: SeriesData<'_>);

    fn apply_options(&mut self, target: SeriesTarget, options: SeriesOptions);

    /// Replace every marker; `markers` is sorted ascending by time.
    fn set_markers(&mut self, markers: &[Marker]);

    fn set_visible_range(&mut self, range: TimeRange);

    fn set_volume_profile(&mut self, profile: Option<&VolumeProfile>);

    fn set_poc_band(&mut self, band: Option<PocBand>);

    /// Called exactly once when the owning session ends.
    fn release(&mut self);
}
