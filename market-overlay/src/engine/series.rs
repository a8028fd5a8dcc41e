//! Overlay series synchronised with the candle snapshot.
//!
//! Indicator lines, the volume histogram and the baseline-aligned CVD line are rebuilt from
//! scratch on every candle refresh. Visibility is tracked separately and never causes a rebuild.

use crate::config::OverlayConfig;
use crate::engine::candles::{Candle, Indicators};
use crate::error::{OverlayError, RecordKind};
use crate::types::{FeedNumber, RawCvdPoint, RawTimestamp};
use fnv::FnvHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const VOLUME_UP_COLOR: &str = "rgba(38, 166, 154, 0.5)";
const VOLUME_DOWN_COLOR: &str = "rgba(239, 83, 80, 0.5)";

/// Single point of a line series
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LinePoint {
    pub time: i64,
    pub value: f64,
}

/// Single bar of a histogram series
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HistogramPoint {
    pub time: i64,
    pub value: f64,
    pub color: String,
}

/// Indicator columns rendered as line overlays
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum IndicatorLine {
    #[display("MA20")]
    Ma20,
    #[display("MA60")]
    Ma60,
    #[display("MA200")]
    Ma200,
    #[display("BB upper")]
    BbUpper,
    #[display("BB lower")]
    BbLower,
}

impl IndicatorLine {
    pub const ALL: [IndicatorLine; 5] = [
        IndicatorLine::Ma20,
        IndicatorLine::Ma60,
        IndicatorLine::Ma200,
        IndicatorLine::BbUpper,
        IndicatorLine::BbLower,
    ];

    /// Upstream value for this line, if present and finite.
    pub fn value(&self, indicators: &Indicators) -> Option<f64> {
        let value = match self {
            IndicatorLine::Ma20 => indicators.ma20,
            IndicatorLine::Ma60 => indicators.ma60,
            IndicatorLine::Ma200 => indicators.ma200,
            IndicatorLine::BbUpper => indicators.bb_upper,
            IndicatorLine::BbLower => indicators.bb_lower,
        }?;
        value.is_finite().then_some(value)
    }
}

/// Every series the synchroniser produces, used as a visibility key
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesKind {
    Line(IndicatorLine),
    Volume,
    Cvd,
}

/// Filter candles to those carrying a finite value for `line`, preserving time order.
pub fn line_series(candles: &[Candle], line: IndicatorLine) -> Vec<LinePoint> {
    candles
        .iter()
        .filter_map(|candle| {
            line.value(&candle.indicators).map(|value| LinePoint {
                time: candle.time,
                value,
            })
        })
        .collect()
}

/// Volume histogram coloured by candle direction.
pub fn volume_series(candles: &[Candle]) -> Vec<HistogramPoint> {
    candles
        .iter()
        .map(|candle| HistogramPoint {
            time: candle.time,
            value: candle.volume,
            color: if candle.is_bullish() {
                VOLUME_UP_COLOR
            } else {
                VOLUME_DOWN_COLOR
            }
            .to_string(),
        })
        .collect()
}

/// Validated CVD sample with its feed's arbitrary absolute baseline
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CvdPoint {
    pub time: i64,
    pub cvd: f64,
}

impl TryFrom<&RawCvdPoint> for CvdPoint {
    type Error = OverlayError;

    fn try_from(raw: &RawCvdPoint) -> Result<Self, Self::Error> {
        let time = raw
            .time
            .as_ref()
            .and_then(RawTimestamp::to_unix_seconds)
            .ok_or_else(|| OverlayError::malformed(RecordKind::Cvd, "invalid time"))?;
        let cvd = raw
            .cvd
            .as_ref()
            .and_then(FeedNumber::finite)
            .ok_or_else(|| {
                OverlayError::malformed(RecordKind::Cvd, format!("non-finite cvd at {time}"))
            })?;
        Ok(Self { time, cvd })
    }
}

/// Validate, sort and deduplicate CVD feed records (first occurrence wins).
pub fn normalize_cvd(raw_records: &[RawCvdPoint]) -> Vec<CvdPoint> {
    let mut points: Vec<CvdPoint> = raw_records
        .iter()
        .filter_map(|raw| match CvdPoint::try_from(raw) {
            Ok(point) => Some(point),
            Err(error) => {
                debug!(%error, "dropping cvd record");
                None
            }
        })
        .collect();

    points.sort_by_key(|point| point.time);
    points.dedup_by_key(|point| point.time);
    points
}

/// Re-base CVD onto the first point of the window: `aligned(t) = raw(t) - raw(first)`.
///
/// The first aligned point is exactly zero.
pub fn align_cvd(points: &[CvdPoint]) -> Vec<LinePoint> {
    let Some(baseline) = points.first().map(|point| point.cvd) else {
        return Vec::new();
    };

    points
        .iter()
        .map(|point| LinePoint {
            time: point.time,
            value: point.cvd - baseline,
        })
        .collect()
}

/// Simple moving average over `period` values; the first `period - 1` entries are `None`.
pub fn simple_moving_average(
    values: &[f64],
    period: usize,
) -> Result<Vec<Option<f64>>, OverlayError> {
    if period == 0 {
        return Err(OverlayError::InvalidPeriod(period));
    }

    let mut output = vec![None; values.len()];
    let mut sum = 0.0;
    for (index, value) in values.iter().enumerate() {
        sum += value;
        if index >= period {
            sum -= values[index - period];
        }
        if index + 1 >= period {
            output[index] = Some(sum / period as f64);
        }
    }
    Ok(output)
}

/// Bollinger band `(upper, lower)` at `width` population standard deviations around the SMA.
pub fn bollinger_bands(
    values: &[f64],
    period: usize,
    width: f64,
) -> Result<Vec<Option<(f64, f64)>>, OverlayError> {
    if period == 0 {
        return Err(OverlayError::InvalidPeriod(period));
    }

    let mut output = vec![None; values.len()];
    for (offset, window) in values.windows(period).enumerate() {
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / period as f64;
        let deviation = variance.sqrt() * width;
        output[offset + period - 1] = Some((mean + deviation, mean - deviation));
    }
    Ok(output)
}

/// Parameters for locally derived indicators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivationParams {
    /// Derive an indicator locally when the feed omitted it for every candle
    pub derive_missing: bool,
    pub bollinger_period: usize,
    pub bollinger_width: f64,
}

impl Default for DerivationParams {
    fn default() -> Self {
        Self {
            derive_missing: false,
            bollinger_period: 20,
            bollinger_width: 2.0,
        }
    }
}

impl From<&OverlayConfig> for DerivationParams {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            derive_missing: config.derive_missing_indicators,
            ..Self::default()
        }
    }
}

/// Complete set of overlay series for one candle snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSet {
    pub ma20: Arc<[LinePoint]>,
    pub ma60: Arc<[LinePoint]>,
    pub ma200: Arc<[LinePoint]>,
    pub bb_upper: Arc<[LinePoint]>,
    pub bb_lower: Arc<[LinePoint]>,
    pub volume: Arc<[HistogramPoint]>,
    pub cvd: Arc<[LinePoint]>,
}

impl Default for SeriesSet {
    fn default() -> Self {
        Self {
            ma20: Arc::from(Vec::new()),
            ma60: Arc::from(Vec::new()),
            ma200: Arc::from(Vec::new()),
            bb_upper: Arc::from(Vec::new()),
            bb_lower: Arc::from(Vec::new()),
            volume: Arc::from(Vec::new()),
            cvd: Arc::from(Vec::new()),
        }
    }
}

impl SeriesSet {
    pub fn line(&self, line: IndicatorLine) -> &Arc<[LinePoint]> {
        match line {
            IndicatorLine::Ma20 => &self.ma20,
            IndicatorLine::Ma60 => &self.ma60,
            IndicatorLine::Ma200 => &self.ma200,
            IndicatorLine::BbUpper => &self.bb_upper,
            IndicatorLine::BbLower => &self.bb_lower,
        }
    }

    fn line_mut(&mut self, line: IndicatorLine) -> &mut Arc<[LinePoint]> {
        match line {
            IndicatorLine::Ma20 => &mut self.ma20,
            IndicatorLine::Ma60 => &mut self.ma60,
            IndicatorLine::Ma200 => &mut self.ma200,
            IndicatorLine::BbUpper => &mut self.bb_upper,
            IndicatorLine::BbLower => &mut self.bb_lower,
        }
    }
}

/// Build every overlay series from the candle snapshot and the CVD window.
pub fn build_series(
    candles: &[Candle],
    cvd: &[CvdPoint],
    params: &DerivationParams,
) -> Result<SeriesSet, OverlayError> {
    let mut set = SeriesSet {
        volume: Arc::from(volume_series(candles)),
        cvd: Arc::from(align_cvd(cvd)),
        ..SeriesSet::default()
    };

    for line in IndicatorLine::ALL {
        *set.line_mut(line) = Arc::from(line_series(candles, line));
    }

    if params.derive_missing && !candles.is_empty() {
        derive_missing_lines(&mut set, candles, params)?;
    }

    Ok(set)
}

/// Fill lines the feed omitted for the whole array with locally computed values.
fn derive_missing_lines(
    set: &mut SeriesSet,
    candles: &[Candle],
    params: &DerivationParams,
) -> Result<(), OverlayError> {
    let closes: Vec<f64> = candles.iter().map(|candle| candle.close).collect();
    let to_line = |values: Vec<Option<f64>>| -> Arc<[LinePoint]> {
        candles
            .iter()
            .zip(values)
            .filter_map(|(candle, value)| {
                value.map(|value| LinePoint {
                    time: candle.time,
                    value,
                })
            })
            .collect()
    };

    for (line, period) in [
        (IndicatorLine::Ma20, 20),
        (IndicatorLine::Ma60, 60),
        (IndicatorLine::Ma200, 200),
    ] {
        if set.line(line).is_empty() {
            debug!(%line, "deriving missing indicator from closes");
            *set.line_mut(line) = to_line(simple_moving_average(&closes, period)?);
        }
    }

    if set.bb_upper.is_empty() && set.bb_lower.is_empty() {
        debug!("deriving missing bollinger bands from closes");
        let bands = bollinger_bands(&closes, params.bollinger_period, params.bollinger_width)?;
        set.bb_upper = to_line(bands.iter().map(|band| band.map(|(upper, _)| upper)).collect());
        set.bb_lower = to_line(bands.iter().map(|band| band.map(|(_, lower)| lower)).collect());
    }

    Ok(())
}

/// Rendering visibility per series. Toggling never triggers a recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesVisibility {
    hidden: FnvHashSet<SeriesKind>,
}

impl SeriesVisibility {
    pub fn set(&mut self, kind: SeriesKind, visible: bool) {
        if visible {
            self.hidden.remove(&kind);
        } else {
            self.hidden.insert(kind);
        }
    }

    pub fn is_visible(&self, kind: SeriesKind) -> bool {
        !self.hidden.contains(&kind)
    }
}

/// Series overlay state: the last successfully built series set plus visibility
#[derive(Debug, Clone, Default)]
pub struct SeriesLayer {
    series: SeriesSet,
    visibility: SeriesVisibility,
}

impl SeriesLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every series. On failure the previous set is kept and the error logged.
    ///
    /// Returns `true` if the series set was replaced.
    pub fn refresh(
        &mut self,
        candles: &[Candle],
        cvd: &[CvdPoint],
        params: &DerivationParams,
    ) -> bool {
        match build_series(candles, cvd, params) {
            Ok(series) => {
                self.series = series;
                true
            }
            Err(error) => {
                warn!(
                    %error,
                    recoverable = error.is_recoverable(),
                    "series derivation failed, keeping previous series"
                );
                false
            }
        }
    }

    pub fn series(&self) -> &SeriesSet {
        &self.series
    }

    pub fn visibility(&self) -> &SeriesVisibility {
        &self.visibility
    }

    /// Change rendering visibility only; the computed series are untouched.
    pub fn set_visible(&mut self, kind: SeriesKind, visible: bool) {
        self.visibility.set(kind, visible);
    }

    pub fn clear(&mut self) {
        self.series = SeriesSet::default();
    }
}
