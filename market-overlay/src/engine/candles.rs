//! Candle normalisation and the immutable candle snapshot shared by every engine.
//!
//! A refresh replaces the whole snapshot; readers hold `Arc` clones and never observe a
//! partially-updated array.

use crate::error::{OverlayError, RecordKind};
use crate::types::{FeedFlag, FeedNumber, RawCandle, RawTimestamp, Timeframe};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Indicator columns carried alongside a candle (upstream or locally derived)
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicators {
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub ma200: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
}

/// Local extremum flags from the upstream fractal pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Fractal {
    pub up: bool,
    pub down: bool,
}

/// Normalised OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Bucket open time, epoch seconds
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub indicators: Indicators,
    #[serde(default)]
    pub fractal: Fractal,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
            indicators: Indicators::default(),
            fractal: Fractal::default(),
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// Reduced projection used by the volume profile engine
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CandleMeta {
    pub time: i64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

impl From<&Candle> for CandleMeta {
    fn from(candle: &Candle) -> Self {
        Self {
            time: candle.time,
            high: candle.high,
            low: candle.low,
            volume: candle.volume,
        }
    }
}

impl TryFrom<&RawCandle> for Candle {
    type Error = OverlayError;

    fn try_from(raw: &RawCandle) -> Result<Self, Self::Error> {
        let time = raw
            .timestamp
            .as_ref()
            .and_then(RawTimestamp::to_unix_seconds)
            .ok_or_else(|| OverlayError::malformed(RecordKind::Candle, "invalid timestamp"))?;

        let field = |value: &Option<FeedNumber>, name: &str| {
            value.as_ref().and_then(FeedNumber::finite).ok_or_else(|| {
                OverlayError::malformed(RecordKind::Candle, format!("non-finite {name} at {time}"))
            })
        };

        let open = field(&raw.open, "open")?;
        let close = field(&raw.close, "close")?;
        // Widen the envelope if the feed reports wicks that do not cover the body
        let high = field(&raw.high, "high")?.max(open).max(close);
        let low = field(&raw.low, "low")?.min(open).min(close);

        let volume = raw
            .volume
            .as_ref()
            .and_then(FeedNumber::finite)
            .filter(|volume| *volume >= 0.0)
            .unwrap_or(0.0);

        let optional = |value: &Option<FeedNumber>| value.as_ref().and_then(FeedNumber::finite);
        let flag = |value: &Option<FeedFlag>| value.as_ref().is_some_and(FeedFlag::is_set);

        Ok(Candle {
            time,
            open,
            high,
            low,
            close,
            volume,
            indicators: Indicators {
                ma20: optional(&raw.ma20),
                ma60: optional(&raw.ma60),
                ma200: optional(&raw.ma200),
                bb_upper: optional(&raw.bb_upper),
                bb_lower: optional(&raw.bb_lower),
            },
            fractal: Fractal {
                up: flag(&raw.fractal_up),
                down: flag(&raw.fractal_down),
            },
        })
    }
}

/// Parse, validate, sort and deduplicate raw OHLCV records.
///
/// Malformed records are skipped individually. Duplicate timestamps keep the first occurrence in
/// input order. Never fails: garbage in yields an empty vector.
pub fn normalize(raw_records: &[RawCandle]) -> Vec<Candle> {
    let mut candles: Vec<Candle> = raw_records
        .iter()
        .filter_map(|raw| match Candle::try_from(raw) {
            Ok(candle) => Some(candle),
            Err(error) => {
                debug!(%error, "dropping candle record");
                None
            }
        })
        .collect();

    // Stable sort so dedup keeps the earliest input among equal timestamps
    candles.sort_by_key(|candle| candle.time);
    candles.dedup_by_key(|candle| candle.time);
    candles
}

/// Pure projection of candles into profile metadata, same ordering.
pub fn derive_meta(candles: &[Candle]) -> Vec<CandleMeta> {
    candles.iter().map(CandleMeta::from).collect()
}

/// Latest candle snapshot, replaced wholesale on every refresh
#[derive(Debug, Clone)]
pub struct CandleStore {
    timeframe: Timeframe,
    candles: Arc<[Candle]>,
    meta: Arc<[CandleMeta]>,
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new(Timeframe::default())
    }
}

impl CandleStore {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            candles: Arc::from(Vec::new()),
            meta: Arc::from(Vec::new()),
        }
    }

    /// Normalise `raw_records` and swap in the new snapshot. Returns the number of candles kept.
    pub fn replace(&mut self, raw_records: &[RawCandle]) -> usize {
        let candles = normalize(raw_records);
        let dropped = raw_records.len() - candles.len();
        if dropped > 0 {
            debug!(
                dropped,
                kept = candles.len(),
                "candle refresh dropped malformed or duplicate records"
            );
        }
        self.replace_normalized(candles)
    }

    /// Swap in an already-normalised candle array.
    pub fn replace_normalized(&mut self, candles: Vec<Candle>) -> usize {
        let meta = derive_meta(&candles);
        let kept = candles.len();
        self.candles = Arc::from(candles);
        self.meta = Arc::from(meta);
        kept
    }

    /// Drop every candle and switch timeframe (symbol/timeframe change).
    pub fn reset(&mut self, timeframe: Timeframe) {
        *self = Self::new(timeframe);
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> Arc<[Candle]> {
        Arc::clone(&self.candles)
    }

    pub fn meta(&self) -> Arc<[CandleMeta]> {
        Arc::clone(&self.meta)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest_time(&self) -> Option<i64> {
        self.candles.last().map(|candle| candle.time)
    }

    /// Candle step in seconds: the median positive gap between consecutive candles, or the
    /// timeframe step when fewer than two candles are loaded.
    pub fn step(&self) -> i64 {
        let mut gaps: Vec<i64> = self
            .candles
            .windows(2)
            .map(|pair| pair[1].time.saturating_sub(pair[0].time))
            .filter(|gap| *gap > 0)
            .collect();

        if gaps.is_empty() {
            return self.timeframe.step_secs();
        }

        gaps.sort_unstable();
        gaps[gaps.len() / 2]
    }

    /// Time of the bar at a (possibly fractional, possibly out-of-range) logical index.
    ///
    /// Indices past either end are extrapolated using the candle step, saturating at the ends of
    /// the `i64` range.
    pub fn time_at_logical(&self, index: f64) -> Option<i64> {
        if !index.is_finite() {
            return None;
        }
        let first = self.candles.first()?;
        let last = self.candles.last()?;
        let last_index = (self.candles.len() - 1) as f64;
        let rounded = index.round();

        if rounded < 0.0 {
            let offset = (rounded as i64).saturating_mul(self.step());
            Some(first.time.saturating_add(offset))
        } else if rounded > last_index {
            let offset = ((rounded - last_index) as i64).saturating_mul(self.step());
            Some(last.time.saturating_add(offset))
        } else {
            Some(self.candles[rounded as usize].time)
        }
    }
}
