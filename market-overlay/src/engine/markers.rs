//! Chart markers derived from liquidations and fractal flags.
//!
//! The markers plugin accepts at most one marker per time key, so every candidate from every
//! source is funnelled through [`merge_markers`] before it reaches the chart.

use crate::config::OverlayConfig;
use crate::engine::candles::Candle;
use crate::error::{OverlayError, RecordKind};
use crate::types::{FeedNumber, RawLiquidation, RawTimestamp};
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const LONG_LIQUIDATION_COLOR: &str = "#ef5350";
const SHORT_LIQUIDATION_COLOR: &str = "#26a69a";
const FRACTAL_UP_COLOR: &str = "#f23645";
const FRACTAL_DOWN_COLOR: &str = "#089981";

/// Marker placement relative to its bar
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerPosition {
    AboveBar,
    BelowBar,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerShape {
    Circle,
    ArrowUp,
    ArrowDown,
}

/// Feed a marker candidate came from
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum MarkerSource {
    #[display("liquidation")]
    Liquidation,
    #[display("fractal")]
    Fractal,
}

/// Chart marker as consumed by the markers plugin
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Marker {
    pub time: i64,
    pub position: MarkerPosition,
    pub color: String,
    pub shape: MarkerShape,
    pub text: String,
    /// Severity, 1..=4
    pub size: u8,
    pub source: MarkerSource,
}

/// Which side of the book was forcibly closed
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationSide {
    /// Forced sell: long positions liquidated
    LongLiquidated,
    /// Forced buy: short positions liquidated
    ShortLiquidated,
}

impl LiquidationSide {
    /// `sell`/`long_liquidated` (any case) are long liquidations, everything else is short.
    pub fn parse(side: &str) -> Self {
        match side.trim().to_ascii_lowercase().as_str() {
            "sell" | "long_liquidated" => LiquidationSide::LongLiquidated,
            _ => LiquidationSide::ShortLiquidated,
        }
    }
}

/// Validated liquidation event
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LiquidationEvent {
    pub time: i64,
    pub side: LiquidationSide,
    pub price: Option<f64>,
    pub value_usd: f64,
}

impl TryFrom<&RawLiquidation> for LiquidationEvent {
    type Error = OverlayError;

    fn try_from(raw: &RawLiquidation) -> Result<Self, Self::Error> {
        let time = raw
            .timestamp
            .as_ref()
            .and_then(RawTimestamp::to_unix_seconds)
            .ok_or_else(|| OverlayError::malformed(RecordKind::Liquidation, "invalid timestamp"))?;

        let value_usd = raw
            .value_usd
            .as_ref()
            .and_then(FeedNumber::finite)
            .ok_or_else(|| {
                OverlayError::malformed(
                    RecordKind::Liquidation,
                    format!("non-finite value_usd at {time}"),
                )
            })?;

        Ok(Self {
            time,
            side: LiquidationSide::parse(raw.side.as_deref().unwrap_or_default()),
            price: raw.price.as_ref().and_then(FeedNumber::finite),
            value_usd,
        })
    }
}

/// Validate raw liquidation records, dropping malformed ones individually.
pub fn parse_liquidations(raw_records: &[RawLiquidation]) -> Vec<LiquidationEvent> {
    raw_records
        .iter()
        .filter_map(|raw| match LiquidationEvent::try_from(raw) {
            Ok(event) => Some(event),
            Err(error) => {
                debug!(%error, "dropping liquidation record");
                None
            }
        })
        .collect()
}

/// Thresholds and time-key width used by marker derivation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerRules {
    pub min_usd: f64,
    pub label_min_usd: f64,
    pub bucket_secs: Option<i64>,
}

impl Default for MarkerRules {
    fn default() -> Self {
        Self::from(&OverlayConfig::default())
    }
}

impl From<&OverlayConfig> for MarkerRules {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            min_usd: config.liq_marker_min_usd,
            label_min_usd: config.liq_label_min_usd,
            bucket_secs: config.marker_bucket_secs,
        }
    }
}

/// Severity by notional: `>$1M → 4`, `>$200K → 3`, `>$50K → 2`, else `1`.
pub fn liquidation_severity(value_usd: f64) -> u8 {
    if value_usd > 1_000_000.0 {
        4
    } else if value_usd > 200_000.0 {
        3
    } else if value_usd > 50_000.0 {
        2
    } else {
        1
    }
}

/// Format a USD notional with K/M suffix, e.g. `$1.2M`, `$250K`.
///
/// Thresholds sit at the rounding boundary so `999_500` reads `$1.0M`, never `$1000K`.
pub fn format_usd(value: f64) -> String {
    if value.abs() >= 999_500.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value.abs() >= 999.5 {
        format!("${:.0}K", value / 1_000.0)
    } else {
        format!("${:.0}", value)
    }
}

/// One marker candidate per liquidation above `rules.min_usd`, in input order.
pub fn derive_liquidation_markers(events: &[LiquidationEvent], rules: &MarkerRules) -> Vec<Marker> {
    events
        .iter()
        .filter(|event| event.value_usd > rules.min_usd)
        .map(|event| {
            let (position, color) = match event.side {
                LiquidationSide::LongLiquidated => {
                    (MarkerPosition::BelowBar, LONG_LIQUIDATION_COLOR)
                }
                LiquidationSide::ShortLiquidated => {
                    (MarkerPosition::AboveBar, SHORT_LIQUIDATION_COLOR)
                }
            };

            let text = if event.value_usd > rules.label_min_usd {
                format_usd(event.value_usd)
            } else {
                String::new()
            };

            Marker {
                time: event.time,
                position,
                color: color.to_string(),
                shape: MarkerShape::Circle,
                text,
                size: liquidation_severity(event.value_usd),
                source: MarkerSource::Liquidation,
            }
        })
        .collect()
}

/// Fractal arrows from candle flags: tops above the bar pointing down, bottoms below pointing up.
pub fn derive_fractal_markers(candles: &[Candle]) -> Vec<Marker> {
    let fractal = |time: i64, position: MarkerPosition, color: &str, shape: MarkerShape| Marker {
        time,
        position,
        color: color.to_string(),
        shape,
        text: String::new(),
        size: 1,
        source: MarkerSource::Fractal,
    };

    candles
        .iter()
        .flat_map(|candle| {
            let up = candle.fractal.up.then(|| {
                fractal(
                    candle.time,
                    MarkerPosition::AboveBar,
                    FRACTAL_UP_COLOR,
                    MarkerShape::ArrowDown,
                )
            });
            let down = candle.fractal.down.then(|| {
                fractal(
                    candle.time,
                    MarkerPosition::BelowBar,
                    FRACTAL_DOWN_COLOR,
                    MarkerShape::ArrowUp,
                )
            });
            up.into_iter().chain(down)
        })
        .collect()
}

/// Time key for a marker: the exact second, or `floor(time / width) * width` when bucketed.
pub fn time_key(time: i64, bucket_secs: Option<i64>) -> Result<i64, OverlayError> {
    match bucket_secs {
        None => Ok(time),
        Some(width) if width > 0 => Ok(time.div_euclid(width) * width),
        Some(width) => Err(OverlayError::InvalidBucket(width)),
    }
}

/// Keep one marker per time key: the highest `size` wins, ties keep the earlier candidate.
///
/// Surviving markers are re-timed to their key and returned ascending by time.
pub fn merge_markers(
    candidates: impl IntoIterator<Item = Marker>,
    bucket_secs: Option<i64>,
) -> Result<Vec<Marker>, OverlayError> {
    if let Some(width) = bucket_secs.filter(|width| *width <= 0) {
        return Err(OverlayError::InvalidBucket(width));
    }

    let mut by_key: FnvHashMap<i64, Marker> = FnvHashMap::default();

    for mut candidate in candidates {
        let key = time_key(candidate.time, bucket_secs)?;
        candidate.time = key;

        match by_key.get_mut(&key) {
            Some(existing) if candidate.size > existing.size => *existing = candidate,
            Some(_) => {}
            None => {
                by_key.insert(key, candidate);
            }
        }
    }

    Ok(by_key
        .into_values()
        .sorted_unstable_by_key(|marker| marker.time)
        .collect())
}

/// Which marker sources are currently enabled
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MarkerSources {
    pub liquidations: bool,
    pub fractals: bool,
}

impl Default for MarkerSources {
    fn default() -> Self {
        Self {
            liquidations: true,
            fractals: true,
        }
    }
}

/// Derive the merged marker set. Liquidation candidates precede fractal candidates, so a
/// same-severity collision keeps the liquidation.
pub fn derive_markers(
    candles: &[Candle],
    liquidations: &[LiquidationEvent],
    rules: &MarkerRules,
    sources: MarkerSources,
) -> Result<Vec<Marker>, OverlayError> {
    let liquidation_markers = sources
        .liquidations
        .then(|| derive_liquidation_markers(liquidations, rules))
        .unwrap_or_default();

    let fractal_markers = sources
        .fractals
        .then(|| derive_fractal_markers(candles))
        .unwrap_or_default();

    merge_markers(
        liquidation_markers.into_iter().chain(fractal_markers),
        rules.bucket_secs,
    )
}

/// Marker overlay state: the last successfully derived marker set
#[derive(Debug, Clone)]
pub struct MarkerLayer {
    markers: Arc<[Marker]>,
}

impl Default for MarkerLayer {
    fn default() -> Self {
        Self {
            markers: Arc::from(Vec::new()),
        }
    }
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive markers. On failure the previously rendered set is kept and the error logged.
    ///
    /// Returns `true` if the marker set was replaced.
    pub fn refresh(
        &mut self,
        candles: &[Candle],
        liquidations: &[LiquidationEvent],
        rules: &MarkerRules,
        sources: MarkerSources,
    ) -> bool {
        match derive_markers(candles, liquidations, rules, sources) {
            Ok(markers) => {
                debug!(count = markers.len(), "markers refreshed");
                self.markers = Arc::from(markers);
                true
            }
            Err(error) => {
                warn!(
                    %error,
                    recoverable = error.is_recoverable(),
                    kept = self.markers.len(),
                    "marker derivation failed, keeping previous markers"
                );
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.markers = Arc::from(Vec::new());
    }

    pub fn markers(&self) -> Arc<[Marker]> {
        Arc::clone(&self.markers)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
