//! Volume Profile Visible Range (VPVR).
//!
//! Buckets the traded volume of the candles inside the viewport into a fixed number of price bins
//! and identifies the Point of Control. Volume of a candle is spread evenly over every bin its
//! `[low, high]` range touches, so the histogram conserves the total volume of the selection.

use crate::engine::candles::CandleMeta;
use crate::error::OverlayError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Relative width floor for a flat price range (`max == min`), scaled by price magnitude so that
/// `lower < upper` survives f64 rounding at any price level.
const PRICE_EPSILON: f64 = 1e-9;

/// Visible chart range handed over by the chart on pan/zoom
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VisibleRange {
    /// Timestamp interval in epoch seconds, inclusive
    Time { from: i64, to: i64 },
    /// Logical bar index interval; bar `i` spans `[i - 0.5, i + 0.5]`
    Logical { from: f64, to: f64 },
}

/// One nonzero price bin
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct VolumeProfileRow {
    pub lower: f64,
    pub upper: f64,
    pub volume: f64,
    /// Volume relative to the largest bin in the same profile, in `[0, 1]`
    pub ratio: f64,
}

/// Price band of the Point of Control
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PocPriceRange {
    pub lower: f64,
    pub upper: f64,
    pub center: f64,
}

impl From<&VolumeProfileRow> for PocPriceRange {
    fn from(row: &VolumeProfileRow) -> Self {
        Self {
            lower: row.lower,
            upper: row.upper,
            center: (row.lower + row.upper) / 2.0,
        }
    }
}

/// Volume-by-price histogram for one visible range
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VolumeProfile {
    /// Nonzero bins, strictly descending by `upper`
    pub rows: Vec<VolumeProfileRow>,
    /// Sum over every bin accumulator
    pub total: f64,
    pub poc: Option<PocPriceRange>,
}

impl VolumeProfile {
    /// The "no data" value: `{rows: [], total: 0, poc: None}`
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Contiguous slice of `meta` intersecting `range`.
///
/// `meta` must be sorted ascending by time, which [`normalize`](crate::engine::candles::normalize)
/// guarantees. Reversed endpoints are swapped.
pub fn select_range(meta: &[CandleMeta], range: VisibleRange) -> &[CandleMeta] {
    match range {
        VisibleRange::Time { from, to } => {
            let (from, to) = (from.min(to), from.max(to));
            let start = meta.partition_point(|candle| candle.time < from);
            let end = meta.partition_point(|candle| candle.time <= to);
            &meta[start..end.max(start)]
        }
        VisibleRange::Logical { from, to } => {
            if meta.is_empty() || !from.is_finite() || !to.is_finite() {
                return &[];
            }
            let (from, to) = (from.min(to), from.max(to));
            let start = (from - 0.5).ceil().max(0.0);
            let end = (to + 0.5).floor().min((meta.len() - 1) as f64);
            if start > end {
                return &[];
            }
            &meta[start as usize..=end as usize]
        }
    }
}

/// Compute the volume profile of the candles intersecting `range`.
///
/// Pure and deterministic: the same input always yields an identical output. Runs in
/// O(candles-in-range) for a fixed bin count and never fails; an empty selection or a non-finite
/// price envelope yields [`VolumeProfile::empty`].
pub fn compute_volume_profile(
    meta: &[CandleMeta],
    range: VisibleRange,
    bins: usize,
) -> VolumeProfile {
    let subset = select_range(meta, range);
    if subset.is_empty() {
        debug!(error = %OverlayError::EmptyRange, ?range, "empty volume profile");
        return VolumeProfile::empty();
    }

    let bins = bins.max(1);
    let (min_price, max_price) = subset
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), candle| {
            (min.min(candle.low), max.max(candle.high))
        });

    if !min_price.is_finite() || !max_price.is_finite() {
        return VolumeProfile::empty();
    }

    let span = (max_price - min_price).max(PRICE_EPSILON * max_price.abs().max(1.0));
    let bucket_size = span / bins as f64;

    let mut accumulators = vec![0.0_f64; bins];
    for candle in subset {
        let (start, end) = bin_span(candle, min_price, bucket_size, bins);
        if candle.high == candle.low {
            accumulators[start] += candle.volume;
        } else {
            let per_bin_volume = candle.volume / (end - start + 1) as f64;
            for bin in &mut accumulators[start..=end] {
                *bin += per_bin_volume;
            }
        }
    }

    let total: f64 = accumulators.iter().sum();
    let max_bin_volume = accumulators.iter().copied().fold(0.0, f64::max);

    let mut rows: Vec<VolumeProfileRow> = accumulators
        .iter()
        .enumerate()
        .filter(|(_, volume)| **volume > 0.0)
        .map(|(index, volume)| {
            let lower = min_price + index as f64 * bucket_size;
            VolumeProfileRow {
                lower,
                upper: lower + bucket_size,
                volume: *volume,
                ratio: if max_bin_volume > 0.0 {
                    volume / max_bin_volume
                } else {
                    0.0
                },
            }
        })
        .collect();

    rows.sort_by(|a, b| b.upper.total_cmp(&a.upper));

    // First maximum in output order wins ties
    let poc = rows
        .iter()
        .fold(None::<&VolumeProfileRow>, |best, row| match best {
            Some(best) if best.volume >= row.volume => Some(best),
            _ => Some(row),
        })
        .map(PocPriceRange::from);

    VolumeProfile { rows, total, poc }
}

/// Inclusive `(start, end)` bin indices touched by a candle.
fn bin_span(candle: &CandleMeta, min_price: f64, bucket_size: f64, bins: usize) -> (usize, usize) {
    let last = bins - 1;
    let bin_of = |price: f64| {
        let index = ((price - min_price) / bucket_size).floor().max(0.0) as usize;
        index.min(last)
    };
    (bin_of(candle.low), bin_of(candle.high))
}

/// Volume profile overlay state: the last computed profile while the overlay is enabled
#[derive(Debug, Clone, Default)]
pub struct ProfileLayer {
    range: Option<VisibleRange>,
    current: Option<VolumeProfile>,
}

impl ProfileLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from scratch for `range`, replacing the previous profile.
    pub fn recompute(
        &mut self,
        meta: &[CandleMeta],
        range: VisibleRange,
        bins: usize,
    ) -> &VolumeProfile {
        self.range = Some(range);
        self.current
            .insert(compute_volume_profile(meta, range, bins))
    }

    /// Remember the range to use for the next refresh without computing anything.
    pub fn set_range(&mut self, range: VisibleRange) {
        self.range = Some(range);
    }

    /// Recompute for the last requested range, if any.
    pub fn refresh(&mut self, meta: &[CandleMeta], bins: usize) -> Option<&VolumeProfile> {
        let range = self.range?;
        Some(self.recompute(meta, range, bins))
    }

    /// Drop all computed state so no stale POC survives a disable.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Forget the remembered range as well (dataset reset).
    pub fn reset(&mut self) {
        self.range = None;
        self.current = None;
    }

    pub fn profile(&self) -> Option<&VolumeProfile> {
        self.current.as_ref()
    }

    pub fn poc(&self) -> Option<PocPriceRange> {
        self.current.as_ref().and_then(|profile| profile.poc)
    }

    pub fn range(&self) -> Option<VisibleRange> {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(time: i64, low: f64, high: f64, volume: f64) -> CandleMeta {
        CandleMeta {
            time,
            high,
            low,
            volume,
        }
    }

    fn sample() -> Vec<CandleMeta> {
        vec![
            meta(0, 100.0, 104.0, 12.0),
            meta(60, 101.5, 103.0, 7.5),
            meta(120, 99.0, 101.0, 3.0),
            meta(180, 102.0, 102.0, 4.0),
            meta(240, 103.0, 108.0, 20.0),
            meta(300, 98.0, 99.5, 0.0),
            meta(360, 105.0, 107.25, 9.0),
        ]
    }

    fn all() -> VisibleRange {
        VisibleRange::Time { from: 0, to: 360 }
    }

    #[test]
    fn test_select_range() {
        struct TestCase {
            range: VisibleRange,
            expected: Vec<i64>,
        }

        let tests = vec![
            TestCase {
                // TC0: inclusive time interval
                range: VisibleRange::Time { from: 60, to: 180 },
                expected: vec![60, 120, 180],
            },
            TestCase {
                // TC1: reversed time interval
                range: VisibleRange::Time { from: 180, to: 60 },
                expected: vec![60, 120, 180],
            },
            TestCase {
                // TC2: interval between candles
                range: VisibleRange::Time { from: 61, to: 119 },
                expected: vec![],
            },
            TestCase {
                // TC3: fractional logical range touches half-bars at both ends
                range: VisibleRange::Logical { from: 0.6, to: 2.4 },
                expected: vec![60, 120],
            },
            TestCase {
                // TC4: logical range overhanging both ends is clamped
                range: VisibleRange::Logical {
                    from: -10.0,
                    to: 100.0,
                },
                expected: vec![0, 60, 120, 180, 240, 300, 360],
            },
            TestCase {
                // TC5: logical range entirely past the data
                range: VisibleRange::Logical {
                    from: 20.0,
                    to: 30.0,
                },
                expected: vec![],
            },
            TestCase {
                // TC6: logical range entirely before the data
                range: VisibleRange::Logical {
                    from: -9.0,
                    to: -2.0,
                },
                expected: vec![],
            },
            TestCase {
                // TC7: non-finite logical range
                range: VisibleRange::Logical {
                    from: f64::NAN,
                    to: 3.0,
                },
                expected: vec![],
            },
        ];

        let data = sample();
        for (index, test) in tests.into_iter().enumerate() {
            let actual: Vec<i64> = select_range(&data, test.range)
                .iter()
                .map(|candle| candle.time)
                .collect();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_single_candle_covers_its_range() {
        let data = vec![meta(100, 100.0, 110.0, 10.0)];
        let profile = compute_volume_profile(&data, VisibleRange::Time { from: 100, to: 100 }, 30);

        assert!(!profile.rows.is_empty());
        assert!((profile.total - 10.0).abs() < 1e-9);

        let volume: f64 = profile.rows.iter().map(|row| row.volume).sum();
        assert!((volume - 10.0).abs() < 1e-9);

        let lowest = profile.rows.last().unwrap().lower;
        let highest = profile.rows.first().unwrap().upper;
        assert!((lowest - 100.0).abs() < 1e-9);
        assert!((highest - 110.0).abs() < 1e-9);

        let poc = profile.poc.unwrap();
        assert!(poc.lower >= 100.0 - 1e-9 && poc.upper <= 110.0 + 1e-9);
        assert!(poc.lower < poc.center && poc.center < poc.upper);
    }

    #[test]
    fn test_flat_candle_lands_in_one_bin() {
        let data = vec![meta(100, 250.0, 250.0, 7.0)];
        let profile = compute_volume_profile(&data, VisibleRange::Time { from: 0, to: 200 }, 30);

        assert_eq!(profile.rows.len(), 1);
        let row = profile.rows[0];
        assert_eq!(row.volume, 7.0);
        assert_eq!(row.ratio, 1.0);
        assert!(row.lower < row.upper);
        assert!(row.lower <= 250.0 && 250.0 < row.upper);
        assert_eq!(profile.poc, Some(PocPriceRange::from(&row)));
    }

    #[test]
    fn test_flat_range_at_large_prices_keeps_positive_width() {
        let data = vec![meta(1, 1_000_000.0, 1_000_000.0, 1.0)];
        let profile = compute_volume_profile(&data, VisibleRange::Time { from: 0, to: 10 }, 30);
        let row = profile.rows[0];
        assert!(row.lower < row.upper);
    }

    #[test]
    fn test_disjoint_candles_form_two_clusters() {
        let data = vec![meta(0, 0.0, 10.0, 5.0), meta(60, 90.0, 100.0, 5.0)];
        let profile = compute_volume_profile(&data, VisibleRange::Time { from: 0, to: 60 }, 30);

        assert!((profile.total - 10.0).abs() < 1e-9);

        let bucket = 100.0 / 30.0;
        let low_cluster: Vec<_> = profile
            .rows
            .iter()
            .filter(|row| row.upper <= 10.0 + bucket + 1e-9)
            .collect();
        let high_cluster: Vec<_> = profile
            .rows
            .iter()
            .filter(|row| row.lower >= 90.0 - bucket - 1e-9)
            .collect();

        assert!(!low_cluster.is_empty());
        assert!(!high_cluster.is_empty());
        assert_eq!(low_cluster.len() + high_cluster.len(), profile.rows.len());

        // Nothing in the empty middle
        assert!(
            profile
                .rows
                .iter()
                .all(|row| row.upper <= 20.0 || row.lower >= 80.0)
        );

        let low_volume: f64 = low_cluster.iter().map(|row| row.volume).sum();
        let high_volume: f64 = high_cluster.iter().map(|row| row.volume).sum();
        assert!((low_volume - 5.0).abs() < 1e-9);
        assert!((high_volume - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_inputs_yield_empty_profile() {
        struct TestCase {
            meta: Vec<CandleMeta>,
            range: VisibleRange,
        }

        let tests = vec![
            TestCase {
                // TC0: no candles, time range
                meta: vec![],
                range: VisibleRange::Time { from: 0, to: 1_000 },
            },
            TestCase {
                // TC1: no candles, logical range
                meta: vec![],
                range: VisibleRange::Logical { from: 0.0, to: 5.0 },
            },
            TestCase {
                // TC2: candles outside the range
                meta: sample(),
                range: VisibleRange::Time {
                    from: 10_000,
                    to: 20_000,
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = compute_volume_profile(&test.meta, test.range, 30);
            assert_eq!(actual, VolumeProfile::empty(), "TC{} failed", index);
            assert_eq!(actual.total, 0.0, "TC{} failed", index);
            assert!(actual.poc.is_none(), "TC{} failed", index);
        }
    }

    #[test]
    fn test_profile_conserves_volume() {
        let data = sample();
        for range in [
            all(),
            VisibleRange::Time { from: 60, to: 240 },
            VisibleRange::Logical { from: 2.0, to: 6.0 },
        ] {
            let profile = compute_volume_profile(&data, range, 30);
            let expected: f64 = select_range(&data, range)
                .iter()
                .map(|candle| candle.volume)
                .sum();
            let actual: f64 = profile.rows.iter().map(|row| row.volume).sum();

            let tolerance = 1e-9 * expected.abs().max(1.0);
            assert!((actual - expected).abs() <= tolerance, "{range:?}");
            assert!((profile.total - expected).abs() <= tolerance, "{range:?}");
        }
    }

    #[test]
    fn test_profile_rows_shape() {
        let profile = compute_volume_profile(&sample(), all(), 30);

        assert!(!profile.rows.is_empty());
        for pair in profile.rows.windows(2) {
            assert!(pair[0].upper > pair[1].upper);
        }
        for row in &profile.rows {
            assert!(row.lower < row.upper);
            assert!(row.volume > 0.0);
            assert!((0.0..=1.0).contains(&row.ratio));
        }
        assert!(profile.rows.iter().any(|row| row.ratio == 1.0));
    }

    #[test]
    fn test_poc_is_max_volume_row() {
        let profile = compute_volume_profile(&sample(), all(), 30);
        let max = profile
            .rows
            .iter()
            .map(|row| row.volume)
            .fold(0.0, f64::max);
        let first_max = profile.rows.iter().find(|row| row.volume == max).unwrap();

        assert_eq!(profile.poc, Some(PocPriceRange::from(first_max)));
    }

    #[test]
    fn test_profile_is_idempotent() {
        let data = sample();
        let first = compute_volume_profile(&data, all(), 30);
        let second = compute_volume_profile(&data, all(), 30);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_bin_containment() {
        let data = sample();
        let bins = 30;
        let min_price = data.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let max_price = data.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let bucket_size = (max_price - min_price) / bins as f64;

        for candle in &data {
            let (start, end) = bin_span(candle, min_price, bucket_size, bins);
            assert!(start <= end);
            for index in start..=end {
                let lower = min_price + index as f64 * bucket_size;
                let upper = lower + bucket_size;
                // [lower, upper) must intersect [low, high]
                assert!(lower <= candle.high + 1e-9, "{candle:?} bin {index}");
                assert!(upper > candle.low - 1e-9, "{candle:?} bin {index}");
            }
        }
    }

    #[test]
    fn test_profile_layer_lifecycle() {
        let data = sample();
        let mut layer = ProfileLayer::new();
        assert!(layer.refresh(&data, 30).is_none());

        layer.recompute(&data, all(), 30);
        assert!(layer.poc().is_some());
        assert_eq!(layer.range(), Some(all()));

        layer.clear();
        assert!(layer.poc().is_none());
        assert!(layer.profile().is_none());

        // Range is remembered across a disable/enable cycle
        assert!(layer.refresh(&data, 30).is_some());

        layer.reset();
        assert!(layer.range().is_none());
        assert!(layer.refresh(&data, 30).is_none());

        layer.set_range(VisibleRange::Logical { from: 0.0, to: 1.0 });
        assert!(layer.profile().is_none());
        let profile = layer.refresh(&data, 30).unwrap();
        assert!((profile.total - 19.5).abs() < 1e-9);

        layer.reset();
        assert!(layer.refresh(&data, 30).is_none());
    }
}
