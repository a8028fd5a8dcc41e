//! Follow/browse viewport automaton.
//!
//! A fresh dataset starts in [`ViewportMode::Following`]: every refresh scrolls the right edge to
//! the newest candle. Panning far enough back switches to [`ViewportMode::Browsing`], after which
//! refreshes leave the viewport alone until the next dataset reset.

use crate::config::OverlayConfig;
use crate::engine::candles::CandleStore;
use crate::engine::profile::VisibleRange;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum ViewportMode {
    #[default]
    #[display("following")]
    Following,
    #[display("browsing")]
    Browsing,
}

/// Visible time interval in epoch seconds
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, derive_more::Constructor)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn width(&self) -> i64 {
        self.to.saturating_sub(self.from)
    }
}

impl From<TimeRange> for VisibleRange {
    fn from(range: TimeRange) -> Self {
        VisibleRange::Time {
            from: range.from,
            to: range.to,
        }
    }
}

/// Visible logical bar-index interval
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, derive_more::Constructor)]
pub struct LogicalRange {
    pub from: f64,
    pub to: f64,
}

/// Visible range notification from the chart.
///
/// The time range is unavailable while the chart is mid-transition, in which case only the
/// logical range is reported.
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ViewportChange {
    #[serde(default)]
    pub time: Option<TimeRange>,
    #[serde(default)]
    pub logical: Option<LogicalRange>,
}

impl ViewportChange {
    pub fn time(from: i64, to: i64) -> Self {
        Self {
            time: Some(TimeRange::new(from, to)),
            logical: None,
        }
    }

    pub fn logical(from: f64, to: f64) -> Self {
        Self {
            time: None,
            logical: Some(LogicalRange::new(from, to)),
        }
    }

    /// Profile range for this change: timestamps preferred, logical indices as fallback.
    pub fn resolve(&self) -> Option<VisibleRange> {
        match (self.time, self.logical) {
            (Some(time), _) => Some(time.into()),
            (None, Some(logical)) => Some(VisibleRange::Logical {
                from: logical.from,
                to: logical.to,
            }),
            (None, None) => None,
        }
    }
}

/// Follow/browse thresholds
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ViewportRules {
    /// Right edge lag (seconds) beyond which following stops
    pub max_gap_secs: i64,
    /// Minimum follow width in candle steps when the current width is degenerate
    pub min_width_steps: i64,
}

impl Default for ViewportRules {
    fn default() -> Self {
        Self::from(&OverlayConfig::default())
    }
}

impl From<&OverlayConfig> for ViewportRules {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            max_gap_secs: config.follow_max_gap_secs,
            min_width_steps: config.follow_min_width_steps,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewportController {
    rules: ViewportRules,
    mode: ViewportMode,
    visible: Option<TimeRange>,
}

impl ViewportController {
    pub fn new(rules: ViewportRules) -> Self {
        Self {
            rules,
            mode: ViewportMode::Following,
            visible: None,
        }
    }

    pub fn mode(&self) -> ViewportMode {
        self.mode
    }

    pub fn visible(&self) -> Option<TimeRange> {
        self.visible
    }

    /// Start following a fresh dataset (symbol/timeframe switch).
    ///
    /// Returns the initial visible range: the most recent candles of the timeframe's follow
    /// window, or `None` when the dataset is empty.
    pub fn reset(&mut self, store: &CandleStore) -> Option<TimeRange> {
        self.mode = ViewportMode::Following;

        let candles = store.candles();
        let window = store.timeframe().follow_window().max(1);
        self.visible = match (candles.get(candles.len().saturating_sub(window)), candles.last()) {
            (Some(first), Some(last)) => Some(TimeRange::new(first.time, last.time)),
            _ => None,
        };

        debug!(
            timeframe = %store.timeframe(),
            candles = candles.len(),
            visible = ?self.visible,
            "viewport reset to following"
        );
        self.visible
    }

    /// Record a visible range change and return the profile range it resolves to.
    ///
    /// While following, a right edge lagging the newest candle by more than the configured gap
    /// is taken as manual backward navigation and switches to browsing.
    pub fn on_range_changed(
        &mut self,
        change: &ViewportChange,
        store: &CandleStore,
    ) -> Option<VisibleRange> {
        let visible = match (change.time, change.logical) {
            (Some(time), _) => Some(time),
            (None, Some(logical)) => store
                .time_at_logical(logical.from)
                .zip(store.time_at_logical(logical.to))
                .map(|(from, to)| TimeRange::new(from.min(to), from.max(to))),
            (None, None) => None,
        };

        if let Some(visible) = visible {
            self.visible = Some(visible);

            if let (ViewportMode::Following, Some(latest)) = (self.mode, store.latest_time()) {
                let gap = latest.saturating_sub(visible.to.max(visible.from));
                if gap > self.rules.max_gap_secs {
                    info!(gap, latest, "viewport left live edge, browsing");
                    self.mode = ViewportMode::Browsing;
                }
            }
        }

        change.resolve()
    }

    /// Advance the viewport after a data refresh.
    ///
    /// While following, returns the range to scroll to: the current width ending at the newest
    /// candle, widened to `min_width_steps` candle steps if the width is degenerate. While
    /// browsing, or without data, returns `None`.
    pub fn on_refresh(&mut self, store: &CandleStore) -> Option<TimeRange> {
        if self.mode == ViewportMode::Browsing {
            return None;
        }

        let latest = store.latest_time()?;
        let min_width = self.rules.min_width_steps.max(1).saturating_mul(store.step());

        let width = match self.visible {
            Some(visible) if visible.width() > 0 => visible.width(),
            _ => min_width,
        };

        let next = TimeRange::new(latest.saturating_sub(width), latest);
        self.visible = Some(next);
        Some(next)
    }
}
