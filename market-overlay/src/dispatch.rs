//! Named triggers and the engines each one recomputes.
//!
//! Every input reaching the overlay (data, viewport, toggles, frames) is an [`OverlayEvent`].
//! [`OverlayEvent::recompute_set`] states which engines it touches and
//! [`OverlayEngine::process_event`] runs exactly that set, in pipeline order.

use crate::config::OverlayConfig;
use crate::engine::candles::{Candle, CandleStore};
use crate::engine::markers::{
    LiquidationEvent, Marker, MarkerLayer, MarkerRules, MarkerSources, parse_liquidations,
};
use crate::engine::plotter::{CoordinatePlotter, PocBand, PriceScale};
use crate::engine::profile::{ProfileLayer, VolumeProfile};
use crate::engine::series::{
    CvdPoint, DerivationParams, SeriesKind, SeriesLayer, SeriesSet, normalize_cvd,
};
use crate::engine::viewport::{
    TimeRange, ViewportChange, ViewportController, ViewportMode, ViewportRules,
};
use crate::types::{RawCandle, RawCvdPoint, RawLiquidation, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Toggleable overlays that own computed state
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum Overlay {
    #[display("volume_profile")]
    VolumeProfile,
    #[display("liquidations")]
    Liquidations,
    #[display("fractals")]
    Fractals,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayToggles {
    pub volume_profile: bool,
    pub liquidations: bool,
    pub fractals: bool,
}

impl Default for OverlayToggles {
    fn default() -> Self {
        Self {
            volume_profile: true,
            liquidations: true,
            fractals: true,
        }
    }
}

impl OverlayToggles {
    pub fn is_enabled(&self, overlay: Overlay) -> bool {
        match overlay {
            Overlay::VolumeProfile => self.volume_profile,
            Overlay::Liquidations => self.liquidations,
            Overlay::Fractals => self.fractals,
        }
    }

    pub fn set(&mut self, overlay: Overlay, enabled: bool) {
        match overlay {
            Overlay::VolumeProfile => self.volume_profile = enabled,
            Overlay::Liquidations => self.liquidations = enabled,
            Overlay::Fractals => self.fractals = enabled,
        }
    }

    fn any_markers(&self) -> bool {
        self.liquidations || self.fractals
    }

    fn marker_sources(&self) -> MarkerSources {
        MarkerSources {
            liquidations: self.liquidations,
            fractals: self.fractals,
        }
    }
}

/// Feed payload of a reset or refresh. A `None` auxiliary feed is unchanged on refresh and empty
/// on reset.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FeedBatch {
    #[serde(default)]
    pub candles: Vec<RawCandle>,
    #[serde(default)]
    pub liquidations: Option<Vec<RawLiquidation>>,
    #[serde(default)]
    pub cvd: Option<Vec<RawCvdPoint>>,
}

/// Every trigger the overlay reacts to
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayEvent {
    /// Symbol or timeframe switch
    DatasetReset {
        timeframe: Timeframe,
        #[serde(flatten)]
        batch: FeedBatch,
    },
    /// Upstream poll/push delivered fresh data for the current dataset
    DataRefreshed {
        #[serde(flatten)]
        batch: FeedBatch,
    },
    /// Pan/zoom
    VisibleRangeChanged { change: ViewportChange },
    OverlayToggled { overlay: Overlay, enabled: bool },
    SeriesVisibilityToggled { kind: SeriesKind, visible: bool },
    PriceScaleChanged,
    AnimationFrame,
}

/// Recompute step, declared in pipeline order
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recompute {
    /// Replace the candle snapshot and auxiliary feeds
    Candles,
    Viewport,
    Profile,
    Markers,
    Series,
    /// Push the POC into the plotter and schedule a pixel recompute
    Plotter,
    /// Run the plotter's deferred pixel recompute
    Frame,
}

/// Set of recompute steps, iterated in pipeline order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeSet(BTreeSet<Recompute>);

impl RecomputeSet {
    pub fn contains(&self, step: Recompute) -> bool {
        self.0.contains(&step)
    }

    pub fn iter(&self) -> impl Iterator<Item = Recompute> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Recompute> for RecomputeSet {
    fn from_iter<I: IntoIterator<Item = Recompute>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl OverlayEvent {
    /// Engines this event recomputes under the current toggles.
    pub fn recompute_set(&self, toggles: &OverlayToggles) -> RecomputeSet {
        use Recompute::*;

        let profile = toggles.volume_profile;
        let markers = toggles.any_markers();

        match self {
            OverlayEvent::DatasetReset { .. } | OverlayEvent::DataRefreshed { .. } => [
                Some(Candles),
                Some(Viewport),
                profile.then_some(Profile),
                markers.then_some(Markers),
                Some(Series),
                profile.then_some(Plotter),
            ]
            .into_iter()
            .flatten()
            .collect(),
            OverlayEvent::VisibleRangeChanged { .. } => [
                Some(Viewport),
                profile.then_some(Profile),
                profile.then_some(Plotter),
            ]
            .into_iter()
            .flatten()
            .collect(),
            OverlayEvent::OverlayToggled {
                overlay: Overlay::VolumeProfile,
                ..
            } => [Profile, Plotter].into_iter().collect(),
            OverlayEvent::OverlayToggled { .. } => [Markers].into_iter().collect(),
            OverlayEvent::SeriesVisibilityToggled { .. } => RecomputeSet::default(),
            OverlayEvent::PriceScaleChanged => [Plotter].into_iter().collect(),
            OverlayEvent::AnimationFrame => [Frame].into_iter().collect(),
        }
    }
}

/// Every computed aggregate at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySnapshot {
    pub timeframe: Timeframe,
    pub mode: ViewportMode,
    pub visible_range: Option<TimeRange>,
    pub candle_count: usize,
    pub latest_time: Option<i64>,
    pub toggles: OverlayToggles,
    pub profile: Option<VolumeProfile>,
    pub poc_band: Option<PocBand>,
    pub markers: Arc<[Marker]>,
    pub series: SeriesSet,
}

/// Owner of every engine and the data snapshots they read
#[derive(Debug, Clone)]
pub struct OverlayEngine {
    config: OverlayConfig,
    toggles: OverlayToggles,
    store: CandleStore,
    liquidations: Arc<[LiquidationEvent]>,
    cvd: Arc<[CvdPoint]>,
    viewport: ViewportController,
    profile: ProfileLayer,
    markers: MarkerLayer,
    series: SeriesLayer,
    plotter: CoordinatePlotter,
    scroll_request: Option<TimeRange>,
}

impl Default for OverlayEngine {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl OverlayEngine {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            viewport: ViewportController::new(ViewportRules::from(&config)),
            config,
            toggles: OverlayToggles::default(),
            store: CandleStore::default(),
            liquidations: Arc::from(Vec::new()),
            cvd: Arc::from(Vec::new()),
            profile: ProfileLayer::new(),
            markers: MarkerLayer::new(),
            series: SeriesLayer::new(),
            plotter: CoordinatePlotter::new(),
            scroll_request: None,
        }
    }

    pub fn with_toggles(mut self, toggles: OverlayToggles) -> Self {
        self.toggles = toggles;
        self
    }

    /// Run the recompute set of `event` synchronously and return it.
    ///
    /// Data ingestion always runs first, so no step observes a partially refreshed snapshot.
    pub fn process_event(&mut self, event: &OverlayEvent, scale: &impl PriceScale) -> RecomputeSet {
        let set = event.recompute_set(&self.toggles);

        match event {
            OverlayEvent::OverlayToggled { overlay, enabled } => {
                info!(%overlay, enabled, "overlay toggled");
                self.toggles.set(*overlay, *enabled);
            }
            OverlayEvent::SeriesVisibilityToggled { kind, visible } => {
                self.series.set_visible(*kind, *visible);
            }
            _ => {}
        }

        for step in set.iter() {
            match step {
                Recompute::Candles => self.ingest(event),
                Recompute::Viewport => self.update_viewport(event),
                Recompute::Profile => self.recompute_profile(),
                Recompute::Markers => self.recompute_markers(),
                Recompute::Series => {
                    self.series.refresh(
                        &self.store.candles(),
                        &self.cvd,
                        &DerivationParams::from(&self.config),
                    );
                }
                Recompute::Plotter => {
                    self.plotter.set_poc(self.profile.poc());
                    if matches!(event, OverlayEvent::PriceScaleChanged) {
                        self.plotter.invalidate();
                    }
                }
                Recompute::Frame => {
                    self.plotter.on_frame(scale);
                }
            }
        }

        debug!(steps = ?set, "processed overlay event");
        set
    }

    fn ingest(&mut self, event: &OverlayEvent) {
        let (batch, reset) = match event {
            OverlayEvent::DatasetReset { timeframe, batch } => {
                self.store.reset(*timeframe);
                self.profile.reset();
                (batch, true)
            }
            OverlayEvent::DataRefreshed { batch } => (batch, false),
            _ => return,
        };

        let kept = self.store.replace(&batch.candles);

        match &batch.liquidations {
            Some(raw) => self.liquidations = Arc::from(parse_liquidations(raw)),
            None if reset => self.liquidations = Arc::from(Vec::new()),
            None => {}
        }

        match &batch.cvd {
            Some(raw) => self.cvd = Arc::from(normalize_cvd(raw)),
            None if reset => self.cvd = Arc::from(Vec::new()),
            None => {}
        }

        debug!(
            candles = kept,
            liquidations = self.liquidations.len(),
            cvd = self.cvd.len(),
            reset,
            "ingested feed batch"
        );
    }

    fn update_viewport(&mut self, event: &OverlayEvent) {
        match event {
            OverlayEvent::DatasetReset { .. } => {
                self.scroll_request = self.viewport.reset(&self.store);
                if let Some(range) = self.scroll_request {
                    self.profile.set_range(range.into());
                }
            }
            OverlayEvent::DataRefreshed { .. } => {
                if let Some(range) = self.viewport.on_refresh(&self.store) {
                    self.scroll_request = Some(range);
                    self.profile.set_range(range.into());
                }
            }
            OverlayEvent::VisibleRangeChanged { change } => {
                if let Some(range) = self.viewport.on_range_changed(change, &self.store) {
                    self.profile.set_range(range);
                }
            }
            _ => {}
        }
    }

    fn recompute_profile(&mut self) {
        if self.toggles.volume_profile {
            self.profile.refresh(&self.store.meta(), self.config.profile_bins);
        } else {
            self.profile.clear();
        }
    }

    fn recompute_markers(&mut self) {
        if self.toggles.any_markers() {
            self.markers.refresh(
                &self.store.candles(),
                &self.liquidations,
                &MarkerRules::from(&self.config),
                self.toggles.marker_sources(),
            );
        } else {
            self.markers.clear();
        }
    }

    /// Range the chart should scroll to, consumed once.
    pub fn take_scroll_request(&mut self) -> Option<TimeRange> {
        self.scroll_request.take()
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            timeframe: self.store.timeframe(),
            mode: self.viewport.mode(),
            visible_range: self.viewport.visible(),
            candle_count: self.store.len(),
            latest_time: self.store.latest_time(),
            toggles: self.toggles,
            profile: self.profile.profile().cloned(),
            poc_band: self.plotter.band(),
            markers: self.markers.markers(),
            series: self.series.series().clone(),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn toggles(&self) -> OverlayToggles {
        self.toggles
    }

    pub fn candles(&self) -> Arc<[Candle]> {
        self.store.candles()
    }

    pub fn profile(&self) -> Option<&VolumeProfile> {
        self.profile.profile()
    }

    pub fn markers(&self) -> Arc<[Marker]> {
        self.markers.markers()
    }

    pub fn series(&self) -> &SeriesLayer {
        &self.series
    }

    pub fn poc_band(&self) -> Option<PocBand> {
        self.plotter.band()
    }

    pub fn viewport_mode(&self) -> ViewportMode {
        self.viewport.mode()
    }
}
