//! Scoped ownership of a chart surface.
//!
//! An [`OverlaySession`] acquires a [`ChartSurface`] when created, pushes every changed engine
//! output into it while alive, and releases it when dropped.

use crate::chart::{ChartSurface, SeriesData, SeriesOptions, SeriesTarget};
use crate::config::OverlayConfig;
use crate::dispatch::{OverlayEngine, OverlayEvent, OverlaySnapshot, Recompute, RecomputeSet};
use crate::engine::series::{IndicatorLine, SeriesKind};
use tracing::debug;

/// Every overlay series the session drives
const OVERLAY_SERIES: [SeriesKind; 7] = [
    SeriesKind::Volume,
    SeriesKind::Cvd,
    SeriesKind::Line(IndicatorLine::Ma20),
    SeriesKind::Line(IndicatorLine::Ma60),
    SeriesKind::Line(IndicatorLine::Ma200),
    SeriesKind::Line(IndicatorLine::BbUpper),
    SeriesKind::Line(IndicatorLine::BbLower),
];

#[derive(Debug)]
pub struct OverlaySession<S: ChartSurface> {
    engine: OverlayEngine,
    surface: S,
}

impl<S: ChartSurface> OverlaySession<S> {
    /// Take ownership of `surface` and apply the initial series options.
    pub fn new(mut surface: S, engine: OverlayEngine) -> Self {
        for kind in OVERLAY_SERIES {
            surface.apply_options(kind.into(), SeriesOptions::initial(kind));
        }
        debug!("overlay session acquired chart surface");
        Self { engine, surface }
    }

    pub fn with_config(surface: S, config: OverlayConfig) -> Self {
        Self::new(surface, OverlayEngine::new(config))
    }

    /// Process `event` and push whatever it recomputed into the surface.
    pub fn handle(&mut self, event: &OverlayEvent) -> RecomputeSet {
        let set = self.engine.process_event(event, &self.surface);

        if let OverlayEvent::SeriesVisibilityToggled { kind, visible } = event {
            self.surface
                .apply_options((*kind).into(), SeriesOptions::visibility(*visible));
        }

        for step in set.iter() {
            self.push(step);
        }
        set
    }

    fn push(&mut self, step: Recompute) {
        match step {
            Recompute::Candles => {
                let candles = self.engine.candles();
                self.surface
                    .set_data(SeriesTarget::Candles, SeriesData::Candles(&candles));
            }
            Recompute::Viewport => {
                if let Some(range) = self.engine.take_scroll_request() {
                    self.surface.set_visible_range(range);
                }
            }
            Recompute::Profile => {
                self.surface.set_volume_profile(self.engine.profile());
            }
            Recompute::Markers => {
                self.surface.set_markers(&self.engine.markers());
            }
            Recompute::Series => {
                let series = self.engine.series().series();
                for kind in OVERLAY_SERIES {
                    let data = match kind {
                        SeriesKind::Volume => SeriesData::Histogram(&series.volume),
                        SeriesKind::Cvd => SeriesData::Line(&series.cvd),
                        SeriesKind::Line(line) => SeriesData::Line(series.line(line)),
                    };
                    self.surface.set_data(kind.into(), data);
                }
            }
            // Pixel placement waits for the next frame, clearing does not
            Recompute::Plotter => {
                if self.engine.profile().is_none() {
                    self.surface.set_poc_band(None);
                }
            }
            Recompute::Frame => {
                self.surface.set_poc_band(self.engine.poc_band());
            }
        }
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        self.engine.snapshot()
    }

    pub fn engine(&self) -> &OverlayEngine {
        &self.engine
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: ChartSurface> Drop for OverlaySession<S> {
    fn drop(&mut self) {
        debug!("overlay session releasing chart surface");
        self.surface.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{FeedBatch, Overlay};
    use crate::engine::markers::Marker;
    use crate::engine::plotter::{PocBand, PriceScale};
    use crate::engine::profile::VolumeProfile;
    use crate::engine::viewport::{TimeRange, ViewportChange};
    use crate::types::{RawCandle, RawLiquidation, Timeframe};
    use std::cell::RefCell;
    use std::rc::Rc;

    const HOUR: i64 = 60 * 60;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        SetData(SeriesTarget, usize),
        ApplyOptions(SeriesTarget, bool),
        SetMarkers(usize),
        SetVisibleRange(TimeRange),
        SetVolumeProfile(bool),
        SetPocBand(bool),
        Release,
    }

    #[derive(Debug, Default)]
    struct RecordingSurface {
        calls: Rc<RefCell<Vec<Call>>>,
    }

    impl PriceScale for RecordingSurface {
        fn price_to_coordinate(&self, price: f64) -> Option<f64> {
            Some((200.0 - price) * 5.0)
        }
    }

    impl ChartSurface for RecordingSurface {
        fn set_data(&mut self, target: SeriesTarget, data: SeriesData<'_>) {
            self.calls.borrow_mut().push(Call::SetData(target, data.len()));
        }

        fn apply_options(&mut self, target: SeriesTarget, options: SeriesOptions) {
            self.calls
                .borrow_mut()
                .push(Call::ApplyOptions(target, options.visible));
        }

        fn set_markers(&mut self, markers: &[Marker]) {
            self.calls.borrow_mut().push(Call::SetMarkers(markers.len()));
        }

        fn set_visible_range(&mut self, range: TimeRange) {
            self.calls.borrow_mut().push(Call::SetVisibleRange(range));
        }

        fn set_volume_profile(&mut self, profile: Option<&VolumeProfile>) {
            self.calls
                .borrow_mut()
                .push(Call::SetVolumeProfile(profile.is_some()));
        }

        fn set_poc_band(&mut self, band: Option<PocBand>) {
            self.calls.borrow_mut().push(Call::SetPocBand(band.is_some()));
        }

        fn release(&mut self) {
            self.calls.borrow_mut().push(Call::Release);
        }
    }

    fn session() -> (OverlaySession<RecordingSurface>, Rc<RefCell<Vec<Call>>>) {
        let surface = RecordingSurface::default();
        let calls = Rc::clone(&surface.calls);
        let session = OverlaySession::with_config(surface, OverlayConfig::default());
        calls.borrow_mut().clear();
        (session, calls)
    }

    fn reset_event(count: i64) -> OverlayEvent {
        OverlayEvent::DatasetReset {
            timeframe: Timeframe::H1,
            batch: FeedBatch {
                candles: (0..count)
                    .map(|i| RawCandle::ohlcv(i * HOUR, 100.0, 104.0, 98.0, 102.0, 5.0))
                    .collect(),
                liquidations: Some(vec![RawLiquidation::new(HOUR, "buy", 101.0, 80_000.0)]),
                cvd: None,
            },
        }
    }

    #[test]
    fn test_initial_options_applied_on_acquire() {
        let surface = RecordingSurface::default();
        let calls = Rc::clone(&surface.calls);
        let _session = OverlaySession::with_config(surface, OverlayConfig::default());

        let applied = calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, Call::ApplyOptions(_, true)))
            .count();
        assert_eq!(applied, OVERLAY_SERIES.len());
    }

    #[test]
    fn test_reset_pushes_outputs_in_pipeline_order() {
        let (mut session, calls) = session();
        session.handle(&reset_event(10));

        let calls = calls.borrow();
        assert_eq!(calls[0], Call::SetData(SeriesTarget::Candles, 10));
        assert_eq!(
            calls[1],
            Call::SetVisibleRange(TimeRange::new(0, 9 * HOUR))
        );
        assert_eq!(calls[2], Call::SetVolumeProfile(true));
        assert_eq!(calls[3], Call::SetMarkers(1));
        assert_eq!(
            calls[4],
            Call::SetData(SeriesTarget::Overlay(SeriesKind::Volume), 10)
        );
        assert_eq!(
            calls[5],
            Call::SetData(SeriesTarget::Overlay(SeriesKind::Cvd), 0)
        );
        assert_eq!(calls.len(), 4 + OVERLAY_SERIES.len());
    }

    #[test]
    fn test_poc_band_pushed_on_frame() {
        let (mut session, calls) = session();
        session.handle(&reset_event(10));
        calls.borrow_mut().clear();

        session.handle(&OverlayEvent::AnimationFrame);
        assert_eq!(*calls.borrow(), vec![Call::SetPocBand(true)]);
        assert!(session.snapshot().poc_band.is_some());
    }

    #[test]
    fn test_visibility_toggle_only_applies_options() {
        let (mut session, calls) = session();
        session.handle(&reset_event(10));
        calls.borrow_mut().clear();

        let kind = SeriesKind::Line(IndicatorLine::Ma200);
        session.handle(&OverlayEvent::SeriesVisibilityToggled {
            kind,
            visible: false,
        });
        assert_eq!(
            *calls.borrow(),
            vec![Call::ApplyOptions(SeriesTarget::Overlay(kind), false)]
        );
    }

    #[test]
    fn test_profile_toggle_clears_surface() {
        let (mut session, calls) = session();
        session.handle(&reset_event(10));
        session.handle(&OverlayEvent::AnimationFrame);
        calls.borrow_mut().clear();

        session.handle(&OverlayEvent::OverlayToggled {
            overlay: Overlay::VolumeProfile,
            enabled: false,
        });

        assert_eq!(
            *calls.borrow(),
            vec![Call::SetVolumeProfile(false), Call::SetPocBand(false)]
        );
        assert!(session.snapshot().poc_band.is_none());
    }

    #[test]
    fn test_pan_does_not_push_scroll() {
        let (mut session, calls) = session();
        session.handle(&reset_event(10));
        calls.borrow_mut().clear();

        session.handle(&OverlayEvent::VisibleRangeChanged {
            change: ViewportChange::time(2 * HOUR, 8 * HOUR),
        });
        assert_eq!(*calls.borrow(), vec![Call::SetVolumeProfile(true)]);
    }

    #[test]
    fn test_surface_released_once_on_drop() {
        let (mut session, calls) = session();
        session.handle(&reset_event(3));
        drop(session);

        let releases = calls
            .borrow()
            .iter()
            .filter(|call| **call == Call::Release)
            .count();
        assert_eq!(releases, 1);
        assert_eq!(calls.borrow().last(), Some(&Call::Release));
    }
}
