//! Pixel placement of the POC band.
//!
//! Invalidations are cheap flags; the price→pixel conversion runs once on the next animation
//! frame no matter how many invalidations happened in between.

use crate::engine::profile::PocPriceRange;
use crate::error::OverlayError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Live price→pixel mapping of the chart's price axis.
pub trait PriceScale {
    /// Y coordinate of `price` in pixels, `None` while the scale cannot map it.
    fn price_to_coordinate(&self, price: f64) -> Option<f64>;
}

impl<F> PriceScale for F
where
    F: Fn(f64) -> Option<f64>,
{
    fn price_to_coordinate(&self, price: f64) -> Option<f64> {
        self(price)
    }
}

/// Linear price axis spanning a pane of `height` pixels, `top` price at y = 0
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LinearPriceScale {
    pub top: f64,
    pub bottom: f64,
    pub height: f64,
}

impl PriceScale for LinearPriceScale {
    fn price_to_coordinate(&self, price: f64) -> Option<f64> {
        let span = self.top - self.bottom;
        if span == 0.0 || !span.is_finite() || !price.is_finite() {
            return None;
        }
        Some((self.top - price) / span * self.height)
    }
}

/// POC band in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PocBand {
    pub upper_y: f64,
    pub lower_y: f64,
    pub center_y: f64,
}

impl PocBand {
    /// Topmost pixel row of the band.
    pub fn top(&self) -> f64 {
        self.upper_y.min(self.lower_y)
    }

    pub fn height(&self) -> f64 {
        (self.lower_y - self.upper_y).abs()
    }
}

/// Convert every edge of the POC range, failing if any single conversion is unavailable.
pub fn plot_poc_band(
    poc: &PocPriceRange,
    scale: &impl PriceScale,
) -> Result<PocBand, OverlayError> {
    let convert = |price: f64| {
        scale
            .price_to_coordinate(price)
            .filter(|y| y.is_finite())
            .ok_or(OverlayError::ScaleUnavailable { price })
    };

    Ok(PocBand {
        upper_y: convert(poc.upper)?,
        lower_y: convert(poc.lower)?,
        center_y: convert(poc.center)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatePlotter {
    poc: Option<PocPriceRange>,
    band: Option<PocBand>,
    pending: bool,
}

impl CoordinatePlotter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the POC range; invalidates only if it actually changed.
    ///
    /// Clearing the POC drops the band immediately, no frame is needed.
    pub fn set_poc(&mut self, poc: Option<PocPriceRange>) {
        if poc.is_none() {
            self.band = None;
        }
        if self.poc != poc {
            self.poc = poc;
            self.invalidate();
        }
    }

    /// Schedule a recompute on the next frame (timeframe or price scale changed).
    pub fn invalidate(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Run the deferred recompute, if one is pending.
    ///
    /// Returns `true` if a recompute ran. A band that cannot be fully converted is suppressed
    /// until the next invalidation.
    pub fn on_frame(&mut self, scale: &impl PriceScale) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;

        self.band = match &self.poc {
            None => None,
            Some(poc) => match plot_poc_band(poc, scale) {
                Ok(band) => Some(band),
                Err(error) => {
                    debug!(%error, "suppressing poc band for this frame");
                    None
                }
            },
        };
        true
    }

    pub fn band(&self) -> Option<PocBand> {
        self.band
    }

    pub fn poc(&self) -> Option<PocPriceRange> {
        self.poc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn poc() -> PocPriceRange {
        PocPriceRange {
            lower: 100.0,
            upper: 110.0,
            center: 105.0,
        }
    }

    /// 10 px per price unit, price 200 at the top of the pane
    fn linear(price: f64) -> Option<f64> {
        Some((200.0 - price) * 10.0)
    }

    #[test]
    fn test_plot_poc_band() {
        let band = plot_poc_band(&poc(), &linear).unwrap();
        assert_eq!(band.upper_y, 900.0);
        assert_eq!(band.lower_y, 1000.0);
        assert_eq!(band.center_y, 950.0);
        assert_eq!(band.top(), 900.0);
        assert_eq!(band.height(), 100.0);
    }

    #[test]
    fn test_linear_price_scale() {
        let scale = LinearPriceScale {
            top: 200.0,
            bottom: 100.0,
            height: 500.0,
        };
        assert_eq!(scale.price_to_coordinate(200.0), Some(0.0));
        assert_eq!(scale.price_to_coordinate(150.0), Some(250.0));
        assert_eq!(scale.price_to_coordinate(100.0), Some(500.0));
        assert_eq!(scale.price_to_coordinate(f64::NAN), None);

        let collapsed = LinearPriceScale {
            bottom: 200.0,
            ..scale
        };
        assert_eq!(collapsed.price_to_coordinate(150.0), None);
    }

    #[test]
    fn test_partial_conversion_suppresses_band() {
        struct TestCase {
            unavailable: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: upper edge off-scale
                unavailable: 110.0,
            },
            TestCase {
                // TC1: lower edge off-scale
                unavailable: 100.0,
            },
            TestCase {
                // TC2: center off-scale
                unavailable: 105.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let scale = |price: f64| (price != test.unavailable).then(|| linear(price)).flatten();
            let actual = plot_poc_band(&poc(), &scale);
            assert_eq!(
                actual,
                Err(OverlayError::ScaleUnavailable {
                    price: test.unavailable
                }),
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_invalidations_batched_into_one_frame() {
        let calls = Cell::new(0);
        let scale = |price: f64| {
            calls.set(calls.get() + 1);
            linear(price)
        };

        let mut plotter = CoordinatePlotter::new();
        plotter.set_poc(Some(poc()));
        plotter.invalidate();
        plotter.invalidate();
        assert!(plotter.is_pending());
        assert!(plotter.band().is_none());

        assert!(plotter.on_frame(&scale));
        assert_eq!(calls.get(), 3);
        assert!(plotter.band().is_some());

        // Nothing pending, nothing recomputed
        assert!(!plotter.on_frame(&scale));
        assert_eq!(calls.get(), 3);

        // Same POC again is not a change
        plotter.set_poc(Some(poc()));
        assert!(!plotter.is_pending());
    }

    #[test]
    fn test_unavailable_scale_retries_on_next_invalidation() {
        let mut plotter = CoordinatePlotter::new();
        plotter.set_poc(Some(poc()));

        plotter.on_frame(&|_: f64| None::<f64>);
        assert!(plotter.band().is_none());
        assert!(!plotter.is_pending());

        plotter.invalidate();
        plotter.on_frame(&linear);
        assert_eq!(plotter.band().map(|band| band.center_y), Some(950.0));
    }

    #[test]
    fn test_cleared_poc_removes_band() {
        let mut plotter = CoordinatePlotter::new();
        plotter.set_poc(Some(poc()));
        plotter.on_frame(&linear);
        assert!(plotter.band().is_some());

        // Band is gone before any frame runs
        plotter.set_poc(None);
        assert!(plotter.band().is_none());
        assert!(plotter.poc().is_none());

        plotter.on_frame(&linear);
        assert!(plotter.band().is_none());
    }
}
