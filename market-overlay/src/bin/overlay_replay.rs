//! Overlay Replay
//!
//! Loads a JSON fixture of recorded feeds and viewport events, drives an `OverlayEngine` through
//! them and prints the final overlay snapshot as pretty JSON.
//!
//! Usage: `overlay-replay <fixture.json>` (or set `OVERLAY_FIXTURE`)
//!
//! Fixture layout:
//! ```json
//! {
//!   "timeframe": "1h",
//!   "candles": [{ "timestamp": 1700000000, "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 3 }],
//!   "liquidations": [{ "timestamp": 1700000000, "side": "sell", "price": 1.2, "value_usd": 250000 }],
//!   "cvd": [{ "time": 1700000000, "cvd": 12.5 }],
//!   "events": [{ "type": "visible_range_changed", "change": { "logical": { "from": 0, "to": 50 } } }],
//!   "scale": { "top": 2.5, "bottom": 0.0, "height": 600 }
//! }
//! ```

use market_overlay::{
    FeedBatch, LinearPriceScale, OverlayConfig, OverlayEngine, OverlayEvent, RawCandle,
    RawCvdPoint, RawLiquidation, Timeframe, types::decode_lenient,
};
use serde::Deserialize;
use std::error::Error;
use tracing::{info, warn};

/// Default pane height when the fixture carries no scale
const DEFAULT_PANE_HEIGHT: f64 = 600.0;

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    timeframe: Timeframe,
    #[serde(default)]
    candles: serde_json::Value,
    #[serde(default)]
    liquidations: serde_json::Value,
    #[serde(default)]
    cvd: serde_json::Value,
    #[serde(default)]
    events: Vec<serde_json::Value>,
    #[serde(default)]
    scale: Option<LinearPriceScale>,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OVERLAY_FIXTURE").ok())
        .ok_or("usage: overlay-replay <fixture.json> (or set OVERLAY_FIXTURE)")?;

    info!(%path, "loading overlay fixture");
    let fixture: Fixture = serde_json::from_str(&std::fs::read_to_string(&path)?)?;

    let candles: Vec<RawCandle> = decode_lenient(fixture.candles);
    let liquidations: Vec<RawLiquidation> = decode_lenient(fixture.liquidations);
    let cvd: Vec<RawCvdPoint> = decode_lenient(fixture.cvd);
    let scale = fixture.scale.unwrap_or_else(|| fit_scale(&candles));

    info!(
        timeframe = %fixture.timeframe,
        candles = candles.len(),
        liquidations = liquidations.len(),
        cvd = cvd.len(),
        events = fixture.events.len(),
        "fixture decoded"
    );

    let mut engine = OverlayEngine::new(OverlayConfig::global().clone());
    engine.process_event(
        &OverlayEvent::DatasetReset {
            timeframe: fixture.timeframe,
            batch: FeedBatch {
                candles,
                liquidations: Some(liquidations),
                cvd: Some(cvd),
            },
        },
        &scale,
    );

    for (index, value) in fixture.events.into_iter().enumerate() {
        match serde_json::from_value::<OverlayEvent>(value) {
            Ok(event) => {
                let steps = engine.process_event(&event, &scale);
                info!(index, steps = ?steps, "replayed event");
            }
            Err(error) => warn!(index, %error, "skipping undecodable event"),
        }
    }

    // Flush any pixel recompute still waiting for a frame
    engine.process_event(&OverlayEvent::AnimationFrame, &scale);

    let snapshot = engine.snapshot();
    info!(
        mode = %snapshot.mode,
        markers = snapshot.markers.len(),
        profile_rows = snapshot.profile.as_ref().map_or(0, |profile| profile.rows.len()),
        "replay complete"
    );

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Price axis spanning every candle in the fixture.
fn fit_scale(candles: &[RawCandle]) -> LinearPriceScale {
    let (low, high) = candles
        .iter()
        .flat_map(|candle| [&candle.low, &candle.high])
        .filter_map(|price| price.as_ref().and_then(|price| price.finite()))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), price| {
            (low.min(price), high.max(price))
        });

    LinearPriceScale {
        top: high,
        bottom: low,
        height: DEFAULT_PANE_HEIGHT,
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
