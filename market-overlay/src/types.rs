/// Raw feed record types consumed by the overlay engine
///
/// These mirror the JSON payloads served by the dashboard API. Every field is lenient: numbers may
/// arrive as JSON numbers or as numeric strings (SQL `numeric` columns), timestamps as epoch
/// seconds, epoch milliseconds or RFC 3339 text. Validation happens in the engines, one record at
/// a time, so a single bad record never poisons a batch.
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Epoch values at or above this magnitude are interpreted as milliseconds.
const EPOCH_MS_THRESHOLD: f64 = 100_000_000_000.0;

/// Timestamp as delivered by a feed
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    /// Convert to integer epoch seconds, `None` if the value cannot be interpreted.
    pub fn to_unix_seconds(&self) -> Option<i64> {
        match self {
            RawTimestamp::Int(value) => epoch_to_seconds(*value as f64),
            RawTimestamp::Float(value) => epoch_to_seconds(*value),
            RawTimestamp::Text(text) => parse_text_timestamp(text.trim()),
        }
    }
}

impl From<i64> for RawTimestamp {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Epoch seconds, `None` for non-finite values or instants chrono cannot represent.
fn epoch_to_seconds(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let seconds = if value.abs() >= EPOCH_MS_THRESHOLD {
        (value / 1000.0).floor()
    } else {
        value.floor()
    };

    // Reject before the cast, which would saturate to i64::MIN/MAX
    if seconds.abs() >= i64::MAX as f64 {
        return None;
    }
    let seconds = seconds as i64;
    DateTime::from_timestamp(seconds, 0).map(|_| seconds)
}

fn parse_text_timestamp(text: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = text.parse::<f64>() {
        return epoch_to_seconds(value);
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.timestamp());
    }

    // Postgres text output, e.g. "2024-05-01 12:00:00+00"
    if let Ok(time) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(time.timestamp());
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// Numeric field that may be encoded as a JSON number or a string
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeedNumber {
    Num(f64),
    Text(String),
}

impl FeedNumber {
    /// Finite value, `None` for NaN/infinite/unparseable input.
    pub fn finite(&self) -> Option<f64> {
        let value = match self {
            FeedNumber::Num(value) => *value,
            FeedNumber::Text(text) => text.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for FeedNumber {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

/// Boolean flag that may be encoded as `true`/`false`, `0`/`1` or a string
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeedFlag {
    Bool(bool),
    Num(f64),
    Text(String),
}

impl FeedFlag {
    pub fn is_set(&self) -> bool {
        match self {
            FeedFlag::Bool(flag) => *flag,
            FeedFlag::Num(value) => *value != 0.0 && value.is_finite(),
            FeedFlag::Text(text) => matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "t" | "yes"
            ),
        }
    }
}

/// Upstream OHLCV record with optional indicator columns
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawCandle {
    #[serde(alias = "time", alias = "bucket")]
    pub timestamp: Option<RawTimestamp>,
    pub open: Option<FeedNumber>,
    pub high: Option<FeedNumber>,
    pub low: Option<FeedNumber>,
    pub close: Option<FeedNumber>,
    #[serde(default)]
    pub volume: Option<FeedNumber>,
    #[serde(default)]
    pub ma20: Option<FeedNumber>,
    #[serde(default)]
    pub ma60: Option<FeedNumber>,
    #[serde(default)]
    pub ma200: Option<FeedNumber>,
    #[serde(default)]
    pub bb_upper: Option<FeedNumber>,
    #[serde(default)]
    pub bb_lower: Option<FeedNumber>,
    #[serde(default)]
    pub fractal_up: Option<FeedFlag>,
    #[serde(default)]
    pub fractal_down: Option<FeedFlag>,
}

impl RawCandle {
    /// Convenience constructor for a plain OHLCV record.
    pub fn ohlcv(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp: Some(RawTimestamp::Int(time)),
            open: Some(open.into()),
            high: Some(high.into()),
            low: Some(low.into()),
            close: Some(close.into()),
            volume: Some(volume.into()),
            ..Default::default()
        }
    }
}

/// Liquidation feed record
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawLiquidation {
    #[serde(alias = "time")]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub price: Option<FeedNumber>,
    #[serde(default)]
    pub value_usd: Option<FeedNumber>,
}

impl RawLiquidation {
    pub fn new(time: i64, side: &str, price: f64, value_usd: f64) -> Self {
        Self {
            timestamp: Some(RawTimestamp::Int(time)),
            side: Some(side.to_string()),
            price: Some(price.into()),
            value_usd: Some(value_usd.into()),
        }
    }
}

/// Cumulative volume delta feed record (arbitrary absolute baseline)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawCvdPoint {
    #[serde(alias = "timestamp")]
    pub time: Option<RawTimestamp>,
    pub cvd: Option<FeedNumber>,
}

impl RawCvdPoint {
    pub fn new(time: i64, cvd: f64) -> Self {
        Self {
            time: Some(RawTimestamp::Int(time)),
            cvd: Some(cvd.into()),
        }
    }
}

/// Decode a JSON array leniently: entries that fail to deserialize are dropped individually.
pub fn decode_lenient<T>(value: serde_json::Value) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
{
    match value {
        serde_json::Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<T>(entry) {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::debug!(%error, "dropping undecodable feed record");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Chart timeframe
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Default,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    #[display("1m")]
    M1,
    #[serde(rename = "5m")]
    #[display("5m")]
    M5,
    #[serde(rename = "15m")]
    #[display("15m")]
    M15,
    #[serde(rename = "30m")]
    #[display("30m")]
    M30,
    #[default]
    #[serde(rename = "1h")]
    #[display("1h")]
    H1,
    #[serde(rename = "4h")]
    #[display("4h")]
    H4,
    #[serde(rename = "1d")]
    #[display("1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Candle step in seconds
    pub fn step_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    /// Number of candles shown when a dataset is first loaded.
    ///
    /// Short timeframes show a few hours, long ones a few weeks/months.
    pub fn follow_window(&self) -> usize {
        match self {
            Timeframe::M1 => 180,
            Timeframe::M5 => 144,
            Timeframe::M15 => 96,
            Timeframe::M30 => 96,
            Timeframe::H1 => 120,
            Timeframe::H4 => 90,
            Timeframe::D1 => 120,
        }
    }
}
