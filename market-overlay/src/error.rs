use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `market-overlay`.
///
/// None of these are fatal to a chart view: the worst outcome of any of them is a missing or
/// stale overlay.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum OverlayError {
    #[error("malformed {kind} record: {reason}")]
    MalformedRecord { kind: RecordKind, reason: String },

    #[error("requested range contains no candles")]
    EmptyRange,

    #[error("price scale cannot map {price} to a pixel coordinate")]
    ScaleUnavailable { price: f64 },

    #[error("marker bucket width must be positive, got {0}s")]
    InvalidBucket(i64),

    #[error("indicator period must be positive, got {0}")]
    InvalidPeriod(usize),
}

/// Feed a malformed record originated from.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display,
)]
pub enum RecordKind {
    #[display("candle")]
    Candle,
    #[display("liquidation")]
    Liquidation,
    #[display("cvd")]
    Cvd,
}

impl OverlayError {
    pub fn malformed(kind: RecordKind, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            kind,
            reason: reason.into(),
        }
    }

    /// Determine if the error only affects a single record or frame, so processing of the
    /// remaining input continues unchanged.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_recoverable(&self) -> bool {
        match self {
            OverlayError::MalformedRecord { .. }
            | OverlayError::EmptyRange
            | OverlayError::ScaleUnavailable { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_error_is_recoverable() {
        struct TestCase {
            input: OverlayError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: single malformed record is recoverable
                input: OverlayError::malformed(RecordKind::Candle, "non-finite close"),
                expected: true,
            },
            TestCase {
                // TC1: empty range is recoverable
                input: OverlayError::EmptyRange,
                expected: true,
            },
            TestCase {
                // TC2: scale unavailable only suppresses one frame
                input: OverlayError::ScaleUnavailable { price: 100.0 },
                expected: true,
            },
            TestCase {
                // TC3: invalid bucket fails the whole derivation
                input: OverlayError::InvalidBucket(0),
                expected: false,
            },
            TestCase {
                // TC4: invalid period fails the whole derivation
                input: OverlayError::InvalidPeriod(0),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_recoverable();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_malformed_record_display() {
        let error = OverlayError::malformed(RecordKind::Liquidation, "missing value_usd");
        assert_eq!(
            error.to_string(),
            "malformed liquidation record: missing value_usd"
        );
    }
}
