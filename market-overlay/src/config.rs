//! Engine configuration.
//!
//! Every tunable has a compiled default and an optional environment override, so a dashboard
//! operator can retune thresholds without a rebuild.

use std::str::FromStr;
use std::sync::OnceLock;

/// Default number of price bins in the volume profile.
pub const DEFAULT_PROFILE_BINS: usize = 30;

/// Liquidations at or below this notional never produce a marker.
pub const DEFAULT_LIQ_MARKER_MIN_USD: f64 = 5_000.0;

/// Liquidation markers above this notional carry a text label.
pub const DEFAULT_LIQ_LABEL_MIN_USD: f64 = 100_000.0;

/// Right edge lag (chart seconds) after which the viewport stops following live data.
pub const DEFAULT_FOLLOW_MAX_GAP_SECS: i64 = 2 * 60 * 60;

/// Minimum follow window width, in candle steps, when the current width is degenerate.
pub const DEFAULT_FOLLOW_MIN_WIDTH_STEPS: i64 = 20;

/// Overlay engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    /// Number of volume profile bins
    pub profile_bins: usize,
    /// Minimum liquidation notional (exclusive) for a marker
    pub liq_marker_min_usd: f64,
    /// Minimum liquidation notional (exclusive) for a marker label
    pub liq_label_min_usd: f64,
    /// Optional marker time-key width in seconds (None = exact second)
    pub marker_bucket_secs: Option<i64>,
    /// Follow → browse threshold in chart seconds
    pub follow_max_gap_secs: i64,
    /// Degenerate follow window is widened to this many candle steps
    pub follow_min_width_steps: i64,
    /// Derive MA/Bollinger locally when the upstream feed omits them
    pub derive_missing_indicators: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            profile_bins: DEFAULT_PROFILE_BINS,
            liq_marker_min_usd: DEFAULT_LIQ_MARKER_MIN_USD,
            liq_label_min_usd: DEFAULT_LIQ_LABEL_MIN_USD,
            marker_bucket_secs: None,
            follow_max_gap_secs: DEFAULT_FOLLOW_MAX_GAP_SECS,
            follow_min_width_steps: DEFAULT_FOLLOW_MIN_WIDTH_STEPS,
            derive_missing_indicators: false,
        }
    }
}

impl OverlayConfig {
    /// Build a configuration from environment overrides, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `OVERLAY_PROFILE_BINS` | 30 |
    /// | `LIQ_MARKER_MIN_USD` | 5000 |
    /// | `LIQ_LABEL_MIN_USD` | 100000 |
    /// | `MARKER_BUCKET_SECS` | unset |
    /// | `FOLLOW_MAX_GAP_SECS` | 7200 |
    /// | `FOLLOW_MIN_WIDTH_STEPS` | 20 |
    /// | `DERIVE_MISSING_INDICATORS` | false |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            profile_bins: env_or("OVERLAY_PROFILE_BINS", defaults.profile_bins).max(1),
            liq_marker_min_usd: env_or("LIQ_MARKER_MIN_USD", defaults.liq_marker_min_usd),
            liq_label_min_usd: env_or("LIQ_LABEL_MIN_USD", defaults.liq_label_min_usd),
            marker_bucket_secs: env_parse("MARKER_BUCKET_SECS"),
            follow_max_gap_secs: env_or("FOLLOW_MAX_GAP_SECS", defaults.follow_max_gap_secs),
            follow_min_width_steps: env_or(
                "FOLLOW_MIN_WIDTH_STEPS",
                defaults.follow_min_width_steps,
            ),
            derive_missing_indicators: env_or(
                "DERIVE_MISSING_INDICATORS",
                defaults.derive_missing_indicators,
            ),
        }
    }

    /// Process-wide configuration, read from the environment once.
    pub fn global() -> &'static OverlayConfig {
        static CONFIG: OnceLock<OverlayConfig> = OnceLock::new();
        CONFIG.get_or_init(Self::from_env)
    }

    /// Set volume profile bin count (minimum 1)
    pub fn with_profile_bins(mut self, bins: usize) -> Self {
        self.profile_bins = bins.max(1);
        self
    }

    /// Set liquidation marker threshold
    pub fn with_liq_marker_min_usd(mut self, usd: f64) -> Self {
        self.liq_marker_min_usd = usd;
        self
    }

    /// Set liquidation label threshold
    pub fn with_liq_label_min_usd(mut self, usd: f64) -> Self {
        self.liq_label_min_usd = usd;
        self
    }

    /// Set marker time-key width
    pub fn with_marker_bucket_secs(mut self, secs: Option<i64>) -> Self {
        self.marker_bucket_secs = secs;
        self
    }

    /// Set follow → browse threshold
    pub fn with_follow_max_gap_secs(mut self, secs: i64) -> Self {
        self.follow_max_gap_secs = secs;
        self
    }

    /// Set degenerate follow window width
    pub fn with_follow_min_width_steps(mut self, steps: i64) -> Self {
        self.follow_min_width_steps = steps;
        self
    }

    /// Enable local MA/Bollinger derivation
    pub fn with_derive_missing_indicators(mut self, enabled: bool) -> Self {
        self.derive_missing_indicators = enabled;
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_parse(key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OverlayConfig::default();
        assert_eq!(config.profile_bins, 30);
        assert_eq!(config.liq_marker_min_usd, 5_000.0);
        assert_eq!(config.liq_label_min_usd, 100_000.0);
        assert_eq!(config.marker_bucket_secs, None);
        assert_eq!(config.follow_max_gap_secs, 7_200);
        assert_eq!(config.follow_min_width_steps, 20);
        assert!(!config.derive_missing_indicators);
    }

    #[test]
    fn test_builder_clamps_bins() {
        let config = OverlayConfig::default().with_profile_bins(0);
        assert_eq!(config.profile_bins, 1);

        let config = OverlayConfig::default()
            .with_profile_bins(50)
            .with_marker_bucket_secs(Some(60))
            .with_derive_missing_indicators(true);
        assert_eq!(config.profile_bins, 50);
        assert_eq!(config.marker_bucket_secs, Some(60));
        assert!(config.derive_missing_indicators);
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        // Keys are unique to this test so parallel tests never observe them
        assert_eq!(env_parse::<i64>("OVERLAY_TEST_UNSET_KEY"), None);
        assert_eq!(env_or("OVERLAY_TEST_UNSET_KEY", 42usize), 42);
    }
}
