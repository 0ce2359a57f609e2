use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

/// Tunable constants of the bidding engine
///
/// Every field has a default, so a configuration file only needs to name the values it overrides.
/// The clearing-price discount and the one-level-away competitor heuristic are modelling
/// simplifications rather than measured quantities, which is why they live here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of discretized bid levels in every payoff matrix
    pub bid_levels: usize,
    /// Weight of a new observation in the payoff matrix moving average
    pub learning_rate: f64,
    /// How many levels away from our own bid the competitor is assumed to have bid
    pub competitor_level_step: usize,
    /// Implied competitor bid = clearing price * discount
    pub clearing_price_discount: f64,
    /// Synthetic observation count given to freshly created competitor profiles
    pub synthetic_prior_observations: u32,
    /// Realized value of a click when updating the payoff matrix
    pub click_value: f64,
    /// Minimum metric records before a campaign gets recommendations
    pub min_metric_records: usize,
    /// Metric records needed for a recommendation to be considered high confidence
    pub high_confidence_min_records: usize,
    /// Simulated re-optimization moves the bid by at most this fraction either way
    pub max_bid_change_fraction: f64,
    /// Largest relative bid change that may be applied without a human
    pub auto_apply_max_change: f64,
    /// Expected performance delta per unit of relative bid increase
    pub raise_upside_weight: f64,
    /// Expected performance delta per unit of relative bid decrease
    pub lower_upside_weight: f64,
    pub generation_interval_secs: u64,
    pub auto_apply_interval_secs: u64,
    /// Responses idle for longer than this no longer accept outcome notifications
    pub response_retention_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bid_levels: 10,
            learning_rate: 0.1,
            competitor_level_step: 1,
            clearing_price_discount: 0.9,
            synthetic_prior_observations: 10,
            click_value: 1.0,
            min_metric_records: 1,
            high_confidence_min_records: 1,
            max_bid_change_fraction: 0.2,
            auto_apply_max_change: 0.05,
            raise_upside_weight: 50.0,
            lower_upside_weight: 25.0,
            generation_interval_secs: 3600,
            auto_apply_interval_secs: 86400,
            response_retention_secs: 86400,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bid_levels < 2 {
            return Err(EngineError::InvalidConfig(format!("bid_levels must be at least 2, got {}", self.bid_levels)));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EngineError::InvalidConfig(format!("learning_rate must be in (0, 1], got {}", self.learning_rate)));
        }
        if self.competitor_level_step >= self.bid_levels {
            return Err(EngineError::InvalidConfig("competitor_level_step must be below bid_levels".to_string()));
        }
        if !(self.clearing_price_discount > 0.0 && self.clearing_price_discount <= 1.0) {
            return Err(EngineError::InvalidConfig(format!("clearing_price_discount must be in (0, 1], got {}", self.clearing_price_discount)));
        }
        if !(0.0..1.0).contains(&self.max_bid_change_fraction) {
            return Err(EngineError::InvalidConfig(format!("max_bid_change_fraction must be in [0, 1), got {}", self.max_bid_change_fraction)));
        }
        if self.auto_apply_max_change < 0.0 {
            return Err(EngineError::InvalidConfig("auto_apply_max_change must not be negative".to_string()));
        }
        if self.generation_interval_secs == 0 || self.auto_apply_interval_secs == 0 {
            return Err(EngineError::InvalidConfig("scheduler intervals must be positive".to_string()));
        }
        if self.response_retention_secs == 0 {
            return Err(EngineError::InvalidConfig("response_retention_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn generation_interval(&self) -> Duration {
        Duration::from_secs(self.generation_interval_secs)
    }

    pub fn auto_apply_interval(&self) -> Duration {
        Duration::from_secs(self.auto_apply_interval_secs)
    }

    pub fn response_retention(&self) -> Duration {
        Duration::from_secs(self.response_retention_secs)
    }

    /// Responses last active at or before this instant can be purged
    pub fn response_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.response_retention())
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
