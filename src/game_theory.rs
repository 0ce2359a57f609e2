use std::collections::HashMap;
use std::sync::Arc;

use crate::auction::{AuctionRequest, AuctionResponse};
use crate::campaign::Campaign;
use crate::competitors::{Archetype, CompetitorSnapshot};
use crate::config::EngineConfig;
use crate::logger::Logger;
use crate::payoff_matrix::Equilibrium;
use crate::prediction::Prediction;

/// Game-theoretic bidding strategies
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameTheoryType {
    NASH_EQUILIBRIUM,
    STACKELBERG,
    BAYESIAN,
    REINFORCEMENT_LEARNING,
    MULTI_AGENT_LEARNING,
}

impl GameTheoryType {
    pub fn name(&self) -> &'static str {
        match self {
            GameTheoryType::NASH_EQUILIBRIUM => "NASH_EQUILIBRIUM",
            GameTheoryType::STACKELBERG => "STACKELBERG",
            GameTheoryType::BAYESIAN => "BAYESIAN",
            GameTheoryType::REINFORCEMENT_LEARNING => "REINFORCEMENT_LEARNING",
            GameTheoryType::MULTI_AGENT_LEARNING => "MULTI_AGENT_LEARNING",
        }
    }
}

/// Everything a model sees when pricing one request for one campaign
pub struct BidContext<'a> {
    pub request: &'a AuctionRequest,
    pub campaign: &'a Campaign,
    pub competitors: &'a CompetitorSnapshot,
    pub prediction: &'a Prediction,
}

impl BidContext<'_> {
    /// Archetypes present in the snapshot, in a stable order
    pub fn competitor_set(&self) -> Vec<Archetype> {
        self.competitors.keys().copied().collect()
    }
}

pub trait GameTheoryModelTrait: Send + Sync {
    fn model_type(&self) -> GameTheoryType;

    /// Bid price within the campaign's bounds and at least the slot floor
    fn calculate_optimal_bid(&self, context: &BidContext) -> f64;

    /// Expected value of the impression minus the bid
    fn calculate_utility(&self, context: &BidContext, bid: f64) -> f64;

    /// Learn from a resolved auction this model priced
    fn update_model(&self, response: &AuctionResponse);

    /// Current equilibrium for a campaign facing the given competitors
    fn equilibrium(&self, campaign_id: u64, competitors: &[Archetype]) -> Equilibrium;
}

pub type ModelBuildFn = fn(config: &EngineConfig, logger: Arc<Logger>) -> Box<dyn GameTheoryModelTrait>;

/// Entry in the model catalog
pub struct ModelEntry {
    pub model_type: GameTheoryType,
    pub build: ModelBuildFn,
}

inventory::collect!(ModelEntry);

/// Models resolved once at startup, looked up by type
pub struct ModelRegistry {
    models: HashMap<GameTheoryType, Box<dyn GameTheoryModelTrait>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self { models: HashMap::new() }
    }

    /// Build every model registered in the catalog
    pub fn from_catalog(config: &EngineConfig, logger: Arc<Logger>) -> Self {
        let mut registry = Self::new();
        for entry in inventory::iter::<ModelEntry> {
            registry.register((entry.build)(config, Arc::clone(&logger)));
        }
        registry
    }

    pub fn register(&mut self, model: Box<dyn GameTheoryModelTrait>) {
        self.models.insert(model.model_type(), model);
    }

    pub fn get(&self, model_type: GameTheoryType) -> Option<&dyn GameTheoryModelTrait> {
        self.models.get(&model_type).map(|model| model.as_ref())
    }

    pub fn contains(&self, model_type: GameTheoryType) -> bool {
        self.models.contains_key(&model_type)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Which model prices this request
/// Every request goes to the Nash equilibrium bidder for now; this is the place to route by features
pub fn select_model_type(_request: &AuctionRequest, _campaign: &Campaign) -> GameTheoryType {
    GameTheoryType::NASH_EQUILIBRIUM
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignType;

    #[test]
    fn test_catalog_contains_nash() {
        let registry = ModelRegistry::from_catalog(&EngineConfig::default(), Arc::new(Logger::new()));
        assert!(registry.contains(GameTheoryType::NASH_EQUILIBRIUM));
        assert!(!registry.contains(GameTheoryType::STACKELBERG));
        let model = registry.get(GameTheoryType::NASH_EQUILIBRIUM).unwrap();
        assert_eq!(model.model_type(), GameTheoryType::NASH_EQUILIBRIUM);
    }

    #[test]
    fn test_selection_is_nash() {
        let request = AuctionRequest::new("r", "slot", 300, 250, 0.1);
        let campaign = Campaign::new(1, "c", CampaignType::HYBRID, 10.0, 0.1, 1.0);
        assert_eq!(select_model_type(&request, &campaign), GameTheoryType::NASH_EQUILIBRIUM);
    }
}
