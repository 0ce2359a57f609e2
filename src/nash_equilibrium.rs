use dashmap::DashMap;
use std::sync::Arc;

use crate::auction::AuctionResponse;
use crate::campaign::Campaign;
use crate::competitors::Archetype;
use crate::config::EngineConfig;
use crate::game_theory::{BidContext, GameTheoryModelTrait, GameTheoryType, ModelEntry};
use crate::logger::{LogEvent, Logger};
use crate::logln;
use crate::payoff_matrix::{Equilibrium, EquilibriumSource, PayoffMatrix};
use crate::utils::round_money;

inventory::submit!(ModelEntry {
    model_type: GameTheoryType::NASH_EQUILIBRIUM,
    build: build_model,
});

fn build_model(config: &EngineConfig, logger: Arc<Logger>) -> Box<dyn GameTheoryModelTrait> {
    Box::new(NashEquilibriumModel::new_advanced(config, logger))
}

/// One payoff matrix per campaign and set of competitor archetypes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixKey {
    pub campaign_id: u64,
    pub competitors: Vec<Archetype>,
}

impl MatrixKey {
    pub fn new(campaign_id: u64, competitors: &[Archetype]) -> Self {
        let mut competitors = competitors.to_vec();
        competitors.sort();
        competitors.dedup();
        Self { campaign_id, competitors }
    }
}

/// Bid from an equilibrium's expected level
///
/// level * max bid, scaled up by the user value, clamped into the campaign bounds, raised to the
/// slot floor and rounded half-up to cents once. Rounding may not push the bid out of bounds.
pub fn bid_from_expected_level(expected_level: f64, user_value: f64, campaign: &Campaign, slot_floor: f64) -> f64 {
    let max_bid = campaign.bids.max;
    let raw = expected_level * max_bid;
    let adjusted = raw * (1.0 + user_value.max(0.0));
    let bounded = adjusted.min(max_bid).max(campaign.bids.floor).max(slot_floor);
    round_money(bounded).min(max_bid).max(campaign.bids.floor).max(slot_floor)
}

/// Bidder treating every auction as a symmetric zero-sum game against the competitor set
pub struct NashEquilibriumModel {
    matrices: DashMap<MatrixKey, PayoffMatrix>,
    bid_levels: usize,
    learning_rate: f64,
    competitor_level_step: usize,
    click_value: f64,
    logger: Arc<Logger>,
}

impl NashEquilibriumModel {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self::new_advanced(&EngineConfig::default(), logger)
    }

    pub fn new_advanced(config: &EngineConfig, logger: Arc<Logger>) -> Self {
        Self {
            matrices: DashMap::new(),
            bid_levels: config.bid_levels,
            learning_rate: config.learning_rate,
            competitor_level_step: config.competitor_level_step,
            click_value: config.click_value,
            logger,
        }
    }

    /// Snapshot of a matrix, if it was created already
    pub fn matrix(&self, key: &MatrixKey) -> Option<PayoffMatrix> {
        self.matrices.get(key).map(|entry| entry.clone())
    }

    pub fn matrix_count(&self) -> usize {
        self.matrices.len()
    }

    fn solve(&self, key: MatrixKey) -> Equilibrium {
        // Copy out so the shard lock is not held during the solve
        let matrix = self
            .matrices
            .entry(key.clone())
            .or_insert_with(|| PayoffMatrix::prior(self.bid_levels))
            .clone();
        let equilibrium = matrix.solve_equilibrium();
        if equilibrium.source == EquilibriumSource::Fallback {
            logln!(
                self.logger,
                LogEvent::Model,
                "equilibrium solve failed for campaign {} vs {:?}, using fallback distribution",
                key.campaign_id,
                key.competitors
            );
        }
        equilibrium
    }

    /// Realized value of a won impression minus what it cost
    fn realized_utility(&self, response: &AuctionResponse, objective_weight: f64) -> f64 {
        if !response.flags.won {
            return 0.0;
        }
        let mut value = 0.0;
        if response.flags.clicked {
            value += self.click_value;
            if response.flags.converted {
                value += objective_weight;
            }
        }
        value - response.charged_price()
    }
}

impl GameTheoryModelTrait for NashEquilibriumModel {
    fn model_type(&self) -> GameTheoryType {
        GameTheoryType::NASH_EQUILIBRIUM
    }

    fn calculate_optimal_bid(&self, context: &BidContext) -> f64 {
        let key = MatrixKey::new(context.campaign.campaign_id, &context.competitor_set());
        let equilibrium = self.solve(key);
        bid_from_expected_level(
            equilibrium.expected_level(),
            context.prediction.user_value,
            context.campaign,
            context.request.floor_price,
        )
    }

    fn calculate_utility(&self, context: &BidContext, bid: f64) -> f64 {
        let ctr = context.prediction.ctr;
        let cvr = context.prediction.cvr;
        ctr + context.campaign.campaign_type.objective_weight() * ctr * cvr - bid
    }

    fn update_model(&self, response: &AuctionResponse) {
        let attribution = match &response.attribution {
            Some(attribution) => attribution,
            None => return,
        };
        let key = MatrixKey::new(attribution.campaign_id, &attribution.competitor_set);
        let utility = self.realized_utility(response, attribution.campaign_type.objective_weight());

        let mut matrix = self
            .matrices
            .entry(key)
            .or_insert_with(|| PayoffMatrix::prior(self.bid_levels));
        let top = matrix.levels() - 1;
        let own_level = matrix.level_index(response.bid_price, attribution.max_bid_price);
        // Winning means the competitor bid lower, losing means higher
        let competitor_level = if response.flags.won {
            own_level.saturating_sub(self.competitor_level_step)
        } else {
            (own_level + self.competitor_level_step).min(top)
        };
        matrix.update(own_level, competitor_level, utility, self.learning_rate);
        let cell = matrix.get(own_level, competitor_level);
        drop(matrix);

        logln!(
            self.logger,
            LogEvent::Model,
            "payoff update campaign {}: cell ({}, {}) -> {:.4} (utility {:.4})",
            attribution.campaign_id,
            own_level,
            competitor_level,
            cell,
            utility
        );
    }

    fn equilibrium(&self, campaign_id: u64, competitors: &[Archetype]) -> Equilibrium {
        self.solve(MatrixKey::new(campaign_id, competitors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::{AuctionOutcome, AuctionRequest, BidStatus, ModelAttribution};
    use crate::campaign::{CampaignType, Creative};
    use crate::competitors::CompetitorSnapshot;
    use crate::logger::MemoryReceiver;
    use crate::prediction::{Prediction, WinCurve};
    use chrono::Utc;

    fn campaign() -> Campaign {
        Campaign::new(7, "Tech Gadget Promotion", CampaignType::CPC, 1000.0, 0.10, 2.00).with_creative(Creative::new(1, 300, 250))
    }

    fn prediction(user_value: f64) -> Prediction {
        Prediction { ctr: 0.02, cvr: 0.1, user_value, win_curve: WinCurve::for_floor(0.15) }
    }

    fn attributed_response(bid_price: f64, outcome: AuctionOutcome) -> AuctionResponse {
        let request = AuctionRequest::new("req", "slot", 300, 250, 0.15);
        let mut response = AuctionResponse::no_bid(request, 7, Utc::now());
        response.creative_id = Some(1);
        response.bid_price = bid_price;
        response.status = BidStatus::SENT;
        response.attribution = Some(ModelAttribution {
            model_type: GameTheoryType::NASH_EQUILIBRIUM,
            utility_score: 0.0,
            campaign_id: 7,
            campaign_type: CampaignType::CPA,
            max_bid_price: 2.0,
            competitor_set: vec![Archetype::Aggressive, Archetype::Conservative],
            predicted_ctr: 0.02,
            predicted_cvr: 0.1,
        });
        response.apply_outcome(&outcome, Utc::now());
        response
    }

    #[test]
    fn test_bid_from_expected_level() {
        // 0.6 * 2.00 = 1.20, user value 0.2 -> 1.44, inside [0.10, 2.00] and above 0.15
        assert_eq!(bid_from_expected_level(0.6, 0.2, &campaign(), 0.15), 1.44);
    }

    #[test]
    fn test_bid_bounds() {
        let campaign = campaign();
        assert_eq!(bid_from_expected_level(1.0, 3.0, &campaign, 0.15), 2.00);
        assert_eq!(bid_from_expected_level(0.01, 0.0, &campaign, 0.15), 0.15);
        assert_eq!(bid_from_expected_level(0.01, 0.0, &campaign, 0.05), 0.10);
        // Negative user value never lowers the bid
        assert_eq!(bid_from_expected_level(0.5, -0.5, &campaign, 0.15), 1.00);
    }

    #[test]
    fn test_prior_bid_uses_lowest_level() {
        let model = NashEquilibriumModel::new(Arc::new(Logger::new()));
        let campaign = campaign();
        let request = AuctionRequest::new("req", "slot", 300, 250, 0.15);
        let competitors = CompetitorSnapshot::new();
        let prediction = prediction(0.5);
        let context = BidContext { request: &request, campaign: &campaign, competitors: &competitors, prediction: &prediction };

        // Level 0.1 of 2.00 is 0.20, times 1.5
        assert_eq!(model.calculate_optimal_bid(&context), 0.30);
        assert_eq!(model.matrix_count(), 1);
    }

    #[test]
    fn test_utility() {
        let model = NashEquilibriumModel::new(Arc::new(Logger::new()));
        let campaign = campaign().with_targets(None, None);
        let request = AuctionRequest::new("req", "slot", 300, 250, 0.15);
        let competitors = CompetitorSnapshot::new();
        let prediction = prediction(0.0);
        let context = BidContext { request: &request, campaign: &campaign, competitors: &competitors, prediction: &prediction };
        // 0.02 + 1 * 0.02 * 0.1 - 0.5
        assert!((model.calculate_utility(&context, 0.5) - (-0.478)).abs() < 1e-12);
    }

    #[test]
    fn test_update_on_win_with_conversion() {
        let model = NashEquilibriumModel::new(Arc::new(Logger::new()));
        let response = attributed_response(1.44, AuctionOutcome::won(1.0).with_click().with_conversion());
        model.update_model(&response);

        let key = MatrixKey::new(7, &[Archetype::Conservative, Archetype::Aggressive]);
        let matrix = model.matrix(&key).unwrap();
        // Own level 7, competitor one below; value 1 + 20 (CPA) - 1.0 cost
        let prior = PayoffMatrix::prior(10).get(7, 6);
        let expected = 0.9 * prior + 0.1 * 20.0;
        assert!((matrix.get(7, 6) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_update_on_loss_moves_towards_zero() {
        let model = NashEquilibriumModel::new(Arc::new(Logger::new()));
        let response = attributed_response(2.0, AuctionOutcome::lost());
        model.update_model(&response);

        let key = MatrixKey::new(7, &[Archetype::Aggressive, Archetype::Conservative]);
        let matrix = model.matrix(&key).unwrap();
        // Top level loss: competitor level clamps to the top as well
        assert!((matrix.get(9, 9) - 0.0).abs() < 1e-12);
        assert_eq!(matrix, PayoffMatrix::prior(10));
    }

    #[test]
    fn test_unattributed_response_is_ignored() {
        let model = NashEquilibriumModel::new(Arc::new(Logger::new()));
        let request = AuctionRequest::new("req", "slot", 300, 250, 0.15);
        let response = AuctionResponse::no_bid(request, 7, Utc::now());
        model.update_model(&response);
        assert_eq!(model.matrix_count(), 0);
    }

    #[test]
    fn test_fallback_is_logged() {
        let logger = Arc::new(Logger::new());
        let (receiver, lines) = MemoryReceiver::new(vec![LogEvent::Model]);
        logger.add_receiver(receiver);
        let model = NashEquilibriumModel::new(Arc::clone(&logger));

        let key = MatrixKey::new(1, &[]);
        model.matrices.insert(key, PayoffMatrix::zeros(10));
        let equilibrium = model.equilibrium(1, &[]);
        assert_eq!(equilibrium.source, EquilibriumSource::Fallback);
        assert!(lines.lock().iter().any(|line| line.contains("fallback")));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        const THREADS: i32 = 8;
        const UPDATES: i32 = 100;
        let alpha = 0.005;
        let config = EngineConfig { learning_rate: alpha, ..EngineConfig::default() };
        let model = NashEquilibriumModel::new_advanced(&config, Arc::new(Logger::new()));
        // Won at 1.0 without a click: utility -1.0 into cell (7, 6)
        let response = attributed_response(1.44, AuctionOutcome::won(1.0));
        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..UPDATES {
                        model.update_model(&response);
                    }
                });
            }
        });
        let key = MatrixKey::new(7, &[Archetype::Aggressive, Archetype::Conservative]);
        assert_eq!(model.matrix_count(), 1);

        let ema_after = |n: i32| {
            let keep = (1.0 - alpha).powi(n);
            keep * PayoffMatrix::prior(10).get(7, 6) + (1.0 - keep) * -1.0
        };
        let cell = model.matrix(&key).unwrap().get(7, 6);
        assert!((cell - ema_after(THREADS * UPDATES)).abs() < 1e-9);
        // One missing update would be visible at this tolerance
        assert!((ema_after(THREADS * UPDATES) - ema_after(THREADS * UPDATES - 1)).abs() > 1e-6);
    }
}
