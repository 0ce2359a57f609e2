use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::auction::{AuctionOutcome, AuctionRequest, AuctionResponse, BidStatus, InMemoryResponseStore, ModelAttribution, OutcomeTransition, ResponseStore};
use crate::campaign::{Campaign, CampaignStatus, MetricEvent};
use crate::campaign_store::CampaignStore;
use crate::competitors::CompetitorAnalysis;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::game_theory::{select_model_type, BidContext, ModelRegistry};
use crate::logger::{LogEvent, Logger};
use crate::prediction::{EstimatorTrait, HeuristicEstimator};
use crate::user_profiles::{SyntheticUserProfiles, UserEvent, UserProfileSource};
use crate::utils::VERBOSE_AUCTION;
use crate::{logln, warnln};

/// Why a campaign sits out an auction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    NotActive(CampaignStatus),
    NoBudget,
    NoMatchingCreative,
    /// Campaign bounds leave no valid price for this slot
    FloorAboveMaxBid,
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::NotActive(status) => write!(f, "campaign is {:?}", status),
            Ineligibility::NoBudget => write!(f, "no budget left"),
            Ineligibility::NoMatchingCreative => write!(f, "no active creative fits the slot"),
            Ineligibility::FloorAboveMaxBid => write!(f, "floor is above the max bid"),
        }
    }
}

/// Cheap checks run before any model work; returns the creative to serve
pub fn check_eligibility(request: &AuctionRequest, campaign: &Campaign) -> Result<u64, Ineligibility> {
    if campaign.status != CampaignStatus::Active {
        return Err(Ineligibility::NotActive(campaign.status));
    }
    if !campaign.has_budget() {
        return Err(Ineligibility::NoBudget);
    }
    let creative = campaign
        .matching_creative(request.slot_width, request.slot_height)
        .ok_or(Ineligibility::NoMatchingCreative)?;
    if request.floor_price > campaign.bids.max || campaign.bids.floor > campaign.bids.max {
        return Err(Ineligibility::FloorAboveMaxBid);
    }
    Ok(creative.creative_id)
}

/// Per-request bidding pipeline and the feedback path back into the models
pub struct DecisionEngine {
    registry: ModelRegistry,
    estimator: Arc<dyn EstimatorTrait>,
    competitors: Arc<CompetitorAnalysis>,
    user_profiles: Arc<dyn UserProfileSource>,
    campaigns: Arc<dyn CampaignStore>,
    responses: Arc<dyn ResponseStore>,
    logger: Arc<Logger>,
}

impl DecisionEngine {
    /// Engine with every registered model, heuristic prediction and synthetic user profiles
    pub fn new(config: &EngineConfig, campaigns: Arc<dyn CampaignStore>, logger: Arc<Logger>) -> Self {
        Self::new_advanced(
            ModelRegistry::from_catalog(config, Arc::clone(&logger)),
            Arc::new(HeuristicEstimator::new(config.max_bid_change_fraction)),
            Arc::new(CompetitorAnalysis::new_advanced(Arc::clone(&logger), config.synthetic_prior_observations, config.clearing_price_discount)),
            Arc::new(SyntheticUserProfiles::new()),
            campaigns,
            Arc::new(InMemoryResponseStore::new()),
            logger,
        )
    }

    pub fn new_advanced(
        registry: ModelRegistry,
        estimator: Arc<dyn EstimatorTrait>,
        competitors: Arc<CompetitorAnalysis>,
        user_profiles: Arc<dyn UserProfileSource>,
        campaigns: Arc<dyn CampaignStore>,
        responses: Arc<dyn ResponseStore>,
        logger: Arc<Logger>,
    ) -> Self {
        Self { registry, estimator, competitors, user_profiles, campaigns, responses, logger }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn competitors(&self) -> &CompetitorAnalysis {
        &self.competitors
    }

    pub fn response(&self, response_id: &Uuid) -> Option<AuctionResponse> {
        self.responses.get(response_id)
    }

    /// Price one request for one campaign
    ///
    /// Never fails: an ineligible campaign or an unavailable model yields a zero-price no-bid.
    /// Only real bids are stored for the outcome callbacks; no-bids go straight back.
    pub fn decide(&self, request: AuctionRequest, campaign: &Campaign) -> AuctionResponse {
        let now = Utc::now();
        let response = match check_eligibility(&request, campaign) {
            Ok(creative_id) => self.price(request, campaign, creative_id, now),
            Err(reason) => {
                if VERBOSE_AUCTION.load(Ordering::Relaxed) {
                    logln!(self.logger, LogEvent::Auction, "request {}: campaign {} no-bid, {}", request.request_id, campaign.campaign_id, reason);
                }
                return AuctionResponse::no_bid(request, campaign.campaign_id, now);
            }
        };
        if !response.is_no_bid() {
            self.responses.insert(response.clone());
        }
        response
    }

    /// Forget responses last active at or before `cutoff`; later notifications for them are not found
    pub fn purge_responses(&self, cutoff: DateTime<Utc>) -> usize {
        let purged = self.responses.purge_before(cutoff);
        if purged > 0 {
            logln!(self.logger, LogEvent::Auction, "purged {} responses idle since {}", purged, cutoff);
        }
        purged
    }

    fn price(&self, mut request: AuctionRequest, campaign: &Campaign, creative_id: u64, now: DateTime<Utc>) -> AuctionResponse {
        request.user_profile = self.user_profiles.profile_for(request.cookie_id.as_deref(), request.device_id.as_deref());
        request.competitors = Some(self.competitors.profiles_for(&request, campaign));
        let prediction = self.estimator.predict(&request, campaign);

        let model_type = select_model_type(&request, campaign);
        let model = match self.registry.get(model_type) {
            Some(model) => model,
            None => {
                warnln!(self.logger, LogEvent::Auction, "no {} model registered, request {} gets no bid", model_type.name(), request.request_id);
                return AuctionResponse::no_bid(request, campaign.campaign_id, now);
            }
        };

        let (bid_price, utility_score, competitor_set) = {
            let snapshot = request.competitors.clone().unwrap_or_default();
            let context = BidContext { request: &request, campaign, competitors: &snapshot, prediction: &prediction };
            let bid_price = model.calculate_optimal_bid(&context);
            (bid_price, model.calculate_utility(&context, bid_price), context.competitor_set())
        };

        if VERBOSE_AUCTION.load(Ordering::Relaxed) {
            logln!(
                self.logger,
                LogEvent::Auction,
                "request {}: campaign {} bids {:.2} (floor {:.2}, ctr {:.4}, cvr {:.4}, user value {:.3}, utility {:.4})",
                request.request_id,
                campaign.campaign_id,
                bid_price,
                request.floor_price,
                prediction.ctr,
                prediction.cvr,
                prediction.user_value,
                utility_score
            );
        }

        AuctionResponse {
            response_id: Uuid::new_v4(),
            campaign_id: campaign.campaign_id,
            creative_id: Some(creative_id),
            bid_price,
            clearing_price: None,
            status: BidStatus::SENT,
            flags: Default::default(),
            attribution: Some(ModelAttribution {
                model_type,
                utility_score,
                campaign_id: campaign.campaign_id,
                campaign_type: campaign.campaign_type,
                max_bid_price: campaign.bids.max,
                competitor_set,
                predicted_ctr: prediction.ctr,
                predicted_cvr: prediction.cvr,
            }),
            request,
            created_at: now,
            processed_at: None,
        }
    }

    /// Feed an auction outcome back into the engine
    ///
    /// The first win/loss notification updates the model that priced the response, the
    /// competitor profiles and the campaign budget. Click and conversion flags count once each,
    /// and only once the impression is known to be won.
    /// Outcomes for responses without a model attribution are logged and dropped.
    pub fn record_outcome(&self, response_id: &Uuid, outcome: AuctionOutcome) -> Result<OutcomeTransition, EngineError> {
        let stored = self.responses.get(response_id).ok_or(EngineError::ResponseNotFound(*response_id))?;
        let attribution = match stored.attribution {
            Some(attribution) => attribution,
            None => {
                warnln!(self.logger, LogEvent::Auction, "outcome for unattributed response {} dropped", response_id);
                return Ok(OutcomeTransition::default());
            }
        };

        let now = Utc::now();
        let mut transition = OutcomeTransition::default();
        let updated = self
            .responses
            .update(response_id, &mut |response| transition = response.apply_outcome(&outcome, now))
            .ok_or(EngineError::ResponseNotFound(*response_id))?;

        if transition.resolved {
            match self.registry.get(attribution.model_type) {
                Some(model) => model.update_model(&updated),
                None => warnln!(self.logger, LogEvent::Auction, "model {} of response {} is not registered, feedback dropped", attribution.model_type.name(), response_id),
            }
            if updated.flags.won {
                let price = updated.charged_price();
                self.competitors.observe(&updated.request, price, &attribution.competitor_set);
                self.record_campaign_event(&updated, now, MetricEvent::Impression { spend: price });
            }
        }
        if transition.clicked {
            self.record_campaign_event(&updated, now, MetricEvent::Click);
            self.track_user(&updated, UserEvent::Click);
        }
        if transition.converted {
            self.record_campaign_event(&updated, now, MetricEvent::Conversion);
            self.track_user(&updated, UserEvent::Conversion);
        }

        if VERBOSE_AUCTION.load(Ordering::Relaxed) {
            logln!(self.logger, LogEvent::Auction, "response {}: {:?} {:?}", response_id, updated.status, updated.flags);
        }
        Ok(transition)
    }

    pub fn record_click(&self, response_id: &Uuid) -> Result<OutcomeTransition, EngineError> {
        self.record_outcome(response_id, AuctionOutcome::click())
    }

    pub fn record_conversion(&self, response_id: &Uuid) -> Result<OutcomeTransition, EngineError> {
        self.record_outcome(response_id, AuctionOutcome::conversion())
    }

    fn record_campaign_event(&self, response: &AuctionResponse, now: DateTime<Utc>, event: MetricEvent) {
        if let Err(e) = self.campaigns.record_event(response.campaign_id, now.date_naive(), event) {
            warnln!(self.logger, LogEvent::Auction, "could not record {:?} for response {}: {}", event, response.response_id, e);
        }
    }

    fn track_user(&self, response: &AuctionResponse, event: UserEvent) {
        self.user_profiles
            .track_event(response.request.cookie_id.as_deref(), response.request.device_id.as_deref(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{CampaignType, Creative};
    use crate::campaign_store::InMemoryCampaignStore;
    use crate::competitors::Archetype;
    use crate::logger::MemoryReceiver;
    use crate::prediction::FixedEstimator;
    use crate::user_profiles::NoUserProfiles;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    struct Fixture {
        engine: DecisionEngine,
        campaigns: Arc<InMemoryCampaignStore>,
        responses: Arc<InMemoryResponseStore>,
        log_lines: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    fn fixture(user_value: f64) -> Fixture {
        let logger = Arc::new(Logger::new());
        let (receiver, log_lines) = MemoryReceiver::new(vec![LogEvent::Auction]);
        logger.add_receiver(receiver);

        let campaigns = Arc::new(InMemoryCampaignStore::new());
        campaigns.insert(campaign());
        let responses = Arc::new(InMemoryResponseStore::new());
        let config = EngineConfig::default();
        let engine = DecisionEngine::new_advanced(
            ModelRegistry::from_catalog(&config, Arc::clone(&logger)),
            Arc::new(FixedEstimator::new(0.02, 0.1, user_value)),
            Arc::new(CompetitorAnalysis::new(Arc::clone(&logger))),
            Arc::new(NoUserProfiles),
            Arc::clone(&campaigns) as Arc<dyn CampaignStore>,
            Arc::clone(&responses) as Arc<dyn ResponseStore>,
            logger,
        );
        Fixture { engine, campaigns, responses, log_lines }
    }

    fn campaign() -> Campaign {
        Campaign::new(1, "Tech Gadget Promotion", CampaignType::CPC, 100.0, 0.10, 2.00).with_creative(Creative::new(11, 300, 250))
    }

    fn request(floor: f64) -> AuctionRequest {
        AuctionRequest::new("req", "slot-1", 300, 250, floor).with_cookie("cookie-1")
    }

    #[test]
    fn test_ineligible_campaigns_get_no_bid() {
        let f = fixture(0.0);
        let cases = vec![
            (campaign().with_status(CampaignStatus::Paused), request(0.15)),
            (campaign().with_remaining_budget(0.0), request(0.15)),
            (campaign(), AuctionRequest::new("req", "slot-1", 728, 90, 0.15)),
            (campaign(), request(2.50)),
        ];
        for (campaign, request) in cases {
            let response = f.engine.decide(request, &campaign);
            assert!(response.is_no_bid());
            assert_eq!(response.bid_price, 0.0);
            assert!(response.attribution.is_none());
            assert!(f.engine.response(&response.response_id).is_none());
        }
        assert!(f.responses.is_empty());
    }

    #[test]
    fn test_decide_bids_with_attribution() {
        let f = fixture(0.5);
        let response = f.engine.decide(request(0.15), &campaign());
        assert_eq!(response.creative_id, Some(11));
        assert_eq!(response.status, BidStatus::SENT);
        // Prior equilibrium: level 0.1 of 2.00 scaled by 1.5
        assert_eq!(response.bid_price, 0.30);

        let attribution = response.attribution.as_ref().unwrap();
        assert_eq!(attribution.model_type, crate::game_theory::GameTheoryType::NASH_EQUILIBRIUM);
        assert_eq!(attribution.competitor_set, Archetype::ALL.to_vec());
        assert!((attribution.utility_score - (0.02 + 0.002 - 0.30)).abs() < 1e-12);
        assert!(response.request.competitors.is_some());
        assert!(f.engine.response(&response.response_id).is_some());
    }

    #[test]
    fn test_bids_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..200 {
            let f = fixture(rng.gen_range(-1.0..5.0));
            let campaign = Campaign::new(1, "c", CampaignType::HYBRID, 100.0, rng.gen_range(0.01..0.5), rng.gen_range(0.5..5.0))
                .with_creative(Creative::new(1, 300, 250));
            let request = request(rng.gen_range(0.0..1.0));
            let floor = request.floor_price;
            let response = f.engine.decide(request, &campaign);
            if response.is_no_bid() {
                assert!(floor > campaign.bids.max);
                continue;
            }
            assert!(response.bid_price >= campaign.bids.floor);
            assert!(response.bid_price >= floor);
            assert!(response.bid_price <= campaign.bids.max);
        }
    }

    #[test]
    fn test_win_updates_budget_metrics_and_competitors() {
        let f = fixture(0.0);
        let response = f.engine.decide(request(0.15), &campaign());
        let id = response.response_id;

        let transition = f.engine.record_outcome(&id, AuctionOutcome::won(0.18)).unwrap();
        assert!(transition.resolved);

        let stored = f.campaigns.get(1).unwrap();
        assert!((stored.budget.remaining - 99.82).abs() < 1e-9);
        assert_eq!(stored.metrics[0].impressions, 1);

        let profile = f.engine.competitors().profile(Archetype::Aggressive, "slot-1").unwrap();
        assert_eq!(profile.bid_count, 11);
        assert_eq!(f.engine.response(&id).unwrap().status, BidStatus::WON);
    }

    #[test]
    fn test_repeated_click_counts_once() {
        let f = fixture(0.0);
        let id = f.engine.decide(request(0.15), &campaign()).response_id;
        f.engine.record_outcome(&id, AuctionOutcome::won(0.2)).unwrap();
        assert!(f.engine.record_click(&id).unwrap().clicked);
        assert!(!f.engine.record_click(&id).unwrap().clicked);
        f.engine.record_outcome(&id, AuctionOutcome::won(0.2).with_click()).unwrap();

        let stored = f.campaigns.get(1).unwrap();
        assert_eq!(stored.metrics[0].clicks, 1);
        assert_eq!(stored.metrics[0].impressions, 1);
    }

    #[test]
    fn test_loss_does_not_touch_budget() {
        let f = fixture(0.0);
        let id = f.engine.decide(request(0.15), &campaign()).response_id;
        f.engine.record_outcome(&id, AuctionOutcome::lost()).unwrap();
        let stored = f.campaigns.get(1).unwrap();
        assert_eq!(stored.budget.remaining, 100.0);
        assert!(stored.metrics.is_empty());
    }

    #[test]
    fn test_click_before_win_is_charged_at_clearing_price() {
        let f = fixture(0.5);
        let response = f.engine.decide(request(0.15), &campaign());
        assert_eq!(response.bid_price, 0.30);
        let id = response.response_id;

        let early = f.engine.record_click(&id).unwrap();
        assert_eq!(early, OutcomeTransition::default());
        let stored = f.campaigns.get(1).unwrap();
        assert_eq!(stored.budget.remaining, 100.0);
        assert!(stored.metrics.is_empty());
        // Only the synthetic prior so far
        assert_eq!(f.engine.competitors().profile(Archetype::Aggressive, "slot-1").unwrap().bid_count, 10);

        let win = f.engine.record_outcome(&id, AuctionOutcome::won(0.18)).unwrap();
        assert!(win.resolved && win.clicked);
        let stored = f.campaigns.get(1).unwrap();
        assert!((stored.budget.remaining - 99.82).abs() < 1e-9);
        assert_eq!(stored.metrics[0].impressions, 1);
        assert_eq!(stored.metrics[0].clicks, 1);
        assert_eq!(f.engine.response(&id).unwrap().charged_price(), 0.18);
        assert_eq!(f.engine.competitors().profile(Archetype::Aggressive, "slot-1").unwrap().bid_count, 11);
    }

    #[test]
    fn test_filtered_traffic_is_not_stored() {
        let f = fixture(0.0);
        let paused = campaign().with_status(CampaignStatus::Paused);
        for _ in 0..1000 {
            let response = f.engine.decide(request(0.15), &paused);
            assert!(response.is_no_bid());
        }
        assert!(f.responses.is_empty());

        let err = f.engine.record_outcome(&f.engine.decide(request(0.15), &paused).response_id, AuctionOutcome::won(0.5)).unwrap_err();
        assert!(matches!(err, EngineError::ResponseNotFound(_)));
    }

    #[test]
    fn test_unattributed_feedback_is_logged_and_dropped() {
        let f = fixture(0.0);
        let mut response = AuctionResponse::no_bid(request(0.15), 1, Utc::now());
        response.creative_id = Some(11);
        response.bid_price = 0.5;
        let id = response.response_id;
        f.responses.insert(response);

        let transition = f.engine.record_outcome(&id, AuctionOutcome::won(0.5)).unwrap();
        assert_eq!(transition, OutcomeTransition::default());
        assert_eq!(f.engine.response(&id).unwrap().status, BidStatus::PENDING);
        assert_eq!(f.campaigns.get(1).unwrap().budget.remaining, 100.0);
        assert!(f.log_lines.lock().iter().any(|line| line.contains("unattributed")));
    }

    #[test]
    fn test_purged_responses_no_longer_accept_outcomes() {
        let f = fixture(0.0);
        let id = f.engine.decide(request(0.15), &campaign()).response_id;
        assert_eq!(f.engine.purge_responses(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(f.engine.purge_responses(Utc::now()), 1);
        let err = f.engine.record_outcome(&id, AuctionOutcome::won(0.2)).unwrap_err();
        assert!(matches!(err, EngineError::ResponseNotFound(_)));
    }

    #[test]
    fn test_unknown_response() {
        let f = fixture(0.0);
        let err = f.engine.record_outcome(&Uuid::new_v4(), AuctionOutcome::lost()).unwrap_err();
        assert!(matches!(err, EngineError::ResponseNotFound(_)));
    }

    #[test]
    fn test_parallel_decisions() {
        let f = fixture(0.2);
        let campaign = campaign();
        let ids: Vec<Uuid> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let engine = &f.engine;
                    let campaign = &campaign;
                    s.spawn(move || {
                        (0..50)
                            .map(|i| {
                                let request = AuctionRequest::new(&format!("req-{}-{}", t, i), "slot-1", 300, 250, 0.15);
                                engine.decide(request, campaign).response_id
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(ids.len(), 400);

        std::thread::scope(|s| {
            for chunk in ids.chunks(50) {
                let engine = &f.engine;
                s.spawn(move || {
                    for id in chunk {
                        engine.record_outcome(id, AuctionOutcome::won(0.10)).unwrap();
                    }
                });
            }
        });
        let stored = f.campaigns.get(1).unwrap();
        assert_eq!(stored.metrics[0].impressions, 400);
        assert!((stored.budget.remaining - 60.0).abs() < 1e-6);
    }
}
