//! This scenario walks bid recommendations through their lifecycle.
//!
//! A randomized generation pass proposes new max bids, auto-apply takes the small high-confidence
//! ones and a human works through the rest. It validates that:
//! - only running campaigns with delivery history get recommendations
//! - auto-apply never touches large or low-confidence changes
//! - terminal recommendations reject any further apply/reject
//! - concurrent applies of one recommendation have exactly one winner

use chrono::{Duration as DateDuration, Utc};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use nashbid::campaign::{Campaign, CampaignMetric, CampaignStatus, CampaignType};
use nashbid::campaign_store::{CampaignStore, InMemoryCampaignStore};
use nashbid::config::EngineConfig;
use nashbid::logger::{LogEvent, Logger};
use nashbid::logln;
use nashbid::prediction::{EstimatorTrait, FixedEstimator, HeuristicEstimator};
use nashbid::recommendations::{Confidence, InMemoryRecommendationStore, OptimizationStatus, RecommendationStore};
use nashbid::scheduler::{is_small_change, optimization_reason, OptimizationScheduler};
use nashbid::utils::get_seed;

use crate::scenarios::Validations;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "recommendation_lifecycle",
    run,
});

const CONCURRENT_APPLIERS: usize = 4;

fn with_history(campaign: Campaign, days: i64) -> Campaign {
    let today = Utc::now().date_naive();
    (0..days).fold(campaign, |campaign, d| campaign.with_metric(CampaignMetric::new(today - DateDuration::days(d))))
}

fn prepare_campaigns() -> InMemoryCampaignStore {
    let store = InMemoryCampaignStore::new();
    store.insert(with_history(Campaign::new(1, "Tech Gadget Promotion", CampaignType::CPC, 1000.0, 0.10, 2.00), 5));
    store.insert(with_history(Campaign::new(2, "Spring Sale Conversions", CampaignType::CPA, 1000.0, 0.20, 3.00), 3));
    store.insert(with_history(Campaign::new(3, "Brand Awareness", CampaignType::CPM, 1000.0, 0.05, 1.00), 1));
    store.insert(with_history(Campaign::new(4, "New Launch", CampaignType::HYBRID, 1000.0, 0.10, 1.50), 0));
    store.insert(with_history(Campaign::new(5, "Holiday Push", CampaignType::HYBRID, 1000.0, 0.10, 2.50), 4).with_status(CampaignStatus::Paused));
    store
}

fn scheduler(
    config: &EngineConfig,
    campaigns: &Arc<InMemoryCampaignStore>,
    recommendations: &Arc<InMemoryRecommendationStore>,
    estimator: Arc<dyn EstimatorTrait>,
    logger: &Arc<Logger>,
) -> Arc<OptimizationScheduler> {
    Arc::new(OptimizationScheduler::new(
        config,
        Arc::clone(campaigns) as Arc<dyn CampaignStore>,
        Arc::clone(recommendations) as Arc<dyn RecommendationStore>,
        estimator,
        Arc::clone(logger),
    ))
}

pub fn run(scenario_name: &str, config: &EngineConfig, logger: &Arc<Logger>) -> Result<(), Box<dyn Error>> {
    logln!(logger, LogEvent::Scenario, "=== Scenario: {} ===", scenario_name);

    let config = EngineConfig { high_confidence_min_records: 3, ..config.clone() };
    let campaigns = Arc::new(prepare_campaigns());
    let recommendations = Arc::new(InMemoryRecommendationStore::new());
    let randomized = scheduler(
        &config,
        &campaigns,
        &recommendations,
        Arc::new(HeuristicEstimator::new_advanced(config.max_bid_change_fraction, get_seed(0x0B7))),
        logger,
    );
    let mut validations = Validations::new(logger);

    // Generation
    let generated = randomized.generate_recommendations();
    let mut targeted: Vec<u64> = generated.iter().map(|o| o.campaign_id).collect();
    targeted.sort_unstable();
    validations.check(targeted == vec![1, 2, 3], format!("Recommendations only for running campaigns with history: {:?}", targeted));

    let fraction = config.max_bid_change_fraction;
    let consistent = generated.iter().all(|o| {
        let ratio = o.optimized_bid / o.previous_bid;
        ratio >= 1.0 - fraction - 0.01
            && ratio <= 1.0 + fraction + 0.01
            && o.reason == optimization_reason(o.previous_bid, o.optimized_bid)
            && o.status == OptimizationStatus::Pending
    });
    validations.check(consistent, "Generated bids stay within the change fraction and carry a matching reason".to_string());

    let confidence_ok = generated
        .iter()
        .all(|o| (o.confidence == Confidence::High) == (o.campaign_id != 3));
    validations.check(confidence_ok, "Confidence is high only with enough delivery history".to_string());

    // Auto-apply
    let applied = randomized.auto_apply();
    let applied_ok = applied.iter().all(|o| {
        let bid_moved = campaigns.get(o.campaign_id).map(|c| c.bids.max) == Some(o.optimized_bid);
        o.confidence == Confidence::High && is_small_change(o, config.auto_apply_max_change) && bid_moved && o.applied_at.is_some()
    });
    validations.check(applied_ok, format!("Auto-applied {} small high-confidence recommendations", applied.len()));

    let left_alone = recommendations
        .list_by_status(OptimizationStatus::Pending)
        .iter()
        .all(|o| o.confidence == Confidence::Low || !is_small_change(o, config.auto_apply_max_change));
    validations.check(left_alone, "Remaining pending recommendations are large or low confidence".to_string());

    // Manual review of a deterministic round
    let manual = scheduler(
        &config,
        &campaigns,
        &recommendations,
        Arc::new(FixedEstimator::new(0.01, 0.1, 0.5).with_bid_change_factor(1.15)),
        logger,
    );
    let round = manual.generate_recommendations();
    validations.check(round.len() == 3, format!("Manual round produced {} recommendations", round.len()));
    validations.check(manual.auto_apply().is_empty(), "15% changes are not auto-applied".to_string());

    if let [first, second, ..] = round.as_slice() {
        manual.reject_recommendation(first.optimization_id)?;
        let conflict = manual.apply_recommendation(first.optimization_id);
        validations.check(
            matches!(&conflict, Err(e) if e.is_conflict()),
            format!("Applying rejected recommendation {} is a conflict", first.optimization_id),
        );

        let id = second.optimization_id;
        let outcomes = std::thread::scope(|s| {
            let handles: Vec<_> = (0..CONCURRENT_APPLIERS).map(|_| s.spawn(|| manual.apply_recommendation(id))).collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        });
        let successes = outcomes.iter().filter(|o| matches!(o, Ok(Ok(_)))).count();
        let conflicts = outcomes.iter().filter(|o| matches!(o, Ok(Err(e)) if e.is_conflict())).count();
        validations.check(
            successes == 1 && conflicts == CONCURRENT_APPLIERS - 1,
            format!("Concurrent applies: {} succeeded, {} conflicted", successes, conflicts),
        );
        let max_bid = campaigns.get(second.campaign_id).map(|c| c.bids.max);
        validations.check(
            max_bid == Some(second.optimized_bid),
            format!("Campaign {} max bid is now {:?}", second.campaign_id, max_bid),
        );
    }

    // Timers
    let before = recommendations.list_all().len();
    let handle = Arc::clone(&randomized).start_with_intervals(Duration::from_millis(20), Duration::from_millis(50));
    std::thread::sleep(Duration::from_millis(150));
    handle.stop();
    let after = recommendations.list_all().len();
    logln!(logger, LogEvent::Scenario, "scheduler timers added {} recommendations", after - before);
    validations.check(after > before, format!("Timer passes generated recommendations: {} -> {}", before, after));

    let terminal_ok = recommendations
        .list_all()
        .iter()
        .all(|o| (o.status == OptimizationStatus::Applied) == o.applied_at.is_some());
    validations.check(terminal_ok, "Only applied recommendations carry an applied timestamp".to_string());

    validations.finish(scenario_name)
}
