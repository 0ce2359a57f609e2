//! This scenario runs a day of traffic from one exchange through the decision engine.
//!
//! Requests are priced in parallel for every campaign; the highest bid is submitted to a simulated
//! second-price auction and the outcome is fed back. It validates that:
//! - every bid respects the campaign's bid bounds and the slot floor
//! - paused campaigns and slots without a fitting creative never get a bid
//! - budget debits and impression counts match the won auctions exactly
//! - competitor profiles learn from the clearing prices
//! - only real bids are kept for outcome callbacks, and all of them expire at the end of the day

use chrono::Utc;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

use nashbid::auction::{AuctionRequest, AuctionResponse, BidStatus};
use nashbid::campaign::{Campaign, CampaignStatus, CampaignType, Creative};
use nashbid::campaign_store::{CampaignStore, InMemoryCampaignStore};
use nashbid::competitors::Archetype;
use nashbid::config::EngineConfig;
use nashbid::decision::DecisionEngine;
use nashbid::exchange::{settle, MarketDraw, SimulatedExchange, SlotSpec};
use nashbid::game_theory::GameTheoryType;
use nashbid::logger::{LogEvent, Logger};
use nashbid::logln;

use crate::scenarios::Validations;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "steady_market",
    run,
});

const REQUESTS: usize = 2000;
const WORKERS: usize = 4;
const CAMPAIGN_IDS: [u64; 4] = [1, 2, 3, 4];
const PAUSED_CAMPAIGN: u64 = 4;
const UNSERVED_SLOT: &str = "footer-banner";

fn prepare_campaigns() -> InMemoryCampaignStore {
    let store = InMemoryCampaignStore::new();
    store.insert(
        Campaign::new(1, "Tech Gadget Promotion", CampaignType::CPC, 500.0, 0.10, 2.00)
            .with_creative(Creative::new(11, 300, 250))
            .with_creative(Creative::new(12, 728, 90)),
    );
    store.insert(
        Campaign::new(2, "Spring Sale Conversions", CampaignType::CPA, 500.0, 0.20, 3.00)
            .with_creative(Creative::new(21, 300, 250))
            .with_targets(Some(0.02), Some(0.15)),
    );
    store.insert(Campaign::new(3, "Brand Awareness", CampaignType::CPM, 500.0, 0.05, 1.00).with_creative(Creative::new(31, 160, 600)));
    store.insert(
        Campaign::new(PAUSED_CAMPAIGN, "Holiday Push", CampaignType::HYBRID, 500.0, 0.10, 2.50)
            .with_creative(Creative::new(41, 300, 250))
            .with_status(CampaignStatus::Paused),
    );
    store
}

fn prepare_slots() -> Vec<SlotSpec> {
    vec![
        SlotSpec::new("homepage-top", 728, 90),
        SlotSpec::new("article-side", 300, 250),
        SlotSpec::new("sidebar-sky", 160, 600),
        SlotSpec::new(UNSERVED_SLOT, 320, 50),
    ]
}

/// Every campaign's response to one request, and which one went to the exchange
struct PricedAuction {
    decisions: Vec<(Campaign, AuctionResponse)>,
    submitted: Option<Uuid>,
}

fn run_auction(
    engine: &DecisionEngine,
    campaigns: &dyn CampaignStore,
    request: &AuctionRequest,
    draw: &MarketDraw,
) -> Result<PricedAuction, Box<dyn Error + Send + Sync>> {
    let decisions: Vec<(Campaign, AuctionResponse)> = CAMPAIGN_IDS
        .iter()
        .filter_map(|&id| campaigns.get(id))
        .map(|campaign| {
            let response = engine.decide(request.clone(), &campaign);
            (campaign, response)
        })
        .collect();

    let best = decisions
        .iter()
        .map(|(_, response)| response)
        .filter(|response| !response.is_no_bid())
        .max_by(|a, b| a.bid_price.total_cmp(&b.bid_price));
    let submitted = match best {
        Some(response) => {
            if let Some(outcome) = settle(response, draw) {
                engine.record_outcome(&response.response_id, outcome)?;
            }
            Some(response.response_id)
        }
        None => None,
    };
    Ok(PricedAuction { decisions, submitted })
}

pub fn run(scenario_name: &str, config: &EngineConfig, logger: &Arc<Logger>) -> Result<(), Box<dyn Error>> {
    logln!(logger, LogEvent::Scenario, "=== Scenario: {} ===", scenario_name);

    let campaigns = Arc::new(prepare_campaigns());
    let engine = DecisionEngine::new(config, Arc::clone(&campaigns) as Arc<dyn CampaignStore>, Arc::clone(logger));
    let mut exchange = SimulatedExchange::new("adx", prepare_slots(), Utc::now())?;
    let auctions = exchange.auctions(REQUESTS);

    let chunk_size = REQUESTS.div_ceil(WORKERS);
    let priced: Vec<PricedAuction> = std::thread::scope(|s| {
        let workers: Vec<_> = auctions
            .chunks(chunk_size)
            .map(|chunk| {
                let engine = &engine;
                let campaigns = campaigns.as_ref();
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|(request, draw)| run_auction(engine, campaigns, request, draw))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();
        let mut priced = Vec::with_capacity(REQUESTS);
        for worker in workers {
            match worker.join() {
                Ok(Ok(mut results)) => priced.append(&mut results),
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => return Err("pricing worker panicked".to_string()),
            }
        }
        Ok(priced)
    })?;

    let submitted: Vec<AuctionResponse> = priced
        .iter()
        .filter_map(|auction| auction.submitted)
        .filter_map(|id| engine.response(&id))
        .collect();
    let won: Vec<&AuctionResponse> = submitted.iter().filter(|r| r.status == BidStatus::WON).collect();
    let lost = submitted.iter().filter(|r| r.status == BidStatus::LOST).count();
    logln!(
        logger,
        LogEvent::Scenario,
        "{} requests, {} submitted bids, {} won, {} lost",
        priced.len(),
        submitted.len(),
        won.len(),
        lost
    );

    let mut validations = Validations::new(logger);

    let out_of_bounds = priced
        .iter()
        .flat_map(|auction| auction.decisions.iter())
        .filter(|(campaign, response)| {
            !response.is_no_bid()
                && (response.bid_price < campaign.bids.floor
                    || response.bid_price < response.request.floor_price
                    || response.bid_price > campaign.bids.max)
        })
        .count();
    validations.check(out_of_bounds == 0, format!("Bids outside campaign bounds or below the slot floor: {}", out_of_bounds));

    let attributed = priced
        .iter()
        .flat_map(|auction| auction.decisions.iter())
        .filter(|(_, response)| !response.is_no_bid())
        .all(|(_, response)| matches!(&response.attribution, Some(a) if a.model_type == GameTheoryType::NASH_EQUILIBRIUM));
    validations.check(attributed, "Every bid is attributed to the Nash equilibrium model".to_string());

    let invalid_no_bids = priced
        .iter()
        .flat_map(|auction| auction.decisions.iter())
        .filter(|(campaign, response)| {
            (campaign.campaign_id == PAUSED_CAMPAIGN || response.request.ad_slot_id == UNSERVED_SLOT) && !response.is_no_bid()
        })
        .count();
    validations.check(invalid_no_bids == 0, format!("Bids from the paused campaign or on the unserved slot: {}", invalid_no_bids));

    validations.check(
        !won.is_empty() && lost > 0,
        format!("Market produces both wins and losses: {} won, {} lost", won.len(), lost),
    );

    for &id in CAMPAIGN_IDS.iter() {
        let campaign = campaigns.get(id).ok_or_else(|| format!("campaign {} disappeared", id))?;
        let campaign_wins: Vec<&&AuctionResponse> = won.iter().filter(|r| r.campaign_id == id).collect();
        let spend: f64 = campaign_wins.iter().map(|r| r.charged_price()).sum();
        let debited = campaign.budget.total - campaign.budget.remaining;
        let impressions: u64 = campaign.metrics.iter().map(|m| m.impressions).sum();
        let clicks: u64 = campaign.metrics.iter().map(|m| m.clicks).sum();
        let clicked = campaign_wins.iter().filter(|r| r.flags.clicked).count() as u64;

        logln!(
            logger,
            LogEvent::Scenario,
            "campaign {} '{}': {} wins, spend {:.2}, remaining {:.2}, {} clicks",
            id,
            campaign.campaign_name,
            campaign_wins.len(),
            spend,
            campaign.budget.remaining,
            clicks
        );
        if campaign.budget.remaining > 0.0 {
            validations.check(
                (spend - debited).abs() < 1e-6,
                format!("Campaign {} budget debit matches won clearing prices: {:.4} == {:.4}", id, debited, spend),
            );
        }
        validations.check(
            impressions == campaign_wins.len() as u64,
            format!("Campaign {} impressions match wins: {} == {}", id, impressions, campaign_wins.len()),
        );
        validations.check(clicks == clicked, format!("Campaign {} clicks counted once: {} == {}", id, clicks, clicked));
    }

    let side_wins = won.iter().filter(|r| r.request.ad_slot_id == "article-side").count() as u64;
    let observed = engine
        .competitors()
        .profile(Archetype::Aggressive, "article-side")
        .map(|profile| profile.bid_count)
        .unwrap_or(0);
    validations.check(
        observed == config.synthetic_prior_observations as u64 + side_wins,
        format!(
            "Competitor profile absorbed every won clearing price: {} == {} + {}",
            observed, config.synthetic_prior_observations, side_wins
        ),
    );

    let expired = engine.purge_responses(config.response_cutoff(Utc::now()));
    validations.check(expired == 0, format!("No response expires within the retention window: {}", expired));

    // End of day: every stored response is past its retention window
    let bids = priced
        .iter()
        .flat_map(|auction| auction.decisions.iter())
        .filter(|(_, response)| !response.is_no_bid())
        .count();
    let purged = engine.purge_responses(Utc::now());
    validations.check(purged == bids, format!("Purged stored responses match submitted bids: {} == {}", purged, bids));

    validations.finish(scenario_name)
}
