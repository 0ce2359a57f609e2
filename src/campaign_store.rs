use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use crate::campaign::{Campaign, MetricEvent};
use crate::error::EngineError;

/// Read and write model of campaigns used by the engine
///
/// Implementations must serialize writes per campaign id: a budget debit racing a max-bid
/// update on the same campaign must not lose either change.
pub trait CampaignStore: Send + Sync {
    fn get(&self, campaign_id: u64) -> Option<Campaign>;

    /// Campaigns that are Active, inside their schedule and have budget left
    fn running_campaigns(&self, now: DateTime<Utc>) -> Vec<Campaign>;

    /// Append a delivery event to the campaign's metric for `date`
    /// Impressions debit the spend from the remaining budget
    fn record_event(&self, campaign_id: u64, date: NaiveDate, event: MetricEvent) -> Result<Campaign, EngineError>;

    /// Never goes below the campaign's bid floor
    fn set_max_bid(&self, campaign_id: u64, max_bid_price: f64) -> Result<Campaign, EngineError>;
}

/// DashMap-backed store; each mutation runs under the entry's shard lock
pub struct InMemoryCampaignStore {
    campaigns: DashMap<u64, Campaign>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self { campaigns: DashMap::new() }
    }

    pub fn insert(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.campaign_id, campaign);
    }

    fn update<F>(&self, campaign_id: u64, f: F) -> Result<Campaign, EngineError>
    where
        F: FnOnce(&mut Campaign),
    {
        let mut entry = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(EngineError::CampaignNotFound(campaign_id))?;
        f(entry.value_mut());
        Ok(entry.clone())
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn get(&self, campaign_id: u64) -> Option<Campaign> {
        self.campaigns.get(&campaign_id).map(|entry| entry.clone())
    }

    fn running_campaigns(&self, now: DateTime<Utc>) -> Vec<Campaign> {
        let mut running: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|entry| entry.is_running(now))
            .map(|entry| entry.clone())
            .collect();
        running.sort_by_key(|campaign| campaign.campaign_id);
        running
    }

    fn record_event(&self, campaign_id: u64, date: NaiveDate, event: MetricEvent) -> Result<Campaign, EngineError> {
        self.update(campaign_id, |campaign| campaign.record(date, event))
    }

    fn set_max_bid(&self, campaign_id: u64, max_bid_price: f64) -> Result<Campaign, EngineError> {
        self.update(campaign_id, |campaign| campaign.bids.max = max_bid_price.max(campaign.bids.floor))
    }
}
