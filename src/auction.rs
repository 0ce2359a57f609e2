use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::campaign::CampaignType;
use crate::competitors::{Archetype, CompetitorSnapshot};
use crate::game_theory::GameTheoryType;
use crate::user_profiles::UserProfile;

/// One ad slot offered by an exchange
///
/// Lives only for the duration of a decision; the pipeline fills in the user profile and
/// the competitor snapshot before pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionRequest {
    pub request_id: String,
    pub exchange_id: Option<String>,
    pub ad_slot_id: String,
    pub slot_width: u32,
    pub slot_height: u32,
    pub floor_price: f64,
    pub cookie_id: Option<String>,
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub user_profile: Option<UserProfile>,
    pub competitors: Option<CompetitorSnapshot>,
}

impl AuctionRequest {
    pub fn new(request_id: &str, ad_slot_id: &str, slot_width: u32, slot_height: u32, floor_price: f64) -> Self {
        Self {
            request_id: request_id.to_string(),
            exchange_id: None,
            ad_slot_id: ad_slot_id.to_string(),
            slot_width,
            slot_height,
            floor_price,
            cookie_id: None,
            device_id: None,
            timestamp: Utc::now(),
            user_profile: None,
            competitors: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_cookie(mut self, cookie_id: &str) -> Self {
        self.cookie_id = Some(cookie_id.to_string());
        self
    }

    pub fn with_device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    pub fn with_exchange(mut self, exchange_id: &str) -> Self {
        self.exchange_id = Some(exchange_id.to_string());
        self
    }

    pub fn with_user_profile(mut self, profile: UserProfile) -> Self {
        self.user_profile = Some(profile);
        self
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidStatus {
    PENDING,
    SENT,
    WON,
    LOST,
    TIMEOUT,
    ERROR,
}

impl BidStatus {
    /// Whether the win/loss notification has already been processed
    pub fn is_resolved(&self) -> bool {
        matches!(self, BidStatus::WON | BidStatus::LOST)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeFlags {
    pub won: bool,
    pub clicked: bool,
    pub converted: bool,
}

/// Which model priced a response and what it knew; fixed at decision time
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAttribution {
    pub model_type: GameTheoryType,
    pub utility_score: f64,
    pub campaign_id: u64,
    pub campaign_type: CampaignType,
    /// Max bid at decision time; the bid is discretized against it when learning
    pub max_bid_price: f64,
    pub competitor_set: Vec<Archetype>,
    pub predicted_ctr: f64,
    pub predicted_cvr: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuctionResponse {
    pub response_id: Uuid,
    pub request: AuctionRequest,
    pub campaign_id: u64,
    /// None means no bid
    pub creative_id: Option<u64>,
    pub bid_price: f64,
    pub clearing_price: Option<f64>,
    pub status: BidStatus,
    pub flags: OutcomeFlags,
    pub attribution: Option<ModelAttribution>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl AuctionResponse {
    pub fn no_bid(request: AuctionRequest, campaign_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            response_id: Uuid::new_v4(),
            request,
            campaign_id,
            creative_id: None,
            bid_price: 0.0,
            clearing_price: None,
            status: BidStatus::PENDING,
            flags: OutcomeFlags::default(),
            attribution: None,
            created_at: now,
            processed_at: None,
        }
    }

    pub fn is_no_bid(&self) -> bool {
        self.creative_id.is_none()
    }

    /// Price actually paid; a win without a reported clearing price is charged at the bid
    pub fn charged_price(&self) -> f64 {
        self.clearing_price.unwrap_or(self.bid_price)
    }

    /// Fold an outcome notification into the flags
    ///
    /// Win/loss is taken from the first notification that carries one. A click or conversion
    /// reported before that is held on the flags and counted when the win arrives; on a loss
    /// it is dropped. Click and conversion flags only ever go from false to true.
    pub fn apply_outcome(&mut self, outcome: &AuctionOutcome, now: DateTime<Utc>) -> OutcomeTransition {
        let mut transition = OutcomeTransition::default();
        if self.status.is_resolved() {
            if self.flags.won {
                if outcome.clicked && !self.flags.clicked {
                    self.flags.clicked = true;
                    transition.clicked = true;
                }
                if outcome.converted && !self.flags.converted {
                    self.flags.converted = true;
                    transition.converted = true;
                }
            }
            return transition;
        }

        self.flags.clicked |= outcome.clicked;
        self.flags.converted |= outcome.converted;
        let won = match outcome.won {
            Some(won) => won,
            None => return transition,
        };
        self.flags.won = won;
        self.processed_at = Some(now);
        transition.resolved = true;
        if won {
            self.status = BidStatus::WON;
            self.clearing_price = Some(outcome.clearing_price.unwrap_or(self.bid_price));
            transition.clicked = self.flags.clicked;
            transition.converted = self.flags.converted;
        } else {
            self.status = BidStatus::LOST;
            self.flags.clicked = false;
            self.flags.converted = false;
        }
        transition
    }

    /// Time of the last notification, or of the decision if none arrived yet
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.processed_at.unwrap_or(self.created_at)
    }
}

/// Feedback about one response; win/loss, click and conversion may arrive in separate calls
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuctionOutcome {
    /// None for engagement-only notices that say nothing about the auction result
    pub won: Option<bool>,
    pub clicked: bool,
    pub converted: bool,
    pub clearing_price: Option<f64>,
}

impl AuctionOutcome {
    pub fn won(clearing_price: f64) -> Self {
        Self { won: Some(true), clearing_price: Some(clearing_price), ..Self::default() }
    }

    pub fn lost() -> Self {
        Self { won: Some(false), ..Self::default() }
    }

    pub fn click() -> Self {
        Self { clicked: true, ..Self::default() }
    }

    pub fn conversion() -> Self {
        Self { converted: true, ..Self::default() }
    }

    pub fn with_click(mut self) -> Self {
        self.clicked = true;
        self
    }

    pub fn with_conversion(mut self) -> Self {
        self.converted = true;
        self
    }
}

/// What changed when an outcome was applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTransition {
    /// Win/loss was recorded by this call
    pub resolved: bool,
    pub clicked: bool,
    pub converted: bool,
}

/// Responses kept until their outcome callbacks have arrived
pub trait ResponseStore: Send + Sync {
    fn insert(&self, response: AuctionResponse);
    fn get(&self, response_id: &Uuid) -> Option<AuctionResponse>;

    /// Mutate a stored response under its lock and return the updated copy
    fn update(&self, response_id: &Uuid, apply: &mut dyn FnMut(&mut AuctionResponse)) -> Option<AuctionResponse>;

    fn remove(&self, response_id: &Uuid) -> Option<AuctionResponse>;

    /// Drop every response whose last activity is at or before `cutoff`; returns how many went
    fn purge_before(&self, cutoff: DateTime<Utc>) -> usize;
}

pub struct InMemoryResponseStore {
    responses: DashMap<Uuid, AuctionResponse>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self { responses: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn all(&self) -> Vec<AuctionResponse> {
        self.responses.iter().map(|entry| entry.clone()).collect()
    }
}

impl Default for InMemoryResponseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStore for InMemoryResponseStore {
    fn insert(&self, response: AuctionResponse) {
        self.responses.insert(response.response_id, response);
    }

    fn get(&self, response_id: &Uuid) -> Option<AuctionResponse> {
        self.responses.get(response_id).map(|entry| entry.clone())
    }

    fn update(&self, response_id: &Uuid, apply: &mut dyn FnMut(&mut AuctionResponse)) -> Option<AuctionResponse> {
        self.responses.get_mut(response_id).map(|mut entry| {
            apply(entry.value_mut());
            entry.clone()
        })
    }

    fn remove(&self, response_id: &Uuid) -> Option<AuctionResponse> {
        self.responses.remove(response_id).map(|(_, response)| response)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.responses.len();
        self.responses.retain(|_, response| response.last_activity() > cutoff);
        before.saturating_sub(self.responses.len())
    }
}
