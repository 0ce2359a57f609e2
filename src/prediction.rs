use chrono::Timelike;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::auction::AuctionRequest;
use crate::campaign::Campaign;
use crate::sigmoid::Sigmoid;
use crate::user_profiles::UserProfile;
use crate::utils::{get_seed, round_money};

const DEFAULT_CTR: f64 = 0.01;
const DEFAULT_CVR: f64 = 0.1;
const CTR_RANGE: (f64, f64) = (0.001, 0.1);
const CVR_RANGE: (f64, f64) = (0.01, 0.5);

/// The curve spans [floor, floor * (1 + WIN_CURVE_SPAN)]
const WIN_CURVE_SPAN: f64 = 2.0;
const WIN_CURVE_STEPS: usize = 10;
const WIN_CURVE_STEEPNESS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinPoint {
    pub price: f64,
    pub probability: f64,
}

/// Win probability against price for one ad slot
#[derive(Debug, Clone, PartialEq)]
pub struct WinCurve {
    pub floor_price: f64,
    pub points: Vec<WinPoint>,
}

impl WinCurve {
    /// Logistic curve from the floor price to three times the floor, centered at the midpoint
    pub fn for_floor(floor_price: f64) -> Self {
        let sigmoid = Self::sigmoid();
        let points = (0..=WIN_CURVE_STEPS)
            .map(|i| {
                let ratio = i as f64 / WIN_CURVE_STEPS as f64;
                WinPoint {
                    price: round_money(floor_price + floor_price * WIN_CURVE_SPAN * ratio),
                    probability: sigmoid.get_probability(ratio),
                }
            })
            .collect();
        Self { floor_price, points }
    }

    fn sigmoid() -> Sigmoid {
        Sigmoid::new(0.5, WIN_CURVE_STEEPNESS)
    }

    fn span(&self) -> f64 {
        self.floor_price * WIN_CURVE_SPAN
    }

    /// Interpolated probability for any price; prices outside the curve are clamped to its ends
    pub fn probability_at(&self, price: f64) -> f64 {
        if self.span() <= 0.0 {
            return Self::sigmoid().get_probability(0.5);
        }
        let ratio = ((price - self.floor_price) / self.span()).clamp(0.0, 1.0);
        Self::sigmoid().get_probability(ratio)
    }

    /// Cheapest price reaching the given win probability within the curve
    pub fn price_for_probability(&self, probability: f64) -> f64 {
        let ratio = Self::sigmoid().inverse(probability).clamp(0.0, 1.0);
        self.floor_price + self.span() * ratio
    }
}

/// Everything the bidder needs to know about one request for one campaign
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub ctr: f64,
    pub cvr: f64,
    pub user_value: f64,
    pub win_curve: WinCurve,
}

/// Estimation seam; the heuristic implementation stands in for learned models
pub trait EstimatorTrait: Send + Sync {
    /// Always returns a complete prediction
    fn predict(&self, request: &AuctionRequest, campaign: &Campaign) -> Prediction;

    /// Multiplier applied to a campaign's max bid when simulating re-optimization
    fn bid_change_factor(&self, campaign: &Campaign) -> f64;
}

/// Click-through multiplier by hour of day
pub fn time_of_day_multiplier(hour: u32) -> f64 {
    match hour {
        7..=9 => 1.2,
        10..=11 => 0.9,
        12..=13 => 1.1,
        14..=16 => 0.8,
        17..=19 => 1.3,
        20..=22 => 1.2,
        _ => 0.7,
    }
}

fn ctr_user_multiplier(profile: Option<&UserProfile>) -> f64 {
    match profile {
        None => 1.0,
        Some(profile) => {
            let target = if profile.is_target_audience { 1.5 } else { 0.8 };
            let recency = (-(profile.days_since_last_interest as f64) / 10.0).exp().clamp(0.5, 1.5);
            target * recency
        }
    }
}

fn cvr_user_multiplier(profile: Option<&UserProfile>) -> f64 {
    match profile {
        None => 1.0,
        Some(profile) => {
            let converted = if profile.has_previous_conversion { 2.0 } else { 0.7 };
            let recency = (-(profile.days_since_last_visit as f64) / 7.0).exp().clamp(0.5, 1.5);
            converted * recency
        }
    }
}

fn user_value_multiplier(profile: Option<&UserProfile>) -> f64 {
    match profile {
        None => 1.0,
        Some(profile) => 0.7 * profile.purchasing_power + 0.3 * profile.engagement_level,
    }
}

/// Random factors are drawn uniformly from these ranges
#[derive(Debug, Clone, Copy)]
struct Noise {
    ctr: f64,
    cvr: f64,
    user_value: f64,
}

fn combine(request: &AuctionRequest, campaign: &Campaign, noise: Noise) -> Prediction {
    let profile = request.user_profile.as_ref();
    let hour = request.timestamp.hour();

    let base_ctr = campaign.targets.ctr.unwrap_or(DEFAULT_CTR);
    // Ad position is not known yet, every slot counts as equally visible
    let position_multiplier = 1.0;
    let ctr = base_ctr * ctr_user_multiplier(profile) * time_of_day_multiplier(hour) * position_multiplier * noise.ctr;

    let base_cvr = campaign.targets.cvr.unwrap_or(DEFAULT_CVR);
    let cvr = base_cvr * cvr_user_multiplier(profile) * noise.cvr;

    let user_value = campaign.campaign_type.base_user_value() * user_value_multiplier(profile) * noise.user_value;

    Prediction {
        ctr: ctr.clamp(CTR_RANGE.0, CTR_RANGE.1),
        cvr: cvr.clamp(CVR_RANGE.0, CVR_RANGE.1),
        user_value,
        win_curve: WinCurve::for_floor(request.floor_price),
    }
}

static NEXT_ESTIMATOR_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Each thread draws from its own stream per estimator, keyed by estimator id
    static ESTIMATOR_RNGS: RefCell<HashMap<u64, StdRng>> = RefCell::new(HashMap::new());
}

/// Heuristic estimator over campaign targets, user profile and time of day with bounded noise
///
/// Request threads never share a generator. The first thread to use an estimator draws from
/// its seed directly, so single-threaded runs are reproducible.
pub struct HeuristicEstimator {
    id: u64,
    seed: u64,
    streams: AtomicU64,
    max_bid_change_fraction: f64,
}

impl HeuristicEstimator {
    pub fn new(max_bid_change_fraction: f64) -> Self {
        Self::new_advanced(max_bid_change_fraction, get_seed(0x4553_5449))
    }

    pub fn new_advanced(max_bid_change_fraction: f64, seed: u64) -> Self {
        Self {
            id: NEXT_ESTIMATOR_ID.fetch_add(1, Ordering::Relaxed),
            seed,
            streams: AtomicU64::new(0),
            max_bid_change_fraction,
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        ESTIMATOR_RNGS.with(|rngs| {
            let mut rngs = rngs.borrow_mut();
            let rng = rngs.entry(self.id).or_insert_with(|| {
                let stream = self.streams.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            });
            f(rng)
        })
    }
}

impl Drop for HeuristicEstimator {
    fn drop(&mut self) {
        // Other threads' streams go away with those threads
        let _ = ESTIMATOR_RNGS.try_with(|rngs| rngs.borrow_mut().remove(&self.id));
    }
}

impl EstimatorTrait for HeuristicEstimator {
    fn predict(&self, request: &AuctionRequest, campaign: &Campaign) -> Prediction {
        let noise = self.with_rng(|rng| Noise {
            ctr: rng.gen_range(0.8..1.2),
            cvr: rng.gen_range(0.9..1.1),
            user_value: rng.gen_range(0.8..1.2),
        });
        combine(request, campaign, noise)
    }

    fn bid_change_factor(&self, _campaign: &Campaign) -> f64 {
        if self.max_bid_change_fraction <= 0.0 {
            return 1.0;
        }
        let f = self.max_bid_change_fraction;
        self.with_rng(|rng| rng.gen_range((1.0 - f)..=(1.0 + f)))
    }
}

/// Deterministic estimator returning caller-provided values
#[derive(Debug, Clone)]
pub struct FixedEstimator {
    pub ctr: f64,
    pub cvr: f64,
    pub user_value: f64,
    pub bid_change_factor: f64,
}

impl FixedEstimator {
    pub fn new(ctr: f64, cvr: f64, user_value: f64) -> Self {
        Self { ctr, cvr, user_value, bid_change_factor: 1.0 }
    }

    pub fn with_bid_change_factor(mut self, factor: f64) -> Self {
        self.bid_change_factor = factor;
        self
    }
}

impl EstimatorTrait for FixedEstimator {
    fn predict(&self, request: &AuctionRequest, _campaign: &Campaign) -> Prediction {
        Prediction {
            ctr: self.ctr,
            cvr: self.cvr,
            user_value: self.user_value,
            win_curve: WinCurve::for_floor(request.floor_price),
        }
    }

    fn bid_change_factor(&self, _campaign: &Campaign) -> f64 {
        self.bid_change_factor
    }
}
