use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use std::error::Error;

use crate::auction::{AuctionOutcome, AuctionRequest, AuctionResponse};
use crate::utils::{create_lognormal, get_seed, round_money};

/// An ad slot the exchange keeps offering
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSpec {
    pub ad_slot_id: String,
    pub width: u32,
    pub height: u32,
}

impl SlotSpec {
    pub fn new(ad_slot_id: &str, width: u32, height: u32) -> Self {
        Self { ad_slot_id: ad_slot_id.to_string(), width, height }
    }
}

/// Shape of the simulated market
#[derive(Debug, Clone, PartialEq)]
pub struct MarketParams {
    pub floor_mean: f64,
    pub floor_stddev: f64,
    /// Highest competing bid as a multiple of the slot floor
    pub competition_mean: f64,
    pub competition_stddev: f64,
    /// Number of distinct cookies the requests are spread over
    pub audience_size: u64,
    /// Spacing between request timestamps
    pub request_spacing_secs: i64,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            floor_mean: 0.3,
            floor_stddev: 0.1,
            competition_mean: 1.3,
            competition_stddev: 0.5,
            audience_size: 200,
            request_spacing_secs: 30,
        }
    }
}

/// Everything random about one auction, drawn up front so requests can be priced in parallel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketDraw {
    pub competing_bid: f64,
    pub click_roll: f64,
    pub conversion_roll: f64,
}

/// Seeded stream of auctions for one ad exchange
pub struct SimulatedExchange {
    exchange_id: String,
    slots: Vec<SlotSpec>,
    params: MarketParams,
    floor_dist: LogNormal<f64>,
    competition_dist: LogNormal<f64>,
    rng: StdRng,
    next_request: u64,
    clock: DateTime<Utc>,
}

impl SimulatedExchange {
    pub fn new(exchange_id: &str, slots: Vec<SlotSpec>, start: DateTime<Utc>) -> Result<Self, Box<dyn Error>> {
        Self::new_advanced(exchange_id, slots, MarketParams::default(), start, get_seed(0xE7C4))
    }

    pub fn new_advanced(
        exchange_id: &str,
        slots: Vec<SlotSpec>,
        params: MarketParams,
        start: DateTime<Utc>,
        seed: u64,
    ) -> Result<Self, Box<dyn Error>> {
        if slots.is_empty() {
            return Err("exchange needs at least one ad slot".into());
        }
        let floor_dist = create_lognormal(params.floor_mean, params.floor_stddev)
            .ok_or_else(|| format!("invalid floor distribution ({}, {})", params.floor_mean, params.floor_stddev))?;
        let competition_dist = create_lognormal(params.competition_mean, params.competition_stddev)
            .ok_or_else(|| format!("invalid competition distribution ({}, {})", params.competition_mean, params.competition_stddev))?;
        Ok(Self {
            exchange_id: exchange_id.to_string(),
            slots,
            params,
            floor_dist,
            competition_dist,
            rng: StdRng::seed_from_u64(seed),
            next_request: 0,
            clock: start,
        })
    }

    /// Next request and the market conditions it will clear against
    pub fn next_auction(&mut self) -> (AuctionRequest, MarketDraw) {
        let n = self.next_request;
        self.next_request += 1;
        self.clock += Duration::seconds(self.params.request_spacing_secs);

        let slot = &self.slots[self.rng.gen_range(0..self.slots.len())];
        let floor_price = round_money(self.floor_dist.sample(&mut self.rng)).max(0.01);
        let user = self.rng.gen_range(0..self.params.audience_size.max(1));
        let request = AuctionRequest::new(&format!("{}-{}", self.exchange_id, n), &slot.ad_slot_id, slot.width, slot.height, floor_price)
            .with_exchange(&self.exchange_id)
            .with_cookie(&format!("cookie-{}", user))
            .with_timestamp(self.clock);

        let draw = MarketDraw {
            competing_bid: round_money(floor_price * self.competition_dist.sample(&mut self.rng)),
            click_roll: self.rng.gen(),
            conversion_roll: self.rng.gen(),
        };
        (request, draw)
    }

    pub fn auctions(&mut self, count: usize) -> Vec<(AuctionRequest, MarketDraw)> {
        (0..count).map(|_| self.next_auction()).collect()
    }
}

/// Second-price clearing of one response against the drawn competition
///
/// No-bids get no outcome. A winner pays the higher of the competing bid and the floor;
/// clicks and conversions follow the rates predicted at decision time.
pub fn settle(response: &AuctionResponse, draw: &MarketDraw) -> Option<AuctionOutcome> {
    if response.is_no_bid() {
        return None;
    }
    let price_to_beat = draw.competing_bid.max(response.request.floor_price);
    if response.bid_price <= price_to_beat {
        return Some(AuctionOutcome::lost());
    }
    let mut outcome = AuctionOutcome::won(round_money(price_to_beat));
    if let Some(attribution) = &response.attribution {
        if draw.click_roll < attribution.predicted_ctr {
            outcome = outcome.with_click();
            if draw.conversion_roll < attribution.predicted_cvr {
                outcome = outcome.with_conversion();
            }
        }
    }
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(seed: u64) -> SimulatedExchange {
        let slots = vec![SlotSpec::new("top", 728, 90), SlotSpec::new("side", 300, 250)];
        SimulatedExchange::new_advanced("adx", slots, MarketParams::default(), Utc::now(), seed).unwrap()
    }

    fn bid(bid_price: f64, floor: f64) -> AuctionResponse {
        let request = AuctionRequest::new("r", "side", 300, 250, floor);
        let mut response = AuctionResponse::no_bid(request, 1, Utc::now());
        response.creative_id = Some(1);
        response.bid_price = bid_price;
        response
    }

    fn draw(competing_bid: f64) -> MarketDraw {
        MarketDraw { competing_bid, click_roll: 1.0, conversion_roll: 1.0 }
    }

    #[test]
    fn test_same_seed_same_market() {
        let a = exchange(3).auctions(20);
        let b = exchange(3).auctions(20);
        for ((ra, da), (rb, db)) in a.iter().zip(b.iter()) {
            assert_eq!(ra.floor_price, rb.floor_price);
            assert_eq!(ra.ad_slot_id, rb.ad_slot_id);
            assert_eq!(da, db);
        }
    }

    #[test]
    fn test_requests_are_well_formed() {
        let auctions = exchange(11).auctions(200);
        for (request, draw) in &auctions {
            assert!(request.floor_price > 0.0);
            assert!(draw.competing_bid >= 0.0);
            assert!(request.cookie_id.is_some());
            assert_eq!(request.exchange_id.as_deref(), Some("adx"));
        }
        assert!(auctions.windows(2).all(|w| w[0].0.timestamp < w[1].0.timestamp));
    }

    #[test]
    fn test_second_price_clearing() {
        let outcome = settle(&bid(1.0, 0.2), &draw(0.6)).unwrap();
        assert_eq!(outcome.won, Some(true));
        assert_eq!(outcome.clearing_price, Some(0.6));

        let outcome = settle(&bid(1.0, 0.7), &draw(0.3)).unwrap();
        assert_eq!(outcome.clearing_price, Some(0.7));

        let outcome = settle(&bid(0.5, 0.2), &draw(0.6)).unwrap();
        assert_eq!(outcome.won, Some(false));
    }

    #[test]
    fn test_no_bid_has_no_outcome() {
        let request = AuctionRequest::new("r", "side", 300, 250, 0.2);
        let response = AuctionResponse::no_bid(request, 1, Utc::now());
        assert!(settle(&response, &draw(0.1)).is_none());
    }
}
