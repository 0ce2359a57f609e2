use chrono::Timelike;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::auction::AuctionRequest;
use crate::campaign::Campaign;
use crate::logger::{LogEvent, Logger};
use crate::logln;

/// Behavioural type of a modelled competitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Archetype {
    /// Bids high and often
    Aggressive,
    /// Stays just above the floor
    Conservative,
    /// Bid level follows the time of day
    TimeSensitive,
}

impl Archetype {
    pub const ALL: [Archetype; 3] = [Archetype::Aggressive, Archetype::Conservative, Archetype::TimeSensitive];

    pub fn name(&self) -> &'static str {
        match self {
            Archetype::Aggressive => "aggressive",
            Archetype::Conservative => "conservative",
            Archetype::TimeSensitive => "time_sensitive",
        }
    }

    /// (average, maximum) prior bid as multiples of the slot floor price
    fn prior_multipliers(&self) -> (f64, f64) {
        match self {
            Archetype::Aggressive => (2.0, 2.5),
            Archetype::Conservative => (1.1, 1.3),
            Archetype::TimeSensitive => (1.5, 2.0),
        }
    }

    /// Multiplier applied to the average bid at the given hour
    pub fn hour_multiplier(&self, hour: u32) -> f64 {
        match self {
            Archetype::TimeSensitive => match hour {
                9..=11 => 1.0,
                13..=16 => 1.2,
                18..=21 => 0.9,
                _ => 0.7,
            },
            _ => 1.0,
        }
    }
}

/// Running bid statistics of one archetype on one ad slot
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorProfile {
    pub archetype: Archetype,
    pub ad_slot_id: String,
    pub bid_count: u64,
    pub avg_bid: f64,
    pub min_bid: f64,
    pub max_bid: f64,
    pub win_rate: f64,
}

impl CompetitorProfile {
    pub fn empty(archetype: Archetype, ad_slot_id: &str) -> Self {
        Self {
            archetype,
            ad_slot_id: ad_slot_id.to_string(),
            bid_count: 0,
            avg_bid: 0.0,
            min_bid: 0.0,
            max_bid: 0.0,
            win_rate: 0.0,
        }
    }

    /// Profile seeded from the slot floor price as if `prior_observations` bids had been seen
    pub fn synthetic(archetype: Archetype, ad_slot_id: &str, floor_price: f64, prior_observations: u32) -> Self {
        let (avg_multiplier, max_multiplier) = archetype.prior_multipliers();
        Self {
            archetype,
            ad_slot_id: ad_slot_id.to_string(),
            bid_count: prior_observations as u64,
            avg_bid: floor_price * avg_multiplier,
            min_bid: floor_price,
            max_bid: floor_price * max_multiplier,
            win_rate: 0.5,
        }
    }

    /// O(1) running update of count, extremes, mean bid and win rate
    pub fn observe_bid(&mut self, bid: f64, won: bool) {
        self.bid_count += 1;
        let n = self.bid_count as f64;
        if self.bid_count == 1 {
            self.min_bid = bid;
            self.max_bid = bid;
        } else {
            self.min_bid = self.min_bid.min(bid);
            self.max_bid = self.max_bid.max(bid);
        }
        let won = if won { 1.0 } else { 0.0 };
        self.avg_bid = (self.avg_bid * (n - 1.0) + bid) / n;
        self.win_rate = (self.win_rate * (n - 1.0) + won) / n;
    }
}

/// Per-request view of the competition, one profile per archetype
pub type CompetitorSnapshot = BTreeMap<Archetype, CompetitorProfile>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProfileKey {
    archetype: Archetype,
    ad_slot_id: String,
}

/// Maintains competitor profiles per (archetype, ad slot)
pub struct CompetitorAnalysis {
    profiles: DashMap<ProfileKey, CompetitorProfile>,
    prior_observations: u32,
    clearing_price_discount: f64,
    logger: Arc<Logger>,
}

impl CompetitorAnalysis {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self::new_advanced(logger, 10, 0.9)
    }

    pub fn new_advanced(logger: Arc<Logger>, prior_observations: u32, clearing_price_discount: f64) -> Self {
        Self {
            profiles: DashMap::new(),
            prior_observations,
            clearing_price_discount,
            logger,
        }
    }

    /// Snapshot of every archetype on the request's slot, created lazily from the floor price
    /// The time-sensitive average reflects the request hour in the snapshot only
    pub fn profiles_for(&self, request: &AuctionRequest, _campaign: &Campaign) -> CompetitorSnapshot {
        let hour = request.timestamp.hour();
        Archetype::ALL
            .iter()
            .map(|&archetype| {
                let key = ProfileKey { archetype, ad_slot_id: request.ad_slot_id.clone() };
                let mut profile = self
                    .profiles
                    .entry(key)
                    .or_insert_with(|| CompetitorProfile::synthetic(archetype, &request.ad_slot_id, request.floor_price, self.prior_observations))
                    .clone();
                profile.avg_bid *= archetype.hour_multiplier(hour);
                (archetype, profile)
            })
            .collect()
    }

    /// Competitor bid implied by a second-price clearing price
    pub fn implied_bid(&self, clearing_price: f64) -> f64 {
        clearing_price * self.clearing_price_discount
    }

    /// Fold one won auction into the profiles of the given archetypes
    /// We won, so every competitor in the set lost
    pub fn observe(&self, request: &AuctionRequest, clearing_price: f64, archetypes: &[Archetype]) {
        let bid = self.implied_bid(clearing_price);
        for &archetype in archetypes {
            let key = ProfileKey { archetype, ad_slot_id: request.ad_slot_id.clone() };
            // The entry guard holds the shard lock for the whole read-modify-write
            let mut entry = self
                .profiles
                .entry(key)
                .or_insert_with(|| CompetitorProfile::synthetic(archetype, &request.ad_slot_id, request.floor_price, self.prior_observations));
            entry.observe_bid(bid, false);
            logln!(
                self.logger,
                LogEvent::Model,
                "competitor {} on {}: observed {:.4}, avg {:.4} over {} bids",
                archetype.name(),
                request.ad_slot_id,
                bid,
                entry.avg_bid,
                entry.bid_count
            );
        }
    }

    /// Stored profile without any time-of-day adjustment
    pub fn profile(&self, archetype: Archetype, ad_slot_id: &str) -> Option<CompetitorProfile> {
        let key = ProfileKey { archetype, ad_slot_id: ad_slot_id.to_string() };
        self.profiles.get(&key).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignType;
    use chrono::{TimeZone, Utc};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn request(hour: u32) -> AuctionRequest {
        AuctionRequest::new("req", "slot-7", 300, 250, 0.20)
            .with_timestamp(Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap())
    }

    fn campaign() -> Campaign {
        Campaign::new(1, "Test", CampaignType::CPC, 100.0, 0.1, 2.0)
    }

    #[test]
    fn test_two_observations_from_empty() {
        let mut profile = CompetitorProfile::empty(Archetype::Aggressive, "slot");
        profile.observe_bid(1.0, false);
        profile.observe_bid(2.0, true);
        assert_eq!(profile.bid_count, 2);
        assert_eq!(profile.avg_bid, 1.5);
        assert_eq!(profile.win_rate, 0.5);
        assert_eq!(profile.min_bid, 1.0);
        assert_eq!(profile.max_bid, 2.0);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..20 {
            let len = rng.gen_range(1..200);
            let observations: Vec<(f64, bool)> = (0..len).map(|_| (rng.gen_range(0.01..5.0), rng.gen_bool(0.4))).collect();

            let mut profile = CompetitorProfile::empty(Archetype::Conservative, "slot");
            for &(bid, won) in &observations {
                profile.observe_bid(bid, won);
            }

            let n = observations.len() as f64;
            let avg = observations.iter().map(|(bid, _)| bid).sum::<f64>() / n;
            let win_rate = observations.iter().filter(|(_, won)| *won).count() as f64 / n;
            let min = observations.iter().map(|(bid, _)| *bid).fold(f64::INFINITY, f64::min);
            let max = observations.iter().map(|(bid, _)| *bid).fold(f64::NEG_INFINITY, f64::max);

            assert_eq!(profile.bid_count, observations.len() as u64);
            assert!((profile.avg_bid - avg).abs() < 1e-9);
            assert!((profile.win_rate - win_rate).abs() < 1e-9);
            assert_eq!(profile.min_bid, min);
            assert_eq!(profile.max_bid, max);
        }
    }

    #[test]
    fn test_synthetic_priors_from_floor() {
        let analysis = CompetitorAnalysis::new(Arc::new(Logger::new()));
        let snapshot = analysis.profiles_for(&request(10), &campaign());
        assert_eq!(snapshot.len(), 3);

        let aggressive = &snapshot[&Archetype::Aggressive];
        assert!((aggressive.avg_bid - 0.40).abs() < 1e-12);
        assert!((aggressive.max_bid - 0.50).abs() < 1e-12);
        assert_eq!(aggressive.min_bid, 0.20);
        assert_eq!(aggressive.bid_count, 10);

        let conservative = &snapshot[&Archetype::Conservative];
        assert!((conservative.avg_bid - 0.22).abs() < 1e-12);
    }

    #[test]
    fn test_time_sensitive_adjusts_snapshot_only() {
        let analysis = CompetitorAnalysis::new(Arc::new(Logger::new()));
        let afternoon = analysis.profiles_for(&request(14), &campaign());
        let night = analysis.profiles_for(&request(2), &campaign());

        assert!((afternoon[&Archetype::TimeSensitive].avg_bid - 0.36).abs() < 1e-12);
        assert!((night[&Archetype::TimeSensitive].avg_bid - 0.21).abs() < 1e-12);
        let stored = analysis.profile(Archetype::TimeSensitive, "slot-7").unwrap();
        assert!((stored.avg_bid - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_observe_discounts_clearing_price() {
        let analysis = CompetitorAnalysis::new_advanced(Arc::new(Logger::new()), 0, 0.9);
        analysis.observe(&request(10), 1.0, &[Archetype::Aggressive]);
        let profile = analysis.profile(Archetype::Aggressive, "slot-7").unwrap();
        assert_eq!(profile.bid_count, 1);
        assert!((profile.avg_bid - 0.9).abs() < 1e-12);
        assert_eq!(profile.win_rate, 0.0);
        assert!(analysis.profile(Archetype::Conservative, "slot-7").is_none());
    }

    #[test]
    fn test_concurrent_observations_are_not_lost() {
        let analysis = CompetitorAnalysis::new_advanced(Arc::new(Logger::new()), 0, 1.0);
        let request = request(10);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..500 {
                        analysis.observe(&request, 1.0, &Archetype::ALL);
                    }
                });
            }
        });
        for archetype in Archetype::ALL {
            assert_eq!(analysis.profile(archetype, "slot-7").unwrap().bid_count, 4000);
        }
    }
}
