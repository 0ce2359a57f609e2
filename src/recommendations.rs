use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EngineError;
use crate::game_theory::GameTheoryType;

/// Recommendation lifecycle: Pending, then exactly one terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    Pending,
    Applied,
    Rejected,
}

impl OptimizationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OptimizationStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Low,
    High,
}

/// A proposed change of a campaign's max bid
#[derive(Debug, Clone, PartialEq)]
pub struct BidOptimization {
    pub optimization_id: u64,
    pub campaign_id: u64,
    pub previous_bid: f64,
    pub optimized_bid: f64,
    /// Expected performance change in percent
    pub expected_improvement: f64,
    pub status: OptimizationStatus,
    pub confidence: Confidence,
    pub reason: String,
    pub model_type: GameTheoryType,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl BidOptimization {
    /// Relative size of the proposed change, e.g. 0.03 for 1.00 -> 1.03
    pub fn relative_change(&self) -> f64 {
        if self.previous_bid <= 0.0 {
            return f64::INFINITY;
        }
        (self.optimized_bid - self.previous_bid).abs() / self.previous_bid
    }
}

/// Fields of a new recommendation; the store assigns the id and Pending status
#[derive(Debug, Clone, PartialEq)]
pub struct NewBidOptimization {
    pub campaign_id: u64,
    pub previous_bid: f64,
    pub optimized_bid: f64,
    pub expected_improvement: f64,
    pub confidence: Confidence,
    pub reason: String,
    pub model_type: GameTheoryType,
    pub created_at: DateTime<Utc>,
}

/// Recommendation persistence seen by the scheduler
pub trait RecommendationStore: Send + Sync {
    fn create(&self, new: NewBidOptimization) -> BidOptimization;
    fn get(&self, optimization_id: u64) -> Option<BidOptimization>;
    fn list_all(&self) -> Vec<BidOptimization>;
    fn list_by_status(&self, status: OptimizationStatus) -> Vec<BidOptimization>;
    fn list_by_campaign(&self, campaign_id: u64) -> Vec<BidOptimization>;

    /// Move a Pending recommendation to `to`, atomically
    /// Fails with a conflict when the recommendation already left Pending
    fn transition(&self, optimization_id: u64, to: OptimizationStatus, at: DateTime<Utc>) -> Result<BidOptimization, EngineError>;
}

pub struct InMemoryRecommendationStore {
    recommendations: DashMap<u64, BidOptimization>,
    next_id: AtomicU64,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self {
            recommendations: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn sorted(mut list: Vec<BidOptimization>) -> Vec<BidOptimization> {
        list.sort_by_key(|optimization| optimization.optimization_id);
        list
    }
}

impl Default for InMemoryRecommendationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationStore for InMemoryRecommendationStore {
    fn create(&self, new: NewBidOptimization) -> BidOptimization {
        let optimization = BidOptimization {
            optimization_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            campaign_id: new.campaign_id,
            previous_bid: new.previous_bid,
            optimized_bid: new.optimized_bid,
            expected_improvement: new.expected_improvement,
            status: OptimizationStatus::Pending,
            confidence: new.confidence,
            reason: new.reason,
            model_type: new.model_type,
            created_at: new.created_at,
            applied_at: None,
        };
        self.recommendations.insert(optimization.optimization_id, optimization.clone());
        optimization
    }

    fn get(&self, optimization_id: u64) -> Option<BidOptimization> {
        self.recommendations.get(&optimization_id).map(|entry| entry.clone())
    }

    fn list_all(&self) -> Vec<BidOptimization> {
        Self::sorted(self.recommendations.iter().map(|entry| entry.clone()).collect())
    }

    fn list_by_status(&self, status: OptimizationStatus) -> Vec<BidOptimization> {
        Self::sorted(
            self.recommendations
                .iter()
                .filter(|entry| entry.status == status)
                .map(|entry| entry.clone())
                .collect(),
        )
    }

    fn list_by_campaign(&self, campaign_id: u64) -> Vec<BidOptimization> {
        Self::sorted(
            self.recommendations
                .iter()
                .filter(|entry| entry.campaign_id == campaign_id)
                .map(|entry| entry.clone())
                .collect(),
        )
    }

    fn transition(&self, optimization_id: u64, to: OptimizationStatus, at: DateTime<Utc>) -> Result<BidOptimization, EngineError> {
        // The shard write lock held by get_mut makes check-then-set atomic per id
        let mut entry = self
            .recommendations
            .get_mut(&optimization_id)
            .ok_or(EngineError::RecommendationNotFound(optimization_id))?;
        if entry.status != OptimizationStatus::Pending || to == OptimizationStatus::Pending {
            return Err(EngineError::LifecycleConflict { id: optimization_id, status: entry.status });
        }
        entry.status = to;
        if to == OptimizationStatus::Applied {
            entry.applied_at = Some(at);
        }
        Ok(entry.clone())
    }
}
