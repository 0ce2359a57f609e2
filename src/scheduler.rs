use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::campaign::Campaign;
use crate::campaign_store::CampaignStore;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::game_theory::GameTheoryType;
use crate::logger::{LogEvent, Logger};
use crate::prediction::EstimatorTrait;
use crate::recommendations::{BidOptimization, Confidence, NewBidOptimization, OptimizationStatus, RecommendationStore};
use crate::utils::round_money;
use crate::{errln, logln, warnln};

pub const RAISE_REASON: &str = "Competitor bidding increased; raising bid to maintain position";
pub const LOWER_REASON: &str = "Opportunity to maintain performance with a lower bid";

/// Expected performance change in percent for moving a bid from `previous` to `optimized`
/// Raises are credited with `raise_weight`, cuts with the smaller `lower_weight`
pub fn expected_improvement(previous: f64, optimized: f64, raise_weight: f64, lower_weight: f64) -> f64 {
    if optimized > previous {
        (optimized / previous - 1.0) * raise_weight
    } else {
        (previous / optimized - 1.0) * lower_weight
    }
}

pub fn optimization_reason(previous: f64, optimized: f64) -> &'static str {
    if optimized > previous {
        RAISE_REASON
    } else {
        LOWER_REASON
    }
}

/// Relative change rounded half-up to four decimals, compared against the limit
pub fn is_small_change(optimization: &BidOptimization, max_change: f64) -> bool {
    let ratio = optimization.relative_change();
    if !ratio.is_finite() {
        return false;
    }
    let rounded = ((ratio * 10_000.0) + 1e-9).round() / 10_000.0;
    rounded <= max_change
}

/// Generates bid recommendations and applies the safe ones
pub struct OptimizationScheduler {
    campaigns: Arc<dyn CampaignStore>,
    recommendations: Arc<dyn RecommendationStore>,
    estimator: Arc<dyn EstimatorTrait>,
    config: EngineConfig,
    logger: Arc<Logger>,
}

impl OptimizationScheduler {
    pub fn new(
        config: &EngineConfig,
        campaigns: Arc<dyn CampaignStore>,
        recommendations: Arc<dyn RecommendationStore>,
        estimator: Arc<dyn EstimatorTrait>,
        logger: Arc<Logger>,
    ) -> Self {
        Self { campaigns, recommendations, estimator, config: config.clone(), logger }
    }

    pub fn recommendations(&self) -> &dyn RecommendationStore {
        self.recommendations.as_ref()
    }

    /// Generation pass over every campaign running now
    pub fn generate_recommendations(&self) -> Vec<BidOptimization> {
        self.generate_recommendations_at(Utc::now())
    }

    pub fn generate_recommendations_at(&self, now: DateTime<Utc>) -> Vec<BidOptimization> {
        let mut created = Vec::new();
        for campaign in self.campaigns.running_campaigns(now) {
            if campaign.metrics.len() < self.config.min_metric_records {
                continue;
            }
            match self.generate_for(&campaign, now) {
                Some(optimization) => created.push(optimization),
                None => warnln!(self.logger, LogEvent::Optimization, "campaign {} has no usable max bid ({}), skipped", campaign.campaign_id, campaign.bids.max),
            }
        }
        logln!(self.logger, LogEvent::Optimization, "generated {} recommendations", created.len());
        created
    }

    fn generate_for(&self, campaign: &Campaign, now: DateTime<Utc>) -> Option<BidOptimization> {
        let previous_bid = campaign.bids.max;
        // Never recommend a max bid the campaign's own floor would make unusable
        let optimized_bid = round_money(previous_bid * self.estimator.bid_change_factor(campaign)).max(campaign.bids.floor);
        if previous_bid <= 0.0 || optimized_bid <= 0.0 {
            return None;
        }
        let confidence = if campaign.metrics.len() >= self.config.high_confidence_min_records {
            Confidence::High
        } else {
            Confidence::Low
        };
        let optimization = self.recommendations.create(NewBidOptimization {
            campaign_id: campaign.campaign_id,
            previous_bid,
            optimized_bid,
            expected_improvement: expected_improvement(previous_bid, optimized_bid, self.config.raise_upside_weight, self.config.lower_upside_weight),
            confidence,
            reason: optimization_reason(previous_bid, optimized_bid).to_string(),
            model_type: GameTheoryType::NASH_EQUILIBRIUM,
            created_at: now,
        });
        logln!(
            self.logger,
            LogEvent::Optimization,
            "recommendation {} for campaign {}: {:.2} -> {:.2} ({:+.2}%, {:?} confidence)",
            optimization.optimization_id,
            campaign.campaign_id,
            previous_bid,
            optimized_bid,
            optimization.expected_improvement,
            confidence
        );
        Some(optimization)
    }

    /// Apply every pending recommendation that is small and high confidence
    pub fn auto_apply(&self) -> Vec<BidOptimization> {
        let mut applied = Vec::new();
        for optimization in self.recommendations.list_by_status(OptimizationStatus::Pending) {
            if optimization.confidence != Confidence::High || !is_small_change(&optimization, self.config.auto_apply_max_change) {
                continue;
            }
            match self.apply_recommendation(optimization.optimization_id) {
                Ok(optimization) => applied.push(optimization),
                Err(e) if e.is_conflict() => {
                    logln!(self.logger, LogEvent::Optimization, "recommendation {} resolved elsewhere: {}", optimization.optimization_id, e)
                }
                Err(e) => errln!(self.logger, LogEvent::Optimization, "auto-apply of recommendation {} failed: {}", optimization.optimization_id, e),
            }
        }
        logln!(self.logger, LogEvent::Optimization, "auto-applied {} recommendations", applied.len());
        applied
    }

    /// Pending -> Applied, then move the campaign's max bid
    /// Concurrent callers for the same id: exactly one succeeds, the others get a conflict
    pub fn apply_recommendation(&self, optimization_id: u64) -> Result<BidOptimization, EngineError> {
        let pending = self
            .recommendations
            .get(optimization_id)
            .ok_or(EngineError::RecommendationNotFound(optimization_id))?;
        if self.campaigns.get(pending.campaign_id).is_none() {
            return Err(EngineError::CampaignNotFound(pending.campaign_id));
        }
        let applied = self.recommendations.transition(optimization_id, OptimizationStatus::Applied, Utc::now())?;
        self.campaigns.set_max_bid(applied.campaign_id, applied.optimized_bid)?;
        logln!(
            self.logger,
            LogEvent::Optimization,
            "applied recommendation {}: campaign {} max bid {:.2} -> {:.2}",
            optimization_id,
            applied.campaign_id,
            applied.previous_bid,
            applied.optimized_bid
        );
        Ok(applied)
    }

    pub fn reject_recommendation(&self, optimization_id: u64) -> Result<BidOptimization, EngineError> {
        let rejected = self.recommendations.transition(optimization_id, OptimizationStatus::Rejected, Utc::now())?;
        logln!(self.logger, LogEvent::Optimization, "rejected recommendation {}", optimization_id);
        Ok(rejected)
    }

    /// Run both passes on their configured intervals until the handle is stopped
    pub fn start(self: Arc<Self>) -> ScheduleHandle {
        let generation = self.config.generation_interval();
        let auto_apply = self.config.auto_apply_interval();
        self.start_with_intervals(generation, auto_apply)
    }

    pub fn start_with_intervals(self: Arc<Self>, generation: Duration, auto_apply: Duration) -> ScheduleHandle {
        let mut handle = ScheduleHandle { stops: Vec::new(), threads: Vec::new() };
        let generator = Arc::clone(&self);
        handle.spawn("generation", generation, move || {
            generator.generate_recommendations();
        });
        let applier = self;
        handle.spawn("auto-apply", auto_apply, move || {
            applier.auto_apply();
        });
        handle
    }
}

/// Running timer threads; stopping (or dropping) signals and joins them
pub struct ScheduleHandle {
    stops: Vec<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl ScheduleHandle {
    fn spawn<F>(&mut self, name: &str, interval: Duration, mut pass: F)
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name(format!("scheduler-{}", name))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => pass(),
                    _ => break,
                }
            });
        match thread {
            Ok(thread) => {
                self.stops.push(stop_tx);
                self.threads.push(thread);
            }
            Err(e) => eprintln!("could not start scheduler thread {}: {}", name, e),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for stop in self.stops.drain(..) {
            let _ = stop.send(());
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
