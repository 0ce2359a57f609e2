use chrono::{DateTime, NaiveDate, Utc};

use crate::utils::round_money;

/// Campaign type determining what the advertiser pays for
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignType {
    /// Cost per click
    CPC,
    /// Cost per thousand impressions
    CPM,
    /// Cost per acquisition
    CPA,
    /// Clicks and conversions both matter
    HYBRID,
}

impl CampaignType {
    /// Value of one conversion expressed in clicks, used when scoring a bid
    pub fn objective_weight(&self) -> f64 {
        match self {
            CampaignType::CPC => 1.0,
            CampaignType::CPA => 20.0,
            CampaignType::HYBRID => 10.0,
            CampaignType::CPM => 5.0,
        }
    }

    /// Starting point for the per-user value estimate
    pub fn base_user_value(&self) -> f64 {
        match self {
            CampaignType::CPC => 0.5,
            CampaignType::CPA => 1.0,
            CampaignType::CPM => 0.2,
            CampaignType::HYBRID => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    pub total: f64,
    pub remaining: f64,
    pub daily: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BidBounds {
    /// Campaign never bids below this
    pub floor: f64,
    /// Campaign never bids above this; the optimization lifecycle moves it
    pub max: f64,
}

/// Performance targets; missing targets fall back to fixed constants in prediction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Targets {
    pub ctr: Option<f64>,
    pub cvr: Option<f64>,
}

/// Open-ended on either side when a bound is None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let started = self.start.map_or(true, |start| now >= start);
        let not_ended = self.end.map_or(true, |end| now <= end);
        started && not_ended
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Creative {
    pub creative_id: u64,
    pub width: u32,
    pub height: u32,
    pub active: bool,
}

impl Creative {
    pub fn new(creative_id: u64, width: u32, height: u32) -> Self {
        Self { creative_id, width, height, active: true }
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.active && self.width == width && self.height == height
    }
}

/// One day of delivery for a campaign
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignMetric {
    pub date: NaiveDate,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub spend: f64,
    pub click_through_rate: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub cost_per_click: Option<f64>,
    pub cost_per_mille: Option<f64>,
    pub cost_per_acquisition: Option<f64>,
}

impl CampaignMetric {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            impressions: 0,
            clicks: 0,
            conversions: 0,
            spend: 0.0,
            click_through_rate: None,
            conversion_rate: None,
            cost_per_click: None,
            cost_per_mille: None,
            cost_per_acquisition: None,
        }
    }

    pub fn apply(&mut self, event: MetricEvent) {
        match event {
            MetricEvent::Impression { spend } => {
                self.impressions += 1;
                self.spend += spend;
            }
            MetricEvent::Click => self.clicks += 1,
            MetricEvent::Conversion => self.conversions += 1,
        }
        self.recompute_derived();
    }

    fn recompute_derived(&mut self) {
        if self.impressions > 0 {
            self.click_through_rate = Some(self.clicks as f64 / self.impressions as f64);
            self.cost_per_mille = Some(round_money(self.spend * 1000.0 / self.impressions as f64));
        }
        if self.clicks > 0 {
            self.conversion_rate = Some(self.conversions as f64 / self.clicks as f64);
            self.cost_per_click = Some(round_money(self.spend / self.clicks as f64));
        }
        if self.conversions > 0 {
            self.cost_per_acquisition = Some(round_money(self.spend / self.conversions as f64));
        }
    }
}

/// Delivery events appended to a campaign's daily metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricEvent {
    /// A won auction; spend is the clearing price and is debited from the budget
    Impression { spend: f64 },
    Click,
    Conversion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub campaign_id: u64,
    pub campaign_name: String,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub budget: Budget,
    pub bids: BidBounds,
    pub targets: Targets,
    pub schedule: Schedule,
    pub creatives: Vec<Creative>,
    pub metrics: Vec<CampaignMetric>,
}

impl Campaign {
    /// Create an active, unscheduled campaign with a full budget and no creatives
    pub fn new(campaign_id: u64, campaign_name: &str, campaign_type: CampaignType, total_budget: f64, bid_floor: f64, max_bid_price: f64) -> Self {
        Self {
            campaign_id,
            campaign_name: campaign_name.to_string(),
            campaign_type,
            status: CampaignStatus::Active,
            budget: Budget { total: total_budget, remaining: total_budget, daily: None },
            bids: BidBounds { floor: bid_floor, max: max_bid_price },
            targets: Targets::default(),
            schedule: Schedule::default(),
            creatives: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn with_creative(mut self, creative: Creative) -> Self {
        self.creatives.push(creative);
        self
    }

    pub fn with_targets(mut self, ctr: Option<f64>, cvr: Option<f64>) -> Self {
        self.targets = Targets { ctr, cvr };
        self
    }

    pub fn with_schedule(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.schedule = Schedule { start, end };
        self
    }

    pub fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }

    /// Remaining budget is capped at the total
    pub fn with_remaining_budget(mut self, remaining: f64) -> Self {
        self.budget.remaining = remaining.min(self.budget.total);
        self
    }

    pub fn with_metric(mut self, metric: CampaignMetric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn has_budget(&self) -> bool {
        self.budget.remaining > 0.0
    }

    /// Active, inside the schedule window and still able to spend
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active && self.schedule.contains(now) && self.has_budget()
    }

    /// First active creative with exactly the requested dimensions
    pub fn matching_creative(&self, width: u32, height: u32) -> Option<&Creative> {
        self.creatives.iter().find(|creative| creative.fits(width, height))
    }

    /// Apply a delivery event to today's metric, creating the day on first use
    /// Impressions also debit the budget, which never goes below zero
    pub fn record(&mut self, date: NaiveDate, event: MetricEvent) {
        if let MetricEvent::Impression { spend } = event {
            self.budget.remaining = (self.budget.remaining - spend).max(0.0);
        }
        match self.metrics.iter_mut().find(|metric| metric.date == date) {
            Some(metric) => metric.apply(event),
            None => {
                let mut metric = CampaignMetric::new(date);
                metric.apply(event);
                self.metrics.push(metric);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn campaign() -> Campaign {
        Campaign::new(1, "Tech Gadget Promotion", CampaignType::CPC, 1000.0, 0.10, 2.00)
            .with_creative(Creative::new(1, 300, 250))
            .with_creative(Creative::new(2, 728, 90))
    }

    #[test]
    fn test_matching_creative_requires_exact_dimensions_and_active() {
        let mut campaign = campaign();
        assert_eq!(campaign.matching_creative(300, 250).map(|c| c.creative_id), Some(1));
        assert!(campaign.matching_creative(300, 251).is_none());

        campaign.creatives[0].active = false;
        assert!(campaign.matching_creative(300, 250).is_none());
    }

    #[test]
    fn test_is_running_checks_status_schedule_and_budget() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let running = campaign().with_schedule(Some(now - Duration::days(1)), Some(now + Duration::days(30)));
        assert!(running.is_running(now));

        assert!(!running.clone().with_status(CampaignStatus::Paused).is_running(now));
        assert!(!running.clone().with_remaining_budget(0.0).is_running(now));
        assert!(!running.is_running(now + Duration::days(31)));
        assert!(!running.is_running(now - Duration::days(2)));
    }

    #[test]
    fn test_remaining_budget_never_exceeds_total() {
        let campaign = campaign().with_remaining_budget(5000.0);
        assert_eq!(campaign.budget.remaining, 1000.0);
    }

    #[test]
    fn test_record_impression_debits_budget_and_updates_metrics() {
        let mut campaign = campaign();
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        campaign.record(day, MetricEvent::Impression { spend: 1.5 });
        campaign.record(day, MetricEvent::Impression { spend: 0.5 });
        campaign.record(day, MetricEvent::Click);
        campaign.record(day, MetricEvent::Conversion);

        assert_eq!(campaign.budget.remaining, 998.0);
        assert_eq!(campaign.metrics.len(), 1);
        let metric = &campaign.metrics[0];
        assert_eq!(metric.impressions, 2);
        assert_eq!(metric.clicks, 1);
        assert_eq!(metric.conversions, 1);
        assert_eq!(metric.click_through_rate, Some(0.5));
        assert_eq!(metric.cost_per_click, Some(2.0));
        assert_eq!(metric.cost_per_mille, Some(1000.0));
        assert_eq!(metric.cost_per_acquisition, Some(2.0));
    }

    #[test]
    fn test_budget_debit_stops_at_zero() {
        let mut campaign = campaign().with_remaining_budget(1.0);
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        campaign.record(day, MetricEvent::Impression { spend: 1.75 });
        assert_eq!(campaign.budget.remaining, 0.0);
        assert!(!campaign.has_budget());
    }

    #[test]
    fn test_objective_weights() {
        assert_eq!(CampaignType::CPC.objective_weight(), 1.0);
        assert_eq!(CampaignType::CPA.objective_weight(), 20.0);
        assert_eq!(CampaignType::HYBRID.objective_weight(), 10.0);
        assert_eq!(CampaignType::CPM.objective_weight(), 5.0);
    }
}
