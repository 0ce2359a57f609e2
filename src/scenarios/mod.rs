use nashbid::config::EngineConfig;
use nashbid::logger::{LogEvent, Logger};
use nashbid::{errln, logln};
use std::error::Error;
use std::sync::Arc;

/// Function type for scenario entry functions
pub type ScenarioFn = fn(scenario_name: &str, config: &EngineConfig, logger: &Arc<Logger>) -> Result<(), Box<dyn Error>>;

/// Entry in the scenario catalog
#[derive(Clone)]
pub struct ScenarioEntry {
    pub short_name: &'static str,
    pub run: ScenarioFn,
}

inventory::collect!(ScenarioEntry);

/// Get all registered scenarios from the catalog, sorted by name
pub fn get_scenario_catalog() -> Vec<ScenarioEntry> {
    let mut scenarios: Vec<ScenarioEntry> = inventory::iter::<ScenarioEntry>.into_iter().cloned().collect();
    scenarios.sort_by_key(|entry| entry.short_name);
    scenarios
}

/// Collects validation results; each check is logged as it happens
pub struct Validations<'a> {
    logger: &'a Logger,
    errors: Vec<String>,
}

impl<'a> Validations<'a> {
    pub fn new(logger: &'a Logger) -> Self {
        logln!(logger, LogEvent::Scenario, "");
        logln!(logger, LogEvent::Scenario, "=== Validation Results ===");
        Self { logger, errors: Vec::new() }
    }

    pub fn check(&mut self, passed: bool, msg: String) {
        if passed {
            logln!(self.logger, LogEvent::Scenario, "✓ {}", msg);
        } else {
            errln!(self.logger, LogEvent::Scenario, "✗ {}", msg);
            self.errors.push(msg);
        }
    }

    pub fn finish(self, scenario_name: &str) -> Result<(), Box<dyn Error>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(format!("Scenario '{}' validation failed:\n{}", scenario_name, self.errors.join("\n")).into())
        }
    }
}

pub mod steady_market;
pub mod recommendation_lifecycle;
