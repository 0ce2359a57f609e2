//! Game-theoretic real-time bidding engine
//!
//! Prices ad-auction requests from a Nash equilibrium over learned payoff matrices, feeds
//! auction outcomes back into the models and runs the bid-optimization recommendation lifecycle.

pub mod logger;
pub mod error;
pub mod config;
pub mod utils;
pub mod sigmoid;
pub mod campaign;
pub mod campaign_store;
pub mod user_profiles;
pub mod auction;
pub mod prediction;
pub mod competitors;
pub mod payoff_matrix;
pub mod game_theory;
pub mod nash_equilibrium;
pub mod decision;
pub mod recommendations;
pub mod scheduler;
pub mod exchange;
pub mod charts;
