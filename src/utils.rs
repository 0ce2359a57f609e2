use rand_distr::LogNormal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Base seed for every RNG in the process; the scenario runner sets it per iteration
pub static RAND_SEED: AtomicU64 = AtomicU64::new(0);

/// When set, every decision is logged on the Auction event
pub static VERBOSE_AUCTION: AtomicBool = AtomicBool::new(false);

/// Derive a seed for one random stream
/// Different salts give independent streams, the same salt is reproducible for a given RAND_SEED
pub fn get_seed(salt: u64) -> u64 {
    RAND_SEED
        .load(Ordering::Relaxed)
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(salt)
}

/// Round a money amount half-up to two decimals
/// The small nudge keeps values like 1.44 (stored as 1.43999...) from rounding down
pub fn round_money(value: f64) -> f64 {
    if value >= 0.0 {
        ((value * 100.0) + 1e-9).round() / 100.0
    } else {
        -round_money(-value)
    }
}

/// Convert mean and standard deviation to log-normal distribution parameters
/// Returns (μ, σ) for LogNormal(μ, σ) that approximates the given mean and stddev
///
/// To convert from mean (m) and stddev (s):
/// - σ = sqrt(ln(1 + s²/m²))
/// - μ = ln(m) - σ²/2
fn lognormal_from_mean_stddev(mean: f64, stddev: f64) -> (f64, f64) {
    let variance = stddev * stddev;
    let sigma_squared = (1.0 + variance / (mean * mean)).ln();
    let sigma = sigma_squared.sqrt();
    let mu = mean.ln() - sigma_squared / 2.0;
    (mu, sigma)
}

/// Create a log-normal distribution from mean and standard deviation
/// Returns None when the parameters do not describe a valid distribution
pub fn create_lognormal(mean: f64, stddev: f64) -> Option<LogNormal<f64>> {
    if mean <= 0.0 || stddev < 0.0 {
        return None;
    }
    let (mu, sigma) = lognormal_from_mean_stddev(mean, stddev);
    LogNormal::new(mu, sigma).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::Distribution;

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(1.005000001), 1.01);
        assert_eq!(round_money(1.0049), 1.0);
        assert_eq!(round_money(0.6 * 2.0 * 1.2), 1.44);
        assert_eq!(round_money(2.675), 2.68);
        assert_eq!(round_money(-1.255), -1.26);
    }

    #[test]
    fn test_lognormal_mean_is_close() {
        let dist = create_lognormal(2.0, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.05, "mean was {}", mean);
    }

    #[test]
    fn test_lognormal_rejects_bad_parameters() {
        assert!(create_lognormal(0.0, 1.0).is_none());
        assert!(create_lognormal(1.0, -1.0).is_none());
    }

    #[test]
    fn test_seed_streams_differ() {
        assert_ne!(get_seed(1), get_seed(2));
    }
}
