use nalgebra::{DMatrix, DVector};

/// Our expected payoff for every (own bid level, competitor bid level) pair
///
/// Level i stands for a bid of (i + 1) / N of the campaign's max bid.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoffMatrix {
    cells: DMatrix<f64>,
}

/// Where an equilibrium distribution came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquilibriumSource {
    Solved,
    /// The linear system was singular or produced no usable distribution
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Equilibrium {
    /// Probability of each bid level; non-negative and summing to one
    pub distribution: Vec<f64>,
    pub source: EquilibriumSource,
}

impl Equilibrium {
    /// Probability-weighted bid level as a fraction of the max bid
    pub fn expected_level(&self) -> f64 {
        let n = self.distribution.len() as f64;
        self.distribution
            .iter()
            .enumerate()
            .map(|(i, p)| (i as f64 + 1.0) / n * p)
            .sum()
    }
}

/// Deterministic distribution weighting level i by i + 1
pub fn fallback_distribution(levels: usize) -> Vec<f64> {
    let total = (levels * (levels + 1) / 2) as f64;
    (0..levels).map(|i| (i as f64 + 1.0) / total).collect()
}

impl PayoffMatrix {
    /// "Higher bid wins" prior: winning at level i pays 1 - i/N, losing pays nothing
    pub fn prior(levels: usize) -> Self {
        let n = levels as f64;
        Self {
            cells: DMatrix::from_fn(levels, levels, |i, j| if i > j { 1.0 - i as f64 / n } else { 0.0 }),
        }
    }

    pub fn zeros(levels: usize) -> Self {
        Self { cells: DMatrix::zeros(levels, levels) }
    }

    pub fn levels(&self) -> usize {
        self.cells.nrows()
    }

    pub fn get(&self, own_level: usize, competitor_level: usize) -> f64 {
        self.cells[(own_level, competitor_level)]
    }

    pub fn set(&mut self, own_level: usize, competitor_level: usize, value: f64) {
        self.cells[(own_level, competitor_level)] = value;
    }

    /// Discretize a bid against the max bid it was derived from
    pub fn level_index(&self, bid: f64, max_bid: f64) -> usize {
        let top = self.levels() - 1;
        if max_bid <= 0.0 || !bid.is_finite() {
            return top;
        }
        let index = (bid / max_bid * self.levels() as f64).floor();
        if index <= 0.0 {
            0
        } else {
            (index as usize).min(top)
        }
    }

    /// Exponential moving average of one cell towards a realized utility
    pub fn update(&mut self, own_level: usize, competitor_level: usize, utility: f64, learning_rate: f64) {
        let cell = &mut self.cells[(own_level, competitor_level)];
        *cell = (1.0 - learning_rate) * *cell + learning_rate * utility;
    }

    /// Mixed strategy of the symmetric zero-sum game defined by this matrix
    ///
    /// Solves the (N+1)x(N+1) system
    ///   sum_j payoff[j][i] * s_j - v = 0   for every level i
    ///   sum_j s_j = 1
    /// by LU decomposition. Negative weights are clamped and the rest renormalized.
    /// Anything unusable falls back to `fallback_distribution`, so this never fails.
    pub fn solve_equilibrium(&self) -> Equilibrium {
        let n = self.levels();
        let coefficients = DMatrix::from_fn(n + 1, n + 1, |row, col| match (row < n, col < n) {
            (true, true) => self.cells[(col, row)],
            (true, false) => -1.0,
            (false, true) => 1.0,
            (false, false) => 0.0,
        });
        let rhs = DVector::from_fn(n + 1, |row, _| if row == n { 1.0 } else { 0.0 });

        let solution = match coefficients.lu().solve(&rhs) {
            Some(solution) if solution.iter().all(|x| x.is_finite()) => solution,
            _ => return Self::fallback(n),
        };

        let clamped: Vec<f64> = solution.iter().take(n).map(|x| x.max(0.0)).collect();
        let sum: f64 = clamped.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Self::fallback(n);
        }
        Equilibrium {
            distribution: clamped.iter().map(|x| x / sum).collect(),
            source: EquilibriumSource::Solved,
        }
    }

    fn fallback(levels: usize) -> Equilibrium {
        Equilibrium {
            distribution: fallback_distribution(levels),
            source: EquilibriumSource::Fallback,
        }
    }
}
