/// Logistic curve used for win probability as a function of price
///
/// get_probability(x) = 1 / (1 + exp(-(x - offset) * scale))

const EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sigmoid {
    pub offset: f64,
    pub scale: f64,
}

impl Sigmoid {
    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    pub fn get_probability(&self, x: f64) -> f64 {
        1.0 / (1.0 + (-(x - self.offset) * self.scale).exp())
    }

    /// x such that get_probability(x) = y
    pub fn inverse(&self, y: f64) -> f64 {
        let y_clamped = y.clamp(EPSILON / 10.0, 1.0 - EPSILON / 10.0);
        (y_clamped.ln() - (1.0 - y_clamped).ln()) / self.scale + self.offset
    }
}
