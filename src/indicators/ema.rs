/// Exponential Moving Average, incremental.
///
/// Seeded with the first price, no SMA warm-up:
///   bar 0  → value = price
///   bar 1+ → value = α·price + (1−α)·prev   where α = 2/(period+1)
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    pub value: f64,
    count: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 2.0 / (period.max(1) as f64 + 1.0),
            value: 0.0,
            count: 0,
        }
    }

    /// Feed one price, return the current EMA value.
    pub fn update(&mut self, price: f64) -> f64 {
        if self.count == 0 {
            self.value = price;
        } else {
            self.value = self.alpha * price + (1.0 - self.alpha) * self.value;
        }
        self.count += 1;
        self.value
    }
}
