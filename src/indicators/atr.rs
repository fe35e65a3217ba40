use crate::models::Bar;

/// Average True Range, Wilder smoothing (α = 1/period).
///
/// The first bar's high-low range seeds the average.
#[derive(Debug, Clone)]
pub struct Atr {
    alpha: f64,
    prev_close: Option<f64>,
    pub value: f64,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 1.0 / period.max(1) as f64,
            prev_close: None,
            value: 0.0,
        }
    }

    pub fn update(&mut self, bar: &Bar) -> f64 {
        let tr = bar.true_range(self.prev_close);
        self.value = match self.prev_close {
            None => tr,
            Some(_) => self.alpha * tr + (1.0 - self.alpha) * self.value,
        };
        self.prev_close = Some(bar.close);
        self.value
    }
}
