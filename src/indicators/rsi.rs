/// RSI with Wilder smoothing (α = 1/period) of average gain and loss.
///
/// The first close-to-close change seeds both averages; there is no SMA
/// warm-up.
/// `avg_loss == 0` saturates at 100 instead of dividing by zero.
#[derive(Debug, Clone)]
pub struct Rsi {
    alpha: f64,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    seeded: bool,
    pub value: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 1.0 / period.max(1) as f64,
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            seeded: false,
            value: 50.0,
        }
    }

    pub fn update(&mut self, close: f64) -> f64 {
        if !close.is_finite() {
            return self.value;
        }

        let Some(prev) = self.prev_close.replace(close) else {
            return self.value;
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if self.seeded {
            self.avg_gain = self.alpha * gain + (1.0 - self.alpha) * self.avg_gain;
            self.avg_loss = self.alpha * loss + (1.0 - self.alpha) * self.avg_loss;
        } else {
            self.avg_gain = gain;
            self.avg_loss = loss;
            self.seeded = true;
        }

        self.value = if self.avg_loss <= 0.0 {
            100.0
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_gains_saturate_at_100() {
        let mut rsi = Rsi::new(14);
        for close in [1.0, 1.1, 1.2, 1.3, 1.4] {
            rsi.update(close);
        }
        assert_eq!(rsi.value, 100.0);
    }

    #[test]
    fn test_all_losses_go_to_zero() {
        let mut rsi = Rsi::new(14);
        for close in [1.4, 1.3, 1.2, 1.1, 1.0] {
            rsi.update(close);
        }
        assert!(rsi.value.abs() < 1e-9);
    }

    #[test]
    fn test_balanced_moves_sit_near_50() {
        let mut rsi = Rsi::new(4);
        let mut price = 100.0;
        for i in 0..200 {
            price += if i % 2 == 0 { 1.0 } else { -1.0 };
            rsi.update(price);
        }
        assert!((rsi.value - 50.0).abs() < 15.0, "rsi = {}", rsi.value);
    }

    #[test]
    fn test_non_finite_close_is_skipped() {
        let mut rsi = Rsi::new(3);
        rsi.update(100.0);
        rsi.update(99.0);
        let before = rsi.value;
        assert_eq!(rsi.update(f64::NAN), before);
        assert!(rsi.update(101.0) > before);
    }
}
