use super::ema::Ema;

/// MACD line (fast EMA − slow EMA) and its signal-line EMA.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    pub line: f64,
    pub signal_line: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            line: 0.0,
            signal_line: 0.0,
        }
    }

    /// Feed one close, return `(macd, signal)`.
    pub fn update(&mut self, close: f64) -> (f64, f64) {
        self.line = self.fast.update(close) - self.slow.update(close);
        self.signal_line = self.signal.update(self.line);
        (self.line, self.signal_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_series_has_macd_above_signal() {
        let mut macd = Macd::new(12, 26, 9);
        for i in 0..100 {
            macd.update(1.0 + i as f64 * 0.001);
        }
        assert!(macd.line > 0.0);
        assert!(macd.line >= macd.signal_line);
    }

    #[test]
    fn test_flat_series_is_zero() {
        let mut macd = Macd::new(12, 26, 9);
        for _ in 0..50 {
            macd.update(1.2345);
        }
        assert!(macd.line.abs() < 1e-12);
        assert!(macd.signal_line.abs() < 1e-12);
    }
}
