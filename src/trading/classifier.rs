//! Signal classifier: trend, momentum and oscillator gates over two
//! consecutive indicator snapshots.

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::config::{ClassifierConfig, MomentumRule};
use crate::indicators::IndicatorSnapshot;
use crate::models::{Direction, Gate, Side, Signal, SignalSource};

/// Classify the latest snapshot into BUY, SELL or NONE.
///
/// `previous` is the snapshot of the bar before `current`; only
/// [`MomentumRule::PrimaryCrossover`] looks at it.
pub fn classify(
    instrument: &str,
    current: &IndicatorSnapshot,
    previous: &IndicatorSnapshot,
    config: &ClassifierConfig,
) -> Signal {
    let reference_price = Decimal::from_f64(current.close).unwrap_or_default();
    let volatility_at_signal = Decimal::from_f64(current.volatility)
        .filter(|v| current.volatility.is_finite() && *v > Decimal::ZERO);

    let mut signal = Signal {
        instrument: instrument.to_string(),
        direction: Direction::None,
        reasons: Vec::with_capacity(3),
        rejected_by: None,
        reference_price,
        needs_fallback_targets: volatility_at_signal.is_none(),
        volatility_at_signal,
        source: SignalSource::Indicators,
        created_at: current.as_of,
    };

    // Trend gate
    let side = if current.fast_average > current.slow_average {
        signal.reasons.push(format!(
            "uptrend: fast avg {:.5} > slow avg {:.5}",
            current.fast_average, current.slow_average
        ));
        Side::Buy
    } else if current.fast_average < current.slow_average {
        signal.reasons.push(format!(
            "downtrend: fast avg {:.5} < slow avg {:.5}",
            current.fast_average, current.slow_average
        ));
        Side::Sell
    } else {
        return reject(signal, Gate::Trend, "no trend bias: averages equal".to_string());
    };

    // Momentum gate
    match momentum_confirms(side, current, previous, config.momentum_rule) {
        Ok(reason) => signal.reasons.push(reason),
        Err(reason) => return reject(signal, Gate::Momentum, reason),
    }

    // Oscillator gate
    let band = match side {
        Side::Buy => config.buy_band,
        Side::Sell => config.sell_band,
    };
    if band.contains(current.oscillator) {
        signal.reasons.push(format!(
            "oscillator {:.1} within [{}, {}]",
            current.oscillator, band.min, band.max
        ));
    } else {
        return reject(
            signal,
            Gate::Oscillator,
            format!(
                "oscillator {:.1} outside [{}, {}] for {}",
                current.oscillator, band.min, band.max, side
            ),
        );
    }

    signal.direction = side.into();
    signal
}

/// Directional signal injected from outside the classifier (webhook, manual
/// override). It bypasses every gate.
pub fn external_signal(
    instrument: &str,
    side: Side,
    reference_price: Decimal,
    volatility: Option<Decimal>,
    note: Option<&str>,
) -> Signal {
    let volatility_at_signal = volatility.filter(|v| *v > Decimal::ZERO);
    let mut reasons = vec![format!("external {} signal", side)];
    if let Some(note) = note.filter(|n| !n.is_empty()) {
        reasons.push(note.to_string());
    }
    Signal {
        instrument: instrument.to_string(),
        direction: side.into(),
        reasons,
        rejected_by: None,
        reference_price,
        needs_fallback_targets: volatility_at_signal.is_none(),
        volatility_at_signal,
        source: SignalSource::External,
        created_at: Utc::now(),
    }
}

fn momentum_confirms(
    side: Side,
    current: &IndicatorSnapshot,
    previous: &IndicatorSnapshot,
    rule: MomentumRule,
) -> Result<String, String> {
    match rule {
        MomentumRule::SecondaryPair => {
            let (fast, slow) = (current.momentum_fast, current.momentum_slow);
            let ok = match side {
                Side::Buy => fast > slow,
                Side::Sell => fast < slow,
            };
            if ok {
                Ok(format!("momentum {:.6} confirms {} vs signal {:.6}", fast, side, slow))
            } else {
                Err(format!(
                    "momentum {:.6} does not confirm {} vs signal {:.6}",
                    fast, side, slow
                ))
            }
        }
        MomentumRule::PrimaryCrossover => {
            let crossed = match side {
                Side::Buy => previous.fast_average <= previous.slow_average,
                Side::Sell => previous.fast_average >= previous.slow_average,
            };
            if crossed {
                Ok(format!("fresh {} crossover since previous bar", side))
            } else {
                Err(format!("no fresh {} crossover since previous bar", side))
            }
        }
    }
}

fn reject(mut signal: Signal, gate: Gate, reason: String) -> Signal {
    signal.reasons.push(reason);
    signal.rejected_by = Some(gate);
    signal.direction = Direction::None;
    signal
}
