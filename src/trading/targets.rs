//! Take-profit and stop-loss levels for a new position.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::TargetConfig;
use crate::models::{InstrumentProfile, Side};

/// How the levels were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMethod {
    /// Multiples of the volatility at signal time
    Volatility,
    /// The instrument's static pip table
    StaticTable,
}

/// Targets (nearest first) and stop for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetLevels {
    pub targets: Vec<Decimal>,
    pub stop_loss: Decimal,
    pub method: TargetMethod,
}

/// Compute staged targets and a stop for an entry.
///
/// With a positive `volatility`, `T_k = entry ± m_k · vol` and
/// `SL = entry ∓ stop_multiplier · vol`. Without one, the profile's static
/// pip table is scaled by its pip unit. Every level is rounded to the
/// profile's quoting precision.
///
/// Volatility too small to keep the rounded levels at least one tick apart
/// (from the entry and from each other) falls back to the static table.
pub fn compute_targets(
    entry: Decimal,
    side: Side,
    volatility: Option<Decimal>,
    profile: &InstrumentProfile,
    config: &TargetConfig,
) -> TargetLevels {
    if let Some(vol) = volatility.filter(|v| *v > Decimal::ZERO) {
        let distances: Vec<Decimal> = config.multipliers.iter().map(|m| *m * vol).collect();
        let levels = place(
            entry,
            side,
            &distances,
            config.stop_multiplier * vol,
            profile,
            TargetMethod::Volatility,
        );
        if is_separated(entry, side, &levels, profile.tick_size()) {
            return levels;
        }
    }

    let distances: Vec<Decimal> = profile
        .static_targets_pips
        .iter()
        .map(|pips| profile.from_pips(*pips))
        .collect();
    place(
        entry,
        side,
        &distances,
        profile.from_pips(profile.static_stop_pips),
        profile,
        TargetMethod::StaticTable,
    )
}

fn place(
    entry: Decimal,
    side: Side,
    distances: &[Decimal],
    stop_distance: Decimal,
    profile: &InstrumentProfile,
    method: TargetMethod,
) -> TargetLevels {
    let sign = side.sign();
    TargetLevels {
        targets: distances
            .iter()
            .map(|d| profile.round_price(entry + sign * *d))
            .collect(),
        stop_loss: profile.round_price(entry - sign * stop_distance),
        method,
    }
}

/// Every level at least one tick past the previous one, in the side's
/// favorable direction for targets and adverse direction for the stop.
fn is_separated(entry: Decimal, side: Side, levels: &TargetLevels, tick: Decimal) -> bool {
    let sign = side.sign();
    let stop_clear = (entry - levels.stop_loss) * sign >= tick;

    let mut last = entry;
    let targets_clear = levels.targets.iter().all(|target| {
        let clear = (*target - last) * sign >= tick;
        last = *target;
        clear
    });

    stop_clear && targets_clear
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_volatility_targets_buy() {
        let profile = InstrumentProfile::for_symbol("EURUSD");
        let levels = compute_targets(
            dec!(1.10000),
            Side::Buy,
            Some(dec!(0.00050)),
            &profile,
            &TargetConfig::default(),
        );
        assert_eq!(levels.method, TargetMethod::Volatility);
        assert_eq!(levels.targets, vec![dec!(1.10050), dec!(1.10075), dec!(1.10100)]);
        // 1.099665 rounds half away from zero
        assert_eq!(levels.stop_loss, dec!(1.09967));
    }

    #[test]
    fn test_sell_levels_are_inverted() {
        let profile = InstrumentProfile::for_symbol("EURUSD");
        let levels = compute_targets(
            dec!(1.10000),
            Side::Sell,
            Some(dec!(0.00050)),
            &profile,
            &TargetConfig::default(),
        );
        assert_eq!(levels.targets, vec![dec!(1.09950), dec!(1.09925), dec!(1.09900)]);
        assert_eq!(levels.stop_loss, dec!(1.10034));
        assert!(levels.targets.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_missing_volatility_uses_static_table() {
        let config = TargetConfig::default();

        let eur = InstrumentProfile::for_symbol("EURUSD");
        let levels = compute_targets(dec!(1.10000), Side::Buy, None, &eur, &config);
        assert_eq!(levels.method, TargetMethod::StaticTable);
        assert_eq!(levels.targets, vec![dec!(1.1010), dec!(1.1020), dec!(1.1030)]);
        assert_eq!(levels.stop_loss, dec!(1.0985));

        let jpy = InstrumentProfile::for_symbol("USDJPY");
        let levels = compute_targets(dec!(150.000), Side::Buy, Some(Decimal::ZERO), &jpy, &config);
        assert_eq!(levels.method, TargetMethod::StaticTable);
        assert_eq!(levels.targets, vec![dec!(150.10), dec!(150.20), dec!(150.30)]);
        assert_eq!(levels.stop_loss, dec!(149.85));

        let gold = InstrumentProfile::for_symbol("XAUUSD");
        let levels = compute_targets(dec!(2300.00), Side::Sell, None, &gold, &config);
        assert_eq!(levels.targets, vec![dec!(2295.00), dec!(2290.00), dec!(2285.00)]);
        assert_eq!(levels.stop_loss, dec!(2307.50));
    }

    #[test]
    fn test_targets_strictly_monotonic_for_custom_multipliers() {
        let profile = InstrumentProfile::for_symbol("GBPUSD");
        let config = TargetConfig {
            multipliers: vec![dec!(0.5), dec!(1), dec!(3), dec!(4)],
            stop_multiplier: dec!(1),
        };
        let levels = compute_targets(dec!(1.27000), Side::Buy, Some(dec!(0.0012)), &profile, &config);
        assert_eq!(levels.targets.len(), 4);
        assert!(levels.targets.windows(2).all(|w| w[0] < w[1]));
        assert!(levels.stop_loss < dec!(1.27000));
    }

    #[test]
    fn test_sub_tick_volatility_falls_back_to_static_table() {
        let profile = InstrumentProfile::for_symbol("EURUSD");
        let entry = dec!(1.10000);

        let levels = compute_targets(
            entry,
            Side::Buy,
            Some(dec!(0.000004)),
            &profile,
            &TargetConfig::default(),
        );
        assert_eq!(levels.method, TargetMethod::StaticTable);
        assert!(levels.stop_loss < entry);
        assert!(levels.targets[0] > entry);
        assert!(levels.targets.windows(2).all(|w| w[0] < w[1]));

        let levels = compute_targets(
            entry,
            Side::Sell,
            Some(dec!(0.000004)),
            &profile,
            &TargetConfig::default(),
        );
        assert_eq!(levels.method, TargetMethod::StaticTable);
        assert!(levels.stop_loss > entry);
        assert!(levels.targets[0] < entry);
    }

    #[test]
    fn test_smallest_separated_volatility_is_kept() {
        let profile = InstrumentProfile::for_symbol("EURUSD");
        // Stop distance 0.0000201 rounds to two ticks; T3 sits one tick past T2
        let levels = compute_targets(
            dec!(1.10000),
            Side::Buy,
            Some(dec!(0.00003)),
            &profile,
            &TargetConfig::default(),
        );
        assert_eq!(levels.method, TargetMethod::Volatility);
        assert_eq!(levels.targets, vec![dec!(1.10003), dec!(1.10005), dec!(1.10006)]);
        assert_eq!(levels.stop_loss, dec!(1.09998));
    }
}
