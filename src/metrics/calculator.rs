//! Performance statistics over closed positions: win rate, profit factor,
//! drawdown, P&L dispersion.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

/// One closed trade as seen by the report.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOutcome {
    pub instrument: String,
    pub pnl: Decimal,
    /// `STOP_LOSS` or `FINAL_TARGET`
    pub close_reason: Option<String>,
}

/// Aggregate statistics of closed trades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Trades closed at exactly zero P&L
    pub flat_trades: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: f64,
    pub expectancy: Decimal,
    /// Mean and sample standard deviation of per-trade P&L
    pub mean_pnl: f64,
    pub std_dev_pnl: f64,
    /// Largest peak-to-trough drop of cumulative P&L, in money
    pub max_drawdown: Decimal,
    pub stop_outs: u32,
    pub final_target_exits: u32,
    /// Trade count and P&L per instrument
    pub by_instrument: BTreeMap<String, (u32, Decimal)>,
}

/// Calculator for performance reports.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Build a report from closed trades in close order.
    pub fn calculate(trades: &[TradeOutcome]) -> PerformanceReport {
        let mut report = PerformanceReport::default();
        if trades.is_empty() {
            return report;
        }

        let pnls: Vec<Decimal> = trades.iter().map(|t| t.pnl).collect();
        Self::calculate_pnl_metrics(&mut report, &pnls);
        Self::calculate_drawdown(&mut report, &pnls);
        Self::calculate_dispersion(&mut report, &pnls);

        for trade in trades {
            match trade.close_reason.as_deref() {
                Some("STOP_LOSS") => report.stop_outs += 1,
                Some("FINAL_TARGET") => report.final_target_exits += 1,
                _ => {}
            }
            let entry = report
                .by_instrument
                .entry(trade.instrument.clone())
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += trade.pnl;
        }

        report
    }

    /// Calculate P&L-related metrics.
    fn calculate_pnl_metrics(report: &mut PerformanceReport, pnls: &[Decimal]) {
        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

        report.total_trades = pnls.len() as u32;
        report.winning_trades = wins.len() as u32;
        report.losing_trades = losses.len() as u32;
        report.flat_trades = report.total_trades - report.winning_trades - report.losing_trades;
        report.total_pnl = pnls.iter().copied().sum();
        report.win_rate = wins.len() as f64 / pnls.len() as f64;

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();

        if !wins.is_empty() {
            report.avg_win = gross_profit / Decimal::from(wins.len() as u32);
        }
        if !losses.is_empty() {
            report.avg_loss = gross_loss / Decimal::from(losses.len() as u32);
        }

        // Profit factor
        if gross_loss > Decimal::ZERO {
            report.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        } else if gross_profit > Decimal::ZERO {
            report.profit_factor = f64::INFINITY;
        }

        report.expectancy = report.total_pnl / Decimal::from(pnls.len() as u32);
    }

    /// Calculate maximum drawdown of the cumulative P&L curve.
    fn calculate_drawdown(report: &mut PerformanceReport, pnls: &[Decimal]) {
        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;

        for pnl in pnls {
            equity += pnl;
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }

        report.max_drawdown = max_dd;
    }

    fn calculate_dispersion(report: &mut PerformanceReport, pnls: &[Decimal]) {
        let values: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if values.is_empty() {
            return;
        }

        report.mean_pnl = values.iter().mean();
        if values.len() >= 2 {
            report.std_dev_pnl = values.iter().std_dev();
        }
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Performance Report ===")?;
        writeln!(f, "Closed Trades:    {}", self.total_trades)?;
        writeln!(f, "Winning:          {}", self.winning_trades)?;
        writeln!(f, "Losing:           {}", self.losing_trades)?;
        writeln!(f, "Flat:             {}", self.flat_trades)?;
        writeln!(f, "Win Rate:         {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Total P&L:        {:.2}", self.total_pnl)?;
        writeln!(f, "Avg Win:          {:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:         {:.2}", self.avg_loss)?;
        writeln!(f, "Profit Factor:    {:.2}", self.profit_factor)?;
        writeln!(f, "Expectancy:       {:.2}", self.expectancy)?;
        writeln!(f, "Mean P&L:         {:.2}", self.mean_pnl)?;
        writeln!(f, "Std Dev P&L:      {:.2}", self.std_dev_pnl)?;
        writeln!(f, "Max Drawdown:     {:.2}", self.max_drawdown)?;
        writeln!(f, "Stop Outs:        {}", self.stop_outs)?;
        writeln!(f, "Final Target:     {}", self.final_target_exits)?;

        if !self.by_instrument.is_empty() {
            writeln!(f, "\n--- By Instrument ---")?;
            for (instrument, (count, pnl)) in &self.by_instrument {
                writeln!(f, "  {:<10} {:>4} trades  {:>12.2}", instrument, count, pnl)?;
            }
        }
        Ok(())
    }
}
