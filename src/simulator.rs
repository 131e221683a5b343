//! Replays a [MarketState] against a network's decisions.
//!
//! Each tick runs, in order: the network step, day rollover, stop-loss / take-profit at the
//! current price, the daily loss halt, the decision itself, and finally marking the account to
//! the next tick's price. The first `lookback_periods` ticks only prime the network.

use crate::{
    config::{EvaluationConfig, TradingConfig},
    error::EvaluationError,
    market::MarketState,
    network::{Decision, Network},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const BEHAVIOR_DIMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    #[inline]
    fn sign(self) -> f64 {
        match self {
            Self::Long => 1.,
            Self::Short => -1.,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    EndOfData,
    /// closed at the price that wiped the account out
    Bankruptcy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_step: usize,
    pub entry_price: f64,
    pub quantity: f64,
    /// commission and slippage paid to open
    pub entry_cost: f64,
}

impl Position {
    /// Relative move in the position's favour since entry
    #[inline]
    pub fn unrealized_pct(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price) / self.entry_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub direction: Direction,
    pub entry_step: usize,
    pub exit_step: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// net of entry and exit costs
    pub pnl: f64,
    pub reason: ExitReason,
}

/// Per-evaluation trading state, created fresh for every run
#[derive(Debug, Clone)]
pub struct Account {
    pub cash: f64,
    pub position: Option<Position>,
    pub trades: Vec<Trade>,
    pub realized_pnl: f64,
    pub costs_paid: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub day: Option<NaiveDate>,
    pub day_start_equity: f64,
    /// set once the day's loss limit is hit, cleared on the next day
    pub halted: bool,
}

impl Account {
    pub fn new(capital: f64) -> Self {
        Self {
            cash: capital,
            position: None,
            trades: vec![],
            realized_pnl: 0.,
            costs_paid: 0.,
            peak_equity: capital,
            max_drawdown: 0.,
            day: None,
            day_start_equity: capital,
            halted: false,
        }
    }

    /// Cash plus the open position marked at `price`
    pub fn equity(&self, price: f64) -> f64 {
        self.cash
            + self
                .position
                .as_ref()
                .map_or(0., |p| p.direction.sign() * p.quantity * price)
    }

    /// Loss since the start of the day as a fraction of day-start equity
    pub fn daily_loss(&self, price: f64) -> f64 {
        if self.day_start_equity > 0. {
            (self.day_start_equity - self.equity(price)) / self.day_start_equity
        } else {
            0.
        }
    }

    fn cost(notional: f64, config: &TradingConfig) -> f64 {
        notional * (config.commission + config.slippage)
    }

    pub fn open(
        &mut self,
        direction: Direction,
        step: usize,
        price: f64,
        config: &TradingConfig,
    ) {
        let notional = config.max_position_size * self.equity(price);
        if notional <= 0. || self.position.is_some() {
            return;
        }
        let quantity = notional / price;
        let cost = Self::cost(notional, config);
        self.cash -= direction.sign() * quantity * price + cost;
        self.costs_paid += cost;
        self.position = Some(Position {
            direction,
            entry_step: step,
            entry_price: price,
            quantity,
            entry_cost: cost,
        });
    }

    pub fn close(&mut self, step: usize, price: f64, reason: ExitReason, config: &TradingConfig) {
        let Some(pos) = self.position.take() else {
            return;
        };
        let cost = Self::cost(pos.quantity * price, config);
        self.cash += pos.direction.sign() * pos.quantity * price - cost;
        self.costs_paid += cost;

        let pnl = pos.direction.sign() * (price - pos.entry_price) * pos.quantity
            - pos.entry_cost
            - cost;
        self.realized_pnl += pnl;
        self.trades.push(Trade {
            direction: pos.direction,
            entry_step: pos.entry_step,
            exit_step: step,
            entry_price: pos.entry_price,
            exit_price: price,
            quantity: pos.quantity,
            pnl,
            reason,
        });
    }

    /// Buy and sell open, or flip into, the matching direction. Holding, or repeating the
    /// current direction, changes nothing.
    pub fn apply(&mut self, decision: Decision, step: usize, price: f64, config: &TradingConfig) {
        let want = match decision {
            Decision::Buy => Direction::Long,
            Decision::Sell => Direction::Short,
            Decision::Hold => return,
        };
        match &self.position {
            Some(p) if p.direction == want => {}
            Some(_) => {
                self.close(step, price, ExitReason::Signal, config);
                self.open(want, step, price, config);
            }
            None => self.open(want, step, price, config),
        }
    }

    /// Force-close on stop-loss or take-profit at `price`
    pub fn enforce_limits(&mut self, step: usize, price: f64, config: &TradingConfig) {
        let reason = match &self.position {
            Some(p) if p.unrealized_pct(price) <= -config.stop_loss_pct => ExitReason::StopLoss,
            Some(p) if p.unrealized_pct(price) >= config.take_profit_pct => ExitReason::TakeProfit,
            _ => return,
        };
        self.close(step, price, reason, config);
    }

    /// Start a new trading day if `date` differs from the current one
    pub fn roll_day(&mut self, date: NaiveDate, price: f64) {
        if self.day != Some(date) {
            self.day = Some(date);
            self.day_start_equity = self.equity(price);
            self.halted = false;
        }
    }

    fn mark(&mut self, price: f64) -> f64 {
        let equity = self.equity(price);
        self.peak_equity = self.peak_equity.max(equity);
        if self.peak_equity > 0. {
            self.max_drawdown = self
                .max_drawdown
                .max((self.peak_equity - equity) / self.peak_equity);
        }
        equity
    }
}

/// Fixed-size summary of how a genome traded, used only for novelty
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorDescriptor(pub [f64; BEHAVIOR_DIMS]);

impl BehaviorDescriptor {
    /// Euclidean distance
    pub fn distance(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(l, r)| (l - r).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub total_return: f64,
    pub max_drawdown: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    /// mean over standard deviation of per-step equity returns
    pub sharpe: f64,
    pub final_equity: f64,
    pub bankrupt: bool,
    /// ticks traded after warm-up
    pub steps: usize,
    pub costs_paid: f64,
    pub behavior: BehaviorDescriptor,
    pub trades: Vec<Trade>,
}

pub struct Simulator<'a> {
    market: &'a MarketState,
    trading: &'a TradingConfig,
    evaluation: &'a EvaluationConfig,
}

impl<'a> Simulator<'a> {
    pub fn new(
        market: &'a MarketState,
        trading: &'a TradingConfig,
        evaluation: &'a EvaluationConfig,
    ) -> Self {
        Self {
            market,
            trading,
            evaluation,
        }
    }

    /// Run `network` over the whole market from a fresh account
    pub fn run(&self, network: &mut impl Network) -> Result<SimulationReport, EvaluationError> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.evaluation.timeout_ms);
        let lookback = self.trading.lookback_periods;
        let prices = self.market.prices().collect::<Vec<_>>();

        network.flush();
        let mut account = Account::new(self.trading.initial_capital);
        let mut spent = 0u64;
        let mut decisions = [0usize; 3];
        let mut exposed = 0usize;
        let mut returns = vec![];
        let mut bankrupt = false;
        // index into `prices` the account is finally marked at
        let mut exit = self.market.len();

        for (t, tick) in self.market.ticks().iter().enumerate() {
            spent += network.step_cost();
            if spent > self.evaluation.step_budget {
                return Err(EvaluationError::StepBudget {
                    limit: self.evaluation.step_budget,
                });
            }
            if started.elapsed() > timeout {
                return Err(EvaluationError::Timeout {
                    limit_ms: self.evaluation.timeout_ms,
                });
            }

            let decision = network.decide(&tick.features)?;
            if t < lookback {
                continue;
            }

            let price = prices[t];
            account.roll_day(tick.timestamp.date_naive(), price);
            account.enforce_limits(t, price, self.trading);
            if !account.halted && account.daily_loss(price) >= self.trading.max_daily_loss {
                account.halted = true;
            }

            decisions[decision as usize] += 1;
            let before = account.equity(price);
            if !account.halted {
                account.apply(decision, t, price, self.trading);
            }
            if account.position.is_some() {
                exposed += 1;
            }

            let after = account.mark(prices[t + 1]);
            if before > 0. {
                returns.push(after / before - 1.);
            }
            if after <= 0. {
                bankrupt = true;
                exit = t + 1;
                break;
            }
        }

        let steps = decisions.iter().sum::<usize>();
        let reason = if bankrupt {
            ExitReason::Bankruptcy
        } else {
            ExitReason::EndOfData
        };
        account.close(exit, prices[exit], reason, self.trading);
        let final_equity = account.mark(prices[exit]);

        Ok(self.report(account, final_equity, bankrupt, steps, decisions, exposed, &returns))
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        account: Account,
        final_equity: f64,
        bankrupt: bool,
        steps: usize,
        decisions: [usize; 3],
        exposed: usize,
        returns: &[f64],
    ) -> SimulationReport {
        let per_step = |n: usize| if steps == 0 { 0. } else { n as f64 / steps as f64 };
        let trades = account.trades;

        let wins = trades.iter().filter(|t| t.pnl > 0.).count();
        let win_rate = if trades.is_empty() {
            0.
        } else {
            wins as f64 / trades.len() as f64
        };
        let avg_holding = if trades.is_empty() {
            0.
        } else {
            trades
                .iter()
                .map(|t| (t.exit_step - t.entry_step) as f64)
                .sum::<f64>()
                / trades.len() as f64
        };

        SimulationReport {
            total_return: final_equity / self.trading.initial_capital - 1.,
            max_drawdown: account.max_drawdown,
            trade_count: trades.len(),
            win_rate,
            sharpe: sharpe(returns),
            final_equity,
            bankrupt,
            steps,
            costs_paid: account.costs_paid,
            behavior: BehaviorDescriptor([
                per_step(decisions[Decision::Buy as usize]),
                per_step(decisions[Decision::Sell as usize]),
                per_step(decisions[Decision::Hold as usize]),
                if steps == 0 { 0. } else { avg_holding / steps as f64 },
                per_step(exposed),
            ]),
            trades,
        }
    }
}

/// Mean over population standard deviation, 0 for flat or empty series
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let std = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std > f64::EPSILON {
        mean / std
    } else {
        0.
    }
}
