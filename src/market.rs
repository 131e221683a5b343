//! The market a genome trades in: an ordered series of feature vectors, each paired with the
//! relative price change to the next tick. Read-only once built, and shared between workers.

use crate::{
    error::{Error, Result},
    serialize::Persist,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Price the simulated instrument starts at. Returns are scale free, so this only shows up in
/// trade records.
pub const INITIAL_PRICE: f64 = 100.;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub features: Vec<f64>,
    /// `price[t + 1] / price[t] - 1`
    pub forward_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    ticks: Vec<Tick>,
    #[serde(default = "initial_price")]
    initial_price: f64,
}

fn initial_price() -> f64 {
    INITIAL_PRICE
}

impl MarketState {
    pub fn new(ticks: Vec<Tick>) -> Result<Self> {
        let market = Self {
            ticks,
            initial_price: INITIAL_PRICE,
        };
        Persist::check(&market)?;
        Ok(market)
    }

    pub fn with_initial_price(mut self, price: f64) -> Result<Self> {
        self.initial_price = price;
        Persist::check(&self)?;
        Ok(self)
    }

    #[inline]
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Features per tick
    #[inline]
    pub fn width(&self) -> usize {
        self.ticks.first().map_or(0, |t| t.features.len())
    }

    #[inline]
    pub fn initial_price(&self) -> f64 {
        self.initial_price
    }

    /// Price at every tick, followed by the price after the last one
    pub fn prices(&self) -> impl Iterator<Item = f64> + '_ {
        core::iter::once(self.initial_price).chain(self.ticks.iter().scan(
            self.initial_price,
            |price, tick| {
                *price *= 1. + tick.forward_delta;
                Some(*price)
            },
        ))
    }

    /// Fail fast when this market can't drive networks with `inputs` inputs, leaving at least one
    /// tick to trade after `lookback` warm-up ticks
    pub fn check_alignment(&self, inputs: usize, lookback: usize) -> Result<()> {
        if self.width() != inputs {
            return Err(Error::Configuration(format!(
                "market carries {} features per tick, networks take {inputs} inputs",
                self.width()
            )));
        }
        if self.len() <= lookback {
            return Err(Error::Configuration(format!(
                "market has {} ticks, needs more than lookback_periods = {lookback}",
                self.len()
            )));
        }
        Ok(())
    }

    /// A deterministic oscillating market, one tick per `step` from `start`. Price follows
    /// `amplitude * sin` around a flat trend with the given `period` in ticks; each tick's
    /// features are the `width` most recent deltas, newest first, scaled by `1 / amplitude`.
    pub fn oscillating(
        len: usize,
        width: usize,
        period: f64,
        amplitude: f64,
        start: DateTime<Utc>,
        step: Duration,
    ) -> Result<Self> {
        if !(period > 0. && amplitude > 0. && amplitude < 1.) {
            return Err(Error::Configuration(
                "oscillating market needs period > 0 and amplitude in (0, 1)".into(),
            ));
        }

        let level = |t: usize| 1. + amplitude * (core::f64::consts::TAU * t as f64 / period).sin();
        let deltas = (0..len + 1)
            .map(|t| level(t + 1) / level(t) - 1.)
            .collect::<Vec<_>>();

        let ticks = (0..len)
            .map(|t| Tick {
                timestamp: start + step * t as i32,
                features: (0..width)
                    .map(|lag| match t.checked_sub(lag + 1) {
                        Some(past) => deltas[past] / amplitude,
                        None => 0.,
                    })
                    .collect(),
                forward_delta: deltas[t],
            })
            .collect();

        Self::new(ticks)
    }
}

impl Persist for MarketState {
    fn check(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::Configuration(msg));

        if self.ticks.is_empty() {
            return invalid("market has no ticks".into());
        }
        if !(self.initial_price.is_finite() && self.initial_price > 0.) {
            return invalid(format!("initial price {} is not positive", self.initial_price));
        }
        let width = self.width();
        for (idx, tick) in self.ticks.iter().enumerate() {
            if tick.features.len() != width {
                return invalid(format!(
                    "tick {idx} has {} features, expected {width}",
                    tick.features.len()
                ));
            }
            if tick.features.iter().any(|f| !f.is_finite()) {
                return invalid(format!("tick {idx} has a non-finite feature"));
            }
            if !(tick.forward_delta.is_finite() && tick.forward_delta > -1.) {
                return invalid(format!(
                    "tick {idx} has forward delta {}",
                    tick.forward_delta
                ));
            }
        }
        if self.ticks.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
            return invalid("ticks are not in time order".into());
        }
        Ok(())
    }
}
