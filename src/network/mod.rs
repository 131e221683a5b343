//! Networks who may be constructed from [Genome]s in order to express their behaviour.
//!
//! Two evaluators exist. [FeedForward] activates nodes once per step in topological order and
//! refuses cyclic genomes. [Recurrent] treats the genome as a dense weight matrix and performs a
//! fixed number of synchronous relaxation passes per step, carrying node state across steps.
//! [Evaluator] picks between them from configuration.

pub mod feedforward;
pub mod recurrent;

pub use feedforward::FeedForward;
pub use recurrent::Recurrent;

use crate::{config::NeatConfig, error::EvaluationError, genome::Genome};
use serde::{Deserialize, Serialize};

/// The closed set of node activation functions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    #[default]
    Identity,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Relu => x.max(0.),
            Self::Sigmoid => 1. / (1. + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Identity => x,
        }
    }
}

/// What a network wants done this step. Output nodes map to decisions in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl Decision {
    /// The argmax of `[buy, sell, hold]`. Any tie for the maximum resolves to [Decision::Hold].
    pub fn from_outputs(outputs: &[f64]) -> Self {
        let [buy, sell, hold] = match outputs {
            [buy, sell, hold, ..] => [*buy, *sell, *hold],
            _ => return Self::Hold,
        };
        let max = buy.max(sell).max(hold);
        match (buy == max, sell == max, hold == max) {
            (true, false, false) => Self::Buy,
            (false, true, false) => Self::Sell,
            _ => Self::Hold,
        }
    }
}

/// The trait for all networks
pub trait Network {
    /// Given some sensory input, step the network once. Input must be sized to fit
    /// [Genome::sensory].
    fn step(&mut self, input: &[f64]) -> Result<&[f64], EvaluationError>;

    /// If the network is stateful, flush its state
    fn flush(&mut self);

    /// The network's most recent output, one value per [Genome::action] node
    fn output(&self) -> &[f64];

    /// Node activations performed by one call to [Network::step]
    fn step_cost(&self) -> u64;

    fn decide(&mut self, input: &[f64]) -> Result<Decision, EvaluationError> {
        self.step(input).map(Decision::from_outputs)
    }
}

/// For some [Genome], a network may construct itself from it
pub trait FromGenome: Network + Sized {
    fn from_genome(genome: &Genome) -> Result<Self, EvaluationError>;
}

/// Fail unless `input` is sized `want`
#[inline]
pub(crate) fn check_input(want: usize, input: &[f64]) -> Result<(), EvaluationError> {
    if input.len() == want {
        Ok(())
    } else {
        Err(EvaluationError::InputSize {
            want,
            have: input.len(),
        })
    }
}

/// The network a run evaluates genomes with
#[derive(Debug, Clone)]
pub enum Evaluator {
    FeedForward(FeedForward),
    Recurrent(Recurrent),
}

impl Evaluator {
    /// [Recurrent] when recurrent connections are allowed, otherwise [FeedForward]
    pub fn build(genome: &Genome, config: &NeatConfig) -> Result<Self, EvaluationError> {
        Ok(if config.allow_recurrent {
            Self::Recurrent(Recurrent::with_iterations(
                genome,
                config.relaxation_iterations,
            )?)
        } else {
            Self::FeedForward(FeedForward::from_genome(genome)?)
        })
    }
}

impl Network for Evaluator {
    fn step(&mut self, input: &[f64]) -> Result<&[f64], EvaluationError> {
        match self {
            Self::FeedForward(nn) => nn.step(input),
            Self::Recurrent(nn) => nn.step(input),
        }
    }

    fn flush(&mut self) {
        match self {
            Self::FeedForward(nn) => nn.flush(),
            Self::Recurrent(nn) => nn.flush(),
        }
    }

    fn output(&self) -> &[f64] {
        match self {
            Self::FeedForward(nn) => nn.output(),
            Self::Recurrent(nn) => nn.output(),
        }
    }

    fn step_cost(&self) -> u64 {
        match self {
            Self::FeedForward(nn) => nn.step_cost(),
            Self::Recurrent(nn) => nn.step_cost(),
        }
    }
}
