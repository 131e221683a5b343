//! Run configuration. Every numeric knob the engine reads lives here, is loadable from TOML or
//! JSON, and is validated up front: an invalid value is a fatal [Error::Configuration] raised
//! before generation 0.

use crate::{
    error::{Error, Result},
    network::Activation,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// A validated block of configuration
pub trait Section {
    const NAME: &'static str;

    fn validate(&self) -> Result<()>;
}

fn invalid(section: &str, msg: impl AsRef<str>) -> Error {
    Error::Configuration(format!("[{section}] {}", msg.as_ref()))
}

fn unit(section: &str, name: &str, v: f64) -> Result<()> {
    if (0. ..=1.).contains(&v) {
        Ok(())
    } else {
        Err(invalid(section, format!("{name} must be in [0, 1], got {v}")))
    }
}

fn positive(section: &str, name: &str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0. {
        Ok(())
    } else {
        Err(invalid(section, format!("{name} must be positive, got {v}")))
    }
}

fn non_zero(section: &str, name: &str, v: usize) -> Result<()> {
    if v > 0 {
        Ok(())
    } else {
        Err(invalid(section, format!("{name} must be at least 1")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialTopology {
    /// inputs and outputs only, structure is grown from nothing
    Minimal,
    /// every input and the bias wired to every output with a random weight
    FullyConnected,
}

/// How raw fitness is shared between members of a species
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FitnessSharing {
    /// f' = f / |species|
    SpeciesSize,
    /// f'_i = f_i / Σ_j sh(δ(i, j)) over the species, sh(δ) = 1 - (δ/σ)^α for δ < σ, else 0
    Triangular { sigma: f64, alpha: f64 },
}

/// How parents are picked inside a species
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Selection {
    /// roulette over fitness shifted to be non-negative
    FitnessProportional,
    /// best of `size` uniformly drawn candidates
    Tournament { size: usize },
}

/// Risk-adjusted performance formula. Both are monotone in return at fixed drawdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PerformanceScore {
    /// return - penalty * max_drawdown
    RiskAdjusted { drawdown_penalty: f64 },
    /// return / max(max_drawdown, epsilon)
    Calmar { epsilon: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeatConfig {
    pub pop_size: usize,
    pub max_generations: usize,
    pub fitness_threshold: f64,

    pub activation_mutation_rate: f64,
    pub connection_mutation_rate: f64,
    pub node_mutation_rate: f64,
    pub weight_mutation_rate: f64,
    pub weight_mutation_strength: f64,
    /// chance that a mutated weight is resampled rather than perturbed
    pub weight_reset_rate: f64,
    pub crossover_rate: f64,
    /// chance a gene disabled in either parent stays disabled in the child
    pub keep_disabled_rate: f64,

    pub input_nodes: usize,
    pub output_nodes: usize,
    pub activation_functions: Vec<Activation>,
    pub initial_topology: InitialTopology,
    pub allow_recurrent: bool,
    /// synchronous update passes per timestep for recurrent networks
    pub relaxation_iterations: usize,

    pub compatibility_threshold: f64,
    pub excess_coefficient: f64,
    pub disjoint_coefficient: f64,
    pub weight_coefficient: f64,

    pub species_elitism: usize,
    pub stagnation_threshold: usize,
    /// fraction of each species, best first, eligible as parents
    pub survival_threshold: f64,
    pub fitness_sharing: FitnessSharing,
    pub selection: Selection,

    pub use_novelty_search: bool,
    pub novelty_k_nearest: usize,
    pub novelty_threshold: f64,
    pub novelty_archive_capacity: usize,
}

impl Default for NeatConfig {
    fn default() -> Self {
        Self {
            pop_size: 200,
            max_generations: 500,
            fitness_threshold: 0.95,
            activation_mutation_rate: 0.3,
            connection_mutation_rate: 0.5,
            node_mutation_rate: 0.2,
            weight_mutation_rate: 0.8,
            weight_mutation_strength: 0.5,
            weight_reset_rate: 0.1,
            crossover_rate: 0.75,
            keep_disabled_rate: 0.75,
            input_nodes: 30,
            output_nodes: 3,
            activation_functions: vec![Activation::Relu, Activation::Sigmoid, Activation::Tanh],
            initial_topology: InitialTopology::FullyConnected,
            allow_recurrent: false,
            relaxation_iterations: 3,
            compatibility_threshold: 3.0,
            excess_coefficient: 1.0,
            disjoint_coefficient: 1.0,
            weight_coefficient: 0.4,
            species_elitism: 2,
            stagnation_threshold: 15,
            survival_threshold: 0.2,
            fitness_sharing: FitnessSharing::SpeciesSize,
            selection: Selection::FitnessProportional,
            use_novelty_search: true,
            novelty_k_nearest: 15,
            novelty_threshold: 0.3,
            novelty_archive_capacity: 500,
        }
    }
}

impl Section for NeatConfig {
    const NAME: &'static str = "neat";

    fn validate(&self) -> Result<()> {
        let s = Self::NAME;
        non_zero(s, "pop_size", self.pop_size)?;
        non_zero(s, "max_generations", self.max_generations)?;
        if !self.fitness_threshold.is_finite() {
            return Err(invalid(s, "fitness_threshold must be finite"));
        }

        for (name, v) in [
            ("activation_mutation_rate", self.activation_mutation_rate),
            ("connection_mutation_rate", self.connection_mutation_rate),
            ("node_mutation_rate", self.node_mutation_rate),
            ("weight_mutation_rate", self.weight_mutation_rate),
            ("weight_reset_rate", self.weight_reset_rate),
            ("crossover_rate", self.crossover_rate),
            ("keep_disabled_rate", self.keep_disabled_rate),
        ] {
            unit(s, name, v)?;
        }
        positive(s, "weight_mutation_strength", self.weight_mutation_strength)?;

        non_zero(s, "input_nodes", self.input_nodes)?;
        if self.output_nodes != 3 {
            return Err(invalid(
                s,
                format!(
                    "output_nodes must be 3 (BUY, SELL, HOLD), got {}",
                    self.output_nodes
                ),
            ));
        }
        if self.activation_functions.is_empty() {
            return Err(invalid(s, "activation_functions must not be empty"));
        }
        if self.allow_recurrent {
            non_zero(s, "relaxation_iterations", self.relaxation_iterations)?;
        }

        positive(s, "compatibility_threshold", self.compatibility_threshold)?;
        for (name, v) in [
            ("excess_coefficient", self.excess_coefficient),
            ("disjoint_coefficient", self.disjoint_coefficient),
            ("weight_coefficient", self.weight_coefficient),
        ] {
            if !(v.is_finite() && v >= 0.) {
                return Err(invalid(s, format!("{name} must be non-negative, got {v}")));
            }
        }

        non_zero(s, "stagnation_threshold", self.stagnation_threshold)?;
        positive(s, "survival_threshold", self.survival_threshold)?;
        unit(s, "survival_threshold", self.survival_threshold)?;
        match self.fitness_sharing {
            FitnessSharing::SpeciesSize => {}
            FitnessSharing::Triangular { sigma, alpha } => {
                positive(s, "fitness_sharing.sigma", sigma)?;
                positive(s, "fitness_sharing.alpha", alpha)?;
            }
        }
        if let Selection::Tournament { size } = self.selection {
            non_zero(s, "selection.size", size)?;
        }

        if self.use_novelty_search {
            non_zero(s, "novelty_k_nearest", self.novelty_k_nearest)?;
            if !(self.novelty_threshold.is_finite() && self.novelty_threshold >= 0.) {
                return Err(invalid(s, "novelty_threshold must be non-negative"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// bar width of the supplied feed, informational
    pub timeframe: String,
    /// leading ticks used only to prime the network
    pub lookback_periods: usize,
    pub initial_capital: f64,
    /// fraction of equity committed to a new position
    pub max_position_size: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// fraction of day-start equity after which trading halts for the day
    pub max_daily_loss: f64,
    pub commission: f64,
    pub slippage: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            timeframe: "1h".into(),
            lookback_periods: 200,
            initial_capital: 10_000.,
            max_position_size: 0.2,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
            max_daily_loss: 0.02,
            commission: 0.001,
            slippage: 0.0005,
        }
    }
}

impl Section for TradingConfig {
    const NAME: &'static str = "trading";

    fn validate(&self) -> Result<()> {
        let s = Self::NAME;
        positive(s, "initial_capital", self.initial_capital)?;
        positive(s, "max_position_size", self.max_position_size)?;
        unit(s, "max_position_size", self.max_position_size)?;
        positive(s, "stop_loss_pct", self.stop_loss_pct)?;
        unit(s, "stop_loss_pct", self.stop_loss_pct)?;
        positive(s, "take_profit_pct", self.take_profit_pct)?;
        positive(s, "max_daily_loss", self.max_daily_loss)?;
        unit(s, "max_daily_loss", self.max_daily_loss)?;
        unit(s, "commission", self.commission)?;
        unit(s, "slippage", self.slippage)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessConfig {
    pub performance: PerformanceScore,
    /// lowest possible performance score; also what failed and bankrupt genomes receive
    pub fitness_floor: f64,
    pub fitness_weight: f64,
    pub novelty_weight: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            performance: PerformanceScore::RiskAdjusted {
                drawdown_penalty: 2.0,
            },
            fitness_floor: 0.,
            fitness_weight: 1.,
            novelty_weight: 0.1,
        }
    }
}

impl Section for FitnessConfig {
    const NAME: &'static str = "fitness";

    fn validate(&self) -> Result<()> {
        let s = Self::NAME;
        if !self.fitness_floor.is_finite() {
            return Err(invalid(s, "fitness_floor must be finite"));
        }
        for (name, v) in [
            ("fitness_weight", self.fitness_weight),
            ("novelty_weight", self.novelty_weight),
        ] {
            if !(v.is_finite() && v >= 0.) {
                return Err(invalid(s, format!("{name} must be non-negative, got {v}")));
            }
        }
        match self.performance {
            PerformanceScore::RiskAdjusted { drawdown_penalty } => {
                if !(drawdown_penalty.is_finite() && drawdown_penalty >= 0.) {
                    return Err(invalid(s, "drawdown_penalty must be non-negative"));
                }
            }
            PerformanceScore::Calmar { epsilon } => positive(s, "calmar.epsilon", epsilon)?,
        }
        Ok(())
    }
}

/// Bounds on a single genome's simulator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// total node activations a single run may spend
    pub step_budget: u64,
    pub timeout_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            step_budget: 50_000_000,
            timeout_ms: 30_000,
        }
    }
}

impl Section for EvaluationConfig {
    const NAME: &'static str = "evaluation";

    fn validate(&self) -> Result<()> {
        if self.step_budget == 0 {
            return Err(invalid(Self::NAME, "step_budget must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid(Self::NAME, "timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

const MAX_RETRIES: u32 = 16;
/// longest single wait between two attempts, one hour
const MAX_BACKOFF_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_retries: u32,
    /// first backoff, doubled after every failed attempt
    pub backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 50,
        }
    }
}

impl Section for PersistenceConfig {
    const NAME: &'static str = "persistence";

    fn validate(&self) -> Result<()> {
        if self.max_retries > MAX_RETRIES {
            return Err(invalid(
                Self::NAME,
                format!("max_retries must be at most {MAX_RETRIES}"),
            ));
        }
        let last = self.backoff_ms.checked_mul(1 << self.max_retries);
        if !last.is_some_and(|ms| ms <= MAX_BACKOFF_MS) {
            return Err(invalid(
                Self::NAME,
                format!("backoff_ms doubled max_retries times must stay within {MAX_BACKOFF_MS}"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub neat: NeatConfig,
    pub trading: TradingConfig,
    pub fitness: FitnessConfig,
    pub evaluation: EvaluationConfig,
    pub persistence: PersistenceConfig,
    /// fixes every random choice of the run when set
    pub seed: Option<u64>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.neat.validate()?;
        self.trading.validate()?;
        self.fitness.validate()?;
        self.evaluation.validate()?;
        self.persistence.validate()?;
        Ok(())
    }

    /// novelty contributes only when the search is switched on
    pub fn novelty_weight(&self) -> f64 {
        if self.neat.use_novelty_search {
            self.fitness.novelty_weight
        } else {
            0.
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `.json`, anything else is read as TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }
}
