#![allow(mixed_script_confusables)]
#![allow(confusable_idents)]

#[macro_use]
mod macros;

pub mod config;
pub mod crossover;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod genome;
pub mod market;
pub mod network;
pub mod novelty;
pub mod population;
pub mod random;
pub mod reproduce;
pub mod scenario;
pub mod serialize;
pub mod simulator;
pub mod store;

pub use config::Config;
pub use error::{Error, EvaluationError, Result};
pub use evolution::{
    Checkpoint, CheckpointSink, Evolution, EvolutionHooks, Hook, Outcome, Stats, Termination,
};
pub use fitness::FitnessRecord;
pub use genome::{ConnectionGene, Genome, InnoGen, NodeGene};
pub use market::{MarketState, Tick};
pub use network::{Activation, Decision, Evaluator, Network};
pub use novelty::NoveltyArchive;
pub use population::{Population, Specie};
pub use random::{Happens, Probabilities};
pub use scenario::{Scenario, TradingScenario};
pub use serialize::Persist;
pub use simulator::{BehaviorDescriptor, SimulationReport, Simulator};
pub use store::{
    Backoff, ExperimentRecord, ExperimentStore, JsonlStore, MemoryStore, RetryingStore,
};
