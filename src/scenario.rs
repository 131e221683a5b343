//! What a genome is evaluated against. [TradingScenario] runs it through the simulator over a
//! shared market; tests substitute their own.

use crate::{
    config::Config,
    error::{EvaluationError, Result},
    genome::Genome,
    market::MarketState,
    network::Evaluator,
    simulator::{SimulationReport, Simulator},
};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub trait Scenario: Sync {
    /// Fail fast, before any generation runs, if this scenario can't evaluate genomes shaped
    /// by `config`
    fn validate(&self, config: &Config) -> Result<()>;

    /// Evaluate a single genome. Must not touch state shared with other evaluations.
    fn evaluate(
        &self,
        genome: &Genome,
        config: &Config,
    ) -> core::result::Result<SimulationReport, EvaluationError>;
}

#[derive(Debug, Clone)]
pub struct TradingScenario {
    market: Arc<MarketState>,
}

impl TradingScenario {
    pub fn new(market: Arc<MarketState>) -> Self {
        Self { market }
    }

    pub fn market(&self) -> &MarketState {
        &self.market
    }
}

impl Scenario for TradingScenario {
    fn validate(&self, config: &Config) -> Result<()> {
        self.market
            .check_alignment(config.neat.input_nodes, config.trading.lookback_periods)
    }

    fn evaluate(
        &self,
        genome: &Genome,
        config: &Config,
    ) -> core::result::Result<SimulationReport, EvaluationError> {
        let mut network = Evaluator::build(genome, &config.neat)?;
        Simulator::new(&self.market, &config.trading, &config.evaluation).run(&mut network)
    }
}

/// Evaluate every genome, in parallel with the `parallel` feature. Returns only once all
/// results are in, in the order of `genomes`.
pub fn evaluate_generation<S: Scenario + ?Sized>(
    scenario: &S,
    genomes: &[Genome],
    config: &Config,
) -> Vec<core::result::Result<SimulationReport, EvaluationError>> {
    #[cfg(feature = "parallel")]
    let outcomes = genomes
        .par_iter()
        .map(|genome| scenario.evaluate(genome, config))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let outcomes = genomes
        .iter()
        .map(|genome| scenario.evaluate(genome, config))
        .collect();

    outcomes
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::InitialTopology,
        genome::{ConnectionGene, InnoGen},
        market::Tick,
        network::Decision,
        random::WyRng,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn market(len: usize, width: usize) -> Arc<MarketState> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Arc::new(
            MarketState::new(
                (0..len)
                    .map(|i| Tick {
                        timestamp: start + Duration::hours(i as i64),
                        features: vec![(i % 3) as f64; width],
                        forward_delta: if i % 2 == 0 { 0.01 } else { -0.01 },
                    })
                    .collect(),
            )
            .unwrap(),
        )
    }

    fn config(inputs: usize, lookback: usize) -> Config {
        let mut config = Config::default();
        config.neat.input_nodes = inputs;
        config.trading.lookback_periods = lookback;
        config
    }

    #[test]
    fn test_validate_alignment() {
        let scenario = TradingScenario::new(market(20, 4));
        scenario.validate(&config(4, 10)).unwrap();
        assert!(scenario.validate(&config(5, 10)).unwrap_err().is_fatal());
        assert!(scenario.validate(&config(4, 20)).unwrap_err().is_fatal());
    }

    #[test]
    fn test_hold_genome() {
        let scenario = TradingScenario::new(market(30, 2));
        let config = config(2, 5);
        // no connections: all outputs 0, a three way tie, so HOLD
        let report = scenario.evaluate(&Genome::new(2, 3), &config).unwrap();
        assert_eq!(report.trade_count, 0);
        assert_eq!(report.behavior.0[Decision::Hold as usize], 1.);
    }

    #[test]
    fn test_buy_genome_trades() {
        let scenario = TradingScenario::new(market(30, 2));
        let config = config(2, 5);
        let mut inno = InnoGen::for_io(2, 3);
        let mut genome = Genome::new(2, 3);
        // bias -> BUY
        genome.push_connection(ConnectionGene::new(genome.bias_id(), 2, 1., &mut inno));
        let report = scenario.evaluate(&genome, &config).unwrap();
        assert_eq!(report.behavior.0[Decision::Buy as usize], 1.);
        assert!(report.trade_count >= 1);
    }

    #[test]
    fn test_generation_order_and_isolation() {
        let scenario = TradingScenario::new(market(30, 2));
        let config = config(2, 5);
        let mut inno = InnoGen::for_io(2, 3);
        let good =
            Genome::create_minimal(2, 3, InitialTopology::FullyConnected, &mut inno, &mut WyRng::seeded(0));
        // a genome built for the wrong input width fails on its own
        let bad = Genome::new(3, 3);

        let outcomes = evaluate_generation(&scenario, &[good.clone(), bad, good], &config);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1],
            Err(EvaluationError::InputSize { want: 3, have: 2 })
        );
        assert_eq!(outcomes[0], outcomes[2]);
    }
}
