//! Turning simulator reports into fitness.
//!
//! `combined = fitness_weight * performance + novelty_weight * novelty`, where performance is
//! the configured risk-adjusted score floored at `fitness_floor`. Bankrupt and failed genomes
//! score exactly the floor, with no novelty.

use crate::{
    config::{Config, FitnessConfig, PerformanceScore},
    error::EvaluationError,
    novelty::NoveltyArchive,
    simulator::{BehaviorDescriptor, SimulationReport},
};
use serde::{Deserialize, Serialize};

/// Risk-adjusted score of a run. For a fixed drawdown, a higher return never scores lower.
pub fn performance_score(report: &SimulationReport, config: &FitnessConfig) -> f64 {
    if report.bankrupt {
        return config.fitness_floor;
    }
    let (r, dd) = (report.total_return, report.max_drawdown);
    let score = match config.performance {
        PerformanceScore::RiskAdjusted { drawdown_penalty } => r - drawdown_penalty * dd,
        PerformanceScore::Calmar { epsilon } => r / dd.max(epsilon),
    };
    if score.is_nan() {
        config.fitness_floor
    } else {
        score.max(config.fitness_floor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessRecord {
    /// index of the genome in its generation
    pub genome_id: usize,
    pub raw_return: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub behavior: Option<BehaviorDescriptor>,
    pub performance: f64,
    pub novelty: f64,
    pub combined: f64,
    /// why evaluation failed, if it did
    pub failure: Option<String>,
}

impl FitnessRecord {
    pub fn scored(genome_id: usize, report: &SimulationReport, config: &FitnessConfig) -> Self {
        let performance = performance_score(report, config);
        Self {
            genome_id,
            raw_return: report.total_return,
            sharpe: report.sharpe,
            max_drawdown: report.max_drawdown,
            trade_count: report.trade_count,
            win_rate: report.win_rate,
            behavior: (!report.bankrupt).then_some(report.behavior),
            performance,
            novelty: 0.,
            combined: config.fitness_weight * performance,
            failure: None,
        }
    }

    pub fn failed(genome_id: usize, error: &EvaluationError, config: &FitnessConfig) -> Self {
        Self {
            genome_id,
            raw_return: 0.,
            sharpe: 0.,
            max_drawdown: 0.,
            trade_count: 0,
            win_rate: 0.,
            behavior: None,
            performance: config.fitness_floor,
            novelty: 0.,
            combined: config.fitness_weight * config.fitness_floor,
            failure: Some(error.to_string()),
        }
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Score a whole generation once every evaluation is in: performance per genome, then novelty
/// against the generation and `archive`, then admission of novel behaviours into `archive`.
/// Records come back in the order of `outcomes`.
pub fn score_generation(
    outcomes: &[Result<SimulationReport, EvaluationError>],
    archive: &mut NoveltyArchive,
    config: &Config,
) -> Vec<FitnessRecord> {
    let mut records = outcomes
        .iter()
        .enumerate()
        .map(|(id, outcome)| match outcome {
            Ok(report) => FitnessRecord::scored(id, report, &config.fitness),
            Err(e) => FitnessRecord::failed(id, e, &config.fitness),
        })
        .collect::<Vec<_>>();

    if !config.neat.use_novelty_search {
        return records;
    }

    let behaviors = records.iter().map(|r| r.behavior).collect::<Vec<_>>();
    let novelty = archive.score_generation(&behaviors);
    let weight = config.novelty_weight();
    for (record, novelty) in records.iter_mut().zip(novelty) {
        record.novelty = novelty;
        record.combined += weight * novelty;
    }

    for record in &records {
        if let Some(behavior) = record.behavior {
            archive.admit(behavior, record.novelty);
        }
    }

    records
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_f64_approx;

    fn report(total_return: f64, max_drawdown: f64) -> SimulationReport {
        SimulationReport {
            total_return,
            max_drawdown,
            trade_count: 1,
            win_rate: 1.,
            sharpe: 0.,
            final_equity: 10_000. * (1. + total_return),
            bankrupt: false,
            steps: 10,
            costs_paid: 0.,
            behavior: BehaviorDescriptor([total_return, 0., 0., 0., 0.]),
            trades: vec![],
        }
    }

    fn fitness(performance: PerformanceScore) -> FitnessConfig {
        FitnessConfig {
            performance,
            fitness_floor: -10.,
            ..FitnessConfig::default()
        }
    }

    #[test]
    fn test_monotone_in_return() {
        for config in [
            fitness(PerformanceScore::RiskAdjusted {
                drawdown_penalty: 2.,
            }),
            fitness(PerformanceScore::Calmar { epsilon: 0.01 }),
        ] {
            for dd in [0., 0.05, 0.3, 0.9] {
                let mut last = f64::NEG_INFINITY;
                for r in [-0.5, -0.1, 0., 0.02, 0.1, 1.5] {
                    let score = performance_score(&report(r, dd), &config);
                    assert!(score >= last, "{config:?} r={r} dd={dd}");
                    last = score;
                }
            }
        }
    }

    #[test]
    fn test_formulas() {
        let risk = fitness(PerformanceScore::RiskAdjusted {
            drawdown_penalty: 2.,
        });
        assert_f64_approx!(performance_score(&report(0.2, 0.05), &risk), 0.1);

        let calmar = fitness(PerformanceScore::Calmar { epsilon: 0.01 });
        assert_f64_approx!(performance_score(&report(0.2, 0.1), &calmar), 2.);
        assert_f64_approx!(performance_score(&report(0.02, 0.), &calmar), 2.);
    }

    #[test]
    fn test_floor() {
        let config = FitnessConfig::default();
        assert_eq!(performance_score(&report(-0.3, 0.4), &config), 0.);
        assert_eq!(performance_score(&report(0., 0.), &config), config.fitness_floor);

        let mut bankrupt = report(5., 0.);
        bankrupt.bankrupt = true;
        assert_eq!(performance_score(&bankrupt, &config), config.fitness_floor);
    }

    #[test]
    fn test_failed_is_minimum() {
        let config = Config::default();
        let outcomes = vec![
            Ok(report(-0.9, 0.9)),
            Err(EvaluationError::NonFinite { node: 3 }),
            Ok(report(0.1, 0.)),
        ];
        let mut archive = NoveltyArchive::from_config(&config.neat);
        let records = score_generation(&outcomes, &mut archive, &config);

        assert_eq!(records.len(), 3);
        assert!(records[1].is_failure());
        assert_eq!(records[1].combined, config.fitness.fitness_floor);
        assert!(records.iter().all(|r| r.combined >= records[1].combined));
        assert_eq!(
            records.iter().map(|r| r.genome_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_novelty_weighting() {
        let mut config = Config::default();
        config.fitness.novelty_weight = 0.5;
        config.neat.novelty_k_nearest = 1;
        config.neat.novelty_threshold = 0.;
        let outcomes = vec![Ok(report(0.1, 0.)), Ok(report(0.4, 0.))];

        let mut archive = NoveltyArchive::from_config(&config.neat);
        let records = score_generation(&outcomes, &mut archive, &config);
        assert_f64_approx!(records[0].novelty, 0.3);
        assert_f64_approx!(records[0].combined, 0.1 + 0.5 * 0.3);
        assert_eq!(archive.len(), 2);

        config.neat.use_novelty_search = false;
        let mut archive = NoveltyArchive::from_config(&config.neat);
        let records = score_generation(&outcomes, &mut archive, &config);
        assert_eq!(records[0].novelty, 0.);
        assert_f64_approx!(records[0].combined, 0.1);
        assert!(archive.is_empty());
    }
}
