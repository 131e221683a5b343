//! The generation loop.
//!
//! Every generation: evaluate all genomes (in parallel, waiting for the last one), score them,
//! speciate on combined fitness, find the champion, drop stagnant species, log and record a
//! summary, then breed the next generation. The loop ends once `max_generations` generations
//! have been evaluated, once the best performance reaches `fitness_threshold`, or when a hook
//! asks it to.

use crate::{
    config::{Config, InitialTopology},
    error::Result,
    fitness::{score_generation, FitnessRecord},
    genome::{Genome, InnoGen},
    novelty::NoveltyArchive,
    population::{champion, Population, Specie},
    random::{rng_from, EvolutionRng, ProbBinding, ProbStatic, WyRng},
    reproduce::next_generation,
    scenario::{evaluate_generation, Scenario},
    serialize::Persist,
    store::{Backoff, ExperimentRecord, ExperimentStore, GenerationSummary, RetryingStore},
};
use chrono::Utc;
use core::ops::ControlFlow;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What hooks see after a generation is scored and speciated
pub struct Stats<'a> {
    pub generation: usize,
    pub genomes: &'a [Genome],
    pub records: &'a [FitnessRecord],
    pub species: &'a [Specie],
    pub summary: &'a GenerationSummary,
}

impl Stats<'_> {
    /// The generation's best performer and its record
    pub fn fittest(&self) -> Option<(&Genome, &FitnessRecord)> {
        champion(self.records).map(|idx| (&self.genomes[idx], &self.records[idx]))
    }

    pub fn any_fitter_than(&self, target: f64) -> bool {
        self.records.iter().any(|r| r.performance > target)
    }
}

pub type Hook = Box<dyn FnMut(&Stats<'_>) -> ControlFlow<()>>;

/// Where checkpoints go after every bred generation
pub type CheckpointSink = Box<dyn FnMut(&Checkpoint) -> Result<()>>;

/// Called in order after every generation. The first hook to break stops the run, later
/// hooks are skipped.
#[derive(Default)]
pub struct EvolutionHooks {
    hooks: Vec<Hook>,
}

impl EvolutionHooks {
    pub fn new(hooks: Vec<Hook>) -> Self {
        Self { hooks }
    }

    pub fn push(&mut self, hook: Hook) {
        self.hooks.push(hook)
    }

    pub fn fire(&mut self, stats: &Stats<'_>) -> ControlFlow<()> {
        for hook in self.hooks.iter_mut() {
            hook(stats)?;
        }
        ControlFlow::Continue(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    MaxGenerations,
    FitnessThreshold,
    Hook,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    /// best performer over the whole run
    pub best: Genome,
    pub best_fitness: f64,
    /// generations evaluated, including any before a resume
    pub generations: usize,
    pub termination: Termination,
    pub history: Vec<GenerationSummary>,
}

/// Everything needed to pick a run back up where it stopped. Taken between generations, so
/// `population` holds the next, not yet evaluated, generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: Config,
    pub population: Population,
    pub inno: InnoGen,
    pub archive: NoveltyArchive,
    pub rng: WyRng,
    pub history: Vec<GenerationSummary>,
    pub best: Option<(Genome, f64)>,
}

impl Persist for Checkpoint {
    fn check(&self) -> Result<()> {
        self.config.validate()?;
        for genome in &self.population.genomes {
            genome.check()?;
        }
        Ok(())
    }
}

pub struct Evolution<S: Scenario> {
    config: Config,
    scenario: S,
    population: Population,
    inno: InnoGen,
    archive: NoveltyArchive,
    rng: EvolutionRng,
    history: Vec<GenerationSummary>,
    best: Option<(Genome, f64)>,
    hooks: EvolutionHooks,
    store: Option<Box<dyn ExperimentStore>>,
    checkpoint_sink: Option<CheckpointSink>,
}

impl<S: Scenario> Evolution<S> {
    /// Validate `config` against itself and `scenario`, then seed generation 0. Any error here
    /// is fatal; nothing has been evaluated yet.
    pub fn new(config: Config, scenario: S) -> Result<Self> {
        config.validate()?;
        scenario.validate(&config)?;

        let mut rng = ProbBinding::new(ProbStatic::from(&config.neat), rng_from(config.seed));
        let mut inno = InnoGen::for_io(config.neat.input_nodes, config.neat.output_nodes);
        let genomes = (0..config.neat.pop_size)
            .map(|_| {
                let mut genome = Genome::from_config(&config.neat, &mut inno, &mut rng);
                // an empty start would be a population of clones
                if config.neat.initial_topology == InitialTopology::Minimal {
                    genome.new_connection(config.neat.allow_recurrent, &mut rng, &mut inno);
                }
                genome
            })
            .collect();

        info!(
            "starting run: {} genomes, {} inputs, seed {:?}",
            config.neat.pop_size, config.neat.input_nodes, config.seed
        );

        Ok(Self {
            archive: NoveltyArchive::from_config(&config.neat),
            population: Population::new(genomes),
            config,
            scenario,
            inno,
            rng,
            history: vec![],
            best: None,
            hooks: EvolutionHooks::default(),
            store: None,
            checkpoint_sink: None,
        })
    }

    /// Continue from `checkpoint`. The scenario is checked against the checkpointed config.
    pub fn resume(checkpoint: Checkpoint, scenario: S) -> Result<Self> {
        checkpoint.check()?;
        scenario.validate(&checkpoint.config)?;

        info!(
            "resuming run at generation {}",
            checkpoint.population.generation
        );

        Ok(Self {
            rng: ProbBinding::new(ProbStatic::from(&checkpoint.config.neat), checkpoint.rng),
            config: checkpoint.config,
            scenario,
            population: checkpoint.population,
            inno: checkpoint.inno,
            archive: checkpoint.archive,
            history: checkpoint.history,
            best: checkpoint.best,
            hooks: EvolutionHooks::default(),
            store: None,
            checkpoint_sink: None,
        })
    }

    /// Record the run to `store`, retrying failed appends as `config.persistence` says
    pub fn with_store(mut self, store: impl ExperimentStore + 'static) -> Self {
        let backoff = Backoff::from(&self.config.persistence);
        self.store = Some(Box::new(RetryingStore::new(store, backoff)));
        self
    }

    pub fn with_hooks(mut self, hooks: EvolutionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Write a [Checkpoint] to `path` after every bred generation
    pub fn with_checkpoint_file<P: AsRef<Path>>(self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        self.with_checkpoint_sink(Box::new(move |checkpoint: &Checkpoint| {
            checkpoint.to_file(&path)
        }))
    }

    /// Hand a [Checkpoint] to `sink` after every bred generation. Failed writes are retried as
    /// `config.persistence` says, then logged.
    pub fn with_checkpoint_sink(mut self, sink: CheckpointSink) -> Self {
        self.checkpoint_sink = Some(sink);
        self
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn generation(&self) -> usize {
        self.population.generation
    }

    #[inline]
    pub fn population(&self) -> &Population {
        &self.population
    }

    #[inline]
    pub fn innovations(&self) -> &InnoGen {
        &self.inno
    }

    #[inline]
    pub fn archive(&self) -> &NoveltyArchive {
        &self.archive
    }

    #[inline]
    pub fn history(&self) -> &[GenerationSummary] {
        &self.history
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            config: self.config.clone(),
            population: self.population.clone(),
            inno: self.inno.clone(),
            archive: self.archive.clone(),
            rng: self.rng.rng().clone(),
            history: self.history.clone(),
            best: self.best.clone(),
        }
    }

    fn record(&mut self, record: &ExperimentRecord) {
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.append(record) {
                warn!("experiment record dropped: {e}");
            }
        }
    }

    /// Evaluate, score and speciate the current generation, then either stop or breed the
    /// next one.
    pub fn step(&mut self) -> ControlFlow<Termination> {
        let generation = self.population.generation;

        let outcomes = evaluate_generation(&self.scenario, &self.population.genomes, &self.config);
        for (idx, outcome) in outcomes.iter().enumerate() {
            if let Err(e) = outcome {
                warn!("generation {generation}: genome {idx} failed evaluation: {e}");
            }
        }

        let records = score_generation(&outcomes, &mut self.archive, &self.config);
        let fitness = records.iter().map(|r| r.combined).collect::<Vec<_>>();
        self.population.speciate(&fitness, &self.config.neat);

        let champ = champion(&records).unwrap_or_default();
        let best_fitness = records[champ].performance;
        if self.best.as_ref().is_none_or(|(_, f)| best_fitness > *f) {
            self.best = Some((self.population.genomes[champ].clone(), best_fitness));
        }

        let summary = GenerationSummary {
            generation,
            best_fitness,
            mean_fitness: fitness.iter().sum::<f64>() / fitness.len().max(1) as f64,
            species_count: self.population.species.len(),
            failures: records.iter().filter(|r| r.is_failure()).count(),
            archive_size: self.archive.len(),
            best_genome: self.population.genomes[champ].clone(),
        };
        info!(
            "generation {generation}: best {best_fitness:.6}, mean {:.6}, {} species, {} failed, archive {}",
            summary.mean_fitness, summary.species_count, summary.failures, summary.archive_size
        );
        self.record(&ExperimentRecord::Generation(summary.clone()));

        let flow = self.hooks.fire(&Stats {
            generation,
            genomes: &self.population.genomes,
            records: &records,
            species: &self.population.species,
            summary: &summary,
        });
        self.history.push(summary);

        if flow.is_break() {
            return ControlFlow::Break(Termination::Hook);
        }
        if best_fitness >= self.config.neat.fitness_threshold {
            return ControlFlow::Break(Termination::FitnessThreshold);
        }
        if generation + 1 >= self.config.neat.max_generations {
            return ControlFlow::Break(Termination::MaxGenerations);
        }

        self.population.cull_stagnant(champ, &self.config.neat);
        let next = next_generation(
            &self.population,
            &fitness,
            champ,
            &self.config.neat,
            &mut self.rng,
            &mut self.inno,
        );
        self.population.advance(next);

        if self.checkpoint_sink.is_some() {
            let checkpoint = self.checkpoint();
            let backoff = Backoff::from(&self.config.persistence);
            if let Some(sink) = self.checkpoint_sink.as_mut() {
                if let Err(e) = backoff.retry("checkpoint", || sink(&checkpoint)) {
                    warn!("generation {generation}: checkpoint dropped: {e}");
                }
            }
        }

        ControlFlow::Continue(())
    }

    /// Run generations until a terminal condition holds
    pub fn run(mut self) -> Outcome {
        if self.history.is_empty() {
            let config = self.config.clone();
            self.record(&ExperimentRecord::Start {
                started_at: Utc::now(),
                config,
            });
        }

        let termination = loop {
            if let ControlFlow::Break(termination) = self.step() {
                break termination;
            }
        };

        let (best, best_fitness) = match self.best.take() {
            Some(best) => best,
            None => (self.population.genomes[0].clone(), self.config.fitness.fitness_floor),
        };
        info!(
            "run finished after {} generations ({termination:?}), best {best_fitness:.6}",
            self.history.len()
        );
        self.record(&ExperimentRecord::Finish {
            finished_at: Utc::now(),
            generations: self.history.len(),
            best_fitness,
            reason: format!("{termination:?}"),
        });

        Outcome {
            best,
            best_fitness,
            generations: self.history.len(),
            termination,
            history: self.history,
        }
    }
}
