//! Functions and structs related to managing genomes at the specie and global population scale.
//!
//! Species are recomputed every generation: each genome joins the species whose representative
//! is nearest, within the compatibility threshold, or founds a new one. Only representatives,
//! ids and stagnation counters carry over between generations.

use crate::{
    config::{FitnessSharing, NeatConfig},
    crossover::{delta, Compatibility},
    fitness::FitnessRecord,
    genome::{ConnectionGene, Genome},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Added to shifted fitness so no genome is ever weighted exactly 0
pub const FITNESS_EPSILON: f64 = 1e-6;

/// The representative member of a particular specie. Is retained inter-generationally to better
/// track when a specie deviates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecieRepr(Vec<ConnectionGene>);

impl SpecieRepr {
    pub fn new(v: Vec<ConnectionGene>) -> Self {
        Self(v)
    }

    #[inline]
    pub fn delta(&self, other: &[ConnectionGene], coefficients: &Compatibility) -> f64 {
        delta(&self.0, other, coefficients)
    }
}

impl AsRef<[ConnectionGene]> for SpecieRepr {
    fn as_ref(&self) -> &[ConnectionGene] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecieState {
    Active,
    /// no improvement for `stagnation_threshold` generations; removed the generation after,
    /// unless it improves or holds the population champion by then
    Stagnant,
}

/// A group of genomes closely related to the same [SpecieRepr]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specie {
    pub id: usize,
    pub repr: SpecieRepr,
    /// indices into the current generation
    pub members: Vec<usize>,
    /// best member fitness ever seen
    pub best_fitness: f64,
    /// generations since `best_fitness` last improved
    pub stagnation: usize,
    pub state: SpecieState,
}

impl Specie {
    fn found(id: usize, repr: &Genome, member: usize) -> Self {
        Self {
            id,
            repr: SpecieRepr::new(repr.connections().to_vec()),
            members: vec![member],
            best_fitness: f64::MIN,
            stagnation: 0,
            state: SpecieState::Active,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[inline]
    pub fn contains(&self, member: usize) -> bool {
        self.members.contains(&member)
    }

    /// Members with their fitness, best first. Ties keep generation order.
    pub fn ranked(&self, fitness: &[f64]) -> Vec<(usize, f64)> {
        let mut ranked = self
            .members
            .iter()
            .map(|&idx| (idx, fitness[idx]))
            .collect::<Vec<_>>();
        ranked.sort_by(|(_, l), (_, r)| r.total_cmp(l));
        ranked
    }
}

/// One generation's genomes, and the species partitioning them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub generation: usize,
    pub genomes: Vec<Genome>,
    pub species: Vec<Specie>,
    next_specie: usize,
}

impl Population {
    pub fn new(genomes: Vec<Genome>) -> Self {
        Self {
            generation: 0,
            genomes,
            species: vec![],
            next_specie: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Replace the genomes with the next generation's. Species keep their representatives and
    /// counters, but lose their members until the next [Population::speciate].
    pub fn advance(&mut self, genomes: Vec<Genome>) {
        self.genomes = genomes;
        self.generation += 1;
        for specie in self.species.iter_mut() {
            specie.members.clear();
        }
    }

    /// Partition the current genomes into species, then refresh every surviving specie's
    /// representative (its best member), best fitness and stagnation state.
    pub fn speciate(&mut self, fitness: &[f64], config: &NeatConfig) {
        debug_assert_eq!(fitness.len(), self.genomes.len());
        let coefficients = Compatibility::from(config);

        for specie in self.species.iter_mut() {
            specie.members.clear();
        }

        for (idx, genome) in self.genomes.iter().enumerate() {
            let nearest = self
                .species
                .iter()
                .enumerate()
                .map(|(s, specie)| (s, specie.repr.delta(genome.connections(), &coefficients)))
                .filter(|(_, d)| *d < config.compatibility_threshold)
                .min_by(|(_, l), (_, r)| l.total_cmp(r));

            match nearest {
                Some((s, _)) => self.species[s].members.push(idx),
                None => {
                    self.species.push(Specie::found(self.next_specie, genome, idx));
                    self.next_specie += 1;
                }
            }
        }

        self.species.retain(|s| !s.is_empty());

        for specie in self.species.iter_mut() {
            let Some(&(best, best_fitness)) = specie.ranked(fitness).first() else {
                continue;
            };
            specie.repr = SpecieRepr::new(self.genomes[best].connections().to_vec());
            if best_fitness > specie.best_fitness {
                specie.best_fitness = best_fitness;
                specie.stagnation = 0;
            } else {
                specie.stagnation += 1;
            }
            specie.state = if specie.stagnation >= config.stagnation_threshold {
                SpecieState::Stagnant
            } else {
                SpecieState::Active
            };
        }
    }

    /// The specie id of every genome, in generation order
    pub fn partition(&self) -> Vec<Option<usize>> {
        let mut ids = vec![None; self.genomes.len()];
        for specie in &self.species {
            for &member in &specie.members {
                ids[member] = Some(specie.id);
            }
        }
        ids
    }

    /// Drop species that were already stagnant a generation ago and still haven't improved,
    /// sparing whichever holds `champion`. A specie marked stagnant by this generation's
    /// [Population::speciate] survives to the next. Returns the dropped ids.
    pub fn cull_stagnant(&mut self, champion: usize, config: &NeatConfig) -> Vec<usize> {
        let mut removed = vec![];
        self.species.retain(|s| {
            let due =
                s.state == SpecieState::Stagnant && s.stagnation > config.stagnation_threshold;
            let keep = !due || s.contains(champion);
            if !keep {
                debug!(
                    "specie {} removed after {} stagnant generations",
                    s.id, s.stagnation
                );
                removed.push(s.id);
            }
            keep
        });
        removed
    }

    /// Shared fitness of every genome, indexed like the generation. Raw fitness is first
    /// shifted so the population minimum sits at [FITNESS_EPSILON].
    pub fn adjusted_fitness(&self, fitness: &[f64], config: &NeatConfig) -> Vec<f64> {
        let min = fitness.iter().copied().fold(f64::INFINITY, f64::min);
        let shifted = |idx: usize| fitness[idx] - min + FITNESS_EPSILON;
        let coefficients = Compatibility::from(config);

        let mut adjusted = vec![0.; fitness.len()];
        for specie in &self.species {
            for &idx in &specie.members {
                adjusted[idx] = match config.fitness_sharing {
                    FitnessSharing::SpeciesSize => shifted(idx) / specie.len() as f64,
                    FitnessSharing::Triangular { sigma, alpha } => {
                        let niche = specie
                            .members
                            .iter()
                            .map(|&other| {
                                let d = self.genomes[idx]
                                    .compatibility_distance(&self.genomes[other], &coefficients);
                                if d < sigma {
                                    1. - (d / sigma).powf(alpha)
                                } else {
                                    0.
                                }
                            })
                            .sum::<f64>();
                        // the genome's own term is 1
                        shifted(idx) / niche.max(1.)
                    }
                };
            }
        }
        adjusted
    }
}

/// Index of the best performing genome, the first on ties
pub fn champion(records: &[FitnessRecord]) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, r)| match best {
            Some((_, f)) if f >= r.performance => best,
            _ => Some((idx, r.performance)),
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        assert_f64_approx,
        config::InitialTopology,
        genome::InnoGen,
        random::{ProbBinding, ProbStatic, WyRng},
    };

    fn population(count: usize, mutations: usize, seed: u64) -> Population {
        let config = NeatConfig::default();
        let mut inno = InnoGen::for_io(2, 3);
        let mut rng = ProbBinding::new(ProbStatic::from(&config), WyRng::seeded(seed));
        let base =
            Genome::create_minimal(2, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        Population::new(
            (0..count)
                .map(|_| {
                    let mut g = base.clone();
                    for _ in 0..mutations {
                        g.mutate(&mut rng, &mut inno, &config);
                    }
                    g
                })
                .collect(),
        )
    }

    fn config(threshold: f64) -> NeatConfig {
        NeatConfig {
            compatibility_threshold: threshold,
            ..NeatConfig::default()
        }
    }

    #[test]
    fn test_partition_total_disjoint() {
        let mut pop = population(60, 12, 1);
        let fitness = (0..60).map(|i| i as f64).collect::<Vec<_>>();
        for threshold in [0.1, 1., 3., 100.] {
            pop.speciate(&fitness, &config(threshold));
            let partition = pop.partition();
            assert!(partition.iter().all(Option::is_some));
            assert_eq!(
                pop.species.iter().map(Specie::len).sum::<usize>(),
                pop.len()
            );
        }
    }

    #[test]
    fn test_identical_genomes_one_specie() {
        let mut pop = population(20, 0, 2);
        pop.speciate(&[1.; 20], &config(0.5));
        assert_eq!(pop.species.len(), 1);
    }

    #[test]
    fn test_tight_threshold_splits() {
        let pop = population(40, 20, 3);

        let mut wide = pop.clone();
        wide.speciate(&[0.; 40], &config(1e9));
        assert_eq!(wide.species.len(), 1);

        let mut tight = pop;
        tight.speciate(&[0.; 40], &config(1e-9));
        assert!(tight.species.len() > 1);
    }

    #[test]
    fn test_repr_is_best_member() {
        let mut pop = population(10, 15, 4);
        let fitness = [0., 9., 1., 2., 3., 4., 5., 6., 7., 8.];
        pop.speciate(&fitness, &config(1e9));
        assert_eq!(pop.species.len(), 1);
        assert_eq!(pop.species[0].repr.as_ref(), pop.genomes[1].connections());
        assert_eq!(pop.species[0].best_fitness, 9.);
    }

    #[test]
    fn test_stagnation_lifecycle() {
        let mut pop = population(5, 0, 5);
        let config = NeatConfig {
            stagnation_threshold: 3,
            ..config(1e9)
        };
        pop.speciate(&[1.; 5], &config);
        for _ in 0..2 {
            pop.speciate(&[1.; 5], &config);
            assert_eq!(pop.species[0].state, SpecieState::Active);
        }
        pop.speciate(&[1.; 5], &config);
        assert_eq!(pop.species[0].state, SpecieState::Stagnant);
        // marked this generation, so it lives to the next
        assert!(pop.clone().cull_stagnant(usize::MAX, &config).is_empty());

        pop.speciate(&[1.; 5], &config);
        assert_eq!(pop.species[0].state, SpecieState::Stagnant);
        // the champion's specie survives culling
        assert!(pop.clone().cull_stagnant(0, &config).is_empty());
        // otherwise it goes
        let id = pop.species[0].id;
        assert_eq!(pop.cull_stagnant(usize::MAX, &config), vec![id]);
        assert!(pop.species.is_empty());

        // improving while stagnant brings it back
        let mut pop = population(5, 0, 5);
        for _ in 0..4 {
            pop.speciate(&[1.; 5], &config);
        }
        assert_eq!(pop.species[0].state, SpecieState::Stagnant);
        pop.speciate(&[2.; 5], &config);
        assert_eq!(pop.species[0].state, SpecieState::Active);
        assert!(pop.cull_stagnant(usize::MAX, &config).is_empty());

        // improvement resets the counter
        let mut pop = population(5, 0, 5);
        pop.speciate(&[1.; 5], &config);
        pop.speciate(&[1.; 5], &config);
        pop.speciate(&[2.; 5], &config);
        assert_eq!(pop.species[0].stagnation, 0);
    }

    #[test]
    fn test_species_size_sharing() {
        let mut pop = population(4, 0, 6);
        pop.speciate(&[0.; 4], &config(1e9));
        let adjusted = pop.adjusted_fitness(&[0., 1., 2., 3.], &config(1e9));
        for (i, a) in adjusted.iter().enumerate() {
            assert_f64_approx!(a, (i as f64 + FITNESS_EPSILON) / 4.);
        }
    }

    #[test]
    fn test_triangular_sharing_identical() {
        // identical genomes are all within sigma of each other: niche count is the specie size
        let mut pop = population(4, 0, 7);
        let config = NeatConfig {
            fitness_sharing: FitnessSharing::Triangular {
                sigma: 1.,
                alpha: 1.,
            },
            ..config(1e9)
        };
        pop.speciate(&[0.; 4], &config);
        let adjusted = pop.adjusted_fitness(&[1., 1., 1., 5.], &config);
        assert_f64_approx!(adjusted[3], (4. + FITNESS_EPSILON) / 4.);
    }

    #[test]
    fn test_champion() {
        let record = |performance: f64| FitnessRecord {
            genome_id: 0,
            raw_return: 0.,
            sharpe: 0.,
            max_drawdown: 0.,
            trade_count: 0,
            win_rate: 0.,
            behavior: None,
            performance,
            novelty: 0.,
            combined: 0.,
            failure: None,
        };
        assert_eq!(champion(&[]), None);
        assert_eq!(
            champion(&[record(0.1), record(0.5), record(0.5), record(-1.)]),
            Some(1)
        );
    }
}
