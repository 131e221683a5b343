//! Functions related to reproducing on the specie and global population scale.
//!
//! The next generation is the population champion, unmutated, followed by every specie's
//! offspring. Species get offspring in proportion to their summed shared fitness, rounded with
//! the largest remainder method so the total is exact. Inside a specie, the best
//! `species_elitism` members carry over unmutated; the rest are children of parents drawn from
//! the top `survival_threshold` fraction.

use crate::{
    config::{NeatConfig, Selection},
    genome::{Genome, InnoGen},
    population::{Population, Specie, FITNESS_EPSILON},
    random::{EvolutionEvent, Happens},
};
use core::cmp::Ordering;
use rand::{seq::IndexedRandom, Rng, RngCore};

/// Select a random candidate with probability weighted by fitness.
/// Fitness values are shifted so negative fitnesses are handled properly.
fn weighted_random_select<'a>(
    candidates: &'a [(usize, f64)],
    rng: &mut impl RngCore,
) -> Option<&'a (usize, f64)> {
    let min = candidates
        .iter()
        .map(|(_, f)| *f)
        .min_by(f64::total_cmp)?;
    let shift = if min < 0. { -min } else { 0. };

    let total = candidates
        .iter()
        .map(|(_, f)| f + shift + FITNESS_EPSILON)
        .sum::<f64>();
    let mut threshold = rng.random::<f64>() * total;
    for candidate in candidates {
        threshold -= candidate.1 + shift + FITNESS_EPSILON;
        if threshold <= 0. {
            return Some(candidate);
        }
    }

    // floating point leftovers
    candidates.last()
}

/// Best of `size` candidates drawn uniformly with replacement
fn tournament_select<'a>(
    candidates: &'a [(usize, f64)],
    size: usize,
    rng: &mut impl RngCore,
) -> Option<&'a (usize, f64)> {
    (0..size.max(1))
        .filter_map(|_| candidates.choose(rng))
        .max_by(|(_, l), (_, r)| l.total_cmp(r))
}

/// Pick one parent out of `candidates`, pairs of (genome index, fitness)
pub fn select<'a>(
    candidates: &'a [(usize, f64)],
    selection: Selection,
    rng: &mut impl RngCore,
) -> Option<&'a (usize, f64)> {
    match selection {
        Selection::FitnessProportional => weighted_random_select(candidates, rng),
        Selection::Tournament { size } => tournament_select(candidates, size, rng),
    }
}

/// Split `total` offspring between species proportionally to `weights`, so that the counts sum
/// to exactly `total`. Remainders go to the largest fractional parts, earliest first on ties.
pub fn allocate_offspring(weights: &[f64], total: usize) -> Vec<usize> {
    if weights.is_empty() {
        return vec![];
    }

    let sum = weights.iter().filter(|w| w.is_finite() && **w > 0.).sum::<f64>();
    let quotas = weights
        .iter()
        .map(|&w| {
            if sum > 0. {
                if w.is_finite() && w > 0. {
                    w / sum * total as f64
                } else {
                    0.
                }
            } else {
                total as f64 / weights.len() as f64
            }
        })
        .collect::<Vec<_>>();

    let mut counts = quotas.iter().map(|q| q.floor() as usize).collect::<Vec<_>>();
    let mut remaining = total.saturating_sub(counts.iter().sum());

    let mut by_remainder = (0..weights.len()).collect::<Vec<_>>();
    by_remainder.sort_by(|&l, &r| {
        (quotas[r] - quotas[r].floor())
            .total_cmp(&(quotas[l] - quotas[l].floor()))
            .then(l.cmp(&r))
    });
    for idx in by_remainder.into_iter().cycle() {
        if remaining == 0 {
            break;
        }
        counts[idx] += 1;
        remaining -= 1;
    }

    counts
}

/// Produce `count` genomes from one specie, whose members are `ranked` best first
pub fn reproduce_specie(
    genomes: &[Genome],
    ranked: &[(usize, f64)],
    count: usize,
    config: &NeatConfig,
    rng: &mut impl Happens,
    inno: &mut InnoGen,
) -> Vec<Genome> {
    if count == 0 || ranked.is_empty() {
        return vec![];
    }

    let mut offspring = Vec::with_capacity(count);
    let elites = config.species_elitism.min(count).min(ranked.len());
    offspring.extend(ranked[..elites].iter().map(|(idx, _)| genomes[*idx].clone()));

    let survivors = ((ranked.len() as f64 * config.survival_threshold).ceil() as usize)
        .clamp(1, ranked.len());
    let parents = &ranked[..survivors];

    while offspring.len() < count {
        let Some(&(l, l_fit)) = select(parents, config.selection, rng) else {
            break;
        };

        let mut child = if parents.len() > 1 && rng.happens(EvolutionEvent::Crossover) {
            match select(parents, config.selection, rng) {
                Some(&(r, r_fit)) => genomes[l].reproduce_with(
                    &genomes[r],
                    l_fit.partial_cmp(&r_fit).unwrap_or(Ordering::Equal),
                    rng,
                ),
                None => genomes[l].clone(),
            }
        } else {
            genomes[l].clone()
        };
        child.mutate(rng, inno, config);
        offspring.push(child);
    }

    offspring
}

/// Build the next generation from a speciated, scored population. `fitness` is the selection
/// fitness of every genome and `champion` the index of the best performer, carried over as is.
pub fn next_generation(
    population: &Population,
    fitness: &[f64],
    champion: usize,
    config: &NeatConfig,
    rng: &mut impl Happens,
    inno: &mut InnoGen,
) -> Vec<Genome> {
    let mut next = Vec::with_capacity(config.pop_size);
    next.push(population.genomes[champion].clone());

    let adjusted = population.adjusted_fitness(fitness, config);
    let weights = population
        .species
        .iter()
        .map(|s| s.members.iter().map(|&m| adjusted[m]).sum::<f64>())
        .collect::<Vec<_>>();
    let counts = allocate_offspring(&weights, config.pop_size.saturating_sub(1));

    for (specie, count) in population.species.iter().zip(counts) {
        next.extend(reproduce_specie(
            &population.genomes,
            &Specie::ranked(specie, fitness),
            count,
            config,
            rng,
            inno,
        ));
    }

    // only reachable with no species left to draw from
    while next.len() < config.pop_size {
        let mut child = population.genomes[champion].clone();
        child.mutate(rng, inno, config);
        next.push(child);
    }

    next
}
