//! Innovation-aligned crossover, and the genetic distance used to speciate.
//!
//! Both operate on connection genes sorted by innovation id, as [Genome](crate::Genome) keeps
//! them, so alignment is a single merge pass.

use crate::{
    config::NeatConfig,
    genome::ConnectionGene,
    random::{EvolutionEvent, Happens},
};
use core::cmp::Ordering;

/// Weights of the three terms of the compatibility distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compatibility {
    pub excess: f64,
    pub disjoint: f64,
    pub weight: f64,
}

impl From<&NeatConfig> for Compatibility {
    fn from(config: &NeatConfig) -> Self {
        Self {
            excess: config.excess_coefficient,
            disjoint: config.disjoint_coefficient,
            weight: config.weight_coefficient,
        }
    }
}

/// One step of the merge of two innovation sorted gene lists
enum Aligned<'a> {
    Matching(&'a ConnectionGene, &'a ConnectionGene),
    Left(&'a ConnectionGene),
    Right(&'a ConnectionGene),
}

fn align<'a>(l: &'a [ConnectionGene], r: &'a [ConnectionGene]) -> impl Iterator<Item = Aligned<'a>> {
    let (mut l_idx, mut r_idx) = (0, 0);
    core::iter::from_fn(move || match (l.get(l_idx), r.get(r_idx)) {
        (Some(l_gene), Some(r_gene)) => Some(match l_gene.inno.cmp(&r_gene.inno) {
            Ordering::Equal => {
                l_idx += 1;
                r_idx += 1;
                Aligned::Matching(l_gene, r_gene)
            }
            Ordering::Less => {
                l_idx += 1;
                Aligned::Left(l_gene)
            }
            Ordering::Greater => {
                r_idx += 1;
                Aligned::Right(r_gene)
            }
        }),
        (Some(l_gene), None) => {
            l_idx += 1;
            Some(Aligned::Left(l_gene))
        }
        (None, Some(r_gene)) => {
            r_idx += 1;
            Some(Aligned::Right(r_gene))
        }
        (None, None) => None,
    })
}

/// Count genes present in only one of l or r: (disjoint, excess). Excess genes are those past
/// the other genome's highest innovation.
pub fn disjoint_excess_count(l: &[ConnectionGene], r: &[ConnectionGene]) -> (f64, f64) {
    let l_max = l.last().map(|c| c.inno);
    let r_max = r.last().map(|c| c.inno);
    let beyond = |inno: usize, other_max: Option<usize>| other_max.is_none_or(|m| inno > m);

    align(l, r).fold((0., 0.), |(disjoint, excess), step| match step {
        Aligned::Matching(..) => (disjoint, excess),
        Aligned::Left(c) if beyond(c.inno, r_max) => (disjoint, excess + 1.),
        Aligned::Right(c) if beyond(c.inno, l_max) => (disjoint, excess + 1.),
        _ => (disjoint + 1., excess),
    })
}

/// Mean parameter difference of matching genes. If genomes share no genes, their average diff
/// is 0.
pub fn avg_param_diff(l: &[ConnectionGene], r: &[ConnectionGene]) -> f64 {
    let (count, sum) = align(l, r).fold((0usize, 0.), |(count, sum), step| match step {
        Aligned::Matching(l_gene, r_gene) => (count + 1, sum + l_gene.param_diff(r_gene)),
        _ => (count, sum),
    });

    if count == 0 {
        0.
    } else {
        sum / count as f64
    }
}

/// Compatibility distance: `(c_e * E + c_d * D) / N + c_w * W̄`, N being the larger gene count
pub fn delta(l: &[ConnectionGene], r: &[ConnectionGene], c: &Compatibility) -> f64 {
    let n = l.len().max(r.len()).max(1) as f64;
    let (disjoint, excess) = disjoint_excess_count(l, r);
    (c.excess * excess + c.disjoint * disjoint) / n + c.weight * avg_param_diff(l, r)
}

/// Produce the connection genes of a child of l and r, where l's fitness is `l_fit` compared
/// to r's.
///
/// Matching genes take the gene, weight included, of a uniformly random parent; a gene disabled
/// in exactly one parent stays disabled with [EvolutionEvent::KeepDisabled] probability.
/// Disjoint and excess genes come from the fitter parent, or from one parent picked uniformly at
/// random when fitness is tied.
pub fn crossover(
    l: &[ConnectionGene],
    r: &[ConnectionGene],
    l_fit: Ordering,
    rng: &mut impl Happens,
) -> Vec<ConnectionGene> {
    let keep_left = match l_fit {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => !rng.happens(EvolutionEvent::PickLeq),
    };

    let mut child = Vec::with_capacity(if keep_left { l.len() } else { r.len() });
    for step in align(l, r) {
        match step {
            Aligned::Matching(l_gene, r_gene) => {
                let mut gene = if rng.happens(EvolutionEvent::PickLeq) {
                    r_gene.clone()
                } else {
                    l_gene.clone()
                };
                if l_gene.enabled != r_gene.enabled {
                    gene.enabled = !rng.happens(EvolutionEvent::KeepDisabled);
                }
                child.push(gene);
            }
            Aligned::Left(gene) if keep_left => child.push(gene.clone()),
            Aligned::Right(gene) if !keep_left => child.push(gene.clone()),
            _ => {}
        }
    }

    child
}
