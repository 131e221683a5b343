//! Mutation operators. Each is applied independently with its configured probability, and every
//! structural change registers with (or reuses from) the run's [InnoGen].

use super::{ConnectionGene, Genome, InnoGen, NodeGene, NodeKind};
use crate::{
    config::NeatConfig,
    network::Activation,
    random::{EvolutionEvent, Happens},
};
use fxhash::FxHashSet;
use rand::{
    seq::{IndexedRandom, IteratorRandom},
    Rng, RngCore,
};
use rand_distr::{Distribution, Normal};

/// Range a weight is redrawn from when it is reset rather than perturbed
pub const WEIGHT_REPLACE: f64 = 3.0;

/// Weights are clamped to ±this after perturbation
pub const WEIGHT_LIMIT: f64 = 8.0;

impl Genome {
    /// Perturb every weight by N(0, strength), occasionally redrawing it outright
    pub fn mutate_params(&mut self, strength: f64, rng: &mut impl Happens) {
        let Ok(normal) = Normal::new(0., strength) else {
            return;
        };
        for c in self.connections.iter_mut() {
            c.weight = if rng.happens(EvolutionEvent::ResetWeight) {
                rng.random_range(-WEIGHT_REPLACE..=WEIGHT_REPLACE)
            } else {
                (c.weight + normal.sample(rng)).clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT)
            };
        }
    }

    /// Given a genome with 0 or more nodes, try to find a path between two nodes that are not yet
    /// connected. Targets are never inputs or the bias. Without `recurrent`, outputs are never
    /// sources and no path may close a cycle.
    pub fn open_path(&self, recurrent: bool, rng: &mut impl RngCore) -> Option<(usize, usize)> {
        let mut saturated = FxHashSet::default();
        loop {
            let from = self
                .nodes
                .iter()
                .filter(|n| recurrent || n.kind != NodeKind::Output)
                .map(|n| n.id)
                .filter(|id| !saturated.contains(id))
                .choose(rng)?;

            let exclude = self
                .connections
                .iter()
                .filter_map(|c| (c.from == from).then_some(c.to))
                .collect::<FxHashSet<_>>();

            if let Some(to) = self
                .nodes
                .iter()
                .filter(|n| n.accepts_incoming() && !exclude.contains(&n.id))
                .map(|n| n.id)
                .filter(|&to| recurrent || (to != from && !self.reaches(to, from)))
                .choose(rng)
            {
                break Some((from, to));
            }

            saturated.insert(from);
        }
    }

    /// Connect two previously unconnected nodes. Returns whether a connection was added.
    pub fn new_connection(
        &mut self,
        recurrent: bool,
        rng: &mut impl RngCore,
        inno: &mut InnoGen,
    ) -> bool {
        match self.open_path(recurrent, rng) {
            Some((from, to)) => {
                let weight = rng.random_range(-super::WEIGHT_INIT..=super::WEIGHT_INIT);
                self.push_connection(ConnectionGene::new(from, to, weight, inno));
                true
            }
            None => false,
        }
    }

    /// Split an enabled connection in two through a new hidden node, disabling the original.
    /// Returns the new node's id, or None if nothing was enabled.
    pub fn bisect_connection(
        &mut self,
        activations: &[Activation],
        rng: &mut impl RngCore,
        inno: &mut InnoGen,
    ) -> Option<usize> {
        let idx = (0..self.connections.len())
            .filter(|&idx| self.connections[idx].enabled)
            .choose(rng)?;

        let split = self.connections[idx].inno;
        let center = match inno.split(split) {
            // this genome already split that innovation once, and it was re-enabled since
            id if self.node(id).is_some() => inno.fresh_node(),
            id => id,
        };

        let activation = activations.choose(rng).copied().unwrap_or_default();
        let (l, r) = self.connections[idx].bisect(center, inno);
        self.push_node(NodeGene::hidden(center, activation));
        self.push_connection(l);
        self.push_connection(r);
        Some(center)
    }

    /// Resample the activation of one hidden node from `activations`
    pub fn mutate_activation(&mut self, activations: &[Activation], rng: &mut impl RngCore) -> bool {
        let Some(idx) = (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].kind == NodeKind::Hidden)
            .choose(rng)
        else {
            return false;
        };
        match activations.choose(rng) {
            Some(activation) => {
                self.nodes[idx].activation = *activation;
                true
            }
            None => false,
        }
    }

    /// Perform 0 or more mutations on this genome, each rolled independently
    pub fn mutate(&mut self, rng: &mut impl Happens, inno: &mut InnoGen, config: &NeatConfig) {
        if rng.happens(EvolutionEvent::MutateWeight) {
            self.mutate_params(config.weight_mutation_strength, rng);
        }
        if rng.happens(EvolutionEvent::MutateConnection) {
            self.new_connection(config.allow_recurrent, rng, inno);
        }
        if rng.happens(EvolutionEvent::MutateBisection) {
            self.bisect_connection(&config.activation_functions, rng, inno);
        }
        if rng.happens(EvolutionEvent::MutateActivation) {
            self.mutate_activation(&config.activation_functions, rng);
        }
    }
}
