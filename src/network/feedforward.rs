use super::{check_input, Activation, FromGenome, Network};
use crate::{error::EvaluationError, genome::Genome};
use fxhash::FxHashMap;
use std::collections::VecDeque;

/// Activates every non-input node exactly once per step, in an order where each node comes
/// after all of its enabled sources. Holds no state between steps.
#[derive(Debug, Clone)]
pub struct FeedForward {
    /// node id per slot, for error reporting
    ids: Vec<usize>,
    activation: Vec<Activation>,
    /// (source slot, weight) of each slot's enabled incoming connections
    incoming: Vec<Vec<(usize, f64)>>,
    /// non-input, non-bias slots in dependency order
    order: Vec<usize>,
    sensory: Vec<usize>,
    action: Vec<usize>,
    bias: usize,
    state: Vec<f64>,
    output: Vec<f64>,
}

impl FeedForward {
    /// Kahn's algorithm over enabled connections. Any node left unvisited sits on a cycle.
    fn topological_order(
        len: usize,
        incoming: &[Vec<(usize, f64)>],
        roots: &[usize],
    ) -> Option<Vec<usize>> {
        let mut outgoing = vec![vec![]; len];
        let mut pending = vec![0usize; len];
        for (to, sources) in incoming.iter().enumerate() {
            pending[to] = sources.len();
            for &(from, _) in sources {
                outgoing[from].push(to);
            }
        }

        let mut queue = (0..len).filter(|&s| pending[s] == 0).collect::<VecDeque<_>>();
        let mut order = Vec::with_capacity(len);
        while let Some(slot) = queue.pop_front() {
            order.push(slot);
            for &to in &outgoing[slot] {
                pending[to] -= 1;
                if pending[to] == 0 {
                    queue.push_back(to);
                }
            }
        }

        (order.len() == len).then(|| {
            order.retain(|s| !roots.contains(s));
            order
        })
    }
}

impl FromGenome for FeedForward {
    fn from_genome(genome: &Genome) -> Result<Self, EvaluationError> {
        genome.check()?;

        let slot = genome
            .nodes()
            .iter()
            .enumerate()
            .map(|(slot, n)| (n.id, slot))
            .collect::<FxHashMap<_, _>>();
        let find = |id: usize| {
            slot.get(&id).copied().ok_or_else(|| {
                EvaluationError::MalformedTopology(format!("node {id} is not in the genome"))
            })
        };

        let len = genome.nodes().len();
        let mut incoming = vec![vec![]; len];
        for c in genome.connections().iter().filter(|c| c.enabled) {
            incoming[find(c.to)?].push((find(c.from)?, c.weight));
        }

        let sensory = genome.sensory().map(find).collect::<Result<Vec<_>, _>>()?;
        let action = genome.action().map(find).collect::<Result<Vec<_>, _>>()?;
        let bias = find(genome.bias_id())?;

        let mut roots = sensory.clone();
        roots.push(bias);
        let order = Self::topological_order(len, &incoming, &roots).ok_or_else(|| {
            EvaluationError::MalformedTopology("cycle among enabled connections".into())
        })?;

        Ok(Self {
            ids: genome.nodes().iter().map(|n| n.id).collect(),
            activation: genome.nodes().iter().map(|n| n.activation).collect(),
            incoming,
            order,
            output: vec![0.; action.len()],
            sensory,
            action,
            bias,
            state: vec![0.; len],
        })
    }
}

impl Network for FeedForward {
    fn step(&mut self, input: &[f64]) -> Result<&[f64], EvaluationError> {
        check_input(self.sensory.len(), input)?;
        for (&slot, &v) in self.sensory.iter().zip(input) {
            self.state[slot] = v;
        }
        self.state[self.bias] = 1.;

        for &slot in &self.order {
            let sum = self.incoming[slot]
                .iter()
                .map(|&(from, w)| self.state[from] * w)
                .sum::<f64>();
            let v = self.activation[slot].apply(sum);
            if !v.is_finite() {
                return Err(EvaluationError::NonFinite {
                    node: self.ids[slot],
                });
            }
            self.state[slot] = v;
        }

        for (out, &slot) in self.output.iter_mut().zip(&self.action) {
            *out = self.state[slot];
        }
        Ok(&self.output)
    }

    fn flush(&mut self) {
        self.state.iter_mut().for_each(|v| *v = 0.);
        self.output.iter_mut().for_each(|v| *v = 0.);
    }

    fn output(&self) -> &[f64] {
        &self.output
    }

    fn step_cost(&self) -> u64 {
        self.order.len() as u64
    }
}
