//! Genomes: variable topology networks encoded as node and connection genes.
//!
//! Nodes and connections live in flat vectors, sorted by node id and innovation id
//! respectively, and refer to each other only by id. Node ids are laid out as
//! `[inputs.., outputs.., bias, hidden..]`, the hidden ids coming from the run's [InnoGen].

pub mod connection;
pub mod innovation;
pub mod mutate;
pub mod node;

pub use connection::ConnectionGene;
pub use innovation::InnoGen;
pub use node::{NodeGene, NodeKind};

use crate::{
    config::{InitialTopology, NeatConfig},
    crossover::{crossover, delta, Compatibility},
    error::{EvaluationError, Result},
    random::Happens,
    serialize::Persist,
};
use core::{cmp::Ordering, ops::Range};
use fxhash::FxHashSet;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Range of the weights given to freshly wired connections
pub const WEIGHT_INIT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    inputs: usize,
    outputs: usize,
    nodes: Vec<NodeGene>,
    connections: Vec<ConnectionGene>,
}

impl Genome {
    /// Inputs, outputs and a bias, with no connections
    pub fn new(inputs: usize, outputs: usize) -> Self {
        let mut nodes = Vec::with_capacity(inputs + outputs + 1);
        for id in 0..inputs {
            nodes.push(NodeGene::input(id));
        }
        for id in inputs..inputs + outputs {
            nodes.push(NodeGene::output(id));
        }
        nodes.push(NodeGene::bias(inputs + outputs));

        Self {
            inputs,
            outputs,
            nodes,
            connections: vec![],
        }
    }

    /// The starting genome of a run. With [InitialTopology::FullyConnected] every input and the
    /// bias is wired to every output with a uniformly drawn weight.
    pub fn create_minimal(
        inputs: usize,
        outputs: usize,
        topology: InitialTopology,
        inno: &mut InnoGen,
        rng: &mut impl RngCore,
    ) -> Self {
        let mut genome = Self::new(inputs, outputs);
        if topology == InitialTopology::FullyConnected {
            let sources = genome.sensory().chain(core::iter::once(genome.bias_id()));
            for from in sources {
                for to in genome.action() {
                    let weight = rng.random_range(-WEIGHT_INIT..=WEIGHT_INIT);
                    genome.push_connection(ConnectionGene::new(from, to, weight, inno));
                }
            }
        }
        genome
    }

    /// A starting genome shaped by `config`
    pub fn from_config(config: &NeatConfig, inno: &mut InnoGen, rng: &mut impl RngCore) -> Self {
        Self::create_minimal(
            config.input_nodes,
            config.output_nodes,
            config.initial_topology,
            inno,
            rng,
        )
    }

    #[inline]
    pub fn sensory(&self) -> Range<usize> {
        0..self.inputs
    }

    #[inline]
    pub fn action(&self) -> Range<usize> {
        self.inputs..self.inputs + self.outputs
    }

    #[inline]
    pub fn bias_id(&self) -> usize {
        self.inputs + self.outputs
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeGene] {
        &self.nodes
    }

    #[inline]
    pub fn connections(&self) -> &[ConnectionGene] {
        &self.connections
    }

    #[inline]
    pub fn connections_mut(&mut self) -> &mut [ConnectionGene] {
        &mut self.connections
    }

    pub fn node(&self, id: usize) -> Option<&NodeGene> {
        self.nodes
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn hidden(&self) -> impl Iterator<Item = &NodeGene> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Hidden)
    }

    /// Insert a node, keeping id order. A node with an existing id is ignored.
    pub fn push_node(&mut self, node: NodeGene) {
        if let Err(idx) = self.nodes.binary_search_by_key(&node.id, |n| n.id) {
            self.nodes.insert(idx, node);
        }
    }

    /// Insert a connection, keeping innovation order. A connection whose innovation is already
    /// present is ignored.
    pub fn push_connection(&mut self, connection: ConnectionGene) {
        if let Err(idx) = self
            .connections
            .binary_search_by_key(&connection.inno, |c| c.inno)
        {
            self.connections.insert(idx, connection);
        }
    }

    /// Whether `target` can be reached from `from` along any connection gene, enabled or not
    pub fn reaches(&self, from: usize, target: usize) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if seen.insert(node) {
                stack.extend(
                    self.connections
                        .iter()
                        .filter(|c| c.from == node)
                        .map(|c| c.to),
                );
            }
        }
        false
    }

    /// Genetic distance to `other`, 0 for identical gene sets
    pub fn compatibility_distance(&self, other: &Self, coefficients: &Compatibility) -> f64 {
        delta(&self.connections, &other.connections, coefficients)
    }

    /// Crossover with other, where our fitness is `self_fit` compared to other. Node genes are
    /// taken from the fitter parent when both carry them.
    pub fn reproduce_with(
        &self,
        other: &Self,
        self_fit: Ordering,
        rng: &mut impl Happens,
    ) -> Self {
        let connections = crossover(&self.connections, &other.connections, self_fit, rng);
        let (primary, secondary) = match self_fit {
            Ordering::Less => (other, self),
            _ => (self, other),
        };

        let mut child = Self {
            inputs: self.inputs,
            outputs: self.outputs,
            nodes: primary
                .nodes
                .iter()
                .filter(|n| n.kind != NodeKind::Hidden)
                .copied()
                .collect(),
            connections,
        };

        let referenced = child
            .connections
            .iter()
            .flat_map(|c| [c.from, c.to])
            .collect::<FxHashSet<_>>();
        for id in referenced {
            if child.node(id).is_none() {
                if let Some(node) = primary.node(id).or_else(|| secondary.node(id)) {
                    child.push_node(*node);
                }
            }
        }

        debug_assert!(child.check().is_ok());
        child
    }

    /// Structural invariants: fixed nodes laid out as expected, sorted unique ids, every
    /// connection endpoint present, nothing flowing into inputs or the bias.
    pub fn check(&self) -> core::result::Result<(), EvaluationError> {
        let malformed = |msg: String| Err(EvaluationError::MalformedTopology(msg));

        for id in self.sensory() {
            if self.node(id).map(|n| n.kind) != Some(NodeKind::Input) {
                return malformed(format!("node {id} should be an input"));
            }
        }
        for id in self.action() {
            if self.node(id).map(|n| n.kind) != Some(NodeKind::Output) {
                return malformed(format!("node {id} should be an output"));
            }
        }
        if self.node(self.bias_id()).map(|n| n.kind) != Some(NodeKind::Bias) {
            return malformed(format!("node {} should be the bias", self.bias_id()));
        }
        if self.nodes.windows(2).any(|w| w[0].id >= w[1].id) {
            return malformed("node ids are not strictly increasing".into());
        }
        if self.connections.windows(2).any(|w| w[0].inno >= w[1].inno) {
            return malformed("duplicate or unordered innovation ids".into());
        }
        for c in &self.connections {
            match (self.node(c.from), self.node(c.to)) {
                (Some(_), Some(to)) if to.accepts_incoming() => {}
                (Some(_), Some(_)) => {
                    return malformed(format!("connection {} flows into a fixed node", c.inno))
                }
                _ => return malformed(format!("connection {} has a dangling endpoint", c.inno)),
            }
        }
        Ok(())
    }
}

impl Persist for Genome {
    fn check(&self) -> Result<()> {
        Ok(Genome::check(self)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::random::{ProbBinding, ProbStatic, WyRng};

    fn coefficients() -> Compatibility {
        Compatibility::from(&NeatConfig::default())
    }

    #[test]
    fn test_genome_creation() {
        let genome = Genome::new(3, 2);
        assert_eq!(genome.sensory().len(), 3);
        assert_eq!(genome.action().len(), 2);
        assert_eq!(genome.nodes().len(), 6);
        assert_eq!(genome.nodes()[0].kind, NodeKind::Input);
        assert_eq!(genome.nodes()[3].kind, NodeKind::Output);
        assert_eq!(genome.nodes()[5].kind, NodeKind::Bias);
        assert!(genome.connections().is_empty());
        genome.check().unwrap();
    }

    #[test]
    fn test_create_fully_connected() {
        let mut inno = InnoGen::for_io(3, 3);
        let mut rng = WyRng::seeded(1);
        let genome =
            Genome::create_minimal(3, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        assert_eq!(genome.connections().len(), 12);
        assert_eq!(inno.head, 12);
        assert!(genome
            .connections()
            .iter()
            .all(|c| (-WEIGHT_INIT..=WEIGHT_INIT).contains(&c.weight)));
        genome.check().unwrap();

        // a second genome shares innovation ids for the same paths
        let other =
            Genome::create_minimal(3, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        assert_eq!(inno.head, 12);
        let l = genome.connections().iter().map(|c| c.inno).collect::<Vec<_>>();
        let r = other.connections().iter().map(|c| c.inno).collect::<Vec<_>>();
        assert_eq!(l, r);
    }

    #[test]
    fn test_create_minimal_empty() {
        let mut inno = InnoGen::for_io(4, 3);
        let genome = Genome::create_minimal(
            4,
            3,
            InitialTopology::Minimal,
            &mut inno,
            &mut WyRng::seeded(0),
        );
        assert!(genome.connections().is_empty());
        assert_eq!(inno.head, 0);
    }

    #[test]
    fn test_compatibility_self_zero() {
        let mut inno = InnoGen::for_io(2, 3);
        let mut rng = ProbBinding::new(ProbStatic::default(), WyRng::seeded(3));
        let mut genome =
            Genome::create_minimal(2, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        for _ in 0..20 {
            genome.mutate(&mut rng, &mut inno, &NeatConfig::default());
        }
        assert_eq!(genome.compatibility_distance(&genome, &coefficients()), 0.);
        assert_eq!(
            genome.compatibility_distance(&genome.clone(), &coefficients()),
            0.
        );
    }

    #[test]
    fn test_clone_independent() {
        let mut inno = InnoGen::for_io(1, 3);
        let mut rng = WyRng::seeded(9);
        let genome =
            Genome::create_minimal(1, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        let mut copy = genome.clone();
        copy.connections_mut()[0].weight = 42.;
        assert_ne!(genome.connections()[0].weight, 42.);
    }

    #[test]
    fn test_self_crossover_identical() {
        let config = NeatConfig::default();
        let mut inno = InnoGen::for_io(2, 3);
        let mut rng = ProbBinding::new(ProbStatic::from(&config), WyRng::seeded(11));
        let mut genome =
            Genome::create_minimal(2, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        for _ in 0..30 {
            genome.mutate(&mut rng, &mut inno, &config);
        }

        for ord in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
            for _ in 0..20 {
                assert_eq!(genome.reproduce_with(&genome, ord, &mut rng), genome);
            }
        }
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = NeatConfig::default();
        let mut inno = InnoGen::for_io(2, 3);
        let mut rng = ProbBinding::new(ProbStatic::from(&config), WyRng::seeded(5));
        let mut genome =
            Genome::create_minimal(2, 3, InitialTopology::FullyConnected, &mut inno, &mut rng);
        for _ in 0..25 {
            genome.mutate(&mut rng, &mut inno, &config);
        }

        let back = Genome::from_str(&Persist::to_string(&genome).unwrap()).unwrap();
        assert_eq!(genome, back);
        for (l, r) in genome.connections().iter().zip(back.connections()) {
            assert_eq!(l.weight.to_bits(), r.weight.to_bits());
        }
    }

    #[test]
    fn test_deserialize_rejects_dangling() {
        let mut genome = Genome::new(1, 3);
        genome.connections.push(ConnectionGene {
            inno: 0,
            from: 0,
            to: 99,
            weight: 1.,
            enabled: true,
        });
        let s = Persist::to_string(&genome).unwrap();
        assert!(matches!(
            Genome::from_str(&s),
            Err(crate::error::Error::Evaluation(EvaluationError::MalformedTopology(_)))
        ));
    }

    #[test]
    fn test_check_rejects_duplicate_inno() {
        let mut genome = Genome::new(1, 3);
        let c = ConnectionGene {
            inno: 3,
            from: 0,
            to: 1,
            weight: 1.,
            enabled: true,
        };
        genome.connections = vec![c.clone(), ConnectionGene { to: 2, ..c }];
        assert!(genome.check().is_err());
    }

    #[test]
    fn test_check_rejects_into_input() {
        let mut genome = Genome::new(2, 3);
        genome.connections.push(ConnectionGene {
            inno: 0,
            from: 2,
            to: 0,
            weight: 1.,
            enabled: true,
        });
        assert!(genome.check().is_err());
    }

    #[test]
    fn test_reaches() {
        let mut inno = InnoGen::for_io(1, 3);
        let mut genome = Genome::new(1, 3);
        genome.push_connection(ConnectionGene::new(0, 5, 1., &mut inno));
        genome.push_node(NodeGene::hidden(5, crate::network::Activation::Tanh));
        genome.push_connection(ConnectionGene::new(5, 2, 1., &mut inno));
        assert!(genome.reaches(0, 2));
        assert!(!genome.reaches(2, 0));
        assert!(genome.reaches(5, 5));
    }
}
