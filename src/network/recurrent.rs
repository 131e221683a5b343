use super::{check_input, Activation, FromGenome, Network};
use crate::{error::EvaluationError, genome::Genome};
use fxhash::FxHashMap;
use rulinalg::matrix::{BaseMatrix, BaseMatrixMut, Matrix};

/// Relaxation passes per step when none are configured
pub const DEFAULT_ITERATIONS: usize = 3;

/// A recurrent network over a dense weight matrix.
///
/// Each step clamps inputs and the bias (to 1), then performs `iterations` synchronous passes
/// where every other node becomes `activation(Σ w · y)` over the previous pass's state. Node
/// state persists from one step to the next until [Network::flush], so recurrent connections
/// carry information through time as well as within a step.
#[derive(Debug, Clone)]
pub struct Recurrent {
    /// 1d state of neurons 0-N
    y: Matrix<f64>,
    /// Nd weights between neurons, indexed as [from, to]
    w: Matrix<f64>,
    ids: Vec<usize>,
    activation: Vec<Activation>,
    /// slots whose value is computed rather than clamped
    free: Vec<usize>,
    sensory: Vec<usize>,
    action: Vec<usize>,
    bias: usize,
    iterations: usize,
    output: Vec<f64>,
}

impl Recurrent {
    pub fn with_iterations(genome: &Genome, iterations: usize) -> Result<Self, EvaluationError> {
        genome.check()?;

        let n = genome.nodes().len();
        let slot = genome
            .nodes()
            .iter()
            .enumerate()
            .map(|(slot, node)| (node.id, slot))
            .collect::<FxHashMap<_, _>>();
        let find = |id: usize| {
            slot.get(&id).copied().ok_or_else(|| {
                EvaluationError::MalformedTopology(format!("node {id} is not in the genome"))
            })
        };

        let mut w = Matrix::zeros(n, n);
        for c in genome.connections().iter().filter(|c| c.enabled) {
            w[[find(c.from)?, find(c.to)?]] += c.weight;
        }

        Ok(Self {
            y: Matrix::zeros(1, n),
            w,
            ids: genome.nodes().iter().map(|node| node.id).collect(),
            activation: genome.nodes().iter().map(|node| node.activation).collect(),
            free: genome
                .nodes()
                .iter()
                .enumerate()
                .filter(|(_, node)| node.accepts_incoming())
                .map(|(slot, _)| slot)
                .collect(),
            sensory: genome.sensory().map(find).collect::<Result<_, _>>()?,
            action: genome.action().map(find).collect::<Result<_, _>>()?,
            bias: find(genome.bias_id())?,
            iterations: iterations.max(1),
            output: vec![0.; genome.action().len()],
        })
    }
}

impl FromGenome for Recurrent {
    fn from_genome(genome: &Genome) -> Result<Self, EvaluationError> {
        Self::with_iterations(genome, DEFAULT_ITERATIONS)
    }
}

impl Network for Recurrent {
    fn step(&mut self, input: &[f64]) -> Result<&[f64], EvaluationError> {
        check_input(self.sensory.len(), input)?;
        {
            let y = self.y.mut_data();
            for (&slot, &v) in self.sensory.iter().zip(input) {
                y[slot] = v;
            }
            y[self.bias] = 1.;
        }

        for _ in 0..self.iterations {
            let z = &self.y * &self.w;
            let y = self.y.mut_data();
            for &slot in &self.free {
                let v = self.activation[slot].apply(z.data()[slot]);
                if !v.is_finite() {
                    return Err(EvaluationError::NonFinite {
                        node: self.ids[slot],
                    });
                }
                y[slot] = v;
            }
        }

        for (out, &slot) in self.output.iter_mut().zip(&self.action) {
            *out = self.y.data()[slot];
        }
        Ok(&self.output)
    }

    fn flush(&mut self) {
        self.y = Matrix::zeros(1, self.y.cols());
        self.output.iter_mut().for_each(|v| *v = 0.);
    }

    fn output(&self) -> &[f64] {
        &self.output
    }

    fn step_cost(&self) -> u64 {
        (self.iterations * self.free.len()) as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        assert_f64_approx,
        genome::{ConnectionGene, InnoGen, NodeGene},
        network::FeedForward,
        random::WyRng,
    };
    use rand::Rng;

    // inputs 0 ; outputs 1,2,3 ; bias 4
    fn genome(paths: &[(usize, usize, f64)], hidden: &[(usize, Activation)]) -> Genome {
        let mut inno = InnoGen::for_io(1, 3);
        let mut genome = Genome::new(1, 3);
        for &(id, act) in hidden {
            genome.push_node(NodeGene::hidden(id, act));
        }
        for &(from, to, w) in paths {
            genome.push_connection(ConnectionGene::new(from, to, w, &mut inno));
        }
        genome
    }

    #[test]
    fn test_relaxation_depth() {
        // 0 -> 5 -> 6 -> 1 needs three passes to reach the output
        let g = genome(
            &[(0, 5, 1.), (5, 6, 1.), (6, 1, 1.)],
            &[(5, Activation::Identity), (6, Activation::Identity)],
        );
        let mut shallow = Recurrent::with_iterations(&g, 2).unwrap();
        assert_eq!(shallow.step(&[1.]).unwrap()[0], 0.);

        let mut deep = Recurrent::with_iterations(&g, 3).unwrap();
        assert_f64_approx!(deep.step(&[1.]).unwrap()[0], 1.);
    }

    #[test]
    fn test_self_loop_accumulates() {
        // output 1 feeds itself: y1 <- 1 + y1 each pass
        let mut nn =
            Recurrent::with_iterations(&genome(&[(4, 1, 1.), (1, 1, 1.)], &[]), 1).unwrap();
        assert_f64_approx!(nn.step(&[0.]).unwrap()[0], 1.);
        assert_f64_approx!(nn.step(&[0.]).unwrap()[0], 2.);
        assert_f64_approx!(nn.step(&[0.]).unwrap()[0], 3.);

        nn.flush();
        assert_f64_approx!(nn.step(&[0.]).unwrap()[0], 1.);
    }

    #[test]
    fn test_matches_feedforward_on_shallow_acyclic() {
        let g = genome(
            &[(0, 1, 0.3), (4, 1, -0.2), (0, 2, 1.5), (4, 3, 0.9)],
            &[],
        );
        let mut ff = FeedForward::from_genome(&g).unwrap();
        let mut rec = Recurrent::with_iterations(&g, 1).unwrap();
        let mut rng = WyRng::seeded(0);
        for _ in 0..50 {
            let input = [rng.random_range(-2.0..2.0)];
            let l = ff.step(&input).unwrap().to_vec();
            let r = rec.step(&input).unwrap().to_vec();
            for (l, r) in l.iter().zip(&r) {
                assert_f64_approx!(l, r);
            }
        }
    }

    #[test]
    fn test_non_finite() {
        let mut nn =
            Recurrent::with_iterations(&genome(&[(1, 1, 10.), (4, 1, 1.)], &[]), 400).unwrap();
        assert_eq!(
            nn.step(&[0.]),
            Err(EvaluationError::NonFinite { node: 1 })
        );
    }

    #[test]
    fn test_step_cost() {
        let g = genome(&[], &[(5, Activation::Tanh)]);
        assert_eq!(Recurrent::with_iterations(&g, 4).unwrap().step_cost(), 16);
        assert_eq!(Recurrent::with_iterations(&g, 0).unwrap().step_cost(), 4);
    }
}
