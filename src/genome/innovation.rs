use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The run-wide innovation record. Hands out one innovation id per distinct `(from, to)` path
/// and one hidden node id per split connection, so identical structural mutations made by
/// different genomes, in any generation, line up during crossover and speciation.
///
/// Owned by the orchestrator and lent to reproduction; serialised into checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "InnoSnapshot", into = "InnoSnapshot")]
pub struct InnoGen {
    /// next unused connection innovation id
    pub head: usize,
    /// next unused node id
    pub node_head: usize,
    seen: FxHashMap<(usize, usize), usize>,
    splits: FxHashMap<usize, usize>,
}

impl InnoGen {
    pub fn new(head: usize, node_head: usize) -> Self {
        Self {
            head,
            node_head,
            seen: FxHashMap::default(),
            splits: FxHashMap::default(),
        }
    }

    /// A fresh record for genomes with `inputs` inputs and `outputs` outputs; ids below
    /// `inputs + outputs + 1` belong to the fixed nodes (inputs, outputs, bias)
    pub fn for_io(inputs: usize, outputs: usize) -> Self {
        Self::new(0, inputs + outputs + 1)
    }

    pub fn path(&mut self, v: (usize, usize)) -> usize {
        match self.seen.get(&v) {
            Some(n) => *n,
            None => {
                let n = self.head;
                self.head += 1;
                self.seen.insert(v, n);
                n
            }
        }
    }

    /// The hidden node created by splitting connection `inno`
    pub fn split(&mut self, inno: usize) -> usize {
        match self.splits.get(&inno) {
            Some(n) => *n,
            None => {
                let n = self.fresh_node();
                self.splits.insert(inno, n);
                n
            }
        }
    }

    /// A node id nobody has used yet
    pub fn fresh_node(&mut self) -> usize {
        let n = self.node_head;
        self.node_head += 1;
        n
    }
}

#[derive(Serialize, Deserialize)]
struct InnoSnapshot {
    head: usize,
    node_head: usize,
    paths: Vec<(usize, usize, usize)>,
    splits: Vec<(usize, usize)>,
}

impl From<InnoGen> for InnoSnapshot {
    fn from(inno: InnoGen) -> Self {
        let mut paths = inno
            .seen
            .into_iter()
            .map(|((from, to), n)| (from, to, n))
            .collect::<Vec<_>>();
        paths.sort_unstable_by_key(|(_, _, n)| *n);
        let mut splits = inno.splits.into_iter().collect::<Vec<_>>();
        splits.sort_unstable();
        Self {
            head: inno.head,
            node_head: inno.node_head,
            paths,
            splits,
        }
    }
}

impl From<InnoSnapshot> for InnoGen {
    fn from(snap: InnoSnapshot) -> Self {
        Self {
            head: snap.head,
            node_head: snap.node_head,
            seen: snap
                .paths
                .into_iter()
                .map(|(from, to, n)| ((from, to), n))
                .collect(),
            splits: snap.splits.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_inno_gen() {
        let mut inno = InnoGen::new(0, 0);
        assert_eq!(inno.head, 0);
        assert_eq!(inno.path((0, 1)), 0);
        assert_eq!(inno.path((1, 2)), 1);
        assert_eq!(inno.path((0, 1)), 0);
        assert_eq!(inno.head, 2);

        let mut inno2 = InnoGen::new(inno.head, 0);
        assert_eq!(inno2.path((1, 0)), 2);
        assert_eq!(inno2.path((0, 1)), 3);
    }

    #[test]
    fn test_split_reuse() {
        let mut inno = InnoGen::for_io(2, 3);
        assert_eq!(inno.node_head, 6);
        let a = inno.split(4);
        let b = inno.split(9);
        assert_eq!(a, 6);
        assert_eq!(b, 7);
        assert_eq!(inno.split(4), a);
        assert_eq!(inno.fresh_node(), 8);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut inno = InnoGen::for_io(1, 3);
        inno.path((0, 1));
        inno.path((4, 2));
        inno.split(0);

        let back: InnoGen = serde_json::from_str(&serde_json::to_string(&inno).unwrap()).unwrap();
        assert_eq!(inno, back);

        let mut back = back;
        assert_eq!(back.path((4, 2)), 1);
        assert_eq!(back.split(0), 5);
        assert_eq!(back.path((7, 7)), 2);
    }
}
