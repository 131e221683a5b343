use super::InnoGen;
use crate::serialize::{deserialize_f64_bits, serialize_f64_bits};
use core::hash::Hash;
use serde::{Deserialize, Serialize};

/// A weighted path between two nodes, identified across the whole run by its innovation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGene {
    pub inno: usize,
    pub from: usize,
    pub to: usize,
    #[serde(
        serialize_with = "serialize_f64_bits",
        deserialize_with = "deserialize_f64_bits"
    )]
    pub weight: f64,
    pub enabled: bool,
}

impl ConnectionGene {
    pub fn new(from: usize, to: usize, weight: f64, inno: &mut InnoGen) -> Self {
        Self {
            inno: inno.path((from, to)),
            from,
            to,
            weight,
            enabled: true,
        }
    }

    #[inline]
    pub fn path(&self) -> (usize, usize) {
        (self.from, self.to)
    }

    /// difference of connection parameters between this and another connection with the same
    /// innovation id
    #[inline]
    pub fn param_diff(&self, other: &Self) -> f64 {
        (self.weight - other.weight).abs()
    }

    /// Disable this connection, and return the two that replace it through `center`
    pub fn bisect(&mut self, center: usize, inno: &mut InnoGen) -> (Self, Self) {
        self.enabled = false;
        (
            // from -{1.}> center
            Self::new(self.from, center, 1., inno),
            // center -{w}> to
            Self::new(center, self.to, self.weight, inno),
        )
    }
}

impl Default for ConnectionGene {
    fn default() -> Self {
        Self {
            inno: 0,
            from: 0,
            to: 0,
            weight: 0.,
            enabled: true,
        }
    }
}

impl Hash for ConnectionGene {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inno.hash(state);
        self.from.hash(state);
        self.to.hash(state);
        self.weight.to_bits().hash(state);
        self.enabled.hash(state);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bisect() {
        let mut inno = InnoGen::new(0, 10);
        let mut c = ConnectionGene::new(0, 1, -0.7, &mut inno);
        let center = inno.split(c.inno);
        let (l, r) = c.bisect(center, &mut inno);

        assert!(!c.enabled);
        assert_eq!(l.path(), (0, center));
        assert_eq!(l.weight, 1.);
        assert_eq!(r.path(), (center, 1));
        assert_eq!(r.weight, -0.7);
        assert!(l.enabled && r.enabled);
        assert_ne!(l.inno, r.inno);
        assert_ne!(c.inno, l.inno);
    }

    #[test]
    fn test_param_diff() {
        let mut inno = InnoGen::new(0, 2);
        let l = ConnectionGene::new(0, 1, 0.25, &mut inno);
        let r = ConnectionGene {
            weight: -0.5,
            ..l.clone()
        };
        assert_eq!(l.param_diff(&r), 0.75);
        assert_eq!(l.param_diff(&l), 0.);
    }
}
