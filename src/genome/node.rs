use crate::network::Activation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Input,
    Hidden,
    Output,
    Bias,
}

/// A node of the network. Identity is the id, which is global across a run: the same id in two
/// genomes means the same structural origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    pub id: usize,
    pub kind: NodeKind,
    pub activation: Activation,
}

impl NodeGene {
    pub fn new(id: usize, kind: NodeKind, activation: Activation) -> Self {
        Self {
            id,
            kind,
            activation,
        }
    }

    pub fn input(id: usize) -> Self {
        Self::new(id, NodeKind::Input, Activation::Identity)
    }

    pub fn output(id: usize) -> Self {
        Self::new(id, NodeKind::Output, Activation::Identity)
    }

    pub fn bias(id: usize) -> Self {
        Self::new(id, NodeKind::Bias, Activation::Identity)
    }

    pub fn hidden(id: usize, activation: Activation) -> Self {
        Self::new(id, NodeKind::Hidden, activation)
    }

    /// Inputs and the bias are clamped; nothing may connect into them
    #[inline]
    pub fn accepts_incoming(&self) -> bool {
        matches!(self.kind, NodeKind::Hidden | NodeKind::Output)
    }
}
