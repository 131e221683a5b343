//! Novelty search: how far a genome's behaviour sits from its nearest neighbours among the
//! current generation and a bounded archive of past novel behaviours.

use crate::{config::NeatConfig, simulator::BehaviorDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyArchive {
    k: usize,
    threshold: f64,
    capacity: usize,
    entries: VecDeque<BehaviorDescriptor>,
}

impl NoveltyArchive {
    pub fn new(k: usize, threshold: f64, capacity: usize) -> Self {
        Self {
            k: k.max(1),
            threshold,
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn from_config(config: &NeatConfig) -> Self {
        Self::new(
            config.novelty_k_nearest,
            config.novelty_threshold,
            config.novelty_archive_capacity,
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BehaviorDescriptor> {
        self.entries.iter()
    }

    /// Mean distance from `target` to its k nearest among `neighbours` and the archive.
    /// With nothing to compare against, novelty is 0.
    pub fn novelty<'a>(
        &'a self,
        target: &BehaviorDescriptor,
        neighbours: impl Iterator<Item = &'a BehaviorDescriptor>,
    ) -> f64 {
        let mut distances = neighbours
            .chain(self.entries.iter())
            .map(|b| target.distance(b))
            .collect::<Vec<_>>();
        if distances.is_empty() {
            return 0.;
        }

        let k = self.k.min(distances.len());
        distances.select_nth_unstable_by(k - 1, f64::total_cmp);
        distances[..k].iter().sum::<f64>() / k as f64
    }

    /// Novelty of every behaviour in a generation, each measured against the rest of the
    /// generation and the archive. Genomes without a behaviour score 0 and are nobody's
    /// neighbour.
    pub fn score_generation(&self, behaviors: &[Option<BehaviorDescriptor>]) -> Vec<f64> {
        behaviors
            .iter()
            .enumerate()
            .map(|(idx, behavior)| match behavior {
                Some(target) => self.novelty(
                    target,
                    behaviors
                        .iter()
                        .enumerate()
                        .filter(|(other, _)| *other != idx)
                        .filter_map(|(_, b)| b.as_ref()),
                ),
                None => 0.,
            })
            .collect()
    }

    /// Archive `behavior` if its novelty beats the threshold, evicting the oldest entry when
    /// full. Returns whether it was admitted.
    pub fn admit(&mut self, behavior: BehaviorDescriptor, novelty: f64) -> bool {
        if self.capacity == 0 || novelty <= self.threshold {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(behavior);
        true
    }
}
