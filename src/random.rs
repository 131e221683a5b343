//! Randomness for the engine: a small seedable generator and event rolls against configured
//! probabilities. Probabilities are held as `u64` thresholds so an event happens when a raw
//! draw falls below its threshold.

use crate::config::NeatConfig;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{self, Read},
};

/// Map a probability in [0, 1] onto a `u64` threshold
pub fn chance(p: f64) -> u64 {
    if p <= 0. {
        0
    } else if p >= 1. {
        u64::MAX
    } else {
        (p * u64::MAX as f64) as u64
    }
}

pub const fn percent(x: u64) -> u64 {
    x * (u64::MAX / 100)
}

pub trait Probabilities {
    type Update;
    fn probability(&self, evt: EvolutionEvent) -> u64;
    fn update(&mut self, stats: Self::Update);
}

pub trait Happens: RngCore + Probabilities {
    fn happens(&mut self, evt: EvolutionEvent) -> bool;
}

impl<T: RngCore + Probabilities> Happens for T {
    fn happens(&mut self, evt: EvolutionEvent) -> bool {
        self.probability(evt) > self.next_u64()
    }
}

macro_rules! evolution_events {
    ($($evt:ident),+ $(,)?) => {
        ::paste::paste! {
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum EvolutionEvent {
                $($evt,)+
            }

            /// Fixed per-event thresholds
            #[derive(Debug, Clone, PartialEq)]
            pub struct ProbStatic {
                $([<$evt:snake>]: u64,)+
            }

            impl Probabilities for ProbStatic {
                type Update = (EvolutionEvent, u64);

                fn probability(&self, evt: EvolutionEvent) -> u64 {
                    match evt {
                        $(EvolutionEvent::$evt => self.[<$evt:snake>],)+
                    }
                }

                fn update(&mut self, (evt, v): Self::Update) {
                    match evt {
                        $(EvolutionEvent::$evt => self.[<$evt:snake>] = v,)+
                    }
                }
            }
        }
    };
}

evolution_events!(
    MutateWeight,
    ResetWeight,
    MutateConnection,
    MutateBisection,
    MutateActivation,
    Crossover,
    KeepDisabled,
    PickLeq,
);

impl ProbStatic {
    pub fn with_overrides(mut self, updates: &[(EvolutionEvent, u64)]) -> Self {
        for update in updates {
            self.update(*update);
        }
        self
    }
}

impl From<&NeatConfig> for ProbStatic {
    fn from(config: &NeatConfig) -> Self {
        Self {
            mutate_weight: chance(config.weight_mutation_rate),
            reset_weight: chance(config.weight_reset_rate),
            mutate_connection: chance(config.connection_mutation_rate),
            mutate_bisection: chance(config.node_mutation_rate),
            mutate_activation: chance(config.activation_mutation_rate),
            crossover: chance(config.crossover_rate),
            keep_disabled: chance(config.keep_disabled_rate),
            pick_leq: percent(50),
        }
    }
}

impl Default for ProbStatic {
    fn default() -> Self {
        Self::from(&NeatConfig::default())
    }
}

/// wyrand; tiny, fast, and seedable so runs can be replayed. Its state is checkpointed with the
/// rest of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WyRng {
    state: u64,
}

impl WyRng {
    pub fn seeded(state: u64) -> Self {
        Self { state }
    }
}

impl RngCore for WyRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        const WY_CONST_0: u64 = 0x2d35_8dcc_aa6c_78a5;
        const WY_CONST_1: u64 = 0x8bb8_4b93_962e_acc9;
        self.state = self.state.wrapping_add(WY_CONST_0);
        let t = u128::from(self.state) * u128::from(self.state ^ WY_CONST_1);
        (t as u64) ^ (t >> 64) as u64
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(8) {
            let bytes = self.next_u64().to_ne_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// Binds a probability table to a generator, so the pair can be handed around as one
/// `impl Happens`
#[derive(Debug, Clone)]
pub struct ProbBinding<P: Probabilities, R: RngCore> {
    p: P,
    r: R,
}

impl<P: Probabilities, R: RngCore> ProbBinding<P, R> {
    pub fn new(p: P, r: R) -> Self {
        Self { p, r }
    }

    pub fn rng(&self) -> &R {
        &self.r
    }
}

impl<P: Probabilities, R: RngCore> Probabilities for ProbBinding<P, R> {
    type Update = P::Update;
    fn probability(&self, evt: EvolutionEvent) -> u64 {
        self.p.probability(evt)
    }

    fn update(&mut self, stats: Self::Update) {
        self.p.update(stats);
    }
}

impl<P: Probabilities, R: RngCore> RngCore for ProbBinding<P, R> {
    fn next_u32(&mut self) -> u32 {
        self.r.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.r.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.r.fill_bytes(dest)
    }
}

/// The generator and probability table an evolution run uses
pub type EvolutionRng = ProbBinding<ProbStatic, WyRng>;

pub fn seed_urandom() -> io::Result<u64> {
    let mut file = File::open("/dev/urandom")?;
    let mut buffer = [0u8; 8];
    file.read_exact(&mut buffer)?;
    Ok(u64::from_le_bytes(buffer))
}

/// A generator from `seed`, or from the OS when unset. Falls back to the clock if urandom is
/// unavailable.
pub fn rng_from(seed: Option<u64>) -> WyRng {
    let seed = seed.unwrap_or_else(|| {
        seed_urandom().unwrap_or_else(|_| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x5eed)
        })
    });
    WyRng::seeded(seed)
}

#[cfg(test)]
mod test {
    use super::*;
    use core::iter::once;

    fn assert_within_deviation(
        evt: EvolutionEvent,
        chance: f64,
        range: f64,
        happens: &mut impl Happens,
    ) {
        let samples = 10_000.;
        let expected = chance * samples;
        let max_deviation = expected * range;
        for _ in 0..20 {
            let incidence = once(())
                .cycle()
                .take(samples as usize)
                .filter(|()| happens.happens(evt))
                .count() as f64;
            assert!(
                (expected - incidence).abs() < max_deviation,
                "{evt:?}: {incidence} != {expected} ± {max_deviation}"
            );
        }
    }

    #[test]
    fn test_deviation_wyrand() {
        let config = NeatConfig::default();
        let mut p_bind = ProbBinding::new(ProbStatic::from(&config), WyRng::seeded(42));
        for (evt, chance) in [
            (EvolutionEvent::MutateWeight, config.weight_mutation_rate),
            (EvolutionEvent::ResetWeight, config.weight_reset_rate),
            (EvolutionEvent::MutateConnection, config.connection_mutation_rate),
            (EvolutionEvent::MutateBisection, config.node_mutation_rate),
            (EvolutionEvent::MutateActivation, config.activation_mutation_rate),
            (EvolutionEvent::Crossover, config.crossover_rate),
            (EvolutionEvent::KeepDisabled, config.keep_disabled_rate),
            (EvolutionEvent::PickLeq, 0.5),
        ] {
            assert_within_deviation(evt, chance, 0.33, &mut p_bind);
        }
    }

    #[test]
    fn test_chance_edges() {
        let mut p_bind = ProbBinding::new(
            ProbStatic::default().with_overrides(&[
                (EvolutionEvent::MutateWeight, chance(0.)),
                (EvolutionEvent::Crossover, chance(1.)),
            ]),
            WyRng::seeded(7),
        );
        for _ in 0..1000 {
            assert!(!p_bind.happens(EvolutionEvent::MutateWeight));
            assert!(p_bind.happens(EvolutionEvent::Crossover));
        }
    }

    #[test]
    fn test_seeded_replay() {
        let mut l = rng_from(Some(99));
        let mut r = rng_from(Some(99));
        for _ in 0..100 {
            assert_eq!(l.next_u64(), r.next_u64());
        }
    }

    #[test]
    fn test_fill_bytes_partial_chunk() {
        let mut rng = WyRng::seeded(1);
        let mut buf = [0u8; 13];
        rng.fill_bytes(&mut buf);
        assert!(buf.iter().any(|b| *b != 0));
    }
}
