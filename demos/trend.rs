use chrono::{Duration, TimeZone, Utc};
use core::ops::ControlFlow;
use log::info;
use neatrade::{
    evolution::{Evolution, EvolutionHooks, Stats},
    market::MarketState,
    scenario::TradingScenario,
    serialize::Persist,
    store::JsonlStore,
    Config,
};
use std::{env, fs, sync::Arc};

const TICKS: usize = 2_000;

fn hook(stats: &Stats<'_>) -> ControlFlow<()> {
    if stats.generation % 10 == 0 {
        if let Some((genome, record)) = stats.fittest() {
            info!(
                "fittest of gen {}: {:.4} ({} trades, {} connections, {} species)",
                stats.generation,
                record.performance,
                record.trade_count,
                genome.connections().len(),
                stats.species.len()
            );
        }
    }
    ControlFlow::Continue(())
}

fn main() -> neatrade::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => {
            let mut config = Config::default();
            config.seed = Some(7);
            config.neat.pop_size = 150;
            config.neat.max_generations = 60;
            config.neat.input_nodes = 12;
            config.trading.lookback_periods = 48;
            config
        }
    };

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
    let start = start.unwrap_or_default();
    let market = MarketState::oscillating(
        TICKS,
        config.neat.input_nodes,
        96.,
        0.04,
        start,
        Duration::hours(1),
    )?;

    fs::create_dir_all("output")?;

    let outcome = Evolution::new(config, TradingScenario::new(Arc::new(market)))?
        .with_store(JsonlStore::new("output/trend.jsonl"))
        .with_hooks(EvolutionHooks::new(vec![Box::new(hook)]))
        .with_checkpoint_file("output/trend-checkpoint.json")
        .run();

    info!(
        "{:?} after {} generations, best {:.4}",
        outcome.termination, outcome.generations, outcome.best_fitness
    );
    outcome.best.to_file("output/trend-best.json")
}
