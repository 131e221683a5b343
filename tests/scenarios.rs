use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use neatrade::{
    fitness::performance_score,
    genome::{ConnectionGene, Genome, InnoGen},
    market::{MarketState, Tick},
    network::Decision,
    scenario::{Scenario, TradingScenario},
    simulator::ExitReason,
    Config,
};
use std::sync::Arc;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn market(deltas: &[f64], spacing: Duration) -> Arc<MarketState> {
    Arc::new(
        MarketState::new(
            deltas
                .iter()
                .enumerate()
                .map(|(t, &forward_delta)| Tick {
                    timestamp: start() + spacing * t as i32,
                    features: vec![0.; 2],
                    forward_delta,
                })
                .collect(),
        )
        .unwrap(),
    )
}

fn config() -> Config {
    let mut config = Config::default();
    config.neat.input_nodes = 2;
    config.trading.lookback_periods = 0;
    config
}

/// A network whose BUY output is driven by the bias alone
fn always_buy() -> Genome {
    let mut inno = InnoGen::for_io(2, 3);
    let mut genome = Genome::new(2, 3);
    let buy = genome.action().start + Decision::Buy as usize;
    genome.push_connection(ConnectionGene::new(genome.bias_id(), buy, 1., &mut inno));
    genome
}

#[test]
fn test_hold_genome_scores_the_floor() {
    let config = config();
    let scenario = TradingScenario::new(market(
        &[0.01, -0.02, 0.03, -0.01, 0.02, 0., -0.05, 0.04],
        Duration::hours(1),
    ));
    scenario.validate(&config).unwrap();

    // no connections: outputs tie at 0, which is HOLD
    let report = scenario.evaluate(&Genome::new(2, 3), &config).unwrap();
    assert_eq!(report.trade_count, 0);
    assert_eq!(report.max_drawdown, 0.);
    assert_eq!(report.total_return, 0.);
    assert_eq!(report.final_equity, config.trading.initial_capital);
    assert_eq!(
        performance_score(&report, &config.fitness),
        config.fitness.fitness_floor
    );
}

#[test]
fn test_stop_loss_closes_on_crossing_step() {
    let mut config = config();
    config.trading.stop_loss_pct = 0.05;
    config.trading.max_daily_loss = 0.5;
    let deltas = [-0.03, -0.03, -0.03, 0., 0., 0.];
    // one tick a day keeps the daily limit out of the way
    let market = market(&deltas, Duration::days(1));
    let prices = market.prices().collect::<Vec<_>>();

    let report = TradingScenario::new(market)
        .evaluate(&always_buy(), &config)
        .unwrap();

    let first = &report.trades[0];
    assert_eq!(first.entry_step, 0);
    assert_eq!(first.reason, ExitReason::StopLoss);
    // -3% at step 1, -5.91% at step 2
    assert_eq!(first.exit_step, 2);
    assert_eq!(first.exit_price, prices[2]);
    assert_relative_eq!(first.exit_price, 100. * 0.97 * 0.97, max_relative = 1e-12);

    for trade in report.trades.iter().filter(|t| t.reason == ExitReason::StopLoss) {
        let drop = |price: f64| (price - trade.entry_price) / trade.entry_price;
        assert!(drop(trade.exit_price) <= -config.trading.stop_loss_pct);
        for step in trade.entry_step..trade.exit_step {
            assert!(
                drop(prices[step]) > -config.trading.stop_loss_pct,
                "held past the stop at step {step}"
            );
        }
    }
}

#[test]
fn test_daily_loss_halts_until_next_day() {
    let mut config = config();
    config.trading.max_position_size = 1.;
    config.trading.stop_loss_pct = 0.03;
    config.trading.take_profit_pct = 10.;
    config.trading.max_daily_loss = 0.02;
    config.trading.commission = 0.;
    config.trading.slippage = 0.;
    // four ticks a day; a 4% drop on the first
    let deltas = [-0.04, 0., 0., 0., 0., 0., 0., 0.];
    let report = TradingScenario::new(market(&deltas, Duration::hours(6)))
        .evaluate(&always_buy(), &config)
        .unwrap();

    assert_eq!(report.trades.len(), 2);
    assert_eq!(report.trades[0].reason, ExitReason::StopLoss);
    assert_eq!(report.trades[0].exit_step, 1);
    // all in at 100, out at 96, no costs
    assert_relative_eq!(report.trades[0].pnl, -400., epsilon = 1e-6);
    // BUY at steps 1, 2 and 3 is ignored; the next day opens at step 4
    assert_eq!(report.trades[1].entry_step, 4);
    assert_eq!(report.trades[1].reason, ExitReason::EndOfData);
    assert_eq!(report.behavior.0[Decision::Buy as usize], 1.);
}

#[test]
fn test_misaligned_market_is_fatal() {
    let scenario = TradingScenario::new(market(&[0.; 10], Duration::hours(1)));
    let mut wide = config();
    wide.neat.input_nodes = 3;
    assert!(scenario.validate(&wide).unwrap_err().is_fatal());

    let mut warmup = config();
    warmup.trading.lookback_periods = 10;
    assert!(scenario.validate(&warmup).unwrap_err().is_fatal());
}
