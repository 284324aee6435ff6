//! Market maker against the in-memory exchange.
//!
//! Exit status 0 on interrupt, 1 on a fatal error (after cleanup), 75 when the
//! engine asks to be restarted by whatever supervises it.

use anyhow::Context;
use clap::Parser;
use log::info;
use mm_core::*;
use rust_decimal_macros::dec;
use std::path::PathBuf;

const EXIT_RESTART: i32 = 75;

#[derive(Debug, Parser)]
#[command(name = "mm-bot", about = "Market-making order lifecycle engine")]
struct Args {
    /// Instrument to trade. Overrides the config file.
    symbol: Option<String>,

    /// Log orders instead of sending them.
    #[arg(long)]
    dry_run: bool,

    /// TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// error, warn, info, debug or trace.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let overrides = Overrides {
        symbol: args.symbol.map(Symbol::new),
        dry_run: args.dry_run,
        log_level: args.log_level,
    };
    let settings = Settings::load(args.config.as_deref())
        .context("loading settings")?
        .with_overrides(&overrides);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.runtime.log_level))
        .init();

    let exchange = paper_exchange(&settings)?;
    let mut bot = MarketMaker::new(exchange, DepthImbalanceSignal::default(), settings)?;
    bot.install_signal_handler().context("installing signal handler")?;

    match bot.run()? {
        CycleOutcome::Restart => std::process::exit(EXIT_RESTART),
        CycleOutcome::Continue => {
            info!("Market maker stopped.");
            Ok(())
        }
    }
}

// an inverse perpetual around 10000 for every configured contract
fn paper_exchange(settings: &Settings) -> anyhow::Result<SimulatedExchange> {
    let symbol = &settings.exchange.symbol;
    let mut instrument = Instrument::xbtusd();
    instrument.symbol = symbol.clone();

    let tick = instrument.tick_size;
    let ticker = Ticker::from_bid_ask(Price::new_unchecked(dec!(10000)), Price::new_unchecked(dec!(10000.5)), tick)
        .context("building the paper ticker")?;
    let exchange = SimulatedExchange::new(instrument, ticker);
    exchange.set_ticker(ticker);
    exchange.set_margin(Margin::uniform(settings.exchange.dry_run_balance));

    for contract in settings.exchange.contracts.iter().filter(|c| *c != symbol) {
        let mut other = Instrument::xbtusd();
        other.symbol = contract.clone();
        other.mid_price = Some(ticker.mid);
        other.mark_price = Some(ticker.mid);
        other.indicative_settle_price = Some(ticker.mid);
        exchange.add_contract(other, Position::flat(contract.clone()));
    }
    Ok(exchange)
}
