// 8.4: run loop. Init -> Quoting <-> Recovering -> ShuttingDown.
// Recovering never repairs anything in-process. it hands back Restart and the supervisor starts us fresh.

use super::core::MarketMaker;
use super::results::{CycleOutcome, EngineError};
use crate::gateway::{check_if_orderbook_empty, check_market_open, ExchangeGateway};
use crate::market::MarketSnapshot;
use crate::quote::QuoteAnchors;
use crate::signal::SignalEngine;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Quoting,
    Recovering,
    ShuttingDown,
}

impl<G, S> MarketMaker<G, S>
where
    G: ExchangeGateway + 'static,
    S: SignalEngine,
{
    /// Read the starting position. Idempotent.
    pub fn init(&mut self) -> Result<(), EngineError> {
        if self.state != LifecycleState::Init {
            return Ok(());
        }

        let instrument = self.exchange.instrument()?;
        self.starting_qty = self.exchange.position()?.quantity;

        info!("Using symbol {}.", instrument.symbol);
        if self.exchange.is_dry_run() {
            info!("Initializing dry run. Orders printed below represent what would be posted to the exchange.");
        } else {
            info!("Order manager initializing. Live run: executing real trades.");
        }
        for path in self.watcher.watched() {
            info!("Watching {:?} for changes", path);
        }

        self.state = LifecycleState::Quoting;
        Ok(())
    }

    /// SIGINT / SIGTERM run the cleanup and exit 0. Call once per process.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        self.shutdown.install_signal_handler()
    }

    /// Loop until a restart is needed, the hook fires, or something fatal happens.
    /// The cleanup runs on every way out, panics included.
    pub fn run(&mut self) -> Result<CycleOutcome, EngineError> {
        let _guard = self.shutdown.guard();
        self.init().map_err(|e| self.fail(e))?;

        while !self.shutdown.has_fired() {
            debug!("-----");
            let outcome = self.run_once().map_err(|e| self.fail(e))?;
            if outcome == CycleOutcome::Restart {
                info!("Restarting the market maker...");
                return Ok(outcome);
            }
            thread::sleep(self.settings.runtime.loop_interval());
        }
        Ok(CycleOutcome::Continue)
    }

    /// One poll cycle. Does nothing once the shutdown hook has fired.
    pub fn run_once(&mut self) -> Result<CycleOutcome, EngineError> {
        let cycle = Arc::clone(&self.cycle);
        let _cycle = cycle.lock();
        if self.shutdown.has_fired() {
            debug!("Shutdown in progress, skipping cycle");
            return Ok(CycleOutcome::Continue);
        }

        self.init()?;

        if let Some(path) = self.watcher.changed() {
            info!("{:?} has been changed.", path);
            self.state = LifecycleState::Recovering;
            return Ok(CycleOutcome::Restart);
        }

        if !self.exchange.is_connection_open() {
            error!("Realtime data connection unexpectedly closed, restarting.");
            self.state = LifecycleState::Recovering;
            return Ok(CycleOutcome::Restart);
        }

        let (snapshot, anchors) = self.sanity_check()?;
        self.print_status(&snapshot);
        self.place_orders(snapshot, anchors)?;
        Ok(CycleOutcome::Continue)
    }

    /// Book not empty, market open, first rungs not crossing the touch.
    pub fn sanity_check(&self) -> Result<(Arc<MarketSnapshot>, QuoteAnchors), EngineError> {
        let snapshot = self.exchange.snapshot()?;
        check_if_orderbook_empty(&snapshot.instrument)?;
        check_market_open(&snapshot.instrument)?;

        let snapshot = self.snapshots.publish(snapshot);
        let anchors = QuoteAnchors::compute(&snapshot, &self.settings.quoting)?;
        let first_buy = anchors.price_offset(-1)?;
        let first_sell = anchors.price_offset(1)?;
        let ticker = snapshot.ticker;

        if first_buy >= ticker.best_ask || first_sell <= ticker.best_bid {
            let tick_log = anchors.tick_log;
            error!(
                "Buy: {:.*}, Sell: {:.*}",
                tick_log, anchors.start_buy, tick_log, anchors.start_sell
            );
            error!(
                "First buy position: {:.*}, best ask: {:.*}, first sell position: {:.*}, best bid: {:.*}",
                tick_log, first_buy, tick_log, ticker.best_ask, tick_log, first_sell, tick_log, ticker.best_bid
            );
            return Err(EngineError::SanityCheckFailed {
                reason: "exchange data is inconsistent".to_string(),
            });
        }

        let position = snapshot.position.quantity;
        if self.risk.long_limit_exceeded(position) {
            info!("Long delta limit exceeded");
            info!(
                "Current Position: {}, Maximum Position: {}",
                position,
                self.risk.params().max_position
            );
        }
        if self.risk.short_limit_exceeded(position) {
            info!("Short delta limit exceeded");
            info!(
                "Current Position: {}, Minimum Position: {}",
                position,
                self.risk.params().min_position
            );
        }

        Ok((snapshot, anchors))
    }

    /// Cancel everything and close the feed. Safe to call any number of times.
    pub fn shutdown(&mut self, reason: &str) -> bool {
        self.state = LifecycleState::ShuttingDown;
        info!("Shutting down. All open orders will be cancelled.");
        self.shutdown.trigger(reason)
    }

    // every fatal path: log the cause, run cleanup, pass the error on
    fn fail(&mut self, err: EngineError) -> EngineError {
        error!("{}", err);
        warn!("Fatal error, cancelling orders before exit");
        self.shutdown(&err.to_string());
        err
    }
}
