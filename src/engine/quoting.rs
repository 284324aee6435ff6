// 8.2: per-cycle order placement and status output.

use super::core::MarketMaker;
use super::results::EngineError;
use crate::gateway::ExchangeGateway;
use crate::market::MarketSnapshot;
use crate::portfolio::calc_delta;
use crate::quote::QuoteAnchors;
use crate::signal::SignalEngine;
use crate::types::Price;
use log::info;
use rust_decimal::Decimal;
use std::sync::Arc;

/// What [`MarketMaker::print_status`] logs, for callers that want the numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub margin_balance: Decimal,
    pub position: Decimal,
    pub avg_cost_price: Option<Price>,
    pub avg_entry_price: Option<Price>,
    pub contracts_traded: Decimal,
    pub spot_delta: Decimal,
}

impl<G, S> MarketMaker<G, S>
where
    G: ExchangeGateway + 'static,
    S: SignalEngine,
{
    /// Quote ladder first (when enabled), then the bracket.
    pub fn place_orders(
        &mut self,
        snapshot: Arc<MarketSnapshot>,
        anchors: QuoteAnchors,
    ) -> Result<(), EngineError> {
        if self.settings.quoting.order_pairs > 0 {
            self.converge_orders(Arc::clone(&snapshot), anchors)?;
        }

        // convergence may have re-read the market; brackets work off the newest view
        let latest = self.latest_snapshot().unwrap_or(snapshot);
        self.manage_bracket(&latest)?;
        Ok(())
    }

    pub fn status(&self, snapshot: &MarketSnapshot) -> StatusReport {
        let position = &snapshot.position;
        StatusReport {
            margin_balance: snapshot.margin.margin_balance,
            position: position.quantity.value(),
            avg_cost_price: position.avg_cost_price,
            avg_entry_price: position.avg_entry_price,
            contracts_traded: position.quantity.value() - self.starting_qty.value(),
            spot_delta: calc_delta(&snapshot.portfolio).spot,
        }
    }

    pub fn print_status(&self, snapshot: &MarketSnapshot) -> StatusReport {
        let report = self.status(snapshot);
        let tick_log = snapshot.instrument.tick_log;

        info!("Current Balance: {:.6}", report.margin_balance);
        info!("Current Contract Position: {}", report.position);
        if self.risk.params().check_position_limits {
            info!(
                "Position limits: {}/{}",
                self.risk.params().min_position,
                self.risk.params().max_position
            );
        }
        if snapshot.position.is_open() {
            if let Some(cost) = report.avg_cost_price {
                info!("Avg Cost Price: {:.*}", tick_log, cost);
            }
            if let Some(entry) = report.avg_entry_price {
                info!("Avg Entry Price: {:.*}", tick_log, entry);
            }
        }
        info!("Contracts Traded This Run: {}", report.contracts_traded);
        info!("Total Contract Delta: {:.4}", report.spot_delta);
        if let (Some(bid), Some(ask)) = (snapshot.depth.best_bid(), snapshot.depth.best_ask()) {
            info!(
                "Current Depth: bid {:.*} x {}, ask {:.*} x {} ({} / {} over {} levels)",
                tick_log,
                bid.price,
                bid.size,
                tick_log,
                ask.price,
                ask.size,
                snapshot.depth.total_bid_size(),
                snapshot.depth.total_ask_size(),
                snapshot.depth.bids.len().max(snapshot.depth.asks.len())
            );
        }

        report
    }
}
