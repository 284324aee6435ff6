// 8.3: quote convergence. diff the desired ladder against live quotes, then amend, create, cancel.
// an amend that races a fill re-runs the whole reconciliation on fresh data, a bounded number of times.

use super::core::MarketMaker;
use super::results::{ConvergeResult, EngineError};
use crate::convergence::{build_ladder, diff, refresh_amendments, PendingActions};
use crate::events::{
    summarize, AmendRetriedEvent, CancelReason, EventPayload, OrdersAmendedEvent, OrdersCanceledEvent,
    OrdersCreatedEvent,
};
use crate::gateway::{ExchangeGateway, GatewayError};
use crate::market::MarketSnapshot;
use crate::quote::QuoteAnchors;
use crate::signal::SignalEngine;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread;

impl<G, S> MarketMaker<G, S>
where
    G: ExchangeGateway + 'static,
    S: SignalEngine,
{
    /// Bring live quotes in line with the ladder computed from `snapshot`.
    pub fn converge_orders(
        &mut self,
        snapshot: Arc<MarketSnapshot>,
        anchors: QuoteAnchors,
    ) -> Result<ConvergeResult, EngineError> {
        let max_retries = self.settings.quoting.max_amend_retries;
        let mut snapshot = snapshot;
        let mut anchors = anchors;
        let mut retries = 0u32;

        loop {
            let desired = build_ladder(
                &anchors,
                &self.settings.quoting,
                &self.risk,
                snapshot.position.quantity,
                &mut self.rng,
            )?;
            let actions = diff(
                &snapshot.symbol,
                &snapshot.open_orders,
                &desired,
                self.settings.quoting.relist_interval,
            );

            match self.execute(&snapshot, actions, anchors.tick_log) {
                Ok(mut result) => {
                    result.retries = retries;
                    return Ok(result);
                }
                Err(err) if err.is_invalid_order_state() => {
                    retries += 1;
                    if retries > max_retries {
                        error!("Amend failed {} times in a row, giving up", retries);
                        return Err(EngineError::AmendRetriesExhausted { attempts: retries });
                    }
                    warn!(
                        "Amending failed. Waiting for order data to converge and retrying. [{}/{}]",
                        retries, max_retries
                    );
                    self.emit_event(EventPayload::AmendRetried(AmendRetriedEvent {
                        symbol: snapshot.symbol.clone(),
                        attempt: retries,
                        reason: err.to_string(),
                    }));
                    thread::sleep(self.settings.quoting.amend_retry_wait());

                    snapshot = self.refresh_snapshot()?;
                    anchors = QuoteAnchors::compute(&snapshot, &self.settings.quoting)?;
                }
                Err(err) => {
                    error!("Unknown error on amend: {}. Exiting", err);
                    return Err(err);
                }
            }
        }
    }

    // amends first so the book never holds both the old and the replacement rung
    fn execute(
        &self,
        snapshot: &MarketSnapshot,
        actions: PendingActions,
        tick_log: usize,
    ) -> Result<ConvergeResult, EngineError> {
        let mut result = ConvergeResult::default();
        let symbol = &snapshot.symbol;

        if !actions.to_amend.is_empty() {
            let amendments = if self.settings.quoting.verify_fills_before_amend {
                let fresh = self.exchange.open_orders()?;
                refresh_amendments(&actions.to_amend, &fresh).ok_or_else(|| {
                    GatewayError::InvalidOrderState("order changed before amend".to_string())
                })?
            } else {
                actions.to_amend
            };

            for amend in &amendments {
                let old = &amend.original;
                info!(
                    "Amending {}: {} @ {:.*} to {} @ {:.*}",
                    amend.side(),
                    old.remaining(),
                    tick_log,
                    old.limit_price().map(|p| p.value()).unwrap_or_default(),
                    amend.target_remaining(),
                    tick_log,
                    amend.price.map(|p| p.value()).unwrap_or_default()
                );
            }

            result.amended = self.exchange.amend_orders(&amendments)?;
            self.emit_event(EventPayload::OrdersAmended(OrdersAmendedEvent {
                symbol: symbol.clone(),
                orders: summarize(&result.amended),
            }));
        }

        if !actions.to_create.is_empty() {
            info!("Creating {} orders:", actions.to_create.len());
            for request in &actions.to_create {
                info!(
                    "{} {} @ {:.*}",
                    request.side,
                    request.quantity,
                    tick_log,
                    request.order_type.reference_price().map(|p| p.value()).unwrap_or_default()
                );
            }

            result.created = self.exchange.create_orders(&actions.to_create)?;
            self.emit_event(EventPayload::OrdersCreated(OrdersCreatedEvent {
                symbol: symbol.clone(),
                orders: summarize(&result.created),
            }));
        }

        if !actions.to_cancel.is_empty() {
            info!("Canceling {} orders:", actions.to_cancel.len());
            for order in &actions.to_cancel {
                info!(
                    "{} {} @ {:.*}",
                    order.side,
                    order.remaining(),
                    tick_log,
                    order.limit_price().map(|p| p.value()).unwrap_or_default()
                );
            }

            result.canceled = self.exchange.cancel_orders(&actions.to_cancel)?;
            self.emit_event(EventPayload::OrdersCanceled(OrdersCanceledEvent {
                symbol: symbol.clone(),
                orders: summarize(&result.canceled),
                reason: CancelReason::Surplus,
            }));
        }

        Ok(result)
    }
}
