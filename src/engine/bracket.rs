// 8.5: bracket lifecycle. entry plus stop, take-profit once the entry has filled, then
// keep the protection trailing the market for as long as the position is open.

use super::core::MarketMaker;
use super::results::{BracketOutcome, EngineError};
use crate::bracket::{orphaned_protection, plan_adjustments, plan_repairs, BracketPlan};
use crate::events::{
    summarize, BracketPlacedEvent, CancelReason, EventPayload, OrdersCanceledEvent, OrdersCreatedEvent,
    ProtectionAdjustedEvent, ProtectionKind,
};
use crate::gateway::{ExchangeGateway, GatewayError};
use crate::market::MarketSnapshot;
use crate::order::{Order, OrderType};
use crate::portfolio::order_margin;
use crate::risk::RiskCheckResult;
use crate::signal::SignalEngine;
use crate::types::Side;
use log::{info, warn};
use std::thread;

impl<G, S> MarketMaker<G, S>
where
    G: ExchangeGateway + 'static,
    S: SignalEngine,
{
    pub fn manage_bracket(&mut self, snapshot: &MarketSnapshot) -> Result<BracketOutcome, EngineError> {
        if snapshot.position.is_open() {
            return self.manage_protection(snapshot);
        }

        let canceled = if self.settings.bracket.cancel_orphaned_protection {
            self.cancel_orphans(snapshot)?
        } else {
            0
        };

        let Some(side) = self.signal.evaluate(snapshot).side() else {
            return Ok(idle_or_managed(canceled));
        };

        if let RiskCheckResult::Blocked(violation) = self.risk.check_entry(side, snapshot.position.quantity) {
            info!("Entry {} blocked: {:?}", side, violation);
            return Ok(idle_or_managed(canceled));
        }

        let size = self.settings.bracket.entry_size;
        let required = order_margin(&snapshot.instrument, size, snapshot.ticker.mid);
        if required > snapshot.margin.available_funds {
            warn!(
                "Not enough funds for {} {}: need {}, have {}",
                side, size, required, snapshot.margin.available_funds
            );
            return Ok(idle_or_managed(canceled));
        }

        self.place_bracket(snapshot, side)
    }

    /// Market entry and stop in one batch, the take-profit after the entry has had time to fill.
    pub fn place_bracket(&mut self, snapshot: &MarketSnapshot, side: Side) -> Result<BracketOutcome, EngineError> {
        let params = &self.settings.bracket;
        let plan = BracketPlan::new(
            &snapshot.symbol,
            side,
            params.entry_size,
            snapshot.ticker.mid,
            snapshot.instrument.tick_size,
            params,
        )?;

        info!(
            "Opening {} {} @ market, stop {}, take profit {}",
            side,
            params.entry_size,
            display_price(&plan.stop.order_type),
            display_price(&plan.take_profit.order_type)
        );

        let first = self.exchange.create_orders(&plan.first_batch())?;
        let (entry, stop) = match first.as_slice() {
            [entry, stop, ..] => (entry.clone(), stop.clone()),
            _ => {
                return Err(GatewayError::Rejected {
                    reason: format!("expected entry and stop, got {} orders", first.len()),
                }
                .into())
            }
        };

        thread::sleep(self.settings.bracket.take_profit_delay());

        let take_profit = self
            .exchange
            .create_orders(std::slice::from_ref(&plan.take_profit))?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Rejected {
                reason: "take profit was not acknowledged".to_string(),
            })?;

        self.emit_event(EventPayload::BracketPlaced(BracketPlacedEvent {
            symbol: snapshot.symbol.clone(),
            side,
            quantity: self.settings.bracket.entry_size,
            stop_price: stop.trigger_price(),
            take_profit_price: take_profit.limit_price(),
        }));

        Ok(BracketOutcome::Placed {
            entry,
            stop,
            take_profit,
        })
    }

    // trail what exists, recreate what is missing
    fn manage_protection(&mut self, snapshot: &MarketSnapshot) -> Result<BracketOutcome, EngineError> {
        let params = &self.settings.bracket;
        let tick = snapshot.instrument.tick_size;
        let mid = snapshot.ticker.mid;

        let amendments = plan_adjustments(&snapshot.position, &snapshot.open_orders, mid, tick, params)?;
        let repairs = if params.repair_protection {
            plan_repairs(&snapshot.position, &snapshot.open_orders, mid, tick, params)?
        } else {
            Vec::new()
        };

        let mut moves = Vec::with_capacity(amendments.len());
        for amend in &amendments {
            let (kind, from, to) = match amend.original.order_type {
                OrderType::Stop { trigger_price } => (ProtectionKind::Stop, Some(trigger_price), amend.trigger_price),
                _ => (ProtectionKind::TakeProfit, amend.original.limit_price(), amend.price),
            };
            info!(
                "Moving {:?} {}: {} -> {}",
                kind,
                amend.order_id,
                from.map(|p| p.to_string()).unwrap_or_default(),
                to.map(|p| p.to_string()).unwrap_or_default()
            );
            moves.push(ProtectionAdjustedEvent {
                symbol: snapshot.symbol.clone(),
                order_id: amend.order_id.clone(),
                kind,
                from,
                to,
            });
        }
        let amended = self.exchange.amend_orders(&amendments)?;
        for adjusted in moves {
            self.emit_event(EventPayload::ProtectionAdjusted(adjusted));
        }

        for request in &repairs {
            warn!(
                "Position {} has no {} protection, placing {} {} @ {}",
                snapshot.position.quantity,
                request.order_type,
                request.side,
                request.quantity,
                display_price(&request.order_type)
            );
        }
        let created = self.exchange.create_orders(&repairs)?;
        if !created.is_empty() {
            self.emit_event(EventPayload::OrdersCreated(OrdersCreatedEvent {
                symbol: snapshot.symbol.clone(),
                orders: summarize(&created),
            }));
        }

        Ok(BracketOutcome::Managed {
            amended: amended.len(),
            created: created.len(),
            canceled: 0,
        })
    }

    fn cancel_orphans(&self, snapshot: &MarketSnapshot) -> Result<usize, EngineError> {
        let orphans: Vec<Order> = orphaned_protection(&snapshot.open_orders, &snapshot.position)
            .into_iter()
            .cloned()
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }

        info!("Position is flat, canceling {} leftover protective orders", orphans.len());
        let canceled = self.exchange.cancel_orders(&orphans)?;
        self.emit_event(EventPayload::OrdersCanceled(OrdersCanceledEvent {
            symbol: snapshot.symbol.clone(),
            orders: summarize(&canceled),
            reason: CancelReason::Orphaned,
        }));
        Ok(canceled.len())
    }
}

fn idle_or_managed(canceled: usize) -> BracketOutcome {
    if canceled == 0 {
        BracketOutcome::Idle
    } else {
        BracketOutcome::Managed {
            amended: 0,
            created: 0,
            canceled,
        }
    }
}

fn display_price(order_type: &OrderType) -> String {
    order_type
        .reference_price()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "market".to_string())
}
