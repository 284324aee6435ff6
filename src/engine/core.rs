// 8.0 engine/core.rs: the MarketMaker struct. exchange adapter, signal, limits, snapshot, events, cleanup hook.

use super::lifecycle::LifecycleState;
use super::results::EngineError;
use crate::config::Settings;
use crate::events::{Event, EventLog, EventPayload, ShutdownCompletedEvent};
use crate::gateway::{ExchangeAdapter, ExchangeGateway, GatewayError};
use crate::market::{MarketSnapshot, SnapshotCell};
use crate::risk::RiskGuard;
use crate::shutdown::ShutdownHook;
use crate::signal::SignalEngine;
use crate::types::{SignedSize, Timestamp};
use crate::watcher::ResourceWatcher;
use log::{error, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/** 8.1: main engine struct. nothing about orders is cached here, only wiring */
pub struct MarketMaker<G, S> {
    pub(super) settings: Settings,
    pub(super) exchange: Arc<ExchangeAdapter<G>>,
    pub(super) signal: S,
    pub(super) risk: RiskGuard,
    pub(super) snapshots: Arc<SnapshotCell>,
    pub(super) events: Arc<Mutex<EventLog>>,
    pub(super) watcher: ResourceWatcher,
    pub(super) shutdown: Arc<ShutdownHook>,
    // held for a whole cycle and by the cleanup, so the two never interleave
    pub(super) cycle: Arc<Mutex<()>>,
    pub(super) state: LifecycleState,
    pub(super) starting_qty: SignedSize,
    pub(super) rng: StdRng,
}

impl<G, S> MarketMaker<G, S>
where
    G: ExchangeGateway + 'static,
    S: SignalEngine,
{
    pub fn new(gateway: G, signal: S, settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;

        let exchange = Arc::new(ExchangeAdapter::new(gateway, &settings.exchange));
        let events = Arc::new(Mutex::new(EventLog::new(settings.runtime.max_events)));
        let cycle = Arc::new(Mutex::new(()));
        let shutdown = cleanup_hook(Arc::clone(&exchange), Arc::clone(&events), Arc::clone(&cycle));

        Ok(Self {
            risk: RiskGuard::new(settings.risk.clone()),
            watcher: ResourceWatcher::new(settings.runtime.watched_files.as_slice()),
            settings,
            exchange,
            signal,
            snapshots: Arc::new(SnapshotCell::new()),
            events,
            shutdown,
            cycle,
            state: LifecycleState::Init,
            starting_qty: SignedSize::zero(),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn exchange(&self) -> &ExchangeAdapter<G> {
        &self.exchange
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Shared handle the market-data side can publish into.
    pub fn snapshot_cell(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshots)
    }

    pub fn latest_snapshot(&self) -> Option<Arc<MarketSnapshot>> {
        self.snapshots.load()
    }

    pub fn shutdown_hook(&self) -> Arc<ShutdownHook> {
        Arc::clone(&self.shutdown)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().events().to_vec()
    }

    pub(super) fn emit_event(&self, payload: EventPayload) {
        self.events.lock().emit(Timestamp::now(), payload);
    }

    pub(super) fn refresh_snapshot(&self) -> Result<Arc<MarketSnapshot>, EngineError> {
        Ok(self.snapshots.publish(self.exchange.snapshot()?))
    }
}

// cancel everything, drop the feed. an unauthenticated session has nothing to cancel.
// waits out any cycle in flight so orders it is placing are seen by the cancel.
fn cleanup_hook<G: ExchangeGateway + 'static>(
    exchange: Arc<ExchangeAdapter<G>>,
    events: Arc<Mutex<EventLog>>,
    cycle: Arc<Mutex<()>>,
) -> Arc<ShutdownHook> {
    ShutdownHook::new(move |reason| {
        let _cycle = cycle.lock();
        let canceled = match exchange.cancel_all_orders() {
            Ok(orders) => orders.len(),
            Err(GatewayError::Authentication(msg)) => {
                info!("Was not authenticated ({}); could not cancel orders.", msg);
                0
            }
            Err(e) => {
                error!("Unable to cancel orders: {}", e);
                0
            }
        };
        exchange.close();

        events.lock().emit(
            Timestamp::now(),
            EventPayload::ShutdownCompleted(ShutdownCompletedEvent {
                reason: reason.to_string(),
                canceled,
            }),
        );
    })
}
