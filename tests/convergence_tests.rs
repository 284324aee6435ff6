//! Convergence tests
//!
//! Drive the market maker against the in-memory exchange and check that live quotes
//! end up matching the ladder, including when fills race the amends.

use mm_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

type Bot = MarketMaker<Arc<SimulatedExchange>, HoldSignal>;

fn settings(order_pairs: u32) -> Settings {
    let mut settings = Settings::instant();
    settings.quoting.order_pairs = order_pairs;
    settings
}

fn setup(settings: Settings) -> (Arc<SimulatedExchange>, Bot) {
    let _ = env_logger::builder().is_test(true).try_init();
    let exchange = Arc::new(SimulatedExchange::xbtusd(dec!(10000), dec!(10000.5)));
    let bot = MarketMaker::new(Arc::clone(&exchange), HoldSignal, settings).unwrap();
    (exchange, bot)
}

fn quote(side: Side, quantity: Decimal, price: Price) -> OrderRequest {
    OrderRequest::limit(Symbol::new("XBTUSD"), side, quantity, price)
}

fn quotes(exchange: &SimulatedExchange, side: Side) -> Vec<Order> {
    exchange
        .resting_orders()
        .into_iter()
        .filter(|o| o.is_quote() && o.side == side)
        .collect()
}

/// Fresh start, quote ladder placement, steady state.
mod placement_tests {
    use super::*;

    #[test]
    fn first_cycle_places_full_ladder() {
        let (exchange, mut bot) = setup(settings(2));
        assert_eq!(bot.run_once().unwrap(), CycleOutcome::Continue);

        let buys = quotes(&exchange, Side::Buy);
        let sells = quotes(&exchange, Side::Sell);
        assert_eq!(buys.len(), 2);
        assert_eq!(sells.len(), 2);

        // outermost first, all buys below all sells
        let buy_prices: Vec<_> = buys.iter().filter_map(Order::limit_price).collect();
        let sell_prices: Vec<_> = sells.iter().filter_map(Order::limit_price).collect();
        assert!(buy_prices[0] < buy_prices[1]);
        assert!(sell_prices[0] > sell_prices[1]);
        assert!(buy_prices[1] < sell_prices[1]);

        // inner rung gets the start size, outer rung one step more
        assert_eq!(buys[1].quantity, dec!(100));
        assert_eq!(buys[0].quantity, dec!(200));
        assert_eq!(exchange.calls(SimCall::Create), 1);
    }

    #[test]
    fn unchanged_market_is_a_noop() {
        let (exchange, mut bot) = setup(settings(3));
        bot.run_once().unwrap();
        let placed = exchange.resting_orders();

        bot.run_once().unwrap();
        bot.run_once().unwrap();

        assert_eq!(exchange.resting_orders(), placed);
        assert_eq!(exchange.calls(SimCall::Create), 1);
        assert_eq!(exchange.calls(SimCall::Amend), 0);
        assert_eq!(exchange.calls(SimCall::Cancel), 0);
    }

    #[test]
    fn market_move_amends_in_place() {
        let (exchange, mut bot) = setup(settings(2));
        bot.run_once().unwrap();
        let ids: Vec<OrderId> = exchange.resting_orders().into_iter().map(|o| o.id).collect();

        let ticker = Ticker::from_bid_ask(
            Price::new_unchecked(dec!(10500)),
            Price::new_unchecked(dec!(10500.5)),
            dec!(0.5),
        )
        .unwrap();
        exchange.set_ticker(ticker);
        bot.run_once().unwrap();

        let after: Vec<OrderId> = exchange.resting_orders().into_iter().map(|o| o.id).collect();
        assert_eq!(after, ids);
        assert_eq!(exchange.calls(SimCall::Amend), 1);
        assert_eq!(exchange.calls(SimCall::Create), 1);
        assert!(quotes(&exchange, Side::Buy)
            .iter()
            .all(|o| o.limit_price().unwrap().value() > dec!(10300)));
    }

    #[test]
    fn disabled_ladder_places_nothing() {
        let (exchange, mut bot) = setup(settings(0));
        bot.run_once().unwrap();
        assert!(exchange.resting_orders().is_empty());
        assert_eq!(exchange.calls(SimCall::Create), 0);
    }
}

/// Surplus, shortfall and partial fills.
mod reconcile_tests {
    use super::*;

    #[test]
    fn surplus_quotes_are_canceled() {
        let (exchange, mut bot) = setup(settings(1));
        for price in [dec!(9000), dec!(9100), dec!(9200)] {
            exchange.seed_order(&quote(Side::Buy, dec!(100), Price::new_unchecked(price)));
        }

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        let result = bot.converge_orders(snapshot, anchors).unwrap();

        assert_eq!(result.amended.len(), 1);
        assert_eq!(result.canceled.len(), 2);
        assert_eq!(result.created.len(), 1);
        assert_eq!(quotes(&exchange, Side::Buy).len(), 1);
        assert_eq!(quotes(&exchange, Side::Sell).len(), 1);

        assert!(bot.events().iter().any(|e| matches!(
            &e.payload,
            EventPayload::OrdersCanceled(c) if c.reason == CancelReason::Surplus && c.orders.len() == 2
        )));
    }

    #[test]
    fn partial_fill_restores_remaining_size() {
        let (exchange, mut bot) = setup(settings(1));
        let (_, anchors) = bot.sanity_check().unwrap();
        let buy = exchange.seed_order(&quote(Side::Buy, dec!(100), anchors.price_offset(-1).unwrap()));
        exchange.seed_order(&quote(Side::Sell, dec!(100), anchors.price_offset(1).unwrap()));
        exchange.fill(&buy.id, dec!(40));

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        let result = bot.converge_orders(snapshot, anchors).unwrap();

        assert_eq!(result.amended.len(), 1);
        assert!(result.created.is_empty());
        let amended = &quotes(&exchange, Side::Buy)[0];
        assert_eq!(amended.id, buy.id);
        assert_eq!(amended.quantity, dec!(140));
        assert_eq!(amended.remaining(), dec!(100));
    }

    #[test]
    fn protective_orders_are_left_alone() {
        let (exchange, mut bot) = setup(settings(1));
        exchange.set_position(Position {
            quantity: SignedSize::new(dec!(100)),
            avg_entry_price: Some(Price::new_unchecked(dec!(10000))),
            avg_cost_price: Some(Price::new_unchecked(dec!(10000))),
            ..Position::flat(Symbol::new("XBTUSD"))
        });
        let tp = exchange.seed_order(&quote(Side::Sell, dec!(100), Price::new_unchecked(dec!(10100))).close_only());

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        let result = bot.converge_orders(snapshot, anchors).unwrap();

        assert!(result.amended.is_empty());
        assert!(result.canceled.is_empty());
        assert_eq!(result.created.len(), 2);
        assert!(exchange.resting_orders().iter().any(|o| o.id == tp.id));
    }

    #[test]
    fn position_limit_drops_one_side() {
        let mut config = settings(2);
        config.risk.check_position_limits = true;
        config.risk.max_position = dec!(50);
        let (exchange, mut bot) = setup(config);
        exchange.set_position(Position {
            quantity: SignedSize::new(dec!(100)),
            ..Position::flat(Symbol::new("XBTUSD"))
        });

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        bot.converge_orders(snapshot, anchors).unwrap();

        assert!(quotes(&exchange, Side::Buy).is_empty());
        assert_eq!(quotes(&exchange, Side::Sell).len(), 2);
    }
}

/// Amends racing fills.
mod retry_tests {
    use super::*;

    fn seed_stale_ladder(exchange: &SimulatedExchange) -> Vec<Order> {
        vec![
            exchange.seed_order(&quote(Side::Buy, dec!(100), Price::new_unchecked(dec!(9000)))),
            exchange.seed_order(&quote(Side::Sell, dec!(100), Price::new_unchecked(dec!(11000)))),
        ]
    }

    #[test]
    fn rejected_amend_retries_on_fresh_data() {
        let (exchange, mut bot) = setup(settings(1));
        seed_stale_ladder(&exchange);
        exchange.fail_next(SimCall::Amend, GatewayError::from_reason("Invalid ordStatus"));

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        let result = bot.converge_orders(snapshot, anchors).unwrap();

        assert_eq!(result.retries, 1);
        assert_eq!(result.amended.len(), 2);
        assert_eq!(exchange.calls(SimCall::Amend), 2);
        assert!(bot
            .events()
            .iter()
            .any(|e| matches!(&e.payload, EventPayload::AmendRetried(r) if r.attempt == 1)));
    }

    #[test]
    fn vanished_order_is_caught_before_amend() {
        let (exchange, mut bot) = setup(settings(1));
        let seeded = seed_stale_ladder(&exchange);

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        // filled away between the read and the amend
        exchange.remove_order(&seeded[0].id);
        let result = bot.converge_orders(snapshot, anchors).unwrap();

        assert_eq!(result.retries, 1);
        // the stale batch never reached the exchange
        assert_eq!(exchange.calls(SimCall::Amend), 1);
        assert_eq!(result.created.len(), 1);
        assert_eq!(quotes(&exchange, Side::Buy).len(), 1);
        assert_eq!(quotes(&exchange, Side::Sell).len(), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let (exchange, mut bot) = setup(settings(1));
        seed_stale_ladder(&exchange);
        for _ in 0..3 {
            exchange.fail_next(SimCall::Amend, GatewayError::from_reason("Invalid ordStatus"));
        }

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        let err = bot.converge_orders(snapshot, anchors).unwrap_err();
        assert!(matches!(err, EngineError::AmendRetriesExhausted { attempts: 2 }));
    }

    #[test]
    fn other_rejections_are_fatal() {
        let (exchange, mut bot) = setup(settings(1));
        seed_stale_ladder(&exchange);
        exchange.fail_next(
            SimCall::Amend,
            GatewayError::from_reason("Account has insufficient Available Balance"),
        );

        let (snapshot, anchors) = bot.sanity_check().unwrap();
        let err = bot.converge_orders(snapshot, anchors).unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::Rejected { .. })));
        assert_eq!(exchange.calls(SimCall::Amend), 1);
    }
}
