mod common;

use chrono::{Duration, Timelike, Utc};
use common::{
    SYMBOL, Script, an_hour_ago, harness, harness_stalling_market_data, harness_with, running_position, settings,
};
use core_types::{
    CalendarTrigger, MarketCondition, RecurringInterval, RecurringTrigger, ScheduledSwapStatus,
    ScheduledTradeStatus, SwapExecutionStatus, SwapTrigger, SyncScope, TradeStatus, TradeTrigger,
};
use database::Repository;
use engine::{ExecutionOutcome, ScheduleManager, ScheduledSwapRequest};
use std::sync::atomic::Ordering;
use rust_decimal_macros::dec;

#[tokio::test]
async fn due_trade_is_placed_exactly_once() {
    let h = harness();
    let alice = h.user("alice").await;
    h.market(dec!(60000)).await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;

    let (first, second) = tokio::join!(h.scheduler.run_trigger_tick(), h.scheduler.run_trigger_tick());
    assert_eq!(first.executed + second.executed, 1);
    assert_eq!(h.venue.orders_placed(), 1);

    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Triggered);
    let trade_id = stored.executed_trade_id.expect("triggered schedules link their trade");
    let trade = h.repo.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Running);
    assert_eq!(trade.venue_id.as_deref(), Some("order-1"));

    // Triggered schedules are no longer evaluated.
    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.evaluated, 0);
    assert_eq!(h.venue.orders_placed(), 1);

    // The post-execution balance sync priced 250,000 sats at 60,000.
    let user = h.repo.get_user(alice.id).await.unwrap().unwrap();
    assert_eq!(user.balance, dec!(250000));
    assert_eq!(user.balance_usd, dec!(150.00));
}

#[tokio::test]
async fn replaying_a_claimed_schedule_sends_nothing() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.script_orders(Script::RateLimit);

    let orchestrator = h.scheduler.orchestrator();
    let first = orchestrator.execute_trade(&schedule).await.unwrap();
    assert!(matches!(first, ExecutionOutcome::Deferred(_)));
    let replay = orchestrator.execute_trade(&schedule).await.unwrap();
    assert_eq!(replay, ExecutionOutcome::AlreadyClaimed);
    assert_eq!(h.venue.orders_placed(), 1);
}

#[tokio::test]
async fn venue_rejection_fails_the_schedule_and_cancels_the_trade() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.script_orders(Script::Reject);

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.rejected, 1);

    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Failed);
    assert!(stored.executed_trade_id.is_none());
    assert!(stored.error_message.unwrap().contains("not enough margin"));

    let trades = h.repo.list_trades(alice.id).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Cancelled);
}

#[tokio::test]
async fn transient_failure_keeps_the_schedule_armed() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.script_orders(Script::RateLimit);

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.deferred, 1);

    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Pending);
    assert!(stored.error_message.is_some());
    assert!(stored.last_checked_at.is_some());

    // Still inside the guard window: evaluated, but not sent again.
    h.venue.script_orders(Script::Accept);
    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.already_claimed, 1);
    assert_eq!(h.venue.orders_placed(), 1);
}

#[tokio::test]
async fn retry_succeeds_once_the_guard_has_passed() {
    let h = harness_with(
        configuration::SchedulerConfig { duplicate_guard: std::time::Duration::ZERO, ..settings() },
        &[],
    );
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.script_orders(Script::RateLimit);
    h.scheduler.run_trigger_tick().await;

    h.venue.script_orders(Script::Accept);
    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.executed, 1);
    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Triggered);
}

#[tokio::test]
async fn user_without_credentials_fails_without_a_trade_row() {
    let h = harness();
    let bob = h.repo.add_user("bob", core_types::Network::Testnet, None).await;
    let schedule = h.scheduled_trade(&bob, an_hour_ago()).await;

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.rejected, 1);
    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Failed);
    assert!(h.repo.list_trades(bob.id).await.unwrap().is_empty());
    assert_eq!(h.venue.orders_placed(), 0);
}

#[tokio::test]
async fn price_conditions_wait_for_market_data() {
    let h = harness();
    let alice = h.user("alice").await;
    h.scheduled_trade(&alice, TradeTrigger::PriceRange { low: dec!(59000), high: dec!(61000) }).await;

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.condition_errors, 1);
    assert_eq!(h.venue.orders_placed(), 0);

    h.market(dec!(62000)).await;
    assert_eq!(h.scheduler.run_trigger_tick().await.not_due, 1);

    h.market(dec!(60500)).await;
    assert_eq!(h.scheduler.run_trigger_tick().await.executed, 1);
}

#[tokio::test]
async fn calendar_swap_completes_and_is_audited() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h
        .scheduled_swap(&alice, SwapTrigger::Calendar(CalendarTrigger { date_time: Utc::now() - Duration::minutes(1) }))
        .await;

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.executed, 1);

    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledSwapStatus::Completed);
    assert!(stored.last_executed_at.is_some());

    let history = h.repo.list_swap_executions(schedule.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SwapExecutionStatus::Success);
    assert!(history[0].swap_id.is_some());
}

#[tokio::test]
async fn recurring_swap_stays_active_and_fires_once_per_slot() {
    let h = harness();
    let alice = h.user("alice").await;
    let now = Utc::now();
    let schedule = h
        .scheduled_swap(
            &alice,
            SwapTrigger::Recurring(RecurringTrigger {
                interval: RecurringInterval::Daily,
                hour: now.hour(),
                minute: now.minute(),
                day_of_week: None,
                day_of_month: None,
                start_date: None,
                end_date: None,
            }),
        )
        .await;

    assert_eq!(h.scheduler.run_trigger_tick().await.executed, 1);
    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledSwapStatus::Active);

    // Same slot: the last execution falls inside its window.
    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.not_due, 1);
    assert_eq!(h.venue.swaps_executed(), 1);
}

#[tokio::test]
async fn failed_swap_is_audited_and_left_active() {
    let h = harness();
    let alice = h.user("alice").await;
    h.market(dec!(55000)).await;
    let schedule = h
        .scheduled_swap(&alice, SwapTrigger::MarketCondition(MarketCondition::Below { target_price: dec!(56000) }))
        .await;
    h.venue.script_swaps(Script::Reject);

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.rejected, 1);

    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledSwapStatus::Active);
    assert!(stored.last_executed_at.is_none());

    let history = h.repo.list_swap_executions(schedule.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SwapExecutionStatus::Failed);
    assert!(history[0].swap_id.is_none());
    assert!(history[0].failure_reason.as_deref().unwrap().contains("not enough margin"));
}

#[tokio::test]
async fn market_tick_stores_the_ticker() {
    let h = harness();
    let market = h.scheduler.run_market_tick().await.unwrap();
    assert_eq!(market.last_price, dec!(60000));
    assert_eq!(market.mark_price, dec!(60000));

    let stored = h.repo.get_market_data(SYMBOL).await.unwrap().unwrap();
    assert_eq!(stored, market);
}

#[tokio::test]
async fn loops_run_and_stop_on_shutdown() {
    let fast = configuration::SchedulerConfig {
        trigger_interval: std::time::Duration::from_millis(20),
        market_interval: std::time::Duration::from_millis(20),
        reconciliation_interval: std::time::Duration::from_millis(20),
        shutdown_grace: std::time::Duration::from_secs(5),
        ..settings()
    };
    let h = harness_with(fast, &[]);
    let alice = h.user("alice").await;
    h.venue.positions.lock().unwrap().push(running_position("remote-1", dec!(10)));

    let handle = h.scheduler.clone().start();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(handle.shutdown().await);

    assert!(h.repo.get_market_data(SYMBOL).await.unwrap().is_some());
    assert_eq!(h.repo.list_trades(alice.id).await.unwrap().len(), 1);

    // Nothing runs after shutdown.
    let orders = h.venue.orders_placed();
    h.scheduled_trade(&alice, an_hour_ago()).await;
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert_eq!(h.venue.orders_placed(), orders);
}

#[tokio::test]
async fn reconciliation_tick_reports_totals() {
    let h = harness();
    h.user("alice").await;
    h.venue.positions.lock().unwrap().push(running_position("remote-1", dec!(10)));

    let report = h.scheduler.run_reconciliation_tick(SyncScope::Running).await.unwrap();
    assert_eq!(report.users, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.failed_users, 0);
}

fn no_guard() -> configuration::SchedulerConfig {
    configuration::SchedulerConfig { duplicate_guard: std::time::Duration::ZERO, ..settings() }
}

fn manager(h: &common::Harness) -> ScheduleManager {
    ScheduleManager::new(h.repo.clone(), settings(), SYMBOL)
}

#[tokio::test]
async fn cancel_during_placement_is_not_overwritten() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.slow_down(std::time::Duration::from_millis(300));

    let scheduler = h.scheduler.clone();
    let tick = tokio::spawn(async move { scheduler.run_trigger_tick().await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let cancelled = manager(&h).cancel_scheduled_trade(alice.id, schedule.id).await.unwrap();
    assert_eq!(cancelled.status, ScheduledTradeStatus::Cancelled);

    // The order still went out and is kept, but the cancel stands.
    assert_eq!(tick.await.unwrap().executed, 1);
    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Cancelled);
    assert!(stored.executed_trade_id.is_none());
    let trades = h.repo.list_trades(alice.id).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].venue_id.as_deref(), Some("order-1"));
}

#[tokio::test]
async fn executed_schedule_cannot_be_cancelled_afterwards() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    assert_eq!(h.scheduler.run_trigger_tick().await.executed, 1);

    let err = manager(&h).cancel_scheduled_trade(alice.id, schedule.id).await.unwrap_err();
    assert!(matches!(err, engine::error::EngineError::Domain(core_types::CoreError::InvalidTransition { .. })));
    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Triggered);
    assert!(stored.executed_trade_id.is_some());
}

#[tokio::test]
async fn order_edited_after_listing_is_the_one_sent() {
    let h = harness();
    let alice = h.user("alice").await;
    let listed = h.scheduled_trade(&alice, an_hour_ago()).await;

    let mut edited = listed.clone();
    edited.order.margin = Some(dec!(20000));
    assert!(h.repo.update_scheduled_trade(&edited).await.unwrap());

    let outcome = h.scheduler.orchestrator().execute_trade(&listed).await.unwrap();
    let trade = match outcome {
        ExecutionOutcome::Executed(trade) => trade,
        other => panic!("expected an execution, got {:?}", other),
    };
    assert_eq!(trade.margin, dec!(20000));
}

#[tokio::test]
async fn cancel_during_swap_keeps_the_schedule_cancelled() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h
        .scheduled_swap(&alice, SwapTrigger::Calendar(CalendarTrigger { date_time: Utc::now() - Duration::minutes(1) }))
        .await;
    h.venue.slow_down(std::time::Duration::from_millis(300));

    let scheduler = h.scheduler.clone();
    let tick = tokio::spawn(async move { scheduler.run_trigger_tick().await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    manager(&h).cancel_scheduled_swap(alice.id, schedule.id).await.unwrap();

    assert_eq!(tick.await.unwrap().executed, 1);
    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledSwapStatus::Cancelled);
    assert!(stored.last_executed_at.is_some());
    let history = h.repo.list_swap_executions(schedule.id).await.unwrap();
    assert_eq!(history[0].status, SwapExecutionStatus::Success);
}

#[tokio::test]
async fn editing_a_recurring_swap_does_not_rearm_its_slot() {
    let h = harness_with(no_guard(), &[]);
    let alice = h.user("alice").await;
    let now = Utc::now();
    let trigger = SwapTrigger::Recurring(RecurringTrigger {
        interval: RecurringInterval::Daily,
        hour: now.hour(),
        minute: now.minute(),
        day_of_week: None,
        day_of_month: None,
        start_date: None,
        end_date: None,
    });
    let schedule = h.scheduled_swap(&alice, trigger.clone()).await;
    assert_eq!(h.scheduler.run_trigger_tick().await.executed, 1);

    let request = ScheduledSwapRequest {
        name: "stack more sats".into(),
        description: None,
        swap_direction: core_types::SwapDirection::UsdToBtc,
        amount: dec!(150),
        trigger,
    };
    let edited = manager(&h).update_scheduled_swap(alice.id, schedule.id, request).await.unwrap();
    assert_eq!(edited.amount, dec!(150));

    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert!(stored.last_executed_at.is_some());
    assert_eq!(h.scheduler.run_trigger_tick().await.not_due, 1);
    assert_eq!(h.venue.swaps_executed(), 1);
}

#[tokio::test]
async fn unreadable_swap_answer_completes_the_one_shot() {
    let h = harness_with(no_guard(), &[]);
    let alice = h.user("alice").await;
    let schedule = h
        .scheduled_swap(&alice, SwapTrigger::Calendar(CalendarTrigger { date_time: Utc::now() - Duration::minutes(1) }))
        .await;
    h.venue.script_swaps(Script::Unreadable);

    let report = h.scheduler.run_trigger_tick().await;
    assert_eq!(report.unrecorded, 1);
    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledSwapStatus::Completed);
    assert!(stored.last_executed_at.is_some());

    let history = h.repo.list_swap_executions(schedule.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SwapExecutionStatus::Success);
    assert!(history[0].swap_id.is_none());
    assert!(history[0].failure_reason.as_deref().unwrap().contains("expected USD -> BTC"));

    // Even with no guard window, the swap is never sent again.
    assert_eq!(h.scheduler.run_trigger_tick().await.evaluated, 0);
    assert_eq!(h.venue.swaps_executed(), 1);
}

#[tokio::test]
async fn unreadable_market_condition_swap_is_not_repeated() {
    let h = harness_with(no_guard(), &[]);
    let alice = h.user("alice").await;
    h.market(dec!(55000)).await;
    let schedule = h
        .scheduled_swap(&alice, SwapTrigger::MarketCondition(MarketCondition::Below { target_price: dec!(56000) }))
        .await;
    h.venue.script_swaps(Script::Unreadable);

    h.scheduler.run_trigger_tick().await;
    h.scheduler.run_trigger_tick().await;
    assert_eq!(h.venue.swaps_executed(), 1);
    let stored = h.repo.get_scheduled_swap(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledSwapStatus::Completed);
}

#[tokio::test]
async fn unreadable_order_answer_triggers_the_schedule() {
    let h = harness_with(no_guard(), &[]);
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.script_orders(Script::Unreadable);

    assert_eq!(h.scheduler.run_trigger_tick().await.unrecorded, 1);
    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Triggered);
    assert!(stored.error_message.is_some());
    let trade = h.repo.get_trade(stored.executed_trade_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);

    assert_eq!(h.scheduler.run_trigger_tick().await.evaluated, 0);
    assert_eq!(h.venue.orders_placed(), 1);
}

#[tokio::test]
async fn order_adopted_by_reconciliation_mid_flight_is_linked() {
    let h = harness();
    let alice = h.user("alice").await;
    let schedule = h.scheduled_trade(&alice, an_hour_ago()).await;
    h.venue.slow_down(std::time::Duration::from_millis(300));
    h.venue.show_orders_early();

    let scheduler = h.scheduler.clone();
    let tick = tokio::spawn(async move { scheduler.run_trigger_tick().await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let summary = h.scheduler.reconciler().sync_user(&alice, SyncScope::Running).await.unwrap();
    assert_eq!(summary.created, 1);
    let adopted = h.repo.find_trade_by_venue_id(alice.id, "order-1").await.unwrap().unwrap();

    assert_eq!(tick.await.unwrap().executed, 1);
    let stored = h.repo.get_scheduled_trade(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduledTradeStatus::Triggered);
    assert_eq!(stored.executed_trade_id, Some(adopted.id));

    let trades = h.repo.list_trades(alice.id).await.unwrap();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().any(|t| t.id != adopted.id && t.status == TradeStatus::Cancelled));
    assert_eq!(h.venue.orders_placed(), 1);
}

#[tokio::test]
async fn stalled_snapshot_read_does_not_hold_up_a_swap() {
    let fast = configuration::SchedulerConfig {
        repository_timeout: std::time::Duration::from_millis(100),
        ..settings()
    };
    let h = harness_stalling_market_data(fast, std::time::Duration::from_secs(30));
    let alice = h.user("alice").await;
    let schedule = h
        .scheduled_swap(&alice, SwapTrigger::Calendar(CalendarTrigger { date_time: Utc::now() - Duration::minutes(1) }))
        .await;
    h.venue.ticker_down.store(true, Ordering::SeqCst);

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        h.scheduler.orchestrator().execute_swap(&schedule),
    )
    .await
    .expect("every repository read is bounded")
    .unwrap();
    let swap = match outcome {
        ExecutionOutcome::Executed(swap) => swap,
        other => panic!("expected an execution, got {:?}", other),
    };
    assert_eq!(swap.exchange_rate, rust_decimal::Decimal::ZERO);
}
