#![allow(non_snake_case)]

use lottery_sync::{
    LedgerError,
    RawGameRecord,
    SyncEngine,
    SyncHandle,
    clock::AnchoredClock,
    config::SyncConfig,
    endpoints::Endpoint,
    test_helpers::{
        FakeLedger,
        addr,
        context,
        record,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::time::{
    Instant,
    sleep_until,
};

const START: u64 = 1_700_000_000;

struct Harness {
    ledger: FakeLedger,
    handle: SyncHandle,
    origin: Instant,
}

impl Harness {
    fn start(ledger: FakeLedger, urls: &[&str]) -> Self {
        let origin = Instant::now();
        let handle = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(ledger.clone()),
            Arc::new(context(urls)),
            Arc::new(AnchoredClock::starting_at(START)),
            addr("0xc"),
        )
        .start();
        Self {
            ledger,
            handle,
            origin,
        }
    }

    async fn at_ms(&self, ms: u64) {
        sleep_until(self.origin + Duration::from_millis(ms)).await;
    }
}

fn ledger_with(game: RawGameRecord) -> FakeLedger {
    let ledger = FakeLedger::new();
    ledger.register_game(addr("0xc"), addr("0xee"));
    ledger.set_record(addr("0xee"), game);
    ledger
}

fn active_game(secs_left: u64) -> RawGameRecord {
    record(addr("0xc"), true, START + secs_left)
}

fn waiting_game() -> RawGameRecord {
    record(addr("0xc"), false, 0)
}

#[tokio::test(start_paused = true)]
async fn engine__first_poll_runs_immediately() {
    // given
    let harness = Harness::start(ledger_with(active_game(60)), &["http://a"]);

    // when
    harness.at_ms(1).await;

    // then
    let state = harness.handle.snapshot();
    assert_eq!(state.time_left, 60);
    assert!(state.is_game_active);
    assert_eq!(state.prize_pool, 100_000_000);
    assert_eq!(state.resolved_address, Some(addr("0xee")));
    assert_eq!(state.sequence, 1);
    assert_eq!(harness.ledger.read_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn engine__polls_every_five_seconds_while_active() {
    let harness = Harness::start(ledger_with(active_game(600)), &["http://a"]);

    harness.at_ms(4_999).await;
    assert_eq!(harness.ledger.read_calls(), 1);
    harness.at_ms(5_001).await;
    assert_eq!(harness.ledger.read_calls(), 2);
    harness.at_ms(10_001).await;
    assert_eq!(harness.ledger.read_calls(), 3);
    assert_eq!(harness.ledger.resolve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn engine__polls_every_ten_seconds_while_waiting() {
    let harness = Harness::start(ledger_with(waiting_game()), &["http://a"]);

    harness.at_ms(9_999).await;
    assert_eq!(harness.ledger.read_calls(), 1);
    harness.at_ms(10_001).await;
    assert_eq!(harness.ledger.read_calls(), 2);
    harness.at_ms(19_999).await;
    assert_eq!(harness.ledger.read_calls(), 2);
    harness.at_ms(20_001).await;
    assert_eq!(harness.ledger.read_calls(), 3);
    assert!(!harness.handle.snapshot().is_game_active);
}

#[tokio::test(start_paused = true)]
async fn engine__local_tick_counts_down_and_ends_game() {
    // given
    let mut game = active_game(3);
    game.last_buyer = Some(addr("0xb"));
    let harness = Harness::start(ledger_with(game), &["http://a"]);
    let mut states = harness.handle.subscribe();

    // when
    harness.at_ms(1_001).await;
    let after_one = harness.handle.snapshot();
    harness.at_ms(3_001).await;
    let after_three = harness.handle.snapshot();

    // then
    assert_eq!(after_one.time_left, 2);
    assert!(after_one.is_game_active);
    assert_eq!(after_one.winner, None);
    assert_eq!(after_three.time_left, 0);
    assert!(!after_three.is_game_active);
    assert_eq!(after_three.winner, Some(addr("0xb")));
    assert_eq!(harness.ledger.read_calls(), 1);
    assert!(states.has_changed().unwrap());
    assert_eq!(states.borrow_and_update().time_left, 0);
}

#[tokio::test(start_paused = true)]
async fn engine__manual_refresh_runs_leading_and_one_trailing() {
    // given
    let harness = Harness::start(ledger_with(waiting_game()), &["http://a"]);
    harness.at_ms(1_000).await;

    // when
    harness.handle.refresh();
    harness.at_ms(1_001).await;
    let after_leading = harness.ledger.read_calls();
    harness.at_ms(1_100).await;
    harness.handle.refresh();
    harness.at_ms(1_200).await;
    harness.handle.refresh();
    harness.at_ms(1_699).await;
    let before_trailing = harness.ledger.read_calls();
    harness.at_ms(1_701).await;
    let after_trailing = harness.ledger.read_calls();
    harness.at_ms(9_000).await;

    // then
    assert_eq!(after_leading, 2);
    assert_eq!(before_trailing, 2);
    assert_eq!(after_trailing, 3);
    assert_eq!(harness.ledger.read_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn engine__single_refresh_has_no_trailing_run() {
    let harness = Harness::start(ledger_with(waiting_game()), &["http://a"]);
    harness.at_ms(1_000).await;

    harness.handle.refresh();
    harness.at_ms(5_000).await;

    assert_eq!(harness.ledger.read_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn engine__slow_older_read_does_not_overwrite_newer_state() {
    // given
    let ledger = ledger_with(RawGameRecord {
        ticket_price: 10,
        ..waiting_game()
    });
    ledger.push_latency(Duration::from_secs(3));
    let harness = Harness::start(ledger, &["http://a"]);

    // when
    harness.at_ms(1_000).await;
    harness.ledger.set_record(
        addr("0xee"),
        RawGameRecord {
            ticket_price: 20,
            ..waiting_game()
        },
    );
    harness.handle.refresh();
    harness.at_ms(1_001).await;
    let fresh = harness.handle.snapshot();
    harness.at_ms(3_001).await;

    // then
    assert_eq!(fresh.ticket_price, 20);
    assert_eq!(fresh.sequence, 2);
    let state = harness.handle.snapshot();
    assert_eq!(state.ticket_price, 20);
    assert_eq!(state.sequence, 2);
}

#[tokio::test(start_paused = true)]
async fn engine__poll_skipped_while_scheduled_read_in_flight() {
    let ledger = ledger_with(waiting_game());
    ledger.push_latency(Duration::from_secs(12));
    let harness = Harness::start(ledger, &["http://a"]);

    harness.at_ms(10_001).await;
    assert_eq!(harness.ledger.read_calls(), 1);
    harness.at_ms(19_999).await;
    assert_eq!(harness.ledger.read_calls(), 1);
    assert_eq!(harness.handle.snapshot().sequence, 1);
    harness.at_ms(20_001).await;
    assert_eq!(harness.ledger.read_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn engine__single_unreachable_endpoint_backs_off_then_surfaces_error() {
    // given
    let ledger = ledger_with(waiting_game());
    ledger.fail_always(LedgerError::Unreachable("connection refused".into()));
    let harness = Harness::start(ledger, &["http://only"]);

    // when / then
    harness.at_ms(1).await;
    let first = harness.handle.snapshot();
    assert_eq!(harness.ledger.calls().len(), 1);
    assert_eq!(first.retry_count, 1);
    assert_eq!(first.last_error, None);

    harness.at_ms(1_999).await;
    assert_eq!(harness.ledger.calls().len(), 1);
    harness.at_ms(2_001).await;
    assert_eq!(harness.ledger.calls().len(), 2);
    assert_eq!(harness.handle.snapshot().retry_count, 2);

    harness.at_ms(5_999).await;
    assert_eq!(harness.ledger.calls().len(), 2);
    harness.at_ms(6_001).await;
    assert_eq!(harness.ledger.calls().len(), 3);

    harness.at_ms(13_999).await;
    assert_eq!(harness.ledger.calls().len(), 3);
    harness.at_ms(14_001).await;
    let exhausted = harness.handle.snapshot();
    assert_eq!(harness.ledger.calls().len(), 4);
    assert_eq!(exhausted.retry_count, 4);
    let error = exhausted.last_error.expect("error surfaced after retries");
    assert!(error.contains("unreachable"), "{error}");

    harness.at_ms(19_999).await;
    assert_eq!(harness.ledger.calls().len(), 4);
    harness.at_ms(20_001).await;
    assert_eq!(harness.ledger.calls().len(), 5);
    assert_eq!(harness.handle.snapshot().retry_count, 5);
    assert!(
        harness
            .ledger
            .calls()
            .iter()
            .all(|call| call.endpoint == Endpoint::new("http://only"))
    );
}

#[tokio::test(start_paused = true)]
async fn engine__success_after_failures_resets_error_and_retries() {
    // given
    let ledger = ledger_with(active_game(600));
    ledger.fail_next(LedgerError::Unreachable("timeout".into()));
    let harness = Harness::start(ledger, &["http://only"]);
    harness.at_ms(1).await;
    assert_eq!(harness.handle.snapshot().retry_count, 1);

    // when
    harness.at_ms(2_001).await;

    // then
    let state = harness.handle.snapshot();
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.last_error, None);
    assert!(state.is_game_active);
}

#[tokio::test(start_paused = true)]
async fn engine__recovers_on_next_poll_after_retries_run_out() {
    // given
    let ledger = ledger_with(waiting_game());
    ledger.fail_always(LedgerError::Unreachable("connection refused".into()));
    let harness = Harness::start(ledger, &["http://only"]);
    harness.at_ms(14_001).await;
    assert!(harness.handle.snapshot().last_error.is_some());

    // when
    harness.ledger.heal();
    harness.at_ms(20_001).await;

    // then
    let state = harness.handle.snapshot();
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.last_error, None);
    assert!(!state.is_game_active);
}

#[tokio::test(start_paused = true)]
async fn engine__rotates_past_failing_endpoints_within_one_cycle() {
    // given
    let ledger = ledger_with(active_game(60));
    ledger.fail_endpoint(
        Endpoint::new("http://a"),
        LedgerError::Unreachable("dns".into()),
    );
    ledger.fail_endpoint(
        Endpoint::new("http://b"),
        LedgerError::Unreachable("502".into()),
    );

    // when
    let harness = Harness::start(ledger, &["http://a", "http://b", "http://c"]);
    harness.at_ms(1).await;

    // then
    let tried: Vec<Endpoint> = harness
        .ledger
        .calls()
        .into_iter()
        .map(|call| call.endpoint)
        .collect();
    assert_eq!(
        tried,
        vec![
            Endpoint::new("http://a"),
            Endpoint::new("http://b"),
            Endpoint::new("http://c"),
            Endpoint::new("http://c"),
        ]
    );
    let state = harness.handle.snapshot();
    assert_eq!(state.retry_count, 0);
    assert!(state.is_game_active);
}

#[tokio::test(start_paused = true)]
async fn engine__rate_limited_cycle_waits_longer() {
    let ledger = ledger_with(waiting_game());
    ledger.fail_always(LedgerError::RateLimited("429".into()));
    let harness = Harness::start(ledger, &["http://a", "http://b"]);

    harness.at_ms(3_999).await;
    assert_eq!(harness.ledger.calls().len(), 2);
    harness.at_ms(4_001).await;
    assert_eq!(harness.ledger.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn engine__missing_game_reports_error_without_retry() {
    let harness = Harness::start(FakeLedger::new(), &["http://a", "http://b"]);

    harness.at_ms(1).await;
    let state = harness.handle.snapshot();
    assert_eq!(state.retry_count, 1);
    let error = state.last_error.expect("missing game reported");
    assert!(error.contains("no game registered"), "{error}");

    harness.at_ms(9_999).await;
    assert_eq!(harness.ledger.calls().len(), 1);
    harness.at_ms(10_001).await;
    assert_eq!(harness.ledger.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn engine__shutdown_is_idempotent_and_freezes_state() {
    // given
    let ledger = ledger_with(active_game(60));
    ledger.push_latency(Duration::from_secs(3));
    let mut harness = Harness::start(ledger, &["http://a"]);
    let mut states = harness.handle.subscribe();
    harness.at_ms(1_000).await;

    // when
    harness.handle.shutdown().await;
    harness.handle.shutdown().await;
    harness.at_ms(30_000).await;

    // then
    assert!(!harness.handle.is_running());
    assert_eq!(harness.ledger.read_calls(), 1);
    assert_eq!(harness.handle.snapshot().sequence, 0);
    assert!(states.changed().await.is_err());
    harness.handle.refresh();
}

#[tokio::test(start_paused = true)]
async fn engine__dropping_handle_stops_polling() {
    // given
    let ledger = ledger_with(waiting_game());
    let harness = Harness::start(ledger.clone(), &["http://a"]);
    harness.at_ms(1).await;
    let origin = harness.origin;

    // when
    drop(harness);
    sleep_until(origin + Duration::from_secs(60)).await;

    // then
    assert_eq!(ledger.read_calls(), 1);
}
