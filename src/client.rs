use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use lottery_sync::{
    AccountAddress,
    SyncContext,
    SyncEngine,
    SyncHandle,
    SyncState,
    aptos::AptosTransport,
    clock::SystemClock,
    config::WatchConfig,
    reconcile::format_apt,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{
    info,
    warn,
};

pub async fn run_app(config: WatchConfig, creator: AccountAddress, headless: bool) -> Result<()> {
    let transport = AptosTransport::new(&config)?;
    let selector = config.selector()?;
    let label = ui::WatchLabel {
        network: config.network.to_string(),
        creator,
        endpoints: selector.len(),
    };
    let engine = SyncEngine::new(
        config.sync.clone(),
        Arc::new(transport),
        Arc::new(SyncContext::new(selector)),
        Arc::new(SystemClock),
        creator,
    );
    info!(%creator, network = %config.network, mode = ?config.read_mode, "watching game");
    let mut handle = engine.start();

    let res = if headless {
        run_headless(&handle).await
    } else {
        let mut ui_state = ui::UiState::new(label);
        ui::terminal_enter(&mut ui_state)?;
        let res = run_loop(&handle, &mut ui_state).await;
        ui::terminal_exit()?;
        res
    };
    handle.shutdown().await;
    res
}

async fn run_loop(handle: &SyncHandle, ui_state: &mut ui::UiState) -> Result<()> {
    let mut states = handle.subscribe();
    let mut input_events = ui::spawn_input_thread();
    ui::draw(ui_state, &states.borrow_and_update())?;
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("sync engine stopped unexpectedly");
                    break;
                }
                let snapshot = states.borrow_and_update().clone();
                ui::draw(ui_state, &snapshot).wrap_err("draw after state change failed")?;
            }
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(&mut input_events) => {
                let Some(ev) = ui::interpret_event(raw_ev?) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Refresh => handle.refresh(),
                    ui::UserEvent::Redraw => {
                        let snapshot = handle.snapshot();
                        ui::draw(ui_state, &snapshot)?;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_headless(handle: &SyncHandle) -> Result<()> {
    let mut states: watch::Receiver<SyncState> = handle.subscribe();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("sync engine stopped unexpectedly");
                    break;
                }
                log_state(&states.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, exiting");
                break;
            }
        }
    }
    Ok(())
}

fn log_state(state: &SyncState) {
    match &state.last_error {
        Some(error) => warn!(retry_count = state.retry_count, %error, "game state unavailable"),
        None => info!(
            phase = %state.phase,
            time_left = state.time_left,
            prize_pool = %format_apt(state.prize_pool),
            ticket_price = %format_apt(state.ticket_price),
            last_buyer = ?state.last_buyer,
            winner = ?state.winner,
            retry_count = state.retry_count,
            "game state"
        ),
    }
}
