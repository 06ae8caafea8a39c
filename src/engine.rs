//! The driver that owns [`SyncState`] and every timer around it.
//!
//! A single task runs a `select!` over the command channel, finished cycles,
//! and four deadlines: the authoritative poll, a scheduled retry, the local
//! countdown tick, and the trailing edge of a manual refresh burst. Cycles run
//! as separate tasks so reads may overlap; each carries a sequence number and
//! only outcomes newer than the last applied one reach the state.

use crate::{
    address::AccountAddress,
    backoff::{
        Backoff,
        RetryDecision,
    },
    clock::Clock,
    config::SyncConfig,
    debounce::Debouncer,
    ledger::{
        LedgerTransport,
        RawGameRecord,
    },
    pipeline::{
        CycleFailure,
        Observation,
        SyncContext,
        run_cycle,
    },
    reconcile::SyncState,
};
use std::{
    fmt,
    sync::Arc,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    task::{
        JoinError,
        JoinHandle,
        JoinSet,
    },
    time::{
        self,
        Instant,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollPhase {
    Idle,
    /// A scheduled cycle is in flight.
    Polling { seq: u64 },
    Backoff { until: Instant },
    /// Retries used up; waiting for the next regular poll.
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerState {
    Ticking { next: Instant },
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    Poll,
    Retry,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Poll => "poll",
            Trigger::Retry => "retry",
            Trigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    Shutdown,
}

type CycleOutcome = (u64, Trigger, Result<Observation, CycleFailure>);

/// Keeps one game's [`SyncState`] current.
pub struct SyncEngine<T, C> {
    config: SyncConfig,
    transport: Arc<T>,
    context: Arc<SyncContext>,
    clock: Arc<C>,
    creator: AccountAddress,
}

impl<T: LedgerTransport, C: Clock> SyncEngine<T, C> {
    pub fn new(
        config: SyncConfig,
        transport: Arc<T>,
        context: Arc<SyncContext>,
        clock: Arc<C>,
        creator: AccountAddress,
    ) -> Self {
        Self {
            config,
            transport,
            context,
            clock,
            creator,
        }
    }

    /// Spawns the driver on the current tokio runtime. The first poll runs
    /// immediately.
    pub fn start(self) -> SyncHandle {
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(self, state_tx);
        let task = tokio::spawn(driver.run(cmd_rx));
        SyncHandle {
            commands: cmd_tx,
            state: state_rx,
            task: Some(task),
        }
    }
}

/// Owner's side of a running engine. Dropping it stops the engine.
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Requests an out-of-band sync, coalesced with other recent requests.
    pub fn refresh(&self) {
        if self.commands.send(Command::Refresh).is_err() {
            debug!("refresh requested after sync engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops every timer and in-flight read. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if let Err(err) = task.await {
            if !err.is_cancelled() {
                warn!(?err, "sync engine task ended abnormally");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver<T, C> {
    config: SyncConfig,
    transport: Arc<T>,
    context: Arc<SyncContext>,
    clock: Arc<C>,
    creator: AccountAddress,
    state: SyncState,
    record: Option<RawGameRecord>,
    poll: PollPhase,
    timer: TimerState,
    next_poll: Instant,
    backoff: Backoff,
    debounce: Debouncer,
    next_seq: u64,
    applied_seq: u64,
    cycles: JoinSet<CycleOutcome>,
    state_tx: watch::Sender<SyncState>,
}

impl<T: LedgerTransport, C: Clock> Driver<T, C> {
    fn new(engine: SyncEngine<T, C>, state_tx: watch::Sender<SyncState>) -> Self {
        let SyncEngine {
            config,
            transport,
            context,
            clock,
            creator,
        } = engine;
        let backoff = Backoff::new(config.backoff.clone());
        let debounce = Debouncer::new(config.debounce);
        Self {
            config,
            transport,
            context,
            clock,
            creator,
            state: SyncState::default(),
            record: None,
            poll: PollPhase::Idle,
            timer: TimerState::Stopped,
            next_poll: Instant::now(),
            backoff,
            debounce,
            next_seq: 0,
            applied_seq: 0,
            cycles: JoinSet::new(),
            state_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(creator = %self.creator, "sync engine started");
        loop {
            let retry_at = match self.poll {
                PollPhase::Backoff { until } => Some(until),
                _ => None,
            };
            let tick_at = match self.timer {
                TimerState::Ticking { next } => Some(next),
                TimerState::Stopped => None,
            };
            let trailing_at = self.debounce.deadline();

            tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(Command::Refresh) => self.on_refresh(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(joined) = self.cycles.join_next(), if !self.cycles.is_empty() => {
                    self.on_joined(joined);
                }
                _ = time::sleep_until(self.next_poll) => self.on_poll_due(),
                _ = sleep_opt(retry_at) => self.on_retry_due(),
                _ = sleep_opt(tick_at) => self.on_tick_due(),
                _ = sleep_opt(trailing_at) => self.on_trailing_due(),
            }
        }
        self.debounce.cancel();
        self.cycles.shutdown().await;
        info!(creator = %self.creator, "sync engine stopped");
    }

    fn on_poll_due(&mut self) {
        let interval = self.config.poll_interval(self.state.is_game_active);
        self.next_poll = Instant::now() + interval;
        match self.poll {
            PollPhase::Backoff { .. } | PollPhase::Polling { .. } => {
                debug!(phase = ?self.poll, "skipping poll");
            }
            PollPhase::Exhausted | PollPhase::Idle => {
                // every regular poll gets a fresh retry budget
                self.backoff.begin_episode();
                self.launch(Trigger::Poll);
            }
        }
    }

    fn on_retry_due(&mut self) {
        self.poll = PollPhase::Idle;
        self.launch(Trigger::Retry);
    }

    fn on_refresh(&mut self) {
        if self.debounce.request(Instant::now()) {
            self.launch(Trigger::Manual);
        }
    }

    fn on_trailing_due(&mut self) {
        if self.debounce.settle(Instant::now()) {
            self.launch(Trigger::Manual);
        }
    }

    fn on_tick_due(&mut self) {
        let TimerState::Ticking { next } = self.timer else {
            return;
        };
        if let Some(record) = &self.record {
            let now = self.clock.now_unix();
            if self.state.tick(record, &self.creator, now) {
                self.publish();
            }
        }
        self.timer = if self.state.is_game_active {
            TimerState::Ticking {
                next: next + self.config.tick,
            }
        } else {
            debug!("countdown reached zero");
            TimerState::Stopped
        };
    }

    fn launch(&mut self, trigger: Trigger) {
        self.next_seq += 1;
        let seq = self.next_seq;
        if trigger != Trigger::Manual {
            self.poll = PollPhase::Polling { seq };
        }
        debug!(seq, %trigger, "starting sync cycle");
        let transport = Arc::clone(&self.transport);
        let context = Arc::clone(&self.context);
        let creator = self.creator;
        self.cycles.spawn(async move {
            let outcome = run_cycle(&context, transport.as_ref(), &creator).await;
            (seq, trigger, outcome)
        });
    }

    fn on_joined(&mut self, joined: Result<CycleOutcome, JoinError>) {
        match joined {
            Ok((seq, trigger, outcome)) => self.on_cycle_finished(seq, trigger, outcome),
            Err(err) => {
                warn!(?err, "sync cycle task failed");
                if self.cycles.is_empty() && matches!(self.poll, PollPhase::Polling { .. }) {
                    self.poll = PollPhase::Idle;
                }
            }
        }
    }

    fn on_cycle_finished(
        &mut self,
        seq: u64,
        trigger: Trigger,
        outcome: Result<Observation, CycleFailure>,
    ) {
        if self.poll == (PollPhase::Polling { seq }) {
            self.poll = PollPhase::Idle;
        }
        if seq < self.applied_seq {
            debug!(seq, applied = self.applied_seq, %trigger, "discarding stale sync outcome");
            return;
        }
        self.applied_seq = seq;
        match outcome {
            Ok(observation) => self.on_success(seq, observation),
            Err(failure) => self.on_failure(seq, trigger, failure),
        }
        self.publish();
    }

    fn on_success(&mut self, seq: u64, observation: Observation) {
        let now = self.clock.now_unix();
        let Observation {
            record,
            resolved,
            endpoint,
        } = observation;
        self.backoff.on_success();
        if matches!(self.poll, PollPhase::Backoff { .. } | PollPhase::Exhausted) {
            self.poll = PollPhase::Idle;
        }
        self.state
            .reconcile(&record, &self.creator, resolved, now, seq);
        self.record = Some(record);
        debug!(
            seq,
            %endpoint,
            time_left = self.state.time_left,
            active = self.state.is_game_active,
            "applied game state"
        );

        let at = Instant::now();
        if self.state.is_game_active {
            if self.timer == TimerState::Stopped {
                self.timer = TimerState::Ticking {
                    next: at + self.config.tick,
                };
            }
            self.next_poll = self.next_poll.min(at + self.config.active_poll);
        } else {
            self.timer = TimerState::Stopped;
        }
    }

    fn on_failure(&mut self, seq: u64, trigger: Trigger, failure: CycleFailure) {
        self.state.record_failure();
        match self.backoff.on_failure(failure.class()) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    seq,
                    %trigger,
                    attempts = failure.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.error,
                    "sync cycle failed, retry scheduled"
                );
                self.poll = PollPhase::Backoff {
                    until: Instant::now() + delay,
                };
            }
            RetryDecision::Exhausted => {
                warn!(
                    seq,
                    %trigger,
                    retry_count = self.state.retry_count,
                    error = %failure.error,
                    "sync retries exhausted"
                );
                self.state.surface_error(failure.error.to_string());
                self.poll = PollPhase::Exhausted;
            }
            RetryDecision::GiveUp => {
                warn!(seq, %trigger, error = %failure.error, "sync cycle failed");
                self.state.surface_error(failure.error.to_string());
                if !matches!(self.poll, PollPhase::Polling { .. }) {
                    self.poll = PollPhase::Idle;
                }
            }
        }
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|current| {
            if *current == self.state {
                return false;
            }
            *current = self.state.clone();
            true
        });
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
